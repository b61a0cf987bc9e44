//! Git operations for release branches.
//!
//! The release state machine talks to git through the [`VcsClient`] trait.
//! [`GitCli`] implements it by shelling out to `git`, which inherits the
//! user's SSH keys, signing setup, and hooks.

use std::process::Output;

use async_trait::async_trait;
use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, instrument};

/// Errors from git operations.
#[derive(Error, Debug)]
pub enum GitError {
    /// Failed to execute the `git` command.
    #[error("failed to run git: {0}")]
    Exec(#[from] std::io::Error),

    /// `git` returned a non-zero exit code.
    #[error("git {command} failed: {stderr}")]
    Command {
        /// The git subcommand that failed (e.g., "push").
        command: String,
        /// Captured stderr.
        stderr: String,
    },

    /// Not inside a git repository.
    #[error("not a git repository (or any parent up to mount point)")]
    NotARepo,

    /// A ref could not be resolved.
    #[error("unknown revision or ref: {0}")]
    RefNotFound(String),

    /// The operation stopped on conflicting changes.
    #[error("git {command} hit conflicts: {stderr}")]
    Conflict {
        /// The git subcommand that conflicted.
        command: String,
        /// Captured stderr.
        stderr: String,
    },
}

/// Result alias for git operations.
pub type GitResult<T> = Result<T, GitError>;

/// Working-tree summary used by the release preconditions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RepoStatus {
    /// Checked-out branch; `None` on a detached HEAD.
    pub current: Option<String>,
    /// Untracked or newly added paths.
    pub created: Vec<String>,
    /// Modified paths.
    pub modified: Vec<String>,
    /// Deleted paths.
    pub deleted: Vec<String>,
    /// Renamed paths (new name).
    pub renamed: Vec<String>,
    /// Paths with staged changes of any kind.
    pub staged: Vec<String>,
    /// Paths with unresolved merge conflicts.
    pub conflicted: Vec<String>,
    /// Local commits not on the upstream branch.
    pub ahead: u32,
}

impl RepoStatus {
    /// No pending changes of any kind.
    pub fn is_clean(&self) -> bool {
        self.created.is_empty()
            && self.modified.is_empty()
            && self.deleted.is_empty()
            && self.renamed.is_empty()
            && self.staged.is_empty()
            && self.conflicted.is_empty()
    }

    /// One-line summary of non-empty change lists, for error messages.
    pub fn describe_changes(&self) -> String {
        let lists = [
            ("created", &self.created),
            ("modified", &self.modified),
            ("deleted", &self.deleted),
            ("renamed", &self.renamed),
            ("staged", &self.staged),
            ("conflicted", &self.conflicted),
        ];
        lists
            .iter()
            .filter(|(_, paths)| !paths.is_empty())
            .map(|(label, paths)| format!("{label}: {}", paths.join(", ")))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Version control operations needed by the release state machine.
#[async_trait]
pub trait VcsClient: Send + Sync {
    /// Whether the working directory is inside a repository.
    async fn is_repo(&self) -> GitResult<bool>;

    /// Current branch, pending changes, and ahead count.
    async fn status(&self) -> GitResult<RepoStatus>;

    /// Resolve a ref to a commit SHA; [`GitError::RefNotFound`] if it doesn't exist.
    async fn revparse(&self, reference: &str) -> GitResult<String>;

    /// Create `name` from HEAD and switch to it.
    async fn checkout_local_branch(&self, name: &str) -> GitResult<()>;

    /// Commit with `message`; `all` stages every change first, new files included.
    async fn commit(&self, message: &str, all: bool) -> GitResult<()>;

    /// Push `branch` to `remote`.
    async fn push(&self, remote: &str, branch: &str, set_upstream: bool) -> GitResult<()>;

    /// Most recent tag reachable from HEAD, if any.
    async fn latest_tag(&self) -> GitResult<Option<String>>;
}

/// [`VcsClient`] backed by the `git` binary.
#[derive(Debug, Clone)]
pub struct GitCli {
    root: Utf8PathBuf,
}

impl GitCli {
    /// Run git commands inside `root`.
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The repository working directory.
    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// Top level of the working tree that contains [`root`](Self::root).
    #[instrument(skip(self))]
    pub async fn toplevel(&self) -> GitResult<Utf8PathBuf> {
        let out = self.git(&["rev-parse", "--show-toplevel"]).await?;
        Ok(Utf8PathBuf::from(out.trim()))
    }

    async fn output(&self, args: &[&str]) -> GitResult<Output> {
        debug!(?args, "git");
        Ok(Command::new("git")
            .args(args)
            .current_dir(self.root.as_std_path())
            .output()
            .await?)
    }

    /// Run a git command and return its stdout.
    async fn git(&self, args: &[&str]) -> GitResult<String> {
        let output = self.output(args).await?;

        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).to_string());
        }

        let mut stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if stderr.is_empty() {
            // `git commit` reports "nothing to commit" on stdout
            stderr = String::from_utf8_lossy(&output.stdout).trim().to_string();
        }
        let command = args.first().unwrap_or(&"").to_string();

        if stderr.contains("not a git repository") {
            return Err(GitError::NotARepo);
        }
        if stderr.contains("CONFLICT") || stderr.contains("unmerged") {
            return Err(GitError::Conflict { command, stderr });
        }
        Err(GitError::Command { command, stderr })
    }
}

#[async_trait]
impl VcsClient for GitCli {
    #[instrument(skip(self))]
    async fn is_repo(&self) -> GitResult<bool> {
        match self.git(&["rev-parse", "--is-inside-work-tree"]).await {
            Ok(out) => Ok(out.trim() == "true"),
            Err(GitError::NotARepo | GitError::Command { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    #[instrument(skip(self))]
    async fn status(&self) -> GitResult<RepoStatus> {
        let out = self.git(&["status", "--porcelain=v1", "--branch"]).await?;
        let status = parse_status(&out);
        debug!(clean = status.is_clean(), ahead = status.ahead, "repo status");
        Ok(status)
    }

    #[instrument(skip(self))]
    async fn revparse(&self, reference: &str) -> GitResult<String> {
        let spec = format!("{reference}^{{commit}}");
        match self.git(&["rev-parse", "--verify", "--quiet", &spec]).await {
            Ok(sha) => Ok(sha.trim().to_string()),
            Err(GitError::Command { .. }) => Err(GitError::RefNotFound(reference.to_string())),
            Err(e) => Err(e),
        }
    }

    #[instrument(skip(self))]
    async fn checkout_local_branch(&self, name: &str) -> GitResult<()> {
        self.git(&["checkout", "-b", name]).await.map(drop)
    }

    #[instrument(skip(self))]
    async fn commit(&self, message: &str, all: bool) -> GitResult<()> {
        if all {
            self.git(&["add", "--all"]).await?;
        }
        self.git(&["commit", "-m", message]).await.map(drop)
    }

    #[instrument(skip(self))]
    async fn push(&self, remote: &str, branch: &str, set_upstream: bool) -> GitResult<()> {
        let mut args = vec!["push"];
        if set_upstream {
            args.push("--set-upstream");
        }
        args.extend([remote, branch]);
        self.git(&args).await.map(drop)
    }

    #[instrument(skip(self))]
    async fn latest_tag(&self) -> GitResult<Option<String>> {
        match self.git(&["describe", "--tags", "--abbrev=0"]).await {
            Ok(tag) => Ok(Some(tag.trim().to_string()).filter(|t| !t.is_empty())),
            Err(GitError::Command { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Parse `git status --porcelain=v1 --branch` output.
pub fn parse_status(output: &str) -> RepoStatus {
    let mut status = RepoStatus::default();

    for line in output.lines() {
        if let Some(branch_line) = line.strip_prefix("## ") {
            parse_branch_line(branch_line, &mut status);
            continue;
        }
        if line.len() < 4 {
            continue;
        }
        let bytes = line.as_bytes();
        let (x, y) = (bytes[0] as char, bytes[1] as char);
        let path = &line[3..];
        let path = path
            .split_once(" -> ")
            .map_or(path, |(_, new)| new)
            .to_string();

        if is_conflict(x, y) {
            status.conflicted.push(path);
            continue;
        }
        if x == '?' {
            status.created.push(path);
            continue;
        }
        if x != ' ' {
            status.staged.push(path.clone());
        }
        match (x, y) {
            ('A', _) => status.created.push(path),
            ('R', _) => status.renamed.push(path),
            ('D', _) | (_, 'D') => status.deleted.push(path),
            ('M', _) | (_, 'M') | ('T', _) | (_, 'T') => status.modified.push(path),
            _ => {}
        }
    }

    status
}

fn parse_branch_line(line: &str, status: &mut RepoStatus) {
    let (head, tracking) = match line.split_once(" [") {
        Some((head, rest)) => (head, Some(rest.trim_end_matches(']'))),
        None => (line, None),
    };

    let branch = head.split_once("...").map_or(head, |(local, _)| local);
    status.current = if branch.starts_with("HEAD (no branch)") {
        None
    } else {
        Some(
            branch
                .strip_prefix("No commits yet on ")
                .unwrap_or(branch)
                .to_string(),
        )
    };

    if let Some(tracking) = tracking {
        for part in tracking.split(", ") {
            if let Some(n) = part.strip_prefix("ahead ") {
                status.ahead = n.trim().parse().unwrap_or(0);
            }
        }
    }
}

const fn is_conflict(x: char, y: char) -> bool {
    matches!(
        (x, y),
        ('U', _) | (_, 'U') | ('A', 'A') | ('D', 'D')
    )
}
