//! Release branch state machine.
//!
//! A release moves strictly forward through:
//!
//! ```text
//! Init → ChangelogChecked → GitStateValidated → BranchCreated → PreReleaseRun
//!      → Committed → Pushed → Done | Publishing
//! ```
//!
//! Every mutating step checks the [`RunContext`] first, so a dry run walks the
//! same states without touching the repository. Preconditions fail before the
//! first mutation. Once the branch is pushed, a failed publish is reported
//! with a recovery command and reflected in [`ReleaseOutcome::exit_code`],
//! never returned as an error.

use std::time::Duration;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

use crate::changes::{normalize_version, read_changeset};
use crate::context::RunContext;
use crate::error::ErrorKind;
use crate::git::{GitError, VcsClient};
use crate::hooks::{self, HookContext, HookError};
use crate::publish::{PublishHandoff, PublishReport};

/// Version used for the hook when no tag exists yet.
pub const INITIAL_VERSION: &str = "0.0.0";

/// Default wait between pushing and publishing.
pub const DEFAULT_PUBLISH_DELAY: Duration = Duration::from_secs(30);

/// Errors that stop a release.
#[derive(Error, Debug)]
pub enum ReleaseError {
    /// The version is not valid semver.
    #[error("invalid version {0:?}: expected semver like 1.2.3")]
    InvalidVersion(String),

    /// The changelog has no entry for the version.
    #[error("no changelog entry for {version} in {path}")]
    ChangelogMissing {
        /// Version being released.
        version: String,
        /// Changelog location.
        path: Utf8PathBuf,
    },

    /// The changelog could not be read.
    #[error("cannot read changelog {path}: {message}")]
    ChangelogUnreadable {
        /// Changelog location.
        path: Utf8PathBuf,
        /// Underlying error description.
        message: String,
    },

    /// Not inside a git repository.
    #[error("not a git repository")]
    NotARepo,

    /// Releases must start from the default branch.
    #[error("releases must start from {expected}, currently on {}", branch_label(.actual))]
    WrongBranch {
        /// The configured default branch.
        expected: String,
        /// The checked-out branch.
        actual: Option<String>,
    },

    /// The working tree has pending changes.
    #[error("working tree is not clean ({changes})")]
    DirtyTree {
        /// Summary of pending changes.
        changes: String,
    },

    /// The default branch has commits that are not on the remote.
    #[error("{branch} has {ahead} unpushed commit(s)")]
    UnpushedCommits {
        /// Branch with unpushed commits.
        branch: String,
        /// How many commits.
        ahead: u32,
    },

    /// The release branch already exists.
    #[error("branch {0} already exists")]
    BranchExists(String),

    /// The pre-release command changed nothing.
    #[error("nothing to commit: the pre-release command made no changes")]
    NothingToCommit,

    /// A git command failed.
    #[error(transparent)]
    Git(#[from] GitError),

    /// The pre-release command failed.
    #[error(transparent)]
    Hook(#[from] HookError),
}

impl ReleaseError {
    /// Classify this error.
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidVersion(_) => ErrorKind::Configuration,
            Self::ChangelogMissing { .. }
            | Self::NotARepo
            | Self::WrongBranch { .. }
            | Self::DirtyTree { .. }
            | Self::UnpushedCommits { .. }
            | Self::BranchExists(_)
            | Self::NothingToCommit
            | Self::Git(GitError::NotARepo) => ErrorKind::Precondition,
            Self::Git(GitError::RefNotFound(_)) => ErrorKind::NotFound,
            Self::Git(GitError::Conflict { .. }) => ErrorKind::Conflict,
            Self::ChangelogUnreadable { .. } | Self::Git(_) | Self::Hook(_) => ErrorKind::Transport,
        }
    }
}

fn unresolved_revision(version: &str, err: &GitError) -> HandoffResult {
    let error = format!("cannot resolve the release commit: {err}");
    let recovery = format!("hoist publish {version}");
    error!(%error, %recovery, "not publishing");
    HandoffResult::Failed {
        error,
        recovery,
        report: None,
    }
}

fn branch_label(branch: &Option<String>) -> &str {
    branch.as_deref().unwrap_or("a detached HEAD")
}

/// Result alias for release operations.
pub type ReleaseResult<T> = Result<T, ReleaseError>;

/// States of a release, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseState {
    /// Nothing has happened yet.
    Init,
    /// The changelog policy is satisfied.
    ChangelogChecked,
    /// The repository is on the default branch with a clean tree.
    GitStateValidated,
    /// `release/<version>` is checked out.
    BranchCreated,
    /// The pre-release command ran (or was skipped).
    PreReleaseRun,
    /// The version bump is committed.
    Committed,
    /// The release branch is on the remote.
    Pushed,
    /// Finished without publishing.
    Done,
    /// Finished by handing off to the publish pipeline.
    Publishing,
}

impl std::fmt::Display for ReleaseState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Init => "init",
            Self::ChangelogChecked => "changelog_checked",
            Self::GitStateValidated => "git_state_validated",
            Self::BranchCreated => "branch_created",
            Self::PreReleaseRun => "pre_release_run",
            Self::Committed => "committed",
            Self::Pushed => "pushed",
            Self::Done => "done",
            Self::Publishing => "publishing",
        })
    }
}

/// How strictly the changelog is checked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangelogPolicy {
    /// Don't look at the changelog.
    #[default]
    None,
    /// Require a section for the version.
    Simple,
}

/// Inputs to a release.
#[derive(Debug, Clone)]
pub struct ReleaseOptions {
    /// Version to release.
    pub version: String,
    /// Previous version; the latest tag (or `0.0.0`) when unset.
    pub old_version: Option<String>,
    /// Repository root; the hook runs here and the changelog is resolved from here.
    pub project_root: Utf8PathBuf,
    /// Branch releases start from.
    pub default_branch: String,
    /// Remote to push to.
    pub remote: String,
    /// Skip repository state validation.
    pub no_git_checks: bool,
    /// Push the release branch.
    pub push: bool,
    /// Changelog check policy.
    pub changelog_policy: ChangelogPolicy,
    /// Changelog path, relative to the project root.
    pub changelog_path: Utf8PathBuf,
    /// Configured pre-release command; `Some("")` disables it.
    pub pre_release_command: Option<String>,
    /// Hand off to the publish pipeline after pushing.
    pub publish: bool,
    /// Wait between push and publish, giving CI time to start.
    pub publish_delay: Duration,
}

impl ReleaseOptions {
    /// Options for `version` with default settings.
    pub fn new(version: impl Into<String>, project_root: impl Into<Utf8PathBuf>) -> Self {
        Self {
            version: version.into(),
            old_version: None,
            project_root: project_root.into(),
            default_branch: "main".to_string(),
            remote: "origin".to_string(),
            no_git_checks: false,
            push: true,
            changelog_policy: ChangelogPolicy::None,
            changelog_path: Utf8PathBuf::from("CHANGELOG.md"),
            pre_release_command: None,
            publish: false,
            publish_delay: DEFAULT_PUBLISH_DELAY,
        }
    }

    /// Name of the release branch.
    pub fn branch(&self) -> String {
        format!("release/{}", self.version)
    }

    /// Absolute changelog path.
    pub fn changelog(&self) -> Utf8PathBuf {
        self.project_root.join(&self.changelog_path)
    }
}

/// Progress events for display.
#[derive(Debug, Clone)]
pub enum ReleaseEvent {
    /// The machine entered a state.
    Entered(ReleaseState),
    /// A step was skipped.
    Skipped {
        /// The state the step belongs to.
        state: ReleaseState,
        /// Why it was skipped.
        reason: String,
    },
}

/// How the publish handoff went.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum HandoffResult {
    /// Every target succeeded.
    Published {
        /// Per-target results.
        report: PublishReport,
    },
    /// Publishing failed; the branch is pushed and publish can be re-run.
    Failed {
        /// What went wrong.
        error: String,
        /// Command that retries the publish.
        recovery: String,
        /// Per-target results, when the fan-out ran.
        #[serde(skip_serializing_if = "Option::is_none")]
        report: Option<PublishReport>,
    },
}

/// Result of a completed release.
#[derive(Debug, Clone, Serialize)]
pub struct ReleaseOutcome {
    /// Released version.
    pub version: String,
    /// Previous version handed to the hook.
    pub old_version: String,
    /// Release branch name.
    pub branch: String,
    /// Commit published, when known.
    pub revision: Option<String>,
    /// States entered, in order.
    pub transitions: Vec<ReleaseState>,
    /// Whether a release commit was made (or would have been).
    pub committed: bool,
    /// Whether the branch was pushed (or would have been).
    pub pushed: bool,
    /// Publish result, when publishing was requested.
    pub handoff: Option<HandoffResult>,
    /// Whether this was a dry run.
    pub dry_run: bool,
}

impl ReleaseOutcome {
    /// Final state of the machine.
    pub fn final_state(&self) -> ReleaseState {
        self.transitions.last().copied().unwrap_or(ReleaseState::Init)
    }

    /// `1` when a chained publish failed, `0` otherwise.
    pub const fn exit_code(&self) -> i32 {
        match self.handoff {
            Some(HandoffResult::Failed { .. }) => 1,
            _ => 0,
        }
    }
}

/// Drives one release through its states.
pub struct ReleaseMachine<'a> {
    vcs: &'a dyn VcsClient,
    handoff: Option<&'a dyn PublishHandoff>,
    options: ReleaseOptions,
    run: RunContext,
    transitions: Vec<ReleaseState>,
}

impl std::fmt::Debug for ReleaseMachine<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReleaseMachine")
            .field("options", &self.options)
            .field("run", &self.run)
            .field("transitions", &self.transitions)
            .finish_non_exhaustive()
    }
}

impl<'a> ReleaseMachine<'a> {
    /// A machine for `options`.
    pub fn new(vcs: &'a dyn VcsClient, options: ReleaseOptions, run: RunContext) -> Self {
        Self {
            vcs,
            handoff: None,
            options,
            run,
            transitions: vec![ReleaseState::Init],
        }
    }

    /// Publish through `handoff` after pushing, when `options.publish` is set.
    #[must_use]
    pub fn with_handoff(mut self, handoff: &'a dyn PublishHandoff) -> Self {
        self.handoff = Some(handoff);
        self
    }

    /// Current state.
    pub fn state(&self) -> ReleaseState {
        self.transitions.last().copied().unwrap_or(ReleaseState::Init)
    }

    fn enter(&mut self, state: ReleaseState, on_event: &mut impl FnMut(&ReleaseEvent)) {
        info!(%state, "release state");
        self.transitions.push(state);
        on_event(&ReleaseEvent::Entered(state));
    }

    /// Run the release to completion.
    #[instrument(skip(self, on_event), fields(version = %self.options.version, dry_run = self.run.is_dry_run()))]
    pub async fn execute(
        mut self,
        mut on_event: impl FnMut(&ReleaseEvent),
    ) -> ReleaseResult<ReleaseOutcome> {
        let version = self.options.version.clone();
        if semver::Version::parse(&version).is_err() {
            return Err(ReleaseError::InvalidVersion(version));
        }
        let branch = self.options.branch();

        self.check_changelog().await?;
        self.enter(ReleaseState::ChangelogChecked, &mut on_event);

        if self.options.no_git_checks {
            warn!("skipping repository state checks");
            on_event(&ReleaseEvent::Skipped {
                state: ReleaseState::GitStateValidated,
                reason: "--no-git-checks".into(),
            });
        } else {
            self.validate_git_state().await?;
        }
        self.enter(ReleaseState::GitStateValidated, &mut on_event);

        self.create_branch(&branch).await?;
        self.enter(ReleaseState::BranchCreated, &mut on_event);

        let old_version = self.resolve_old_version().await?;
        let hook_ran = self.run_hook(&old_version, &mut on_event).await?;
        self.enter(ReleaseState::PreReleaseRun, &mut on_event);

        let committed = if hook_ran {
            self.commit().await?;
            true
        } else {
            on_event(&ReleaseEvent::Skipped {
                state: ReleaseState::Committed,
                reason: "no pre-release command ran".into(),
            });
            false
        };
        self.enter(ReleaseState::Committed, &mut on_event);
        let revision = self
            .vcs
            .revparse("HEAD")
            .await
            .inspect_err(|e| warn!(error = %e, "cannot resolve the release commit"));

        let pushed = self.push(&branch, &mut on_event).await;
        self.enter(ReleaseState::Pushed, &mut on_event);

        let handoff = match (self.options.publish, self.handoff) {
            (true, Some(handoff)) if pushed => {
                self.enter(ReleaseState::Publishing, &mut on_event);
                Some(match &revision {
                    Ok(revision) => self.hand_off(handoff, revision).await,
                    Err(e) => unresolved_revision(&version, e),
                })
            }
            (true, _) => {
                let reason = if pushed {
                    "no publisher available"
                } else {
                    "release branch was not pushed"
                };
                warn!(reason, "not publishing; run `hoist publish {version}` once ready");
                self.enter(ReleaseState::Done, &mut on_event);
                None
            }
            _ => {
                self.enter(ReleaseState::Done, &mut on_event);
                None
            }
        };

        Ok(ReleaseOutcome {
            version,
            old_version,
            branch,
            revision: revision.ok(),
            transitions: self.transitions,
            committed,
            pushed,
            handoff,
            dry_run: self.run.is_dry_run(),
        })
    }

    async fn check_changelog(&self) -> ReleaseResult<()> {
        if self.options.changelog_policy == ChangelogPolicy::None {
            return Ok(());
        }
        let path = self.options.changelog();
        let found = read_changeset(&path, &self.options.version, None).await.map_err(|e| {
            ReleaseError::ChangelogUnreadable {
                path: path.clone(),
                message: e.to_string(),
            }
        })?;
        match found {
            Some(changeset) => {
                info!(heading = %changeset.name, "changelog entry found");
                Ok(())
            }
            None => Err(ReleaseError::ChangelogMissing {
                version: self.options.version.clone(),
                path,
            }),
        }
    }

    async fn validate_git_state(&self) -> ReleaseResult<()> {
        if !self.vcs.is_repo().await? {
            return Err(ReleaseError::NotARepo);
        }
        let status = self.vcs.status().await?;

        if status.current.as_deref() != Some(self.options.default_branch.as_str()) {
            return Err(ReleaseError::WrongBranch {
                expected: self.options.default_branch.clone(),
                actual: status.current,
            });
        }
        if !status.is_clean() {
            return Err(ReleaseError::DirtyTree {
                changes: status.describe_changes(),
            });
        }
        if status.ahead > 0 {
            return Err(ReleaseError::UnpushedCommits {
                branch: self.options.default_branch.clone(),
                ahead: status.ahead,
            });
        }
        Ok(())
    }

    async fn create_branch(&self, branch: &str) -> ReleaseResult<()> {
        match self.vcs.revparse(branch).await {
            Ok(_) => return Err(ReleaseError::BranchExists(branch.to_string())),
            Err(GitError::RefNotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }
        if self.run.should_perform() {
            self.vcs.checkout_local_branch(branch).await?;
            info!(branch, "created release branch");
        } else {
            self.run.skip(&format!("create branch {branch}"));
        }
        Ok(())
    }

    async fn resolve_old_version(&self) -> ReleaseResult<String> {
        if let Some(old) = &self.options.old_version {
            return Ok(old.clone());
        }
        let tag = self.vcs.latest_tag().await?;
        Ok(tag.map_or_else(
            || INITIAL_VERSION.to_string(),
            |t| normalize_version(&t, None).to_string(),
        ))
    }

    /// Returns whether a hook ran (or would have run).
    async fn run_hook(
        &self,
        old_version: &str,
        on_event: &mut impl FnMut(&ReleaseEvent),
    ) -> ReleaseResult<bool> {
        let root = &self.options.project_root;
        let Some(command) =
            hooks::resolve_pre_release_command(self.options.pre_release_command.as_deref(), root)
        else {
            on_event(&ReleaseEvent::Skipped {
                state: ReleaseState::PreReleaseRun,
                reason: "no pre-release command".into(),
            });
            return Ok(false);
        };

        let context = HookContext {
            old_version: old_version.to_string(),
            new_version: self.options.version.clone(),
        };
        if let Some(output) = hooks::run_pre_release(&command, &context, root, self.run).await? {
            debug!(
                command = %output.command,
                stdout = output.stdout.trim(),
                stderr = output.stderr.trim(),
                duration_ms = output.duration.as_millis(),
                "pre-release command output"
            );
        }
        Ok(true)
    }

    async fn commit(&self) -> ReleaseResult<()> {
        let message = format!("chore: release {}", self.options.version);
        if !self.run.should_perform() {
            self.run.skip(&format!("commit {message:?}"));
            return Ok(());
        }
        if self.vcs.status().await?.is_clean() {
            return Err(ReleaseError::NothingToCommit);
        }
        self.vcs.commit(&message, true).await?;
        info!(%message, "committed release");
        Ok(())
    }

    /// Best-effort push; returns whether the branch is (or would be) on the remote.
    async fn push(&self, branch: &str, on_event: &mut impl FnMut(&ReleaseEvent)) -> bool {
        let remote = &self.options.remote;
        let manual = format!("git push --set-upstream {remote} {branch}");

        if !self.options.push {
            info!(command = %manual, "push disabled; push manually");
            on_event(&ReleaseEvent::Skipped {
                state: ReleaseState::Pushed,
                reason: format!("push disabled, run: {manual}"),
            });
            return false;
        }
        if !self.run.should_perform() {
            self.run.skip(&manual);
            return true;
        }
        match self.vcs.push(remote, branch, true).await {
            Ok(()) => {
                info!(%remote, branch, "pushed release branch");
                true
            }
            Err(e) => {
                warn!(error = %e, command = %manual, "push failed; push manually");
                on_event(&ReleaseEvent::Skipped {
                    state: ReleaseState::Pushed,
                    reason: format!("push failed: {e}"),
                });
                false
            }
        }
    }

    async fn hand_off(&self, handoff: &dyn PublishHandoff, revision: &str) -> HandoffResult {
        let version = &self.options.version;
        let recovery = format!("hoist publish {version} --revision {revision}");

        if self.run.should_perform() {
            info!(delay_secs = self.options.publish_delay.as_secs(), "waiting before publish");
            tokio::time::sleep(self.options.publish_delay).await;
        } else {
            self.run.skip(&format!(
                "wait {}s before publishing",
                self.options.publish_delay.as_secs()
            ));
        }

        match handoff.publish(version, revision).await {
            Ok(report) if report.all_succeeded() => HandoffResult::Published { report },
            Ok(report) => {
                let failed: Vec<String> = report.failures().map(|t| t.target.to_string()).collect();
                let error = format!("publish failed for: {}", failed.join(", "));
                error!(%error, %recovery, "publish failed; re-run once fixed");
                HandoffResult::Failed {
                    error,
                    recovery,
                    report: Some(report),
                }
            }
            Err(e) => {
                error!(error = %e, %recovery, "publish failed; re-run once fixed");
                HandoffResult::Failed {
                    error: e.to_string(),
                    recovery,
                    report: None,
                }
            }
        }
    }
}
