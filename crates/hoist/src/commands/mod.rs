//! Command implementations

pub mod artifacts;

pub mod changeset;

pub mod publish;

pub mod release;

use std::sync::Arc;

use anyhow::Context;
use camino::{Utf8Path, Utf8PathBuf};
use hoist_core::artifacts::{ArtifactStore, LocalArtifactProvider};
use hoist_core::git::{GitCli, VcsClient};
use hoist_core::{Config, Environment, Publisher, RunContext};
use tracing::debug;

/// The repository top level containing `cwd`, or `cwd` itself outside a repository.
pub async fn project_root(cwd: &Utf8Path) -> Utf8PathBuf {
    match GitCli::new(cwd).toplevel().await {
        Ok(root) => {
            debug!(%root, "project root");
            root
        }
        Err(e) => {
            debug!(error = %e, "not in a repository, using current directory");
            cwd.to_path_buf()
        }
    }
}

/// Open the artifact store described by `[github]` and `[artifacts]`.
pub fn artifact_store(config: &Config, root: &Utf8Path) -> anyhow::Result<Arc<ArtifactStore>> {
    let repo = config.repo_ref().context("a [github] section is required")?;
    let dir = config
        .artifacts_dir(root)
        .context("an [artifacts] section is required")?;
    let provider = Arc::new(LocalArtifactProvider::new(dir));
    let store = ArtifactStore::new(provider, repo).context("failed to open artifact store")?;
    Ok(Arc::new(store))
}

/// Build a publisher over the configured targets.
pub fn publisher(
    config: &Config,
    root: &Utf8Path,
    run: RunContext,
    env: Environment,
) -> anyhow::Result<Publisher> {
    let store = artifact_store(config, root)?;
    let changelog = root.join(config.changelog_path());
    Ok(Publisher::new(store, config.targets.clone(), run, env).with_changelog(Some(changelog)))
}

/// `revision`, or the commit at `HEAD` when unset.
pub async fn resolve_revision(revision: Option<String>, root: &Utf8Path) -> anyhow::Result<String> {
    if let Some(revision) = revision {
        return Ok(revision);
    }
    GitCli::new(root)
        .revparse("HEAD")
        .await
        .context("failed to resolve HEAD; pass --revision")
}
