//! Publish pipeline: fan a revision's artifacts out to every configured target.
//!
//! Order of work:
//!
//! 1. Construct every target. Any configuration error (unknown name, missing
//!    credential, bad regex) aborts before I/O.
//! 2. Check the revision's CI status; pending or failed builds abort.
//! 3. Run every target's `publish` concurrently and wait for all of them.
//!
//! A failing target never stops its siblings. The [`PublishReport`] records
//! what each target did.

use std::sync::Arc;

use async_trait::async_trait;
use camino::Utf8PathBuf;
use futures::future::join_all;
use serde::Serialize;
use thiserror::Error;
use tracing::{Instrument, error, info, info_span, instrument, warn};

use crate::artifacts::{ArtifactError, ArtifactStore};
use crate::context::{Environment, RunContext};
use crate::error::ErrorKind;
use crate::targets::{
    Target, TargetConfig, TargetContext, TargetError, TargetName, TargetOutcome, lookup,
};

/// Errors that stop a publish before any target runs.
#[derive(Error, Debug)]
pub enum PublishError {
    /// No `[[targets]]` are configured.
    #[error("no publish targets configured")]
    NoTargets,

    /// A requested target has no config block.
    #[error("target {0:?} is not configured")]
    TargetNotConfigured(String),

    /// A target could not be constructed.
    #[error(transparent)]
    Target(#[from] TargetError),

    /// CI has not finished for the revision.
    #[error("revision {revision} is still building; wait for CI or pass --no-status-check")]
    RevisionPending {
        /// The revision being published.
        revision: String,
    },

    /// CI failed for the revision.
    #[error("revision {revision} did not pass CI; refusing to publish")]
    RevisionFailed {
        /// The revision being published.
        revision: String,
    },

    /// Fetching the revision status failed.
    #[error(transparent)]
    Artifact(#[from] ArtifactError),
}

impl PublishError {
    /// Classify this error.
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::NoTargets | Self::TargetNotConfigured(_) => ErrorKind::Configuration,
            Self::Target(e) => e.kind(),
            Self::RevisionPending { .. } | Self::RevisionFailed { .. } => ErrorKind::Precondition,
            Self::Artifact(ArtifactError::RevisionNotFound { .. }) => ErrorKind::NotFound,
            Self::Artifact(_) => ErrorKind::Transport,
        }
    }
}

/// Result alias for publish operations.
pub type PublishResult<T> = Result<T, PublishError>;

/// What to publish.
#[derive(Debug, Clone, Default)]
pub struct PublishOptions {
    /// Version being released.
    pub version: String,
    /// Revision whose artifacts are published.
    pub revision: String,
    /// Only these targets; empty means every configured target.
    pub targets: Vec<String>,
    /// Publish even if CI has not passed.
    pub skip_status_check: bool,
}

/// Result of one target.
#[derive(Debug, Clone, Serialize)]
pub struct TargetReport {
    /// Which target.
    pub target: TargetName,
    /// Outcome when the target succeeded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<TargetOutcome>,
    /// Error message when it failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Classification of the failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

impl TargetReport {
    /// Whether the target finished without error.
    pub const fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Result of a publish run.
#[derive(Debug, Clone, Serialize)]
pub struct PublishReport {
    /// Published version.
    pub version: String,
    /// Published revision.
    pub revision: String,
    /// Whether mutations were simulated.
    pub dry_run: bool,
    /// Per-target results, in config order.
    pub targets: Vec<TargetReport>,
}

impl PublishReport {
    /// Every target succeeded (skips count as success).
    pub fn all_succeeded(&self) -> bool {
        self.targets.iter().all(TargetReport::succeeded)
    }

    /// Targets that failed.
    pub fn failures(&self) -> impl Iterator<Item = &TargetReport> {
        self.targets.iter().filter(|t| !t.succeeded())
    }
}

/// Hands a finished release over to publishing.
#[async_trait]
pub trait PublishHandoff: Send + Sync {
    /// Publish `revision` as `version` to every configured target.
    async fn publish(&self, version: &str, revision: &str) -> PublishResult<PublishReport>;
}

/// Builds targets from config and runs the fan-out.
#[derive(Debug, Clone)]
pub struct Publisher {
    store: Arc<ArtifactStore>,
    configs: Vec<TargetConfig>,
    run: RunContext,
    env: Environment,
    changelog: Option<Utf8PathBuf>,
}

impl Publisher {
    /// Create a publisher over `configs`.
    pub fn new(
        store: Arc<ArtifactStore>,
        configs: Vec<TargetConfig>,
        run: RunContext,
        env: Environment,
    ) -> Self {
        Self {
            store,
            configs,
            run,
            env,
            changelog: None,
        }
    }

    /// Use `path` as the source of release notes.
    #[must_use]
    pub fn with_changelog(mut self, path: Option<Utf8PathBuf>) -> Self {
        self.changelog = path;
        self
    }

    /// Construct the selected targets, failing on the first configuration error.
    pub fn build_targets(&self, only: &[String]) -> PublishResult<Vec<Box<dyn Target>>> {
        if self.configs.is_empty() {
            return Err(PublishError::NoTargets);
        }
        for wanted in only {
            let configured = self
                .configs
                .iter()
                .any(|c| c.name.eq_ignore_ascii_case(wanted.trim()));
            if !configured {
                return Err(PublishError::TargetNotConfigured(wanted.clone()));
            }
        }

        self.configs
            .iter()
            .filter(|c| {
                only.is_empty() || only.iter().any(|w| c.name.eq_ignore_ascii_case(w.trim()))
            })
            .map(|config| -> PublishResult<Box<dyn Target>> {
                let constructor = lookup(&config.name)
                    .ok_or_else(|| TargetError::UnknownTarget(config.name.clone()))?;
                let target = constructor(TargetContext {
                    config: config.clone(),
                    store: Arc::clone(&self.store),
                    run: self.run,
                    env: self.env.clone(),
                    changelog: self.changelog.clone(),
                })?;
                Ok(target)
            })
            .collect()
    }

    /// Build targets, check the revision, and publish.
    #[instrument(skip(self, options), fields(version = %options.version, revision = %options.revision))]
    pub async fn run(&self, options: &PublishOptions) -> PublishResult<PublishReport> {
        let targets = self.build_targets(&options.targets)?;
        publish_to(&self.store, &targets, options, self.run).await
    }
}

#[async_trait]
impl PublishHandoff for Publisher {
    async fn publish(&self, version: &str, revision: &str) -> PublishResult<PublishReport> {
        self.run(&PublishOptions {
            version: version.to_string(),
            revision: revision.to_string(),
            ..PublishOptions::default()
        })
        .await
    }
}

/// Check the revision and fan out to already-constructed targets.
pub async fn publish_to(
    store: &ArtifactStore,
    targets: &[Box<dyn Target>],
    options: &PublishOptions,
    run: RunContext,
) -> PublishResult<PublishReport> {
    let revision = options.revision.as_str();
    let version = options.version.as_str();

    if options.skip_status_check {
        warn!(revision, "skipping revision status check");
    } else {
        let info = store.revision_info(revision).await?;
        if info.is_pending() {
            return Err(PublishError::RevisionPending {
                revision: revision.to_string(),
            });
        }
        if info.is_failed() {
            return Err(PublishError::RevisionFailed {
                revision: revision.to_string(),
            });
        }
    }

    info!(version, revision, targets = targets.len(), "publishing");
    let results = join_all(targets.iter().map(|target| async move {
        let span = info_span!("publish_target", target_name = %target.name());
        (target.name(), target.publish(version, revision).instrument(span).await)
    }))
    .await;

    let reports = results
        .into_iter()
        .map(|(name, result)| match result {
            Ok(outcome) => {
                info!(target_name = %name, ?outcome, "target finished");
                TargetReport {
                    target: name,
                    outcome: Some(outcome),
                    error: None,
                    error_kind: None,
                }
            }
            Err(e) => {
                error!(target_name = %name, error = %e, "target failed");
                TargetReport {
                    target: name,
                    outcome: None,
                    error: Some(e.to_string()),
                    error_kind: Some(e.kind()),
                }
            }
        })
        .collect();

    Ok(PublishReport {
        version: version.to_string(),
        revision: revision.to_string(),
        dry_run: run.is_dry_run(),
        targets: reports,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::artifacts::tests::MockProvider;
    use crate::artifacts::{RevisionInfo, RevisionResult, RevisionStatus};
    use crate::context::RepoRef;
    use crate::targets::{ClientError, TargetResult};

    struct FakeTarget {
        name: TargetName,
        fail: bool,
        store: Arc<ArtifactStore>,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Target for FakeTarget {
        fn name(&self) -> TargetName {
            self.name
        }

        async fn publish(&self, _version: &str, revision: &str) -> TargetResult<TargetOutcome> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let artifacts = self.store.list_artifacts(revision).await?;
            for artifact in &artifacts {
                self.store.download_artifact(artifact).await?;
            }
            if self.fail {
                return Err(TargetError::Client {
                    target: self.name,
                    source: ClientError::Transport("registry down".into()),
                });
            }
            Ok(TargetOutcome::Published {
                artifacts: artifacts.into_iter().map(|a| a.name).collect(),
            })
        }
    }

    fn provider(status: RevisionStatus, result: RevisionResult) -> Arc<MockProvider> {
        let mut provider = MockProvider::with_revision("abc123", &["a.whl", "a.tgz"]);
        provider
            .info
            .insert("abc123".into(), RevisionInfo { status, result });
        Arc::new(provider)
    }

    fn store(provider: &Arc<MockProvider>) -> Arc<ArtifactStore> {
        Arc::new(ArtifactStore::new(provider.clone(), RepoRef::new("acme", "widget")).unwrap())
    }

    fn options() -> PublishOptions {
        PublishOptions {
            version: "1.0.0".into(),
            revision: "abc123".into(),
            ..PublishOptions::default()
        }
    }

    fn fake(name: TargetName, fail: bool, store: &Arc<ArtifactStore>, calls: &Arc<AtomicUsize>) -> Box<dyn Target> {
        Box::new(FakeTarget {
            name,
            fail,
            store: Arc::clone(store),
            calls: Arc::clone(calls),
        })
    }

    #[tokio::test]
    async fn failing_target_does_not_stop_siblings() {
        let provider = provider(RevisionStatus::Finished, RevisionResult::Passed);
        let store = store(&provider);
        let calls = Arc::new(AtomicUsize::new(0));
        let targets = vec![
            fake(TargetName::Github, true, &store, &calls),
            fake(TargetName::Npm, false, &store, &calls),
            fake(TargetName::Pypi, false, &store, &calls),
        ];

        let report = publish_to(&store, &targets, &options(), RunContext::live())
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(!report.all_succeeded());
        let failed: Vec<TargetName> = report.failures().map(|t| t.target).collect();
        assert_eq!(failed, vec![TargetName::Github]);
        assert_eq!(report.targets[0].error_kind, Some(ErrorKind::Transport));
    }

    #[tokio::test]
    async fn shared_downloads_across_targets() {
        let provider = provider(RevisionStatus::Finished, RevisionResult::Passed);
        let store = store(&provider);
        let calls = Arc::new(AtomicUsize::new(0));
        let targets = vec![
            fake(TargetName::Github, false, &store, &calls),
            fake(TargetName::Npm, false, &store, &calls),
        ];

        let report = publish_to(&store, &targets, &options(), RunContext::live())
            .await
            .unwrap();
        assert!(report.all_succeeded());
        assert_eq!(*provider.list_calls.lock(), 1);
        assert_eq!(provider.download_calls.lock().len(), 2);
    }

    #[tokio::test]
    async fn pending_revision_aborts_before_fan_out() {
        let provider = provider(RevisionStatus::Pending, RevisionResult::Unknown);
        let store = store(&provider);
        let calls = Arc::new(AtomicUsize::new(0));
        let targets = vec![fake(TargetName::Github, false, &store, &calls)];

        let err = publish_to(&store, &targets, &options(), RunContext::live())
            .await
            .unwrap_err();
        assert!(matches!(err, PublishError::RevisionPending { .. }));
        assert_eq!(err.kind(), ErrorKind::Precondition);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failed_revision_aborts_unless_check_skipped() {
        let provider = provider(RevisionStatus::Finished, RevisionResult::Failed);
        let store = store(&provider);
        let calls = Arc::new(AtomicUsize::new(0));
        let targets = vec![fake(TargetName::Npm, false, &store, &calls)];

        let err = publish_to(&store, &targets, &options(), RunContext::live())
            .await
            .unwrap_err();
        assert!(matches!(err, PublishError::RevisionFailed { .. }));

        let skip = PublishOptions {
            skip_status_check: true,
            ..options()
        };
        let report = publish_to(&store, &targets, &skip, RunContext::dry_run())
            .await
            .unwrap();
        assert!(report.dry_run);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unknown_target_name_is_configuration_error() {
        let provider = provider(RevisionStatus::Finished, RevisionResult::Passed);
        let publisher = Publisher::new(
            store(&provider),
            vec![TargetConfig::named("homebrew")],
            RunContext::live(),
            Environment::default(),
        );
        let err = publisher.build_targets(&[]).err().unwrap();
        assert!(matches!(err, PublishError::Target(TargetError::UnknownTarget(ref n)) if n == "homebrew"));
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn missing_credentials_fail_before_any_io() {
        let provider = provider(RevisionStatus::Finished, RevisionResult::Passed);
        let publisher = Publisher::new(
            store(&provider),
            vec![TargetConfig::named("github")],
            RunContext::live(),
            Environment::default(),
        );
        let err = publisher.build_targets(&[]).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert_eq!(*provider.list_calls.lock(), 0);
    }

    #[test]
    fn subset_must_be_configured() {
        let provider = provider(RevisionStatus::Finished, RevisionResult::Passed);
        let publisher = Publisher::new(
            store(&provider),
            vec![TargetConfig::named("github")],
            RunContext::live(),
            Environment::default(),
        );
        let err = publisher.build_targets(&["pypi".to_string()]).err().unwrap();
        assert!(matches!(err, PublishError::TargetNotConfigured(_)));
    }

    #[test]
    fn no_targets_is_an_error() {
        let provider = provider(RevisionStatus::Finished, RevisionResult::Passed);
        let publisher = Publisher::new(store(&provider), Vec::new(), RunContext::live(), Environment::default());
        assert!(matches!(publisher.build_targets(&[]), Err(PublishError::NoTargets)));
    }
}
