//! Artifact store: cached listings, deduplicated downloads, name filters.
//!
//! The [`ArtifactStore`] sits in front of an [`ArtifactProvider`] (the CI
//! artifact service) and guarantees that, for the lifetime of the process:
//!
//! - a revision's artifact listing is fetched at most once, and
//! - an artifact's `download_url` is downloaded at most once,
//!
//! no matter how many targets ask concurrently. Both tables are
//! [`SingleFlight`] maps, so late callers attach to the in-flight request.

mod local;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use camino::{Utf8Path, Utf8PathBuf};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tempfile::TempDir;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::context::RepoRef;
use crate::memo::SingleFlight;

pub use local::LocalArtifactProvider;

/// Errors from the artifact store and its provider.
///
/// Payloads are strings so that a single failure can be handed to every
/// caller waiting on the same memoized request.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ArtifactError {
    /// The artifact service has no record of this revision.
    #[error("revision {revision} not found in the artifact store")]
    RevisionNotFound {
        /// The requested revision.
        revision: String,
    },

    /// Downloading an artifact failed.
    #[error("failed to download {url}: {message}")]
    DownloadFailed {
        /// The artifact's download URL.
        url: String,
        /// Underlying error description.
        message: String,
    },

    /// Any other provider failure (transport, malformed response).
    #[error("artifact provider error: {0}")]
    Provider(String),
}

/// Result alias for artifact operations.
pub type ArtifactResult<T> = Result<T, ArtifactError>;

/// A build output attached to a revision.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Artifact {
    /// File name, unique within a revision.
    pub name: String,
    /// Where to fetch the file from. Stable identity key for downloads.
    pub download_url: String,
    /// MIME-like content type, when the provider knows it.
    pub mime_type: Option<String>,
}

/// Build status of a revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RevisionStatus {
    /// CI is still running.
    Pending,
    /// CI has finished.
    Finished,
}

/// Build result of a revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RevisionResult {
    /// All checks passed.
    Passed,
    /// At least one check failed.
    Failed,
    /// No result reported yet.
    Unknown,
}

/// Status and result of a revision, fetched on demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevisionInfo {
    /// Whether the build has finished.
    pub status: RevisionStatus,
    /// The build outcome.
    pub result: RevisionResult,
}

impl RevisionInfo {
    /// Finished and passed.
    pub fn is_built_successfully(&self) -> bool {
        self.status == RevisionStatus::Finished && self.result == RevisionResult::Passed
    }

    /// Finished without passing.
    pub fn is_failed(&self) -> bool {
        self.status == RevisionStatus::Finished && self.result != RevisionResult::Passed
    }

    /// Not finished yet.
    pub fn is_pending(&self) -> bool {
        self.status != RevisionStatus::Finished
    }
}

/// Include/exclude patterns matched against [`Artifact::name`].
///
/// A missing include pattern matches everything; a missing exclude pattern
/// matches nothing.
#[derive(Debug, Clone, Default)]
pub struct FilterOptions {
    /// Keep only artifacts whose name matches.
    pub include_names: Option<Regex>,
    /// Drop artifacts whose name matches.
    pub exclude_names: Option<Regex>,
}

impl FilterOptions {
    /// Compile filter options from optional pattern strings.
    pub fn from_patterns(
        include: Option<&str>,
        exclude: Option<&str>,
    ) -> Result<Self, regex::Error> {
        Ok(Self {
            include_names: include.map(Regex::new).transpose()?,
            exclude_names: exclude.map(Regex::new).transpose()?,
        })
    }

    /// Filter with only an include pattern.
    pub const fn include(pattern: Regex) -> Self {
        Self {
            include_names: Some(pattern),
            exclude_names: None,
        }
    }

    /// Whether neither pattern is set.
    pub const fn is_empty(&self) -> bool {
        self.include_names.is_none() && self.exclude_names.is_none()
    }

    /// Merge these options over `defaults`; keys set here win.
    pub fn merged_over(&self, defaults: &Self) -> Self {
        Self {
            include_names: self
                .include_names
                .clone()
                .or_else(|| defaults.include_names.clone()),
            exclude_names: self
                .exclude_names
                .clone()
                .or_else(|| defaults.exclude_names.clone()),
        }
    }

    /// Whether an artifact name passes the include test and then the exclude test.
    pub fn matches(&self, name: &str) -> bool {
        let included = self
            .include_names
            .as_ref()
            .is_none_or(|re| re.is_match(name));
        let excluded = self
            .exclude_names
            .as_ref()
            .is_some_and(|re| re.is_match(name));
        included && !excluded
    }

    /// Apply the filter, preserving order.
    pub fn apply(&self, artifacts: &[Artifact]) -> Vec<Artifact> {
        artifacts
            .iter()
            .filter(|a| self.matches(&a.name))
            .cloned()
            .collect()
    }
}

/// Backend that knows about revisions and their artifacts.
#[async_trait]
pub trait ArtifactProvider: Send + Sync {
    /// List every artifact built for `revision`.
    ///
    /// Returns [`ArtifactError::RevisionNotFound`] for unknown revisions.
    async fn list_artifacts(&self, repo: &RepoRef, revision: &str) -> ArtifactResult<Vec<Artifact>>;

    /// Download `artifact` into `dest_dir`, returning the local file path.
    async fn download_artifact(
        &self,
        artifact: &Artifact,
        dest_dir: &Utf8Path,
    ) -> ArtifactResult<Utf8PathBuf>;

    /// Fetch the build status and result of `revision`.
    async fn revision_info(&self, repo: &RepoRef, revision: &str) -> ArtifactResult<RevisionInfo>;
}

/// Caching, deduplicating front for an [`ArtifactProvider`].
pub struct ArtifactStore {
    provider: Arc<dyn ArtifactProvider>,
    repo: RepoRef,
    download_dir: Utf8PathBuf,
    // Keeps the scratch directory alive for the store's lifetime.
    _scratch: Option<TempDir>,
    next_slot: Arc<AtomicUsize>,
    listings: SingleFlight<String, Arc<Vec<Artifact>>, ArtifactError>,
    downloads: SingleFlight<String, Utf8PathBuf, ArtifactError>,
}

impl std::fmt::Debug for ArtifactStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArtifactStore")
            .field("repo", &self.repo)
            .field("download_dir", &self.download_dir)
            .field("listings", &self.listings)
            .field("downloads", &self.downloads)
            .finish_non_exhaustive()
    }
}

impl ArtifactStore {
    /// Create a store that downloads into a fresh temporary directory.
    ///
    /// The directory is removed when the store is dropped.
    pub fn new(provider: Arc<dyn ArtifactProvider>, repo: RepoRef) -> ArtifactResult<Self> {
        let scratch = tempfile::Builder::new()
            .prefix("hoist-artifacts-")
            .tempdir()
            .map_err(|e| ArtifactError::Provider(format!("failed to create download dir: {e}")))?;
        let download_dir = Utf8PathBuf::from_path_buf(scratch.path().to_path_buf())
            .map_err(|p| ArtifactError::Provider(format!("non-UTF-8 temp dir: {}", p.display())))?;

        let mut store = Self::with_download_dir(provider, repo, download_dir);
        store._scratch = Some(scratch);
        Ok(store)
    }

    /// Create a store that downloads beneath `download_dir`.
    pub fn with_download_dir(
        provider: Arc<dyn ArtifactProvider>,
        repo: RepoRef,
        download_dir: Utf8PathBuf,
    ) -> Self {
        Self {
            provider,
            repo,
            download_dir,
            _scratch: None,
            next_slot: Arc::new(AtomicUsize::new(0)),
            listings: SingleFlight::new(),
            downloads: SingleFlight::new(),
        }
    }

    /// The repository this store serves.
    pub const fn repo(&self) -> &RepoRef {
        &self.repo
    }

    /// Full, unfiltered listing for `revision`. Fetched once per process.
    #[instrument(skip(self))]
    pub async fn list_artifacts(&self, revision: &str) -> ArtifactResult<Vec<Artifact>> {
        let provider = Arc::clone(&self.provider);
        let repo = self.repo.clone();
        let rev = revision.to_string();

        let listing = self
            .listings
            .run(revision.to_string(), move || async move {
                debug!(revision = %rev, "fetching artifact listing");
                let artifacts = provider.list_artifacts(&repo, &rev).await?;
                debug!(revision = %rev, count = artifacts.len(), "artifact listing fetched");
                Ok(Arc::new(artifacts))
            })
            .await?;

        Ok(listing.as_ref().clone())
    }

    /// Listing for `revision` narrowed by `filter`; the full listing when `None`.
    pub async fn filter_artifacts(
        &self,
        revision: &str,
        filter: Option<&FilterOptions>,
    ) -> ArtifactResult<Vec<Artifact>> {
        let artifacts = self.list_artifacts(revision).await?;
        Ok(match filter {
            Some(filter) => filter.apply(&artifacts),
            None => artifacts,
        })
    }

    /// Local path of `artifact`, downloading it on first request.
    ///
    /// Concurrent requests for the same `download_url` share one download.
    /// Failures are not retried.
    #[instrument(skip(self, artifact), fields(name = %artifact.name))]
    pub async fn download_artifact(&self, artifact: &Artifact) -> ArtifactResult<Utf8PathBuf> {
        let provider = Arc::clone(&self.provider);
        let artifact_owned = artifact.clone();
        let root = self.download_dir.clone();
        let slots = Arc::clone(&self.next_slot);

        self.downloads
            .run(artifact.download_url.clone(), move || async move {
                let slot = slots.fetch_add(1, Ordering::SeqCst);
                let dest = root.join(slot.to_string());
                tokio::fs::create_dir_all(&dest)
                    .await
                    .map_err(|e| ArtifactError::DownloadFailed {
                        url: artifact_owned.download_url.clone(),
                        message: format!("cannot create {dest}: {e}"),
                    })?;
                debug!(url = %artifact_owned.download_url, %dest, "downloading artifact");
                provider.download_artifact(&artifact_owned, &dest).await
            })
            .await
    }

    /// Build status and result of `revision`. Not cached.
    #[instrument(skip(self))]
    pub async fn revision_info(&self, revision: &str) -> ArtifactResult<RevisionInfo> {
        self.provider.revision_info(&self.repo, revision).await
    }
}
