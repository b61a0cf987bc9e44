//! Filesystem-backed artifact provider.
//!
//! Layout:
//!
//! ```text
//! <root>/<revision>/<artifact files>
//! <root>/<revision>/.hoist-status    optional: "pending", "failed" or "passed"
//! ```
//!
//! CI jobs that upload to a shared volume (or a synced bucket mount) can be
//! published from directly. A revision directory without a status marker is
//! treated as a finished, passing build.

use async_trait::async_trait;
use camino::{Utf8Path, Utf8PathBuf};
use tracing::{debug, instrument};

use super::{
    Artifact, ArtifactError, ArtifactProvider, ArtifactResult, RevisionInfo, RevisionResult,
    RevisionStatus,
};
use crate::context::RepoRef;

/// Name of the optional per-revision status marker.
pub const STATUS_MARKER: &str = ".hoist-status";

const FILE_SCHEME: &str = "file://";

/// Artifact provider reading revisions from a local directory tree.
#[derive(Debug, Clone)]
pub struct LocalArtifactProvider {
    root: Utf8PathBuf,
}

impl LocalArtifactProvider {
    /// Serve revisions stored beneath `root`.
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn revision_dir(&self, revision: &str) -> ArtifactResult<Utf8PathBuf> {
        let bad = revision.is_empty()
            || revision.starts_with('.')
            || revision.contains(['/', '\\']);
        if bad {
            return Err(ArtifactError::RevisionNotFound {
                revision: revision.to_string(),
            });
        }
        let dir = self.root.join(revision);
        if !dir.is_dir() {
            return Err(ArtifactError::RevisionNotFound {
                revision: revision.to_string(),
            });
        }
        Ok(dir)
    }
}

#[async_trait]
impl ArtifactProvider for LocalArtifactProvider {
    #[instrument(skip(self, _repo))]
    async fn list_artifacts(&self, _repo: &RepoRef, revision: &str) -> ArtifactResult<Vec<Artifact>> {
        let dir = self.revision_dir(revision)?;
        let mut entries = tokio::fs::read_dir(&dir)
            .await
            .map_err(|e| ArtifactError::Provider(format!("cannot read {dir}: {e}")))?;

        let mut artifacts = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| ArtifactError::Provider(format!("cannot read {dir}: {e}")))?
        {
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if name.starts_with('.') {
                continue;
            }
            let is_file = entry.file_type().await.map(|t| t.is_file()).unwrap_or(false);
            if !is_file {
                continue;
            }
            let path = dir.join(&name);
            artifacts.push(Artifact {
                mime_type: guess_mime_type(&name).map(String::from),
                download_url: format!("{FILE_SCHEME}{path}"),
                name,
            });
        }

        artifacts.sort_by(|a, b| a.name.cmp(&b.name));
        debug!(count = artifacts.len(), "listed local artifacts");
        Ok(artifacts)
    }

    async fn download_artifact(
        &self,
        artifact: &Artifact,
        dest_dir: &Utf8Path,
    ) -> ArtifactResult<Utf8PathBuf> {
        let failed = |message: String| ArtifactError::DownloadFailed {
            url: artifact.download_url.clone(),
            message,
        };
        let source = artifact
            .download_url
            .strip_prefix(FILE_SCHEME)
            .ok_or_else(|| failed("unsupported URL scheme".into()))?;

        let dest = dest_dir.join(&artifact.name);
        tokio::fs::copy(source, &dest)
            .await
            .map_err(|e| failed(e.to_string()))?;
        Ok(dest)
    }

    async fn revision_info(&self, _repo: &RepoRef, revision: &str) -> ArtifactResult<RevisionInfo> {
        let dir = self.revision_dir(revision)?;
        let marker = dir.join(STATUS_MARKER);

        let word = match tokio::fs::read_to_string(&marker).await {
            Ok(text) => text.trim().to_ascii_lowercase(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => "passed".to_string(),
            Err(e) => return Err(ArtifactError::Provider(format!("cannot read {marker}: {e}"))),
        };

        match word.as_str() {
            "pending" | "running" => Ok(RevisionInfo {
                status: RevisionStatus::Pending,
                result: RevisionResult::Unknown,
            }),
            "passed" | "success" | "" => Ok(RevisionInfo {
                status: RevisionStatus::Finished,
                result: RevisionResult::Passed,
            }),
            "failed" | "failure" | "error" => Ok(RevisionInfo {
                status: RevisionStatus::Finished,
                result: RevisionResult::Failed,
            }),
            other => Err(ArtifactError::Provider(format!(
                "unrecognized status {other:?} in {marker}"
            ))),
        }
    }
}

/// Content type for common release artifact extensions.
pub fn guess_mime_type(name: &str) -> Option<&'static str> {
    let lower = name.to_ascii_lowercase();
    let table: &[(&str, &str)] = &[
        (".tar.gz", "application/gzip"),
        (".tgz", "application/gzip"),
        (".gz", "application/gzip"),
        (".whl", "application/zip"),
        (".zip", "application/zip"),
        (".nupkg", "application/zip"),
        (".json", "application/json"),
        (".txt", "text/plain"),
        (".md", "text/markdown"),
    ];
    table
        .iter()
        .find(|(ext, _)| lower.ends_with(ext))
        .map(|(_, mime)| *mime)
}
