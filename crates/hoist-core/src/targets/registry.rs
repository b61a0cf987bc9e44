//! Shared implementation for package registries that take one file per upload.

use std::sync::Arc;

use async_trait::async_trait;
use camino::Utf8Path;
use futures::future::join_all;
use tracing::{info, instrument};

use super::{
    ClientError, Target, TargetBase, TargetError, TargetName, TargetOutcome, TargetResult,
    collect_uploads,
};
use crate::artifacts::{Artifact, FilterOptions};

/// A registry that accepts package files.
#[async_trait]
pub trait PackageRegistry: Send + Sync {
    /// Upload one package file.
    ///
    /// [`ClientError::Conflict`] means the version is already published.
    async fn upload(&self, path: &Utf8Path) -> Result<(), ClientError>;
}

/// Target that uploads each matching artifact to a [`PackageRegistry`].
pub struct PackageTarget {
    base: TargetBase,
    registry: Arc<dyn PackageRegistry>,
    default_filter: FilterOptions,
}

impl std::fmt::Debug for PackageTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PackageTarget")
            .field("name", &self.base.name)
            .field("default_filter", &self.default_filter)
            .finish_non_exhaustive()
    }
}

impl PackageTarget {
    pub(crate) fn new(
        base: TargetBase,
        registry: Arc<dyn PackageRegistry>,
        default_pattern: &str,
    ) -> TargetResult<Self> {
        let default_filter = base.compile(default_pattern)?;
        Ok(Self {
            base,
            registry,
            default_filter,
        })
    }

    async fn upload(&self, artifact: &Artifact) -> TargetResult<()> {
        let (path, size) = self.base.fetch(artifact).await?;

        if !self.base.run.should_perform() {
            self.base.run.skip(&format!(
                "upload {} ({size} bytes) to {}",
                artifact.name, self.base.name
            ));
            return Ok(());
        }

        self.registry.upload(&path).await.map_err(|e| {
            TargetError::client(
                self.base.name,
                e,
                "this version is already published; bump the version or remove it from the registry",
            )
        })?;
        info!(name = %artifact.name, registry = %self.base.name, "uploaded package");
        Ok(())
    }
}

#[async_trait]
impl Target for PackageTarget {
    fn name(&self) -> TargetName {
        self.base.name
    }

    #[instrument(skip(self), fields(registry = %self.base.name))]
    async fn publish(&self, version: &str, revision: &str) -> TargetResult<TargetOutcome> {
        let artifacts = self
            .base
            .artifacts_for_revision(revision, Some(&self.default_filter))
            .await?;
        if artifacts.is_empty() {
            return Ok(self.base.skip_empty(revision));
        }

        info!(version, count = artifacts.len(), "publishing packages");
        let results = join_all(artifacts.iter().map(|a| self.upload(a))).await;
        collect_uploads(&artifacts, results)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use parking_lot::Mutex;

    use super::*;

    /// Registry that records uploaded file names.
    #[derive(Default)]
    pub(crate) struct MockRegistry {
        pub uploaded: Mutex<Vec<String>>,
        pub conflict: bool,
    }

    #[async_trait]
    impl PackageRegistry for MockRegistry {
        async fn upload(&self, path: &Utf8Path) -> Result<(), ClientError> {
            if self.conflict {
                return Err(ClientError::Conflict("already published".into()));
            }
            let name = path.file_name().map(str::to_string).unwrap_or_default();
            assert!(path.exists());
            self.uploaded.lock().push(name);
            Ok(())
        }
    }
}
