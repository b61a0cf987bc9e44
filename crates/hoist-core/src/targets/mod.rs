//! Publish targets: the places artifacts get released to.
//!
//! A [`Target`] is built from one `[[targets]]` config block plus the shared
//! [`ArtifactStore`]. Construction validates credentials and settings before
//! any I/O happens; `publish` then resolves the target's artifact subset,
//! downloads through the store, and uploads.
//!
//! Targets are looked up through [`TargetName`], a closed enumeration whose
//! [`constructor`](TargetName::constructor) is a plain `match`.

pub mod github;
pub mod npm;
pub mod pypi;
mod registry;

pub use registry::{PackageRegistry, PackageTarget};

use std::fmt;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, error, warn};

use crate::artifacts::{Artifact, ArtifactError, ArtifactStore, FilterOptions};
use crate::context::{Environment, RunContext};
use crate::error::ErrorKind;

/// Known publish destinations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetName {
    /// GitHub releases with uploaded assets.
    Github,
    /// The npm registry.
    Npm,
    /// The Python Package Index.
    Pypi,
}

/// Function that builds a target from its context.
pub type TargetConstructor = fn(TargetContext) -> TargetResult<Box<dyn Target>>;

impl TargetName {
    /// Every known target, in registry order.
    pub const ALL: [Self; 3] = [Self::Github, Self::Npm, Self::Pypi];

    /// Parse a config name. Unknown names yield `None`.
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(name.trim()))
    }

    /// The name used in config files.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Github => "github",
            Self::Npm => "npm",
            Self::Pypi => "pypi",
        }
    }

    /// The constructor registered for this target.
    pub fn constructor(self) -> TargetConstructor {
        match self {
            Self::Github => github::build,
            Self::Npm => npm::build,
            Self::Pypi => pypi::build,
        }
    }
}

impl fmt::Display for TargetName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Look up the constructor for a config name.
pub fn lookup(name: &str) -> Option<TargetConstructor> {
    TargetName::parse(name).map(TargetName::constructor)
}

/// Errors returned by destination clients.
///
/// Clients map transport status codes onto these variants so targets can
/// branch on them.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// The requested resource does not exist.
    #[error("not found")]
    NotFound,

    /// The resource already exists or conflicts with existing state.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Network, authentication, or unexpected service failure.
    #[error("transport error: {0}")]
    Transport(String),
}

/// Errors from target construction and publishing.
#[derive(Error, Debug)]
pub enum TargetError {
    /// No constructor is registered under this name.
    #[error("unknown target {0:?} (known targets: github, npm, pypi)")]
    UnknownTarget(String),

    /// A required credential is missing from the environment.
    #[error("{target}: missing required environment variable {variable}")]
    MissingCredential {
        /// Target being constructed.
        target: TargetName,
        /// The missing variable.
        variable: String,
    },

    /// A required command-line tool is not installed.
    #[error("{target}: `{tool}` not found on PATH")]
    MissingTool {
        /// Target being constructed.
        target: TargetName,
        /// The missing binary.
        tool: &'static str,
    },

    /// A target setting is malformed.
    #[error("{target}: invalid configuration: {message}")]
    InvalidConfig {
        /// Target being constructed.
        target: TargetName,
        /// What is wrong.
        message: String,
    },

    /// Listing or downloading artifacts failed.
    #[error(transparent)]
    Artifact(#[from] ArtifactError),

    /// A destination client call failed.
    #[error("{target}: {source}")]
    Client {
        /// Target that made the call.
        target: TargetName,
        /// The client failure.
        source: ClientError,
    },

    /// A downloaded file could not be inspected.
    #[error("cannot read {path}: {message}")]
    Io {
        /// The local file.
        path: Utf8PathBuf,
        /// Underlying error description.
        message: String,
    },
}

impl TargetError {
    /// Classify this error.
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::UnknownTarget(_)
            | Self::MissingCredential { .. }
            | Self::MissingTool { .. }
            | Self::InvalidConfig { .. } => ErrorKind::Configuration,
            Self::Artifact(ArtifactError::RevisionNotFound { .. })
            | Self::Client {
                source: ClientError::NotFound,
                ..
            } => ErrorKind::NotFound,
            Self::Client {
                source: ClientError::Conflict(_),
                ..
            } => ErrorKind::Conflict,
            Self::Artifact(_)
            | Self::Io { .. }
            | Self::Client {
                source: ClientError::Transport(_),
                ..
            } => ErrorKind::Transport,
        }
    }

    /// Wrap a client failure, logging conflicts with a manual-resolution hint.
    pub(crate) fn client(target: TargetName, source: ClientError, hint: &str) -> Self {
        if let ClientError::Conflict(ref detail) = source {
            error!(registry = %target, detail = %detail, hint, "conflict needs manual resolution");
        }
        Self::Client { target, source }
    }
}

/// Result alias for target operations.
pub type TargetResult<T> = Result<T, TargetError>;

/// One `[[targets]]` block from the config.
///
/// Keys other than `name`, `include_names` and `exclude_names` are kept in
/// `settings` and interpreted by the target itself.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct TargetConfig {
    /// Registry name, e.g. `"github"`.
    pub name: String,
    /// Regex an artifact name must match.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include_names: Option<String>,
    /// Regex that drops matching artifact names.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclude_names: Option<String>,
    /// Target-specific settings.
    #[serde(flatten)]
    pub settings: serde_json::Map<String, serde_json::Value>,
}

impl TargetConfig {
    /// A config block with only a name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Add a target-specific setting.
    #[must_use]
    pub fn with_setting(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.settings.insert(key.to_string(), value.into());
        self
    }
}

/// Everything a target constructor receives.
#[derive(Debug, Clone)]
pub struct TargetContext {
    /// The target's config block.
    pub config: TargetConfig,
    /// Shared, deduplicating artifact store.
    pub store: Arc<ArtifactStore>,
    /// Dry-run gate.
    pub run: RunContext,
    /// Environment snapshot for credentials.
    pub env: Environment,
    /// Changelog used for release notes, if configured.
    pub changelog: Option<Utf8PathBuf>,
}

/// What a target did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum TargetOutcome {
    /// Artifacts were uploaded (or would have been, under dry-run).
    Published {
        /// Names of the uploaded artifacts.
        artifacts: Vec<String>,
    },
    /// Nothing matched; the target did nothing.
    Skipped {
        /// Why the target was skipped.
        reason: String,
    },
}

/// A publish destination.
#[async_trait]
pub trait Target: Send + Sync {
    /// Registry name of this target.
    fn name(&self) -> TargetName;

    /// Publish the artifacts built for `revision` as `version`.
    async fn publish(&self, version: &str, revision: &str) -> TargetResult<TargetOutcome>;
}

/// State shared by every target implementation.
#[derive(Debug)]
pub(crate) struct TargetBase {
    pub(crate) name: TargetName,
    pub(crate) config: TargetConfig,
    pub(crate) filter: FilterOptions,
    pub(crate) store: Arc<ArtifactStore>,
    pub(crate) run: RunContext,
}

impl TargetBase {
    /// Compile the block's filters; invalid regexes are configuration errors.
    pub(crate) fn new(name: TargetName, ctx: &TargetContext) -> TargetResult<Self> {
        let filter = FilterOptions::from_patterns(
            ctx.config.include_names.as_deref(),
            ctx.config.exclude_names.as_deref(),
        )
        .map_err(|e| TargetError::InvalidConfig {
            target: name,
            message: e.to_string(),
        })?;

        Ok(Self {
            name,
            config: ctx.config.clone(),
            filter,
            store: Arc::clone(&ctx.store),
            run: ctx.run,
        })
    }

    /// Artifacts of `revision` passing this target's filters.
    ///
    /// The target's own patterns win over `default_filter` key by key.
    pub(crate) async fn artifacts_for_revision(
        &self,
        revision: &str,
        default_filter: Option<&FilterOptions>,
    ) -> TargetResult<Vec<Artifact>> {
        let filter = match default_filter {
            Some(defaults) => self.filter.merged_over(defaults),
            None => self.filter.clone(),
        };
        let filter = (!filter.is_empty()).then_some(filter);
        Ok(self
            .store
            .filter_artifacts(revision, filter.as_ref())
            .await?)
    }

    /// Outcome for an empty artifact subset, logged as a warning.
    pub(crate) fn skip_empty(&self, revision: &str) -> TargetOutcome {
        warn!(registry = %self.name, revision, "no matching artifacts, skipping");
        TargetOutcome::Skipped {
            reason: format!("no artifacts matched for revision {revision}"),
        }
    }

    pub(crate) fn compile(&self, pattern: &str) -> TargetResult<FilterOptions> {
        regex::Regex::new(pattern)
            .map(FilterOptions::include)
            .map_err(|e| self.invalid(e.to_string()))
    }

    pub(crate) fn invalid(&self, message: impl Into<String>) -> TargetError {
        TargetError::InvalidConfig {
            target: self.name,
            message: message.into(),
        }
    }

    /// A string setting; present but non-string values are rejected.
    pub(crate) fn str_setting(&self, key: &str) -> TargetResult<Option<String>> {
        match self.config.settings.get(key) {
            None | Some(serde_json::Value::Null) => Ok(None),
            Some(serde_json::Value::String(s)) => Ok(Some(s.clone())),
            Some(other) => Err(self.invalid(format!("`{key}` must be a string, got {other}"))),
        }
    }

    /// A boolean setting; present but non-boolean values are rejected.
    pub(crate) fn bool_setting(&self, key: &str) -> TargetResult<Option<bool>> {
        match self.config.settings.get(key) {
            None | Some(serde_json::Value::Null) => Ok(None),
            Some(serde_json::Value::Bool(b)) => Ok(Some(*b)),
            Some(other) => Err(self.invalid(format!("`{key}` must be a boolean, got {other}"))),
        }
    }

    /// Download `artifact` through the store and return its path and size.
    pub(crate) async fn fetch(&self, artifact: &Artifact) -> TargetResult<(Utf8PathBuf, u64)> {
        let path = self.store.download_artifact(artifact).await?;
        let size = file_size(&path).await?;
        Ok((path, size))
    }
}

async fn file_size(path: &Utf8Path) -> TargetResult<u64> {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.len())
        .map_err(|e| TargetError::Io {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
}

/// Look up a required credential.
pub(crate) fn credential(
    target: TargetName,
    env: &Environment,
    variable: &str,
) -> TargetResult<String> {
    env.require(variable)
        .map_err(|variable| TargetError::MissingCredential { target, variable })
}

/// Locate a required binary on `PATH`.
pub(crate) fn locate_tool(target: TargetName, tool: &'static str) -> TargetResult<std::path::PathBuf> {
    which::which(tool).map_err(|_| TargetError::MissingTool { target, tool })
}

/// Fold per-artifact upload results into a target outcome.
///
/// Every upload has already been awaited; the first failure wins.
pub(crate) fn collect_uploads(
    artifacts: &[Artifact],
    results: Vec<TargetResult<()>>,
) -> TargetResult<TargetOutcome> {
    results.into_iter().collect::<TargetResult<Vec<()>>>()?;
    Ok(TargetOutcome::Published {
        artifacts: artifacts.iter().map(|a| a.name.clone()).collect(),
    })
}

/// Run a registry CLI and return its stdout.
///
/// Non-zero exits are classified with [`classify_stderr`].
pub(crate) async fn run_tool(
    program: &Path,
    args: &[&str],
    envs: &[(&str, &str)],
    stdin: Option<&[u8]>,
    conflict_markers: &[&str],
) -> Result<String, ClientError> {
    debug!(program = %program.display(), ?args, "running registry client");
    let mut command = Command::new(program);
    command
        .args(args)
        .envs(envs.iter().copied())
        .stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let spawn_failed =
        |e: std::io::Error| ClientError::Transport(format!("failed to run {}: {e}", program.display()));
    let mut child = command.spawn().map_err(spawn_failed)?;

    if let Some(input) = stdin
        && let Some(mut pipe) = child.stdin.take()
    {
        pipe.write_all(input).await.map_err(spawn_failed)?;
    }

    let output = child.wait_with_output().await.map_err(spawn_failed)?;
    if output.status.success() {
        return Ok(String::from_utf8_lossy(&output.stdout).to_string());
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    Err(classify_stderr(&stderr, conflict_markers))
}

/// Classify a failed CLI client call by its stderr.
pub(crate) fn classify_stderr(stderr: &str, conflict_markers: &[&str]) -> ClientError {
    let lower = stderr.to_ascii_lowercase();
    if conflict_markers
        .iter()
        .any(|m| lower.contains(&m.to_ascii_lowercase()))
    {
        return ClientError::Conflict(stderr.trim().to_string());
    }
    if lower.contains("404") || lower.contains("not found") {
        return ClientError::NotFound;
    }
    ClientError::Transport(stderr.trim().to_string())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::artifacts::tests::MockProvider;
    use crate::context::RepoRef;

    pub(crate) fn context(provider: MockProvider, config: TargetConfig) -> (Arc<MockProvider>, TargetContext) {
        let provider = Arc::new(provider);
        let store = ArtifactStore::new(provider.clone(), RepoRef::new("acme", "widget")).unwrap();
        let ctx = TargetContext {
            config,
            store: Arc::new(store),
            run: RunContext::live(),
            env: Environment::default(),
            changelog: None,
        };
        (provider, ctx)
    }

    #[test]
    fn registry_resolves_known_names() {
        for name in TargetName::ALL {
            assert_eq!(TargetName::parse(name.as_str()), Some(name));
            assert!(lookup(name.as_str()).is_some());
        }
        assert_eq!(TargetName::parse("GitHub"), Some(TargetName::Github));
    }

    #[test]
    fn registry_rejects_unknown_names() {
        assert!(lookup("homebrew").is_none());
        assert!(TargetName::parse("").is_none());
    }

    #[tokio::test]
    async fn own_filter_wins_over_call_site_default() {
        let provider = MockProvider::with_revision("abc123", &["a.whl", "a.tgz", "a.zip"]);
        let config = TargetConfig {
            include_names: Some(r"\.zip$".into()),
            ..TargetConfig::named("pypi")
        };
        let (_provider, ctx) = context(provider, config);
        let base = TargetBase::new(TargetName::Pypi, &ctx).unwrap();

        let default = base.compile(r"\.(whl|tgz)$").unwrap();
        let names: Vec<String> = base
            .artifacts_for_revision("abc123", Some(&default))
            .await
            .unwrap()
            .into_iter()
            .map(|a| a.name)
            .collect();
        assert_eq!(names, vec!["a.zip"]);
    }

    #[tokio::test]
    async fn default_filter_applies_when_target_has_none() {
        let provider = MockProvider::with_revision("abc123", &["a.whl", "a.tgz"]);
        let (_provider, ctx) = context(provider, TargetConfig::named("npm"));
        let base = TargetBase::new(TargetName::Npm, &ctx).unwrap();

        let default = base.compile(r"\.tgz$").unwrap();
        let artifacts = base.artifacts_for_revision("abc123", Some(&default)).await.unwrap();
        assert_eq!(artifacts.len(), 1);
        assert_eq!(artifacts[0].name, "a.tgz");
    }

    #[test]
    fn invalid_regex_is_configuration_error() {
        let config = TargetConfig {
            exclude_names: Some("(".into()),
            ..TargetConfig::named("npm")
        };
        let (_provider, ctx) = context(MockProvider::default(), config);
        let err = TargetBase::new(TargetName::Npm, &ctx).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn settings_are_type_checked() {
        let config = TargetConfig::named("github")
            .with_setting("tag_prefix", "v")
            .with_setting("draft", "yes");
        let (_provider, ctx) = context(MockProvider::default(), config);
        let base = TargetBase::new(TargetName::Github, &ctx).unwrap();

        assert_eq!(base.str_setting("tag_prefix").unwrap().as_deref(), Some("v"));
        assert_eq!(base.str_setting("missing").unwrap(), None);
        assert!(base.bool_setting("draft").is_err());
    }

    #[test]
    fn target_config_keeps_unknown_keys() {
        let config: TargetConfig = serde_json::from_value(serde_json::json!({
            "name": "github",
            "include_names": "\\.zip$",
            "tag_prefix": "v",
            "draft": true,
        }))
        .unwrap();
        assert_eq!(config.include_names.as_deref(), Some("\\.zip$"));
        assert_eq!(config.settings.get("tag_prefix"), Some(&serde_json::json!("v")));
        assert_eq!(config.settings.get("draft"), Some(&serde_json::json!(true)));
        assert!(!config.settings.contains_key("name"));
    }

    #[test]
    fn stderr_classification() {
        assert_eq!(
            classify_stderr("HTTP 404: Not Found", &["already_exists"]),
            ClientError::NotFound
        );
        assert!(matches!(
            classify_stderr("Validation Failed: already_exists", &["already_exists"]),
            ClientError::Conflict(_)
        ));
        assert!(matches!(
            classify_stderr("connection refused", &[]),
            ClientError::Transport(_)
        ));
    }

    #[test]
    fn error_kinds() {
        let err = TargetError::Client {
            target: TargetName::Github,
            source: ClientError::Conflict("exists".into()),
        };
        assert_eq!(err.kind(), ErrorKind::Conflict);
        let err = TargetError::Artifact(ArtifactError::RevisionNotFound {
            revision: "x".into(),
        });
        assert_eq!(err.kind(), ErrorKind::NotFound);
        let err = TargetError::MissingCredential {
            target: TargetName::Npm,
            variable: "NPM_TOKEN".into(),
        };
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }
}
