//! Configuration loading and discovery.
//!
//! Sources, lowest precedence first:
//! - built-in defaults
//! - `~/.config/hoist/config.<ext>` (user config)
//! - `.hoist.<ext>` or `hoist.<ext>` in the current directory or a parent,
//!   stopping at the repository root
//! - files passed explicitly with `--config`
//!
//! `<ext>` is one of `toml`, `yaml`, `yml`, `json`.
//!
//! # Example
//! ```toml
//! [github]
//! owner = "acme"
//! repo = "widget"
//!
//! [changelog]
//! policy = "simple"
//!
//! [[targets]]
//! name = "github"
//! tag_prefix = "v"
//! ```

use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use figment::Figment;
use figment::providers::{Format, Json, Serialized, Toml, Yaml};
use serde::{Deserialize, Serialize};

use crate::context::RepoRef;
use crate::error::{ConfigError, ConfigResult};
use crate::release::{ChangelogPolicy, DEFAULT_PUBLISH_DELAY, ReleaseOptions};
use crate::targets::TargetConfig;

/// Root configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Log level (`debug`, `info`, `warn`, `error`).
    pub log_level: LogLevel,
    /// Directory for JSONL log files (falls back to platform defaults if unset).
    pub log_dir: Option<Utf8PathBuf>,
    /// Repository the releases belong to.
    pub github: Option<GithubConfig>,
    /// Changelog location and policy.
    pub changelog: ChangelogConfig,
    /// Release branch workflow.
    pub release: ReleaseConfig,
    /// Where build artifacts are found.
    pub artifacts: ArtifactsConfig,
    /// Publish destinations, in declaration order.
    pub targets: Vec<TargetConfig>,
}

/// `[github]` section.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct GithubConfig {
    /// Repository owner.
    pub owner: String,
    /// Repository name.
    pub repo: String,
}

/// `[changelog]` section.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct ChangelogConfig {
    /// Changelog path relative to the project root (default `CHANGELOG.md`).
    pub path: Option<Utf8PathBuf>,
    /// Whether a release requires a changelog entry.
    pub policy: ChangelogPolicy,
}

/// `[release]` section.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct ReleaseConfig {
    /// Branch releases start from (default `main`).
    pub default_branch: Option<String>,
    /// Version bump command; `""` disables it.
    pub pre_release_command: Option<String>,
    /// Skip repository state validation.
    pub no_git_checks: bool,
    /// Push the release branch (default `true`).
    pub push: Option<bool>,
    /// Remote to push to (default `origin`).
    pub remote: Option<String>,
    /// Ask before a live release (default `true`).
    pub confirm: Option<bool>,
    /// Run every command as a dry run.
    pub dry_run: bool,
    /// Seconds to wait between push and publish (default 30).
    pub publish_delay: Option<u64>,
}

/// `[artifacts]` section.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct ArtifactsConfig {
    /// Directory laid out as `<revision>/<artifact files>`.
    pub path: Option<Utf8PathBuf>,
}

impl Config {
    /// The configured repository.
    pub fn repo_ref(&self) -> ConfigResult<RepoRef> {
        let github = self.github.as_ref().ok_or(ConfigError::Missing("github.owner"))?;
        if github.owner.is_empty() {
            return Err(ConfigError::Missing("github.owner"));
        }
        if github.repo.is_empty() {
            return Err(ConfigError::Missing("github.repo"));
        }
        Ok(RepoRef::new(&github.owner, &github.repo))
    }

    /// Configured artifact directory, resolved against `root`.
    pub fn artifacts_dir(&self, root: &Utf8Path) -> ConfigResult<Utf8PathBuf> {
        let path = self
            .artifacts
            .path
            .as_ref()
            .ok_or(ConfigError::Missing("artifacts.path"))?;
        Ok(root.join(path))
    }

    /// Changelog path relative to the project root.
    pub fn changelog_path(&self) -> Utf8PathBuf {
        self.changelog
            .path
            .clone()
            .unwrap_or_else(|| Utf8PathBuf::from("CHANGELOG.md"))
    }

    /// Release options for `version` with config values applied.
    pub fn release_options(&self, version: &str, root: &Utf8Path) -> ReleaseOptions {
        let release = &self.release;
        let mut options = ReleaseOptions::new(version, root);
        if let Some(branch) = &release.default_branch {
            options.default_branch.clone_from(branch);
        }
        if let Some(remote) = &release.remote {
            options.remote.clone_from(remote);
        }
        options.no_git_checks = release.no_git_checks;
        options.push = release.push.unwrap_or(true);
        options.pre_release_command.clone_from(&release.pre_release_command);
        options.changelog_policy = self.changelog.policy;
        options.changelog_path = self.changelog_path();
        options.publish_delay = release
            .publish_delay
            .map_or(DEFAULT_PUBLISH_DELAY, Duration::from_secs);
        options
    }

    /// Whether to prompt before a live release.
    pub fn confirm(&self) -> bool {
        self.release.confirm.unwrap_or(true)
    }
}

/// Log level configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Verbose output for debugging.
    Debug,
    /// Standard operational information (default).
    #[default]
    Info,
    /// Warnings about potential issues.
    Warn,
    /// Errors only.
    Error,
}

impl LogLevel {
    /// Returns the log level as a lowercase string slice.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

const CONFIG_EXTENSIONS: &[&str] = &["toml", "yaml", "yml", "json"];

const APP_NAME: &str = "hoist";

/// Builder for loading configuration from multiple sources.
#[derive(Debug, Default)]
pub struct ConfigLoader {
    project_search_root: Option<Utf8PathBuf>,
    include_user_config: bool,
    boundary_marker: Option<String>,
    explicit_files: Vec<Utf8PathBuf>,
}

impl ConfigLoader {
    /// A loader that reads user config and stops project search at `.git`.
    pub fn new() -> Self {
        Self {
            project_search_root: None,
            include_user_config: true,
            boundary_marker: Some(".git".to_string()),
            explicit_files: Vec::new(),
        }
    }

    /// Walk up from `path` looking for a project config file.
    pub fn with_project_search<P: AsRef<Utf8Path>>(mut self, path: P) -> Self {
        self.project_search_root = Some(path.as_ref().to_path_buf());
        self
    }

    /// Include `~/.config/hoist/config.<ext>`.
    pub const fn with_user_config(mut self, include: bool) -> Self {
        self.include_user_config = include;
        self
    }

    /// Stop the upward search at a directory containing `marker`.
    pub fn with_boundary_marker<S: Into<String>>(mut self, marker: S) -> Self {
        self.boundary_marker = Some(marker.into());
        self
    }

    /// Search all the way to the filesystem root.
    pub fn without_boundary_marker(mut self) -> Self {
        self.boundary_marker = None;
        self
    }

    /// Add an explicit config file; later files win.
    pub fn with_file<P: AsRef<Utf8Path>>(mut self, path: P) -> Self {
        self.explicit_files.push(path.as_ref().to_path_buf());
        self
    }

    /// Load and merge every source.
    #[tracing::instrument(skip(self), fields(search_root = ?self.project_search_root))]
    pub fn load(self) -> ConfigResult<Config> {
        tracing::debug!("loading configuration");
        let mut figment = Figment::new().merge(Serialized::defaults(Config::default()));

        if self.include_user_config
            && let Some(user_config) = self.find_user_config()
        {
            figment = Self::merge_file(figment, &user_config);
        }

        if let Some(ref root) = self.project_search_root
            && let Some(project_config) = self.find_project_config(root)
        {
            figment = Self::merge_file(figment, &project_config);
        }

        for file in &self.explicit_files {
            figment = Self::merge_file(figment, file);
        }

        let config: Config = figment
            .extract()
            .map_err(|e| ConfigError::Deserialize(Box::new(e)))?;
        tracing::info!(
            log_level = config.log_level.as_str(),
            targets = config.targets.len(),
            "configuration loaded"
        );
        Ok(config)
    }

    /// Like [`load`](Self::load), but fails when no file was found.
    pub fn load_or_error(self) -> ConfigResult<Config> {
        let has_user = self.include_user_config && self.find_user_config().is_some();
        let has_project = self
            .project_search_root
            .as_ref()
            .and_then(|root| self.find_project_config(root))
            .is_some();

        if !has_user && !has_project && self.explicit_files.is_empty() {
            return Err(ConfigError::NotFound);
        }
        self.load()
    }

    fn find_project_config(&self, start: &Utf8Path) -> Option<Utf8PathBuf> {
        let mut current = Some(start.to_path_buf());

        while let Some(dir) = current {
            for ext in CONFIG_EXTENSIONS {
                let dotfile = dir.join(format!(".{APP_NAME}.{ext}"));
                if dotfile.is_file() {
                    return Some(dotfile);
                }
                let regular = dir.join(format!("{APP_NAME}.{ext}"));
                if regular.is_file() {
                    return Some(regular);
                }
            }

            // The repository root is the last directory searched.
            if let Some(ref marker) = self.boundary_marker
                && dir.join(marker).exists()
            {
                break;
            }
            current = dir.parent().map(Utf8Path::to_path_buf);
        }

        None
    }

    fn find_user_config(&self) -> Option<Utf8PathBuf> {
        let proj_dirs = directories::ProjectDirs::from("", "", APP_NAME)?;
        let config_dir = proj_dirs.config_dir();

        CONFIG_EXTENSIONS
            .iter()
            .map(|ext| config_dir.join(format!("config.{ext}")))
            .find(|path| path.is_file())
            .and_then(|path| Utf8PathBuf::from_path_buf(path).ok())
    }

    fn merge_file(figment: Figment, path: &Utf8Path) -> Figment {
        match path.extension() {
            Some("yaml" | "yml") => figment.merge(Yaml::file_exact(path.as_str())),
            Some("json") => figment.merge(Json::file_exact(path.as_str())),
            _ => figment.merge(Toml::file_exact(path.as_str())),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::*;

    fn utf8(path: std::path::PathBuf) -> Utf8PathBuf {
        Utf8PathBuf::try_from(path).unwrap()
    }

    fn load_str(name: &str, contents: &str) -> Config {
        let tmp = TempDir::new().unwrap();
        let path = utf8(tmp.path().join(name));
        fs::write(&path, contents).unwrap();
        ConfigLoader::new()
            .with_user_config(false)
            .with_file(&path)
            .load()
            .unwrap()
    }

    #[test]
    fn defaults() {
        let config = ConfigLoader::new()
            .with_user_config(false)
            .without_boundary_marker()
            .load()
            .unwrap();
        assert_eq!(config, Config::default());
        assert!(config.targets.is_empty());
        assert!(config.confirm());
        assert_eq!(config.changelog_path(), "CHANGELOG.md");
    }

    #[test]
    fn full_toml() {
        let config = load_str(
            "hoist.toml",
            r#"
log_level = "debug"

[github]
owner = "acme"
repo = "widget"

[changelog]
path = "docs/CHANGES.md"
policy = "simple"

[release]
default_branch = "trunk"
pre_release_command = "scripts/bump.sh"
push = false
remote = "upstream"
confirm = false
publish_delay = 0

[artifacts]
path = "dist"

[[targets]]
name = "github"
tag_prefix = "v"

[[targets]]
name = "pypi"
include_names = '\.(whl|gz)$'
"#,
        );

        assert_eq!(config.log_level, LogLevel::Debug);
        assert_eq!(config.repo_ref().unwrap().to_string(), "acme/widget");
        assert_eq!(config.targets.len(), 2);
        assert_eq!(config.targets[0].settings["tag_prefix"], "v");
        assert_eq!(config.targets[1].include_names.as_deref(), Some(r"\.(whl|gz)$"));
        assert!(!config.confirm());
        assert_eq!(
            config.artifacts_dir(Utf8Path::new("/repo")).unwrap(),
            "/repo/dist"
        );

        let options = config.release_options("1.2.0", Utf8Path::new("/repo"));
        assert_eq!(options.default_branch, "trunk");
        assert_eq!(options.remote, "upstream");
        assert!(!options.push);
        assert_eq!(options.changelog_policy, ChangelogPolicy::Simple);
        assert_eq!(options.changelog(), "/repo/docs/CHANGES.md");
        assert_eq!(options.pre_release_command.as_deref(), Some("scripts/bump.sh"));
        assert_eq!(options.publish_delay, Duration::ZERO);
        assert_eq!(options.branch(), "release/1.2.0");
    }

    #[test]
    fn yaml_and_json_formats() {
        let yaml = load_str("hoist.yaml", "release:\n  dry_run: true\n");
        assert!(yaml.release.dry_run);

        let json = load_str("hoist.json", r#"{"targets": [{"name": "npm", "access": "public"}]}"#);
        assert_eq!(json.targets[0].name, "npm");
    }

    #[test]
    fn release_options_defaults() {
        let options = Config::default().release_options("1.0.0", Utf8Path::new("/repo"));
        assert_eq!(options.default_branch, "main");
        assert_eq!(options.remote, "origin");
        assert!(options.push);
        assert_eq!(options.publish_delay, DEFAULT_PUBLISH_DELAY);
        assert_eq!(options.changelog_policy, ChangelogPolicy::None);
    }

    #[test]
    fn missing_sections_are_reported() {
        let config = Config::default();
        assert!(matches!(config.repo_ref(), Err(ConfigError::Missing("github.owner"))));
        assert!(matches!(
            config.artifacts_dir(Utf8Path::new("/")),
            Err(ConfigError::Missing("artifacts.path"))
        ));
    }

    #[test]
    fn later_file_overrides_earlier() {
        let tmp = TempDir::new().unwrap();
        let base = utf8(tmp.path().join("base.toml"));
        fs::write(&base, "log_level = \"warn\"\n[release]\nremote = \"up\"\n").unwrap();
        let over = utf8(tmp.path().join("override.toml"));
        fs::write(&over, "log_level = \"error\"\n").unwrap();

        let config = ConfigLoader::new()
            .with_user_config(false)
            .with_file(&base)
            .with_file(&over)
            .load()
            .unwrap();

        assert_eq!(config.log_level, LogLevel::Error);
        assert_eq!(config.release.remote.as_deref(), Some("up"));
    }

    #[test]
    fn project_config_found_from_subdirectory() {
        let tmp = TempDir::new().unwrap();
        let project = tmp.path().join("project");
        let deep = project.join("src").join("deep");
        fs::create_dir_all(&deep).unwrap();
        fs::write(project.join(".hoist.toml"), "[artifacts]\npath = \"out\"\n").unwrap();

        let config = ConfigLoader::new()
            .with_user_config(false)
            .without_boundary_marker()
            .with_project_search(utf8(deep))
            .load()
            .unwrap();

        assert_eq!(config.artifacts.path.as_deref().map(Utf8Path::as_str), Some("out"));
    }

    #[test]
    fn boundary_marker_stops_search() {
        let tmp = TempDir::new().unwrap();
        let parent = tmp.path().join("parent");
        let child = parent.join("child");
        let work = child.join("work");
        fs::create_dir_all(&work).unwrap();
        fs::write(parent.join(".hoist.toml"), r#"log_level = "warn""#).unwrap();
        fs::create_dir(child.join(".git")).unwrap();

        let config = ConfigLoader::new()
            .with_user_config(false)
            .with_boundary_marker(".git")
            .with_project_search(utf8(work))
            .load()
            .unwrap();

        assert_eq!(config.log_level, LogLevel::Info);
    }

    #[test]
    fn repository_root_config_found_from_subdirectory() {
        let tmp = TempDir::new().unwrap();
        let repo = tmp.path().join("repo");
        let work = repo.join("crates").join("app");
        fs::create_dir_all(&work).unwrap();
        fs::create_dir(repo.join(".git")).unwrap();
        fs::write(repo.join(".hoist.toml"), r#"log_level = "error""#).unwrap();

        let config = ConfigLoader::new()
            .with_user_config(false)
            .with_project_search(utf8(work))
            .load()
            .unwrap();

        assert_eq!(config.log_level, LogLevel::Error);
    }

    #[test]
    fn load_or_error_without_files() {
        let result = ConfigLoader::new()
            .with_user_config(false)
            .without_boundary_marker()
            .load_or_error();
        assert!(matches!(result, Err(ConfigError::NotFound)));
    }

    #[test]
    fn invalid_policy_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let path = utf8(tmp.path().join("hoist.toml"));
        fs::write(&path, "[changelog]\npolicy = \"strict\"\n").unwrap();
        let err = ConfigLoader::new()
            .with_user_config(false)
            .with_file(&path)
            .load()
            .unwrap_err();
        assert!(matches!(err, ConfigError::Deserialize(_)));
    }
}
