//! GitHub releases target.
//!
//! For each version the target finds or creates a release tagged
//! `<tag_prefix><version>` at the published revision, then uploads every
//! matching artifact as a release asset. The release body is the version's
//! changelog section, and semver pre-release versions are flagged as such.
//!
//! Settings:
//!
//! ```toml
//! [[targets]]
//! name = "github"
//! tag_prefix = "v"   # default: ""
//! draft = false      # default: false
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use camino::Utf8PathBuf;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use super::{
    ClientError, Target, TargetBase, TargetContext, TargetError, TargetName, TargetOutcome, TargetResult,
    collect_uploads, credential, locate_tool, run_tool,
};
use crate::artifacts::Artifact;
use crate::changes::read_changeset;
use crate::context::RepoRef;
use crate::memo::SingleFlight;

/// Environment variable holding the API token.
pub const TOKEN_VAR: &str = "GITHUB_TOKEN";

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// A release as reported by the GitHub API.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct GithubRelease {
    /// Release id; `0` for a dry-run placeholder.
    pub id: u64,
    /// The release's tag.
    pub tag_name: String,
    /// Browser URL.
    #[serde(default)]
    pub html_url: Option<String>,
    /// Commit or branch the tag points at.
    #[serde(default)]
    pub target_commitish: Option<String>,
}

impl GithubRelease {
    fn placeholder(tag: &str) -> Self {
        Self {
            id: 0,
            tag_name: tag.to_string(),
            html_url: None,
            target_commitish: None,
        }
    }
}

/// Parameters for creating a release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewRelease {
    /// Tag to create.
    pub tag_name: String,
    /// Revision the tag should point at.
    pub target_commitish: String,
    /// Display name.
    pub name: String,
    /// Markdown body.
    pub body: String,
    /// Create unpublished.
    pub draft: bool,
    /// Mark as a pre-release.
    pub prerelease: bool,
}

/// A file to attach to a release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetUpload {
    /// Asset name shown on the release.
    pub name: String,
    /// Local file to upload.
    pub path: Utf8PathBuf,
    /// Content type header.
    pub content_type: String,
    /// File size in bytes.
    pub size: u64,
}

/// The GitHub release API surface used by [`GithubTarget`].
#[async_trait]
pub trait GithubApi: Send + Sync {
    /// Fetch the release for `tag`; [`ClientError::NotFound`] if none exists.
    async fn release_by_tag(&self, repo: &RepoRef, tag: &str) -> Result<GithubRelease, ClientError>;

    /// Create a release.
    async fn create_release(
        &self,
        repo: &RepoRef,
        release: &NewRelease,
    ) -> Result<GithubRelease, ClientError>;

    /// Attach a file to a release.
    async fn upload_asset(
        &self,
        repo: &RepoRef,
        release: &GithubRelease,
        asset: &AssetUpload,
    ) -> Result<(), ClientError>;
}

/// [`GithubApi`] implemented with the `gh` CLI.
#[derive(Clone)]
pub struct GhCli {
    program: PathBuf,
    token: String,
}

impl std::fmt::Debug for GhCli {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GhCli")
            .field("program", &self.program)
            .finish_non_exhaustive()
    }
}

impl GhCli {
    /// Use the `gh` binary at `program`, authenticating with `token`.
    pub const fn new(program: PathBuf, token: String) -> Self {
        Self { program, token }
    }

    async fn api(&self, args: &[&str], stdin: Option<&[u8]>) -> Result<String, ClientError> {
        let mut full = vec!["api"];
        full.extend_from_slice(args);
        run_tool(
            &self.program,
            &full,
            &[("GH_TOKEN", self.token.as_str())],
            stdin,
            &["already_exists", "already exists"],
        )
        .await
    }
}

fn parse_release(body: &str) -> Result<GithubRelease, ClientError> {
    serde_json::from_str(body)
        .map_err(|e| ClientError::Transport(format!("malformed release response: {e}")))
}

#[async_trait]
impl GithubApi for GhCli {
    async fn release_by_tag(&self, repo: &RepoRef, tag: &str) -> Result<GithubRelease, ClientError> {
        let path = format!("repos/{repo}/releases/tags/{tag}");
        parse_release(&self.api(&[path.as_str()], None).await?)
    }

    async fn create_release(
        &self,
        repo: &RepoRef,
        release: &NewRelease,
    ) -> Result<GithubRelease, ClientError> {
        let path = format!("repos/{repo}/releases");
        let payload = serde_json::to_vec(release)
            .map_err(|e| ClientError::Transport(format!("cannot encode release: {e}")))?;
        let body = self
            .api(&["--method", "POST", path.as_str(), "--input", "-"], Some(&payload))
            .await?;
        parse_release(&body)
    }

    async fn upload_asset(
        &self,
        repo: &RepoRef,
        release: &GithubRelease,
        asset: &AssetUpload,
    ) -> Result<(), ClientError> {
        let url = format!(
            "https://uploads.github.com/repos/{repo}/releases/{}/assets?name={}",
            release.id,
            encode_query_value(&asset.name)
        );
        let content_type = format!("Content-Type: {}", asset.content_type);
        let content_length = format!("Content-Length: {}", asset.size);
        self.api(
            &[
                "--method",
                "POST",
                url.as_str(),
                "-H",
                content_type.as_str(),
                "-H",
                content_length.as_str(),
                "--input",
                asset.path.as_str(),
            ],
            None,
        )
        .await
        .map(drop)
    }
}

/// Percent-encode everything outside the RFC 3986 unreserved set.
fn encode_query_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'.' | b'_' | b'~') {
            out.push(char::from(byte));
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

/// Registry constructor for the `github` target.
pub fn build(ctx: TargetContext) -> TargetResult<Box<dyn Target>> {
    Ok(Box::new(GithubTarget::new(ctx)?))
}

/// Publishes artifacts as GitHub release assets.
pub struct GithubTarget {
    base: TargetBase,
    api: Arc<dyn GithubApi>,
    repo: RepoRef,
    tag_prefix: String,
    draft: bool,
    changelog: Option<Utf8PathBuf>,
    releases: SingleFlight<String, GithubRelease, ClientError>,
}

impl std::fmt::Debug for GithubTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GithubTarget")
            .field("repo", &self.repo)
            .field("tag_prefix", &self.tag_prefix)
            .field("draft", &self.draft)
            .finish_non_exhaustive()
    }
}

impl GithubTarget {
    /// Build a target backed by the `gh` CLI.
    ///
    /// Requires `GITHUB_TOKEN` and a `gh` binary on `PATH`.
    pub fn new(ctx: TargetContext) -> TargetResult<Self> {
        let token = credential(TargetName::Github, &ctx.env, TOKEN_VAR)?;
        let program = locate_tool(TargetName::Github, "gh")?;
        Self::with_client(ctx, Arc::new(GhCli::new(program, token)))
    }

    /// Build a target over an explicit API client.
    pub fn with_client(ctx: TargetContext, api: Arc<dyn GithubApi>) -> TargetResult<Self> {
        let base = TargetBase::new(TargetName::Github, &ctx)?;
        let tag_prefix = base.str_setting("tag_prefix")?.unwrap_or_default();
        let draft = base.bool_setting("draft")?.unwrap_or(false);

        Ok(Self {
            repo: ctx.store.repo().clone(),
            base,
            api,
            tag_prefix,
            draft,
            changelog: ctx.changelog,
            releases: SingleFlight::new(),
        })
    }

    /// Tag name for `version`.
    pub fn tag_for(&self, version: &str) -> String {
        format!("{}{version}", self.tag_prefix)
    }

    async fn release_body(&self, version: &str) -> String {
        let Some(path) = self.changelog.as_deref() else {
            return String::new();
        };
        match read_changeset(path, version, Some(self.tag_prefix.as_str())).await {
            Ok(Some(changeset)) => changeset.body,
            Ok(None) => {
                debug!(%path, version, "no changelog section for release body");
                String::new()
            }
            Err(e) => {
                warn!(%path, error = %e, "cannot read changelog for release body");
                String::new()
            }
        }
    }

    /// Find the release for `version`, creating it at `revision` if absent.
    ///
    /// Runs at most once per tag for the lifetime of this target.
    #[instrument(skip(self))]
    pub async fn get_or_create_release(
        &self,
        version: &str,
        revision: &str,
    ) -> TargetResult<GithubRelease> {
        let tag = self.tag_for(version);
        let params = NewRelease {
            tag_name: tag.clone(),
            target_commitish: revision.to_string(),
            name: tag.clone(),
            body: self.release_body(version).await,
            draft: self.draft,
            prerelease: is_prerelease(version),
        };
        let api = Arc::clone(&self.api);
        let repo = self.repo.clone();
        let run = self.base.run;

        self.releases
            .run(tag, move || async move {
                match api.release_by_tag(&repo, &params.tag_name).await {
                    Ok(existing) => {
                        if existing
                            .target_commitish
                            .as_deref()
                            .is_some_and(|c| c != params.target_commitish)
                        {
                            debug!(
                                tag = %existing.tag_name,
                                existing = ?existing.target_commitish,
                                requested = %params.target_commitish,
                                "existing release points at a different commit"
                            );
                        }
                        info!(tag = %existing.tag_name, id = existing.id, "reusing existing release");
                        return Ok(existing);
                    }
                    Err(ClientError::NotFound) => {}
                    Err(e) => return Err(e),
                }

                if !run.should_perform() {
                    run.skip(&format!("create GitHub release {}", params.tag_name));
                    return Ok(GithubRelease::placeholder(&params.tag_name));
                }

                let created = api.create_release(&repo, &params).await?;
                info!(tag = %created.tag_name, id = created.id, "created release");
                Ok(created)
            })
            .await
            .map_err(|e| {
                TargetError::client(
                    TargetName::Github,
                    e,
                    "a release for this tag was created concurrently; inspect it and re-run `hoist publish`",
                )
            })
    }

    async fn upload(&self, release: &GithubRelease, artifact: &Artifact) -> TargetResult<()> {
        let (path, size) = self.base.fetch(artifact).await?;

        if !self.base.run.should_perform() {
            self.base.run.skip(&format!(
                "upload {} ({size} bytes) to release {}",
                artifact.name, release.tag_name
            ));
            return Ok(());
        }

        let asset = AssetUpload {
            name: artifact.name.clone(),
            path,
            content_type: artifact
                .mime_type
                .clone()
                .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string()),
            size,
        };
        self.api
            .upload_asset(&self.repo, release, &asset)
            .await
            .map_err(|e| {
                TargetError::client(
                    TargetName::Github,
                    e,
                    "delete the existing asset from the release, then re-run `hoist publish`",
                )
            })?;
        info!(name = %asset.name, tag = %release.tag_name, "uploaded release asset");
        Ok(())
    }
}

fn is_prerelease(version: &str) -> bool {
    semver::Version::parse(version.trim_start_matches('v')).is_ok_and(|v| !v.pre.is_empty())
}

#[async_trait]
impl Target for GithubTarget {
    fn name(&self) -> TargetName {
        TargetName::Github
    }

    #[instrument(skip(self), fields(repo = %self.repo))]
    async fn publish(&self, version: &str, revision: &str) -> TargetResult<TargetOutcome> {
        let artifacts = self.base.artifacts_for_revision(revision, None).await?;
        if artifacts.is_empty() {
            return Ok(self.base.skip_empty(revision));
        }

        let release = self.get_or_create_release(version, revision).await?;
        let results = join_all(artifacts.iter().map(|a| self.upload(&release, a))).await;
        collect_uploads(&artifacts, results)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use parking_lot::Mutex;

    use super::*;
    use crate::artifacts::tests::MockProvider;
    use crate::context::{Environment, RunContext};
    use crate::error::ErrorKind;
    use crate::targets::TargetConfig;
    use crate::targets::tests::context;

    #[derive(Default)]
    struct MockGithub {
        existing: Mutex<HashMap<String, GithubRelease>>,
        lookups: Mutex<usize>,
        created: Mutex<Vec<NewRelease>>,
        uploaded: Mutex<Vec<(u64, String)>>,
        conflict_on_upload: bool,
    }

    #[async_trait]
    impl GithubApi for MockGithub {
        async fn release_by_tag(&self, _repo: &RepoRef, tag: &str) -> Result<GithubRelease, ClientError> {
            *self.lookups.lock() += 1;
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.existing
                .lock()
                .get(tag)
                .cloned()
                .ok_or(ClientError::NotFound)
        }

        async fn create_release(
            &self,
            _repo: &RepoRef,
            release: &NewRelease,
        ) -> Result<GithubRelease, ClientError> {
            let mut created = self.created.lock();
            created.push(release.clone());
            Ok(GithubRelease {
                id: 100 + created.len() as u64,
                tag_name: release.tag_name.clone(),
                html_url: None,
                target_commitish: Some(release.target_commitish.clone()),
            })
        }

        async fn upload_asset(
            &self,
            _repo: &RepoRef,
            release: &GithubRelease,
            asset: &AssetUpload,
        ) -> Result<(), ClientError> {
            if self.conflict_on_upload {
                return Err(ClientError::Conflict(format!("{} already_exists", asset.name)));
            }
            assert!(asset.path.as_std_path().exists());
            self.uploaded.lock().push((release.id, asset.name.clone()));
            Ok(())
        }
    }

    fn target(
        names: &[&str],
        config: TargetConfig,
        api: Arc<MockGithub>,
        run: RunContext,
    ) -> (Arc<MockProvider>, GithubTarget) {
        let (provider, mut ctx) = context(MockProvider::with_revision("abc123", names), config);
        ctx.run = run;
        (provider, GithubTarget::with_client(ctx, api).unwrap())
    }

    #[tokio::test]
    async fn release_is_created_once_per_tag() {
        let api = Arc::new(MockGithub::default());
        let (_p, gh) = target(&["a.zip"], TargetConfig::named("github"), Arc::clone(&api), RunContext::live());

        let (a, b) = tokio::join!(
            gh.get_or_create_release("1.0.0", "abc123"),
            gh.get_or_create_release("1.0.0", "abc123")
        );
        assert_eq!(a.unwrap(), b.unwrap());
        assert_eq!(*api.lookups.lock(), 1);
        assert_eq!(api.created.lock().len(), 1);

        gh.get_or_create_release("1.0.0", "abc123").await.unwrap();
        assert_eq!(api.created.lock().len(), 1);
    }

    #[tokio::test]
    async fn existing_release_is_reused() {
        let api = Arc::new(MockGithub::default());
        api.existing.lock().insert(
            "1.0.0".into(),
            GithubRelease {
                id: 7,
                tag_name: "1.0.0".into(),
                html_url: None,
                target_commitish: Some("other".into()),
            },
        );
        let (_p, gh) = target(&["a.zip"], TargetConfig::named("github"), Arc::clone(&api), RunContext::live());

        let outcome = gh.publish("1.0.0", "abc123").await.unwrap();
        assert_eq!(
            outcome,
            TargetOutcome::Published {
                artifacts: vec!["a.zip".into()]
            }
        );
        assert!(api.created.lock().is_empty());
        assert_eq!(*api.uploaded.lock(), vec![(7, "a.zip".to_string())]);
    }

    #[tokio::test]
    async fn publish_uploads_every_matching_artifact() {
        let api = Arc::new(MockGithub::default());
        let config = TargetConfig {
            exclude_names: Some(r"\.txt$".into()),
            ..TargetConfig::named("github")
        };
        let (provider, gh) = target(&["a.zip", "b.tgz", "notes.txt"], config, Arc::clone(&api), RunContext::live());

        gh.publish("1.0.0", "abc123").await.unwrap();
        let mut uploaded: Vec<String> = api.uploaded.lock().iter().map(|(_, n)| n.clone()).collect();
        uploaded.sort();
        assert_eq!(uploaded, vec!["a.zip", "b.tgz"]);
        assert_eq!(provider.download_calls.lock().len(), 2);
    }

    #[tokio::test]
    async fn dry_run_creates_and_uploads_nothing() {
        let api = Arc::new(MockGithub::default());
        let (_p, gh) = target(&["a.zip"], TargetConfig::named("github"), Arc::clone(&api), RunContext::dry_run());

        let release = gh.get_or_create_release("1.0.0", "abc123").await.unwrap();
        assert_eq!(release.id, 0);

        let outcome = gh.publish("1.0.0", "abc123").await.unwrap();
        assert!(matches!(outcome, TargetOutcome::Published { .. }));
        assert!(api.created.lock().is_empty());
        assert!(api.uploaded.lock().is_empty());
    }

    #[tokio::test]
    async fn empty_subset_is_skipped() {
        let api = Arc::new(MockGithub::default());
        let config = TargetConfig {
            include_names: Some(r"\.dmg$".into()),
            ..TargetConfig::named("github")
        };
        let (_p, gh) = target(&["a.zip"], config, Arc::clone(&api), RunContext::live());

        let outcome = gh.publish("1.0.0", "abc123").await.unwrap();
        assert!(matches!(outcome, TargetOutcome::Skipped { .. }));
        assert_eq!(*api.lookups.lock(), 0);
    }

    #[tokio::test]
    async fn release_params_use_prefix_changelog_and_prerelease() {
        let tmp = tempfile::TempDir::new().unwrap();
        let changelog = Utf8PathBuf::try_from(tmp.path().join("CHANGELOG.md")).unwrap();
        std::fs::write(&changelog, "## v2.0.0-rc.1\n\nRC notes.\n\n## v1.0.0\n\nOld.\n").unwrap();

        let api = Arc::new(MockGithub::default());
        let (_p, mut ctx) = context(
            MockProvider::with_revision("abc123", &["a.zip"]),
            TargetConfig::named("github")
                .with_setting("tag_prefix", "v")
                .with_setting("draft", true),
        );
        ctx.changelog = Some(changelog);
        let gh = GithubTarget::with_client(ctx, Arc::clone(&api) as Arc<dyn GithubApi>).unwrap();

        gh.publish("2.0.0-rc.1", "abc123").await.unwrap();
        let created = api.created.lock();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].tag_name, "v2.0.0-rc.1");
        assert_eq!(created[0].target_commitish, "abc123");
        assert_eq!(created[0].body, "RC notes.");
        assert!(created[0].prerelease);
        assert!(created[0].draft);
    }

    #[tokio::test]
    async fn upload_conflict_is_reported() {
        let api = Arc::new(MockGithub {
            conflict_on_upload: true,
            ..MockGithub::default()
        });
        let (_p, gh) = target(&["a.zip"], TargetConfig::named("github"), api, RunContext::live());

        let err = gh.publish("1.0.0", "abc123").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[test]
    fn missing_token_fails_construction() {
        let (_p, mut ctx) = context(MockProvider::default(), TargetConfig::named("github"));
        ctx.env = Environment::from_pairs([("GITHUB_TOKEN", "")]);
        let err = GithubTarget::new(ctx).unwrap_err();
        assert!(matches!(
            err,
            TargetError::MissingCredential { ref variable, .. } if variable == TOKEN_VAR
        ));
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn prerelease_detection() {
        assert!(is_prerelease("1.0.0-beta.1"));
        assert!(is_prerelease("v1.0.0-rc.2"));
        assert!(!is_prerelease("1.0.0"));
        assert!(!is_prerelease("not-a-version"));
    }

    #[test]
    fn query_encoding() {
        assert_eq!(encode_query_value("pkg-1.0.0.tar.gz"), "pkg-1.0.0.tar.gz");
        assert_eq!(encode_query_value("a b+c"), "a%20b%2Bc");
    }

    #[test]
    fn parses_api_release() {
        let release = parse_release(
            r#"{"id": 42, "tag_name": "v1.0.0", "html_url": "https://example.test/r", "draft": false}"#,
        )
        .unwrap();
        assert_eq!(release.id, 42);
        assert_eq!(release.tag_name, "v1.0.0");
        assert!(release.target_commitish.is_none());
    }

    #[test]
    fn gh_cli_debug_hides_token() {
        let cli = GhCli::new(PathBuf::from("/usr/bin/gh"), "ghp_s3cr3t".into());
        let shown = format!("{cli:?}");
        assert!(shown.contains("/usr/bin/gh"));
        assert!(!shown.contains("ghp_s3cr3t"));
    }
}
