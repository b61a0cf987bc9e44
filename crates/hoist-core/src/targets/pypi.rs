//! Python Package Index target.
//!
//! Uploads wheels and source distributions with `twine upload`.
//! `TWINE_PASSWORD` is required; `TWINE_USERNAME` defaults to `__token__`
//! for API-token uploads. Set `repository_url` to publish somewhere other
//! than pypi.org (e.g. TestPyPI).

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use camino::Utf8Path;

use super::{
    ClientError, PackageRegistry, PackageTarget, Target, TargetBase, TargetContext, TargetName,
    TargetResult, credential, locate_tool, run_tool,
};

/// Environment variable holding the upload username.
pub const USERNAME_VAR: &str = "TWINE_USERNAME";
/// Environment variable holding the upload password or API token.
pub const PASSWORD_VAR: &str = "TWINE_PASSWORD";

/// Artifacts considered when no `include_names` is configured.
pub const DEFAULT_INCLUDE: &str = r"\.(whl|gz|zip)$";

const TOKEN_USERNAME: &str = "__token__";

/// Registry constructor for the `pypi` target.
pub fn build(ctx: TargetContext) -> TargetResult<Box<dyn Target>> {
    let password = credential(TargetName::Pypi, &ctx.env, PASSWORD_VAR)?;
    let username = ctx
        .env
        .get(USERNAME_VAR)
        .unwrap_or_else(|| TOKEN_USERNAME.to_string());
    let program = locate_tool(TargetName::Pypi, "twine")?;
    let base = TargetBase::new(TargetName::Pypi, &ctx)?;
    let cli = TwineCli {
        program,
        username,
        password,
        repository_url: base.str_setting("repository_url")?,
    };
    Ok(Box::new(PackageTarget::new(base, Arc::new(cli), DEFAULT_INCLUDE)?))
}

/// Build a PyPI target over an explicit registry client.
pub fn with_registry(
    ctx: &TargetContext,
    registry: Arc<dyn PackageRegistry>,
) -> TargetResult<PackageTarget> {
    let base = TargetBase::new(TargetName::Pypi, ctx)?;
    PackageTarget::new(base, registry, DEFAULT_INCLUDE)
}

/// [`PackageRegistry`] implemented with `twine`.
#[derive(Clone)]
pub struct TwineCli {
    program: PathBuf,
    username: String,
    password: String,
    repository_url: Option<String>,
}

impl std::fmt::Debug for TwineCli {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TwineCli")
            .field("program", &self.program)
            .field("username", &self.username)
            .field("repository_url", &self.repository_url)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl PackageRegistry for TwineCli {
    async fn upload(&self, path: &Utf8Path) -> Result<(), ClientError> {
        let mut args = vec!["upload", "--non-interactive"];
        if let Some(url) = &self.repository_url {
            args.extend(["--repository-url", url.as_str()]);
        }
        args.push(path.as_str());
        run_tool(
            &self.program,
            &args,
            &[
                (USERNAME_VAR, self.username.as_str()),
                (PASSWORD_VAR, self.password.as_str()),
            ],
            None,
            &["File already exists", "409 Conflict"],
        )
        .await
        .map(drop)
    }
}
