//! npm registry target.
//!
//! Publishes every `.tgz` tarball of a revision with `npm publish`. The
//! token is exported as `NPM_TOKEN` and `NODE_AUTH_TOKEN`, the names the
//! usual CI `.npmrc` templates reference.
//!
//! Settings: `access` (`"public"` or `"restricted"`), `registry` (URL).

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use camino::Utf8Path;

use super::{
    ClientError, PackageRegistry, PackageTarget, Target, TargetBase, TargetContext, TargetName,
    TargetResult, credential, locate_tool, run_tool,
};

/// Environment variable holding the publish token.
pub const TOKEN_VAR: &str = "NPM_TOKEN";

/// Artifacts considered when no `include_names` is configured.
pub const DEFAULT_INCLUDE: &str = r"\.tgz$";

const CONFLICT_MARKERS: &[&str] = &[
    "EPUBLISHCONFLICT",
    "cannot publish over",
    "previously published version",
];

/// Registry constructor for the `npm` target.
pub fn build(ctx: TargetContext) -> TargetResult<Box<dyn Target>> {
    let token = credential(TargetName::Npm, &ctx.env, TOKEN_VAR)?;
    let program = locate_tool(TargetName::Npm, "npm")?;
    let base = TargetBase::new(TargetName::Npm, &ctx)?;
    let cli = NpmCli {
        program,
        token,
        access: access_setting(&base)?,
        registry: base.str_setting("registry")?,
    };
    Ok(Box::new(PackageTarget::new(base, Arc::new(cli), DEFAULT_INCLUDE)?))
}

/// Build an npm target over an explicit registry client.
pub fn with_registry(
    ctx: &TargetContext,
    registry: Arc<dyn PackageRegistry>,
) -> TargetResult<PackageTarget> {
    let base = TargetBase::new(TargetName::Npm, ctx)?;
    access_setting(&base)?;
    PackageTarget::new(base, registry, DEFAULT_INCLUDE)
}

fn access_setting(base: &TargetBase) -> TargetResult<Option<String>> {
    match base.str_setting("access")? {
        Some(access) if access != "public" && access != "restricted" => Err(base.invalid(format!(
            "`access` must be \"public\" or \"restricted\", got {access:?}"
        ))),
        other => Ok(other),
    }
}

/// [`PackageRegistry`] implemented with the `npm` CLI.
#[derive(Clone)]
pub struct NpmCli {
    program: PathBuf,
    token: String,
    access: Option<String>,
    registry: Option<String>,
}

impl std::fmt::Debug for NpmCli {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NpmCli")
            .field("program", &self.program)
            .field("access", &self.access)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl PackageRegistry for NpmCli {
    async fn upload(&self, path: &Utf8Path) -> Result<(), ClientError> {
        let mut args = vec!["publish", path.as_str()];
        if let Some(access) = &self.access {
            args.extend(["--access", access.as_str()]);
        }
        if let Some(registry) = &self.registry {
            args.extend(["--registry", registry.as_str()]);
        }
        let token = self.token.as_str();
        run_tool(
            &self.program,
            &args,
            &[("NPM_TOKEN", token), ("NODE_AUTH_TOKEN", token)],
            None,
            CONFLICT_MARKERS,
        )
        .await
        .map(drop)
    }
}
