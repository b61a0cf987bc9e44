//! Changeset command: print the changelog section for a version.

use std::path::PathBuf;

use anyhow::{Context, bail};
use camino::{Utf8Path, Utf8PathBuf};
use clap::Args;
use owo_colors::OwoColorize;
use tracing::instrument;

use hoist_core::Config;
use hoist_core::changes::read_changeset;

/// Arguments for the `changeset` subcommand.
#[derive(Args, Debug, Default)]
pub struct ChangesetArgs {
    /// Version or tag to look up (e.g., "1.2.0" or "v1.2.0")
    #[arg(value_name = "VERSION")]
    pub version: String,

    /// Changelog file (default: [changelog] path, or CHANGELOG.md)
    #[arg(long, short = 'f', value_name = "FILE")]
    pub file: Option<PathBuf>,

    /// Tag prefix to strip before matching (e.g., "release-")
    #[arg(long, value_name = "PREFIX")]
    pub tag_prefix: Option<String>,
}

/// Execute the changeset command.
#[instrument(name = "cmd_changeset", skip_all, fields(version = %args.version))]
pub async fn cmd_changeset(
    args: ChangesetArgs,
    global_json: bool,
    config: &Config,
    root: &Utf8Path,
) -> anyhow::Result<()> {
    let path = match args.file {
        Some(file) => Utf8PathBuf::try_from(file).context("changelog path is not valid UTF-8")?,
        None => root.join(config.changelog_path()),
    };

    let Some(changeset) = read_changeset(&path, &args.version, args.tag_prefix.as_deref())
        .await
        .with_context(|| format!("failed to read {path}"))?
    else {
        bail!("no changelog entry for {} in {path}", args.version);
    };

    if global_json {
        println!("{}", serde_json::to_string_pretty(&changeset)?);
    } else {
        println!("{}", changeset.name.bold());
        println!();
        println!("{}", changeset.body);
    }
    Ok(())
}
