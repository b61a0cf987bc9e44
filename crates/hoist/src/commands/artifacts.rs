//! Artifacts command: list what CI built for a revision.

use anyhow::Context;
use camino::Utf8Path;
use clap::Args;
use owo_colors::OwoColorize;
use serde::Serialize;
use tracing::instrument;

use hoist_core::Config;
use hoist_core::artifacts::{Artifact, FilterOptions, RevisionInfo};

/// Arguments for the `artifacts` subcommand.
#[derive(Args, Debug, Default)]
pub struct ArtifactsArgs {
    /// Revision to inspect (default: HEAD)
    #[arg(value_name = "SHA")]
    pub revision: Option<String>,

    /// Only list names matching this regex
    #[arg(long, value_name = "REGEX")]
    pub include: Option<String>,

    /// Hide names matching this regex
    #[arg(long, value_name = "REGEX")]
    pub exclude: Option<String>,
}

#[derive(Serialize)]
struct Listing {
    revision: String,
    #[serde(flatten)]
    info: RevisionInfo,
    artifacts: Vec<Artifact>,
}

/// Execute the artifacts command.
#[instrument(name = "cmd_artifacts", skip_all)]
pub async fn cmd_artifacts(
    args: ArtifactsArgs,
    global_json: bool,
    config: &Config,
    root: &Utf8Path,
) -> anyhow::Result<()> {
    let filter = FilterOptions::from_patterns(args.include.as_deref(), args.exclude.as_deref())
        .context("invalid --include/--exclude pattern")?;
    let revision = super::resolve_revision(args.revision, root).await?;
    let store = super::artifact_store(config, root)?;

    let info = store.revision_info(&revision).await?;
    let artifacts = store.filter_artifacts(&revision, Some(&filter)).await?;

    if global_json {
        let listing = Listing {
            revision,
            info,
            artifacts,
        };
        println!("{}", serde_json::to_string_pretty(&listing)?);
        return Ok(());
    }

    let status = if info.is_built_successfully() {
        "passed".green().to_string()
    } else if info.is_pending() {
        "pending".yellow().to_string()
    } else {
        "failed".red().to_string()
    };
    println!("{} {} ({status})", "Revision".bold(), revision.cyan());
    if artifacts.is_empty() {
        println!("  {}", "no matching artifacts".dimmed());
    }
    for artifact in &artifacts {
        println!(
            "  {} {}",
            artifact.name,
            artifact.mime_type.as_deref().unwrap_or("").dimmed(),
        );
    }
    Ok(())
}
