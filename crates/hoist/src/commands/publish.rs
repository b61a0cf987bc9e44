//! Publish command: fan a revision's artifacts out to the configured targets.

use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use camino::Utf8Path;
use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};
use owo_colors::OwoColorize;
use tracing::{debug, instrument};

use hoist_core::targets::TargetOutcome;
use hoist_core::{Config, Environment, PublishOptions, PublishReport, RunContext};

/// Arguments for the `publish` subcommand.
#[derive(Args, Debug, Default)]
pub struct PublishArgs {
    /// Version being published (e.g., "1.2.0")
    #[arg(value_name = "VERSION")]
    pub version: String,

    /// Commit whose artifacts to publish (default: HEAD)
    #[arg(long, short = 'r', value_name = "SHA")]
    pub revision: Option<String>,

    /// Only publish to this target (repeatable)
    #[arg(long = "target", short = 't', value_name = "NAME")]
    pub targets: Vec<String>,

    /// Publish without checking the revision's CI status
    #[arg(long)]
    pub no_status_check: bool,
}

/// Execute the publish command.
#[instrument(name = "cmd_publish", skip_all, fields(version = %args.version))]
pub async fn cmd_publish(
    args: PublishArgs,
    global_json: bool,
    run: RunContext,
    config: &Config,
    root: &Utf8Path,
) -> anyhow::Result<ExitCode> {
    let revision = super::resolve_revision(args.revision, root).await?;
    debug!(%revision, targets = ?args.targets, "executing publish command");

    let publisher = super::publisher(config, root, run, Environment::from_process())?;
    let options = PublishOptions {
        version: args.version,
        revision,
        targets: args.targets,
        skip_status_check: args.no_status_check,
    };

    if !global_json && run.is_dry_run() {
        println!("\n{}", "DRY RUN: nothing will be uploaded".yellow().bold());
    }

    let spinner = (!global_json).then(|| {
        let spinner = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::with_template("  {spinner:.cyan} {msg}") {
            spinner.set_style(style.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", " "]));
        }
        spinner.set_message(format!("publishing {} @ {}", options.version, short(&options.revision)));
        spinner.enable_steady_tick(Duration::from_millis(80));
        spinner
    });

    let result = publisher.run(&options).await;
    if let Some(spinner) = spinner {
        spinner.finish_and_clear();
    }
    let report = result.context("publish failed")?;

    if global_json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    Ok(if report.all_succeeded() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn short(revision: &str) -> &str {
    revision.get(..12).unwrap_or(revision)
}

fn print_report(report: &PublishReport) {
    println!(
        "\n{} {} @ {}",
        "Publish".bold(),
        report.version.green().bold(),
        short(&report.revision).dimmed(),
    );
    for target in &report.targets {
        match (&target.outcome, &target.error) {
            (Some(TargetOutcome::Published { artifacts }), _) => {
                let prefix = if report.dry_run { "○" } else { "✓" };
                println!(
                    "  {} {} {}",
                    prefix.green(),
                    target.target.to_string().bold(),
                    artifacts.join(", ").dimmed(),
                );
            }
            (Some(TargetOutcome::Skipped { reason }), _) => {
                println!(
                    "  {} {} {}",
                    "–".yellow(),
                    target.target.to_string().bold(),
                    format!("skipped: {reason}").dimmed(),
                );
            }
            (None, error) => {
                println!(
                    "  {} {} {}",
                    "✗".red(),
                    target.target.to_string().bold(),
                    error.as_deref().unwrap_or("failed").red(),
                );
            }
        }
    }

    let failed = report.failures().count();
    println!();
    if failed == 0 {
        println!("{} Published to {} target(s)", "✓".green().bold(), report.targets.len());
    } else {
        println!(
            "{} {failed} of {} target(s) failed; re-run `hoist publish {} --revision {} -t <name>` once fixed",
            "✗".red().bold(),
            report.targets.len(),
            report.version,
            report.revision,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shortens_long_revisions_only() {
        assert_eq!(short("0123456789abcdef0123"), "0123456789ab");
        assert_eq!(short("abc123"), "abc123");
    }
}
