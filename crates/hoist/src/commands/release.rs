//! Release command: thin CLI layer over `hoist_core::release`.

use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use camino::Utf8Path;
use clap::Args;
use inquire::Confirm;
use owo_colors::OwoColorize;
use tracing::{debug, instrument};

use hoist_core::git::GitCli;
use hoist_core::release::{HandoffResult, ReleaseEvent, ReleaseOptions, ReleaseOutcome};
use hoist_core::{Config, Environment, ReleaseMachine, RunContext};

/// Arguments for the `release` subcommand.
#[derive(Args, Debug, Default)]
pub struct ReleaseArgs {
    /// Version to release (e.g., "1.2.0")
    #[arg(value_name = "VERSION")]
    pub version: String,

    /// Previous version handed to the pre-release command (default: latest tag)
    #[arg(long, value_name = "VERSION")]
    pub old_version: Option<String>,

    /// Skip branch, clean-tree, and upstream checks
    #[arg(long)]
    pub no_git_checks: bool,

    /// Don't push the release branch (prints the push command instead)
    #[arg(long)]
    pub no_push: bool,

    /// Publish to the configured targets once the branch is pushed
    #[arg(long)]
    pub publish: bool,

    /// Seconds to wait between push and publish
    #[arg(long, value_name = "SECS", requires = "publish")]
    pub publish_delay: Option<u64>,

    /// Skip confirmation prompt
    #[arg(long, short = 'y')]
    pub yes: bool,
}

impl ReleaseArgs {
    fn apply(&self, options: &mut ReleaseOptions) {
        options.old_version.clone_from(&self.old_version);
        options.no_git_checks |= self.no_git_checks;
        options.push &= !self.no_push;
        options.publish = self.publish;
        if let Some(secs) = self.publish_delay {
            options.publish_delay = Duration::from_secs(secs);
        }
    }
}

/// Execute the release command.
#[instrument(name = "cmd_release", skip_all, fields(version = %args.version))]
pub async fn cmd_release(
    args: ReleaseArgs,
    global_json: bool,
    run: RunContext,
    config: &Config,
    root: &Utf8Path,
) -> anyhow::Result<ExitCode> {
    debug!(json_output = global_json, dry_run = run.is_dry_run(), "executing release command");

    let mut options = config.release_options(&args.version, root);
    args.apply(&mut options);

    let publisher = if options.publish {
        Some(super::publisher(config, root, run, Environment::from_process())?)
    } else {
        None
    };

    if !global_json {
        if run.is_dry_run() {
            println!("\n{}", "DRY RUN: no changes will be made".yellow().bold());
        }
        println!(
            "\n{}: {} on {}",
            "Release".bold(),
            options.version.green().bold(),
            options.branch().cyan(),
        );
        print_plan(&options);
    }

    if !run.is_dry_run() && !global_json && config.confirm() && !args.yes {
        let confirmed = Confirm::new("Proceed with release?")
            .with_default(true)
            .prompt()
            .context("confirmation prompt failed")?;
        if !confirmed {
            println!("{}", "Release cancelled.".yellow());
            return Ok(ExitCode::SUCCESS);
        }
        println!();
    }

    let vcs = GitCli::new(root);
    let mut machine = ReleaseMachine::new(&vcs, options, run);
    if let Some(publisher) = &publisher {
        machine = machine.with_handoff(publisher);
    }

    let outcome = machine
        .execute(|event| {
            if !global_json {
                handle_event(event, run.is_dry_run());
            }
        })
        .await
        .context("release failed")?;

    if global_json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        print_summary(&outcome);
    }

    Ok(ExitCode::from(u8::try_from(outcome.exit_code()).unwrap_or(1)))
}

fn print_plan(options: &ReleaseOptions) {
    let steps: &[(&str, bool)] = &[
        ("git checks", !options.no_git_checks),
        ("push", options.push),
        ("publish", options.publish),
    ];
    let skipped: Vec<&str> = steps.iter().filter(|(_, on)| !*on).map(|(n, _)| *n).collect();

    println!(
        "  {}: {}",
        "Hook".dimmed(),
        options
            .pre_release_command
            .as_deref()
            .filter(|c| !c.trim().is_empty())
            .unwrap_or("scripts/bump-version.sh if present"),
    );
    if !skipped.is_empty() {
        println!("  {}: {}", "Skipping".dimmed(), skipped.join(", "));
    }
    println!();
}

fn handle_event(event: &ReleaseEvent, is_dry: bool) {
    match event {
        ReleaseEvent::Entered(state) => {
            let prefix = if is_dry { "○" } else { "✓" };
            println!("  {} {}", prefix.green(), state.to_string().bold());
        }
        ReleaseEvent::Skipped { state, reason } => {
            println!(
                "  {} {} {}",
                "–".yellow(),
                state.to_string().bold(),
                format!("skipped: {reason}").dimmed(),
            );
        }
    }
}

fn print_summary(outcome: &ReleaseOutcome) {
    println!();
    match &outcome.handoff {
        Some(HandoffResult::Failed { error, recovery, .. }) => {
            println!("{} {}", "✗".red().bold(), error);
            println!("  {}: {}", "Retry with".dimmed(), recovery.cyan());
        }
        Some(HandoffResult::Published { report }) => {
            println!(
                "{} Released {} and published to {} target(s)",
                "✓".green().bold(),
                outcome.version.green().bold(),
                report.targets.len(),
            );
        }
        None if outcome.dry_run => {
            println!(
                "{} Dry run complete: {} states previewed",
                "✓".green(),
                outcome.transitions.len(),
            );
        }
        None => {
            println!(
                "{} Prepared {} on {}",
                "✓".green().bold(),
                outcome.version.green().bold(),
                outcome.branch.cyan(),
            );
        }
    }
}
