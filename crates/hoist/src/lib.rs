//! Library interface for the `hoist` CLI.
//!
//! Exposes the argument parser and command implementations so they can be
//! tested and documented. The entry point is in `main.rs`.
//!
//! - [`Cli`] - The root argument parser (clap derive)
//! - [`Commands`] - Available subcommands
//! - [`commands`] - Command implementations

pub mod commands;

use clap::{CommandFactory, Parser, Subcommand};
use std::path::PathBuf;

/// Color output preference.
#[derive(Debug, Clone, Copy, Default, clap::ValueEnum)]
pub enum ColorChoice {
    /// Detect terminal capabilities automatically.
    #[default]
    Auto,
    /// Always emit colors.
    Always,
    /// Never emit colors.
    Never,
}

impl ColorChoice {
    /// Configure global color output. Call once at startup.
    pub fn apply(self) {
        match self {
            Self::Auto => {}
            Self::Always => owo_colors::set_override(true),
            Self::Never => owo_colors::set_override(false),
        }
    }
}

const ENV_HELP: &str = "\
ENVIRONMENT VARIABLES:
    RUST_LOG            Log filter (e.g., debug, hoist_core=trace)
    HOIST_LOG_PATH      Explicit log file path
    HOIST_LOG_DIR       Log directory
    HOIST_DRY_RUN       Dry run when set to 1/true/yes
    GITHUB_TOKEN        Token for the github target
    NPM_TOKEN           Token for the npm target
    TWINE_USERNAME      Username for the pypi target (default __token__)
    TWINE_PASSWORD      Password or API token for the pypi target
";

/// Command-line interface definition for hoist.
#[derive(Parser)]
#[command(name = "hoist")]
#[command(about = "Cut release branches and publish CI artifacts to every registry", long_about = None)]
#[command(version)]
#[command(after_long_help = ENV_HELP)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file (merged over discovered config)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Run as if started in DIR
    #[arg(short = 'C', long, global = true)]
    pub chdir: Option<PathBuf>,

    /// Preview every mutation without performing it
    #[arg(short = 'n', long, global = true)]
    pub dry_run: bool,

    /// Only print errors (suppresses warnings/info)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// More detail (repeatable; e.g. -vv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Colorize output
    #[arg(long, global = true, value_enum, default_value_t)]
    pub color: ColorChoice,

    /// Output as JSON (for scripting)
    #[arg(long, global = true)]
    pub json: bool,
}

/// Available subcommands for the CLI.
#[derive(Subcommand)]
pub enum Commands {
    /// Prepare a release branch, bump the version, and push
    Release(commands::release::ReleaseArgs),

    /// Publish a revision's artifacts to the configured targets
    Publish(commands::publish::PublishArgs),

    /// List the artifacts CI built for a revision
    Artifacts(commands::artifacts::ArtifactsArgs),

    /// Print the changelog section for a version
    Changeset(commands::changeset::ChangesetArgs),
}

/// Returns the clap command for documentation generation
pub fn command() -> clap::Command {
    Cli::command()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_valid() {
        command().debug_assert();
    }

    #[test]
    fn dry_run_is_global() {
        let cli = Cli::try_parse_from(["hoist", "release", "1.2.0", "--dry-run"]).unwrap();
        assert!(cli.dry_run);
        assert!(matches!(cli.command, Commands::Release(ref args) if args.version == "1.2.0"));
    }

    #[test]
    fn publish_accepts_repeated_targets() {
        let cli = Cli::try_parse_from([
            "hoist", "publish", "1.2.0", "--revision", "abc123", "-t", "npm", "-t", "pypi",
        ])
        .unwrap();
        let Commands::Publish(args) = cli.command else {
            panic!("expected publish");
        };
        assert_eq!(args.targets, vec!["npm", "pypi"]);
        assert_eq!(args.revision.as_deref(), Some("abc123"));
    }
}
