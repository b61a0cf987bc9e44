//! hoist CLI
#![deny(unsafe_code)]

use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use hoist::{Cli, Commands, commands};
use hoist_core::{ConfigLoader, Environment, RunContext};
use tracing::debug;

mod observability;

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    cli.color.apply();

    if let Some(ref dir) = cli.chdir {
        std::env::set_current_dir(dir)
            .with_context(|| format!("failed to change directory to {}", dir.display()))?;
    }

    let cwd = std::env::current_dir().context("failed to determine current directory")?;
    let cwd = camino::Utf8PathBuf::try_from(cwd).map_err(|e| {
        anyhow::anyhow!(
            "current directory is not valid UTF-8: {}",
            e.into_path_buf().display()
        )
    })?;
    let mut loader = ConfigLoader::new().with_project_search(&cwd);
    if let Some(ref config_path) = cli.config {
        let config_path = camino::Utf8PathBuf::try_from(config_path.clone()).map_err(|e| {
            anyhow::anyhow!(
                "config path is not valid UTF-8: {}",
                e.into_path_buf().display()
            )
        })?;
        loader = loader.with_file(&config_path);
    }
    let config = loader.load().context("failed to load configuration")?;

    let destination =
        observability::resolve_destination(config.log_dir.as_ref().map(|dir| dir.as_std_path()));
    let env_filter = observability::env_filter(cli.quiet, cli.verbose, config.log_level.as_str());
    let _guard = observability::init(&destination, env_filter);

    let root = commands::project_root(&cwd).await;
    let run = RunContext::resolve(cli.dry_run, &Environment::from_process(), config.release.dry_run);

    debug!(
        verbose = cli.verbose,
        quiet = cli.quiet,
        json = cli.json,
        dry_run = run.is_dry_run(),
        color = ?cli.color,
        chdir = ?cli.chdir,
        %root,
        "CLI initialized"
    );

    let result = match cli.command {
        Commands::Release(args) => {
            commands::release::cmd_release(args, cli.json, run, &config, &root).await
        }
        Commands::Publish(args) => {
            commands::publish::cmd_publish(args, cli.json, run, &config, &root).await
        }
        Commands::Artifacts(args) => commands::artifacts::cmd_artifacts(args, cli.json, &config, &root)
            .await
            .map(|()| ExitCode::SUCCESS),
        Commands::Changeset(args) => {
            commands::changeset::cmd_changeset(args, cli.json, &config, &root)
                .await
                .map(|()| ExitCode::SUCCESS)
        }
    };
    if let Err(ref err) = result {
        tracing::error!(error = %err, "fatal error");
    }
    result
}
