//! Pre-release hook execution.
//!
//! The pre-release command bumps version strings in the working tree before
//! the release commit. It runs through `sh -c` in the project root with the
//! old and new versions appended as arguments and exported as
//! `HOIST_OLD_VERSION` / `HOIST_NEW_VERSION`.
//!
//! # Resolution
//!
//! - `pre_release_command = ""` disables the hook.
//! - `pre_release_command = "..."` runs that command.
//! - unset: runs `scripts/bump-version.sh` if it exists, otherwise nothing.

use std::time::{Duration, Instant};

use camino::Utf8Path;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

use crate::context::RunContext;

/// Script run when no pre-release command is configured.
pub const DEFAULT_PRE_RELEASE_SCRIPT: &str = "scripts/bump-version.sh";

/// Environment variable carrying the previous version.
pub const ENV_OLD_VERSION: &str = "HOIST_OLD_VERSION";
/// Environment variable carrying the version being released.
pub const ENV_NEW_VERSION: &str = "HOIST_NEW_VERSION";

/// Errors from hook execution.
#[derive(Error, Debug)]
pub enum HookError {
    /// The hook exited with a non-zero status.
    #[error(
        "pre-release command failed with {}: {command}{}",
        exit_label(.exit_code),
        stderr_block(.stderr)
    )]
    CommandFailed {
        /// The command that failed.
        command: String,
        /// The exit code, if available.
        exit_code: Option<i32>,
        /// Captured stderr.
        stderr: String,
    },

    /// Failed to spawn the hook.
    #[error("failed to execute hook: {0}")]
    Exec(#[from] std::io::Error),
}

fn exit_label(code: &Option<i32>) -> String {
    code.map_or_else(|| "a signal".to_string(), |c| format!("exit code {c}"))
}

fn stderr_block(stderr: &str) -> String {
    if stderr.is_empty() {
        String::new()
    } else {
        format!("\n{stderr}")
    }
}

/// Result alias for hook operations.
pub type HookResult<T> = Result<T, HookError>;

/// Versions handed to the hook.
#[derive(Debug, Clone)]
pub struct HookContext {
    /// The previous version (e.g. `1.1.0`).
    pub old_version: String,
    /// The version being released (e.g. `1.2.0`).
    pub new_version: String,
}

/// Result of a hook run.
#[derive(Debug, Clone)]
pub struct HookOutput {
    /// The full command line that ran.
    pub command: String,
    /// Captured stdout.
    pub stdout: String,
    /// Captured stderr.
    pub stderr: String,
    /// How long the command took.
    pub duration: Duration,
}

/// Decide which command to run, if any.
pub fn resolve_pre_release_command(configured: Option<&str>, project_root: &Utf8Path) -> Option<String> {
    match configured.map(str::trim) {
        Some("") => {
            debug!("pre-release command disabled");
            None
        }
        Some(command) => Some(command.to_string()),
        None if project_root.join(DEFAULT_PRE_RELEASE_SCRIPT).is_file() => {
            Some(format!("bash {DEFAULT_PRE_RELEASE_SCRIPT}"))
        }
        None => {
            warn!(
                script = DEFAULT_PRE_RELEASE_SCRIPT,
                "no pre-release command configured and default script not found"
            );
            None
        }
    }
}

/// Run the pre-release command.
///
/// Returns `None` under dry-run.
#[instrument(skip(context, project_root, run), fields(old = %context.old_version, new = %context.new_version))]
pub async fn run_pre_release(
    command: &str,
    context: &HookContext,
    project_root: &Utf8Path,
    run: RunContext,
) -> HookResult<Option<HookOutput>> {
    let full = format!(
        "{command} {} {}",
        shell_quote(&context.old_version),
        shell_quote(&context.new_version)
    );

    if !run.should_perform() {
        run.skip(&format!("run pre-release command: {full}"));
        return Ok(None);
    }

    info!(command = %full, "running pre-release command");
    let start = Instant::now();
    let output = Command::new("sh")
        .args(["-c", &full])
        .env(ENV_OLD_VERSION, &context.old_version)
        .env(ENV_NEW_VERSION, &context.new_version)
        .current_dir(project_root.as_std_path())
        .output()
        .await?;
    let duration = start.elapsed();

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    debug!(
        duration_ms = duration.as_millis(),
        success = output.status.success(),
        "pre-release command finished"
    );

    if !output.status.success() {
        return Err(HookError::CommandFailed {
            command: full,
            exit_code: output.status.code(),
            stderr: stderr.trim().to_string(),
        });
    }

    Ok(Some(HookOutput {
        command: full,
        stdout,
        stderr,
        duration,
    }))
}

/// Single-quote `value` for `sh`.
fn shell_quote(value: &str) -> String {
    let safe = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | '+' | '/'));
    if safe {
        value.to_string()
    } else {
        format!("'{}'", value.replace('\'', r"'\''"))
    }
}
