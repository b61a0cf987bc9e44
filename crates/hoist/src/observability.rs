//! Logging setup.
//!
//! stdout carries command output (including `--json` reports), so log lines
//! go to a daily-rolled JSON-lines file, or to stderr when no log directory
//! is usable. Every line lists its enclosing spans with their fields, so a
//! release or publish run can be followed by `version`, `revision` and
//! `target_name`.
//!
//! The log file location is the first of:
//!
//! 1. `HOIST_LOG_PATH`, an exact file
//! 2. `HOIST_LOG_DIR`, a directory holding `hoist.jsonl`
//! 3. `log_dir` from configuration
//! 4. the per-user data directory, under `logs/`
//!
//! The working directory is never a candidate: a log file there would show
//! up as an untracked change in the repository being released.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use tracing::Subscriber;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;

const ENV_LOG_PATH: &str = "HOIST_LOG_PATH";
const ENV_LOG_DIR: &str = "HOIST_LOG_DIR";
const LOG_FILE: &str = "hoist.jsonl";

/// Where log lines are written.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LogDestination {
    /// A daily-rolled file in `dir`; the date is appended to `file_name`.
    File {
        /// Directory holding the log files.
        dir: PathBuf,
        /// Base file name.
        file_name: String,
    },
    /// Standard error.
    Stderr,
}

/// Keeps the background log writer alive; drop it last.
pub struct LogGuard {
    _worker: WorkerGuard,
}

/// Pick the log destination from the environment and `config_dir`.
pub fn resolve_destination(config_dir: Option<&Path>) -> LogDestination {
    let user_dir = directories::ProjectDirs::from("", "", env!("CARGO_PKG_NAME"))
        .map(|dirs| dirs.data_local_dir().join("logs"));
    destination_from(
        std::env::var_os(ENV_LOG_PATH).map(PathBuf::from),
        std::env::var_os(ENV_LOG_DIR).map(PathBuf::from),
        config_dir.map(Path::to_path_buf),
        user_dir,
    )
}

fn destination_from(
    path: Option<PathBuf>,
    dir: Option<PathBuf>,
    config_dir: Option<PathBuf>,
    user_dir: Option<PathBuf>,
) -> LogDestination {
    let candidate = match path {
        Some(path) => split_file_path(&path).map(Some),
        None => Ok(dir
            .or(config_dir)
            .or(user_dir)
            .map(|dir| (dir, LOG_FILE.to_string()))),
    };

    match candidate.and_then(|c| c.map(|(dir, name)| ensure_writable(dir, name)).transpose()) {
        Ok(Some(destination)) => destination,
        Ok(None) => LogDestination::Stderr,
        Err(reason) => {
            eprintln!("warning: {reason}; logging to stderr");
            LogDestination::Stderr
        }
    }
}

fn split_file_path(path: &Path) -> Result<(PathBuf, String), String> {
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| format!("{ENV_LOG_PATH} must end in a UTF-8 file name"))?;
    let dir = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    Ok((dir.to_path_buf(), file_name.to_string()))
}

fn ensure_writable(dir: PathBuf, file_name: String) -> Result<LogDestination, String> {
    std::fs::create_dir_all(&dir)
        .map_err(|e| format!("cannot create log directory {}: {e}", dir.display()))?;
    let path = dir.join(&file_name);
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(|e| format!("cannot open log file {}: {e}", path.display()))?;
    Ok(LogDestination::File { dir, file_name })
}

/// Install the global subscriber writing JSON lines to `destination`.
pub fn init(destination: &LogDestination, filter: EnvFilter) -> LogGuard {
    let (writer, worker) = match destination {
        LogDestination::File { dir, file_name } => {
            tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, file_name))
        }
        LogDestination::Stderr => tracing_appender::non_blocking(std::io::stderr()),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(json_layer(writer))
        .init();
    tracing::debug!(?destination, "logging initialized");

    LogGuard { _worker: worker }
}

/// One JSON object per event: event fields at the top level, enclosing
/// spans under `spans`, outermost first.
fn json_layer<S, W>(writer: W) -> impl Layer<S>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    tracing_subscriber::fmt::layer()
        .json()
        .flatten_event(true)
        .with_current_span(false)
        .with_span_list(true)
        .with_writer(writer)
}

/// Build an `EnvFilter` based on CLI flags and environment.
///
/// Priority: quiet flag > verbose flag > RUST_LOG env > default_level
pub fn env_filter(quiet: bool, verbose: u8, default_level: &str) -> EnvFilter {
    if quiet {
        return EnvFilter::new("error");
    }

    if verbose > 0 {
        let level = match verbose {
            1 => "debug",
            _ => "trace",
        };
        return EnvFilter::new(level);
    }

    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::sync::{Arc, Mutex};

    use serde_json::Value;
    use tracing::info;

    use super::*;

    #[test]
    fn env_filter_quiet_overrides() {
        let filter = env_filter(true, 0, "info");
        assert_eq!(filter.to_string(), "error");
    }

    #[test]
    fn env_filter_verbose_maps_to_debug_and_trace() {
        assert_eq!(env_filter(false, 1, "info").to_string(), "debug");
        assert_eq!(env_filter(false, 2, "info").to_string(), "trace");
    }

    #[test]
    fn path_override_wins() {
        let tmp = tempfile::TempDir::new().unwrap();
        let file = tmp.path().join("custom.jsonl");
        let destination = destination_from(
            Some(file),
            Some(tmp.path().join("ignored")),
            None,
            None,
        );
        assert_eq!(
            destination,
            LogDestination::File {
                dir: tmp.path().to_path_buf(),
                file_name: "custom.jsonl".into(),
            }
        );
        assert!(tmp.path().join("custom.jsonl").exists());
    }

    #[test]
    fn dir_override_then_config_then_user_dir() {
        let tmp = tempfile::TempDir::new().unwrap();
        let env_dir = tmp.path().join("env");
        let config_dir = tmp.path().join("config");
        let user_dir = tmp.path().join("user");

        let pick = |dir: Option<&PathBuf>, config: Option<&PathBuf>| {
            destination_from(None, dir.cloned(), config.cloned(), Some(user_dir.clone()))
        };
        let file = |dir: &PathBuf| LogDestination::File {
            dir: dir.clone(),
            file_name: LOG_FILE.into(),
        };

        assert_eq!(pick(Some(&env_dir), Some(&config_dir)), file(&env_dir));
        assert_eq!(pick(None, Some(&config_dir)), file(&config_dir));
        assert_eq!(pick(None, None), file(&user_dir));
    }

    #[test]
    fn unusable_directory_falls_back_to_stderr() {
        let tmp = tempfile::TempDir::new().unwrap();
        let blocker = tmp.path().join("not-a-dir");
        std::fs::write(&blocker, "").unwrap();

        assert_eq!(
            destination_from(None, Some(blocker.join("logs")), None, None),
            LogDestination::Stderr
        );
        assert_eq!(destination_from(None, None, None, None), LogDestination::Stderr);
    }

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn lines_carry_span_fields() {
        let captured = Captured::default();
        let make_writer = {
            let captured = captured.clone();
            move || captured.clone()
        };
        let subscriber = tracing_subscriber::registry().with(json_layer(make_writer));

        tracing::subscriber::with_default(subscriber, || {
            let run = tracing::info_span!("run", version = "1.2.0", revision = "abc123");
            let _run = run.enter();
            let target = tracing::info_span!("publish_target", target_name = "npm");
            let _target = target.enter();
            info!(artifact = "widget-1.2.0.tgz", "uploaded");
        });

        let bytes = captured.0.lock().unwrap().clone();
        let text = String::from_utf8(bytes).unwrap();
        let line: Value = serde_json::from_str(text.lines().next().unwrap()).unwrap();

        assert_eq!(line["level"], "INFO");
        assert_eq!(line["message"], "uploaded");
        assert_eq!(line["artifact"], "widget-1.2.0.tgz");
        assert!(line["timestamp"].is_string());
        assert_eq!(line["spans"][0]["version"], "1.2.0");
        assert_eq!(line["spans"][0]["revision"], "abc123");
        assert_eq!(line["spans"][1]["target_name"], "npm");
    }
}
