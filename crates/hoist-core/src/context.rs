//! Run context and the dry-run execution gate.
//!
//! Every externally-visible mutation (branch creation, commit, push, release
//! creation, asset upload, hook execution, the pre-publish sleep) checks
//! [`RunContext::should_perform`] immediately before acting. When it returns
//! `false` the caller logs what it would have done and hands back a
//! placeholder value, so the rest of the pipeline runs unchanged.
//!
//! The context is a plain `Copy` value threaded through every operation. It is
//! resolved once at startup and never mutated afterwards.

use std::collections::HashMap;

use serde::Serialize;
use tracing::info;

/// Environment variable that enables dry-run mode when set to a truthy value.
pub const ENV_DRY_RUN: &str = "HOIST_DRY_RUN";

/// Per-run execution settings shared by every component.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunContext {
    dry_run: bool,
}

impl RunContext {
    /// A context that performs every mutation.
    pub const fn live() -> Self {
        Self { dry_run: false }
    }

    /// A context that only logs mutations.
    pub const fn dry_run() -> Self {
        Self { dry_run: true }
    }

    /// Resolve the dry-run flag once.
    ///
    /// Precedence: explicit CLI flag, then `HOIST_DRY_RUN`, then config.
    pub fn resolve(cli_flag: bool, env: &Environment, config_flag: bool) -> Self {
        let from_env = env.get(ENV_DRY_RUN).is_some_and(|v| is_truthy(&v));
        Self {
            dry_run: cli_flag || from_env || config_flag,
        }
    }

    /// Whether state-changing operations should actually run.
    pub const fn should_perform(&self) -> bool {
        !self.dry_run
    }

    /// Whether this run only simulates mutations.
    pub const fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Log a skipped mutation in the shared `[dry-run]` format.
    pub fn skip(&self, action: &str) {
        info!(action, "[dry-run] skipping");
    }
}

/// The source repository whose builds are being released.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct RepoRef {
    /// Repository owner (user or organization).
    pub owner: String,
    /// Repository name.
    pub repo: String,
}

impl RepoRef {
    /// Build a reference from owner and name.
    pub fn new(owner: impl Into<String>, repo: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            repo: repo.into(),
        }
    }
}

impl std::fmt::Display for RepoRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.owner, self.repo)
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Snapshot of the process environment.
///
/// Targets read credentials from this snapshot at construction time. Tests
/// build one from explicit pairs instead of mutating the real environment.
#[derive(Debug, Clone, Default)]
pub struct Environment {
    vars: HashMap<String, String>,
}

impl Environment {
    /// Capture the current process environment.
    pub fn from_process() -> Self {
        Self {
            vars: std::env::vars().collect(),
        }
    }

    /// Build an environment from explicit key/value pairs.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Look up a variable. Empty values count as unset.
    pub fn get(&self, key: &str) -> Option<String> {
        self.vars.get(key).filter(|v| !v.is_empty()).cloned()
    }

    /// Look up a variable, returning the name of the missing key on failure.
    pub fn require(&self, key: &str) -> Result<String, String> {
        self.get(key).ok_or_else(|| key.to_string())
    }
}
