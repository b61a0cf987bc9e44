//! Core library for hoist.
//!
//! hoist cuts a release branch, hands the version bump to a project script,
//! pushes, and then publishes the artifacts CI built for that commit to every
//! configured destination.
//!
//! # Modules
//!
//! - [`artifacts`] - Artifact listing, filtering, and memoized downloads
//! - [`changes`] - Changelog section extraction
//! - [`config`] - Configuration loading and management
//! - [`context`] - Dry-run gate and environment snapshot
//! - [`error`] - Shared error types and classification
//! - [`git`] - Git operations for the release branch
//! - [`hooks`] - Pre-release command execution
//! - [`publish`] - Concurrent fan-out across targets
//! - [`release`] - Release branch state machine
//! - [`targets`] - Publish destinations and their registry
//!
//! # Quick Start
//!
//! ```no_run
//! use hoist_core::ConfigLoader;
//!
//! let config = ConfigLoader::new()
//!     .with_user_config(true)
//!     .load()
//!     .expect("Failed to load configuration");
//!
//! for target in &config.targets {
//!     println!("publishing to {}", target.name);
//! }
//! ```
#![deny(unsafe_code)]

pub mod artifacts;

pub mod changes;

pub mod config;

pub mod context;

pub mod error;

pub mod git;

pub mod hooks;

mod memo;

pub mod publish;

pub mod release;

pub mod targets;

pub use config::{Config, ConfigLoader, LogLevel};

pub use context::{Environment, RepoRef, RunContext};

pub use error::{ConfigError, ConfigResult, ErrorKind};

pub use publish::{PublishOptions, PublishReport, Publisher};

pub use release::{ReleaseMachine, ReleaseOptions, ReleaseOutcome, ReleaseState};
