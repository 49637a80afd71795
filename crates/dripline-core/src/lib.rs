//! # Dripline Core
//!
//! Shared building blocks for the Dripline scheduler and gateway:
//! - `config`: TOML configuration with per-field defaults and env overrides
//! - `error`: the crate-wide error type
//! - `kind`: email kinds and their eligibility rule data
//! - `user`: the user record as read from the external store
//! - `run`: run requests, decisions and run results

pub mod config;
pub mod error;
pub mod kind;
pub mod run;
pub mod user;

pub use config::DriplineConfig;
pub use error::{DriplineError, Result};
pub use kind::{AgeWindow, Category, EmailKind, KindRules, KindSelection, ResendPolicy, WindowAnchor};
pub use run::{Decision, KindCounts, RunError, RunRequest, RunResult, SkipReason};
pub use user::{EmailPreferences, Profile, Tier, User};
