//! # Dripline Scheduler
//!
//! Decides which user gets which email, when, and at most how often, then
//! sends it exactly once.
//!
//! ## Design Principles
//! - Pure, deterministic eligibility: dry runs see the same decisions as live runs
//! - One mutation point: the guard's compare-and-set on a single flag
//! - Per-user failure isolation; only pre-run failures abort a run
//! - Bounded send concurrency
//!
//! ## Architecture
//! ```text
//! Trigger (HTTP cron call, manual call, CronLoop)
//!   └── Dispatcher::run_once(RunRequest)
//!         ├── Evaluator      window, onboarding, tier, flag, opt-out rules
//!         ├── SendGuard      rate limit check + claim-then-send CAS
//!         ├── EmailSender    Postmark | Log
//!         ├── UserStore      Sqlite | Memory
//!         └── RunReportBuilder → RunResult
//! ```

pub mod cron;
pub mod delivery;
pub mod dispatch;
pub mod eligibility;
pub mod engine;
pub mod guard;
pub mod persistence;
pub mod report;
pub mod store;
pub mod template;
pub mod window;

pub use cron::CronSchedule;
pub use delivery::{EmailSender, LogSender, OutboundEmail, PostmarkSender, SendReceipt};
pub use dispatch::{Dispatcher, TriggerOutcome};
pub use eligibility::Evaluator;
pub use engine::{CronLoop, spawn_cron_loop};
pub use guard::{Claim, ClaimOutcome, SendGuard};
pub use persistence::SqliteUserStore;
pub use report::{Outcome, RunReportBuilder};
pub use store::{DeliveryLog, DeliveryStatus, FlagWrite, MemoryUserStore, UserStore};
pub use window::{Clock, FixedClock, SystemClock, Window, WindowPosition};
