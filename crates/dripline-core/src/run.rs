//! Run requests, per-candidate decisions, and the run result returned to callers.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use crate::kind::{EmailKind, KindSelection};

/// Why a candidate was not sent an email.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    NotYetDue,
    WindowPassed,
    AlreadySent,
    AlreadyUpgraded,
    OnboardingIncomplete,
    RateLimited,
    Unsubscribed,
    MissingEmail,
    ProfileComplete,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::NotYetDue => "not_yet_due",
            SkipReason::WindowPassed => "window_passed",
            SkipReason::AlreadySent => "already_sent",
            SkipReason::AlreadyUpgraded => "already_upgraded",
            SkipReason::OnboardingIncomplete => "onboarding_incomplete",
            SkipReason::RateLimited => "rate_limited",
            SkipReason::Unsubscribed => "unsubscribed",
            SkipReason::MissingEmail => "missing_email",
            SkipReason::ProfileComplete => "profile_complete",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of evaluating one (user, kind) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Eligible,
    Skip(SkipReason),
}

/// One scheduler invocation. Immutable once the run starts.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub kinds: KindSelection,
    pub dry_run: bool,
    pub request_id: String,
}

impl RunRequest {
    pub fn new(kinds: KindSelection, dry_run: bool) -> Self {
        Self {
            kinds,
            dry_run,
            request_id: uuid::Uuid::new_v4().to_string(),
        }
    }
}

/// Counters for a single kind, or for the whole run.
///
/// `processed == sent + would_send + skipped`. `would_send` is only non-zero
/// in dry runs and `sent` only in live runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KindCounts {
    pub processed: u64,
    pub sent: u64,
    pub would_send: u64,
    pub skipped: u64,
}

impl KindCounts {
    pub fn is_balanced(&self) -> bool {
        self.processed == self.sent + self.would_send + self.skipped
    }
}

/// A per-user failure that did not abort the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunError {
    pub user_id: String,
    pub kind: EmailKind,
    pub error: String,
}

/// Summary of a completed run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResult {
    pub ok: bool,
    pub request_id: String,
    pub email_type: String,
    pub kinds: Vec<EmailKind>,
    pub dry_run: bool,
    pub processed: u64,
    pub sent: u64,
    pub would_send: u64,
    pub skipped: u64,
    pub errors: Vec<RunError>,
    pub breakdown: BTreeMap<EmailKind, KindCounts>,
}

impl RunResult {
    /// Totals recomputed from the breakdown.
    pub fn totals(&self) -> KindCounts {
        self.breakdown.values().fold(KindCounts::default(), |acc, c| KindCounts {
            processed: acc.processed + c.processed,
            sent: acc.sent + c.sent,
            would_send: acc.would_send + c.would_send,
            skipped: acc.skipped + c.skipped,
        })
    }
}
