//! Run report builder: folds per-candidate outcomes into a `RunResult`.

use std::collections::BTreeMap;

use dripline_core::{EmailKind, KindCounts, RunError, RunRequest, RunResult, SkipReason};

/// What happened to one candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Sent,
    /// Eligible in a dry run; nothing was sent or written.
    WouldSend,
    Skipped(SkipReason),
    /// Per-user failure. Counted as skipped and listed in `errors`.
    Failed(String),
}

#[derive(Debug)]
pub struct RunReportBuilder {
    request_id: String,
    email_type: String,
    dry_run: bool,
    breakdown: BTreeMap<EmailKind, KindCounts>,
    errors: Vec<RunError>,
}

impl RunReportBuilder {
    /// Every requested kind gets a breakdown entry, even with no candidates.
    pub fn new(request: &RunRequest) -> Self {
        Self {
            request_id: request.request_id.clone(),
            email_type: request.kinds.label(),
            dry_run: request.dry_run,
            breakdown: request
                .kinds
                .kinds()
                .into_iter()
                .map(|k| (k, KindCounts::default()))
                .collect(),
            errors: Vec::new(),
        }
    }

    pub fn record(&mut self, user_id: &str, kind: EmailKind, outcome: Outcome) {
        let counts = self.breakdown.entry(kind).or_default();
        counts.processed += 1;
        match outcome {
            Outcome::Sent => counts.sent += 1,
            Outcome::WouldSend => counts.would_send += 1,
            Outcome::Skipped(_) => counts.skipped += 1,
            Outcome::Failed(error) => {
                counts.skipped += 1;
                self.errors.push(RunError {
                    user_id: user_id.to_string(),
                    kind,
                    error,
                });
            }
        }
    }

    pub fn finish(self) -> RunResult {
        let kinds = self.breakdown.keys().copied().collect();
        let mut result = RunResult {
            ok: true,
            request_id: self.request_id,
            email_type: self.email_type,
            kinds,
            dry_run: self.dry_run,
            processed: 0,
            sent: 0,
            would_send: 0,
            skipped: 0,
            errors: self.errors,
            breakdown: self.breakdown,
        };
        let totals = result.totals();
        result.processed = totals.processed;
        result.sent = totals.sent;
        result.would_send = totals.would_send;
        result.skipped = totals.skipped;
        result
    }
}
