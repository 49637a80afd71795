//! Dispatch orchestrator: one run over the requested kinds.
//!
//! ```text
//! run_once(request)
//!   ├── Evaluator::new(now)          windows, fails before any fetch
//!   ├── prefetch candidates per kind  any store error aborts, nothing mutated
//!   ├── stream candidates, buffered(max_concurrency)
//!   │     evaluate → guard.check → [dry run: would send]
//!   │                            → guard.claim → sender.send → (fail: release)
//!   └── RunReportBuilder::finish()
//! ```

use std::sync::Arc;

use dripline_core::config::AppConfig;
use dripline_core::{
    Decision, DriplineConfig, DriplineError, EmailKind, KindSelection, Result, RunRequest,
    RunResult, SkipReason, User,
};
use futures::StreamExt;
use serde::Serialize;

use crate::delivery::{EmailSender, OutboundEmail};
use crate::eligibility::Evaluator;
use crate::guard::{ClaimOutcome, SendGuard};
use crate::report::{Outcome, RunReportBuilder};
use crate::store::{DeliveryLog, DeliveryStatus, UserStore};
use crate::template;
use crate::window::{Clock, SystemClock};

/// Result of a manual single-user trigger.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerOutcome {
    #[serde(flatten)]
    pub result: RunResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<SkipReason>,
}

pub struct Dispatcher {
    store: Arc<dyn UserStore>,
    sender: Arc<dyn EmailSender>,
    guard: SendGuard,
    clock: Arc<dyn Clock>,
    app: AppConfig,
    max_concurrency: usize,
}

impl Dispatcher {
    pub fn new(store: Arc<dyn UserStore>, sender: Arc<dyn EmailSender>) -> Self {
        Self {
            guard: SendGuard::new(store.clone()),
            store,
            sender,
            clock: Arc::new(SystemClock),
            app: AppConfig::default(),
            max_concurrency: 4,
        }
    }

    pub fn from_config(
        config: &DriplineConfig,
        store: Arc<dyn UserStore>,
        sender: Arc<dyn EmailSender>,
    ) -> Self {
        Self::new(store, sender)
            .with_app(config.app.clone())
            .with_max_concurrency(config.dispatch.max_concurrency)
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_app(mut self, app: AppConfig) -> Self {
        self.app = app;
        self
    }

    pub fn with_max_concurrency(mut self, n: usize) -> Self {
        self.max_concurrency = n.max(1);
        self
    }

    pub fn store(&self) -> &Arc<dyn UserStore> {
        &self.store
    }

    pub fn sender_name(&self) -> &str {
        self.sender.name()
    }

    /// Execute one run. Per-user failures land in `errors`; only failures
    /// before the first candidate is evaluated return `Err`.
    pub async fn run_once(&self, request: RunRequest) -> Result<RunResult> {
        let evaluator = Evaluator::new(self.clock.now())?;
        let kinds = request.kinds.kinds();
        tracing::info!(
            "📬 Run {} started: type={} dryRun={} via {}",
            request.request_id,
            request.kinds.label(),
            request.dry_run,
            self.sender.name()
        );

        let mut batches: Vec<(EmailKind, Vec<User>)> = Vec::with_capacity(kinds.len());
        for kind in kinds {
            let candidates = self
                .store
                .find_candidates(kind, evaluator.window(kind))
                .await
                .map_err(|e| {
                    tracing::error!("❌ Run {} aborted: {e}", request.request_id);
                    as_store_error(e)
                })?;
            tracing::debug!("🔎 [{}] {} candidates", kind, candidates.len());
            batches.push((kind, candidates));
        }

        let evaluator = &evaluator;
        let dry_run = request.dry_run;
        let jobs: Vec<(EmailKind, User)> = batches
            .into_iter()
            .flat_map(|(kind, users)| users.into_iter().map(move |user| (kind, user)))
            .collect();
        let outcomes: Vec<(EmailKind, String, Outcome)> = futures::stream::iter(jobs)
            .map(|(kind, user)| async move {
                let outcome = self.process(evaluator, &user, kind, dry_run, None).await;
                (kind, user.id, outcome)
            })
            .buffered(self.max_concurrency)
            .collect()
            .await;

        let mut report = RunReportBuilder::new(&request);
        for (kind, user_id, outcome) in outcomes {
            report.record(&user_id, kind, outcome);
        }
        let result = report.finish();

        tracing::info!(
            "✅ Run {} finished: processed={} sent={} wouldSend={} skipped={} errors={}",
            result.request_id,
            result.processed,
            result.sent,
            result.would_send,
            result.skipped,
            result.errors.len()
        );
        Ok(result)
    }

    /// `run_once` on its own task. A claimed flag always reaches its send
    /// or release even when the caller stops waiting.
    pub async fn run_detached(self: Arc<Self>, request: RunRequest) -> Result<RunResult> {
        tokio::spawn(async move { self.run_once(request).await })
            .await
            .map_err(join_error)?
    }

    /// `trigger_user` on its own task; see [`Dispatcher::run_detached`].
    pub async fn trigger_detached(
        self: Arc<Self>,
        kind: EmailKind,
        user_id: String,
        extras: Option<serde_json::Value>,
        dry_run: bool,
    ) -> Result<TriggerOutcome> {
        tokio::spawn(async move { self.trigger_user(kind, &user_id, extras, dry_run).await })
            .await
            .map_err(join_error)?
    }

    /// Evaluate and (unless `dry_run`) send one kind to one user.
    pub async fn trigger_user(
        &self,
        kind: EmailKind,
        user_id: &str,
        extras: Option<serde_json::Value>,
        dry_run: bool,
    ) -> Result<TriggerOutcome> {
        if extras.as_ref().is_some_and(|e| !e.is_object()) {
            return Err(DriplineError::Configuration(
                "Template data must be a JSON object".into(),
            ));
        }
        let evaluator = Evaluator::new(self.clock.now())?;
        let user = self
            .store
            .get_user(user_id)
            .await
            .map_err(as_store_error)?
            .ok_or_else(|| DriplineError::NotFound(format!("User '{user_id}'")))?;

        let request = RunRequest::new(KindSelection::one(kind), dry_run);
        tracing::info!(
            "✉️ Manual trigger {} for {} ({}) dryRun={}",
            kind,
            user_id,
            request.request_id,
            dry_run
        );

        let outcome = self
            .process(&evaluator, &user, kind, dry_run, extras.as_ref())
            .await;
        let reason = match &outcome {
            Outcome::Skipped(reason) => Some(*reason),
            _ => None,
        };
        let mut report = RunReportBuilder::new(&request);
        report.record(&user.id, kind, outcome);
        Ok(TriggerOutcome {
            result: report.finish(),
            reason,
        })
    }

    async fn process(
        &self,
        evaluator: &Evaluator,
        user: &User,
        kind: EmailKind,
        dry_run: bool,
        extras: Option<&serde_json::Value>,
    ) -> Outcome {
        let now = evaluator.now();
        let decision = match evaluator.evaluate(user, kind) {
            Decision::Eligible => SendGuard::check(user, kind, now),
            skip => skip,
        };
        if let Decision::Skip(reason) = decision {
            tracing::debug!("⏭️ [{}] {} skipped: {}", kind, user.id, reason);
            return Outcome::Skipped(reason);
        }

        let Some(to) = template::recipient(user, kind, &self.app) else {
            return Outcome::Failed(format!("No recipient address for {kind}"));
        };
        if dry_run {
            tracing::debug!("🧪 [{}] {} would send to {}", kind, user.id, to);
            return Outcome::WouldSend;
        }

        let claim = match self.guard.claim(user, kind, now).await {
            Ok(ClaimOutcome::Claimed(claim)) => claim,
            Ok(ClaimOutcome::Skip(reason)) => return Outcome::Skipped(reason),
            Err(e) => return Outcome::Failed(e.to_string()),
        };

        let email = OutboundEmail {
            user_id: user.id.clone(),
            to: to.clone(),
            kind,
            template_alias: kind.template_alias(),
            model: template::build_model(user, kind, &self.app, now, extras),
        };

        match self.sender.send(&email).await {
            Ok(receipt) => {
                tracing::info!("📤 [{}] sent to {} ({})", kind, user.id, to);
                self.log_delivery(&email, DeliveryStatus::Sent, receipt.message_id, None)
                    .await;
                Outcome::Sent
            }
            Err(e) => {
                tracing::warn!("⚠️ [{}] send to {} failed: {e}", kind, user.id);
                if let Err(release_err) = self.guard.release(&claim).await {
                    tracing::warn!("⚠️ [{}] could not release {}: {release_err}", kind, user.id);
                }
                self.log_delivery(&email, DeliveryStatus::Failed, None, Some(e.to_string()))
                    .await;
                Outcome::Failed(e.to_string())
            }
        }
    }

    async fn log_delivery(
        &self,
        email: &OutboundEmail,
        status: DeliveryStatus,
        message_id: Option<String>,
        error: Option<String>,
    ) {
        let entry = DeliveryLog {
            user_id: email.user_id.clone(),
            kind: email.kind,
            to: email.to.clone(),
            status,
            message_id,
            error,
            created_at: self.clock.now(),
        };
        if let Err(e) = self.store.record_delivery(entry).await {
            tracing::warn!("⚠️ Failed to record delivery for {}: {e}", email.user_id);
        }
    }
}

fn join_error(e: tokio::task::JoinError) -> DriplineError {
    DriplineError::Internal(format!("Run task failed: {e}"))
}

fn as_store_error(e: DriplineError) -> DriplineError {
    match e {
        DriplineError::StoreUnavailable(_) => e,
        other => DriplineError::StoreUnavailable(other.to_string()),
    }
}
