//! Periodic cron loop: sleeps until the next schedule match and runs the
//! configured kinds. Uses tokio timers only; zero work between fires.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dripline_core::{KindSelection, Result, RunRequest, RunResult};

use crate::cron::CronSchedule;
use crate::dispatch::Dispatcher;
use crate::window::{Clock, SystemClock};

pub struct CronLoop {
    dispatcher: Arc<Dispatcher>,
    schedule: CronSchedule,
    kinds: KindSelection,
    clock: Arc<dyn Clock>,
}

impl CronLoop {
    pub fn new(dispatcher: Arc<Dispatcher>, schedule: CronSchedule, kinds: KindSelection) -> Self {
        Self {
            dispatcher,
            schedule,
            kinds,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn next_fire(&self) -> Option<DateTime<Utc>> {
        self.schedule.next_after(self.clock.now())
    }

    /// One scheduled run. Scheduled runs are never dry runs.
    pub async fn fire(&self) -> Result<RunResult> {
        let request = RunRequest::new(self.kinds.clone(), false);
        tracing::info!(
            "🔔 Scheduled run {} ({}) type={}",
            request.request_id,
            self.schedule.expression(),
            self.kinds.label()
        );
        self.dispatcher.run_once(request).await
    }

    /// Loop forever. Failed runs are logged and the next fire still happens.
    pub async fn run(self) {
        tracing::info!(
            "⏰ Cron loop started: '{}' type={}",
            self.schedule.expression(),
            self.kinds.label()
        );
        loop {
            let Some(next) = self.next_fire() else {
                tracing::warn!(
                    "⚠️ Cron expression '{}' never fires; loop stopped",
                    self.schedule.expression()
                );
                return;
            };
            tracing::debug!("⏳ Next scheduled run at {next}");
            let wait = (next - self.clock.now()).to_std().unwrap_or_default();
            tokio::time::sleep(wait).await;

            match self.fire().await {
                Ok(result) => tracing::info!(
                    "📣 Scheduled run {} done: sent={} skipped={} errors={}",
                    result.request_id,
                    result.sent,
                    result.skipped,
                    result.errors.len()
                ),
                Err(e) => tracing::error!("❌ Scheduled run failed: {e}"),
            }
        }
    }
}

/// Spawn the cron loop as a background tokio task.
pub fn spawn_cron_loop(cron: CronLoop) -> tokio::task::JoinHandle<()> {
    tokio::spawn(cron.run())
}
