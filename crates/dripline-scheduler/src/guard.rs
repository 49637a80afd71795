//! Idempotency & rate guard.
//!
//! Claim-then-send: the flag is moved from the value observed at evaluation
//! time to `now` with a compare-and-set *before* the sender runs. Whoever
//! wins the write owns the send. A failed send releases the claim with a
//! second compare-and-set back to the observed value.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dripline_core::{Decision, EmailKind, ResendPolicy, Result, SkipReason, User};

use crate::store::{FlagWrite, UserStore};

/// A won claim on one (user, kind) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claim {
    pub user_id: String,
    pub kind: EmailKind,
    /// Flag value before the claim, restored on release.
    pub previous: Option<DateTime<Utc>>,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    Claimed(Claim),
    Skip(SkipReason),
}

pub struct SendGuard {
    store: Arc<dyn UserStore>,
}

impl SendGuard {
    pub fn new(store: Arc<dyn UserStore>) -> Self {
        Self { store }
    }

    /// Read-only policy check against the user snapshot. Used by dry runs too.
    pub fn check(user: &User, kind: EmailKind, now: DateTime<Utc>) -> Decision {
        match (kind.rules().resend, user.flag(kind)) {
            (_, None) => Decision::Eligible,
            (ResendPolicy::Once, Some(_)) => Decision::Skip(SkipReason::AlreadySent),
            (ResendPolicy::Interval(min), Some(last)) if now - last < min => {
                Decision::Skip(SkipReason::RateLimited)
            }
            (ResendPolicy::Interval(_), Some(_)) => Decision::Eligible,
        }
    }

    /// Check, then atomically take the flag. Losing the write race is a skip.
    pub async fn claim(&self, user: &User, kind: EmailKind, now: DateTime<Utc>) -> Result<ClaimOutcome> {
        if let Decision::Skip(reason) = Self::check(user, kind, now) {
            return Ok(ClaimOutcome::Skip(reason));
        }
        let previous = user.flag(kind);
        match self
            .store
            .set_email_flag(&user.id, kind, previous, Some(now))
            .await?
        {
            FlagWrite::Written => Ok(ClaimOutcome::Claimed(Claim {
                user_id: user.id.clone(),
                kind,
                previous,
                at: now,
            })),
            FlagWrite::Conflict => {
                tracing::debug!("🔒 [{}] {} claim lost to a concurrent run", kind, user.id);
                Ok(ClaimOutcome::Skip(SkipReason::AlreadySent))
            }
        }
    }

    /// Undo a claim after a failed send so the next run can retry.
    pub async fn release(&self, claim: &Claim) -> Result<()> {
        let write = self
            .store
            .set_email_flag(&claim.user_id, claim.kind, Some(claim.at), claim.previous)
            .await?;
        if write == FlagWrite::Conflict {
            tracing::warn!(
                "⚠️ [{}] {} flag changed after claim; leaving it in place",
                claim.kind,
                claim.user_id
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryUserStore;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_check_interval_kinds() {
        let mut user = User::new("u1", "a@x.io", now() - Duration::days(30));
        assert_eq!(SendGuard::check(&user, EmailKind::EpkUpdated, now()), Decision::Eligible);

        user.email_flags
            .insert("epkUpdatedLastSentAt".into(), now() - Duration::minutes(20));
        assert_eq!(
            SendGuard::check(&user, EmailKind::EpkUpdated, now()),
            Decision::Skip(SkipReason::RateLimited)
        );

        user.email_flags
            .insert("epkUpdatedLastSentAt".into(), now() - Duration::minutes(61));
        assert_eq!(SendGuard::check(&user, EmailKind::EpkUpdated, now()), Decision::Eligible);
    }

    #[test]
    fn test_check_one_time_kind() {
        let mut user = User::new("u1", "a@x.io", now());
        user.email_flags.insert("welcomeSentAt".into(), now() - Duration::days(400));
        assert_eq!(
            SendGuard::check(&user, EmailKind::Welcome, now()),
            Decision::Skip(SkipReason::AlreadySent)
        );
    }

    #[tokio::test]
    async fn test_stale_snapshot_loses_claim() {
        let user = User::new("u1", "a@x.io", now());
        let store = Arc::new(MemoryUserStore::with_users([user.clone()]));
        let guard = SendGuard::new(store.clone());

        let first = guard.claim(&user, EmailKind::Welcome, now()).await.unwrap();
        assert!(matches!(first, ClaimOutcome::Claimed(_)));

        // Same pre-claim snapshot, as a racing run would hold.
        let second = guard.claim(&user, EmailKind::Welcome, now()).await.unwrap();
        assert_eq!(second, ClaimOutcome::Skip(SkipReason::AlreadySent));
    }

    #[tokio::test]
    async fn test_release_restores_previous_value() {
        let mut user = User::new("u1", "a@x.io", now() - Duration::days(3));
        let earlier = now() - Duration::days(2);
        user.email_flags.insert("upgradeLimitSentAt".into(), earlier);
        let store = Arc::new(MemoryUserStore::with_users([user.clone()]));
        let guard = SendGuard::new(store.clone());

        let ClaimOutcome::Claimed(claim) =
            guard.claim(&user, EmailKind::UpgradeLimit, now()).await.unwrap()
        else {
            panic!("expected claim");
        };
        assert_eq!(store.snapshot("u1").unwrap().flag(EmailKind::UpgradeLimit), Some(now()));

        guard.release(&claim).await.unwrap();
        assert_eq!(
            store.snapshot("u1").unwrap().flag(EmailKind::UpgradeLimit),
            Some(earlier)
        );
    }
}
