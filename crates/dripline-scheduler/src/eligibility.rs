//! Eligibility evaluator: decides send/skip for one (user, kind) pair.
//!
//! Pure and deterministic given `(user, kind, now)`, so dry runs and live
//! runs see the same decisions. Rules short-circuit in this order:
//!
//! ```text
//! 1. age window        → not_yet_due | window_passed
//! 2. onboarding gate   → onboarding_incomplete
//! 3. tier gate         → already_upgraded
//! 4. one-time flag     → already_sent
//! 5. inactivity (7d+)  → not_yet_due          (reengagement)
//! 6. opt-outs          → unsubscribed
//! 7. address           → missing_email
//! 8. profile complete  → profile_complete     (profile-reminder)
//! ```
//!
//! Interval rate limits are enforced by the guard, not here.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use dripline_core::{
    Decision, EmailKind, ResendPolicy, Result, SkipReason, Tier, User, WindowAnchor,
};

use crate::window::{Window, WindowPosition};

const REENGAGEMENT_INACTIVITY_DAYS: i64 = 7;

/// Evaluator bound to one instant. Windows are computed once per run.
#[derive(Debug, Clone)]
pub struct Evaluator {
    now: DateTime<Utc>,
    windows: BTreeMap<EmailKind, Window>,
}

impl Evaluator {
    /// Fails with a configuration error if any kind's window is invalid.
    pub fn new(now: DateTime<Utc>) -> Result<Self> {
        let mut windows = BTreeMap::new();
        for kind in EmailKind::ALL {
            if let Some(age) = kind.rules().window {
                windows.insert(kind, Window::for_age(now, &age)?);
            }
        }
        Ok(Self { now, windows })
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    /// Coarse candidate filter for `kind`, if it has one.
    pub fn window(&self, kind: EmailKind) -> Option<Window> {
        self.windows.get(&kind).copied()
    }

    pub fn evaluate(&self, user: &User, kind: EmailKind) -> Decision {
        match self.first_skip(user, kind) {
            Some(reason) => Decision::Skip(reason),
            None => Decision::Eligible,
        }
    }

    fn first_skip(&self, user: &User, kind: EmailKind) -> Option<SkipReason> {
        let rules = kind.rules();

        if let (Some(age), Some(window)) = (rules.window, self.window(kind)) {
            let anchor = match age.anchor {
                WindowAnchor::CreatedAt => user.created_at,
                WindowAnchor::LastActiveAt => user.last_active_at,
            };
            match window.position(anchor) {
                WindowPosition::Early => return Some(SkipReason::NotYetDue),
                WindowPosition::Passed => return Some(SkipReason::WindowPassed),
                WindowPosition::Inside => {}
            }
        }

        if rules.onboarding_gated && !user.onboarding_completed {
            return Some(SkipReason::OnboardingIncomplete);
        }

        if rules.tier1_only && user.tier != Tier::Tier1 {
            return Some(SkipReason::AlreadyUpgraded);
        }

        if rules.resend == ResendPolicy::Once && user.flag(kind).is_some() {
            return Some(SkipReason::AlreadySent);
        }

        if kind == EmailKind::Reengagement
            && self.now - user.last_active_at < Duration::days(REENGAGEMENT_INACTIVITY_DAYS)
        {
            return Some(SkipReason::NotYetDue);
        }

        if user.preferences.blocks(kind) {
            return Some(SkipReason::Unsubscribed);
        }

        if kind != EmailKind::AdminNewApplication
            && user.email.as_deref().is_none_or(|e| e.trim().is_empty())
        {
            return Some(SkipReason::MissingEmail);
        }

        if kind == EmailKind::ProfileReminder && user.missing_profile_fields().is_empty() {
            return Some(SkipReason::ProfileComplete);
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap()
    }

    fn day7_user(age: Duration) -> User {
        let mut user = User::new("u1", "artist@example.com", now() - age);
        user.onboarding_completed = true;
        user.tier = Tier::Tier1;
        user
    }

    fn eval(user: &User, kind: EmailKind) -> Decision {
        Evaluator::new(now()).unwrap().evaluate(user, kind)
    }

    #[test]
    fn test_day7_eligible_at_seven_and_a_half_days() {
        let user = day7_user(Duration::hours(180));
        assert_eq!(eval(&user, EmailKind::UpgradeDay7), Decision::Eligible);
    }

    #[test]
    fn test_day7_window_passed_at_nine_days() {
        let user = day7_user(Duration::days(9));
        assert_eq!(
            eval(&user, EmailKind::UpgradeDay7),
            Decision::Skip(SkipReason::WindowPassed)
        );
    }

    #[test]
    fn test_day7_not_yet_due() {
        let user = day7_user(Duration::days(3));
        assert_eq!(
            eval(&user, EmailKind::UpgradeDay7),
            Decision::Skip(SkipReason::NotYetDue)
        );
    }

    #[test]
    fn test_day7_already_sent() {
        let mut user = day7_user(Duration::hours(180));
        user.email_flags
            .insert("upgrade7DaySentAt".into(), now() - Duration::days(2));
        assert_eq!(
            eval(&user, EmailKind::UpgradeDay7),
            Decision::Skip(SkipReason::AlreadySent)
        );
    }

    #[test]
    fn test_upgrade_kinds_never_eligible_for_paid_tiers() {
        for tier in [Tier::Tier2, Tier::Tier3] {
            let mut user = day7_user(Duration::hours(180));
            user.tier = tier;
            for kind in [EmailKind::UpgradeDay7, EmailKind::UpgradeLimit] {
                assert_eq!(eval(&user, kind), Decision::Skip(SkipReason::AlreadyUpgraded));
            }
        }
    }

    #[test]
    fn test_onboarding_gate_precedes_tier_gate() {
        let mut user = day7_user(Duration::hours(180));
        user.onboarding_completed = false;
        user.tier = Tier::Tier2;
        assert_eq!(
            eval(&user, EmailKind::UpgradeDay7),
            Decision::Skip(SkipReason::OnboardingIncomplete)
        );
    }

    #[test]
    fn test_reengagement_threshold() {
        let mut user = User::new("u2", "x@example.com", now() - Duration::days(60));
        user.last_active_at = now() - Duration::days(6);
        assert_eq!(
            eval(&user, EmailKind::Reengagement),
            Decision::Skip(SkipReason::NotYetDue)
        );

        user.last_active_at = now() - Duration::days(7);
        assert_eq!(eval(&user, EmailKind::Reengagement), Decision::Eligible);

        user.last_active_at = now() - Duration::days(8);
        assert_eq!(eval(&user, EmailKind::Reengagement), Decision::Eligible);

        user.last_active_at = now() - Duration::days(20);
        assert_eq!(
            eval(&user, EmailKind::Reengagement),
            Decision::Skip(SkipReason::WindowPassed)
        );
    }

    #[test]
    fn test_interval_kind_not_blocked_by_flag_here() {
        let mut user = User::new("u3", "x@example.com", now() - Duration::days(30));
        user.email_flags
            .insert("upgradeLimitSentAt".into(), now() - Duration::hours(1));
        // The guard owns interval limits.
        assert_eq!(eval(&user, EmailKind::UpgradeLimit), Decision::Eligible);
    }

    #[test]
    fn test_unsubscribed_and_missing_email() {
        let mut user = User::new("u4", "x@example.com", now() - Duration::days(30));
        user.preferences.marketing_unsubscribed = true;
        assert_eq!(
            eval(&user, EmailKind::UpgradeLimit),
            Decision::Skip(SkipReason::Unsubscribed)
        );
        assert_eq!(eval(&user, EmailKind::Welcome), Decision::Eligible);

        let no_mail = User::new("u5", "", now());
        assert_eq!(
            eval(&no_mail, EmailKind::Welcome),
            Decision::Skip(SkipReason::MissingEmail)
        );
        assert_eq!(eval(&no_mail, EmailKind::AdminNewApplication), Decision::Eligible);
    }

    #[test]
    fn test_profile_reminder_skips_complete_profiles() {
        let mut user = User::new("u6", "x@example.com", now() - Duration::hours(60));
        assert_eq!(eval(&user, EmailKind::ProfileReminder), Decision::Eligible);

        user.profile.artist_name = Some("Nova".into());
        user.profile.genre = Some("House".into());
        user.profile.bio = Some("Producer from Leeds".into());
        assert_eq!(
            eval(&user, EmailKind::ProfileReminder),
            Decision::Skip(SkipReason::ProfileComplete)
        );
    }

    #[test]
    fn test_evaluation_is_deterministic() {
        let user = day7_user(Duration::hours(180));
        let evaluator = Evaluator::new(now()).unwrap();
        let first: Vec<_> = EmailKind::ALL.iter().map(|k| evaluator.evaluate(&user, *k)).collect();
        let second: Vec<_> = EmailKind::ALL.iter().map(|k| evaluator.evaluate(&user, *k)).collect();
        assert_eq!(first, second);
    }
}
