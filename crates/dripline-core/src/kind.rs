//! Email kinds and the per-kind rule data the evaluator is keyed on.
//!
//! Every kind is one variant plus a `KindRules` record; there is no per-kind
//! code path anywhere else in the scheduler.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::error::{DriplineError, Result};

/// A category of email with its own eligibility rule and resend policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EmailKind {
    Welcome,
    ProfileReminder,
    EpkGuide,
    UpgradeDay7,
    Reengagement,
    UpgradeLimit,
    FirstImage,
    EpkPublished,
    EpkUpdated,
    AdminNewApplication,
}

/// Which user timestamp an age window is measured against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowAnchor {
    CreatedAt,
    LastActiveAt,
}

/// Day offsets `(low, high)`: eligible when the anchor is between
/// `high` and `low` days old.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AgeWindow {
    pub anchor: WindowAnchor,
    pub low_days: i64,
    pub high_days: i64,
}

/// How often a kind may be sent to the same user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResendPolicy {
    /// At most once ever, enforced by the presence of the flag.
    Once,
    /// At most once per interval.
    Interval(Duration),
}

/// Marketing kinds honour the global marketing opt-out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Transactional,
    Marketing,
}

/// Rule data for one kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KindRules {
    pub window: Option<AgeWindow>,
    pub onboarding_gated: bool,
    pub tier1_only: bool,
    pub resend: ResendPolicy,
    pub category: Category,
}

impl EmailKind {
    pub const ALL: [EmailKind; 10] = [
        EmailKind::Welcome,
        EmailKind::ProfileReminder,
        EmailKind::EpkGuide,
        EmailKind::UpgradeDay7,
        EmailKind::Reengagement,
        EmailKind::UpgradeLimit,
        EmailKind::FirstImage,
        EmailKind::EpkPublished,
        EmailKind::EpkUpdated,
        EmailKind::AdminNewApplication,
    ];

    /// Kinds driven by the cron trigger. `all` expands to exactly these.
    pub const SCHEDULED: [EmailKind; 4] = [
        EmailKind::ProfileReminder,
        EmailKind::EpkGuide,
        EmailKind::UpgradeDay7,
        EmailKind::Reengagement,
    ];

    /// Route / wire name.
    pub fn slug(&self) -> &'static str {
        match self {
            EmailKind::Welcome => "welcome",
            EmailKind::ProfileReminder => "profile-reminder",
            EmailKind::EpkGuide => "epk-guide",
            EmailKind::UpgradeDay7 => "upgrade-day7",
            EmailKind::Reengagement => "reengagement",
            EmailKind::UpgradeLimit => "upgrade-limit",
            EmailKind::FirstImage => "first-image",
            EmailKind::EpkPublished => "epk-published",
            EmailKind::EpkUpdated => "epk-updated",
            EmailKind::AdminNewApplication => "admin-new-application",
        }
    }

    /// Short name accepted by the cron `type` parameter.
    pub fn cron_alias(&self) -> Option<&'static str> {
        match self {
            EmailKind::ProfileReminder => Some("day2"),
            EmailKind::EpkGuide => Some("day5"),
            EmailKind::UpgradeDay7 => Some("day7"),
            _ => None,
        }
    }

    /// Key in the user's `emailFlags` map holding the last-sent timestamp.
    pub fn flag_key(&self) -> &'static str {
        match self {
            EmailKind::Welcome => "welcomeSentAt",
            EmailKind::ProfileReminder => "profileReminderSentAt",
            EmailKind::EpkGuide => "epkGuideSentAt",
            EmailKind::UpgradeDay7 => "upgrade7DaySentAt",
            EmailKind::Reengagement => "reengagementSentAt",
            EmailKind::UpgradeLimit => "upgradeLimitSentAt",
            EmailKind::FirstImage => "firstImageSentAt",
            EmailKind::EpkPublished => "epkPublishedSentAt",
            EmailKind::EpkUpdated => "epkUpdatedLastSentAt",
            EmailKind::AdminNewApplication => "adminNewApplicationSentAt",
        }
    }

    /// Opaque template identifier handed to the sender.
    pub fn template_alias(&self) -> String {
        format!("dripline-{}", self.slug())
    }

    pub fn is_scheduled(&self) -> bool {
        Self::SCHEDULED.contains(self)
    }

    pub fn rules(&self) -> KindRules {
        let created = |low_days, high_days| {
            Some(AgeWindow {
                anchor: WindowAnchor::CreatedAt,
                low_days,
                high_days,
            })
        };
        let base = KindRules {
            window: None,
            onboarding_gated: false,
            tier1_only: false,
            resend: ResendPolicy::Once,
            category: Category::Transactional,
        };

        match self {
            EmailKind::Welcome | EmailKind::FirstImage | EmailKind::EpkPublished => base,
            EmailKind::ProfileReminder => KindRules {
                window: created(2, 3),
                category: Category::Marketing,
                ..base
            },
            EmailKind::EpkGuide => KindRules {
                window: created(5, 6),
                category: Category::Marketing,
                ..base
            },
            EmailKind::UpgradeDay7 => KindRules {
                window: created(7, 8),
                onboarding_gated: true,
                tier1_only: true,
                category: Category::Marketing,
                ..base
            },
            EmailKind::Reengagement => KindRules {
                window: Some(AgeWindow {
                    anchor: WindowAnchor::LastActiveAt,
                    low_days: 7,
                    high_days: 14,
                }),
                resend: ResendPolicy::Interval(Duration::days(14)),
                category: Category::Marketing,
                ..base
            },
            EmailKind::UpgradeLimit => KindRules {
                tier1_only: true,
                resend: ResendPolicy::Interval(Duration::hours(24)),
                category: Category::Marketing,
                ..base
            },
            EmailKind::EpkUpdated => KindRules {
                resend: ResendPolicy::Interval(Duration::hours(1)),
                ..base
            },
            EmailKind::AdminNewApplication => KindRules {
                resend: ResendPolicy::Interval(Duration::minutes(6)),
                ..base
            },
        }
    }
}

impl fmt::Display for EmailKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

impl FromStr for EmailKind {
    type Err = DriplineError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        Self::ALL
            .into_iter()
            .find(|k| k.slug() == s || k.cron_alias() == Some(s))
            .ok_or_else(|| DriplineError::Configuration(format!("Unknown email kind: '{s}'")))
    }
}

/// The kinds a run covers: either the pseudo-kind `all` or an explicit set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KindSelection {
    All,
    Only(BTreeSet<EmailKind>),
}

impl KindSelection {
    pub fn one(kind: EmailKind) -> Self {
        KindSelection::Only(BTreeSet::from([kind]))
    }

    /// Parse a cron `type` value: `all`, or a comma-separated list of
    /// scheduled kinds (slug or alias).
    pub fn parse_scheduled(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() || raw == "all" {
            return Ok(KindSelection::All);
        }
        let mut kinds = BTreeSet::new();
        for part in raw.split(',').filter(|p| !p.trim().is_empty()) {
            let kind: EmailKind = part.parse()?;
            if !kind.is_scheduled() {
                return Err(DriplineError::Configuration(format!(
                    "Email kind '{kind}' is event-driven and cannot be scheduled"
                )));
            }
            kinds.insert(kind);
        }
        if kinds.is_empty() {
            return Err(DriplineError::Configuration("No email kinds requested".into()));
        }
        Ok(KindSelection::Only(kinds))
    }

    /// Expanded, ordered kind list.
    pub fn kinds(&self) -> Vec<EmailKind> {
        match self {
            KindSelection::All => EmailKind::SCHEDULED.to_vec(),
            KindSelection::Only(set) => set.iter().copied().collect(),
        }
    }

    /// Label echoed back as `emailType`.
    pub fn label(&self) -> String {
        match self {
            KindSelection::All => "all".to_string(),
            KindSelection::Only(set) => set
                .iter()
                .map(|k| k.slug())
                .collect::<Vec<_>>()
                .join(","),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_slug_and_alias() {
        assert_eq!("upgrade-day7".parse::<EmailKind>().unwrap(), EmailKind::UpgradeDay7);
        assert_eq!("day7".parse::<EmailKind>().unwrap(), EmailKind::UpgradeDay7);
        assert_eq!("day2".parse::<EmailKind>().unwrap(), EmailKind::ProfileReminder);
        assert!("day9".parse::<EmailKind>().is_err());
    }

    #[test]
    fn test_all_expands_to_scheduled() {
        let sel = KindSelection::parse_scheduled("all").unwrap();
        assert_eq!(sel.kinds().len(), 4);
        assert_eq!(sel.label(), "all");
    }

    #[test]
    fn test_event_kind_cannot_be_scheduled() {
        let err = KindSelection::parse_scheduled("welcome").unwrap_err();
        assert!(matches!(err, DriplineError::Configuration(_)));
    }

    #[test]
    fn test_multi_kind_selection() {
        let sel = KindSelection::parse_scheduled("day5, reengagement").unwrap();
        assert_eq!(sel.kinds(), vec![EmailKind::EpkGuide, EmailKind::Reengagement]);
        assert_eq!(sel.label(), "epk-guide,reengagement");
    }

    #[test]
    fn test_upgrade_kinds_are_tier_gated() {
        assert!(EmailKind::UpgradeDay7.rules().tier1_only);
        assert!(EmailKind::UpgradeLimit.rules().tier1_only);
        assert!(!EmailKind::Welcome.rules().tier1_only);
    }

    #[test]
    fn test_serde_uses_slug() {
        let json = serde_json::to_string(&EmailKind::AdminNewApplication).unwrap();
        assert_eq!(json, "\"admin-new-application\"");
        for kind in EmailKind::ALL {
            assert_eq!(serde_json::to_value(kind).unwrap(), kind.slug());
        }
    }
}
