//! The user record as the scheduler sees it.
//!
//! Owned by the external user store. The scheduler only ever writes back
//! `email_flags` entries (and unsubscribe preferences through the gateway).

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::kind::{Category, EmailKind};

/// Subscription tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    #[default]
    Tier1,
    Tier2,
    Tier3,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Tier1 => "tier1",
            Tier::Tier2 => "tier2",
            Tier::Tier3 => "tier3",
        }
    }

    /// Unknown values fall back to the free tier.
    pub fn parse_lenient(s: &str) -> Self {
        match s {
            "tier2" => Tier::Tier2,
            "tier3" => Tier::Tier3,
            _ => Tier::Tier1,
        }
    }

    /// Press image quota per tier.
    pub fn max_press_images(&self) -> u32 {
        match self {
            Tier::Tier1 => 3,
            Tier::Tier2 => 10,
            Tier::Tier3 => 20,
        }
    }
}

/// Artist profile fields used for template data and the completeness check.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Profile {
    pub artist_name: Option<String>,
    pub display_name: Option<String>,
    pub genre: Option<String>,
    pub bio: Option<String>,
    pub contact_email: Option<String>,
    pub has_press_image: bool,
    pub has_streaming_links: bool,
    pub has_social_links: bool,
}

/// Opt-outs recorded through the unsubscribe endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EmailPreferences {
    pub marketing_unsubscribed: bool,
    pub unsubscribed_kinds: BTreeSet<EmailKind>,
}

impl EmailPreferences {
    pub fn blocks(&self, kind: EmailKind) -> bool {
        self.unsubscribed_kinds.contains(&kind)
            || (self.marketing_unsubscribed && kind.rules().category == Category::Marketing)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub tier: Tier,
    #[serde(default)]
    pub onboarding_completed: bool,
    pub last_active_at: DateTime<Utc>,
    /// Flag key (e.g. `upgrade7DaySentAt`) → last-sent timestamp.
    #[serde(default)]
    pub email_flags: BTreeMap<String, DateTime<Utc>>,
    #[serde(default)]
    pub profile: Profile,
    #[serde(default)]
    pub preferences: EmailPreferences,
}

impl User {
    /// A fresh tier-1 user with no flags, active at signup.
    pub fn new(id: &str, email: &str, created_at: DateTime<Utc>) -> Self {
        Self {
            id: id.to_string(),
            email: Some(email.to_string()).filter(|e| !e.is_empty()),
            created_at,
            tier: Tier::Tier1,
            onboarding_completed: false,
            last_active_at: created_at,
            email_flags: BTreeMap::new(),
            profile: Profile::default(),
            preferences: EmailPreferences::default(),
        }
    }

    /// Last time `kind` was sent to this user.
    pub fn flag(&self, kind: EmailKind) -> Option<DateTime<Utc>> {
        self.email_flags.get(kind.flag_key()).copied()
    }

    /// Name used in greetings; empty when the user never set one.
    pub fn display_name(&self) -> &str {
        self.profile
            .artist_name
            .as_deref()
            .or(self.profile.display_name.as_deref())
            .unwrap_or("")
    }

    /// Profile sections still empty, in the order they are shown to the user.
    pub fn missing_profile_fields(&self) -> Vec<&'static str> {
        let blank = |v: &Option<String>| v.as_deref().is_none_or(|s| s.trim().is_empty());
        let mut missing = Vec::new();
        if blank(&self.profile.artist_name) {
            missing.push("Artist Name");
        }
        if blank(&self.profile.genre) {
            missing.push("Genre");
        }
        if blank(&self.profile.bio) {
            missing.push("Bio");
        }
        missing
    }

    /// EPK checklist score out of 5.
    pub fn epk_completion(&self) -> u32 {
        let p = &self.profile;
        let bio_ok = p.bio.as_deref().is_some_and(|b| b.len() >= 50);
        let contact_ok = p.contact_email.is_some() || self.email.is_some();
        [p.has_press_image, bio_ok, p.has_streaming_links, p.has_social_links, contact_ok]
            .into_iter()
            .filter(|ok| *ok)
            .count() as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_new_user_defaults() {
        let now = Utc::now();
        let user = User::new("u1", "a@b.c", now);
        assert_eq!(user.tier, Tier::Tier1);
        assert!(user.flag(EmailKind::Welcome).is_none());
        assert_eq!(user.missing_profile_fields(), vec!["Artist Name", "Genre", "Bio"]);
        assert_eq!(user.epk_completion(), 1); // contact via account email
    }

    #[test]
    fn test_flag_lookup_uses_flag_key() {
        let now = Utc::now();
        let mut user = User::new("u1", "a@b.c", now);
        user.email_flags
            .insert("upgrade7DaySentAt".into(), now - Duration::days(2));
        assert!(user.flag(EmailKind::UpgradeDay7).is_some());
        assert!(user.flag(EmailKind::UpgradeLimit).is_none());
    }

    #[test]
    fn test_preferences_block_marketing_only() {
        let prefs = EmailPreferences {
            marketing_unsubscribed: true,
            ..Default::default()
        };
        assert!(prefs.blocks(EmailKind::Reengagement));
        assert!(!prefs.blocks(EmailKind::Welcome));
    }

    #[test]
    fn test_deserialize_camel_case() {
        let json = r#"{
            "id": "u9",
            "email": "x@y.z",
            "createdAt": "2026-01-01T00:00:00Z",
            "tier": "tier2",
            "onboardingCompleted": true,
            "lastActiveAt": "2026-01-05T00:00:00Z",
            "emailFlags": {"welcomeSentAt": "2026-01-01T00:01:00Z"}
        }"#;
        let user: User = serde_json::from_str(json).unwrap();
        assert_eq!(user.tier, Tier::Tier2);
        assert!(user.onboarding_completed);
        assert!(user.flag(EmailKind::Welcome).is_some());
    }

    #[test]
    fn test_tier_lenient_parse() {
        assert_eq!(Tier::parse_lenient("tier3"), Tier::Tier3);
        assert_eq!(Tier::parse_lenient("gold"), Tier::Tier1);
        assert_eq!(Tier::Tier2.max_press_images(), 10);
    }
}
