//! Template data for each kind. Rendering is the provider's job; this only
//! assembles the model passed alongside the template alias.

use chrono::{DateTime, Utc};
use dripline_core::config::AppConfig;
use dripline_core::{EmailKind, User};
use serde_json::{Map, Value, json};

/// Build the template model for `kind`. `extras` (an object from a manual
/// trigger body) is merged last and may override computed fields.
pub fn build_model(
    user: &User,
    kind: EmailKind,
    app: &AppConfig,
    now: DateTime<Utc>,
    extras: Option<&Value>,
) -> Value {
    let base = app.base_url.trim_end_matches('/');
    let name = match user.display_name() {
        "" => "Artist",
        n => n,
    };

    let mut model = Map::new();
    model.insert("name".into(), json!(name));
    model.insert("dashboardUrl".into(), json!(format!("{base}/dashboard")));
    model.insert("settingsUrl".into(), json!(format!("{base}/settings")));

    match kind {
        EmailKind::ProfileReminder => {
            model.insert("missingFields".into(), json!(user.missing_profile_fields()));
            model.insert("profileUrl".into(), json!(format!("{base}/profile")));
        }
        EmailKind::EpkGuide | EmailKind::EpkPublished | EmailKind::EpkUpdated => {
            model.insert("epkCompletion".into(), json!(user.epk_completion()));
            model.insert("epkTotal".into(), json!(5));
            model.insert("epkUrl".into(), json!(format!("{base}/epk/{}", user.id)));
        }
        EmailKind::UpgradeDay7 => {
            model.insert("pricingUrl".into(), json!(format!("{base}/pricing")));
        }
        EmailKind::UpgradeLimit => {
            model.insert("pricingUrl".into(), json!(format!("{base}/pricing")));
            model.insert("currentTier".into(), json!(user.tier.as_str()));
            model.insert("maxImages".into(), json!(user.tier.max_press_images()));
        }
        EmailKind::Reengagement => {
            let days = (now - user.last_active_at).num_days().max(0);
            model.insert("daysInactive".into(), json!(days));
        }
        EmailKind::FirstImage => {
            model.insert("pressImagesUrl".into(), json!(format!("{base}/profile#press")));
        }
        EmailKind::AdminNewApplication => {
            model.insert("applicantId".into(), json!(user.id));
            model.insert("applicantEmail".into(), json!(user.email));
            model.insert("adminUrl".into(), json!(format!("{base}/admin/users")));
        }
        EmailKind::Welcome => {}
    }

    if let Some(Value::Object(extra)) = extras {
        for (k, v) in extra {
            model.insert(k.clone(), v.clone());
        }
    }

    Value::Object(model)
}

/// Recipient address for `kind`: the user's own, or the admin mailbox.
pub fn recipient(user: &User, kind: EmailKind, app: &AppConfig) -> Option<String> {
    match kind {
        EmailKind::AdminNewApplication => app.admin_notify_email.clone(),
        _ => user.email.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_profile_reminder_model() {
        let user = User::new("u1", "a@x.io", now() - Duration::days(2));
        let app = AppConfig::default();
        let model = build_model(&user, EmailKind::ProfileReminder, &app, now(), None);
        assert_eq!(model["name"], "Artist");
        assert_eq!(model["missingFields"][0], "Artist Name");
        assert!(model["profileUrl"].as_str().unwrap().ends_with("/profile"));
    }

    #[test]
    fn test_reengagement_days_inactive() {
        let mut user = User::new("u1", "a@x.io", now() - Duration::days(40));
        user.last_active_at = now() - Duration::days(9);
        let model = build_model(&user, EmailKind::Reengagement, &AppConfig::default(), now(), None);
        assert_eq!(model["daysInactive"], 9);
    }

    #[test]
    fn test_extras_override() {
        let user = User::new("u1", "a@x.io", now());
        let extras = json!({"name": "DJ Override", "epkUrl": "https://x/epk"});
        let model = build_model(&user, EmailKind::EpkPublished, &AppConfig::default(), now(), Some(&extras));
        assert_eq!(model["name"], "DJ Override");
        assert_eq!(model["epkUrl"], "https://x/epk");
    }

    #[test]
    fn test_admin_recipient() {
        let user = User::new("u1", "a@x.io", now());
        let mut app = AppConfig::default();
        assert_eq!(recipient(&user, EmailKind::AdminNewApplication, &app), None);
        app.admin_notify_email = Some("ops@x.io".into());
        assert_eq!(
            recipient(&user, EmailKind::AdminNewApplication, &app).as_deref(),
            Some("ops@x.io")
        );
        assert_eq!(recipient(&user, EmailKind::Welcome, &app).as_deref(), Some("a@x.io"));
    }
}
