//! SQLite-backed user store.
//!
//! Flags live in their own table, one row per (user, flag key), so the
//! guard's compare-and-set is a single conditional INSERT/UPDATE/DELETE.
//! Timestamps are stored as fixed-width RFC 3339 UTC strings, which sort
//! chronologically and keep window queries index-friendly.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use dripline_core::{DriplineError, EmailKind, Result, Tier, User, WindowAnchor};
use rusqlite::{Connection, OptionalExtension, params};

use crate::store::{DeliveryLog, FlagWrite, UserStore};
use crate::window::Window;

pub struct SqliteUserStore {
    conn: Mutex<Connection>,
}

fn ts(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| DriplineError::StoreUnavailable(format!("Bad timestamp '{s}': {e}")))
}

/// Decode a JSON column. A corrupt value means the row cannot be trusted.
fn decode_json<T: serde::de::DeserializeOwned>(user_id: &str, column: &str, raw: &str) -> Result<T> {
    serde_json::from_str(raw).map_err(|e| {
        tracing::warn!("⚠️ Corrupt {column} for user {user_id}: {e}");
        DriplineError::StoreUnavailable(format!("Corrupt {column} for user '{user_id}': {e}"))
    })
}

fn db_err(ctx: &'static str) -> impl Fn(rusqlite::Error) -> DriplineError {
    move |e| DriplineError::StoreUnavailable(format!("{ctx}: {e}"))
}

/// Raw `users` row before JSON columns and timestamps are decoded.
struct UserRow {
    id: String,
    email: Option<String>,
    created_at: String,
    tier: String,
    onboarding_completed: bool,
    last_active_at: String,
    profile: String,
    preferences: String,
}

const USER_COLUMNS: &str =
    "id, email, created_at, tier, onboarding_completed, last_active_at, profile, preferences";

impl UserRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            email: row.get(1)?,
            created_at: row.get(2)?,
            tier: row.get(3)?,
            onboarding_completed: row.get::<_, i64>(4)? != 0,
            last_active_at: row.get(5)?,
            profile: row.get(6)?,
            preferences: row.get(7)?,
        })
    }
}

impl SqliteUserStore {
    /// Open or create the user database. `:memory:` is accepted.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(db_err("DB open"))?;
        conn.execute_batch("PRAGMA journal_mode=WAL;").ok();
        conn.busy_timeout(std::time::Duration::from_secs(5))
            .map_err(db_err("DB open"))?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| DriplineError::StoreUnavailable(format!("Lock: {e}")))
    }

    fn migrate(&self) -> Result<()> {
        self.lock()?
            .execute_batch(
                "
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                email TEXT,
                created_at TEXT NOT NULL,
                tier TEXT NOT NULL DEFAULT 'tier1',
                onboarding_completed INTEGER NOT NULL DEFAULT 0,
                last_active_at TEXT NOT NULL,
                profile TEXT NOT NULL DEFAULT '{}',       -- JSON
                preferences TEXT NOT NULL DEFAULT '{}'    -- JSON
            );
            CREATE INDEX IF NOT EXISTS idx_users_created ON users(created_at);
            CREATE INDEX IF NOT EXISTS idx_users_last_active ON users(last_active_at);

            -- One row per sent flag, e.g. (u1, upgrade7DaySentAt, ...)
            CREATE TABLE IF NOT EXISTS email_flags (
                user_id TEXT NOT NULL,
                flag_key TEXT NOT NULL,
                sent_at TEXT NOT NULL,
                PRIMARY KEY (user_id, flag_key)
            );

            -- Delivery audit log
            CREATE TABLE IF NOT EXISTS email_logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                recipient TEXT NOT NULL,
                status TEXT NOT NULL,           -- sent, failed
                message_id TEXT,
                error TEXT,
                created_at TEXT NOT NULL
            );
         ",
            )
            .map_err(db_err("Migration"))
    }

    /// Insert or replace a user record, flags included.
    pub fn upsert_user(&self, user: &User) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(db_err("Begin"))?;
        tx.execute(
            "INSERT OR REPLACE INTO users (id, email, created_at, tier, onboarding_completed,
                last_active_at, profile, preferences)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                user.id,
                user.email,
                ts(user.created_at),
                user.tier.as_str(),
                user.onboarding_completed as i64,
                ts(user.last_active_at),
                serde_json::to_string(&user.profile)?,
                serde_json::to_string(&user.preferences)?,
            ],
        )
        .map_err(db_err("Save user"))?;
        tx.execute("DELETE FROM email_flags WHERE user_id = ?1", params![user.id])
            .map_err(db_err("Save flags"))?;
        for (key, at) in &user.email_flags {
            tx.execute(
                "INSERT INTO email_flags (user_id, flag_key, sent_at) VALUES (?1, ?2, ?3)",
                params![user.id, key, ts(*at)],
            )
            .map_err(db_err("Save flags"))?;
        }
        tx.commit().map_err(db_err("Commit"))
    }

    pub fn user_count(&self) -> Result<usize> {
        let n: i64 = self
            .lock()?
            .query_row("SELECT COUNT(*) FROM users", [], |r| r.get(0))
            .map_err(db_err("Count users"))?;
        Ok(n as usize)
    }

    /// Most recent delivery log entries as JSON, newest first.
    pub fn recent_deliveries(&self, limit: usize) -> Result<Vec<serde_json::Value>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT user_id, kind, recipient, status, message_id, error, created_at
                 FROM email_logs ORDER BY id DESC LIMIT ?1",
            )
            .map_err(db_err("Query logs"))?;
        let rows = stmt
            .query_map([limit as i64], |row| {
                Ok(serde_json::json!({
                    "userId": row.get::<_, String>(0)?,
                    "kind": row.get::<_, String>(1)?,
                    "to": row.get::<_, String>(2)?,
                    "status": row.get::<_, String>(3)?,
                    "messageId": row.get::<_, Option<String>>(4)?,
                    "error": row.get::<_, Option<String>>(5)?,
                    "createdAt": row.get::<_, String>(6)?,
                }))
            })
            .map_err(db_err("Query logs"))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err("Read logs"))
    }

    fn hydrate(conn: &Connection, row: UserRow) -> Result<User> {
        let mut flags = BTreeMap::new();
        let mut stmt = conn
            .prepare_cached("SELECT flag_key, sent_at FROM email_flags WHERE user_id = ?1")
            .map_err(db_err("Query flags"))?;
        let pairs = stmt
            .query_map([&row.id], |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)))
            .map_err(db_err("Query flags"))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err("Read flags"))?;
        for (key, at) in pairs {
            flags.insert(key, parse_ts(&at)?);
        }

        Ok(User {
            email: row.email.filter(|e| !e.is_empty()),
            created_at: parse_ts(&row.created_at)?,
            tier: Tier::parse_lenient(&row.tier),
            onboarding_completed: row.onboarding_completed,
            last_active_at: parse_ts(&row.last_active_at)?,
            email_flags: flags,
            profile: decode_json(&row.id, "profile", &row.profile)?,
            preferences: decode_json(&row.id, "preferences", &row.preferences)?,
            id: row.id,
        })
    }

    fn user_exists(conn: &Connection, user_id: &str) -> Result<bool> {
        conn.query_row("SELECT 1 FROM users WHERE id = ?1", [user_id], |_| Ok(()))
            .optional()
            .map(|r| r.is_some())
            .map_err(db_err("Lookup user"))
    }
}

#[async_trait]
impl UserStore for SqliteUserStore {
    async fn find_candidates(&self, kind: EmailKind, window: Option<Window>) -> Result<Vec<User>> {
        let conn = self.lock()?;
        let anchor = kind.rules().window.map(|w| w.anchor);
        let rows = match (window, anchor) {
            (Some(w), Some(anchor)) => {
                let column = match anchor {
                    WindowAnchor::CreatedAt => "created_at",
                    WindowAnchor::LastActiveAt => "last_active_at",
                };
                let upper = if w.inclusive_end { "<=" } else { "<" };
                let sql = format!(
                    "SELECT {USER_COLUMNS} FROM users WHERE {column} >= ?1 AND {column} {upper} ?2 ORDER BY id"
                );
                let mut stmt = conn.prepare(&sql).map_err(db_err("Query candidates"))?;
                let rows = stmt
                    .query_map(params![ts(w.start), ts(w.end)], UserRow::from_row)
                    .map_err(db_err("Query candidates"))?
                    .collect::<rusqlite::Result<Vec<_>>>();
                rows
            }
            _ => {
                let sql = format!("SELECT {USER_COLUMNS} FROM users ORDER BY id");
                let mut stmt = conn.prepare(&sql).map_err(db_err("Query candidates"))?;
                let rows = stmt
                    .query_map([], UserRow::from_row)
                    .map_err(db_err("Query candidates"))?
                    .collect::<rusqlite::Result<Vec<_>>>();
                rows
            }
        }
        .map_err(db_err("Read candidates"))?;

        rows.into_iter().map(|r| Self::hydrate(&conn, r)).collect()
    }

    async fn get_user(&self, user_id: &str) -> Result<Option<User>> {
        let conn = self.lock()?;
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1");
        let row = conn
            .query_row(&sql, [user_id], UserRow::from_row)
            .optional()
            .map_err(db_err("Get user"))?;
        row.map(|r| Self::hydrate(&conn, r)).transpose()
    }

    async fn set_email_flag(
        &self,
        user_id: &str,
        kind: EmailKind,
        expected: Option<DateTime<Utc>>,
        value: Option<DateTime<Utc>>,
    ) -> Result<FlagWrite> {
        let conn = self.lock()?;
        if !Self::user_exists(&conn, user_id)? {
            return Ok(FlagWrite::Conflict);
        }
        let key = kind.flag_key();
        let changed = match (expected, value) {
            (None, Some(v)) => conn.execute(
                "INSERT INTO email_flags (user_id, flag_key, sent_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT (user_id, flag_key) DO NOTHING",
                params![user_id, key, ts(v)],
            ),
            (Some(e), Some(v)) => conn.execute(
                "UPDATE email_flags SET sent_at = ?4
                 WHERE user_id = ?1 AND flag_key = ?2 AND sent_at = ?3",
                params![user_id, key, ts(e), ts(v)],
            ),
            (Some(e), None) => conn.execute(
                "DELETE FROM email_flags WHERE user_id = ?1 AND flag_key = ?2 AND sent_at = ?3",
                params![user_id, key, ts(e)],
            ),
            (None, None) => conn
                .query_row(
                    "SELECT COUNT(*) FROM email_flags WHERE user_id = ?1 AND flag_key = ?2",
                    params![user_id, key],
                    |r| r.get::<_, i64>(0),
                )
                .map(|n| if n == 0 { 1 } else { 0 }),
        }
        .map_err(db_err("Set flag"))?;

        Ok(if changed == 1 {
            FlagWrite::Written
        } else {
            FlagWrite::Conflict
        })
    }

    async fn set_unsubscribed(&self, user_id: &str, kind: Option<EmailKind>) -> Result<bool> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(db_err("Begin"))?;
        let raw: Option<String> = tx
            .query_row("SELECT preferences FROM users WHERE id = ?1", [user_id], |r| r.get(0))
            .optional()
            .map_err(db_err("Get preferences"))?;
        let Some(raw) = raw else {
            return Ok(false);
        };
        let mut prefs: dripline_core::EmailPreferences =
            serde_json::from_str(&raw).unwrap_or_default();
        match kind {
            Some(k) => {
                prefs.unsubscribed_kinds.insert(k);
            }
            None => prefs.marketing_unsubscribed = true,
        }
        tx.execute(
            "UPDATE users SET preferences = ?2 WHERE id = ?1",
            params![user_id, serde_json::to_string(&prefs)?],
        )
        .map_err(db_err("Save preferences"))?;
        tx.commit().map_err(db_err("Commit"))?;
        Ok(true)
    }

    async fn record_delivery(&self, entry: DeliveryLog) -> Result<()> {
        self.lock()?
            .execute(
                "INSERT INTO email_logs (user_id, kind, recipient, status, message_id, error, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    entry.user_id,
                    entry.kind.slug(),
                    entry.to,
                    entry.status.as_str(),
                    entry.message_id,
                    entry.error,
                    ts(entry.created_at),
                ],
            )
            .map_err(db_err("Save delivery"))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::DeliveryStatus;
    use chrono::{Duration, TimeZone};
    use std::path::PathBuf;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap()
    }

    fn test_store() -> SqliteUserStore {
        SqliteUserStore::open(&PathBuf::from(":memory:")).unwrap()
    }

    #[tokio::test]
    async fn test_upsert_and_get_roundtrip() {
        let store = test_store();
        let mut user = User::new("u1", "a@x.io", now() - Duration::days(3));
        user.tier = Tier::Tier2;
        user.profile.genre = Some("Techno".into());
        user.email_flags.insert("welcomeSentAt".into(), now() - Duration::days(3));
        store.upsert_user(&user).unwrap();

        let loaded = store.get_user("u1").await.unwrap().unwrap();
        assert_eq!(loaded, user);
        assert!(store.get_user("nope").await.unwrap().is_none());
        assert_eq!(store.user_count().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_window_query_by_anchor() {
        let store = test_store();
        let mut idle = User::new("idle", "i@x.io", now() - Duration::days(60));
        idle.last_active_at = now() - Duration::days(9);
        store.upsert_user(&idle).unwrap();
        store
            .upsert_user(&User::new("week", "w@x.io", now() - Duration::hours(180)))
            .unwrap();

        let day7 = Window::from_offsets(now(), 7, 8).unwrap();
        let found = store
            .find_candidates(EmailKind::UpgradeDay7, Some(day7))
            .await
            .unwrap();
        assert_eq!(found.iter().map(|u| u.id.as_str()).collect::<Vec<_>>(), vec!["week"]);

        let reengage = Window::from_offsets(now(), 7, 14).unwrap();
        let found = store
            .find_candidates(EmailKind::Reengagement, Some(reengage))
            .await
            .unwrap();
        // "week" was last active at signup, 7.5 days ago.
        assert_eq!(found.len(), 2);
    }

    #[tokio::test]
    async fn test_inactivity_query_includes_exact_threshold() {
        let store = test_store();
        let mut idle = User::new("idle-7d", "i@x.io", now() - Duration::days(60));
        idle.last_active_at = now() - Duration::days(7);
        store.upsert_user(&idle).unwrap();

        let rules = EmailKind::Reengagement.rules();
        let window = Window::for_age(now(), &rules.window.unwrap()).unwrap();
        let found = store
            .find_candidates(EmailKind::Reengagement, Some(window))
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
    }

    #[tokio::test]
    async fn test_corrupt_profile_is_an_error() {
        let store = test_store();
        store.upsert_user(&User::new("u1", "a@x.io", now())).unwrap();
        store
            .lock()
            .unwrap()
            .execute("UPDATE users SET profile = '{not json' WHERE id = 'u1'", [])
            .unwrap();

        let err = store.get_user("u1").await.unwrap_err();
        assert!(matches!(err, DriplineError::StoreUnavailable(_)));
    }

    #[tokio::test]
    async fn test_flag_cas() {
        let store = test_store();
        store.upsert_user(&User::new("u1", "a@x.io", now())).unwrap();
        let k = EmailKind::EpkUpdated;

        assert_eq!(store.set_email_flag("u1", k, None, Some(now())).await.unwrap(), FlagWrite::Written);
        assert_eq!(store.set_email_flag("u1", k, None, Some(now())).await.unwrap(), FlagWrite::Conflict);

        let later = now() + Duration::hours(2);
        assert_eq!(
            store.set_email_flag("u1", k, Some(now()), Some(later)).await.unwrap(),
            FlagWrite::Written
        );
        assert_eq!(
            store.set_email_flag("u1", k, Some(now()), None).await.unwrap(),
            FlagWrite::Conflict
        );
        assert_eq!(
            store.set_email_flag("u1", k, Some(later), None).await.unwrap(),
            FlagWrite::Written
        );
        assert!(store.get_user("u1").await.unwrap().unwrap().flag(k).is_none());
        assert_eq!(
            store.set_email_flag("ghost", k, None, Some(now())).await.unwrap(),
            FlagWrite::Conflict
        );
    }

    #[tokio::test]
    async fn test_unsubscribe_persists() {
        let store = test_store();
        store.upsert_user(&User::new("u1", "a@x.io", now())).unwrap();
        assert!(store.set_unsubscribed("u1", None).await.unwrap());
        assert!(!store.set_unsubscribed("ghost", None).await.unwrap());
        let user = store.get_user("u1").await.unwrap().unwrap();
        assert!(user.preferences.marketing_unsubscribed);
    }

    #[tokio::test]
    async fn test_delivery_log() {
        let store = test_store();
        store
            .record_delivery(DeliveryLog {
                user_id: "u1".into(),
                kind: EmailKind::Welcome,
                to: "a@x.io".into(),
                status: DeliveryStatus::Sent,
                message_id: Some("m-1".into()),
                error: None,
                created_at: now(),
            })
            .await
            .unwrap();
        let logs = store.recent_deliveries(10).unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0]["kind"], "welcome");
        assert_eq!(logs[0]["status"], "sent");
    }
}
