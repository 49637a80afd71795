//! User store interface and the in-memory implementation.
//!
//! The store owns user records. The scheduler reads candidates and mutates
//! `emailFlags` only through `set_email_flag`, a compare-and-set on the
//! single flag field. That write is the sole mutation point for send state.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dripline_core::{DriplineError, EmailKind, Result, User, WindowAnchor};
use serde::Serialize;

use crate::window::Window;

/// Result of a conditional flag write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagWrite {
    Written,
    /// The flag no longer held the expected value; another run got there first.
    Conflict,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Sent,
    Failed,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Sent => "sent",
            DeliveryStatus::Failed => "failed",
        }
    }
}

/// Audit entry for one attempted live send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryLog {
    pub user_id: String,
    pub kind: EmailKind,
    pub to: String,
    pub status: DeliveryStatus,
    pub message_id: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait UserStore: Send + Sync {
    /// Users matching `kind`'s coarse filter. `window` bounds the kind's
    /// anchor timestamp when present; otherwise every user is a candidate.
    async fn find_candidates(&self, kind: EmailKind, window: Option<Window>) -> Result<Vec<User>>;

    async fn get_user(&self, user_id: &str) -> Result<Option<User>>;

    /// Set the flag for `kind` to `value` only if it currently equals `expected`.
    /// `value = None` clears the flag.
    async fn set_email_flag(
        &self,
        user_id: &str,
        kind: EmailKind,
        expected: Option<DateTime<Utc>>,
        value: Option<DateTime<Utc>>,
    ) -> Result<FlagWrite>;

    /// Record an opt-out: one kind, or all marketing mail when `kind` is None.
    /// Returns false when the user does not exist.
    async fn set_unsubscribed(&self, user_id: &str, kind: Option<EmailKind>) -> Result<bool>;

    async fn record_delivery(&self, entry: DeliveryLog) -> Result<()>;
}

/// Anchor timestamp the kind's window is measured against.
pub fn window_anchor(user: &User, kind: EmailKind) -> Option<DateTime<Utc>> {
    kind.rules().window.map(|age| match age.anchor {
        WindowAnchor::CreatedAt => user.created_at,
        WindowAnchor::LastActiveAt => user.last_active_at,
    })
}

/// Process-local store, used by tests and the CLI dry-run demo.
#[derive(Default)]
pub struct MemoryUserStore {
    users: Mutex<BTreeMap<String, User>>,
    deliveries: Mutex<Vec<DeliveryLog>>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_users(users: impl IntoIterator<Item = User>) -> Self {
        let store = Self::new();
        for user in users {
            store.upsert(user);
        }
        store
    }

    pub fn upsert(&self, user: User) {
        if let Ok(mut users) = self.users.lock() {
            users.insert(user.id.clone(), user);
        }
    }

    pub fn snapshot(&self, user_id: &str) -> Option<User> {
        self.users.lock().ok()?.get(user_id).cloned()
    }

    pub fn deliveries(&self) -> Vec<DeliveryLog> {
        self.deliveries
            .lock()
            .map(|d| d.clone())
            .unwrap_or_default()
    }

    fn lock_users(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, User>>> {
        self.users
            .lock()
            .map_err(|e| DriplineError::StoreUnavailable(format!("Lock: {e}")))
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn find_candidates(&self, kind: EmailKind, window: Option<Window>) -> Result<Vec<User>> {
        let users = self.lock_users()?;
        Ok(users
            .values()
            .filter(|u| match (window, window_anchor(u, kind)) {
                (Some(w), Some(anchor)) => w.contains(anchor),
                _ => true,
            })
            .cloned()
            .collect())
    }

    async fn get_user(&self, user_id: &str) -> Result<Option<User>> {
        Ok(self.lock_users()?.get(user_id).cloned())
    }

    async fn set_email_flag(
        &self,
        user_id: &str,
        kind: EmailKind,
        expected: Option<DateTime<Utc>>,
        value: Option<DateTime<Utc>>,
    ) -> Result<FlagWrite> {
        let mut users = self.lock_users()?;
        let Some(user) = users.get_mut(user_id) else {
            return Ok(FlagWrite::Conflict);
        };
        if user.flag(kind) != expected {
            return Ok(FlagWrite::Conflict);
        }
        match value {
            Some(ts) => {
                user.email_flags.insert(kind.flag_key().to_string(), ts);
            }
            None => {
                user.email_flags.remove(kind.flag_key());
            }
        }
        Ok(FlagWrite::Written)
    }

    async fn set_unsubscribed(&self, user_id: &str, kind: Option<EmailKind>) -> Result<bool> {
        let mut users = self.lock_users()?;
        let Some(user) = users.get_mut(user_id) else {
            return Ok(false);
        };
        match kind {
            Some(k) => {
                user.preferences.unsubscribed_kinds.insert(k);
            }
            None => user.preferences.marketing_unsubscribed = true,
        }
        Ok(true)
    }

    async fn record_delivery(&self, entry: DeliveryLog) -> Result<()> {
        self.deliveries
            .lock()
            .map_err(|e| DriplineError::StoreUnavailable(format!("Lock: {e}")))?
            .push(entry);
        Ok(())
    }
}
