//! Dripline configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{DriplineError, Result};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DriplineConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub cron: CronConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub postmark: PostmarkConfig,
    #[serde(default)]
    pub app: AppConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

impl DriplineConfig {
    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| DriplineError::Configuration(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| DriplineError::Configuration(format!("Failed to parse config: {e}")))?;
        Ok(config)
    }

    /// Write config to `path`, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| DriplineError::Configuration(format!("Failed to serialize config: {e}")))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Overlay secrets from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    /// Overlay secrets from any key lookup. Empty values are ignored.
    pub fn apply_env_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(secret) = get("CRON_SECRET") {
            self.cron.secret = Some(secret);
        }
        if let Some(token) = get("POSTMARK_SERVER_TOKEN") {
            self.postmark.server_token = token;
        }
        if let Some(from) = get("POSTMARK_FROM_EMAIL") {
            self.postmark.from_email = from;
        }
        if let Some(secret) = get("DRIPLINE_TOKEN_SECRET") {
            self.auth.token_secret = secret;
        }
        if let Some(url) = get("APP_BASE_URL") {
            self.app.base_url = url;
        }
        if let Some(admin) = get("ADMIN_NOTIFY_EMAIL") {
            self.app.admin_notify_email = Some(admin);
        }
    }

    /// Reject values the scheduler cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.dispatch.max_concurrency == 0 {
            return Err(DriplineError::Configuration(
                "dispatch.max_concurrency must be at least 1".into(),
            ));
        }
        if self.cron.secret.as_deref().is_some_and(|s| s.trim().is_empty()) {
            return Err(DriplineError::Configuration(
                "cron.secret is set but empty".into(),
            ));
        }
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the Dripline home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".dripline")
    }
}

fn bool_false() -> bool { false }

/// HTTP listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_host")]
    pub host: String,
}

fn default_port() -> u16 { 3000 }
fn default_host() -> String { "127.0.0.1".into() }

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
        }
    }
}

/// Scheduler trigger configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CronConfig {
    /// Shared bearer secret for `/api/cron/emails`.
    #[serde(default)]
    pub secret: Option<String>,
    /// Allow unauthenticated cron calls when no secret is configured.
    #[serde(default = "bool_false")]
    pub insecure_mode: bool,
    /// 5-field cron expression for the in-process periodic run.
    #[serde(default)]
    pub schedule: Option<String>,
    #[serde(default = "default_cron_type")]
    pub default_type: String,
}

fn default_cron_type() -> String { "all".into() }

impl Default for CronConfig {
    fn default() -> Self {
        Self {
            secret: None,
            insecure_mode: false,
            schedule: None,
            default_type: default_cron_type(),
        }
    }
}

/// Dispatch worker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Max in-flight sends per run.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
}

fn default_max_concurrency() -> usize { 4 }

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
        }
    }
}

/// Postmark delivery settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostmarkConfig {
    #[serde(default)]
    pub server_token: String,
    #[serde(default)]
    pub from_email: String,
    #[serde(default)]
    pub reply_to: Option<String>,
    #[serde(default = "default_message_stream")]
    pub message_stream: String,
    #[serde(default = "default_postmark_api")]
    pub api_url: String,
}

fn default_message_stream() -> String { "outbound".into() }
fn default_postmark_api() -> String { "https://api.postmarkapp.com".into() }

impl Default for PostmarkConfig {
    fn default() -> Self {
        Self {
            server_token: String::new(),
            from_email: String::new(),
            reply_to: None,
            message_stream: default_message_stream(),
            api_url: default_postmark_api(),
        }
    }
}

/// Application links and addresses used in template data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub admin_notify_email: Option<String>,
}

fn default_base_url() -> String { "https://verifiedsoundar.com".into() }

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            admin_notify_email: None,
        }
    }
}

/// User token verification.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub token_secret: String,
}

/// User store location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_path")]
    pub path: String,
}

fn default_store_path() -> String { "~/.dripline/users.db".into() }

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = DriplineConfig::default();
        assert_eq!(config.gateway.port, 3000);
        assert!(!config.cron.insecure_mode);
        assert!(config.cron.secret.is_none());
        assert_eq!(config.cron.default_type, "all");
        assert_eq!(config.dispatch.max_concurrency, 4);
        assert_eq!(config.postmark.message_stream, "outbound");
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            [cron]
            secret = "s3cret"
            schedule = "0 9 * * *"

            [dispatch]
            max_concurrency = 8

            [app]
            base_url = "https://example.test"
        "#;

        let config: DriplineConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.cron.secret.as_deref(), Some("s3cret"));
        assert_eq!(config.cron.schedule.as_deref(), Some("0 9 * * *"));
        assert_eq!(config.dispatch.max_concurrency, 8);
        assert_eq!(config.app.base_url, "https://example.test");
        assert!(!config.cron.insecure_mode);
    }

    #[test]
    fn test_config_missing_fields_use_defaults() {
        let config: DriplineConfig = toml::from_str("").unwrap();
        assert_eq!(config.gateway.host, "127.0.0.1");
        assert_eq!(config.store.path, "~/.dripline/users.db");
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("CRON_SECRET", "from-env"),
            ("POSTMARK_SERVER_TOKEN", "pm-token"),
            ("DRIPLINE_TOKEN_SECRET", ""),
        ]);
        let mut config = DriplineConfig::default();
        config.auth.token_secret = "keep".into();
        config.apply_env_from(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(config.cron.secret.as_deref(), Some("from-env"));
        assert_eq!(config.postmark.server_token, "pm-token");
        assert_eq!(config.auth.token_secret, "keep");
    }

    #[test]
    fn test_validate_rejects_zero_concurrency() {
        let mut config = DriplineConfig::default();
        config.dispatch.max_concurrency = 0;
        assert!(matches!(
            config.validate(),
            Err(DriplineError::Configuration(_))
        ));
    }

    #[test]
    fn test_save_and_reload() {
        let dir = std::env::temp_dir().join("dripline-test-config");
        let path = dir.join("config.toml");
        let mut config = DriplineConfig::default();
        config.cron.secret = Some("abc".into());
        config.save_to(&path).unwrap();
        let loaded = DriplineConfig::load_from(&path).unwrap();
        assert_eq!(loaded.cron.secret.as_deref(), Some("abc"));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_home_dir() {
        let home = DriplineConfig::home_dir();
        assert!(home.to_string_lossy().contains("dripline"));
    }
}
