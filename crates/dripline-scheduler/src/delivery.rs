//! Outbound delivery: the `EmailSender` seam plus the Postmark and log backends.

use async_trait::async_trait;
use dripline_core::config::PostmarkConfig;
use dripline_core::{DriplineError, EmailKind, Result};
use serde::{Deserialize, Serialize};

/// A fully resolved message. The template alias is opaque to the scheduler.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutboundEmail {
    pub user_id: String,
    pub to: String,
    pub kind: EmailKind,
    pub template_alias: String,
    pub model: serde_json::Value,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendReceipt {
    pub message_id: Option<String>,
}

/// Email delivery backend.
#[async_trait]
pub trait EmailSender: Send + Sync {
    fn name(&self) -> &str;

    /// Deliver one message. Errors are per-user and never abort a run.
    async fn send(&self, email: &OutboundEmail) -> Result<SendReceipt>;
}

/// Logs instead of sending. Used when no provider token is configured.
#[derive(Debug, Default)]
pub struct LogSender;

#[async_trait]
impl EmailSender for LogSender {
    fn name(&self) -> &str {
        "log"
    }

    async fn send(&self, email: &OutboundEmail) -> Result<SendReceipt> {
        tracing::info!(
            "📨 [log] {} → {} ({})",
            email.template_alias,
            email.to,
            email.user_id
        );
        Ok(SendReceipt {
            message_id: Some(format!("log-{}-{}", email.kind.slug(), email.user_id)),
        })
    }
}

/// Postmark `email/withTemplate` API.
pub struct PostmarkSender {
    client: reqwest::Client,
    config: PostmarkConfig,
}

#[derive(Debug, Deserialize)]
struct PostmarkResponse {
    #[serde(rename = "MessageID", default)]
    message_id: Option<String>,
    #[serde(rename = "ErrorCode", default)]
    error_code: i64,
    #[serde(rename = "Message", default)]
    message: String,
}

impl PostmarkSender {
    pub fn new(config: PostmarkConfig) -> Result<Self> {
        if config.server_token.trim().is_empty() {
            return Err(DriplineError::Configuration(
                "postmark.server_token is required".into(),
            ));
        }
        if config.from_email.trim().is_empty() {
            return Err(DriplineError::Configuration(
                "postmark.from_email is required".into(),
            ));
        }
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .map_err(|e| DriplineError::Configuration(format!("HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    fn payload(&self, email: &OutboundEmail) -> serde_json::Value {
        let mut body = serde_json::json!({
            "From": self.config.from_email,
            "To": email.to,
            "TemplateAlias": email.template_alias,
            "TemplateModel": email.model,
            "MessageStream": self.config.message_stream,
            "Tag": email.kind.slug(),
            "Metadata": { "userId": email.user_id },
        });
        if let Some(reply_to) = &self.config.reply_to {
            body["ReplyTo"] = serde_json::json!(reply_to);
        }
        body
    }
}

#[async_trait]
impl EmailSender for PostmarkSender {
    fn name(&self) -> &str {
        "postmark"
    }

    async fn send(&self, email: &OutboundEmail) -> Result<SendReceipt> {
        let url = format!(
            "{}/email/withTemplate",
            self.config.api_url.trim_end_matches('/')
        );
        let resp = self
            .client
            .post(&url)
            .header("Accept", "application/json")
            .header("X-Postmark-Server-Token", &self.config.server_token)
            .json(&self.payload(email))
            .send()
            .await
            .map_err(|e| DriplineError::SendFailure(format!("Postmark send failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(DriplineError::SendFailure(format!(
                "Postmark API error {status}: {body}"
            )));
        }

        let parsed: PostmarkResponse = resp
            .json()
            .await
            .map_err(|e| DriplineError::SendFailure(format!("Postmark response: {e}")))?;
        if parsed.error_code != 0 {
            return Err(DriplineError::SendFailure(format!(
                "Postmark error {}: {}",
                parsed.error_code, parsed.message
            )));
        }

        tracing::info!("✅ Postmark sent {} to {}", email.template_alias, email.to);
        Ok(SendReceipt {
            message_id: parsed.message_id,
        })
    }
}
