//! API route handlers for the gateway.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use dripline_core::{DriplineError, EmailKind, KindSelection, RunRequest};
use serde::Deserialize;

use crate::auth::bearer_token;
use crate::server::AppState;

/// Error envelope: `{ok: false, error, code}` with a status per error kind.
pub struct ApiError(pub DriplineError);

impl From<DriplineError> for ApiError {
    fn from(e: DriplineError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            DriplineError::Auth(_) => StatusCode::UNAUTHORIZED,
            DriplineError::Configuration(_) => StatusCode::BAD_REQUEST,
            DriplineError::NotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!("❌ {}", self.0);
        }
        let body = serde_json::json!({
            "ok": false,
            "error": self.0.to_string(),
            "code": self.0.code(),
        });
        (status, Json(body)).into_response()
    }
}

type ApiResult = std::result::Result<Json<serde_json::Value>, ApiError>;

/// `true` / `1` switch dry-run on; anything else is a live run.
fn parse_flag(raw: Option<&str>) -> bool {
    matches!(raw.map(str::trim), Some("true") | Some("1"))
}

#[derive(Debug, Default, Deserialize)]
pub struct CronQuery {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    #[serde(rename = "dryRun")]
    pub dry_run: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TriggerQuery {
    #[serde(rename = "dryRun")]
    pub dry_run: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UnsubscribeQuery {
    pub uid: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub token: Option<String>,
}

/// Health check endpoint.
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "dripline-gateway",
        "version": env!("CARGO_PKG_VERSION"),
        "sender": state.dispatcher.sender_name(),
        "uptime_secs": state.start_time.elapsed().as_secs(),
    }))
}

/// Scheduler trigger: `GET|POST /api/cron/emails?type=&dryRun=`.
pub async fn cron_emails(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<CronQuery>,
) -> ApiResult {
    state.cron_auth.authorize(&headers)?;

    let raw_type = query.kind.as_deref().unwrap_or(&state.default_type);
    let kinds = KindSelection::parse_scheduled(raw_type)?;
    let request = RunRequest::new(kinds, parse_flag(query.dry_run.as_deref()));

    let result = state.dispatcher.clone().run_detached(request).await?;
    Ok(Json(serde_json::to_value(result).map_err(DriplineError::from)?))
}

/// Manual per-kind trigger: `POST /api/email/{kind}` with a user bearer token.
/// An optional JSON object body is passed through as template data; any
/// other JSON value is rejected.
pub async fn trigger_email(
    State(state): State<Arc<AppState>>,
    Path(kind): Path<String>,
    headers: HeaderMap,
    Query(query): Query<TriggerQuery>,
    body: Bytes,
) -> ApiResult {
    let kind: EmailKind = kind
        .parse()
        .map_err(|_| DriplineError::NotFound(format!("Unknown email type '{kind}'")))?;

    let verifier = state
        .verifier
        .as_ref()
        .ok_or_else(|| DriplineError::Auth("User authentication is not configured".into()))?;
    let token = bearer_token(&headers)
        .ok_or_else(|| DriplineError::Auth("Missing bearer token".into()))?;
    let user_id = verifier.verify(token)?;

    let extras = if body.iter().all(u8::is_ascii_whitespace) {
        None
    } else {
        let value: serde_json::Value = serde_json::from_slice(&body)
            .map_err(|e| DriplineError::Configuration(format!("Invalid JSON body: {e}")))?;
        Some(value)
    };

    let outcome = state
        .dispatcher
        .clone()
        .trigger_detached(kind, user_id, extras, parse_flag(query.dry_run.as_deref()))
        .await?;
    Ok(Json(serde_json::to_value(outcome).map_err(DriplineError::from)?))
}

/// One-click unsubscribe: `GET /api/email/unsubscribe?uid=&type=&token=`.
/// `type` omitted or `all` opts out of every marketing kind. The token must
/// be an unsubscribe token; access tokens are refused.
pub async fn unsubscribe(
    State(state): State<Arc<AppState>>,
    Query(query): Query<UnsubscribeQuery>,
) -> ApiResult {
    let verifier = state
        .verifier
        .as_ref()
        .ok_or_else(|| DriplineError::Auth("User authentication is not configured".into()))?;
    let (Some(uid), Some(token)) = (query.uid.as_deref(), query.token.as_deref()) else {
        return Err(DriplineError::Auth("Missing uid or token".into()).into());
    };
    if verifier.verify_unsubscribe(token)? != uid {
        return Err(DriplineError::Auth("Token does not match user".into()).into());
    }

    let kind = match query.kind.as_deref().map(str::trim) {
        None | Some("") | Some("all") => None,
        Some(raw) => Some(raw.parse::<EmailKind>()?),
    };
    let found = state
        .dispatcher
        .store()
        .set_unsubscribed(uid, kind)
        .await?;
    if !found {
        return Err(DriplineError::NotFound(format!("User '{uid}'")).into());
    }

    tracing::info!(
        "🔕 {} unsubscribed from {}",
        uid,
        kind.map(|k| k.slug()).unwrap_or("marketing")
    );
    Ok(Json(serde_json::json!({
        "ok": true,
        "userId": uid,
        "unsubscribed": kind.map(|k| k.slug()).unwrap_or("all"),
    })))
}
