//! HTTP server implementation using Axum.

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};
use dripline_core::config::GatewayConfig;
use dripline_core::DriplineConfig;
use dripline_scheduler::Dispatcher;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::auth::{CronAuth, HmacTokenVerifier, TokenVerifier};

/// Shared state for the gateway server.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    pub cron_auth: CronAuth,
    /// Absent when no token secret is configured; manual triggers then answer 401.
    pub verifier: Option<Arc<dyn TokenVerifier>>,
    /// `type` used when the cron caller omits it.
    pub default_type: String,
    pub start_time: std::time::Instant,
}

impl AppState {
    pub fn new(dispatcher: Arc<Dispatcher>, config: &DriplineConfig) -> Self {
        let verifier: Option<Arc<dyn TokenVerifier>> =
            match HmacTokenVerifier::new(&config.auth.token_secret) {
                Ok(v) => Some(Arc::new(v)),
                Err(_) => {
                    tracing::warn!("⚠️ auth.token_secret not set; manual triggers are disabled");
                    None
                }
            };
        Self {
            dispatcher,
            cron_auth: CronAuth::from_config(&config.cron),
            verifier,
            default_type: config.cron.default_type.clone(),
            start_time: std::time::Instant::now(),
        }
    }
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    let shared = Arc::new(state);

    Router::new()
        .route("/health", get(crate::routes::health_check))
        .route(
            "/api/cron/emails",
            get(crate::routes::cron_emails).post(crate::routes::cron_emails),
        )
        .route("/api/email/unsubscribe", get(crate::routes::unsubscribe))
        .route("/api/email/{kind}", post(crate::routes::trigger_email))
        .layer(
            CorsLayer::new()
                .allow_methods([
                    axum::http::Method::GET,
                    axum::http::Method::POST,
                    axum::http::Method::OPTIONS,
                ])
                .allow_headers(Any)
                .allow_origin(Any)
                .max_age(std::time::Duration::from_secs(3600)),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(shared)
}

/// Start the HTTP server.
pub async fn start(config: &GatewayConfig, state: AppState) -> anyhow::Result<()> {
    let app = build_router(state);
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("🌐 Gateway server listening on http://{}", addr);

    axum::serve(listener, app).await?;
    Ok(())
}
