//! # Dripline Gateway
//!
//! HTTP trigger surface for the scheduler:
//! - `GET|POST /api/cron/emails`: scheduled runs (shared cron secret)
//! - `POST /api/email/{kind}`: single-user trigger (user bearer token)
//! - `GET /api/email/unsubscribe`: opt-out links (user token in the query)
//! - `GET /health`

pub mod auth;
pub mod routes;
pub mod server;

pub use auth::{CronAuth, HmacTokenVerifier, TokenVerifier};
pub use server::{AppState, build_router, start};
