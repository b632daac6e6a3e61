//! Inbound webhook receivers — one endpoint per provider family.
//!
//! Failure semantics: a malformed or signature-invalid payload returns 4xx
//! (the provider will not retry); a transient ingest failure returns 5xx
//! (the provider retries per its policy). Downstream dedupe makes the
//! at-least-once delivery effectively exactly-once.

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use tracing::{error, warn};

use agency_core::error::AgencyError;
use agency_core::types::Channel;
use agency_channels::RawWebhook;
use agency_replies::IngestReport;

use crate::rest::AppState;

fn raw_webhook(headers: &HeaderMap, body: String) -> RawWebhook {
    let signature = headers
        .get("x-signature")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    RawWebhook { body, signature }
}

async fn receive(
    state: AppState,
    channel: Channel,
    headers: HeaderMap,
    body: String,
) -> Result<Json<IngestReport>, StatusCode> {
    let adapter = state
        .adapters
        .get(&channel)
        .ok_or(StatusCode::NOT_FOUND)?
        .clone();

    let events = match adapter.parse_webhook(&raw_webhook(&headers, body)) {
        Ok(events) => events,
        Err(AgencyError::Validation(message)) => {
            warn!(%channel, %message, "webhook rejected");
            return Err(StatusCode::BAD_REQUEST);
        }
        Err(e) => {
            error!(%channel, error = %e, "webhook parse failed");
            return Err(StatusCode::INTERNAL_SERVER_ERROR);
        }
    };

    match state.ingestor.ingest(events).await {
        Ok(report) => {
            metrics::counter!("webhooks.received", "channel" => channel.as_str()).increment(1);
            Ok(Json(report))
        }
        Err(e) => {
            // Transient: let the provider retry.
            error!(%channel, error = %e, "webhook ingest failed");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// POST /webhooks/email
pub async fn email_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<IngestReport>, StatusCode> {
    receive(state, Channel::Email, headers, body).await
}

/// POST /webhooks/sms
pub async fn sms_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<IngestReport>, StatusCode> {
    receive(state, Channel::Sms, headers, body).await
}

/// POST /webhooks/linkedin
pub async fn linkedin_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<IngestReport>, StatusCode> {
    receive(state, Channel::Linkedin, headers, body).await
}

/// POST /webhooks/voice
pub async fn voice_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<IngestReport>, StatusCode> {
    receive(state, Channel::Voice, headers, body).await
}
