//! Router assembly for the tenant API and webhook receivers.

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::rest::{self, AppState};
use crate::webhooks;

/// Build the full HTTP router.
pub fn build_router(state: AppState) -> Router {
    let router = Router::new()
        // Tenant surface
        .route("/campaigns", post(rest::create_campaign))
        .route("/campaigns/:id/activate", post(rest::activate_campaign))
        .route("/campaigns/:id/pause", post(rest::pause_campaign))
        .route("/leads", get(rest::list_leads))
        .route("/leads/:id", get(rest::get_lead))
        .route("/leads/:id/activities", get(rest::lead_activities))
        .route("/suppression", post(rest::add_suppression))
        .route("/customers/import", post(rest::import_customers))
        .route("/reports/dashboard", get(rest::dashboard))
        // Webhook receivers
        .route("/webhooks/email", post(webhooks::email_webhook))
        .route("/webhooks/sms", post(webhooks::sms_webhook))
        .route("/webhooks/linkedin", post(webhooks::linkedin_webhook))
        .route("/webhooks/voice", post(webhooks::voice_webhook))
        // Probes
        .route("/health", get(rest::health_check))
        .route("/ready", get(rest::readiness))
        .route("/live", get(rest::liveness))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    info!("API router assembled");
    router
}
