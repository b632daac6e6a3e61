//! REST API handlers for the tenant surface.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use uuid::Uuid;

use agency_core::config::AppConfig;
use agency_core::error::AgencyError;
use agency_core::types::{
    Activity, AlsTier, AssignOutcome, BuyerSignal, Campaign, CampaignStatus, Channel,
    ChannelAllocation, LeadStatus, LeadView, PermissionMode, SequenceStep,
};
use agency_channels::ChannelAdapter;
use agency_dispatch::orchestrator::materialize_schedule;
use agency_enrichment::{EnrichmentInput, EnrichmentTier, EnrichmentWaterfall};
use agency_pool::{PoolManager, Supplier};
use agency_replies::ReplyIngestor;
use agency_scoring::{Allocator, RiskFlags, Scorer};
use agency_store::{AgencyStore, CancelScope, LeadFilter, RateCounters, TouchQueue};
use agency_suppression::{SuppressionIndex, SuppressionReason, SuppressionTarget};

/// Shared application state for all handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<AgencyStore>,
    pub queue: Arc<TouchQueue>,
    pub counters: Arc<RateCounters>,
    pub suppression: Arc<SuppressionIndex>,
    pub pool: Arc<PoolManager>,
    pub supplier: Arc<Supplier>,
    pub waterfall: Arc<EnrichmentWaterfall>,
    pub ingestor: Arc<ReplyIngestor>,
    pub adapters: HashMap<Channel, Arc<dyn ChannelAdapter>>,
    pub scorer: Arc<Scorer>,
    pub config: Arc<AppConfig>,
    /// Bearer token -> (user, client). Production: session service.
    pub tokens: Arc<dashmap::DashMap<String, (String, Uuid)>>,
    pub start_time: Instant,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

pub type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, error: &str, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
            message: message.into(),
        }),
    )
}

fn map_err(e: AgencyError) -> ApiError {
    let status = match &e {
        AgencyError::Validation(_) => StatusCode::BAD_REQUEST,
        AgencyError::NotFound(_) => StatusCode::NOT_FOUND,
        AgencyError::Suppressed { .. } => StatusCode::CONFLICT,
        AgencyError::Collision { .. } => StatusCode::CONFLICT,
        AgencyError::BudgetExhausted { .. } => StatusCode::PAYMENT_REQUIRED,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    api_error(status, e.code(), e.to_string())
}

/// Resolve the bearer token to an authenticated (user, client) pair.
pub fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<(String, Uuid), ApiError> {
    let token = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(|| api_error(StatusCode::UNAUTHORIZED, "unauthorized", "missing bearer token"))?;
    state
        .tokens
        .get(token)
        .map(|entry| entry.clone())
        .ok_or_else(|| api_error(StatusCode::UNAUTHORIZED, "unauthorized", "unknown token"))
}

// ─── Campaigns ──────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CreateCampaignRequest {
    pub name: String,
    pub allocation_pct: ChannelAllocation,
    pub daily_cap: u32,
    pub permission_mode: PermissionMode,
    #[serde(default)]
    pub sequence: Vec<SequenceStep>,
}

/// POST /campaigns
pub async fn create_campaign(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CreateCampaignRequest>,
) -> Result<Json<Campaign>, ApiError> {
    let (_user, client_id) = authenticate(&state, &headers)?;
    if !req.allocation_pct.is_valid() {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "validation",
            format!(
                "allocation percentages sum to {}, expected 100",
                req.allocation_pct.sum()
            ),
        ));
    }

    let tenant = state
        .store
        .get_tenant(client_id)
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "not_found", "tenant not found"))?;

    let now = Utc::now();
    let campaign = Campaign {
        id: Uuid::new_v4(),
        client_id,
        name: req.name,
        status: CampaignStatus::Draft,
        allocation: req.allocation_pct,
        daily_cap: req.daily_cap,
        permission_mode: req.permission_mode,
        sequence: if req.sequence.is_empty() {
            Allocator::default_sequence()
        } else {
            req.sequence
        },
        icp: tenant.policy.icp.clone(),
        created_at: now,
        updated_at: now,
    };
    state.store.upsert_campaign(campaign.clone()).map_err(map_err)?;
    info!(campaign_id = %campaign.id, %client_id, "campaign created");
    Ok(Json(campaign))
}

#[derive(Debug, Deserialize)]
pub struct ActivateRequest {
    /// How many leads to enroll. Defaults to the campaign's daily cap.
    pub enroll: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct ActivateResponse {
    pub campaign_id: Uuid,
    pub enrolled: usize,
    pub touches_scheduled: usize,
}

/// POST /campaigns/{id}/activate — enroll leads and start dispatch.
pub async fn activate_campaign(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(campaign_id): Path<Uuid>,
    Json(req): Json<ActivateRequest>,
) -> Result<Json<ActivateResponse>, ApiError> {
    let (_user, client_id) = authenticate(&state, &headers)?;
    let mut campaign = state
        .store
        .get_campaign(campaign_id)
        .filter(|c| c.client_id == client_id)
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "not_found", "campaign not found"))?;

    campaign.status = CampaignStatus::Active;
    campaign.updated_at = Utc::now();
    state.store.upsert_campaign(campaign.clone()).map_err(map_err)?;
    state.store.clear_cancelled(CancelScope::Campaign(campaign_id));

    let tenant = state
        .store
        .get_tenant(client_id)
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "not_found", "tenant not found"))?;

    let n = req.enroll.unwrap_or(campaign.daily_cap as usize).max(1);
    let report = state
        .supplier
        .enroll(&campaign, n)
        .await
        .map_err(map_err)?;

    // Score each enrolled lead and materialize its touch schedule.
    let mut touches_scheduled = 0usize;
    let views = state.store.list_lead_views(
        client_id,
        &LeadFilter {
            campaign_id: Some(campaign_id),
            status: Some(LeadStatus::New),
            page_size: 100_000,
            ..LeadFilter::default()
        },
    );
    for view in views {
        let Some(mut lead) = state.store.get_pool_lead(view.pool_lead_id) else {
            continue;
        };
        let buyer = state.store.buyer_signal(&lead.domain);
        let scored = match state.scorer.score(
            &lead,
            &tenant.policy.icp,
            RiskFlags::default(),
            buyer.as_ref(),
            &tenant.policy.als_weights,
        ) {
            Ok(s) => s,
            Err(e) => {
                error!(error = %e, "scoring failed");
                continue;
            }
        };
        state
            .store
            .update_lead_view(client_id, view.pool_lead_id, |v| {
                v.als_score = scored.score;
                v.als_tier = scored.tier;
                v.components = scored.components;
                v.status = LeadStatus::Scored;
            })
            .map_err(map_err)?;

        // Warm/hot leads are worth a deeper enrichment pass before their
        // sequence starts (premium contact reveal is hot-only).
        let ceiling = EnrichmentTier::ceiling_for(scored.tier);
        if ceiling > EnrichmentTier::Bulk && (lead.phone.is_none() || lead.linkedin_url.is_none())
        {
            match state
                .waterfall
                .enrich(client_id, &EnrichmentInput::from_email(&lead.email), ceiling)
                .await
            {
                Ok(enriched) => {
                    state.store.upsert_pool_lead(enriched.lead.clone());
                    lead = enriched.lead;
                }
                Err(e) => {
                    // Budget exhaustion downgrades to the data we have.
                    info!(error = %e, "enrichment deepening skipped");
                }
            }
        }

        let schedule = Allocator::allocate(
            client_id,
            scored.tier,
            &lead.signals,
            lead.employee_count,
            lead.industry.as_deref(),
            &tenant.policy,
            &campaign.sequence,
            &state.counters,
            Utc::now(),
        );
        let touches = materialize_schedule(
            client_id,
            campaign_id,
            view.pool_lead_id,
            &schedule,
            Utc::now(),
        );
        touches_scheduled += touches.len();
        state.queue.push_many(touches);
    }

    info!(
        %campaign_id,
        enrolled = report.assigned,
        touches_scheduled,
        "campaign activated"
    );
    Ok(Json(ActivateResponse {
        campaign_id,
        enrolled: report.assigned,
        touches_scheduled,
    }))
}

/// POST /campaigns/{id}/pause — set the cancellation flag.
pub async fn pause_campaign(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(campaign_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let (_user, client_id) = authenticate(&state, &headers)?;
    let mut campaign = state
        .store
        .get_campaign(campaign_id)
        .filter(|c| c.client_id == client_id)
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "not_found", "campaign not found"))?;

    campaign.status = CampaignStatus::Paused;
    campaign.updated_at = Utc::now();
    state.store.upsert_campaign(campaign).map_err(map_err)?;
    state.store.set_cancelled(CancelScope::Campaign(campaign_id));
    Ok(StatusCode::NO_CONTENT)
}

// ─── Leads ──────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct LeadQuery {
    pub campaign: Option<Uuid>,
    pub tier: Option<AlsTier>,
    pub status: Option<LeadStatus>,
    #[serde(default)]
    pub page: usize,
}

/// GET /leads — paginated lead-view list.
pub async fn list_leads(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<LeadQuery>,
) -> Result<Json<Vec<LeadView>>, ApiError> {
    let (_user, client_id) = authenticate(&state, &headers)?;
    let views = state.store.list_lead_views(
        client_id,
        &LeadFilter {
            campaign_id: query.campaign,
            tier: query.tier,
            status: query.status,
            page: query.page,
            page_size: 50,
        },
    );
    Ok(Json(views))
}

#[derive(Debug, Serialize)]
pub struct LeadDetail {
    pub view: LeadView,
    pub email: String,
    pub company: Option<String>,
    pub title: Option<String>,
}

/// GET /leads/{id} — lead detail.
pub async fn get_lead(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(view_id): Path<Uuid>,
) -> Result<Json<LeadDetail>, ApiError> {
    let (_user, client_id) = authenticate(&state, &headers)?;
    let view = state
        .store
        .get_lead_view_by_id(view_id)
        .filter(|v| v.client_id == client_id)
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "not_found", "lead not found"))?;
    let lead = state
        .store
        .get_pool_lead(view.pool_lead_id)
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "not_found", "pool lead missing"))?;
    Ok(Json(LeadDetail {
        email: lead.email,
        company: lead.company,
        title: lead.title,
        view,
    }))
}

/// GET /leads/{id}/activities — lead timeline.
pub async fn lead_activities(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(view_id): Path<Uuid>,
) -> Result<Json<Vec<Activity>>, ApiError> {
    let (_user, client_id) = authenticate(&state, &headers)?;
    let view = state
        .store
        .get_lead_view_by_id(view_id)
        .filter(|v| v.client_id == client_id)
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "not_found", "lead not found"))?;
    Ok(Json(
        state.store.activities_for_lead(client_id, view.pool_lead_id),
    ))
}

// ─── Suppression & customers ────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct SuppressionRequest {
    pub email: Option<String>,
    pub domain: Option<String>,
    pub reason: SuppressionReason,
}

/// POST /suppression — add a tenant-scoped entry.
pub async fn add_suppression(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<SuppressionRequest>,
) -> Result<StatusCode, ApiError> {
    let (_user, client_id) = authenticate(&state, &headers)?;
    let target = match (&req.email, &req.domain) {
        (Some(email), _) => SuppressionTarget::email(email),
        (None, Some(domain)) => SuppressionTarget::domain(domain),
        (None, None) => {
            return Err(api_error(
                StatusCode::BAD_REQUEST,
                "validation",
                "one of email or domain is required",
            ))
        }
    };
    state
        .suppression
        .add(Some(client_id), target, req.reason, "api", None, None);
    Ok(StatusCode::CREATED)
}

#[derive(Debug, Deserialize)]
pub struct CustomerImportRequest {
    pub customers: Vec<CustomerRecord>,
}

#[derive(Debug, Deserialize)]
pub struct CustomerRecord {
    pub email: Option<String>,
    pub domain: Option<String>,
    pub customer_id: Option<String>,
    #[serde(default)]
    pub value: f64,
    #[serde(default)]
    pub services: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct ImportResponse {
    pub suppressed: usize,
    pub buyer_signals: usize,
}

/// POST /customers/import — bulk customer ingest: suppression entries plus
/// anonymized buyer signals.
pub async fn import_customers(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CustomerImportRequest>,
) -> Result<Json<ImportResponse>, ApiError> {
    let (_user, client_id) = authenticate(&state, &headers)?;

    let mut entries = Vec::new();
    let mut buyer_signals = 0usize;
    for customer in &req.customers {
        let target = match (&customer.email, &customer.domain) {
            (Some(email), _) => SuppressionTarget::email(email),
            (None, Some(domain)) => SuppressionTarget::domain(domain),
            (None, None) => continue,
        };
        entries.push((
            target,
            SuppressionReason::ExistingCustomer,
            customer.customer_id.clone(),
        ));

        let domain = customer.domain.clone().or_else(|| {
            customer
                .email
                .as_deref()
                .and_then(|e| e.split('@').nth(1).map(str::to_lowercase))
        });
        if let Some(domain) = domain {
            let existing = state.store.buyer_signal(&domain);
            let times_bought = existing.as_ref().map(|s| s.times_bought).unwrap_or(0) + 1;
            let avg_value = match &existing {
                Some(s) => (s.avg_value * f64::from(s.times_bought) + customer.value)
                    / f64::from(times_bought),
                None => customer.value,
            };
            let mut services = existing
                .map(|s| s.services_bought)
                .unwrap_or_default();
            for service in &customer.services {
                if !services.contains(service) {
                    services.push(service.clone());
                }
            }
            let buyer_score = (times_bought * 25).min(100) as u8;
            state.store.upsert_buyer_signal(BuyerSignal {
                domain,
                times_bought,
                avg_value,
                services_bought: services,
                buyer_score,
            });
            buyer_signals += 1;
        }
    }

    let suppressed = state.suppression.import(client_id, entries);
    Ok(Json(ImportResponse {
        suppressed,
        buyer_signals,
    }))
}

// ─── Reports & health ───────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct DashboardSnapshot {
    pub sent: usize,
    pub replied: usize,
    pub converted_leads: usize,
    pub queue: agency_store::queue::QueueSnapshot,
    pub rate_usage: Vec<agency_store::counters::ResourceUsage>,
}

/// GET /reports/dashboard — KPI snapshot.
pub async fn dashboard(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<DashboardSnapshot>, ApiError> {
    let (_user, client_id) = authenticate(&state, &headers)?;

    let mut sent = 0usize;
    let mut replied = 0usize;
    let mut converted = std::collections::HashSet::new();
    state.store.scan_activities(client_id, |a| {
        match a.action {
            agency_core::types::ActivityAction::Sent => sent += 1,
            agency_core::types::ActivityAction::Replied => replied += 1,
            _ => {}
        }
        if a.led_to_booking {
            converted.insert(a.pool_lead_id);
        }
    });

    Ok(Json(DashboardSnapshot {
        sent,
        replied,
        converted_leads: converted.len(),
        queue: state.queue.snapshot(),
        rate_usage: state.counters.usage_snapshot(),
    }))
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub node_id: String,
    pub uptime_secs: u64,
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        node_id: state.config.node_id.clone(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}

/// GET /ready
pub async fn readiness() -> StatusCode {
    StatusCode::OK
}

/// GET /live
pub async fn liveness() -> StatusCode {
    StatusCode::OK
}

// ─── Operator helpers (CLI surface) ─────────────────────────────────────────

/// Enroll-assignment summary used by the `enrich` CLI command.
pub async fn force_top_up(
    state: &AppState,
    client_id: Uuid,
    n: usize,
) -> Result<agency_pool::EnrollmentReport, AgencyError> {
    let campaign = state
        .store
        .list_campaigns(client_id)
        .into_iter()
        .find(|c| c.status == CampaignStatus::Active)
        .ok_or_else(|| AgencyError::NotFound("no active campaign".into()))?;
    state.supplier.enroll(&campaign, n).await
}

/// Inject a synthetic inbound reply for an activity (the `simulate-reply`
/// CLI command and E2E tests).
pub async fn simulate_reply(
    state: &AppState,
    activity_id: Uuid,
    body: &str,
) -> Result<(), AgencyError> {
    let activity = state
        .store
        .get_activity(activity_id)
        .ok_or_else(|| AgencyError::NotFound(format!("activity {activity_id}")))?;
    let pmid = activity
        .provider_message_id
        .clone()
        .ok_or_else(|| AgencyError::Validation("activity has no provider message id".into()))?;

    state
        .ingestor
        .ingest(vec![agency_channels::ProviderEvent {
            provider_event_id: format!("sim-{}", Uuid::new_v4()),
            provider_message_id: pmid,
            kind: agency_channels::ProviderEventKind::InboundMessage {
                body: body.to_string(),
            },
            occurred_at: Utc::now(),
        }])
        .await?;
    Ok(())
}

/// Used by the collision E2E scenario and admin tooling.
pub fn assign_outcome_label(outcome: &AssignOutcome) -> &'static str {
    match outcome {
        AssignOutcome::Assigned { .. } => "assigned",
        AssignOutcome::AlreadyYours { .. } => "already_yours",
        AssignOutcome::Collision { .. } => "collision",
        AssignOutcome::Suppressed { .. } => "suppressed",
    }
}
