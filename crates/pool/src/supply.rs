//! Campaign supply — fills an enrollment request from the existing pool,
//! topping up through the enrichment waterfall when the pool runs dry.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use agency_core::error::AgencyResult;
use agency_core::types::{AssignOutcome, Campaign, IcpProfile};
use agency_store::AgencyStore;
use agency_enrichment::{EnrichmentInput, EnrichmentTier, EnrichmentWaterfall};

use crate::manager::PoolManager;

/// Where fresh prospect identifiers come from when the pool is exhausted.
/// Production: the list-building vendors; tests use the stub.
#[async_trait]
pub trait ProspectSource: Send + Sync {
    async fn candidates(&self, icp: &IcpProfile, n: usize) -> AgencyResult<Vec<EnrichmentInput>>;
}

/// Deterministic prospect source for development and tests.
pub struct StubProspectSource {
    pub domain_pool: Vec<String>,
}

#[async_trait]
impl ProspectSource for StubProspectSource {
    async fn candidates(&self, _icp: &IcpProfile, n: usize) -> AgencyResult<Vec<EnrichmentInput>> {
        Ok(self
            .domain_pool
            .iter()
            .take(n)
            .map(|domain| EnrichmentInput {
                email: Some(format!("contact@{domain}")),
                domain: Some(domain.clone()),
                linkedin_url: None,
            })
            .collect())
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct EnrollmentReport {
    pub requested: usize,
    pub assigned: usize,
    pub collisions: usize,
    pub suppressed: usize,
    pub enriched_new: usize,
}

pub struct Supplier {
    store: Arc<AgencyStore>,
    manager: Arc<PoolManager>,
    waterfall: Arc<EnrichmentWaterfall>,
    source: Arc<dyn ProspectSource>,
}

impl Supplier {
    pub fn new(
        store: Arc<AgencyStore>,
        manager: Arc<PoolManager>,
        waterfall: Arc<EnrichmentWaterfall>,
        source: Arc<dyn ProspectSource>,
    ) -> Self {
        Self {
            store,
            manager,
            waterfall,
            source,
        }
    }

    /// Enroll up to `n` leads into a campaign: existing unassigned pool
    /// leads matching the ICP first, then a waterfall top-up for the
    /// shortfall (respecting the client's enrichment budget).
    pub async fn enroll(&self, campaign: &Campaign, n: usize) -> AgencyResult<EnrollmentReport> {
        let mut report = EnrollmentReport {
            requested: n,
            ..EnrollmentReport::default()
        };

        let candidates = self.store.unassigned_leads(|lead| campaign.icp.matches(lead));
        for lead in candidates {
            if report.assigned >= n {
                break;
            }
            match self
                .manager
                .try_assign(campaign.client_id, lead.id, campaign.id, None)?
            {
                AssignOutcome::Assigned { .. } => report.assigned += 1,
                AssignOutcome::AlreadyYours { .. } => {}
                AssignOutcome::Collision { .. } => report.collisions += 1,
                AssignOutcome::Suppressed { .. } => report.suppressed += 1,
            }
        }

        // Pool exhausted: acquire more through the waterfall.
        if report.assigned < n {
            let shortfall = n - report.assigned;
            let inputs = self.source.candidates(&campaign.icp, shortfall * 2).await?;
            for input in inputs {
                if report.assigned >= n {
                    break;
                }
                let enriched = match self
                    .waterfall
                    .enrich(campaign.client_id, &input, EnrichmentTier::Bulk)
                    .await
                {
                    Ok(enriched) => enriched,
                    // Budget exhaustion ends the top-up, it does not fail
                    // the enrollment that already happened.
                    Err(e) if e.code() == "budget_exhausted" => break,
                    Err(e) => return Err(e),
                };
                let lead_id = self.store.upsert_pool_lead(enriched.lead);
                report.enriched_new += 1;
                match self
                    .manager
                    .try_assign(campaign.client_id, lead_id, campaign.id, None)?
                {
                    AssignOutcome::Assigned { .. } => report.assigned += 1,
                    AssignOutcome::AlreadyYours { .. } => {}
                    AssignOutcome::Collision { .. } => report.collisions += 1,
                    AssignOutcome::Suppressed { .. } => report.suppressed += 1,
                }
            }
        }

        info!(
            campaign_id = %campaign.id,
            requested = report.requested,
            assigned = report.assigned,
            enriched_new = report.enriched_new,
            "enrollment completed"
        );
        Ok(report)
    }
}
