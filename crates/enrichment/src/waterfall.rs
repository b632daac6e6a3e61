//! The tiered enrichment cascade: cache first, then providers from cheapest
//! to most expensive until the lead is sufficient, the tier ceiling is hit,
//! or the client's daily budget trips the circuit breaker.

use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

use agency_core::error::{AgencyError, AgencyResult};
use agency_core::types::PoolLead;
use agency_store::RateCounters;

use crate::cache::EnrichmentCache;
use crate::provider::{EnrichmentInput, EnrichmentProvider, EnrichmentTier};

/// Per-invocation cost record.
#[derive(Debug, Clone, Serialize)]
pub struct CostRecord {
    pub client_id: Uuid,
    pub provider: String,
    pub cost_aud: f64,
    pub credits: u32,
}

#[derive(Debug, Clone)]
pub struct EnrichedLead {
    pub lead: PoolLead,
    pub from_cache: bool,
    pub partial: bool,
    pub cost_aud: f64,
    pub providers_used: Vec<String>,
}

pub struct EnrichmentWaterfall {
    cache: EnrichmentCache,
    providers: Vec<Arc<dyn EnrichmentProvider>>,
    counters: Arc<RateCounters>,
    daily_budget_aud: f64,
    cost_log: Mutex<Vec<CostRecord>>,
}

impl EnrichmentWaterfall {
    pub fn new(
        cache: EnrichmentCache,
        providers: Vec<Arc<dyn EnrichmentProvider>>,
        counters: Arc<RateCounters>,
        daily_budget_aud: f64,
    ) -> Self {
        let mut providers = providers;
        providers.sort_by(|a, b| {
            a.tier()
                .cmp(&b.tier())
                .then(a.cost_aud().partial_cmp(&b.cost_aud()).unwrap_or(std::cmp::Ordering::Equal))
        });
        Self {
            cache,
            providers,
            counters,
            daily_budget_aud,
            cost_log: Mutex::new(Vec::new()),
        }
    }

    /// A lead is sufficient once it can be scored and sequenced.
    fn sufficient(lead: &PoolLead) -> bool {
        !lead.email.is_empty() && lead.title.is_some() && lead.company.is_some()
    }

    /// Run the cascade up to `ceiling`. Tier 0 (cache) always runs; paid
    /// tiers are refused once the day's spend reaches the client budget.
    pub async fn enrich(
        &self,
        client_id: Uuid,
        input: &EnrichmentInput,
        ceiling: EnrichmentTier,
    ) -> AgencyResult<EnrichedLead> {
        if input.is_empty() {
            return Err(AgencyError::Validation(
                "enrichment input needs at least one of email, domain, linkedin_url".into(),
            ));
        }

        // Tier 0: cache.
        let cached = self.cache.get(input);
        if let Some(record) = &cached {
            if !record.partial {
                debug!("enrichment cache hit (full)");
                return Ok(EnrichedLead {
                    lead: record.lead.clone(),
                    from_cache: true,
                    partial: false,
                    cost_aud: 0.0,
                    providers_used: vec![],
                });
            }
        }

        // Circuit breaker: paid tiers refuse until the next calendar day.
        let spent = self.counters.enrichment_spent_today(client_id, Utc::now());
        if spent >= self.daily_budget_aud {
            if let Some(record) = cached {
                // A partial cache entry is better than nothing.
                return Ok(EnrichedLead {
                    lead: record.lead.clone(),
                    from_cache: true,
                    partial: true,
                    cost_aud: 0.0,
                    providers_used: vec![],
                });
            }
            return Err(AgencyError::BudgetExhausted {
                scope: format!("enrichment daily budget ({spent:.2} AUD)"),
            });
        }

        let mut lead = match &cached {
            Some(record) => record.lead.clone(),
            None => {
                let seed = input
                    .email
                    .clone()
                    .unwrap_or_else(|| format!("unknown@{}", input.domain.as_deref().unwrap_or("unknown")));
                PoolLead::from_email(&seed)
            }
        };
        lead.linkedin_url = lead.linkedin_url.or_else(|| input.linkedin_url.clone());

        let mut cost = 0.0;
        let mut providers_used = Vec::new();

        for provider in &self.providers {
            if provider.tier() > ceiling {
                break;
            }
            if Self::sufficient(&lead) && provider.tier() > EnrichmentTier::Bulk {
                break;
            }
            let spent = self.counters.enrichment_spent_today(client_id, Utc::now());
            if spent + provider.cost_aud() > self.daily_budget_aud {
                info!(
                    provider = provider.name(),
                    spent, "enrichment budget circuit breaker tripped"
                );
                break;
            }

            let response = provider.enrich(input).await?;
            response.merge_into(&mut lead);
            lead.enrichment_source = Some(provider.name().to_string());

            if provider.cost_aud() > 0.0 {
                self.counters
                    .add_enrichment_spend(client_id, Utc::now(), provider.cost_aud());
                cost += provider.cost_aud();
            }
            self.cost_log.lock().push(CostRecord {
                client_id,
                provider: provider.name().to_string(),
                cost_aud: provider.cost_aud(),
                credits: 1,
            });
            providers_used.push(provider.name().to_string());
        }

        lead.enrichment_cost_aud += cost;
        lead.last_refreshed_at = Utc::now();
        let partial = !Self::sufficient(&lead);
        self.cache.put(input, lead.clone(), partial);

        info!(
            %client_id,
            providers = providers_used.len(),
            cost_aud = cost,
            partial,
            "enrichment waterfall completed"
        );

        Ok(EnrichedLead {
            lead,
            from_cache: false,
            partial,
            cost_aud: cost,
            providers_used,
        })
    }

    pub fn cost_log(&self) -> Vec<CostRecord> {
        self.cost_log.lock().clone()
    }
}
