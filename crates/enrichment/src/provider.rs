//! Enrichment provider contracts and the built-in stub providers.
//!
//! Each provider normalizes its response into the canonical pool-lead shape
//! before the waterfall merges it. Real deployments swap the stubs for HTTP
//! clients behind the same trait.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use agency_core::error::AgencyResult;
use agency_core::types::{AlsTier, LeadSignals, PoolLead};

/// Provider cost tier. Tier 0 is the cache and never reaches a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrichmentTier {
    Cache,
    Bulk,
    Waterfall,
    Premium,
}

impl EnrichmentTier {
    /// Deepest tier worth paying for at a given lead temperature.
    pub fn ceiling_for(tier: AlsTier) -> Self {
        match tier {
            AlsTier::Hot => EnrichmentTier::Premium,
            AlsTier::Warm => EnrichmentTier::Waterfall,
            _ => EnrichmentTier::Bulk,
        }
    }
}

/// A partial pool lead: at least one of email, domain, linkedin_url.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnrichmentInput {
    pub email: Option<String>,
    pub domain: Option<String>,
    pub linkedin_url: Option<String>,
}

impl EnrichmentInput {
    pub fn from_email(email: &str) -> Self {
        Self {
            email: Some(email.trim().to_lowercase()),
            domain: email.split('@').nth(1).map(|d| d.to_lowercase()),
            linkedin_url: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.email.is_none() && self.domain.is_none() && self.linkedin_url.is_none()
    }

    /// Stable fingerprint for the cache key.
    pub fn fingerprint(&self) -> String {
        format!(
            "{}|{}|{}",
            self.email.as_deref().unwrap_or(""),
            self.domain.as_deref().unwrap_or(""),
            self.linkedin_url.as_deref().unwrap_or("")
        )
    }
}

/// Normalized fields returned by one provider call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderResponse {
    pub email: Option<String>,
    pub email_verified: bool,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub title: Option<String>,
    pub company: Option<String>,
    pub linkedin_url: Option<String>,
    pub phone: Option<String>,
    pub industry: Option<String>,
    pub employee_count: Option<u32>,
    pub country: Option<String>,
    pub revenue_band: Option<String>,
    pub signals: Option<LeadSignals>,
}

impl ProviderResponse {
    /// Merge this response into a lead, filling only missing fields.
    pub fn merge_into(&self, lead: &mut PoolLead) {
        if lead.email.is_empty() {
            if let Some(email) = &self.email {
                lead.email = email.to_lowercase();
                lead.domain = email.split('@').nth(1).unwrap_or_default().to_lowercase();
            }
        }
        lead.email_verified |= self.email_verified;
        merge(&mut lead.first_name, &self.first_name);
        merge(&mut lead.last_name, &self.last_name);
        merge(&mut lead.title, &self.title);
        merge(&mut lead.company, &self.company);
        merge(&mut lead.linkedin_url, &self.linkedin_url);
        merge(&mut lead.phone, &self.phone);
        merge(&mut lead.industry, &self.industry);
        merge(&mut lead.country, &self.country);
        merge(&mut lead.revenue_band, &self.revenue_band);
        if lead.employee_count.is_none() {
            lead.employee_count = self.employee_count;
        }
        if let Some(signals) = &self.signals {
            lead.signals = signals.clone();
        }
    }
}

fn merge(slot: &mut Option<String>, value: &Option<String>) {
    if slot.is_none() {
        *slot = value.clone();
    }
}

/// One enrichment data source.
#[async_trait]
pub trait EnrichmentProvider: Send + Sync {
    fn name(&self) -> &'static str;
    fn tier(&self) -> EnrichmentTier;
    /// Cost per successful call.
    fn cost_aud(&self) -> f64;
    async fn enrich(&self, input: &EnrichmentInput) -> AgencyResult<ProviderResponse>;
}

// ---------------------------------------------------------------------------
// Stub providers
// ---------------------------------------------------------------------------
// Deterministic stand-ins keyed off the input so tests and dev mode behave
// repeatably. Production: HTTP clients for the real vendors.

fn title_case(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

/// Tier 1 — bulk firmographic database.
pub struct BulkDataProvider;

#[async_trait]
impl EnrichmentProvider for BulkDataProvider {
    fn name(&self) -> &'static str {
        "bulk_data"
    }
    fn tier(&self) -> EnrichmentTier {
        EnrichmentTier::Bulk
    }
    fn cost_aud(&self) -> f64 {
        0.02
    }

    async fn enrich(&self, input: &EnrichmentInput) -> AgencyResult<ProviderResponse> {
        debug!(provider = self.name(), "enrichment call");
        metrics::counter!("enrichment.provider_calls", "provider" => self.name()).increment(1);
        let domain = input.domain.clone().unwrap_or_default();
        let company = domain.split('.').next().map(title_case);
        Ok(ProviderResponse {
            company,
            industry: Some("software".to_string()),
            employee_count: Some(80),
            country: Some("AU".to_string()),
            revenue_band: Some("1m-10m".to_string()),
            ..ProviderResponse::default()
        })
    }
}

/// Tier 1 — free email pattern discovery.
pub struct EmailDiscoveryProvider;

#[async_trait]
impl EnrichmentProvider for EmailDiscoveryProvider {
    fn name(&self) -> &'static str {
        "email_discovery"
    }
    fn tier(&self) -> EnrichmentTier {
        EnrichmentTier::Bulk
    }
    fn cost_aud(&self) -> f64 {
        0.0
    }

    async fn enrich(&self, input: &EnrichmentInput) -> AgencyResult<ProviderResponse> {
        debug!(provider = self.name(), "enrichment call");
        metrics::counter!("enrichment.provider_calls", "provider" => self.name()).increment(1);
        let mut response = ProviderResponse::default();
        if input.email.is_none() {
            if let Some(domain) = &input.domain {
                response.email = Some(format!("contact@{domain}"));
            }
        }
        Ok(response)
    }
}

/// Tier 2 — LinkedIn profile scrape.
pub struct LinkedinScrapeProvider;

#[async_trait]
impl EnrichmentProvider for LinkedinScrapeProvider {
    fn name(&self) -> &'static str {
        "linkedin_scrape"
    }
    fn tier(&self) -> EnrichmentTier {
        EnrichmentTier::Waterfall
    }
    fn cost_aud(&self) -> f64 {
        0.15
    }

    async fn enrich(&self, input: &EnrichmentInput) -> AgencyResult<ProviderResponse> {
        debug!(provider = self.name(), "enrichment call");
        metrics::counter!("enrichment.provider_calls", "provider" => self.name()).increment(1);
        let handle = input
            .email
            .as_deref()
            .and_then(|e| e.split('@').next())
            .unwrap_or("profile")
            .to_string();
        Ok(ProviderResponse {
            first_name: Some(title_case(&handle)),
            title: Some("Director of Operations".to_string()),
            linkedin_url: input
                .linkedin_url
                .clone()
                .or(Some(format!("https://linkedin.com/in/{handle}"))),
            signals: Some(LeadSignals {
                posts_present: true,
                recent_activity: true,
                network_size: 900,
                linkedin_engagement: 55,
                ..LeadSignals::default()
            }),
            ..ProviderResponse::default()
        })
    }
}

/// Tier 2 — paid email finder + verifier.
pub struct EmailFinderProvider;

#[async_trait]
impl EnrichmentProvider for EmailFinderProvider {
    fn name(&self) -> &'static str {
        "email_finder"
    }
    fn tier(&self) -> EnrichmentTier {
        EnrichmentTier::Waterfall
    }
    fn cost_aud(&self) -> f64 {
        0.10
    }

    async fn enrich(&self, input: &EnrichmentInput) -> AgencyResult<ProviderResponse> {
        debug!(provider = self.name(), "enrichment call");
        metrics::counter!("enrichment.provider_calls", "provider" => self.name()).increment(1);
        Ok(ProviderResponse {
            email: input.email.clone(),
            email_verified: input.email.is_some(),
            ..ProviderResponse::default()
        })
    }
}

/// Tier 3 — premium mobile / direct contact reveal. Hot leads only.
pub struct MobileRevealProvider;

#[async_trait]
impl EnrichmentProvider for MobileRevealProvider {
    fn name(&self) -> &'static str {
        "mobile_reveal"
    }
    fn tier(&self) -> EnrichmentTier {
        EnrichmentTier::Premium
    }
    fn cost_aud(&self) -> f64 {
        1.20
    }

    async fn enrich(&self, input: &EnrichmentInput) -> AgencyResult<ProviderResponse> {
        debug!(provider = self.name(), "enrichment call");
        metrics::counter!("enrichment.provider_calls", "provider" => self.name()).increment(1);
        let seed = input.fingerprint().len() as u64;
        Ok(ProviderResponse {
            phone: Some(format!("+614{:08}", seed * 7919 % 100_000_000)),
            ..ProviderResponse::default()
        })
    }
}

/// The standard provider cascade, cheapest first.
pub fn default_providers() -> Vec<std::sync::Arc<dyn EnrichmentProvider>> {
    vec![
        std::sync::Arc::new(EmailDiscoveryProvider),
        std::sync::Arc::new(BulkDataProvider),
        std::sync::Arc::new(EmailFinderProvider),
        std::sync::Arc::new(LinkedinScrapeProvider),
        std::sync::Arc::new(MobileRevealProvider),
    ]
}
