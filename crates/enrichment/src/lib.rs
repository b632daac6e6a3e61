//! Enrichment waterfall — tiered provider cascade (cheap to premium) with a
//! versioned cache and per-client daily budget enforcement.

pub mod cache;
pub mod provider;
pub mod waterfall;

pub use cache::EnrichmentCache;
pub use provider::{
    default_providers, EnrichmentInput, EnrichmentProvider, EnrichmentTier, ProviderResponse,
};
pub use waterfall::{EnrichedLead, EnrichmentWaterfall};
