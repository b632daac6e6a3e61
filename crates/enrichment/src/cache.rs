//! Versioned enrichment cache.
//!
//! Keys carry a version prefix (`v1:{sha256(input)}`): bumping the prefix
//! invalidates every entry without deleting anything. Partial results are
//! cached with a marker so a later, deeper pass can upgrade them.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use tracing::debug;

use agency_core::types::PoolLead;

use crate::provider::EnrichmentInput;

#[derive(Debug, Clone)]
pub struct CachedRecord {
    pub lead: PoolLead,
    /// Set when the cascade stopped before the lead was sufficient.
    pub partial: bool,
    pub cached_at: DateTime<Utc>,
}

pub struct EnrichmentCache {
    entries: DashMap<String, CachedRecord>,
    version: RwLock<String>,
    ttl_days: u32,
}

impl EnrichmentCache {
    pub fn new(version: &str, ttl_days: u32) -> Self {
        Self {
            entries: DashMap::new(),
            version: RwLock::new(version.to_string()),
            ttl_days,
        }
    }

    fn key(&self, input: &EnrichmentInput) -> String {
        let digest = Sha256::digest(input.fingerprint().as_bytes());
        format!("{}:{}", self.version.read(), hex::encode(digest))
    }

    pub fn get(&self, input: &EnrichmentInput) -> Option<CachedRecord> {
        let record = self.entries.get(&self.key(input))?.clone();
        let expired = Utc::now() - record.cached_at > Duration::days(i64::from(self.ttl_days));
        if expired {
            debug!("enrichment cache entry expired");
            return None;
        }
        Some(record)
    }

    pub fn put(&self, input: &EnrichmentInput, lead: PoolLead, partial: bool) {
        self.entries.insert(
            self.key(input),
            CachedRecord {
                lead,
                partial,
                cached_at: Utc::now(),
            },
        );
    }

    /// Invalidate every entry by moving to a new version prefix. Old entries
    /// remain on disk (here: in the map) but are unreachable.
    pub fn bump_version(&self, new_version: &str) {
        *self.version.write() = new_version.to_string();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_and_miss() {
        let cache = EnrichmentCache::new("v1", 90);
        let input = EnrichmentInput::from_email("jo@corp.com");
        assert!(cache.get(&input).is_none());

        cache.put(&input, PoolLead::from_email("jo@corp.com"), false);
        let hit = cache.get(&input).expect("hit");
        assert_eq!(hit.lead.email, "jo@corp.com");
        assert!(!hit.partial);

        let other = EnrichmentInput::from_email("other@corp.com");
        assert!(cache.get(&other).is_none());
    }

    #[test]
    fn test_partial_marker_preserved() {
        let cache = EnrichmentCache::new("v1", 90);
        let input = EnrichmentInput::from_email("jo@corp.com");
        cache.put(&input, PoolLead::from_email("jo@corp.com"), true);
        assert!(cache.get(&input).expect("hit").partial);
    }

    #[test]
    fn test_version_bump_invalidates_without_deleting() {
        let cache = EnrichmentCache::new("v1", 90);
        let input = EnrichmentInput::from_email("jo@corp.com");
        cache.put(&input, PoolLead::from_email("jo@corp.com"), false);
        assert!(cache.get(&input).is_some());

        cache.bump_version("v2");
        assert!(cache.get(&input).is_none());
        // The stale entry is still stored, just unreachable.
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_ttl_expiry() {
        let cache = EnrichmentCache::new("v1", 0);
        let input = EnrichmentInput::from_email("jo@corp.com");
        let mut record_lead = PoolLead::from_email("jo@corp.com");
        record_lead.last_refreshed_at = Utc::now();
        cache.entries.insert(
            cache.key(&input),
            CachedRecord {
                lead: record_lead,
                partial: false,
                cached_at: Utc::now() - Duration::days(1),
            },
        );
        assert!(cache.get(&input).is_none());
    }
}
