//! Durable per-resource and per-client counters: daily send caps, daily
//! enrichment spend, monthly enhanced-content budgets.
//!
//! Counters are keyed on UTC calendar windows so the day rollover is just a
//! new key. `increment_if_under` is the atomic check-and-bump dispatch uses
//! for rate tokens; DashMap's entry lock makes it a single critical section
//! per key.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use agency_core::types::Channel;

#[derive(Debug, Clone, serde::Serialize)]
pub struct ResourceUsage {
    pub key: String,
    pub used: u32,
    pub cap: u32,
}

pub struct RateCounters {
    /// "{channel}:{resource}:{yyyy-mm-dd}" -> sends today.
    sends: DashMap<String, u32>,
    /// Caps observed per key, for the snapshot.
    caps: DashMap<String, u32>,
    /// "{client}:{yyyy-mm-dd}" -> enrichment spend (AUD).
    enrichment_spend: DashMap<String, f64>,
    /// "{client}:{yyyy-mm}" -> enhanced touches consumed.
    enhanced_used: DashMap<String, u32>,
}

impl Default for RateCounters {
    fn default() -> Self {
        Self::new()
    }
}

fn day_key(channel: Channel, resource: &str, at: DateTime<Utc>) -> String {
    format!("{}:{}:{}", channel, resource, at.format("%Y-%m-%d"))
}

impl RateCounters {
    pub fn new() -> Self {
        Self {
            sends: DashMap::new(),
            caps: DashMap::new(),
            enrichment_spend: DashMap::new(),
            enhanced_used: DashMap::new(),
        }
    }

    /// Atomic increment-if-under-cap for a resource's daily counter.
    /// Returns true when a send token was acquired.
    pub fn try_acquire(
        &self,
        channel: Channel,
        resource: &str,
        at: DateTime<Utc>,
        cap: u32,
    ) -> bool {
        let key = day_key(channel, resource, at);
        self.caps.insert(key.clone(), cap);
        let mut count = self.sends.entry(key).or_insert(0);
        if *count >= cap {
            return false;
        }
        *count += 1;
        true
    }

    pub fn used_today(&self, channel: Channel, resource: &str, at: DateTime<Utc>) -> u32 {
        self.sends
            .get(&day_key(channel, resource, at))
            .map(|c| *c)
            .unwrap_or(0)
    }

    /// Record enrichment spend; returns the cumulative spend for the day.
    pub fn add_enrichment_spend(&self, client_id: Uuid, at: DateTime<Utc>, cost_aud: f64) -> f64 {
        let key = format!("{}:{}", client_id, at.format("%Y-%m-%d"));
        let mut spend = self.enrichment_spend.entry(key).or_insert(0.0);
        *spend += cost_aud;
        *spend
    }

    pub fn enrichment_spent_today(&self, client_id: Uuid, at: DateTime<Utc>) -> f64 {
        self.enrichment_spend
            .get(&format!("{}:{}", client_id, at.format("%Y-%m-%d")))
            .map(|s| *s)
            .unwrap_or(0.0)
    }

    /// Consume one enhanced-content touch from the client's monthly budget.
    /// `None` budget means unlimited. Returns false when exhausted.
    pub fn try_consume_enhanced(
        &self,
        client_id: Uuid,
        at: DateTime<Utc>,
        budget: Option<u32>,
    ) -> bool {
        let Some(budget) = budget else {
            return true;
        };
        let key = format!("{}:{}", client_id, at.format("%Y-%m"));
        let mut used = self.enhanced_used.entry(key).or_insert(0);
        if *used >= budget {
            return false;
        }
        *used += 1;
        true
    }

    /// Per-resource utilization for the operator snapshot.
    pub fn usage_snapshot(&self) -> Vec<ResourceUsage> {
        let mut usage: Vec<ResourceUsage> = self
            .sends
            .iter()
            .map(|entry| ResourceUsage {
                key: entry.key().clone(),
                used: *entry.value(),
                cap: self.caps.get(entry.key()).map(|c| *c).unwrap_or(0),
            })
            .collect();
        usage.sort_by(|a, b| a.key.cmp(&b.key));
        usage
    }
}
