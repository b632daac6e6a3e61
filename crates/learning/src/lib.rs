//! CIS learning loop — the four detectors (WHO/WHAT/WHEN/HOW) that mine
//! converting vs non-converting activity into persisted pattern artifacts.
//!
//! Detectors are deterministic: every emitted vector is sorted, so a re-run
//! over unchanged input serializes to a byte-equal payload.

pub mod how;
pub mod what;
pub mod when;
pub mod who;

use std::collections::HashMap;

use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use agency_core::config::LearningConfig;
use agency_core::patterns::{ConversionPattern, PatternPayload, PatternType};
use agency_core::types::{Activity, ActivityAction, PoolLead};
use agency_store::AgencyStore;

pub use how::HowDetector;
pub use what::WhatDetector;
pub use when::WhenDetector;
pub use who::WhoDetector;

/// Everything a detector reads: the client's activity log plus the lead
/// attributes behind it.
pub struct DetectorContext {
    pub activities: Vec<Activity>,
    pub leads: HashMap<Uuid, PoolLead>,
}

impl DetectorContext {
    /// Stream the client's activity log out of the store.
    pub fn gather(store: &AgencyStore, client_id: Uuid) -> Self {
        let mut activities = Vec::new();
        store.scan_activities(client_id, |a| activities.push(a.clone()));

        let mut leads = HashMap::new();
        for activity in &activities {
            leads
                .entry(activity.pool_lead_id)
                .or_insert_with(|| store.get_pool_lead(activity.pool_lead_id));
        }
        let leads = leads
            .into_iter()
            .filter_map(|(id, lead)| lead.map(|l| (id, l)))
            .collect();

        Self { activities, leads }
    }

    /// Outbound touches only.
    pub fn sent(&self) -> impl Iterator<Item = &Activity> {
        self.activities
            .iter()
            .filter(|a| a.action == ActivityAction::Sent)
    }

    pub fn total_activities(&self) -> usize {
        self.activities.len()
    }

    pub fn converting_activities(&self) -> usize {
        self.activities.iter().filter(|a| a.led_to_booking).count()
    }

    /// Leads with at least one converting touch.
    pub fn converted_leads(&self) -> Vec<Uuid> {
        let mut ids: Vec<Uuid> = self
            .activities
            .iter()
            .filter(|a| a.led_to_booking)
            .map(|a| a.pool_lead_id)
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }
}

/// One CIS detector.
pub trait Detector: Send + Sync {
    fn pattern_type(&self) -> PatternType;
    fn detect(&self, ctx: &DetectorContext) -> PatternPayload;
}

/// Logistic confidence curve centred at 50 converting activities.
pub fn confidence(n_converting: usize) -> f64 {
    let x = (n_converting as f64 - 50.0) / 15.0;
    1.0 / (1.0 + (-x).exp())
}

/// Run one detector for one client, applying the shared data-sufficiency
/// gate, and persist the resulting pattern row.
pub fn run_detector(
    store: &AgencyStore,
    client_id: Uuid,
    detector: &dyn Detector,
    config: &LearningConfig,
) -> ConversionPattern {
    let ctx = DetectorContext::gather(store, client_id);
    let n_total = ctx.total_activities();
    let n_converting = ctx.converting_activities();

    let sufficient = n_converting >= config.min_converting && n_total >= config.min_total;
    let (payload, conf) = if sufficient {
        (detector.detect(&ctx), confidence(n_converting))
    } else {
        (PatternPayload::empty(detector.pattern_type()), 0.0)
    };

    let pattern = ConversionPattern {
        id: Uuid::new_v4(),
        client_id,
        pattern_type: detector.pattern_type(),
        payload,
        sample_size: n_total,
        confidence: conf,
        computed_at: Utc::now(),
    };
    store.upsert_pattern(pattern.clone());
    info!(
        %client_id,
        pattern_type = ?pattern.pattern_type,
        sample_size = n_total,
        converting = n_converting,
        confidence = conf,
        "detector run completed"
    );
    pattern
}

/// Run all four detectors for a client.
pub fn run_all(
    store: &AgencyStore,
    client_id: Uuid,
    config: &LearningConfig,
) -> Vec<ConversionPattern> {
    let detectors: [&dyn Detector; 4] = [&WhoDetector, &WhatDetector, &WhenDetector, &HowDetector];
    detectors
        .iter()
        .map(|d| run_detector(store, client_id, *d, config))
        .collect()
}
