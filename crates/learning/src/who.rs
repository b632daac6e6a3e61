//! WHO detector — buckets converting vs non-converting leads by attribute
//! and surfaces the buckets with the strongest lift either way.

use std::collections::BTreeMap;

use agency_core::patterns::{AttributeBucket, PatternPayload, PatternType, WhoPattern};
use agency_core::types::PoolLead;

use crate::{Detector, DetectorContext};

const MIN_BUCKET_SAMPLES: usize = 3;
const TOP_K: usize = 5;

pub struct WhoDetector;

fn seniority_band(lead: &PoolLead) -> String {
    let title = lead
        .title
        .as_deref()
        .unwrap_or("")
        .to_lowercase();
    if title.contains("owner") || title.contains("ceo") || title.contains("founder") {
        "owner_ceo".into()
    } else if title.contains("chief") || title.contains("cto") || title.contains("cfo") {
        "c_suite".into()
    } else if title.contains("vp") || title.contains("vice president") {
        "vp".into()
    } else if title.contains("director") || title.contains("head of") {
        "director".into()
    } else if title.contains("manager") {
        "manager".into()
    } else {
        "other".into()
    }
}

fn size_band(lead: &PoolLead) -> String {
    match lead.employee_count {
        None => "unknown".into(),
        Some(0..=10) => "1-10".into(),
        Some(11..=50) => "11-50".into(),
        Some(51..=200) => "51-200".into(),
        Some(201..=500) => "201-500".into(),
        Some(_) => "500+".into(),
    }
}

/// Attribute dimensions a lead is bucketed by.
fn dimensions(lead: &PoolLead) -> Vec<(String, String)> {
    let mut dims = vec![
        ("seniority".to_string(), seniority_band(lead)),
        ("size_band".to_string(), size_band(lead)),
    ];
    if let Some(industry) = &lead.industry {
        dims.push(("industry".to_string(), industry.to_lowercase()));
    }
    if let Some(country) = &lead.country {
        dims.push(("country".to_string(), country.to_lowercase()));
    }
    if lead.signals.open_roles >= 3 {
        dims.push(("signal".to_string(), "hiring".to_string()));
    }
    if lead.signals.funded_days_ago.map_or(false, |d| d < 365) {
        dims.push(("signal".to_string(), "recently_funded".to_string()));
    }
    if lead.signals.referral_source {
        dims.push(("signal".to_string(), "referral".to_string()));
    }
    dims
}

impl Detector for WhoDetector {
    fn pattern_type(&self) -> PatternType {
        PatternType::Who
    }

    fn detect(&self, ctx: &DetectorContext) -> PatternPayload {
        let converted = ctx.converted_leads();
        let lead_count = ctx.leads.len();
        if lead_count == 0 {
            return PatternPayload::Who(WhoPattern::default());
        }
        let overall = converted.len() as f64 / lead_count as f64;

        // (dimension, value) -> (samples, conversions). BTreeMap keeps the
        // iteration order stable.
        let mut buckets: BTreeMap<(String, String), (usize, usize)> = BTreeMap::new();
        for (lead_id, lead) in &ctx.leads {
            let converts = converted.binary_search(lead_id).is_ok();
            for key in dimensions(lead) {
                let entry = buckets.entry(key).or_insert((0, 0));
                entry.0 += 1;
                if converts {
                    entry.1 += 1;
                }
            }
        }

        let mut rated: Vec<AttributeBucket> = buckets
            .into_iter()
            .filter(|(_, (samples, _))| *samples >= MIN_BUCKET_SAMPLES)
            .map(|((dimension, value), (samples, conversions))| {
                let conv_rate = conversions as f64 / samples as f64;
                let lift = if overall > 0.0 { conv_rate / overall } else { 0.0 };
                AttributeBucket {
                    dimension,
                    value,
                    samples,
                    conversions,
                    conv_rate,
                    lift,
                }
            })
            .collect();

        let mut winning: Vec<AttributeBucket> = rated
            .iter()
            .filter(|b| b.lift > 1.0)
            .cloned()
            .collect();
        winning.sort_by(|a, b| {
            b.lift
                .partial_cmp(&a.lift)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.dimension.cmp(&b.dimension))
                .then_with(|| a.value.cmp(&b.value))
        });
        winning.truncate(TOP_K);

        rated.retain(|b| b.lift < 0.9);
        rated.sort_by(|a, b| {
            a.lift
                .partial_cmp(&b.lift)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.dimension.cmp(&b.dimension))
                .then_with(|| a.value.cmp(&b.value))
        });
        rated.truncate(TOP_K);

        PatternPayload::Who(WhoPattern {
            winning,
            losing: rated,
            overall_conv_rate: overall,
        })
    }
}
