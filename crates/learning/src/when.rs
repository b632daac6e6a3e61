//! WHEN detector — hour-of-day, day-of-week, touch-number, and inter-touch
//! spacing among converting activity.

use std::collections::BTreeMap;

use chrono::{Datelike, Timelike};

use agency_core::patterns::{PatternPayload, PatternType, TimeBucket, WhenPattern};
use agency_core::types::Activity;

use crate::{Detector, DetectorContext};

const MIN_BUCKET_SAMPLES: usize = 3;

pub struct WhenDetector;

fn winning_buckets(
    counts: BTreeMap<u32, (usize, usize)>,
    overall: f64,
) -> Vec<TimeBucket> {
    let mut buckets: Vec<TimeBucket> = counts
        .into_iter()
        .filter(|(_, (samples, _))| *samples >= MIN_BUCKET_SAMPLES)
        .map(|(bucket, (samples, conversions))| TimeBucket {
            bucket,
            samples,
            conv_rate: conversions as f64 / samples as f64,
        })
        .filter(|b| b.conv_rate > overall)
        .collect();
    buckets.sort_by(|a, b| {
        b.conv_rate
            .partial_cmp(&a.conv_rate)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.bucket.cmp(&b.bucket))
    });
    buckets
}

impl Detector for WhenDetector {
    fn pattern_type(&self) -> PatternType {
        PatternType::When
    }

    fn detect(&self, ctx: &DetectorContext) -> PatternPayload {
        let sent: Vec<&Activity> = ctx.sent().collect();
        if sent.is_empty() {
            return PatternPayload::When(WhenPattern::default());
        }
        let overall =
            sent.iter().filter(|a| a.led_to_booking).count() as f64 / sent.len() as f64;

        // hour -> (samples, conversions); weekday likewise (Monday = 0).
        let mut hours: BTreeMap<u32, (usize, usize)> = BTreeMap::new();
        let mut days: BTreeMap<u32, (usize, usize)> = BTreeMap::new();
        for activity in &sent {
            let hour = hours.entry(activity.sent_at.hour()).or_insert((0, 0));
            hour.0 += 1;
            let day = days
                .entry(activity.sent_at.weekday().num_days_from_monday())
                .or_insert((0, 0));
            day.0 += 1;
            if activity.led_to_booking {
                hour.1 += 1;
                day.1 += 1;
            }
        }

        // The touch each converted lead converted at (its last converting
        // touch), ranked by frequency.
        let converted = ctx.converted_leads();
        let mut touch_counts: BTreeMap<u32, usize> = BTreeMap::new();
        for lead_id in &converted {
            let final_touch = sent
                .iter()
                .filter(|a| a.pool_lead_id == *lead_id && a.led_to_booking)
                .map(|a| a.touch_number)
                .max();
            if let Some(n) = final_touch {
                *touch_counts.entry(n).or_insert(0) += 1;
            }
        }
        let mut optimal_touch_numbers: Vec<(u32, usize)> = touch_counts.into_iter().collect();
        optimal_touch_numbers.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        let optimal_touch_numbers: Vec<u32> =
            optimal_touch_numbers.into_iter().map(|(n, _)| n).collect();

        // Median spacing between consecutive touches of converting leads.
        let mut gaps: Vec<f64> = Vec::new();
        for lead_id in &converted {
            let mut touches: Vec<&&Activity> = sent
                .iter()
                .filter(|a| a.pool_lead_id == *lead_id)
                .collect();
            touches.sort_by_key(|a| a.sent_at);
            for pair in touches.windows(2) {
                let gap = (pair[1].sent_at - pair[0].sent_at).num_hours() as f64 / 24.0;
                gaps.push(gap);
            }
        }
        gaps.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let optimal_spacing_days = if gaps.is_empty() {
            0.0
        } else {
            gaps[gaps.len() / 2]
        };

        PatternPayload::When(WhenPattern {
            winning_hours: winning_buckets(hours, overall),
            winning_days: winning_buckets(days, overall),
            optimal_touch_numbers,
            optimal_spacing_days,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agency_core::types::{ActivityAction, Channel, PoolLead};
    use chrono::{Duration, TimeZone, Utc};
    use std::collections::HashMap;
    use uuid::Uuid;

    fn activity(
        lead_id: Uuid,
        touch_number: u32,
        sent_at: chrono::DateTime<Utc>,
        converting: bool,
    ) -> Activity {
        Activity {
            id: Uuid::new_v4(),
            client_id: Uuid::new_v4(),
            campaign_id: Uuid::new_v4(),
            pool_lead_id: lead_id,
            channel: Channel::Email,
            action: ActivityAction::Sent,
            resource_id: "mb".into(),
            provider_message_id: None,
            thread_id: None,
            touch_number,
            sent_at,
            content: None,
            led_to_booking: converting,
            skip_reason: None,
        }
    }

    #[test]
    fn test_touch_number_clustering() {
        let mut activities = Vec::new();
        let base = Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).single().expect("date");

        // Three leads converting at touches 4, 5, 3; seven leads that don't.
        for (i, converting_touch) in [(0u32, 4u32), (1, 5), (2, 3)] {
            let lead = Uuid::new_v4();
            for n in 1..=converting_touch {
                activities.push(activity(
                    lead,
                    n,
                    base + Duration::days(i64::from(i * 7 + n * 2)),
                    true,
                ));
            }
        }
        for i in 0..6 {
            let lead = Uuid::new_v4();
            for n in 1..=3u32 {
                activities.push(activity(
                    lead,
                    n,
                    base + Duration::days(i64::from(i * 5 + n)),
                    false,
                ));
            }
        }

        let leads: HashMap<Uuid, PoolLead> = activities
            .iter()
            .map(|a| (a.pool_lead_id, PoolLead::from_email("x@y.com")))
            .collect();
        let ctx = DetectorContext { activities, leads };

        let PatternPayload::When(pattern) = WhenDetector.detect(&ctx) else {
            panic!("wrong payload");
        };

        // The dominant converting touch numbers are within {3, 4, 5}.
        assert!(!pattern.optimal_touch_numbers.is_empty());
        for n in pattern.optimal_touch_numbers.iter().take(3) {
            assert!((3..=5).contains(n), "unexpected touch number {n}");
        }
        // Every touch is two days after the previous one.
        assert!((pattern.optimal_spacing_days - 2.0).abs() < 0.01);
    }

    #[test]
    fn test_winning_hours_need_three_samples() {
        let mut activities = Vec::new();
        let base = Utc.with_ymd_and_hms(2026, 3, 2, 14, 0, 0).single().expect("date");
        // Two converting sends at 14:00 only: below the floor.
        for i in 0..2 {
            activities.push(activity(Uuid::new_v4(), 1, base + Duration::days(i), true));
        }
        let leads: HashMap<Uuid, PoolLead> = activities
            .iter()
            .map(|a| (a.pool_lead_id, PoolLead::from_email("x@y.com")))
            .collect();
        let ctx = DetectorContext { activities, leads };

        let PatternPayload::When(pattern) = WhenDetector.detect(&ctx) else {
            panic!("wrong payload");
        };
        assert!(pattern.winning_hours.is_empty());
    }
}
