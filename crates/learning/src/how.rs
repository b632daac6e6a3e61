//! HOW detector — mines channel bigrams/trigrams from per-lead sequences,
//! comparing converters against non-converters.

use std::collections::BTreeMap;

use agency_core::patterns::{HowPattern, PatternPayload, PatternType, SequenceNgram};
use agency_core::types::{Activity, Channel};

use crate::{Detector, DetectorContext};

pub struct HowDetector;

/// Reconstruct each lead's ordered channel sequence up to its terminal
/// touch.
fn sequences(ctx: &DetectorContext) -> Vec<(bool, Vec<Channel>)> {
    let mut by_lead: BTreeMap<uuid::Uuid, Vec<&Activity>> = BTreeMap::new();
    for activity in ctx.sent() {
        by_lead.entry(activity.pool_lead_id).or_default().push(activity);
    }

    by_lead
        .into_values()
        .map(|mut touches| {
            touches.sort_by_key(|a| (a.sent_at, a.touch_number));
            let converts = touches.iter().any(|a| a.led_to_booking);
            (converts, touches.iter().map(|a| a.channel).collect())
        })
        .collect()
}

fn count_ngrams(
    sequences: &[(bool, Vec<Channel>)],
    n: usize,
) -> BTreeMap<Vec<&'static str>, (usize, usize)> {
    // ngram -> (converter support, non-converter support). Channel names
    // key the map so ordering is stable.
    let mut counts: BTreeMap<Vec<&'static str>, (usize, usize)> = BTreeMap::new();
    for (converts, channels) in sequences {
        let mut seen: Vec<Vec<&'static str>> = Vec::new();
        for window in channels.windows(n) {
            let key: Vec<&'static str> = window.iter().map(|c| c.as_str()).collect();
            // Count each distinct n-gram once per lead.
            if seen.contains(&key) {
                continue;
            }
            seen.push(key.clone());
            let entry = counts.entry(key).or_insert((0, 0));
            if *converts {
                entry.0 += 1;
            } else {
                entry.1 += 1;
            }
        }
    }
    counts
}

fn channel_from_str(s: &str) -> Channel {
    match s {
        "email" => Channel::Email,
        "sms" => Channel::Sms,
        "linkedin" => Channel::Linkedin,
        "voice" => Channel::Voice,
        _ => Channel::Mail,
    }
}

impl Detector for HowDetector {
    fn pattern_type(&self) -> PatternType {
        PatternType::How
    }

    fn detect(&self, ctx: &DetectorContext) -> PatternPayload {
        let sequences = sequences(ctx);
        let n_conv = sequences.iter().filter(|(c, _)| *c).count();
        let n_nonconv = sequences.len() - n_conv;
        if n_conv == 0 || sequences.is_empty() {
            return PatternPayload::How(HowPattern::default());
        }

        let mut rated: Vec<SequenceNgram> = Vec::new();
        for n in [2usize, 3] {
            for (key, (support_conv, support_nonconv)) in count_ngrams(&sequences, n) {
                if support_conv + support_nonconv == 0 {
                    continue;
                }
                // Laplace-smoothed rate ratio keeps zero-support divisions
                // finite and the output deterministic.
                let rate_conv = (support_conv as f64 + 0.5) / (n_conv as f64 + 1.0);
                let rate_nonconv = (support_nonconv as f64 + 0.5) / (n_nonconv as f64 + 1.0);
                rated.push(SequenceNgram {
                    channels: key.iter().map(|s| channel_from_str(s)).collect(),
                    support: support_conv,
                    lift: rate_conv / rate_nonconv,
                });
            }
        }

        let mut winning: Vec<SequenceNgram> = rated
            .iter()
            .filter(|s| s.lift > 1.0 && s.support > 0)
            .cloned()
            .collect();
        winning.sort_by(|a, b| {
            b.lift
                .partial_cmp(&a.lift)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.support.cmp(&a.support))
                .then_with(|| a.channels.len().cmp(&b.channels.len()))
        });

        let mut losing: Vec<SequenceNgram> =
            rated.into_iter().filter(|s| s.lift < 0.9).collect();
        losing.sort_by(|a, b| {
            a.lift
                .partial_cmp(&b.lift)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.support.cmp(&a.support))
                .then_with(|| a.channels.len().cmp(&b.channels.len()))
        });

        PatternPayload::How(HowPattern {
            winning_sequences: winning,
            losing_sequences: losing,
        })
    }
}
