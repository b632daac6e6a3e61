//! WHAT detector — mines content snapshots for the subject lines, pain
//! points, CTAs, angles, lengths, and personalization flags that convert.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;

use agency_core::patterns::{
    LengthRange, PatternPayload, PatternType, PersonalizationLift, TaggedRate, WhatPattern,
};
use agency_core::types::{Activity, Channel, ContentSnapshot};

use crate::{Detector, DetectorContext};

pub struct WhatDetector;

// ─── Vocabularies ───────────────────────────────────────────────────────────

fn subject_regexes() -> &'static Vec<(String, Regex)> {
    static PATTERNS: OnceLock<Vec<(String, Regex)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            ("question_about", r"(?i)question about"),
            ("quick_question", r"(?i)quick question"),
            ("name_dash", r"^\S+ -"),
            ("ends_question", r"\?\s*$"),
            ("casual_greeting", r"(?i)^(hey|hi|hello)\b"),
        ]
        .iter()
        .map(|(tag, pattern)| {
            (
                tag.to_string(),
                Regex::new(pattern).expect("subject regex is valid"),
            )
        })
        .collect()
    })
}

const PAIN_POINT_VOCAB: &[(&str, &[&str])] = &[
    ("leads", &["lead", "pipeline", "prospect"]),
    ("revenue", &["revenue", "sales", "mrr"]),
    ("time", &["time", "busy", "hours", "bandwidth"]),
    ("scaling", &["scale", "scaling", "growing", "growth"]),
    ("competition", &["competitor", "competition", "market share"]),
    ("cost", &["cost", "expense", "budget", "spend"]),
    ("quality", &["quality", "standard", "consistency"]),
    ("clients", &["client", "customer", "account"]),
];

const CTA_PHRASES: &[(&str, &str)] = &[
    ("worth a quick chat", "soft_ask"),
    ("open to a chat", "soft_ask"),
    ("15 minutes", "time_specific"),
    ("this thursday", "time_specific"),
    ("book a call", "direct_ask"),
    ("book a demo", "direct_ask"),
    ("send you a breakdown", "value_offer"),
    ("happy to share", "value_offer"),
    ("let me know", "passive"),
    ("thoughts", "question"),
    ("worth exploring", "casual"),
];

fn angle_regexes() -> &'static Vec<(String, Regex)> {
    static PATTERNS: OnceLock<Vec<(String, Regex)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            ("roi_focused", r"(?i)(roi|return on investment|\d+% (more|increase))"),
            ("social_proof", r"(?i)(clients like|companies like|helped \d+)"),
            ("curiosity", r"(?i)(noticed|curious|wondering)"),
            ("fear_based", r"(?i)(missing out|losing|falling behind)"),
            ("value_add", r"(?i)(free|no charge|an idea for)"),
            ("authority", r"(?i)(we've helped|specialist|experts in)"),
            ("urgency", r"(?i)(this week|limited|right now)"),
        ]
        .iter()
        .map(|(tag, pattern)| {
            (
                tag.to_string(),
                Regex::new(pattern).expect("angle regex is valid"),
            )
        })
        .collect()
    })
}

// ─── Detector ───────────────────────────────────────────────────────────────

struct Snapshots<'a> {
    items: Vec<(&'a Activity, &'a ContentSnapshot)>,
    overall: f64,
}

impl<'a> Snapshots<'a> {
    fn collect(ctx: &'a DetectorContext) -> Self {
        let items: Vec<(&Activity, &ContentSnapshot)> = ctx
            .sent()
            .filter_map(|a| a.content.as_ref().map(|c| (a, c)))
            .collect();
        let converting = items.iter().filter(|(a, _)| a.led_to_booking).count();
        let overall = if items.is_empty() {
            0.0
        } else {
            converting as f64 / items.len() as f64
        };
        Self { items, overall }
    }

    /// conv_rate and lift over the subset matching `predicate`.
    fn rate_for(&self, predicate: impl Fn(&Activity, &ContentSnapshot) -> bool) -> Option<TaggedRate> {
        let matching: Vec<&(&Activity, &ContentSnapshot)> = self
            .items
            .iter()
            .filter(|item| predicate(item.0, item.1))
            .collect();
        if matching.is_empty() {
            return None;
        }
        let conversions = matching.iter().filter(|item| item.0.led_to_booking).count();
        let conv_rate = conversions as f64 / matching.len() as f64;
        let lift = if self.overall > 0.0 {
            conv_rate / self.overall
        } else {
            0.0
        };
        Some(TaggedRate {
            tag: String::new(),
            samples: matching.len(),
            conv_rate,
            lift,
        })
    }
}

fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

fn subject_length_tag(subject: &str) -> &'static str {
    match word_count(subject) {
        0..=3 => "short",
        4..=7 => "medium",
        _ => "long",
    }
}

fn sort_rates(rates: &mut Vec<TaggedRate>) {
    rates.sort_by(|a, b| {
        b.lift
            .partial_cmp(&a.lift)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.tag.cmp(&b.tag))
    });
}

fn percentile(sorted: &[usize], p: f64) -> usize {
    if sorted.is_empty() {
        return 0;
    }
    let idx = ((sorted.len() - 1) as f64 * p).round() as usize;
    sorted[idx]
}

impl Detector for WhatDetector {
    fn pattern_type(&self) -> PatternType {
        PatternType::What
    }

    fn detect(&self, ctx: &DetectorContext) -> PatternPayload {
        let snapshots = Snapshots::collect(ctx);
        if snapshots.items.is_empty() {
            return PatternPayload::What(WhatPattern::default());
        }

        // Subject-line patterns.
        let mut subject_rates: Vec<TaggedRate> = Vec::new();
        for (tag, regex) in subject_regexes() {
            if let Some(mut rate) = snapshots.rate_for(|_, c| {
                c.subject.as_deref().map_or(false, |s| regex.is_match(s))
            }) {
                rate.tag = tag.clone();
                subject_rates.push(rate);
            }
        }
        for tag in ["short", "medium", "long"] {
            if let Some(mut rate) = snapshots.rate_for(|_, c| {
                c.subject
                    .as_deref()
                    .map_or(false, |s| subject_length_tag(s) == tag)
            }) {
                rate.tag = tag.to_string();
                subject_rates.push(rate);
            }
        }
        let mut winning_subjects: Vec<TaggedRate> = subject_rates
            .iter()
            .filter(|r| r.lift > 1.0)
            .cloned()
            .collect();
        sort_rates(&mut winning_subjects);
        let mut losing_subjects: Vec<TaggedRate> = subject_rates
            .into_iter()
            .filter(|r| r.lift < 0.9)
            .collect();
        losing_subjects.sort_by(|a, b| {
            a.lift
                .partial_cmp(&b.lift)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.tag.cmp(&b.tag))
        });

        // Pain points: category frequency in converting bodies, lift vs
        // non-converting.
        let mut pain_points = Vec::new();
        for (category, keywords) in PAIN_POINT_VOCAB {
            let hit = |c: &ContentSnapshot| {
                let body = c.body.to_lowercase();
                c.pain_points.iter().any(|p| p == category)
                    || keywords.iter().any(|k| body.contains(k))
            };
            if let Some(mut rate) = snapshots.rate_for(|_, c| hit(c)) {
                rate.tag = (*category).to_string();
                pain_points.push(rate);
            }
        }
        sort_rates(&mut pain_points);

        // CTAs, tagged "{type}:{phrase}".
        let mut ctas = Vec::new();
        for (phrase, cta_type) in CTA_PHRASES {
            if let Some(mut rate) = snapshots.rate_for(|_, c| {
                let body = c.body.to_lowercase();
                body.contains(phrase) || c.cta.as_deref().map_or(false, |v| v.contains(phrase))
            }) {
                rate.tag = format!("{cta_type}:{phrase}");
                ctas.push(rate);
            }
        }
        sort_rates(&mut ctas);

        // Angles ranked by conv_rate.
        let mut angles = Vec::new();
        for (tag, regex) in angle_regexes() {
            if let Some(mut rate) = snapshots.rate_for(|_, c| regex.is_match(&c.body)) {
                rate.tag = tag.clone();
                angles.push(rate);
            }
        }
        angles.sort_by(|a, b| {
            b.conv_rate
                .partial_cmp(&a.conv_rate)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.tag.cmp(&b.tag))
        });

        // Optimal length per channel among converting touches.
        let mut lengths_by_channel: BTreeMap<&'static str, (Channel, Vec<usize>)> = BTreeMap::new();
        for (activity, content) in &snapshots.items {
            if !activity.led_to_booking {
                continue;
            }
            let (unit_key, measure) = match activity.channel {
                Channel::Email => ("email", word_count(&content.body)),
                Channel::Linkedin => ("linkedin", word_count(&content.body)),
                Channel::Sms => ("sms", content.body.chars().count()),
                _ => continue,
            };
            lengths_by_channel
                .entry(unit_key)
                .or_insert((activity.channel, Vec::new()))
                .1
                .push(measure);
        }
        let optimal_lengths: Vec<LengthRange> = lengths_by_channel
            .into_iter()
            .map(|(key, (channel, mut values))| {
                values.sort_unstable();
                LengthRange {
                    channel,
                    unit: if key == "sms" { "chars" } else { "words" }.to_string(),
                    p25: percentile(&values, 0.25),
                    p75: percentile(&values, 0.75),
                    samples: values.len(),
                }
            })
            .collect();

        // Personalization lift per flag.
        let flags: [(&str, fn(&ContentSnapshot) -> bool); 4] = [
            ("company_mention", |c| c.personalization.company_mention),
            ("recent_news", |c| c.personalization.recent_news),
            ("mutual_connection", |c| c.personalization.mutual_connection),
            ("industry_specific", |c| c.personalization.industry_specific),
        ];
        let mut personalization = Vec::new();
        for (flag, getter) in flags {
            let with = snapshots.rate_for(|_, c| getter(c));
            let without = snapshots.rate_for(|_, c| !getter(c));
            if let (Some(with), Some(without)) = (with, without) {
                let lift = if without.conv_rate > 0.0 {
                    with.conv_rate / without.conv_rate
                } else {
                    0.0
                };
                personalization.push(PersonalizationLift {
                    flag: flag.to_string(),
                    rate_with: with.conv_rate,
                    rate_without: without.conv_rate,
                    lift,
                });
            }
        }

        PatternPayload::What(WhatPattern {
            winning_subjects,
            losing_subjects,
            pain_points,
            ctas,
            angles,
            optimal_lengths,
            personalization,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agency_core::types::{ActivityAction, PersonalizationFlags, PoolLead};
    use chrono::Utc;
    use std::collections::HashMap;
    use uuid::Uuid;

    fn snapshot(subject: &str, body: &str, company_mention: bool) -> ContentSnapshot {
        ContentSnapshot {
            subject: Some(subject.to_string()),
            body: body.to_string(),
            pain_points: vec![],
            cta: None,
            personalization: PersonalizationFlags {
                company_mention,
                ..PersonalizationFlags::default()
            },
        }
    }

    fn activity(content: ContentSnapshot, channel: Channel, converting: bool) -> Activity {
        Activity {
            id: Uuid::new_v4(),
            client_id: Uuid::new_v4(),
            campaign_id: Uuid::new_v4(),
            pool_lead_id: Uuid::new_v4(),
            channel,
            action: ActivityAction::Sent,
            resource_id: "mb".into(),
            provider_message_id: None,
            thread_id: None,
            touch_number: 1,
            sent_at: Utc::now(),
            content: Some(content),
            led_to_booking: converting,
            skip_reason: None,
        }
    }

    fn ctx(activities: Vec<Activity>) -> DetectorContext {
        let leads = activities
            .iter()
            .map(|a| (a.pool_lead_id, PoolLead::from_email("x@y.com")))
            .collect::<HashMap<_, _>>();
        DetectorContext { activities, leads }
    }

    #[test]
    fn test_quick_question_subject_wins() {
        let mut activities = Vec::new();
        for _ in 0..4 {
            activities.push(activity(
                snapshot("Quick question", "body about your pipeline", true),
                Channel::Email,
                true,
            ));
        }
        for _ in 0..4 {
            activities.push(activity(
                snapshot("Our company newsletter vol 23 with all the updates", "body", false),
                Channel::Email,
                false,
            ));
        }

        let PatternPayload::What(pattern) = WhatDetector.detect(&ctx(activities)) else {
            panic!("wrong payload");
        };
        assert!(pattern
            .winning_subjects
            .iter()
            .any(|r| r.tag == "quick_question" && r.lift > 1.5));
        assert!(pattern
            .losing_subjects
            .iter()
            .any(|r| r.tag == "long"));
    }

    #[test]
    fn test_word_count_thresholds() {
        assert_eq!(subject_length_tag("one two three"), "short");
        assert_eq!(subject_length_tag("one two three four"), "medium");
        assert_eq!(subject_length_tag("one two three four five six seven"), "medium");
        assert_eq!(
            subject_length_tag("one two three four five six seven eight"),
            "long"
        );
    }

    #[test]
    fn test_optimal_length_percentiles() {
        let mut activities = Vec::new();
        // Converting emails of 50, 75, 100 words.
        for words in [50usize, 75, 100] {
            let body = vec!["word"; words].join(" ");
            activities.push(activity(snapshot("s", &body, false), Channel::Email, true));
        }
        // A non-converting one is excluded from the band.
        activities.push(activity(
            snapshot("s", &vec!["word"; 400].join(" "), false),
            Channel::Email,
            false,
        ));

        let PatternPayload::What(pattern) = WhatDetector.detect(&ctx(activities)) else {
            panic!("wrong payload");
        };
        let email = pattern
            .optimal_lengths
            .iter()
            .find(|l| l.channel == Channel::Email)
            .expect("email band");
        assert_eq!(email.unit, "words");
        assert_eq!(email.samples, 3);
        // 25th/75th percentile of [50, 75, 100].
        assert_eq!(email.p25, 75);
        assert_eq!(email.p75, 100);
    }

    #[test]
    fn test_personalization_lift() {
        let mut activities = Vec::new();
        for _ in 0..3 {
            activities.push(activity(
                snapshot("s", "body", true),
                Channel::Email,
                true,
            ));
        }
        for _ in 0..3 {
            activities.push(activity(snapshot("s", "body", false), Channel::Email, false));
        }

        let PatternPayload::What(pattern) = WhatDetector.detect(&ctx(activities)) else {
            panic!("wrong payload");
        };
        let company = pattern
            .personalization
            .iter()
            .find(|p| p.flag == "company_mention")
            .expect("flag");
        assert_eq!(company.rate_with, 1.0);
        assert_eq!(company.rate_without, 0.0);
    }

    #[test]
    fn test_rerun_is_byte_equal() {
        let mut activities = Vec::new();
        for i in 0..6 {
            activities.push(activity(
                snapshot("Quick question", "noticed your pipeline is growing", i % 2 == 0),
                Channel::Email,
                i % 2 == 0,
            ));
        }
        let ctx = ctx(activities);
        let a = serde_json::to_vec(&WhatDetector.detect(&ctx)).expect("serialize");
        let b = serde_json::to_vec(&WhatDetector.detect(&ctx)).expect("serialize");
        assert_eq!(a, b);
    }
}
