//! Conversion-pattern artifacts produced by the CIS detectors.
//!
//! Payloads are a tagged union by pattern type, not free-form maps. Vectors
//! are kept in a deterministic order (rank, then key) so re-running a
//! detector on unchanged input serializes to byte-equal JSON.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::Channel;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PatternType {
    Who,
    What,
    When,
    How,
}

/// One persisted pattern row per (client, detector) run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionPattern {
    pub id: Uuid,
    pub client_id: Uuid,
    pub pattern_type: PatternType,
    pub payload: PatternPayload,
    pub sample_size: usize,
    pub confidence: f64,
    pub computed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case", tag = "pattern_type")]
pub enum PatternPayload {
    Who(WhoPattern),
    What(WhatPattern),
    When(WhenPattern),
    How(HowPattern),
}

// ─── WHO ────────────────────────────────────────────────────────────────────

/// A bucket of leads sharing one attribute value, with its conversion lift
/// against the overall rate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AttributeBucket {
    /// Attribute dimension, e.g. "seniority", "industry", "size_band".
    pub dimension: String,
    pub value: String,
    pub samples: usize,
    pub conversions: usize,
    pub conv_rate: f64,
    pub lift: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct WhoPattern {
    pub winning: Vec<AttributeBucket>,
    pub losing: Vec<AttributeBucket>,
    pub overall_conv_rate: f64,
}

// ─── WHAT ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaggedRate {
    pub tag: String,
    pub samples: usize,
    pub conv_rate: f64,
    pub lift: f64,
}

/// Converting-message length band per channel: 25th–75th percentile.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LengthRange {
    pub channel: Channel,
    /// Words for email/linkedin, characters for sms.
    pub unit: String,
    pub p25: usize,
    pub p75: usize,
    pub samples: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PersonalizationLift {
    pub flag: String,
    pub rate_with: f64,
    pub rate_without: f64,
    pub lift: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct WhatPattern {
    pub winning_subjects: Vec<TaggedRate>,
    pub losing_subjects: Vec<TaggedRate>,
    pub pain_points: Vec<TaggedRate>,
    pub ctas: Vec<TaggedRate>,
    pub angles: Vec<TaggedRate>,
    pub optimal_lengths: Vec<LengthRange>,
    pub personalization: Vec<PersonalizationLift>,
}

// ─── WHEN ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimeBucket {
    /// Hour 0..=23 or weekday 0..=6 (Monday = 0).
    pub bucket: u32,
    pub samples: usize,
    pub conv_rate: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct WhenPattern {
    pub winning_hours: Vec<TimeBucket>,
    pub winning_days: Vec<TimeBucket>,
    /// Touch numbers at which conversions cluster, most frequent first.
    pub optimal_touch_numbers: Vec<u32>,
    /// Median days between touches among converting sequences.
    pub optimal_spacing_days: f64,
}

// ─── HOW ────────────────────────────────────────────────────────────────────

/// A channel n-gram (bigram or trigram) with its support among converters
/// and lift over non-converters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SequenceNgram {
    pub channels: Vec<Channel>,
    pub support: usize,
    pub lift: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct HowPattern {
    pub winning_sequences: Vec<SequenceNgram>,
    pub losing_sequences: Vec<SequenceNgram>,
}

impl PatternPayload {
    pub fn pattern_type(&self) -> PatternType {
        match self {
            PatternPayload::Who(_) => PatternType::Who,
            PatternPayload::What(_) => PatternType::What,
            PatternPayload::When(_) => PatternType::When,
            PatternPayload::How(_) => PatternType::How,
        }
    }

    /// Empty payload for a detector run that failed the sufficiency gate.
    pub fn empty(pattern_type: PatternType) -> Self {
        match pattern_type {
            PatternType::Who => PatternPayload::Who(WhoPattern::default()),
            PatternType::What => PatternPayload::What(WhatPattern::default()),
            PatternType::When => PatternPayload::When(WhenPattern::default()),
            PatternType::How => PatternPayload::How(HowPattern::default()),
        }
    }
}
