//! Channel allocation — maps ALS tier + signals + client policy to an
//! ordered touch schedule with per-touch enhanced-content verdicts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use agency_core::types::{AlsTier, Channel, LeadSignals, SequenceStep, TenantPolicy};
use agency_store::RateCounters;

/// One planned touch in an enrollment schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannedTouch {
    pub channel: Channel,
    pub offset_days: u32,
    pub template_ref: String,
    /// Richer content path permitted for this touch.
    pub enhanced: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TouchSchedule {
    pub touches: Vec<PlannedTouch>,
}

impl TouchSchedule {
    pub fn channels(&self) -> Vec<Channel> {
        let mut channels: Vec<Channel> = Vec::new();
        for touch in &self.touches {
            if !channels.contains(&touch.channel) {
                channels.push(touch.channel);
            }
        }
        channels
    }
}

pub struct Allocator;

impl Allocator {
    /// Channel access gates by tier, before any client policy applies.
    pub fn channels_for_tier(tier: AlsTier) -> &'static [Channel] {
        match tier {
            AlsTier::Hot => &[
                Channel::Email,
                Channel::Sms,
                Channel::Linkedin,
                Channel::Voice,
                Channel::Mail,
            ],
            AlsTier::Warm => &[Channel::Email, Channel::Linkedin, Channel::Voice],
            AlsTier::Cool => &[Channel::Email, Channel::Linkedin],
            AlsTier::Cold => &[Channel::Email],
            AlsTier::Dead => &[],
        }
    }

    /// Default 6-touch template. SMS (falling back to mail) appears only at
    /// hot; linkedin and voice only where the tier gate permits them.
    pub fn default_sequence() -> Vec<SequenceStep> {
        vec![
            step(Channel::Email, 0, "intro"),
            step(Channel::Linkedin, 2, "connect"),
            step(Channel::Email, 5, "value_follow_up"),
            step(Channel::Voice, 9, "discovery_call"),
            step(Channel::Sms, 14, "quick_nudge"),
            step(Channel::Email, 21, "break_up"),
        ]
    }

    /// Industry-adaptive offsets: slower-moving industries get wider gaps.
    pub fn industry_adjusted(sequence: &[SequenceStep], industry: Option<&str>) -> Vec<SequenceStep> {
        let stretch = match industry.map(|i| i.to_lowercase()) {
            Some(i) if i.contains("government") || i.contains("education") || i.contains("healthcare") => 2,
            Some(i) if i.contains("enterprise") || i.contains("finance") => 3,
            _ => return sequence.to_vec(),
        };
        sequence
            .iter()
            .map(|s| SequenceStep {
                channel: s.channel,
                offset_days: s.offset_days + (s.offset_days * stretch) / 4,
                template_ref: s.template_ref.clone(),
            })
            .collect()
    }

    /// Priority signals that unlock enhanced content under the signal gate.
    pub fn has_priority_signal(signals: &LeadSignals, employee_count: Option<u32>) -> bool {
        signals.funded_days_ago.map_or(false, |d| d < 90)
            || signals.open_roles >= 3
            || signals.tech_match > 0.8
            || signals.linkedin_engagement > 70
            || signals.referral_source
            || employee_count.map_or(false, |c| (50..=500).contains(&c))
    }

    /// Produce the touch schedule for one enrollment.
    ///
    /// A dead tier allocates nothing (the lead is suppressed upstream).
    /// Enhanced verdicts consume the client's monthly budget counter; once
    /// exhausted, remaining touches are downgraded to standard content.
    #[allow(clippy::too_many_arguments)]
    pub fn allocate(
        client_id: Uuid,
        tier: AlsTier,
        signals: &LeadSignals,
        employee_count: Option<u32>,
        industry: Option<&str>,
        policy: &TenantPolicy,
        sequence: &[SequenceStep],
        counters: &RateCounters,
        now: DateTime<Utc>,
    ) -> TouchSchedule {
        let permitted = Self::channels_for_tier(tier);
        if permitted.is_empty() {
            debug!(%client_id, ?tier, "dead tier, no channels allocated");
            return TouchSchedule::default();
        }

        let base = if sequence.is_empty() {
            Self::default_sequence()
        } else {
            sequence.to_vec()
        };
        let adjusted = Self::industry_adjusted(&base, industry);

        let gate_open = !policy.signal_gate_enabled
            || Self::has_priority_signal(signals, employee_count);

        let mut touches = Vec::new();
        for step in adjusted {
            let channel = if step.channel == Channel::Sms && !permitted.contains(&Channel::Sms) {
                // The hot-only nudge falls back to mail at hot, otherwise out.
                continue;
            } else if step.channel == Channel::Sms && policy.daily_caps.sms == 0 {
                Channel::Mail
            } else {
                step.channel
            };
            if !permitted.contains(&channel) {
                continue;
            }

            let enhanced = gate_open
                && counters.try_consume_enhanced(client_id, now, policy.monthly_enhanced_budget);

            touches.push(PlannedTouch {
                channel,
                offset_days: step.offset_days,
                template_ref: step.template_ref.clone(),
                enhanced,
            });
        }

        debug!(
            %client_id,
            ?tier,
            touches = touches.len(),
            "touch schedule allocated"
        );
        TouchSchedule { touches }
    }
}

fn step(channel: Channel, offset_days: u32, template_ref: &str) -> SequenceStep {
    SequenceStep {
        channel,
        offset_days,
        template_ref: template_ref.to_string(),
    }
}
