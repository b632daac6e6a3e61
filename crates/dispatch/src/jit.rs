//! Just-in-time validation — the checks executed immediately before each
//! send, in documented order: subscription, credits, campaign, lead status,
//! suppression, rate token.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;

use agency_core::config::RateConfig;
use agency_core::types::{CampaignStatus, LeadStatus, PoolLead, ScheduledTouch};
use agency_store::{AgencyStore, RateCounters};
use agency_suppression::SuppressionIndex;

/// Why a touch was dropped (not retried, not re-queued).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    SubscriptionInactive,
    CreditsExhausted,
    CampaignInactive,
    LeadTerminal(LeadStatus),
    Suppressed(String),
}

impl SkipReason {
    pub fn label(&self) -> String {
        match self {
            SkipReason::SubscriptionInactive => "subscription_inactive".into(),
            SkipReason::CreditsExhausted => "credits_exhausted".into(),
            SkipReason::CampaignInactive => "campaign_inactive".into(),
            SkipReason::LeadTerminal(status) => {
                format!("lead_{}", format!("{status:?}").to_lowercase())
            }
            SkipReason::Suppressed(reason) => format!("suppressed_{reason}"),
        }
    }
}

#[derive(Debug)]
pub enum JitVerdict {
    /// All checks passed and a rate token was consumed.
    Pass { lead: PoolLead },
    /// Dropped; recorded as a skipped activity with the reason.
    Skip(SkipReason),
    /// No rate token in the current window; re-queue to the next one.
    RateLimited,
}

pub struct JitValidator {
    store: Arc<AgencyStore>,
    suppression: Arc<SuppressionIndex>,
    counters: Arc<RateCounters>,
    rate: RateConfig,
}

impl JitValidator {
    pub fn new(
        store: Arc<AgencyStore>,
        suppression: Arc<SuppressionIndex>,
        counters: Arc<RateCounters>,
        rate: RateConfig,
    ) -> Self {
        Self {
            store,
            suppression,
            counters,
            rate,
        }
    }

    pub fn validate(&self, touch: &ScheduledTouch, now: DateTime<Utc>) -> JitVerdict {
        // 1. Subscription.
        let tenant = match self.store.get_tenant(touch.client_id) {
            Some(t) => t,
            None => return JitVerdict::Skip(SkipReason::SubscriptionInactive),
        };
        if !tenant.subscription_status.can_send() {
            return JitVerdict::Skip(SkipReason::SubscriptionInactive);
        }

        // 2. Credits.
        if tenant.credits_remaining == 0 {
            return JitVerdict::Skip(SkipReason::CreditsExhausted);
        }

        // 3. Campaign.
        match self.store.get_campaign(touch.campaign_id) {
            Some(c) if c.status == CampaignStatus::Active => {}
            _ => return JitVerdict::Skip(SkipReason::CampaignInactive),
        }

        // 4. Lead view status.
        match self.store.get_lead_view(touch.client_id, touch.pool_lead_id) {
            Some(view) if !view.status.is_terminal() => {}
            Some(view) => return JitVerdict::Skip(SkipReason::LeadTerminal(view.status)),
            None => return JitVerdict::Skip(SkipReason::LeadTerminal(LeadStatus::Dead)),
        }

        // 5. Suppression (re-validated at send time, cache or not).
        let lead = match self.store.get_pool_lead(touch.pool_lead_id) {
            Some(l) => l,
            None => return JitVerdict::Skip(SkipReason::LeadTerminal(LeadStatus::Dead)),
        };
        if let Some(reason) =
            self.suppression
                .check(touch.client_id, Some(&lead.email), Some(&lead.domain))
        {
            return JitVerdict::Skip(SkipReason::Suppressed(reason.as_str().to_string()));
        }

        // 6. Rate token, atomic increment-if-under-cap.
        if let Some(cap) = self.rate.cap_for(touch.channel) {
            if !self
                .counters
                .try_acquire(touch.channel, &touch.resource_id, now, cap)
            {
                debug!(
                    touch_id = %touch.id,
                    resource = %touch.resource_id,
                    "rate token unavailable"
                );
                return JitVerdict::RateLimited;
            }
        }

        JitVerdict::Pass { lead }
    }
}
