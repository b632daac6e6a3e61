//! SMS sending and delivery/inbound webhook handling.

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

/// Carrier limit for a single segment; longer bodies are rejected rather
/// than silently split.
const MAX_SMS_CHARS: usize = 480;

#[derive(Debug, Clone)]
pub struct SmsConfig {
    pub webhook_secret: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SmsAnalytics {
    pub total_sent: u64,
    pub delivered: u64,
    pub inbound: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmsWebhookEvent {
    pub event_id: String,
    pub message_sid: String,
    pub event: String,
    #[serde(default)]
    pub body: Option<String>,
    pub timestamp: DateTime<Utc>,
}

pub struct SmsAdapter {
    config: SmsConfig,
    routing: RecipientRouting,
    analytics: DashMap<String, SmsAnalytics>,
}

impl SmsAdapter {
    pub fn new(config: SmsConfig, routing: RecipientRouting) -> Self {
        info!(
            test_mode = matches!(routing, RecipientRouting::TestRedirect(_)),
            "sms adapter initialized"
        );
        Self {
            config,
            routing,
            analytics: DashMap::new(),
        }
    }

    pub fn analytics_for(&self, resource_id: &str) -> Option<SmsAnalytics> {
        self.analytics.get(resource_id).map(|a| a.clone())
    }
}

#[async_trait]
impl ChannelAdapter for SmsAdapter {
    fn channel(&self) -> Channel {
        Channel::Sms
    }

    async fn send(
        &self,
        envelope: &SendEnvelope,
        idempotency_key: &str,
    ) -> AgencyResult<SendReceipt> {
        if envelope.body.chars().count() > MAX_SMS_CHARS {
            return Err(AgencyError::Validation(format!(
                "sms body exceeds {MAX_SMS_CHARS} characters"
            )));
        }
        let to = self.routing.resolve(&envelope.to);

        debug!(to = %to, from = %envelope.from_resource, "sending sms");
        metrics::counter!("channels.sms.sent").increment(1);

        let _payload = serde_json::json!({
            "To": to,
            "From": envelope.from_resource,
            "Body": envelope.body,
            "IdempotencyKey": idempotency_key,
        });

        self.analytics
            .entry(envelope.from_resource.clone())
            .or_default()
            .total_sent += 1;

        Ok(SendReceipt {
            provider_message_id: format!("sm-{idempotency_key}"),
            deliverability_hint: None,
        })
    }

    fn parse_webhook(&self, raw: &RawWebhook) -> AgencyResult<Vec<ProviderEvent>> {
        let wire: Vec<SmsWebhookEvent> = parse_signed_events(&self.config.webhook_secret, raw)?;

        wire.into_iter()
            .map(|event| {
                let kind = match event.event.as_str() {
                    "delivered" => ProviderEventKind::Delivered,
                    "inbound" => ProviderEventKind::InboundMessage {
                        body: event.body.clone().unwrap_or_default(),
                    },
                    "undelivered" => ProviderEventKind::Bounced,
                    "opt_out" => ProviderEventKind::Unsubscribed,
                    other => {
                        return Err(AgencyError::Validation(format!(
                            "unknown sms event type: {other}"
                        )))
                    }
                };
                Ok(ProviderEvent {
                    provider_event_id: event.event_id,
                    provider_message_id: event.message_sid,
                    kind,
                    occurred_at: event.timestamp,
                })
            })
            .collect()
    }
}
