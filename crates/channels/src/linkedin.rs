//! LinkedIn outreach via a seat-automation provider: connection requests,
//! messages, and the connection-accept / message-received webhooks.

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
pub struct LinkedinConfig {
    pub webhook_secret: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SeatAnalytics {
    pub touches_sent: u64,
    pub connections_accepted: u64,
    pub messages_received: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkedinWebhookEvent {
    pub event_id: String,
    pub request_id: String,
    pub event: String,
    #[serde(default)]
    pub message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

pub struct LinkedinAdapter {
    config: LinkedinConfig,
    routing: RecipientRouting,
    analytics: DashMap<String, SeatAnalytics>,
}

impl LinkedinAdapter {
    pub fn new(config: LinkedinConfig, routing: RecipientRouting) -> Self {
        info!(
            test_mode = matches!(routing, RecipientRouting::TestRedirect(_)),
            "linkedin adapter initialized"
        );
        Self {
            config,
            routing,
            analytics: DashMap::new(),
        }
    }

    pub fn analytics_for(&self, seat: &str) -> Option<SeatAnalytics> {
        self.analytics.get(seat).map(|a| a.clone())
    }
}

#[async_trait]
impl ChannelAdapter for LinkedinAdapter {
    fn channel(&self) -> Channel {
        Channel::Linkedin
    }

    async fn send(
        &self,
        envelope: &SendEnvelope,
        idempotency_key: &str,
    ) -> AgencyResult<SendReceipt> {
        if envelope.to.is_empty() {
            return Err(AgencyError::Validation(
                "linkedin touch requires a profile handle".into(),
            ));
        }
        let profile = self.routing.resolve(&envelope.to);

        debug!(profile = %profile, seat = %envelope.from_resource, "sending linkedin touch");
        metrics::counter!("channels.linkedin.sent").increment(1);

        let _payload = serde_json::json!({
            "seat": envelope.from_resource,
            "profile_url": profile,
            "message": envelope.body,
            "idempotency_key": idempotency_key,
        });

        self.analytics
            .entry(envelope.from_resource.clone())
            .or_default()
            .touches_sent += 1;

        Ok(SendReceipt {
            provider_message_id: format!("li-{idempotency_key}"),
            deliverability_hint: None,
        })
    }

    fn parse_webhook(&self, raw: &RawWebhook) -> AgencyResult<Vec<ProviderEvent>> {
        let wire: Vec<LinkedinWebhookEvent> =
            parse_signed_events(&self.config.webhook_secret, raw)?;

        wire.into_iter()
            .map(|event| {
                let kind = match event.event.as_str() {
                    "connection_accepted" => ProviderEventKind::ConnectionAccepted,
                    "message_received" => ProviderEventKind::InboundMessage {
                        body: event.message.clone().unwrap_or_default(),
                    },
                    other => {
                        return Err(AgencyError::Validation(format!(
                            "unknown linkedin event type: {other}"
                        )))
                    }
                };
                Ok(ProviderEvent {
                    provider_event_id: event.event_id,
                    provider_message_id: event.request_id,
                    kind,
                    occurred_at: event.timestamp,
                })
            })
            .collect()
    }
}
