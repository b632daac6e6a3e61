//! Outbound voice calls: call placement plus call-completed,
//! voicemail-left, and call-transcribed webhooks.

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
pub struct VoiceConfig {
    pub webhook_secret: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CallAnalytics {
    pub calls_placed: u64,
    pub completed: u64,
    pub voicemails: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceWebhookEvent {
    pub event_id: String,
    pub call_id: String,
    pub event: String,
    #[serde(default)]
    pub duration_secs: Option<u32>,
    #[serde(default)]
    pub transcript: Option<String>,
    pub timestamp: DateTime<Utc>,
}

pub struct VoiceAdapter {
    config: VoiceConfig,
    routing: RecipientRouting,
    analytics: DashMap<String, CallAnalytics>,
}

impl VoiceAdapter {
    pub fn new(config: VoiceConfig, routing: RecipientRouting) -> Self {
        info!(
            test_mode = matches!(routing, RecipientRouting::TestRedirect(_)),
            "voice adapter initialized"
        );
        Self {
            config,
            routing,
            analytics: DashMap::new(),
        }
    }

    pub fn analytics_for(&self, number: &str) -> Option<CallAnalytics> {
        self.analytics.get(number).map(|a| a.clone())
    }
}

#[async_trait]
impl ChannelAdapter for VoiceAdapter {
    fn channel(&self) -> Channel {
        Channel::Voice
    }

    async fn send(
        &self,
        envelope: &SendEnvelope,
        idempotency_key: &str,
    ) -> AgencyResult<SendReceipt> {
        if envelope.to.is_empty() {
            return Err(AgencyError::Validation(
                "voice touch requires a phone number".into(),
            ));
        }
        let to = self.routing.resolve(&envelope.to);

        debug!(to = %to, from = %envelope.from_resource, "placing call");
        metrics::counter!("channels.voice.calls").increment(1);

        // The body is the call script handed to the agent / AI caller.
        let _payload = serde_json::json!({
            "to": to,
            "from": envelope.from_resource,
            "script": envelope.body,
            "idempotency_key": idempotency_key,
        });

        self.analytics
            .entry(envelope.from_resource.clone())
            .or_default()
            .calls_placed += 1;

        Ok(SendReceipt {
            provider_message_id: format!("vc-{idempotency_key}"),
            deliverability_hint: None,
        })
    }

    fn parse_webhook(&self, raw: &RawWebhook) -> AgencyResult<Vec<ProviderEvent>> {
        let wire: Vec<VoiceWebhookEvent> = parse_signed_events(&self.config.webhook_secret, raw)?;

        wire.into_iter()
            .map(|event| {
                let kind = match event.event.as_str() {
                    "call_completed" => ProviderEventKind::CallCompleted {
                        duration_secs: event.duration_secs.unwrap_or(0),
                    },
                    "voicemail_left" => ProviderEventKind::VoicemailLeft,
                    "call_transcribed" => ProviderEventKind::CallTranscribed {
                        transcript: event.transcript.clone().unwrap_or_default(),
                    },
                    other => {
                        return Err(AgencyError::Validation(format!(
                            "unknown voice event type: {other}"
                        )))
                    }
                };
                Ok(ProviderEvent {
                    provider_event_id: event.event_id,
                    provider_message_id: event.call_id,
                    kind,
                    occurred_at: event.timestamp,
                })
            })
            .collect()
    }
}
