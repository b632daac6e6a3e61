//! Email sending with delivery analytics.
//!
//! Builds the provider API payload and processes inbound webhook events for
//! tracking: delivered, opened, clicked, bounced, complained, unsubscribed,
//! and inbound replies.

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
pub struct EmailConfig {
    pub from_name: String,
    pub webhook_secret: String,
    pub open_tracking: bool,
    pub click_tracking: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct EmailAnalytics {
    pub total_sent: u64,
    pub delivered: u64,
    pub opens: u64,
    pub clicks: u64,
    pub bounces: u64,
    pub complaints: u64,
    pub unsubscribes: u64,
    pub replies: u64,
}

/// Wire shape of one provider webhook event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailWebhookEvent {
    pub event_id: String,
    pub message_id: String,
    pub event: String,
    #[serde(default)]
    pub reply_body: Option<String>,
    pub timestamp: DateTime<Utc>,
}

pub struct EmailAdapter {
    config: EmailConfig,
    routing: RecipientRouting,
    /// Per-mailbox analytics keyed by resource id.
    analytics: DashMap<String, EmailAnalytics>,
}

impl EmailAdapter {
    pub fn new(config: EmailConfig, routing: RecipientRouting) -> Self {
        info!(
            from = %config.from_name,
            test_mode = matches!(routing, RecipientRouting::TestRedirect(_)),
            "email adapter initialized"
        );
        Self {
            config,
            routing,
            analytics: DashMap::new(),
        }
    }

    pub fn analytics_for(&self, resource_id: &str) -> Option<EmailAnalytics> {
        self.analytics.get(resource_id).map(|a| a.clone())
    }

    fn bump(&self, resource_id: &str, f: impl FnOnce(&mut EmailAnalytics)) {
        let mut entry = self.analytics.entry(resource_id.to_string()).or_default();
        f(&mut entry);
    }
}

#[async_trait]
impl ChannelAdapter for EmailAdapter {
    fn channel(&self) -> Channel {
        Channel::Email
    }

    async fn send(
        &self,
        envelope: &SendEnvelope,
        idempotency_key: &str,
    ) -> AgencyResult<SendReceipt> {
        let to = self.routing.resolve(&envelope.to);
        let subject = envelope
            .subject
            .as_deref()
            .ok_or_else(|| AgencyError::Validation("email touch requires a subject".into()))?;

        debug!(
            to = %to,
            mailbox = %envelope.from_resource,
            subject = %subject,
            in_reply_to = ?envelope.in_reply_to,
            "sending email"
        );
        metrics::counter!("channels.email.sent").increment(1);

        // Provider API payload (stub — production POSTs to the vendor).
        let _payload = serde_json::json!({
            "personalizations": [{
                "to": [{"email": to}],
                "headers": envelope.in_reply_to.as_ref().map(|id| {
                    serde_json::json!({"In-Reply-To": id, "References": id})
                }),
                "custom_args": {
                    "touch_id": envelope.touch_id,
                    "idempotency_key": idempotency_key,
                }
            }],
            "from": {"email": envelope.from_resource, "name": self.config.from_name},
            "subject": subject,
            "content": [{"type": "text/html", "value": envelope.body}],
            "tracking_settings": {
                "open_tracking": {"enable": self.config.open_tracking},
                "click_tracking": {"enable": self.config.click_tracking},
            }
        });

        self.bump(&envelope.from_resource, |a| a.total_sent += 1);

        // The provider message id is derived from the idempotency key so a
        // retried send maps to the same message.
        Ok(SendReceipt {
            provider_message_id: format!("em-{idempotency_key}"),
            deliverability_hint: Some("queued".into()),
        })
    }

    fn parse_webhook(&self, raw: &RawWebhook) -> AgencyResult<Vec<ProviderEvent>> {
        let wire: Vec<EmailWebhookEvent> =
            parse_signed_events(&self.config.webhook_secret, raw)?;

        let mut events = Vec::with_capacity(wire.len());
        for event in wire {
            let kind = match event.event.as_str() {
                "delivered" => ProviderEventKind::Delivered,
                "open" => ProviderEventKind::Opened,
                "click" => ProviderEventKind::Clicked,
                "bounce" => ProviderEventKind::Bounced,
                "spamreport" => ProviderEventKind::Complained,
                "unsubscribe" => ProviderEventKind::Unsubscribed,
                "inbound" => ProviderEventKind::InboundMessage {
                    body: event.reply_body.clone().unwrap_or_default(),
                },
                other => {
                    return Err(AgencyError::Validation(format!(
                        "unknown email event type: {other}"
                    )))
                }
            };
            events.push(ProviderEvent {
                provider_event_id: event.event_id,
                provider_message_id: event.message_id,
                kind,
                occurred_at: event.timestamp,
            });
        }
        metrics::counter!("channels.email.webhook_events").increment(events.len() as u64);
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sign_payload;
    use uuid::Uuid;

    fn adapter(routing: RecipientRouting) -> EmailAdapter {
        EmailAdapter::new(
            EmailConfig {
                from_name: "Agency".into(),
                webhook_secret: "secret".into(),
                open_tracking: true,
                click_tracking: true,
            },
            routing,
        )
    }

    fn envelope() -> SendEnvelope {
        SendEnvelope {
            touch_id: Uuid::new_v4(),
            client_id: Uuid::new_v4(),
            pool_lead_id: Uuid::new_v4(),
            channel: Channel::Email,
            to: "alice@corp.com".into(),
            from_resource: "sdr1@agency.com".into(),
            subject: Some("Quick question".into()),
            body: "<p>Hi Alice</p>".into(),
            in_reply_to: None,
            template_ref: "intro".into(),
        }
    }

    #[tokio::test]
    async fn test_send_is_idempotent_on_key() {
        let adapter = adapter(RecipientRouting::Live);
        let envelope = envelope();

        let a = adapter.send(&envelope, "key-1").await.expect("send");
        let b = adapter.send(&envelope, "key-1").await.expect("send");
        assert_eq!(a.provider_message_id, b.provider_message_id);
    }

    #[tokio::test]
    async fn test_subject_required() {
        let adapter = adapter(RecipientRouting::Live);
        let mut envelope = envelope();
        envelope.subject = None;
        let err = adapter.send(&envelope, "k").await.expect_err("no subject");
        assert_eq!(err.code(), "validation");
    }

    #[tokio::test]
    async fn test_analytics_count_sends() {
        let adapter = adapter(RecipientRouting::Live);
        let envelope = envelope();
        adapter.send(&envelope, "k1").await.expect("send");
        adapter.send(&envelope, "k2").await.expect("send");

        let analytics = adapter.analytics_for("sdr1@agency.com").expect("analytics");
        assert_eq!(analytics.total_sent, 2);
    }

    #[test]
    fn test_webhook_signature_enforced() {
        let adapter = adapter(RecipientRouting::Live);
        let body = serde_json::json!([{
            "event_id": "evt-1",
            "message_id": "em-x",
            "event": "open",
            "timestamp": Utc::now(),
        }])
        .to_string();

        let bad = RawWebhook {
            body: body.clone(),
            signature: "00".into(),
        };
        assert!(adapter.parse_webhook(&bad).is_err());

        let good = RawWebhook {
            signature: sign_payload("secret", &body),
            body,
        };
        let events = adapter.parse_webhook(&good).expect("parse");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, ProviderEventKind::Opened);
    }

    #[test]
    fn test_inbound_reply_carries_body() {
        let adapter = adapter(RecipientRouting::Live);
        let body = serde_json::json!([{
            "event_id": "evt-2",
            "message_id": "em-x",
            "event": "inbound",
            "reply_body": "sounds interesting, tell me more",
            "timestamp": Utc::now(),
        }])
        .to_string();
        let raw = RawWebhook {
            signature: sign_payload("secret", &body),
            body,
        };

        let events = adapter.parse_webhook(&raw).expect("parse");
        match &events[0].kind {
            ProviderEventKind::InboundMessage { body } => {
                assert!(body.contains("interesting"));
            }
            other => panic!("expected inbound message, got {other:?}"),
        }
    }
}
