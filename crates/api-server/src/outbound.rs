//! Outbound webhooks — event notifications to client-configured URLs.
//!
//! Every delivery carries a deterministic `event_id` (receivers dedupe on
//! it) and an HMAC signature header, and retries up to 3 times with
//! backoff on non-2xx.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{info, warn};
use uuid::Uuid;

use agency_core::error::AgencyResult;

/// Events a client endpoint can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboundEvent {
    MeetingBooked,
    LeadConverted,
    Unsubscribe,
}

impl OutboundEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboundEvent::MeetingBooked => "meeting_booked",
            OutboundEvent::LeadConverted => "lead_converted",
            OutboundEvent::Unsubscribe => "unsubscribe",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEndpoint {
    pub id: Uuid,
    pub client_id: Uuid,
    pub url: String,
    pub events: Vec<OutboundEvent>,
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct WebhookDelivery {
    pub event_id: String,
    pub endpoint_id: Uuid,
    pub event_type: String,
    pub attempts: u32,
    pub success: bool,
    pub response_status: Option<u16>,
}

/// HTTP transport seam. Production: an HTTP client; tests inject stubs.
#[async_trait]
pub trait WebhookTransport: Send + Sync {
    async fn post(&self, url: &str, signature: &str, body: &str) -> AgencyResult<u16>;
}

/// Transport that only logs, for development mode.
pub struct LoggingTransport;

#[async_trait]
impl WebhookTransport for LoggingTransport {
    async fn post(&self, url: &str, _signature: &str, body: &str) -> AgencyResult<u16> {
        info!(url, bytes = body.len(), "outbound webhook (logging transport)");
        Ok(200)
    }
}

pub struct OutboundEmitter {
    endpoints: DashMap<Uuid, WebhookEndpoint>,
    deliveries: DashMap<Uuid, Vec<WebhookDelivery>>,
    transport: Arc<dyn WebhookTransport>,
    signing_secret: String,
    max_retries: u32,
}

impl OutboundEmitter {
    pub fn new(transport: Arc<dyn WebhookTransport>, signing_secret: &str) -> Self {
        Self {
            endpoints: DashMap::new(),
            deliveries: DashMap::new(),
            transport,
            signing_secret: signing_secret.to_string(),
            max_retries: 3,
        }
    }

    pub fn register(&self, endpoint: WebhookEndpoint) {
        self.endpoints.insert(endpoint.id, endpoint);
    }

    /// Deterministic event id: receivers dedupe on it across our retries.
    fn event_id(event: OutboundEvent, client_id: Uuid, subject_id: Uuid) -> String {
        let digest = Sha256::digest(
            format!("{}:{}:{}", event.as_str(), client_id, subject_id).as_bytes(),
        );
        hex::encode(&digest[..16])
    }

    /// Deliver one event to every subscribed endpoint of the client.
    pub async fn emit(
        &self,
        client_id: Uuid,
        event: OutboundEvent,
        subject_id: Uuid,
        payload: serde_json::Value,
    ) -> Vec<WebhookDelivery> {
        let event_id = Self::event_id(event, client_id, subject_id);
        let body = serde_json::json!({
            "event_id": event_id,
            "event_type": event.as_str(),
            "client_id": client_id,
            "occurred_at": Utc::now(),
            "data": payload,
        })
        .to_string();
        let signature = agency_channels::sign_payload(&self.signing_secret, &body);

        let targets: Vec<WebhookEndpoint> = self
            .endpoints
            .iter()
            .filter(|e| e.client_id == client_id && e.enabled && e.events.contains(&event))
            .map(|e| e.clone())
            .collect();

        let mut results = Vec::new();
        for endpoint in targets {
            let mut attempts = 0u32;
            let mut success = false;
            let mut response_status = None;

            while attempts < self.max_retries {
                attempts += 1;
                match self.transport.post(&endpoint.url, &signature, &body).await {
                    Ok(status) if (200..300).contains(&status) => {
                        success = true;
                        response_status = Some(status);
                        break;
                    }
                    Ok(status) => {
                        warn!(url = %endpoint.url, status, attempts, "webhook delivery non-2xx");
                        response_status = Some(status);
                    }
                    Err(e) => {
                        warn!(url = %endpoint.url, error = %e, attempts, "webhook delivery failed");
                    }
                }
                // Backoff between attempts.
                tokio::time::sleep(std::time::Duration::from_millis(
                    100 * u64::from(attempts) * u64::from(attempts),
                ))
                .await;
            }

            let delivery = WebhookDelivery {
                event_id: event_id.clone(),
                endpoint_id: endpoint.id,
                event_type: event.as_str().to_string(),
                attempts,
                success,
                response_status,
            };
            self.deliveries
                .entry(endpoint.id)
                .or_default()
                .push(delivery.clone());
            results.push(delivery);
        }
        results
    }

    pub fn deliveries_for(&self, endpoint_id: Uuid) -> Vec<WebhookDelivery> {
        self.deliveries
            .get(&endpoint_id)
            .map(|d| d.clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyTransport {
        calls: AtomicU32,
        fail_first: u32,
    }

    #[async_trait]
    impl WebhookTransport for FlakyTransport {
        async fn post(&self, _url: &str, _signature: &str, _body: &str) -> AgencyResult<u16> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_first {
                Ok(503)
            } else {
                Ok(200)
            }
        }
    }

    fn endpoint(client_id: Uuid) -> WebhookEndpoint {
        WebhookEndpoint {
            id: Uuid::new_v4(),
            client_id,
            url: "https://client.example/webhooks".into(),
            events: vec![OutboundEvent::MeetingBooked, OutboundEvent::Unsubscribe],
            enabled: true,
        }
    }

    #[tokio::test]
    async fn test_event_id_deterministic() {
        let client = Uuid::new_v4();
        let subject = Uuid::new_v4();
        assert_eq!(
            OutboundEmitter::event_id(OutboundEvent::MeetingBooked, client, subject),
            OutboundEmitter::event_id(OutboundEvent::MeetingBooked, client, subject)
        );
        assert_ne!(
            OutboundEmitter::event_id(OutboundEvent::MeetingBooked, client, subject),
            OutboundEmitter::event_id(OutboundEvent::Unsubscribe, client, subject)
        );
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let transport = Arc::new(FlakyTransport {
            calls: AtomicU32::new(0),
            fail_first: 2,
        });
        let emitter = OutboundEmitter::new(transport, "secret");
        let client = Uuid::new_v4();
        let ep = endpoint(client);
        let ep_id = ep.id;
        emitter.register(ep);

        let deliveries = emitter
            .emit(
                client,
                OutboundEvent::MeetingBooked,
                Uuid::new_v4(),
                serde_json::json!({"lead": "alice"}),
            )
            .await;
        assert_eq!(deliveries.len(), 1);
        assert!(deliveries[0].success);
        assert_eq!(deliveries[0].attempts, 3);
        assert_eq!(emitter.deliveries_for(ep_id).len(), 1);
    }

    #[tokio::test]
    async fn test_gives_up_after_three() {
        let transport = Arc::new(FlakyTransport {
            calls: AtomicU32::new(0),
            fail_first: 10,
        });
        let emitter = OutboundEmitter::new(transport, "secret");
        let client = Uuid::new_v4();
        emitter.register(endpoint(client));

        let deliveries = emitter
            .emit(
                client,
                OutboundEvent::Unsubscribe,
                Uuid::new_v4(),
                serde_json::json!({}),
            )
            .await;
        assert!(!deliveries[0].success);
        assert_eq!(deliveries[0].attempts, 3);
    }

    #[tokio::test]
    async fn test_unsubscribed_events_filtered() {
        let emitter = OutboundEmitter::new(Arc::new(LoggingTransport), "secret");
        let client = Uuid::new_v4();
        let mut ep = endpoint(client);
        ep.events = vec![OutboundEvent::MeetingBooked];
        emitter.register(ep);

        let deliveries = emitter
            .emit(
                client,
                OutboundEvent::Unsubscribe,
                Uuid::new_v4(),
                serde_json::json!({}),
            )
            .await;
        assert!(deliveries.is_empty());
    }
}
