//! Channel adapters — one per outreach channel, all behind the
//! `ChannelAdapter` contract: `send(envelope, idempotency_key)` and
//! `parse_webhook(raw)`.
//!
//! `TEST_MODE` is a hard invariant enforced at adapter construction: every
//! recipient is rewritten to the operator address and no real recipient is
//! ever contacted.

pub mod email;
pub mod linkedin;
pub mod mail;
pub mod sms;
pub mod voice;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use uuid::Uuid;

use agency_core::error::{AgencyError, AgencyResult};
use agency_core::types::Channel;

pub use email::EmailAdapter;
pub use linkedin::LinkedinAdapter;
pub use mail::DirectMailAdapter;
pub use sms::SmsAdapter;
pub use voice::VoiceAdapter;

// ─── Send contract ──────────────────────────────────────────────────────────

/// Everything an adapter needs to materialize one touch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendEnvelope {
    pub touch_id: Uuid,
    pub client_id: Uuid,
    pub pool_lead_id: Uuid,
    pub channel: Channel,
    /// Recipient address / phone number / profile handle.
    pub to: String,
    /// Sending resource (mailbox, seat, number) on the platform side.
    pub from_resource: String,
    pub subject: Option<String>,
    pub body: String,
    /// Previous outbound provider message id, so email follow-ups collapse
    /// into one thread in the recipient's client.
    pub in_reply_to: Option<String>,
    pub template_ref: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendReceipt {
    pub provider_message_id: String,
    pub deliverability_hint: Option<String>,
}

// ─── Webhook contract ───────────────────────────────────────────────────────

/// Raw webhook as received by the HTTP layer.
#[derive(Debug, Clone)]
pub struct RawWebhook {
    pub body: String,
    /// Hex-encoded HMAC-SHA256 of the body.
    pub signature: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum ProviderEventKind {
    Delivered,
    Opened,
    Clicked,
    Bounced,
    Complained,
    Unsubscribed,
    InboundMessage { body: String },
    ConnectionAccepted,
    CallCompleted { duration_secs: u32 },
    VoicemailLeft,
    CallTranscribed { transcript: String },
}

/// A normalized provider event, deduped downstream on
/// (provider_event_id, kind).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderEvent {
    pub provider_event_id: String,
    pub provider_message_id: String,
    pub kind: ProviderEventKind,
    pub occurred_at: DateTime<Utc>,
}

impl ProviderEvent {
    /// Stable event-type label used as the dedupe key component.
    pub fn kind_label(&self) -> &'static str {
        match self.kind {
            ProviderEventKind::Delivered => "delivered",
            ProviderEventKind::Opened => "opened",
            ProviderEventKind::Clicked => "clicked",
            ProviderEventKind::Bounced => "bounced",
            ProviderEventKind::Complained => "complained",
            ProviderEventKind::Unsubscribed => "unsubscribed",
            ProviderEventKind::InboundMessage { .. } => "inbound_message",
            ProviderEventKind::ConnectionAccepted => "connection_accepted",
            ProviderEventKind::CallCompleted { .. } => "call_completed",
            ProviderEventKind::VoicemailLeft => "voicemail_left",
            ProviderEventKind::CallTranscribed { .. } => "call_transcribed",
        }
    }
}

// ─── Test mode ──────────────────────────────────────────────────────────────

/// Recipient routing policy fixed at adapter construction.
#[derive(Debug, Clone)]
pub enum RecipientRouting {
    Live,
    /// Every send goes to this operator address/number instead of the real
    /// recipient.
    TestRedirect(String),
}

impl RecipientRouting {
    pub fn from_test_mode(test_mode: bool, operator: &str) -> Self {
        if test_mode {
            RecipientRouting::TestRedirect(operator.to_string())
        } else {
            RecipientRouting::Live
        }
    }

    pub fn resolve<'a>(&'a self, requested: &'a str) -> &'a str {
        match self {
            RecipientRouting::Live => requested,
            RecipientRouting::TestRedirect(operator) => operator,
        }
    }
}

// ─── Adapter trait ──────────────────────────────────────────────────────────

#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    fn channel(&self) -> Channel;

    /// Send one touch. `idempotency_key` is forwarded to the provider where
    /// supported, so a crashed worker retrying the same touch cannot
    /// produce a second delivery.
    async fn send(&self, envelope: &SendEnvelope, idempotency_key: &str)
        -> AgencyResult<SendReceipt>;

    /// Verify and normalize one provider webhook into events.
    fn parse_webhook(&self, raw: &RawWebhook) -> AgencyResult<Vec<ProviderEvent>>;
}

// ─── Signature verification ─────────────────────────────────────────────────

type HmacSha256 = Hmac<Sha256>;

/// Hex-encoded HMAC-SHA256 signature over a payload.
pub fn sign_payload(secret: &str, payload: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac accepts any key length");
    mac.update(payload.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Constant-time-ish verification via the hmac crate's verify.
pub fn verify_signature(secret: &str, payload: &str, signature_hex: &str) -> AgencyResult<()> {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac accepts any key length");
    mac.update(payload.as_bytes());
    let expected = hex::decode(signature_hex)
        .map_err(|_| AgencyError::Validation("signature is not valid hex".into()))?;
    mac.verify_slice(&expected)
        .map_err(|_| AgencyError::Validation("webhook signature mismatch".into()))
}

/// Shared helper: verify, then deserialize the body into the adapter's wire
/// event list.
pub(crate) fn parse_signed_events<T: serde::de::DeserializeOwned>(
    secret: &str,
    raw: &RawWebhook,
) -> AgencyResult<T> {
    verify_signature(secret, &raw.body, &raw.signature)?;
    serde_json::from_str(&raw.body)
        .map_err(|e| AgencyError::Validation(format!("malformed webhook payload: {e}")))
}
