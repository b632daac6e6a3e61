//! Unified event bus — trait for emitting observability events from any
//! module.
//!
//! Modules accept an `Arc<dyn EventSink>` to surface operational events
//! (skips, dead-letters, budget exhaustion, conversions) to dashboards and
//! tests without coupling to a transport.

use crate::types::Channel;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OutreachEventType {
    TouchSent,
    TouchSkipped,
    TouchRequeued,
    TouchCancelled,
    TouchDeadLettered,
    TouchDropped,
    ReplyReceived,
    LeadConverted,
    LeadUnsubscribed,
    LeadBounced,
    AssignmentCreated,
    AssignmentReleased,
    SuppressionAdded,
    EnrichmentPerformed,
    BudgetExhausted,
    PatternComputed,
    WebhookDelivered,
    WebhookFailed,
}

/// A single observability event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutreachEvent {
    pub event_id: Uuid,
    pub event_type: OutreachEventType,
    pub client_id: Option<Uuid>,
    pub pool_lead_id: Option<Uuid>,
    pub campaign_id: Option<Uuid>,
    pub channel: Option<Channel>,
    pub detail: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Trait for emitting observability events.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: OutreachEvent);
}

/// No-op sink for tests and modules that don't need event emission.
pub struct NoOpSink;

impl EventSink for NoOpSink {
    fn emit(&self, _event: OutreachEvent) {}
}

/// In-memory sink that captures events for testing and the dashboard
/// snapshot.
#[derive(Default)]
pub struct CaptureSink {
    events: Mutex<Vec<OutreachEvent>>,
}

impl CaptureSink {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn events(&self) -> Vec<OutreachEvent> {
        self.events.lock().expect("event bus mutex poisoned").clone()
    }

    pub fn count(&self) -> usize {
        self.events.lock().expect("event bus mutex poisoned").len()
    }

    pub fn count_type(&self, event_type: OutreachEventType) -> usize {
        self.events
            .lock()
            .expect("event bus mutex poisoned")
            .iter()
            .filter(|e| e.event_type == event_type)
            .count()
    }

    pub fn clear(&self) {
        self.events.lock().expect("event bus mutex poisoned").clear();
    }
}

impl EventSink for CaptureSink {
    fn emit(&self, event: OutreachEvent) {
        self.events.lock().expect("event bus mutex poisoned").push(event);
    }
}

/// Convenience builder for creating `OutreachEvent` with minimal boilerplate.
pub fn make_event(
    event_type: OutreachEventType,
    client_id: Option<Uuid>,
    pool_lead_id: Option<Uuid>,
    detail: Option<String>,
) -> OutreachEvent {
    OutreachEvent {
        event_id: Uuid::new_v4(),
        event_type,
        client_id,
        pool_lead_id,
        campaign_id: None,
        channel: None,
        detail,
        timestamp: Utc::now(),
    }
}

/// Convenience: create a no-op event bus for modules that don't need it.
pub fn noop_sink() -> Arc<dyn EventSink> {
    Arc::new(NoOpSink)
}

/// Convenience: create a capture sink for tests.
pub fn capture_sink() -> Arc<CaptureSink> {
    Arc::new(CaptureSink::new())
}
