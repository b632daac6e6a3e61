//! Reply ingestion — webhook-first, schedule-backed.
//!
//! Both paths feed the same `ingest` entry point with normalized provider
//! events. Ingestion is at-least-once; the (provider_event_id, event_type)
//! dedupe in the store makes the Activity/Message writes effectively
//! exactly-once.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use agency_core::config::ReplyConfig;
use agency_core::error::AgencyResult;
use agency_core::event_bus::{make_event, EventSink, OutreachEventType};
use agency_core::types::{
    Activity, ActivityAction, Direction, LeadStatus, Message, Thread, ThreadOutcome, ThreadStatus,
};
use agency_channels::{ProviderEvent, ProviderEventKind};
use agency_pool::PoolManager;
use agency_store::{AgencyStore, TouchQueue};
use agency_suppression::SuppressionIndex;

use crate::classifier::{Classification, ClassifyContext, ReplyClassifier, ESCALATION_THRESHOLD};
use crate::thread_machine::ThreadStateMachine;

#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestReport {
    pub processed: usize,
    pub duplicates: usize,
    pub unresolved: usize,
    pub escalated: usize,
    pub failed: usize,
}

/// A reply the classifier could not confidently label.
#[derive(Debug, Clone)]
pub struct ManualReviewItem {
    pub message_id: Uuid,
    pub thread_id: Uuid,
    pub text: String,
    pub confidence: f64,
    pub queued_at: DateTime<Utc>,
}

/// Safety-net: re-poll a provider's message API for events we may have
/// missed during a webhook outage.
#[async_trait]
pub trait MessagePoller: Send + Sync {
    async fn poll(&self, provider_message_id: &str) -> AgencyResult<Vec<ProviderEvent>>;
}

pub struct ReplyIngestor {
    store: Arc<AgencyStore>,
    queue: Arc<TouchQueue>,
    suppression: Arc<SuppressionIndex>,
    pool: Arc<PoolManager>,
    classifier: Arc<dyn ReplyClassifier>,
    machine: ThreadStateMachine,
    events: Arc<dyn EventSink>,
    config: ReplyConfig,
    manual_queue: DashMap<Uuid, ManualReviewItem>,
}

impl ReplyIngestor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<AgencyStore>,
        queue: Arc<TouchQueue>,
        suppression: Arc<SuppressionIndex>,
        pool: Arc<PoolManager>,
        classifier: Arc<dyn ReplyClassifier>,
        events: Arc<dyn EventSink>,
        config: ReplyConfig,
    ) -> Self {
        Self {
            store,
            queue,
            suppression,
            pool,
            classifier,
            machine: ThreadStateMachine::new(),
            events,
            config,
            manual_queue: DashMap::new(),
        }
    }

    /// Process a batch of normalized provider events.
    pub async fn ingest(&self, events: Vec<ProviderEvent>) -> AgencyResult<IngestReport> {
        let mut report = IngestReport::default();

        for event in events {
            if !self
                .store
                .record_provider_event(&event.provider_event_id, event.kind_label())
            {
                report.duplicates += 1;
                continue;
            }

            let Some(activity) = self
                .store
                .resolve_provider_message(&event.provider_message_id)
            else {
                warn!(
                    provider_message_id = %event.provider_message_id,
                    "webhook event does not resolve to an outbound activity"
                );
                report.unresolved += 1;
                continue;
            };

            // A bad event must not abort the batch: its dedupe mark is
            // already written, and a provider retry of the whole batch
            // would then skip everything as duplicates.
            match self.apply_event(&event, &activity).await {
                Ok(escalated) => {
                    if escalated {
                        report.escalated += 1;
                    }
                    report.processed += 1;
                }
                Err(e) => {
                    warn!(
                        provider_event_id = %event.provider_event_id,
                        error = %e,
                        "event processing failed"
                    );
                    report.failed += 1;
                }
            }
        }

        metrics::counter!("replies.events_processed").increment(report.processed as u64);
        Ok(report)
    }

    /// Apply one deduped, resolved event. Returns whether an inbound reply
    /// was escalated to manual review.
    async fn apply_event(&self, event: &ProviderEvent, activity: &Activity) -> AgencyResult<bool> {
        match &event.kind {
            ProviderEventKind::Delivered => {
                self.record_engagement(activity, ActivityAction::Delivered)
            }
            ProviderEventKind::Opened => self.record_engagement(activity, ActivityAction::Opened),
            ProviderEventKind::Clicked => {
                self.record_engagement(activity, ActivityAction::Clicked)
            }
            ProviderEventKind::ConnectionAccepted
            | ProviderEventKind::CallCompleted { .. }
            | ProviderEventKind::VoicemailLeft => {
                self.record_engagement(activity, ActivityAction::Delivered)
            }
            ProviderEventKind::Bounced => {
                self.record_engagement(activity, ActivityAction::Bounced);
                self.pool
                    .handle_bounce(activity.client_id, activity.pool_lead_id)?;
            }
            ProviderEventKind::Complained => {
                self.record_engagement(activity, ActivityAction::Complained);
                self.pool
                    .handle_complaint(activity.client_id, activity.pool_lead_id)?;
            }
            ProviderEventKind::Unsubscribed => {
                self.handle_unsubscribe(activity)?;
            }
            ProviderEventKind::InboundMessage { body } => {
                return self.handle_inbound(activity, body, event.occurred_at).await;
            }
            ProviderEventKind::CallTranscribed { transcript } => {
                return self
                    .handle_inbound(activity, transcript, event.occurred_at)
                    .await;
            }
        }
        Ok(false)
    }

    /// A classified inbound message. Returns whether it was escalated to
    /// manual review.
    async fn handle_inbound(
        &self,
        activity: &Activity,
        body: &str,
        occurred_at: DateTime<Utc>,
    ) -> AgencyResult<bool> {
        self.record_engagement(activity, ActivityAction::Replied);

        let thread = self.thread_for(activity);
        // A late reply revives a stale thread.
        if thread.status == ThreadStatus::Stale {
            if let Ok((status, outcome)) = self.machine.transition(
                ThreadStatus::Stale,
                ThreadStatus::Active,
                ThreadOutcome::Ongoing,
            ) {
                self.store.update_thread(thread.id, |t| {
                    t.status = status;
                    t.outcome = outcome;
                })?;
            }
        }

        let context = ClassifyContext {
            channel: Some(activity.channel),
            touch_number: activity.touch_number,
            previous_outbound: activity.content.as_ref().map(|c| c.body.clone()),
        };
        // Classifier failures keep the raw message: retry is side-effect
        // free, so a transient model error degrades to an escalation.
        let classification = match self.classifier.classify(body, &context).await {
            Ok(c) => Some(c),
            Err(e) => {
                warn!(error = %e, "classifier failed, persisting raw message");
                None
            }
        };

        let escalate = classification
            .as_ref()
            .map(|c| c.confidence < ESCALATION_THRESHOLD)
            .unwrap_or(true);

        let message = self.store.append_message(
            thread.id,
            Message {
                id: Uuid::new_v4(),
                thread_id: thread.id,
                direction: Direction::Inbound,
                content: body.to_string(),
                sentiment: classification.as_ref().map(|c| c.sentiment),
                intent: (!escalate)
                    .then(|| classification.as_ref().map(|c| c.intent))
                    .flatten(),
                objection_type: classification
                    .as_ref()
                    .and_then(|c| c.objection_type.clone()),
                question_text: classification.as_ref().and_then(|c| c.question_text.clone()),
                position: 0,
                provider_message_id: None,
                created_at: occurred_at,
            },
        )?;

        self.events.emit(make_event(
            OutreachEventType::ReplyReceived,
            Some(activity.client_id),
            Some(activity.pool_lead_id),
            None,
        ));

        if escalate {
            let confidence = classification.as_ref().map(|c| c.confidence).unwrap_or(0.0);
            self.manual_queue.insert(
                message.id,
                ManualReviewItem {
                    message_id: message.id,
                    thread_id: thread.id,
                    text: body.to_string(),
                    confidence,
                    queued_at: Utc::now(),
                },
            );
            info!(message_id = %message.id, confidence, "reply escalated to manual review");
            return Ok(true);
        }

        if let Some(classification) = classification {
            self.apply_intent(activity, &thread, &classification)?;
        }
        Ok(false)
    }

    fn apply_intent(
        &self,
        activity: &Activity,
        thread: &Thread,
        classification: &Classification,
    ) -> AgencyResult<()> {
        use agency_core::types::ReplyIntent;

        match classification.intent {
            ReplyIntent::Unsubscribe => self.handle_unsubscribe(activity)?,
            ReplyIntent::NotInterested => {
                if let Some(lead) = self.store.get_pool_lead(activity.pool_lead_id) {
                    self.suppression.suppress_cooling_off(
                        activity.client_id,
                        &lead.email,
                        self.config.cooling_off_months,
                    );
                }
                self.resolve_thread(thread, ThreadOutcome::Rejected)?;
                self.queue.cancel_matching(|t| {
                    t.client_id == activity.client_id && t.pool_lead_id == activity.pool_lead_id
                });
            }
            ReplyIntent::Interested => {
                // The thread stays ongoing; conversion lands via
                // `record_meeting` once a meeting record exists.
            }
            ReplyIntent::Question | ReplyIntent::Objection | ReplyIntent::OutOfScope => {}
        }
        Ok(())
    }

    /// Unsubscribe: suppression entry, terminal lead view, rejected thread,
    /// pending touches dropped.
    fn handle_unsubscribe(&self, activity: &Activity) -> AgencyResult<()> {
        self.record_engagement(activity, ActivityAction::Unsubscribed);
        if let Some(lead) = self.store.get_pool_lead(activity.pool_lead_id) {
            self.suppression
                .suppress_unsubscribe(activity.client_id, &lead.email);
        }
        self.store
            .update_lead_view(activity.client_id, activity.pool_lead_id, |view| {
                view.status = LeadStatus::Unsubscribed;
                view.next_scheduled_at = None;
            })?;
        let thread = self.thread_for(activity);
        self.resolve_thread(&thread, ThreadOutcome::Rejected)?;
        self.store.set_cancelled(agency_store::CancelScope::Lead {
            client_id: activity.client_id,
            pool_lead_id: activity.pool_lead_id,
        });
        self.queue.cancel_matching(|t| {
            t.client_id == activity.client_id && t.pool_lead_id == activity.pool_lead_id
        });
        self.events.emit(make_event(
            OutreachEventType::LeadUnsubscribed,
            Some(activity.client_id),
            Some(activity.pool_lead_id),
            None,
        ));
        Ok(())
    }

    /// A meeting was booked for this lead: converted outcome, permanent
    /// binding, attribution backfill.
    pub fn record_meeting(&self, client_id: Uuid, pool_lead_id: Uuid) -> AgencyResult<()> {
        let window = self
            .store
            .get_tenant(client_id)
            .map(|t| t.policy.attribution_window_days)
            .unwrap_or(90);

        for thread in self.store.list_threads() {
            if thread.client_id == client_id
                && thread.pool_lead_id == pool_lead_id
                && thread.outcome == ThreadOutcome::Ongoing
            {
                self.resolve_thread(&thread, ThreadOutcome::Converted)?;
            }
        }
        self.pool.record_conversion(client_id, pool_lead_id, window)
    }

    /// Mark threads with no inbound inside the window as stale/no-response.
    pub fn mark_stale_threads(&self, now: DateTime<Utc>) -> usize {
        let cutoff = Duration::days(i64::from(self.config.stale_after_days));
        let mut marked = 0usize;
        for thread in self.store.list_threads() {
            if thread.status != ThreadStatus::Active || thread.outcome != ThreadOutcome::Ongoing {
                continue;
            }
            let Some(last_outbound) = thread.last_outbound_at else {
                continue;
            };
            let quiet = thread
                .last_inbound_at
                .map_or(true, |inbound| inbound < last_outbound);
            if quiet && now - last_outbound > cutoff {
                if self
                    .store
                    .update_thread(thread.id, |t| {
                        t.status = ThreadStatus::Stale;
                        t.outcome = ThreadOutcome::NoResponse;
                    })
                    .is_ok()
                {
                    marked += 1;
                }
            }
        }
        if marked > 0 {
            info!(marked, "threads marked stale");
        }
        marked
    }

    /// Safety-net sweep: re-poll the provider for every outbound activity
    /// with no event inside the reconciliation window. Idempotent — events
    /// carry provider ids and replays dedupe.
    pub async fn sweep(
        &self,
        poller: &dyn MessagePoller,
        window: Duration,
    ) -> AgencyResult<IngestReport> {
        let older_than = Utc::now() - window;
        let unreconciled = self.store.unreconciled_outbound(older_than);
        info!(count = unreconciled.len(), "safety-net sweep starting");

        let mut collected = Vec::new();
        for activity in unreconciled {
            if let Some(pmid) = &activity.provider_message_id {
                match poller.poll(pmid).await {
                    Ok(events) => collected.extend(events),
                    Err(e) => warn!(provider_message_id = %pmid, error = %e, "sweep poll failed"),
                }
            }
        }
        self.ingest(collected).await
    }

    pub fn manual_queue(&self) -> Vec<ManualReviewItem> {
        self.manual_queue.iter().map(|i| i.value().clone()).collect()
    }

    // ─── helpers ────────────────────────────────────────────────────────────

    fn thread_for(&self, activity: &Activity) -> Thread {
        activity
            .thread_id
            .and_then(|id| self.store.get_thread(id))
            .unwrap_or_else(|| {
                self.store.get_or_create_thread(
                    activity.client_id,
                    activity.pool_lead_id,
                    activity.channel,
                )
            })
    }

    fn resolve_thread(&self, thread: &Thread, outcome: ThreadOutcome) -> AgencyResult<()> {
        let current = self.store.get_thread(thread.id).unwrap_or(thread.clone());
        match self
            .machine
            .transition(current.status, ThreadStatus::Resolved, outcome)
        {
            Ok((status, outcome)) => self.store.update_thread(thread.id, |t| {
                t.status = status;
                t.outcome = outcome;
            })?,
            Err(e) => {
                warn!(thread_id = %thread.id, error = %e, "thread transition refused");
                return Ok(());
            }
        };
        Ok(())
    }

    /// Engagement events append to the log only while the assignment is
    /// live; events after termination are dropped by the referential guard.
    fn record_engagement(&self, source: &Activity, action: ActivityAction) {
        let activity = Activity {
            id: Uuid::new_v4(),
            client_id: source.client_id,
            campaign_id: source.campaign_id,
            pool_lead_id: source.pool_lead_id,
            channel: source.channel,
            action,
            resource_id: source.resource_id.clone(),
            provider_message_id: source.provider_message_id.clone(),
            thread_id: source.thread_id,
            touch_number: source.touch_number,
            sent_at: Utc::now(),
            content: None,
            led_to_booking: false,
            skip_reason: None,
        };
        if let Err(e) = self.store.insert_activity(activity) {
            warn!(error = %e, "engagement activity not recorded");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::KeywordClassifier;
    use agency_core::event_bus::capture_sink;
    use agency_core::types::{Channel, PoolLead, TouchStatus};
    use agency_suppression::SuppressionReason;

    struct Fixture {
        store: Arc<AgencyStore>,
        queue: Arc<TouchQueue>,
        suppression: Arc<SuppressionIndex>,
        ingestor: ReplyIngestor,
        client_id: Uuid,
        lead_id: Uuid,
        campaign_id: Uuid,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(AgencyStore::new());
        let queue = Arc::new(TouchQueue::new());
        let suppression = Arc::new(SuppressionIndex::new(vec![]));
        let pool = Arc::new(PoolManager::new(
            store.clone(),
            queue.clone(),
            suppression.clone(),
            capture_sink(),
        ));
        let ingestor = ReplyIngestor::new(
            store.clone(),
            queue.clone(),
            suppression.clone(),
            pool,
            Arc::new(KeywordClassifier),
            capture_sink(),
            ReplyConfig::default(),
        );

        let client_id = Uuid::new_v4();
        let campaign_id = Uuid::new_v4();
        let lead_id = store.upsert_pool_lead(PoolLead::from_email("alice@corp.com"));
        store
            .try_assign(client_id, lead_id, campaign_id, None)
            .expect("assign");

        Fixture {
            store,
            queue,
            suppression,
            ingestor,
            client_id,
            lead_id,
            campaign_id,
        }
    }

    fn outbound(f: &Fixture, pmid: &str) -> Activity {
        let thread = f
            .store
            .get_or_create_thread(f.client_id, f.lead_id, Channel::Email);
        let activity = Activity {
            id: Uuid::new_v4(),
            client_id: f.client_id,
            campaign_id: f.campaign_id,
            pool_lead_id: f.lead_id,
            channel: Channel::Email,
            action: ActivityAction::Sent,
            resource_id: "mb-1".into(),
            provider_message_id: Some(pmid.to_string()),
            thread_id: Some(thread.id),
            touch_number: 1,
            sent_at: Utc::now(),
            content: None,
            led_to_booking: false,
            skip_reason: None,
        };
        f.store.insert_activity(activity.clone()).expect("insert");
        f.store
            .append_message(
                thread.id,
                Message {
                    id: Uuid::new_v4(),
                    thread_id: thread.id,
                    direction: Direction::Outbound,
                    content: "hi".into(),
                    sentiment: None,
                    intent: None,
                    objection_type: None,
                    question_text: None,
                    position: 0,
                    provider_message_id: Some(pmid.to_string()),
                    created_at: Utc::now(),
                },
            )
            .expect("message");
        activity
    }

    fn inbound_event(pmid: &str, event_id: &str, body: &str) -> ProviderEvent {
        ProviderEvent {
            provider_event_id: event_id.into(),
            provider_message_id: pmid.into(),
            kind: ProviderEventKind::InboundMessage { body: body.into() },
            occurred_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_unsubscribe_end_to_end() {
        let f = fixture();
        let activity = outbound(&f, "em-1");

        // A pending touch that should be dropped by the unsubscribe.
        f.queue.push(agency_core::types::ScheduledTouch {
            id: Uuid::new_v4(),
            client_id: f.client_id,
            campaign_id: f.campaign_id,
            pool_lead_id: f.lead_id,
            channel: Channel::Email,
            resource_id: "mb-1".into(),
            due_at: Utc::now() + Duration::days(1),
            touch_number: 2,
            template_ref: "follow_up".into(),
            enhanced: false,
            status: TouchStatus::Pending,
            attempts: 0,
            requeues: 0,
            lease_expires_at: None,
            last_error: None,
        });

        let report = f
            .ingestor
            .ingest(vec![inbound_event("em-1", "evt-1", "please remove me from your list")])
            .await
            .expect("ingest");
        assert_eq!(report.processed, 1);

        // Suppression entry written, tenant-scoped.
        assert_eq!(
            f.suppression.check(f.client_id, Some("alice@corp.com"), None),
            Some(SuppressionReason::Unsubscribe)
        );
        // Lead view terminal.
        let view = f.store.get_lead_view(f.client_id, f.lead_id).expect("view");
        assert_eq!(view.status, LeadStatus::Unsubscribed);
        // Thread rejected.
        let thread = f.store.get_thread(activity.thread_id.expect("tid")).expect("thread");
        assert_eq!(thread.outcome, ThreadOutcome::Rejected);
        assert_eq!(thread.status, ThreadStatus::Resolved);
        // Pending touch cancelled.
        assert_eq!(f.queue.snapshot().cancelled, 1);
    }

    #[tokio::test]
    async fn test_duplicate_events_dedupe() {
        let f = fixture();
        outbound(&f, "em-1");

        let event = ProviderEvent {
            provider_event_id: "evt-9".into(),
            provider_message_id: "em-1".into(),
            kind: ProviderEventKind::Opened,
            occurred_at: Utc::now(),
        };
        let first = f.ingestor.ingest(vec![event.clone()]).await.expect("ingest");
        assert_eq!(first.processed, 1);

        let replay = f.ingestor.ingest(vec![event]).await.expect("ingest");
        assert_eq!(replay.processed, 0);
        assert_eq!(replay.duplicates, 1);

        // Exactly one opened activity exists.
        let opens = f
            .store
            .activities_for_lead(f.client_id, f.lead_id)
            .into_iter()
            .filter(|a| a.action == ActivityAction::Opened)
            .count();
        assert_eq!(opens, 1);
    }

    #[tokio::test]
    async fn test_not_interested_gets_cooling_off() {
        let f = fixture();
        outbound(&f, "em-1");

        f.ingestor
            .ingest(vec![inbound_event("em-1", "evt-1", "no thanks, we're good")])
            .await
            .expect("ingest");

        let entries = f.suppression.entries_for(Some(f.client_id));
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].reason, SuppressionReason::CoolingOff);
        assert!(entries[0].expires_at.is_some());
    }

    #[tokio::test]
    async fn test_interested_then_meeting_converts_and_backfills() {
        let f = fixture();
        outbound(&f, "em-1");

        f.ingestor
            .ingest(vec![inbound_event(
                "em-1",
                "evt-1",
                "sounds good, can you book a demo?",
            )])
            .await
            .expect("ingest");

        f.ingestor
            .record_meeting(f.client_id, f.lead_id)
            .expect("meeting");

        assert_eq!(f.store.converted_owner(f.lead_id), Some(f.client_id));
        let sent: Vec<Activity> = f
            .store
            .activities_for_lead(f.client_id, f.lead_id)
            .into_iter()
            .filter(|a| a.action == ActivityAction::Sent)
            .collect();
        assert!(sent.iter().all(|a| a.led_to_booking));
    }

    #[tokio::test]
    async fn test_ambiguous_reply_escalates() {
        let f = fixture();
        outbound(&f, "em-1");

        let report = f
            .ingestor
            .ingest(vec![inbound_event("em-1", "evt-1", "fwd: see attachment")])
            .await
            .expect("ingest");
        assert_eq!(report.escalated, 1);
        assert_eq!(f.ingestor.manual_queue().len(), 1);
    }

    #[tokio::test]
    async fn test_bounce_terminates_and_suppresses() {
        let f = fixture();
        outbound(&f, "em-1");

        f.ingestor
            .ingest(vec![ProviderEvent {
                provider_event_id: "evt-b".into(),
                provider_message_id: "em-1".into(),
                kind: ProviderEventKind::Bounced,
                occurred_at: Utc::now(),
            }])
            .await
            .expect("ingest");

        let view = f.store.get_lead_view(f.client_id, f.lead_id).expect("view");
        assert_eq!(view.status, LeadStatus::Bounced);
        // Global suppression: other tenants see the bounce too.
        assert_eq!(
            f.suppression.check(Uuid::new_v4(), Some("alice@corp.com"), None),
            Some(SuppressionReason::Bounce)
        );
    }

    #[tokio::test]
    async fn test_sweep_reconciles_missed_bounce() {
        let f = fixture();
        let activity = outbound(&f, "em-2");

        struct BouncePoller;
        #[async_trait]
        impl MessagePoller for BouncePoller {
            async fn poll(&self, pmid: &str) -> AgencyResult<Vec<ProviderEvent>> {
                Ok(vec![ProviderEvent {
                    provider_event_id: format!("poll-{pmid}"),
                    provider_message_id: pmid.to_string(),
                    kind: ProviderEventKind::Bounced,
                    occurred_at: Utc::now(),
                }])
            }
        }

        // Window of zero: everything outbound is overdue for reconciliation.
        let report = f
            .ingestor
            .sweep(&BouncePoller, Duration::seconds(0))
            .await
            .expect("sweep");
        assert_eq!(report.processed, 1);

        let bounced = f
            .store
            .activities_for_lead(f.client_id, f.lead_id)
            .into_iter()
            .any(|a| a.action == ActivityAction::Bounced);
        assert!(bounced);
        let view = f.store.get_lead_view(f.client_id, f.lead_id).expect("view");
        assert_eq!(view.status, LeadStatus::Bounced);

        // Sweeping again is a no-op thanks to the event dedupe.
        let again = f
            .ingestor
            .sweep(&BouncePoller, Duration::seconds(0))
            .await
            .expect("sweep");
        assert_eq!(again.processed, 0);
        let _ = activity;
    }

    #[tokio::test]
    async fn test_stale_marking() {
        let f = fixture();
        let activity = outbound(&f, "em-1");
        let thread_id = activity.thread_id.expect("thread");

        // Fresh thread: not stale yet.
        assert_eq!(f.ingestor.mark_stale_threads(Utc::now()), 0);

        // 31 days later with no inbound: stale.
        let later = Utc::now() + Duration::days(31);
        assert_eq!(f.ingestor.mark_stale_threads(later), 1);
        let thread = f.store.get_thread(thread_id).expect("thread");
        assert_eq!(thread.status, ThreadStatus::Stale);
        assert_eq!(thread.outcome, ThreadOutcome::NoResponse);
    }
}
