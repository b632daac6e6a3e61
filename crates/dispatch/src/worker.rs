//! The dispatch worker loop: claim a due touch, re-validate, send, record.
//!
//! This is the only component in the system that recovers from errors
//! locally. Everything it waits on — the queue, the store, the rate token,
//! the adapter — is a yield point, and the cancellation flag is checked
//! after each one.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use sha2::{Digest, Sha256};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use agency_core::event_bus::{make_event, OutreachEventType};
use agency_core::types::{
    Activity, ActivityAction, Channel, Direction, LeadStatus, Message, PoolLead, ScheduledTouch,
    TouchStatus,
};

use crate::jit::{JitVerdict, SkipReason};
use crate::orchestrator::DispatchContext;

/// What happened to one claimed touch. Returned for tests and metrics; the
/// queue/store already hold the durable record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TouchOutcome {
    Sent,
    Skipped(String),
    Cancelled,
    Requeued,
    Dropped,
    Retried,
    DeadLettered,
    FailedPermanent,
}

pub struct DispatchWorker {
    ctx: Arc<DispatchContext>,
    channel: Channel,
    worker_id: usize,
}

impl DispatchWorker {
    pub fn new(ctx: Arc<DispatchContext>, channel: Channel, worker_id: usize) -> Self {
        Self {
            ctx,
            channel,
            worker_id,
        }
    }

    /// Worker event loop. Exits when the shutdown signal flips.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(channel = %self.channel, worker = self.worker_id, "dispatch worker started");
        let poll = std::time::Duration::from_millis(self.ctx.config.poll_interval_ms);
        loop {
            if *shutdown.borrow() {
                break;
            }
            match self.process_one(Utc::now()).await {
                Some(outcome) => {
                    debug!(channel = %self.channel, ?outcome, "touch processed");
                }
                None => {
                    // Nothing due: yield until the next poll or shutdown.
                    tokio::select! {
                        _ = tokio::time::sleep(poll) => {}
                        _ = shutdown.changed() => {}
                    }
                }
            }
        }
        info!(channel = %self.channel, worker = self.worker_id, "dispatch worker stopped");
    }

    /// Claim and fully process a single touch. `None` when nothing is due.
    pub async fn process_one(&self, now: DateTime<Utc>) -> Option<TouchOutcome> {
        let touch = self
            .ctx
            .queue
            .claim_due(self.channel, now, self.ctx.config.lease_secs)?;
        Some(self.handle(touch, now).await)
    }

    async fn handle(&self, touch: ScheduledTouch, now: DateTime<Utc>) -> TouchOutcome {
        // Cancellation check straight after the claim yield point.
        if self
            .ctx
            .store
            .is_cancelled(touch.campaign_id, touch.client_id, touch.pool_lead_id)
        {
            self.ctx.queue.cancel(touch.id);
            self.emit(OutreachEventType::TouchCancelled, &touch, None);
            return TouchOutcome::Cancelled;
        }

        // JIT validation (includes the rate token acquire).
        let lead = match self.ctx.validator.validate(&touch, now) {
            JitVerdict::Pass { lead } => lead,
            JitVerdict::Skip(reason) => return self.skip(&touch, reason),
            JitVerdict::RateLimited => return self.requeue(&touch, now),
        };

        // Cancellation may have landed while we validated.
        if self
            .ctx
            .store
            .is_cancelled(touch.campaign_id, touch.client_id, touch.pool_lead_id)
        {
            self.ctx.queue.cancel(touch.id);
            self.emit(OutreachEventType::TouchCancelled, &touch, None);
            return TouchOutcome::Cancelled;
        }

        let composed = match self.ctx.composer.compose(&touch, &lead).await {
            Ok(c) => c,
            Err(e) => {
                error!(touch_id = %touch.id, error = %e, "composition failed");
                return self.retry_or_dead_letter(&touch, now, &e.to_string());
            }
        };

        let Some(recipient) = recipient_for(self.channel, &lead) else {
            self.record_activity(
                &touch,
                ActivityAction::Failed,
                None,
                None,
                None,
                Some("missing_recipient".into()),
            );
            self.ctx.queue.complete(touch.id);
            self.emit(
                OutreachEventType::TouchSkipped,
                &touch,
                Some("missing_recipient".into()),
            );
            return TouchOutcome::FailedPermanent;
        };

        // Email follow-ups reply into the existing thread.
        let in_reply_to = if self.channel == Channel::Email && touch.touch_number > 1 {
            self.last_email_message_id(&touch)
        } else {
            None
        };

        let envelope = agency_channels::SendEnvelope {
            touch_id: touch.id,
            client_id: touch.client_id,
            pool_lead_id: touch.pool_lead_id,
            channel: self.channel,
            to: recipient,
            from_resource: touch.resource_id.clone(),
            subject: composed.subject.clone(),
            body: composed.body.clone(),
            in_reply_to,
            template_ref: touch.template_ref.clone(),
        };
        let idempotency_key = operation_key(touch.id);

        let adapter = match self.ctx.adapters.get(&self.channel) {
            Some(a) => a.clone(),
            None => {
                self.ctx.queue.dead_letter(touch.id, "no adapter for channel");
                self.emit(
                    OutreachEventType::TouchDeadLettered,
                    &touch,
                    Some("no adapter".into()),
                );
                return TouchOutcome::DeadLettered;
            }
        };

        match adapter.send(&envelope, &idempotency_key).await {
            Ok(receipt) => {
                let thread = self.ctx.store.get_or_create_thread(
                    touch.client_id,
                    touch.pool_lead_id,
                    self.channel,
                );
                // The activity row must be durable before the touch is
                // released, so a later touch for this lead can never start
                // ahead of this one's record.
                self.record_activity(
                    &touch,
                    ActivityAction::Sent,
                    Some(receipt.provider_message_id.clone()),
                    Some(thread.id),
                    Some(composed.snapshot.clone()),
                    None,
                );
                if let Err(e) = self.ctx.store.append_message(
                    thread.id,
                    Message {
                        id: Uuid::new_v4(),
                        thread_id: thread.id,
                        direction: Direction::Outbound,
                        content: composed.body.clone(),
                        sentiment: None,
                        intent: None,
                        objection_type: None,
                        question_text: None,
                        position: 0,
                        provider_message_id: Some(receipt.provider_message_id.clone()),
                        created_at: now,
                    },
                ) {
                    warn!(error = %e, "failed to append outbound message");
                }
                let _ = self
                    .ctx
                    .store
                    .update_lead_view(touch.client_id, touch.pool_lead_id, |view| {
                        view.status = LeadStatus::InSequence;
                        view.sequence_position = touch.touch_number;
                    });
                if let Err(e) = self.ctx.store.consume_credit(touch.client_id) {
                    warn!(error = %e, "credit consumption failed after send");
                }
                self.ctx.queue.complete(touch.id);
                metrics::counter!("dispatch.sent", "channel" => self.channel.as_str())
                    .increment(1);
                self.emit(OutreachEventType::TouchSent, &touch, None);
                TouchOutcome::Sent
            }
            Err(e) if e.is_retryable() => self.retry_or_dead_letter(&touch, now, &e.to_string()),
            Err(e) => {
                // Provider-permanent: record the failure, advance.
                self.record_activity(
                    &touch,
                    ActivityAction::Failed,
                    None,
                    None,
                    None,
                    Some(e.code().to_string()),
                );
                self.ctx.queue.complete(touch.id);
                self.emit(
                    OutreachEventType::TouchSkipped,
                    &touch,
                    Some(format!("permanent: {e}")),
                );
                TouchOutcome::FailedPermanent
            }
        }
    }

    fn skip(&self, touch: &ScheduledTouch, reason: SkipReason) -> TouchOutcome {
        let label = reason.label();
        // Best effort: a terminal assignment no longer admits activities.
        self.record_activity(
            touch,
            ActivityAction::Skipped,
            None,
            None,
            None,
            Some(label.clone()),
        );
        self.ctx.queue.complete(touch.id);
        metrics::counter!("dispatch.skipped", "channel" => self.channel.as_str()).increment(1);
        self.emit(OutreachEventType::TouchSkipped, touch, Some(label.clone()));
        TouchOutcome::Skipped(label)
    }

    /// Rate-limit exhaustion: push to the client's next send window.
    fn requeue(&self, touch: &ScheduledTouch, now: DateTime<Utc>) -> TouchOutcome {
        let window_hour = self
            .ctx
            .store
            .get_tenant(touch.client_id)
            .map(|t| t.policy.send_window_start_hour)
            .unwrap_or(8);
        let next_window = (now + Duration::days(1))
            .date_naive()
            .and_hms_opt(u32::from(window_hour), 0, 0)
            .map(|dt| dt.and_utc())
            .unwrap_or(now + Duration::days(1));

        match self
            .ctx
            .queue
            .requeue_next_window(touch.id, next_window, self.ctx.config.max_requeues)
        {
            TouchStatus::Dropped => {
                self.emit(
                    OutreachEventType::TouchDropped,
                    touch,
                    Some("rate_requeues_exhausted".into()),
                );
                TouchOutcome::Dropped
            }
            _ => {
                self.emit(OutreachEventType::TouchRequeued, touch, None);
                TouchOutcome::Requeued
            }
        }
    }

    fn retry_or_dead_letter(
        &self,
        touch: &ScheduledTouch,
        now: DateTime<Utc>,
        error: &str,
    ) -> TouchOutcome {
        if touch.attempts >= self.ctx.config.max_attempts {
            self.ctx.queue.dead_letter(touch.id, error);
            metrics::counter!("dispatch.dead_letter").increment(1);
            self.emit(
                OutreachEventType::TouchDeadLettered,
                touch,
                Some(error.to_string()),
            );
            return TouchOutcome::DeadLettered;
        }
        let delay = backoff_delay(
            touch.attempts,
            self.ctx.config.backoff_base_secs,
            self.ctx.config.backoff_max_secs,
        );
        self.ctx.queue.fail(touch.id, now + delay, error);
        TouchOutcome::Retried
    }

    #[allow(clippy::too_many_arguments)]
    fn record_activity(
        &self,
        touch: &ScheduledTouch,
        action: ActivityAction,
        provider_message_id: Option<String>,
        thread_id: Option<Uuid>,
        content: Option<agency_core::types::ContentSnapshot>,
        skip_reason: Option<String>,
    ) {
        let activity = Activity {
            id: Uuid::new_v4(),
            client_id: touch.client_id,
            campaign_id: touch.campaign_id,
            pool_lead_id: touch.pool_lead_id,
            channel: touch.channel,
            action,
            resource_id: touch.resource_id.clone(),
            provider_message_id,
            thread_id,
            touch_number: touch.touch_number,
            sent_at: Utc::now(),
            content,
            led_to_booking: false,
            skip_reason,
        };
        if let Err(e) = self.ctx.store.insert_activity(activity) {
            debug!(touch_id = %touch.id, error = %e, "activity not recorded");
        }
    }

    fn last_email_message_id(&self, touch: &ScheduledTouch) -> Option<String> {
        self.ctx
            .store
            .activities_for_lead(touch.client_id, touch.pool_lead_id)
            .into_iter()
            .rev()
            .find(|a| a.channel == Channel::Email && a.action == ActivityAction::Sent)
            .and_then(|a| a.provider_message_id)
    }

    fn emit(&self, event_type: OutreachEventType, touch: &ScheduledTouch, detail: Option<String>) {
        let mut event = make_event(
            event_type,
            Some(touch.client_id),
            Some(touch.pool_lead_id),
            detail,
        );
        event.campaign_id = Some(touch.campaign_id);
        event.channel = Some(touch.channel);
        self.ctx.events.emit(event);
    }
}

/// Exponential backoff with jitter: base * 2^(attempt-1), capped, plus up
/// to half the base of random smear.
fn backoff_delay(attempts: u32, base_secs: u64, max_secs: u64) -> Duration {
    let exponent = attempts.saturating_sub(1).min(10);
    let raw = base_secs.saturating_mul(1u64 << exponent).min(max_secs);
    let jitter = rand::thread_rng().gen_range(0..=base_secs / 2);
    Duration::seconds((raw + jitter).min(max_secs) as i64)
}

/// Recipient identifier per channel.
fn recipient_for(channel: Channel, lead: &PoolLead) -> Option<String> {
    match channel {
        Channel::Email => Some(lead.email.clone()),
        Channel::Sms | Channel::Voice => lead.phone.clone(),
        Channel::Linkedin => lead.linkedin_url.clone(),
        Channel::Mail => lead
            .company
            .as_ref()
            .map(|c| format!("{}, {}", c, lead.country.as_deref().unwrap_or("AU"))),
    }
}

/// Stable idempotency key for a touch, forwarded to the provider.
pub fn operation_key(touch_id: Uuid) -> String {
    let digest = Sha256::digest(touch_id.as_bytes());
    hex::encode(&digest[..16])
}
