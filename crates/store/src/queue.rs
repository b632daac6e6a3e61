//! Durable dispatch queue with leased claims.
//!
//! A touch is claimed under a visibility lease; only one worker may hold a
//! given touch, and sends for the same (channel, resource) or the same
//! (client, lead) are never claimed concurrently. Expired leases are
//! reclaimed on the next claim pass, which is what makes worker crashes
//! safe: the lease runs out and another worker picks the touch up.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use agency_core::types::{Channel, ScheduledTouch, TouchStatus};

/// Counts by status, for the operator snapshot.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct QueueSnapshot {
    pub pending: usize,
    pub leased: usize,
    pub completed: usize,
    pub cancelled: usize,
    pub dead_letter: usize,
    pub dropped: usize,
}

pub struct TouchQueue {
    touches: DashMap<Uuid, ScheduledTouch>,
    /// Serializes claim passes so two workers cannot lease conflicting
    /// touches between the candidate scan and the status write.
    claim_lock: Mutex<()>,
}

impl Default for TouchQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl TouchQueue {
    pub fn new() -> Self {
        Self {
            touches: DashMap::new(),
            claim_lock: Mutex::new(()),
        }
    }

    pub fn push(&self, touch: ScheduledTouch) {
        self.touches.insert(touch.id, touch);
    }

    pub fn push_many(&self, touches: Vec<ScheduledTouch>) {
        for touch in touches {
            self.push(touch);
        }
    }

    pub fn get(&self, id: Uuid) -> Option<ScheduledTouch> {
        self.touches.get(&id).map(|t| t.clone())
    }

    /// Claim the next due touch on `channel`. Returns `None` when nothing is
    /// claimable. Per-resource and per-lead serialization are enforced here:
    /// a resource or lead with a touch already in flight is skipped.
    pub fn claim_due(
        &self,
        channel: Channel,
        now: DateTime<Utc>,
        lease_secs: u64,
    ) -> Option<ScheduledTouch> {
        let _guard = self.claim_lock.lock();

        // Reclaim expired leases first.
        for mut entry in self.touches.iter_mut() {
            if entry.status == TouchStatus::Leased {
                if let Some(expiry) = entry.lease_expires_at {
                    if expiry <= now {
                        warn!(touch_id = %entry.id, "lease expired, reclaiming touch");
                        entry.status = TouchStatus::Pending;
                        entry.lease_expires_at = None;
                    }
                }
            }
        }

        let busy_resources: Vec<(Channel, String)> = self
            .touches
            .iter()
            .filter(|t| t.status == TouchStatus::Leased)
            .map(|t| (t.channel, t.resource_id.clone()))
            .collect();
        let busy_leads: Vec<(Uuid, Uuid)> = self
            .touches
            .iter()
            .filter(|t| t.status == TouchStatus::Leased)
            .map(|t| (t.client_id, t.pool_lead_id))
            .collect();

        let candidate = self
            .touches
            .iter()
            .filter(|t| {
                t.status == TouchStatus::Pending
                    && t.channel == channel
                    && t.due_at <= now
                    && !busy_resources.contains(&(t.channel, t.resource_id.clone()))
                    && !busy_leads.contains(&(t.client_id, t.pool_lead_id))
            })
            .min_by_key(|t| (t.due_at, t.id))
            .map(|t| t.id)?;

        let mut touch = self.touches.get_mut(&candidate)?;
        touch.status = TouchStatus::Leased;
        touch.attempts += 1;
        touch.lease_expires_at = Some(now + Duration::seconds(lease_secs as i64));
        debug!(touch_id = %touch.id, attempts = touch.attempts, "touch claimed");
        Some(touch.clone())
    }

    pub fn complete(&self, id: Uuid) {
        if let Some(mut touch) = self.touches.get_mut(&id) {
            touch.status = TouchStatus::Completed;
            touch.lease_expires_at = None;
        }
    }

    /// Return a failed touch to the queue for a retry at `next_due_at`.
    pub fn fail(&self, id: Uuid, next_due_at: DateTime<Utc>, error: &str) {
        if let Some(mut touch) = self.touches.get_mut(&id) {
            touch.status = TouchStatus::Pending;
            touch.due_at = next_due_at;
            touch.lease_expires_at = None;
            touch.last_error = Some(error.to_string());
        }
    }

    pub fn dead_letter(&self, id: Uuid, error: &str) {
        if let Some(mut touch) = self.touches.get_mut(&id) {
            touch.status = TouchStatus::DeadLetter;
            touch.lease_expires_at = None;
            touch.last_error = Some(error.to_string());
            warn!(touch_id = %id, error, "touch dead-lettered");
        }
    }

    pub fn cancel(&self, id: Uuid) {
        if let Some(mut touch) = self.touches.get_mut(&id) {
            touch.status = TouchStatus::Cancelled;
            touch.lease_expires_at = None;
        }
    }

    /// Cancel all pending touches matching the predicate. Returns how many
    /// were cancelled.
    pub fn cancel_matching(&self, predicate: impl Fn(&ScheduledTouch) -> bool) -> usize {
        let mut cancelled = 0usize;
        for mut entry in self.touches.iter_mut() {
            if entry.status == TouchStatus::Pending && predicate(&entry) {
                entry.status = TouchStatus::Cancelled;
                cancelled += 1;
            }
        }
        cancelled
    }

    /// Push a rate-limited touch to the next send window. The touch is
    /// dropped once `max_requeues` is exceeded; the caller surfaces the
    /// observability event.
    pub fn requeue_next_window(
        &self,
        id: Uuid,
        next_window: DateTime<Utc>,
        max_requeues: u32,
    ) -> TouchStatus {
        let mut touch = match self.touches.get_mut(&id) {
            Some(t) => t,
            None => return TouchStatus::Dropped,
        };
        touch.requeues += 1;
        touch.lease_expires_at = None;
        if touch.requeues > max_requeues {
            touch.status = TouchStatus::Dropped;
            warn!(touch_id = %id, requeues = touch.requeues, "touch dropped after repeated rate exhaustion");
        } else {
            touch.status = TouchStatus::Pending;
            touch.due_at = next_window;
            // A re-queue is not a failed attempt.
            touch.attempts = touch.attempts.saturating_sub(1);
        }
        touch.status
    }

    pub fn touches_for_lead(&self, client_id: Uuid, pool_lead_id: Uuid) -> Vec<ScheduledTouch> {
        self.touches
            .iter()
            .filter(|t| t.client_id == client_id && t.pool_lead_id == pool_lead_id)
            .map(|t| t.clone())
            .collect()
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        let mut snap = QueueSnapshot::default();
        for t in self.touches.iter() {
            match t.status {
                TouchStatus::Pending => snap.pending += 1,
                TouchStatus::Leased => snap.leased += 1,
                TouchStatus::Completed => snap.completed += 1,
                TouchStatus::Cancelled => snap.cancelled += 1,
                TouchStatus::DeadLetter => snap.dead_letter += 1,
                TouchStatus::Dropped => snap.dropped += 1,
            }
        }
        snap
    }
}
