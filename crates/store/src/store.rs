//! In-memory entity store backed by DashMap.
//!
//! The ledger lock serializes the two operations that need serialisable
//! isolation: `try_assign` and `record_conversion`. Everything else relies
//! on per-key DashMap locking.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tracing::{info, warn};
use uuid::Uuid;

use agency_core::error::{AgencyError, AgencyResult};
use agency_core::patterns::{ConversionPattern, PatternType};
use agency_core::types::{
    Activity, ActivityAction, AlsTier, AssignOutcome, Assignment, AssignmentState, BuyerSignal,
    Campaign, Channel, LeadStatus, LeadView, Message, PoolLead, PoolStatus, ScoreComponents,
    Tenant, Thread, ThreadOutcome, ThreadStatus,
};

/// Scope of a cancellation flag. Workers observe these at every yield point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CancelScope {
    Campaign(Uuid),
    Lead { client_id: Uuid, pool_lead_id: Uuid },
}

/// Filters for paginated lead-view reads.
#[derive(Debug, Clone, Default)]
pub struct LeadFilter {
    pub campaign_id: Option<Uuid>,
    pub tier: Option<AlsTier>,
    pub status: Option<LeadStatus>,
    pub page: usize,
    pub page_size: usize,
}

/// Thread-safe in-memory store for all platform entities.
pub struct AgencyStore {
    tenants: DashMap<Uuid, Tenant>,
    pool_leads: DashMap<Uuid, PoolLead>,
    /// Platform-wide unique email -> pool lead id.
    email_index: DashMap<String, Uuid>,
    assignments: DashMap<Uuid, Assignment>,
    /// Non-terminal assignment per pool lead (the exclusivity invariant).
    active_by_lead: DashMap<Uuid, Uuid>,
    /// Permanent binding created on conversion.
    converted_owner: DashMap<Uuid, Uuid>,
    lead_views: DashMap<Uuid, LeadView>,
    /// (client_id, pool_lead_id) -> lead view id.
    view_index: DashMap<(Uuid, Uuid), Uuid>,
    campaigns: DashMap<Uuid, Campaign>,
    /// Append-only activity log in insert order.
    activities: RwLock<Vec<Activity>>,
    /// provider_message_id -> activity id, for webhook resolution.
    provider_msg_index: DashMap<String, Uuid>,
    threads: DashMap<Uuid, Thread>,
    /// (client_id, pool_lead_id, channel) -> thread id.
    thread_index: DashMap<(Uuid, Uuid, Channel), Uuid>,
    /// thread id -> ordered messages.
    messages: DashMap<Uuid, Vec<Message>>,
    patterns: DashMap<(Uuid, PatternType), ConversionPattern>,
    buyer_signals: DashMap<String, BuyerSignal>,
    cancellations: DashMap<CancelScope, DateTime<Utc>>,
    /// Client-supplied operation keys for idempotent retries.
    operation_keys: DashMap<String, DateTime<Utc>>,
    /// (provider_event_id, event_type) dedupe for at-least-once ingest.
    provider_events: DashMap<(String, String), DateTime<Utc>>,
    /// Serializes try_assign and record_conversion.
    ledger_lock: Mutex<()>,
}

impl Default for AgencyStore {
    fn default() -> Self {
        Self::new()
    }
}

impl AgencyStore {
    pub fn new() -> Self {
        info!("Agency store initialized (in-memory, development mode)");
        Self {
            tenants: DashMap::new(),
            pool_leads: DashMap::new(),
            email_index: DashMap::new(),
            assignments: DashMap::new(),
            active_by_lead: DashMap::new(),
            converted_owner: DashMap::new(),
            lead_views: DashMap::new(),
            view_index: DashMap::new(),
            campaigns: DashMap::new(),
            activities: RwLock::new(Vec::new()),
            provider_msg_index: DashMap::new(),
            threads: DashMap::new(),
            thread_index: DashMap::new(),
            messages: DashMap::new(),
            patterns: DashMap::new(),
            buyer_signals: DashMap::new(),
            cancellations: DashMap::new(),
            operation_keys: DashMap::new(),
            provider_events: DashMap::new(),
            ledger_lock: Mutex::new(()),
        }
    }

    // ─── Tenants ────────────────────────────────────────────────────────────

    pub fn upsert_tenant(&self, tenant: Tenant) {
        self.tenants.insert(tenant.id, tenant);
    }

    pub fn get_tenant(&self, id: Uuid) -> Option<Tenant> {
        self.tenants.get(&id).map(|t| t.clone())
    }

    pub fn list_tenants(&self) -> Vec<Tenant> {
        self.tenants.iter().map(|t| t.value().clone()).collect()
    }

    /// Decrement a tenant's send credits. Returns the remaining balance.
    pub fn consume_credit(&self, client_id: Uuid) -> AgencyResult<u32> {
        let mut tenant = self
            .tenants
            .get_mut(&client_id)
            .ok_or_else(|| AgencyError::NotFound(format!("tenant {client_id}")))?;
        if tenant.credits_remaining == 0 {
            return Err(AgencyError::BudgetExhausted {
                scope: "credits".into(),
            });
        }
        tenant.credits_remaining -= 1;
        Ok(tenant.credits_remaining)
    }

    // ─── Pool leads ─────────────────────────────────────────────────────────

    /// Insert a pool lead, enforcing platform-wide email uniqueness. If the
    /// email already exists the existing lead id is returned.
    pub fn upsert_pool_lead(&self, mut lead: PoolLead) -> Uuid {
        lead.email = lead.email.to_lowercase();
        if let Some(existing) = self.email_index.get(&lead.email) {
            let id = *existing;
            if let Some(mut current) = self.pool_leads.get_mut(&id) {
                // Refresh enrichable fields but keep identity and status.
                lead.id = current.id;
                lead.pool_status = current.pool_status;
                lead.first_seen_at = current.first_seen_at;
                *current = lead;
            }
            return id;
        }
        let id = lead.id;
        self.email_index.insert(lead.email.clone(), id);
        self.pool_leads.insert(id, lead);
        id
    }

    pub fn get_pool_lead(&self, id: Uuid) -> Option<PoolLead> {
        self.pool_leads.get(&id).map(|l| l.clone())
    }

    pub fn find_pool_lead_by_email(&self, email: &str) -> Option<PoolLead> {
        let email = email.to_lowercase();
        self.email_index
            .get(&email)
            .and_then(|id| self.pool_leads.get(&id).map(|l| l.clone()))
    }

    /// Unassigned pool leads matching a predicate, oldest first.
    pub fn unassigned_leads(&self, filter: impl Fn(&PoolLead) -> bool) -> Vec<PoolLead> {
        let mut leads: Vec<PoolLead> = self
            .pool_leads
            .iter()
            .filter(|l| l.pool_status == PoolStatus::Unassigned && filter(l.value()))
            .map(|l| l.value().clone())
            .collect();
        leads.sort_by_key(|l| l.first_seen_at);
        leads
    }

    // ─── Assignments (ledger) ───────────────────────────────────────────────

    /// Transactionally assign a pool lead to a client. Exclusivity: at most
    /// one non-terminal assignment per pool lead across all tenants; a
    /// converted lead is permanently bound and never reassignable.
    pub fn try_assign(
        &self,
        client_id: Uuid,
        pool_lead_id: Uuid,
        campaign_id: Uuid,
        operation_key: Option<&str>,
    ) -> AgencyResult<AssignOutcome> {
        let _guard = self.ledger_lock.lock();

        if let Some(key) = operation_key {
            if !self.record_operation_key(key) {
                // Replay of a committed operation: report current state.
                if let Some(existing) = self.active_by_lead.get(&pool_lead_id) {
                    let assignment_id = *existing;
                    drop(existing);
                    if let Some(a) = self.assignments.get(&assignment_id) {
                        if a.client_id == client_id {
                            return Ok(AssignOutcome::AlreadyYours { assignment_id });
                        }
                    }
                }
            }
        }

        if !self.pool_leads.contains_key(&pool_lead_id) {
            return Err(AgencyError::NotFound(format!("pool lead {pool_lead_id}")));
        }

        // Converted leads are permanently bound.
        if let Some(owner) = self.converted_owner.get(&pool_lead_id) {
            return Ok(AssignOutcome::Collision {
                other_client: *owner,
            });
        }

        if let Some(existing) = self.active_by_lead.get(&pool_lead_id) {
            let assignment_id = *existing;
            drop(existing);
            let assignment = self
                .assignments
                .get(&assignment_id)
                .map(|a| a.clone())
                .ok_or_else(|| {
                    AgencyError::Consistency(format!(
                        "dangling active index for lead {pool_lead_id}"
                    ))
                })?;
            if assignment.client_id == client_id {
                return Ok(AssignOutcome::AlreadyYours { assignment_id });
            }
            return Ok(AssignOutcome::Collision {
                other_client: assignment.client_id,
            });
        }

        let now = Utc::now();
        let assignment = Assignment {
            id: Uuid::new_v4(),
            client_id,
            pool_lead_id,
            campaign_id,
            state: AssignmentState::Active,
            assigned_at: now,
            terminal_at: None,
        };
        let assignment_id = assignment.id;

        let view = LeadView {
            id: Uuid::new_v4(),
            client_id,
            pool_lead_id,
            assignment_id,
            campaign_id,
            als_score: 0,
            als_tier: AlsTier::Dead,
            components: ScoreComponents::default(),
            status: LeadStatus::New,
            sequence_position: 0,
            next_scheduled_at: None,
            updated_at: now,
        };

        self.assignments.insert(assignment_id, assignment);
        self.active_by_lead.insert(pool_lead_id, assignment_id);
        self.view_index
            .insert((client_id, pool_lead_id), view.id);
        self.lead_views.insert(view.id, view);
        if let Some(mut lead) = self.pool_leads.get_mut(&pool_lead_id) {
            lead.pool_status = PoolStatus::Assigned;
        }

        info!(%client_id, %pool_lead_id, %campaign_id, "pool lead assigned");
        Ok(AssignOutcome::Assigned { assignment_id })
    }

    pub fn get_assignment(&self, id: Uuid) -> Option<Assignment> {
        self.assignments.get(&id).map(|a| a.clone())
    }

    /// The non-terminal assignment for (client, pool lead), if any.
    pub fn active_assignment(&self, client_id: Uuid, pool_lead_id: Uuid) -> Option<Assignment> {
        let assignment_id = *self.active_by_lead.get(&pool_lead_id)?;
        let assignment = self.assignments.get(&assignment_id)?.clone();
        (assignment.client_id == client_id).then_some(assignment)
    }

    /// Move an active assignment to a terminal state (released or
    /// suppressed). Conversion goes through `record_conversion`.
    pub fn terminate_assignment(
        &self,
        client_id: Uuid,
        pool_lead_id: Uuid,
        state: AssignmentState,
    ) -> AgencyResult<()> {
        if state == AssignmentState::Active || state == AssignmentState::Converted {
            return Err(AgencyError::Validation(format!(
                "terminate_assignment cannot target {state:?}"
            )));
        }
        let _guard = self.ledger_lock.lock();
        let assignment_id = self
            .active_by_lead
            .get(&pool_lead_id)
            .map(|a| *a)
            .ok_or_else(|| AgencyError::NotFound(format!("active assignment for {pool_lead_id}")))?;
        {
            let mut assignment = self
                .assignments
                .get_mut(&assignment_id)
                .ok_or_else(|| AgencyError::Consistency("dangling assignment index".into()))?;
            if assignment.client_id != client_id {
                return Err(AgencyError::Collision {
                    other_client: assignment.client_id,
                });
            }
            assignment.state = state;
            assignment.terminal_at = Some(Utc::now());
        }
        self.active_by_lead.remove(&pool_lead_id);
        if let Some(mut lead) = self.pool_leads.get_mut(&pool_lead_id) {
            lead.pool_status = PoolStatus::Unassigned;
        }
        info!(%client_id, %pool_lead_id, ?state, "assignment terminated");
        Ok(())
    }

    /// All active assignments for a client (used by the cancellation job).
    pub fn active_assignments_for_client(&self, client_id: Uuid) -> Vec<Assignment> {
        self.assignments
            .iter()
            .filter(|a| a.client_id == client_id && a.state == AssignmentState::Active)
            .map(|a| a.value().clone())
            .collect()
    }

    /// Record a conversion: assignment -> converted, the lead permanently
    /// bound to the client, the lead view terminal, and every outbound touch
    /// for this (client, lead) inside the attribution window back-filled
    /// with `led_to_booking = true`.
    pub fn record_conversion(
        &self,
        client_id: Uuid,
        pool_lead_id: Uuid,
        attribution_window_days: u32,
    ) -> AgencyResult<()> {
        let _guard = self.ledger_lock.lock();
        let assignment_id = self
            .active_by_lead
            .get(&pool_lead_id)
            .map(|a| *a)
            .ok_or_else(|| AgencyError::NotFound(format!("active assignment for {pool_lead_id}")))?;

        let now = Utc::now();
        {
            let mut assignment = self
                .assignments
                .get_mut(&assignment_id)
                .ok_or_else(|| AgencyError::Consistency("dangling assignment index".into()))?;
            if assignment.client_id != client_id {
                return Err(AgencyError::Collision {
                    other_client: assignment.client_id,
                });
            }
            assignment.state = AssignmentState::Converted;
            assignment.terminal_at = Some(now);
        }
        self.active_by_lead.remove(&pool_lead_id);
        self.converted_owner.insert(pool_lead_id, client_id);

        if let Some(view_id) = self.view_index.get(&(client_id, pool_lead_id)) {
            if let Some(mut view) = self.lead_views.get_mut(&view_id) {
                view.status = LeadStatus::Converted;
                view.next_scheduled_at = None;
                view.updated_at = now;
            }
        }

        // Back-fill attribution on outbound touches inside the window.
        let cutoff = now - Duration::days(i64::from(attribution_window_days));
        let mut backfilled = 0usize;
        {
            let mut log = self.activities.write();
            for activity in log.iter_mut() {
                if activity.client_id == client_id
                    && activity.pool_lead_id == pool_lead_id
                    && activity.action == ActivityAction::Sent
                    && activity.sent_at >= cutoff
                {
                    activity.led_to_booking = true;
                    backfilled += 1;
                }
            }
        }

        info!(%client_id, %pool_lead_id, backfilled, "conversion recorded");
        Ok(())
    }

    /// The client a converted lead is permanently bound to, if any.
    pub fn converted_owner(&self, pool_lead_id: Uuid) -> Option<Uuid> {
        self.converted_owner.get(&pool_lead_id).map(|c| *c)
    }

    // ─── Lead views ─────────────────────────────────────────────────────────

    pub fn get_lead_view(&self, client_id: Uuid, pool_lead_id: Uuid) -> Option<LeadView> {
        let view_id = *self.view_index.get(&(client_id, pool_lead_id))?;
        self.lead_views.get(&view_id).map(|v| v.clone())
    }

    pub fn get_lead_view_by_id(&self, view_id: Uuid) -> Option<LeadView> {
        self.lead_views.get(&view_id).map(|v| v.clone())
    }

    pub fn update_lead_view(
        &self,
        client_id: Uuid,
        pool_lead_id: Uuid,
        f: impl FnOnce(&mut LeadView),
    ) -> AgencyResult<LeadView> {
        let view_id = *self
            .view_index
            .get(&(client_id, pool_lead_id))
            .ok_or_else(|| {
                AgencyError::NotFound(format!("lead view ({client_id}, {pool_lead_id})"))
            })?;
        let mut view = self
            .lead_views
            .get_mut(&view_id)
            .ok_or_else(|| AgencyError::Consistency("dangling view index".into()))?;
        f(&mut view);
        view.updated_at = Utc::now();
        Ok(view.clone())
    }

    /// Paginated lead views for a client with optional filters.
    pub fn list_lead_views(&self, client_id: Uuid, filter: &LeadFilter) -> Vec<LeadView> {
        let mut views: Vec<LeadView> = self
            .lead_views
            .iter()
            .filter(|v| {
                v.client_id == client_id
                    && filter.campaign_id.map_or(true, |c| v.campaign_id == c)
                    && filter.tier.map_or(true, |t| v.als_tier == t)
                    && filter.status.map_or(true, |s| v.status == s)
            })
            .map(|v| v.value().clone())
            .collect();
        views.sort_by_key(|v| v.id);
        let page_size = if filter.page_size == 0 {
            50
        } else {
            filter.page_size
        };
        views
            .into_iter()
            .skip(filter.page * page_size)
            .take(page_size)
            .collect()
    }

    // ─── Campaigns ──────────────────────────────────────────────────────────

    pub fn upsert_campaign(&self, campaign: Campaign) -> AgencyResult<()> {
        if campaign.status == agency_core::types::CampaignStatus::Active
            && !campaign.allocation.is_valid()
        {
            return Err(AgencyError::Validation(format!(
                "allocation percentages sum to {}, expected 100",
                campaign.allocation.sum()
            )));
        }
        self.campaigns.insert(campaign.id, campaign);
        Ok(())
    }

    pub fn get_campaign(&self, id: Uuid) -> Option<Campaign> {
        self.campaigns.get(&id).map(|c| c.clone())
    }

    pub fn list_campaigns(&self, client_id: Uuid) -> Vec<Campaign> {
        let mut campaigns: Vec<Campaign> = self
            .campaigns
            .iter()
            .filter(|c| c.client_id == client_id)
            .map(|c| c.value().clone())
            .collect();
        campaigns.sort_by_key(|c| c.created_at);
        campaigns
    }

    // ─── Activities ─────────────────────────────────────────────────────────

    /// Append an activity. Referential guard: an active assignment must
    /// exist for (client, pool lead) at insert time.
    pub fn insert_activity(&self, activity: Activity) -> AgencyResult<Uuid> {
        if self
            .active_assignment(activity.client_id, activity.pool_lead_id)
            .is_none()
        {
            return Err(AgencyError::Consistency(format!(
                "no active assignment for ({}, {})",
                activity.client_id, activity.pool_lead_id
            )));
        }
        let id = activity.id;
        // Only outbound sends anchor webhook resolution; engagement events
        // carry the same provider id and must not steal the index slot.
        if activity.action == ActivityAction::Sent {
            if let Some(pmid) = &activity.provider_message_id {
                self.provider_msg_index.insert(pmid.clone(), id);
            }
        }
        self.activities.write().push(activity);
        Ok(id)
    }

    pub fn get_activity(&self, id: Uuid) -> Option<Activity> {
        self.activities.read().iter().find(|a| a.id == id).cloned()
    }

    pub fn resolve_provider_message(&self, provider_message_id: &str) -> Option<Activity> {
        let id = *self.provider_msg_index.get(provider_message_id)?;
        self.get_activity(id)
    }

    /// Activities for one (client, lead), in insert order.
    pub fn activities_for_lead(&self, client_id: Uuid, pool_lead_id: Uuid) -> Vec<Activity> {
        self.activities
            .read()
            .iter()
            .filter(|a| a.client_id == client_id && a.pool_lead_id == pool_lead_id)
            .cloned()
            .collect()
    }

    /// Streaming scan over a client's activity log for detector input.
    pub fn scan_activities(&self, client_id: Uuid, mut f: impl FnMut(&Activity)) {
        for activity in self.activities.read().iter() {
            if activity.client_id == client_id {
                f(activity);
            }
        }
    }

    /// Outbound activities with no inbound event since `window`, for the
    /// safety-net sweep.
    pub fn unreconciled_outbound(&self, older_than: DateTime<Utc>) -> Vec<Activity> {
        let log = self.activities.read();
        log.iter()
            .filter(|a| {
                a.action == ActivityAction::Sent
                    && a.sent_at <= older_than
                    && a.provider_message_id.is_some()
                    && !log.iter().any(|other| {
                        other.provider_message_id == a.provider_message_id
                            && other.action != ActivityAction::Sent
                    })
            })
            .cloned()
            .collect()
    }

    pub fn activity_count(&self) -> usize {
        self.activities.read().len()
    }

    // ─── Threads & messages ─────────────────────────────────────────────────

    pub fn get_or_create_thread(
        &self,
        client_id: Uuid,
        pool_lead_id: Uuid,
        channel: Channel,
    ) -> Thread {
        let key = (client_id, pool_lead_id, channel);
        if let Some(id) = self.thread_index.get(&key) {
            if let Some(thread) = self.threads.get(&id) {
                return thread.clone();
            }
        }
        let thread = Thread {
            id: Uuid::new_v4(),
            client_id,
            pool_lead_id,
            channel,
            status: ThreadStatus::Active,
            outcome: ThreadOutcome::Ongoing,
            message_count: 0,
            last_inbound_at: None,
            last_outbound_at: None,
            created_at: Utc::now(),
        };
        self.thread_index.insert(key, thread.id);
        self.threads.insert(thread.id, thread.clone());
        thread
    }

    pub fn get_thread(&self, id: Uuid) -> Option<Thread> {
        self.threads.get(&id).map(|t| t.clone())
    }

    pub fn update_thread(&self, id: Uuid, f: impl FnOnce(&mut Thread)) -> AgencyResult<Thread> {
        let mut thread = self
            .threads
            .get_mut(&id)
            .ok_or_else(|| AgencyError::NotFound(format!("thread {id}")))?;
        f(&mut thread);
        Ok(thread.clone())
    }

    pub fn list_threads(&self) -> Vec<Thread> {
        self.threads.iter().map(|t| t.value().clone()).collect()
    }

    /// Append a message with a monotonic per-thread position.
    pub fn append_message(&self, thread_id: Uuid, mut message: Message) -> AgencyResult<Message> {
        let mut thread = self
            .threads
            .get_mut(&thread_id)
            .ok_or_else(|| AgencyError::NotFound(format!("thread {thread_id}")))?;
        let mut list = self.messages.entry(thread_id).or_default();
        message.position = list.len() as u32 + 1;
        message.thread_id = thread_id;
        list.push(message.clone());
        thread.message_count = list.len() as u32;
        match message.direction {
            agency_core::types::Direction::Inbound => {
                thread.last_inbound_at = Some(message.created_at)
            }
            agency_core::types::Direction::Outbound => {
                thread.last_outbound_at = Some(message.created_at)
            }
        }
        Ok(message)
    }

    pub fn messages_for_thread(&self, thread_id: Uuid) -> Vec<Message> {
        self.messages
            .get(&thread_id)
            .map(|m| m.clone())
            .unwrap_or_default()
    }

    // ─── Patterns & buyer signals ───────────────────────────────────────────

    pub fn upsert_pattern(&self, pattern: ConversionPattern) {
        self.patterns
            .insert((pattern.client_id, pattern.pattern_type), pattern);
    }

    pub fn latest_pattern(
        &self,
        client_id: Uuid,
        pattern_type: PatternType,
    ) -> Option<ConversionPattern> {
        self.patterns
            .get(&(client_id, pattern_type))
            .map(|p| p.clone())
    }

    pub fn upsert_buyer_signal(&self, signal: BuyerSignal) {
        self.buyer_signals.insert(signal.domain.clone(), signal);
    }

    pub fn buyer_signal(&self, domain: &str) -> Option<BuyerSignal> {
        self.buyer_signals.get(domain).map(|s| s.clone())
    }

    // ─── Cancellation flags ─────────────────────────────────────────────────

    pub fn set_cancelled(&self, scope: CancelScope) {
        self.cancellations.insert(scope, Utc::now());
        warn!(?scope, "cancellation flag set");
    }

    pub fn clear_cancelled(&self, scope: CancelScope) {
        self.cancellations.remove(&scope);
    }

    /// Whether dispatch work for this (campaign, client, lead) is cancelled.
    pub fn is_cancelled(&self, campaign_id: Uuid, client_id: Uuid, pool_lead_id: Uuid) -> bool {
        self.cancellations
            .contains_key(&CancelScope::Campaign(campaign_id))
            || self.cancellations.contains_key(&CancelScope::Lead {
                client_id,
                pool_lead_id,
            })
    }

    // ─── Idempotency ────────────────────────────────────────────────────────

    /// Record an operation key. Returns true if the key was new.
    pub fn record_operation_key(&self, key: &str) -> bool {
        self.operation_keys
            .insert(key.to_string(), Utc::now())
            .is_none()
    }

    /// Dedupe an ingested provider event on (provider_id, event_type).
    /// Returns true the first time, false on replays.
    pub fn record_provider_event(&self, provider_id: &str, event_type: &str) -> bool {
        self.provider_events
            .insert((provider_id.to_string(), event_type.to_string()), Utc::now())
            .is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agency_core::types::Direction;

    fn seed_store() -> (AgencyStore, Uuid, Uuid, Uuid) {
        let store = AgencyStore::new();
        let lead_id = store.upsert_pool_lead(PoolLead::from_email("alice@corp.com"));
        let client_id = Uuid::new_v4();
        let campaign_id = Uuid::new_v4();
        (store, client_id, lead_id, campaign_id)
    }

    fn sent_activity(client_id: Uuid, campaign_id: Uuid, lead_id: Uuid, n: u32) -> Activity {
        Activity {
            id: Uuid::new_v4(),
            client_id,
            campaign_id,
            pool_lead_id: lead_id,
            channel: Channel::Email,
            action: ActivityAction::Sent,
            resource_id: "mailbox-1".into(),
            provider_message_id: Some(format!("pm-{n}")),
            thread_id: None,
            touch_number: n,
            sent_at: Utc::now(),
            content: None,
            led_to_booking: false,
            skip_reason: None,
        }
    }

    #[test]
    fn test_email_uniqueness() {
        let store = AgencyStore::new();
        let a = store.upsert_pool_lead(PoolLead::from_email("x@y.com"));
        let b = store.upsert_pool_lead(PoolLead::from_email("X@Y.COM"));
        assert_eq!(a, b);
    }

    #[test]
    fn test_try_assign_exclusive() {
        let (store, c1, lead, camp) = seed_store();
        let c2 = Uuid::new_v4();

        let first = store.try_assign(c1, lead, camp, None).expect("assign");
        assert!(matches!(first, AssignOutcome::Assigned { .. }));

        // Same client again: already yours.
        let again = store.try_assign(c1, lead, camp, None).expect("assign");
        assert!(matches!(again, AssignOutcome::AlreadyYours { .. }));

        // Other client: collision naming the holder.
        let other = store.try_assign(c2, lead, camp, None).expect("assign");
        assert_eq!(other, AssignOutcome::Collision { other_client: c1 });
    }

    #[test]
    fn test_released_lead_is_reassignable_converted_is_not() {
        let (store, c1, lead, camp) = seed_store();
        let c2 = Uuid::new_v4();

        store.try_assign(c1, lead, camp, None).expect("assign");
        store
            .terminate_assignment(c1, lead, AssignmentState::Released)
            .expect("release");

        let next = store.try_assign(c2, lead, camp, None).expect("assign");
        assert!(matches!(next, AssignOutcome::Assigned { .. }));

        store.record_conversion(c2, lead, 90).expect("convert");
        let after = store.try_assign(c1, lead, camp, None).expect("assign");
        assert_eq!(after, AssignOutcome::Collision { other_client: c2 });
    }

    #[test]
    fn test_activity_requires_active_assignment() {
        let (store, client, lead, camp) = seed_store();

        let orphan = sent_activity(client, camp, lead, 1);
        assert!(store.insert_activity(orphan).is_err());

        store.try_assign(client, lead, camp, None).expect("assign");
        let ok = sent_activity(client, camp, lead, 1);
        assert!(store.insert_activity(ok).is_ok());
    }

    #[test]
    fn test_conversion_backfills_outbound_touches() {
        let (store, client, lead, camp) = seed_store();
        store.try_assign(client, lead, camp, None).expect("assign");

        for n in 1..=3 {
            store
                .insert_activity(sent_activity(client, camp, lead, n))
                .expect("insert");
        }

        // A second lead stays untouched.
        let other_lead = store.upsert_pool_lead(PoolLead::from_email("bob@other.com"));
        store
            .try_assign(client, other_lead, camp, None)
            .expect("assign");
        store
            .insert_activity(sent_activity(client, camp, other_lead, 1))
            .expect("insert");

        store.record_conversion(client, lead, 90).expect("convert");

        let converted: Vec<Activity> = store.activities_for_lead(client, lead);
        assert!(converted.iter().all(|a| a.led_to_booking));

        let untouched = store.activities_for_lead(client, other_lead);
        assert!(untouched.iter().all(|a| !a.led_to_booking));

        assert_eq!(store.converted_owner(lead), Some(client));
        let view = store.get_lead_view(client, lead).expect("view");
        assert_eq!(view.status, LeadStatus::Converted);
    }

    #[test]
    fn test_operation_key_dedupe() {
        let (store, client, lead, camp) = seed_store();

        let first = store
            .try_assign(client, lead, camp, Some("op-1"))
            .expect("assign");
        assert!(matches!(first, AssignOutcome::Assigned { .. }));

        let replay = store
            .try_assign(client, lead, camp, Some("op-1"))
            .expect("assign");
        assert!(matches!(replay, AssignOutcome::AlreadyYours { .. }));
    }

    #[test]
    fn test_provider_event_dedupe() {
        let store = AgencyStore::new();
        assert!(store.record_provider_event("evt-1", "bounced"));
        assert!(!store.record_provider_event("evt-1", "bounced"));
        // Same id, different type is a distinct event.
        assert!(store.record_provider_event("evt-1", "opened"));
    }

    #[test]
    fn test_thread_message_positions_monotonic() {
        let (store, client, lead, _camp) = seed_store();
        let thread = store.get_or_create_thread(client, lead, Channel::Email);

        for i in 0..3 {
            let msg = Message {
                id: Uuid::new_v4(),
                thread_id: thread.id,
                direction: if i % 2 == 0 {
                    Direction::Outbound
                } else {
                    Direction::Inbound
                },
                content: format!("message {i}"),
                sentiment: None,
                intent: None,
                objection_type: None,
                question_text: None,
                position: 0,
                provider_message_id: None,
                created_at: Utc::now(),
            };
            store.append_message(thread.id, msg).expect("append");
        }

        let messages = store.messages_for_thread(thread.id);
        let positions: Vec<u32> = messages.iter().map(|m| m.position).collect();
        assert_eq!(positions, vec![1, 2, 3]);

        let thread = store.get_thread(thread.id).expect("thread");
        assert_eq!(thread.message_count, 3);
        assert!(thread.last_inbound_at.is_some());
        assert!(thread.last_outbound_at.is_some());
    }

    #[test]
    fn test_cancellation_scopes() {
        let (store, client, lead, camp) = seed_store();
        assert!(!store.is_cancelled(camp, client, lead));

        store.set_cancelled(CancelScope::Campaign(camp));
        assert!(store.is_cancelled(camp, client, lead));

        store.clear_cancelled(CancelScope::Campaign(camp));
        store.set_cancelled(CancelScope::Lead {
            client_id: client,
            pool_lead_id: lead,
        });
        assert!(store.is_cancelled(camp, client, lead));
    }

    #[test]
    fn test_campaign_allocation_validated_when_active() {
        let store = AgencyStore::new();
        let mut campaign = Campaign {
            id: Uuid::new_v4(),
            client_id: Uuid::new_v4(),
            name: "Q3 outbound".into(),
            status: agency_core::types::CampaignStatus::Draft,
            allocation: agency_core::types::ChannelAllocation {
                email: 50,
                sms: 10,
                linkedin: 10,
                voice: 10,
                mail: 10,
            },
            daily_cap: 100,
            permission_mode: agency_core::types::PermissionMode::Copilot,
            sequence: vec![],
            icp: Default::default(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        // Draft may hold an invalid allocation.
        assert!(store.upsert_campaign(campaign.clone()).is_ok());

        campaign.status = agency_core::types::CampaignStatus::Active;
        assert!(store.upsert_campaign(campaign).is_err());
    }
}
