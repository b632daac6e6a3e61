//! Assignment lifecycle orchestration over the store and the suppression
//! index.

use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use agency_core::error::{AgencyError, AgencyResult};
use agency_core::event_bus::{make_event, EventSink, OutreachEventType};
use agency_core::types::{AssignOutcome, AssignmentState, LeadStatus};
use agency_store::{AgencyStore, CancelScope, TouchQueue};
use agency_suppression::SuppressionIndex;

pub struct PoolManager {
    store: Arc<AgencyStore>,
    queue: Arc<TouchQueue>,
    suppression: Arc<SuppressionIndex>,
    events: Arc<dyn EventSink>,
}

impl PoolManager {
    pub fn new(
        store: Arc<AgencyStore>,
        queue: Arc<TouchQueue>,
        suppression: Arc<SuppressionIndex>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            store,
            queue,
            suppression,
            events,
        }
    }

    /// Assign a pool lead to a client: suppression first, then the store's
    /// serialized exclusivity check. Never reassigns while another client
    /// holds the lead.
    pub fn try_assign(
        &self,
        client_id: Uuid,
        pool_lead_id: Uuid,
        campaign_id: Uuid,
        operation_key: Option<&str>,
    ) -> AgencyResult<AssignOutcome> {
        let lead = self
            .store
            .get_pool_lead(pool_lead_id)
            .ok_or_else(|| AgencyError::NotFound(format!("pool lead {pool_lead_id}")))?;

        if let Some(reason) = self
            .suppression
            .check(client_id, Some(&lead.email), Some(&lead.domain))
        {
            return Ok(AssignOutcome::Suppressed {
                reason: reason.as_str().to_string(),
            });
        }

        let outcome = self
            .store
            .try_assign(client_id, pool_lead_id, campaign_id, operation_key)?;

        if matches!(outcome, AssignOutcome::Assigned { .. }) {
            self.events.emit(make_event(
                OutreachEventType::AssignmentCreated,
                Some(client_id),
                Some(pool_lead_id),
                None,
            ));
        }
        Ok(outcome)
    }

    /// Conversion: permanently bind the lead to the client, terminate the
    /// sequence, and back-fill attribution on the touches that led here.
    pub fn record_conversion(
        &self,
        client_id: Uuid,
        pool_lead_id: Uuid,
        attribution_window_days: u32,
    ) -> AgencyResult<()> {
        self.store
            .record_conversion(client_id, pool_lead_id, attribution_window_days)?;
        self.store.set_cancelled(CancelScope::Lead {
            client_id,
            pool_lead_id,
        });
        self.queue
            .cancel_matching(|t| t.client_id == client_id && t.pool_lead_id == pool_lead_id);
        self.events.emit(make_event(
            OutreachEventType::LeadConverted,
            Some(client_id),
            Some(pool_lead_id),
            None,
        ));
        Ok(())
    }

    /// Subscription cancellation: release every active assignment so the
    /// leads become assignable to other tenants.
    pub fn release_all(&self, client_id: Uuid) -> AgencyResult<usize> {
        let active = self.store.active_assignments_for_client(client_id);
        let mut released = 0usize;
        for assignment in active {
            self.store.terminate_assignment(
                client_id,
                assignment.pool_lead_id,
                AssignmentState::Released,
            )?;
            self.store.set_cancelled(CancelScope::Lead {
                client_id,
                pool_lead_id: assignment.pool_lead_id,
            });
            self.queue.cancel_matching(|t| {
                t.client_id == client_id && t.pool_lead_id == assignment.pool_lead_id
            });
            self.events.emit(make_event(
                OutreachEventType::AssignmentReleased,
                Some(client_id),
                Some(assignment.pool_lead_id),
                None,
            ));
            released += 1;
        }
        info!(%client_id, released, "released all active assignments");
        Ok(released)
    }

    /// Bounce: suppress the address globally, terminate the assignment and
    /// the lead view, and cancel pending touches.
    pub fn handle_bounce(&self, client_id: Uuid, pool_lead_id: Uuid) -> AgencyResult<()> {
        let lead = self
            .store
            .get_pool_lead(pool_lead_id)
            .ok_or_else(|| AgencyError::NotFound(format!("pool lead {pool_lead_id}")))?;
        self.suppression.suppress_bounce(&lead.email);
        self.terminate_for_deliverability(client_id, pool_lead_id, LeadStatus::Bounced)?;
        self.events.emit(make_event(
            OutreachEventType::LeadBounced,
            Some(client_id),
            Some(pool_lead_id),
            Some(lead.email),
        ));
        Ok(())
    }

    /// Spam complaint: tenant-scoped suppression, same termination path.
    pub fn handle_complaint(&self, client_id: Uuid, pool_lead_id: Uuid) -> AgencyResult<()> {
        let lead = self
            .store
            .get_pool_lead(pool_lead_id)
            .ok_or_else(|| AgencyError::NotFound(format!("pool lead {pool_lead_id}")))?;
        self.suppression.suppress_complaint(client_id, &lead.email);
        self.terminate_for_deliverability(client_id, pool_lead_id, LeadStatus::Dead)?;
        self.events.emit(make_event(
            OutreachEventType::SuppressionAdded,
            Some(client_id),
            Some(pool_lead_id),
            Some("complaint".into()),
        ));
        Ok(())
    }

    fn terminate_for_deliverability(
        &self,
        client_id: Uuid,
        pool_lead_id: Uuid,
        status: LeadStatus,
    ) -> AgencyResult<()> {
        // The lead view must flip before the assignment goes terminal: the
        // referential guard only admits activities under an active
        // assignment, and the webhook path records its activity first.
        self.store
            .update_lead_view(client_id, pool_lead_id, |view| {
                view.status = status;
                view.next_scheduled_at = None;
            })?;
        self.store
            .terminate_assignment(client_id, pool_lead_id, AssignmentState::Suppressed)?;
        self.store.set_cancelled(CancelScope::Lead {
            client_id,
            pool_lead_id,
        });
        self.queue
            .cancel_matching(|t| t.client_id == client_id && t.pool_lead_id == pool_lead_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agency_core::event_bus::capture_sink;
    use agency_core::types::PoolLead;
    use agency_suppression::{SuppressionReason, SuppressionTarget};

    fn setup() -> (PoolManager, Arc<AgencyStore>, Arc<SuppressionIndex>, Uuid, Uuid) {
        let store = Arc::new(AgencyStore::new());
        let queue = Arc::new(TouchQueue::new());
        let suppression = Arc::new(SuppressionIndex::new(vec!["gmail.com".into()]));
        let manager = PoolManager::new(
            store.clone(),
            queue,
            suppression.clone(),
            capture_sink(),
        );
        let lead_id = store.upsert_pool_lead(PoolLead::from_email("alice@corp.com"));
        let client = Uuid::new_v4();
        (manager, store, suppression, client, lead_id)
    }

    #[test]
    fn test_suppressed_lead_not_assigned() {
        let (manager, _store, suppression, client, lead_id) = setup();
        suppression.add(
            Some(client),
            SuppressionTarget::domain("corp.com"),
            SuppressionReason::ExistingCustomer,
            "test",
            None,
            None,
        );

        let outcome = manager
            .try_assign(client, lead_id, Uuid::new_v4(), None)
            .expect("try_assign");
        assert_eq!(
            outcome,
            AssignOutcome::Suppressed {
                reason: "existing_customer".into()
            }
        );
    }

    #[test]
    fn test_assign_then_release_then_reassign() {
        let (manager, _store, _supp, client, lead_id) = setup();
        let other = Uuid::new_v4();
        let campaign = Uuid::new_v4();

        let outcome = manager
            .try_assign(client, lead_id, campaign, None)
            .expect("assign");
        assert!(matches!(outcome, AssignOutcome::Assigned { .. }));

        let blocked = manager
            .try_assign(other, lead_id, campaign, None)
            .expect("assign");
        assert_eq!(
            blocked,
            AssignOutcome::Collision {
                other_client: client
            }
        );

        manager.release_all(client).expect("release");
        let now_free = manager
            .try_assign(other, lead_id, campaign, None)
            .expect("assign");
        assert!(matches!(now_free, AssignOutcome::Assigned { .. }));
    }

    #[test]
    fn test_conversion_permanently_binds() {
        let (manager, store, _supp, client, lead_id) = setup();
        let other = Uuid::new_v4();
        let campaign = Uuid::new_v4();

        manager
            .try_assign(client, lead_id, campaign, None)
            .expect("assign");
        manager
            .record_conversion(client, lead_id, 90)
            .expect("convert");

        assert_eq!(store.converted_owner(lead_id), Some(client));
        let blocked = manager
            .try_assign(other, lead_id, campaign, None)
            .expect("assign");
        assert_eq!(
            blocked,
            AssignOutcome::Collision {
                other_client: client
            }
        );
    }

    #[test]
    fn test_bounce_suppresses_globally_and_terminates() {
        let (manager, store, suppression, client, lead_id) = setup();
        let campaign = Uuid::new_v4();
        manager
            .try_assign(client, lead_id, campaign, None)
            .expect("assign");

        manager.handle_bounce(client, lead_id).expect("bounce");

        // Global entry: any tenant checking this address sees the bounce.
        assert_eq!(
            suppression.check(Uuid::new_v4(), Some("alice@corp.com"), None),
            Some(SuppressionReason::Bounce)
        );
        let view = store.get_lead_view(client, lead_id).expect("view");
        assert_eq!(view.status, LeadStatus::Bounced);
        assert!(store.active_assignment(client, lead_id).is_none());
    }
}
