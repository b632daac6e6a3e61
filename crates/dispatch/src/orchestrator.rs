//! Dispatch orchestrator — owns the shared worker context, materializes
//! allocator schedules into queue rows, and runs the per-channel worker
//! pool.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;
use uuid::Uuid;

use agency_core::config::DispatchConfig;
use agency_core::event_bus::EventSink;
use agency_core::types::{Channel, ScheduledTouch, TouchStatus};
use agency_channels::ChannelAdapter;
use agency_scoring::TouchSchedule;
use agency_store::{AgencyStore, RateCounters, TouchQueue};

use crate::compose::TouchComposer;
use crate::jit::JitValidator;
use crate::worker::DispatchWorker;

/// Shared state every worker runs against.
pub struct DispatchContext {
    pub store: Arc<AgencyStore>,
    pub queue: Arc<TouchQueue>,
    pub counters: Arc<RateCounters>,
    pub validator: JitValidator,
    pub adapters: HashMap<Channel, Arc<dyn ChannelAdapter>>,
    pub composer: Arc<dyn TouchComposer>,
    pub events: Arc<dyn EventSink>,
    pub config: DispatchConfig,
}

/// Maps (client, channel) to the sending resource a touch is pinned to.
/// Production: per-client mailbox/seat/number inventories; this planner
/// derives one resource per client per channel.
pub struct ResourcePlanner;

impl ResourcePlanner {
    pub fn resource_for(client_id: Uuid, channel: Channel) -> String {
        let short = &client_id.simple().to_string()[..8];
        match channel {
            Channel::Email => format!("mailbox-{short}"),
            Channel::Sms => format!("number-{short}"),
            Channel::Linkedin => format!("seat-{short}"),
            Channel::Voice => format!("number-{short}"),
            Channel::Mail => format!("mail-account-{short}"),
        }
    }
}

/// Turn an allocator schedule into queue rows for one enrollment.
pub fn materialize_schedule(
    client_id: Uuid,
    campaign_id: Uuid,
    pool_lead_id: Uuid,
    schedule: &TouchSchedule,
    enrolled_at: DateTime<Utc>,
) -> Vec<ScheduledTouch> {
    schedule
        .touches
        .iter()
        .enumerate()
        .map(|(i, planned)| ScheduledTouch {
            id: Uuid::new_v4(),
            client_id,
            campaign_id,
            pool_lead_id,
            channel: planned.channel,
            resource_id: ResourcePlanner::resource_for(client_id, planned.channel),
            due_at: enrolled_at + Duration::days(i64::from(planned.offset_days)),
            touch_number: i as u32 + 1,
            template_ref: planned.template_ref.clone(),
            enhanced: planned.enhanced,
            status: TouchStatus::Pending,
            attempts: 0,
            requeues: 0,
            lease_expires_at: None,
            last_error: None,
        })
        .collect()
}

pub struct DispatchOrchestrator {
    ctx: Arc<DispatchContext>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    workers_per_channel: usize,
}

impl DispatchOrchestrator {
    pub fn new(ctx: DispatchContext) -> Self {
        let workers_per_channel = ctx.config.workers_per_channel.max(1);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            ctx: Arc::new(ctx),
            shutdown_tx,
            shutdown_rx,
            workers_per_channel,
        }
    }

    pub fn context(&self) -> Arc<DispatchContext> {
        self.ctx.clone()
    }

    /// Spawn the worker pool: `workers_per_channel` tasks for every channel
    /// that has an adapter registered.
    pub fn start(&self) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();
        for channel in Channel::ALL {
            if !self.ctx.adapters.contains_key(&channel) {
                continue;
            }
            for worker_id in 0..self.workers_per_channel {
                let worker = DispatchWorker::new(self.ctx.clone(), channel, worker_id);
                let shutdown = self.shutdown_rx.clone();
                handles.push(tokio::spawn(worker.run(shutdown)));
            }
        }
        info!(workers = handles.len(), "dispatch orchestrator started");
        handles
    }

    /// Flip the shutdown flag; running workers exit at their next yield
    /// point.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agency_scoring::{Allocator, PlannedTouch};

    #[test]
    fn test_materialize_offsets_and_numbers() {
        let schedule = TouchSchedule {
            touches: vec![
                PlannedTouch {
                    channel: Channel::Email,
                    offset_days: 0,
                    template_ref: "intro".into(),
                    enhanced: false,
                },
                PlannedTouch {
                    channel: Channel::Linkedin,
                    offset_days: 2,
                    template_ref: "connect".into(),
                    enhanced: true,
                },
            ],
        };
        let enrolled = Utc::now();
        let touches = materialize_schedule(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            &schedule,
            enrolled,
        );

        assert_eq!(touches.len(), 2);
        assert_eq!(touches[0].touch_number, 1);
        assert_eq!(touches[1].touch_number, 2);
        assert_eq!(touches[0].due_at, enrolled);
        assert_eq!(touches[1].due_at, enrolled + Duration::days(2));
        assert!(touches[1].enhanced);
    }

    #[test]
    fn test_resource_planner_is_stable_per_client() {
        let client = Uuid::new_v4();
        assert_eq!(
            ResourcePlanner::resource_for(client, Channel::Email),
            ResourcePlanner::resource_for(client, Channel::Email)
        );
        assert_ne!(
            ResourcePlanner::resource_for(client, Channel::Email),
            ResourcePlanner::resource_for(Uuid::new_v4(), Channel::Email)
        );
    }

    #[test]
    fn test_default_sequence_materializes_for_hot() {
        use agency_core::types::{LeadSignals, TenantPolicy};
        let schedule = Allocator::allocate(
            Uuid::new_v4(),
            agency_core::types::AlsTier::Hot,
            &LeadSignals::default(),
            None,
            None,
            &TenantPolicy::default(),
            &Allocator::default_sequence(),
            &RateCounters::new(),
            Utc::now(),
        );
        let touches = materialize_schedule(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            &schedule,
            Utc::now(),
        );
        assert_eq!(touches.len(), 6);
    }
}
