use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use agency_core::types::{ThreadOutcome, ThreadStatus};

/// Describes a single valid transition of a thread's (status, outcome) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadTransition {
    pub from_status: ThreadStatus,
    pub to_status: ThreadStatus,
    pub to_outcome: ThreadOutcome,
    pub trigger: String,
}

/// Guards thread lifecycle by enforcing a finite set of valid transitions.
/// Threads start `Active`/`Ongoing` on the first message.
#[derive(Debug, Clone)]
pub struct ThreadStateMachine {
    transitions: Vec<ThreadTransition>,
}

impl ThreadStateMachine {
    pub fn new() -> Self {
        let transitions = vec![
            // Active ->
            transition(
                ThreadStatus::Active,
                ThreadStatus::Resolved,
                ThreadOutcome::Converted,
                "meeting_booked",
            ),
            transition(
                ThreadStatus::Active,
                ThreadStatus::Resolved,
                ThreadOutcome::Rejected,
                "unsubscribe",
            ),
            transition(
                ThreadStatus::Active,
                ThreadStatus::Resolved,
                ThreadOutcome::Rejected,
                "not_interested",
            ),
            transition(
                ThreadStatus::Active,
                ThreadStatus::Stale,
                ThreadOutcome::NoResponse,
                "no_inbound_window_elapsed",
            ),
            // Stale -> (a late reply revives the conversation)
            transition(
                ThreadStatus::Stale,
                ThreadStatus::Active,
                ThreadOutcome::Ongoing,
                "late_inbound",
            ),
            transition(
                ThreadStatus::Stale,
                ThreadStatus::Resolved,
                ThreadOutcome::Converted,
                "meeting_booked",
            ),
        ];
        Self { transitions }
    }

    pub fn can_transition(
        &self,
        from: ThreadStatus,
        to: ThreadStatus,
        outcome: ThreadOutcome,
    ) -> bool {
        self.transitions
            .iter()
            .any(|t| t.from_status == from && t.to_status == to && t.to_outcome == outcome)
    }

    /// Validate and return the target pair, or an error for an illegal move.
    pub fn transition(
        &self,
        from: ThreadStatus,
        to: ThreadStatus,
        outcome: ThreadOutcome,
    ) -> Result<(ThreadStatus, ThreadOutcome)> {
        if from == to {
            return Ok((to, outcome));
        }
        if self.can_transition(from, to, outcome) {
            Ok((to, outcome))
        } else {
            Err(anyhow!(
                "Invalid thread transition from {:?} to {:?}/{:?}",
                from,
                to,
                outcome
            ))
        }
    }
}

impl Default for ThreadStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

fn transition(
    from_status: ThreadStatus,
    to_status: ThreadStatus,
    to_outcome: ThreadOutcome,
    trigger: &str,
) -> ThreadTransition {
    ThreadTransition {
        from_status,
        to_status,
        to_outcome,
        trigger: trigger.to_string(),
    }
}
