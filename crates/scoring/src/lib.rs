//! Agency Lead Score computation and channel allocation.
//!
//! Both are pure decision functions: the scorer maps an enriched lead and a
//! client weight vector to a score, component breakdown, and tier; the
//! allocator maps tier + signals + policy to a touch schedule.

pub mod allocator;
pub mod scorer;

pub use allocator::{Allocator, PlannedTouch, TouchSchedule};
pub use scorer::{RiskFlags, ScoredLead, Scorer};
