//! Transactional persistence for the platform: entities, the assignment
//! ledger, the append-only activity log, threads, patterns, the dispatch
//! queue, and durable counters.
//!
//! Production: replace with PostgreSQL (sqlx) behind the same API surface.
//! The in-memory store keeps the same transactional boundaries — the ledger
//! lock serializes exactly the two operations the schema would run under
//! serialisable isolation.

pub mod counters;
pub mod queue;
pub mod store;

pub use counters::RateCounters;
pub use queue::TouchQueue;
pub use store::{AgencyStore, CancelScope, LeadFilter};
