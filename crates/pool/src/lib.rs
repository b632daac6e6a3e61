//! Pool manager — assignment lifecycle under exclusivity and collision
//! rules, plus campaign supply.

pub mod manager;
pub mod supply;

pub use manager::PoolManager;
pub use supply::{EnrollmentReport, ProspectSource, StubProspectSource, Supplier};
