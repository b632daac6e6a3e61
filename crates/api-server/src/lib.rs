//! Tenant-facing HTTP API: REST endpoints, webhook receivers, and the
//! outbound webhook emitter.

pub mod outbound;
pub mod rest;
pub mod server;
pub mod webhooks;

pub use outbound::{LoggingTransport, OutboundEmitter, WebhookTransport};
pub use rest::AppState;
pub use server::build_router;
