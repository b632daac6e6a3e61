//! Dispatch orchestration — materializes scheduled touches into sends with
//! correct ordering, rate limits, JIT validation, and at-most-once
//! semantics.

pub mod compose;
pub mod jit;
pub mod orchestrator;
pub mod worker;

pub use compose::{ComposedTouch, TemplateComposer, TouchComposer};
pub use jit::{JitValidator, JitVerdict, SkipReason};
pub use orchestrator::{DispatchContext, DispatchOrchestrator, ResourcePlanner};
pub use worker::DispatchWorker;
