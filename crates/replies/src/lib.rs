//! Reply handling — webhook-first ingest, the thread state machine, and the
//! reply classifier contract.

pub mod classifier;
pub mod ingestor;
pub mod thread_machine;

pub use classifier::{Classification, KeywordClassifier, LlmClient, LlmTier, ReplyClassifier};
pub use ingestor::{IngestReport, MessagePoller, ReplyIngestor};
pub use thread_machine::ThreadStateMachine;
