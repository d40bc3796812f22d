//! Call lifecycle: live chunk scoring, finalization, and the service facade
//! the transport layer talks to.

pub mod finalize;
pub mod orchestrator;
pub mod service;

pub use finalize::{FinalizationService, FinalizeOutcome, Persistence, RetryPolicy};
pub use orchestrator::{ChunkAssessment, InferenceOrchestrator};
pub use service::{CallService, ChunkReport};
