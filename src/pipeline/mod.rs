//! Pipeline Module
//!
//! Moves submitted papers through OCR, LLM analysis and persistence.
//!
//! Workers pull stage items from the job queue; the orchestrator runs the
//! matching handler and records the outcome on the document. Retryable
//! failures come back through the queue after a backoff delay, fatal ones
//! end the document in `failed`.

mod orchestrator;
mod retry;
mod stage;
mod types;
mod worker;

pub use orchestrator::{Orchestrator, OrchestratorSettings};
pub use retry::RetryPolicy;
pub use stage::{LlmStage, OcrStage, StageHandler, StageResult};
pub use types::{Outcome, PipelineError};
pub use worker::WorkerPool;
