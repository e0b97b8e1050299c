//! Paper document model
//!
//! A document moves through the pipeline as a single record whose `state`
//! only advances along the edges allowed by [`PipelineState::can_transition_to`]:
//!
//! ```text
//! queued ─► ocr_in_progress ─► ocr_done ─► llm_in_progress ─► llm_done ─► persisted ─► complete
//!                 │   ▲                          │   ▲
//!                 ▼   │                          ▼   │
//!              ocr_failed                     llm_failed
//!
//! any live state ─► failed
//! ```

mod types;

pub use types::{
    AnalysisRecord, Document, DocumentId, PipelineState, Stage, StatePatch, Transition,
    UnknownState,
};
