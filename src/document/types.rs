//! Document Types
//!
//! The paper record tracked by the pipeline, its state machine, and the
//! history/result records written alongside it.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Document identifier
pub type DocumentId = Uuid;

// ============================================================================
// Pipeline State
// ============================================================================

/// Where a document is in the OCR → LLM → persist pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Queued,
    OcrInProgress,
    OcrFailed,
    OcrDone,
    LlmInProgress,
    LlmFailed,
    LlmDone,
    Persisted,
    Complete,
    /// Terminal failure (retries exhausted, fatal error or cancelled)
    Failed,
}

impl PipelineState {
    pub const ALL: [PipelineState; 10] = [
        Self::Queued,
        Self::OcrInProgress,
        Self::OcrFailed,
        Self::OcrDone,
        Self::LlmInProgress,
        Self::LlmFailed,
        Self::LlmDone,
        Self::Persisted,
        Self::Complete,
        Self::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::OcrInProgress => "ocr_in_progress",
            Self::OcrFailed => "ocr_failed",
            Self::OcrDone => "ocr_done",
            Self::LlmInProgress => "llm_in_progress",
            Self::LlmFailed => "llm_failed",
            Self::LlmDone => "llm_done",
            Self::Persisted => "persisted",
            Self::Complete => "complete",
            Self::Failed => "failed",
        }
    }

    /// No further transitions are possible
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }

    /// Whether `next` is a legal successor of this state.
    ///
    /// An in-progress state may transition to itself: a redelivered work item
    /// re-claims a document whose previous worker disappeared mid-call.
    pub fn can_transition_to(&self, next: PipelineState) -> bool {
        use PipelineState::*;

        if next == Failed {
            return !self.is_terminal();
        }

        matches!(
            (self, next),
            (Queued, OcrInProgress)
                | (OcrInProgress, OcrInProgress)
                | (OcrInProgress, OcrDone)
                | (OcrInProgress, OcrFailed)
                | (OcrFailed, OcrInProgress)
                | (OcrDone, LlmInProgress)
                | (LlmInProgress, LlmInProgress)
                | (LlmInProgress, LlmDone)
                | (LlmInProgress, LlmFailed)
                | (LlmFailed, LlmInProgress)
                | (LlmDone, Persisted)
                | (Persisted, Complete)
        )
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Unknown pipeline state: {0}")]
pub struct UnknownState(pub String);

impl FromStr for PipelineState {
    type Err = UnknownState;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| UnknownState(s.to_string()))
    }
}

// ============================================================================
// Stages
// ============================================================================

/// A unit of work a queued item asks a worker to perform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Ocr,
    Llm,
    Persist,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ocr => "ocr",
            Self::Llm => "llm",
            Self::Persist => "persist",
        }
    }

    /// States from which a fresh attempt of this stage may start
    pub fn entry_states(&self) -> &'static [PipelineState] {
        match self {
            Self::Ocr => &[PipelineState::Queued, PipelineState::OcrFailed],
            Self::Llm => &[PipelineState::OcrDone, PipelineState::LlmFailed],
            Self::Persist => &[PipelineState::LlmDone],
        }
    }

    pub fn in_progress_state(&self) -> PipelineState {
        match self {
            Self::Ocr => PipelineState::OcrInProgress,
            Self::Llm => PipelineState::LlmInProgress,
            Self::Persist => PipelineState::Persisted,
        }
    }

    pub fn done_state(&self) -> PipelineState {
        match self {
            Self::Ocr => PipelineState::OcrDone,
            Self::Llm => PipelineState::LlmDone,
            Self::Persist => PipelineState::Complete,
        }
    }

    pub fn failed_state(&self) -> Option<PipelineState> {
        match self {
            Self::Ocr => Some(PipelineState::OcrFailed),
            Self::Llm => Some(PipelineState::LlmFailed),
            Self::Persist => None,
        }
    }

    pub fn next(&self) -> Option<Stage> {
        match self {
            Self::Ocr => Some(Self::Llm),
            Self::Llm => Some(Self::Persist),
            Self::Persist => None,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = UnknownState;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ocr" => Ok(Self::Ocr),
            "llm" => Ok(Self::Llm),
            "persist" => Ok(Self::Persist),
            other => Err(UnknownState(other.to_string())),
        }
    }
}

// ============================================================================
// Records
// ============================================================================

/// A submitted paper and everything the pipeline has learned about it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: DocumentId,
    /// Local path or http(s) URL of the source PDF
    pub source_ref: String,
    pub state: PipelineState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Failed OCR attempts so far
    pub ocr_attempts: u32,
    /// Failed LLM attempts so far
    pub llm_attempts: u32,
    pub extracted_text: Option<String>,
    pub analysis_result: Option<String>,
    pub last_error: Option<String>,
}

impl Document {
    pub fn new(source_ref: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            source_ref: source_ref.to_string(),
            state: PipelineState::Queued,
            created_at: now,
            updated_at: now,
            ocr_attempts: 0,
            llm_attempts: 0,
            extracted_text: None,
            analysis_result: None,
            last_error: None,
        }
    }

    /// Failed attempts recorded for a stage
    pub fn attempts(&self, stage: Stage) -> u32 {
        match stage {
            Stage::Ocr => self.ocr_attempts,
            Stage::Llm => self.llm_attempts,
            Stage::Persist => 0,
        }
    }
}

/// Changes applied together with a state transition
#[derive(Debug, Clone, Default)]
pub struct StatePatch {
    pub extracted_text: Option<String>,
    pub analysis_result: Option<String>,
    /// `Some(None)` clears the stored error
    pub last_error: Option<Option<String>>,
    /// Increment the failed-attempt counter of this stage
    pub count_attempt: Option<Stage>,
}

impl StatePatch {
    pub fn extracted(text: String) -> Self {
        Self {
            extracted_text: Some(text),
            last_error: Some(None),
            ..Default::default()
        }
    }

    pub fn analysed(analysis: String) -> Self {
        Self {
            analysis_result: Some(analysis),
            last_error: Some(None),
            ..Default::default()
        }
    }

    pub fn failed_attempt(stage: Stage, error: &str) -> Self {
        Self {
            last_error: Some(Some(error.to_string())),
            count_attempt: Some(stage),
            ..Default::default()
        }
    }
}

/// One recorded state change
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transition {
    pub document_id: DocumentId,
    pub from_state: PipelineState,
    pub to_state: PipelineState,
    pub detail: Option<String>,
    pub at: DateTime<Utc>,
}

/// Final analysis output, written once when a document reaches `persisted`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisRecord {
    pub document_id: DocumentId,
    pub extracted_text: String,
    pub analysis: String,
    pub persisted_at: DateTime<Utc>,
}

// ============================================================================
// Tests
// ============================================================================
