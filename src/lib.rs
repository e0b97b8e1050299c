//! HomeSystem paper pipeline
//!
//! Accepts papers (local PDFs or URLs), extracts their text through a remote
//! OCR service, analyses the text with a remote LLM and persists the result.
//! Each document moves through a compare-and-swap guarded state machine fed
//! by an at-least-once job queue.

pub mod config;
pub mod db;
pub mod document;
pub mod error;
pub mod llm;
pub mod ocr;
pub mod pipeline;
pub mod queue;
pub mod remote;
pub mod routes;
pub mod state;

#[cfg(test)]
mod testing;
