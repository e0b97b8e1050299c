//! OCR Module
//!
//! Extracts markdown from paper PDFs through a remote OCR API.
//!
//! Supports multiple backends, one of which is chosen at startup:
//! - MinerU cloud API (upload, task, poll, download)
//! - HomeSystem OCR microservice
//!
//! Failures carry a [`Disposition`](crate::remote::Disposition) so the
//! pipeline can tell a rate limit from a rejected document.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use homesystem_pipeline::ocr::OcrService;
//!
//! let service = OcrService::from_config(&config.ocr)?;
//! let output = service.extract("https://arxiv.org/pdf/1706.03762").await?;
//! println!("{}", output.markdown);
//! ```

mod mineru;
mod provider;
mod service;
mod types;

pub use mineru::{MineruBackend, MineruSettings};
pub use provider::{OcrBackend, OcrServiceBackend};
pub use service::OcrService;
pub use types::{OcrBackendKind, OcrError, OcrOutput, OcrReport};
