//! Remote call helpers
//!
//! OCR and LLM providers fail in the same few ways. These helpers sort a
//! failure into "try again later" or "will never work" so both clients report
//! errors with one vocabulary.

use reqwest::StatusCode;

/// Whether a failed remote call is worth repeating
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Timeouts, overload, server errors
    Retryable,
    /// Bad credentials, rejected input
    Fatal,
}

/// Classify an HTTP status returned by a provider
pub fn classify_status(status: StatusCode) -> Disposition {
    match status.as_u16() {
        408 | 425 | 429 => Disposition::Retryable,
        500..=599 => Disposition::Retryable,
        _ => Disposition::Fatal,
    }
}

/// Classify a transport-level reqwest failure
pub fn classify_transport(err: &reqwest::Error) -> Disposition {
    if let Some(status) = err.status() {
        return classify_status(status);
    }
    if err.is_builder() || err.is_redirect() {
        return Disposition::Fatal;
    }
    // timeouts, refused connections, resets, truncated or undecodable bodies
    Disposition::Retryable
}

/// Shorten a response body for error messages
pub fn truncate_body(body: &str) -> String {
    const MAX: usize = 300;
    if body.chars().count() <= MAX {
        body.to_string()
    } else {
        let cut: String = body.chars().take(MAX).collect();
        format!("{}...", cut)
    }
}
