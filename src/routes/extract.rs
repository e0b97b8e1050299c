//! Extractors whose rejections use the JSON error body

use axum::extract::{FromRequest, FromRequestParts};

use crate::error::AppError;

/// `Json` body; malformed or incomplete bodies become `validation_error`
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(AppError))]
pub struct ApiJson<T>(pub T);

/// `Path` parameters; unparsable ids become `validation_error`
#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Path), rejection(AppError))]
pub struct ApiPath<T>(pub T);
