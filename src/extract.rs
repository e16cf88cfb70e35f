use axum::extract::FromRequest;

use crate::error::AppError;

/// `axum::Json` whose rejections use the API error envelope.
#[derive(Debug, FromRequest)]
#[from_request(via(axum::Json), rejection(AppError))]
pub struct JsonBody<T>(pub T);

/// `axum::Form` with API error rejections.
#[derive(Debug, FromRequest)]
#[from_request(via(axum::Form), rejection(AppError))]
pub struct FormBody<T>(pub T);
