//! Application error type and its translation into HTTP responses.
//!
//! Operational errors carry a status code and a message that is safe to show
//! to clients. Everything else is `Internal` and is reported as a generic 500.

use axum::{
    extract::{multipart::MultipartError, rejection::FormRejection, rejection::JsonRejection, Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::{error, warn};

use crate::{
    auth::jwt::TokenError, payments::WebhookError, query::QueryError, state::AppState,
    store::StoreError,
};

pub const GENERIC_MESSAGE: &str = "Something went very wrong!";

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    BadRequest(String),
    #[error("Invalid input data. {}", .0.join(". "))]
    InvalidInput(Vec<String>),
    #[error("Invalid {field}: {value}")]
    InvalidId { field: String, value: String },
    #[error("Duplicate field value: {0}. Please use another value!")]
    Duplicate(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("Invalid token. Please log in again!")]
    InvalidToken,
    #[error("Your token has expired! Please log in again.")]
    ExpiredToken,
    #[error("You do not have permission to perform this action")]
    Forbidden,
    #[error("{0}")]
    NotFound(String),
    #[error("This page does not exist")]
    PageUnavailable,
    #[error("Token is invalid or has expired")]
    InvalidOrExpiredToken,
    #[error("There was an error sending the email. Try again later!")]
    EmailDelivery,
    #[error("{0}")]
    Conflict(String),
    #[error("Not an image! Please upload only images.")]
    NotAnImage,
    /// Operational 500 with a fixed message, e.g. routes that are intentionally unavailable.
    #[error("{0}")]
    Unavailable(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub fn not_found() -> Self {
        AppError::NotFound("No document found with that ID".into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_)
            | AppError::InvalidInput(_)
            | AppError::InvalidId { .. }
            | AppError::Duplicate(_)
            | AppError::InvalidOrExpiredToken
            | AppError::NotAnImage => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) | AppError::InvalidToken | AppError::ExpiredToken => {
                StatusCode::UNAUTHORIZED
            }
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::NotFound(_) | AppError::PageUnavailable => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::EmailDelivery | AppError::Unavailable(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn is_operational(&self) -> bool {
        !matches!(self, AppError::Internal(_))
    }
}

fn status_label(status: StatusCode) -> &'static str {
    if status.is_client_error() {
        "fail"
    } else {
        "error"
    }
}

/// Attached to error responses so the outer middleware can add development
/// detail or render the HTML error page.
#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub operational: bool,
    pub message: String,
    pub detail: String,
    pub stack: Vec<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let report = match &self {
            AppError::Internal(err) => {
                error!(error = ?err, "unhandled error");
                ErrorReport {
                    operational: false,
                    message: GENERIC_MESSAGE.to_string(),
                    detail: format!("{err:#}"),
                    stack: err.chain().map(|c| c.to_string()).collect(),
                }
            }
            other => {
                if status.is_server_error() {
                    error!(%status, error = %other, "operational error");
                } else {
                    warn!(%status, error = %other, "request failed");
                }
                ErrorReport {
                    operational: true,
                    message: other.to_string(),
                    detail: format!("{other:?}"),
                    stack: Vec::new(),
                }
            }
        };
        let body = json!({ "status": status_label(status), "message": report.message });
        let mut res = (status, Json(body)).into_response();
        res.extensions_mut().insert(report);
        res
    }
}

fn wants_json(path: &str) -> bool {
    path.starts_with("/api") || path.starts_with("/webhook")
}

/// Outermost error translation: development detail for the API and the
/// rendered error page for everything else.
pub async fn render_errors(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let json = wants_json(req.uri().path());
    let mut res = next.run(req).await;
    let Some(report) = res.extensions_mut().remove::<ErrorReport>() else {
        return res;
    };
    let status = res.status();
    let dev = state.config.is_development();

    if json {
        if !dev {
            return res;
        }
        let message = if report.operational { &report.message } else { &report.detail };
        let body = json!({
            "status": status_label(status),
            "message": message,
            "error": report.detail,
            "stack": report.stack,
        });
        return (status, Json(body)).into_response();
    }

    let msg = match (report.operational, dev) {
        (true, _) => report.message,
        (false, true) => report.detail,
        (false, false) => "Please try again later.".to_string(),
    };
    match state.views.error_page(&msg) {
        Ok(page) => (status, page).into_response(),
        Err(err) => {
            error!(error = ?err, "error page rendering failed");
            res
        }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Duplicate { value, .. } => AppError::Duplicate(value),
            StoreError::VersionConflict(id) => {
                warn!(%id, "concurrent modification");
                AppError::Conflict(
                    "The document was modified by another request. Please try again.".into(),
                )
            }
            StoreError::Db(e) => AppError::Internal(anyhow::Error::new(e).context("document store")),
        }
    }
}

impl From<QueryError> for AppError {
    fn from(err: QueryError) -> Self {
        match err {
            QueryError::PageUnavailable => AppError::PageUnavailable,
            other => AppError::BadRequest(other.to_string()),
        }
    }
}

impl From<TokenError> for AppError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Expired => AppError::ExpiredToken,
            TokenError::Invalid => AppError::InvalidToken,
        }
    }
}

impl From<WebhookError> for AppError {
    fn from(err: WebhookError) -> Self {
        AppError::BadRequest(format!("Webhook error: {err}"))
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

impl From<FormRejection> for AppError {
    fn from(rejection: FormRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

impl From<MultipartError> for AppError {
    fn from(err: MultipartError) -> Self {
        AppError::BadRequest(err.body_text())
    }
}
