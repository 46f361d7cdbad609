use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use proxyfleet_common::api::{FieldErrorEntry, ValidationErrorBody};
use sqlx::{error::DatabaseError, Error as SqlxError};
use tracing::error;

use crate::validator::FieldError;

/// Application error type for HTTP handlers.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
    pub field_errors: Vec<FieldErrorEntry>,
}

pub type ApiResult<T> = std::result::Result<T, AppError>;

const DB_UNAVAILABLE_MESSAGE: &str = "database temporarily unavailable";

impl AppError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            field_errors: Vec::new(),
        }
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "bad_request", msg)
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "unauthorized", msg)
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", msg)
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, "conflict", msg)
    }

    pub fn service_unavailable(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, "service_unavailable", msg)
    }

    pub fn internal(msg: &str) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg)
    }

    /// Field-level validation failure; the errors travel as data, not as a
    /// fatal condition (the whole list is produced before returning).
    pub fn validation(errors: Vec<FieldError>) -> Self {
        let mut app = Self::new(
            StatusCode::UNPROCESSABLE_ENTITY,
            "validation_failed",
            "document failed validation",
        );
        app.field_errors = errors
            .into_iter()
            .map(|e| FieldErrorEntry {
                path: e.path,
                message: e.message,
            })
            .collect();
        app
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.code == "validation_failed" {
            let body = ValidationErrorBody {
                code: self.code.to_string(),
                errors: self.field_errors,
            };
            return (self.status, Json(body)).into_response();
        }
        let body = serde_json::json!({
            "code": self.code,
            "message": self.message,
        });
        (self.status, Json(body)).into_response()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DbErrorKind {
    UniqueViolation,
    ForeignKeyViolation,
    NotNullViolation,
    Busy,
}

fn map_anyhow_error(err: &anyhow::Error) -> Option<AppError> {
    let sqlx_err = err
        .chain()
        .find_map(|cause| cause.downcast_ref::<SqlxError>())?;
    map_sqlx_error(sqlx_err)
}

fn map_sqlx_error(err: &SqlxError) -> Option<AppError> {
    match err {
        SqlxError::RowNotFound => Some(AppError::not_found("resource not found")),
        SqlxError::Database(db_err) => map_database_error(db_err.as_ref()),
        SqlxError::PoolTimedOut | SqlxError::PoolClosed | SqlxError::Io(_) => {
            Some(AppError::service_unavailable(DB_UNAVAILABLE_MESSAGE))
        }
        _ => None,
    }
}

fn map_database_error(err: &dyn DatabaseError) -> Option<AppError> {
    let kind = classify_db_error(err.code().as_deref(), err.message())?;
    match kind {
        DbErrorKind::UniqueViolation => Some(AppError::conflict("resource already exists")),
        DbErrorKind::ForeignKeyViolation => Some(AppError::bad_request("invalid reference")),
        DbErrorKind::NotNullViolation => Some(AppError::bad_request("missing required field")),
        DbErrorKind::Busy => Some(AppError::service_unavailable(DB_UNAVAILABLE_MESSAGE)),
    }
}

fn classify_db_error(code: Option<&str>, message: &str) -> Option<DbErrorKind> {
    let code = code.unwrap_or_default();
    let message = message.to_ascii_lowercase();

    if matches!(code, "2067" | "1555")
        || message.contains("unique constraint")
        || message.contains("duplicate key")
    {
        return Some(DbErrorKind::UniqueViolation);
    }

    if code == "787" || message.contains("foreign key constraint") {
        return Some(DbErrorKind::ForeignKeyViolation);
    }

    if message.contains("not null constraint") {
        return Some(DbErrorKind::NotNullViolation);
    }

    if message.contains("database is locked") || message.contains("database is busy") {
        return Some(DbErrorKind::Busy);
    }

    None
}

impl From<crate::push::SubmitError> for AppError {
    fn from(err: crate::push::SubmitError) -> Self {
        use crate::push::SubmitError;
        match err {
            SubmitError::AgentNotFound => AppError::not_found("agent not found"),
            SubmitError::UnknownProtocol(inner) => AppError::bad_request(inner.to_string()),
            SubmitError::Validation(errors) => AppError::validation(errors),
            SubmitError::Invalid(message) => AppError::bad_request(message),
            SubmitError::Storage(inner) => AppError::from(inner),
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        if let Some(mapped) = map_anyhow_error(&err) {
            if mapped.status.is_server_error() {
                crate::telemetry::record_internal_error();
                error!(?err, "internal error");
            }
            return mapped;
        }

        crate::telemetry::record_internal_error();
        error!(?err, "internal error");
        AppError::internal("internal server error")
    }
}
