use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use rusqlite::ErrorCode;
use serde::Serialize;
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config error: {0}")]
    Config(String),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("invalid request body: {0}")]
    BadRequest(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("quantity must be between 1 and {max}, got {0}", max = crate::ledger::MAX_QUANTITY)]
    InvalidQuantity(i64),
    #[error("invalid price: {0}")]
    InvalidPrice(String),
    #[error("insufficient stock for item {item_id}: requested {requested}, available {available}")]
    InsufficientStock {
        item_id: i64,
        requested: i64,
        available: i64,
    },
    #[error("item code {0} already exists")]
    DuplicateCode(String),
    #[error("invoice number {0} already exists")]
    DuplicateInvoice(String),
    #[error("idempotency key {0} was already used for a different request")]
    IdempotencyConflict(String),
    #[error("invalid username or password")]
    AuthFailed,
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("insufficient permissions")]
    Forbidden,
    #[error("method not allowed")]
    MethodNotAllowed,
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::InvalidQuantity(_)
            | AppError::InvalidPrice(_)
            | AppError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::InsufficientStock { .. }
            | AppError::DuplicateCode(_)
            | AppError::DuplicateInvoice(_)
            | AppError::IdempotencyConflict(_) => StatusCode::CONFLICT,
            AppError::AuthFailed | AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            AppError::Database(_) | AppError::Io(_) | AppError::Config(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::InvalidQuantity(_) => "INVALID_QUANTITY",
            AppError::InvalidPrice(_) => "INVALID_PRICE",
            AppError::Validation(_) => "VALIDATION_FAILED",
            AppError::BadRequest(_) => "BAD_REQUEST",
            AppError::InsufficientStock { .. } => "INSUFFICIENT_STOCK",
            AppError::DuplicateCode(_) => "DUPLICATE_CODE",
            AppError::DuplicateInvoice(_) => "DUPLICATE_INVOICE",
            AppError::IdempotencyConflict(_) => "IDEMPOTENCY_CONFLICT",
            AppError::AuthFailed => "AUTH_FAILED",
            AppError::Unauthorized(_) => "UNAUTHORIZED",
            AppError::Forbidden => "FORBIDDEN",
            AppError::MethodNotAllowed => "METHOD_NOT_ALLOWED",
            AppError::Database(_) | AppError::Io(_) | AppError::Config(_) | AppError::Internal(_) => {
                "INTERNAL"
            }
        }
    }
}

/// True when SQLite rejected a write because of a UNIQUE or PRIMARY KEY constraint.
pub(crate) fn is_unique_violation(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(inner, _) => {
            inner.code == ErrorCode::ConstraintViolation
                && matches!(
                    inner.extended_code,
                    rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                        | rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
                )
        }
        _ => false,
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    success: bool,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    code: &'static str,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!(error = %self, "request failed");
            ErrorBody {
                success: false,
                message: "internal server error".into(),
                error: None,
                code: self.code(),
            }
        } else {
            ErrorBody {
                success: false,
                message: self.to_string(),
                error: None,
                code: self.code(),
            }
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(AppError::NotFound("item 7".into()), StatusCode::NOT_FOUND, "NOT_FOUND")]
    #[case(AppError::InvalidQuantity(0), StatusCode::UNPROCESSABLE_ENTITY, "INVALID_QUANTITY")]
    #[case(
        AppError::InsufficientStock { item_id: 1, requested: 100, available: 30 },
        StatusCode::CONFLICT,
        "INSUFFICIENT_STOCK"
    )]
    #[case(AppError::DuplicateCode("BRG001".into()), StatusCode::CONFLICT, "DUPLICATE_CODE")]
    #[case(AppError::AuthFailed, StatusCode::UNAUTHORIZED, "AUTH_FAILED")]
    #[case(AppError::Forbidden, StatusCode::FORBIDDEN, "FORBIDDEN")]
    #[case(AppError::MethodNotAllowed, StatusCode::METHOD_NOT_ALLOWED, "METHOD_NOT_ALLOWED")]
    #[case(AppError::Internal("boom".into()), StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL")]
    fn maps_errors_to_status_and_code(
        #[case] err: AppError,
        #[case] status: StatusCode,
        #[case] code: &str,
    ) {
        assert_eq!(err.status(), status);
        assert_eq!(err.code(), code);
    }

    #[test]
    fn insufficient_stock_message_names_quantities() {
        let err = AppError::InsufficientStock {
            item_id: 3,
            requested: 100,
            available: 30,
        };
        assert_eq!(
            err.to_string(),
            "insufficient stock for item 3: requested 100, available 30"
        );
    }

    #[test]
    fn invalid_quantity_message_names_the_range() {
        assert_eq!(
            AppError::InvalidQuantity(0).to_string(),
            "quantity must be between 1 and 1000000000000, got 0"
        );
    }

    #[test]
    fn detects_unique_violation() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (code TEXT NOT NULL UNIQUE); INSERT INTO t VALUES ('a');")
            .unwrap();
        let err = conn
            .execute("INSERT INTO t VALUES ('a')", [])
            .unwrap_err();
        assert!(is_unique_violation(&err));
    }
}
