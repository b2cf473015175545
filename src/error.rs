use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::engine::{LedgerError, SaleError, SplitError};
use crate::notify::PayoutLine;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Internal server error: {0}")]
    Internal(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Bad request: {0}")]
    BadRequest(String),
    #[error("Invalid state: {0}")]
    InvalidState(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    /// A split stopped part-way; `credited` kept their payouts.
    #[error("Partial split: {message}")]
    PartialSplit {
        message: String,
        credited: Vec<PayoutLine>,
    },
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<LedgerError> for AppError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::MembershipNotFound(_) | LedgerError::GuildNotFound(_) => {
                AppError::NotFound(err.to_string())
            }
            LedgerError::InvalidArgument(msg) => AppError::BadRequest(msg),
            LedgerError::NameTaken(_) => AppError::Conflict(err.to_string()),
            LedgerError::Db(e) => e.into(),
        }
    }
}

impl From<SaleError> for AppError {
    fn from(err: SaleError) -> Self {
        match err {
            SaleError::SaleNotFound(_)
            | SaleError::MembershipNotFound(_)
            | SaleError::GuildNotFound(_)
            | SaleError::ParticipantNotFound(_, _) => AppError::NotFound(err.to_string()),
            SaleError::InvalidState { .. } => AppError::InvalidState(err.to_string()),
            SaleError::InvalidArgument(msg) => AppError::BadRequest(msg),
            SaleError::Db(e) => e.into(),
        }
    }
}

impl From<SplitError> for AppError {
    fn from(err: SplitError) -> Self {
        match err {
            SplitError::SaleNotFound(_) | SplitError::MembershipNotFound(_) => {
                AppError::NotFound(err.to_string())
            }
            SplitError::InvalidState { .. } => AppError::InvalidState(err.to_string()),
            SplitError::InvalidArgument(msg) => AppError::BadRequest(msg),
            SplitError::Partial { ref credited, .. } => AppError::PartialSplit {
                credited: credited.clone(),
                message: err.to_string(),
            },
            SplitError::Db(e) => e.into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            AppError::Internal(msg) => {
                tracing::error!(error = %msg, "Internal error");
                (StatusCode::INTERNAL_SERVER_ERROR, json!({ "error": msg }))
            }
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, json!({ "error": msg })),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, json!({ "error": msg })),
            AppError::InvalidState(msg) | AppError::Conflict(msg) => {
                (StatusCode::CONFLICT, json!({ "error": msg }))
            }
            AppError::PartialSplit { message, credited } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "error": message, "credited": credited }),
            ),
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{MembershipId, SaleId};

    #[test]
    fn test_engine_errors_map_to_status() {
        let cases: Vec<(AppError, StatusCode)> = vec![
            (
                SaleError::SaleNotFound(SaleId::new(1)).into(),
                StatusCode::NOT_FOUND,
            ),
            (
                SaleError::invalid_state(SaleId::new(1), "locked").into(),
                StatusCode::CONFLICT,
            ),
            (
                SplitError::InvalidArgument("no recipients".to_string()).into(),
                StatusCode::BAD_REQUEST,
            ),
            (
                LedgerError::MembershipNotFound(MembershipId::new(1)).into(),
                StatusCode::NOT_FOUND,
            ),
            (
                LedgerError::NameTaken("Ragnar".to_string()).into(),
                StatusCode::CONFLICT,
            ),
        ];

        for (err, expected) in cases {
            assert_eq!(err.into_response().status(), expected);
        }
    }
}
