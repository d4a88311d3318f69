use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::migrate::MigrateError;
use thiserror::Error;
use uuid::Uuid;

use crate::ledger::models::Party;

/// Top-level error type for the entire application
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Persistence failure: {0}")]
    Persistence(String),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Payment plan error: {0}")]
    Plan(#[from] PlanError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl AppError {
    /// True when the store could not read or write. These are retried on the
    /// next scheduler pass.
    pub fn is_persistence(&self) -> bool {
        matches!(self, AppError::Database(_) | AppError::Persistence(_))
    }
}

/// Ledger-related errors
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Amount must be positive, got {0}")]
    InvalidAmount(i64),

    #[error("Sender and receiver must differ")]
    SelfTransfer,

    #[error("Plan {plan_id} already has an entry for the occurrence due at {due_at}")]
    DuplicateOccurrence {
        plan_id: Uuid,
        due_at: DateTime<Utc>,
    },

    #[error("Balance of {party} would overflow")]
    BalanceOverflow { party: Party },

    #[error("Insufficient balance for {party}: required {required}, available {available}")]
    InsufficientBalance {
        party: Party,
        required: i64,
        available: i64,
    },
}

/// Payment plan errors
#[derive(Error, Debug)]
pub enum PlanError {
    #[error("Payment plan not found: {0}")]
    NotFound(Uuid),

    #[error("User {user_id} referenced by payment plan {plan_id} no longer exists")]
    PartyNotFound { plan_id: Uuid, user_id: Uuid },

    #[error("Unknown schedule unit: {0:?}")]
    UnknownScheduleUnit(String),

    #[error("Schedule must be positive, got {0}")]
    InvalidSchedule(i32),

    #[error("Schedule arithmetic does not move forward from {from}")]
    ScheduleOverflow { from: DateTime<Utc> },

    #[error("Payment count must not be zero")]
    InvalidPaymentCount,
}

/// API error response structure
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub error_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_code, message, details) = match self {
            AppError::Plan(PlanError::NotFound(id)) => (
                StatusCode::NOT_FOUND,
                "PAYMENT_PLAN_NOT_FOUND",
                format!("Payment plan not found: {}", id),
                None,
            ),
            AppError::Ledger(LedgerError::InsufficientBalance {
                party,
                required,
                available,
            }) => (
                StatusCode::CONFLICT,
                "INSUFFICIENT_BALANCE",
                format!("Insufficient balance for {}", party),
                Some(serde_json::json!({
                    "required": required,
                    "available": available,
                })),
            ),
            AppError::Ledger(e) => (StatusCode::BAD_REQUEST, "INVALID_TRANSFER", e.to_string(), None),
            AppError::InvalidInput(message) => {
                (StatusCode::BAD_REQUEST, "INVALID_INPUT", message, None)
            }
            AppError::NotFound(message) => (StatusCode::NOT_FOUND, "NOT_FOUND", message, None),
            AppError::Database(_) | AppError::Persistence(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "DATABASE_ERROR",
                "A database error occurred".to_string(),
                None,
            ),
            _ => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "An internal error occurred".to_string(),
                None,
            ),
        };

        let body = Json(ErrorResponse {
            error: message,
            error_code: error_code.to_string(),
            details,
        });

        (status, body).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(error: anyhow::Error) -> Self {
        AppError::Internal(format!("Error converting: {:?}", error))
    }
}

impl From<MigrateError> for AppError {
    fn from(error: MigrateError) -> Self {
        AppError::Internal(format!("Migration error: {:?}", error))
    }
}

impl From<config::ConfigError> for AppError {
    fn from(error: config::ConfigError) -> Self {
        AppError::Config(error.to_string())
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(error: validator::ValidationErrors) -> Self {
        AppError::InvalidInput(error.to_string())
    }
}

/// Result type alias for the application
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn render(error: AppError) -> (StatusCode, serde_json::Value) {
        let response = error.into_response();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_insufficient_balance_response() {
        let error: AppError = LedgerError::InsufficientBalance {
            party: Party::Bank,
            required: 50,
            available: 20,
        }
        .into();

        let (status, body) = render(error).await;

        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error_code"], "INSUFFICIENT_BALANCE");
        assert_eq!(body["details"]["required"], 50);
        assert_eq!(body["details"]["available"], 20);
    }

    #[tokio::test]
    async fn test_persistence_details_are_hidden() {
        let error = AppError::Persistence("disk on fire".to_string());
        assert!(error.is_persistence());

        let (status, body) = render(error).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "A database error occurred");
        assert!(body.get("details").is_none());
    }

    #[test]
    fn test_plan_errors_are_not_persistence() {
        let error: AppError = PlanError::UnknownScheduleUnit("decade".to_string()).into();

        assert!(!error.is_persistence());
        assert_eq!(
            error.to_string(),
            "Payment plan error: Unknown schedule unit: \"decade\""
        );
    }
}
