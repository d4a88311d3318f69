use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::scheduler::PassReport;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub success: bool,
    pub message: String,
    pub payment_plans: PaymentPlanStatus,
}

/// Scheduler state as seen by operators
#[derive(Debug, Serialize)]
pub struct PaymentPlanStatus {
    pub interval_secs: u64,
    pub passes_completed: u64,
    pub last_pass: Option<PassReport>,
}
