use axum::{extract::State, Json};
use chrono::Utc;
use std::sync::Arc;

use super::models::*;
use crate::scheduler::PaymentPlanScheduler;

#[derive(Clone)]
pub struct AppState {
    pub scheduler: Arc<PaymentPlanScheduler>,
}

/// GET /health
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        timestamp: Utc::now(),
    })
}

/// GET /api/v1/status
pub async fn get_status(State(state): State<AppState>) -> Json<StatusResponse> {
    let scheduler = &state.scheduler;

    Json(StatusResponse {
        success: true,
        message: "online".to_string(),
        payment_plans: PaymentPlanStatus {
            interval_secs: scheduler.config().interval.as_secs(),
            passes_completed: scheduler.passes_completed(),
            last_pass: scheduler.last_report(),
        },
    })
}
