use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::models::{NewPaymentPlan, PaymentPlan};
use crate::error::AppResult;
use crate::ledger::models::Party;

/// Owner of payment plan persistence. Only the execution engine mutates
/// existing plans.
#[async_trait]
pub trait PaymentPlanStore: Send + Sync {
    async fn create(&self, plan: NewPaymentPlan) -> AppResult<PaymentPlan>;

    /// Plans with `next_execute <= now`, oldest due first.
    async fn get_due(&self, now: DateTime<Utc>) -> AppResult<Vec<PaymentPlan>>;

    async fn get_by_id(&self, id: Uuid) -> AppResult<Option<PaymentPlan>>;

    /// Overwrite the mutable fields of an existing plan.
    async fn update(&self, plan: &PaymentPlan) -> AppResult<()>;

    async fn delete(&self, plan: &PaymentPlan) -> AppResult<()>;

    /// Remove every plan of a group. Returns the number removed.
    async fn delete_by_group(&self, group_id: Uuid) -> AppResult<u64>;

    /// Plans of a group, optionally only those `party` sends or receives.
    async fn list_by_group(
        &self,
        group_id: Uuid,
        party: Option<Party>,
        page: u32,
        page_size: u32,
    ) -> AppResult<Vec<PaymentPlan>>;

    async fn count_by_group(&self, group_id: Uuid, party: Option<Party>) -> AppResult<i64>;
}
