use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::models::{NewPaymentPlan, PaymentPlan};
use super::store::PaymentPlanStore;
use crate::error::{AppResult, PlanError};
use crate::ledger::models::Party;

const PLAN_COLUMNS: &str = r#"
    id, group_id, name, description, amount, payment_count,
    next_execute, schedule, schedule_unit,
    sender_is_bank, sender_id, receiver_is_bank, receiver_id,
    created_at, updated_at
"#;

/// `$2` is the party filter flag, `$3` the party user id (NULL for the bank).
const PARTY_FILTER: &str = r#"
    (NOT $2::boolean
        OR ($3::uuid IS NULL AND (sender_is_bank OR receiver_is_bank))
        OR (NOT sender_is_bank AND sender_id = $3)
        OR (NOT receiver_is_bank AND receiver_id = $3))
"#;

pub struct PaymentPlanRepository {
    pub pool: PgPool,
}

impl PaymentPlanRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PaymentPlanStore for PaymentPlanRepository {
    async fn create(&self, plan: NewPaymentPlan) -> AppResult<PaymentPlan> {
        plan.check()?;
        let plan = plan.into_plan();
        let (sender_is_bank, sender_id) = plan.sender.to_columns();
        let (receiver_is_bank, receiver_id) = plan.receiver.to_columns();

        let row = sqlx::query(&format!(
            r#"
            INSERT INTO payment_plans (
                id, group_id, name, description, amount, payment_count,
                next_execute, schedule, schedule_unit,
                sender_is_bank, sender_id, receiver_is_bank, receiver_id
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            RETURNING {PLAN_COLUMNS}
            "#
        ))
        .bind(plan.id)
        .bind(plan.group_id)
        .bind(&plan.name)
        .bind(&plan.description)
        .bind(plan.amount)
        .bind(plan.payment_count)
        .bind(plan.next_execute)
        .bind(plan.schedule)
        .bind(&plan.schedule_unit)
        .bind(sender_is_bank)
        .bind(sender_id)
        .bind(receiver_is_bank)
        .bind(receiver_id)
        .fetch_one(&self.pool)
        .await?;

        PaymentPlan::from_row(&row)
    }

    async fn get_due(&self, now: DateTime<Utc>) -> AppResult<Vec<PaymentPlan>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {PLAN_COLUMNS} FROM payment_plans
            WHERE next_execute <= $1
            ORDER BY next_execute ASC, id ASC
            "#
        ))
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(PaymentPlan::from_row).collect()
    }

    async fn get_by_id(&self, id: Uuid) -> AppResult<Option<PaymentPlan>> {
        let row = sqlx::query(&format!("SELECT {PLAN_COLUMNS} FROM payment_plans WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(PaymentPlan::from_row).transpose()
    }

    async fn update(&self, plan: &PaymentPlan) -> AppResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE payment_plans
            SET name = $2, description = $3, amount = $4, payment_count = $5,
                next_execute = $6, schedule = $7, schedule_unit = $8,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(plan.id)
        .bind(&plan.name)
        .bind(&plan.description)
        .bind(plan.amount)
        .bind(plan.payment_count)
        .bind(plan.next_execute)
        .bind(plan.schedule)
        .bind(&plan.schedule_unit)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(PlanError::NotFound(plan.id).into());
        }

        Ok(())
    }

    async fn delete(&self, plan: &PaymentPlan) -> AppResult<()> {
        sqlx::query("DELETE FROM payment_plans WHERE id = $1")
            .bind(plan.id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn delete_by_group(&self, group_id: Uuid) -> AppResult<u64> {
        let result = sqlx::query("DELETE FROM payment_plans WHERE group_id = $1")
            .bind(group_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    async fn list_by_group(
        &self,
        group_id: Uuid,
        party: Option<Party>,
        page: u32,
        page_size: u32,
    ) -> AppResult<Vec<PaymentPlan>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {PLAN_COLUMNS} FROM payment_plans
            WHERE group_id = $1 AND {PARTY_FILTER}
            ORDER BY created_at DESC, id ASC
            LIMIT $4 OFFSET $5
            "#
        ))
        .bind(group_id)
        .bind(party.is_some())
        .bind(party.and_then(|p| p.user_id()))
        .bind(i64::from(page_size))
        .bind(i64::from(page) * i64::from(page_size))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(PaymentPlan::from_row).collect()
    }

    async fn count_by_group(&self, group_id: Uuid, party: Option<Party>) -> AppResult<i64> {
        let count = sqlx::query_scalar::<_, i64>(&format!(
            "SELECT COUNT(*) FROM payment_plans WHERE group_id = $1 AND {PARTY_FILTER}"
        ))
        .bind(group_id)
        .bind(party.is_some())
        .bind(party.and_then(|p| p.user_id()))
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }
}
