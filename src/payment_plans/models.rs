use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;
use validator::Validate;

use super::schedule::advance_time;
use crate::error::{AppError, AppResult, LedgerError, PlanError};
use crate::ledger::models::Party;

/// Calendar granularity of a payment plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleUnit {
    Day,
    Week,
    Month,
    Year,
}

impl ScheduleUnit {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduleUnit::Day => "day",
            ScheduleUnit::Week => "week",
            ScheduleUnit::Month => "month",
            ScheduleUnit::Year => "year",
        }
    }

    pub fn all() -> Vec<ScheduleUnit> {
        vec![
            ScheduleUnit::Day,
            ScheduleUnit::Week,
            ScheduleUnit::Month,
            ScheduleUnit::Year,
        ]
    }
}

impl fmt::Display for ScheduleUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScheduleUnit {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ScheduleUnit::all()
            .into_iter()
            .find(|unit| unit.as_str() == s)
            .ok_or_else(|| PlanError::UnknownScheduleUnit(s.to_string()).into())
    }
}

/// Recurring transfer definition.
///
/// `schedule_unit` keeps the stored text so a malformed row fails only when
/// that plan is executed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentPlan {
    pub id: Uuid,
    pub group_id: Uuid,
    pub name: String,
    pub description: String,
    pub amount: i64,
    /// Remaining occurrences; negative means unlimited.
    pub payment_count: i32,
    pub next_execute: DateTime<Utc>,
    pub schedule: i32,
    pub schedule_unit: String,
    pub sender: Party,
    pub receiver: Party,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PaymentPlan {
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_execute <= now
    }

    pub fn is_unlimited(&self) -> bool {
        self.payment_count < 0
    }

    pub fn schedule_unit(&self) -> AppResult<ScheduleUnit> {
        self.schedule_unit.parse()
    }

    /// Due time of the occurrence after the current one.
    pub fn following_occurrence(&self) -> AppResult<DateTime<Utc>> {
        advance_time(self.next_execute, self.schedule, &self.schedule_unit)
    }

    /// Create from database row
    pub fn from_row(row: &sqlx::postgres::PgRow) -> AppResult<Self> {
        use sqlx::Row;

        let sender = Party::from_columns(row.try_get("sender_is_bank")?, row.try_get("sender_id")?)?;
        let receiver = Party::from_columns(
            row.try_get("receiver_is_bank")?,
            row.try_get("receiver_id")?,
        )?;

        Ok(PaymentPlan {
            id: row.try_get("id")?,
            group_id: row.try_get("group_id")?,
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            amount: row.try_get("amount")?,
            payment_count: row.try_get("payment_count")?,
            next_execute: row.try_get("next_execute")?,
            schedule: row.try_get("schedule")?,
            schedule_unit: row.try_get("schedule_unit")?,
            sender,
            receiver,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

/// Input for `PaymentPlanStore::create`.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct NewPaymentPlan {
    pub group_id: Uuid,
    #[validate(length(min = 1, max = 100))]
    pub name: String,
    #[validate(length(max = 1000))]
    #[serde(default)]
    pub description: String,
    #[validate(range(min = 1))]
    pub amount: i64,
    #[validate(range(min = 1))]
    pub schedule: i32,
    pub schedule_unit: ScheduleUnit,
    /// Total occurrences; negative for unlimited.
    pub payment_count: i32,
    pub first_payment: DateTime<Utc>,
    pub sender: Party,
    pub receiver: Party,
}

impl NewPaymentPlan {
    pub fn check(&self) -> AppResult<()> {
        self.validate()?;
        if self.payment_count == 0 {
            return Err(PlanError::InvalidPaymentCount.into());
        }
        if self.sender == self.receiver {
            return Err(LedgerError::SelfTransfer.into());
        }
        Ok(())
    }

    pub fn into_plan(self) -> PaymentPlan {
        let now = Utc::now();
        PaymentPlan {
            id: Uuid::new_v4(),
            group_id: self.group_id,
            name: self.name,
            description: self.description,
            amount: self.amount,
            payment_count: self.payment_count,
            next_execute: self.first_payment,
            schedule: self.schedule,
            schedule_unit: self.schedule_unit.to_string(),
            sender: self.sender,
            receiver: self.receiver,
            created_at: now,
            updated_at: now,
        }
    }
}
