use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use super::models::*;
use super::store::{Directory, LedgerStore};
use crate::error::{AppError, AppResult, LedgerError};

/// Matches entries `$2` takes part in. A NULL `$2` selects bank entries.
const PARTY_FILTER: &str = r#"
    (($2::uuid IS NULL AND (sender_is_bank OR receiver_is_bank))
        OR (NOT sender_is_bank AND sender_id = $2)
        OR (NOT receiver_is_bank AND receiver_id = $2))
"#;

const ENTRY_COLUMNS: &str = r#"
    id, seq, group_id, title, description, amount,
    sender_is_bank, sender_id, new_balance_sender, balance_difference_sender,
    receiver_is_bank, receiver_id, new_balance_receiver, balance_difference_receiver,
    payment_plan_id, plan_occurrence, created_at
"#;

/// Postgres-backed transaction log, the source of truth for balances.
pub struct LedgerRepository {
    pub pool: PgPool,
}

impl LedgerRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn balance_in(conn: &mut PgConnection, group_id: Uuid, party: Party) -> AppResult<i64> {
        let Some(user_id) = party.user_id() else {
            return Ok(0);
        };

        let balance = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT CASE WHEN NOT sender_is_bank AND sender_id = $2
                        THEN new_balance_sender
                        ELSE new_balance_receiver END
            FROM transaction_log_entries
            WHERE group_id = $1
              AND ((NOT sender_is_bank AND sender_id = $2)
                OR (NOT receiver_is_bank AND receiver_id = $2))
            ORDER BY seq DESC
            LIMIT 1
            "#,
        )
        .bind(group_id)
        .bind(user_id)
        .fetch_optional(&mut *conn)
        .await?;

        Ok(balance.unwrap_or(0))
    }

    fn map_insert_error(error: sqlx::Error, new: &NewEntry) -> AppError {
        if let (sqlx::Error::Database(db), Some(occurrence)) = (&error, new.occurrence) {
            if db.is_unique_violation() {
                return LedgerError::DuplicateOccurrence {
                    plan_id: occurrence.plan_id,
                    due_at: occurrence.due_at,
                }
                .into();
            }
        }
        error.into()
    }
}

#[async_trait]
impl LedgerStore for LedgerRepository {
    async fn get_balance(&self, group_id: Uuid, party: Party) -> AppResult<i64> {
        let mut conn = self.pool.acquire().await?;
        Self::balance_in(&mut conn, group_id, party).await
    }

    async fn create_entry(&self, new: NewEntry) -> AppResult<LedgerEntry> {
        new.validate()?;

        let mut tx = self.pool.begin().await?;

        // Serialise balance-check-then-append per group across all writers.
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(new.group_id.to_string())
            .execute(&mut *tx)
            .await?;

        let sender_prior = Self::balance_in(&mut tx, new.group_id, new.sender).await?;
        let receiver_prior = Self::balance_in(&mut tx, new.group_id, new.receiver).await?;
        new.check_cover(sender_prior)?;
        let settlement = new.settle(sender_prior, receiver_prior)?;

        let (sender_is_bank, sender_id) = new.sender.to_columns();
        let (receiver_is_bank, receiver_id) = new.receiver.to_columns();

        let row = sqlx::query(&format!(
            r#"
            INSERT INTO transaction_log_entries (
                id, group_id, title, description, amount,
                sender_is_bank, sender_id, new_balance_sender, balance_difference_sender,
                receiver_is_bank, receiver_id, new_balance_receiver, balance_difference_receiver,
                payment_plan_id, plan_occurrence
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            RETURNING {ENTRY_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(new.group_id)
        .bind(&new.title)
        .bind(&new.description)
        .bind(new.amount)
        .bind(sender_is_bank)
        .bind(sender_id)
        .bind(settlement.new_balance_sender)
        .bind(settlement.balance_difference_sender)
        .bind(receiver_is_bank)
        .bind(receiver_id)
        .bind(settlement.new_balance_receiver)
        .bind(settlement.balance_difference_receiver)
        .bind(new.occurrence.map(|o| o.plan_id))
        .bind(new.occurrence.map(|o| o.due_at))
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| Self::map_insert_error(e, &new))?;

        let entry = LedgerEntry::from_row(&row)?;
        tx.commit().await?;

        Ok(entry)
    }

    async fn get_entry_by_id(&self, group_id: Uuid, id: Uuid) -> AppResult<Option<LedgerEntry>> {
        let row = sqlx::query(&format!(
            "SELECT {ENTRY_COLUMNS} FROM transaction_log_entries WHERE group_id = $1 AND id = $2"
        ))
        .bind(group_id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(LedgerEntry::from_row).transpose()
    }

    async fn get_last_entry(&self, group_id: Uuid, party: Party) -> AppResult<Option<LedgerEntry>> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {ENTRY_COLUMNS} FROM transaction_log_entries
            WHERE group_id = $1 AND {PARTY_FILTER}
            ORDER BY seq DESC
            LIMIT 1
            "#
        ))
        .bind(group_id)
        .bind(party.user_id())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(LedgerEntry::from_row).transpose()
    }

    async fn list_entries(
        &self,
        group_id: Uuid,
        party: Party,
        page: u32,
        page_size: u32,
        oldest_first: bool,
    ) -> AppResult<Vec<LedgerEntry>> {
        let order = if oldest_first { "ASC" } else { "DESC" };

        let rows = sqlx::query(&format!(
            r#"
            SELECT {ENTRY_COLUMNS} FROM transaction_log_entries
            WHERE group_id = $1 AND {PARTY_FILTER}
            ORDER BY seq {order}
            LIMIT $3 OFFSET $4
            "#
        ))
        .bind(group_id)
        .bind(party.user_id())
        .bind(i64::from(page_size))
        .bind(i64::from(page) * i64::from(page_size))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(LedgerEntry::from_row).collect()
    }

    async fn count_entries(&self, group_id: Uuid, party: Party) -> AppResult<i64> {
        let count = sqlx::query_scalar::<_, i64>(&format!(
            "SELECT COUNT(*) FROM transaction_log_entries WHERE group_id = $1 AND {PARTY_FILTER}"
        ))
        .bind(group_id)
        .bind(party.user_id())
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    async fn find_plan_entry(
        &self,
        plan_id: Uuid,
        due_at: DateTime<Utc>,
    ) -> AppResult<Option<LedgerEntry>> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {ENTRY_COLUMNS} FROM transaction_log_entries
            WHERE payment_plan_id = $1 AND plan_occurrence = $2
            "#
        ))
        .bind(plan_id)
        .bind(due_at)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(LedgerEntry::from_row).transpose()
    }
}

#[async_trait]
impl Directory for LedgerRepository {
    async fn get_group(&self, group_id: Uuid) -> AppResult<Option<Group>> {
        let group = sqlx::query_as::<_, Group>(
            r#"
            SELECT id, name, description, created_at
            FROM groups
            WHERE id = $1
            "#,
        )
        .bind(group_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(group)
    }

    async fn get_user(&self, user_id: Uuid) -> AppResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, name, created_at
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }
}
