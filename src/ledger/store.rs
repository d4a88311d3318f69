use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::models::{Group, LedgerEntry, NewEntry, Party, User};
use crate::error::AppResult;

/// Append-only transaction log of a group.
///
/// A user's balance is the balance recorded on the latest entry (by append
/// order) in which the user takes part. The bank always reports 0.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn get_balance(&self, group_id: Uuid, party: Party) -> AppResult<i64>;

    /// Append one entry. Prior balances are read and the entry written inside
    /// one per-group critical section, so concurrent writers to the same group
    /// never derive from a stale balance.
    async fn create_entry(&self, entry: NewEntry) -> AppResult<LedgerEntry>;

    async fn get_entry_by_id(&self, group_id: Uuid, id: Uuid) -> AppResult<Option<LedgerEntry>>;

    async fn get_last_entry(&self, group_id: Uuid, party: Party) -> AppResult<Option<LedgerEntry>>;

    /// One page of the log as seen by `party` (pages start at 0).
    async fn list_entries(
        &self,
        group_id: Uuid,
        party: Party,
        page: u32,
        page_size: u32,
        oldest_first: bool,
    ) -> AppResult<Vec<LedgerEntry>>;

    async fn count_entries(&self, group_id: Uuid, party: Party) -> AppResult<i64>;

    /// Entry already materialised for a plan occurrence, if any.
    async fn find_plan_entry(
        &self,
        plan_id: Uuid,
        due_at: DateTime<Utc>,
    ) -> AppResult<Option<LedgerEntry>>;
}

/// Group and user lookups owned by the surrounding application.
/// "Not found" is `Ok(None)`.
#[async_trait]
pub trait Directory: Send + Sync {
    async fn get_group(&self, group_id: Uuid) -> AppResult<Option<Group>>;

    async fn get_user(&self, user_id: Uuid) -> AppResult<Option<User>>;
}
