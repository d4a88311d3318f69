use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;
use uuid::Uuid;

use super::models::{Group, LedgerEntry, NewEntry, Party, User};
use super::store::{Directory, LedgerStore};
use crate::error::{AppError, AppResult, LedgerError};

type GroupLog = Arc<AsyncMutex<Vec<LedgerEntry>>>;

/// In-memory ledger. Each group's log sits behind its own async mutex, which
/// is the per-group critical section for balance reads and appends.
pub struct MemoryLedger {
    groups: RwLock<HashMap<Uuid, GroupLog>>,
    plan_entries: Mutex<HashMap<(Uuid, DateTime<Utc>), LedgerEntry>>,
    next_seq: AtomicI64,
    fail_writes: AtomicBool,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self {
            groups: RwLock::new(HashMap::new()),
            plan_entries: Mutex::new(HashMap::new()),
            next_seq: AtomicI64::new(1),
            fail_writes: AtomicBool::new(false),
        }
    }

    /// Make every subsequent `create_entry` fail with a persistence error.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// All entries of a group in append order.
    pub async fn entries(&self, group_id: Uuid) -> Vec<LedgerEntry> {
        match self.log(group_id) {
            Some(log) => log.lock().await.clone(),
            None => Vec::new(),
        }
    }

    fn log(&self, group_id: Uuid) -> Option<GroupLog> {
        self.groups.read().get(&group_id).cloned()
    }

    fn log_or_insert(&self, group_id: Uuid) -> GroupLog {
        self.groups.write().entry(group_id).or_default().clone()
    }
}

impl Default for MemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

fn latest_balance(log: &[LedgerEntry], party: Party) -> i64 {
    log.iter()
        .rev()
        .find_map(|entry| entry.balance_of(party))
        .unwrap_or(0)
}

#[async_trait]
impl LedgerStore for MemoryLedger {
    async fn get_balance(&self, group_id: Uuid, party: Party) -> AppResult<i64> {
        if party.is_bank() {
            return Ok(0);
        }
        match self.log(group_id) {
            Some(log) => Ok(latest_balance(&log.lock().await, party)),
            None => Ok(0),
        }
    }

    async fn create_entry(&self, new: NewEntry) -> AppResult<LedgerEntry> {
        new.validate()?;

        let log = self.log_or_insert(new.group_id);
        let mut log = log.lock().await;

        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(AppError::Persistence("ledger store unavailable".to_string()));
        }

        if let Some(occurrence) = new.occurrence {
            if self
                .plan_entries
                .lock()
                .contains_key(&(occurrence.plan_id, occurrence.due_at))
            {
                return Err(LedgerError::DuplicateOccurrence {
                    plan_id: occurrence.plan_id,
                    due_at: occurrence.due_at,
                }
                .into());
            }
        }

        let sender_prior = latest_balance(&log, new.sender);
        let receiver_prior = latest_balance(&log, new.receiver);
        new.check_cover(sender_prior)?;
        let settlement = new.settle(sender_prior, receiver_prior)?;

        let entry = LedgerEntry {
            id: Uuid::new_v4(),
            seq: self.next_seq.fetch_add(1, Ordering::SeqCst),
            group_id: new.group_id,
            title: new.title,
            description: new.description,
            amount: new.amount,
            sender: new.sender,
            new_balance_sender: settlement.new_balance_sender,
            balance_difference_sender: settlement.balance_difference_sender,
            receiver: new.receiver,
            new_balance_receiver: settlement.new_balance_receiver,
            balance_difference_receiver: settlement.balance_difference_receiver,
            payment_plan_id: new.occurrence.map(|o| o.plan_id),
            plan_occurrence: new.occurrence.map(|o| o.due_at),
            created_at: Utc::now(),
        };

        if let Some(occurrence) = new.occurrence {
            self.plan_entries
                .lock()
                .insert((occurrence.plan_id, occurrence.due_at), entry.clone());
        }
        log.push(entry.clone());

        Ok(entry)
    }

    async fn get_entry_by_id(&self, group_id: Uuid, id: Uuid) -> AppResult<Option<LedgerEntry>> {
        Ok(self
            .entries(group_id)
            .await
            .into_iter()
            .find(|entry| entry.id == id))
    }

    async fn get_last_entry(&self, group_id: Uuid, party: Party) -> AppResult<Option<LedgerEntry>> {
        Ok(self
            .entries(group_id)
            .await
            .into_iter()
            .rev()
            .find(|entry| entry.involves(party)))
    }

    async fn list_entries(
        &self,
        group_id: Uuid,
        party: Party,
        page: u32,
        page_size: u32,
        oldest_first: bool,
    ) -> AppResult<Vec<LedgerEntry>> {
        let mut entries: Vec<LedgerEntry> = self
            .entries(group_id)
            .await
            .into_iter()
            .filter(|entry| entry.involves(party))
            .collect();
        if !oldest_first {
            entries.reverse();
        }

        Ok(entries
            .into_iter()
            .skip(page as usize * page_size as usize)
            .take(page_size as usize)
            .collect())
    }

    async fn count_entries(&self, group_id: Uuid, party: Party) -> AppResult<i64> {
        let count = self
            .entries(group_id)
            .await
            .iter()
            .filter(|entry| entry.involves(party))
            .count();
        Ok(count as i64)
    }

    async fn find_plan_entry(
        &self,
        plan_id: Uuid,
        due_at: DateTime<Utc>,
    ) -> AppResult<Option<LedgerEntry>> {
        Ok(self.plan_entries.lock().get(&(plan_id, due_at)).cloned())
    }
}

/// In-memory groups and users.
pub struct MemoryDirectory {
    groups: tokio::sync::RwLock<HashMap<Uuid, Group>>,
    users: tokio::sync::RwLock<HashMap<Uuid, User>>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self {
            groups: tokio::sync::RwLock::new(HashMap::new()),
            users: tokio::sync::RwLock::new(HashMap::new()),
        }
    }

    pub async fn add_group(&self, name: &str) -> Group {
        let group = Group {
            id: Uuid::new_v4(),
            name: name.to_string(),
            description: String::new(),
            created_at: Utc::now(),
        };
        self.groups.write().await.insert(group.id, group.clone());
        group
    }

    pub async fn remove_group(&self, group_id: Uuid) {
        self.groups.write().await.remove(&group_id);
    }

    pub async fn add_user(&self, name: &str) -> User {
        let user = User {
            id: Uuid::new_v4(),
            name: name.to_string(),
            created_at: Utc::now(),
        };
        self.users.write().await.insert(user.id, user.clone());
        user
    }

    pub async fn remove_user(&self, user_id: Uuid) {
        self.users.write().await.remove(&user_id);
    }
}

impl Default for MemoryDirectory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Directory for MemoryDirectory {
    async fn get_group(&self, group_id: Uuid) -> AppResult<Option<Group>> {
        Ok(self.groups.read().await.get(&group_id).cloned())
    }

    async fn get_user(&self, user_id: Uuid) -> AppResult<Option<User>> {
        Ok(self.users.read().await.get(&user_id).cloned())
    }
}
