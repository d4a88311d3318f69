// Payment plan execution
//
// One plan at a time, replaying every missed occurrence up to `now`:
// 1. Group gone -> delete the plan
// 2. Resolve sender/receiver users (the bank always resolves)
// 3. Sender must cover the amount, otherwise stall until funded
// 4. Append the ledger entry tagged with the plan occurrence
// 5. Advance next_execute, count down, update or delete the plan
//
// Each iteration leaves the plan consistent on its own, so an interrupted
// catch-up resumes where it stopped.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{AppError, AppResult, LedgerError, PlanError};
use crate::ledger::models::{NewEntry, Party};
use crate::ledger::store::{Directory, LedgerStore};
use crate::payment_plans::models::PaymentPlan;
use crate::payment_plans::store::PaymentPlanStore;

/// Why a plan's catch-up loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionOutcome {
    /// `next_execute` lies in the future.
    NotDue,
    /// Every due occurrence was applied; the plan is current.
    CaughtUp,
    /// The sender cannot cover the next occurrence. The plan stays due.
    Stalled,
    /// The last occurrence was applied and the plan deleted.
    Exhausted,
    /// The plan's group no longer exists; the plan was deleted.
    GroupVanished,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecutionReport {
    pub plan_id: Uuid,
    /// Occurrences applied during this call.
    pub occurrences: u32,
    pub outcome: ExecutionOutcome,
}

/// Replays due payment plans into the ledger.
///
/// Never writes storage directly; all effects go through the ledger and
/// payment plan stores.
pub struct PaymentPlanExecutor {
    ledger: Arc<dyn LedgerStore>,
    plans: Arc<dyn PaymentPlanStore>,
    directory: Arc<dyn Directory>,
}

impl PaymentPlanExecutor {
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        plans: Arc<dyn PaymentPlanStore>,
        directory: Arc<dyn Directory>,
    ) -> Self {
        Self {
            ledger,
            plans,
            directory,
        }
    }

    pub async fn execute(&self, plan: PaymentPlan) -> AppResult<ExecutionReport> {
        self.execute_at(plan, Utc::now()).await
    }

    /// Apply every occurrence of `plan` due at or before `now`.
    pub async fn execute_at(
        &self,
        mut plan: PaymentPlan,
        now: DateTime<Utc>,
    ) -> AppResult<ExecutionReport> {
        let plan_id = plan.id;
        let report = move |occurrences: u32, outcome: ExecutionOutcome| ExecutionReport {
            plan_id,
            occurrences,
            outcome,
        };
        let mut occurrences = 0;

        if !plan.is_due(now) {
            return Ok(report(0, ExecutionOutcome::NotDue));
        }

        while plan.is_due(now) {
            if self.directory.get_group(plan.group_id).await?.is_none() {
                info!(
                    "🗑️ Group {} of payment plan {} no longer exists, deleting plan",
                    plan.group_id, plan.id
                );
                self.plans.delete(&plan).await?;
                return Ok(report(occurrences, ExecutionOutcome::GroupVanished));
            }

            self.resolve_party(&plan, plan.sender).await?;
            self.resolve_party(&plan, plan.receiver).await?;

            // Fails before any write on a bad schedule
            let following = plan.following_occurrence()?;
            let due_at = plan.next_execute;

            if self.ledger.find_plan_entry(plan.id, due_at).await?.is_some() {
                warn!(
                    "⚠️ Payment plan {} occurrence {} already in ledger, advancing",
                    plan.id, due_at
                );
            } else if !self.apply_occurrence(&plan, due_at).await? {
                info!(
                    "⏸️ Payment plan {} stalled at {}: insufficient balance for {}",
                    plan.id, due_at, plan.amount
                );
                return Ok(report(occurrences, ExecutionOutcome::Stalled));
            }
            occurrences += 1;

            plan.next_execute = following;
            if !plan.is_unlimited() {
                plan.payment_count -= 1;
                if plan.payment_count <= 0 {
                    info!("✓ Payment plan {} completed its last payment", plan.id);
                    self.plans.delete(&plan).await?;
                    return Ok(report(occurrences, ExecutionOutcome::Exhausted));
                }
            }

            self.plans.update(&plan).await?;
        }

        info!(
            "✓ Payment plan {} caught up ({} occurrences), next at {}",
            plan.id, occurrences, plan.next_execute
        );
        Ok(report(occurrences, ExecutionOutcome::CaughtUp))
    }

    /// Returns `false` when the sender cannot cover the amount.
    async fn apply_occurrence(&self, plan: &PaymentPlan, due_at: DateTime<Utc>) -> AppResult<bool> {
        if !plan.sender.is_bank() {
            let balance = self.ledger.get_balance(plan.group_id, plan.sender).await?;
            if balance < plan.amount {
                return Ok(false);
            }
        }

        let entry = NewEntry::transfer(
            plan.group_id,
            plan.sender,
            plan.receiver,
            plan.name.clone(),
            plan.amount,
        )
        .with_description(plan.description.clone())
        .from_plan(plan.id, due_at)
        .require_cover(!plan.sender.is_bank());

        match self.ledger.create_entry(entry).await {
            Ok(entry) => {
                debug!(
                    "💸 Payment plan {} transferred {} ({} -> {})",
                    plan.id, entry.amount, entry.sender, entry.receiver
                );
                Ok(true)
            }
            // Lost a race with another writer in the same group
            Err(AppError::Ledger(LedgerError::InsufficientBalance { .. })) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn resolve_party(&self, plan: &PaymentPlan, party: Party) -> AppResult<()> {
        let Some(user_id) = party.user_id() else {
            return Ok(());
        };

        match self.directory.get_user(user_id).await? {
            Some(_) => Ok(()),
            None => Err(PlanError::PartyNotFound {
                plan_id: plan.id,
                user_id,
            }
            .into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::memory::{MemoryDirectory, MemoryLedger};
    use crate::ledger::models::LedgerEntry;
    use async_trait::async_trait;
    use crate::payment_plans::memory::MemoryPaymentPlans;
    use crate::payment_plans::models::{NewPaymentPlan, ScheduleUnit};
    use chrono::{Duration, TimeZone};

    struct Fixture {
        ledger: Arc<MemoryLedger>,
        plans: Arc<MemoryPaymentPlans>,
        directory: Arc<MemoryDirectory>,
        executor: PaymentPlanExecutor,
        group: Uuid,
        alice: Party,
        bob: Party,
    }

    impl Fixture {
        async fn new() -> Self {
            let ledger = Arc::new(MemoryLedger::new());
            let plans = Arc::new(MemoryPaymentPlans::new());
            let directory = Arc::new(MemoryDirectory::new());
            let executor = PaymentPlanExecutor::new(ledger.clone(), plans.clone(), directory.clone());

            let group = directory.add_group("flat share").await.id;
            let alice = Party::User(directory.add_user("alice").await.id);
            let bob = Party::User(directory.add_user("bob").await.id);

            Self {
                ledger,
                plans,
                directory,
                executor,
                group,
                alice,
                bob,
            }
        }

        async fn fund(&self, party: Party, amount: i64) {
            self.ledger
                .create_entry(NewEntry::transfer(self.group, Party::Bank, party, "seed", amount))
                .await
                .unwrap();
        }

        async fn plan(
            &self,
            sender: Party,
            receiver: Party,
            amount: i64,
            payment_count: i32,
            first_payment: DateTime<Utc>,
        ) -> PaymentPlan {
            self.plans
                .create(NewPaymentPlan {
                    group_id: self.group,
                    name: "Allowance".to_string(),
                    description: "weekly allowance".to_string(),
                    amount,
                    schedule: 1,
                    schedule_unit: ScheduleUnit::Day,
                    payment_count,
                    first_payment,
                    sender,
                    receiver,
                })
                .await
                .unwrap()
        }

        async fn balance(&self, party: Party) -> i64 {
            self.ledger.get_balance(self.group, party).await.unwrap()
        }

        async fn plan_entries(&self) -> usize {
            self.ledger
                .entries(self.group)
                .await
                .iter()
                .filter(|e| e.payment_plan_id.is_some())
                .count()
        }
    }

    /// Ledger where another writer drains the sender right before each
    /// plan entry is appended, after the executor's balance read.
    struct RacingLedger {
        inner: Arc<MemoryLedger>,
        rival: Party,
    }

    #[async_trait]
    impl LedgerStore for RacingLedger {
        async fn get_balance(&self, group_id: Uuid, party: Party) -> AppResult<i64> {
            self.inner.get_balance(group_id, party).await
        }

        async fn create_entry(&self, entry: NewEntry) -> AppResult<LedgerEntry> {
            if entry.occurrence.is_some() {
                let available = self.inner.get_balance(entry.group_id, entry.sender).await?;
                self.inner
                    .create_entry(NewEntry::transfer(
                        entry.group_id,
                        entry.sender,
                        self.rival,
                        "groceries",
                        available,
                    ))
                    .await?;
            }
            self.inner.create_entry(entry).await
        }

        async fn get_entry_by_id(
            &self,
            group_id: Uuid,
            id: Uuid,
        ) -> AppResult<Option<LedgerEntry>> {
            self.inner.get_entry_by_id(group_id, id).await
        }

        async fn get_last_entry(
            &self,
            group_id: Uuid,
            party: Party,
        ) -> AppResult<Option<LedgerEntry>> {
            self.inner.get_last_entry(group_id, party).await
        }

        async fn list_entries(
            &self,
            group_id: Uuid,
            party: Party,
            page: u32,
            page_size: u32,
            oldest_first: bool,
        ) -> AppResult<Vec<LedgerEntry>> {
            self.inner
                .list_entries(group_id, party, page, page_size, oldest_first)
                .await
        }

        async fn count_entries(&self, group_id: Uuid, party: Party) -> AppResult<i64> {
            self.inner.count_entries(group_id, party).await
        }

        async fn find_plan_entry(
            &self,
            plan_id: Uuid,
            due_at: DateTime<Utc>,
        ) -> AppResult<Option<LedgerEntry>> {
            self.inner.find_plan_entry(plan_id, due_at).await
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_not_due_is_a_no_op() {
        let f = Fixture::new().await;
        let plan = f.plan(Party::Bank, f.alice, 100, -1, now() + Duration::minutes(1)).await;

        let report = f.executor.execute_at(plan.clone(), now()).await.unwrap();

        assert_eq!(report.outcome, ExecutionOutcome::NotDue);
        assert_eq!(report.occurrences, 0);
        assert_eq!(f.plan_entries().await, 0);
        assert_eq!(f.plans.get_by_id(plan.id).await.unwrap(), Some(plan));
    }

    #[tokio::test]
    async fn test_catches_up_missed_occurrences() {
        let f = Fixture::new().await;
        let start = now() - Duration::days(2) - Duration::hours(1);
        let plan = f.plan(Party::Bank, f.alice, 100, -1, start).await;

        let report = f.executor.execute_at(plan.clone(), now()).await.unwrap();

        assert_eq!(report.outcome, ExecutionOutcome::CaughtUp);
        assert_eq!(report.occurrences, 3);
        assert_eq!(f.plan_entries().await, 3);
        assert_eq!(f.balance(f.alice).await, 300);

        let stored = f.plans.get_by_id(plan.id).await.unwrap().unwrap();
        assert_eq!(stored.next_execute, start + Duration::days(3));
        assert_eq!(stored.payment_count, -1);

        // Occurrences are recorded in chronological order
        let occurrences: Vec<_> = f
            .ledger
            .entries(f.group)
            .await
            .iter()
            .filter_map(|e| e.plan_occurrence)
            .collect();
        assert_eq!(
            occurrences,
            vec![start, start + Duration::days(1), start + Duration::days(2)]
        );
    }

    #[tokio::test]
    async fn test_due_exactly_now_executes() {
        let f = Fixture::new().await;
        let plan = f.plan(Party::Bank, f.alice, 100, -1, now()).await;

        let report = f.executor.execute_at(plan, now()).await.unwrap();

        assert_eq!(report.occurrences, 1);
        assert_eq!(f.balance(f.alice).await, 100);
    }

    #[tokio::test]
    async fn test_insufficient_funds_stalls_without_changes() {
        let f = Fixture::new().await;
        f.fund(f.alice, 50).await;
        let plan = f.plan(f.alice, f.bob, 100, 5, now() - Duration::hours(1)).await;

        let report = f.executor.execute_at(plan.clone(), now()).await.unwrap();

        assert_eq!(report.outcome, ExecutionOutcome::Stalled);
        assert_eq!(report.occurrences, 0);
        assert_eq!(f.plan_entries().await, 0);
        assert_eq!(f.balance(f.alice).await, 50);
        assert_eq!(f.balance(f.bob).await, 0);

        let stored = f.plans.get_by_id(plan.id).await.unwrap().unwrap();
        assert_eq!(stored.next_execute, plan.next_execute);
        assert_eq!(stored.payment_count, 5);
    }

    #[tokio::test]
    async fn test_stalls_part_way_through_catch_up() {
        let f = Fixture::new().await;
        f.fund(f.alice, 250).await;
        let start = now() - Duration::days(3);
        let plan = f.plan(f.alice, f.bob, 100, 10, start).await;

        let report = f.executor.execute_at(plan.clone(), now()).await.unwrap();

        assert_eq!(report.outcome, ExecutionOutcome::Stalled);
        assert_eq!(report.occurrences, 2);
        assert_eq!(f.balance(f.alice).await, 50);
        assert_eq!(f.balance(f.bob).await, 200);

        let stored = f.plans.get_by_id(plan.id).await.unwrap().unwrap();
        assert_eq!(stored.next_execute, start + Duration::days(2));
        assert_eq!(stored.payment_count, 8);

        // Funded later, the plan resumes from the stalled occurrence
        f.fund(f.alice, 1000).await;
        let report = f.executor.execute_at(stored, now()).await.unwrap();
        assert_eq!(report.outcome, ExecutionOutcome::CaughtUp);
        assert_eq!(report.occurrences, 2);
        assert_eq!(f.balance(f.bob).await, 400);
    }

    #[tokio::test]
    async fn test_last_payment_deletes_plan() {
        let f = Fixture::new().await;
        f.fund(f.alice, 200).await;
        let plan = f
            .plan(f.alice, f.bob, 100, 1, now() - Duration::days(5))
            .await;

        let report = f.executor.execute_at(plan.clone(), now()).await.unwrap();

        assert_eq!(report.outcome, ExecutionOutcome::Exhausted);
        assert_eq!(report.occurrences, 1);
        assert_eq!(f.plan_entries().await, 1);
        assert_eq!(f.balance(f.alice).await, 100);
        assert!(f.plans.get_by_id(plan.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_bank_sender_credits_receiver_only() {
        let f = Fixture::new().await;
        f.fund(f.bob, 10).await;
        let plan = f.plan(Party::Bank, f.bob, 500, -1, now()).await;

        f.executor.execute_at(plan, now()).await.unwrap();

        assert_eq!(f.balance(f.bob).await, 510);
        assert_eq!(f.balance(f.alice).await, 0);

        let entry = f.ledger.get_last_entry(f.group, f.bob).await.unwrap().unwrap();
        assert_eq!(entry.sender, Party::Bank);
        assert_eq!(entry.balance_difference_sender, 0);
        assert_eq!(entry.balance_difference_receiver, 500);
        assert_eq!(entry.title, "Allowance");
        assert_eq!(entry.description, "weekly allowance");
    }

    #[tokio::test]
    async fn test_bank_receiver_debits_sender() {
        let f = Fixture::new().await;
        f.fund(f.alice, 300).await;
        let plan = f.plan(f.alice, Party::Bank, 120, -1, now()).await;

        let report = f.executor.execute_at(plan, now()).await.unwrap();

        assert_eq!(report.outcome, ExecutionOutcome::CaughtUp);
        assert_eq!(f.balance(f.alice).await, 180);
    }

    #[tokio::test]
    async fn test_vanished_group_deletes_plan() {
        let f = Fixture::new().await;
        let plan = f.plan(Party::Bank, f.alice, 100, -1, now() - Duration::days(1)).await;
        f.directory.remove_group(f.group).await;

        let report = f.executor.execute_at(plan.clone(), now()).await.unwrap();

        assert_eq!(report.outcome, ExecutionOutcome::GroupVanished);
        assert_eq!(f.plan_entries().await, 0);
        assert!(f.plans.get_by_id(plan.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_missing_user_aborts_without_changes() {
        let f = Fixture::new().await;
        let plan = f.plan(Party::Bank, f.alice, 100, -1, now()).await;
        f.directory.remove_user(f.alice.user_id().unwrap()).await;

        let result = f.executor.execute_at(plan.clone(), now()).await;

        assert!(matches!(
            result,
            Err(AppError::Plan(PlanError::PartyNotFound { .. }))
        ));
        assert_eq!(f.plan_entries().await, 0);
        assert_eq!(f.plans.get_by_id(plan.id).await.unwrap(), Some(plan));
    }

    #[tokio::test]
    async fn test_unknown_schedule_unit_fails_loudly() {
        let f = Fixture::new().await;
        let mut plan = f.plan(Party::Bank, f.alice, 100, -1, now() - Duration::days(1)).await;
        plan.schedule_unit = "fortnight".to_string();
        let plan = f.plans.insert(plan).await;

        let result = f.executor.execute_at(plan.clone(), now()).await;

        assert!(matches!(
            result,
            Err(AppError::Plan(PlanError::UnknownScheduleUnit(_)))
        ));
        assert_eq!(f.plan_entries().await, 0);
        assert_eq!(f.plans.get_by_id(plan.id).await.unwrap(), Some(plan));
    }

    #[tokio::test]
    async fn test_ledger_failure_leaves_plan_untouched() {
        let f = Fixture::new().await;
        let plan = f.plan(Party::Bank, f.alice, 100, 3, now()).await;
        f.ledger.set_fail_writes(true);

        let result = f.executor.execute_at(plan.clone(), now()).await;

        assert!(result.unwrap_err().is_persistence());
        assert_eq!(f.plans.get_by_id(plan.id).await.unwrap(), Some(plan));
    }

    #[tokio::test]
    async fn test_interrupted_iteration_resumes_without_duplicate() {
        let f = Fixture::new().await;
        let start = now() - Duration::days(1);
        let plan = f.plan(Party::Bank, f.alice, 100, -1, start).await;

        // Entry lands, plan update fails
        f.plans.set_fail_writes(true);
        let result = f.executor.execute_at(plan.clone(), now()).await;
        assert!(result.unwrap_err().is_persistence());
        assert_eq!(f.plan_entries().await, 1);

        let stored = f.plans.get_by_id(plan.id).await.unwrap().unwrap();
        assert_eq!(stored.next_execute, start);

        f.plans.set_fail_writes(false);
        let report = f.executor.execute_at(stored, now()).await.unwrap();

        assert_eq!(report.outcome, ExecutionOutcome::CaughtUp);
        assert_eq!(report.occurrences, 2);
        assert_eq!(f.plan_entries().await, 2);
        assert_eq!(f.balance(f.alice).await, 200);
    }

    #[tokio::test]
    async fn test_lost_race_for_balance_stalls_without_changes() {
        let f = Fixture::new().await;
        f.fund(f.alice, 500).await;
        let plan = f.plan(f.alice, f.bob, 100, 5, now() - Duration::hours(1)).await;

        let executor = PaymentPlanExecutor::new(
            Arc::new(RacingLedger {
                inner: f.ledger.clone(),
                rival: f.bob,
            }),
            f.plans.clone(),
            f.directory.clone(),
        );
        let report = executor.execute_at(plan.clone(), now()).await.unwrap();

        assert_eq!(report.outcome, ExecutionOutcome::Stalled);
        assert_eq!(report.occurrences, 0);
        assert_eq!(f.plan_entries().await, 0);
        // Only the competing transfer landed
        assert_eq!(f.balance(f.alice).await, 0);
        assert_eq!(f.balance(f.bob).await, 500);
        assert_eq!(f.plans.get_by_id(plan.id).await.unwrap(), Some(plan));
    }
}
