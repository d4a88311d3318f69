use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::models::{NewPaymentPlan, PaymentPlan};
use super::store::PaymentPlanStore;
use crate::error::{AppError, AppResult, PlanError};
use crate::ledger::models::Party;

pub struct MemoryPaymentPlans {
    plans: RwLock<HashMap<Uuid, PaymentPlan>>,
    fail_writes: AtomicBool,
}

impl MemoryPaymentPlans {
    pub fn new() -> Self {
        Self {
            plans: RwLock::new(HashMap::new()),
            fail_writes: AtomicBool::new(false),
        }
    }

    /// Store a plan as-is, bypassing validation.
    pub async fn insert(&self, plan: PaymentPlan) -> PaymentPlan {
        self.plans.write().await.insert(plan.id, plan.clone());
        plan
    }

    /// Make every subsequent write (create, update, delete, delete_by_group)
    /// fail with a persistence error.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_writable(&self) -> AppResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(AppError::Persistence(
                "payment plan store unavailable".to_string(),
            ));
        }
        Ok(())
    }

    async fn group_plans(&self, group_id: Uuid, party: Option<Party>) -> Vec<PaymentPlan> {
        let plans = self.plans.read().await;
        let mut matching: Vec<PaymentPlan> = plans
            .values()
            .filter(|p| p.group_id == group_id)
            .filter(|p| party.map_or(true, |party| p.sender == party || p.receiver == party))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        matching
    }
}

impl Default for MemoryPaymentPlans {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PaymentPlanStore for MemoryPaymentPlans {
    async fn create(&self, plan: NewPaymentPlan) -> AppResult<PaymentPlan> {
        plan.check()?;
        self.check_writable()?;
        Ok(self.insert(plan.into_plan()).await)
    }

    async fn get_due(&self, now: DateTime<Utc>) -> AppResult<Vec<PaymentPlan>> {
        let plans = self.plans.read().await;
        let mut due: Vec<PaymentPlan> = plans.values().filter(|p| p.is_due(now)).cloned().collect();
        due.sort_by(|a, b| a.next_execute.cmp(&b.next_execute).then(a.id.cmp(&b.id)));
        Ok(due)
    }

    async fn get_by_id(&self, id: Uuid) -> AppResult<Option<PaymentPlan>> {
        Ok(self.plans.read().await.get(&id).cloned())
    }

    async fn update(&self, plan: &PaymentPlan) -> AppResult<()> {
        self.check_writable()?;
        let mut plans = self.plans.write().await;
        let stored = plans
            .get_mut(&plan.id)
            .ok_or(PlanError::NotFound(plan.id))?;
        *stored = PaymentPlan {
            updated_at: Utc::now(),
            ..plan.clone()
        };
        Ok(())
    }

    async fn delete(&self, plan: &PaymentPlan) -> AppResult<()> {
        self.check_writable()?;
        self.plans.write().await.remove(&plan.id);
        Ok(())
    }

    async fn delete_by_group(&self, group_id: Uuid) -> AppResult<u64> {
        self.check_writable()?;
        let mut plans = self.plans.write().await;
        let before = plans.len();
        plans.retain(|_, p| p.group_id != group_id);
        Ok((before - plans.len()) as u64)
    }

    async fn list_by_group(
        &self,
        group_id: Uuid,
        party: Option<Party>,
        page: u32,
        page_size: u32,
    ) -> AppResult<Vec<PaymentPlan>> {
        Ok(self
            .group_plans(group_id, party)
            .await
            .into_iter()
            .skip(page as usize * page_size as usize)
            .take(page_size as usize)
            .collect())
    }

    async fn count_by_group(&self, group_id: Uuid, party: Option<Party>) -> AppResult<i64> {
        Ok(self.group_plans(group_id, party).await.len() as i64)
    }
}
