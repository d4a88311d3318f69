// Payment plan scheduler - drives the execution engine
//
// - One pass right at startup, then one per interval (hourly by default)
// - Passes never overlap; plans inside a pass run one after another
// - A failing plan is logged and the pass moves on to the next one
// - Stopping lets the running pass finish, then the task exits

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::execution::engine::{ExecutionOutcome, PaymentPlanExecutor};
use crate::payment_plans::store::PaymentPlanStore;

/// Shortest interval the scheduler accepts.
pub const MIN_INTERVAL: Duration = Duration::from_secs(1);

/// Scheduler configuration
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Time between the start of two passes
    pub interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3600),
        }
    }
}

/// Summary of one pass over the due plans
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PassReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub due: usize,
    pub caught_up: usize,
    pub stalled: usize,
    pub exhausted: usize,
    pub vanished: usize,
    pub failed: usize,
}

impl PassReport {
    fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            finished_at: started_at,
            due: 0,
            caught_up: 0,
            stalled: 0,
            exhausted: 0,
            vanished: 0,
            failed: 0,
        }
    }

    fn record(&mut self, outcome: ExecutionOutcome) {
        match outcome {
            // Became current between the due query and execution
            ExecutionOutcome::NotDue | ExecutionOutcome::CaughtUp => self.caught_up += 1,
            ExecutionOutcome::Stalled => self.stalled += 1,
            ExecutionOutcome::Exhausted => self.exhausted += 1,
            ExecutionOutcome::GroupVanished => self.vanished += 1,
        }
    }
}

/// Periodically feeds due payment plans to the executor
pub struct PaymentPlanScheduler {
    config: SchedulerConfig,
    executor: Arc<PaymentPlanExecutor>,
    plans: Arc<dyn PaymentPlanStore>,
    last_report: RwLock<Option<PassReport>>,
    passes: AtomicU64,
}

impl PaymentPlanScheduler {
    /// Intervals below [`MIN_INTERVAL`] are raised to it.
    pub fn new(
        mut config: SchedulerConfig,
        executor: Arc<PaymentPlanExecutor>,
        plans: Arc<dyn PaymentPlanStore>,
    ) -> Self {
        if config.interval < MIN_INTERVAL {
            warn!(
                "⚠️ Payment plan interval {:?} too short, using {:?}",
                config.interval, MIN_INTERVAL
            );
            config.interval = MIN_INTERVAL;
        }

        Self {
            config,
            executor,
            plans,
            last_report: RwLock::new(None),
            passes: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn last_report(&self) -> Option<PassReport> {
        self.last_report.read().clone()
    }

    pub fn passes_completed(&self) -> u64 {
        self.passes.load(Ordering::SeqCst)
    }

    /// Execute every plan that is due right now, one at a time.
    pub async fn run_pass(&self) -> PassReport {
        let mut report = PassReport::new(Utc::now());
        info!("🔄 Starting payment plan pass");

        match self.plans.get_due(report.started_at).await {
            Ok(due) => {
                report.due = due.len();
                info!("📊 Executing {} payment plans", due.len());

                for plan in due {
                    let (plan_id, group_id) = (plan.id, plan.group_id);
                    match self.executor.execute(plan).await {
                        Ok(result) => report.record(result.outcome),
                        Err(e) => {
                            report.failed += 1;
                            error!(
                                %plan_id,
                                %group_id,
                                persistence = e.is_persistence(),
                                "❌ Couldn't execute payment plan {}: {}",
                                plan_id,
                                e
                            );
                        }
                    }
                }
            }
            Err(e) => {
                report.failed += 1;
                error!("❌ Couldn't retrieve due payment plans: {}", e);
            }
        }

        report.finished_at = Utc::now();
        info!(
            "✓ Payment plan pass completed: {} due, {} current, {} stalled, {} finished, {} failed",
            report.due,
            report.caught_up,
            report.stalled,
            report.exhausted + report.vanished,
            report.failed
        );

        *self.last_report.write() = Some(report.clone());
        self.passes.fetch_add(1, Ordering::SeqCst);
        report
    }

    /// Start the scheduler (runs in background)
    pub fn start(self: Arc<Self>) -> SchedulerHandle {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let scheduler = self.clone();

        let task = tokio::spawn(async move {
            info!(
                "⏰ Payment plan scheduler started, running every {}s",
                scheduler.config.interval.as_secs()
            );

            let mut ticker = interval(scheduler.config.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                scheduler.run_pass().await;

                tokio::select! {
                    biased;
                    // Also fires when the handle is dropped
                    _ = stop_rx.changed() => break,
                    _ = ticker.tick() => {}
                }
            }

            info!("🛑 Payment plan scheduler stopped");
        });

        SchedulerHandle {
            stop_tx,
            task,
            scheduler: self,
        }
    }
}

/// Owns the scheduler task and its stop signal.
pub struct SchedulerHandle {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
    scheduler: Arc<PaymentPlanScheduler>,
}

impl SchedulerHandle {
    pub fn scheduler(&self) -> &Arc<PaymentPlanScheduler> {
        &self.scheduler
    }

    pub fn last_report(&self) -> Option<PassReport> {
        self.scheduler.last_report()
    }

    /// Request a stop and wait for the running pass to drain.
    pub async fn stop(self) {
        info!("Stopping payment plan scheduler...");
        // Err only when the task already exited
        let _ = self.stop_tx.send(true);

        if let Err(e) = self.task.await {
            error!("❌ Payment plan scheduler task failed: {:?}", e);
        }
    }
}
