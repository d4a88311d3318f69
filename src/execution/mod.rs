pub mod engine;

pub use engine::{ExecutionOutcome, ExecutionReport, PaymentPlanExecutor};
