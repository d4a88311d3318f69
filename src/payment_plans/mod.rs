pub mod memory;
pub mod models;
pub mod repository;
pub mod schedule;
pub mod store;

pub use memory::MemoryPaymentPlans;
pub use models::{NewPaymentPlan, PaymentPlan, ScheduleUnit};
pub use repository::PaymentPlanRepository;
pub use schedule::advance_time;
pub use store::PaymentPlanStore;
