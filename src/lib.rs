pub mod api;
pub mod bootstrap;
pub mod config;
pub mod error;
pub mod execution;
pub mod ledger;
pub mod payment_plans;
pub mod scheduler;
pub mod server;
