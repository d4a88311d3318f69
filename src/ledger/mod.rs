pub mod memory;
pub mod models;
pub mod repository;
pub mod store;

pub use memory::{MemoryDirectory, MemoryLedger};
pub use models::{Group, LedgerEntry, NewEntry, Party, User};
pub use repository::LedgerRepository;
pub use store::{Directory, LedgerStore};
