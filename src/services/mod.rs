pub mod manager;
pub mod persistence;
pub mod poller;

pub use manager::{InitiatedTransaction, TransactionManager};
pub use persistence::{PersistedTransactionState, StatePersistence, StateStats};
pub use poller::TransactionPoller;
