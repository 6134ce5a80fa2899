pub mod state;
pub mod transaction;

pub use state::{StateError, StateMachine, StateMachineSnapshot, StateRecord, TransactionState};
pub use transaction::{ActiveTransaction, StatusInfo, Terminal, TransactionRequest};
