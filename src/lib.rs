//! Asynchronous card-terminal transaction tracking.
//!
//! A transaction is opened over the terminal's local HTTP control plane, the
//! card interaction happens out-of-band on the device, and completion is
//! discovered by polling. This crate tracks each in-flight transaction
//! through a state machine, polls without blocking the host, publishes
//! status/completion/timeout events, and keeps durable snapshots in a
//! host-provided settings store so a restart does not silently lose what was
//! in flight.

pub mod adapters;
pub mod config;
pub mod domain;
pub mod error;
pub mod events;
pub mod ports;
pub mod services;
pub mod terminal;

pub use config::Config;
pub use domain::{
    ActiveTransaction, StateMachine, StatusInfo, Terminal, TransactionRequest, TransactionState,
};
pub use error::Error;
pub use events::{EventBus, TransactionEvent};
pub use ports::SettingsStore;
pub use services::{InitiatedTransaction, TransactionManager};
