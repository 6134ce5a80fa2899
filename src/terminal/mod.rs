pub mod client;

pub use client::{CancelResponse, InitiateAck, StatusResponse, TerminalClient, TerminalError};
