use thiserror::Error;

use crate::domain::state::StateError;
use crate::terminal::client::TerminalError;

/// Crate-level error taxonomy surfaced to callers of the public operations.
///
/// Polling timeouts are not represented here; they are reported through the
/// `transaction-timeout` event, never as an error value. Persistence failures
/// are swallowed and logged inside the persistence service.
#[derive(Error, Debug)]
pub enum Error {
    #[error("terminal protocol error: {0}")]
    Protocol(String),

    #[error("terminal transport error: {0}")]
    Transport(String),

    #[error("terminal rejected the request: {0}")]
    Api(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("invalid state transition: {0}")]
    State(#[from] StateError),
}

impl From<TerminalError> for Error {
    fn from(err: TerminalError) -> Self {
        match err {
            TerminalError::Protocol(field) => {
                Error::Protocol(format!("response missing required field '{}'", field))
            }
            TerminalError::Transport(e) => Error::Transport(e.to_string()),
            TerminalError::Api(message) => Error::Api(message),
            TerminalError::CircuitOpen => {
                Error::Transport("terminal circuit breaker open".to_string())
            }
        }
    }
}
