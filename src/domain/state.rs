//! Transaction state machine.
//! Pure in-memory tracker with transition history. Owned exclusively by one
//! active transaction; persistence and event publishing are the caller's job.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Lifecycle states of a terminal transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionState {
    Idle,
    Initiating,
    Pending,
    Processing,
    AwaitingCard,
    Completed,
    Failed,
    Cancelled,
}

impl TransactionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionState::Idle => "idle",
            TransactionState::Initiating => "initiating",
            TransactionState::Pending => "pending",
            TransactionState::Processing => "processing",
            TransactionState::AwaitingCard => "awaiting_card",
            TransactionState::Completed => "completed",
            TransactionState::Failed => "failed",
            TransactionState::Cancelled => "cancelled",
        }
    }

    /// Parses a status string as reported by the terminal control plane.
    /// `idle` and `initiating` are local-only states and never come off the
    /// wire; anything unrecognized returns `None`.
    pub fn from_wire(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(TransactionState::Pending),
            "processing" => Some(TransactionState::Processing),
            "awaiting_card" => Some(TransactionState::AwaitingCard),
            "completed" => Some(TransactionState::Completed),
            "failed" => Some(TransactionState::Failed),
            "cancelled" => Some(TransactionState::Cancelled),
            _ => None,
        }
    }

    /// Terminal states have no outgoing transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransactionState::Completed | TransactionState::Failed | TransactionState::Cancelled
        )
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum StateError {
    #[error("no transitions allowed out of terminal state {from} (attempted {to})")]
    TerminalState {
        from: TransactionState,
        to: TransactionState,
    },
}

/// One entry in the transition history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateRecord {
    pub state: TransactionState,
    pub timestamp: DateTime<Utc>,
    pub reason: String,
}

/// Serializable projection of a state machine, used for persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateMachineSnapshot {
    pub current_state: TransactionState,
    pub previous_state: Option<TransactionState>,
    pub history: Vec<StateRecord>,
}

/// Finite-state tracker for one transaction.
///
/// The history is append-only; its last record always matches the current
/// state, and a fresh machine starts in `idle` with a seeded record.
#[derive(Debug, Clone)]
pub struct StateMachine {
    current: TransactionState,
    previous: Option<TransactionState>,
    history: Vec<StateRecord>,
}

impl StateMachine {
    pub fn new() -> Self {
        Self {
            current: TransactionState::Idle,
            previous: None,
            history: vec![StateRecord {
                state: TransactionState::Idle,
                timestamp: Utc::now(),
                reason: "created".to_string(),
            }],
        }
    }

    /// Moves the machine to `next`, recording the reason. Rejected when the
    /// machine already sits in a terminal state; state and history are left
    /// untouched in that case.
    pub fn transition(
        &mut self,
        next: TransactionState,
        reason: impl Into<String>,
    ) -> Result<(), StateError> {
        if self.current.is_terminal() {
            return Err(StateError::TerminalState {
                from: self.current,
                to: next,
            });
        }

        self.previous = Some(self.current);
        self.current = next;
        self.history.push(StateRecord {
            state: next,
            timestamp: Utc::now(),
            reason: reason.into(),
        });
        Ok(())
    }

    pub fn current_state(&self) -> TransactionState {
        self.current
    }

    pub fn previous_state(&self) -> Option<TransactionState> {
        self.previous
    }

    pub fn history(&self) -> &[StateRecord] {
        &self.history
    }

    pub fn snapshot(&self) -> StateMachineSnapshot {
        StateMachineSnapshot {
            current_state: self.current,
            previous_state: self.previous,
            history: self.history.clone(),
        }
    }

    pub fn from_snapshot(snapshot: StateMachineSnapshot) -> Self {
        Self {
            current: snapshot.current_state,
            previous: snapshot.previous_state,
            history: snapshot.history,
        }
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_machine_starts_idle_with_seeded_history() {
        let machine = StateMachine::new();
        assert_eq!(machine.current_state(), TransactionState::Idle);
        assert_eq!(machine.previous_state(), None);
        assert_eq!(machine.history().len(), 1);
        assert_eq!(machine.history()[0].state, TransactionState::Idle);
    }

    #[test]
    fn test_transition_updates_current_previous_and_history() {
        let mut machine = StateMachine::new();
        machine
            .transition(TransactionState::Initiating, "initiate requested")
            .unwrap();
        machine
            .transition(TransactionState::Pending, "terminal accepted")
            .unwrap();

        assert_eq!(machine.current_state(), TransactionState::Pending);
        assert_eq!(machine.previous_state(), Some(TransactionState::Initiating));
        assert_eq!(machine.history().len(), 3);
        assert_eq!(
            machine.history().last().unwrap().state,
            machine.current_state()
        );
        assert_eq!(machine.history()[2].reason, "terminal accepted");
    }

    #[test]
    fn test_history_timestamps_are_monotonic() {
        let mut machine = StateMachine::new();
        machine
            .transition(TransactionState::Initiating, "a")
            .unwrap();
        machine.transition(TransactionState::Pending, "b").unwrap();
        machine
            .transition(TransactionState::Processing, "c")
            .unwrap();

        let history = machine.history();
        for pair in history.windows(2) {
            assert!(pair[0].timestamp <= pair[1].timestamp);
        }
    }

    #[test]
    fn test_terminal_states_reject_further_transitions() {
        for terminal in [
            TransactionState::Completed,
            TransactionState::Failed,
            TransactionState::Cancelled,
        ] {
            let mut machine = StateMachine::new();
            machine.transition(terminal, "done").unwrap();
            let history_len = machine.history().len();

            let result = machine.transition(TransactionState::Pending, "retry");
            assert_eq!(
                result,
                Err(StateError::TerminalState {
                    from: terminal,
                    to: TransactionState::Pending,
                })
            );
            assert_eq!(machine.current_state(), terminal);
            assert_eq!(machine.history().len(), history_len);
        }
    }

    #[test]
    fn test_from_wire_accepts_only_terminal_reported_statuses() {
        assert_eq!(
            TransactionState::from_wire("awaiting_card"),
            Some(TransactionState::AwaitingCard)
        );
        assert_eq!(
            TransactionState::from_wire("completed"),
            Some(TransactionState::Completed)
        );
        assert_eq!(TransactionState::from_wire("idle"), None);
        assert_eq!(TransactionState::from_wire("initiating"), None);
        assert_eq!(TransactionState::from_wire("card_on_fire"), None);
    }

    #[test]
    fn test_snapshot_roundtrip() {
        let mut machine = StateMachine::new();
        machine
            .transition(TransactionState::Initiating, "a")
            .unwrap();
        machine.transition(TransactionState::Pending, "b").unwrap();

        let restored = StateMachine::from_snapshot(machine.snapshot());
        assert_eq!(restored.current_state(), machine.current_state());
        assert_eq!(restored.previous_state(), machine.previous_state());
        assert_eq!(restored.history(), machine.history());
    }
}
