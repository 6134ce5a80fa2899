//! Transaction domain entities.
//! Framework-agnostic representations of terminals, payment intents and the
//! tracked in-flight transaction aggregate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use super::state::{StateMachine, TransactionState};
use crate::error::Error;

/// Connection descriptor for one physical terminal.
/// Owned by the caller, immutable, passed by reference per call.
#[derive(Debug, Clone)]
pub struct Terminal {
    pub terminal_id: String,
    pub base_url: Url,
    pub api_key: Option<String>,
}

impl Terminal {
    pub fn new(
        terminal_id: impl Into<String>,
        address: &str,
        api_key: Option<String>,
    ) -> Result<Self, Error> {
        let base_url = Url::parse(address).map_err(|e| {
            Error::Validation(format!("invalid terminal address '{}': {}", address, e))
        })?;

        Ok(Self {
            terminal_id: terminal_id.into(),
            base_url,
            api_key,
        })
    }
}

/// A sale or refund intent. Immutable once submitted.
/// Amounts are integer minor units (pence, cents).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransactionRequest {
    #[serde(rename_all = "camelCase")]
    Sale { amount: i64, currency: String },
    #[serde(rename_all = "camelCase")]
    Refund {
        amount: i64,
        currency: String,
        original_transaction_id: String,
    },
}

impl TransactionRequest {
    pub fn sale(amount: i64, currency: impl Into<String>) -> Self {
        TransactionRequest::Sale {
            amount,
            currency: currency.into(),
        }
    }

    pub fn refund(
        amount: i64,
        currency: impl Into<String>,
        original_transaction_id: impl Into<String>,
    ) -> Self {
        TransactionRequest::Refund {
            amount,
            currency: currency.into(),
            original_transaction_id: original_transaction_id.into(),
        }
    }

    pub fn amount(&self) -> i64 {
        match self {
            TransactionRequest::Sale { amount, .. } => *amount,
            TransactionRequest::Refund { amount, .. } => *amount,
        }
    }

    pub fn currency(&self) -> &str {
        match self {
            TransactionRequest::Sale { currency, .. } => currency,
            TransactionRequest::Refund { currency, .. } => currency,
        }
    }

    pub fn original_transaction_id(&self) -> Option<&str> {
        match self {
            TransactionRequest::Sale { .. } => None,
            TransactionRequest::Refund {
                original_transaction_id,
                ..
            } => Some(original_transaction_id),
        }
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.amount() <= 0 {
            return Err(Error::Validation(
                "amount must be a positive number of minor units".to_string(),
            ));
        }

        let currency = self.currency();
        if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_uppercase()) {
            return Err(Error::Validation(format!(
                "currency must be a three-letter ISO code, got '{}'",
                currency
            )));
        }

        if let TransactionRequest::Refund {
            original_transaction_id,
            ..
        } = self
        {
            if original_transaction_id.is_empty() {
                return Err(Error::Validation(
                    "refund requires the original transaction id".to_string(),
                ));
            }
        }

        Ok(())
    }
}

/// Normalized status/progress/message tuple returned by status queries and
/// attached to completion events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusInfo {
    pub status: String,
    pub progress: u8,
    pub message: String,
}

impl StatusInfo {
    /// Fixed lookup table from raw terminal status to caller-facing info.
    pub fn for_status(raw: &str) -> Self {
        let (progress, message) = match raw {
            "pending" => (10, "Transaction pending"),
            "processing" => (30, "Processing payment..."),
            "awaiting_card" => (50, "Please present your card"),
            "completed" => (100, "Payment successful"),
            "failed" => (0, "Transaction failed"),
            "cancelled" => (0, "Transaction cancelled"),
            _ => (0, "Processing..."),
        };

        Self {
            status: raw.to_string(),
            progress,
            message: message.to_string(),
        }
    }
}

/// One tracked in-flight transaction.
///
/// The state machine is owned exclusively by this aggregate; only the poller
/// and cancellation mutate it after creation.
#[derive(Debug, Clone)]
pub struct ActiveTransaction {
    pub id: String,
    pub terminal_transaction_id: String,
    pub terminal: Terminal,
    pub request: TransactionRequest,
    pub state_machine: StateMachine,
    pub started_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
}

impl ActiveTransaction {
    pub fn new(
        id: String,
        terminal_transaction_id: String,
        terminal: Terminal,
        request: TransactionRequest,
        state_machine: StateMachine,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            terminal_transaction_id,
            terminal,
            request,
            state_machine,
            started_at: now,
            last_updated_at: now,
        }
    }

    pub fn current_state(&self) -> TransactionState {
        self.state_machine.current_state()
    }
}
