//! Events published to subscribers (the presentation layer).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Events emitted while a tracked transaction progresses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum TransactionEvent {
    /// The terminal reported a status different from the last observed one.
    #[serde(rename = "transaction-status-update", rename_all = "camelCase")]
    StatusUpdate {
        transaction_id: String,
        status: String,
        timestamp: DateTime<Utc>,
    },

    /// The transaction reached a terminal status; polling has stopped.
    #[serde(rename = "transaction-complete", rename_all = "camelCase")]
    Complete {
        transaction_id: String,
        status: String,
        data: serde_json::Value,
    },

    /// The polling budget ran out before a terminal status was seen. The
    /// transaction is not marked failed; that decision belongs to the
    /// subscriber. `elapsed_time` is wall-clock milliseconds.
    #[serde(rename = "transaction-timeout", rename_all = "camelCase")]
    Timeout {
        transaction_id: String,
        elapsed_time: u64,
    },
}

impl TransactionEvent {
    pub fn transaction_id(&self) -> &str {
        match self {
            TransactionEvent::StatusUpdate { transaction_id, .. } => transaction_id,
            TransactionEvent::Complete { transaction_id, .. } => transaction_id,
            TransactionEvent::Timeout { transaction_id, .. } => transaction_id,
        }
    }
}

/// Broadcast fan-out for transaction events.
///
/// Slow subscribers miss events rather than blocking publishers, the same
/// backpressure model as any broadcast channel.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<TransactionEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TransactionEvent> {
        self.tx.subscribe()
    }

    /// Publishing with no subscribers is not an error.
    pub fn publish(&self, event: TransactionEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("transaction event dropped: no subscribers");
        }
    }
}
