//! Per-transaction status polling.
//!
//! One cancellable tokio task per in-flight transaction, tracked by local id
//! so it can always be stopped explicitly. The terminal pushes nothing; these
//! loops are the only source of progress.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;

use crate::domain::{ActiveTransaction, StatusInfo, Terminal, TransactionState};
use crate::events::{EventBus, TransactionEvent};
use crate::services::persistence::StatePersistence;
use crate::terminal::TerminalClient;

pub(crate) type ActiveTable = Arc<RwLock<HashMap<String, ActiveTransaction>>>;

#[derive(Clone)]
struct PollContext {
    client: TerminalClient,
    table: ActiveTable,
    persistence: Arc<StatePersistence>,
    events: EventBus,
    interval: Duration,
    max_attempts: u32,
}

pub struct TransactionPoller {
    ctx: PollContext,
    tasks: Arc<Mutex<HashMap<String, JoinHandle<()>>>>,
}

impl TransactionPoller {
    pub(crate) fn new(
        client: TerminalClient,
        table: ActiveTable,
        persistence: Arc<StatePersistence>,
        events: EventBus,
        interval: Duration,
        max_attempts: u32,
    ) -> Self {
        Self {
            ctx: PollContext {
                client,
                table,
                persistence,
                events,
                interval,
                max_attempts,
            },
            tasks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Starts polling for one transaction, replacing any previous task for
    /// the same id.
    pub async fn start_polling(
        &self,
        transaction_id: &str,
        terminal_transaction_id: &str,
        terminal: Terminal,
    ) {
        let ctx = self.ctx.clone();
        let tasks = self.tasks.clone();
        let id = transaction_id.to_string();
        let terminal_tx_id = terminal_transaction_id.to_string();

        let handle = tokio::spawn(async move {
            poll_loop(ctx, &id, &terminal_tx_id, &terminal).await;
            tasks.lock().await.remove(&id);
        });

        if let Some(previous) = self
            .tasks
            .lock()
            .await
            .insert(transaction_id.to_string(), handle)
        {
            previous.abort();
        }
        tracing::debug!("started polling for transaction {}", transaction_id);
    }

    /// Stops polling for `transaction_id`. Idempotent; unknown ids are a
    /// no-op.
    pub async fn stop_polling(&self, transaction_id: &str) {
        if let Some(handle) = self.tasks.lock().await.remove(transaction_id) {
            handle.abort();
            tracing::debug!("stopped polling for transaction {}", transaction_id);
        }
    }

    pub async fn is_polling(&self, transaction_id: &str) -> bool {
        self.tasks.lock().await.contains_key(transaction_id)
    }
}

async fn poll_loop(
    ctx: PollContext,
    transaction_id: &str,
    terminal_transaction_id: &str,
    terminal: &Terminal,
) {
    let started = Instant::now();
    let mut last_status: Option<String> = None;

    for attempt in 1..=ctx.max_attempts {
        tokio::time::sleep(ctx.interval).await;

        let response = match ctx.client.status(terminal, terminal_transaction_id).await {
            Ok(response) => response,
            Err(e) => {
                // Transient: the attempt is consumed, polling continues.
                tracing::warn!(
                    "status poll {}/{} for transaction {} failed: {}",
                    attempt,
                    ctx.max_attempts,
                    transaction_id,
                    e
                );
                continue;
            }
        };

        // The transaction may have been removed while the request was in
        // flight; its result is discarded.
        if !ctx.table.read().await.contains_key(transaction_id) {
            tracing::debug!(
                "transaction {} removed mid-poll, discarding status",
                transaction_id
            );
            return;
        }

        let status = response.status;
        if last_status.as_deref() != Some(status.as_str()) {
            apply_status(&ctx, transaction_id, &status).await;
            ctx.events.publish(TransactionEvent::StatusUpdate {
                transaction_id: transaction_id.to_string(),
                status: status.clone(),
                timestamp: Utc::now(),
            });
            last_status = Some(status.clone());
        }

        let reached_terminal = TransactionState::from_wire(&status)
            .map(|s| s.is_terminal())
            .unwrap_or(false);
        if reached_terminal {
            let info = StatusInfo::for_status(&status);
            ctx.events.publish(TransactionEvent::Complete {
                transaction_id: transaction_id.to_string(),
                status,
                data: serde_json::to_value(info).unwrap_or(serde_json::Value::Null),
            });
            tracing::info!("transaction {} finished polling", transaction_id);
            return;
        }
    }

    let elapsed_time = started.elapsed().as_millis() as u64;
    tracing::warn!(
        "transaction {} saw no terminal status after {} attempts",
        transaction_id,
        ctx.max_attempts
    );
    ctx.events.publish(TransactionEvent::Timeout {
        transaction_id: transaction_id.to_string(),
        elapsed_time,
    });
}

/// Applies a changed terminal status to the tracked transaction and persists
/// the result.
async fn apply_status(ctx: &PollContext, transaction_id: &str, status: &str) {
    let next = match TransactionState::from_wire(status) {
        Some(next) => next,
        None => {
            tracing::debug!(
                "terminal reported unrecognized status '{}' for transaction {}",
                status,
                transaction_id
            );
            return;
        }
    };

    let snapshot = {
        let mut table = ctx.table.write().await;
        match table.get_mut(transaction_id) {
            Some(tx) => {
                if let Err(e) = tx.state_machine.transition(next, "terminal status poll") {
                    tracing::warn!(
                        "ignoring poll transition for transaction {}: {}",
                        transaction_id,
                        e
                    );
                }
                tx.last_updated_at = Utc::now();
                Some(tx.clone())
            }
            None => None,
        }
    };

    if let Some(snapshot) = snapshot {
        ctx.persistence.save_state(&snapshot).await;
    }
}
