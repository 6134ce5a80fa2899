//! Transaction orchestration: the public operations of the core.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

use crate::config::Config;
use crate::domain::{
    ActiveTransaction, StateMachine, StatusInfo, Terminal, TransactionRequest, TransactionState,
};
use crate::error::Error;
use crate::events::{EventBus, TransactionEvent};
use crate::ports::SettingsStore;
use crate::services::persistence::{PersistedTransactionState, StatePersistence};
use crate::services::poller::{ActiveTable, TransactionPoller};
use crate::terminal::TerminalClient;

/// Ids returned to the caller by a successful initiate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitiatedTransaction {
    pub transaction_id: String,
    pub terminal_transaction_id: String,
}

enum InitiateKind {
    Sale,
    Refund,
}

/// Orchestrates the lifecycle of terminal transactions: initiation, tracking,
/// polling, cancellation and persistence.
pub struct TransactionManager {
    client: TerminalClient,
    active: ActiveTable,
    // terminal_transaction_id -> local id, so cancel resolves without a scan
    by_terminal_id: Arc<RwLock<HashMap<String, String>>>,
    poller: TransactionPoller,
    persistence: Arc<StatePersistence>,
    events: EventBus,
}

impl TransactionManager {
    pub fn new(store: Arc<dyn SettingsStore>, config: &Config) -> Self {
        let client = TerminalClient::with_timeout(Duration::from_secs(config.http_timeout_secs));
        let events = EventBus::new(config.event_capacity);
        let active: ActiveTable = Arc::new(RwLock::new(HashMap::new()));
        let persistence = Arc::new(StatePersistence::new(store, config.state_retention_hours));
        let poller = TransactionPoller::new(
            client.clone(),
            active.clone(),
            persistence.clone(),
            events.clone(),
            Duration::from_millis(config.poll_interval_ms),
            config.max_poll_attempts,
        );

        Self {
            client,
            active,
            by_terminal_id: Arc::new(RwLock::new(HashMap::new())),
            poller,
            persistence,
            events,
        }
    }

    /// Subscribes to status/completion/timeout events.
    pub fn subscribe(&self) -> broadcast::Receiver<TransactionEvent> {
        self.events.subscribe()
    }

    /// Handle to the persistence service, for host-driven cleanup, stats and
    /// recovery queries.
    pub fn persistence(&self) -> Arc<StatePersistence> {
        self.persistence.clone()
    }

    /// Opens a sale on the terminal and starts tracking it.
    pub async fn initiate_sale(
        &self,
        terminal: &Terminal,
        request: TransactionRequest,
    ) -> Result<InitiatedTransaction, Error> {
        if !matches!(request, TransactionRequest::Sale { .. }) {
            return Err(Error::Validation(
                "initiate_sale requires a sale request".to_string(),
            ));
        }
        self.initiate(terminal, request, InitiateKind::Sale).await
    }

    /// Opens a refund on the terminal and starts tracking it.
    pub async fn initiate_refund(
        &self,
        terminal: &Terminal,
        request: TransactionRequest,
    ) -> Result<InitiatedTransaction, Error> {
        if !matches!(request, TransactionRequest::Refund { .. }) {
            return Err(Error::Validation(
                "initiate_refund requires a refund request".to_string(),
            ));
        }
        self.initiate(terminal, request, InitiateKind::Refund).await
    }

    async fn initiate(
        &self,
        terminal: &Terminal,
        request: TransactionRequest,
        kind: InitiateKind,
    ) -> Result<InitiatedTransaction, Error> {
        request.validate()?;

        let transaction_id = next_transaction_id();
        let mut machine = StateMachine::new();
        machine.transition(TransactionState::Initiating, "initiate requested")?;

        let outcome = match kind {
            InitiateKind::Sale => self.client.sale(terminal, &request).await,
            InitiateKind::Refund => self.client.refund(terminal, &request).await,
        };

        let ack = match outcome {
            Ok(ack) => ack,
            Err(e) => {
                let _ = machine.transition(TransactionState::Failed, e.to_string());
                tracing::error!(
                    "initiate on terminal {} failed for {}: {}",
                    terminal.terminal_id,
                    transaction_id,
                    e
                );
                return Err(Error::from(e));
            }
        };

        machine.transition(TransactionState::Pending, "terminal accepted")?;

        let tx = ActiveTransaction::new(
            transaction_id.clone(),
            ack.transaction_id.clone(),
            terminal.clone(),
            request,
            machine,
        );
        self.persistence.save_state(&tx).await;
        self.active.write().await.insert(transaction_id.clone(), tx);
        if let Some(displaced) = self
            .by_terminal_id
            .write()
            .await
            .insert(ack.transaction_id.clone(), transaction_id.clone())
        {
            tracing::warn!(
                "terminal transaction id {} was already tracked by {}",
                ack.transaction_id,
                displaced
            );
        }
        self.poller
            .start_polling(&transaction_id, &ack.transaction_id, terminal.clone())
            .await;

        tracing::info!(
            "transaction {} opened on terminal {} as {}",
            transaction_id,
            terminal.terminal_id,
            ack.transaction_id
        );

        Ok(InitiatedTransaction {
            transaction_id,
            terminal_transaction_id: ack.transaction_id,
        })
    }

    /// Direct status query. Side-effect free: touches neither the active
    /// table nor persistence, and returns `None` instead of raising on
    /// transport failure.
    pub async fn transaction_status(
        &self,
        terminal: &Terminal,
        terminal_transaction_id: &str,
    ) -> Option<StatusInfo> {
        match self.client.status(terminal, terminal_transaction_id).await {
            Ok(response) => Some(StatusInfo::for_status(&response.status)),
            Err(e) => {
                tracing::warn!(
                    "status query for {} failed: {}",
                    terminal_transaction_id,
                    e
                );
                None
            }
        }
    }

    /// Requests cancellation on the terminal. Returns `true` only when the
    /// terminal reports success; the matching local transaction (if any) is
    /// moved to `cancelled` and its poller stopped.
    pub async fn cancel_transaction(
        &self,
        terminal: &Terminal,
        terminal_transaction_id: &str,
    ) -> bool {
        // The terminal may know transactions this process does not; the call
        // goes out regardless of local table state.
        let response = match self.client.cancel(terminal, terminal_transaction_id).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(
                    "cancel request for {} failed: {}",
                    terminal_transaction_id,
                    e
                );
                return false;
            }
        };

        if !response.success {
            tracing::warn!(
                "terminal declined cancellation of {}: {}",
                terminal_transaction_id,
                response.message.unwrap_or_default()
            );
            return false;
        }

        let local_id = self
            .by_terminal_id
            .read()
            .await
            .get(terminal_transaction_id)
            .cloned();

        if let Some(local_id) = local_id {
            let snapshot = {
                let mut active = self.active.write().await;
                match active.get_mut(&local_id) {
                    Some(tx) => {
                        if let Err(e) = tx
                            .state_machine
                            .transition(TransactionState::Cancelled, "cancelled by caller")
                        {
                            tracing::warn!("transaction {} already terminal: {}", local_id, e);
                        }
                        tx.last_updated_at = Utc::now();
                        Some(tx.clone())
                    }
                    None => None,
                }
            };
            if let Some(snapshot) = snapshot {
                self.persistence.save_state(&snapshot).await;
            }
            self.poller.stop_polling(&local_id).await;
        }

        true
    }

    /// Returns a copy of one tracked transaction.
    pub async fn active_transaction(&self, transaction_id: &str) -> Option<ActiveTransaction> {
        self.active.read().await.get(transaction_id).cloned()
    }

    pub async fn active_count(&self) -> usize {
        self.active.read().await.len()
    }

    pub async fn is_polling(&self, transaction_id: &str) -> bool {
        self.poller.is_polling(transaction_id).await
    }

    /// Drops a transaction from the active table, stops its poller, and
    /// deletes its persisted snapshot.
    pub async fn remove_active_transaction(
        &self,
        transaction_id: &str,
    ) -> Option<ActiveTransaction> {
        self.poller.stop_polling(transaction_id).await;

        let removed = self.active.write().await.remove(transaction_id);
        if let Some(tx) = &removed {
            self.by_terminal_id
                .write()
                .await
                .remove(&tx.terminal_transaction_id);
            self.persistence.remove_state(transaction_id).await;
        }
        removed
    }

    /// Snapshots persisted before a restart. Report-only: pollers are not
    /// resurrected, but the terminal-side ids let the host re-query or cancel
    /// whatever was in flight.
    pub async fn recover_persisted(&self) -> Vec<PersistedTransactionState> {
        self.persistence.all_states().await
    }
}

/// Local correlation id, unique for the process lifetime: millisecond
/// timestamp plus random suffix.
fn next_transaction_id() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("viva_{}_{}", Utc::now().timestamp_millis(), &suffix[..8])
}
