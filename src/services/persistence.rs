//! Durable snapshots of in-flight transactions.
//!
//! Persistence here is best-effort recovery material, not a transactional
//! guarantee: every failure is caught and logged, and the tracked transaction
//! keeps operating purely in memory.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::domain::{ActiveTransaction, StateMachineSnapshot, TransactionRequest};
use crate::ports::{SettingsStore, StoreResult};

/// Settings-store key holding the serialized snapshot list. The only key this
/// crate uses.
pub const STORE_KEY: &str = "payments.active_transactions";

/// Current schema version for persisted snapshots.
const SCHEMA_VERSION: u32 = 1;

/// Durable projection of an ActiveTransaction, minus the live terminal
/// binding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedTransactionState {
    pub version: u32,
    pub transaction_id: String,
    pub terminal_transaction_id: String,
    pub terminal_id: String,
    pub request: TransactionRequest,
    pub state: StateMachineSnapshot,
    pub started_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
}

/// Aggregate statistics over the persisted snapshots.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StateStats {
    pub total: usize,
    pub by_state: HashMap<String, usize>,
    pub oldest: Option<DateTime<Utc>>,
    pub newest: Option<DateTime<Utc>>,
}

pub struct StatePersistence {
    store: Arc<dyn SettingsStore>,
    retention_hours: i64,
    // Serializes the read-modify-write over the single store key so two
    // near-simultaneous saves cannot lose an update.
    write_lock: Mutex<()>,
}

impl StatePersistence {
    pub fn new(store: Arc<dyn SettingsStore>, retention_hours: i64) -> Self {
        Self {
            store,
            retention_hours,
            write_lock: Mutex::new(()),
        }
    }

    /// Upserts a snapshot of `tx`. Entries older than the retention window are
    /// pruned on every write, so the list stays bounded even if cleanup is
    /// never called explicitly.
    pub async fn save_state(&self, tx: &ActiveTransaction) {
        let _guard = self.write_lock.lock().await;
        if let Err(e) = self.save_state_inner(tx).await {
            tracing::warn!("failed to persist transaction {}: {}", tx.id, e);
        }
    }

    async fn save_state_inner(&self, tx: &ActiveTransaction) -> StoreResult<()> {
        let mut entries = self.read_entries().await?;

        let cutoff = Utc::now() - Duration::hours(self.retention_hours);
        entries.retain(|e| e.last_updated_at >= cutoff);

        let snapshot = PersistedTransactionState {
            version: SCHEMA_VERSION,
            transaction_id: tx.id.clone(),
            terminal_transaction_id: tx.terminal_transaction_id.clone(),
            terminal_id: tx.terminal.terminal_id.clone(),
            request: tx.request.clone(),
            state: tx.state_machine.snapshot(),
            started_at: tx.started_at,
            last_updated_at: tx.last_updated_at,
        };

        match entries
            .iter_mut()
            .find(|e| e.transaction_id == snapshot.transaction_id)
        {
            Some(existing) => *existing = snapshot,
            None => entries.push(snapshot),
        }

        self.write_entries(&entries).await
    }

    /// Loads one snapshot, migrating old schema versions forward.
    pub async fn load_state(&self, transaction_id: &str) -> Option<PersistedTransactionState> {
        match self.read_entries().await {
            Ok(entries) => entries
                .into_iter()
                .find(|e| e.transaction_id == transaction_id)
                .map(migrate),
            Err(e) => {
                tracing::warn!("failed to load persisted transaction {}: {}", transaction_id, e);
                None
            }
        }
    }

    pub async fn all_states(&self) -> Vec<PersistedTransactionState> {
        match self.read_entries().await {
            Ok(entries) => entries.into_iter().map(migrate).collect(),
            Err(e) => {
                tracing::warn!("failed to read persisted transactions: {}", e);
                Vec::new()
            }
        }
    }

    pub async fn remove_state(&self, transaction_id: &str) {
        let _guard = self.write_lock.lock().await;
        if let Err(e) = self.remove_state_inner(transaction_id).await {
            tracing::warn!(
                "failed to remove persisted transaction {}: {}",
                transaction_id,
                e
            );
        }
    }

    async fn remove_state_inner(&self, transaction_id: &str) -> StoreResult<()> {
        let mut entries = self.read_entries().await?;
        let before = entries.len();
        entries.retain(|e| e.transaction_id != transaction_id);
        if entries.len() != before {
            self.write_entries(&entries).await?;
        }
        Ok(())
    }

    /// Removes entries older than `max_age_hours`. Returns how many went.
    pub async fn cleanup_old_states(&self, max_age_hours: i64) -> usize {
        let _guard = self.write_lock.lock().await;
        match self.cleanup_inner(max_age_hours).await {
            Ok(removed) => removed,
            Err(e) => {
                tracing::warn!("failed to clean up persisted transactions: {}", e);
                0
            }
        }
    }

    async fn cleanup_inner(&self, max_age_hours: i64) -> StoreResult<usize> {
        let mut entries = self.read_entries().await?;
        let cutoff = Utc::now() - Duration::hours(max_age_hours);
        let before = entries.len();
        entries.retain(|e| e.last_updated_at >= cutoff);

        let removed = before - entries.len();
        if removed > 0 {
            self.write_entries(&entries).await?;
            tracing::info!("pruned {} stale persisted transaction(s)", removed);
        }
        Ok(removed)
    }

    pub async fn stats(&self) -> StateStats {
        let entries = self.all_states().await;

        let mut by_state: HashMap<String, usize> = HashMap::new();
        for entry in &entries {
            *by_state
                .entry(entry.state.current_state.to_string())
                .or_insert(0) += 1;
        }

        StateStats {
            total: entries.len(),
            by_state,
            oldest: entries.iter().map(|e| e.started_at).min(),
            newest: entries.iter().map(|e| e.last_updated_at).max(),
        }
    }

    async fn read_entries(&self) -> StoreResult<Vec<PersistedTransactionState>> {
        match self.store.get(STORE_KEY).await? {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Ok(Vec::new()),
        }
    }

    async fn write_entries(&self, entries: &[PersistedTransactionState]) -> StoreResult<()> {
        let raw = serde_json::to_string(entries)?;
        self.store.put(STORE_KEY, raw).await
    }
}

fn migrate(entry: PersistedTransactionState) -> PersistedTransactionState {
    if entry.version < SCHEMA_VERSION {
        // Versioned migration steps slot in here once the schema moves past
        // v1; today old entries are just restamped.
        let mut migrated = entry;
        migrated.version = SCHEMA_VERSION;
        return migrated;
    }
    entry
}
