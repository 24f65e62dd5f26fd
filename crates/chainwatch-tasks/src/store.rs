//! Persisted-storage collaborator and the fire-and-forget persister.
//!
//! The registry never waits on storage. Changes are queued to a background
//! task; a failed write is logged and the in-memory state stands.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use chainwatch_core::types::{
    Account, IntervalKey, IntervalSubscription, SubscriptionTask, TaskRef,
};

use crate::sink::{ChangeSink, RegistryChange};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Task-shaped get/set/delete keyed by account and by chain.
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn load_accounts(&self) -> Result<Vec<Account>, StoreError>;
    async fn save_account(&self, account: &Account) -> Result<(), StoreError>;
    async fn delete_account(&self, address: &str, chain_id: &str) -> Result<(), StoreError>;

    async fn load_tasks(&self) -> Result<Vec<SubscriptionTask>, StoreError>;
    async fn set_task(&self, task: &SubscriptionTask) -> Result<(), StoreError>;
    async fn delete_task(&self, task: &SubscriptionTask) -> Result<(), StoreError>;

    async fn load_intervals(&self) -> Result<Vec<IntervalSubscription>, StoreError>;
    async fn set_interval(&self, task: &IntervalSubscription) -> Result<(), StoreError>;
    async fn delete_interval(&self, key: &IntervalKey) -> Result<(), StoreError>;
}

// ─── Persister ───────────────────────────────────────────────────────

/// Sink that queues every change for the background persister.
#[derive(Clone)]
pub struct StoreSink {
    tx: mpsc::UnboundedSender<RegistryChange>,
}

impl ChangeSink for StoreSink {
    fn publish(&self, change: &RegistryChange) {
        if self.tx.send(change.clone()).is_err() {
            tracing::warn!("persister stopped; {} change(s) not saved", change.len());
        }
    }
}

/// Spawn the background persister. The task ends once every [`StoreSink`]
/// clone has been dropped and the queue drained.
pub fn spawn_persister(store: Arc<dyn TaskStore>) -> (StoreSink, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<RegistryChange>();
    let handle = tokio::spawn(async move {
        while let Some(change) = rx.recv().await {
            persist(store.as_ref(), &change).await;
        }
        tracing::debug!("persister drained");
    });
    (StoreSink { tx }, handle)
}

async fn persist(store: &dyn TaskStore, change: &RegistryChange) {
    let failures = match change {
        RegistryChange::TasksAdded(tasks) | RegistryChange::TasksUpdated(tasks) => {
            let mut failed = 0usize;
            for task in tasks {
                if let Err(e) = store.set_task(task).await {
                    tracing::warn!("persist task {} failed: {e}", task.task_ref());
                    failed += 1;
                }
            }
            failed
        }
        RegistryChange::TasksRemoved(tasks) => {
            let mut failed = 0usize;
            for task in tasks {
                if let Err(e) = store.delete_task(task).await {
                    tracing::warn!("delete task {} failed: {e}", task.task_ref());
                    failed += 1;
                }
            }
            failed
        }
        RegistryChange::IntervalsAdded(subs) | RegistryChange::IntervalsUpdated(subs) => {
            let mut failed = 0usize;
            for sub in subs {
                if let Err(e) = store.set_interval(sub).await {
                    tracing::warn!("persist interval {} failed: {e}", sub.key());
                    failed += 1;
                }
            }
            failed
        }
        RegistryChange::IntervalsRemoved(subs) => {
            let mut failed = 0usize;
            for sub in subs {
                if let Err(e) = store.delete_interval(&sub.key()).await {
                    tracing::warn!("delete interval {} failed: {e}", sub.key());
                    failed += 1;
                }
            }
            failed
        }
    };
    if failures > 0 {
        tracing::warn!("{failures} change(s) kept in memory only");
    }
}

// ─── Memory Store ────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct MemoryState {
    accounts: Vec<Account>,
    tasks: BTreeMap<TaskRef, SubscriptionTask>,
    intervals: BTreeMap<IntervalKey, IntervalSubscription>,
    fail_writes: bool,
}

/// In-process store. Used by tests and by `--ephemeral` runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_accounts(accounts: Vec<Account>) -> Self {
        let store = Self::new();
        store.lock().accounts = accounts;
        store
    }

    /// Make every subsequent write fail.
    pub fn fail_writes(&self, fail: bool) {
        self.lock().fail_writes = fail;
    }

    pub fn task(&self, task_ref: &TaskRef) -> Option<SubscriptionTask> {
        self.lock().tasks.get(task_ref).cloned()
    }

    pub fn task_count(&self) -> usize {
        self.lock().tasks.len()
    }

    pub fn interval(&self, key: &IntervalKey) -> Option<IntervalSubscription> {
        self.lock().intervals.get(key).cloned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn writable(&self) -> Result<std::sync::MutexGuard<'_, MemoryState>, StoreError> {
        let guard = self.lock();
        if guard.fail_writes {
            return Err(StoreError::Unavailable("writes disabled".to_owned()));
        }
        Ok(guard)
    }
}

#[async_trait]
impl TaskStore for MemoryStore {
    async fn load_accounts(&self) -> Result<Vec<Account>, StoreError> {
        Ok(self.lock().accounts.clone())
    }

    async fn save_account(&self, account: &Account) -> Result<(), StoreError> {
        let mut state = self.writable()?;
        state
            .accounts
            .retain(|a| !(a.address == account.address && a.chain_id == account.chain_id));
        state.accounts.push(account.clone());
        Ok(())
    }

    async fn delete_account(&self, address: &str, chain_id: &str) -> Result<(), StoreError> {
        self.writable()?
            .accounts
            .retain(|a| !(a.address == address && a.chain_id == chain_id));
        Ok(())
    }

    async fn load_tasks(&self) -> Result<Vec<SubscriptionTask>, StoreError> {
        Ok(self.lock().tasks.values().cloned().collect())
    }

    async fn set_task(&self, task: &SubscriptionTask) -> Result<(), StoreError> {
        self.writable()?.tasks.insert(task.task_ref(), task.clone());
        Ok(())
    }

    async fn delete_task(&self, task: &SubscriptionTask) -> Result<(), StoreError> {
        self.writable()?.tasks.remove(&task.task_ref());
        Ok(())
    }

    async fn load_intervals(&self) -> Result<Vec<IntervalSubscription>, StoreError> {
        Ok(self.lock().intervals.values().cloned().collect())
    }

    async fn set_interval(&self, task: &IntervalSubscription) -> Result<(), StoreError> {
        self.writable()?.intervals.insert(task.key(), task.clone());
        Ok(())
    }

    async fn delete_interval(&self, key: &IntervalKey) -> Result<(), StoreError> {
        self.writable()?.intervals.remove(key);
        Ok(())
    }
}
