//! JSON-file task store: `accounts.json`, `tasks.json` and `intervals.json`
//! under the data directory, each a JSON array rewritten on every change.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;

use chainwatch_core::types::{Account, IntervalKey, IntervalSubscription, SubscriptionTask};
use chainwatch_tasks::{StoreError, TaskStore};

const ACCOUNTS: &str = "accounts.json";
const TASKS: &str = "tasks.json";
const INTERVALS: &str = "intervals.json";

pub struct JsonFileStore {
    dir: PathBuf,
    // Serializes read-modify-write cycles.
    write: Mutex<()>,
}

impl JsonFileStore {
    /// Open the store, creating the directory if needed.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        tracing::info!("task store at {}", dir.display());
        Ok(Self {
            dir,
            write: Mutex::new(()),
        })
    }

    async fn read<T: DeserializeOwned>(&self, file: &str) -> Result<Vec<T>, StoreError> {
        let path = self.dir.join(file);
        match tokio::fs::read(&path).await {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Ok(Vec::new()),
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write<T: Serialize>(&self, file: &str, items: &[T]) -> Result<(), StoreError> {
        let path = self.dir.join(file);
        let tmp = self.dir.join(format!(".{file}.tmp"));
        let bytes = serde_json::to_vec_pretty(items)?;
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    /// Load `file`, let `edit` change it, write it back if `edit` says so.
    async fn update<T, F>(&self, file: &str, edit: F) -> Result<(), StoreError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce(&mut Vec<T>) -> bool,
    {
        let _guard = self.write.lock().await;
        let mut items = self.read::<T>(file).await?;
        if edit(&mut items) {
            self.write(file, &items).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl TaskStore for JsonFileStore {
    async fn load_accounts(&self) -> Result<Vec<Account>, StoreError> {
        self.read(ACCOUNTS).await
    }

    async fn save_account(&self, account: &Account) -> Result<(), StoreError> {
        self.update::<Account, _>(ACCOUNTS, |accounts| {
            accounts.retain(|a| !(a.address == account.address && a.chain_id == account.chain_id));
            accounts.push(account.clone());
            true
        })
        .await
    }

    async fn delete_account(&self, address: &str, chain_id: &str) -> Result<(), StoreError> {
        self.update::<Account, _>(ACCOUNTS, |accounts| {
            let before = accounts.len();
            accounts.retain(|a| !(a.address == address && a.chain_id == chain_id));
            accounts.len() != before
        })
        .await
    }

    async fn load_tasks(&self) -> Result<Vec<SubscriptionTask>, StoreError> {
        self.read(TASKS).await
    }

    async fn set_task(&self, task: &SubscriptionTask) -> Result<(), StoreError> {
        let task_ref = task.task_ref();
        self.update::<SubscriptionTask, _>(TASKS, |tasks| {
            match tasks.iter_mut().find(|t| t.task_ref() == task_ref) {
                Some(existing) => *existing = task.clone(),
                None => tasks.push(task.clone()),
            }
            true
        })
        .await
    }

    async fn delete_task(&self, task: &SubscriptionTask) -> Result<(), StoreError> {
        let task_ref = task.task_ref();
        self.update::<SubscriptionTask, _>(TASKS, |tasks| {
            let before = tasks.len();
            tasks.retain(|t| t.task_ref() != task_ref);
            tasks.len() != before
        })
        .await
    }

    async fn load_intervals(&self) -> Result<Vec<IntervalSubscription>, StoreError> {
        self.read(INTERVALS).await
    }

    async fn set_interval(&self, sub: &IntervalSubscription) -> Result<(), StoreError> {
        let key = sub.key();
        self.update::<IntervalSubscription, _>(INTERVALS, |subs| {
            match subs.iter_mut().find(|s| s.key() == key) {
                Some(existing) => *existing = sub.clone(),
                None => subs.push(sub.clone()),
            }
            true
        })
        .await
    }

    async fn delete_interval(&self, key: &IntervalKey) -> Result<(), StoreError> {
        self.update::<IntervalSubscription, _>(INTERVALS, |subs| {
            let before = subs.len();
            subs.retain(|s| &s.key() != key);
            subs.len() != before
        })
        .await
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chainwatch_core::types::{AccountSource, IntervalSetting, TaskCategory, TaskStatus};

    pub(crate) fn account(address: &str) -> Account {
        Account {
            address: address.to_owned(),
            chain_id: "Polkadot".to_owned(),
            name: "Alice".to_owned(),
            source: AccountSource::ReadOnly,
        }
    }

    pub(crate) fn chain_task(action: &str) -> SubscriptionTask {
        SubscriptionTask {
            action: action.to_owned(),
            category: TaskCategory::Balances,
            chain_id: "Polkadot".to_owned(),
            label: action.to_owned(),
            status: TaskStatus::Enable,
            account: None,
            enable_os_notifications: false,
            action_args: None,
        }
    }

    pub(crate) fn referendum(id: u32) -> IntervalSubscription {
        IntervalSubscription {
            action: "subscribe:interval:openGov:referendumVotes".to_owned(),
            chain_id: "Polkadot".to_owned(),
            referendum_id: Some(id),
            category: TaskCategory::OpenGov,
            label: format!("Referendum {id}"),
            status: TaskStatus::Enable,
            enable_os_notifications: false,
            interval_setting: IntervalSetting::default(),
            tick_counter: 0,
        }
    }

    #[tokio::test]
    async fn missing_files_load_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = JsonFileStore::open(dir.path().join("nested")).await.expect("open");
        assert!(store.load_accounts().await.expect("accounts").is_empty());
        assert!(store.load_tasks().await.expect("tasks").is_empty());
        assert!(store.load_intervals().await.expect("intervals").is_empty());
    }

    #[tokio::test]
    async fn accounts_are_keyed_by_address_and_chain() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = JsonFileStore::open(dir.path()).await.expect("open");

        store.save_account(&account("15alice")).await.expect("save");
        let mut renamed = account("15alice");
        renamed.name = "Alice (ledger)".to_owned();
        store.save_account(&renamed).await.expect("resave");
        store.save_account(&account("15bob")).await.expect("save bob");

        let accounts = store.load_accounts().await.expect("load");
        assert_eq!(accounts.len(), 2);
        assert!(accounts.iter().any(|a| a.name == "Alice (ledger)"));

        store.delete_account("15alice", "Polkadot").await.expect("delete");
        let accounts = store.load_accounts().await.expect("load");
        assert_eq!(accounts, vec![account("15bob")]);
    }

    #[tokio::test]
    async fn tasks_replace_in_place_and_survive_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        {
            let store = JsonFileStore::open(dir.path()).await.expect("open");
            store.set_task(&chain_task("subscribe:chain:timestamp")).await.expect("set");
            let mut disabled = chain_task("subscribe:chain:timestamp");
            disabled.status = TaskStatus::Disable;
            store.set_task(&disabled).await.expect("replace");
            store.set_task(&chain_task("subscribe:chain:currentSlot")).await.expect("set");
            store
                .delete_task(&chain_task("subscribe:chain:currentSlot"))
                .await
                .expect("delete");
        }

        let store = JsonFileStore::open(dir.path()).await.expect("reopen");
        let tasks = store.load_tasks().await.expect("load");
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].status, TaskStatus::Disable);
    }

    #[tokio::test]
    async fn intervals_are_keyed_by_subscription_key() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = JsonFileStore::open(dir.path()).await.expect("open");

        store.set_interval(&referendum(7)).await.expect("set");
        store.set_interval(&referendum(7)).await.expect("again");
        store.set_interval(&referendum(9)).await.expect("other");
        assert_eq!(store.load_intervals().await.expect("load").len(), 2);

        store.delete_interval(&referendum(7).key()).await.expect("delete");
        let subs = store.load_intervals().await.expect("load");
        assert_eq!(subs.len(), 1);
        assert_eq!(subs[0].referendum_id, Some(9));
    }

    #[tokio::test]
    async fn corrupt_file_is_a_serde_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join(TASKS), b"{not json").expect("write");
        let store = JsonFileStore::open(dir.path()).await.expect("open");
        assert!(matches!(store.load_tasks().await, Err(StoreError::Serde(_))));
    }
}
