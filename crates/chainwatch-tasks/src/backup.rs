//! Backup import: merges an exported JSON document into the registry.
//!
//! The document shape is `{"accounts": [...], "tasks": [...], "intervals": [...]}`.
//! Each entry is decoded on its own; a malformed entry is reported and the
//! rest of the batch continues.

use serde::Deserialize;
use serde_json::Value;

use chainwatch_core::types::{Account, IntervalSubscription, SubscriptionTask};

use crate::error::RegistryError;
use crate::registry::SubscriptionRegistry;
use crate::sink::RegistryChange;

#[derive(Debug, Default, Deserialize)]
struct BackupDocument {
    #[serde(default)]
    accounts: Vec<Value>,
    #[serde(default)]
    tasks: Vec<Value>,
    #[serde(default)]
    intervals: Vec<Value>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ImportReport {
    /// Decoded accounts, handed back for the caller to persist.
    pub accounts: Vec<Account>,
    pub tasks_imported: usize,
    pub intervals_imported: usize,
    /// One human-readable line per rejected entry.
    pub errors: Vec<String>,
    pub start_timer: bool,
}

impl ImportReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }

    /// Toast text summarizing the import.
    pub fn summary(&self) -> String {
        if self.errors.is_empty() {
            format!(
                "Imported {} account(s), {} task(s), {} interval(s)",
                self.accounts.len(),
                self.tasks_imported,
                self.intervals_imported
            )
        } else {
            format!(
                "Imported {} task(s), {} interval(s); {} entr{} skipped",
                self.tasks_imported,
                self.intervals_imported,
                self.errors.len(),
                if self.errors.len() == 1 { "y" } else { "ies" }
            )
        }
    }
}

impl SubscriptionRegistry {
    /// Merge a backup document. Only a document that is not a JSON object
    /// at all fails the whole import.
    pub fn import_backup(&mut self, contents: &str, active: bool) -> Result<ImportReport, RegistryError> {
        let doc: BackupDocument = serde_json::from_str(contents)?;
        let mut report = ImportReport::default();

        for (i, raw) in doc.accounts.into_iter().enumerate() {
            match serde_json::from_value::<Account>(raw) {
                Ok(account) => report.accounts.push(account),
                Err(e) => report.errors.push(format!("account #{i}: {e}")),
            }
        }

        let (mut added, mut updated) = (Vec::new(), Vec::new());
        for (i, raw) in doc.tasks.into_iter().enumerate() {
            let task = match serde_json::from_value::<SubscriptionTask>(raw) {
                Ok(task) => task,
                Err(e) => {
                    report.errors.push(format!("task #{i}: {e}"));
                    continue;
                }
            };
            match self.put_task(task.clone()) {
                Ok(true) => added.push(task),
                Ok(false) => updated.push(task),
                Err(e) => report.errors.push(format!("task #{i}: {e}")),
            }
        }
        report.tasks_imported = added.len() + updated.len();
        self.publish(RegistryChange::TasksAdded(added));
        self.publish(RegistryChange::TasksUpdated(updated));

        let mut intervals = Vec::new();
        for (i, raw) in doc.intervals.into_iter().enumerate() {
            match serde_json::from_value::<IntervalSubscription>(raw) {
                Ok(mut sub) => {
                    sub.tick_counter = 0;
                    intervals.push(sub);
                }
                Err(e) => report.errors.push(format!("interval #{i}: {e}")),
            }
        }
        let insert = self.insert_interval_subscriptions(intervals, active);
        report.intervals_imported = insert.added.len() + insert.updated.len();
        report.start_timer = insert.start_timer;

        for line in &report.errors {
            tracing::warn!("backup entry rejected: {line}");
        }
        tracing::info!("{}", report.summary());
        Ok(report)
    }
}
