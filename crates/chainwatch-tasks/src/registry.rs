//! Subscription registry: the single writer of subscription state.
//!
//! Every mutating operation applies its change in memory first and then
//! publishes exactly one [`RegistryChange`] batch to each installed sink.
//! Query methods never publish.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chainwatch_core::types::{
    ChainId, IntervalKey, IntervalSubscription, SubscriptionTask, TaskCategory, TaskRef,
    TaskScope, TaskStatus,
};

use crate::error::RegistryError;
use crate::sink::{ChangeSink, RegistryChange};

// ─── Results ────────────────────────────────────────────────────────

/// Outcome of [`SubscriptionRegistry::insert_interval_subscriptions`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IntervalInsert {
    pub added: Vec<IntervalSubscription>,
    pub updated: Vec<IntervalSubscription>,
    /// The first enabled subscription appeared while online.
    pub start_timer: bool,
}

impl IntervalInsert {
    /// Some inserted subscription is enabled, so its chain must be reachable.
    pub fn enables_any(&self) -> bool {
        self.added
            .iter()
            .chain(&self.updated)
            .any(IntervalSubscription::is_enabled)
    }
}

/// Outcome of [`SubscriptionRegistry::remove_interval_subscriptions`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IntervalRemoval {
    pub removed: Vec<IntervalSubscription>,
    /// No enabled subscription is left.
    pub stop_timer: bool,
}

/// A task to fetch once, with the notification flag it currently carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OneShotRequest {
    pub task: SubscriptionTask,
    pub notify: bool,
}

// ─── Registry ───────────────────────────────────────────────────────

#[derive(Default)]
pub struct SubscriptionRegistry {
    tasks: BTreeMap<TaskScope, Vec<SubscriptionTask>>,
    intervals: Vec<IntervalSubscription>,
    sinks: Vec<Arc<dyn ChangeSink>>,
}

impl std::fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("scopes", &self.tasks.len())
            .field("intervals", &self.intervals.len())
            .field("sinks", &self.sinks.len())
            .finish()
    }
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_sink(&mut self, sink: Arc<dyn ChangeSink>) {
        self.sinks.push(sink);
    }

    /// Detach every sink. Later changes are applied but not published.
    pub fn clear_sinks(&mut self) {
        self.sinks.clear();
    }

    /// Load persisted state without publishing anything.
    ///
    /// Entries with a mismatched scope are skipped and logged.
    pub fn hydrate(&mut self, tasks: Vec<SubscriptionTask>, intervals: Vec<IntervalSubscription>) {
        let mut loaded = 0usize;
        for task in tasks {
            match self.put_task(task) {
                Ok(_) => loaded += 1,
                Err(e) => tracing::warn!("skipping persisted task: {e}"),
            }
        }
        for sub in intervals {
            self.put_interval(sub);
        }
        tracing::debug!(
            "registry hydrated with {loaded} task(s), {} interval(s)",
            self.intervals.len()
        );
    }

    // ─── Account & Chain Tasks ──────────────────────────────────────

    /// Insert or replace a task by `(action, scope)`.
    pub fn upsert_task(&mut self, task: SubscriptionTask) -> Result<(), RegistryError> {
        let added = self.put_task(task.clone())?;
        self.publish(if added {
            RegistryChange::TasksAdded(vec![task])
        } else {
            RegistryChange::TasksUpdated(vec![task])
        });
        Ok(())
    }

    /// Drop every task owned by the account. Returns what was removed.
    pub fn remove_tasks_for_account(&mut self, address: &str, chain_id: &str) -> Vec<SubscriptionTask> {
        let removed = self
            .tasks
            .remove(&TaskScope::account(address, chain_id))
            .unwrap_or_default();
        self.publish(RegistryChange::TasksRemoved(removed.clone()));
        removed
    }

    /// Flip one task's status. Returns the new status.
    pub fn toggle_task(&mut self, task_ref: &TaskRef) -> Result<TaskStatus, RegistryError> {
        let task = self.task_mut(task_ref)?;
        task.status = task.status.flipped();
        let (status, snapshot) = (task.status, task.clone());
        self.publish(RegistryChange::TasksUpdated(vec![snapshot]));
        Ok(status)
    }

    pub fn set_os_notifications(
        &mut self,
        task_ref: &TaskRef,
        enabled: bool,
    ) -> Result<(), RegistryError> {
        let task = self.task_mut(task_ref)?;
        if task.enable_os_notifications == enabled {
            return Ok(());
        }
        task.enable_os_notifications = enabled;
        let snapshot = task.clone();
        self.publish(RegistryChange::TasksUpdated(vec![snapshot]));
        Ok(())
    }

    /// Aggregate state of a category within a scope: `Some(true)` iff every
    /// task is enabled, `None` when the category has no tasks.
    pub fn category_state(&self, category: TaskCategory, scope: &TaskScope) -> Option<bool> {
        let mut tasks = self
            .tasks_for(scope)
            .iter()
            .filter(|t| t.category == category)
            .peekable();
        tasks.peek()?;
        Some(tasks.all(SubscriptionTask::is_enabled))
    }

    /// Flip every task of the category to the opposite of the aggregate
    /// state, as one batch. An empty category changes nothing.
    pub fn toggle_category(
        &mut self,
        category: TaskCategory,
        scope: &TaskScope,
    ) -> Vec<SubscriptionTask> {
        let Some(all_on) = self.category_state(category, scope) else {
            tracing::debug!("category {category} empty for {scope}");
            return Vec::new();
        };
        let target = TaskStatus::from_enabled(!all_on);

        let mut changed = Vec::new();
        if let Some(tasks) = self.tasks.get_mut(scope) {
            for task in tasks.iter_mut().filter(|t| t.category == category) {
                if task.status != target {
                    task.status = target;
                    changed.push(task.clone());
                }
            }
        }
        tracing::info!(
            "category {category} for {scope} -> {target:?} ({} task(s))",
            changed.len()
        );
        self.publish(RegistryChange::TasksUpdated(changed.clone()));
        changed
    }

    pub fn tasks_for(&self, scope: &TaskScope) -> &[SubscriptionTask] {
        self.tasks.get(scope).map(Vec::as_slice).unwrap_or_default()
    }

    /// Every task (account and chain scoped) on the chain.
    pub fn tasks_for_chain(&self, chain_id: &str) -> Vec<&SubscriptionTask> {
        self.tasks
            .iter()
            .filter(|(scope, _)| scope.chain_id() == chain_id)
            .flat_map(|(_, tasks)| tasks.iter())
            .collect()
    }

    pub fn enabled_tasks_for_chain(&self, chain_id: &str) -> Vec<SubscriptionTask> {
        self.tasks_for_chain(chain_id)
            .into_iter()
            .filter(|t| t.is_enabled())
            .cloned()
            .collect()
    }

    pub fn enabled_tasks(&self) -> Vec<SubscriptionTask> {
        self.tasks
            .values()
            .flatten()
            .filter(|t| t.is_enabled())
            .cloned()
            .collect()
    }

    pub fn all_tasks(&self) -> Vec<SubscriptionTask> {
        self.tasks.values().flatten().cloned().collect()
    }

    pub fn task_count(&self) -> usize {
        self.tasks.values().map(Vec::len).sum()
    }

    /// The task with its current notification flag, for a one-time fetch.
    /// Status is left untouched.
    pub fn one_shot(&self, task_ref: &TaskRef) -> Result<OneShotRequest, RegistryError> {
        let task = self
            .find_task(task_ref)
            .ok_or_else(|| RegistryError::UnknownTask(task_ref.clone()))?;
        Ok(OneShotRequest {
            notify: task.enable_os_notifications,
            task: task.clone(),
        })
    }

    // ─── Interval Subscriptions ─────────────────────────────────────

    /// Insert interval subscriptions, replacing status, flags and setting of
    /// an existing key. `active` is whether the app is currently online.
    pub fn insert_interval_subscriptions(
        &mut self,
        subs: Vec<IntervalSubscription>,
        active: bool,
    ) -> IntervalInsert {
        let had_enabled = self.has_enabled_intervals();
        let mut result = IntervalInsert::default();
        for sub in subs {
            if self.put_interval(sub.clone()) {
                result.added.push(sub);
            } else {
                result.updated.push(sub);
            }
        }
        result.start_timer = active && !had_enabled && self.has_enabled_intervals();

        self.publish(RegistryChange::IntervalsAdded(result.added.clone()));
        self.publish(RegistryChange::IntervalsUpdated(result.updated.clone()));
        result
    }

    /// Remove subscriptions by key. Unknown keys are ignored.
    pub fn remove_interval_subscriptions(&mut self, keys: &[IntervalKey]) -> IntervalRemoval {
        let had_enabled = self.has_enabled_intervals();
        let (removed, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.intervals)
            .into_iter()
            .partition(|s| keys.contains(&s.key()));
        self.intervals = kept;

        let stop_timer = had_enabled && !self.has_enabled_intervals();
        self.publish(RegistryChange::IntervalsRemoved(removed.clone()));
        IntervalRemoval {
            removed,
            stop_timer,
        }
    }

    /// Flip one interval subscription. Enabling restarts its countdown.
    pub fn toggle_interval(&mut self, key: &IntervalKey) -> Result<TaskStatus, RegistryError> {
        let sub = self
            .intervals
            .iter_mut()
            .find(|s| s.key() == *key)
            .ok_or_else(|| RegistryError::UnknownInterval(key.clone()))?;
        sub.status = sub.status.flipped();
        if sub.is_enabled() {
            sub.tick_counter = 0;
        }
        let (status, snapshot) = (sub.status, sub.clone());
        self.publish(RegistryChange::IntervalsUpdated(vec![snapshot]));
        Ok(status)
    }

    pub fn intervals(&self) -> &[IntervalSubscription] {
        &self.intervals
    }

    pub fn intervals_for(&self, chain_id: &str) -> Vec<&IntervalSubscription> {
        self.intervals
            .iter()
            .filter(|s| s.chain_id == chain_id)
            .collect()
    }

    pub fn has_enabled_intervals(&self) -> bool {
        self.intervals.iter().any(IntervalSubscription::is_enabled)
    }

    /// Chains that carry at least one interval subscription.
    pub fn interval_chains(&self) -> BTreeSet<ChainId> {
        self.intervals.iter().map(|s| s.chain_id.clone()).collect()
    }

    /// Advance every enabled subscription by one tick. Returns those whose
    /// counter reached `ticks_to_wait`; their counters reset.
    ///
    /// Counter movement is bookkeeping only and is not published.
    pub fn tick_intervals(&mut self) -> Vec<IntervalSubscription> {
        let mut due = Vec::new();
        for sub in self.intervals.iter_mut().filter(|s| s.is_enabled()) {
            sub.tick_counter += 1;
            if sub.tick_counter >= sub.interval_setting.ticks_to_wait {
                sub.tick_counter = 0;
                due.push(sub.clone());
            }
        }
        due
    }

    // ─── Internals ──────────────────────────────────────────────────

    /// Returns `true` when the task was newly added.
    pub(crate) fn put_task(&mut self, task: SubscriptionTask) -> Result<bool, RegistryError> {
        if let Some(account) = &task.account {
            if account.chain_id != task.chain_id {
                return Err(RegistryError::ScopeMismatch {
                    task_chain: task.chain_id.clone(),
                    account_chain: account.chain_id.clone(),
                });
            }
        }
        let tasks = self.tasks.entry(task.scope()).or_default();
        match tasks.iter_mut().find(|t| t.action == task.action) {
            Some(existing) => {
                *existing = task;
                Ok(false)
            }
            None => {
                tasks.push(task);
                Ok(true)
            }
        }
    }

    /// Returns `true` when the key was newly added.
    pub(crate) fn put_interval(&mut self, sub: IntervalSubscription) -> bool {
        let key = sub.key();
        match self.intervals.iter_mut().find(|s| s.key() == key) {
            Some(existing) => {
                existing.status = sub.status;
                existing.enable_os_notifications = sub.enable_os_notifications;
                existing.interval_setting = sub.interval_setting;
                existing.label = sub.label;
                false
            }
            None => {
                self.intervals.push(sub);
                true
            }
        }
    }

    pub(crate) fn publish(&self, change: RegistryChange) {
        if change.is_empty() {
            return;
        }
        for sink in &self.sinks {
            sink.publish(&change);
        }
    }

    fn find_task(&self, task_ref: &TaskRef) -> Option<&SubscriptionTask> {
        self.tasks
            .get(&task_ref.scope)?
            .iter()
            .find(|t| t.action == task_ref.action)
    }

    fn task_mut(&mut self, task_ref: &TaskRef) -> Result<&mut SubscriptionTask, RegistryError> {
        self.tasks
            .get_mut(&task_ref.scope)
            .and_then(|tasks| tasks.iter_mut().find(|t| t.action == task_ref.action))
            .ok_or_else(|| RegistryError::UnknownTask(task_ref.clone()))
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
