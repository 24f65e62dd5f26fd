//! Change batches emitted by the registry and the sinks that consume them.

use std::sync::{Arc, Mutex, PoisonError};

use chainwatch_core::RendererMessage;
use chainwatch_core::types::{IntervalSubscription, SubscriptionTask};
use chainwatch_ipc::Switchboard;

/// One mutation batch. A batch is published whole or not at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryChange {
    TasksAdded(Vec<SubscriptionTask>),
    TasksUpdated(Vec<SubscriptionTask>),
    TasksRemoved(Vec<SubscriptionTask>),
    IntervalsAdded(Vec<IntervalSubscription>),
    IntervalsUpdated(Vec<IntervalSubscription>),
    IntervalsRemoved(Vec<IntervalSubscription>),
}

impl RegistryChange {
    pub fn is_empty(&self) -> bool {
        match self {
            Self::TasksAdded(t) | Self::TasksUpdated(t) | Self::TasksRemoved(t) => t.is_empty(),
            Self::IntervalsAdded(t) | Self::IntervalsUpdated(t) | Self::IntervalsRemoved(t) => {
                t.is_empty()
            }
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::TasksAdded(t) | Self::TasksUpdated(t) | Self::TasksRemoved(t) => t.len(),
            Self::IntervalsAdded(t) | Self::IntervalsUpdated(t) | Self::IntervalsRemoved(t) => {
                t.len()
            }
        }
    }

    /// One window message per affected entry.
    pub fn renderer_messages(&self) -> Vec<RendererMessage> {
        match self {
            Self::TasksAdded(tasks) => tasks
                .iter()
                .map(|t| RendererMessage::TaskAdd { task: t.clone() })
                .collect(),
            Self::TasksUpdated(tasks) => tasks
                .iter()
                .map(|t| RendererMessage::TaskUpdate { task: t.clone() })
                .collect(),
            Self::TasksRemoved(tasks) => tasks
                .iter()
                .map(|t| RendererMessage::TaskRemove { task: t.clone() })
                .collect(),
            Self::IntervalsAdded(tasks) => tasks
                .iter()
                .map(|t| RendererMessage::IntervalAdd { task: t.clone() })
                .collect(),
            Self::IntervalsUpdated(tasks) => tasks
                .iter()
                .map(|t| RendererMessage::IntervalUpdate { task: t.clone() })
                .collect(),
            Self::IntervalsRemoved(tasks) => tasks
                .iter()
                .map(|t| RendererMessage::IntervalRemove { task: t.clone() })
                .collect(),
        }
    }
}

/// Consumer of registry change batches. Must not block.
pub trait ChangeSink: Send + Sync {
    fn publish(&self, change: &RegistryChange);
}

/// Broadcasts each change to the windows whose view can include it.
pub struct SwitchboardSink {
    switchboard: Arc<Mutex<Switchboard>>,
}

impl SwitchboardSink {
    pub fn new(switchboard: Arc<Mutex<Switchboard>>) -> Self {
        Self { switchboard }
    }
}

impl ChangeSink for SwitchboardSink {
    fn publish(&self, change: &RegistryChange) {
        // Hold the lock for the whole batch so no window observes a subset
        // interleaved with another broadcast.
        let sb = self
            .switchboard
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        for message in change.renderer_messages() {
            if let Err(e) = sb.broadcast(&message) {
                tracing::warn!("registry broadcast failed: {e}");
            }
        }
    }
}
