//! chainwatch-tasks: the authoritative subscription registry.
//!
//! Holds per-account and per-chain subscription tasks plus interval
//! subscriptions, and publishes every mutation to the installed change
//! sinks (interested windows, persisted storage).

pub mod backup;
pub mod error;
pub mod registry;
pub mod sink;
pub mod store;

pub use backup::ImportReport;
pub use error::RegistryError;
pub use registry::{IntervalInsert, IntervalRemoval, OneShotRequest, SubscriptionRegistry};
pub use sink::{ChangeSink, RegistryChange, SwitchboardSink};
pub use store::{MemoryStore, StoreError, StoreSink, TaskStore, spawn_persister};
