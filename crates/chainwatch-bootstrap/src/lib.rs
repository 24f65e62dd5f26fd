//! chainwatch-bootstrap: drives the app through its
//! initialize / online / offline / abort lifecycle.
//!
//! [`BootstrapMachine`] is the pure state machine; [`Bootstrapper`] runs the
//! step sequences against the external collaborators and owns every API
//! connection and the interval timer.

pub mod collaborators;
pub mod coordinator;
pub mod error;
pub mod machine;
pub mod timer;

pub use collaborators::{AccountSync, AccountSyncResult, ApiHandle, ChainTransport, HubEvents, TaskRunner};
pub use coordinator::{Bootstrapper, Collaborators};
pub use error::{BootstrapError, TransportError};
pub use machine::{BootstrapMachine, Sequence, SequenceReport, Step};
pub use timer::{DEFAULT_TICK, IntervalTimer};
