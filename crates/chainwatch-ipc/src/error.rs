//! Error types for channel delivery and window switching.

use chainwatch_core::ProtocolError;
use chainwatch_core::types::WindowKind;
use thiserror::Error;

/// A message could not be handed to its endpoint. Never fatal: callers log
/// and carry on.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    #[error("no live endpoint between {0} and {1}")]
    Closed(WindowKind, WindowKind),

    #[error("endpoint generation {held} replaced by {live}")]
    Stale { held: u64, live: u64 },

    #[error("{side} is not a party of endpoint {source_kind}<->{target_kind}")]
    NotAParty {
        side: WindowKind,
        source_kind: WindowKind,
        target_kind: WindowKind,
    },

    #[error("a window cannot open a channel to its own kind ({0})")]
    SelfLoop(WindowKind),

    #[error("receiver for {0} dropped")]
    ReceiverGone(WindowKind),
}

#[derive(Debug, Error)]
pub enum SwitchboardError {
    #[error("{0} is hosted by the hub and cannot be opened as a spoke")]
    HubKind(WindowKind),

    #[error("window {0} is not open")]
    NotOpen(WindowKind),

    #[error("window {0} has no linked endpoint")]
    NotLinked(WindowKind),

    #[error(transparent)]
    Delivery(#[from] DeliveryError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}
