//! Error types for the channel protocol.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The task name is not part of the closed catalogue. Indicates version
    /// skew between windows and the hub, never a runtime condition.
    #[error("unrecognized channel task: {0}")]
    UnrecognizedTask(String),

    #[error("malformed payload for {task}: {reason}")]
    MalformedPayload { task: String, reason: String },

    #[error("unknown window kind: {0}")]
    UnknownWindowKind(String),

    #[error("envelope encode failed: {0}")]
    Encode(#[from] serde_json::Error),
}

impl ProtocolError {
    /// Whether the error must terminate the dispatch loop.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::UnrecognizedTask(_) | Self::UnknownWindowKind(_))
    }
}
