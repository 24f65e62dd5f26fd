//! chainwatch-core: shared domain types and the closed channel message
//! catalogue used between the hub process and its windows.
//!
//! Pure library. No IO, no async.

pub mod error;
pub mod message;
pub mod types;

pub use error::ProtocolError;
pub use message::{Envelope, MainMessage, RendererMessage};
