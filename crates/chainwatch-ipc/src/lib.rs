//! chainwatch-ipc: per-window-pair channel endpoints, the window directory,
//! and the switchboard that fans hub messages out to interested windows.

pub mod channel;
pub mod error;
pub mod switchboard;
pub mod window;

pub use channel::{ChannelEndpoint, ChannelRegistry, EnvelopeReceiver};
pub use error::{DeliveryError, SwitchboardError};
pub use switchboard::{BroadcastReport, HUB, Switchboard, WindowLink};
pub use window::{OpenArgs, OpenOutcome, WindowDirectory};
