use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Hardware device failure, mapped from the device status word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceErrorCode {
    UserRejected,
    AppNotOpen,
    DeviceLocked,
    Disconnected,
    Unknown(u16),
}

impl DeviceErrorCode {
    pub fn from_status(status: u16) -> Self {
        match status {
            0x6985 | 0x6986 => Self::UserRejected,
            0x6d00 | 0x6e00 | 0x6e01 | 0x6511 => Self::AppNotOpen,
            0x5515 | 0x6982 => Self::DeviceLocked,
            other => Self::Unknown(other),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::UserRejected => "user_rejected",
            Self::AppNotOpen => "app_not_open",
            Self::DeviceLocked => "device_locked",
            Self::Disconnected => "disconnected",
            Self::Unknown(_) => "unknown",
        }
    }
}

impl fmt::Display for DeviceErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown(status) => write!(f, "unknown (0x{status:04x})"),
            other => f.write_str(other.as_str()),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("device error {code}: {message}")]
pub struct DeviceError {
    pub code: DeviceErrorCode,
    pub message: String,
}

impl DeviceError {
    pub fn new(code: DeviceErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    #[error("session proposal rejected: {0}")]
    SessionRejected(String),

    #[error("session expired")]
    SessionExpired,

    #[error("wallet rejected the request")]
    UserRejected,

    #[error("relay error: {0}")]
    Relay(String),
}

#[derive(Debug, Error)]
pub enum SigningError {
    #[error("signer busy with {0}")]
    Busy(String),

    #[error("request {0} is already pending")]
    DuplicateRequest(String),

    #[error("no signing metadata for {tx_id} on {chain_id}")]
    MissingMetadata { tx_id: String, chain_id: String },

    #[error("{address} is not approved in the wallet session")]
    SignerNotApproved { address: String },

    #[error("submission failed: {0}")]
    Submit(String),

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error(transparent)]
    Remote(#[from] RemoteError),
}
