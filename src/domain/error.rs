//! Error types shared across the crate.

use crate::domain::models::LightId;
use thiserror::Error;

/// Rejected setter input. Desired state is left unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field} value {value} out of range ({min}..={max})")]
    OutOfRange {
        field: &'static str,
        value: i64,
        min: i64,
        max: i64,
    },

    #[error("invalid power state {0:?} (expected \"ON\" or \"OFF\")")]
    InvalidPowerState(String),
}

impl ValidationError {
    pub(crate) fn out_of_range(field: &'static str, value: i64, min: i64, max: i64) -> Self {
        Self::OutOfRange {
            field,
            value,
            min,
            max,
        }
    }
}

/// Frame building or parsing failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("payload is {len} bytes, frame holds at most {max}")]
    PayloadTooLarge { len: usize, max: usize },

    #[error("{field} value {value} does not fit in a single byte")]
    ValueOutOfRange { field: &'static str, value: u16 },

    #[error("frame must be {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("invalid frame header {0:#04x}")]
    InvalidHeader(u8),

    #[error("checksum mismatch: expected {expected:#04x}, got {actual:#04x}")]
    ChecksumMismatch { expected: u8, actual: u8 },
}

/// Peripheral unreachable or handshake failed.
#[derive(Debug, Clone, Error)]
pub enum ConnectError {
    #[error("no Bluetooth adapters found")]
    NoAdapter,

    #[error("peripheral {0} not found")]
    NotFound(String),

    #[error("control characteristic {0} not found")]
    CharacteristicNotFound(uuid::Uuid),

    #[error("peripheral reported disconnected right after connect")]
    NotConnected,

    #[error("BLE error: {0}")]
    Ble(String),
}

impl From<btleplug::Error> for ConnectError {
    fn from(err: btleplug::Error) -> Self {
        Self::Ble(err.to_string())
    }
}

/// Write to the control characteristic failed.
#[derive(Debug, Clone, Error)]
pub enum SendError {
    #[error("no connected session")]
    NotConnected,

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("BLE error: {0}")]
    Ble(String),
}

impl From<btleplug::Error> for SendError {
    fn from(err: btleplug::Error) -> Self {
        Self::Ble(err.to_string())
    }
}

/// Errors surfaced by the Update API itself (never for device-side failures).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ControllerError {
    #[error("light {0} is not registered")]
    UnknownLight(LightId),

    #[error("controller is shutting down")]
    ShuttingDown,

    #[error(transparent)]
    Validation(#[from] ValidationError),
}
