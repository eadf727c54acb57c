//! Error types for the IEC 60870-5-104 outstation.

use thiserror::Error;

use crate::types::TypeId;

/// Result type alias for outstation operations.
pub type Result<T> = std::result::Result<T, Iec104Error>;

/// IEC 60870-5-104 outstation error types.
#[derive(Debug, Error)]
pub enum Iec104Error {
    /// Connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Link closed by the peer or by the station
    #[error("Link closed")]
    LinkClosed,

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid frame format
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    /// Invalid ASDU
    #[error("Invalid ASDU: {0}")]
    InvalidAsdu(String),

    /// Unknown type identifier
    #[error("Unknown type ID: {0}")]
    UnknownTypeId(u8),

    /// Unknown cause of transmission
    #[error("Unknown cause of transmission: {0}")]
    UnknownCot(u8),

    /// Information object does not match the ASDU type
    #[error("Type mismatch: ASDU is {expected}, object is {actual}")]
    TypeMismatch { expected: TypeId, actual: TypeId },

    /// No room for another information object
    #[error("ASDU full ({0} bytes encoded)")]
    AsduFull(usize),

    /// Codec error
    #[error("Codec error: {0}")]
    Codec(String),

    /// Station is already started
    #[error("Station already running")]
    AlreadyRunning,

    /// Station is not started
    #[error("Station not running")]
    NotRunning,
}

impl Iec104Error {
    /// Create an invalid frame error.
    pub fn invalid_frame(msg: impl Into<String>) -> Self {
        Self::InvalidFrame(msg.into())
    }

    /// Create an invalid ASDU error.
    pub fn invalid_asdu(msg: impl Into<String>) -> Self {
        Self::InvalidAsdu(msg.into())
    }

    /// Check if this error ends the link it occurred on.
    pub fn is_link_error(&self) -> bool {
        matches!(
            self,
            Self::Connection(_) | Self::LinkClosed | Self::Io(_) | Self::InvalidFrame(_) | Self::Codec(_)
        )
    }

    /// Check if the master should be answered with a negative reply
    /// instead of silently dropping the ASDU.
    pub fn is_answerable(&self) -> bool {
        matches!(self, Self::UnknownTypeId(_) | Self::UnknownCot(_))
    }
}
