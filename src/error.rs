//! # Error Types
//!
//! Custom error types for the remote and the VESC bridge using `thiserror`.

use thiserror::Error;

/// Framing errors raised while packing or unpacking a VESC serial frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FrameError {
    /// Buffer cap reached without a terminator at the declared offset
    #[error("frame overflow: no terminator within the frame size cap")]
    Overflow,

    /// Embedded CRC does not match the CRC of the extracted payload
    #[error("checksum mismatch: frame carries 0x{received:04X}, payload hashes to 0x{calculated:04X}")]
    ChecksumMismatch {
        /// CRC found in the frame
        received: u16,
        /// CRC recomputed over the payload
        calculated: u16,
    },

    /// Fewer bytes than the frame or response requires
    #[error("incomplete frame or response")]
    Incomplete,

    /// Response carries a packet id this bridge does not decode
    #[error("unknown packet id {0}")]
    UnknownPacketId(u8),

    /// Payload too long for the 2-byte length field
    #[error("payload of {0} bytes does not fit a frame")]
    PayloadTooLarge(usize),
}

/// Errors raised while decoding telemetry fields out of a payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FieldError {
    /// Packet id is not the telemetry response
    #[error("unsupported packet id {0} for telemetry decoding")]
    UnsupportedPacket(u8),

    /// Body shorter than the fixed field layout
    #[error("telemetry body truncated: need {needed} bytes, got {got}")]
    Truncated {
        /// Bytes required by the field layout
        needed: usize,
        /// Bytes available
        got: usize,
    },
}

/// Main error type for the remote
#[derive(Debug, Error)]
pub enum RemoteError {
    /// VESC framing errors
    #[error("VESC frame error: {0}")]
    Frame(#[from] FrameError),

    /// VESC telemetry decoding errors
    #[error("VESC field error: {0}")]
    Field(#[from] FieldError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// Serial port errors
    #[error("Serial error: {0}")]
    Serial(String),

    /// No serial device could be opened
    #[error("No serial device found (tried: {0})")]
    SerialPortNotFound(String),

    /// Radio bridge errors
    #[error("Radio error: {0}")]
    Radio(String),

    /// Telemetry record serialization errors
    #[error("Telemetry encoding error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for the remote
pub type Result<T> = std::result::Result<T, RemoteError>;
