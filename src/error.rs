//! Error types for isi-client.

use std::time::Duration;

use thiserror::Error;

/// Main error type for all ISI operations.
#[derive(Debug, Error)]
pub enum IsiError {
    /// I/O error on the underlying stream.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error while loading configuration.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration value out of range.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The transport refused or failed to deliver a message.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The addressed resource answered "entity not reachable".
    #[error("Resource 0x{0:02X} not reachable")]
    Unreachable(u8),

    /// No reply arrived before the request deadline.
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// Transport connection closed unexpectedly.
    #[error("Connection closed")]
    ConnectionClosed,

    /// The owning client was destroyed while the request was pending.
    #[error("Client destroyed")]
    ClientDestroyed,

    /// A read would go past the end of the buffer.
    #[error("Read of {len} byte(s) at offset {offset} exceeds buffer of {available}")]
    OutOfBounds {
        offset: usize,
        len: usize,
        available: usize,
    },

    /// Response too short, bad sub-block or undecodable field.
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// Well-formed response with the wrong message id or operation.
    #[error("Unexpected opcode: expected 0x{expected:02X}, got 0x{actual:02X}")]
    UnexpectedOpcode { expected: u8, actual: u8 },

    /// The modem reported that the operation failed.
    #[error("Remote status not ok: 0x{0:02X}")]
    StatusNotOk(u8),

    /// Rejected before any buffer was built.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// No free transaction slot for the resource.
    #[error("No free request slot for resource 0x{0:02X}")]
    ResourceExhausted(u8),

    /// Framing violation on the stream transport.
    #[error("Protocol error: {0}")]
    Protocol(String),
}

/// Coarse failure classes, used by callers that only care about the category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Delivery failed: refused, closed, unreachable, timed out.
    Transport,
    /// The reply could not be parsed.
    Malformed,
    /// The reply parsed but was not a success for this request.
    Unexpected,
    /// Caller input rejected before anything was sent.
    InvalidInput,
    /// Out of request contexts.
    ResourceExhausted,
    /// Local setup problem (config, I/O).
    Local,
}

impl IsiError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            IsiError::Transport(_)
            | IsiError::Unreachable(_)
            | IsiError::Timeout(_)
            | IsiError::ConnectionClosed
            | IsiError::ClientDestroyed
            | IsiError::Protocol(_) => ErrorKind::Transport,
            IsiError::OutOfBounds { .. } | IsiError::MalformedResponse(_) => ErrorKind::Malformed,
            IsiError::UnexpectedOpcode { .. } | IsiError::StatusNotOk(_) => ErrorKind::Unexpected,
            IsiError::InvalidInput(_) => ErrorKind::InvalidInput,
            IsiError::ResourceExhausted(_) => ErrorKind::ResourceExhausted,
            IsiError::Io(_) | IsiError::Json(_) | IsiError::InvalidConfig(_) => ErrorKind::Local,
        }
    }

    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        IsiError::MalformedResponse(reason.into())
    }

    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        IsiError::InvalidInput(reason.into())
    }
}

/// Result type alias using IsiError.
pub type Result<T> = std::result::Result<T, IsiError>;
