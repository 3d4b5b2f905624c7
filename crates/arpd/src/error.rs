//! Error types for arpd.

use thiserror::Error;

/// Errors raised inside the ARP daemon.
///
/// Reconciliation handlers never surface these to the event loop; they are
/// logged at the point of failure and the offending update is skipped.
#[derive(Debug, Error)]
pub enum ArpdError {
    /// A bulk read from the hardware abstraction plane failed.
    #[error("asicd {operation} failed: {message}")]
    HwPlane {
        /// The bulk call that failed (e.g. "GetBulkPortState").
        operation: &'static str,
        message: String,
    },

    /// A capture handle could not be opened or read.
    #[error("capture on {port} failed: {message}")]
    Capture { port: String, message: String },

    #[error("configuration error: {0}")]
    Config(String),

    /// An inbound notification could not be decoded.
    #[error("malformed notification: {0}")]
    Notification(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The peer side of an internal channel went away.
    #[error("{0} channel closed")]
    ChannelClosed(&'static str),
}

impl ArpdError {
    pub fn hw_plane(operation: &'static str, message: impl Into<String>) -> Self {
        Self::HwPlane {
            operation,
            message: message.into(),
        }
    }

    pub fn capture(port: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Capture {
            port: port.into(),
            message: message.into(),
        }
    }
}

/// Result type alias for arpd operations.
pub type Result<T> = std::result::Result<T, ArpdError>;
