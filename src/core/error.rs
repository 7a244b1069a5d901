//! Error types for the serial transport.

use std::io;

use thiserror::Error;

/// Errors raised by a [`Device`](crate::core::Device) operation.
///
/// The transient kinds ([`WouldBlock`](DeviceError::WouldBlock) and
/// [`Interrupted`](DeviceError::Interrupted)) are recovered inside the
/// transport by requeuing and re-arming readiness monitoring; they never
/// reach the protocol. The remaining kinds are fatal: they are reported to
/// the reactor's error channel and terminate the transport.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeviceError {
    /// The operation would block; retry when the device signals readiness.
    #[error("device operation would block")]
    WouldBlock,

    /// The operation was interrupted before transferring any data.
    #[error("device operation interrupted")]
    Interrupted,

    /// The device is gone (unplugged, port revoked).
    #[error("device disconnected: {0}")]
    Disconnected(String),

    /// Permanent I/O failure on the device.
    #[error("device i/o failure: {0}")]
    Io(String),
}

impl DeviceError {
    /// Whether the error is recoverable by retrying on the next readiness
    /// signal.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::WouldBlock | Self::Interrupted)
    }

    /// Classify a raw `io::Error` into a device error kind.
    pub fn from_io(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::WouldBlock => Self::WouldBlock,
            io::ErrorKind::Interrupted => Self::Interrupted,
            io::ErrorKind::NotConnected | io::ErrorKind::BrokenPipe => {
                Self::Disconnected(err.to_string())
            }
            _ => Self::Io(err.to_string()),
        }
    }
}

/// Failure returned by a protocol flow-control callback.
///
/// Reported to the reactor's error channel; never alters transport state.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct CallbackError(pub String);

impl CallbackError {
    /// Create a callback error from any displayable message.
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Top-level transport errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Rejected watermark configuration.
    #[error("invalid watermarks: high ({high}) must be >= low ({low})")]
    InvalidWatermarks {
        /// Requested high watermark.
        high: usize,
        /// Requested low watermark.
        low: usize,
    },

    /// The transport has already been terminated.
    #[error("transport is closed")]
    Closed,

    /// Serial channels have no end-of-file concept.
    #[error("serial connections do not support end-of-file")]
    EofUnsupported,

    /// Device error.
    #[error("device error: {0}")]
    Device(#[from] DeviceError),

    /// Protocol callback failure.
    #[error("protocol callback failed: {0}")]
    Callback(#[from] CallbackError),
}

/// Structured record delivered to the reactor's error-reporting channel.
#[derive(Debug, Clone)]
pub struct ErrorReport {
    /// Human-readable description of the failing operation.
    pub message: String,
    /// The error that triggered the report.
    pub error: TransportError,
    /// Debug rendering of the transport at the time of failure.
    pub transport: String,
    /// Debug rendering of the protocol addressed at the time of failure.
    pub protocol: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(DeviceError::WouldBlock.is_transient());
        assert!(DeviceError::Interrupted.is_transient());
        assert!(!DeviceError::Disconnected("gone".into()).is_transient());
        assert!(!DeviceError::Io("oops".into()).is_transient());
    }

    #[test]
    fn test_from_io_kinds() {
        let would_block = io::Error::new(io::ErrorKind::WouldBlock, "later");
        assert_eq!(DeviceError::from_io(would_block), DeviceError::WouldBlock);

        let interrupted = io::Error::new(io::ErrorKind::Interrupted, "signal");
        assert_eq!(DeviceError::from_io(interrupted), DeviceError::Interrupted);

        let unplugged = io::Error::new(io::ErrorKind::BrokenPipe, "unplugged");
        assert!(matches!(
            DeviceError::from_io(unplugged),
            DeviceError::Disconnected(_)
        ));

        let other = io::Error::other("bad ioctl");
        assert!(matches!(DeviceError::from_io(other), DeviceError::Io(_)));
    }

    #[test]
    fn test_transport_error_conversions() {
        let err: TransportError = DeviceError::WouldBlock.into();
        assert!(matches!(err, TransportError::Device(_)));

        let err: TransportError = CallbackError::new("pause failed").into();
        assert_eq!(err.to_string(), "protocol callback failed: pause failed");
    }
}
