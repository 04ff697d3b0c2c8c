//! Error handling for devtk-rs
//!
//! This module defines the crate-wide error type and a Result alias.
//! Every variant maps onto an [`ErrorKind`] so callers can decide between
//! retrying (transport failures) and reconnecting (state failures).

use std::fmt;
use thiserror::Error;

/// Kind of object referenced by a [`DevtkError::NotFound`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Figure,
    Axis,
    Artist,
    Device,
    Characteristic,
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ObjectKind::Figure => "figure",
            ObjectKind::Axis => "axis",
            ObjectKind::Artist => "artist",
            ObjectKind::Device => "device",
            ObjectKind::Characteristic => "characteristic",
        };
        f.write_str(name)
    }
}

/// Cause of a transport failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// The device did not answer in time
    Timeout,
    /// The device rejected the request
    Nack,
    /// The device is not reachable (out of range, unplugged)
    DeviceAbsent,
    /// The port is held by another process
    PortBusy,
    /// An established link dropped
    LinkLost,
    /// Operating system I/O failure
    Io,
    /// Failure reported by the underlying stack (BLE adapter, serial driver)
    Backend,
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransportErrorKind::Timeout => "timeout",
            TransportErrorKind::Nack => "rejected",
            TransportErrorKind::DeviceAbsent => "device absent",
            TransportErrorKind::PortBusy => "port busy",
            TransportErrorKind::LinkLost => "link lost",
            TransportErrorKind::Io => "I/O failure",
            TransportErrorKind::Backend => "backend failure",
        };
        f.write_str(name)
    }
}

/// Coarse classification of a [`DevtkError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    State,
    Transport,
    NotFound,
    ShapeMismatch,
    Configuration,
    Channel,
    Io,
    Serialization,
}

/// Main error type for devtk-rs operations
#[derive(Error, Debug)]
pub enum DevtkError {
    /// Operation is invalid in the current connection or manager state
    #[error("Cannot {operation} while {state}")]
    State {
        operation: &'static str,
        state: String,
    },

    /// Underlying channel failure
    #[error("Transport error ({kind}): {message}")]
    Transport {
        kind: TransportErrorKind,
        message: String,
    },

    /// Reference to an unknown identifier
    #[error("Unknown {kind}: {id}")]
    NotFound { kind: ObjectKind, id: String },

    /// Payload cardinality disagrees with the artist's declared contract
    #[error("Shape mismatch for artist {artist}: expected {expected}, got {actual}")]
    ShapeMismatch {
        artist: String,
        expected: String,
        actual: String,
    },

    /// Unrecognized option or invalid parameter
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The other end of a queue went away
    #[error("Channel error: {0}")]
    Channel(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<DevtkError>,
    },
}

impl DevtkError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        DevtkError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Create a transport error
    pub fn transport(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        DevtkError::Transport {
            kind,
            message: message.into(),
        }
    }

    /// Create a not-found error
    pub fn not_found(kind: ObjectKind, id: impl fmt::Display) -> Self {
        DevtkError::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    /// Classify the error, looking through any added context
    pub fn kind(&self) -> ErrorKind {
        match self {
            DevtkError::State { .. } => ErrorKind::State,
            DevtkError::Transport { .. } => ErrorKind::Transport,
            DevtkError::NotFound { .. } => ErrorKind::NotFound,
            DevtkError::ShapeMismatch { .. } => ErrorKind::ShapeMismatch,
            DevtkError::Configuration(_) => ErrorKind::Configuration,
            DevtkError::Channel(_) => ErrorKind::Channel,
            DevtkError::Io(_) => ErrorKind::Io,
            DevtkError::Serialization(_) => ErrorKind::Serialization,
            DevtkError::WithContext { source, .. } => source.kind(),
        }
    }

    /// The transport failure cause, if this is a transport error
    pub fn transport_kind(&self) -> Option<TransportErrorKind> {
        match self {
            DevtkError::Transport { kind, .. } => Some(*kind),
            DevtkError::WithContext { source, .. } => source.transport_kind(),
            _ => None,
        }
    }

    /// Whether retrying the same operation may succeed
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transport
            && self.transport_kind() != Some(TransportErrorKind::LinkLost)
    }
}

/// Result type alias for devtk-rs operations
pub type Result<T> = std::result::Result<T, DevtkError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E: Into<DevtkError>> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| Into::<DevtkError>::into(e).with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| Into::<DevtkError>::into(e).with_context(f()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DevtkError::Configuration("unknown option 'colour'".to_string());
        assert_eq!(err.to_string(), "Configuration error: unknown option 'colour'");
    }

    #[test]
    fn test_error_with_context_keeps_kind() {
        let err = DevtkError::not_found(ObjectKind::Artist, 7);
        let with_ctx = err.with_context("Failed to update line");
        assert!(with_ctx.to_string().contains("Failed to update line"));
        assert_eq!(with_ctx.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_result_context_converts_and_keeps_kind() {
        let io: std::result::Result<(), std::io::Error> =
            Err(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"));
        let err = io.context("Failed to write config").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);
        assert!(err.to_string().contains("Failed to write config"));

        let missing: Result<()> = Err(DevtkError::not_found(ObjectKind::Axis, 3));
        let err = missing.with_context(|| "Failed to apply create_artist".to_string()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(Ok::<_, DevtkError>(1).context("unused").is_ok());
    }

    #[test]
    fn test_transport_retryable() {
        let timeout = DevtkError::transport(TransportErrorKind::Timeout, "no answer");
        assert!(timeout.is_retryable());
        assert!(timeout.to_string().contains("timeout"));

        let lost = DevtkError::transport(TransportErrorKind::LinkLost, "gone");
        assert!(!lost.is_retryable());

        let state = DevtkError::State {
            operation: "read",
            state: "Disconnected".to_string(),
        };
        assert!(!state.is_retryable());
        assert_eq!(state.to_string(), "Cannot read while Disconnected");
    }
}
