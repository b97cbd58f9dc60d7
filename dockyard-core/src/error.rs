//! Error types for dockyard.

use std::sync::Arc;
use std::time::Duration;

/// Main error type for dockyard operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DockyardError {
    /// The connection string could not be resolved to an endpoint.
    #[error("invalid endpoint: {0:?}")]
    InvalidEndpoint(String),

    /// Client certificate or key material did not parse.
    #[error("invalid certificate: {0}")]
    InvalidCertificate(String),

    /// CA material did not parse or could not be added to the trust store.
    #[error("invalid CA: {0}")]
    InvalidCa(String),

    /// A version string had a non-numeric component.
    #[error("malformed version: {0:?}")]
    MalformedVersion(String),

    /// The engine answered with a non-success status.
    #[error(transparent)]
    Api(#[from] ClientError),

    /// No bytes moved on a stream for longer than its inactivity timeout.
    #[error("inactivity time exceeded timeout")]
    InactivityTimeout,

    /// The caller's context was canceled or its deadline passed.
    #[error(transparent)]
    Context(#[from] ContextError),

    /// The client-wide request timeout elapsed.
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    /// A multiplexed output stream was corrupt.
    #[error("stream error: {0}")]
    Codec(#[from] CodecError),

    /// Transport-level failure (dial, TLS, HTTP framing).
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The request could not be built (bad header, unserializable body).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// A successful response carried a body that did not decode.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// Structured error for a non-success HTTP response.
///
/// `message` is the response body verbatim, minus surrounding whitespace.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("API error ({status}): {message}")]
pub struct ClientError {
    /// HTTP status code.
    pub status: u16,
    /// Body text returned by the engine.
    pub message: String,
}

/// Why a [`Context`](crate::Context) finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ContextError {
    /// The context was canceled explicitly.
    #[error("context canceled")]
    Canceled,

    /// The context deadline passed.
    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

/// Transport-level errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    /// IO error from the underlying transport
    #[error("io error: {0}")]
    Io(Arc<std::io::Error>),

    /// Connection was closed unexpectedly
    #[error("connection closed")]
    ConnectionClosed,

    /// Failed to connect to the remote endpoint
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// TLS handshake failed
    #[error("tls error: {0}")]
    Tls(String),

    /// HTTP protocol violation
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Connection pool exhausted
    #[error("no available connections")]
    PoolExhausted,
}

/// Errors raised while decoding multiplexed stdout/stderr streams.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CodecError {
    /// The frame header named a stream that does not exist.
    #[error("unknown stream selector: {0}")]
    UnknownStream(u8),

    /// Frame size exceeds maximum allowed
    #[error("frame too large: {size} bytes (max: {max})")]
    FrameTooLarge {
        /// Actual frame size
        size: usize,
        /// Maximum allowed size
        max: usize,
    },

    /// The stream ended in the middle of a frame.
    #[error("truncated frame: expected {expected} bytes, got {actual}")]
    Truncated {
        /// Bytes the frame header announced (header included).
        expected: usize,
        /// Bytes left when the stream ended.
        actual: usize,
    },

    /// Reading the stream or writing a sink failed.
    #[error("io error: {0}")]
    Io(Arc<std::io::Error>),
}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(Arc::new(e))
    }
}

impl From<std::io::Error> for CodecError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(Arc::new(e))
    }
}

impl From<std::io::Error> for DockyardError {
    fn from(e: std::io::Error) -> Self {
        Self::Transport(TransportError::from(e))
    }
}

impl ClientError {
    /// Build an error from a status and the raw response body.
    #[must_use]
    pub fn from_body(status: u16, body: &[u8]) -> Self {
        Self {
            status,
            message: String::from_utf8_lossy(body).trim().to_string(),
        }
    }
}

impl DockyardError {
    /// Build an API error with status and message.
    #[must_use]
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api(ClientError {
            status,
            message: message.into(),
        })
    }

    /// The HTTP status carried by an API error.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api(e) => Some(e.status),
            _ => None,
        }
    }

    /// Check if this error came from a deadline or timeout of any kind.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_) | Self::InactivityTimeout | Self::Context(ContextError::DeadlineExceeded)
        )
    }

    /// Check if this error came from an explicit cancellation.
    #[must_use]
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Context(ContextError::Canceled))
    }
}
