//! Error types for dsql-pgadapter.
//!
//! All errors in this crate are represented by [`AdapterError`], which covers:
//! - I/O errors (client or backend socket, listener)
//! - Protocol errors (malformed startup, unexpected backend message)
//! - Backend errors (PostgreSQL error responses, with SQLSTATE)
//! - Token and TLS errors on the way to the backend
//! - Lifecycle errors (adapter already running or already closed)

use thiserror::Error;

/// SQLSTATE `08000` connection_exception.
pub const SQLSTATE_CONNECTION_EXCEPTION: &str = "08000";
/// SQLSTATE `08006` connection_failure.
pub const SQLSTATE_CONNECTION_FAILURE: &str = "08006";
/// SQLSTATE `08P01` protocol_violation.
pub const SQLSTATE_PROTOCOL_VIOLATION: &str = "08P01";
/// SQLSTATE `0A000` feature_not_supported.
pub const SQLSTATE_FEATURE_NOT_SUPPORTED: &str = "0A000";

/// Error type for all dsql-pgadapter operations.
#[derive(Debug, Error, Clone)]
pub enum AdapterError {
    /// I/O error, including end-of-stream while a message was expected.
    ///
    /// Note: `std::io::Error` is not `Clone`, so we store the message.
    #[error("io error: {0}")]
    Io(String),

    /// Protocol error - malformed message or unexpected message for the current state.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The peer asked for something this proxy does not implement (cancel requests).
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// Backend returned an ErrorResponse.
    #[error("server error: {message} (SQLSTATE {code})")]
    Server { code: String, message: String },

    /// Authentication error - backend asked for a method we cannot satisfy.
    #[error("authentication error: {0}")]
    Auth(String),

    /// TLS error - SSLRequest rejected, handshake failure, certificate issues.
    #[error("tls error: {0}")]
    Tls(String),

    /// Backend TCP connection could not be established.
    #[error("connect error: {0}")]
    Connect(String),

    /// Authentication token could not be produced.
    #[error("credential error: {0}")]
    Credential(String),

    /// Invalid or incomplete configuration.
    #[error("config error: {0}")]
    Config(String),

    #[error("adapter is already running")]
    AlreadyRunning,

    #[error("adapter is closed")]
    Closed,

    /// The session or adapter was cancelled while waiting.
    #[error("operation cancelled")]
    Cancelled,

    /// Task error - a spawned task panicked or was aborted.
    #[error("task error: {0}")]
    Task(String),
}

impl AdapterError {
    /// Returns `true` if this is an I/O error.
    #[inline]
    pub fn is_io(&self) -> bool {
        matches!(self, AdapterError::Io(_))
    }

    /// Returns `true` if this is a protocol error.
    #[inline]
    pub fn is_protocol(&self) -> bool {
        matches!(self, AdapterError::Protocol(_))
    }

    /// Returns `true` if this is a backend error response.
    #[inline]
    pub fn is_server(&self) -> bool {
        matches!(self, AdapterError::Server { .. })
    }

    /// Returns `true` if this is a TLS error.
    #[inline]
    pub fn is_tls(&self) -> bool {
        matches!(self, AdapterError::Tls(_))
    }

    /// Returns `true` if no token could be produced for the backend.
    #[inline]
    pub fn is_credential(&self) -> bool {
        matches!(self, AdapterError::Credential(_))
    }

    /// Returns `true` if this is an unsupported-operation error.
    #[inline]
    pub fn is_unsupported(&self) -> bool {
        matches!(self, AdapterError::Unsupported(_))
    }

    /// Returns `true` if this error happened before a working backend stream existed,
    /// i.e. the backend could not be reached at all.
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            AdapterError::Io(_)
                | AdapterError::Tls(_)
                | AdapterError::Connect(_)
                | AdapterError::Credential(_)
        )
    }

    /// Returns `true` if this error is likely transient and retryable.
    ///
    /// Transient errors include I/O, connect and token errors. Non-transient
    /// errors (auth, server, protocol) typically require configuration changes.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AdapterError::Io(_)
                | AdapterError::Connect(_)
                | AdapterError::Credential(_)
                | AdapterError::Task(_)
        )
    }

    /// SQLSTATE and message to report to a client when a backend attach fails.
    ///
    /// Backend error responses keep their own code; connectivity failures map to
    /// `08006`, everything else to `08000`.
    pub fn client_error(&self) -> (&str, String) {
        match self {
            AdapterError::Server { code, message } => (code.as_str(), message.clone()),
            e if e.is_connectivity() => (SQLSTATE_CONNECTION_FAILURE, e.to_string()),
            AdapterError::Unsupported(_) => (SQLSTATE_FEATURE_NOT_SUPPORTED, self.to_string()),
            _ => (SQLSTATE_CONNECTION_EXCEPTION, self.to_string()),
        }
    }
}

// Manual From impl since io::Error isn't Clone
impl From<std::io::Error> for AdapterError {
    fn from(err: std::io::Error) -> Self {
        AdapterError::Io(err.to_string())
    }
}

/// Result type alias for dsql-pgadapter operations.
pub type Result<T> = std::result::Result<T, AdapterError>;
