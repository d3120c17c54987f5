use std::time::Duration;

use thiserror::Error;

/// Errors surfaced by the pooling and failover layer
#[derive(Error, Debug)]
pub enum PoolError {
    /// Invalid pool sizing or a malformed endpoint. Raised synchronously at
    /// configure/construction time and never partially applied.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// The transport builder failed to produce a connection. Retryable from
    /// the caller's point of view.
    #[error("failed to create connection to {endpoint}: {reason}")]
    ConnectionFailed { endpoint: String, reason: String },

    /// The pool (or manager) has been shut down; no new channels are handed out.
    #[error("connection pool is closed")]
    PoolClosed,

    /// The full failover pass and the designated-primary last resort both
    /// failed to yield a handle.
    #[error("all endpoints exhausted: {0}")]
    EndpointExhausted(String),

    /// Timed out waiting for a connection to be established.
    #[error("connection attempt timed out after {0:?}")]
    ConnectTimeout(Duration),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TLS error: {0}")]
    Tls(#[from] native_tls::Error),
}

impl PoolError {
    /// Whether the caller may reasonably retry the operation that produced
    /// this error (possibly against another endpoint).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PoolError::ConnectionFailed { .. } | PoolError::ConnectTimeout(_) | PoolError::Io(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, PoolError>;
