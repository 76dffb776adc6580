//! Error types for pgwire-notify.
//!
//! All errors in this crate are represented by [`PgNotifyError`], which covers:
//! - I/O errors (network, socket readiness registration)
//! - Protocol errors (malformed messages, unexpected responses)
//! - Server errors (PostgreSQL error responses)
//! - Authentication and TLS errors raised while connecting
//! - Wait errors: no socket to wait on, or the wait was interrupted
//!
//! Failures raised deep inside a generic wait or ingest step are wrapped with
//! the name of the public operation that started it (see [`PgNotifyError::in_op`]).

use thiserror::Error;

/// Error type for all pgwire-notify operations.
#[derive(Debug, Error, Clone)]
pub enum PgNotifyError {
    /// I/O error (network, readiness registration).
    ///
    /// Note: `std::io::Error` is not `Clone`, so we store the message.
    #[error("io error: {0}")]
    Io(String),

    /// Protocol error - malformed message or unexpected response.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Server error - PostgreSQL returned an error response.
    ///
    /// The message typically includes SQLSTATE code.
    #[error("server error: {0}")]
    Server(String),

    /// Authentication error - wrong credentials or unsupported method.
    #[error("authentication error: {0}")]
    Auth(String),

    /// TLS error - handshake failure, certificate validation, etc.
    #[error("tls error: {0}")]
    Tls(String),

    /// The connection offers no socket to wait on (closed, or never opened).
    #[error("{op}: connection has no socket to wait on")]
    ResourceUnavailable { op: &'static str },

    /// A blocking wait was cancelled from outside.
    #[error("{op}: wait interrupted")]
    Interrupted { op: &'static str },

    /// An error raised inside a lower-level step, tagged with the public
    /// operation that was running.
    #[error("{op}: {source}")]
    Op {
        op: &'static str,
        #[source]
        source: Box<PgNotifyError>,
    },

    /// Internal error - bug in the library.
    #[error("internal error: {0}")]
    Internal(String),
}

impl PgNotifyError {
    /// Tag this error with the operation it surfaced from.
    ///
    /// Errors that already carry an operation name are returned unchanged, so
    /// the innermost (first) tag wins.
    pub fn in_op(self, op: &'static str) -> Self {
        match self {
            e @ (PgNotifyError::ResourceUnavailable { .. }
            | PgNotifyError::Interrupted { .. }
            | PgNotifyError::Op { .. }) => e,
            other => PgNotifyError::Op {
                op,
                source: Box::new(other),
            },
        }
    }

    /// The operation name attached to this error, if any.
    pub fn op(&self) -> Option<&'static str> {
        match self {
            PgNotifyError::ResourceUnavailable { op }
            | PgNotifyError::Interrupted { op }
            | PgNotifyError::Op { op, .. } => Some(op),
            _ => None,
        }
    }

    /// The error with any operation tag stripped.
    pub fn root(&self) -> &PgNotifyError {
        match self {
            PgNotifyError::Op { source, .. } => source.root(),
            other => other,
        }
    }

    /// Returns `true` if this is an I/O error.
    #[inline]
    pub fn is_io(&self) -> bool {
        matches!(self.root(), PgNotifyError::Io(_))
    }

    /// Returns `true` if this is a server error.
    #[inline]
    pub fn is_server(&self) -> bool {
        matches!(self.root(), PgNotifyError::Server(_))
    }

    /// Returns `true` if this is an authentication error.
    #[inline]
    pub fn is_auth(&self) -> bool {
        matches!(self.root(), PgNotifyError::Auth(_))
    }

    /// Returns `true` if this is a TLS error.
    #[inline]
    pub fn is_tls(&self) -> bool {
        matches!(self.root(), PgNotifyError::Tls(_))
    }

    /// Returns `true` if a wait was cancelled.
    #[inline]
    pub fn is_interrupted(&self) -> bool {
        matches!(self.root(), PgNotifyError::Interrupted { .. })
    }

    /// Returns `true` if there was no socket to wait on.
    #[inline]
    pub fn is_resource_unavailable(&self) -> bool {
        matches!(self.root(), PgNotifyError::ResourceUnavailable { .. })
    }

    /// Returns `true` if this error is likely transient and retryable.
    ///
    /// I/O errors and interrupted waits leave the connection usable for a
    /// later call. Auth, server and protocol errors typically do not.
    pub fn is_transient(&self) -> bool {
        matches!(
            self.root(),
            PgNotifyError::Io(_) | PgNotifyError::Interrupted { .. }
        )
    }
}

// Manual From impl since io::Error isn't Clone
impl From<std::io::Error> for PgNotifyError {
    fn from(err: std::io::Error) -> Self {
        PgNotifyError::Io(err.to_string())
    }
}

/// Result type alias for pgwire-notify operations.
pub type Result<T> = std::result::Result<T, PgNotifyError>;

#[cfg(test)]
mod tests {
    use super::PgNotifyError;

    #[test]
    fn in_op_wraps_plain_errors() {
        let err = PgNotifyError::Io("connection reset".into()).in_op("get_notification");
        assert_eq!(err.op(), Some("get_notification"));
        assert!(err.is_io());
        assert_eq!(
            err.to_string(),
            "get_notification: io error: connection reset"
        );
    }

    #[test]
    fn in_op_keeps_the_first_tag() {
        let err = PgNotifyError::Protocol("bad frame".into())
            .in_op("execute")
            .in_op("listen");
        assert_eq!(err.op(), Some("execute"));

        let err = PgNotifyError::Interrupted {
            op: "get_notification",
        }
        .in_op("other");
        assert_eq!(err.op(), Some("get_notification"));
        assert!(err.is_interrupted());
    }

    #[test]
    fn transient_classification() {
        assert!(PgNotifyError::Io("x".into()).in_op("op").is_transient());
        assert!(PgNotifyError::Interrupted { op: "op" }.is_transient());
        assert!(!PgNotifyError::Auth("x".into()).is_transient());
        assert!(!PgNotifyError::ResourceUnavailable { op: "op" }.is_transient());
    }
}
