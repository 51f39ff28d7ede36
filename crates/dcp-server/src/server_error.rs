//! Driver-level error types.
//!
//! Provides strongly-typed errors for the parts of server operation that
//! sit below the top-level [`crate::error::ServerError`]: session lookup,
//! command dispatch, and credential store access.

use std::fmt;

use crate::credentials::StoreError;

/// Errors that can occur during driver-level operations.
#[derive(Debug)]
pub enum ServerError {
    /// Session not found in the connection map.
    ///
    /// Occurs when trying to send to or query a session that doesn't exist.
    /// May be transient if the session was just disconnected.
    SessionNotFound(u64),

    /// Session already registered.
    ///
    /// Attempting to register a session ID that already exists. This is a
    /// logic bug - session IDs should be unique.
    SessionAlreadyExists(u64),

    /// Command dispatch failed.
    ///
    /// Wraps errors from [`dcp_core::DispatchError`]. Most variants are
    /// non-fatal and produce an `error` frame rather than closing the
    /// session; see [`dcp_core::DispatchError::fatal`].
    Dispatch(dcp_core::DispatchError),

    /// Credential store operation failed.
    Credential(StoreError),

    /// Connection error during send.
    ///
    /// Failed to send a frame to a client. The transport may be closed or
    /// broken. Transient - the client can reconnect and retry.
    ConnectionFailed {
        /// Session that failed.
        session_id: u64,
        /// Error message.
        reason: String,
    },
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SessionNotFound(id) => write!(f, "session not found: {id}"),
            Self::SessionAlreadyExists(id) => write!(f, "session already exists: {id}"),
            Self::Dispatch(err) => write!(f, "dispatch error: {err}"),
            Self::Credential(err) => write!(f, "credential store error: {err}"),
            Self::ConnectionFailed { session_id, reason } => {
                write!(f, "connection failed for session {session_id}: {reason}")
            },
        }
    }
}

impl std::error::Error for ServerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Dispatch(err) => Some(err),
            Self::Credential(err) => Some(err),
            _ => None,
        }
    }
}

impl From<dcp_core::DispatchError> for ServerError {
    fn from(err: dcp_core::DispatchError) -> Self {
        Self::Dispatch(err)
    }
}

impl From<StoreError> for ServerError {
    fn from(err: StoreError) -> Self {
        Self::Credential(err)
    }
}

/// Errors from action execution (the runtime loop that turns
/// [`crate::driver::ServerAction`]s into transport writes).
#[derive(Debug)]
pub enum ExecutorError {
    /// Send to session failed.
    ///
    /// Failed to write a frame to a client's socket. The transport may be
    /// closed, broken, or the peer may be slow to drain. Transient - the
    /// client can reconnect.
    SendFailed {
        /// Session that failed.
        session_id: u64,
        /// Error message.
        reason: String,
    },

    /// Low-level transport error (TLS handshake, socket I/O).
    Transport(String),
}

impl fmt::Display for ExecutorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SendFailed { session_id, reason } => {
                write!(f, "send failed for session {session_id}: {reason}")
            },
            Self::Transport(msg) => write!(f, "transport error: {msg}"),
        }
    }
}

impl std::error::Error for ExecutorError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_error_display() {
        let err = ServerError::SessionNotFound(42);
        assert_eq!(err.to_string(), "session not found: 42");

        let err = ServerError::ConnectionFailed { session_id: 1, reason: "timeout".to_string() };
        assert_eq!(err.to_string(), "connection failed for session 1: timeout");
    }

    #[test]
    fn executor_error_display() {
        let err = ExecutorError::SendFailed { session_id: 42, reason: "closed".to_string() };
        assert_eq!(err.to_string(), "send failed for session 42: closed");
    }

    #[test]
    fn dispatch_errors_convert_and_wrap() {
        let err: ServerError = dcp_core::DispatchError::NoSuchTarget.into();
        assert_eq!(err.to_string(), "dispatch error: No such target");
    }
}
