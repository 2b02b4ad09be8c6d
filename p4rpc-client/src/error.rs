//! Client error types.

use p4rpc_protocol::{CharsetError, FunctionError, ProtocolError, ServerMessage};
use thiserror::Error;

/// How far an error reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The connection must be dropped and re-established.
    Connection,
    /// Only the current command failed; the connection stays usable.
    Command,
}

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("unknown function: {0}")]
    Function(#[from] FunctionError),

    #[error("charset error: {0}")]
    Charset(#[from] CharsetError),

    #[error("not connected")]
    NotConnected,

    #[error("connection closed")]
    ConnectionClosed,

    #[error("connection is no longer usable")]
    ConnectionUnusable,

    #[error("request timeout")]
    Timeout,

    #[error("command cancelled")]
    Cancelled,

    #[error("server error: {}", .0.first().map(|m| m.text.as_str()).unwrap_or("command failed"))]
    Server(Vec<ServerMessage>),

    #[error("invalid server address: {0}")]
    InvalidAddress(String),

    #[error("TLS configuration error: {0}")]
    TlsConfig(String),

    #[error("TLS handshake failed: {0}")]
    TlsHandshake(String),

    #[error("compression error: {0}")]
    Compression(String),
}

impl ClientError {
    /// Returns the reach of this error.
    pub fn class(&self) -> ErrorClass {
        if self.is_connection_fatal() {
            ErrorClass::Connection
        } else {
            ErrorClass::Command
        }
    }

    /// Returns whether the connection must be re-established.
    pub fn is_connection_fatal(&self) -> bool {
        match self {
            ClientError::Protocol(e) => e.is_connection_fatal(),
            ClientError::Function(_)
            | ClientError::Charset(_)
            | ClientError::Server(_)
            | ClientError::InvalidAddress(_)
            | ClientError::TlsConfig(_) => false,
            // Cancelling leaves the stream mid-command, so it lands here too.
            _ => true,
        }
    }

    /// Returns whether a fresh connection could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ClientError::Io(_)
                | ClientError::Timeout
                | ClientError::ConnectionClosed
                | ClientError::ConnectionUnusable
        )
    }
}
