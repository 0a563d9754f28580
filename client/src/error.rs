use sslc_common::protocol::{HandleKind, ResultCode};
use thiserror::Error;

/// Result type for SSLC operations
pub type Result<T> = std::result::Result<T, SslcError>;

/// Errors reported by SSLC operations
#[derive(Debug, Error)]
pub enum SslcError {
    /// The service endpoint could not be reached or rejected the client
    #[error("TLS service unavailable: {0}")]
    ServiceUnavailable(String),

    /// An id that the service does not know, or that belongs elsewhere
    #[error("invalid {kind} handle: {message}")]
    InvalidHandle { kind: HandleKind, message: String },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The operation is not legal in the session's current state
    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("certificate could not be parsed: {0}")]
    CertFormat(String),

    #[error("private key could not be parsed: {0}")]
    KeyFormat(String),

    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("request too large: {0}")]
    RequestTooLarge(String),

    /// The handshake did not complete. `diagnostic` is the service's
    /// internal code for the failure when it has one.
    #[error("handshake failed: {message}")]
    HandshakeFailure {
        diagnostic: Option<i32>,
        message:    String,
    },

    /// Failure moving application data after the handshake, in the engine
    /// or on the transport
    #[error("transfer failed: {0}")]
    TransferError(String),

    /// Any other failure reported by the service
    #[error("service error: {0}")]
    Service(String),

    /// The service sent a reply that does not fit the request
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl SslcError {
    /// Map a failure reported by the service onto the public error kinds
    pub(crate) fn from_remote(code: ResultCode, message: String, diagnostic: Option<i32>) -> Self {
        match code {
            ResultCode::InvalidHandle(kind) => Self::InvalidHandle { kind, message },
            ResultCode::InvalidArgument => Self::InvalidArgument(message),
            ResultCode::InvalidState => Self::InvalidState(message),
            ResultCode::CertFormat => Self::CertFormat(message),
            ResultCode::KeyFormat => Self::KeyFormat(message),
            ResultCode::ResourceExhausted => Self::ResourceExhausted(message),
            ResultCode::RequestTooLarge => Self::RequestTooLarge(message),
            ResultCode::HandshakeFailure => Self::HandshakeFailure {
                diagnostic,
                message,
            },
            ResultCode::TransferError => Self::TransferError(message),
            ResultCode::UnsupportedVersion => Self::ServiceUnavailable(message),
            ResultCode::Internal => Self::Service(message),
        }
    }

    /// Service diagnostic attached to a handshake failure
    pub fn diagnostic(&self) -> Option<i32> {
        match self {
            Self::HandshakeFailure { diagnostic, .. } => *diagnostic,
            _ => None,
        }
    }
}
