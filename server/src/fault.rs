use std::fmt;

use sslc_common::protocol::{HandleKind, Reply, ResultCode};

/// A command failure, sent back to the client as [`Reply::Error`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fault {
    pub code:       ResultCode,
    pub message:    String,
    pub diagnostic: Option<i32>,
    /// Ciphertext still owed to the peer, usually an alert
    pub outgoing:   Vec<u8>,
}

impl Fault {
    pub fn new<S: Into<String>>(code: ResultCode, message: S) -> Self {
        Self {
            code,
            message: message.into(),
            diagnostic: None,
            outgoing: Vec::new(),
        }
    }

    pub fn invalid_handle(kind: HandleKind, id: u32) -> Self {
        Self::new(ResultCode::InvalidHandle(kind), format!("unknown {kind} {id}"))
    }

    pub fn invalid_argument<S: Into<String>>(message: S) -> Self {
        Self::new(ResultCode::InvalidArgument, message)
    }

    pub fn invalid_state<S: Into<String>>(message: S) -> Self {
        Self::new(ResultCode::InvalidState, message)
    }

    pub fn exhausted<S: Into<String>>(message: S) -> Self {
        Self::new(ResultCode::ResourceExhausted, message)
    }

    pub fn internal<E: fmt::Display>(err: E) -> Self {
        Self::new(ResultCode::Internal, err.to_string())
    }

    pub fn with_diagnostic(mut self, diagnostic: Option<i32>) -> Self {
        self.diagnostic = diagnostic;
        self
    }

    pub fn with_outgoing(mut self, outgoing: Vec<u8>) -> Self {
        self.outgoing = outgoing;
        self
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.code, self.message)?;
        if let Some(code) = self.diagnostic {
            write!(f, " (diagnostic {code:#x})")?;
        }
        Ok(())
    }
}

impl From<Fault> for Reply {
    fn from(fault: Fault) -> Self {
        Reply::Error {
            code:       fault.code,
            message:    fault.message,
            diagnostic: fault.diagnostic,
            outgoing:   fault.outgoing,
        }
    }
}
