//! TLS sessions over a caller-owned transport.
//!
//! The service runs the TLS engine; the session moves ciphertext between it
//! and the transport. A command that needs socket I/O comes back as a
//! [`Reply::Pending`] directive: write what it carries, read more ciphertext
//! if asked, hand that to the service and issue the command again.

use std::io;

use sslc_common::{
    protocol::{Command, Reply, TransportDirective, MAX_TRANSFER_SIZE},
    SslOptions,
};

use crate::{
    service::unexpected,
    transport::{wait_ready, Readiness},
    ClientCertContext, Result, RootCertChain, ServiceConnection, SslcError, Transport,
};

/// Local view of a session's progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created and configurable, no handshake yet
    Created,
    Handshaking,
    Established,
    /// The peer closed the stream
    Closed,
    /// The handshake or a transfer failed
    Failed,
}

/// Extra results of a successful handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionInfo {
    /// Engine return value, zero on success
    pub internal_retval: i32,
    /// Service-defined word, the same encoding as
    /// [`TlsSession::get_state`]
    pub out:             u32,
}

/// Releases the remote context unless the session was destroyed explicitly
struct ContextGuard<'c> {
    conn:     &'c ServiceConnection,
    id:       u32,
    released: bool,
}

impl ContextGuard<'_> {
    fn release(&mut self) -> Result<()> {
        self.released = true;
        self.conn.call_ack(Command::DestroyContext { context: self.id })
    }
}

impl Drop for ContextGuard<'_> {
    fn drop(&mut self) {
        if !self.released {
            if let Err(e) = self.release() {
                tracing::debug!("Failed to release context {}: {}", self.id, e);
            }
        }
    }
}

/// A TLS session bound to a transport owned by the caller.
///
/// The transport is only read and written, never closed. [`destroy`]
/// releases the remote context and hands it back.
///
/// [`destroy`]: TlsSession::destroy
pub struct TlsSession<'c, T: Transport> {
    transport: T,
    guard:     ContextGuard<'c>,
    options:   SslOptions,
    state:     SessionState,
}

impl<'c, T: Transport> TlsSession<'c, T> {
    /// Create a session for `hostname` over `transport`.
    ///
    /// Fails with [`SslcError::InvalidArgument`] when the hostname is empty
    /// or not a valid server name, or the transport is not usable.
    pub fn create(
        conn: &'c ServiceConnection,
        transport: T,
        options: SslOptions,
        hostname: &str,
    ) -> Result<Self> {
        if hostname.is_empty() {
            return Err(SslcError::InvalidArgument("hostname must not be empty".into()));
        }
        if !transport.is_usable() {
            return Err(SslcError::InvalidArgument("transport is not usable".into()));
        }

        let id = conn.call_handle(Command::CreateContext {
            options,
            hostname: hostname.to_string(),
        })?;
        tracing::debug!("Created context {} for {}", id, hostname);

        Ok(Self {
            transport,
            guard: ContextGuard {
                conn,
                id,
                released: false,
            },
            options,
            state: SessionState::Created,
        })
    }

    /// Id of the remote context
    pub fn id(&self) -> u32 {
        self.guard.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Options as last set from this side
    pub fn options(&self) -> SslOptions {
        self.options
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Trust `chain` when verifying the server. The id is resolved when the
    /// handshake starts.
    pub fn set_root_cert_chain(&mut self, chain: RootCertChain) -> Result<()> {
        self.conn().call_ack(Command::ContextSetRootCertChain {
            context: self.id(),
            chain:   chain.id(),
        })
    }

    /// Present `cert` if the server asks for a client certificate
    pub fn set_client_cert(&mut self, cert: ClientCertContext) -> Result<()> {
        self.conn().call_ack(Command::ContextSetClientCert {
            context:     self.id(),
            client_cert: cert.id(),
        })
    }

    /// Attach an opaque handle that travels with the context
    pub fn set_auxiliary_handle(&mut self, handle: u32) -> Result<()> {
        self.conn().call_ack(Command::ContextSetHandle8 {
            context: self.id(),
            handle,
        })
    }

    /// Clear every option bit set in `mask`
    pub fn clear_options(&mut self, mask: SslOptions) -> Result<()> {
        self.conn().call_ack(Command::ContextClearOpt {
            context: self.id(),
            bitmask: mask,
        })?;
        self.options = self.options.without(mask);
        Ok(())
    }

    /// Run the handshake to completion.
    ///
    /// Blocks until the handshake succeeds or fails, waiting on a
    /// non-blocking transport as needed. Transport errors, timeouts set on the
    /// socket and end of stream count as handshake failures and leave the
    /// session [`SessionState::Failed`].
    pub fn start_connection(&mut self) -> Result<ConnectionInfo> {
        let previous = self.state;
        if previous == SessionState::Created {
            self.state = SessionState::Handshaking;
        }

        let mut first_round = true;
        loop {
            let reply = match self.command(Command::StartConnection { context: self.id() }) {
                Ok(reply) => reply,
                // Rejected before anything was sent, e.g. an unknown chain id
                Err(e) if first_round && !matches!(e, SslcError::HandshakeFailure { .. }) => {
                    self.state = previous;
                    return Err(e);
                }
                Err(e) => return Err(e),
            };
            first_round = false;

            match reply {
                Reply::Pending(directive) => self.exchange(&directive, Self::abort_handshake)?,
                Reply::Connected {
                    outgoing,
                    internal_retval,
                    out,
                } => {
                    if let Err(e) = self.send_ciphertext(&outgoing) {
                        return Err(self.abort_handshake(e));
                    }
                    self.state = SessionState::Established;
                    tracing::debug!("Context {} established, state {:#x}", self.id(), out);
                    return Ok(ConnectionInfo {
                        internal_retval,
                        out,
                    });
                }
                other => return Err(unexpected("StartConnection", &other)),
            }
        }
    }

    /// Read decrypted data into `buf`.
    ///
    /// With `peek` the data stays buffered for the next read. Returns the
    /// number of bytes read; `0` means the peer closed the stream. A transport
    /// failure is a [`SslcError::TransferError`] and fails the session.
    pub fn read(&mut self, buf: &mut [u8], peek: bool) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        let len = buf.len().min(MAX_TRANSFER_SIZE) as u32;
        loop {
            let reply = self.command(Command::Read {
                context: self.id(),
                len,
                peek,
            })?;

            match reply {
                Reply::Data { bytes, outgoing } => {
                    if let Err(e) = self.send_ciphertext(&outgoing) {
                        return Err(self.abort_transfer(e));
                    }
                    let n = bytes.len().min(buf.len());
                    buf[..n].copy_from_slice(&bytes[..n]);
                    if n == 0 {
                        self.state = SessionState::Closed;
                    }
                    return Ok(n);
                }
                Reply::Pending(directive) => self.exchange(&directive, Self::abort_transfer)?,
                other => return Err(unexpected("Read", &other)),
            }
        }
    }

    /// Encrypt and send up to 0x4000 bytes of `buf`. Returns the number of
    /// bytes accepted. A transport failure is a [`SslcError::TransferError`]
    /// and fails the session.
    pub fn write(&mut self, buf: &[u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        let chunk = &buf[..buf.len().min(MAX_TRANSFER_SIZE)];
        let reply = self.command(Command::Write {
            context: self.id(),
            data:    chunk.to_vec(),
        })?;

        match reply {
            Reply::Written { count, outgoing } => {
                if let Err(e) = self.send_ciphertext(&outgoing) {
                    return Err(self.abort_transfer(e));
                }
                Ok(count as usize)
            }
            other => Err(unexpected("Write", &other)),
        }
    }

    /// Service-defined state word: state code in the low byte, negotiated
    /// protocol version in the upper 16 bits
    pub fn get_state(&self) -> Result<u32> {
        match self
            .conn()
            .call(Command::ContextGetState { context: self.id() })?
        {
            Reply::State(word) => Ok(word),
            other => Err(unexpected("ContextGetState", &other)),
        }
    }

    /// Release the remote context and return the transport. Always hands the
    /// transport back; a failed release is only logged.
    pub fn destroy(self) -> T {
        let Self {
            transport,
            mut guard,
            ..
        } = self;
        if let Err(e) = guard.release() {
            tracing::debug!("Failed to release context {}: {}", guard.id, e);
        }
        transport
    }

    fn conn(&self) -> &'c ServiceConnection {
        self.guard.conn
    }

    /// Issue a session command. A failure reply has any alert it carries
    /// written to the peer first, and a handshake or transfer failure leaves
    /// the session failed.
    fn command(&mut self, command: Command) -> Result<Reply> {
        match self.conn().request(command)? {
            Reply::Error {
                code,
                message,
                diagnostic,
                outgoing,
            } => {
                if let Err(e) = self.send_ciphertext(&outgoing) {
                    tracing::debug!("Failed to send alert for context {}: {}", self.id(), e);
                }
                let err = SslcError::from_remote(code, message, diagnostic);
                if matches!(
                    err,
                    SslcError::HandshakeFailure { .. } | SslcError::TransferError(_)
                ) {
                    self.state = SessionState::Failed;
                }
                Err(err)
            }
            reply => Ok(reply),
        }
    }

    fn send_ciphertext(&mut self, mut outgoing: &[u8]) -> io::Result<()> {
        while !outgoing.is_empty() {
            match self.transport.write(outgoing) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => outgoing = &outgoing[n..],
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    wait_ready(&self.transport, Readiness::Writable, e)?;
                }
                Err(e) => return Err(e),
            }
        }
        loop {
            match self.transport.flush() {
                Ok(()) => return Ok(()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    wait_ready(&self.transport, Readiness::Writable, e)?;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Read whatever ciphertext the transport has, up to one record's worth.
    /// An empty result is end of stream.
    fn receive_ciphertext(&mut self) -> io::Result<Vec<u8>> {
        let mut incoming = vec![0u8; MAX_TRANSFER_SIZE];
        loop {
            match self.transport.read(&mut incoming) {
                Ok(n) => {
                    incoming.truncate(n);
                    return Ok(incoming);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    wait_ready(&self.transport, Readiness::Readable, e)?;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Carry out one transport directive. `abort` turns a transport failure
    /// into the error for the operation in progress.
    fn exchange(
        &mut self,
        directive: &TransportDirective,
        abort: fn(&mut Self, io::Error) -> SslcError,
    ) -> Result<()> {
        if let Err(e) = self.send_ciphertext(&directive.outgoing) {
            return Err(abort(self, e));
        }
        if !directive.wants_read {
            return Ok(());
        }

        let incoming = match self.receive_ciphertext() {
            Ok(incoming) => incoming,
            Err(e) => return Err(abort(self, e)),
        };
        match self.command(Command::SupplyTransport {
            context: self.id(),
            incoming,
        })? {
            Reply::Ack => Ok(()),
            other => Err(unexpected("SupplyTransport", &other)),
        }
    }

    /// Tell the service the transport is gone so its context fails too.
    /// Returns the failure it reports back.
    fn report_transport_failure(&self, err: &io::Error) -> Option<SslcError> {
        self.conn()
            .call(Command::TransportFailed {
                context: self.id(),
                reason:  err.to_string(),
            })
            .err()
    }

    fn abort_handshake(&mut self, err: io::Error) -> SslcError {
        tracing::warn!("Transport failed during handshake: {}", err);
        let diagnostic = self
            .report_transport_failure(&err)
            .and_then(|e| e.diagnostic());
        self.state = SessionState::Failed;
        SslcError::HandshakeFailure {
            diagnostic,
            message: format!("transport error: {err}"),
        }
    }

    fn abort_transfer(&mut self, err: io::Error) -> SslcError {
        tracing::warn!("Transport failed on context {}: {}", self.id(), err);
        self.report_transport_failure(&err);
        self.state = SessionState::Failed;
        SslcError::TransferError(format!("transport error: {err}"))
    }
}
