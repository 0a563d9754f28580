//! Per-session TLS engine.
//!
//! The service never touches the session's socket. It runs a
//! [`ClientConnection`] over in-memory buffers and tells the client which
//! ciphertext to write and when to read more, then resumes once the client
//! supplies the bytes.

use std::{
    io::{self, Read, Write},
    sync::Arc,
};

use rustls::{
    crypto::CryptoProvider, pki_types::ServerName, CertificateError, ClientConfig,
    ClientConnection, RootCertStore, SupportedProtocolVersion,
};
use sslc_common::{
    protocol::{Reply, ResultCode, TransportDirective},
    SslOptions,
};

use crate::{fault::Fault, identity::ClientIdentity, verifier::AcceptAnyServerCert};

/// The engine has nothing older than TLS 1.2
static LEGACY_VERSIONS: &[&SupportedProtocolVersion] = &[&rustls::version::TLS12];

/// Diagnostic reported when the transport hits end of stream mid-handshake
pub const DIAG_TRANSPORT_CLOSED: i32 = -0x700;

/// Diagnostic reported when the client could not read or write the transport
pub const DIAG_TRANSPORT_FAILED: i32 = -0x701;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    Created,
    Handshaking,
    Established,
    Failed,
}

impl ContextState {
    /// Low byte of the state word
    pub const fn code(self) -> u32 {
        match self {
            Self::Created => 0,
            Self::Handshaking => 1,
            Self::Established => 2,
            Self::Failed => 3,
        }
    }
}

/// Server-side state of one sslc context
#[derive(Debug)]
pub struct TlsContext {
    hostname:    ServerName<'static>,
    options:     SslOptions,
    root_chain:  Option<u32>,
    client_cert: Option<u32>,
    handle8:     Option<u32>,
    state:       ContextState,
    conn:        Option<ClientConnection>,
    plaintext:   Vec<u8>,
    peer_closed: bool,
    diagnostic:  Option<i32>,
}

impl TlsContext {
    pub fn new(hostname: &str, options: SslOptions) -> Result<Self, Fault> {
        if hostname.is_empty() {
            return Err(Fault::invalid_argument("hostname must not be empty"));
        }
        let hostname = ServerName::try_from(hostname.to_string())
            .map_err(|e| Fault::invalid_argument(format!("invalid hostname {hostname:?}: {e}")))?;

        Ok(Self {
            hostname,
            options,
            root_chain: None,
            client_cert: None,
            handle8: None,
            state: ContextState::Created,
            conn: None,
            plaintext: Vec::new(),
            peer_closed: false,
            diagnostic: None,
        })
    }

    pub fn state(&self) -> ContextState {
        self.state
    }

    pub fn options(&self) -> SslOptions {
        self.options
    }

    pub fn root_chain(&self) -> Option<u32> {
        self.root_chain
    }

    pub fn client_cert(&self) -> Option<u32> {
        self.client_cert
    }

    pub fn handle8(&self) -> Option<u32> {
        self.handle8
    }

    pub fn set_root_chain(&mut self, chain: u32) {
        self.root_chain = Some(chain);
    }

    pub fn set_client_cert(&mut self, client_cert: u32) {
        self.client_cert = Some(client_cert);
    }

    pub fn set_handle8(&mut self, handle: u32) {
        self.handle8 = Some(handle);
    }

    pub fn clear_options(&mut self, mask: SslOptions) {
        self.options = self.options.without(mask);
    }

    /// `state code | negotiated protocol version << 16`
    pub fn state_word(&self) -> u32 {
        let version = self
            .conn
            .as_ref()
            .and_then(|conn| conn.protocol_version())
            .map(u16::from)
            .unwrap_or(0);
        self.state.code() | (u32::from(version) << 16)
    }

    /// Move from Created to Handshaking with a config captured now
    pub fn begin(&mut self, config: Arc<ClientConfig>) -> Result<(), Fault> {
        if self.state != ContextState::Created {
            return Err(Fault::invalid_state(format!(
                "cannot start a connection in state {:?}",
                self.state
            )));
        }

        let conn = ClientConnection::new(config, self.hostname.clone()).map_err(|e| {
            Fault::new(ResultCode::HandshakeFailure, format!("cannot start handshake: {e}"))
        })?;
        self.conn = Some(conn);
        self.state = ContextState::Handshaking;
        Ok(())
    }

    /// Advance the handshake as far as the supplied ciphertext allows
    pub fn drive_handshake(&mut self) -> Result<Reply, Fault> {
        match self.state {
            ContextState::Handshaking => {}
            ContextState::Failed => {
                return Err(Fault::new(ResultCode::HandshakeFailure, "handshake failed")
                    .with_diagnostic(self.diagnostic));
            }
            state => {
                return Err(Fault::invalid_state(format!(
                    "no handshake in progress in state {state:?}"
                )));
            }
        }

        let outgoing = self.take_outgoing()?;
        let handshaking = self.conn.as_ref().is_some_and(|conn| conn.is_handshaking());
        if handshaking {
            return Ok(Reply::Pending(TransportDirective {
                outgoing,
                wants_read: true,
            }));
        }

        self.state = ContextState::Established;
        tracing::info!(
            "Handshake with {:?} complete, state word {:#x}",
            self.hostname,
            self.state_word()
        );
        Ok(Reply::Connected {
            outgoing,
            internal_retval: 0,
            out: self.state_word(),
        })
    }

    /// Feed ciphertext read from the transport; empty input is end of stream
    pub fn supply(&mut self, incoming: &[u8]) -> Result<Reply, Fault> {
        let Some(conn) = self.conn.as_mut() else {
            return Err(Fault::invalid_state("connection not started"));
        };

        if incoming.is_empty() {
            self.peer_closed = true;
            if self.state == ContextState::Handshaking {
                return Err(self.fail(
                    Some(DIAG_TRANSPORT_CLOSED),
                    "transport closed during handshake".to_string(),
                ));
            }
            return Ok(Reply::Ack);
        }

        let mut cursor = incoming;
        while !cursor.is_empty() {
            if let Err(e) = conn.read_tls(&mut cursor) {
                return Err(self.fail(None, format!("failed to buffer ciphertext: {e}")));
            }
            if let Err(e) = conn.process_new_packets() {
                let diagnostic = diagnostic_code(&e);
                return Err(self.fail(Some(diagnostic), e.to_string()));
            }
            if drain_plaintext(conn, &mut self.plaintext) {
                self.peer_closed = true;
            }
        }

        Ok(Reply::Ack)
    }

    /// The client lost its transport. Fails the context unless it already
    /// failed, and always answers with the failure.
    pub fn transport_failed(&mut self, reason: &str) -> Fault {
        match self.state {
            ContextState::Handshaking | ContextState::Established => {
                self.fail(Some(DIAG_TRANSPORT_FAILED), format!("transport failed: {reason}"))
            }
            ContextState::Failed => {
                let code = if self.conn.as_ref().is_some_and(|conn| conn.is_handshaking()) {
                    ResultCode::HandshakeFailure
                } else {
                    ResultCode::TransferError
                };
                Fault::new(code, format!("transport failed: {reason}"))
                    .with_diagnostic(self.diagnostic)
            }
            ContextState::Created => Fault::invalid_state("connection not started"),
        }
    }

    pub fn read(&mut self, len: usize, peek: bool) -> Result<Reply, Fault> {
        self.require_established()?;
        let outgoing = self.take_outgoing()?;

        if !self.plaintext.is_empty() {
            let n = len.min(self.plaintext.len());
            let bytes = if peek {
                self.plaintext[..n].to_vec()
            } else {
                self.plaintext.drain(..n).collect()
            };
            return Ok(Reply::Data { bytes, outgoing });
        }

        if self.peer_closed {
            return Ok(Reply::Data {
                bytes: Vec::new(),
                outgoing,
            });
        }

        Ok(Reply::Pending(TransportDirective {
            outgoing,
            wants_read: true,
        }))
    }

    pub fn write(&mut self, data: &[u8]) -> Result<Reply, Fault> {
        self.require_established()?;
        let conn = self
            .conn
            .as_mut()
            .ok_or_else(|| Fault::invalid_state("connection not started"))?;
        let count = conn.writer().write(data).map_err(|e| {
            Fault::new(ResultCode::TransferError, format!("failed to encrypt data: {e}"))
        })?;

        Ok(Reply::Written {
            count:    count as u32,
            outgoing: self.take_outgoing()?,
        })
    }

    fn require_established(&self) -> Result<(), Fault> {
        if self.state == ContextState::Established {
            Ok(())
        } else {
            Err(Fault::invalid_state(format!(
                "connection is not established (state {:?})",
                self.state
            )))
        }
    }

    fn take_outgoing(&mut self) -> Result<Vec<u8>, Fault> {
        let mut outgoing = Vec::new();
        if let Some(conn) = self.conn.as_mut() {
            while conn.wants_write() {
                conn.write_tls(&mut outgoing).map_err(Fault::internal)?;
            }
        }
        Ok(outgoing)
    }

    fn fail(&mut self, diagnostic: Option<i32>, message: String) -> Fault {
        let code = if self.state == ContextState::Established {
            ResultCode::TransferError
        } else {
            ResultCode::HandshakeFailure
        };
        tracing::warn!("Context for {:?} failed: {}", self.hostname, message);
        self.state = ContextState::Failed;
        self.diagnostic = diagnostic;
        // rustls queues an alert for the peer when it rejects a record
        let outgoing = self.take_outgoing().unwrap_or_default();
        Fault::new(code, message)
            .with_diagnostic(diagnostic)
            .with_outgoing(outgoing)
    }
}

/// Returns true once the peer has sent close_notify
fn drain_plaintext(conn: &mut ClientConnection, plaintext: &mut Vec<u8>) -> bool {
    let mut chunk = [0u8; 4096];
    loop {
        match conn.reader().read(&mut chunk) {
            Ok(0) => return true,
            Ok(n) => plaintext.extend_from_slice(&chunk[..n]),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return false,
            Err(_) => return true,
        }
    }
}

/// Build the rustls configuration for a handshake from the context's
/// parameters as they are right now
pub fn client_config(
    provider: &Arc<CryptoProvider>,
    options: SslOptions,
    roots: RootCertStore,
    identity: Option<ClientIdentity>,
) -> Result<Arc<ClientConfig>, Fault> {
    let versions = if options.contains(SslOptions::TLS_V10) {
        LEGACY_VERSIONS
    } else {
        rustls::DEFAULT_VERSIONS
    };

    let builder = ClientConfig::builder_with_provider(provider.clone())
        .with_protocol_versions(versions)
        .map_err(Fault::internal)?;

    let builder = if options.contains(SslOptions::DISABLE_VERIFY) {
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert::new(provider.clone())))
    } else {
        builder.with_root_certificates(roots)
    };

    let config = match identity {
        Some(identity) => builder
            .with_client_auth_cert(identity.certs, identity.key)
            .map_err(|e| Fault::new(ResultCode::KeyFormat, format!("unusable client cert: {e}")))?,
        None => builder.with_no_client_auth(),
    };

    Ok(Arc::new(config))
}

/// Implementation-defined code describing why a handshake or record failed
pub fn diagnostic_code(err: &rustls::Error) -> i32 {
    match err {
        rustls::Error::InvalidCertificate(CertificateError::UnknownIssuer) => -0x101,
        rustls::Error::InvalidCertificate(
            CertificateError::NotValidForName | CertificateError::NotValidForNameContext { .. },
        ) => -0x102,
        rustls::Error::InvalidCertificate(
            CertificateError::Expired | CertificateError::ExpiredContext { .. },
        ) => -0x103,
        rustls::Error::InvalidCertificate(_) => -0x100,
        rustls::Error::AlertReceived(alert) => -0x200 - i32::from(u8::from(*alert)),
        rustls::Error::PeerIncompatible(_) => -0x300,
        rustls::Error::PeerMisbehaved(_) => -0x400,
        rustls::Error::InvalidMessage(_) => -0x500,
        rustls::Error::NoCertificatesPresented => -0x600,
        _ => -1,
    }
}
