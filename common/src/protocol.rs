use std::{
    fmt,
    ops::{BitOr, BitOrAssign},
};

use serde::{Deserialize, Serialize};

/// Version sent with [`Command::Initialize`]
pub const PROTOCOL_VERSION: u32 = 1;

/// Largest plaintext transfer a single read or write command carries
pub const MAX_TRANSFER_SIZE: usize = 0x4000;

/// Session option bitmask
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct SslOptions(u32);

impl SslOptions {
    /// No options
    pub const DEFAULT: Self = Self(0);
    /// Disables server certificate verification
    pub const DISABLE_VERIFY: Self = Self(1 << 9);
    /// Requests the legacy protocol version
    pub const TLS_V10: Self = Self(1 << 11);

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns these options with every bit of `mask` cleared
    pub const fn without(self, mask: Self) -> Self {
        Self(self.0 & !mask.0)
    }
}

impl BitOr for SslOptions {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for SslOptions {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// Root certificates pre-provisioned in the service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum DefaultRootCert {
    NintendoCa = 0x1,
    NintendoCaG2 = 0x2,
    NintendoCaG3 = 0x3,
    NintendoClass2Ca = 0x4,
    NintendoClass2CaG2 = 0x5,
    NintendoClass2CaG3 = 0x6,
    CyberTrust = 0x7,
    AddTrustExternalCa = 0x8,
    Comodo = 0x9,
    UserTrust = 0xA,
    DigiCertEv = 0xB,
}

impl DefaultRootCert {
    pub const ALL: [Self; 11] = [
        Self::NintendoCa,
        Self::NintendoCaG2,
        Self::NintendoCaG3,
        Self::NintendoClass2Ca,
        Self::NintendoClass2CaG2,
        Self::NintendoClass2CaG3,
        Self::CyberTrust,
        Self::AddTrustExternalCa,
        Self::Comodo,
        Self::UserTrust,
        Self::DigiCertEv,
    ];

    pub const fn id(self) -> u32 {
        self as u32
    }

    pub fn from_id(id: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|cert| cert.id() == id)
    }

    /// Subject common name of the certificate
    pub const fn name(self) -> &'static str {
        match self {
            Self::NintendoCa => "Nintendo CA",
            Self::NintendoCaG2 => "Nintendo CA - G2",
            Self::NintendoCaG3 => "Nintendo CA - G3",
            Self::NintendoClass2Ca => "Nintendo Class 2 CA",
            Self::NintendoClass2CaG2 => "Nintendo Class 2 CA - G2",
            Self::NintendoClass2CaG3 => "Nintendo Class 2 CA - G3",
            Self::CyberTrust => "GTE CyberTrust Global Root",
            Self::AddTrustExternalCa => "AddTrust External CA Root",
            Self::Comodo => "COMODO RSA Certification Authority",
            Self::UserTrust => "USERTrust RSA Certification Authority",
            Self::DigiCertEv => "DigiCert High Assurance EV Root CA",
        }
    }
}

impl fmt::Display for DefaultRootCert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:x})", self.name(), self.id())
    }
}

/// Client identities pre-provisioned in the service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum DefaultClientCert {
    ClCertA = 0x40,
}

impl DefaultClientCert {
    pub const ALL: [Self; 1] = [Self::ClCertA];

    pub const fn id(self) -> u32 {
        self as u32
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::ClCertA => "ClCertA",
        }
    }
}

/// Family of a remote handle, reported with [`ResultCode::InvalidHandle`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HandleKind {
    RootCertChain,
    CertEntry,
    ClientCert,
    Context,
}

impl fmt::Display for HandleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::RootCertChain => "root cert chain",
            Self::CertEntry => "cert entry",
            Self::ClientCert => "client cert context",
            Self::Context => "sslc context",
        };
        f.write_str(name)
    }
}

/// Failure classes the service reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResultCode {
    InvalidHandle(HandleKind),
    InvalidArgument,
    InvalidState,
    CertFormat,
    KeyFormat,
    ResourceExhausted,
    RequestTooLarge,
    HandshakeFailure,
    TransferError,
    UnsupportedVersion,
    Internal,
}

/// Commands understood by the service, one per public operation plus
/// [`Command::SupplyTransport`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Command {
    Initialize { version: u32 },
    CreateRootCertChain,
    DestroyRootCertChain { chain: u32 },
    AddTrustedRootCa { chain: u32, cert: Vec<u8> },
    RootCertChainAddDefaultCert { chain: u32, cert_id: u32 },
    RootCertChainRemoveCert { chain: u32, cert: u32 },
    OpenClientCertContext { cert: Vec<u8>, key: Vec<u8> },
    OpenDefaultClientCertContext { cert_id: u32 },
    CloseClientCertContext { client_cert: u32 },
    SeedRng,
    GenerateRandomData { size: u32 },
    CreateContext { options: SslOptions, hostname: String },
    DestroyContext { context: u32 },
    StartConnection { context: u32 },
    Read { context: u32, len: u32, peek: bool },
    Write { context: u32, data: Vec<u8> },
    ContextSetRootCertChain { context: u32, chain: u32 },
    ContextSetClientCert { context: u32, client_cert: u32 },
    ContextSetHandle8 { context: u32, handle: u32 },
    ContextClearOpt { context: u32, bitmask: SslOptions },
    ContextGetState { context: u32 },
    /// Ciphertext read from the session's transport; empty means end of
    /// stream
    SupplyTransport { context: u32, incoming: Vec<u8> },
    /// Reading or writing the session's transport failed; the context can
    /// no longer be used
    TransportFailed { context: u32, reason: String },
    Shutdown,
}

/// Socket I/O the client must perform before re-issuing its command
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportDirective {
    /// Ciphertext to write to the transport
    pub outgoing:   Vec<u8>,
    /// Whether the client should read from the transport and supply the
    /// bytes
    pub wants_read: bool,
}

/// Replies sent by the service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Reply {
    Ack,
    Handle(u32),
    RandomData(Vec<u8>),
    State(u32),
    /// The command needs transport I/O before it can complete
    Pending(TransportDirective),
    Connected {
        outgoing:        Vec<u8>,
        internal_retval: i32,
        out:             u32,
    },
    Data {
        bytes:    Vec<u8>,
        outgoing: Vec<u8>,
    },
    Written {
        count:    u32,
        outgoing: Vec<u8>,
    },
    Error {
        code:       ResultCode,
        message:    String,
        diagnostic: Option<i32>,
        /// Alert the engine queued for the peer, to be written before the
        /// error is reported
        outgoing:   Vec<u8>,
    },
}

/// A command tagged with the id its response must echo
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub id:      u32,
    pub command: Command,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub id:    u32,
    pub reply: Reply,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clearing_one_option_keeps_the_others() {
        let options = SslOptions::DISABLE_VERIFY | SslOptions::TLS_V10;
        let cleared = options.without(SslOptions::TLS_V10);
        assert!(cleared.contains(SslOptions::DISABLE_VERIFY));
        assert!(!cleared.contains(SslOptions::TLS_V10));
        assert_eq!(cleared.bits(), 1 << 9);
    }

    #[test]
    fn unknown_option_bits_are_carried() {
        let options = SslOptions::from_bits(0x1 | SslOptions::TLS_V10.bits());
        assert_eq!(options.without(SslOptions::TLS_V10).bits(), 0x1);
    }

    #[test]
    fn eleven_default_roots_with_sequential_ids() {
        let ids: Vec<u32> = DefaultRootCert::ALL.iter().map(|c| c.id()).collect();
        assert_eq!(ids, (0x1..=0xB).collect::<Vec<_>>());
        assert_eq!(DefaultRootCert::from_id(0x9), Some(DefaultRootCert::Comodo));
        assert_eq!(DefaultRootCert::from_id(0xC), None);
        assert_eq!(
            DefaultRootCert::Comodo.name(),
            "COMODO RSA Certification Authority"
        );
    }
}
