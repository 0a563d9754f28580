//! SSLC Common Library
//!
//! Shared protocol and plumbing used by both the SSLC client library and the
//! resident TLS service. It includes:
//!
//! - Command and reply definitions for the service protocol
//! - Length-prefixed framing of protocol messages
//! - The local socket carrying the protocol, with peer credential lookup
//! - Endpoint and certificate-directory configuration

/// Endpoint and certificate-directory configuration
pub mod config;

/// Length-prefixed message framing
pub mod codec;

/// Local socket implementation
pub mod platform_socket;

/// Commands, replies and shared protocol types
pub mod protocol;

// Re-export commonly used types for convenience
pub use config::{BuiltinCertPath, SOCKET_NAME};
pub use platform_socket::{ClientCredentials, PlatformListener, PlatformSocket};
pub use protocol::{DefaultClientCert, DefaultRootCert, HandleKind, SslOptions};
