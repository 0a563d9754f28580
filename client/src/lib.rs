//! SSLC Client Library
//!
//! Client-side TLS sessions whose cryptography runs in a resident TLS
//! service. The application owns its sockets; the library drives the
//! handshake and record traffic over them, asking the service to do the TLS
//! work and moving ciphertext between the two.
//!
//! # Example
//!
//! ```no_run
//! use std::net::TcpStream;
//!
//! use sslc_client::{ClientConfig, DefaultRootCert, ServiceConnection, SslOptions, TlsSession};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let conn = ServiceConnection::initialize(ClientConfig::new())?;
//!
//! let chain = conn.create_root_cert_chain()?;
//! conn.add_default_cert(chain, DefaultRootCert::NintendoCa)?;
//!
//! let socket = TcpStream::connect("example.com:443")?;
//! let mut session = TlsSession::create(&conn, socket, SslOptions::DEFAULT, "example.com")?;
//! session.set_root_cert_chain(chain)?;
//! session.start_connection()?;
//!
//! session.write(b"GET / HTTP/1.0\r\nHost: example.com\r\n\r\n")?;
//! let mut buf = [0u8; 1024];
//! let n = session.read(&mut buf, false)?;
//! println!("{}", String::from_utf8_lossy(&buf[..n]));
//!
//! let socket = session.destroy();
//! socket.shutdown(std::net::Shutdown::Both)?;
//! conn.destroy_root_cert_chain(chain)?;
//! conn.teardown();
//! # Ok(())
//! # }
//! ```

mod chain;
mod client_cert;
mod error;
mod random;
mod service;
mod session;
mod transport;

pub use chain::{CertEntry, RootCertChain};
pub use client_cert::ClientCertContext;
pub use error::{Result, SslcError};
pub use service::{ClientConfig, ServiceConnection};
pub use session::{ConnectionInfo, SessionState, TlsSession};
pub use transport::{SocketFd, Transport};
// Re-export important types from sslc-common for convenience
pub use sslc_common::{
    protocol::{HandleKind, MAX_TRANSFER_SIZE},
    DefaultClientCert, DefaultRootCert, SslOptions, SOCKET_NAME,
};
