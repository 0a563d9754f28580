//! Resident TLS service backing the SSLC client library.
//!
//! Every client connection gets its own handle table. Handshakes and record
//! processing run on in-memory rustls connections; ciphertext is shuttled to
//! and from the client's own transport through `Pending` replies.

use std::{
    io,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

use anyhow::{anyhow, Context, Result};
use rustls::crypto::CryptoProvider;
use sslc_common::{
    codec::{recv_message, send_message},
    platform_socket::{ClientCredentials, PlatformListener, PlatformSocket},
    protocol::{Command, Request, Response},
    BuiltinCertPath,
};

pub mod builtin;
pub mod config;
pub mod connection;
pub mod context;
pub mod fault;
pub mod handles;
pub mod identity;
pub mod rng;
pub mod verifier;

pub use builtin::BuiltinStore;
pub use config::ServiceConfig;
pub use connection::ConnectionHandler;

/// The resident service: accepts client connections and runs each on its own
/// thread.
#[derive(Clone)]
pub struct SslcService {
    config:   ServiceConfig,
    provider: Arc<CryptoProvider>,
    builtins: Arc<BuiltinStore>,
}

impl SslcService {
    /// Creates the service and loads the built-in certificates.
    pub fn new(config: ServiceConfig) -> Result<Self> {
        // Install default crypto provider for rustls if not already installed
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
        let provider = CryptoProvider::get_default()
            .cloned()
            .unwrap_or_else(|| Arc::new(rustls::crypto::aws_lc_rs::default_provider()));

        tracing::info!("Loading built-in certificates from {:?}", config.certs_dir);
        let builtins = BuiltinStore::load(&BuiltinCertPath::new(config.certs_dir.clone()))
            .context("Failed to load built-in certificates")?;

        Ok(Self {
            config,
            provider,
            builtins: Arc::new(builtins),
        })
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Bind the configured endpoint without serving it yet
    pub fn bind(&self) -> Result<PlatformListener> {
        PlatformListener::bind(&self.config.socket_name)
            .with_context(|| format!("Failed to bind to socket: {}", self.config.socket_name))
    }

    /// Starts the service and handles incoming connections indefinitely.
    pub fn run(&self) -> Result<()> {
        let listener = self.bind()?;
        tracing::info!("SSLC service listening on: {}", listener.path().display());

        for connection in listener.incoming() {
            match connection {
                Ok(socket) => self.spawn_client(socket),
                Err(e) => tracing::error!("Connection error: {}", e),
            }
        }

        Ok(())
    }

    /// Starts the service and stops once `running` is cleared.
    pub fn run_with_shutdown(&self, running: Arc<AtomicBool>) -> Result<()> {
        let listener = self.bind()?;
        self.serve(listener, running)
    }

    /// Serve an already bound endpoint until `running` is cleared.
    pub fn serve(&self, listener: PlatformListener, running: Arc<AtomicBool>) -> Result<()> {
        tracing::info!("SSLC service listening on: {}", listener.path().display());

        // Non-blocking accept so the flag is polled
        listener
            .set_nonblocking(true)
            .context("Failed to make listener non-blocking")?;

        while running.load(Ordering::SeqCst) {
            match listener.accept() {
                Ok(socket) => self.spawn_client(socket),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    thread::sleep(Duration::from_millis(10));
                }
                Err(e) => tracing::error!("Connection error: {}", e),
            }
        }

        tracing::info!("Service shutdown signal received, stopping gracefully");
        Ok(())
    }

    fn spawn_client(&self, socket: PlatformSocket) {
        tracing::info!("New connection received");
        let service = self.clone();
        thread::spawn(move || {
            if let Err(e) = service.handle_client(socket) {
                tracing::error!("Client error: {:#}", e);
            }
        });
    }

    /// Serve one client until it shuts down or disconnects
    pub fn handle_client(&self, mut socket: PlatformSocket) -> Result<()> {
        let credentials = socket
            .get_peer_credentials()
            .context("Failed to get client credentials")?;
        tracing::info!("Client PID: {}, UID: {}", credentials.pid, credentials.uid);

        if self.config.enforce_peer_uid && !verify_client_user(&credentials) {
            return Err(anyhow!("Client user verification failed"));
        }

        let mut handler =
            ConnectionHandler::new(&self.config, self.provider.clone(), self.builtins.clone());

        loop {
            let request: Request = match recv_message(&mut socket) {
                Ok(request) => request,
                Err(e) if is_disconnect(&e) => {
                    tracing::info!("Client {} disconnected", credentials.pid);
                    break;
                }
                Err(e) => return Err(e.context("Failed to read request")),
            };

            let shutdown = matches!(request.command, Command::Shutdown);
            tracing::trace!("Request {} from PID {}: {:?}", request.id, credentials.pid, request.command);

            let reply = handler.process_command(request.command);
            send_message(
                &mut socket,
                &Response {
                    id: request.id,
                    reply,
                },
            )
            .context("Failed to send response")?;

            if shutdown {
                tracing::info!("Client {} closed its session", credentials.pid);
                break;
            }
        }

        tracing::debug!(
            "Releasing {} handles held by PID {}",
            handler.handles().live_handles(),
            credentials.pid
        );
        Ok(())
    }
}

/// Accept only clients running as the same user as the service
fn verify_client_user(credentials: &ClientCredentials) -> bool {
    // SAFETY: getuid() is always safe to call - returns the real user ID
    let current_uid = unsafe { libc::getuid() };

    if credentials.uid == current_uid {
        tracing::debug!("Client UID {} matches service UID", credentials.uid);
        return true;
    }

    tracing::warn!(
        "User verification failed: client UID {} != service UID {}",
        credentials.uid,
        current_uid
    );
    false
}

fn is_disconnect(err: &anyhow::Error) -> bool {
    err.chain()
        .filter_map(|cause| cause.downcast_ref::<io::Error>())
        .any(|io_err| {
            matches!(
                io_err.kind(),
                io::ErrorKind::UnexpectedEof
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::ConnectionReset
            )
        })
}

#[cfg(test)]
mod tests {
    use sslc_common::protocol::{Reply, PROTOCOL_VERSION};

    use super::*;

    fn service() -> SslcService {
        SslcService::new(
            ServiceConfig::default().with_certs_dir(concat!(env!("CARGO_MANIFEST_DIR"), "/../certs")),
        )
        .unwrap()
    }

    #[test]
    fn serves_requests_until_shutdown() {
        let service = service();
        let (server_side, mut client_side) = PlatformSocket::pair().unwrap();
        let worker = thread::spawn(move || service.handle_client(server_side));

        send_message(
            &mut client_side,
            &Request {
                id:      7,
                command: Command::Initialize {
                    version: PROTOCOL_VERSION,
                },
            },
        )
        .unwrap();
        let response: Response = recv_message(&mut client_side).unwrap();
        assert_eq!(response.id, 7);
        assert!(matches!(response.reply, Reply::Ack));

        send_message(
            &mut client_side,
            &Request {
                id:      8,
                command: Command::Shutdown,
            },
        )
        .unwrap();
        let response: Response = recv_message(&mut client_side).unwrap();
        assert_eq!(response.id, 8);

        worker.join().unwrap().unwrap();
    }

    #[test]
    fn dropped_client_ends_the_session_cleanly() {
        let service = service();
        let (server_side, client_side) = PlatformSocket::pair().unwrap();
        let worker = thread::spawn(move || service.handle_client(server_side));
        drop(client_side);
        worker.join().unwrap().unwrap();
    }

    #[test]
    fn stops_when_flag_is_cleared() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("svc.sock");
        let service = SslcService::new(
            ServiceConfig::default()
                .with_socket_name(socket.to_string_lossy())
                .with_certs_dir(dir.path()),
        )
        .unwrap();

        let listener = service.bind().unwrap();
        assert!(socket.exists());
        let running = Arc::new(AtomicBool::new(true));
        let flag = running.clone();
        let worker = thread::spawn(move || service.serve(listener, flag));

        running.store(false, Ordering::SeqCst);
        worker.join().unwrap().unwrap();
        assert!(!socket.exists());
    }
}
