//! Shared harness: a real service on a temporary socket and rustls peers on
//! loopback.

#![allow(dead_code)]

use std::{
    fs,
    io::{self, BufReader, Read, Write},
    net::{SocketAddr, TcpListener, TcpStream},
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
};

use anyhow::{anyhow, Result};
use rustls::{
    pki_types::{CertificateDer, PrivateKeyDer},
    server::WebPkiClientVerifier,
    ProtocolVersion, RootCertStore, ServerConfig, ServerConnection, StreamOwned,
};
use sslc_client::{ClientConfig, ServiceConnection};
use sslc_server::{ServiceConfig, SslcService};
use tempfile::TempDir;

pub fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name)
}

pub fn fixture_bytes(name: &str) -> Vec<u8> {
    fs::read(fixture(name)).unwrap()
}

/// A service listening on a socket inside its own temporary directory
pub struct ServiceHarness {
    dir:     TempDir,
    socket:  String,
    running: Arc<AtomicBool>,
    worker:  Option<JoinHandle<Result<()>>>,
}

impl ServiceHarness {
    pub fn start() -> Self {
        Self::start_with(|config| config)
    }

    pub fn start_with<F>(customize: F) -> Self
    where
        F: FnOnce(ServiceConfig) -> ServiceConfig,
    {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();

        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("sslc.sock").to_string_lossy().into_owned();
        let config = customize(
            ServiceConfig::default()
                .with_socket_name(socket.clone())
                .with_certs_dir(concat!(env!("CARGO_MANIFEST_DIR"), "/../certs")),
        );

        let service = SslcService::new(config).unwrap();
        let listener = service.bind().unwrap();
        let running = Arc::new(AtomicBool::new(true));
        let flag = running.clone();
        let worker = thread::spawn(move || service.serve(listener, flag));

        Self {
            dir,
            socket,
            running,
            worker: Some(worker),
        }
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig::new().with_socket_name(self.socket.clone())
    }

    pub fn connect(&self) -> ServiceConnection {
        ServiceConnection::initialize(self.client_config()).unwrap()
    }

    pub fn socket(&self) -> &str {
        &self.socket
    }
}

impl Drop for ServiceHarness {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

/// What the peer saw of a finished connection
#[derive(Debug)]
pub struct PeerReport {
    pub version:      Option<ProtocolVersion>,
    pub client_certs: usize,
    pub echoed:       usize,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PeerOptions {
    /// Require a client certificate issued by the test root
    pub require_client_cert: bool,
}

fn localhost_identity() -> (Vec<CertificateDer<'static>>, PrivateKeyDer<'static>) {
    let cert_pem = fixture_bytes("localhost.pem");
    let key_pem = fixture_bytes("localhost.key.pem");
    let certs = rustls_pemfile::certs(&mut BufReader::new(&*cert_pem))
        .collect::<Result<Vec<_>, _>>()
        .unwrap();
    let key = rustls_pemfile::private_key(&mut BufReader::new(&*key_pem))
        .unwrap()
        .unwrap();
    (certs, key)
}

fn peer_config(options: PeerOptions) -> Result<Arc<ServerConfig>> {
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
    let (certs, key) = localhost_identity();

    let builder = ServerConfig::builder();
    let config = if options.require_client_cert {
        let mut roots = RootCertStore::empty();
        roots.add(CertificateDer::from(fixture_bytes("root-ca.der")))?;
        let verifier = WebPkiClientVerifier::builder(Arc::new(roots)).build()?;
        builder
            .with_client_cert_verifier(verifier)
            .with_single_cert(certs, key)?
    } else {
        builder.with_no_client_auth().with_single_cert(certs, key)?
    };
    Ok(Arc::new(config))
}

/// A TLS echo server for `localhost` that serves a single connection
pub struct EchoPeer {
    pub addr: SocketAddr,
    worker:   JoinHandle<Result<PeerReport>>,
}

impl EchoPeer {
    pub fn spawn() -> Self {
        Self::spawn_with(PeerOptions::default())
    }

    pub fn spawn_with(options: PeerOptions) -> Self {
        let config = peer_config(options).unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let worker = thread::spawn(move || {
            let (stream, _) = listener.accept()?;
            let conn = ServerConnection::new(config)?;
            let mut tls = StreamOwned::new(conn, stream);

            let mut echoed = 0;
            let mut buf = [0u8; 4096];
            loop {
                let n = match tls.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => n,
                    Err(e) if is_hangup(&e) => break,
                    Err(e) => return Err(anyhow!("peer failed: {e}")),
                };
                echoed += n;
                match tls.write_all(&buf[..n]).and_then(|()| tls.flush()) {
                    Ok(()) => {}
                    Err(e) if is_hangup(&e) => break,
                    Err(e) => return Err(anyhow!("peer failed to echo: {e}")),
                }
            }

            Ok(PeerReport {
                version: tls.conn.protocol_version(),
                client_certs: tls.conn.peer_certificates().map_or(0, |certs| certs.len()),
                echoed,
            })
        });

        Self { addr, worker }
    }

    pub fn connect(&self) -> TcpStream {
        TcpStream::connect(self.addr).unwrap()
    }

    pub fn finish(self) -> Result<PeerReport> {
        self.worker
            .join()
            .map_err(|_| anyhow!("peer thread panicked"))?
    }
}

/// The client went away, with or without closing TLS first
fn is_hangup(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
    )
}

/// Accepts one connection and closes it without speaking TLS
pub fn dead_peer() -> (SocketAddr, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let worker = thread::spawn(move || {
        if let Ok((stream, _)) = listener.accept() {
            drop(stream);
        }
    });
    (addr, worker)
}

/// Accepts one connection and reads from it without ever answering, until
/// the client goes away
pub fn silent_peer() -> (SocketAddr, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let worker = thread::spawn(move || {
        if let Ok((mut stream, _)) = listener.accept() {
            let mut buf = [0u8; 1024];
            while matches!(stream.read(&mut buf), Ok(n) if n > 0) {}
        }
    });
    (addr, worker)
}
