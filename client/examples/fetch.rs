//! Fetch `/` from an HTTPS server through the SSLC service.
//!
//! ```text
//! cargo run -p sslc-client --example fetch -- example.com [port] [--insecure]
//! ```

use std::{
    io::{self, Write},
    net::TcpStream,
};

use anyhow::{anyhow, Context, Result};
use sslc_client::{ClientConfig, DefaultRootCert, ServiceConnection, SslOptions, TlsSession};

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let mut args = std::env::args().skip(1);
    let host = args
        .next()
        .ok_or_else(|| anyhow!("usage: fetch <host> [port] [--insecure]"))?;
    let mut port = 443;
    let mut options = SslOptions::DEFAULT;
    for arg in args {
        if arg == "--insecure" {
            options |= SslOptions::DISABLE_VERIFY;
        } else {
            port = arg.parse().context("Invalid port")?;
        }
    }

    let conn = ServiceConnection::initialize(ClientConfig::new())
        .context("Failed to reach the TLS service")?;

    // Trust every built-in root the service has
    let chain = conn.create_root_cert_chain()?;
    for root in DefaultRootCert::ALL {
        if let Err(e) = conn.add_default_cert(chain, root) {
            tracing::debug!("Skipping {}: {}", root, e);
        }
    }

    let socket = TcpStream::connect((host.as_str(), port))
        .with_context(|| format!("Failed to connect to {host}:{port}"))?;
    let mut session = TlsSession::create(&conn, socket, options, &host)?;
    session.set_root_cert_chain(chain)?;

    let info = session.start_connection()?;
    eprintln!("Connected, state {:#x}", info.out);

    let request = format!("GET / HTTP/1.0\r\nHost: {host}\r\nConnection: close\r\n\r\n");
    let mut pending = request.as_bytes();
    while !pending.is_empty() {
        let n = session.write(pending)?;
        pending = &pending[n..];
    }

    let mut stdout = io::stdout().lock();
    let mut buf = [0u8; 4096];
    loop {
        let n = session.read(&mut buf, false)?;
        if n == 0 {
            break;
        }
        stdout.write_all(&buf[..n])?;
    }

    drop(session.destroy());
    conn.destroy_root_cert_chain(chain)?;
    conn.teardown();
    Ok(())
}
