use std::{
    io::{self, Read, Write},
    os::unix::net::{UnixListener, UnixStream},
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{anyhow, Context, Result};
#[cfg(any(target_os = "linux", target_os = "android"))]
use nix::sys::socket::{getsockopt, sockopt::PeerCredentials};

use crate::config::socket_path;

/// Local stream socket connecting a client to the service
#[derive(Debug)]
pub struct PlatformSocket {
    stream: UnixStream,
}

/// Listening side of the service endpoint. Removes its socket file on drop.
#[derive(Debug)]
pub struct PlatformListener {
    listener: UnixListener,
    path:     PathBuf,
}

/// Credentials of the process on the other end of a socket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientCredentials {
    /// Process ID of the peer
    pub pid: u32,
    /// User ID of the peer
    pub uid: u32,
}

impl From<UnixStream> for PlatformSocket {
    fn from(stream: UnixStream) -> Self {
        Self { stream }
    }
}

impl PlatformSocket {
    /// Create a connected pair, mostly useful for adopting an existing
    /// handle in tests
    pub fn pair() -> io::Result<(Self, Self)> {
        let (a, b) = UnixStream::pair()?;
        Ok((a.into(), b.into()))
    }

    /// Set the socket to blocking or non-blocking mode
    pub fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        self.stream.set_nonblocking(nonblocking)
    }

    /// Set the read timeout
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.stream.set_read_timeout(timeout)
    }

    /// Set the write timeout
    pub fn set_write_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.stream.set_write_timeout(timeout)
    }

    /// Extract peer credentials from the socket connection
    pub fn get_peer_credentials(&self) -> Result<ClientCredentials> {
        #[cfg(any(target_os = "linux", target_os = "android"))]
        {
            let creds =
                getsockopt(&self.stream, PeerCredentials).context("Failed to get peer credentials")?;

            Ok(ClientCredentials {
                pid: creds.pid() as u32,
                uid: creds.uid(),
            })
        }

        #[cfg(target_os = "macos")]
        {
            use std::os::unix::io::AsRawFd;

            let mut uid: libc::uid_t = 0;
            let mut gid: libc::gid_t = 0;

            // SAFETY: the fd is owned by `self.stream` and stays open for the
            // duration of the call; uid/gid are valid stack locations.
            let result = unsafe { libc::getpeereid(self.stream.as_raw_fd(), &mut uid, &mut gid) };
            if result != 0 {
                return Err(anyhow!(
                    "Failed to get peer UID on macOS: {}",
                    io::Error::last_os_error()
                ));
            }

            let mut pid: libc::pid_t = 0;
            let mut pid_len = std::mem::size_of::<libc::pid_t>() as libc::socklen_t;

            // SAFETY: valid fd, option and a buffer whose size matches pid_len.
            let result = unsafe {
                libc::getsockopt(
                    self.stream.as_raw_fd(),
                    libc::SOL_LOCAL,
                    libc::LOCAL_PEERPID,
                    &mut pid as *mut _ as *mut libc::c_void,
                    &mut pid_len,
                )
            };
            if result != 0 {
                return Err(anyhow!(
                    "Failed to get peer PID on macOS: {}",
                    io::Error::last_os_error()
                ));
            }

            tracing::debug!("macOS peer credentials: PID={}, UID={}", pid, uid);
            Ok(ClientCredentials {
                pid: pid as u32,
                uid,
            })
        }

        #[cfg(not(any(target_os = "linux", target_os = "android", target_os = "macos")))]
        {
            Err(anyhow!(
                "Peer credentials extraction not supported on this platform. Supported platforms: \
                 Linux (SO_PEERCRED), macOS (getpeereid/LOCAL_PEERPID)."
            ))
        }
    }
}

impl Read for PlatformSocket {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }
}

impl Write for PlatformSocket {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }
}

impl PlatformListener {
    /// Bind the service endpoint, replacing a stale socket file
    pub fn bind(socket_name: &str) -> Result<Self> {
        let path = socket_path(socket_name);
        tracing::info!(
            "Setting up Unix socket server: {} -> {}",
            socket_name,
            path.display()
        );

        if path.exists() {
            tracing::warn!("Existing socket file found, removing it...");
            std::fs::remove_file(&path).with_context(|| {
                format!(
                    "Could not remove existing socket file '{}'. Another service instance may be \
                     running.",
                    path.display()
                )
            })?;
        }

        let listener = UnixListener::bind(&path).map_err(|e| {
            tracing::error!("Failed to bind to socket: {} (kind: {:?})", e, e.kind());
            anyhow!(
                "Unable to bind socket '{}': {}\n\nOS Error Code: {}",
                path.display(),
                e,
                e.raw_os_error().unwrap_or(-1)
            )
        })?;

        use std::os::unix::fs::PermissionsExt;
        // Owner read/write only
        if let Err(e) = std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600)) {
            tracing::warn!("Failed to set socket permissions: {}", e);
        }

        tracing::info!("Unix socket server setup complete!");
        Ok(Self { listener, path })
    }

    /// Switch accept() between blocking and polling
    pub fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        self.listener.set_nonblocking(nonblocking)
    }

    /// Accept an incoming connection as a blocking socket without timeouts
    pub fn accept(&self) -> io::Result<PlatformSocket> {
        let (stream, _) = self.listener.accept()?;
        let socket = PlatformSocket::from(stream);
        socket.set_nonblocking(false)?;
        Ok(socket)
    }

    /// Path of the socket file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Get iterator over incoming connections
    pub fn incoming(&self) -> IncomingConnections<'_> {
        IncomingConnections { listener: self }
    }
}

impl Drop for PlatformListener {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Iterator over incoming connections
pub struct IncomingConnections<'a> {
    listener: &'a PlatformListener,
}

impl Iterator for IncomingConnections<'_> {
    type Item = io::Result<PlatformSocket>;

    fn next(&mut self) -> Option<Self::Item> {
        Some(self.listener.accept())
    }
}

/// Connect to the service endpoint.
///
/// `timeout` bounds every individual read and write on the returned socket.
pub fn connect_socket(socket_name: &str, timeout: Option<Duration>) -> Result<PlatformSocket> {
    let path = socket_path(socket_name);
    tracing::debug!(
        "Attempting to connect to Unix socket: {} -> {}",
        socket_name,
        path.display()
    );

    let stream = UnixStream::connect(&path).map_err(|e| {
        tracing::error!("Connection failed: {} (kind: {:?})", e, e.kind());
        let detail = match e.kind() {
            io::ErrorKind::NotFound => format!(
                "Socket file not found at '{}'. The service may have stopped or never started.",
                path.display()
            ),
            io::ErrorKind::PermissionDenied => format!(
                "Permission denied accessing socket '{}'. Check socket permissions.",
                path.display()
            ),
            io::ErrorKind::ConnectionRefused => format!(
                "Connection refused to socket '{}'. The service may be starting up or shutting \
                 down.",
                path.display()
            ),
            _ => format!(
                "Unexpected error connecting to socket '{}': {} (kind: {:?})",
                path.display(),
                e,
                e.kind()
            ),
        };
        anyhow!("{}\n\nOS Error Code: {}", detail, e.raw_os_error().unwrap_or(-1))
    })?;

    let socket = PlatformSocket::from(stream);
    socket
        .set_nonblocking(false)
        .context("Failed to set socket to blocking mode")?;
    socket
        .set_read_timeout(timeout)
        .context("Failed to set read timeout")?;
    socket
        .set_write_timeout(timeout)
        .context("Failed to set write timeout")?;

    tracing::debug!("Socket configured for blocking I/O with timeout {:?}", timeout);
    Ok(socket)
}
