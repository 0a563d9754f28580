//! Sockets a TLS session can run over.
//!
//! The library only reads and writes the transport. It never closes it; a
//! destroyed session hands it back to the caller.

use std::{
    io::{self, Read, Write},
    net::TcpStream,
    os::{
        fd::{AsRawFd, RawFd},
        unix::net::UnixStream,
    },
};

/// A connected, byte-stream transport for a TLS session.
///
/// Blocking and non-blocking sockets both work. When a read or write reports
/// [`io::ErrorKind::WouldBlock`] the session polls the descriptor from
/// [`Transport::raw_fd`] and retries; a transport without one fails instead.
pub trait Transport: Read + Write {
    /// Whether the transport can carry a session. Checked once when the
    /// session is created.
    fn is_usable(&self) -> bool {
        true
    }

    /// Descriptor to wait on when the transport is not ready
    fn raw_fd(&self) -> Option<RawFd> {
        None
    }
}

/// Direction a transport has to become ready in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Readiness {
    Readable,
    Writable,
}

/// Wait for `transport` after it failed with `WouldBlock`.
///
/// Only a descriptor in non-blocking mode is polled. A blocking socket
/// reports `WouldBlock` when its own receive or send timeout runs out, and
/// then `err` is returned unchanged.
pub(crate) fn wait_ready<T: Transport + ?Sized>(
    transport: &T,
    readiness: Readiness,
    err: io::Error,
) -> io::Result<()> {
    let Some(fd) = transport.raw_fd() else {
        return Err(err);
    };

    // SAFETY: F_GETFL only reads the descriptor's status flags
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags == -1 {
        return Err(io::Error::last_os_error());
    }
    if flags & libc::O_NONBLOCK == 0 {
        return Err(err);
    }

    let mut pollfd = libc::pollfd {
        fd,
        events: match readiness {
            Readiness::Readable => libc::POLLIN,
            Readiness::Writable => libc::POLLOUT,
        },
        revents: 0,
    };
    loop {
        // SAFETY: pollfd is one valid entry for the duration of the call
        if unsafe { libc::poll(&mut pollfd, 1, -1) } >= 0 {
            return Ok(());
        }
        let e = io::Error::last_os_error();
        if e.kind() != io::ErrorKind::Interrupted {
            return Err(e);
        }
    }
}

/// True when `fd` refers to an open descriptor
fn fd_is_open(fd: RawFd) -> bool {
    // SAFETY: F_GETFD only inspects the descriptor table
    fd >= 0 && unsafe { libc::fcntl(fd, libc::F_GETFD) } != -1
}

impl Transport for TcpStream {
    fn is_usable(&self) -> bool {
        self.peer_addr().is_ok()
    }

    fn raw_fd(&self) -> Option<RawFd> {
        Some(self.as_raw_fd())
    }
}

impl Transport for &TcpStream {
    fn is_usable(&self) -> bool {
        self.peer_addr().is_ok()
    }

    fn raw_fd(&self) -> Option<RawFd> {
        Some(self.as_raw_fd())
    }
}

impl Transport for UnixStream {
    fn is_usable(&self) -> bool {
        fd_is_open(self.as_raw_fd())
    }

    fn raw_fd(&self) -> Option<RawFd> {
        Some(self.as_raw_fd())
    }
}

impl Transport for &UnixStream {
    fn is_usable(&self) -> bool {
        fd_is_open(self.as_raw_fd())
    }

    fn raw_fd(&self) -> Option<RawFd> {
        Some(self.as_raw_fd())
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn is_usable(&self) -> bool {
        (**self).is_usable()
    }

    fn raw_fd(&self) -> Option<RawFd> {
        (**self).raw_fd()
    }
}

/// A raw socket descriptor owned by the caller.
///
/// Reads and writes go straight to the descriptor. Dropping a `SocketFd`
/// does not close it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SocketFd(RawFd);

impl SocketFd {
    pub fn new(fd: RawFd) -> Self {
        Self(fd)
    }

    /// Borrow the descriptor of an open socket
    pub fn from_socket<S: AsRawFd>(socket: &S) -> Self {
        Self(socket.as_raw_fd())
    }

    pub fn fd(self) -> RawFd {
        self.0
    }
}

impl AsRawFd for SocketFd {
    fn as_raw_fd(&self) -> RawFd {
        self.0
    }
}

impl Read for SocketFd {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            // SAFETY: buf is valid for buf.len() bytes
            let n = unsafe { libc::read(self.0, buf.as_mut_ptr().cast(), buf.len()) };
            if n >= 0 {
                return Ok(n as usize);
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(err);
            }
        }
    }
}

impl Write for SocketFd {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        loop {
            // SAFETY: buf is valid for buf.len() bytes
            let n = unsafe { libc::write(self.0, buf.as_ptr().cast(), buf.len()) };
            if n >= 0 {
                return Ok(n as usize);
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(err);
            }
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Transport for SocketFd {
    fn is_usable(&self) -> bool {
        fd_is_open(self.0)
    }

    fn raw_fd(&self) -> Option<RawFd> {
        Some(self.0)
    }
}

#[cfg(test)]
mod tests {
    use std::{net::TcpListener, thread, time::Duration};

    use super::*;

    #[test]
    fn socket_fd_moves_bytes_without_closing() {
        let (a, mut b) = UnixStream::pair().unwrap();
        let mut fd = SocketFd::from_socket(&a);
        assert!(fd.is_usable());

        fd.write_all(b"hello").unwrap();
        let mut buf = [0u8; 5];
        b.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"hello");

        // The stream still owns an open descriptor
        assert!(fd_is_open(fd.fd()));
        assert_eq!(fd.fd(), a.as_raw_fd());
    }

    #[test]
    fn invalid_descriptor_is_unusable() {
        assert!(!SocketFd::new(-1).is_usable());
    }

    #[test]
    fn connected_tcp_stream_is_usable() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let stream = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        assert!(stream.is_usable());
        assert!((&stream).is_usable());
    }

    #[test]
    fn nonblocking_socket_waits_until_readable() {
        let (mut a, mut b) = UnixStream::pair().unwrap();
        a.set_nonblocking(true).unwrap();

        let mut buf = [0u8; 4];
        let err = a.read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);

        let writer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            b.write_all(b"late").unwrap();
            b
        });
        wait_ready(&a, Readiness::Readable, err).unwrap();
        assert_eq!(a.read(&mut buf).unwrap(), 4);
        assert_eq!(&buf, b"late");
        drop(writer.join().unwrap());
    }

    #[test]
    fn blocking_socket_timeout_is_not_waited_out() {
        let (mut a, _b) = UnixStream::pair().unwrap();
        a.set_read_timeout(Some(Duration::from_millis(20))).unwrap();

        let mut buf = [0u8; 4];
        let err = a.read(&mut buf).unwrap_err();
        let kind = err.kind();
        let err = wait_ready(&a, Readiness::Readable, err).unwrap_err();
        assert_eq!(err.kind(), kind);
    }
}
