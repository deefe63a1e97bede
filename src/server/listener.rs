//! Unix and TCP listeners and the client streams they accept.

use std::fmt;
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpListener, TcpStream};
use std::os::unix::io::{AsRawFd, RawFd};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, warn};

use crate::engine::PeerProbe;

/// Re-issues `listen(2)` with the configured backlog.
fn apply_backlog(fd: &impl AsRawFd, backlog: i32) -> io::Result<()> {
    let result = unsafe { libc::listen(fd.as_raw_fd(), backlog) };
    if result != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// A bound, non-blocking listening socket.
pub enum Listener {
    Unix { listener: UnixListener, path: PathBuf },
    Tcp(TcpListener),
}

impl Listener {
    /// Binds a Unix socket, replacing a stale socket file.
    pub fn bind_unix(path: &Path, backlog: i32) -> io::Result<Self> {
        if path.exists() {
            if UnixStream::connect(path).is_ok() {
                return Err(io::Error::new(
                    io::ErrorKind::AddrInUse,
                    format!("{} is served by another process", path.display()),
                ));
            }
            debug!(path = %path.display(), "removing stale socket");
            std::fs::remove_file(path)?;
        }
        let listener = UnixListener::bind(path)?;
        apply_backlog(&listener, backlog)?;
        listener.set_nonblocking(true)?;
        Ok(Self::Unix {
            listener,
            path: path.to_path_buf(),
        })
    }

    /// Binds a TCP address such as `127.0.0.1:6557`.
    pub fn bind_tcp(address: &str, backlog: i32) -> io::Result<Self> {
        let listener = TcpListener::bind(address)?;
        apply_backlog(&listener, backlog)?;
        listener.set_nonblocking(true)?;
        Ok(Self::Tcp(listener))
    }

    /// Accepts one pending connection; `Ok(None)` if there is none.
    ///
    /// The returned stream is blocking.
    pub fn accept(&self) -> io::Result<Option<ClientStream>> {
        let accepted = match self {
            Self::Unix { listener, .. } => listener.accept().map(|(s, _)| ClientStream::Unix(s)),
            Self::Tcp(listener) => listener.accept().map(|(s, _)| ClientStream::Tcp(s)),
        };
        match accepted {
            Ok(stream) => {
                stream.set_nonblocking(false)?;
                Ok(Some(stream))
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }
}

impl fmt::Display for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unix { path, .. } => write!(f, "unix:{}", path.display()),
            Self::Tcp(listener) => match listener.local_addr() {
                Ok(addr) => write!(f, "tcp:{addr}"),
                Err(_) => f.write_str("tcp:?"),
            },
        }
    }
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Listener({self})")
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        if let Self::Unix { path, .. } = self {
            if let Err(e) = std::fs::remove_file(&*path) {
                if e.kind() != io::ErrorKind::NotFound {
                    warn!(path = %path.display(), error = %e, "failed to remove socket");
                }
            }
        }
    }
}

/// A connected client over either transport.
#[derive(Debug)]
pub enum ClientStream {
    Unix(UnixStream),
    Tcp(TcpStream),
}

impl ClientStream {
    pub fn try_clone(&self) -> io::Result<Self> {
        Ok(match self {
            Self::Unix(s) => Self::Unix(s.try_clone()?),
            Self::Tcp(s) => Self::Tcp(s.try_clone()?),
        })
    }

    pub fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        match self {
            Self::Unix(s) => s.set_nonblocking(nonblocking),
            Self::Tcp(s) => s.set_nonblocking(nonblocking),
        }
    }

    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        match self {
            Self::Unix(s) => s.set_read_timeout(timeout),
            Self::Tcp(s) => s.set_read_timeout(timeout),
        }
    }

    pub fn set_write_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        match self {
            Self::Unix(s) => s.set_write_timeout(timeout),
            Self::Tcp(s) => s.set_write_timeout(timeout),
        }
    }

    pub fn shutdown(&self, how: Shutdown) -> io::Result<()> {
        match self {
            Self::Unix(s) => s.shutdown(how),
            Self::Tcp(s) => s.shutdown(how),
        }
    }

    fn raw_fd(&self) -> RawFd {
        match self {
            Self::Unix(s) => s.as_raw_fd(),
            Self::Tcp(s) => s.as_raw_fd(),
        }
    }

    /// Peer description for logs.
    #[must_use]
    pub fn peer(&self) -> String {
        match self {
            Self::Unix(_) => "unix".to_string(),
            Self::Tcp(s) => s
                .peer_addr()
                .map_or_else(|_| "tcp".to_string(), |a| a.to_string()),
        }
    }
}

/// Zero-timeout `poll(2)` for a hang-up or error condition on `fd`.
///
/// A peer that only shut down its write side raises neither: the socket is
/// merely readable at end of stream.
fn hung_up(fd: RawFd) -> bool {
    let mut pfd = libc::pollfd {
        fd,
        events: 0,
        revents: 0,
    };
    let ready = unsafe { libc::poll(&mut pfd, 1, 0) };
    ready > 0 && pfd.revents & (libc::POLLHUP | libc::POLLERR) != 0
}

impl Read for ClientStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Unix(s) => s.read(buf),
            Self::Tcp(s) => s.read(buf),
        }
    }
}

impl Write for ClientStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Unix(s) => s.write(buf),
            Self::Tcp(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Unix(s) => s.flush(),
            Self::Tcp(s) => s.flush(),
        }
    }
}

impl PeerProbe for ClientStream {
    /// True once the connection is gone in both directions. End of stream on
    /// the read side alone is a request terminated by a half-close.
    fn peer_closed(&self) -> bool {
        hung_up(self.raw_fd())
    }
}
