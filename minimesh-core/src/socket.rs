//! Length-prefixed framed sockets
//!
//! A `FramedSocket` wraps one TCP connection with the substrate's framing:
//! little-endian `u64` scalars and `u64`-length-prefixed opaque byte frames.
//! All reads and writes honour the configured socket deadline, preserving the
//! distinction between "wait forever" (`None`) and "wait this long, then give
//! up" (`Some`).

use std::io::{self, Read, Write};
use std::net::{TcpListener, TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

use bytes::Bytes;
use socket2::{Domain, Protocol, SockRef, Socket, TcpKeepalive, Type};
use tracing::trace;

use crate::config::Config;
use crate::error::{CoreError, Result};

/// Upper bound on a single frame, to catch corrupt length prefixes before
/// they turn into absurd allocations.
const MAX_FRAME_BYTES: u64 = 1 << 32;

/// One TCP connection with framed send/receive and a last-used timestamp.
#[derive(Debug)]
pub struct FramedSocket {
    stream: TcpStream,
    last_used: Instant,
}

fn resolve(addr: &str) -> Result<std::net::SocketAddr> {
    addr.to_socket_addrs()
        .map_err(|_| CoreError::invalid_address(addr))?
        .next()
        .ok_or_else(|| CoreError::invalid_address(addr))
}

/// Apply the socket option set to a connected stream: no Nagle delays, and
/// eager keepalive probing so dead peers are noticed quickly.
fn configure(stream: &TcpStream, config: &Config) -> io::Result<()> {
    let sock = SockRef::from(stream);
    sock.set_nodelay(true)?;

    let keepalive = TcpKeepalive::new()
        .with_time(config.keepalive_idle)
        .with_interval(config.keepalive_interval);
    #[cfg(not(windows))]
    let keepalive = keepalive.with_retries(config.keepalive_count);
    sock.set_tcp_keepalive(&keepalive)?;

    stream.set_read_timeout(config.socket_timeout)?;
    stream.set_write_timeout(config.socket_timeout)?;
    Ok(())
}

impl FramedSocket {
    /// Open a fresh connection to `addr` and apply the socket options.
    pub fn connect(addr: &str, config: &Config) -> Result<Self> {
        let target = resolve(addr)?;
        let stream = TcpStream::connect(target)?;
        configure(&stream, config)?;
        trace!(%addr, "connected");
        Ok(Self::from_stream(stream))
    }

    fn from_stream(stream: TcpStream) -> Self {
        Self {
            stream,
            last_used: Instant::now(),
        }
    }

    /// Override the read deadline for the next receives. `None` waits forever.
    pub fn set_read_deadline(&self, timeout: Option<Duration>) -> Result<()> {
        self.stream.set_read_timeout(timeout)?;
        Ok(())
    }

    /// Send one little-endian `u64`.
    pub fn send_u64(&mut self, value: u64) -> Result<()> {
        self.stream.write_all(&value.to_le_bytes())?;
        Ok(())
    }

    /// Receive one little-endian `u64`.
    ///
    /// A clean EOF before the first byte maps to [`CoreError::Closed`] so the
    /// server loop can tell a finished connection from a broken one.
    pub fn recv_u64(&mut self) -> Result<u64> {
        let mut buf = [0u8; 8];
        self.read_exact_or_closed(&mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }

    /// Send raw bytes without a length prefix (used for fixed-size headers).
    pub fn send_raw(&mut self, data: &[u8]) -> Result<()> {
        self.stream.write_all(data)?;
        Ok(())
    }

    /// Receive exactly `len` raw bytes.
    pub fn recv_raw(&mut self, len: usize) -> Result<Bytes> {
        let mut buf = vec![0u8; len];
        self.read_exact_or_closed(&mut buf)?;
        Ok(Bytes::from(buf))
    }

    /// Send one length-prefixed frame.
    pub fn send_frame(&mut self, data: &[u8]) -> Result<()> {
        self.send_u64(data.len() as u64)?;
        if !data.is_empty() {
            self.stream.write_all(data)?;
        }
        Ok(())
    }

    /// Receive one length-prefixed frame.
    pub fn recv_frame(&mut self) -> Result<Bytes> {
        let len = self.recv_u64()?;
        if len > MAX_FRAME_BYTES {
            return Err(CoreError::Io(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("frame length {len} exceeds limit"),
            )));
        }
        if len == 0 {
            return Ok(Bytes::new());
        }
        self.recv_raw(len as usize)
    }

    fn read_exact_or_closed(&mut self, buf: &mut [u8]) -> Result<()> {
        match self.stream.read_exact(buf) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(CoreError::Closed),
            Err(e) => Err(CoreError::Io(e)),
        }
    }

    /// Refresh the last-used timestamp.
    pub fn touch(&mut self) {
        self.last_used = Instant::now();
    }

    /// Time since this connection was last used.
    #[must_use]
    pub fn idle_for(&self) -> Duration {
        self.last_used.elapsed()
    }
}

/// The server-side listening socket. Bound once at startup, never evicted.
#[derive(Debug)]
pub struct Listener {
    inner: TcpListener,
}

impl Listener {
    /// Bind `addr` with `SO_REUSEADDR` and the configured backlog.
    pub fn bind(addr: &str, config: &Config) -> Result<Self> {
        let target = resolve(addr)?;
        let domain = Domain::for_address(target);
        let sock = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
        sock.set_reuse_address(true)?;
        sock.bind(&target.into())?;
        sock.listen(config.socket_backlog as i32)?;
        trace!(%addr, "listening");
        Ok(Self {
            inner: sock.into(),
        })
    }

    /// Block until the next inbound connection, applying the socket options
    /// with the server-side idle deadline for reads.
    pub fn accept(&self, config: &Config) -> Result<FramedSocket> {
        let (stream, peer) = self.inner.accept()?;
        configure(&stream, config)?;
        stream.set_read_timeout(Some(config.server_connection_timeout))?;
        trace!(%peer, "accepted connection");
        Ok(FramedSocket::from_stream(stream))
    }

    /// The locally bound address.
    pub fn local_addr(&self) -> Result<std::net::SocketAddr> {
        Ok(self.inner.local_addr()?)
    }
}
