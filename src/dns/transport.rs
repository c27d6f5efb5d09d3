//! the socket primitives the query engine is driven through

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use serde_derive::{Deserialize, Serialize};

/// Opaque identifier of one open socket, assigned by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SocketHandle(pub u64);

impl fmt::Display for SocketHandle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "socket-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Udp,
    Tcp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Protocol::Udp => write!(f, "udp"),
            Protocol::Tcp => write!(f, "tcp"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Interest {
    pub readable: bool,
    pub writable: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Readiness {
    pub handle: SocketHandle,
    pub readable: bool,
    pub writable: bool,
}

/// Non-blocking socket operations.
///
/// Every call returns immediately. `recv` and `send` report a lack of data
/// or buffer space with `io::ErrorKind::WouldBlock`; `wait` is the only
/// operation allowed to sleep.
pub trait Transport {
    /// Creates a socket bound to `addr`. For TCP the connection may still be
    /// in progress; it is usable once `wait` reports it writable.
    fn open(&mut self, addr: SocketAddr, protocol: Protocol) -> io::Result<SocketHandle>;

    fn send(&mut self, handle: SocketHandle, data: &[u8]) -> io::Result<usize>;

    /// Reads into `buf`, returning the byte count and the sender. A zero
    /// count on a stream socket means the peer closed it.
    fn recv(&mut self, handle: SocketHandle, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)>;

    fn close(&mut self, handle: SocketHandle);

    /// Blocks until one of the sockets is ready or the timeout passes.
    /// `None` waits indefinitely.
    fn wait(
        &mut self,
        interests: &[(SocketHandle, Interest)],
        timeout: Option<Duration>,
    ) -> io::Result<Vec<Readiness>>;

    fn now(&self) -> Instant {
        Instant::now()
    }
}
