//! transport backed by non-blocking operating system sockets

use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream, UdpSocket};
use std::os::unix::io::{AsRawFd, RawFd};
use std::time::Duration;

use socket2::{Domain, Protocol as SocketProtocol, Socket, Type};
use tracing::trace;

use crate::dns::transport::{Interest, Protocol, Readiness, SocketHandle, Transport};

enum SystemSocket {
    Udp(UdpSocket),
    Tcp(TcpStream),
}

impl SystemSocket {
    fn fd(&self) -> RawFd {
        match self {
            SystemSocket::Udp(socket) => socket.as_raw_fd(),
            SystemSocket::Tcp(stream) => stream.as_raw_fd(),
        }
    }
}

#[derive(Default)]
pub struct SystemTransport {
    next_handle: u64,
    sockets: HashMap<SocketHandle, (SocketAddr, SystemSocket)>,
}

impl SystemTransport {
    pub fn new() -> SystemTransport {
        SystemTransport::default()
    }

    fn socket(&mut self, handle: SocketHandle) -> io::Result<&mut (SocketAddr, SystemSocket)> {
        self.sockets
            .get_mut(&handle)
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotConnected))
    }
}

fn domain_for(addr: &SocketAddr) -> Domain {
    if addr.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    }
}

fn in_progress(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock || err.raw_os_error() == Some(libc::EINPROGRESS)
}

impl Transport for SystemTransport {
    fn open(&mut self, addr: SocketAddr, protocol: Protocol) -> io::Result<SocketHandle> {
        let socket = match protocol {
            Protocol::Udp => {
                let socket =
                    Socket::new(domain_for(&addr), Type::DGRAM, Some(SocketProtocol::UDP))?;
                socket.set_nonblocking(true)?;
                socket.connect(&addr.into())?;
                SystemSocket::Udp(socket.into())
            }
            Protocol::Tcp => {
                let socket =
                    Socket::new(domain_for(&addr), Type::STREAM, Some(SocketProtocol::TCP))?;
                socket.set_nonblocking(true)?;
                match socket.connect(&addr.into()) {
                    Ok(()) => {}
                    Err(ref err) if in_progress(err) => {}
                    Err(err) => return Err(err),
                }
                SystemSocket::Tcp(socket.into())
            }
        };

        let handle = SocketHandle(self.next_handle);
        self.next_handle += 1;
        self.sockets.insert(handle, (addr, socket));

        trace!(%handle, %addr, %protocol, "socket created");

        Ok(handle)
    }

    fn send(&mut self, handle: SocketHandle, data: &[u8]) -> io::Result<usize> {
        match self.socket(handle)? {
            (_, SystemSocket::Udp(socket)) => socket.send(data),
            (_, SystemSocket::Tcp(stream)) => stream.write(data),
        }
    }

    fn recv(&mut self, handle: SocketHandle, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        match self.socket(handle)? {
            (_, SystemSocket::Udp(socket)) => socket.recv_from(buf),
            (addr, SystemSocket::Tcp(stream)) => {
                let len = stream.read(buf)?;
                Ok((len, *addr))
            }
        }
    }

    fn close(&mut self, handle: SocketHandle) {
        if self.sockets.remove(&handle).is_some() {
            trace!(%handle, "socket closed");
        }
    }

    fn wait(
        &mut self,
        interests: &[(SocketHandle, Interest)],
        timeout: Option<Duration>,
    ) -> io::Result<Vec<Readiness>> {
        let mut handles = Vec::with_capacity(interests.len());
        let mut fds = Vec::with_capacity(interests.len());
        for (handle, interest) in interests {
            let fd = match self.sockets.get(handle) {
                Some((_, socket)) => socket.fd(),
                None => continue,
            };

            let mut events = 0;
            if interest.readable {
                events |= libc::POLLIN;
            }
            if interest.writable {
                events |= libc::POLLOUT;
            }

            handles.push(*handle);
            fds.push(libc::pollfd {
                fd,
                events,
                revents: 0,
            });
        }

        let timeout_ms = match timeout {
            Some(timeout) => {
                let mut ms = timeout.as_millis();
                if Duration::from_millis(ms as u64) < timeout {
                    ms += 1;
                }
                ms.min(libc::c_int::MAX as u128) as libc::c_int
            }
            None => -1,
        };

        // SAFETY: `fds` is a valid, exclusively borrowed array of pollfd
        // entries whose length is passed alongside it.
        let res = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, timeout_ms) };
        if res < 0 {
            return Err(io::Error::last_os_error());
        }

        let failed = libc::POLLERR | libc::POLLHUP | libc::POLLNVAL;
        let ready = handles
            .into_iter()
            .zip(fds.iter())
            .filter(|(_, fd)| fd.revents != 0)
            .map(|(handle, fd)| Readiness {
                handle,
                readable: fd.revents & (libc::POLLIN | failed) != 0,
                writable: fd.revents & (libc::POLLOUT | failed) != 0,
            })
            .collect();

        Ok(ready)
    }
}
