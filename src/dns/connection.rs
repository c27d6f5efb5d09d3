//! one socket towards one nameserver

use std::collections::BTreeSet;
use std::io;
use std::net::SocketAddr;

use tracing::{debug, trace};

use crate::dns::buffer::MAX_MESSAGE_LEN;
use crate::dns::query::QueryId;
use crate::dns::transport::{Interest, Protocol, SocketHandle, Transport};

const READ_CHUNK: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Messages drained from a socket, plus the error that stopped the read if
/// it was not simply a lack of data.
#[derive(Debug, Default)]
pub struct ReadOutcome {
    pub messages: Vec<Vec<u8>>,
    pub error: Option<io::Error>,
}

#[derive(Debug)]
pub struct ServerConnection {
    pub server: usize,
    pub addr: SocketAddr,
    pub protocol: Protocol,
    handle: SocketHandle,
    state: ConnectionState,
    inbound: Vec<u8>,
    outbound: Vec<u8>,
    queries: BTreeSet<QueryId>,
    total_queries: usize,
}

impl ServerConnection {
    /// Opens a socket towards `addr`. UDP sockets are usable at once, TCP
    /// sockets wait for the connect to finish.
    pub fn open<T: Transport>(
        transport: &mut T,
        server: usize,
        addr: SocketAddr,
        protocol: Protocol,
    ) -> io::Result<ServerConnection> {
        let handle = transport.open(addr, protocol)?;
        let state = match protocol {
            Protocol::Udp => ConnectionState::Connected,
            Protocol::Tcp => ConnectionState::Connecting,
        };

        debug!(%handle, %addr, %protocol, "opened connection");

        Ok(ServerConnection {
            server,
            addr,
            protocol,
            handle,
            state,
            inbound: Vec::new(),
            outbound: Vec::new(),
            queries: BTreeSet::new(),
            total_queries: 0,
        })
    }

    pub fn handle(&self) -> SocketHandle {
        self.handle
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn interest(&self) -> Interest {
        Interest {
            readable: self.state == ConnectionState::Connected,
            writable: self.state == ConnectionState::Connecting || !self.outbound.is_empty(),
        }
    }

    /// Transmits one message. On TCP the message is framed and queued, and
    /// written as far as the socket accepts.
    pub fn send<T: Transport>(&mut self, transport: &mut T, message: &[u8]) -> io::Result<()> {
        match self.protocol {
            Protocol::Udp => {
                let sent = transport.send(self.handle, message)?;
                if sent != message.len() {
                    return Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "datagram was not sent in full",
                    ));
                }
            }
            Protocol::Tcp => {
                if message.len() > MAX_MESSAGE_LEN {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidInput,
                        "message too large for tcp framing",
                    ));
                }
                self.outbound
                    .extend_from_slice(&(message.len() as u16).to_be_bytes());
                self.outbound.extend_from_slice(message);

                if self.state == ConnectionState::Connected {
                    self.flush(transport)?;
                }
            }
        }

        self.total_queries += 1;

        Ok(())
    }

    /// Called when the transport reports the socket writable.
    pub fn on_writable<T: Transport>(&mut self, transport: &mut T) -> io::Result<()> {
        if self.state == ConnectionState::Connecting {
            trace!(handle = %self.handle, "connection established");
            self.state = ConnectionState::Connected;
        }

        self.flush(transport)
    }

    fn flush<T: Transport>(&mut self, transport: &mut T) -> io::Result<()> {
        while !self.outbound.is_empty() {
            match transport.send(self.handle, &self.outbound) {
                Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero)),
                Ok(n) => {
                    self.outbound.drain(..n);
                }
                Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            }
        }

        Ok(())
    }

    /// Drains everything the socket has to offer.
    pub fn read_messages<T: Transport>(&mut self, transport: &mut T) -> ReadOutcome {
        let mut outcome = ReadOutcome::default();
        let mut buf = match self.protocol {
            Protocol::Udp => vec![0; MAX_MESSAGE_LEN],
            Protocol::Tcp => vec![0; READ_CHUNK],
        };

        loop {
            let (len, source) = match transport.recv(self.handle, &mut buf) {
                Ok(res) => res,
                Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    outcome.error = Some(err);
                    break;
                }
            };

            match self.protocol {
                Protocol::Udp => {
                    if source != self.addr {
                        debug!(expected = %self.addr, %source, "dropping datagram from unexpected source");
                        continue;
                    }
                    outcome.messages.push(buf[..len].to_vec());
                }
                Protocol::Tcp => {
                    if len == 0 {
                        outcome.error = Some(io::Error::new(
                            io::ErrorKind::UnexpectedEof,
                            "connection closed by server",
                        ));
                        break;
                    }
                    let frames = self.push_inbound(&buf[..len]);
                    outcome.messages.extend(frames);
                }
            }
        }

        outcome
    }

    /// Appends stream bytes and returns every frame completed by them.
    pub fn push_inbound(&mut self, data: &[u8]) -> Vec<Vec<u8>> {
        self.inbound.extend_from_slice(data);

        let mut frames = Vec::new();
        let mut start = 0;
        while self.inbound.len() - start >= 2 {
            let len = u16::from_be_bytes([self.inbound[start], self.inbound[start + 1]]) as usize;
            if self.inbound.len() - start - 2 < len {
                break;
            }
            frames.push(self.inbound[start + 2..start + 2 + len].to_vec());
            start += 2 + len;
        }
        self.inbound.drain(..start);

        frames
    }

    pub fn assign(&mut self, id: QueryId) {
        self.queries.insert(id);
    }

    pub fn release(&mut self, id: QueryId) -> bool {
        self.queries.remove(&id)
    }

    /// Queries currently waiting for an answer on this connection, oldest
    /// id first.
    pub fn assigned(&self) -> Vec<QueryId> {
        self.queries.iter().copied().collect()
    }

    pub fn is_idle(&self) -> bool {
        self.queries.is_empty() && self.outbound.is_empty()
    }

    pub fn total_queries(&self) -> usize {
        self.total_queries
    }

    pub fn close<T: Transport>(mut self, transport: &mut T) {
        debug!(handle = %self.handle, addr = %self.addr, "closing connection");
        self.state = ConnectionState::Disconnected;
        transport.close(self.handle);
    }
}
