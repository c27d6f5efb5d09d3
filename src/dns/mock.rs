//! scripted in-memory transport with simulated time, used by the tests

use std::collections::{HashMap, HashSet, VecDeque};
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::{Duration, Instant};

use crate::dns::protocol::{DnsPacket, DnsRecord, QueryClass, QueryType, ResultCode};
use crate::dns::transport::{Interest, Protocol, Readiness, SocketHandle, Transport};

/// Something a scripted server sends back after a request.
#[derive(Debug, Clone)]
pub struct Reply {
    delay: Duration,
    data: Vec<u8>,
    source: Option<SocketAddr>,
    eof: bool,
}

impl Reply {
    /// Bytes delivered as-is: a whole datagram on UDP, a chunk of the
    /// stream on TCP.
    pub fn raw(data: Vec<u8>) -> Reply {
        Reply {
            delay: Duration::from_secs(0),
            data,
            source: None,
            eof: false,
        }
    }

    /// A message with its TCP length prefix.
    pub fn framed(message: &[u8]) -> Reply {
        let mut data = (message.len() as u16).to_be_bytes().to_vec();
        data.extend_from_slice(message);
        Reply::raw(data)
    }

    pub fn eof() -> Reply {
        Reply {
            eof: true,
            ..Reply::raw(Vec::new())
        }
    }

    pub fn after(mut self, delay: Duration) -> Reply {
        self.delay = delay;
        self
    }

    pub fn spoofed(mut self, source: SocketAddr) -> Reply {
        self.source = Some(source);
        self
    }
}

type Handler = Box<dyn FnMut(&DnsPacket, Protocol) -> Vec<Reply>>;

struct Delivery {
    at: Duration,
    data: Vec<u8>,
    source: SocketAddr,
    eof: bool,
}

struct MockSocket {
    addr: SocketAddr,
    protocol: Protocol,
    inbound: VecDeque<Delivery>,
    stream: Vec<u8>,
}

pub struct MockTransport {
    start: Instant,
    elapsed: Duration,
    next_handle: u64,
    sockets: HashMap<SocketHandle, MockSocket>,
    handlers: HashMap<SocketAddr, Handler>,
    refused: HashSet<SocketAddr>,
    broken: HashSet<SocketAddr>,
    pub sent: Vec<(SocketAddr, Protocol, DnsPacket)>,
    pub opened: usize,
    pub closed: usize,
}

impl Default for MockTransport {
    fn default() -> Self {
        MockTransport::new()
    }
}

impl MockTransport {
    pub fn new() -> MockTransport {
        MockTransport {
            start: Instant::now(),
            elapsed: Duration::from_secs(0),
            next_handle: 1,
            sockets: HashMap::new(),
            handlers: HashMap::new(),
            refused: HashSet::new(),
            broken: HashSet::new(),
            sent: Vec::new(),
            opened: 0,
            closed: 0,
        }
    }

    /// Answers every request sent to `addr` with the replies returned by
    /// `handler`. Servers without a handler never answer.
    pub fn serve<F>(&mut self, addr: SocketAddr, handler: F)
    where
        F: FnMut(&DnsPacket, Protocol) -> Vec<Reply> + 'static,
    {
        self.handlers.insert(addr, Box::new(handler));
    }

    pub fn refuse(&mut self, addr: SocketAddr) {
        self.refused.insert(addr);
    }

    /// Sockets to `addr` open fine, but every send on them fails.
    pub fn break_sends(&mut self, addr: SocketAddr) {
        self.broken.insert(addr);
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    pub fn open_sockets(&self) -> usize {
        self.sockets.len()
    }

    pub fn sent_to(&self, addr: SocketAddr) -> Vec<Protocol> {
        self.sent
            .iter()
            .filter(|(to, _, _)| *to == addr)
            .map(|(_, protocol, _)| *protocol)
            .collect()
    }

    fn dispatch(&mut self, handle: SocketHandle, message: &[u8]) {
        let (addr, protocol) = match self.sockets.get(&handle) {
            Some(sock) => (sock.addr, sock.protocol),
            None => return,
        };
        let request = match DnsPacket::from_bytes(message) {
            Ok(request) => request,
            Err(_) => return,
        };

        let replies = match self.handlers.get_mut(&addr) {
            Some(handler) => handler(&request, protocol),
            None => Vec::new(),
        };
        self.sent.push((addr, protocol, request));

        let now = self.elapsed;
        if let Some(sock) = self.sockets.get_mut(&handle) {
            for reply in replies {
                let delivery = Delivery {
                    at: now + reply.delay,
                    data: reply.data,
                    source: reply.source.unwrap_or(addr),
                    eof: reply.eof,
                };
                let idx = sock
                    .inbound
                    .iter()
                    .position(|d| d.at > delivery.at)
                    .unwrap_or(sock.inbound.len());
                sock.inbound.insert(idx, delivery);
            }
        }
    }

    fn ready(&self, interests: &[(SocketHandle, Interest)]) -> Vec<Readiness> {
        interests
            .iter()
            .filter_map(|(handle, interest)| {
                let sock = self.sockets.get(handle)?;
                let readable = interest.readable
                    && sock.inbound.front().map_or(false, |d| d.at <= self.elapsed);
                if !readable && !interest.writable {
                    return None;
                }

                Some(Readiness {
                    handle: *handle,
                    readable,
                    writable: interest.writable,
                })
            })
            .collect()
    }
}

impl Transport for MockTransport {
    fn open(&mut self, addr: SocketAddr, protocol: Protocol) -> io::Result<SocketHandle> {
        if self.refused.contains(&addr) {
            return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"));
        }

        let handle = SocketHandle(self.next_handle);
        self.next_handle += 1;
        self.opened += 1;
        self.sockets.insert(
            handle,
            MockSocket {
                addr,
                protocol,
                inbound: VecDeque::new(),
                stream: Vec::new(),
            },
        );

        Ok(handle)
    }

    fn send(&mut self, handle: SocketHandle, data: &[u8]) -> io::Result<usize> {
        let sock = self
            .sockets
            .get_mut(&handle)
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotConnected))?;
        if self.broken.contains(&sock.addr) {
            return Err(io::Error::from(io::ErrorKind::BrokenPipe));
        }

        let protocol = sock.protocol;
        match protocol {
            Protocol::Udp => self.dispatch(handle, data),
            Protocol::Tcp => {
                sock.stream.extend_from_slice(data);

                let mut messages = Vec::new();
                while sock.stream.len() >= 2 {
                    let len = u16::from_be_bytes([sock.stream[0], sock.stream[1]]) as usize;
                    if sock.stream.len() < len + 2 {
                        break;
                    }
                    messages.push(sock.stream[2..len + 2].to_vec());
                    sock.stream.drain(..len + 2);
                }

                for message in messages {
                    self.dispatch(handle, &message);
                }
            }
        }

        Ok(data.len())
    }

    fn recv(&mut self, handle: SocketHandle, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        let elapsed = self.elapsed;
        let sock = self
            .sockets
            .get_mut(&handle)
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotConnected))?;

        let due = sock.inbound.front().map_or(false, |d| d.at <= elapsed);
        if !due {
            return Err(io::Error::from(io::ErrorKind::WouldBlock));
        }

        let mut delivery = match sock.inbound.pop_front() {
            Some(delivery) => delivery,
            None => return Err(io::Error::from(io::ErrorKind::WouldBlock)),
        };
        if delivery.eof {
            return Ok((0, delivery.source));
        }

        let len = delivery.data.len().min(buf.len());
        buf[..len].copy_from_slice(&delivery.data[..len]);

        if sock.protocol == Protocol::Tcp && len < delivery.data.len() {
            delivery.data.drain(..len);
            let source = delivery.source;
            sock.inbound.push_front(delivery);
            return Ok((len, source));
        }

        Ok((len, delivery.source))
    }

    fn close(&mut self, handle: SocketHandle) {
        if self.sockets.remove(&handle).is_some() {
            self.closed += 1;
        }
    }

    fn wait(
        &mut self,
        interests: &[(SocketHandle, Interest)],
        timeout: Option<Duration>,
    ) -> io::Result<Vec<Readiness>> {
        let ready = self.ready(interests);
        if !ready.is_empty() {
            return Ok(ready);
        }

        let next_delivery = interests
            .iter()
            .filter(|(_, interest)| interest.readable)
            .filter_map(|(handle, _)| self.sockets.get(handle)?.inbound.front().map(|d| d.at))
            .min();
        let limit = timeout.map(|t| self.elapsed + t);

        let target = match (next_delivery, limit) {
            (Some(a), Some(b)) => a.min(b),
            (Some(a), None) => a,
            (None, Some(b)) => b,
            (None, None) => return Ok(Vec::new()),
        };
        if target > self.elapsed {
            self.elapsed = target;
        }

        Ok(self.ready(interests))
    }

    fn now(&self) -> Instant {
        self.start + self.elapsed
    }
}

/// A NOERROR response echoing the request, with `ips` as A records.
pub fn answer(request: &DnsPacket, ips: &[Ipv4Addr]) -> Vec<u8> {
    respond(request, |packet| {
        for ip in ips {
            packet.answers.push(DnsRecord {
                domain: request.questions[0].name.clone(),
                qtype: QueryType::A,
                class: QueryClass::IN,
                ttl: 300,
                data: ip.octets().to_vec(),
            });
        }
    })
}

pub fn truncated(request: &DnsPacket) -> Vec<u8> {
    respond(request, |packet| packet.header.truncated_message = true)
}

pub fn rcode(request: &DnsPacket, code: ResultCode) -> Vec<u8> {
    respond(request, |packet| packet.header.rescode = code)
}

pub fn respond<F>(request: &DnsPacket, edit: F) -> Vec<u8>
where
    F: FnOnce(&mut DnsPacket),
{
    let mut packet = DnsPacket::new();
    packet.header.id = request.header.id;
    packet.header.response = true;
    packet.header.recursion_desired = request.header.recursion_desired;
    packet.header.recursion_available = true;
    packet.questions = request.questions.clone();
    edit(&mut packet);

    packet.to_bytes().unwrap()
}
