//! the resolution engine: one control loop driving every query of a channel
//! through sending, retrying and failing over until it is answered

use std::collections::{HashMap, VecDeque};
use std::io;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, trace, warn};

use crate::dns::client::{Callback, DnsClient, ResolveError, Result};
use crate::dns::config::{self, NameServer, ResolverConfig};
use crate::dns::connection::ServerConnection;
use crate::dns::deadline::DeadlineQueue;
use crate::dns::index::SocketIndex;
use crate::dns::protocol::{DnsPacket, QueryClass, QueryType, ResultCode};
use crate::dns::query::{Query, QueryId};
use crate::dns::state::{QueryState, QueryStatus, Submitter};
use crate::dns::transport::{Protocol, Readiness, SocketHandle, Transport};

/// Upper bound on wire ids in use at once, so picking a free random id
/// stays cheap.
const MAX_IN_FLIGHT: usize = 0xA000;

struct ServerSlot {
    config: NameServer,
    udp: Option<SocketHandle>,
    tcp: Option<SocketHandle>,
    failures: u32,
}

impl ServerSlot {
    fn forget(&mut self, handle: SocketHandle) {
        if self.udp == Some(handle) {
            self.udp = None;
        }
        if self.tcp == Some(handle) {
            self.tcp = None;
        }
    }

    fn owns(&self, handle: SocketHandle) -> bool {
        self.udp == Some(handle) || self.tcp == Some(handle)
    }
}

/// An independent resolver instance: its configuration, its sockets and
/// every query submitted to it.
///
/// Nothing happens in the background. Progress is made by calling
/// [`Channel::process_once`], [`Channel::run`] or [`Channel::run_for`],
/// and callbacks are invoked from within those calls.
pub struct Channel<T: Transport> {
    config: ResolverConfig,
    transport: T,
    servers: Vec<ServerSlot>,
    sockets: SocketIndex,
    queries: HashMap<QueryId, QueryState>,
    wire_ids: HashMap<u16, QueryId>,
    deadlines: DeadlineQueue,
    submitter: Submitter,
    retries: VecDeque<QueryId>,
    rng: StdRng,
    rotation: usize,
}

impl<T: Transport> Channel<T> {
    pub fn new(config: ResolverConfig, transport: T) -> config::Result<Channel<T>> {
        Channel::with_rng(config, transport, StdRng::from_entropy())
    }

    /// Like [`Channel::new`], with a fixed seed for the query id generator.
    pub fn with_seed(
        config: ResolverConfig,
        transport: T,
        seed: u64,
    ) -> config::Result<Channel<T>> {
        Channel::with_rng(config, transport, StdRng::seed_from_u64(seed))
    }

    fn with_rng(config: ResolverConfig, transport: T, rng: StdRng) -> config::Result<Channel<T>> {
        config.validate()?;

        let servers = config
            .servers
            .iter()
            .map(|server| ServerSlot {
                config: server.clone(),
                udp: None,
                tcp: None,
                failures: 0,
            })
            .collect::<Vec<_>>();

        Ok(Channel {
            submitter: Submitter::new(servers.len()),
            config,
            transport,
            servers,
            sockets: SocketIndex::new(),
            queries: HashMap::new(),
            wire_ids: HashMap::new(),
            deadlines: DeadlineQueue::new(),
            retries: VecDeque::new(),
            rng,
            rotation: 0,
        })
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Queries that have not delivered their result yet.
    pub fn pending(&self) -> usize {
        self.queries.len() + self.submitter.queued()
    }

    pub fn has_work(&self) -> bool {
        self.pending() > 0
    }

    pub fn query_status(&self, id: QueryId) -> Option<QueryStatus> {
        if let Some(state) = self.queries.get(&id) {
            return Some(state.status);
        }
        if self.submitter.is_queued(id) {
            return Some(QueryStatus::Pending);
        }

        None
    }

    pub fn attempts(&self, id: QueryId) -> Option<usize> {
        self.queries.get(&id).map(|state| state.attempts)
    }

    /// Runs one iteration of the loop: start queued queries, wait for
    /// socket activity bounded by the earliest deadline and `limit`, then
    /// handle whatever became ready and whatever timed out.
    pub fn process_once(&mut self, limit: Option<Duration>) -> io::Result<()> {
        self.start_queued();
        self.drain_retries();

        if self.queries.is_empty() {
            self.close_idle();
            return Ok(());
        }

        let interests = self.sockets.interests();
        let now = self.transport.now();
        let mut timeout = self
            .deadlines
            .peek_earliest()
            .map(|(deadline, _)| deadline.saturating_duration_since(now));
        if let Some(limit) = limit {
            timeout = Some(timeout.map_or(limit, |t| t.min(limit)));
        }

        let ready = match self.transport.wait(&interests, timeout) {
            Ok(ready) => ready,
            Err(ref err) if err.kind() == io::ErrorKind::Interrupted => Vec::new(),
            Err(err) => return Err(err),
        };

        for readiness in ready {
            self.process_ready(readiness);
            self.drain_retries();
        }

        self.expire();
        self.drain_retries();
        self.close_idle();

        Ok(())
    }

    /// Loops until every query has delivered its result.
    pub fn run(&mut self) -> io::Result<()> {
        while self.has_work() {
            self.process_once(None)?;
        }

        Ok(())
    }

    /// Loops until every query has delivered its result or `limit` has
    /// passed. A limit too large to represent runs without one.
    pub fn run_for(&mut self, limit: Duration) -> io::Result<()> {
        let end = match self.transport.now().checked_add(limit) {
            Some(end) => end,
            None => return self.run(),
        };
        while self.has_work() {
            let now = self.transport.now();
            if now >= end {
                break;
            }
            self.process_once(Some(end - now))?;
        }

        Ok(())
    }

    /// Delivers `Cancelled` to one query. Returns false if the query has
    /// already finished.
    pub fn cancel(&mut self, id: QueryId) -> bool {
        if self.queries.contains_key(&id) {
            self.retries.retain(|queued| *queued != id);
            self.finish(id, Err(ResolveError::Cancelled));
            return true;
        }

        if let Some((_, callback)) = self.submitter.remove(id) {
            callback(&mut self.submitter, Err(ResolveError::Cancelled));
            return true;
        }

        false
    }

    /// Delivers `Cancelled` to every started and queued query.
    pub fn cancel_all(&mut self) {
        let mut ids: Vec<QueryId> = self.queries.keys().copied().collect();
        ids.sort();

        self.retries.clear();
        for id in ids {
            self.finish(id, Err(ResolveError::Cancelled));
        }

        for (query, callback) in self.submitter.take_queued() {
            trace!(query = %query.id, "cancelling queued query");
            callback(&mut self.submitter, Err(ResolveError::Cancelled));
        }
    }

    /// Refuses further submissions, cancels everything outstanding and
    /// closes every socket.
    pub fn close(&mut self) {
        if !self.submitter.is_closed() {
            debug!(pending = self.pending(), "closing channel");
        }

        self.submitter.close();
        self.cancel_all();

        for conn in self.sockets.drain() {
            conn.close(&mut self.transport);
        }
        for slot in self.servers.iter_mut() {
            slot.udp = None;
            slot.tcp = None;
        }
    }

    fn start_queued(&mut self) {
        while let Some((query, callback)) = self.submitter.pop() {
            self.start(query, callback);
        }
    }

    fn start(&mut self, query: Query, callback: Callback) {
        let id = query.id;
        let servers = self.server_order();

        debug!(query = %id, name = %query.name, qtype = %query.qtype, "starting query");

        self.queries.insert(id, QueryState::new(query, callback, servers));
        self.transmit(id);
    }

    /// Order in which a new query tries the servers. With rotation every
    /// query starts one server further along, otherwise queries start at
    /// the server with the fewest consecutive failures.
    fn server_order(&mut self) -> Vec<usize> {
        let count = self.servers.len();
        if count == 0 {
            return Vec::new();
        }

        let first = if self.config.rotate {
            let first = self.rotation % count;
            self.rotation = (first + 1) % count;
            first
        } else {
            self.servers
                .iter()
                .enumerate()
                .min_by_key(|(_, slot)| slot.failures)
                .map_or(0, |(idx, _)| idx)
        };

        (0..count).map(|offset| (first + offset) % count).collect()
    }

    fn allocate_wire_id(&mut self) -> Option<u16> {
        if self.wire_ids.len() >= MAX_IN_FLIGHT {
            return None;
        }

        loop {
            let id: u16 = self.rng.gen();
            if !self.wire_ids.contains_key(&id) {
                return Some(id);
            }
        }
    }

    /// Sends the current attempt of a query and arms its timeout.
    fn transmit(&mut self, id: QueryId) {
        let (server, protocol, attempt) = match self.queries.get(&id) {
            Some(state) => {
                let server = state.current_server();
                let tcp = state.use_tcp
                    || self.config.use_tcp
                    || self.servers[server].config.protocol == Protocol::Tcp;
                let protocol = if tcp { Protocol::Tcp } else { Protocol::Udp };
                (server, protocol, state.attempts)
            }
            None => return,
        };

        let wire_id = match self.allocate_wire_id() {
            Some(wire_id) => wire_id,
            None => {
                warn!(query = %id, in_flight = self.wire_ids.len(), "no free query id");
                self.finish(id, Err(ResolveError::AllocationFailure));
                return;
            }
        };

        let message = match self.queries.get(&id) {
            Some(state) => DnsPacket::query(&state.query, wire_id).to_bytes(),
            None => return,
        };
        let message = match message {
            Ok(message) => message,
            Err(err) => {
                debug!(query = %id, %err, "failed to encode query");
                self.finish(id, Err(ResolveError::BadName));
                return;
            }
        };

        let addr = self.servers[server].config.socket_addr();
        let handle = match self.send_on(server, protocol, &message) {
            Ok(handle) => handle,
            Err(err) => {
                debug!(query = %id, %addr, %protocol, %err, "failed to send query");
                self.schedule_retry(id, err);
                return;
            }
        };

        let timeout = self.config.timeout_for(attempt);
        let deadline = self.deadlines.insert(self.transport.now() + timeout, id);
        self.wire_ids.insert(wire_id, id);
        if let Some(conn) = self.sockets.get_mut(handle) {
            conn.assign(id);
        }
        if let Some(state) = self.queries.get_mut(&id) {
            state.wire_id = Some(wire_id);
            state.connection = Some(handle);
            state.deadline = Some(deadline);
            state.status = QueryStatus::Sent { server, protocol };
        }

        debug!(
            query = %id,
            wire_id,
            %addr,
            %protocol,
            attempt,
            timeout_ms = timeout.as_millis() as u64,
            "sent query"
        );
    }

    fn send_on(
        &mut self,
        server: usize,
        protocol: Protocol,
        message: &[u8],
    ) -> Result<SocketHandle> {
        // failures on an open socket are counted by fail_connection
        let handle = match self.connection_for(server, protocol) {
            Ok(handle) => handle,
            Err(err) => {
                self.servers[server].failures += 1;
                return Err(err.into());
            }
        };

        let sent = match self.sockets.get_mut(handle) {
            Some(conn) => conn.send(&mut self.transport, message),
            None => Err(io::Error::from(io::ErrorKind::NotConnected)),
        };
        if let Err(err) = sent {
            let error = ResolveError::from_io_kind(err.kind());
            self.fail_connection(handle, &err);
            return Err(error);
        }

        if protocol == Protocol::Udp && self.config.udp_max_queries > 0 {
            let spent = self
                .sockets
                .get(handle)
                .map_or(false, |conn| conn.total_queries() >= self.config.udp_max_queries);
            if spent {
                trace!(%handle, "retiring udp socket");
                self.servers[server].forget(handle);
            }
        }

        Ok(handle)
    }

    fn connection_for(&mut self, server: usize, protocol: Protocol) -> io::Result<SocketHandle> {
        let slot = &self.servers[server];
        let existing = match protocol {
            Protocol::Udp => slot.udp,
            Protocol::Tcp => slot.tcp,
        };
        if let Some(handle) = existing {
            if self.sockets.contains(handle) {
                return Ok(handle);
            }
        }

        let addr = slot.config.socket_addr();
        let conn = ServerConnection::open(&mut self.transport, server, addr, protocol)?;
        let handle = conn.handle();
        self.sockets.insert(conn);

        let slot = &mut self.servers[server];
        match protocol {
            Protocol::Udp => slot.udp = Some(handle),
            Protocol::Tcp => slot.tcp = Some(handle),
        }

        Ok(handle)
    }

    /// Unlinks a query from its deadline, wire id and connection. The
    /// state itself stays in place.
    fn detach(&mut self, id: QueryId) {
        let state = match self.queries.get_mut(&id) {
            Some(state) => state,
            None => return,
        };

        if let Some(deadline) = state.deadline.take() {
            self.deadlines.remove(deadline);
        }
        if let Some(wire_id) = state.wire_id.take() {
            self.wire_ids.remove(&wire_id);
        }
        if let Some(handle) = state.connection.take() {
            if let Some(conn) = self.sockets.get_mut(handle) {
                conn.release(id);
            }
        }
    }

    fn schedule_retry(&mut self, id: QueryId, error: ResolveError) {
        self.detach(id);

        if let Some(state) = self.queries.get_mut(&id) {
            state.status = QueryStatus::Retrying;
            state.last_error = Some(error);
            if !self.retries.contains(&id) {
                self.retries.push_back(id);
            }
        }
    }

    fn drain_retries(&mut self) {
        let budget = self.config.attempt_budget();

        while let Some(id) = self.retries.pop_front() {
            let exhausted = match self.queries.get_mut(&id) {
                Some(state) => {
                    state.attempts += 1;
                    state.attempts >= budget
                }
                None => continue,
            };

            if exhausted {
                let error = self
                    .queries
                    .get(&id)
                    .and_then(|state| state.last_error.clone())
                    .unwrap_or(ResolveError::Timeout);
                self.finish(id, Err(error));
            } else {
                self.transmit(id);
            }
        }
    }

    fn finish(&mut self, id: QueryId, result: Result<DnsPacket>) {
        self.detach(id);

        let state = match self.queries.remove(&id) {
            Some(state) => state,
            None => return,
        };

        match result {
            Ok(ref packet) => {
                debug!(query = %id, rcode = %packet.header.rescode, answers = packet.answers.len(), "query answered")
            }
            Err(ref err) => debug!(query = %id, %err, attempts = state.attempts, "query failed"),
        }

        state.complete(&mut self.submitter, result);
    }

    fn process_ready(&mut self, readiness: Readiness) {
        let handle = readiness.handle;

        if readiness.writable {
            let flushed = match self.sockets.get_mut(handle) {
                Some(conn) => conn.on_writable(&mut self.transport),
                None => return,
            };
            if let Err(err) = flushed {
                self.fail_connection(handle, &err);
                return;
            }
        }

        if readiness.readable {
            let outcome = match self.sockets.get_mut(handle) {
                Some(conn) => conn.read_messages(&mut self.transport),
                None => return,
            };
            for message in outcome.messages {
                self.handle_message(handle, &message);
            }
            if let Some(err) = outcome.error {
                self.fail_connection(handle, &err);
            }
        }
    }

    /// The live query waiting on `handle` for a reply with `wire_id`.
    fn owner(&self, handle: SocketHandle, wire_id: u16) -> Option<QueryId> {
        let id = *self.wire_ids.get(&wire_id)?;
        let state = self.queries.get(&id)?;
        if state.connection == Some(handle) {
            Some(id)
        } else {
            None
        }
    }

    fn handle_message(&mut self, handle: SocketHandle, message: &[u8]) {
        let (server, protocol) = match self.sockets.get(handle) {
            Some(conn) => (conn.server, conn.protocol),
            None => return,
        };

        let packet = match DnsPacket::from_bytes(message) {
            Ok(packet) => packet,
            Err(err) => {
                let owner = DnsPacket::peek_id(message).and_then(|w| self.owner(handle, w));
                debug!(%handle, %err, len = message.len(), "malformed response");
                if let Some(id) = owner {
                    self.servers[server].failures += 1;
                    self.schedule_retry(id, ResolveError::BadResponse);
                }
                return;
            }
        };

        let id = match self.owner(handle, packet.header.id) {
            Some(id) => id,
            None => {
                trace!(%handle, wire_id = packet.header.id, "discarding unmatched response");
                return;
            }
        };

        let matches = packet.header.response
            && self
                .queries
                .get(&id)
                .map_or(false, |state| state.matches(&packet));
        if !matches {
            debug!(query = %id, "discarding response with a different question");
            return;
        }

        if packet.header.truncated_message
            && protocol == Protocol::Udp
            && !self.config.ignore_truncation
        {
            debug!(query = %id, "response truncated, retrying over tcp");
            self.detach(id);
            if let Some(state) = self.queries.get_mut(&id) {
                state.use_tcp = true;
            }
            self.transmit(id);
            return;
        }

        let rcode = packet.header.rescode;
        let server_failure = matches!(
            rcode,
            ResultCode::SERVFAIL | ResultCode::NOTIMP | ResultCode::REFUSED
        );
        if self.config.check_response && server_failure {
            debug!(query = %id, %rcode, "server failure");
            self.servers[server].failures += 1;
            self.schedule_retry(id, ResolveError::ServerFailure(rcode));
            return;
        }

        self.servers[server].failures = 0;
        self.finish(id, Ok(packet));
    }

    /// Tears down a connection and moves every query waiting on it to the
    /// next server.
    fn fail_connection(&mut self, handle: SocketHandle, err: &io::Error) {
        let conn = match self.sockets.remove(handle) {
            Some(conn) => conn,
            None => return,
        };

        warn!(%handle, addr = %conn.addr, protocol = %conn.protocol, %err, "connection failed");

        let slot = &mut self.servers[conn.server];
        slot.forget(handle);
        slot.failures += 1;

        let error = ResolveError::from_io_kind(err.kind());
        for id in conn.assigned() {
            if let Some(state) = self.queries.get_mut(&id) {
                state.connection = None;
            }
            self.schedule_retry(id, error.clone());
        }

        conn.close(&mut self.transport);
    }

    fn expire(&mut self) {
        let now = self.transport.now();

        for id in self.deadlines.pop_expired(now) {
            let server = match self.queries.get_mut(&id) {
                Some(state) => {
                    state.deadline = None;
                    match state.status {
                        QueryStatus::Sent { server, .. } => Some(server),
                        _ => None,
                    }
                }
                None => continue,
            };

            debug!(query = %id, "query timed out");
            if let Some(server) = server {
                self.servers[server].failures += 1;
            }
            self.schedule_retry(id, ResolveError::Timeout);
        }
    }

    fn close_idle(&mut self) {
        for handle in self.sockets.handles() {
            let idle = self.sockets.get(handle).map_or(false, |conn| conn.is_idle());
            if !idle {
                continue;
            }

            let current = self.servers.iter().any(|slot| slot.owns(handle));
            if self.config.stay_open && current {
                continue;
            }

            if let Some(conn) = self.sockets.remove(handle) {
                self.servers[conn.server].forget(handle);
                conn.close(&mut self.transport);
            }
        }
    }
}

impl<T: Transport> DnsClient for Channel<T> {
    /// Queues the query and sends it right away. The result is delivered
    /// from a later call to one of the processing methods.
    fn send_query(
        &mut self,
        qname: &str,
        qtype: QueryType,
        qclass: QueryClass,
        callback: Callback,
    ) -> Result<QueryId> {
        let id = self.submitter.send_query(qname, qtype, qclass, callback)?;

        self.start_queued();
        self.drain_retries();

        Ok(id)
    }
}

impl<T: Transport> Drop for Channel<T> {
    fn drop(&mut self) {
        self.close();
    }
}
