//! per-query bookkeeping and the handle callbacks use to submit more work

use std::collections::VecDeque;

use crate::dns::client::{Callback, DnsClient, ResolveError, Result};
use crate::dns::deadline::DeadlineHandle;
use crate::dns::protocol::{DnsPacket, QueryClass, QueryType};
use crate::dns::query::{is_onion_domain, names_equal, Query, QueryId};
use crate::dns::transport::{Protocol, SocketHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStatus {
    Pending,
    Sent { server: usize, protocol: Protocol },
    Retrying,
}

/// Everything the engine tracks for one outstanding query.
pub struct QueryState {
    pub query: Query,
    callback: Callback,
    /// Sends that have failed so far. Escalating to TCP does not count.
    pub attempts: usize,
    /// Configured server indices in the order this query tries them.
    pub servers: Vec<usize>,
    pub status: QueryStatus,
    pub use_tcp: bool,
    pub wire_id: Option<u16>,
    pub connection: Option<SocketHandle>,
    pub deadline: Option<DeadlineHandle>,
    pub last_error: Option<ResolveError>,
}

impl QueryState {
    pub fn new(query: Query, callback: Callback, servers: Vec<usize>) -> QueryState {
        QueryState {
            query,
            callback,
            attempts: 0,
            servers,
            status: QueryStatus::Pending,
            use_tcp: false,
            wire_id: None,
            connection: None,
            deadline: None,
            last_error: None,
        }
    }

    pub fn current_server(&self) -> usize {
        if self.servers.is_empty() {
            return 0;
        }

        self.servers[self.attempts % self.servers.len()]
    }

    /// Whether `packet` echoes exactly the question that was asked.
    pub fn matches(&self, packet: &DnsPacket) -> bool {
        match packet.questions.as_slice() {
            [question] => {
                names_equal(&question.name, &self.query.name)
                    && question.qtype.to_num() == self.query.qtype.to_num()
                    && question.qclass.to_num() == self.query.qclass.to_num()
            }
            _ => false,
        }
    }

    /// Hands the outcome to the caller. Consuming the state makes a second
    /// invocation impossible.
    pub fn complete(self, submitter: &mut Submitter, result: Result<DnsPacket>) {
        (self.callback)(submitter, result)
    }
}

/// Accepts new queries on behalf of a channel. Queries are only queued
/// here; the channel starts them on its next iteration.
pub struct Submitter {
    queue: VecDeque<(Query, Callback)>,
    next_id: u64,
    servers: usize,
    closed: bool,
}

impl Submitter {
    pub fn new(servers: usize) -> Submitter {
        Submitter {
            queue: VecDeque::new(),
            next_id: 1,
            servers,
            closed: false,
        }
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn is_queued(&self, id: QueryId) -> bool {
        self.queue.iter().any(|(query, _)| query.id == id)
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub(crate) fn close(&mut self) {
        self.closed = true;
    }

    pub(crate) fn pop(&mut self) -> Option<(Query, Callback)> {
        self.queue.pop_front()
    }

    pub(crate) fn take_queued(&mut self) -> VecDeque<(Query, Callback)> {
        std::mem::take(&mut self.queue)
    }

    pub(crate) fn remove(&mut self, id: QueryId) -> Option<(Query, Callback)> {
        let idx = self.queue.iter().position(|(query, _)| query.id == id)?;
        self.queue.remove(idx)
    }
}

impl DnsClient for Submitter {
    fn send_query(
        &mut self,
        qname: &str,
        qtype: QueryType,
        qclass: QueryClass,
        callback: Callback,
    ) -> Result<QueryId> {
        if self.closed {
            return Err(ResolveError::Cancelled);
        }
        if self.servers == 0 {
            return Err(ResolveError::NoServers);
        }
        if is_onion_domain(qname) {
            return Err(ResolveError::NotFound);
        }

        let id = QueryId(self.next_id);
        let query =
            Query::new(id, qname, qtype, qclass).map_err(|_| ResolveError::BadName)?;
        self.next_id += 1;
        self.queue.push_back((query, callback));

        Ok(id)
    }
}
