//! holds the DnsClient trait describing an interface for submitting DNS
//! queries, along with the errors a query can finish with

use std::io;

use derive_more::Display;

use crate::dns::protocol::{DnsPacket, QueryClass, QueryType, ResultCode};
use crate::dns::query::QueryId;
use crate::dns::state::Submitter;

#[derive(Debug, Display, Clone, PartialEq, Eq)]
pub enum ResolveError {
    BadResponse,
    ConnectionError,
    Timeout,
    AllocationFailure,
    Cancelled,
    NoServers,
    #[display(fmt = "server failure: {}", _0)]
    ServerFailure(ResultCode),
    BadName,
    NotFound,
}

impl std::error::Error for ResolveError {}

impl ResolveError {
    pub fn from_io_kind(kind: io::ErrorKind) -> ResolveError {
        match kind {
            io::ErrorKind::OutOfMemory => ResolveError::AllocationFailure,
            _ => ResolveError::ConnectionError,
        }
    }
}

impl From<io::Error> for ResolveError {
    fn from(err: io::Error) -> Self {
        ResolveError::from_io_kind(err.kind())
    }
}

pub type Result<T> = std::result::Result<T, ResolveError>;

/// Receives the final outcome of one query. The submitter lets the
/// callback start follow-up queries, which run on the next iteration of the
/// loop.
pub type Callback = Box<dyn FnOnce(&mut Submitter, Result<DnsPacket>)>;

pub trait DnsClient {
    fn send_query(
        &mut self,
        qname: &str,
        qtype: QueryType,
        qclass: QueryClass,
        callback: Callback,
    ) -> Result<QueryId>;

    fn query<F>(&mut self, qname: &str, qtype: QueryType, callback: F) -> Result<QueryId>
    where
        F: FnOnce(&mut Submitter, Result<DnsPacket>) + 'static,
        Self: Sized,
    {
        self.send_query(qname, qtype, QueryClass::IN, Box::new(callback))
    }
}
