//! An asynchronous stub DNS resolver.
//!
//! Queries are submitted to a [`Channel`], which sends them to the
//! configured nameservers, retries and fails over as needed, and reports
//! the outcome of every query through exactly one callback.

pub mod dns;

pub use crate::dns::channel::Channel;
pub use crate::dns::client::{Callback, DnsClient, ResolveError};
pub use crate::dns::config::{NameServer, ResolverConfig};
pub use crate::dns::protocol::{DnsPacket, DnsRecord, QueryClass, QueryType, ResultCode};
pub use crate::dns::query::QueryId;
pub use crate::dns::state::{QueryStatus, Submitter};
#[cfg(unix)]
pub use crate::dns::system::SystemTransport;
pub use crate::dns::transport::{Protocol, Transport};
