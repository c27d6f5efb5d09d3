//! the caller-facing description of a lookup

use std::fmt;

use crate::dns::buffer::{parse_labels, BufferError};
use crate::dns::protocol::{DnsQuestion, QueryClass, QueryType};

/// Library-assigned identifier of a submitted query. Unique per channel and
/// never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryId(pub u64);

impl fmt::Display for QueryId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub id: QueryId,
    pub name: String,
    pub qtype: QueryType,
    pub qclass: QueryClass,
}

impl Query {
    /// Builds a query after checking that the name can be encoded.
    pub fn new(
        id: QueryId,
        name: &str,
        qtype: QueryType,
        qclass: QueryClass,
    ) -> Result<Query, BufferError> {
        parse_labels(name)?;

        Ok(Query {
            id,
            name: name.to_string(),
            qtype,
            qclass,
        })
    }

    pub fn question(&self) -> DnsQuestion {
        DnsQuestion::new(self.name.clone(), self.qtype, self.qclass)
    }
}

/// True for `onion` and anything below it, which must never be sent to
/// regular nameservers.
pub fn is_onion_domain(name: &str) -> bool {
    let name = name.strip_suffix('.').unwrap_or(name);
    let name = name.as_bytes();

    if name.len() < 5 {
        return false;
    }

    let tail = &name[name.len() - 5..];
    if !tail.eq_ignore_ascii_case(b"onion") {
        return false;
    }

    name.len() == 5 || name[name.len() - 6] == b'.'
}

/// Compares two textual names label by label after resolving escapes, so
/// `\065` and `A` are the same octet. ASCII letters compare
/// case-insensitively and an optional trailing dot is ignored. Names that
/// cannot be encoded never match.
pub fn names_equal(a: &str, b: &str) -> bool {
    match (parse_labels(a), parse_labels(b)) {
        (Ok(a), Ok(b)) => {
            a.len() == b.len() && a.iter().zip(&b).all(|(x, y)| x.eq_ignore_ascii_case(y))
        }
        _ => false,
    }
}
