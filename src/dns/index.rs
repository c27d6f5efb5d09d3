//! lookup from transport handles to the connections that own them

use std::collections::HashMap;

use crate::dns::connection::ServerConnection;
use crate::dns::transport::{Interest, SocketHandle};

#[derive(Debug, Default)]
pub struct SocketIndex {
    connections: HashMap<SocketHandle, ServerConnection>,
}

impl SocketIndex {
    pub fn new() -> SocketIndex {
        SocketIndex::default()
    }

    /// Stores a connection under its own handle, returning any connection
    /// previously registered there.
    pub fn insert(&mut self, conn: ServerConnection) -> Option<ServerConnection> {
        self.connections.insert(conn.handle(), conn)
    }

    pub fn get(&self, handle: SocketHandle) -> Option<&ServerConnection> {
        self.connections.get(&handle)
    }

    pub fn get_mut(&mut self, handle: SocketHandle) -> Option<&mut ServerConnection> {
        self.connections.get_mut(&handle)
    }

    pub fn remove(&mut self, handle: SocketHandle) -> Option<ServerConnection> {
        self.connections.remove(&handle)
    }

    pub fn contains(&self, handle: SocketHandle) -> bool {
        self.connections.contains_key(&handle)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Handles in ascending order, so every pass over the index visits
    /// connections in the same sequence.
    pub fn handles(&self) -> Vec<SocketHandle> {
        let mut handles: Vec<SocketHandle> = self.connections.keys().copied().collect();
        handles.sort();
        handles
    }

    pub fn interests(&self) -> Vec<(SocketHandle, Interest)> {
        self.handles()
            .into_iter()
            .filter_map(|handle| {
                let interest = self.connections.get(&handle)?.interest();
                Some((handle, interest))
            })
            .collect()
    }

    pub fn drain(&mut self) -> Vec<ServerConnection> {
        let mut conns: Vec<ServerConnection> =
            self.connections.drain().map(|(_, conn)| conn).collect();
        conns.sort_by_key(|conn| conn.handle());
        conns
    }
}

#[cfg(test)]
mod tests {

    use std::net::{IpAddr, Ipv4Addr, SocketAddr};

    use super::*;

    use crate::dns::mock::MockTransport;
    use crate::dns::transport::Protocol;

    #[test]
    fn test_index_lookup() {
        let mut transport = MockTransport::new();
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 53);
        let udp = ServerConnection::open(&mut transport, 0, addr, Protocol::Udp).unwrap();
        let tcp = ServerConnection::open(&mut transport, 0, addr, Protocol::Tcp).unwrap();
        let (udp_handle, tcp_handle) = (udp.handle(), tcp.handle());

        let mut index = SocketIndex::new();
        assert!(index.insert(tcp).is_none());
        assert!(index.insert(udp).is_none());
        assert_eq!(2, index.len());

        assert_eq!(Some(Protocol::Udp), index.get(udp_handle).map(|c| c.protocol));
        assert_eq!(vec![udp_handle, tcp_handle], index.handles());

        let interests = index.interests();
        assert!(interests[0].1.readable);
        assert!(interests[1].1.writable);

        assert!(index.remove(udp_handle).is_some());
        assert!(!index.contains(udp_handle));
        assert!(index.get_mut(udp_handle).is_none());

        assert_eq!(1, index.drain().len());
        assert!(index.is_empty());
    }
}
