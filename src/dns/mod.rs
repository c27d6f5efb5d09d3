//! The dns module implements the DNS protocol and the asynchronous stub
//! resolver built on top of it

pub mod buffer;
pub mod channel;
pub mod client;
pub mod config;
pub mod connection;
pub mod deadline;
pub mod index;
pub mod protocol;
pub mod query;
pub mod state;
#[cfg(unix)]
pub mod system;
pub mod transport;

#[cfg(test)]
pub mod mock;
