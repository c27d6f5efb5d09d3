//! resolver settings shared by every query of a channel

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use derive_more::{Display, From};
use serde_derive::{Deserialize, Serialize};

use crate::dns::transport::Protocol;

#[derive(Debug, Display, From)]
pub enum ConfigError {
    Json(serde_json::Error),
    #[display(fmt = "invalid configuration: {}", _0)]
    Invalid(&'static str),
}

impl std::error::Error for ConfigError {}

pub type Result<T> = std::result::Result<T, ConfigError>;

fn default_port() -> u16 {
    53
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameServer {
    pub addr: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub protocol: Protocol,
}

impl NameServer {
    pub fn new(addr: SocketAddr) -> NameServer {
        NameServer {
            addr: addr.ip(),
            port: addr.port(),
            protocol: Protocol::Udp,
        }
    }

    pub fn tcp(addr: SocketAddr) -> NameServer {
        NameServer {
            protocol: Protocol::Tcp,
            ..NameServer::new(addr)
        }
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.addr, self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    pub servers: Vec<NameServer>,
    /// Tries per server before a query gives up.
    pub attempts: usize,
    pub timeout_ms: u64,
    pub backoff: f64,
    pub max_timeout_ms: u64,
    pub rotate: bool,
    pub use_tcp: bool,
    pub ignore_truncation: bool,
    pub check_response: bool,
    pub stay_open: bool,
    /// Retire a UDP socket after this many queries. Zero disables it.
    pub udp_max_queries: usize,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        ResolverConfig {
            servers: Vec::new(),
            attempts: 3,
            timeout_ms: 2000,
            backoff: 2.0,
            max_timeout_ms: 30_000,
            rotate: false,
            use_tcp: false,
            ignore_truncation: false,
            check_response: true,
            stay_open: false,
            udp_max_queries: 0,
        }
    }
}

impl ResolverConfig {
    pub fn new(servers: Vec<NameServer>) -> ResolverConfig {
        ResolverConfig {
            servers,
            ..ResolverConfig::default()
        }
    }

    pub fn from_json(data: &str) -> Result<ResolverConfig> {
        let config: ResolverConfig = serde_json::from_str(data)?;
        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.attempts == 0 {
            return Err("attempts must be at least 1".into());
        }
        if self.timeout_ms == 0 {
            return Err("timeout_ms must be positive".into());
        }
        if !self.backoff.is_finite() || self.backoff < 1.0 {
            return Err("backoff must be a finite factor of at least 1".into());
        }
        if self.max_timeout_ms != 0 && self.max_timeout_ms < self.timeout_ms {
            return Err("max_timeout_ms must not be below timeout_ms".into());
        }

        Ok(())
    }

    /// Total number of sends a query may make before it fails.
    pub fn attempt_budget(&self) -> usize {
        self.attempts.saturating_mul(self.servers.len())
    }

    /// Timeout for the given zero-based attempt:
    /// `timeout * backoff^attempt`, capped at `max_timeout_ms` when set.
    pub fn timeout_for(&self, attempt: usize) -> Duration {
        let exponent = attempt.min(64) as i32;
        let ms = self.timeout_ms as f64 * self.backoff.powi(exponent);
        let cap = if self.max_timeout_ms > 0 {
            self.max_timeout_ms as f64
        } else {
            u32::MAX as f64
        };

        Duration::from_millis(ms.min(cap) as u64)
    }
}
