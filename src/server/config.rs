//! Server configuration
//!
//! Defines the tunables of the listener core: optional listen addresses,
//! timeouts and size limits. The structure can be embedded in a larger YAML
//! configuration document; every field has a default.

use crate::dns::wire::{DEFAULT_UDP_PAYLOAD, HEADER_SIZE, MAX_MESSAGE_SIZE};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

/// DNS server configuration
///
/// # Example
///
/// ```rust
/// use dnslisten::server::ServerConfig;
/// use std::time::Duration;
///
/// let config = ServerConfig::from_yaml("tcp_idle_timeout_secs: 30\nmax_udp_size: 1232\n").unwrap();
/// assert_eq!(config.tcp_idle_timeout(), Duration::from_secs(30));
/// assert_eq!(config.max_udp_size, 1232);
/// assert_eq!(config.max_connections, 1000);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// UDP listen address, used by [`Server::listen`](crate::server::Server::listen)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub udp_addr: Option<SocketAddr>,

    /// TCP listen address, used by [`Server::listen`](crate::server::Server::listen)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tcp_addr: Option<SocketAddr>,

    /// Maximum number of simultaneously open TCP connections per listener
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Maximum number of queries handled at once on a single TCP connection
    #[serde(default = "default_max_pipelined_queries")]
    pub max_pipelined_queries: usize,

    /// Per-query deadline handed to handlers, in seconds (0 disables it)
    #[serde(default = "default_query_timeout_secs")]
    pub query_timeout_secs: u64,

    /// How long a TCP connection may stay idle between messages, in seconds
    #[serde(default = "default_tcp_idle_timeout_secs")]
    pub tcp_idle_timeout_secs: u64,

    /// Upper bound for UDP response size, whatever the client advertises
    #[serde(default = "default_max_udp_size")]
    pub max_udp_size: usize,

    /// Maximum accepted TCP message size
    #[serde(default = "default_max_tcp_size")]
    pub max_tcp_size: usize,

    /// How long `shutdown_and_wait` lets in-flight work drain, in seconds
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

fn default_max_connections() -> usize {
    1000
}

fn default_max_pipelined_queries() -> usize {
    64
}

fn default_query_timeout_secs() -> u64 {
    5
}

fn default_tcp_idle_timeout_secs() -> u64 {
    10
}

fn default_max_udp_size() -> usize {
    4096
}

fn default_max_tcp_size() -> usize {
    MAX_MESSAGE_SIZE
}

fn default_shutdown_grace_secs() -> u64 {
    5
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            udp_addr: None,
            tcp_addr: None,
            max_connections: default_max_connections(),
            max_pipelined_queries: default_max_pipelined_queries(),
            query_timeout_secs: default_query_timeout_secs(),
            tcp_idle_timeout_secs: default_tcp_idle_timeout_secs(),
            max_udp_size: default_max_udp_size(),
            max_tcp_size: default_max_tcp_size(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
        }
    }
}

impl ServerConfig {
    /// Create a new server configuration with the given UDP and TCP addresses
    pub fn new(udp_addr: Option<SocketAddr>, tcp_addr: Option<SocketAddr>) -> Self {
        Self {
            udp_addr,
            tcp_addr,
            ..Default::default()
        }
    }

    /// Parse a configuration from a YAML document and validate it
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)
            .map_err(|e| Error::Config(format!("Failed to parse server config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Check that every limit is usable
    pub fn validate(&self) -> Result<()> {
        if self.max_connections == 0 {
            return Err(Error::invalid_config_value(
                "max_connections",
                self.max_connections,
                "must be greater than 0",
            ));
        }
        if self.max_pipelined_queries == 0 {
            return Err(Error::invalid_config_value(
                "max_pipelined_queries",
                self.max_pipelined_queries,
                "must be greater than 0",
            ));
        }
        if self.max_udp_size < DEFAULT_UDP_PAYLOAD {
            return Err(Error::invalid_config_value(
                "max_udp_size",
                self.max_udp_size,
                format!("must be at least {}", DEFAULT_UDP_PAYLOAD),
            ));
        }
        if !(HEADER_SIZE..=MAX_MESSAGE_SIZE).contains(&self.max_tcp_size) {
            return Err(Error::invalid_config_value(
                "max_tcp_size",
                self.max_tcp_size,
                format!("must be between {} and {}", HEADER_SIZE, MAX_MESSAGE_SIZE),
            ));
        }
        if self.tcp_idle_timeout_secs == 0 {
            return Err(Error::invalid_config_value(
                "tcp_idle_timeout_secs",
                self.tcp_idle_timeout_secs,
                "must be greater than 0",
            ));
        }
        Ok(())
    }

    /// Per-query deadline, `None` when disabled
    pub fn query_timeout(&self) -> Option<Duration> {
        (self.query_timeout_secs > 0).then(|| Duration::from_secs(self.query_timeout_secs))
    }

    /// TCP idle/read timeout
    pub fn tcp_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.tcp_idle_timeout_secs)
    }

    /// Drain period used by `shutdown_and_wait`
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    /// Set the UDP listen address
    pub fn with_udp_addr(mut self, addr: SocketAddr) -> Self {
        self.udp_addr = Some(addr);
        self
    }

    /// Set the TCP listen address
    pub fn with_tcp_addr(mut self, addr: SocketAddr) -> Self {
        self.tcp_addr = Some(addr);
        self
    }

    /// Set the maximum number of concurrent TCP connections
    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Set the per-connection limit on concurrently handled TCP queries
    pub fn with_max_pipelined_queries(mut self, max: usize) -> Self {
        self.max_pipelined_queries = max;
        self
    }

    /// Set the per-query deadline; `None` disables it
    ///
    /// Durations are stored in whole seconds, rounded up.
    pub fn with_query_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.query_timeout_secs = timeout.map_or(0, ceil_secs);
        self
    }

    /// Set the TCP idle timeout, rounded up to whole seconds
    pub fn with_tcp_idle_timeout(mut self, timeout: Duration) -> Self {
        self.tcp_idle_timeout_secs = ceil_secs(timeout);
        self
    }

    /// Set the maximum UDP response size
    pub fn with_max_udp_size(mut self, size: usize) -> Self {
        self.max_udp_size = size;
        self
    }

    /// Set the maximum TCP message size
    pub fn with_max_tcp_size(mut self, size: usize) -> Self {
        self.max_tcp_size = size;
        self
    }

    /// Set the shutdown drain period, rounded up to whole seconds
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace_secs = ceil_secs(grace);
        self
    }
}

fn ceil_secs(duration: Duration) -> u64 {
    duration.as_secs() + u64::from(duration.subsec_nanos() > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert!(config.udp_addr.is_none());
        assert!(config.tcp_addr.is_none());
        assert_eq!(config.max_connections, 1000);
        assert_eq!(config.max_pipelined_queries, 64);
        assert_eq!(config.query_timeout(), Some(Duration::from_secs(5)));
        assert_eq!(config.tcp_idle_timeout(), Duration::from_secs(10));
        assert_eq!(config.max_udp_size, 4096);
        assert_eq!(config.max_tcp_size, 65535);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_pattern() {
        let addr = SocketAddr::from_str("192.0.2.1:53").unwrap();
        let config = ServerConfig::default()
            .with_udp_addr(addr)
            .with_tcp_addr(addr)
            .with_max_connections(500)
            .with_query_timeout(None)
            .with_tcp_idle_timeout(Duration::from_secs(3));

        assert_eq!(config.udp_addr, Some(addr));
        assert_eq!(config.tcp_addr, Some(addr));
        assert_eq!(config.max_connections, 500);
        assert_eq!(config.query_timeout(), None);
        assert_eq!(config.tcp_idle_timeout(), Duration::from_secs(3));
    }

    #[test]
    fn test_new_config() {
        let udp = SocketAddr::from_str("192.0.2.1:53").unwrap();
        let tcp = SocketAddr::from_str("192.0.2.2:53").unwrap();
        let config = ServerConfig::new(Some(udp), Some(tcp));

        assert_eq!(config.udp_addr, Some(udp));
        assert_eq!(config.tcp_addr, Some(tcp));
    }

    #[test]
    fn test_from_yaml_partial() {
        let yaml = r#"
udp_addr: "127.0.0.1:5353"
query_timeout_secs: 0
shutdown_grace_secs: 2
"#;
        let config = ServerConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.udp_addr, Some("127.0.0.1:5353".parse().unwrap()));
        assert!(config.tcp_addr.is_none());
        assert_eq!(config.query_timeout(), None);
        assert_eq!(config.shutdown_grace(), Duration::from_secs(2));
        assert_eq!(config.max_tcp_size, 65535);
    }

    #[test]
    fn test_from_yaml_rejects_bad_address() {
        let result = ServerConfig::from_yaml("udp_addr: not-an-address\n");
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_validate_limits() {
        let err = ServerConfig::default()
            .with_max_udp_size(256)
            .validate()
            .unwrap_err();
        assert!(err.is_config_error());
        assert!(err.to_string().contains("max_udp_size"));

        let err = ServerConfig::default()
            .with_max_tcp_size(70000)
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("max_tcp_size"));

        let err = ServerConfig::default()
            .with_max_connections(0)
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("max_connections"));

        let err = ServerConfig::default()
            .with_tcp_idle_timeout(Duration::ZERO)
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("tcp_idle_timeout_secs"));

        let err = ServerConfig::default()
            .with_max_pipelined_queries(0)
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("max_pipelined_queries"));
    }

    #[test]
    fn test_sub_second_durations_round_up() {
        let config = ServerConfig::default()
            .with_tcp_idle_timeout(Duration::from_millis(500))
            .with_query_timeout(Some(Duration::from_millis(1500)))
            .with_shutdown_grace(Duration::from_millis(1));

        assert_eq!(config.tcp_idle_timeout(), Duration::from_secs(1));
        assert_eq!(config.query_timeout(), Some(Duration::from_secs(2)));
        assert_eq!(config.shutdown_grace(), Duration::from_secs(1));
        assert!(config.validate().is_ok());

        let config = ServerConfig::default().with_query_timeout(Some(Duration::ZERO));
        assert_eq!(config.query_timeout(), None);
    }

    #[test]
    fn test_yaml_roundtrip_skips_unset_addrs() {
        let yaml = serde_yaml::to_string(&ServerConfig::default()).unwrap();
        assert!(!yaml.contains("udp_addr"));
        assert!(yaml.contains("max_connections"));
    }
}
