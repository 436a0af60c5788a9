//! Server lifecycle management
//!
//! [`Server`] owns the handler, the shutdown signal and every listener loop
//! started through it. Its state only moves forward:
//!
//! ```text
//! Created -> Running -> ShuttingDown -> Stopped
//! ```
//!
//! Registering a listener moves a created server to `Running`. `shutdown`
//! closes the shared signal, which makes every loop and connection stop
//! taking new work. `wait` then drains in-flight handlers up to a deadline
//! and marks the server `Stopped`. A stopped server cannot be restarted.

use crate::server::dispatch::Dispatcher;
use crate::server::shutdown::Drain;
use crate::server::{
    Protocol, RequestHandler, ServerConfig, Shutdown, ShutdownListener, TcpServer, UdpServer,
};
use crate::{Error, Result};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, UdpSocket};
use tracing::{debug, info, warn};

/// Lifecycle state of a [`Server`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// Constructed, no listener registered yet
    Created,
    /// At least one listener loop has been started
    Running,
    /// Shutdown requested, loops and handlers are winding down
    ShuttingDown,
    /// Drain finished or gave up; the server must be discarded
    Stopped,
}

impl std::fmt::Display for ServerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServerState::Created => write!(f, "created"),
            ServerState::Running => write!(f, "running"),
            ServerState::ShuttingDown => write!(f, "shutting_down"),
            ServerState::Stopped => write!(f, "stopped"),
        }
    }
}

/// DNS server owning a set of UDP and TCP listeners
///
/// # Example
///
/// ```rust,no_run
/// use dnslisten::server::{EchoHandler, Server, ServerConfig};
/// use std::sync::Arc;
/// use std::time::Duration;
/// use tokio::net::UdpSocket;
///
/// # async fn example() -> dnslisten::Result<()> {
/// let server = Server::new(ServerConfig::default(), Arc::new(EchoHandler));
///
/// let socket = UdpSocket::bind("127.0.0.1:5353").await?;
/// server.serve_udp(socket)?;
/// server.bind_tcp("127.0.0.1:5353".parse().unwrap()).await?;
///
/// server.shutdown();
/// let drained = server.wait(Duration::from_secs(5)).await;
/// # let _ = drained;
/// # Ok(())
/// # }
/// ```
pub struct Server {
    handler: Arc<dyn RequestHandler>,
    config: ServerConfig,
    shutdown: Shutdown,
    drain: Drain,
    state: Mutex<ServerState>,
    listeners: Mutex<Vec<(Protocol, SocketAddr)>>,
}

impl Server {
    /// Create a server bound to `handler`
    pub fn new(config: ServerConfig, handler: Arc<dyn RequestHandler>) -> Self {
        Self {
            handler,
            config,
            shutdown: Shutdown::new(),
            drain: Drain::new(),
            state: Mutex::new(ServerState::Created),
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> ServerState {
        *self.state.lock()
    }

    /// Configuration the server was created with
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Subscribe to this server's shutdown signal
    pub fn shutdown_listener(&self) -> ShutdownListener {
        self.shutdown.listener()
    }

    /// Addresses of all registered listeners
    pub fn local_addrs(&self) -> Vec<(Protocol, SocketAddr)> {
        self.listeners.lock().clone()
    }

    /// Start serving queries on an already-bound UDP socket
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ServerClosed`] once shutdown has been requested and a
    /// configuration error when the server's config does not validate.
    pub fn serve_udp(&self, socket: UdpSocket) -> Result<SocketAddr> {
        let addr = socket.local_addr()?;
        self.register(Protocol::Udp, addr, |dispatcher| {
            let server = UdpServer::new(socket, dispatcher, &self.config);
            tokio::spawn(server.run());
        })?;
        Ok(addr)
    }

    /// Start serving queries on an already-bound TCP listener
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ServerClosed`] once shutdown has been requested and a
    /// configuration error when the server's config does not validate.
    pub fn serve_tcp(&self, listener: TcpListener) -> Result<SocketAddr> {
        let addr = listener.local_addr()?;
        self.register(Protocol::Tcp, addr, |dispatcher| {
            let server = TcpServer::new(listener, dispatcher, &self.config);
            tokio::spawn(server.run());
        })?;
        Ok(addr)
    }

    /// Bind a UDP socket to `addr` and serve it
    pub async fn bind_udp(&self, addr: SocketAddr) -> Result<SocketAddr> {
        self.ensure_open()?;
        let socket = UdpSocket::bind(addr).await.map_err(Error::Io)?;
        self.serve_udp(socket)
    }

    /// Bind a TCP listener to `addr` and serve it
    pub async fn bind_tcp(&self, addr: SocketAddr) -> Result<SocketAddr> {
        self.ensure_open()?;
        let listener = TcpListener::bind(addr).await.map_err(Error::Io)?;
        self.serve_tcp(listener)
    }

    /// Bind and serve the addresses named in the configuration
    ///
    /// # Errors
    ///
    /// Returns a configuration error when neither `udp_addr` nor `tcp_addr`
    /// is set, and the bind error of the first address that fails.
    pub async fn listen(&self) -> Result<()> {
        self.config.validate()?;

        if self.config.udp_addr.is_none() && self.config.tcp_addr.is_none() {
            return Err(Error::Config("no listen address configured".to_string()));
        }
        if let Some(addr) = self.config.udp_addr {
            self.bind_udp(addr).await?;
        }
        if let Some(addr) = self.config.tcp_addr {
            self.bind_tcp(addr).await?;
        }
        Ok(())
    }

    /// Request shutdown
    ///
    /// Closes the shared signal so every loop stops accepting work. Handlers
    /// still running keep their writers and may finish. Returns `true` for
    /// the call that initiated shutdown; later calls are no-ops.
    pub fn shutdown(&self) -> bool {
        let mut state = self.state.lock();
        match *state {
            ServerState::Created | ServerState::Running => {
                *state = ServerState::ShuttingDown;
                self.shutdown.close();
                self.drain.close();
                info!(listeners = self.listeners.lock().len(), "Server shutting down");
                true
            }
            ServerState::ShuttingDown | ServerState::Stopped => false,
        }
    }

    /// Wait up to `timeout` for every loop, connection and handler to finish
    ///
    /// After shutdown the server is marked `Stopped` when this returns,
    /// whether or not stragglers remain. Returns `true` if everything
    /// finished in time. Before shutdown nothing can finish, so this just
    /// waits out the timeout and returns `false`.
    pub async fn wait(&self, timeout: Duration) -> bool {
        let drained = tokio::time::timeout(timeout, self.drain.wait())
            .await
            .is_ok();

        let mut state = self.state.lock();
        if *state == ServerState::ShuttingDown {
            *state = ServerState::Stopped;
            if drained {
                debug!("Server stopped");
            } else {
                warn!(timeout = ?timeout, "Server stopped with tasks still running");
            }
        }
        drained
    }

    /// Shut down and drain for the configured grace period
    pub async fn shutdown_and_wait(&self) -> bool {
        self.shutdown();
        self.wait(self.config.shutdown_grace()).await
    }

    /// Fail early, before binding, if registering would fail anyway
    fn ensure_open(&self) -> Result<()> {
        match self.state() {
            ServerState::Created | ServerState::Running => self.config.validate(),
            ServerState::ShuttingDown | ServerState::Stopped => Err(Error::ServerClosed),
        }
    }

    /// Start a listener loop unless shutdown has begun
    ///
    /// The state lock is held while the loop is spawned, so a concurrent
    /// `shutdown` either sees the listener or makes this fail.
    fn register(
        &self,
        protocol: Protocol,
        addr: SocketAddr,
        spawn: impl FnOnce(Dispatcher),
    ) -> Result<()> {
        let mut state = self.state.lock();
        if !matches!(*state, ServerState::Created | ServerState::Running) {
            return Err(Error::ServerClosed);
        }
        self.config.validate()?;
        let guard = self.drain.guard().ok_or(Error::ServerClosed)?;

        let dispatcher = Dispatcher::new(
            Arc::clone(&self.handler),
            self.shutdown.listener(),
            self.config.query_timeout(),
            guard,
        );
        spawn(dispatcher);

        *state = ServerState::Running;
        self.listeners.lock().push((protocol, addr));
        info!(protocol = %protocol, addr = %addr, "Listener registered");
        Ok(())
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("state", &self.state())
            .field("listeners", &self.local_addrs())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::EchoHandler;

    fn server() -> Server {
        Server::new(ServerConfig::default(), Arc::new(EchoHandler))
    }

    #[tokio::test]
    async fn test_state_transitions() {
        let server = server();
        assert_eq!(server.state(), ServerState::Created);

        server.bind_udp("127.0.0.1:0".parse().unwrap()).await.unwrap();
        assert_eq!(server.state(), ServerState::Running);

        assert!(server.shutdown());
        assert_eq!(server.state(), ServerState::ShuttingDown);
        assert!(!server.shutdown(), "second shutdown is a no-op");

        assert!(server.wait(Duration::from_secs(2)).await);
        assert_eq!(server.state(), ServerState::Stopped);
        assert!(!server.shutdown());
    }

    #[tokio::test]
    async fn test_shutdown_without_listeners() {
        let server = server();
        assert!(server.shutdown());
        assert!(server.wait(Duration::from_millis(100)).await);
        assert_eq!(server.state(), ServerState::Stopped);
    }

    #[tokio::test]
    async fn test_wait_before_shutdown_times_out() {
        let server = server();
        server.bind_tcp("127.0.0.1:0".parse().unwrap()).await.unwrap();

        assert!(!server.wait(Duration::from_millis(50)).await);
        assert_eq!(server.state(), ServerState::Running);
        server.shutdown();
    }

    #[tokio::test]
    async fn test_register_after_shutdown_fails() {
        let server = server();
        server.shutdown();

        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        assert!(matches!(server.serve_udp(socket), Err(Error::ServerClosed)));

        let result = server.bind_tcp("127.0.0.1:0".parse().unwrap()).await;
        assert!(matches!(result, Err(Error::ServerClosed)));
        assert!(server.local_addrs().is_empty());
    }

    #[tokio::test]
    async fn test_listen_requires_address() {
        let server = server();
        let result = server.listen().await;
        assert!(matches!(result, Err(Error::Config(_))));
        assert_eq!(server.state(), ServerState::Created);
    }

    #[tokio::test]
    async fn test_listen_binds_configured_addresses() {
        let config = ServerConfig::default()
            .with_udp_addr("127.0.0.1:0".parse().unwrap())
            .with_tcp_addr("127.0.0.1:0".parse().unwrap());
        let server = Server::new(config, Arc::new(EchoHandler));

        server.listen().await.unwrap();
        let addrs = server.local_addrs();
        assert_eq!(addrs.len(), 2);
        assert_eq!(addrs[0].0, Protocol::Udp);
        assert_eq!(addrs[1].0, Protocol::Tcp);
        assert_ne!(addrs[0].1.port(), 0);

        assert!(server.shutdown_and_wait().await);
    }

    #[tokio::test]
    async fn test_invalid_config_rejected_on_register() {
        let config = ServerConfig::default().with_max_connections(0);
        let server = Server::new(config, Arc::new(EchoHandler));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let result = server.serve_tcp(listener);
        assert!(result.unwrap_err().is_config_error());

        let result = server.bind_udp("127.0.0.1:0".parse().unwrap()).await;
        assert!(result.unwrap_err().is_config_error());

        assert_eq!(server.state(), ServerState::Created);
        assert!(server.local_addrs().is_empty());
    }

    #[tokio::test]
    async fn test_bind_failure_is_reported() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = taken.local_addr().unwrap();

        let server = server();
        let result = server.bind_tcp(addr).await;
        assert!(matches!(result, Err(Error::Io(_))));
        assert_eq!(server.state(), ServerState::Created);
    }
}
