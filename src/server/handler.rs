//! Request handler trait
//!
//! Defines the contract between the transport loops and the query
//! processing pipeline: the per-request [`RequestContext`], the cooperative
//! cancellation [`ServeContext`] and the [`RequestHandler`] trait itself.

use crate::dns::{Message, MessageType};
use crate::server::{ResponseWriter, ShutdownListener};
use async_trait::async_trait;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Client connection information
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientInfo {
    /// Client socket address
    pub addr: SocketAddr,
    /// Client IP address
    pub ip: IpAddr,
    /// Client port
    pub port: u16,
}

impl From<SocketAddr> for ClientInfo {
    fn from(addr: SocketAddr) -> Self {
        Self {
            addr,
            ip: addr.ip(),
            port: addr.port(),
        }
    }
}

/// Transport a query arrived on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    /// Datagram transport
    Udp,
    /// Stream transport with 2-byte length framing
    Tcp,
}

impl Protocol {
    /// Whether replies are bound by a datagram size ceiling
    pub fn is_datagram(&self) -> bool {
        matches!(self, Protocol::Udp)
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Protocol::Udp => write!(f, "udp"),
            Protocol::Tcp => write!(f, "tcp"),
        }
    }
}

/// Request processing context
///
/// Carries the decoded query together with where and when it arrived. A
/// context is created for exactly one handler invocation and moved into it.
///
/// # Example
///
/// ```rust
/// use dnslisten::server::{RequestContext, Protocol};
/// use dnslisten::dns::Message;
/// use std::net::SocketAddr;
///
/// let addr: SocketAddr = "127.0.0.1:12345".parse().unwrap();
/// let ctx = RequestContext::new(Message::new(), addr, Protocol::Udp);
///
/// assert_eq!(ctx.client_addr(), addr);
/// assert!(ctx.protocol.is_datagram());
/// ```
#[derive(Debug)]
pub struct RequestContext {
    /// DNS query message
    pub message: Message,
    /// Client connection information
    pub client_info: ClientInfo,
    /// Transport the query arrived on
    pub protocol: Protocol,
    /// When the query was read off the socket
    pub received_at: Instant,
}

impl RequestContext {
    /// Create a new request context stamped with the current time
    pub fn new(message: Message, client_addr: SocketAddr, protocol: Protocol) -> Self {
        Self {
            message,
            client_info: ClientInfo::from(client_addr),
            protocol,
            received_at: Instant::now(),
        }
    }

    /// Get the client IP address
    pub fn client_ip(&self) -> IpAddr {
        self.client_info.ip
    }

    /// Get the client socket address
    pub fn client_addr(&self) -> SocketAddr {
        self.client_info.addr
    }

    /// Time spent since the query arrived
    pub fn elapsed(&self) -> Duration {
        self.received_at.elapsed()
    }

    /// Consume the context and return the message
    pub fn into_message(self) -> Message {
        self.message
    }
}

/// Execution context of a handler invocation
///
/// Resolves [`cancelled`](ServeContext::cancelled) when the server shuts down
/// or the per-query deadline passes. Cancellation is cooperative: nothing
/// aborts a handler that ignores it.
#[derive(Debug, Clone)]
pub struct ServeContext {
    shutdown: ShutdownListener,
    deadline: Option<Instant>,
}

impl ServeContext {
    /// Create a context bound to a shutdown signal and an optional deadline
    pub fn new(shutdown: ShutdownListener, deadline: Option<Instant>) -> Self {
        Self { shutdown, deadline }
    }

    /// Deadline of this invocation, if any
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline; `None` when there is no deadline
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Whether the invocation should stop as soon as possible
    pub fn is_cancelled(&self) -> bool {
        self.shutdown.is_closed() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Wait until the server shuts down or the deadline passes
    pub async fn cancelled(&self) {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = self.shutdown.closed() => {}
                    _ = tokio::time::sleep_until(deadline) => {}
                }
            }
            None => self.shutdown.closed().await,
        }
    }
}

/// DNS request handler trait
///
/// The handler answers by calling [`ResponseWriter::write`] at most once;
/// not writing at all drops the query. Invocations run concurrently, one
/// spawned task each.
///
/// # Example
///
/// ```rust
/// use dnslisten::server::{RequestContext, RequestHandler, ResponseWriter, ServeContext};
/// use dnslisten::dns::{MessageType, ResponseCode};
/// use async_trait::async_trait;
///
/// struct Refuser;
///
/// #[async_trait]
/// impl RequestHandler for Refuser {
///     async fn handle(&self, _cx: ServeContext, ctx: RequestContext, writer: Box<dyn ResponseWriter>) {
///         let mut response = ctx.into_message();
///         response
///             .set_message_type(MessageType::Response)
///             .set_response_code(ResponseCode::Refused);
///         let _ = writer.write(&response).await;
///     }
/// }
/// ```
#[async_trait]
pub trait RequestHandler: Send + Sync {
    /// Handle one query
    ///
    /// # Arguments
    ///
    /// * `cx` - Cancellation context of this invocation
    /// * `ctx` - The query and its client information
    /// * `writer` - Sends the answer back to the client
    async fn handle(&self, cx: ServeContext, ctx: RequestContext, writer: Box<dyn ResponseWriter>);
}

/// Handler that echoes each query back as its response
///
/// Useful for testing and as a reference implementation of the contract.
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoHandler;

#[async_trait]
impl RequestHandler for EchoHandler {
    async fn handle(&self, _cx: ServeContext, ctx: RequestContext, writer: Box<dyn ResponseWriter>) {
        let peer = ctx.client_addr();
        let mut response = ctx.into_message();
        response.set_message_type(MessageType::Response);

        if let Err(e) = writer.write(&response).await {
            debug!(peer = %peer, error = %e, "Echo response not sent");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::Shutdown;

    #[test]
    fn test_request_context() {
        let addr: SocketAddr = "192.168.1.1:12345".parse().unwrap();
        let ctx = RequestContext::new(Message::new(), addr, Protocol::Tcp);

        assert_eq!(ctx.client_ip(), "192.168.1.1".parse::<IpAddr>().unwrap());
        assert_eq!(ctx.client_addr(), addr);
        assert_eq!(ctx.client_info.port, 12345);
        assert_eq!(ctx.protocol, Protocol::Tcp);
        assert!(!ctx.protocol.is_datagram());
    }

    #[test]
    fn test_protocol_display() {
        assert_eq!(Protocol::Udp.to_string(), "udp");
        assert_eq!(Protocol::Tcp.to_string(), "tcp");
    }

    #[tokio::test]
    async fn test_serve_context_without_deadline() {
        let shutdown = Shutdown::new();
        let cx = ServeContext::new(shutdown.listener(), None);

        assert!(cx.remaining().is_none());
        assert!(!cx.is_cancelled());

        shutdown.close();
        assert!(cx.is_cancelled());
        cx.cancelled().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_serve_context_deadline() {
        let shutdown = Shutdown::new();
        let deadline = Instant::now() + Duration::from_secs(2);
        let cx = ServeContext::new(shutdown.listener(), Some(deadline));

        assert!(!cx.is_cancelled());
        assert_eq!(cx.remaining(), Some(Duration::from_secs(2)));

        cx.cancelled().await;
        assert!(cx.is_cancelled());
        assert_eq!(cx.remaining(), Some(Duration::ZERO));
        assert!(!shutdown.is_closed());
    }
}
