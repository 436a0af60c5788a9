//! UDP DNS server implementation
//!
//! Receives one query per datagram from an already-bound socket and
//! dispatches each to the handler in its own task. The socket is shared by
//! every in-flight writer; replies are addressed to their peer explicitly.

use crate::dns::wire::{self, MAX_MESSAGE_SIZE};
use crate::server::dispatch::Dispatcher;
use crate::server::{Protocol, RequestContext, ServerConfig, UdpResponseWriter};
use crate::{Error, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

/// UDP DNS server
///
/// Handles DNS queries over one UDP socket until the server shuts down.
/// Created and driven by [`Server::serve_udp`](crate::server::Server::serve_udp).
pub struct UdpServer {
    socket: Arc<UdpSocket>,
    dispatcher: Dispatcher,
    max_udp_size: usize,
}

impl UdpServer {
    pub(crate) fn new(socket: UdpSocket, dispatcher: Dispatcher, config: &ServerConfig) -> Self {
        Self {
            socket: Arc::new(socket),
            dispatcher,
            max_udp_size: config.max_udp_size,
        }
    }

    /// Get the local address the server is bound to
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.socket.local_addr().map_err(Error::Io)
    }

    /// Run the receive loop
    ///
    /// Returns once shutdown has been requested. Receive errors are logged
    /// and the loop keeps listening.
    pub(crate) async fn run(self) {
        let mut buf = vec![0u8; MAX_MESSAGE_SIZE];
        let addr = self.socket.local_addr().ok();
        let shutdown = self.dispatcher.shutdown().clone();

        info!(addr = ?addr, "UDP server started");

        loop {
            let received = tokio::select! {
                biased;
                _ = shutdown.closed() => break,
                received = self.socket.recv_from(&mut buf) => received,
            };

            match received {
                Ok((len, peer_addr)) => self.handle_datagram(&buf[..len], peer_addr),
                Err(_) if shutdown.is_closed() => break,
                Err(e) => {
                    // Continue serving despite errors
                    warn!(addr = ?addr, error = %e, "Error receiving UDP packet");
                }
            }
        }

        debug!(addr = ?addr, "UDP server stopped");
    }

    /// Decode a datagram and hand it to the handler
    ///
    /// Undecodable datagrams are dropped without a reply.
    fn handle_datagram(&self, data: &[u8], peer_addr: SocketAddr) {
        let request = match wire::parse_message(data) {
            Ok(request) => request,
            Err(e) => {
                debug!(peer = %peer_addr, len = data.len(), error = %e, "Dropping malformed UDP query");
                return;
            }
        };

        debug!(
            peer = %peer_addr,
            id = request.id(),
            questions = request.queries().len(),
            "Received UDP query"
        );

        let limit = wire::udp_payload_limit(&request, self.max_udp_size);
        let writer = UdpResponseWriter::new(Arc::clone(&self.socket), peer_addr, limit);
        let ctx = RequestContext::new(request, peer_addr, Protocol::Udp);

        self.dispatcher.dispatch(ctx, Box::new(writer));
    }
}

impl std::fmt::Debug for UdpServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UdpServer")
            .field("addr", &self.socket.local_addr().ok())
            .field("max_udp_size", &self.max_udp_size)
            .finish_non_exhaustive()
    }
}
