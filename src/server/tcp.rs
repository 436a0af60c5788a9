//! TCP DNS server implementation
//!
//! Accepts connections on an already-bound listener and serves each one in
//! its own task. A connection carries any number of DNS messages, each
//! prefixed with a 2-byte big-endian length, and stays open until the peer
//! closes it, it sits idle for too long, or the server shuts down.
//!
//! Queries on one connection are read in order but handled concurrently, up
//! to `max_pipelined_queries` at a time. Their answers go through a single
//! writer task that owns the connection's write half (see
//! [`TcpResponseWriter`]).

use crate::dns::wire;
use crate::server::dispatch::Dispatcher;
use crate::server::writer::{write_frames, OutboundFrame};
use crate::server::{Protocol, RequestContext, ServerConfig, TcpResponseWriter};
use crate::{Error, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Semaphore};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// Pause after a failed accept, e.g. when out of file descriptors
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Answers waiting for a connection's writer task
const FRAME_QUEUE: usize = 32;

/// TCP DNS server
///
/// Handles DNS queries over one TCP listener until the server shuts down.
/// Created and driven by [`Server::serve_tcp`](crate::server::Server::serve_tcp).
pub struct TcpServer {
    listener: TcpListener,
    dispatcher: Dispatcher,
    connections: Arc<Semaphore>,
    idle_timeout: Duration,
    max_tcp_size: usize,
    max_pipelined: usize,
}

impl TcpServer {
    pub(crate) fn new(listener: TcpListener, dispatcher: Dispatcher, config: &ServerConfig) -> Self {
        Self {
            listener,
            dispatcher,
            connections: Arc::new(Semaphore::new(config.max_connections)),
            idle_timeout: config.tcp_idle_timeout(),
            max_tcp_size: config.max_tcp_size,
            max_pipelined: config.max_pipelined_queries,
        }
    }

    /// Get the local address the server is bound to
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener.local_addr().map_err(Error::Io)
    }

    /// Run the accept loop
    ///
    /// Returns once shutdown has been requested. Connections already open
    /// notice the shutdown on their own.
    pub(crate) async fn run(self) {
        let addr = self.listener.local_addr().ok();
        let shutdown = self.dispatcher.shutdown().clone();

        info!(addr = ?addr, "TCP server started");

        loop {
            let accepted = tokio::select! {
                biased;
                _ = shutdown.closed() => break,
                accepted = self.listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, peer_addr)) => self.spawn_connection(stream, peer_addr),
                Err(_) if shutdown.is_closed() => break,
                Err(e) => {
                    // Continue serving despite errors
                    error!(addr = ?addr, error = %e, "Error accepting TCP connection");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            }
        }

        debug!(addr = ?addr, "TCP server stopped");
    }

    fn spawn_connection(&self, stream: TcpStream, peer_addr: SocketAddr) {
        let Ok(permit) = Arc::clone(&self.connections).try_acquire_owned() else {
            warn!(peer = %peer_addr, "Too many TCP connections, closing new connection");
            return;
        };

        debug!(peer = %peer_addr, "Accepted connection");

        let connection = Connection {
            dispatcher: self.dispatcher.clone(),
            peer_addr,
            idle_timeout: self.idle_timeout,
            max_tcp_size: self.max_tcp_size,
            max_pipelined: self.max_pipelined,
        };

        tokio::spawn(async move {
            let _permit = permit;
            connection.serve(stream).await;
        });
    }
}

impl std::fmt::Debug for TcpServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpServer")
            .field("addr", &self.listener.local_addr().ok())
            .field("idle_timeout", &self.idle_timeout)
            .field("max_tcp_size", &self.max_tcp_size)
            .finish_non_exhaustive()
    }
}

/// One accepted TCP connection
struct Connection {
    dispatcher: Dispatcher,
    peer_addr: SocketAddr,
    idle_timeout: Duration,
    max_tcp_size: usize,
    max_pipelined: usize,
}

impl Connection {
    /// Serve the connection until reading has stopped and every answer
    /// queued for it has been written
    async fn serve(self, stream: TcpStream) {
        let (reader, writer) = stream.into_split();
        let (frames, queued) = mpsc::channel(FRAME_QUEUE);

        tokio::join!(
            self.read_queries(reader, frames),
            write_frames(writer, queued, self.peer_addr),
        );
    }

    /// Read framed queries until the peer leaves, the connection idles out
    /// or the server shuts down
    ///
    /// Handlers still running keep their writers, so answers already in
    /// flight are written before the socket closes.
    async fn read_queries(&self, mut reader: OwnedReadHalf, frames: mpsc::Sender<OutboundFrame>) {
        let peer = self.peer_addr;
        let shutdown = self.dispatcher.shutdown().clone();
        let in_flight = Arc::new(Semaphore::new(self.max_pipelined));

        loop {
            // Stop reading while too many queries of this connection are
            // still being handled.
            let permit = tokio::select! {
                biased;
                _ = shutdown.closed() => {
                    debug!(peer = %peer, "Closing TCP connection for shutdown");
                    break;
                }
                permit = Arc::clone(&in_flight).acquire_owned() => permit,
            };
            let Ok(permit) = permit else {
                break;
            };

            let frame = tokio::select! {
                biased;
                _ = shutdown.closed() => {
                    debug!(peer = %peer, "Closing TCP connection for shutdown");
                    break;
                }
                frame = timeout(self.idle_timeout, read_frame(&mut reader, self.max_tcp_size)) => frame,
            };

            let data = match frame {
                Ok(Ok(Some(data))) => data,
                Ok(Ok(None)) => {
                    debug!(peer = %peer, "TCP client closed connection");
                    break;
                }
                Ok(Err(Error::Io(e))) => {
                    debug!(peer = %peer, error = %e, "TCP connection read failed");
                    break;
                }
                Ok(Err(e)) => {
                    warn!(peer = %peer, error = %e, "Closing TCP connection");
                    break;
                }
                Err(_) => {
                    debug!(peer = %peer, timeout = ?self.idle_timeout, "TCP connection idle timeout");
                    break;
                }
            };

            let request = match wire::parse_message(&data) {
                Ok(request) => request,
                Err(e) => {
                    // Framing is intact, keep the connection for the next message
                    debug!(peer = %peer, len = data.len(), error = %e, "Dropping malformed TCP query");
                    continue;
                }
            };

            debug!(
                peer = %peer,
                id = request.id(),
                questions = request.queries().len(),
                "Received TCP query"
            );

            let ctx = RequestContext::new(request, peer, Protocol::Tcp);
            let response_writer = TcpResponseWriter::new(frames.clone(), peer);
            self.dispatcher
                .dispatch_with_permit(ctx, Box::new(response_writer), permit);
        }
    }
}

/// Read one length-prefixed DNS message
///
/// Returns `Ok(None)` when the peer closed the stream before or inside the
/// length prefix. A body cut short is an I/O error; a length above
/// `max_size` is a protocol error.
async fn read_frame<R>(reader: &mut R, max_size: usize) -> Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 2];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(Error::Io(e)),
    }

    let msg_len = u16::from_be_bytes(len_buf) as usize;
    if msg_len > max_size {
        return Err(Error::DnsProtocol(format!(
            "Message too large: {} > {}",
            msg_len, max_size
        )));
    }

    let mut buf = vec![0u8; msg_len];
    reader.read_exact(&mut buf).await?;
    Ok(Some(buf))
}
