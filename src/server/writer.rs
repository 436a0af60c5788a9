//! Response writers
//!
//! A [`ResponseWriter`] is handed to the handler together with each query
//! and sends exactly one reply on the transport the query arrived on.
//!
//! - [`UdpResponseWriter`] shares the listener socket and addresses every
//!   datagram to its peer explicitly. Responses over the negotiated payload
//!   size are truncated before sending.
//! - [`TcpResponseWriter`] queues length-prefixed frames for its
//!   connection's writer task, the only owner of the write half. Concurrent
//!   answers never interleave, and a `write` dropped halfway never leaves a
//!   partial frame behind.
//!
//! A second `write` on the same writer fails with
//! [`Error::ResponseAlreadyWritten`] without touching the socket.

use crate::dns::wire::{self, MAX_MESSAGE_SIZE};
use crate::dns::Message;
use crate::server::Protocol;
use crate::{Error, Result};
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace};

/// Per-request reply capability
#[async_trait]
pub trait ResponseWriter: Send + Sync {
    /// Send `response` to the client
    ///
    /// Returns the number of DNS message bytes sent, excluding any transport
    /// framing. Only the first call that gets as far as the socket counts;
    /// encoding failures leave the writer usable.
    async fn write(&self, response: &Message) -> Result<usize>;

    /// Transport this writer replies on
    fn protocol(&self) -> Protocol;

    /// Address of the client
    fn peer_addr(&self) -> SocketAddr;

    /// Whether a reply has already been sent (or attempted)
    fn is_written(&self) -> bool;
}

/// One-shot flag claimed right before a reply hits the socket
#[derive(Debug, Default)]
struct WriteOnce(AtomicBool);

impl WriteOnce {
    fn claim(&self) -> Result<()> {
        self.0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|_| Error::ResponseAlreadyWritten)
    }

    fn is_claimed(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Writer for queries received over UDP
#[derive(Debug)]
pub struct UdpResponseWriter {
    socket: Arc<UdpSocket>,
    peer: SocketAddr,
    payload_limit: usize,
    written: WriteOnce,
}

impl UdpResponseWriter {
    /// Create a writer replying to `peer` with responses of at most
    /// `payload_limit` bytes
    pub fn new(socket: Arc<UdpSocket>, peer: SocketAddr, payload_limit: usize) -> Self {
        Self {
            socket,
            peer,
            payload_limit,
            written: WriteOnce::default(),
        }
    }

    /// Response size ceiling negotiated for this query
    pub fn payload_limit(&self) -> usize {
        self.payload_limit
    }
}

#[async_trait]
impl ResponseWriter for UdpResponseWriter {
    async fn write(&self, response: &Message) -> Result<usize> {
        let data = wire::serialize_truncated(response, self.payload_limit)?;
        self.written.claim()?;

        trace!(
            peer = %self.peer,
            id = response.id(),
            len = data.len(),
            limit = self.payload_limit,
            "Sending UDP response"
        );

        let sent = self.socket.send_to(&data, self.peer).await?;
        Ok(sent)
    }

    fn protocol(&self) -> Protocol {
        Protocol::Udp
    }

    fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    fn is_written(&self) -> bool {
        self.written.is_claimed()
    }
}

/// One encoded frame queued for a connection's writer task
#[derive(Debug)]
pub(crate) struct OutboundFrame {
    data: Vec<u8>,
    done: oneshot::Sender<std::io::Result<()>>,
}

/// Writer for queries received over a TCP connection
///
/// Frames are handed to the connection's writer task (see
/// [`write_frames`]), which owns the write half and always writes a frame to
/// the end once it has started. Dropping a `write` future halfway therefore
/// never leaves a partial frame on the stream: either the frame was never
/// queued, or it goes out whole.
#[derive(Debug)]
pub struct TcpResponseWriter {
    frames: mpsc::Sender<OutboundFrame>,
    peer: SocketAddr,
    written: WriteOnce,
}

impl TcpResponseWriter {
    /// Create a writer feeding the connection's frame queue
    pub(crate) fn new(frames: mpsc::Sender<OutboundFrame>, peer: SocketAddr) -> Self {
        Self {
            frames,
            peer,
            written: WriteOnce::default(),
        }
    }
}

/// Prefix `data` with its 2-byte big-endian length
pub(crate) fn frame(data: &[u8]) -> Result<Vec<u8>> {
    if data.len() > MAX_MESSAGE_SIZE {
        return Err(Error::ResponseTooLarge {
            size: data.len(),
            limit: MAX_MESSAGE_SIZE,
        });
    }

    let mut framed = Vec::with_capacity(data.len() + 2);
    framed.extend_from_slice(&(data.len() as u16).to_be_bytes());
    framed.extend_from_slice(data);
    Ok(framed)
}

fn connection_closed() -> Error {
    Error::Io(std::io::Error::new(
        std::io::ErrorKind::BrokenPipe,
        "TCP connection closed",
    ))
}

#[async_trait]
impl ResponseWriter for TcpResponseWriter {
    async fn write(&self, response: &Message) -> Result<usize> {
        let data = wire::serialize_message(response)?;
        let framed = frame(&data)?;
        self.written.claim()?;

        trace!(peer = %self.peer, id = response.id(), len = data.len(), "Sending TCP response");

        let (done, written) = oneshot::channel();
        self.frames
            .send(OutboundFrame { data: framed, done })
            .await
            .map_err(|_| connection_closed())?;

        match written.await {
            Ok(Ok(())) => Ok(data.len()),
            Ok(Err(e)) => Err(Error::Io(e)),
            Err(_) => Err(connection_closed()),
        }
    }

    fn protocol(&self) -> Protocol {
        Protocol::Tcp
    }

    fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    fn is_written(&self) -> bool {
        self.written.is_claimed()
    }
}

/// Write queued frames to `half` one at a time until every sender is gone
///
/// Stops at the first write error; later writers then see the connection as
/// closed. The write half is shut down when this returns.
pub(crate) async fn write_frames(
    mut half: OwnedWriteHalf,
    mut frames: mpsc::Receiver<OutboundFrame>,
    peer: SocketAddr,
) {
    while let Some(frame) = frames.recv().await {
        let result = match half.write_all(&frame.data).await {
            Ok(()) => half.flush().await,
            Err(e) => Err(e),
        };

        let failed = result.is_err();
        if let Err(e) = &result {
            debug!(peer = %peer, error = %e, "Failed to write TCP response");
        }
        // The handler may have stopped waiting; the frame is out either way.
        let _ = frame.done.send(result);

        if failed {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::{MessageType, Name, Query, RecordType};
    use hickory_proto::rr::{rdata::A, RData, Record};
    use std::net::Ipv4Addr;
    use std::str::FromStr;
    use std::time::Duration;
    use tokio::io::AsyncReadExt;
    use tokio::net::{TcpListener, TcpStream};
    use tokio::time::timeout;

    fn response(id: u16) -> Message {
        let mut message = Message::new();
        message
            .set_id(id)
            .set_message_type(MessageType::Response);
        message.add_query(Query::query(
            Name::from_str("example.com.").unwrap(),
            RecordType::A,
        ));
        message
    }

    async fn udp_pair() -> (Arc<UdpSocket>, UdpSocket) {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        (Arc::new(server), client)
    }

    #[test]
    fn test_frame_prefix() {
        let framed = frame(&[1, 2, 3]).unwrap();
        assert_eq!(framed, vec![0, 3, 1, 2, 3]);

        let too_large = vec![0u8; MAX_MESSAGE_SIZE + 1];
        assert!(matches!(
            frame(&too_large),
            Err(Error::ResponseTooLarge { .. })
        ));
    }

    #[tokio::test]
    async fn test_udp_writer_sends_once() {
        let (server, client) = udp_pair().await;
        let peer = client.local_addr().unwrap();
        let writer = UdpResponseWriter::new(server, peer, 512);

        assert!(!writer.is_written());
        let sent = writer.write(&response(7)).await.unwrap();
        assert!(writer.is_written());
        assert_eq!(writer.protocol(), Protocol::Udp);
        assert_eq!(writer.peer_addr(), peer);

        let mut buf = vec![0u8; 512];
        let (len, _) = timeout(Duration::from_secs(1), client.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(len, sent);
        assert_eq!(wire::parse_message(&buf[..len]).unwrap().id(), 7);

        let second = writer.write(&response(8)).await;
        assert!(matches!(second, Err(Error::ResponseAlreadyWritten)));
        assert!(
            timeout(Duration::from_millis(100), client.recv_from(&mut buf))
                .await
                .is_err(),
            "second write must not reach the socket"
        );
    }

    #[tokio::test]
    async fn test_udp_writer_truncates() {
        let (server, client) = udp_pair().await;
        let writer = UdpResponseWriter::new(server, client.local_addr().unwrap(), 512);

        let mut large = response(9);
        let name = Name::from_str("example.com.").unwrap();
        for i in 0..80u8 {
            large.add_answer(Record::from_rdata(
                name.clone(),
                60,
                RData::A(A(Ipv4Addr::new(192, 0, 2, i))),
            ));
        }

        let sent = writer.write(&large).await.unwrap();
        assert!(sent <= 512);

        let mut buf = vec![0u8; 4096];
        let (len, _) = timeout(Duration::from_secs(1), client.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        let parsed = wire::parse_message(&buf[..len]).unwrap();
        assert!(parsed.truncated());
        assert!(parsed.answers().len() < 80);
    }

    async fn tcp_pair() -> (TcpStream, mpsc::Sender<OutboundFrame>, SocketAddr) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (stream, peer) = listener.accept().await.unwrap();
        let (_read, write) = stream.into_split();

        let (tx, rx) = mpsc::channel(8);
        tokio::spawn(write_frames(write, rx, peer));
        (client, tx, peer)
    }

    async fn read_framed(client: &mut TcpStream) -> Message {
        let mut len_buf = [0u8; 2];
        client.read_exact(&mut len_buf).await.unwrap();
        let mut body = vec![0u8; u16::from_be_bytes(len_buf) as usize];
        client.read_exact(&mut body).await.unwrap();
        wire::parse_message(&body).unwrap()
    }

    #[tokio::test]
    async fn test_tcp_writer_frames_and_rejects_second_write() {
        let (mut client, frames, peer) = tcp_pair().await;

        let writer = TcpResponseWriter::new(frames, peer);
        let sent = writer.write(&response(11)).await.unwrap();
        assert_eq!(writer.protocol(), Protocol::Tcp);

        let mut len_buf = [0u8; 2];
        client.read_exact(&mut len_buf).await.unwrap();
        assert_eq!(u16::from_be_bytes(len_buf) as usize, sent);
        let mut body = vec![0u8; sent];
        client.read_exact(&mut body).await.unwrap();
        assert_eq!(wire::parse_message(&body).unwrap().id(), 11);

        assert!(matches!(
            writer.write(&response(12)).await,
            Err(Error::ResponseAlreadyWritten)
        ));
    }

    #[tokio::test]
    async fn test_tcp_writers_share_connection() {
        let (mut client, frames, peer) = tcp_pair().await;

        let mut tasks = Vec::new();
        for id in 0..20u16 {
            let writer = TcpResponseWriter::new(frames.clone(), peer);
            tasks.push(tokio::spawn(async move {
                writer.write(&response(id)).await.unwrap();
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let mut ids = Vec::new();
        for _ in 0..20 {
            ids.push(read_framed(&mut client).await.id());
        }
        ids.sort_unstable();
        assert_eq!(ids, (0..20).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_tcp_write_abandoned_after_queueing_still_sends_whole_frame() {
        let (mut client, frames, peer) = tcp_pair().await;

        // Poll the write once: the frame gets queued, then the future is
        // dropped while waiting for the result.
        let writer = TcpResponseWriter::new(frames.clone(), peer);
        let message = response(21);
        let mut write = writer.write(&message);
        let finished = tokio::select! {
            biased;
            _ = &mut write => true,
            _ = std::future::ready(()) => false,
        };
        assert!(!finished);
        drop(write);
        assert!(writer.is_written());

        let next = TcpResponseWriter::new(frames, peer);
        next.write(&response(22)).await.unwrap();

        assert_eq!(read_framed(&mut client).await.id(), 21);
        assert_eq!(read_framed(&mut client).await.id(), 22);
    }

    #[tokio::test]
    async fn test_tcp_writer_reports_closed_connection() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);

        let writer = TcpResponseWriter::new(tx, "127.0.0.1:53".parse().unwrap());
        assert!(matches!(
            writer.write(&response(5)).await,
            Err(Error::Io(_))
        ));
    }
}
