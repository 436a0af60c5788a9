//! DNS wire format parsing, serialization and UDP truncation
//!
//! Encoding and decoding is delegated to `hickory-proto`. On top of that this
//! module implements the response size policy for datagram transports: a
//! response that does not fit the negotiated UDP payload size is cut down to
//! as many answer records as fit and flagged as truncated, so the client
//! retries over TCP.

use crate::dns::Message;
use crate::{Error, Result};
use hickory_proto::serialize::binary::{BinDecodable, BinEncodable};
use tracing::trace;

/// Size of the fixed DNS header
pub const HEADER_SIZE: usize = 12;

/// UDP payload size assumed when a query carries no EDNS0 record (RFC 1035)
pub const DEFAULT_UDP_PAYLOAD: usize = 512;

/// Largest message a 2-byte TCP length prefix can describe
pub const MAX_MESSAGE_SIZE: usize = u16::MAX as usize;

/// Parse DNS message from wire format bytes
///
/// # Example
///
/// ```no_run
/// use dnslisten::dns::wire::parse_message;
///
/// let wire_data = vec![/* DNS wire format bytes */];
/// let message = parse_message(&wire_data)?;
/// # Ok::<(), dnslisten::Error>(())
/// ```
pub fn parse_message(data: &[u8]) -> Result<Message> {
    Message::from_bytes(data)
        .map_err(|e| Error::DnsProtocol(format!("Failed to parse DNS message: {}", e)))
}

/// Serialize DNS message to wire format bytes
pub fn serialize_message(message: &Message) -> Result<Vec<u8>> {
    message
        .to_bytes()
        .map_err(|e| Error::DnsProtocol(format!("Failed to serialize DNS message: {}", e)))
}

/// Resolve the UDP response size ceiling for a query
///
/// The ceiling is the EDNS0 payload size advertised by the query, or
/// [`DEFAULT_UDP_PAYLOAD`] when the query has no EDNS0 record. It is never
/// below 512 bytes and never above `max_udp_size` (itself floored at 512).
pub fn udp_payload_limit(query: &Message, max_udp_size: usize) -> usize {
    let advertised = query
        .extensions()
        .as_ref()
        .map_or(DEFAULT_UDP_PAYLOAD, |edns| edns.max_payload() as usize);

    advertised
        .max(DEFAULT_UDP_PAYLOAD)
        .min(max_udp_size.max(DEFAULT_UDP_PAYLOAD))
}

/// Serialize a response so that it fits within `limit` bytes
///
/// Returns the full encoding when it fits. Otherwise the authority and
/// additional sections are dropped, the answer section is cut to the longest
/// prefix that fits and the TC flag is set. When not even a single answer
/// fits, the result is an empty-answer response with TC set. The EDNS0
/// record is kept unless it alone pushes the message over the limit. If even
/// the question section does not fit, the result is a bare header with TC
/// set, so the client still learns to retry over TCP.
///
/// # Errors
///
/// Returns [`Error::ResponseTooLarge`] if `limit` is smaller than a DNS
/// header.
pub fn serialize_truncated(response: &Message, limit: usize) -> Result<Vec<u8>> {
    let full = serialize_message(response)?;
    if full.len() <= limit {
        return Ok(full);
    }

    let mut keep_edns = response.extensions().is_some();
    let mut best = serialize_message(&truncated_copy(response, 0, keep_edns))?;
    if best.len() > limit && keep_edns {
        keep_edns = false;
        best = serialize_message(&truncated_copy(response, 0, keep_edns))?;
    }
    if best.len() > limit {
        let header = serialize_message(&header_only(response))?;
        if header.len() > limit {
            return Err(Error::ResponseTooLarge {
                size: full.len(),
                limit,
            });
        }
        trace!(
            original = full.len(),
            limit,
            questions = response.queries().len(),
            "Truncated response to bare header"
        );
        return Ok(header);
    }

    // Binary search for the largest answer prefix that still fits.
    let (mut lo, mut hi) = (1usize, response.answers().len());
    let mut kept = 0;
    while lo <= hi {
        let mid = lo + (hi - lo) / 2;
        let encoded = serialize_message(&truncated_copy(response, mid, keep_edns))?;
        if encoded.len() <= limit {
            best = encoded;
            kept = mid;
            lo = mid + 1;
        } else {
            hi = mid - 1;
        }
    }

    trace!(
        original = full.len(),
        truncated = best.len(),
        limit,
        answers_kept = kept,
        answers_total = response.answers().len(),
        "Truncated response"
    );

    Ok(best)
}

/// Copy header, questions, the first `answers` answer records and optionally
/// the EDNS0 record of `response` into a new message flagged as truncated.
fn truncated_copy(response: &Message, answers: usize, keep_edns: bool) -> Message {
    let mut message = header_only(response);
    message.add_queries(response.queries().iter().cloned());
    message.add_answers(response.answers().iter().take(answers).cloned());

    if keep_edns {
        if let Some(edns) = response.extensions() {
            message.set_edns(edns.clone());
        }
    }

    message
}

/// Header flags of `response` with TC set and every section empty
fn header_only(response: &Message) -> Message {
    let mut message = Message::new();
    message
        .set_id(response.id())
        .set_message_type(response.message_type())
        .set_op_code(response.op_code())
        .set_authoritative(response.authoritative())
        .set_recursion_desired(response.recursion_desired())
        .set_recursion_available(response.recursion_available())
        .set_authentic_data(response.authentic_data())
        .set_checking_disabled(response.checking_disabled())
        .set_response_code(response.response_code())
        .set_truncated(true);
    message
}
