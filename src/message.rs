//! Domain message types over the `coap-lite` wire codec.
//!
//! Everything byte-level (header layout, option encoding) belongs to
//! `coap-lite`; this module classifies inbound datagrams for the server
//! role and builds reply envelopes. CoAP semantics live here, socket I/O
//! does not.

use std::net::SocketAddr;

use coap_lite::{
    CoapOption, ContentFormat, MessageClass, MessageType, Packet, ResponseType,
};

use crate::block::BlockValue;
use crate::endpoint::EndpointId;
use crate::resource::Method;

/// One decoded request, reply routing included.
///
/// Built per datagram (or per completed block-wise reassembly) and consumed
/// by dispatch. `payload` is always the full request body; block-wise
/// transfers are reassembled before an `InboundMessage` reaches a handler.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    /// Endpoint the datagram arrived on; replies leave through the same one.
    pub endpoint: EndpointId,
    /// Peer the datagram came from.
    pub peer: SocketAddr,
    /// Request method.
    pub method: Method,
    /// Canonical resource path (no leading slash, segments joined by `/`).
    pub path: String,
    /// Token to echo in the reply.
    pub token: Vec<u8>,
    /// Message id of the request.
    pub message_id: u16,
    /// Whether the request was confirmable (CON).
    pub confirmable: bool,
    /// Request body.
    pub payload: Vec<u8>,
    /// Declared content format of the body, if any.
    pub content_format: Option<ContentFormat>,
    /// Block1 option, when the body arrives block-wise.
    pub block1: Option<BlockValue>,
    /// Block2 option, when the peer asks for a sliced response.
    pub block2: Option<BlockValue>,
}

impl InboundMessage {
    /// Request body as text, lossily.
    #[must_use]
    pub fn payload_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }

    /// The coordinates a reply needs.
    #[must_use]
    pub fn reply_route(&self) -> ReplyRoute {
        ReplyRoute {
            confirmable: self.confirmable,
            message_id: self.message_id,
            token: self.token.clone(),
        }
    }
}

/// What a reply must carry to reach the requester: CON requests get a
/// piggybacked ACK echoing the message id, NON requests get a NON with a
/// fresh id. The token is echoed either way.
#[derive(Debug, Clone)]
pub struct ReplyRoute {
    /// Whether the request was confirmable.
    pub confirmable: bool,
    /// Message id of the request.
    pub message_id: u16,
    /// Token of the request.
    pub token: Vec<u8>,
}

/// A response on its way out: code, body, and declared format.
///
/// Handlers build these; the I/O loop wraps them in the right envelope and
/// slices oversized bodies (Block2) before sending.
#[derive(Debug, Clone, PartialEq)]
pub struct CoapResponse {
    /// Response code.
    pub code: ResponseType,
    /// Response body.
    pub payload: Vec<u8>,
    /// Content format of the body, if declared.
    pub content_format: Option<ContentFormat>,
}

impl CoapResponse {
    /// Empty response with the given code.
    #[must_use]
    pub fn new(code: ResponseType) -> Self {
        Self {
            code,
            payload: Vec::new(),
            content_format: None,
        }
    }

    /// 2.05 Content with a `text/plain` body.
    #[must_use]
    pub fn text(body: impl Into<String>) -> Self {
        Self {
            code: ResponseType::Content,
            payload: body.into().into_bytes(),
            content_format: Some(ContentFormat::TextPlain),
        }
    }

    /// Attach a body.
    #[must_use]
    pub fn with_payload(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.payload = payload.into();
        self
    }

    /// Declare the body's content format.
    #[must_use]
    pub fn with_content_format(mut self, format: ContentFormat) -> Self {
        self.content_format = Some(format);
        self
    }
}

/// Classification of one inbound datagram, server role.
#[derive(Debug)]
pub enum DecodeOutcome {
    /// A request ready for block handling and dispatch.
    Request(InboundMessage),
    /// Empty CON used as a liveness probe (RFC 7252 section 4.3); answer
    /// with a Reset echoing the message id.
    Ping {
        /// Message id to echo in the Reset.
        message_id: u16,
    },
    /// Valid envelope this server cannot serve; answer with `code`.
    Unservable {
        /// Reply routing for the error response.
        route: ReplyRoute,
        /// Error code to answer with.
        code: ResponseType,
    },
    /// Responses, acknowledgements, resets: a server ignores them.
    Ignore,
    /// Undecodable datagram; dropped.
    Malformed,
}

/// Decode one datagram received on `endpoint` from `peer`.
pub fn decode(endpoint: EndpointId, peer: SocketAddr, datagram: &[u8]) -> DecodeOutcome {
    let packet = match Packet::from_bytes(datagram) {
        Ok(packet) => packet,
        Err(_) => return DecodeOutcome::Malformed,
    };

    let message_type = packet.header.get_type();
    let message_id = packet.header.message_id;

    match packet.header.code {
        MessageClass::Empty => match message_type {
            MessageType::Confirmable => DecodeOutcome::Ping { message_id },
            // Empty NON/ACK/RST carry nothing for a server.
            _ => DecodeOutcome::Ignore,
        },
        MessageClass::Request(request_type) => {
            let confirmable = match message_type {
                MessageType::Confirmable => true,
                MessageType::NonConfirmable => false,
                // A request code on an ACK or RST is nonsense; drop it.
                _ => return DecodeOutcome::Ignore,
            };
            let route = ReplyRoute {
                confirmable,
                message_id,
                token: packet.get_token().to_vec(),
            };

            let Some(method) = Method::from_request_type(request_type) else {
                return DecodeOutcome::Unservable {
                    route,
                    code: ResponseType::MethodNotAllowed,
                };
            };

            let block1 = match block_option(&packet, CoapOption::Block1) {
                Ok(block) => block,
                Err(()) => {
                    return DecodeOutcome::Unservable {
                        route,
                        code: ResponseType::BadOption,
                    }
                }
            };
            let block2 = match block_option(&packet, CoapOption::Block2) {
                Ok(block) => block,
                Err(()) => {
                    return DecodeOutcome::Unservable {
                        route,
                        code: ResponseType::BadOption,
                    }
                }
            };

            DecodeOutcome::Request(InboundMessage {
                endpoint,
                peer,
                method,
                path: uri_path(&packet),
                token: route.token,
                message_id,
                confirmable,
                payload: packet.payload.clone(),
                content_format: packet.get_content_format(),
                block1,
                block2,
            })
        }
        // Responses and reserved code classes: nothing for a server to do.
        _ => DecodeOutcome::Ignore,
    }
}

/// Canonical path: Uri-Path segments joined with `/`, no leading slash.
fn uri_path(packet: &Packet) -> String {
    match packet.get_option(CoapOption::UriPath) {
        Some(segments) => segments
            .iter()
            .map(|segment| String::from_utf8_lossy(segment).into_owned())
            .collect::<Vec<_>>()
            .join("/"),
        None => String::new(),
    }
}

/// `Ok(None)` when absent, `Err(())` when present but undecodable.
fn block_option(packet: &Packet, option: CoapOption) -> Result<Option<BlockValue>, ()> {
    match packet.get_option(option).and_then(|values| values.front()) {
        Some(raw) => BlockValue::from_bytes(raw).map(Some).ok_or(()),
        None => Ok(None),
    }
}

/// Wrapping allocator for the message ids of server-originated messages
/// (NON replies). Piggybacked ACKs echo the request id and never draw from
/// this.
#[derive(Debug)]
pub struct MessageIdAllocator {
    next: u16,
}

impl MessageIdAllocator {
    /// Allocator starting at `seed`.
    #[must_use]
    pub fn new(seed: u16) -> Self {
        Self { next: seed }
    }

    /// Next message id, wrapping at the u16 boundary.
    pub fn allocate(&mut self) -> u16 {
        let id = self.next;
        self.next = self.next.wrapping_add(1);
        id
    }
}

/// Wrap a response in its reply envelope.
///
/// The block options a sliced reply needs are added by the caller before
/// encoding; this builds the plain envelope.
#[must_use]
pub fn build_reply(
    route: &ReplyRoute,
    response: &CoapResponse,
    mids: &mut MessageIdAllocator,
) -> Packet {
    let mut packet = Packet::new();
    if route.confirmable {
        packet.header.set_type(MessageType::Acknowledgement);
        packet.header.message_id = route.message_id;
    } else {
        packet.header.set_type(MessageType::NonConfirmable);
        packet.header.message_id = mids.allocate();
    }
    packet.header.code = MessageClass::Response(response.code);
    packet.set_token(route.token.clone());
    if let Some(format) = response.content_format {
        packet.set_content_format(format);
    }
    packet.payload = response.payload.clone();
    packet
}

/// Reset echoing a ping's message id (RFC 7252 section 4.3).
#[must_use]
pub fn build_reset(message_id: u16) -> Packet {
    let mut packet = Packet::new();
    packet.header.set_type(MessageType::Reset);
    packet.header.code = MessageClass::Empty;
    packet.header.message_id = message_id;
    packet
}
