//! The I/O loop: a dedicated thread owning every endpoint.
//!
//! [`spawn`] moves the endpoint set and dispatcher onto a new OS thread
//! running a current-thread tokio runtime. One reader task per endpoint
//! feeds a bounded queue; the loop multiplexes that queue, the shutdown
//! signal, and a sweep timer that expires stale block-wise state. Replies
//! leave through the endpoint the request arrived on.
//!
//! Shutdown is signal-then-join: [`LoopHandle::stop`] flips the watch
//! channel and joins the thread. Dropping the runtime on the way out
//! aborts the reader tasks and closes every socket, so once `stop`
//! returns, no endpoint I/O can happen.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use coap_lite::{CoapOption, Packet, ResponseType};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::block::{AssembleOutcome, BlockAssembler, BlockValue, TransferKey};
use crate::config::ServerConfig;
use crate::dispatch::Dispatcher;
use crate::endpoint::{EndpointId, EndpointSet};
use crate::message::{
    self, CoapResponse, DecodeOutcome, InboundMessage, MessageIdAllocator, ReplyRoute,
};

/// Handle to the running loop thread, held by the server while Running.
pub(crate) struct LoopHandle {
    shutdown: watch::Sender<bool>,
    thread: std::thread::JoinHandle<()>,
}

impl LoopHandle {
    /// Signal shutdown and block until the loop thread has exited. On
    /// return every endpoint socket is closed.
    pub(crate) fn stop(self) {
        // Send fails only when the loop is already gone; join still settles it.
        let _ = self.shutdown.send(true);
        if self.thread.join().is_err() {
            error!("I/O loop thread panicked during shutdown");
        }
    }
}

/// Bring up the loop thread over `endpoints` and `dispatcher`.
///
/// The runtime is built before the thread starts so a resource failure
/// surfaces here instead of killing the loop silently.
pub(crate) fn spawn(
    endpoints: EndpointSet,
    dispatcher: Dispatcher,
    config: ServerConfig,
) -> std::io::Result<LoopHandle> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_io()
        .enable_time()
        .build()?;
    let (shutdown, shutdown_rx) = watch::channel(false);
    let thread = std::thread::Builder::new()
        .name("coap-io".to_string())
        .spawn(move || {
            runtime.block_on(serve(endpoints, dispatcher, config, shutdown_rx));
            // The runtime drops here, aborting reader tasks and closing
            // their sockets before the thread exits.
        })?;
    Ok(LoopHandle { shutdown, thread })
}

struct Datagram {
    endpoint: EndpointId,
    peer: SocketAddr,
    bytes: Vec<u8>,
}

struct CachedBody {
    response: CoapResponse,
    touched: Instant,
}

struct IoLoop {
    sockets: Vec<Option<Arc<UdpSocket>>>,
    dispatcher: Dispatcher,
    assembler: BlockAssembler,
    block2_cache: HashMap<TransferKey, CachedBody>,
    mids: MessageIdAllocator,
    config: ServerConfig,
}

async fn serve(
    endpoints: EndpointSet,
    dispatcher: Dispatcher,
    config: ServerConfig,
    mut shutdown: watch::Receiver<bool>,
) {
    // tokio requires a non-zero channel bound.
    let (inbound_tx, mut inbound_rx) = mpsc::channel::<Datagram>(config.queue_depth.max(1));

    let mut sockets: Vec<Option<Arc<UdpSocket>>> = Vec::new();
    for endpoint in endpoints.into_endpoints() {
        let local_addr = endpoint.local_addr();
        let (id, std_socket) = endpoint.into_socket();
        match UdpSocket::from_std(std_socket) {
            Ok(socket) => {
                let socket = Arc::new(socket);
                tokio::spawn(read_endpoint(
                    id,
                    Arc::clone(&socket),
                    inbound_tx.clone(),
                    config.recv_buffer,
                ));
                sockets.push(Some(socket));
            }
            Err(error) => {
                error!(endpoint = %id, %local_addr, %error, "Failed to adopt endpoint socket");
                sockets.push(None);
            }
        }
    }
    drop(inbound_tx);

    let active = sockets.iter().flatten().count();
    if active == 0 {
        error!("No endpoint socket could be adopted; I/O loop exiting");
        return;
    }

    let mut io = IoLoop {
        sockets,
        dispatcher,
        assembler: BlockAssembler::new(config.max_block_body, config.transfer_ttl),
        block2_cache: HashMap::new(),
        mids: MessageIdAllocator::new(mid_seed()),
        config,
    };
    // tokio requires a non-zero timer period.
    let mut sweep = tokio::time::interval(config.sweep_interval.max(Duration::from_millis(1)));

    info!(endpoints = active, "CoAP I/O loop running");
    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!("Shutdown signal received; I/O loop exiting");
                    break;
                }
            }
            received = inbound_rx.recv() => match received {
                Some(datagram) => io.handle_datagram(datagram).await,
                None => {
                    error!("All endpoint readers stopped; I/O loop exiting");
                    break;
                }
            },
            _ = sweep.tick() => io.sweep_expired(),
        }
    }
}

/// Reader task: one per endpoint. Ends when the socket dies or the loop
/// drops the queue.
async fn read_endpoint(
    id: EndpointId,
    socket: Arc<UdpSocket>,
    inbound: mpsc::Sender<Datagram>,
    buffer_size: usize,
) {
    let mut buffer = vec![0u8; buffer_size];
    loop {
        match socket.recv_from(&mut buffer).await {
            Ok((len, peer)) => {
                let datagram = Datagram {
                    endpoint: id,
                    peer,
                    bytes: buffer[..len].to_vec(),
                };
                if inbound.send(datagram).await.is_err() {
                    return;
                }
            }
            Err(error) => {
                warn!(endpoint = %id, %error, "Endpoint receive failed");
            }
        }
    }
}

impl IoLoop {
    async fn handle_datagram(&mut self, datagram: Datagram) {
        match message::decode(datagram.endpoint, datagram.peer, &datagram.bytes) {
            DecodeOutcome::Request(msg) => self.handle_request(msg).await,
            DecodeOutcome::Ping { message_id } => {
                debug!(peer = %datagram.peer, message_id, "CoAP ping; answering with reset");
                self.send_packet(datagram.endpoint, datagram.peer, message::build_reset(message_id))
                    .await;
            }
            DecodeOutcome::Unservable { route, code } => {
                debug!(peer = %datagram.peer, code = ?code, "Unservable request");
                self.send_reply(
                    datagram.endpoint,
                    datagram.peer,
                    &route,
                    &CoapResponse::new(code),
                    None,
                    None,
                )
                .await;
            }
            DecodeOutcome::Ignore => {
                debug!(peer = %datagram.peer, "Ignoring non-request message");
            }
            DecodeOutcome::Malformed => {
                debug!(
                    peer = %datagram.peer,
                    len = datagram.bytes.len(),
                    "Dropping undecodable datagram"
                );
            }
        }
    }

    async fn handle_request(&mut self, mut msg: InboundMessage) {
        debug!(
            peer = %msg.peer,
            method = %msg.method,
            path = %msg.path,
            confirmable = msg.confirmable,
            "Request received"
        );

        // Block1: reassemble the body before anything sees the request.
        let mut block1_echo = None;
        if let Some(block1) = msg.block1 {
            let key = TransferKey {
                peer: msg.peer,
                method: msg.method,
                path: msg.path.clone(),
            };
            let route = msg.reply_route();
            match self.assembler.accept(key, block1, &msg.payload) {
                AssembleOutcome::Continue(echo) => {
                    debug!(peer = %msg.peer, path = %msg.path, block = echo.num, "Block1 segment accepted");
                    let continue_reply = CoapResponse::new(ResponseType::Continue);
                    self.send_reply(msg.endpoint, msg.peer, &route, &continue_reply, Some(echo), None)
                        .await;
                    return;
                }
                AssembleOutcome::Mismatch => {
                    debug!(peer = %msg.peer, path = %msg.path, "Block1 sequence mismatch");
                    let reply = CoapResponse::new(ResponseType::RequestEntityIncomplete);
                    self.send_reply(msg.endpoint, msg.peer, &route, &reply, None, None)
                        .await;
                    return;
                }
                AssembleOutcome::TooLarge => {
                    warn!(
                        peer = %msg.peer,
                        path = %msg.path,
                        max_body = self.config.max_block_body,
                        "Block-wise body over the configured cap"
                    );
                    let reply = CoapResponse::new(ResponseType::RequestEntityTooLarge);
                    self.send_reply(msg.endpoint, msg.peer, &route, &reply, None, None)
                        .await;
                    return;
                }
                AssembleOutcome::Complete(body) => {
                    msg.payload = body;
                    block1_echo = Some(block1);
                }
            }
        }

        let key = TransferKey {
            peer: msg.peer,
            method: msg.method,
            path: msg.path.clone(),
        };

        // Follow-up Block2 requests are served from the cached body so every
        // slice comes from the same handler run. A cache miss (expired or
        // never cached) re-dispatches and slices the fresh body.
        let response = match msg.block2 {
            Some(block2) if block2.num > 0 => match self.block2_cache.get_mut(&key) {
                Some(cached) => {
                    cached.touched = Instant::now();
                    cached.response.clone()
                }
                None => self.dispatcher.dispatch(&msg),
            },
            _ => self.dispatcher.dispatch(&msg),
        };

        let (shaped, block2) = self.shape_outbound(&key, &msg, response);
        self.send_reply(msg.endpoint, msg.peer, &msg.reply_route(), &shaped, block1_echo, block2)
            .await;
    }

    /// Slice an oversized response body per RFC 7959 and keep the full body
    /// cached for the follow-up blocks.
    fn shape_outbound(
        &mut self,
        key: &TransferKey,
        msg: &InboundMessage,
        response: CoapResponse,
    ) -> (CoapResponse, Option<BlockValue>) {
        let preferred_szx = BlockValue::szx_for_size(self.config.preferred_block_size);
        let (num, szx) = match msg.block2 {
            Some(requested) => (requested.num, requested.szx.min(preferred_szx)),
            None => (0, preferred_szx),
        };
        let block_size = 1usize << (szx + 4);

        if num == 0 && response.payload.len() <= block_size {
            self.block2_cache.remove(key);
            // Echo a Block2 option only when the peer asked block-wise.
            let echo = msg.block2.map(|_| BlockValue {
                num: 0,
                more: false,
                szx,
            });
            return (response, echo);
        }

        let slicing = BlockValue {
            num,
            more: false,
            szx,
        };
        match crate::block::slice_body(&response.payload, slicing) {
            Some((slice, more)) => {
                let shaped = CoapResponse {
                    code: response.code,
                    payload: slice.to_vec(),
                    content_format: response.content_format,
                };
                if more {
                    self.block2_cache.insert(
                        key.clone(),
                        CachedBody {
                            response,
                            touched: Instant::now(),
                        },
                    );
                } else {
                    self.block2_cache.remove(key);
                }
                (shaped, Some(BlockValue { num, more, szx }))
            }
            None => {
                debug!(peer = %msg.peer, path = %msg.path, block = num, "Block2 request past end of body");
                self.block2_cache.remove(key);
                (CoapResponse::new(ResponseType::BadOption), None)
            }
        }
    }

    async fn send_reply(
        &mut self,
        endpoint: EndpointId,
        peer: SocketAddr,
        route: &ReplyRoute,
        response: &CoapResponse,
        block1: Option<BlockValue>,
        block2: Option<BlockValue>,
    ) {
        let mut packet = message::build_reply(route, response, &mut self.mids);
        if let Some(block1) = block1 {
            packet.add_option(CoapOption::Block1, block1.to_bytes());
        }
        if let Some(block2) = block2 {
            packet.add_option(CoapOption::Block2, block2.to_bytes());
        }
        self.send_packet(endpoint, peer, packet).await;
    }

    async fn send_packet(&self, endpoint: EndpointId, peer: SocketAddr, packet: Packet) {
        let Some(Some(socket)) = self.sockets.get(endpoint.0) else {
            error!(endpoint = %endpoint, "No socket for endpoint");
            return;
        };
        match packet.to_bytes() {
            Ok(bytes) => {
                if let Err(error) = socket.send_to(&bytes, peer).await {
                    warn!(endpoint = %endpoint, %peer, %error, "Failed to send reply");
                }
            }
            Err(error) => {
                error!(%peer, ?error, "Failed to encode reply");
            }
        }
    }

    fn sweep_expired(&mut self) {
        let dropped = self.assembler.sweep();
        if dropped > 0 {
            debug!(dropped, "Expired stalled inbound transfers");
        }
        let ttl = self.config.transfer_ttl;
        let before = self.block2_cache.len();
        self.block2_cache
            .retain(|_, cached| cached.touched.elapsed() <= ttl);
        let expired = before - self.block2_cache.len();
        if expired > 0 {
            debug!(expired, "Expired cached sliced responses");
        }
    }
}

fn mid_seed() -> u16 {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.subsec_nanos())
        .unwrap_or(0);
    (nanos & 0xffff) as u16
}
