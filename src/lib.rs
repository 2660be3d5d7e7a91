//! # coapd
//!
//! **coapd** is an embeddable CoAP ([RFC 7252](https://datatracker.ietf.org/doc/html/rfc7252))
//! server core for Rust: URI resolution, UDP endpoint management, resource
//! registration, request dispatch, and block-wise transfer, behind a small
//! explicit lifecycle.
//!
//! ## Overview
//!
//! The crate turns a listen URI such as `coap://0.0.0.0:5683` into a set of
//! bound endpoints, serves registered resource handlers over them on a
//! dedicated I/O thread, and answers everything else per protocol: unknown
//! paths get 4.04, unregistered methods 4.05, handler failures 5.00, CoAP
//! pings a Reset. Message framing is delegated to [`coap_lite`]; this crate
//! owns transport, lifecycle, and dispatch.
//!
//! ## Architecture
//!
//! The library is organized into several key modules:
//!
//! - **[`resolver`]** - CoAP URI parsing and address resolution
//! - **[`endpoint`]** - UDP socket binding and the endpoint set
//! - **[`resource`]** - The path/method handler table
//! - **[`handler`]** - The [`Handler`] trait implemented by resources
//! - **[`dispatch`]** - Total request dispatch with panic recovery
//! - **[`message`]** - Datagram decode and reply construction over `coap-lite`
//! - **[`block`]** - RFC 7959 block-wise transfer codec and reassembly
//! - **[`server`]** - The [`CoapServer`] lifecycle and its I/O loop
//! - **[`config`]** - Runtime tuning from the environment
//! - **[`error`]** - The error taxonomy, one enum per failure stage
//!
//! ### Request Handling Flow
//!
//! ```mermaid
//! sequenceDiagram
//!     participant Client
//!     participant Reader as Endpoint Reader<br/>(tokio task)
//!     participant Loop as I/O Loop
//!     participant Dispatcher
//!     participant Handler
//!
//!     Client->>Reader: UDP datagram
//!     Reader->>Loop: queued Datagram
//!     Loop->>Loop: decode (coap-lite)
//!
//!     alt Empty CON (ping)
//!         Loop-->>Client: RST
//!     end
//!
//!     Loop->>Loop: Block1 reassembly<br/>(2.31 until complete)
//!     Loop->>Dispatcher: InboundMessage
//!     Dispatcher->>Dispatcher: resource lookup<br/>(4.04 / 4.05 on miss)
//!     Dispatcher->>Handler: handle(&req)
//!
//!     alt Handler Err or panic
//!         Dispatcher-->>Loop: 5.00 Internal Server Error
//!     end
//!
//!     Handler-->>Dispatcher: CoapResponse
//!     Dispatcher-->>Loop: response
//!     Loop->>Loop: Block2 slicing if oversized
//!     Loop-->>Client: ACK (piggybacked) or NON
//! ```
//!
//! ## Quick Start
//!
//! ```no_run
//! use coapd::{CoapResponse, CoapServer, ServerConfig};
//!
//! fn main() -> anyhow::Result<()> {
//!     let mut server = CoapServer::new(ServerConfig::from_env());
//!     server.init("coap://0.0.0.0:5683")?;
//!     server.get("temperature", |_req| Ok(CoapResponse::text("22.5")))?;
//!     server.start()?;
//!     // ... wait for a shutdown signal ...
//!     server.stop();
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - **Strict lifecycle** - `Created` → `Initialized` → `Running` → `Stopped`,
//!   misuse reported as typed errors, `stop` idempotent from any state
//! - **Multi-endpoint** - one listen URI can bind several addresses; init
//!   succeeds if at least one endpoint comes up
//! - **Total dispatch** - every decodable request gets exactly one reply,
//!   including handler errors and panics
//! - **Block-wise transfer** - RFC 7959 Block1 reassembly and Block2 slicing
//!   with time-limited transfer state
//! - **Resource discovery** - `/.well-known/core` link-format listing
//!   (RFC 6690), overridable by a user registration
//!
//! ## Runtime Considerations
//!
//! All endpoint I/O happens on one OS thread running a current-thread tokio
//! runtime. Handlers are invoked synchronously on that thread, so they
//! should not block for long; slow work belongs on the caller's own threads
//! with the handler returning quickly. `stop` joins the I/O thread, and no
//! endpoint I/O happens after it returns.

pub mod block;
pub mod config;
pub mod dispatch;
pub mod endpoint;
pub mod error;
pub mod handler;
pub mod message;
pub mod resolver;
pub mod resource;
pub mod server;

pub use config::ServerConfig;
pub use error::{
    BindError, LifecycleError, RegisterError, ResolveError, ServerError,
};
pub use handler::Handler;
pub use message::{CoapResponse, InboundMessage};
pub use resource::Method;
pub use server::{CoapServer, State};
