//! # Server Module
//!
//! The server module ties endpoints, resources, and dispatch together
//! behind a small lifecycle: create the server, initialize it against a
//! listen URI, register resource handlers, start it, stop it.
//!
//! ## Overview
//!
//! [`CoapServer`] is the crate's front door. It owns:
//! - The resource table built up by `register`/`get`/`post`/`put`/`delete`
//! - The endpoint set bound during `init`
//! - The handle to the I/O loop thread while running
//!
//! ## Architecture
//!
//! Serving happens on one dedicated OS thread named `coap-io` that runs a
//! current-thread tokio runtime:
//!
//! - One async reader task per endpoint socket feeds a bounded queue
//! - The loop multiplexes the queue, a shutdown watch channel, and a
//!   sweep timer for stale block-wise transfer state
//! - Replies are sent from the loop through the originating endpoint
//!
//! `stop` signals the watch channel and joins the thread. The runtime is
//! dropped on the way out, which aborts the readers and closes every
//! socket, so no endpoint I/O survives a completed `stop`.
//!
//! ## Lifecycle
//!
//! States move strictly forward: `Created` → `Initialized` → `Running` →
//! `Stopped`. Calling an operation from the wrong state returns a
//! [`LifecycleError`](crate::error::LifecycleError); `stop` alone is
//! callable from anywhere and idempotent. A stopped server cannot be
//! restarted.
//!
//! ## Example
//!
//! ```rust,no_run
//! use coapd::{CoapResponse, CoapServer, ServerConfig};
//!
//! # fn main() -> anyhow::Result<()> {
//! let mut server = CoapServer::new(ServerConfig::default());
//! server.init("coap://0.0.0.0:5683")?;
//! server.get("temperature", |_req| Ok(CoapResponse::text("22.5")))?;
//! server.start()?;
//! // ... run until shutdown ...
//! server.stop();
//! # Ok(())
//! # }
//! ```

mod core;
mod io_loop;

pub use core::{CoapServer, State};
