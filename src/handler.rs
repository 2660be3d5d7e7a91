//! Handler capability objects.

use anyhow::Result;

use crate::message::{CoapResponse, InboundMessage};

/// Trait implemented by request handlers.
///
/// A handler receives the decoded request and returns a response or a
/// failure. Failures are logged and answered as 5.00 Internal Server Error
/// by the dispatcher; they never take the I/O loop down. Handlers run
/// synchronously on the loop thread, so a slow handler stalls the server.
pub trait Handler: Send + Sync + 'static {
    /// Produce the response for one request.
    fn handle(&self, req: &InboundMessage) -> Result<CoapResponse>;
}

impl<F> Handler for F
where
    F: Fn(&InboundMessage) -> Result<CoapResponse> + Send + Sync + 'static,
{
    fn handle(&self, req: &InboundMessage) -> Result<CoapResponse> {
        (self)(req)
    }
}

/// Boxed handler as stored in the resource table.
pub type BoxHandler = Box<dyn Handler>;
