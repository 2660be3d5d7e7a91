//! Total request dispatch.
//!
//! Every decoded request becomes exactly one response: the handler's, a
//! 4.04, a 4.05, or a 5.00 when the handler fails or panics. Handler
//! trouble is contained here; the I/O loop never dies on a request.

use std::panic::{catch_unwind, AssertUnwindSafe};

use coap_lite::{ContentFormat, ResponseType};
use tracing::{debug, error};

use crate::handler::Handler;
use crate::message::{CoapResponse, InboundMessage};
use crate::resource::{Lookup, Method, ResourceTable};

/// Discovery path served by the built-in fallback when no handler claims
/// it (RFC 6690).
pub const WELL_KNOWN_CORE: &str = ".well-known/core";

/// Owns the resource table once the server is running and turns requests
/// into responses.
pub struct Dispatcher {
    table: ResourceTable,
}

impl Dispatcher {
    /// Dispatcher over a populated table.
    #[must_use]
    pub fn new(table: ResourceTable) -> Self {
        Self { table }
    }

    /// Produce the response for one request. Total: never drops, never
    /// panics through.
    #[must_use]
    pub fn dispatch(&self, msg: &InboundMessage) -> CoapResponse {
        match self.table.lookup(&msg.path, msg.method) {
            Lookup::Found(handler) => self.invoke(handler, msg),
            Lookup::MethodNotAllowed => {
                debug!(path = %msg.path, method = %msg.method, "Method not allowed");
                CoapResponse::new(ResponseType::MethodNotAllowed)
            }
            Lookup::NotFound if msg.path == WELL_KNOWN_CORE => self.discovery(msg.method),
            Lookup::NotFound => {
                debug!(path = %msg.path, method = %msg.method, "No such resource");
                CoapResponse::new(ResponseType::NotFound)
            }
        }
    }

    fn invoke(&self, handler: &dyn Handler, msg: &InboundMessage) -> CoapResponse {
        match catch_unwind(AssertUnwindSafe(|| handler.handle(msg))) {
            Ok(Ok(response)) => {
                debug!(
                    path = %msg.path,
                    method = %msg.method,
                    code = ?response.code,
                    "Handler response ready"
                );
                response
            }
            Ok(Err(error)) => {
                error!(
                    path = %msg.path,
                    method = %msg.method,
                    error = %format!("{error:#}"),
                    "Handler failed"
                );
                CoapResponse::new(ResponseType::InternalServerError)
            }
            Err(panic) => {
                let panic_message = format!("{panic:?}");
                error!(
                    path = %msg.path,
                    method = %msg.method,
                    panic_message = %panic_message,
                    "Handler panicked - CRITICAL"
                );
                CoapResponse::new(ResponseType::InternalServerError)
            }
        }
    }

    /// `.well-known/core` acts as a virtual resource: GET lists the table
    /// in link format, anything else is 4.05.
    fn discovery(&self, method: Method) -> CoapResponse {
        if method != Method::Get {
            return CoapResponse::new(ResponseType::MethodNotAllowed);
        }
        CoapResponse::new(ResponseType::Content)
            .with_payload(self.table.link_format().into_bytes())
            .with_content_format(ContentFormat::ApplicationLinkFormat)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::EndpointId;

    fn msg(path: &str, method: Method) -> InboundMessage {
        InboundMessage {
            endpoint: EndpointId(0),
            peer: "127.0.0.1:42000".parse().unwrap(),
            method,
            path: path.trim_start_matches('/').to_string(),
            token: vec![0x01],
            message_id: 1,
            confirmable: true,
            payload: Vec::new(),
            content_format: None,
            block1: None,
            block2: None,
        }
    }

    fn sensor_dispatcher() -> Dispatcher {
        let mut table = ResourceTable::new();
        table
            .register(
                "/temperature",
                Method::Get,
                Box::new(|_req: &InboundMessage| -> anyhow::Result<CoapResponse> {
                    Ok(CoapResponse::text("22.5"))
                }),
            )
            .unwrap();
        Dispatcher::new(table)
    }

    #[test]
    fn test_registered_handler_answers() {
        let dispatcher = sensor_dispatcher();
        let response = dispatcher.dispatch(&msg("/temperature", Method::Get));
        assert_eq!(response.code, ResponseType::Content);
        assert_eq!(response.payload, b"22.5".to_vec());
    }

    #[test]
    fn test_unregistered_method_is_4_05() {
        let dispatcher = sensor_dispatcher();
        let response = dispatcher.dispatch(&msg("/temperature", Method::Post));
        assert_eq!(response.code, ResponseType::MethodNotAllowed);
    }

    #[test]
    fn test_unregistered_path_is_4_04() {
        let dispatcher = sensor_dispatcher();
        let response = dispatcher.dispatch(&msg("/humidity", Method::Get));
        assert_eq!(response.code, ResponseType::NotFound);
    }

    #[test]
    fn test_failing_handler_is_5_00() {
        let mut table = ResourceTable::new();
        table
            .register(
                "/flaky",
                Method::Get,
                Box::new(|_req: &InboundMessage| -> anyhow::Result<CoapResponse> {
                    Err(anyhow::anyhow!("sensor backend unreachable"))
                }),
            )
            .unwrap();
        let dispatcher = Dispatcher::new(table);
        let response = dispatcher.dispatch(&msg("/flaky", Method::Get));
        assert_eq!(response.code, ResponseType::InternalServerError);
    }

    #[test]
    fn test_panicking_handler_is_5_00_and_dispatch_survives() {
        let mut table = ResourceTable::new();
        table
            .register(
                "/boom",
                Method::Get,
                Box::new(|_req: &InboundMessage| -> anyhow::Result<CoapResponse> {
                    panic!("handler blew up");
                }),
            )
            .unwrap();
        table
            .register(
                "/steady",
                Method::Get,
                Box::new(|_req: &InboundMessage| -> anyhow::Result<CoapResponse> {
                    Ok(CoapResponse::text("still here"))
                }),
            )
            .unwrap();
        let dispatcher = Dispatcher::new(table);

        let response = dispatcher.dispatch(&msg("/boom", Method::Get));
        assert_eq!(response.code, ResponseType::InternalServerError);

        let response = dispatcher.dispatch(&msg("/steady", Method::Get));
        assert_eq!(response.code, ResponseType::Content);
        assert_eq!(response.payload, b"still here".to_vec());
    }

    #[test]
    fn test_well_known_core_lists_registered_resources() {
        let mut table = ResourceTable::new();
        table
            .register(
                "/temperature",
                Method::Get,
                Box::new(|_req: &InboundMessage| -> anyhow::Result<CoapResponse> {
                    Ok(CoapResponse::text("22.5"))
                }),
            )
            .unwrap();
        let dispatcher = Dispatcher::new(table);

        let response = dispatcher.dispatch(&msg(WELL_KNOWN_CORE, Method::Get));
        assert_eq!(response.code, ResponseType::Content);
        assert_eq!(response.content_format, Some(ContentFormat::ApplicationLinkFormat));
        assert_eq!(response.payload, b"</temperature>".to_vec());

        let response = dispatcher.dispatch(&msg(WELL_KNOWN_CORE, Method::Post));
        assert_eq!(response.code, ResponseType::MethodNotAllowed);
    }

    #[test]
    fn test_registered_well_known_handler_wins_over_fallback() {
        let mut table = ResourceTable::new();
        table
            .register(
                WELL_KNOWN_CORE,
                Method::Get,
                Box::new(|_req: &InboundMessage| -> anyhow::Result<CoapResponse> {
                    Ok(CoapResponse::text("custom listing"))
                }),
            )
            .unwrap();
        let dispatcher = Dispatcher::new(table);

        let response = dispatcher.dispatch(&msg(WELL_KNOWN_CORE, Method::Get));
        assert_eq!(response.payload, b"custom listing".to_vec());
    }
}
