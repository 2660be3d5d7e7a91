//! Integration tests for server lifecycle management
//!
//! # Test Coverage
//!
//! This module tests the lifecycle state machine end to end:
//! - Initialization failures (bad scheme, unresolvable host, no bindable endpoint)
//! - State transition errors (double init, start before init, restart after stop)
//! - Registration windows (open before start, closed once running or stopped)
//! - Stop idempotence from every state, including via Drop
//! - Endpoint release after stop (the port is immediately rebindable)
//!
//! # Test Strategy
//!
//! Servers bind `coap://127.0.0.1:0` so every test gets its own ephemeral
//! port and tests can run in parallel.

mod common;

use std::net::UdpSocket;

use coapd::{
    BindError, CoapResponse, CoapServer, LifecycleError, RegisterError, ResolveError,
    ServerConfig, ServerError, State,
};

fn server() -> CoapServer {
    common::logging::init();
    CoapServer::new(ServerConfig::default())
}

#[test]
fn test_init_rejects_unknown_scheme() {
    let mut server = server();
    let err = server.init("http://127.0.0.1:8080").unwrap_err();
    assert!(matches!(
        err,
        ServerError::Resolve(ResolveError::UnsupportedScheme { .. })
    ));
    assert_eq!(server.state(), State::Created);
}

#[test]
fn test_init_rejects_unresolvable_host() {
    let mut server = server();
    // RFC 6761 reserves .invalid; resolution can fail either at lookup or
    // with an empty answer depending on the resolver.
    let err = server.init("coap://unresolvable.invalid:5683").unwrap_err();
    assert!(matches!(err, ServerError::Resolve(_)));
    assert_eq!(server.state(), State::Created);
}

#[test]
fn test_init_without_udp_candidates_fails() {
    let mut server = server();
    // coaps resolves to a DTLS candidate, which has no backend to bind it.
    let err = server.init("coaps://127.0.0.1:0").unwrap_err();
    assert!(matches!(
        err,
        ServerError::Bind(BindError::NoEndpoints { attempted: 1 })
    ));
    assert_eq!(server.state(), State::Created);
}

#[test]
fn test_init_twice_fails() {
    let mut server = server();
    server.init("coap://127.0.0.1:0").unwrap();
    let err = server.init("coap://127.0.0.1:0").unwrap_err();
    assert!(matches!(
        err,
        ServerError::Lifecycle(LifecycleError::AlreadyInitialized)
    ));
    assert_eq!(server.state(), State::Initialized);
}

#[test]
fn test_local_addrs_reports_bound_port() {
    let mut server = server();
    server.init("coap://127.0.0.1:0").unwrap();
    let addrs = server.local_addrs();
    assert_eq!(addrs.len(), 1);
    assert!(addrs[0].ip().is_loopback());
    assert_ne!(addrs[0].port(), 0);
}

#[test]
fn test_full_lifecycle_walk() {
    let mut server = server();
    assert_eq!(server.state(), State::Created);

    server.init("coap://127.0.0.1:0").unwrap();
    assert_eq!(server.state(), State::Initialized);
    server
        .get("temperature", |_req| Ok(CoapResponse::text("22.5")))
        .unwrap();

    server.start().unwrap();
    assert_eq!(server.state(), State::Running);

    let err = server.start().unwrap_err();
    assert!(matches!(
        err,
        ServerError::Lifecycle(LifecycleError::AlreadyRunning)
    ));

    let err = server
        .get("late", |_req| Ok(CoapResponse::text("no")))
        .unwrap_err();
    assert!(matches!(
        err,
        ServerError::Register(RegisterError::RegistrationClosed)
    ));

    server.stop();
    assert_eq!(server.state(), State::Stopped);
    server.stop();
    assert_eq!(server.state(), State::Stopped);

    let err = server.init("coap://127.0.0.1:0").unwrap_err();
    assert!(matches!(
        err,
        ServerError::Lifecycle(LifecycleError::NotRunning)
    ));
    let err = server.start().unwrap_err();
    assert!(matches!(
        err,
        ServerError::Lifecycle(LifecycleError::NotRunning)
    ));
}

#[test]
fn test_stop_before_start_releases_endpoints() {
    let mut server = server();
    server.init("coap://127.0.0.1:0").unwrap();
    let addr = server.local_addrs()[0];

    server.stop();
    assert_eq!(server.state(), State::Stopped);
    assert!(server.local_addrs().is_empty());

    // The port must be free again.
    UdpSocket::bind(addr).unwrap();
}

#[test]
fn test_drop_while_running_stops_the_server() {
    common::logging::init();
    let addr = {
        let mut server = CoapServer::new(ServerConfig::default());
        server.init("coap://127.0.0.1:0").unwrap();
        server
            .get("temperature", |_req| Ok(CoapResponse::text("22.5")))
            .unwrap();
        server.start().unwrap();
        server.local_addrs()[0]
    };

    // Drop joined the I/O thread and closed the socket.
    UdpSocket::bind(addr).unwrap();
}
