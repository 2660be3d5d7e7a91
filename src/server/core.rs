use std::net::SocketAddr;

use tracing::{error, info};

use crate::config::ServerConfig;
use crate::dispatch::Dispatcher;
use crate::endpoint::EndpointSet;
use crate::error::{LifecycleError, ServerError};
use crate::handler::Handler;
use crate::message::{CoapResponse, InboundMessage};
use crate::resolver::{self, ResolveScope};
use crate::resource::{Method, ResourceTable};
use crate::server::io_loop::{self, LoopHandle};

/// Where the server is in its lifecycle.
///
/// The only legal walk is `Created` → `Initialized` → `Running` →
/// `Stopped`; every operation checks the state it needs and fails with a
/// [`LifecycleError`] otherwise. A stopped server stays stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Built but not yet bound to any endpoint.
    Created,
    /// Endpoints bound; handlers may still be registered.
    Initialized,
    /// The I/O loop is serving requests.
    Running,
    /// Terminal. Endpoints are closed and the loop has exited.
    Stopped,
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            State::Created => "created",
            State::Initialized => "initialized",
            State::Running => "running",
            State::Stopped => "stopped",
        };
        write!(f, "{name}")
    }
}

/// A CoAP server over one or more UDP endpoints.
///
/// Construction is cheap; [`init`](Self::init) resolves and binds,
/// [`start`](Self::start) hands the endpoints to a dedicated I/O thread,
/// and [`stop`](Self::stop) tears everything down. Handlers are
/// registered per path and method between construction and `start`.
pub struct CoapServer {
    config: ServerConfig,
    state: State,
    table: Option<ResourceTable>,
    endpoints: Option<EndpointSet>,
    local_addrs: Vec<SocketAddr>,
    handle: Option<LoopHandle>,
}

impl CoapServer {
    /// Create a server with the given tuning. No sockets are touched.
    #[must_use]
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            state: State::Created,
            table: Some(ResourceTable::new()),
            endpoints: None,
            local_addrs: Vec::new(),
            handle: None,
        }
    }

    /// Resolve `uri` and bind an endpoint for every usable candidate.
    ///
    /// Succeeds if at least one candidate binds. A wildcard host such as
    /// `coap://0.0.0.0` listens on all interfaces.
    pub fn init(&mut self, uri: &str) -> Result<(), ServerError> {
        match self.state {
            State::Created => {}
            State::Stopped => return Err(LifecycleError::NotRunning.into()),
            State::Initialized | State::Running => {
                return Err(LifecycleError::AlreadyInitialized.into());
            }
        }

        let candidates = resolver::resolve(uri, ResolveScope::Local).map_err(|error| {
            error!(%uri, %error, "Failed to resolve listen URI");
            error
        })?;
        let endpoints = EndpointSet::bind(&candidates).map_err(|error| {
            error!(%uri, %error, "Failed to bind any endpoint");
            error
        })?;

        self.local_addrs = endpoints.local_addrs();
        info!(%uri, endpoints = endpoints.len(), "Server initialized");
        self.endpoints = Some(endpoints);
        self.state = State::Initialized;
        Ok(())
    }

    /// Register `handler` for `method` on `path`.
    ///
    /// Allowed while the server is `Created` or `Initialized`. Each
    /// `(path, method)` pair takes exactly one handler for the lifetime of
    /// the server.
    pub fn register(
        &mut self,
        path: &str,
        method: Method,
        handler: impl Handler,
    ) -> Result<(), ServerError> {
        let Some(table) = self.table.as_mut() else {
            return Err(crate::error::RegisterError::RegistrationClosed.into());
        };
        table.register(path, method, Box::new(handler))?;
        Ok(())
    }

    /// Register a GET handler for `path`.
    pub fn get<F>(&mut self, path: &str, handler: F) -> Result<(), ServerError>
    where
        F: Fn(&InboundMessage) -> anyhow::Result<CoapResponse> + Send + Sync + 'static,
    {
        self.register(path, Method::Get, handler)
    }

    /// Register a POST handler for `path`.
    pub fn post<F>(&mut self, path: &str, handler: F) -> Result<(), ServerError>
    where
        F: Fn(&InboundMessage) -> anyhow::Result<CoapResponse> + Send + Sync + 'static,
    {
        self.register(path, Method::Post, handler)
    }

    /// Register a PUT handler for `path`.
    pub fn put<F>(&mut self, path: &str, handler: F) -> Result<(), ServerError>
    where
        F: Fn(&InboundMessage) -> anyhow::Result<CoapResponse> + Send + Sync + 'static,
    {
        self.register(path, Method::Put, handler)
    }

    /// Register a DELETE handler for `path`.
    pub fn delete<F>(&mut self, path: &str, handler: F) -> Result<(), ServerError>
    where
        F: Fn(&InboundMessage) -> anyhow::Result<CoapResponse> + Send + Sync + 'static,
    {
        self.register(path, Method::Delete, handler)
    }

    /// Hand the endpoints to the I/O thread and begin serving.
    ///
    /// After this returns the resource table is frozen; registration
    /// attempts fail with [`RegistrationClosed`].
    ///
    /// [`RegistrationClosed`]: crate::error::RegisterError::RegistrationClosed
    pub fn start(&mut self) -> Result<(), ServerError> {
        match self.state {
            State::Initialized => {}
            State::Created => return Err(LifecycleError::NotInitialized.into()),
            State::Running => return Err(LifecycleError::AlreadyRunning.into()),
            State::Stopped => return Err(LifecycleError::NotRunning.into()),
        }

        let (Some(endpoints), Some(table)) = (self.endpoints.take(), self.table.take()) else {
            return Err(LifecycleError::NotInitialized.into());
        };
        let resources = table.len();
        let dispatcher = Dispatcher::new(table);

        let handle = io_loop::spawn(endpoints, dispatcher, self.config).map_err(|source| {
            error!(%source, "Failed to start the I/O loop");
            self.state = State::Stopped;
            ServerError::Spawn { source }
        })?;

        self.handle = Some(handle);
        self.state = State::Running;
        info!(
            addrs = ?self.local_addrs,
            resources,
            "CoAP server running"
        );
        Ok(())
    }

    /// Stop serving and release every endpoint.
    ///
    /// Blocks until the I/O thread has exited, so no endpoint I/O happens
    /// after this returns. Safe to call from any state; repeated calls are
    /// no-ops.
    pub fn stop(&mut self) {
        match self.state {
            State::Running => {
                if let Some(handle) = self.handle.take() {
                    handle.stop();
                }
                self.state = State::Stopped;
                info!("CoAP server stopped");
            }
            State::Created | State::Initialized => {
                if let Some(mut endpoints) = self.endpoints.take() {
                    endpoints.close_all();
                }
                self.table = None;
                self.local_addrs.clear();
                self.state = State::Stopped;
            }
            State::Stopped => {}
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> State {
        self.state
    }

    /// Addresses actually bound, useful when the listen port was 0.
    ///
    /// Empty until [`init`](Self::init) succeeds.
    #[must_use]
    pub fn local_addrs(&self) -> &[SocketAddr] {
        &self.local_addrs
    }
}

impl Drop for CoapServer {
    fn drop(&mut self) {
        self.stop();
    }
}
