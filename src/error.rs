//! Error types for the CoAP server core.
//!
//! Only conditions that make an API call unusable surface here: URI
//! resolution, endpoint binding, registration conflicts, and lifecycle
//! misuse. Per-request outcomes (4.04 Not Found, 4.05 Method Not Allowed,
//! handler failure) are protocol responses built by the dispatcher and are
//! never Rust errors.

/// Errors resolving a URI into bind candidates.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    /// The URI string did not parse.
    #[error("invalid uri {uri:?}: {source}")]
    InvalidUri {
        /// The offending URI string.
        uri: String,
        /// Parse failure detail.
        #[source]
        source: url::ParseError,
    },

    /// The URI scheme is not a CoAP scheme.
    #[error("unsupported scheme {scheme:?} (expected \"coap\" or \"coaps\")")]
    UnsupportedScheme {
        /// The scheme that was given.
        scheme: String,
    },

    /// The URI has no host component.
    #[error("uri {uri:?} has no host")]
    MissingHost {
        /// The offending URI string.
        uri: String,
    },

    /// System address lookup failed.
    #[error("address lookup for {host}:{port} failed: {source}")]
    Lookup {
        /// Host that was looked up.
        host: String,
        /// Port the lookup was for.
        port: u16,
        /// Underlying resolver error.
        #[source]
        source: std::io::Error,
    },

    /// Lookup succeeded but produced no addresses.
    #[error("address lookup for {host}:{port} returned no candidates")]
    NoAddresses {
        /// Host that was looked up.
        host: String,
        /// Port the lookup was for.
        port: u16,
    },
}

/// Errors binding the endpoint set.
///
/// Individual candidate failures are warnings, not errors; binding fails
/// only when nothing could be bound at all.
#[derive(Debug, thiserror::Error)]
pub enum BindError {
    /// Every candidate failed or was skipped; there is nothing to serve from.
    #[error("no endpoint could be bound ({attempted} candidate(s) attempted)")]
    NoEndpoints {
        /// Number of candidates that were attempted.
        attempted: usize,
    },
}

/// Errors registering a resource handler.
#[derive(Debug, thiserror::Error)]
pub enum RegisterError {
    /// A handler is already registered for this (path, method) pair.
    #[error("handler already registered for {method} {path:?}")]
    Duplicate {
        /// Canonical resource path.
        path: String,
        /// Method the duplicate was registered for.
        method: crate::resource::Method,
    },

    /// The resource table is no longer writable; registration is only
    /// possible before the server starts.
    #[error("registration is closed once the server has started")]
    RegistrationClosed,
}

/// Errors from lifecycle transitions.
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    /// `start` was called before `init`.
    #[error("server is not initialized (call init first)")]
    NotInitialized,

    /// `init` was called a second time.
    #[error("server is already initialized")]
    AlreadyInitialized,

    /// `start` was called while the server is running.
    #[error("server is already running")]
    AlreadyRunning,

    /// `start` or `init` was called after `stop`; the lifecycle is
    /// single-shot and a stopped server cannot be revived.
    #[error("server has been stopped and cannot be restarted")]
    NotRunning,
}

/// Top-level error for `CoapServer` operations.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// URI resolution failed during init.
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    /// Endpoint binding failed during init.
    #[error(transparent)]
    Bind(#[from] BindError),

    /// Resource registration was rejected.
    #[error(transparent)]
    Register(#[from] RegisterError),

    /// A lifecycle transition was rejected.
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    /// The I/O loop could not be brought up. The server is left stopped;
    /// build a fresh one to retry.
    #[error("failed to start the I/O loop: {source}")]
    Spawn {
        /// Underlying runtime or thread error.
        #[source]
        source: std::io::Error,
    },
}
