//! Resource table: path to per-method handler slots.
//!
//! Paths are exact keys in canonical form (leading slashes trimmed); there
//! is no pattern matching. The table is populated before the server starts
//! and is read-only once the I/O loop owns it.

use std::collections::BTreeMap;

use coap_lite::RequestType;
use tracing::info;

use crate::error::RegisterError;
use crate::handler::{BoxHandler, Handler};

/// Request methods this server dispatches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// CoAP GET (0.01).
    Get,
    /// CoAP POST (0.02).
    Post,
    /// CoAP PUT (0.03).
    Put,
    /// CoAP DELETE (0.04).
    Delete,
}

impl Method {
    /// Map a wire request type onto a dispatchable method. Codes outside
    /// the four base methods (FETCH, PATCH, ...) are not served.
    #[must_use]
    pub fn from_request_type(request_type: RequestType) -> Option<Method> {
        match request_type {
            RequestType::Get => Some(Method::Get),
            RequestType::Post => Some(Method::Post),
            RequestType::Put => Some(Method::Put),
            RequestType::Delete => Some(Method::Delete),
            _ => None,
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Method::Get => f.write_str("GET"),
            Method::Post => f.write_str("POST"),
            Method::Put => f.write_str("PUT"),
            Method::Delete => f.write_str("DELETE"),
        }
    }
}

/// Per-method handler slots for one path.
#[derive(Default)]
struct MethodSlots {
    get: Option<BoxHandler>,
    post: Option<BoxHandler>,
    put: Option<BoxHandler>,
    delete: Option<BoxHandler>,
}

impl MethodSlots {
    fn slot(&self, method: Method) -> Option<&BoxHandler> {
        match method {
            Method::Get => self.get.as_ref(),
            Method::Post => self.post.as_ref(),
            Method::Put => self.put.as_ref(),
            Method::Delete => self.delete.as_ref(),
        }
    }

    fn slot_mut(&mut self, method: Method) -> &mut Option<BoxHandler> {
        match method {
            Method::Get => &mut self.get,
            Method::Post => &mut self.post,
            Method::Put => &mut self.put,
            Method::Delete => &mut self.delete,
        }
    }
}

/// Outcome of a table lookup. Total: a request always lands in exactly one
/// of these, which the dispatcher turns into a handler run, 4.05, or 4.04.
pub enum Lookup<'a> {
    /// A handler is registered for this (path, method).
    Found(&'a dyn Handler),
    /// The path exists but no handler covers this method.
    MethodNotAllowed,
    /// No resource at this path.
    NotFound,
}

/// Registered resources, keyed by canonical path.
///
/// Uniqueness is per (path, method): registering the same pair twice is an
/// error, registering another method on an existing path accumulates.
#[derive(Default)]
pub struct ResourceTable {
    resources: BTreeMap<String, MethodSlots>,
}

impl ResourceTable {
    /// Empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for (`path`, `method`).
    pub fn register(
        &mut self,
        path: &str,
        method: Method,
        handler: BoxHandler,
    ) -> Result<(), RegisterError> {
        let canonical = canonical_path(path);
        let slots = self.resources.entry(canonical.to_owned()).or_default();
        let slot = slots.slot_mut(method);
        if slot.is_some() {
            return Err(RegisterError::Duplicate {
                path: canonical.to_owned(),
                method,
            });
        }
        *slot = Some(handler);
        info!(
            path = %canonical,
            method = %method,
            total_resources = self.resources.len(),
            "Resource handler registered"
        );
        Ok(())
    }

    /// Look up the handler for (`path`, `method`).
    #[must_use]
    pub fn lookup(&self, path: &str, method: Method) -> Lookup<'_> {
        match self.resources.get(canonical_path(path)) {
            Some(slots) => match slots.slot(method) {
                Some(handler) => Lookup::Found(handler.as_ref()),
                None => Lookup::MethodNotAllowed,
            },
            None => Lookup::NotFound,
        }
    }

    /// Number of registered paths.
    #[must_use]
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    /// Whether no resource is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// RFC 6690 link-format listing of all registered paths, served for
    /// `.well-known/core` discovery (content format 40).
    #[must_use]
    pub fn link_format(&self) -> String {
        self.resources
            .keys()
            .map(|path| format!("</{path}>"))
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Canonical path form: leading slashes trimmed. `/temperature`,
/// `temperature`, and the Uri-Path segment join all name the same key.
fn canonical_path(path: &str) -> &str {
    path.trim_start_matches('/')
}
