//! URI to socket-address resolution.
//!
//! Pure address work: scheme and port mapping plus system lookup. No
//! sockets are opened here; binding policy lives in [`crate::endpoint`].

use std::net::{IpAddr, SocketAddr, ToSocketAddrs};

use url::Url;

use crate::error::ResolveError;

/// Default UDP port for `coap://` URIs (RFC 7252 section 12.6).
pub const COAP_DEFAULT_PORT: u16 = 5683;

/// Default DTLS port for `coaps://` URIs (RFC 7252 section 12.7).
pub const COAPS_DEFAULT_PORT: u16 = 5684;

/// Transport kind an endpoint speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transport {
    /// Plain UDP (`coap://`).
    Udp,
    /// DTLS-secured UDP (`coaps://`). Binding one requires a security
    /// backend, which this crate does not ship.
    Dtls,
}

impl std::fmt::Display for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Transport::Udp => f.write_str("udp"),
            Transport::Dtls => f.write_str("dtls"),
        }
    }
}

/// What the resolved addresses will be used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveScope {
    /// Listening addresses. Wildcard hosts (`0.0.0.0`, `[::]`) are
    /// meaningful and kept.
    Local,
    /// Peer addresses. Unspecified addresses are useless as send targets
    /// and are filtered out.
    Remote,
}

/// One (transport, socket address) pair produced by resolution.
///
/// Candidates are ordered as the system lookup returned them; the endpoint
/// set attempts them in this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindCandidate {
    /// Transport selected by the URI scheme.
    pub transport: Transport,
    /// Concrete address to bind or send to.
    pub addr: SocketAddr,
}

/// Resolve a CoAP URI into an ordered list of candidates.
///
/// The scheme selects the transport and default port (`coap` → UDP/5683,
/// `coaps` → DTLS/5684); an explicit port overrides the default. A host
/// name may resolve to several addresses (v4 and v6); all are returned,
/// deduplicated, in lookup order.
pub fn resolve(uri: &str, scope: ResolveScope) -> Result<Vec<BindCandidate>, ResolveError> {
    let parsed = Url::parse(uri).map_err(|source| ResolveError::InvalidUri {
        uri: uri.to_string(),
        source,
    })?;

    let transport = match parsed.scheme() {
        "coap" => Transport::Udp,
        "coaps" => Transport::Dtls,
        other => {
            return Err(ResolveError::UnsupportedScheme {
                scheme: other.to_string(),
            })
        }
    };

    let port = parsed.port().unwrap_or(match transport {
        Transport::Udp => COAP_DEFAULT_PORT,
        Transport::Dtls => COAPS_DEFAULT_PORT,
    });

    let addrs = match parsed.host() {
        // Non-special schemes keep IP literals as opaque host strings, so
        // the Domain arm sees them too; ToSocketAddrs parses literals
        // before falling back to a real lookup.
        Some(url::Host::Domain(host)) if !host.is_empty() => lookup(host, port)?,
        Some(url::Host::Ipv4(v4)) => vec![SocketAddr::new(IpAddr::V4(v4), port)],
        Some(url::Host::Ipv6(v6)) => vec![SocketAddr::new(IpAddr::V6(v6), port)],
        _ => {
            return Err(ResolveError::MissingHost {
                uri: uri.to_string(),
            })
        }
    };

    let mut candidates: Vec<BindCandidate> = Vec::with_capacity(addrs.len());
    for addr in addrs {
        if scope == ResolveScope::Remote && addr.ip().is_unspecified() {
            continue;
        }
        let candidate = BindCandidate { transport, addr };
        if !candidates.contains(&candidate) {
            candidates.push(candidate);
        }
    }

    if candidates.is_empty() {
        return Err(ResolveError::NoAddresses {
            host: parsed.host_str().unwrap_or_default().to_string(),
            port,
        });
    }
    Ok(candidates)
}

fn lookup(host: &str, port: u16) -> Result<Vec<SocketAddr>, ResolveError> {
    let addrs = (host, port)
        .to_socket_addrs()
        .map_err(|source| ResolveError::Lookup {
            host: host.to_string(),
            port,
            source,
        })?;
    Ok(addrs.collect())
}
