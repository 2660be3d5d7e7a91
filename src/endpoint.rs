//! UDP endpoints and the bind policy.
//!
//! This module owns sockets and nothing else: candidates go in, bound
//! endpoints come out. A candidate that fails to bind is a warning; the
//! set as a whole fails only when nothing bound. Sockets are created
//! nonblocking so the I/O loop can adopt them into its runtime.

use std::net::{SocketAddr, UdpSocket};

use tracing::{info, warn};

use crate::error::BindError;
use crate::resolver::{BindCandidate, Transport};

/// Index of an endpoint within its set. Replies leave through the endpoint
/// the request arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EndpointId(pub usize);

impl std::fmt::Display for EndpointId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One bound endpoint.
#[derive(Debug)]
pub struct Endpoint {
    id: EndpointId,
    transport: Transport,
    socket: UdpSocket,
    local_addr: SocketAddr,
}

impl Endpoint {
    /// Identity within the set.
    #[must_use]
    pub fn id(&self) -> EndpointId {
        self.id
    }

    /// Transport this endpoint speaks.
    #[must_use]
    pub fn transport(&self) -> Transport {
        self.transport
    }

    /// Address the socket actually bound (an ephemeral port request comes
    /// back concrete here).
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub(crate) fn into_socket(self) -> (EndpointId, UdpSocket) {
        (self.id, self.socket)
    }
}

/// The bound endpoints of one server.
#[derive(Debug, Default)]
pub struct EndpointSet {
    endpoints: Vec<Endpoint>,
}

impl EndpointSet {
    /// Bind the candidates in order.
    ///
    /// Failures are per-candidate warnings, not errors. DTLS candidates are
    /// skipped with a warning: the transport is modeled but no security
    /// backend ships with this crate. `BindError::NoEndpoints` only when
    /// the whole list produced nothing.
    pub fn bind(candidates: &[BindCandidate]) -> Result<EndpointSet, BindError> {
        let mut endpoints = Vec::new();
        for candidate in candidates {
            if candidate.transport == Transport::Dtls {
                warn!(
                    addr = %candidate.addr,
                    "Skipping DTLS candidate: no security backend available"
                );
                continue;
            }
            let socket = match UdpSocket::bind(candidate.addr) {
                Ok(socket) => socket,
                Err(error) => {
                    warn!(
                        addr = %candidate.addr,
                        %error,
                        "Failed to bind endpoint candidate"
                    );
                    continue;
                }
            };
            // The I/O loop adopts these into a tokio runtime, which
            // requires nonblocking sockets.
            let prepared = socket
                .set_nonblocking(true)
                .and_then(|()| socket.local_addr());
            let local_addr = match prepared {
                Ok(local_addr) => local_addr,
                Err(error) => {
                    warn!(
                        addr = %candidate.addr,
                        %error,
                        "Failed to prepare endpoint socket"
                    );
                    continue;
                }
            };
            let id = EndpointId(endpoints.len());
            info!(endpoint = %id, %local_addr, transport = %candidate.transport, "Endpoint bound");
            endpoints.push(Endpoint {
                id,
                transport: candidate.transport,
                socket,
                local_addr,
            });
        }

        if endpoints.is_empty() {
            return Err(BindError::NoEndpoints {
                attempted: candidates.len(),
            });
        }
        Ok(EndpointSet { endpoints })
    }

    /// Local addresses of all bound endpoints.
    #[must_use]
    pub fn local_addrs(&self) -> Vec<SocketAddr> {
        self.endpoints.iter().map(Endpoint::local_addr).collect()
    }

    /// Number of bound endpoints.
    #[must_use]
    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    /// Whether the set holds no endpoints.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    /// Close every endpoint. Dropping the sockets closes them; calling this
    /// again on an emptied set does nothing.
    pub fn close_all(&mut self) {
        if self.endpoints.is_empty() {
            return;
        }
        info!(endpoints = self.endpoints.len(), "Closing all endpoints");
        self.endpoints.clear();
    }

    pub(crate) fn into_endpoints(self) -> Vec<Endpoint> {
        self.endpoints
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn udp_candidate(addr: &str) -> BindCandidate {
        BindCandidate {
            transport: Transport::Udp,
            addr: addr.parse().unwrap(),
        }
    }

    #[test]
    fn test_binds_loopback_on_ephemeral_port() {
        let set = EndpointSet::bind(&[udp_candidate("127.0.0.1:0")]).unwrap();
        assert_eq!(set.len(), 1);
        let addrs = set.local_addrs();
        assert_ne!(addrs[0].port(), 0);
        assert!(addrs[0].ip().is_loopback());
    }

    #[test]
    fn test_partial_failure_still_yields_a_set() {
        // Occupy a port so the first candidate cannot bind.
        let occupied = UdpSocket::bind("127.0.0.1:0").unwrap();
        let busy = occupied.local_addr().unwrap();

        let candidates = [
            udp_candidate(&busy.to_string()),
            udp_candidate("127.0.0.1:0"),
        ];
        let set = EndpointSet::bind(&candidates).unwrap();
        assert_eq!(set.len(), 1);
        assert_ne!(set.local_addrs()[0], busy);
    }

    #[test]
    fn test_total_failure_is_no_endpoints() {
        let occupied = UdpSocket::bind("127.0.0.1:0").unwrap();
        let busy = occupied.local_addr().unwrap();

        let err = EndpointSet::bind(&[udp_candidate(&busy.to_string())]).unwrap_err();
        assert!(matches!(err, BindError::NoEndpoints { attempted: 1 }));
    }

    #[test]
    fn test_dtls_candidates_are_skipped() {
        let candidates = [BindCandidate {
            transport: Transport::Dtls,
            addr: "127.0.0.1:0".parse().unwrap(),
        }];
        let err = EndpointSet::bind(&candidates).unwrap_err();
        assert!(matches!(err, BindError::NoEndpoints { attempted: 1 }));
    }

    #[test]
    fn test_close_all_is_idempotent() {
        let mut set = EndpointSet::bind(&[udp_candidate("127.0.0.1:0")]).unwrap();
        set.close_all();
        assert!(set.is_empty());
        set.close_all();
        assert!(set.is_empty());
    }
}
