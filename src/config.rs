//! Environment-driven server configuration.
//!
//! Tunables for the I/O loop and block-wise transfer, loaded from `COAPD_*`
//! environment variables with sane defaults:
//!
//! - `COAPD_MAX_BLOCK_BODY`: cap on a reassembled request body in bytes,
//!   decimal or `0x` hex (default `0x10000`, 64 KiB)
//! - `COAPD_BLOCK_SIZE`: preferred outbound block size in bytes, clamped
//!   to the RFC 7959 grid at use (default `1024`)
//! - `COAPD_SWEEP_INTERVAL_MS`: wake granularity of the loop timer that
//!   expires stale transfer state, raised to at least `1` at use (default
//!   `1000`)
//! - `COAPD_TRANSFER_TTL_MS`: lifetime of a stalled inbound transfer or a
//!   cached sliced response (default `30000`)
//! - `COAPD_QUEUE_DEPTH`: bound of the inbound datagram queue, raised to
//!   at least `1` at use (default `1024`)
//! - `COAPD_RECV_BUFFER`: per-datagram receive buffer in bytes (default
//!   `2048`)
//!
//! ```rust
//! use coapd::config::ServerConfig;
//!
//! let config = ServerConfig::from_env();
//! assert!(config.preferred_block_size <= config.max_block_body);
//! ```

use std::env;
use std::time::Duration;

/// Configuration loaded from environment variables.
///
/// Load at startup with [`ServerConfig::from_env`], or start from
/// `ServerConfig::default()` and adjust with the `with_` setters.
#[derive(Debug, Clone, Copy)]
pub struct ServerConfig {
    /// Cap on a reassembled request body in bytes.
    pub max_block_body: usize,
    /// Preferred outbound block size in bytes.
    pub preferred_block_size: usize,
    /// Wake granularity of the loop's sweep timer.
    pub sweep_interval: Duration,
    /// Lifetime of stalled inbound transfers and cached sliced responses.
    pub transfer_ttl: Duration,
    /// Bound of the inbound datagram queue.
    pub queue_depth: usize,
    /// Per-datagram receive buffer size in bytes.
    pub recv_buffer: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_block_body: 0x10000,
            preferred_block_size: 1024,
            sweep_interval: Duration::from_millis(1000),
            transfer_ttl: Duration::from_millis(30_000),
            queue_depth: 1024,
            recv_buffer: 2048,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to the
    /// defaults for anything unset or unparseable.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_block_body: size_var("COAPD_MAX_BLOCK_BODY", defaults.max_block_body),
            preferred_block_size: size_var("COAPD_BLOCK_SIZE", defaults.preferred_block_size),
            sweep_interval: millis_var("COAPD_SWEEP_INTERVAL_MS", defaults.sweep_interval),
            transfer_ttl: millis_var("COAPD_TRANSFER_TTL_MS", defaults.transfer_ttl),
            queue_depth: size_var("COAPD_QUEUE_DEPTH", defaults.queue_depth),
            recv_buffer: size_var("COAPD_RECV_BUFFER", defaults.recv_buffer),
        }
    }

    /// Set the reassembled-body cap.
    #[must_use]
    pub fn with_max_block_body(mut self, bytes: usize) -> Self {
        self.max_block_body = bytes;
        self
    }

    /// Set the preferred outbound block size.
    #[must_use]
    pub fn with_preferred_block_size(mut self, bytes: usize) -> Self {
        self.preferred_block_size = bytes;
        self
    }

    /// Set the sweep timer granularity. Zero is raised to one millisecond
    /// at use.
    #[must_use]
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Set the transfer-state lifetime.
    #[must_use]
    pub fn with_transfer_ttl(mut self, ttl: Duration) -> Self {
        self.transfer_ttl = ttl;
        self
    }

    /// Set the inbound queue bound. Zero is raised to one at use.
    #[must_use]
    pub fn with_queue_depth(mut self, depth: usize) -> Self {
        self.queue_depth = depth;
        self
    }

    /// Set the per-datagram receive buffer size.
    #[must_use]
    pub fn with_recv_buffer(mut self, bytes: usize) -> Self {
        self.recv_buffer = bytes;
        self
    }
}

fn size_var(name: &str, default: usize) -> usize {
    match env::var(name) {
        Ok(val) => parse_size(&val).unwrap_or(default),
        Err(_) => default,
    }
}

fn millis_var(name: &str, default: Duration) -> Duration {
    match env::var(name) {
        Ok(val) => val
            .parse::<u64>()
            .map(Duration::from_millis)
            .unwrap_or(default),
        Err(_) => default,
    }
}

/// Decimal or `0x`-prefixed hex.
fn parse_size(val: &str) -> Option<usize> {
    if let Some(hex) = val.strip_prefix("0x") {
        usize::from_str_radix(hex, 16).ok()
    } else {
        val.parse().ok()
    }
}
