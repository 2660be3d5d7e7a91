//! Block-wise transfer mechanics (RFC 7959).
//!
//! This module owns the pure protocol pieces: the Block1/Block2 option
//! codec, inbound reassembly state, and outbound body slicing. Wiring them
//! into request handling is the I/O loop's job.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use crate::resource::Method;

/// Decoded Block1/Block2 option value (RFC 7959 section 2.2).
///
/// The wire form is a 0-3 byte big-endian unsigned integer: the low three
/// bits are the size exponent, bit 3 is the more flag, the remaining bits
/// are the block number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockValue {
    /// Block number within the transfer.
    pub num: u32,
    /// More-blocks flag.
    pub more: bool,
    /// Size exponent; the block size is `1 << (szx + 4)` bytes.
    pub szx: u8,
}

impl BlockValue {
    /// Block size in bytes for this value's exponent.
    #[must_use]
    pub fn size(&self) -> usize {
        1 << (self.szx + 4)
    }

    /// Decode an option value. Returns `None` for values longer than three
    /// bytes or carrying the reserved exponent 7.
    #[must_use]
    pub fn from_bytes(raw: &[u8]) -> Option<BlockValue> {
        if raw.len() > 3 {
            return None;
        }
        let mut value: u32 = 0;
        for byte in raw {
            value = (value << 8) | u32::from(*byte);
        }
        let szx = (value & 0x7) as u8;
        if szx == 7 {
            return None;
        }
        Some(BlockValue {
            num: value >> 4,
            more: value & 0x8 != 0,
            szx,
        })
    }

    /// Encode to the shortest option value. An all-zero block (`num` 0, no
    /// more flag, exponent 0) encodes as the empty value.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let value = (self.num << 4) | (u32::from(self.more) << 3) | u32::from(self.szx & 0x7);
        if value == 0 {
            return Vec::new();
        }
        let mut out = value.to_be_bytes().to_vec();
        while out.len() > 1 && out[0] == 0 {
            out.remove(0);
        }
        out
    }

    /// Largest exponent whose block size does not exceed `limit`, clamped
    /// to the RFC 7959 range of 16..=1024 bytes.
    #[must_use]
    pub fn szx_for_size(limit: usize) -> u8 {
        let mut szx = 0u8;
        while szx < 6 && (1usize << (szx + 5)) <= limit {
            szx += 1;
        }
        szx
    }
}

/// Slice an outbound body for one Block2 request.
///
/// Returns the slice and the more flag, or `None` when the requested block
/// number is past the end of the body. An empty body is served as a single
/// empty final block.
#[must_use]
pub fn slice_body(body: &[u8], block: BlockValue) -> Option<(&[u8], bool)> {
    let size = block.size();
    let start = (block.num as usize) * size;
    if start >= body.len() {
        if start == 0 {
            return Some((&[], false));
        }
        return None;
    }
    let end = (start + size).min(body.len());
    Some((&body[start..end], end < body.len()))
}

/// Identity of one in-progress inbound transfer.
///
/// One upload at a time per (peer, method, path); a new block 0 for the
/// same key replaces whatever was in flight.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransferKey {
    /// Sending peer.
    pub peer: SocketAddr,
    /// Request method of the transfer.
    pub method: Method,
    /// Canonical resource path.
    pub path: String,
}

/// Outcome of feeding one Block1 payload to the assembler.
#[derive(Debug, PartialEq, Eq)]
pub enum AssembleOutcome {
    /// Intermediate block accepted; answer 2.31 Continue echoing `0`'s
    /// block option.
    Continue(BlockValue),
    /// Final block received; the reassembled body is ready for dispatch.
    Complete(Vec<u8>),
    /// Block arrived out of order or with the wrong size; the transfer is
    /// discarded. Answer 4.08 Request Entity Incomplete.
    Mismatch,
    /// The reassembled body would exceed the configured cap; the transfer
    /// is discarded. Answer 4.13 Request Entity Too Large.
    TooLarge,
}

struct Reassembly {
    body: Vec<u8>,
    next_num: u32,
    szx: u8,
    touched: Instant,
}

/// Inbound Block1 reassembly state for all peers.
///
/// Transfers that stall are dropped by [`BlockAssembler::sweep`], which the
/// I/O loop drives from its periodic timer.
pub struct BlockAssembler {
    transfers: HashMap<TransferKey, Reassembly>,
    max_body: usize,
    ttl: Duration,
}

impl BlockAssembler {
    /// New assembler enforcing `max_body` as the reassembled size cap and
    /// `ttl` as the stall timeout per transfer.
    #[must_use]
    pub fn new(max_body: usize, ttl: Duration) -> Self {
        Self {
            transfers: HashMap::new(),
            max_body,
            ttl,
        }
    }

    /// Feed one Block1 payload into the transfer identified by `key`.
    ///
    /// Block 0 starts (or restarts) the transfer. Every other block must
    /// carry the expected next number and the negotiated exponent, and all
    /// non-final blocks must be exactly one block long.
    pub fn accept(
        &mut self,
        key: TransferKey,
        block: BlockValue,
        payload: &[u8],
    ) -> AssembleOutcome {
        if block.more && payload.len() != block.size() {
            self.transfers.remove(&key);
            return AssembleOutcome::Mismatch;
        }

        let mut entry = if block.num == 0 {
            self.transfers.remove(&key);
            Reassembly {
                body: Vec::new(),
                next_num: 0,
                szx: block.szx,
                touched: Instant::now(),
            }
        } else {
            match self.transfers.remove(&key) {
                Some(entry) if entry.next_num == block.num && entry.szx == block.szx => entry,
                _ => return AssembleOutcome::Mismatch,
            }
        };

        if entry.body.len() + payload.len() > self.max_body {
            return AssembleOutcome::TooLarge;
        }
        entry.body.extend_from_slice(payload);

        if block.more {
            entry.next_num = block.num + 1;
            entry.touched = Instant::now();
            self.transfers.insert(key, entry);
            AssembleOutcome::Continue(block)
        } else {
            AssembleOutcome::Complete(entry.body)
        }
    }

    /// Drop transfers that have not seen a block within the ttl. Returns
    /// how many were dropped.
    pub fn sweep(&mut self) -> usize {
        let before = self.transfers.len();
        let ttl = self.ttl;
        self.transfers.retain(|_, entry| entry.touched.elapsed() <= ttl);
        before - self.transfers.len()
    }

    /// Number of transfers currently in flight.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.transfers.len()
    }
}
