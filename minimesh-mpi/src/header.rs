//! Deduplicating message headers and the flow table
//!
//! A `Header` is the 6-tuple identity of one message instance and the sole
//! key used in the mailboxes. The first five fields name a *flow*; `serial`
//! disambiguates repeated operations on the same flow. Sender and receiver
//! never exchange serials: each side owns a `Flows` table and derives the
//! same sequence `0, 1, 2, ...` purely from issuing matching calls in the
//! same relative order.

use hashbrown::HashMap;
use parking_lot::Mutex;

use crate::error::{MpiError, Result};

/// Encoded size of a header on the wire: six `u64` fields.
pub const WIRE_LEN: usize = 48;

/// The 6-field identity of one message instance. Immutable once built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Header {
    /// Distance of the communicator from the world communicator.
    pub generation: u64,
    /// Operation class (barrier, broadcast, reduce, send/receive, split).
    pub kind: u64,
    /// Sender's rank within the communicator.
    pub sender: u64,
    /// Receiver's rank within the communicator.
    pub receiver: u64,
    /// Caller-chosen tag for point-to-point matching.
    pub tag: u64,
    /// Per-flow sequence number derived locally by both ends.
    pub serial: u64,
}

impl Header {
    /// Encode to the 48-byte wire form.
    ///
    /// The first five fields are little-endian; `serial` is big-endian. The
    /// asymmetry is inherited from the original wire format and preserved
    /// bit-for-bit for compatibility.
    #[must_use]
    pub fn encode(&self) -> [u8; WIRE_LEN] {
        let mut out = [0u8; WIRE_LEN];
        out[0..8].copy_from_slice(&self.generation.to_le_bytes());
        out[8..16].copy_from_slice(&self.kind.to_le_bytes());
        out[16..24].copy_from_slice(&self.sender.to_le_bytes());
        out[24..32].copy_from_slice(&self.receiver.to_le_bytes());
        out[32..40].copy_from_slice(&self.tag.to_le_bytes());
        out[40..48].copy_from_slice(&self.serial.to_be_bytes());
        out
    }

    /// Decode from the 48-byte wire form.
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() != WIRE_LEN {
            return Err(MpiError::protocol(format!(
                "header must be {WIRE_LEN} bytes, got {}",
                data.len()
            )));
        }
        let field = |i: usize| -> [u8; 8] { data[i * 8..(i + 1) * 8].try_into().unwrap() };
        Ok(Self {
            generation: u64::from_le_bytes(field(0)),
            kind: u64::from_le_bytes(field(1)),
            sender: u64::from_le_bytes(field(2)),
            receiver: u64::from_le_bytes(field(3)),
            tag: u64::from_le_bytes(field(4)),
            serial: u64::from_be_bytes(field(5)),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct FlowKey {
    generation: u64,
    kind: u64,
    sender: u64,
    receiver: u64,
    tag: u64,
}

/// Per-process serial counters, one per flow.
///
/// Explicitly owned (one instance per `Mesh`) rather than process-global, so
/// several ranks can coexist in one test process.
#[derive(Debug, Default)]
pub struct Flows {
    table: Mutex<HashMap<FlowKey, u64>>,
}

impl Flows {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the next header for the given flow: the stored serial is
    /// returned and then incremented, yielding `0, 1, 2, ...` per flow.
    pub fn next(&self, generation: u64, kind: u64, sender: u64, receiver: u64, tag: u64) -> Header {
        let key = FlowKey {
            generation,
            kind,
            sender,
            receiver,
            tag,
        };
        let mut table = self.table.lock();
        let counter = table.entry(key).or_insert(0);
        let serial = *counter;
        *counter += 1;
        Header {
            generation,
            kind,
            sender,
            receiver,
            tag,
            serial,
        }
    }
}
