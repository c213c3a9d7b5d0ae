//! Minimesh MPI Error Types
//!
//! Protocol-level errors. Retry-exhaustion errors keep their last transport
//! cause as a `#[source]`, so the full chain of underlying failures stays
//! queryable; `trace()` renders it the way the abort path logs it.

use std::error::Error as StdError;
use std::fmt::Write as _;

use minimesh_core::error::CoreError;
use thiserror::Error;

/// Main error type for protocol and collective operations
#[derive(Error, Debug)]
pub enum MpiError {
    /// Transport error below the protocol layer
    #[error("Transport error: {0}")]
    Transport(#[from] CoreError),

    /// Peer spoke the protocol wrong
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// A message kind outside the closed ADD/GET/TRY set
    #[error("Unexpected message kind {0:#x}")]
    UnexpectedKind(u64),

    /// Payload size does not match the expected element count
    #[error("Size mismatch: got {actual} bytes, expected {expected} bytes")]
    SizeMismatch { expected: usize, actual: usize },

    /// Reliable send gave up; `attempts` counts the rounds actually made,
    /// which stops short of the configured budget on a non-recoverable
    /// failure
    #[error("Send to rank {receiver} failed after {attempts} attempts")]
    SendExhausted {
        receiver: usize,
        attempts: usize,
        #[source]
        cause: Option<CoreError>,
    },

    /// Blocking receive gave up after its configured attempt budget
    #[error("Receive from rank {sender} failed after {attempts} attempts")]
    ReceiveExhausted { sender: usize, attempts: usize },

    /// Rank argument outside the communicator
    #[error("Rank {rank} is not valid in a communicator of size {size}")]
    InvalidRank { rank: usize, size: usize },

    /// No configured address could be bound at startup
    #[error("Could not bind any configured address")]
    NoBindableAddress {
        #[source]
        cause: Option<CoreError>,
    },
}

/// Result type alias for protocol operations
pub type Result<T> = std::result::Result<T, MpiError>;

impl MpiError {
    /// Create a protocol error with a message
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Render the full cause chain, outermost first, one line per cause.
    #[must_use]
    pub fn trace(&self) -> String {
        let mut out = String::new();
        let mut current: Option<&dyn StdError> = Some(self);
        while let Some(err) = current {
            let _ = writeln!(out, " => {err}");
            current = err.source();
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn trace_renders_the_cause_chain() {
        let cause = CoreError::Io(io::Error::from(io::ErrorKind::ConnectionRefused));
        let err = MpiError::SendExhausted {
            receiver: 3,
            attempts: 5,
            cause: Some(cause),
        };
        let trace = err.trace();
        assert!(trace.contains("rank 3"));
        assert!(trace.contains("IO error"));
        assert_eq!(trace.lines().count(), 3);
    }
}
