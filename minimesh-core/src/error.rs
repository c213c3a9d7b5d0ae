//! Minimesh Core Error Types
//!
//! Transport-level errors shared by the socket, pool and mailbox modules.

use std::io;
use thiserror::Error;

/// Main error type for core transport operations
#[derive(Error, Debug)]
pub enum CoreError {
    /// IO error during socket operations
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Peer refused a capacity-checked delivery
    #[error("Delivery refused by peer")]
    Refused,

    /// Address could not be parsed or resolved
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// Socket closed by the peer
    #[error("Socket closed")]
    Closed,
}

/// Result type alias for core transport operations
pub type Result<T> = std::result::Result<T, CoreError>;

impl CoreError {
    /// Create an invalid address error
    pub fn invalid_address(addr: impl Into<String>) -> Self {
        Self::InvalidAddress(addr.into())
    }

    /// Check if this error is worth another delivery attempt
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::Interrupted
                    | io::ErrorKind::WouldBlock
                    | io::ErrorKind::TimedOut
                    | io::ErrorKind::ConnectionRefused
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::UnexpectedEof
            ),
            Self::Refused | Self::Closed => true,
            Self::InvalidAddress(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recoverable_classification() {
        let refused = CoreError::Io(io::Error::from(io::ErrorKind::ConnectionRefused));
        assert!(refused.is_recoverable());
        assert!(CoreError::Refused.is_recoverable());
        assert!(!CoreError::invalid_address("bogus").is_recoverable());
    }
}
