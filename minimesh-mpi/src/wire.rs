//! Wire message kinds
//!
//! Three kinds travel on the wire, each as `(kind, header, optional body)`.
//! The set is closed and small, so dispatch is a single `match` over this
//! enum rather than any dynamic mechanism.

use crate::error::MpiError;

/// The three request kinds of the delivery protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u64)]
pub enum MessageKind {
    /// Unsolicited push: header + body, acknowledged with a boolean.
    Add = 0,
    /// Pull: header only; the peer replies presence + body from its outbox.
    Get = 1,
    /// Optimistic capacity-checked push; rejection leaves redelivery to the
    /// sender.
    Try = 2,
}

impl From<MessageKind> for u64 {
    fn from(kind: MessageKind) -> Self {
        kind as Self
    }
}

impl TryFrom<u64> for MessageKind {
    type Error = MpiError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Add),
            1 => Ok(Self::Get),
            2 => Ok(Self::Try),
            other => Err(MpiError::UnexpectedKind(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_round_trip() {
        for kind in [MessageKind::Add, MessageKind::Get, MessageKind::Try] {
            assert_eq!(MessageKind::try_from(u64::from(kind)).unwrap(), kind);
        }
    }

    #[test]
    fn unknown_kind_is_rejected() {
        assert!(matches!(
            MessageKind::try_from(0xff),
            Err(MpiError::UnexpectedKind(0xff))
        ));
    }
}
