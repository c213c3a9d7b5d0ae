//! Communicators and collectives
//!
//! A `Communicator` is a named, ordered subset of the world's processes.
//! Collectives are built purely from the messenger's `send`/`push`/`get`
//! operations; there is no extra control channel. Determinism rules:
//!
//! - Reductions fold contributions at the root in ascending rank order,
//!   regardless of arrival order, so results are bitwise reproducible.
//! - `split` orders the members of each new communicator by `(hint, rank)`,
//!   so all members agree on the new rank assignment without further
//!   communication.
//!
//! Headers carry communicator-relative ranks and the communicator's
//! generation; the messenger is always addressed by world rank.

use std::sync::Arc;

use bytes::Bytes;
use tracing::debug;

use crate::element::{self, Element, Op};
use crate::error::{MpiError, Result};
use crate::header::{Flows, Header};
use crate::messenger::Messenger;

/// Operation classes carried in the header `kind` field.
const KIND_BARRIER: u64 = 0xaa;
const KIND_BROADCAST: u64 = 0xbb;
const KIND_REDUCE: u64 = 0xcc;
const KIND_SEND_RECEIVE: u64 = 0xdd;
const KIND_SPLIT: u64 = 0xee;

/// Color sentinel that matches no other member during `split`: a rank
/// passing it ends up alone in a singleton communicator.
pub const UNDEFINED_COLOR: i64 = -1;

/// Result of a point-to-point receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Status {
    /// Number of elements actually received.
    pub count: usize,
}

/// Shared engine state behind all communicators of one process.
pub(crate) struct Fabric {
    pub(crate) messenger: Messenger,
    pub(crate) flows: Flows,
}

/// One process's membership triple exchanged during `split`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Member {
    color: i64,
    hint: i64,
    rank: u64,
}

impl Member {
    const WIRE_LEN: usize = 24;

    fn encode(&self) -> Bytes {
        let mut out = Vec::with_capacity(Self::WIRE_LEN);
        out.extend_from_slice(&self.color.to_le_bytes());
        out.extend_from_slice(&self.hint.to_le_bytes());
        out.extend_from_slice(&self.rank.to_le_bytes());
        Bytes::from(out)
    }

    fn decode(data: &[u8]) -> Result<Self> {
        if data.len() != Self::WIRE_LEN {
            return Err(MpiError::SizeMismatch {
                expected: Self::WIRE_LEN,
                actual: data.len(),
            });
        }
        let word = |i: usize| -> [u8; 8] { data[i * 8..(i + 1) * 8].try_into().unwrap() };
        Ok(Self {
            color: i64::from_le_bytes(word(0)),
            hint: i64::from_le_bytes(word(1)),
            rank: u64::from_le_bytes(word(2)),
        })
    }
}

/// Order all triples by `(hint, rank)` and keep the calling rank plus every
/// member sharing `color`, with [`UNDEFINED_COLOR`] matching nobody.
///
/// The rank tie-break makes the ordering total, so every member derives the
/// identical rank assignment for the new group. The calling rank is always
/// kept, so even an undefined color yields a (singleton) group.
fn group_members(mut members: Vec<Member>, own_rank: u64, color: i64) -> Vec<Member> {
    members.sort_by_key(|m| (m.hint, m.rank));
    members.retain(|m| {
        m.rank == own_rank || (m.color == color && m.color != UNDEFINED_COLOR)
    });
    members
}

/// An ordered group of processes and the collective operations over it.
#[derive(Clone)]
pub struct Communicator {
    fabric: Arc<Fabric>,
    /// World rank of each member, indexed by communicator rank.
    tasks: Arc<Vec<usize>>,
    /// This process's rank within the communicator.
    rank: usize,
    /// Split/dup distance from the world communicator; part of every header,
    /// so flows of nested communicators never collide.
    generation: u64,
}

impl Communicator {
    pub(crate) fn world(fabric: Arc<Fabric>, rank: usize, size: usize) -> Self {
        Self {
            fabric,
            tasks: Arc::new((0..size).collect()),
            rank,
            generation: 0,
        }
    }

    /// This process's rank within the communicator.
    #[must_use]
    pub fn rank(&self) -> usize {
        self.rank
    }

    /// Number of member processes.
    #[must_use]
    pub fn size(&self) -> usize {
        self.tasks.len()
    }

    fn check_rank(&self, rank: usize) -> Result<()> {
        if rank < self.size() {
            Ok(())
        } else {
            Err(MpiError::InvalidRank {
                rank,
                size: self.size(),
            })
        }
    }

    fn header(&self, kind: u64, sender: usize, receiver: usize, tag: u64) -> Header {
        self.fabric
            .flows
            .next(self.generation, kind, sender as u64, receiver as u64, tag)
    }

    /// World rank of communicator member `rank`.
    fn world_rank(&self, rank: usize) -> usize {
        self.tasks[rank]
    }

    /// A new communicator with the same members and an independent flow
    /// space. All members must call this collectively.
    #[must_use]
    pub fn dup(&self) -> Self {
        Self {
            fabric: Arc::clone(&self.fabric),
            tasks: Arc::clone(&self.tasks),
            rank: self.rank,
            generation: self.generation + 1,
        }
    }

    /// Partition the communicator by `color`. Members sharing a color form
    /// a new communicator, ranked by `(hint, rank)`. A member passing
    /// [`UNDEFINED_COLOR`] matches nobody and receives a singleton
    /// communicator holding only itself.
    ///
    /// Collective: every member must call it.
    pub fn split(&self, color: i64, hint: i64) -> Result<Self> {
        let mine = Member {
            color,
            hint,
            rank: self.rank as u64,
        };
        debug!(color, hint, rank = self.rank, "splitting communicator");

        // All-to-all triple exchange. Pushes are asynchronous and the
        // server side accepts them without any receiver involvement, so
        // pushing everything before receiving anything cannot deadlock.
        for peer in 0..self.size() {
            if peer == self.rank {
                continue;
            }
            let header = self.header(KIND_SPLIT, self.rank, peer, 0);
            self.fabric
                .messenger
                .push(self.world_rank(peer), header, mine.encode());
        }

        let mut members = Vec::with_capacity(self.size());
        for peer in 0..self.size() {
            if peer == self.rank {
                members.push(mine);
                continue;
            }
            let header = self.header(KIND_SPLIT, peer, self.rank, 0);
            let body = self.fabric.messenger.get(self.world_rank(peer), header)?;
            members.push(Member::decode(&body)?);
        }

        let group = group_members(members, self.rank as u64, color);
        let tasks: Vec<usize> = group
            .iter()
            .map(|m| self.world_rank(m.rank as usize))
            .collect();
        let rank = group
            .iter()
            .position(|m| m.rank == self.rank as u64)
            .ok_or_else(|| MpiError::protocol("own rank missing from split group"))?;

        Ok(Self {
            fabric: Arc::clone(&self.fabric),
            tasks: Arc::new(tasks),
            rank,
            generation: self.generation + 1,
        })
    }

    /// Block until every member has entered the barrier.
    ///
    /// Rank 0 coordinates: it collects one empty ping from each member in
    /// ascending rank order, then releases each member with a reliably
    /// delivered pong. A released member may tear everything down right
    /// away, so the pong is the one delivery that must be confirmed.
    pub fn barrier(&self) -> Result<()> {
        if self.rank == 0 {
            for peer in 1..self.size() {
                let header = self.header(KIND_BARRIER, peer, 0, 0);
                self.fabric.messenger.get(self.world_rank(peer), header)?;
            }
            for peer in 1..self.size() {
                let header = self.header(KIND_BARRIER, 0, peer, 0);
                self.fabric
                    .messenger
                    .send(self.world_rank(peer), header, Bytes::new())?;
            }
        } else {
            let header = self.header(KIND_BARRIER, self.rank, 0, 0);
            self.fabric
                .messenger
                .push(self.world_rank(0), header, Bytes::new());
            let header = self.header(KIND_BARRIER, 0, self.rank, 0);
            self.fabric.messenger.get(self.world_rank(0), header)?;
        }
        Ok(())
    }

    /// Replicate `buf` from `root` to every member.
    pub fn bcast<T: Element>(&self, buf: &mut [T], root: usize) -> Result<()> {
        self.check_rank(root)?;
        if self.rank == root {
            let body = element::encode_slice(buf);
            for peer in 0..self.size() {
                if peer == root {
                    continue;
                }
                let header = self.header(KIND_BROADCAST, root, peer, 0);
                self.fabric
                    .messenger
                    .push(self.world_rank(peer), header, body.clone());
            }
        } else {
            let header = self.header(KIND_BROADCAST, root, self.rank, 0);
            let body = self.fabric.messenger.get(self.world_rank(root), header)?;
            element::decode_exact(&body, buf)?;
        }
        Ok(())
    }

    /// Reduce every member's contribution into `output` at `root`.
    ///
    /// `input: None` reduces in place, taking `output` as this member's
    /// contribution. On non-root members `output` is left untouched. The
    /// root seeds the fold with its own contribution and folds the rest in
    /// ascending rank order, so the result is deterministic.
    pub fn reduce<T: Element>(
        &self,
        input: Option<&[T]>,
        output: &mut [T],
        op: Op,
        root: usize,
    ) -> Result<()> {
        self.check_rank(root)?;
        if let Some(input) = input {
            if input.len() != output.len() {
                return Err(MpiError::SizeMismatch {
                    expected: output.len() * T::SIZE,
                    actual: input.len() * T::SIZE,
                });
            }
        }

        if self.rank == root {
            if let Some(input) = input {
                output.copy_from_slice(input);
            }
            let mut scratch = vec![T::default(); output.len()];
            for peer in 0..self.size() {
                if peer == root {
                    continue;
                }
                let header = self.header(KIND_REDUCE, peer, root, 0);
                let body = self.fabric.messenger.get(self.world_rank(peer), header)?;
                element::decode_exact(&body, &mut scratch)?;
                op.combine(output, &scratch);
            }
        } else {
            let contribution: &[T] = input.unwrap_or(output);
            let body = element::encode_slice(contribution);
            let header = self.header(KIND_REDUCE, self.rank, root, 0);
            self.fabric.messenger.push(self.world_rank(root), header, body);
        }
        Ok(())
    }

    /// Reduce into every member: a reduction at rank 0 followed by a
    /// broadcast of the result.
    pub fn allreduce<T: Element>(
        &self,
        input: Option<&[T]>,
        output: &mut [T],
        op: Op,
    ) -> Result<()> {
        self.reduce(input, output, op, 0)?;
        self.bcast(output, 0)
    }

    /// Point-to-point send to member `receiver`.
    ///
    /// Asynchronous and rate-limited: the call returns once the message is
    /// queued, blocking only under outbox backpressure. Delivery completes
    /// when the receiver's matching [`recv`](Self::recv) runs.
    pub fn send<T: Element>(&self, buf: &[T], receiver: usize, tag: u64) -> Result<()> {
        self.check_rank(receiver)?;
        let header = self.header(KIND_SEND_RECEIVE, self.rank, receiver, tag);
        self.fabric.messenger.push(
            self.world_rank(receiver),
            header,
            element::encode_slice(buf),
        );
        Ok(())
    }

    /// Blocking point-to-point receive from member `sender`.
    ///
    /// The payload may fill any prefix of `buf`; the returned status carries
    /// the element count. A payload larger than `buf` is an error.
    pub fn recv<T: Element>(&self, buf: &mut [T], sender: usize, tag: u64) -> Result<Status> {
        self.check_rank(sender)?;
        let header = self.header(KIND_SEND_RECEIVE, sender, self.rank, tag);
        let body = self.fabric.messenger.get(self.world_rank(sender), header)?;
        let count = element::decode_slice(&body, buf)?;
        Ok(Status { count })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn member_codec_round_trips() {
        let member = Member {
            color: -5,
            hint: 42,
            rank: 3,
        };
        let bytes = member.encode();
        assert_eq!(bytes.len(), Member::WIRE_LEN);
        assert_eq!(Member::decode(&bytes).unwrap(), member);
    }

    #[test]
    fn member_decode_rejects_wrong_length() {
        assert!(Member::decode(&[0u8; 23]).is_err());
        assert!(Member::decode(&[0u8; 25]).is_err());
    }

    #[test]
    fn grouping_filters_by_color_and_orders_by_hint_then_rank() {
        let members = vec![
            Member { color: 1, hint: 9, rank: 0 },
            Member { color: 2, hint: 0, rank: 1 },
            Member { color: 1, hint: 0, rank: 2 },
            Member { color: 1, hint: 0, rank: 3 },
            Member { color: UNDEFINED_COLOR, hint: 0, rank: 4 },
        ];
        let group = group_members(members, 0, 1);
        let ranks: Vec<u64> = group.iter().map(|m| m.rank).collect();
        assert_eq!(ranks, vec![2, 3, 0]);
    }

    #[test]
    fn grouping_always_keeps_the_calling_rank() {
        let members = vec![
            Member { color: UNDEFINED_COLOR, hint: 0, rank: 0 },
            Member { color: UNDEFINED_COLOR, hint: 0, rank: 1 },
            Member { color: 3, hint: 0, rank: 2 },
        ];
        // An undefined color matches nobody, not even other undefined
        // members, leaving the caller alone in its group.
        let group = group_members(members, 0, UNDEFINED_COLOR);
        let ranks: Vec<u64> = group.iter().map(|m| m.rank).collect();
        assert_eq!(ranks, vec![0]);
    }
}
