//! Reception history.
//!
//! The history records, in delivery order, the sender of every significant
//! request delivered while the latest checkpoint is not yet completed. It
//! is committed incrementally to the storage server, which replays it as
//! awaited requests if the entity recovers.
//!
//! Positions are absolute request counts since the entity started:
//!
//! ```text
//!   committed         retained in memory
//! |-----------|-----------------------------------|
//! 0      last_committed   base    entries    delivered
//! ```
//!
//! `base` is the position of the first retained entry, `delivered` is the
//! position the next appended entry will take and `last_committed` is the
//! first position not yet sent to the storage server.

use std::collections::VecDeque;
use std::ops::Range;

use cicada_types::{CheckpointIndex, EntityId, Incarnation};
use serde::{Deserialize, Serialize};

use crate::error::FtError;

/// A slice of history sent to the storage server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryUpdate {
    pub owner: EntityId,
    /// Checkpoint completed by this history.
    pub checkpoint_index: CheckpointIndex,
    pub incarnation: Incarnation,
    /// Absolute positions covered by `elements`. Empty when the commit only
    /// advances the recovery line.
    pub range: Range<u64>,
    pub elements: Vec<EntityId>,
}

impl HistoryUpdate {
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct History {
    entries: VecDeque<EntityId>,
    base: u64,
    delivered: u64,
    last_committed: u64,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a sender and returns the request count including it.
    pub fn append(&mut self, sender: EntityId) -> u64 {
        self.entries.push_back(sender);
        self.delivered += 1;
        self.delivered
    }

    pub fn base(&self) -> u64 {
        self.base
    }

    pub fn delivered(&self) -> u64 {
        self.delivered
    }

    pub fn last_committed(&self) -> u64 {
        self.last_committed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = &EntityId> {
        self.entries.iter()
    }

    /// Commits `[last_committed, up_to)` and purges it from memory.
    ///
    /// An empty range is valid: the caller still sends it so that the
    /// storage server can advance the recovery line, and `last_committed`
    /// does not move.
    pub fn commit(&mut self, up_to: u64) -> Result<(Range<u64>, Vec<EntityId>), FtError> {
        let from = self.last_committed;
        if up_to == from {
            return Ok((from..from, Vec::new()));
        }

        let retained_end = self.base + self.entries.len() as u64;
        if up_to < from || from < self.base || up_to > retained_end {
            return Err(FtError::ProtocolViolation {
                from,
                up_to,
                base: self.base,
                delivered: self.delivered,
            });
        }

        let start = (from - self.base) as usize;
        let end = (up_to - self.base) as usize;
        let elements: Vec<EntityId> = self.entries.range(start..end).copied().collect();

        // Everything below `up_to` is committed now.
        self.entries.drain(..end);
        self.base = up_to;
        self.last_committed = up_to;

        Ok((from..up_to, elements))
    }

    /// Drops the retained entries once a checkpoint has been taken: the new
    /// history starts at the current delivery count.
    pub fn reset_at_checkpoint(&mut self) {
        self.entries.clear();
        self.base = self.delivered;
        self.last_committed = self.delivered;
    }

    /// Reinitializes the history after a recovery. Requests up to
    /// `last_committed` are considered already delivered.
    pub fn restore(&mut self, last_committed: u64) {
        self.entries.clear();
        self.base = last_committed;
        self.delivered = last_committed;
        self.last_committed = last_committed;
    }
}
