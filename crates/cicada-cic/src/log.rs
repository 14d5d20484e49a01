//! In-transit message logs.
//!
//! A message sent while the destination was already at a later checkpoint
//! than the sender crosses the sender's future checkpoint lines. If the
//! sender later recovers from one of those checkpoints, the message must
//! be sent again. Logs are therefore kept per checkpoint index: the bucket
//! at index `n` holds every message that must be resent by a recovery from
//! checkpoint `n`.

use std::collections::BTreeMap;

use cicada_types::{CheckpointIndex, EndpointRef};
use serde::{Deserialize, Serialize};

use crate::message::{Reply, Request};

/// A logged request and the destination it was sent to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestLog {
    pub request: Request,
    pub destination: EndpointRef,
}

/// A logged reply and the destination it was sent to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyLog {
    pub reply: Reply,
    pub destination: EndpointRef,
}

/// Log entries bucketed by the checkpoint index at which they are due.
#[derive(Debug, Clone)]
pub struct LogBook<T> {
    buckets: BTreeMap<CheckpointIndex, Vec<T>>,
    /// Highest index for which a bucket has been created.
    latest: CheckpointIndex,
}

impl<T> Default for LogBook<T> {
    fn default() -> Self {
        Self {
            buckets: BTreeMap::new(),
            latest: CheckpointIndex::ZERO,
        }
    }
}

impl<T> LogBook<T> {
    /// An empty book whose buckets up to `latest` count as already
    /// consumed, as after a recovery from checkpoint `latest`.
    pub fn starting_at(latest: CheckpointIndex) -> Self {
        Self {
            buckets: BTreeMap::new(),
            latest,
        }
    }
}

impl<T: Clone> LogBook<T> {
    /// Ensures a bucket exists for every index up to `upper`.
    ///
    /// Buckets are created once: an index already consumed by a checkpoint
    /// is not recreated.
    pub fn extend_to(&mut self, upper: CheckpointIndex) {
        if self.latest < upper {
            for index in self.latest.range_to(upper) {
                self.buckets.entry(index).or_default();
            }
            self.latest = upper;
        }
    }

    /// Records `entry` in every bucket of `(current, upper]`.
    pub fn record(&mut self, current: CheckpointIndex, upper: CheckpointIndex, entry: T) {
        self.extend_to(upper);
        for index in current.range_to(upper) {
            self.buckets.entry(index).or_default().push(entry.clone());
        }
    }

    /// Removes and returns the bucket due at `index`.
    pub fn take(&mut self, index: CheckpointIndex) -> Vec<T> {
        self.buckets.remove(&index).unwrap_or_default()
    }

    pub fn pending(&self, index: CheckpointIndex) -> &[T] {
        self.buckets
            .get(&index)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn latest(&self) -> CheckpointIndex {
        self.latest
    }

    /// Total number of entries across all buckets.
    pub fn len(&self) -> usize {
        self.buckets.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.values().all(Vec::is_empty)
    }
}
