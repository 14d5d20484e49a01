//! # cicada-types: Core types for `Cicada`
//!
//! This crate contains the small value types shared across the `Cicada`
//! fault-tolerance stack:
//! - Entity identity ([`EntityId`], [`EndpointRef`])
//! - Protocol counters ([`CheckpointIndex`], [`Incarnation`])
//!
//! All counters are `Copy` newtypes so that a checkpoint index can never be
//! confused with an incarnation number at a call site.

use std::fmt::{Debug, Display};

use serde::{Deserialize, Serialize};

// ============================================================================
// Entity Identity
// ============================================================================

/// Unique identifier of a fault-tolerant entity (an active object).
///
/// The identifier survives recovery: a recovered entity keeps its id while
/// its [`EndpointRef`] and [`Incarnation`] change.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityId(u64);

impl EntityId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Generates a random identifier from the OS CSPRNG.
    ///
    /// # Panics
    ///
    /// Panics if the OS CSPRNG fails, which indicates a catastrophic
    /// system error (e.g., no entropy source available).
    pub fn generate() -> Self {
        let mut bytes = [0u8; 8];
        getrandom::fill(&mut bytes).expect("CSPRNG failure is catastrophic");
        Self(u64::from_le_bytes(bytes))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Debug for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "EntityId({:016x})", self.0)
    }
}

impl Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl From<u64> for EntityId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<EntityId> for u64 {
    fn from(id: EntityId) -> Self {
        id.0
    }
}

/// A reachable reference to an entity: its id plus a transport address.
///
/// This is what gets logged next to an in-transit message and what the
/// location server hands out after a migration or a recovery.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EndpointRef {
    /// The entity behind this endpoint.
    pub id: EntityId,
    /// Transport-specific address (URL, socket address, mailbox name).
    pub address: String,
}

impl EndpointRef {
    pub fn new(id: EntityId, address: impl Into<String>) -> Self {
        Self {
            id,
            address: address.into(),
        }
    }

    /// Returns a copy of this endpoint pointing at a new address.
    pub fn relocated(&self, address: impl Into<String>) -> Self {
        Self::new(self.id, address)
    }
}

impl Display for EndpointRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.id, self.address)
    }
}

// ============================================================================
// Protocol Counters - All Copy
// ============================================================================

/// Index of a checkpoint taken by an entity.
///
/// Index 0 is the initial state (no checkpoint taken yet). Every completed
/// checkpoint increments the index by one; it never goes backwards except
/// through recovery, where it is reset to the index of the recovered
/// checkpoint.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct CheckpointIndex(u32);

impl CheckpointIndex {
    pub const ZERO: CheckpointIndex = CheckpointIndex(0);

    pub fn new(index: u32) -> Self {
        Self(index)
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }

    /// Returns the next index (incremented by 1).
    pub fn next(&self) -> Self {
        CheckpointIndex(self.0.saturating_add(1))
    }

    /// Returns the previous index, saturating at zero.
    pub fn prev(&self) -> Self {
        CheckpointIndex(self.0.saturating_sub(1))
    }

    /// Iterates over the indices in `(self, upper]`.
    ///
    /// # Examples
    ///
    /// ```
    /// # use cicada_types::CheckpointIndex;
    /// let steps: Vec<u32> = CheckpointIndex::new(1)
    ///     .range_to(CheckpointIndex::new(3))
    ///     .map(|i| i.as_u32())
    ///     .collect();
    /// assert_eq!(steps, vec![2, 3]);
    /// ```
    pub fn range_to(self, upper: CheckpointIndex) -> impl Iterator<Item = CheckpointIndex> {
        (self.0.saturating_add(1)..=upper.0).map(CheckpointIndex)
    }
}

impl Display for CheckpointIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for CheckpointIndex {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<CheckpointIndex> for u32 {
    fn from(index: CheckpointIndex) -> Self {
        index.0
    }
}

/// Incarnation ("life") number of an entity.
///
/// Incremented by the recovery process each time the system rolls back.
/// Messages stamped with a different incarnation than the receiver's are
/// not delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Incarnation(u32);

impl Incarnation {
    /// The incarnation of an entity that never recovered.
    pub const INITIAL: Incarnation = Incarnation(1);

    pub fn new(value: u32) -> Self {
        Self(value)
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }

    /// Returns the next incarnation (incremented by 1).
    pub fn next(&self) -> Self {
        Incarnation(self.0.saturating_add(1))
    }
}

impl Default for Incarnation {
    fn default() -> Self {
        Self::INITIAL
    }
}

impl Display for Incarnation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for Incarnation {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<Incarnation> for u32 {
    fn from(incarnation: Incarnation) -> Self {
        incarnation.0
    }
}
