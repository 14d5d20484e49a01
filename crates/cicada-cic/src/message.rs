//! Protocol messages and the metadata attached to them.
//!
//! Every request or reply sent by a fault-tolerant entity carries a
//! [`MessageInfo`] stamped by the sender's manager. The receiver's manager
//! reads it to filter stale incarnations, close histories and detect
//! orphan requests.
//!
//! Control traffic between the servers and the managers is expressed as
//! the [`FtMessage`] enum and answered with an [`FtResponse`].

use std::collections::BTreeMap;

use bytes::Bytes;
use cicada_types::{CheckpointIndex, EndpointRef, EntityId, Incarnation};
use serde::{Deserialize, Serialize};

use crate::history::HistoryUpdate;

// ============================================================================
// Message Metadata
// ============================================================================

/// Per-entity positions of the last served request, used by the
/// output-commit mode.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VectorClock(BTreeMap<EntityId, u64>);

impl VectorClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: EntityId) -> u64 {
        self.0.get(&id).copied().unwrap_or(0)
    }

    /// Raises the component of `id` to `value` if it is behind.
    pub fn advance(&mut self, id: EntityId, value: u64) {
        let entry = self.0.entry(id).or_insert(0);
        if *entry < value {
            *entry = value;
        }
    }

    /// Component-wise maximum with `other`.
    pub fn merge(&mut self, other: &VectorClock) {
        for (id, value) in &other.0 {
            self.advance(*id, *value);
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Protocol metadata stamped on every message by the sender's manager.
///
/// A fresh value is built for each send from the sender's counters at that
/// moment. The receiver only ever adds the orphan marker and, in
/// output-commit mode, the position of the request in its history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageInfo {
    pub checkpoint_index: CheckpointIndex,
    pub history_index: CheckpointIndex,
    pub incarnation: Incarnation,
    pub last_recovery: CheckpointIndex,
    /// Checkpoint up to which the request is an orphan. `None` means the
    /// request is not an orphan.
    pub orphan_for: Option<CheckpointIndex>,
    pub from_half_body: bool,
    pub vector_clock: Option<VectorClock>,
    pub position_in_history: u64,
}

impl MessageInfo {
    /// Metadata for a message sent by a half body. Receivers skip all
    /// protocol processing for it.
    pub fn half_body() -> Self {
        Self {
            checkpoint_index: CheckpointIndex::ZERO,
            history_index: CheckpointIndex::ZERO,
            incarnation: Incarnation::INITIAL,
            last_recovery: CheckpointIndex::ZERO,
            orphan_for: None,
            from_half_body: true,
            vector_clock: None,
            position_in_history: 0,
        }
    }

    pub fn is_orphan(&self) -> bool {
        self.orphan_for.is_some()
    }
}

// ============================================================================
// Requests and Replies
// ============================================================================

/// Common view over requests and replies used by the receive-side filter.
pub trait Envelope {
    fn sender_id(&self) -> EntityId;
    fn info(&self) -> Option<&MessageInfo>;
    fn info_mut(&mut self) -> Option<&mut MessageInfo>;
    fn set_info(&mut self, info: MessageInfo);
    fn set_ignore(&mut self, ignore: bool);
    fn is_ignored(&self) -> bool;

    /// Returns the metadata of a message the protocol must account for:
    /// one that carries metadata and does not come from a half body.
    fn significant_info(&self) -> Option<&MessageInfo> {
        self.info().filter(|info| !info.from_half_body)
    }

    fn is_significant(&self) -> bool {
        self.significant_info().is_some()
    }
}

/// A method call sent to an entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    /// Where the reply must go.
    pub sender: EndpointRef,
    pub method: String,
    /// Encoded call arguments.
    pub args: Bytes,
    pub sequence: u64,
    pub one_way: bool,
    pub info: Option<MessageInfo>,
    /// Set by the receiver when the request must not be served.
    pub ignore: bool,
    send_counter: u32,
}

impl Request {
    pub fn new(sender: EndpointRef, method: impl Into<String>, args: Bytes, sequence: u64) -> Self {
        Self {
            sender,
            method: method.into(),
            args,
            sequence,
            one_way: false,
            info: None,
            ignore: false,
            send_counter: 0,
        }
    }

    pub fn one_way(mut self) -> Self {
        self.one_way = true;
        self
    }

    /// Copy whose arguments no longer share memory with `self`.
    pub fn deep_copy(&self) -> Self {
        Self {
            args: Bytes::copy_from_slice(&self.args),
            ..self.clone()
        }
    }

    /// Rebuilds a logged request with `sender` as the caller. Used when
    /// replaying logs after a recovery, where the original caller
    /// reference is stale.
    pub fn reissued_by(&self, sender: EndpointRef) -> Self {
        let mut request = Request::new(
            sender,
            self.method.clone(),
            Bytes::copy_from_slice(&self.args),
            self.sequence,
        );
        request.one_way = self.one_way;
        request
    }

    pub fn send_counter(&self) -> u32 {
        self.send_counter
    }

    /// Counts one transmission of this request.
    pub fn mark_sent(&mut self) {
        self.send_counter = self.send_counter.saturating_add(1);
    }

    pub fn reset_send_counter(&mut self) {
        self.send_counter = 0;
    }
}

impl Envelope for Request {
    fn sender_id(&self) -> EntityId {
        self.sender.id
    }

    fn info(&self) -> Option<&MessageInfo> {
        self.info.as_ref()
    }

    fn info_mut(&mut self) -> Option<&mut MessageInfo> {
        self.info.as_mut()
    }

    fn set_info(&mut self, info: MessageInfo) {
        self.info = Some(info);
    }

    fn set_ignore(&mut self, ignore: bool) {
        self.ignore = ignore;
    }

    fn is_ignored(&self) -> bool {
        self.ignore
    }
}

/// The result of a request, sent back to its caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reply {
    pub sender: EntityId,
    pub sequence: u64,
    pub method: String,
    /// Encoded result value.
    pub result: Bytes,
    pub info: Option<MessageInfo>,
    pub ignore: bool,
}

impl Reply {
    pub fn new(sender: EntityId, sequence: u64, method: impl Into<String>, result: Bytes) -> Self {
        Self {
            sender,
            sequence,
            method: method.into(),
            result,
            info: None,
            ignore: false,
        }
    }

    /// Copy whose result no longer shares memory with `self`.
    pub fn deep_copy(&self) -> Self {
        Self {
            result: Bytes::copy_from_slice(&self.result),
            ..self.clone()
        }
    }
}

impl Envelope for Reply {
    fn sender_id(&self) -> EntityId {
        self.sender
    }

    fn info(&self) -> Option<&MessageInfo> {
        self.info.as_ref()
    }

    fn info_mut(&mut self) -> Option<&mut MessageInfo> {
        self.info.as_mut()
    }

    fn set_info(&mut self, info: MessageInfo) {
        self.info = Some(info);
    }

    fn set_ignore(&mut self, ignore: bool) {
        self.ignore = ignore;
    }

    fn is_ignored(&self) -> bool {
        self.ignore
    }
}

// ============================================================================
// Rendezvous
// ============================================================================

/// Value returned to the sender of a message by the receiving side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Rendezvous {
    /// The receiver is about to recover; send the message again later.
    Resend,
    /// The sender belongs to an older incarnation and must recover.
    Recover,
    /// The receiver is not fault tolerant.
    NonFaultTolerant,
    /// The request was served immediately, outside the protocol.
    ImmediateService,
    /// Checkpoint index of the receiver when the message was delivered.
    Index(CheckpointIndex),
}

impl Rendezvous {
    pub fn checkpoint_index(&self) -> Option<CheckpointIndex> {
        match self {
            Rendezvous::Index(index) => Some(*index),
            _ => None,
        }
    }
}

/// Outcome of the incarnation filter on a received message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Same incarnation, or not a protocol message: deliver it.
    Accepted,
    /// The sender is in a later incarnation; this entity is stale.
    Resend,
    /// The sender is in an earlier incarnation and must recover.
    Recover,
}

impl Admission {
    /// The value to hand back to the sender, if the message is refused.
    pub fn refusal(&self) -> Option<Rendezvous> {
        match self {
            Admission::Accepted => None,
            Admission::Resend => Some(Rendezvous::Resend),
            Admission::Recover => Some(Rendezvous::Recover),
        }
    }
}

// ============================================================================
// Control Messages
// ============================================================================

/// Control messages sent by the servers to a manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FtMessage {
    /// A new global state is complete on the storage server: close and
    /// return the whole local history.
    GlobalStateCompletion { last_global_state: CheckpointIndex },
    /// Commit the history up to position `up_to` (exclusive) because of an
    /// output commit.
    OutputCommit { up_to: u64 },
    /// Liveness probe from the fault detector.
    Heartbeat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Liveness {
    Alive,
    Dead,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FtResponse {
    /// Committed history, or `None` when it had already been closed.
    History(Option<HistoryUpdate>),
    Liveness(Liveness),
}
