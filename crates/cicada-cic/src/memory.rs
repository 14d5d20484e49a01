//! In-process collaborators.
//!
//! These implement the server, transport and owner traits with plain
//! in-memory structures. They can be told to fail, which makes them the
//! building blocks of the protocol tests and of single-process simulations.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use bytes::Bytes;
use cicada_types::{CheckpointIndex, EndpointRef, EntityId, Incarnation};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::checkpoint::Checkpoint;
use crate::error::{FtError, TransportError};
use crate::history::HistoryUpdate;
use crate::manager::FtManagerCic;
use crate::message::{MessageInfo, Rendezvous, Reply, Request};
use crate::queue::{QueuedImage, RequestQueue};
use crate::servers::{
    LocationServer, Owner, RecoveryServer, RecoveryStatus, ServerResolver, Servers, StorageServer,
    Transport,
};

// ============================================================================
// Storage
// ============================================================================

/// Committed history of one entity, by absolute position.
#[derive(Debug, Default)]
struct ReceptionHistory {
    elements: BTreeMap<u64, EntityId>,
    last_committed: u64,
}

impl ReceptionHistory {
    fn apply(&mut self, update: &HistoryUpdate) {
        for (position, sender) in update.range.clone().zip(&update.elements) {
            self.elements.insert(position, *sender);
        }
        self.last_committed = self.last_committed.max(update.range.end);
    }

    fn recoverable_from(&self, start: u64) -> Vec<EntityId> {
        self.elements
            .range(start..self.last_committed)
            .map(|(_, sender)| *sender)
            .collect()
    }
}

#[derive(Debug, Default)]
struct StorageInner {
    /// Encoded checkpoints, in storage order.
    checkpoints: HashMap<EntityId, Vec<Vec<u8>>>,
    histories: HashMap<EntityId, ReceptionHistory>,
    updates: Vec<HistoryUpdate>,
    output_commits: Vec<MessageInfo>,
}

/// Checkpoint server keeping everything in memory.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    inner: Mutex<StorageInner>,
    fail_checkpoints: AtomicBool,
    fail_histories: AtomicBool,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_checkpoints(&self, fail: bool) {
        self.fail_checkpoints.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_histories(&self, fail: bool) {
        self.fail_histories.store(fail, Ordering::SeqCst);
    }

    /// Indices of the checkpoints stored for `id`, in storage order.
    pub fn checkpoint_indices(&self, id: EntityId) -> Result<Vec<CheckpointIndex>, TransportError> {
        let inner = self.inner.lock();
        inner
            .checkpoints
            .get(&id)
            .map_or(&[][..], Vec::as_slice)
            .iter()
            .map(|bytes| Checkpoint::from_bytes(bytes).map(|c| c.index()))
            .collect()
    }

    /// Latest checkpoint of `id`, completed with its recoverable history.
    pub fn recovery_checkpoint(&self, id: EntityId) -> Result<Option<Checkpoint>, TransportError> {
        let inner = self.inner.lock();
        let Some(bytes) = inner.checkpoints.get(&id).and_then(|list| list.last()) else {
            return Ok(None);
        };
        let mut checkpoint = Checkpoint::from_bytes(bytes)?;
        let start = checkpoint.info.last_received_request;
        match inner.histories.get(&id) {
            Some(history) if history.last_committed > start => {
                checkpoint.info.history = history.recoverable_from(start);
                checkpoint.info.last_committed = history.last_committed;
            }
            _ => checkpoint.info.last_committed = start,
        }
        Ok(Some(checkpoint))
    }

    pub fn history_updates(&self) -> Vec<HistoryUpdate> {
        self.inner.lock().updates.clone()
    }

    pub fn output_commits(&self) -> Vec<MessageInfo> {
        self.inner.lock().output_commits.clone()
    }
}

impl StorageServer for MemoryStorage {
    fn store_checkpoint(
        &self,
        checkpoint: &Checkpoint,
        incarnation: Incarnation,
    ) -> Result<(), TransportError> {
        if self.fail_checkpoints.load(Ordering::SeqCst) {
            return Err(TransportError::Unreachable("storage server down".to_string()));
        }
        let bytes = checkpoint.to_bytes()?;
        tracing::debug!(
            entity = %checkpoint.owner,
            index = %checkpoint.index(),
            %incarnation,
            size = bytes.len(),
            "checkpoint stored"
        );
        self.inner
            .lock()
            .checkpoints
            .entry(checkpoint.owner)
            .or_default()
            .push(bytes);
        Ok(())
    }

    fn commit_history(&self, update: &HistoryUpdate) -> Result<(), TransportError> {
        if self.fail_histories.load(Ordering::SeqCst) {
            return Err(TransportError::Unreachable("storage server down".to_string()));
        }
        let mut inner = self.inner.lock();
        if !update.is_empty() {
            inner.histories.entry(update.owner).or_default().apply(update);
        }
        inner.updates.push(update.clone());
        Ok(())
    }

    fn output_commit(&self, info: &MessageInfo) -> Result<(), TransportError> {
        self.inner.lock().output_commits.push(info.clone());
        Ok(())
    }
}

// ============================================================================
// Location
// ============================================================================

#[derive(Debug, Default)]
pub struct MemoryLocation {
    locations: Mutex<HashMap<EntityId, EndpointRef>>,
    /// Remaining lookups answered with `None`, per entity.
    hidden: Mutex<HashMap<EntityId, u32>>,
    fail: AtomicBool,
}

impl MemoryLocation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn location(&self, id: EntityId) -> Option<EndpointRef> {
        self.locations.lock().get(&id).cloned()
    }

    /// Answers the next `lookups` searches for `id` as if it were recovering.
    pub fn hide(&self, id: EntityId, lookups: u32) {
        self.hidden.lock().insert(id, lookups);
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), TransportError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(TransportError::Unreachable("location server down".to_string()));
        }
        Ok(())
    }
}

impl LocationServer for MemoryLocation {
    fn update_location(&self, id: EntityId, endpoint: &EndpointRef) -> Result<(), TransportError> {
        self.check()?;
        self.locations.lock().insert(id, endpoint.clone());
        Ok(())
    }

    fn search_object(
        &self,
        id: EntityId,
        _hint: &EndpointRef,
        _caller: EntityId,
    ) -> Result<Option<EndpointRef>, TransportError> {
        self.check()?;
        if let Some(remaining) = self.hidden.lock().get_mut(&id) {
            if *remaining > 0 {
                *remaining -= 1;
                return Ok(None);
            }
        }
        Ok(self.location(id))
    }
}

// ============================================================================
// Recovery
// ============================================================================

#[derive(Debug, Default)]
pub struct MemoryRecovery {
    registered: Mutex<HashSet<EntityId>>,
    states: Mutex<HashMap<EntityId, RecoveryStatus>>,
    fail: AtomicBool,
}

impl MemoryRecovery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_registered(&self, id: EntityId) -> bool {
        self.registered.lock().contains(&id)
    }

    pub fn state(&self, id: EntityId) -> Option<RecoveryStatus> {
        self.states.lock().get(&id).copied()
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), TransportError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(TransportError::Unreachable("recovery server down".to_string()));
        }
        Ok(())
    }
}

impl RecoveryServer for MemoryRecovery {
    fn register(&self, id: EntityId) -> Result<(), TransportError> {
        self.check()?;
        self.registered.lock().insert(id);
        self.states.lock().insert(id, RecoveryStatus::Running);
        Ok(())
    }

    fn unregister(&self, id: EntityId) -> Result<(), TransportError> {
        self.check()?;
        self.registered.lock().remove(&id);
        self.states.lock().remove(&id);
        Ok(())
    }

    fn update_state(&self, id: EntityId, status: RecoveryStatus) -> Result<(), TransportError> {
        self.check()?;
        self.states.lock().insert(id, status);
        Ok(())
    }
}

// ============================================================================
// Cluster
// ============================================================================

/// The three servers together, resolvable by any address.
#[derive(Debug, Default)]
pub struct MemoryCluster {
    pub storage: Arc<MemoryStorage>,
    pub location: Arc<MemoryLocation>,
    pub recovery: Arc<MemoryRecovery>,
    resolved: Mutex<Vec<String>>,
}

impl MemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn servers(&self) -> Servers {
        Servers {
            storage: self.storage.clone(),
            location: self.location.clone(),
            recovery: self.recovery.clone(),
        }
    }

    /// Addresses resolved so far, in order.
    pub fn resolved(&self) -> Vec<String> {
        self.resolved.lock().clone()
    }

    fn record(&self, url: &str) -> Result<(), TransportError> {
        if url.is_empty() {
            return Err(TransportError::Unreachable("empty server address".to_string()));
        }
        self.resolved.lock().push(url.to_string());
        Ok(())
    }
}

impl ServerResolver for MemoryCluster {
    fn storage(&self, url: &str) -> Result<Arc<dyn StorageServer>, TransportError> {
        self.record(url)?;
        Ok(self.storage.clone())
    }

    fn location(&self, url: &str) -> Result<Arc<dyn LocationServer>, TransportError> {
        self.record(url)?;
        Ok(self.location.clone())
    }

    fn recovery(&self, url: &str) -> Result<Arc<dyn RecoveryServer>, TransportError> {
        self.record(url)?;
        Ok(self.recovery.clone())
    }
}

// ============================================================================
// Transport
// ============================================================================

/// Transport answering from scripted outcomes, from routed managers or
/// with a default rendezvous, in that order of precedence.
#[derive(Debug)]
pub struct MemoryTransport {
    scripts: Mutex<HashMap<EntityId, VecDeque<Result<Rendezvous, TransportError>>>>,
    routes: Mutex<HashMap<EntityId, Weak<FtManagerCic>>>,
    default: Rendezvous,
    sent_requests: Mutex<Vec<(Request, EndpointRef)>>,
    sent_replies: Mutex<Vec<(Reply, EndpointRef)>>,
    delivered_replies: Mutex<Vec<(EntityId, Reply)>>,
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new(Rendezvous::Index(CheckpointIndex::ZERO))
    }
}

impl MemoryTransport {
    pub fn new(default: Rendezvous) -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            routes: Mutex::new(HashMap::new()),
            default,
            sent_requests: Mutex::new(Vec::new()),
            sent_replies: Mutex::new(Vec::new()),
            delivered_replies: Mutex::new(Vec::new()),
        }
    }

    /// Queues the outcome of the next send to `destination`.
    pub fn script(&self, destination: EntityId, outcome: Result<Rendezvous, TransportError>) {
        self.scripts
            .lock()
            .entry(destination)
            .or_default()
            .push_back(outcome);
    }

    /// Delivers messages for `destination` to `manager`.
    pub fn route(&self, destination: EntityId, manager: &Arc<FtManagerCic>) {
        self.routes.lock().insert(destination, Arc::downgrade(manager));
    }

    pub fn sent_requests(&self) -> Vec<(Request, EndpointRef)> {
        self.sent_requests.lock().clone()
    }

    pub fn sent_replies(&self) -> Vec<(Reply, EndpointRef)> {
        self.sent_replies.lock().clone()
    }

    /// Replies accepted by routed managers, with their receiver.
    pub fn delivered_replies(&self) -> Vec<(EntityId, Reply)> {
        self.delivered_replies.lock().clone()
    }

    fn scripted(&self, destination: EntityId) -> Option<Result<Rendezvous, TransportError>> {
        self.scripts.lock().get_mut(&destination)?.pop_front()
    }

    fn routed(&self, destination: EntityId) -> Option<Arc<FtManagerCic>> {
        self.routes.lock().get(&destination)?.upgrade()
    }
}

fn rejected(e: &FtError) -> TransportError {
    TransportError::Rejected(e.to_string())
}

impl Transport for MemoryTransport {
    fn send_request(
        &self,
        request: &mut Request,
        destination: &EndpointRef,
    ) -> Result<Rendezvous, TransportError> {
        request.mark_sent();
        self.sent_requests
            .lock()
            .push((request.clone(), destination.clone()));

        if let Some(outcome) = self.scripted(destination.id) {
            return outcome;
        }
        match self.routed(destination.id) {
            Some(manager) => manager
                .receive_request(request.deep_copy())
                .map_err(|e| rejected(&e)),
            None => Ok(self.default),
        }
    }

    fn send_reply(&self, reply: &mut Reply, destination: &EndpointRef) -> Result<Rendezvous, TransportError> {
        self.sent_replies
            .lock()
            .push((reply.clone(), destination.clone()));

        if let Some(outcome) = self.scripted(destination.id) {
            return outcome;
        }
        match self.routed(destination.id) {
            Some(manager) => {
                let mut delivered = reply.deep_copy();
                let rendezvous = manager.receive_reply(&mut delivered).map_err(|e| rejected(&e))?;
                if !delivered.ignore {
                    self.delivered_replies.lock().push((destination.id, delivered));
                }
                Ok(rendezvous)
            }
            None => Ok(self.default),
        }
    }
}

// ============================================================================
// Owner
// ============================================================================

/// Serialized form of a [`MemoryOwner`].
#[derive(Debug, Serialize, Deserialize)]
struct OwnerImage {
    state: Bytes,
    queue: Vec<QueuedImage>,
}

/// An entity with an opaque byte state and a request queue.
#[derive(Debug)]
pub struct MemoryOwner {
    endpoint: Mutex<EndpointRef>,
    queue: RequestQueue,
    state: Mutex<Bytes>,
    blocked: AtomicBool,
    alive: AtomicBool,
    fail_snapshot: AtomicBool,
}

impl MemoryOwner {
    pub fn new(endpoint: EndpointRef) -> Self {
        Self::with_parts(endpoint, RequestQueue::new(), Bytes::new())
    }

    fn with_parts(endpoint: EndpointRef, queue: RequestQueue, state: Bytes) -> Self {
        Self {
            endpoint: Mutex::new(endpoint),
            queue,
            state: Mutex::new(state),
            blocked: AtomicBool::new(false),
            alive: AtomicBool::new(true),
            fail_snapshot: AtomicBool::new(false),
        }
    }

    /// Rebuilds an entity from a snapshot, at a new endpoint. The entity
    /// starts with its communication blocked.
    pub fn restore(endpoint: EndpointRef, snapshot: &[u8]) -> Result<Self, TransportError> {
        let image: OwnerImage = postcard::from_bytes(snapshot)?;
        let owner = Self::with_parts(endpoint, RequestQueue::from_image(image.queue), image.state);
        owner.blocked.store(true, Ordering::SeqCst);
        Ok(owner)
    }

    pub fn state(&self) -> Bytes {
        self.state.lock().clone()
    }

    pub fn set_state(&self, state: Bytes) {
        *self.state.lock() = state;
    }

    pub fn is_blocked(&self) -> bool {
        self.blocked.load(Ordering::SeqCst)
    }

    pub fn set_alive(&self, alive: bool) {
        self.alive.store(alive, Ordering::SeqCst);
    }

    pub fn set_fail_snapshot(&self, fail: bool) {
        self.fail_snapshot.store(fail, Ordering::SeqCst);
    }

    pub fn relocate(&self, address: impl Into<String>) {
        let mut endpoint = self.endpoint.lock();
        *endpoint = endpoint.relocated(address);
    }
}

impl Owner for MemoryOwner {
    fn id(&self) -> EntityId {
        self.endpoint.lock().id
    }

    fn endpoint(&self) -> EndpointRef {
        self.endpoint.lock().clone()
    }

    fn block_communication(&self) {
        self.blocked.store(true, Ordering::SeqCst);
    }

    fn accept_communication(&self) {
        self.blocked.store(false, Ordering::SeqCst);
    }

    fn request_queue(&self) -> &RequestQueue {
        &self.queue
    }

    fn snapshot(&self) -> Result<Bytes, FtError> {
        if self.fail_snapshot.load(Ordering::SeqCst) {
            return Err(FtError::Snapshot("entity state is not serializable".to_string()));
        }
        let image = OwnerImage {
            state: self.state(),
            queue: self.queue.image(),
        };
        postcard::to_allocvec(&image)
            .map(Bytes::from)
            .map_err(|e| FtError::Snapshot(e.to_string()))
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }
}
