//! Collaborators consumed by the managers.
//!
//! The protocol never talks to the network itself. Storage, location and
//! recovery servers, the message transport and the owning entity are all
//! reached through the traits below; `crate::memory` provides in-process
//! implementations.

use std::sync::Arc;

use bytes::Bytes;
use cicada_types::{EndpointRef, EntityId, Incarnation};
use serde::{Deserialize, Serialize};

use crate::checkpoint::Checkpoint;
use crate::error::{FtError, TransportError};
use crate::history::HistoryUpdate;
use crate::message::{MessageInfo, Rendezvous, Reply, Request};
use crate::queue::RequestQueue;

/// Checkpoint and history storage.
pub trait StorageServer: Send + Sync {
    fn store_checkpoint(
        &self,
        checkpoint: &Checkpoint,
        incarnation: Incarnation,
    ) -> Result<(), TransportError>;

    fn commit_history(&self, update: &HistoryUpdate) -> Result<(), TransportError>;

    fn output_commit(&self, info: &MessageInfo) -> Result<(), TransportError>;
}

/// Directory of entity locations.
pub trait LocationServer: Send + Sync {
    fn update_location(&self, id: EntityId, endpoint: &EndpointRef) -> Result<(), TransportError>;

    /// Looks up the current location of `id`. `hint` is the last known
    /// location. Returns `None` while the entity is failed or recovering.
    fn search_object(
        &self,
        id: EntityId,
        hint: &EndpointRef,
        caller: EntityId,
    ) -> Result<Option<EndpointRef>, TransportError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecoveryStatus {
    Running,
    Recovering,
}

/// Recovery process tracking the status of every registered entity.
pub trait RecoveryServer: Send + Sync {
    fn register(&self, id: EntityId) -> Result<(), TransportError>;

    fn unregister(&self, id: EntityId) -> Result<(), TransportError>;

    fn update_state(&self, id: EntityId, status: RecoveryStatus) -> Result<(), TransportError>;
}

/// Message transport. Returns the receiver's rendezvous value.
///
/// [`TransportError::Unreachable`] makes the manager look the destination
/// up again through the location server.
pub trait Transport: Send + Sync {
    fn send_request(
        &self,
        request: &mut Request,
        destination: &EndpointRef,
    ) -> Result<Rendezvous, TransportError>;

    fn send_reply(
        &self,
        reply: &mut Reply,
        destination: &EndpointRef,
    ) -> Result<Rendezvous, TransportError>;
}

/// The entity a manager is attached to.
///
/// [`Owner::snapshot`] is called while the manager holds its locks; it must
/// not call back into the manager other than `is_a_checkpoint`.
pub trait Owner: Send + Sync {
    fn id(&self) -> EntityId;

    /// Current reachable reference of the entity.
    fn endpoint(&self) -> EndpointRef;

    /// Stops accepting incoming messages.
    fn block_communication(&self);

    fn accept_communication(&self);

    fn request_queue(&self) -> &RequestQueue;

    /// Serializes the entity state, request queue included.
    fn snapshot(&self) -> Result<Bytes, FtError>;

    fn is_alive(&self) -> bool;
}

/// The three fault-tolerance servers used by a manager.
#[derive(Clone)]
pub struct Servers {
    pub storage: Arc<dyn StorageServer>,
    pub location: Arc<dyn LocationServer>,
    pub recovery: Arc<dyn RecoveryServer>,
}

impl std::fmt::Debug for Servers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Servers").finish_non_exhaustive()
    }
}

/// Resolves server addresses to live handles.
pub trait ServerResolver {
    fn storage(&self, url: &str) -> Result<Arc<dyn StorageServer>, TransportError>;

    fn location(&self, url: &str) -> Result<Arc<dyn LocationServer>, TransportError>;

    fn recovery(&self, url: &str) -> Result<Arc<dyn RecoveryServer>, TransportError>;
}

impl Servers {
    pub fn resolve(
        resolver: &dyn ServerResolver,
        storage_url: &str,
        location_url: &str,
        recovery_url: &str,
    ) -> Result<Self, TransportError> {
        Ok(Self {
            storage: resolver.storage(storage_url)?,
            location: resolver.location(location_url)?,
            recovery: resolver.recovery(recovery_url)?,
        })
    }
}
