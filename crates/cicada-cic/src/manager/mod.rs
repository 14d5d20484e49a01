//! Fault-tolerance managers.
//!
//! A manager is attached to one entity and is called by the entity's
//! runtime around every message event:
//!
//! ```text
//! receive ──► on_receive_* (incarnation filter) ──► on_deliver_*
//!                                                       │
//!        on_serve_request_before (checkpoint if due) ◄──┘
//!                          │
//! send ──► on_send_*_before ──► transport ──► on_send_*_after (resend / log)
//! ```
//!
//! Two variants exist: [`FtManagerCic`] for fault-tolerant entities and
//! [`HalfFtManagerCic`] for non fault-tolerant callers, which only
//! implements the send side.

use std::time::Duration;

use cicada_types::{CheckpointIndex, EndpointRef, EntityId, Incarnation};

use crate::checkpoint::CheckpointInfo;
use crate::error::{FtError, TransportError};
use crate::instrumentation::METRICS;
use crate::message::{Admission, FtMessage, FtResponse, Rendezvous, Reply, Request};
use crate::servers::{LocationServer, Transport};

mod checkpoint;
mod cic;
mod deliver;
mod half;
mod recovery;
mod send;

pub use cic::{FtManagerCic, ManagerSettings, ProtocolStatus};
pub use half::HalfFtManagerCic;

/// Pause between two sends of a message refused with RESEND.
pub const TIME_TO_RESEND: Duration = Duration::from_millis(3000);

/// Default time between two periodic checkpoints.
pub const DEFAULT_TTC: Duration = Duration::from_secs(30);

/// Protocol hooks called by the entity runtime.
pub trait FaultToleranceManager: Send + Sync {
    fn owner_id(&self) -> EntityId;

    fn transport(&self) -> &dyn Transport;

    fn location(&self) -> &dyn LocationServer;

    fn resend_backoff(&self) -> Duration;

    /// Incarnation filter for a received request. Marks it ignored when it
    /// is refused.
    fn on_receive_request(&self, request: &mut Request) -> Result<Admission, FtError>;

    fn on_receive_reply(&self, reply: &mut Reply) -> Result<Admission, FtError>;

    /// Returns the checkpoint index of the entity before delivery.
    fn on_deliver_request(&self, request: &mut Request) -> Result<CheckpointIndex, FtError>;

    fn on_deliver_reply(&self, reply: &mut Reply) -> Result<CheckpointIndex, FtError>;

    fn on_send_request_before(&self, request: &mut Request) -> Result<(), FtError>;

    fn on_send_reply_before(&self, reply: &mut Reply) -> Result<(), FtError>;

    /// Handles the rendezvous value of a sent request. Returns the final
    /// rendezvous once every RESEND answer has been retried.
    fn on_send_request_after(
        &self,
        request: &mut Request,
        rendezvous: Rendezvous,
        destination: &EndpointRef,
    ) -> Result<Rendezvous, FtError>;

    fn on_send_reply_after(
        &self,
        reply: &mut Reply,
        rendezvous: Rendezvous,
        destination: &EndpointRef,
    ) -> Result<Rendezvous, FtError>;

    /// Takes every due checkpoint before `request` is served.
    fn on_serve_request_before(&self, request: &Request) -> Result<(), FtError>;

    fn on_serve_request_after(&self, request: &Request) -> Result<(), FtError>;

    /// Rebuilds the protocol state of a freshly restored entity.
    fn before_restart_after_recovery(
        &self,
        info: CheckpointInfo,
        incarnation: Incarnation,
    ) -> Result<(), FtError>;

    fn handle_ft_message(&self, message: FtMessage) -> Result<FtResponse, FtError>;

    /// Publishes a new location of the owner, e.g. after a migration.
    fn update_location_at_server(&self, endpoint: &EndpointRef) -> Result<(), FtError>;

    /// Unregisters the owner from the servers.
    fn termination(&self) -> Result<(), FtError>;

    /// True while the owner state is being snapshotted.
    fn is_a_checkpoint(&self) -> bool;

    /// Fault-tolerant request sending: relocates an unreachable destination
    /// and retries until it is reachable.
    fn send_request(
        &self,
        request: &mut Request,
        destination: &EndpointRef,
    ) -> Result<Rendezvous, FtError> {
        let (rendezvous, destination) = self.transmit_request(request, destination)?;
        self.on_send_request_after(request, rendezvous, &destination)
    }

    fn send_reply(&self, reply: &mut Reply, destination: &EndpointRef) -> Result<Rendezvous, FtError> {
        let (rendezvous, destination) = self.transmit_reply(reply, destination)?;
        self.on_send_reply_after(reply, rendezvous, &destination)
    }

    /// Stamps and sends `request` without the after hook. Returns the
    /// rendezvous and the destination it was finally delivered to.
    fn transmit_request(
        &self,
        request: &mut Request,
        destination: &EndpointRef,
    ) -> Result<(Rendezvous, EndpointRef), FtError> {
        let mut destination = destination.clone();
        loop {
            self.on_send_request_before(request)?;
            match self.transport().send_request(request, &destination) {
                Ok(rendezvous) => return Ok((rendezvous, destination)),
                Err(TransportError::Unreachable(reason)) => {
                    tracing::info!(
                        entity = %self.owner_id(),
                        destination = %destination,
                        %reason,
                        "failure suspected on request sending"
                    );
                    destination = self.communication_failed(&destination)?;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn transmit_reply(
        &self,
        reply: &mut Reply,
        destination: &EndpointRef,
    ) -> Result<(Rendezvous, EndpointRef), FtError> {
        let mut destination = destination.clone();
        loop {
            self.on_send_reply_before(reply)?;
            match self.transport().send_reply(reply, &destination) {
                Ok(rendezvous) => return Ok((rendezvous, destination)),
                Err(TransportError::Unreachable(reason)) => {
                    tracing::info!(
                        entity = %self.owner_id(),
                        destination = %destination,
                        %reason,
                        "failure suspected on reply sending"
                    );
                    destination = self.communication_failed(&destination)?;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Asks the location server for the new location of `suspect`, polling
    /// while it is failed or recovering.
    fn communication_failed(&self, suspect: &EndpointRef) -> Result<EndpointRef, FtError> {
        loop {
            let found = self
                .location()
                .search_object(suspect.id, suspect, self.owner_id())
                .inspect_err(|e| {
                    tracing::error!(entity = %self.owner_id(), error = %e, "location server unreachable");
                })?;
            if let Some(endpoint) = found {
                return Ok(endpoint);
            }
            tracing::debug!(entity = %self.owner_id(), suspect = %suspect.id, "waiting for recovery");
            std::thread::sleep(self.resend_backoff());
        }
    }
}

/// Sends `request` again while the receiver answers RESEND.
pub(crate) fn settle_request<M: FaultToleranceManager + ?Sized>(
    manager: &M,
    request: &mut Request,
    mut rendezvous: Rendezvous,
    destination: &EndpointRef,
) -> Result<(Rendezvous, EndpointRef), FtError> {
    let mut destination = destination.clone();
    while rendezvous == Rendezvous::Resend {
        request.reset_send_counter();
        request.ignore = false;
        METRICS.increment_resends();
        tracing::warn!(
            entity = %manager.owner_id(),
            destination = %destination,
            sequence = request.sequence,
            "receiver is recovering, resending request"
        );
        std::thread::sleep(manager.resend_backoff());
        (rendezvous, destination) = manager.transmit_request(request, &destination)?;
    }
    Ok((rendezvous, destination))
}

/// Sends `reply` again while the receiver answers RESEND.
pub(crate) fn settle_reply<M: FaultToleranceManager + ?Sized>(
    manager: &M,
    reply: &mut Reply,
    mut rendezvous: Rendezvous,
    destination: &EndpointRef,
) -> Result<(Rendezvous, EndpointRef), FtError> {
    let mut destination = destination.clone();
    while rendezvous == Rendezvous::Resend {
        reply.ignore = false;
        METRICS.increment_resends();
        tracing::warn!(
            entity = %manager.owner_id(),
            destination = %destination,
            sequence = reply.sequence,
            "receiver is recovering, resending reply"
        );
        std::thread::sleep(manager.resend_backoff());
        (rendezvous, destination) = manager.transmit_reply(reply, &destination)?;
    }
    Ok((rendezvous, destination))
}
