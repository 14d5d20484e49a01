//! Manager of a half body: a caller that is not fault tolerant itself.
//!
//! It stamps outgoing messages so that receivers skip them, and retries
//! messages refused with RESEND. Everything else is unsupported.

use std::sync::Arc;
use std::time::Duration;

use cicada_types::{CheckpointIndex, EndpointRef, EntityId, Incarnation};

use super::{FaultToleranceManager, TIME_TO_RESEND, settle_reply, settle_request};
use crate::checkpoint::CheckpointInfo;
use crate::error::FtError;
use crate::message::{Admission, FtMessage, FtResponse, MessageInfo, Rendezvous, Reply, Request};
use crate::servers::{LocationServer, Transport};

pub struct HalfFtManagerCic {
    owner_id: EntityId,
    location: Arc<dyn LocationServer>,
    transport: Arc<dyn Transport>,
    resend_backoff: Duration,
}

impl std::fmt::Debug for HalfFtManagerCic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HalfFtManagerCic")
            .field("owner", &self.owner_id)
            .finish_non_exhaustive()
    }
}

impl HalfFtManagerCic {
    pub fn new(
        owner_id: EntityId,
        location: Arc<dyn LocationServer>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            owner_id,
            location,
            transport,
            resend_backoff: TIME_TO_RESEND,
        }
    }

    pub fn with_resend_backoff(mut self, backoff: Duration) -> Self {
        self.resend_backoff = backoff;
        self
    }
}

impl FaultToleranceManager for HalfFtManagerCic {
    fn owner_id(&self) -> EntityId {
        self.owner_id
    }

    fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    fn location(&self) -> &dyn LocationServer {
        self.location.as_ref()
    }

    fn resend_backoff(&self) -> Duration {
        self.resend_backoff
    }

    fn on_receive_request(&self, _request: &mut Request) -> Result<Admission, FtError> {
        Err(FtError::Unsupported("on_receive_request"))
    }

    fn on_receive_reply(&self, _reply: &mut Reply) -> Result<Admission, FtError> {
        Err(FtError::Unsupported("on_receive_reply"))
    }

    fn on_deliver_request(&self, _request: &mut Request) -> Result<CheckpointIndex, FtError> {
        Err(FtError::Unsupported("on_deliver_request"))
    }

    fn on_deliver_reply(&self, _reply: &mut Reply) -> Result<CheckpointIndex, FtError> {
        Err(FtError::Unsupported("on_deliver_reply"))
    }

    fn on_send_request_before(&self, request: &mut Request) -> Result<(), FtError> {
        request.info = Some(MessageInfo::half_body());
        Ok(())
    }

    fn on_send_reply_before(&self, reply: &mut Reply) -> Result<(), FtError> {
        reply.info = Some(MessageInfo::half_body());
        Ok(())
    }

    fn on_send_request_after(
        &self,
        request: &mut Request,
        rendezvous: Rendezvous,
        destination: &EndpointRef,
    ) -> Result<Rendezvous, FtError> {
        settle_request(self, request, rendezvous, destination).map(|(rendezvous, _)| rendezvous)
    }

    fn on_send_reply_after(
        &self,
        reply: &mut Reply,
        rendezvous: Rendezvous,
        destination: &EndpointRef,
    ) -> Result<Rendezvous, FtError> {
        settle_reply(self, reply, rendezvous, destination).map(|(rendezvous, _)| rendezvous)
    }

    fn on_serve_request_before(&self, _request: &Request) -> Result<(), FtError> {
        Err(FtError::Unsupported("on_serve_request_before"))
    }

    fn on_serve_request_after(&self, _request: &Request) -> Result<(), FtError> {
        Err(FtError::Unsupported("on_serve_request_after"))
    }

    fn before_restart_after_recovery(
        &self,
        _info: CheckpointInfo,
        _incarnation: Incarnation,
    ) -> Result<(), FtError> {
        Err(FtError::Unsupported("before_restart_after_recovery"))
    }

    fn handle_ft_message(&self, _message: FtMessage) -> Result<FtResponse, FtError> {
        Err(FtError::Unsupported("handle_ft_message"))
    }

    fn update_location_at_server(&self, _endpoint: &EndpointRef) -> Result<(), FtError> {
        Err(FtError::Unsupported("update_location_at_server"))
    }

    fn termination(&self) -> Result<(), FtError> {
        // never registered with the recovery server
        Ok(())
    }

    fn is_a_checkpoint(&self) -> bool {
        false
    }
}
