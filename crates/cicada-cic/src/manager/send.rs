//! Send hooks: message stamping, output commits and in-transit logging.

use cicada_types::EndpointRef;

use super::cic::{FtManagerCic, ProtocolState};
use super::{settle_reply, settle_request};
use crate::error::FtError;
use crate::instrumentation::METRICS;
use crate::log::{ReplyLog, RequestLog};
use crate::message::{MessageInfo, Rendezvous, Reply, Request};

impl ProtocolState {
    fn message_info(&self) -> MessageInfo {
        MessageInfo {
            checkpoint_index: self.checkpoint_index,
            history_index: self.history_index,
            incarnation: self.incarnation,
            last_recovery: self.last_recovery,
            orphan_for: None,
            from_half_body: false,
            vector_clock: None,
            position_in_history: 0,
        }
    }
}

impl FtManagerCic {
    pub(super) fn stamp_request(&self, request: &mut Request) {
        let info = {
            let state = self.state.lock();
            let mut info = state.message_info();
            if self.settings.output_commit {
                info.vector_clock = Some(state.vector_clock.clone());
            }
            info
        };

        let output_commit = self.settings.output_commit
            && self
                .settings
                .output_commit_methods
                .iter()
                .any(|method| *method == request.method);
        if output_commit {
            tracing::debug!(entity = %self.owner_id, method = %request.method, "output commit");
            METRICS.increment_output_commits();
            if let Err(e) = self.servers.storage.output_commit(&info) {
                METRICS.increment_transport_failures();
                tracing::error!(entity = %self.owner_id, error = %e, "cannot perform output commit");
            }
        }

        request.info = Some(info);
    }

    pub(super) fn stamp_reply(&self, reply: &mut Reply) {
        reply.info = Some(self.state.lock().message_info());
    }

    pub(super) fn after_request_sent(
        &self,
        request: &mut Request,
        rendezvous: Rendezvous,
        destination: &EndpointRef,
    ) -> Result<Rendezvous, FtError> {
        let (rendezvous, destination) = settle_request(self, request, rendezvous, destination)?;
        let Some(remote) = rendezvous.checkpoint_index() else {
            if rendezvous == Rendezvous::Recover {
                tracing::warn!(entity = %self.owner_id, destination = %destination, "receiver requires this entity to recover");
            }
            return Ok(rendezvous);
        };

        let mut state = self.state.lock();
        let current = state.checkpoint_index;
        if remote > current {
            state.next_max = state.next_max.max(remote);
            let mut logged = request.deep_copy();
            // not forwarded yet
            logged.reset_send_counter();
            state.request_logs.record(
                current,
                remote,
                RequestLog {
                    request: logged,
                    destination: destination.clone(),
                },
            );
            METRICS.increment_requests_logged();
            tracing::debug!(
                entity = %self.owner_id,
                destination = %destination,
                from = %current,
                up_to = %remote,
                "in-transit request logged"
            );
        }
        Ok(rendezvous)
    }

    pub(super) fn after_reply_sent(
        &self,
        reply: &mut Reply,
        rendezvous: Rendezvous,
        destination: &EndpointRef,
    ) -> Result<Rendezvous, FtError> {
        let (rendezvous, destination) = settle_reply(self, reply, rendezvous, destination)?;
        let Some(remote) = rendezvous.checkpoint_index() else {
            if rendezvous == Rendezvous::Recover {
                tracing::warn!(entity = %self.owner_id, destination = %destination, "receiver requires this entity to recover");
            }
            return Ok(rendezvous);
        };

        let mut state = self.state.lock();
        let current = state.checkpoint_index;
        if remote > current {
            state.next_max = state.next_max.max(remote);
            state.reply_logs.record(
                current,
                remote,
                ReplyLog {
                    reply: reply.deep_copy(),
                    destination: destination.clone(),
                },
            );
            METRICS.increment_replies_logged();
            tracing::debug!(
                entity = %self.owner_id,
                destination = %destination,
                from = %current,
                up_to = %remote,
                "in-transit reply logged"
            );
        }
        Ok(rendezvous)
    }
}
