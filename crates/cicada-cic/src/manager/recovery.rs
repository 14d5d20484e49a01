//! The recovery engine.

use std::sync::Arc;
use std::time::Instant;

use cicada_types::{CheckpointIndex, Incarnation};

use super::FaultToleranceManager;
use super::cic::FtManagerCic;
use crate::checkpoint::CheckpointInfo;
use crate::error::FtError;
use crate::instrumentation::METRICS;
use crate::log::LogBook;
use crate::message::{Envelope, Request};
use crate::queue::{AwaitedRequest, QueuedRequest, RequestQueue};
use crate::servers::RecoveryStatus;

impl FtManagerCic {
    pub(super) fn restart(&self, info: CheckpointInfo, incarnation: Incarnation) -> Result<(), FtError> {
        let index = info.checkpoint_index;
        let queue = self.owner.request_queue();

        {
            let (mut history, mut state) = self.lock_both();

            // requests of the committed history count as already received
            history.restore(info.last_committed);
            state.completing_checkpoint = false;
            state.awaited.clear();
            state.request_logs = LogBook::starting_at(index);
            state.reply_logs = LogBook::starting_at(index);

            state.checkpoint_index = index;
            state.next_max = index;
            state.history_index = index;
            state.last_recovery = index;
            state.checkpoint_timer = Instant::now();
            if incarnation <= state.incarnation {
                tracing::warn!(
                    entity = %self.owner_id,
                    current = %state.incarnation,
                    proposed = %incarnation,
                    "recovery without a newer incarnation, keeping the current one"
                );
            }
            state.incarnation = state.incarnation.max(incarnation);

            if let Some(pending) = info.pending_request.clone() {
                queue.add_to_front(QueuedRequest::Request(pending));
            }

            filter_queue(queue, index, &mut state.awaited);

            for sender in &info.history {
                let awaited = Arc::new(AwaitedRequest::new(*sender));
                queue.push_back(QueuedRequest::Awaited(Arc::clone(&awaited)));
                state.awaited.push(awaited);
            }

            tracing::info!(
                entity = %self.owner_id,
                %index,
                incarnation = %state.incarnation,
                awaited = state.awaited.len(),
                "restarting after recovery"
            );
        }

        self.owner.accept_communication();

        let endpoint = self.owner.endpoint();
        let announced = self
            .servers
            .location
            .update_location(self.owner_id, &endpoint)
            .and_then(|()| {
                self.servers
                    .recovery
                    .update_state(self.owner_id, RecoveryStatus::Running)
            });
        if let Err(e) = announced {
            METRICS.increment_transport_failures();
            tracing::error!(entity = %self.owner_id, error = %e, "unable to connect with location server");
        }

        METRICS.increment_recoveries();
        self.send_logs(&info);
        Ok(())
    }

    /// Resends the in-transit messages logged in the checkpoint: replies
    /// first, then requests.
    fn send_logs(&self, info: &CheckpointInfo) {
        for log in &info.reply_logs {
            let mut reply = log.reply.clone();
            if let Err(e) = self.send_reply(&mut reply, &log.destination) {
                tracing::error!(
                    entity = %self.owner_id,
                    destination = %log.destination,
                    error = %e,
                    "unable to resend logged reply"
                );
            }
        }

        let sender = self.owner.endpoint();
        for log in &info.request_logs {
            // the original caller reference is stale
            let mut request = log.request.reissued_by(sender.clone());
            if let Err(e) = self.send_request(&mut request, &log.destination) {
                tracing::error!(
                    entity = %self.owner_id,
                    destination = %log.destination,
                    error = %e,
                    "unable to resend logged request"
                );
            }
        }
    }
}

/// Replaces requests orphan up to `index` by placeholders and registers
/// every placeholder left in the queue.
fn filter_queue(queue: &RequestQueue, index: CheckpointIndex, awaited: &mut Vec<Arc<AwaitedRequest>>) {
    queue.for_each_mut(|entry| {
        let orphan_sender = match entry {
            QueuedRequest::Request(request) => {
                is_orphan_up_to(request, index).then(|| request.sender_id())
            }
            // a resolved placeholder stands for its request
            QueuedRequest::Awaited(placeholder) => match placeholder.request() {
                Some(request) => is_orphan_up_to(&request, index).then(|| request.sender_id()),
                None => {
                    awaited.push(Arc::clone(placeholder));
                    None
                }
            },
        };
        if let Some(sender) = orphan_sender {
            let placeholder = Arc::new(AwaitedRequest::new(sender));
            awaited.push(Arc::clone(&placeholder));
            *entry = QueuedRequest::Awaited(placeholder);
        }
    });
}

fn is_orphan_up_to(request: &Request, index: CheckpointIndex) -> bool {
    request
        .info
        .as_ref()
        .and_then(|info| info.orphan_for)
        .is_some_and(|orphan_for| orphan_for <= index)
}
