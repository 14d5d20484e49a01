//! The checkpoint engine.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Instant;

use super::cic::{FtManagerCic, ProtocolState};
use crate::checkpoint::{Checkpoint, CheckpointInfo};
use crate::error::FtError;
use crate::history::History;
use crate::instrumentation::METRICS;
use crate::log::{LogBook, ReplyLog, RequestLog};
use crate::message::Request;
use crate::queue::AwaitedRequest;
use crate::servers::Owner;

/// Blocks the owner's communication until dropped.
struct CommunicationGuard<'a> {
    owner: &'a dyn Owner,
}

impl<'a> CommunicationGuard<'a> {
    fn block(owner: &'a dyn Owner) -> Self {
        owner.block_communication();
        Self { owner }
    }
}

impl Drop for CommunicationGuard<'_> {
    fn drop(&mut self) {
        self.owner.accept_communication();
    }
}

/// Live structures kept out of the owner snapshot.
struct Detached {
    request_logs: LogBook<RequestLog>,
    reply_logs: LogBook<ReplyLog>,
    history: History,
    awaited: Vec<Arc<AwaitedRequest>>,
}

impl Detached {
    fn take(state: &mut ProtocolState, history: &mut History) -> Self {
        Self {
            request_logs: std::mem::take(&mut state.request_logs),
            reply_logs: std::mem::take(&mut state.reply_logs),
            history: std::mem::take(history),
            awaited: std::mem::take(&mut state.awaited),
        }
    }

    fn reattach(self, state: &mut ProtocolState, history: &mut History) {
        state.request_logs = self.request_logs;
        state.reply_logs = self.reply_logs;
        *history = self.history;
        state.awaited = self.awaited;
    }
}

impl FtManagerCic {
    /// Takes a checkpoint with index `checkpoint_index + 1`.
    ///
    /// Returns `Ok(None)` if the storage server could not be reached. The
    /// local counters have advanced anyway: the entity is then ahead of its
    /// latest durable checkpoint until the next successful one. A failed
    /// snapshot is returned as an error with counters and logs untouched.
    pub fn checkpoint(&self, pending: Option<&Request>) -> Result<Option<Checkpoint>, FtError> {
        let _communication = CommunicationGuard::block(self.owner.as_ref());
        let (mut history, mut state) = self.lock_both();

        let index = state.checkpoint_index.next();
        tracing::debug!(entity = %self.owner_id, %index, "checkpointing");

        // counters and logs only move once the snapshot exists
        let detached = Detached::take(&mut state, &mut history);
        self.checkpoint_tag.store(true, Ordering::Release);
        let snapshot = self.owner.snapshot();
        self.checkpoint_tag.store(false, Ordering::Release);
        detached.reattach(&mut state, &mut history);
        let snapshot = snapshot?;

        state.request_logs.extend_to(index);
        state.reply_logs.extend_to(index);
        let mut info = CheckpointInfo::new(index);
        info.pending_request = pending.cloned();
        info.request_logs = state.request_logs.take(index);
        info.reply_logs = state.reply_logs.take(index);

        state.checkpoint_index = index;

        if !self.settings.output_commit {
            history.reset_at_checkpoint();
        }
        info.last_received_request = history.delivered();

        let checkpoint = Checkpoint {
            owner: self.owner_id,
            state: snapshot,
            info,
        };

        // reset even on failure so a storage outage does not make every
        // serve retry immediately
        state.checkpoint_timer = Instant::now();

        match self
            .servers
            .storage
            .store_checkpoint(&checkpoint, state.incarnation)
        {
            Ok(()) => {
                // completed later with its minimal history
                state.completing_checkpoint = true;
                METRICS.increment_checkpoints_taken();
                Ok(Some(checkpoint))
            }
            Err(e) => {
                METRICS.increment_checkpoint_failures();
                tracing::error!(
                    entity = %self.owner_id,
                    %index,
                    error = %e,
                    "unable to send checkpoint to the server"
                );
                Ok(None)
            }
        }
    }
}
