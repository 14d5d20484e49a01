//! Delivery hooks and history commits.

use cicada_types::CheckpointIndex;

use super::cic::{FtManagerCic, ProtocolState};
use crate::error::FtError;
use crate::history::{History, HistoryUpdate};
use crate::instrumentation::METRICS;
use crate::message::{Envelope, Reply, Request};

impl FtManagerCic {
    pub(super) fn deliver_request(&self, request: &mut Request) -> Result<CheckpointIndex, FtError> {
        let (mut history, mut state) = self.lock_both();
        let prior = state.checkpoint_index;

        let Some(info) = request.significant_info().cloned() else {
            return Ok(prior);
        };

        let closed = self.update_history(&mut history, &mut state, info.history_index)?;

        // Tagged before any placeholder takes a copy of the request.
        if info.checkpoint_index > prior {
            state.next_max = state.next_max.max(info.checkpoint_index);
            if let Some(info) = request.info_mut() {
                info.orphan_for = Some(info.checkpoint_index);
            }
            METRICS.increment_orphans_tagged();
            tracing::warn!(
                entity = %self.owner_id,
                sender = %request.sender_id(),
                orphan_for = %info.checkpoint_index,
                index = %prior,
                "orphan request delivered"
            );
        }

        if let Some(awaited) = state.take_awaited(request.sender_id()) {
            awaited.resolve(request.clone());
            // the placeholder in the queue now carries the request
            request.ignore = true;
        } else if self.settings.output_commit || state.completing_checkpoint {
            let position = history.append(request.sender_id());
            if self.settings.output_commit {
                if let Some(info) = request.info_mut() {
                    info.position_in_history = position;
                    if let Some(clock) = info.vector_clock.as_ref() {
                        state.vector_clock.merge(clock);
                    }
                }
            }
        }

        drop(state);
        if let Some(update) = closed {
            self.ship_history(&update);
        }
        Ok(prior)
    }

    pub(super) fn deliver_reply(&self, reply: &mut Reply) -> Result<CheckpointIndex, FtError> {
        let (mut history, mut state) = self.lock_both();
        let prior = state.checkpoint_index;

        let Some(info) = reply.significant_info().cloned() else {
            return Ok(prior);
        };

        let closed = self.update_history(&mut history, &mut state, info.history_index)?;
        if info.checkpoint_index > prior {
            state.next_max = state.next_max.max(info.checkpoint_index);
        }

        drop(state);
        if let Some(update) = closed {
            self.ship_history(&update);
        }
        Ok(prior)
    }

    /// Closes the current history if the sender has already closed a later
    /// one. Returns the update to send to the storage server.
    fn update_history(
        &self,
        history: &mut History,
        state: &mut ProtocolState,
        observed: CheckpointIndex,
    ) -> Result<Option<HistoryUpdate>, FtError> {
        if observed <= state.history_index {
            return Ok(None);
        }
        let attached = state.checkpoint_index;
        let up_to = history.delivered();
        let update = self.commit_histories(history, state, attached, up_to, true)?;
        state.completing_checkpoint = false;
        Ok(update)
    }

    /// Commits the history from the last committed position up to `up_to`
    /// and attaches it to checkpoint `attached`.
    ///
    /// A minimal commit for a checkpoint whose history is already closed
    /// is skipped and returns `None`.
    pub(super) fn commit_histories(
        &self,
        history: &mut History,
        state: &mut ProtocolState,
        attached: CheckpointIndex,
        up_to: u64,
        minimal: bool,
    ) -> Result<Option<HistoryUpdate>, FtError> {
        if minimal && state.history_index >= attached {
            return Ok(None);
        }

        let (range, elements) = history.commit(up_to)?;
        state.history_index = state.checkpoint_index;
        METRICS.increment_history_commits();
        tracing::debug!(
            entity = %self.owner_id,
            checkpoint = %attached,
            from = range.start,
            up_to = range.end,
            "history committed"
        );

        Ok(Some(HistoryUpdate {
            owner: self.owner_id,
            checkpoint_index: attached,
            incarnation: state.incarnation,
            range,
            elements,
        }))
    }

    /// Sends a history update to the storage server. Failures are logged.
    pub(super) fn ship_history(&self, update: &HistoryUpdate) {
        if let Err(e) = self.servers.storage.commit_history(update) {
            METRICS.increment_transport_failures();
            tracing::error!(
                entity = %self.owner_id,
                checkpoint = %update.checkpoint_index,
                error = %e,
                "storage server is not reachable, history not committed"
            );
        }
    }

    /// Commits the entire history because a new recovery line exists. The
    /// update is returned to the storage server rather than sent.
    pub(super) fn complete_global_state(&self) -> Result<Option<HistoryUpdate>, FtError> {
        let (mut history, mut state) = self.lock_both();
        let attached = state.checkpoint_index;
        let up_to = history.delivered();
        let update = self.commit_histories(&mut history, &mut state, attached, up_to, true)?;
        state.completing_checkpoint = false;
        Ok(update)
    }

    /// Commits the history up to `up_to` for an output commit.
    pub(super) fn commit_for_output(&self, up_to: u64) -> Result<Option<HistoryUpdate>, FtError> {
        let (mut history, mut state) = self.lock_both();
        // attached to the latest checkpoint unless it still waits for its
        // minimal history
        let attached = if state.completing_checkpoint {
            state.checkpoint_index.prev()
        } else {
            state.checkpoint_index
        };
        self.commit_histories(&mut history, &mut state, attached, up_to, false)
    }
}
