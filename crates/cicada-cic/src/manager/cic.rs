//! The communication-induced checkpointing manager.
//!
//! # Locking
//!
//! State is split across two mutexes:
//!
//! - `history`: the reception history and its positions.
//! - `state`: counters, logs and awaited requests.
//!
//! When both are needed, `history` is always taken first, through
//! [`FtManagerCic::lock_both`]. Checkpointing and history commits hold
//! `history` for their whole duration so a commit never reads a history
//! being reset by a checkpoint. No lock is held while sleeping before a
//! resend or while sending messages.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use cicada_types::{CheckpointIndex, EndpointRef, EntityId, Incarnation};
use parking_lot::{Mutex, MutexGuard};

use super::{DEFAULT_TTC, FaultToleranceManager, TIME_TO_RESEND};
use crate::checkpoint::CheckpointInfo;
use crate::error::FtError;
use crate::history::History;
use crate::log::{LogBook, ReplyLog, RequestLog};
use crate::message::{
    Admission, Envelope, FtMessage, FtResponse, Liveness, Rendezvous, Reply, Request, VectorClock,
};
use crate::queue::{AwaitedRequest, QueuedRequest};
use crate::servers::{LocationServer, Owner, Servers, Transport};

/// Tunables of a manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerSettings {
    /// Time to checkpoint: maximum time between two checkpoints.
    pub ttc: Duration,
    pub resend_backoff: Duration,
    /// Experimental output-commit mode with causal vector clocks.
    pub output_commit: bool,
    /// Methods whose sending is an output commit.
    pub output_commit_methods: Vec<String>,
}

impl ManagerSettings {
    /// Rejects a zero `ttc`, which would make every serve checkpoint.
    pub fn validate(&self) -> Result<(), FtError> {
        if self.ttc.is_zero() {
            return Err(FtError::InvalidSettings(
                "time to checkpoint must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            ttc: DEFAULT_TTC,
            resend_backoff: TIME_TO_RESEND,
            output_commit: false,
            output_commit_methods: vec!["logEvent".to_string()],
        }
    }
}

/// Counters, logs and awaited requests guarded by the state lock.
#[derive(Debug)]
pub(super) struct ProtocolState {
    pub(super) incarnation: Incarnation,
    pub(super) checkpoint_index: CheckpointIndex,
    /// Highest checkpoint index claimed by an observed message.
    pub(super) next_max: CheckpointIndex,
    /// Index of the latest checkpoint whose minimal history is committed.
    pub(super) history_index: CheckpointIndex,
    pub(super) last_recovery: CheckpointIndex,
    pub(super) checkpoint_timer: Instant,
    /// True until the latest checkpoint is completed with its minimal
    /// history.
    pub(super) completing_checkpoint: bool,
    pub(super) request_logs: LogBook<RequestLog>,
    pub(super) reply_logs: LogBook<ReplyLog>,
    /// Placeholders also present in the owner's request queue, in queue
    /// order.
    pub(super) awaited: Vec<Arc<AwaitedRequest>>,
    /// Output-commit mode only.
    pub(super) vector_clock: VectorClock,
}

impl ProtocolState {
    fn new() -> Self {
        Self {
            incarnation: Incarnation::INITIAL,
            checkpoint_index: CheckpointIndex::ZERO,
            // A first checkpoint is due as soon as the entity serves.
            next_max: CheckpointIndex::new(1),
            history_index: CheckpointIndex::ZERO,
            last_recovery: CheckpointIndex::ZERO,
            checkpoint_timer: Instant::now(),
            completing_checkpoint: false,
            request_logs: LogBook::default(),
            reply_logs: LogBook::default(),
            awaited: Vec::new(),
            vector_clock: VectorClock::new(),
        }
    }

    pub(super) fn have_to_checkpoint(&self, ttc: Duration) -> bool {
        self.behind_next_max() || self.checkpoint_overdue(ttc)
    }

    pub(super) fn behind_next_max(&self) -> bool {
        self.next_max > self.checkpoint_index
    }

    pub(super) fn checkpoint_overdue(&self, ttc: Duration) -> bool {
        self.checkpoint_timer.elapsed() > ttc
    }

    /// Removes and returns the first placeholder waiting for `sender`.
    pub(super) fn take_awaited(&mut self, sender: EntityId) -> Option<Arc<AwaitedRequest>> {
        let position = self.awaited.iter().position(|a| a.sender() == sender)?;
        Some(self.awaited.remove(position))
    }
}

/// Observable protocol counters of a manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolStatus {
    pub incarnation: Incarnation,
    pub checkpoint_index: CheckpointIndex,
    pub next_max: CheckpointIndex,
    pub history_index: CheckpointIndex,
    pub last_recovery: CheckpointIndex,
    pub completing_checkpoint: bool,
    pub history_base: u64,
    pub delivered: u64,
    pub last_committed: u64,
    pub history_len: usize,
    pub awaited: Vec<EntityId>,
    pub logged_requests: usize,
    pub logged_replies: usize,
}

/// Communication-induced checkpointing manager of a fault-tolerant entity.
pub struct FtManagerCic {
    pub(super) owner: Arc<dyn Owner>,
    pub(super) owner_id: EntityId,
    pub(super) servers: Servers,
    pub(super) transport: Arc<dyn Transport>,
    pub(super) settings: ManagerSettings,
    pub(super) history: Mutex<History>,
    pub(super) state: Mutex<ProtocolState>,
    pub(super) checkpoint_tag: AtomicBool,
}

impl std::fmt::Debug for FtManagerCic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FtManagerCic")
            .field("owner", &self.owner_id)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl FtManagerCic {
    /// Creates a manager without contacting the servers. Used for entities
    /// restarted by a recovery, which announce themselves in
    /// [`FaultToleranceManager::before_restart_after_recovery`].
    pub fn new(
        owner: Arc<dyn Owner>,
        servers: Servers,
        transport: Arc<dyn Transport>,
        settings: ManagerSettings,
    ) -> Self {
        let owner_id = owner.id();
        Self {
            owner,
            owner_id,
            servers,
            transport,
            settings,
            history: Mutex::new(History::new()),
            state: Mutex::new(ProtocolState::new()),
            checkpoint_tag: AtomicBool::new(false),
        }
    }

    /// Creates a manager and registers its owner with the location and
    /// recovery servers. Registration failures are fatal.
    pub fn init(
        owner: Arc<dyn Owner>,
        servers: Servers,
        transport: Arc<dyn Transport>,
        settings: ManagerSettings,
    ) -> Result<Self, FtError> {
        settings.validate()?;
        let manager = Self::new(owner, servers, transport, settings);
        let endpoint = manager.owner.endpoint();
        manager
            .servers
            .location
            .update_location(manager.owner_id, &endpoint)?;
        manager.servers.recovery.register(manager.owner_id)?;
        tracing::info!(entity = %manager.owner_id, "CIC fault-tolerance is enabled");
        Ok(manager)
    }

    pub fn settings(&self) -> &ManagerSettings {
        &self.settings
    }

    /// Takes the history lock, then the state lock.
    pub(super) fn lock_both(&self) -> (MutexGuard<'_, History>, MutexGuard<'_, ProtocolState>) {
        let history = self.history.lock();
        let state = self.state.lock();
        (history, state)
    }

    pub fn status(&self) -> ProtocolStatus {
        let (history, state) = self.lock_both();
        ProtocolStatus {
            incarnation: state.incarnation,
            checkpoint_index: state.checkpoint_index,
            next_max: state.next_max,
            history_index: state.history_index,
            last_recovery: state.last_recovery,
            completing_checkpoint: state.completing_checkpoint,
            history_base: history.base(),
            delivered: history.delivered(),
            last_committed: history.last_committed(),
            history_len: history.len(),
            awaited: state.awaited.iter().map(|a| a.sender()).collect(),
            logged_requests: state.request_logs.len(),
            logged_replies: state.reply_logs.len(),
        }
    }

    /// Requests and replies logged for a recovery from checkpoint `index`.
    pub fn pending_logs(&self, index: CheckpointIndex) -> (Vec<RequestLog>, Vec<ReplyLog>) {
        let state = self.state.lock();
        (
            state.request_logs.pending(index).to_vec(),
            state.reply_logs.pending(index).to_vec(),
        )
    }

    pub fn have_to_checkpoint(&self) -> bool {
        self.state.lock().have_to_checkpoint(self.settings.ttc)
    }

    /// Incarnation filter shared by requests and replies.
    fn incarnation_test<M: Envelope>(&self, message: &mut M) -> Admission {
        let Some(incoming) = message.significant_info().map(|info| info.incarnation) else {
            return Admission::Accepted;
        };
        let local = self.state.lock().incarnation;
        if incoming > local {
            // this entity is stale and about to recover
            message.set_ignore(true);
            Admission::Resend
        } else if incoming < local {
            message.set_ignore(true);
            Admission::Recover
        } else {
            Admission::Accepted
        }
    }

    /// Receive path of a request: filter, deliver, then queue it unless it
    /// was ignored. Returns the rendezvous value for the sender.
    pub fn receive_request(&self, mut request: Request) -> Result<Rendezvous, FtError> {
        if let Some(refusal) = self.on_receive_request(&mut request)?.refusal() {
            return Ok(refusal);
        }
        let index = self.on_deliver_request(&mut request)?;
        if !request.ignore {
            self.owner.request_queue().push_request(request);
        }
        Ok(Rendezvous::Index(index))
    }

    /// Receive path of a reply. The reply is left to the caller unless it
    /// was refused.
    pub fn receive_reply(&self, reply: &mut Reply) -> Result<Rendezvous, FtError> {
        if let Some(refusal) = self.on_receive_reply(reply)?.refusal() {
            return Ok(refusal);
        }
        let index = self.on_deliver_reply(reply)?;
        Ok(Rendezvous::Index(index))
    }

    /// Serves the next servable request of the owner's queue with `serve`,
    /// running the serve hooks around it.
    pub fn serve_next<F>(&self, serve: F) -> Result<Option<Request>, FtError>
    where
        F: FnOnce(&Request),
    {
        let Some(request) = self.owner.request_queue().pop_servable() else {
            return Ok(None);
        };
        if let Err(e) = self.on_serve_request_before(&request) {
            // not served: keep it first in line
            self.owner
                .request_queue()
                .add_to_front(QueuedRequest::Request(request));
            return Err(e);
        }
        serve(&request);
        self.on_serve_request_after(&request)?;
        Ok(Some(request))
    }
}

impl FaultToleranceManager for FtManagerCic {
    fn owner_id(&self) -> EntityId {
        self.owner_id
    }

    fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    fn location(&self) -> &dyn LocationServer {
        self.servers.location.as_ref()
    }

    fn resend_backoff(&self) -> Duration {
        self.settings.resend_backoff
    }

    fn on_receive_request(&self, request: &mut Request) -> Result<Admission, FtError> {
        Ok(self.incarnation_test(request))
    }

    fn on_receive_reply(&self, reply: &mut Reply) -> Result<Admission, FtError> {
        Ok(self.incarnation_test(reply))
    }

    fn on_deliver_request(&self, request: &mut Request) -> Result<CheckpointIndex, FtError> {
        self.deliver_request(request)
    }

    fn on_deliver_reply(&self, reply: &mut Reply) -> Result<CheckpointIndex, FtError> {
        self.deliver_reply(reply)
    }

    fn on_send_request_before(&self, request: &mut Request) -> Result<(), FtError> {
        self.stamp_request(request);
        Ok(())
    }

    fn on_send_reply_before(&self, reply: &mut Reply) -> Result<(), FtError> {
        self.stamp_reply(reply);
        Ok(())
    }

    fn on_send_request_after(
        &self,
        request: &mut Request,
        rendezvous: Rendezvous,
        destination: &EndpointRef,
    ) -> Result<Rendezvous, FtError> {
        self.after_request_sent(request, rendezvous, destination)
    }

    fn on_send_reply_after(
        &self,
        reply: &mut Reply,
        rendezvous: Rendezvous,
        destination: &EndpointRef,
    ) -> Result<Rendezvous, FtError> {
        self.after_reply_sent(reply, rendezvous, destination)
    }

    fn on_serve_request_before(&self, request: &Request) -> Result<(), FtError> {
        // The timer forces at most one checkpoint; catching up with
        // `next_max` may take several.
        let mut overdue = self.state.lock().checkpoint_overdue(self.settings.ttc);
        while overdue || self.state.lock().behind_next_max() {
            self.checkpoint(Some(request))?;
            overdue = false;
        }

        if self.settings.output_commit {
            if let Some(info) = request.info.as_ref() {
                self.state
                    .lock()
                    .vector_clock
                    .advance(self.owner_id, info.position_in_history);
            }
        }
        Ok(())
    }

    fn on_serve_request_after(&self, _request: &Request) -> Result<(), FtError> {
        Ok(())
    }

    fn before_restart_after_recovery(
        &self,
        info: CheckpointInfo,
        incarnation: Incarnation,
    ) -> Result<(), FtError> {
        self.restart(info, incarnation)
    }

    fn handle_ft_message(&self, message: FtMessage) -> Result<FtResponse, FtError> {
        match message {
            FtMessage::GlobalStateCompletion { last_global_state } => {
                tracing::info!(
                    entity = %self.owner_id,
                    global_state = %last_global_state,
                    "global state completed, closing history"
                );
                self.complete_global_state().map(FtResponse::History)
            }
            FtMessage::OutputCommit { up_to } => {
                self.commit_for_output(up_to).map(FtResponse::History)
            }
            FtMessage::Heartbeat => Ok(FtResponse::Liveness(if self.owner.is_alive() {
                Liveness::Alive
            } else {
                Liveness::Dead
            })),
        }
    }

    fn update_location_at_server(&self, endpoint: &EndpointRef) -> Result<(), FtError> {
        if let Err(e) = self.servers.location.update_location(self.owner_id, endpoint) {
            crate::instrumentation::METRICS.increment_transport_failures();
            tracing::error!(entity = %self.owner_id, error = %e, "unable to connect with location server");
        }
        Ok(())
    }

    fn termination(&self) -> Result<(), FtError> {
        self.servers.recovery.unregister(self.owner_id)?;
        tracing::debug!(entity = %self.owner_id, "unregistered from recovery server");
        Ok(())
    }

    fn is_a_checkpoint(&self) -> bool {
        self.checkpoint_tag.load(Ordering::Acquire)
    }
}
