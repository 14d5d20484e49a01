//! # cicada-cic: Communication-induced checkpointing
//!
//! Fault tolerance for distributed active objects. Every entity takes
//! independent checkpoints; the messages it exchanges carry enough
//! metadata to force extra checkpoints so that the latest checkpoints of
//! all entities always form a consistent recovery line.
//!
//! The main pieces are:
//!
//! - [`FtManagerCic`]: the manager attached to each fault-tolerant entity,
//!   called around every receive, delivery, serve and send.
//! - [`HalfFtManagerCic`]: the manager of a caller that is not fault
//!   tolerant itself.
//! - [`History`] and [`LogBook`]: the reception history and the in-transit
//!   message logs replayed by a recovery.
//! - The collaborator traits in [`servers`](StorageServer) and their
//!   in-process implementations in [`memory`].
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//!
//! let cluster = MemoryCluster::new();
//! let owner = Arc::new(MemoryOwner::new(endpoint));
//! let manager = FtManagerCic::init(owner, cluster.servers(), transport, ManagerSettings::default())?;
//!
//! manager.receive_request(request)?;
//! manager.serve_next(|request| handle(request))?;
//! ```

mod checkpoint;
mod error;
mod history;
pub mod instrumentation;
mod log;
mod manager;
pub mod memory;
mod message;
mod queue;
mod servers;

pub use checkpoint::{Checkpoint, CheckpointInfo};
pub use error::{FtError, TransportError};
pub use history::{History, HistoryUpdate};
pub use instrumentation::{METRICS, MetricsSnapshot};
pub use log::{LogBook, ReplyLog, RequestLog};
pub use manager::{
    DEFAULT_TTC, FaultToleranceManager, FtManagerCic, HalfFtManagerCic, ManagerSettings,
    ProtocolStatus, TIME_TO_RESEND,
};
pub use message::{
    Admission, Envelope, FtMessage, FtResponse, Liveness, MessageInfo, Rendezvous, Reply, Request,
    VectorClock,
};
pub use queue::{AwaitedRequest, QueuedImage, QueuedRequest, RequestQueue};
pub use servers::{
    LocationServer, Owner, RecoveryServer, RecoveryStatus, ServerResolver, Servers, StorageServer,
    Transport,
};
