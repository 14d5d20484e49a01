//! # Cicada
//!
//! Fault tolerance for distributed active objects through
//! communication-induced checkpointing.
//!
//! Every fault-tolerant entity gets a manager that piggybacks protocol
//! metadata on its messages, takes checkpoints when a message reveals that
//! a peer moved past it, records the senders of delivered requests and
//! logs messages still in transit across a checkpoint line. After a
//! failure, the entity restarts from its latest checkpoint and replays
//! requests in the order they were first received.
//!
//! ```text
//! ┌──────────────┐  requests / replies   ┌──────────────┐
//! │   entity A   │ ◄───────────────────► │   entity B   │
//! │ FtManagerCic │   (MessageInfo)       │ FtManagerCic │
//! └──────┬───────┘                       └──────┬───────┘
//!        │ checkpoints, histories               │
//!        ▼                                      ▼
//! ┌─────────────────────────────────────────────────────┐
//! │     storage server · location server · recovery     │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```ignore
//! use cicada::{FtConfig, build_manager, init_tracing};
//!
//! init_tracing();
//! let config = FtConfig::load()?;
//! let manager = build_manager(&config, owner, transport, &resolver)?;
//!
//! manager.receive_request(request)?;
//! manager.serve_next(|request| dispatch(request))?;
//! ```

mod error;
mod factory;

pub use error::{CicadaError, Result};
pub use factory::{
    build_half_manager, build_manager, init_tracing, restart_manager, settings_from_config,
};

// Re-export configuration
pub use cicada_config::{ConfigError, ConfigLoader, FtConfig, ProtocolKind, ServerUrls};

// Re-export core types
pub use cicada_types::{CheckpointIndex, EndpointRef, EntityId, Incarnation};

// Re-export the protocol
pub use cicada_cic::{
    Checkpoint, CheckpointInfo, FaultToleranceManager, FtError, FtManagerCic, FtMessage,
    FtResponse, HalfFtManagerCic, HistoryUpdate, Liveness, LocationServer, ManagerSettings,
    MessageInfo, Owner, ProtocolStatus, RecoveryServer, RecoveryStatus, Rendezvous, Reply,
    Request, RequestQueue, ServerResolver, Servers, StorageServer, Transport, TransportError,
};
pub use cicada_cic::{instrumentation, memory};
