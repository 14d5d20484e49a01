//! Checkpoints shipped to the storage server.

use bytes::Bytes;
use cicada_types::{CheckpointIndex, EntityId};
use serde::{Deserialize, Serialize};

use crate::error::TransportError;
use crate::log::{ReplyLog, RequestLog};
use crate::message::Request;

/// Protocol data attached to a checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointInfo {
    pub checkpoint_index: CheckpointIndex,
    /// Request being served when the checkpoint was taken.
    pub pending_request: Option<Request>,
    /// In-transit requests to resend if the entity recovers from this
    /// checkpoint.
    pub request_logs: Vec<RequestLog>,
    pub reply_logs: Vec<ReplyLog>,
    /// Delivered request count at checkpoint time.
    pub last_received_request: u64,
    /// Senders of the requests delivered after the checkpoint, filled in by
    /// the storage server from the committed histories before a recovery.
    pub history: Vec<EntityId>,
    /// End of the recoverable committed history, filled in by the storage
    /// server before a recovery.
    pub last_committed: u64,
}

impl CheckpointInfo {
    pub fn new(checkpoint_index: CheckpointIndex) -> Self {
        Self {
            checkpoint_index,
            pending_request: None,
            request_logs: Vec::new(),
            reply_logs: Vec::new(),
            last_received_request: 0,
            history: Vec::new(),
            last_committed: 0,
        }
    }
}

/// A snapshot of an entity plus its protocol data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub owner: EntityId,
    /// Owner state as produced by its snapshot hook.
    pub state: Bytes,
    pub info: CheckpointInfo,
}

impl Checkpoint {
    pub fn index(&self) -> CheckpointIndex {
        self.info.checkpoint_index
    }

    /// Serializes checkpoint to bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, TransportError> {
        Ok(postcard::to_allocvec(self)?)
    }

    /// Deserializes checkpoint from bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TransportError> {
        Ok(postcard::from_bytes(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use cicada_types::EndpointRef;

    use super::*;

    #[test]
    fn checkpoint_survives_encoding() {
        let sender = EndpointRef::new(EntityId::new(4), "mem://4");
        let mut info = CheckpointInfo::new(CheckpointIndex::new(3));
        info.pending_request = Some(Request::new(sender.clone(), "m", Bytes::from_static(b"a"), 1));
        info.request_logs.push(RequestLog {
            request: Request::new(sender.clone(), "n", Bytes::from_static(b"b"), 2),
            destination: sender,
        });
        info.last_received_request = 12;

        let checkpoint = Checkpoint {
            owner: EntityId::new(1),
            state: Bytes::from_static(b"state"),
            info,
        };

        let bytes = checkpoint.to_bytes().unwrap();
        let decoded = Checkpoint::from_bytes(&bytes).unwrap();
        assert_eq!(decoded, checkpoint);
        assert_eq!(decoded.index(), CheckpointIndex::new(3));
    }

    #[test]
    fn truncated_bytes_are_a_codec_error() {
        let checkpoint = Checkpoint {
            owner: EntityId::new(1),
            state: Bytes::from_static(b"state"),
            info: CheckpointInfo::new(CheckpointIndex::new(1)),
        };
        let bytes = checkpoint.to_bytes().unwrap();
        let err = Checkpoint::from_bytes(&bytes[..bytes.len() / 2]).unwrap_err();
        assert!(matches!(err, TransportError::Codec(_)));
    }
}
