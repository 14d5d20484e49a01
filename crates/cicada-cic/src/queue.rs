//! The entity's request queue and awaited-request placeholders.
//!
//! After a recovery, requests the entity is known to have received before
//! the failure (its committed history, plus orphan requests) are expected
//! again from their senders. A placeholder [`AwaitedRequest`] holds their
//! place in the queue so that service order is preserved; the queue blocks
//! on an unresolved placeholder until the matching request is delivered.
//!
//! The same placeholder is referenced from the queue and from the
//! manager's awaited list, hence the `Arc`.

use std::collections::VecDeque;
use std::sync::Arc;

use cicada_types::EntityId;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::message::{Envelope, MessageInfo, Request};

/// A request expected from `sender` that has not been delivered yet.
#[derive(Debug)]
pub struct AwaitedRequest {
    sender: EntityId,
    resolved: Mutex<Option<Request>>,
}

impl AwaitedRequest {
    pub fn new(sender: EntityId) -> Self {
        Self {
            sender,
            resolved: Mutex::new(None),
        }
    }

    fn with_request(sender: EntityId, request: Option<Request>) -> Self {
        Self {
            sender,
            resolved: Mutex::new(request),
        }
    }

    pub fn sender(&self) -> EntityId {
        self.sender
    }

    /// Fills the placeholder with the delivered request.
    pub fn resolve(&self, request: Request) {
        *self.resolved.lock() = Some(request);
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved.lock().is_some()
    }

    pub fn request(&self) -> Option<Request> {
        self.resolved.lock().clone()
    }

    fn take(&self) -> Option<Request> {
        self.resolved.lock().take()
    }
}

/// An element of the request queue.
#[derive(Debug, Clone)]
pub enum QueuedRequest {
    Request(Request),
    Awaited(Arc<AwaitedRequest>),
}

impl QueuedRequest {
    pub fn sender_id(&self) -> EntityId {
        match self {
            QueuedRequest::Request(request) => request.sender_id(),
            QueuedRequest::Awaited(awaited) => awaited.sender(),
        }
    }

    /// Protocol metadata of the request, if any. An unresolved placeholder
    /// has none.
    pub fn info(&self) -> Option<MessageInfo> {
        match self {
            QueuedRequest::Request(request) => request.info.clone(),
            QueuedRequest::Awaited(awaited) => awaited.request().and_then(|r| r.info),
        }
    }

    pub fn is_awaited(&self) -> bool {
        matches!(self, QueuedRequest::Awaited(_))
    }
}

/// Serializable form of a queue element, stored inside the owner snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueuedImage {
    Request(Request),
    Awaited {
        sender: EntityId,
        resolved: Option<Request>,
    },
}

/// FIFO of requests waiting to be served by the entity.
#[derive(Debug, Default)]
pub struct RequestQueue {
    inner: Mutex<VecDeque<QueuedRequest>>,
}

impl RequestQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_back(&self, entry: QueuedRequest) {
        self.inner.lock().push_back(entry);
    }

    pub fn push_request(&self, request: Request) {
        self.push_back(QueuedRequest::Request(request));
    }

    pub fn add_to_front(&self, entry: QueuedRequest) {
        self.inner.lock().push_front(entry);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Visits every element in order, allowing in-place replacement.
    pub fn for_each_mut(&self, mut f: impl FnMut(&mut QueuedRequest)) {
        for entry in self.inner.lock().iter_mut() {
            f(entry);
        }
    }

    /// Copies of the queue elements, front first.
    pub fn entries(&self) -> Vec<QueuedRequest> {
        self.inner.lock().iter().cloned().collect()
    }

    /// Pops the front request if it can be served. Returns `None` if the
    /// queue is empty or its front is a placeholder still waiting for its
    /// request.
    pub fn pop_servable(&self) -> Option<Request> {
        let mut inner = self.inner.lock();
        let blocked = matches!(
            inner.front()?,
            QueuedRequest::Awaited(awaited) if !awaited.is_resolved()
        );
        if blocked {
            return None;
        }
        match inner.pop_front()? {
            QueuedRequest::Request(request) => Some(request),
            QueuedRequest::Awaited(awaited) => awaited.take(),
        }
    }

    pub fn image(&self) -> Vec<QueuedImage> {
        self.inner
            .lock()
            .iter()
            .map(|entry| match entry {
                QueuedRequest::Request(request) => QueuedImage::Request(request.clone()),
                QueuedRequest::Awaited(awaited) => QueuedImage::Awaited {
                    sender: awaited.sender(),
                    resolved: awaited.request(),
                },
            })
            .collect()
    }

    /// Rebuilds a queue from its image. Placeholders are fresh objects; the
    /// manager re-registers them when it restarts.
    pub fn from_image(image: Vec<QueuedImage>) -> Self {
        let entries = image
            .into_iter()
            .map(|entry| match entry {
                QueuedImage::Request(request) => QueuedRequest::Request(request),
                QueuedImage::Awaited { sender, resolved } => QueuedRequest::Awaited(Arc::new(
                    AwaitedRequest::with_request(sender, resolved),
                )),
            })
            .collect();
        Self {
            inner: Mutex::new(entries),
        }
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use cicada_types::EndpointRef;

    use super::*;

    fn request_from(id: u64) -> Request {
        Request::new(
            EndpointRef::new(EntityId::new(id), "mem"),
            "work",
            Bytes::new(),
            id,
        )
    }

    #[test]
    fn unresolved_placeholder_blocks_the_queue() {
        let queue = RequestQueue::new();
        let awaited = Arc::new(AwaitedRequest::new(EntityId::new(1)));
        queue.push_back(QueuedRequest::Awaited(Arc::clone(&awaited)));
        queue.push_request(request_from(2));

        assert!(queue.pop_servable().is_none());

        awaited.resolve(request_from(1));
        assert_eq!(queue.pop_servable().unwrap().sequence, 1);
        assert_eq!(queue.pop_servable().unwrap().sequence, 2);
        assert!(queue.pop_servable().is_none());
    }

    #[test]
    fn front_insertion_is_served_first() {
        let queue = RequestQueue::new();
        queue.push_request(request_from(1));
        queue.add_to_front(QueuedRequest::Request(request_from(9)));
        assert_eq!(queue.pop_servable().unwrap().sequence, 9);
    }

    #[test]
    fn image_keeps_placeholders_and_order() {
        let queue = RequestQueue::new();
        queue.push_request(request_from(1));
        queue.push_back(QueuedRequest::Awaited(Arc::new(AwaitedRequest::new(
            EntityId::new(2),
        ))));

        let rebuilt = RequestQueue::from_image(queue.image());
        let entries = rebuilt.entries();
        assert_eq!(entries.len(), 2);
        assert!(!entries[0].is_awaited());
        assert!(entries[1].is_awaited());
        assert_eq!(entries[1].sender_id(), EntityId::new(2));
    }
}
