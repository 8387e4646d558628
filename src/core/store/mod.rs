//! Message persistence contract consumed by the queue core.
//!
//! A store keeps message metadata and content keyed by [`MessageId`], plus the
//! association of each message with the queues it is enqueued on. Queue-level
//! effects are submitted as a batch of [`StoreOp`]s through [`MessageStore::apply`],
//! which must be all-or-nothing.

pub mod memory;

pub use memory::MemoryMessageStore;

use std::fmt::Debug;

use bytes::Bytes;

use crate::core::error::StoreError;
use crate::core::message::{MessageId, MessageMetaData};

/// One queue-association change inside a store batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOp {
    Enqueue { queue: String, id: MessageId },
    /// Drops the association. The message itself is removed once no queue references it.
    Dequeue { queue: String, id: MessageId },
}

impl StoreOp {
    pub fn id(&self) -> MessageId {
        match self {
            StoreOp::Enqueue { id, .. } | StoreOp::Dequeue { id, .. } => *id,
        }
    }

    pub fn queue(&self) -> &str {
        match self {
            StoreOp::Enqueue { queue, .. } | StoreOp::Dequeue { queue, .. } => queue,
        }
    }
}

/// Durable key-value persistence for messages.
///
/// Implementations must be thread-safe; the core never retries a failed call.
pub trait MessageStore: Send + Sync + Debug {
    /// Allocates a fresh identifier, strictly greater than every earlier one.
    fn next_message_id(&self) -> MessageId;

    fn put_metadata(&self, id: MessageId, metadata: MessageMetaData) -> Result<(), StoreError>;

    /// Appends a content chunk. `offset` is the number of body bytes already stored.
    fn put_content(&self, id: MessageId, offset: u64, chunk: &Bytes) -> Result<(), StoreError>;

    fn get_metadata(&self, id: MessageId) -> Result<Option<MessageMetaData>, StoreError>;

    fn get_content(&self, id: MessageId) -> Result<Option<Bytes>, StoreError>;

    /// Removes a message and every queue association it still has.
    fn remove(&self, id: MessageId) -> Result<(), StoreError>;

    /// Ids currently associated with `queue`, in enqueue order.
    fn list_ids(&self, queue: &str) -> Result<Vec<MessageId>, StoreError>;

    /// Number of queues the message is currently enqueued on.
    fn reference_count(&self, id: MessageId) -> usize;

    /// Applies a batch atomically: either every op takes effect or none does.
    fn apply(&self, ops: &[StoreOp]) -> Result<(), StoreError>;
}
