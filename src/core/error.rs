use thiserror::Error;

use crate::core::message::MessageId;

/// Failures reported by a [`MessageStore`](crate::core::store::MessageStore).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(String),

    #[error("message {0} is not in the store")]
    UnknownMessage(MessageId),

    #[error("message {id} is not enqueued on queue '{queue}'")]
    NotEnqueued { queue: String, id: MessageId },
}

/// Error taxonomy for every queue, message and subscription operation.
///
/// Validation failures are always raised before any state is touched.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("invalid argument: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("exclusivity violation on queue '{queue}': {reason}")]
    ExclusivityViolation { queue: String, reason: String },

    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("queue '{0}' has been deleted")]
    QueueDeleted(String),

    #[error("subscription '{0}' is closed")]
    SubscriptionClosed(String),
}

impl QueueError {
    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        QueueError::Validation(msg.into())
    }

    pub(crate) fn not_found(msg: impl Into<String>) -> Self {
        QueueError::NotFound(msg.into())
    }

    pub(crate) fn protocol(msg: impl Into<String>) -> Self {
        QueueError::ProtocolViolation(msg.into())
    }

    /// True for the store failure class; callers decide on redelivery or a connection reset.
    pub fn is_store_failure(&self) -> bool {
        matches!(self, QueueError::Store(_))
    }
}

pub type Result<T> = std::result::Result<T, QueueError>;
