use std::sync::Arc;

use crate::core::message::{AmqMessage, MessageId};
use crate::core::subscription::SubscriptionId;

/// Per-queue delivery state of an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    Available,
    Acquired(SubscriptionId),
    Dequeued,
}

/// A message's position on one queue. The message itself is shared with any
/// other queue it was routed to; the state here is private to this queue.
#[derive(Debug, Clone)]
pub struct QueueEntry {
    sequence: u64,
    message: Arc<AmqMessage>,
    state: EntryState,
    redelivered: bool,
}

impl QueueEntry {
    pub(crate) fn new(sequence: u64, message: Arc<AmqMessage>) -> Self {
        Self {
            sequence,
            message,
            state: EntryState::Available,
            redelivered: false,
        }
    }

    /// Position in the queue's enqueue order.
    #[inline]
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    #[inline]
    pub fn message(&self) -> &Arc<AmqMessage> {
        &self.message
    }

    #[inline]
    pub fn message_id(&self) -> MessageId {
        self.message.id()
    }

    #[inline]
    pub fn size(&self) -> u64 {
        self.message.size()
    }

    #[inline]
    pub fn state(&self) -> EntryState {
        self.state
    }

    #[inline]
    pub fn is_available(&self) -> bool {
        self.state == EntryState::Available
    }

    #[inline]
    pub fn is_redelivered(&self) -> bool {
        self.redelivered
    }

    pub(crate) fn acquire(&mut self, subscription: SubscriptionId) {
        self.state = EntryState::Acquired(subscription);
    }

    pub(crate) fn release(&mut self) {
        self.state = EntryState::Available;
        self.redelivered = true;
    }

    pub(crate) fn mark_dequeued(&mut self) {
        self.state = EntryState::Dequeued;
    }
}
