use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

use tracing::warn;

use crate::core::message::{current_timestamp, AmqMessage, MessageId};
use crate::core::queue::entry::QueueEntry;
use crate::core::queue::flow::FlowControl;
use crate::core::queue::notification::{Observation, QueueLimits, QueueNotification};
use crate::core::subscription::{Subscription, SubscriptionId};

const MAX_RETAINED_NOTIFICATIONS: usize = 32;

/// Everything guarded by a queue's mutation lock. Counters, index, flow state
/// and the subscriber set change together or not at all.
#[derive(Debug)]
pub(crate) struct QueueState {
    pub(crate) name: String,
    pub(crate) entries: BTreeMap<u64, QueueEntry>,
    positions: HashMap<MessageId, u64>,
    next_sequence: u64,
    pub(crate) message_count: u64,
    pub(crate) received_count: u64,
    pub(crate) depth: u64,
    pub(crate) flow: FlowControl,
    pub(crate) limits: QueueLimits,
    pub(crate) notifications: VecDeque<QueueNotification>,
    pub(crate) subscriptions: Vec<Arc<Subscription>>,
    pub(crate) consumer_count: u64,
    pub(crate) active_consumer_count: u64,
    pub(crate) exclusive_holder: Option<SubscriptionId>,
    pub(crate) round_robin: usize,
    pub(crate) deleted: bool,
}

impl QueueState {
    pub(crate) fn new(name: String, flow: FlowControl, limits: QueueLimits) -> Self {
        Self {
            name,
            entries: BTreeMap::new(),
            positions: HashMap::new(),
            next_sequence: 1,
            message_count: 0,
            received_count: 0,
            depth: 0,
            flow,
            limits,
            notifications: VecDeque::new(),
            subscriptions: Vec::new(),
            consumer_count: 0,
            active_consumer_count: 0,
            exclusive_holder: None,
            round_robin: 0,
            deleted: false,
        }
    }

    #[inline]
    pub(crate) fn contains(&self, id: MessageId) -> bool {
        self.positions.contains_key(&id)
    }

    pub(crate) fn entry(&self, id: MessageId) -> Option<&QueueEntry> {
        self.positions.get(&id).and_then(|seq| self.entries.get(seq))
    }

    pub(crate) fn entry_mut(&mut self, id: MessageId) -> Option<&mut QueueEntry> {
        let seq = *self.positions.get(&id)?;
        self.entries.get_mut(&seq)
    }

    /// Ids in enqueue order.
    pub(crate) fn ids(&self) -> Vec<MessageId> {
        self.entries.values().map(|e| e.message_id()).collect()
    }

    /// Appends to the tail. Callers have already persisted the association.
    pub(crate) fn push(&mut self, message: Arc<AmqMessage>) -> u64 {
        let seq = self.next_sequence;
        self.next_sequence += 1;
        let id = message.id();
        let size = message.size();
        self.positions.insert(id, seq);
        self.entries.insert(seq, QueueEntry::new(seq, message));
        self.message_count += 1;
        self.received_count += 1;
        self.depth += size;
        self.flow.evaluate(self.depth);
        self.raise_alerts(id, size);
        seq
    }

    pub(crate) fn remove(&mut self, id: MessageId) -> Option<QueueEntry> {
        let seq = self.positions.remove(&id)?;
        let mut entry = self.entries.remove(&seq)?;
        self.message_count -= 1;
        self.depth -= entry.size();
        self.flow.evaluate(self.depth);
        entry.mark_dequeued();
        Some(entry)
    }

    /// Empties the index in one step. Returns how many entries were dropped.
    pub(crate) fn clear(&mut self) -> u64 {
        let removed = self.entries.len() as u64;
        self.entries.clear();
        self.positions.clear();
        self.message_count = 0;
        self.depth = 0;
        self.flow.evaluate(0);
        removed
    }

    fn oldest_available_age(&self) -> Option<u64> {
        let now = current_timestamp();
        self.entries
            .values()
            .find(|e| e.is_available())
            .map(|e| now.saturating_sub(e.message().arrival_ms()))
    }

    fn raise_alerts(&mut self, id: MessageId, size: u64) {
        let oldest_age_ms = if self.limits.max_message_age_ms > 0 {
            self.oldest_available_age()
        } else {
            None
        };
        let observation = Observation {
            message_id: id,
            message_size: size,
            message_count: self.message_count,
            depth: self.depth,
            oldest_age_ms,
        };
        for alert in self.limits.check(&observation) {
            warn!(target: "amqcore::queue", queue = %self.name, alert = ?alert, "queue threshold exceeded");
            if self.notifications.len() == MAX_RETAINED_NOTIFICATIONS {
                self.notifications.pop_front();
            }
            self.notifications.push_back(alert);
        }
    }
}
