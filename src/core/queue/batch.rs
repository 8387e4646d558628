//! Applies a batch of queue operations across one or more queues atomically.
//!
//! The write locks of every queue touched are taken in a fixed order, the batch
//! is validated against what each queue would look like at that point in the
//! batch, the store effects go through a single [`MessageStore::apply`], and
//! only then are the in-memory indexes and counters updated. A validation or
//! store failure leaves every queue untouched.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::RwLockWriteGuard;
use tracing::debug;

use crate::core::error::{QueueError, Result};
use crate::core::message::{AmqMessage, MessageId};
use crate::core::queue::state::QueueState;
use crate::core::queue::Queue;
use crate::core::store::{MessageStore, StoreOp};

#[derive(Debug, Clone)]
pub(crate) enum QueueOp {
    Enqueue {
        queue: Arc<Queue>,
        message: Arc<AmqMessage>,
    },
    Dequeue {
        queue: Arc<Queue>,
        id: MessageId,
    },
    Clear {
        queue: Arc<Queue>,
    },
}

impl QueueOp {
    pub(crate) fn queue(&self) -> &Arc<Queue> {
        match self {
            QueueOp::Enqueue { queue, .. }
            | QueueOp::Dequeue { queue, .. }
            | QueueOp::Clear { queue } => queue,
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct BatchOutcome {
    /// (queue, message) pairs that were appended.
    pub enqueued: Vec<(String, MessageId)>,
    pub removed: u64,
    /// Queues skipped because they were deleted before the batch ran.
    pub skipped: Vec<String>,
}

/// Per-queue view of what the batch has done so far, layered over the live state.
#[derive(Debug, Default)]
struct Overlay {
    added: Vec<MessageId>,
    removed: HashSet<MessageId>,
    cleared: bool,
}

impl Overlay {
    fn present(&self, state: &QueueState, id: MessageId) -> bool {
        if self.added.contains(&id) {
            return true;
        }
        !self.cleared && state.contains(id) && !self.removed.contains(&id)
    }

    fn present_ids(&self, state: &QueueState) -> Vec<MessageId> {
        let mut ids: Vec<MessageId> = if self.cleared {
            Vec::new()
        } else {
            state
                .ids()
                .into_iter()
                .filter(|id| !self.removed.contains(id))
                .collect()
        };
        ids.extend(self.added.iter().copied());
        ids
    }
}

pub(crate) fn apply_batch(store: &dyn MessageStore, ops: &[QueueOp]) -> Result<BatchOutcome> {
    let mut outcome = BatchOutcome::default();
    if ops.is_empty() {
        return Ok(outcome);
    }

    let mut queues: Vec<Arc<Queue>> = Vec::new();
    for op in ops {
        if !queues.iter().any(|q| Arc::ptr_eq(q, op.queue())) {
            queues.push(Arc::clone(op.queue()));
        }
    }
    queues.sort_by(|a, b| {
        a.name()
            .cmp(b.name())
            .then_with(|| (Arc::as_ptr(a) as usize).cmp(&(Arc::as_ptr(b) as usize)))
    });
    let slots: Vec<usize> = ops
        .iter()
        .map(|op| {
            queues
                .iter()
                .position(|q| Arc::ptr_eq(q, op.queue()))
                .unwrap_or_default()
        })
        .collect();

    {
        let mut guards: Vec<RwLockWriteGuard<'_, QueueState>> =
            queues.iter().map(|q| q.state.write()).collect();
        let mut overlays: Vec<Overlay> = queues.iter().map(|_| Overlay::default()).collect();
        let mut live = vec![false; ops.len()];
        let mut store_ops = Vec::new();

        for (i, op) in ops.iter().enumerate() {
            let slot = slots[i];
            let state = &guards[slot];
            if state.deleted {
                if !outcome.skipped.contains(&state.name) {
                    outcome.skipped.push(state.name.clone());
                }
                continue;
            }
            let overlay = &mut overlays[slot];
            match op {
                QueueOp::Enqueue { message, .. } => {
                    let id = message.id();
                    if overlay.present(state, id) {
                        continue;
                    }
                    overlay.removed.remove(&id);
                    overlay.added.push(id);
                    store_ops.push(StoreOp::Enqueue {
                        queue: state.name.clone(),
                        id,
                    });
                }
                QueueOp::Dequeue { id, .. } => {
                    if !overlay.present(state, *id) {
                        return Err(QueueError::not_found(format!(
                            "message {id} is not on queue '{}'",
                            state.name
                        )));
                    }
                    overlay.added.retain(|a| a != id);
                    overlay.removed.insert(*id);
                    store_ops.push(StoreOp::Dequeue {
                        queue: state.name.clone(),
                        id: *id,
                    });
                }
                QueueOp::Clear { .. } => {
                    for id in overlay.present_ids(state) {
                        store_ops.push(StoreOp::Dequeue {
                            queue: state.name.clone(),
                            id,
                        });
                    }
                    overlay.added.clear();
                    overlay.removed.clear();
                    overlay.cleared = true;
                }
            }
            live[i] = true;
        }

        store.apply(&store_ops)?;

        for (i, op) in ops.iter().enumerate() {
            if !live[i] {
                continue;
            }
            let state = &mut guards[slots[i]];
            match op {
                QueueOp::Enqueue { message, .. } => {
                    state.push(Arc::clone(message));
                    outcome.enqueued.push((state.name.clone(), message.id()));
                }
                QueueOp::Dequeue { id, .. } => {
                    if state.remove(*id).is_some() {
                        outcome.removed += 1;
                    }
                }
                QueueOp::Clear { .. } => {
                    outcome.removed += state.clear();
                }
            }
        }
        debug!(
            target: "amqcore::txn",
            ops = ops.len(),
            store_ops = store_ops.len(),
            enqueued = outcome.enqueued.len(),
            removed = outcome.removed,
            "batch applied"
        );
    }

    for queue in &queues {
        queue.deliver_available();
    }
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::delivery_mode::DeliveryMode;
    use crate::core::exchange::ExchangeRegistry;
    use crate::core::message::{ContentHeader, MessageMetaData, PublishInfo};
    use crate::core::queue::{QueueArguments, QueueAttributes, QueueContext};
    use crate::core::store::MemoryMessageStore;
    use bytes::Bytes;

    fn queue(store: &Arc<MemoryMessageStore>, name: &str) -> Arc<Queue> {
        let ctx = QueueContext {
            store: store.clone(),
            exchanges: Arc::new(ExchangeRegistry::new()),
        };
        Queue::new(name, QueueAttributes::default(), QueueArguments::default(), ctx).unwrap()
    }

    fn message(store: &MemoryMessageStore, size: u64) -> Arc<AmqMessage> {
        let id = store.next_message_id();
        let metadata = MessageMetaData {
            publish: PublishInfo::new("", "k"),
            header: ContentHeader::new(size, DeliveryMode::NonPersistent),
            arrival_ms: 0,
        };
        store.put_metadata(id, metadata.clone()).unwrap();
        Arc::new(AmqMessage::new(id, metadata, Bytes::new()))
    }

    #[test]
    fn duplicate_enqueue_in_one_batch_is_skipped() {
        let store = Arc::new(MemoryMessageStore::new());
        let q = queue(&store, "q");
        let m = message(&store, 10);
        let ops = [
            QueueOp::Enqueue { queue: q.clone(), message: m.clone() },
            QueueOp::Enqueue { queue: q.clone(), message: m.clone() },
        ];
        let outcome = apply_batch(store.as_ref(), &ops).unwrap();
        assert_eq!(outcome.enqueued.len(), 1);
        assert_eq!(q.message_count(), 1);
        assert_eq!(store.reference_count(m.id()), 1);
    }

    #[test]
    fn invalid_op_rolls_back_the_whole_batch() {
        let store = Arc::new(MemoryMessageStore::new());
        let a = queue(&store, "a");
        let b = queue(&store, "b");
        let m = message(&store, 10);
        let ops = [
            QueueOp::Enqueue { queue: a.clone(), message: m.clone() },
            QueueOp::Dequeue { queue: b.clone(), id: 42 },
        ];
        assert!(matches!(
            apply_batch(store.as_ref(), &ops),
            Err(QueueError::NotFound(_))
        ));
        assert_eq!(a.message_count(), 0);
        assert_eq!(store.reference_count(m.id()), 0);
    }

    #[test]
    fn enqueue_then_dequeue_in_one_batch_nets_out() {
        let store = Arc::new(MemoryMessageStore::new());
        let q = queue(&store, "q");
        let m = message(&store, 10);
        let ops = [
            QueueOp::Enqueue { queue: q.clone(), message: m.clone() },
            QueueOp::Dequeue { queue: q.clone(), id: m.id() },
        ];
        let outcome = apply_batch(store.as_ref(), &ops).unwrap();
        assert_eq!(outcome.removed, 1);
        assert_eq!(q.message_count(), 0);
        assert_eq!(q.received_message_count(), 1);
        assert_eq!(q.queue_depth(), 0);
        assert_eq!(store.metadata_count(), 0);
    }

    #[test]
    fn store_failure_leaves_queues_untouched() {
        let store = Arc::new(MemoryMessageStore::new());
        let q = queue(&store, "q");
        let m = message(&store, 10);
        store.set_failing(true);
        let err = apply_batch(
            store.as_ref(),
            &[QueueOp::Enqueue { queue: q.clone(), message: m }],
        )
        .unwrap_err();
        assert!(err.is_store_failure());
        assert_eq!(q.received_message_count(), 0);
    }
}
