//! Commit/rollback boundaries for queue operations.
//!
//! [`NonTransactionalContext`] applies every call immediately (auto-commit).
//! [`LocalTransactionalContext`] buffers calls and applies them as one atomic
//! batch on [`commit`](TransactionalContext::commit); `rollback` throws the
//! buffer away. Either way, a message whose last queue association is gone
//! when the context finishes is removed from the store.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::core::error::{QueueError, Result};
use crate::core::message::{AmqMessage, MessageId};
use crate::core::queue::batch::{apply_batch, QueueOp};
use crate::core::queue::Queue;
use crate::core::store::MessageStore;

pub trait TransactionalContext: Send + fmt::Debug {
    /// Enqueues `message` on each queue. Returns the names of the queues that
    /// accepted it; deleted queues are skipped.
    fn enqueue(&mut self, queues: &[Arc<Queue>], message: &Arc<AmqMessage>) -> Result<Vec<String>>;

    fn dequeue(&mut self, queue: &Arc<Queue>, id: MessageId) -> Result<()>;

    /// Empties `queue`. Returns the number removed, or 0 if the clear is deferred.
    fn clear(&mut self, queue: &Arc<Queue>) -> Result<u64>;

    fn commit(&mut self) -> Result<()>;

    fn rollback(&mut self) -> Result<()>;

    fn is_transactional(&self) -> bool;
}

/// Drops any of `ids` that no queue references any more.
fn remove_orphans(store: &dyn MessageStore, ids: impl IntoIterator<Item = MessageId>) {
    for id in ids {
        if store.reference_count(id) == 0 {
            if let Err(err) = store.remove(id) {
                warn!(target: "amqcore::txn", message_id = id, error = %err, "failed to remove orphaned message");
            }
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Auto-commit
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct NonTransactionalContext {
    store: Arc<dyn MessageStore>,
}

impl NonTransactionalContext {
    pub fn new(store: Arc<dyn MessageStore>) -> Self {
        Self { store }
    }
}

impl TransactionalContext for NonTransactionalContext {
    fn enqueue(&mut self, queues: &[Arc<Queue>], message: &Arc<AmqMessage>) -> Result<Vec<String>> {
        let ops: Vec<QueueOp> = queues
            .iter()
            .map(|queue| QueueOp::Enqueue {
                queue: Arc::clone(queue),
                message: Arc::clone(message),
            })
            .collect();
        let outcome = apply_batch(self.store.as_ref(), &ops)?;
        Ok(outcome.enqueued.into_iter().map(|(queue, _)| queue).collect())
    }

    fn dequeue(&mut self, queue: &Arc<Queue>, id: MessageId) -> Result<()> {
        apply_batch(
            self.store.as_ref(),
            &[QueueOp::Dequeue {
                queue: Arc::clone(queue),
                id,
            }],
        )?;
        Ok(())
    }

    fn clear(&mut self, queue: &Arc<Queue>) -> Result<u64> {
        let outcome = apply_batch(
            self.store.as_ref(),
            &[QueueOp::Clear {
                queue: Arc::clone(queue),
            }],
        )?;
        Ok(outcome.removed)
    }

    fn commit(&mut self) -> Result<()> {
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        Ok(())
    }

    fn is_transactional(&self) -> bool {
        false
    }
}

// ───────────────────────────────────────────────────────────────
// Deferred
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxnState {
    Open,
    Committed,
    RolledBack,
}

/// Buffers operations until commit. Single use: once committed or rolled back
/// every further call is a protocol violation.
pub struct LocalTransactionalContext {
    store: Arc<dyn MessageStore>,
    pending: Vec<QueueOp>,
    state: TxnState,
}

impl fmt::Debug for LocalTransactionalContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalTransactionalContext")
            .field("pending", &self.pending.len())
            .field("state", &self.state)
            .finish()
    }
}

impl LocalTransactionalContext {
    pub fn new(store: Arc<dyn MessageStore>) -> Self {
        Self {
            store,
            pending: Vec::new(),
            state: TxnState::Open,
        }
    }

    /// Operations buffered so far.
    pub fn pending_operations(&self) -> usize {
        self.pending.len()
    }

    pub fn is_open(&self) -> bool {
        self.state == TxnState::Open
    }

    fn ensure_open(&self) -> Result<()> {
        match self.state {
            TxnState::Open => Ok(()),
            TxnState::Committed => Err(QueueError::protocol("transaction already committed")),
            TxnState::RolledBack => Err(QueueError::protocol("transaction already rolled back")),
        }
    }

    fn enqueued_ids(ops: &[QueueOp]) -> Vec<MessageId> {
        let mut ids: Vec<MessageId> = ops
            .iter()
            .filter_map(|op| match op {
                QueueOp::Enqueue { message, .. } => Some(message.id()),
                _ => None,
            })
            .collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    /// Rolled-back acknowledgements leave their entries acquired by nobody;
    /// hand those back for redelivery.
    fn requeue_discarded(ops: &[QueueOp]) {
        let mut touched: Vec<&Arc<Queue>> = Vec::new();
        for op in ops {
            if let QueueOp::Dequeue { queue, id } = op {
                queue.requeue_unheld(*id);
                if !touched.iter().any(|q| Arc::ptr_eq(q, queue)) {
                    touched.push(queue);
                }
            }
        }
        for queue in touched {
            queue.deliver_available();
        }
    }
}

impl TransactionalContext for LocalTransactionalContext {
    fn enqueue(&mut self, queues: &[Arc<Queue>], message: &Arc<AmqMessage>) -> Result<Vec<String>> {
        self.ensure_open()?;
        let mut accepted = Vec::with_capacity(queues.len());
        for queue in queues {
            if queue.is_deleted() {
                continue;
            }
            accepted.push(queue.name().to_string());
            self.pending.push(QueueOp::Enqueue {
                queue: Arc::clone(queue),
                message: Arc::clone(message),
            });
        }
        Ok(accepted)
    }

    fn dequeue(&mut self, queue: &Arc<Queue>, id: MessageId) -> Result<()> {
        self.ensure_open()?;
        let duplicate = self.pending.iter().any(|op| match op {
            QueueOp::Dequeue { queue: q, id: pending } => Arc::ptr_eq(q, queue) && *pending == id,
            _ => false,
        });
        if duplicate {
            return Err(QueueError::protocol(format!(
                "message {id} already dequeued from '{}' in this transaction",
                queue.name()
            )));
        }
        self.pending.push(QueueOp::Dequeue {
            queue: Arc::clone(queue),
            id,
        });
        Ok(())
    }

    fn clear(&mut self, queue: &Arc<Queue>) -> Result<u64> {
        self.ensure_open()?;
        self.pending.push(QueueOp::Clear {
            queue: Arc::clone(queue),
        });
        Ok(0)
    }

    fn commit(&mut self) -> Result<()> {
        self.ensure_open()?;
        let ops = std::mem::take(&mut self.pending);
        let result = apply_batch(self.store.as_ref(), &ops);
        remove_orphans(self.store.as_ref(), Self::enqueued_ids(&ops));
        match result {
            Ok(outcome) => {
                self.state = TxnState::Committed;
                debug!(
                    target: "amqcore::txn",
                    ops = ops.len(),
                    enqueued = outcome.enqueued.len(),
                    removed = outcome.removed,
                    "transaction committed"
                );
                Ok(())
            }
            Err(err) => {
                self.state = TxnState::RolledBack;
                Self::requeue_discarded(&ops);
                warn!(target: "amqcore::txn", ops = ops.len(), error = %err, "commit failed, transaction rolled back");
                Err(err)
            }
        }
    }

    fn rollback(&mut self) -> Result<()> {
        self.ensure_open()?;
        let ops = std::mem::take(&mut self.pending);
        self.state = TxnState::RolledBack;
        remove_orphans(self.store.as_ref(), Self::enqueued_ids(&ops));
        Self::requeue_discarded(&ops);
        debug!(target: "amqcore::txn", ops = ops.len(), "transaction rolled back");
        Ok(())
    }

    fn is_transactional(&self) -> bool {
        true
    }
}

impl Drop for LocalTransactionalContext {
    fn drop(&mut self) {
        if self.state == TxnState::Open && !self.pending.is_empty() {
            let ops = std::mem::take(&mut self.pending);
            remove_orphans(self.store.as_ref(), Self::enqueued_ids(&ops));
            Self::requeue_discarded(&ops);
            debug!(target: "amqcore::txn", ops = ops.len(), "open transaction dropped, discarding");
        }
    }
}
