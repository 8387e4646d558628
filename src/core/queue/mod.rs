//! Queue engine.
//!
//! A [`Queue`] is an ordered, durable sequence of [`QueueEntry`]s plus its
//! subscriber set and flow-control state. All counters live in a single
//! [`QueueState`] behind one `RwLock`: mutations take the write lock, the
//! management views take the read lock and therefore always see one
//! consistent point in time.

pub mod entry;
pub mod flow;
pub mod notification;
pub mod range;
pub mod registry;

pub(crate) mod batch;
pub(crate) mod state;

pub use entry::{EntryState, QueueEntry};
pub use flow::{FlowControl, FlowState};
pub use notification::{QueueLimits, QueueNotification};
pub use range::MessageRange;
pub use registry::QueueRegistry;

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info};

use crate::core::channel::ProducerChannel;
use crate::core::error::{QueueError, Result};
use crate::core::exchange::{Exchange, ExchangeRegistry};
use crate::core::message::{AmqMessage, MessageId, MessageMetaData};
use crate::core::store::{MessageStore, StoreOp};
use crate::core::subscription::{Offer, Subscription};
use crate::core::txn::TransactionalContext;

use state::QueueState;

/// Declare-time identity flags.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueAttributes {
    pub durable: bool,
    pub auto_delete: bool,
    pub exclusive: bool,
    pub owner: Option<String>,
}

/// Tunables applied when a queue is declared.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueArguments {
    /// Depth in bytes at which producers get blocked. `0` disables flow control.
    pub capacity: u64,
    /// Depth in bytes at or below which blocked producers are released.
    pub flow_resume_capacity: u64,
    pub limits: QueueLimits,
}

/// Collaborators a queue needs, handed in explicitly by the virtual host.
#[derive(Debug, Clone)]
pub struct QueueContext {
    pub store: Arc<dyn MessageStore>,
    pub exchanges: Arc<ExchangeRegistry>,
}

/// Point-in-time summary of one entry, for management views.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessageSnapshot {
    /// 1-based position in the queue at the time of the view.
    pub position: u64,
    pub id: MessageId,
    pub routing_key: String,
    pub size: u64,
    pub persistent: bool,
    pub redelivered: bool,
    pub acquired: bool,
    pub arrival_ms: u64,
}

/// Metadata and body of one message as held by the store.
#[derive(Debug, Clone)]
pub struct MessageContent {
    pub id: MessageId,
    pub metadata: MessageMetaData,
    pub content: Bytes,
}

/// Counters read under a single lock acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub message_count: u64,
    pub received_message_count: u64,
    pub queue_depth: u64,
    pub consumer_count: u64,
    pub active_consumer_count: u64,
    pub capacity: u64,
    pub flow_resume_capacity: u64,
    pub flow_overfull: bool,
}

#[derive(Debug)]
pub struct Queue {
    name: String,
    attributes: QueueAttributes,
    store: Arc<dyn MessageStore>,
    exchanges: Arc<ExchangeRegistry>,
    pub(crate) state: RwLock<QueueState>,
    alternate_exchange: RwLock<Option<Arc<Exchange>>>,
}

impl Queue {
    pub fn new(
        name: impl Into<String>,
        attributes: QueueAttributes,
        arguments: QueueArguments,
        context: QueueContext,
    ) -> Result<Arc<Self>> {
        let name = name.into();
        let flow = FlowControl::new(
            name.clone(),
            arguments.capacity,
            arguments.flow_resume_capacity,
        )?;
        let state = QueueState::new(name.clone(), flow, arguments.limits);
        debug!(target: "amqcore::queue", queue = %name, durable = attributes.durable, "queue created");
        Ok(Arc::new(Self {
            name,
            attributes,
            store: context.store,
            exchanges: context.exchanges,
            state: RwLock::new(state),
            alternate_exchange: RwLock::new(None),
        }))
    }

    // ───────────────────────────────────────────────────────────
    // Identity
    // ───────────────────────────────────────────────────────────

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn attributes(&self) -> &QueueAttributes {
        &self.attributes
    }

    pub fn is_durable(&self) -> bool {
        self.attributes.durable
    }

    pub fn is_auto_delete(&self) -> bool {
        self.attributes.auto_delete
    }

    pub fn is_exclusive(&self) -> bool {
        self.attributes.exclusive
    }

    pub fn owner(&self) -> Option<&str> {
        self.attributes.owner.as_deref()
    }

    pub fn is_deleted(&self) -> bool {
        self.state.read().deleted
    }

    // ───────────────────────────────────────────────────────────
    // Counters
    // ───────────────────────────────────────────────────────────

    pub fn message_count(&self) -> u64 {
        self.state.read().message_count
    }

    pub fn received_message_count(&self) -> u64 {
        self.state.read().received_count
    }

    pub fn queue_depth(&self) -> u64 {
        self.state.read().depth
    }

    pub fn consumer_count(&self) -> u64 {
        self.state.read().consumer_count
    }

    pub fn active_consumer_count(&self) -> u64 {
        self.state.read().active_consumer_count
    }

    pub fn stats(&self) -> QueueStats {
        let state = self.state.read();
        QueueStats {
            message_count: state.message_count,
            received_message_count: state.received_count,
            queue_depth: state.depth,
            consumer_count: state.consumer_count,
            active_consumer_count: state.active_consumer_count,
            capacity: state.flow.capacity(),
            flow_resume_capacity: state.flow.flow_resume_capacity(),
            flow_overfull: state.flow.is_overfull(),
        }
    }

    /// Ids currently on the queue, in enqueue order.
    pub fn message_ids(&self) -> Vec<MessageId> {
        self.state.read().ids()
    }

    // ───────────────────────────────────────────────────────────
    // Enqueue / dequeue
    // ───────────────────────────────────────────────────────────

    /// Appends `message` under `txn`. Returns false if the queue was deleted
    /// (or already holds the message) and the enqueue was skipped.
    pub fn enqueue(
        self: &Arc<Self>,
        message: &Arc<AmqMessage>,
        txn: &mut dyn TransactionalContext,
    ) -> Result<bool> {
        let accepted = txn.enqueue(std::slice::from_ref(self), message)?;
        Ok(!accepted.is_empty())
    }

    /// Removes the entry for `id` under `txn`, whatever its delivery state.
    pub fn dequeue(
        self: &Arc<Self>,
        id: MessageId,
        txn: &mut dyn TransactionalContext,
    ) -> Result<()> {
        {
            let state = self.state.read();
            self.ensure_live(&state)?;
            if !state.contains(id) {
                return Err(self.missing(id));
            }
        }
        txn.dequeue(self, id)
    }

    /// Consumer acknowledgement: the entry must be held by `subscription`.
    /// Credit is returned to the subscription even if the entry has since
    /// been removed by a management operation.
    pub fn acknowledge(
        self: &Arc<Self>,
        subscription: &Subscription,
        id: MessageId,
        txn: &mut dyn TransactionalContext,
    ) -> Result<()> {
        let checked = {
            let state = self.state.read();
            self.ensure_live(&state).and_then(|_| match state.entry(id) {
                None => Err(self.missing(id)),
                Some(e) if e.state() == EntryState::Acquired(subscription.id()) => Ok(()),
                Some(_) => Err(QueueError::protocol(format!(
                    "message {id} is not held by consumer '{}'",
                    subscription.consumer_tag()
                ))),
            })
        };
        if let Err(err) = checked {
            if matches!(err, QueueError::NotFound(_)) {
                subscription.settle(id);
            }
            return Err(err);
        }
        subscription.settle(id);
        txn.dequeue(self, id)?;
        self.deliver_available();
        Ok(())
    }

    /// Hands an acquired entry back for redelivery.
    pub fn release(&self, subscription: &Subscription, id: MessageId) -> Result<()> {
        {
            let mut state = self.state.write();
            self.ensure_live(&state)?;
            match state.entry_mut(id) {
                Some(e) if e.state() == EntryState::Acquired(subscription.id()) => e.release(),
                Some(_) => {
                    return Err(QueueError::protocol(format!(
                        "message {id} is not held by consumer '{}'",
                        subscription.consumer_tag()
                    )))
                }
                None => return Err(self.missing(id)),
            }
        }
        subscription.settle(id);
        self.deliver_available();
        Ok(())
    }

    /// Makes `id` available again if it is acquired by a subscription that no
    /// longer tracks it, as after a rolled-back acknowledgement.
    pub(crate) fn requeue_unheld(&self, id: MessageId) {
        let mut state = self.state.write();
        let Some(EntryState::Acquired(holder)) = state.entry(id).map(|e| e.state()) else {
            return;
        };
        let held = state
            .subscriptions
            .iter()
            .any(|s| s.id() == holder && s.holds(id));
        if !held {
            if let Some(entry) = state.entry_mut(id) {
                entry.release();
            }
        }
    }

    // ───────────────────────────────────────────────────────────
    // Bulk management operations
    // ───────────────────────────────────────────────────────────

    /// Removes the oldest available entry. Empty queue: `Ok(None)`.
    pub fn delete_message_from_top(&self) -> Result<Option<MessageId>> {
        let mut state = self.state.write();
        self.ensure_live(&state)?;
        let Some(id) = state
            .entries
            .values()
            .find(|e| e.is_available())
            .map(|e| e.message_id())
        else {
            return Ok(None);
        };
        self.store.apply(&[StoreOp::Dequeue {
            queue: self.name.clone(),
            id,
        }])?;
        state.remove(id);
        debug!(target: "amqcore::queue", queue = %self.name, message_id = id, "deleted message from top");
        Ok(Some(id))
    }

    /// Empties the queue and its store associations together. With a deferred
    /// context the clear happens at commit and `Ok(0)` is returned now.
    pub fn clear_queue(self: &Arc<Self>, txn: &mut dyn TransactionalContext) -> Result<u64> {
        self.ensure_live(&self.state.read())?;
        let removed = txn.clear(self)?;
        if removed > 0 {
            info!(target: "amqcore::queue", queue = %self.name, removed, "queue cleared");
        }
        Ok(removed)
    }

    /// Deletes every available entry whose id lies in `[from, to]`. Acquired
    /// entries are left to finish their delivery.
    pub fn delete_messages(&self, from: i64, to: i64) -> Result<u64> {
        let range = MessageRange::new(from, to)?;
        let mut state = self.state.write();
        self.ensure_live(&state)?;
        let doomed: Vec<MessageId> = state
            .entries
            .values()
            .filter(|e| e.is_available() && range.contains(e.message_id()))
            .map(|e| e.message_id())
            .collect();
        if doomed.is_empty() {
            return Ok(0);
        }
        let ops: Vec<StoreOp> = doomed
            .iter()
            .map(|&id| StoreOp::Dequeue {
                queue: self.name.clone(),
                id,
            })
            .collect();
        self.store.apply(&ops)?;
        for id in &doomed {
            state.remove(*id);
        }
        info!(
            target: "amqcore::queue",
            queue = %self.name,
            from,
            to,
            removed = doomed.len(),
            "messages deleted by range"
        );
        Ok(doomed.len() as u64)
    }

    pub fn view_messages(&self, from: i64, to: i64) -> Result<Vec<MessageSnapshot>> {
        let range = MessageRange::new(from, to)?;
        let state = self.state.read();
        self.ensure_live(&state)?;
        Ok(state
            .entries
            .values()
            .enumerate()
            .filter(|(_, e)| range.contains(e.message_id()))
            .map(|(i, e)| {
                let message = e.message();
                MessageSnapshot {
                    position: i as u64 + 1,
                    id: message.id(),
                    routing_key: message.routing_key().to_string(),
                    size: message.size(),
                    persistent: message.is_persistent(),
                    redelivered: e.is_redelivered(),
                    acquired: matches!(e.state(), EntryState::Acquired(_)),
                    arrival_ms: message.arrival_ms(),
                }
            })
            .collect())
    }

    pub fn view_message_content(&self, id: MessageId) -> Result<MessageContent> {
        let state = self.state.read();
        self.ensure_live(&state)?;
        if !state.contains(id) {
            return Err(self.missing(id));
        }
        let metadata = self
            .store
            .get_metadata(id)?
            .ok_or_else(|| self.missing(id))?;
        let content = self.store.get_content(id)?.ok_or_else(|| self.missing(id))?;
        Ok(MessageContent {
            id,
            metadata,
            content,
        })
    }

    // ───────────────────────────────────────────────────────────
    // Flow control
    // ───────────────────────────────────────────────────────────

    /// Evaluates flow control; if overfull, `channel` is marked blocking and
    /// will be released when the queue drains to its resume capacity.
    pub fn check_capacity(&self, channel: &Arc<ProducerChannel>) -> bool {
        let mut state = self.state.write();
        let depth = state.depth;
        state.flow.check_capacity(depth, channel)
    }

    pub fn capacity(&self) -> u64 {
        self.state.read().flow.capacity()
    }

    pub fn set_capacity(&self, capacity: u64) -> Result<()> {
        let mut state = self.state.write();
        let depth = state.depth;
        state.flow.set_capacity(capacity, depth)
    }

    pub fn flow_resume_capacity(&self) -> u64 {
        self.state.read().flow.flow_resume_capacity()
    }

    pub fn set_flow_resume_capacity(&self, resume: u64) -> Result<()> {
        let mut state = self.state.write();
        let depth = state.depth;
        state.flow.set_flow_resume_capacity(resume, depth)
    }

    pub fn is_flow_overfull(&self) -> bool {
        self.state.read().flow.is_overfull()
    }

    // ───────────────────────────────────────────────────────────
    // Alert thresholds
    // ───────────────────────────────────────────────────────────

    pub fn limits(&self) -> QueueLimits {
        self.state.read().limits
    }

    pub fn set_maximum_message_count(&self, value: u64) {
        self.state.write().limits.max_message_count = value;
    }

    pub fn set_maximum_message_size(&self, value: u64) {
        self.state.write().limits.max_message_size = value;
    }

    pub fn set_maximum_queue_depth(&self, value: u64) {
        self.state.write().limits.max_queue_depth = value;
    }

    pub fn set_maximum_message_age(&self, value_ms: u64) {
        self.state.write().limits.max_message_age_ms = value_ms;
    }

    /// Most recent threshold alerts, oldest first.
    pub fn recent_notifications(&self) -> Vec<QueueNotification> {
        self.state.read().notifications.iter().cloned().collect()
    }

    // ───────────────────────────────────────────────────────────
    // Alternate exchange
    // ───────────────────────────────────────────────────────────

    pub fn alternate_exchange(&self) -> Option<Arc<Exchange>> {
        self.alternate_exchange.read().clone()
    }

    /// `None` or `""` clears. A name is resolved now and never re-checked.
    pub fn set_alternate_exchange(&self, name: Option<&str>) -> Result<()> {
        let resolved = match name {
            None | Some("") => None,
            Some(name) => Some(
                self.exchanges
                    .get(name)
                    .ok_or_else(|| QueueError::not_found(format!("exchange '{name}'")))?,
            ),
        };
        debug!(
            target: "amqcore::queue",
            queue = %self.name,
            alternate = resolved.as_ref().map(|e| e.name()).unwrap_or("<none>"),
            "alternate exchange set"
        );
        *self.alternate_exchange.write() = resolved;
        Ok(())
    }

    // ───────────────────────────────────────────────────────────
    // Subscriptions & dispatch
    // ───────────────────────────────────────────────────────────

    pub fn register_subscription(
        self: &Arc<Self>,
        subscription: &Arc<Subscription>,
        exclusive: bool,
    ) -> Result<()> {
        {
            let mut state = self.state.write();
            self.ensure_live(&state)?;
            if state.exclusive_holder.is_some() {
                return Err(QueueError::ExclusivityViolation {
                    queue: self.name.clone(),
                    reason: "queue already has an exclusive consumer".into(),
                });
            }
            if exclusive && state.active_consumer_count > 0 {
                return Err(QueueError::ExclusivityViolation {
                    queue: self.name.clone(),
                    reason: format!(
                        "cannot consume exclusively: {} active consumer(s)",
                        state.active_consumer_count
                    ),
                });
            }
            subscription.bind(Arc::downgrade(self), exclusive)?;
            state.subscriptions.push(Arc::clone(subscription));
            state.consumer_count += 1;
            state.active_consumer_count += 1;
            if exclusive {
                state.exclusive_holder = Some(subscription.id());
            }
        }
        debug!(
            target: "amqcore::queue",
            queue = %self.name,
            consumer_tag = %subscription.consumer_tag(),
            exclusive,
            browser = subscription.is_browser(),
            "subscription registered"
        );
        self.deliver_available();
        Ok(())
    }

    /// Re-runs dispatch, e.g. after a consumer's credit limits were raised.
    pub fn dispatch(&self) {
        self.deliver_available();
    }

    /// Called by [`Subscription::close`]: drops it from the active set and puts
    /// every unacknowledged entry it held back up for delivery.
    pub(crate) fn subscription_closed(&self, subscription: &Subscription) {
        let released = {
            let mut state = self.state.write();
            let Some(pos) = state
                .subscriptions
                .iter()
                .position(|s| s.id() == subscription.id())
            else {
                return;
            };
            state.subscriptions.remove(pos);
            state.active_consumer_count = state.active_consumer_count.saturating_sub(1);
            if state.exclusive_holder == Some(subscription.id()) {
                state.exclusive_holder = None;
            }
            // entries acked under a still-open transaction stay acquired until
            // it commits or rolls back
            let mut released = 0u64;
            for entry in state.entries.values_mut() {
                if entry.state() == EntryState::Acquired(subscription.id())
                    && subscription.holds(entry.message_id())
                {
                    entry.release();
                    released += 1;
                }
            }
            released
        };
        subscription.drain_in_flight();
        debug!(
            target: "amqcore::queue",
            queue = %self.name,
            consumer_tag = %subscription.consumer_tag(),
            released,
            "subscription removed"
        );
        self.deliver_available();
    }

    /// Pushes available entries to subscribers: browsers first, then consumers
    /// round-robin, stopping at the first entry no consumer has credit for so
    /// that enqueue order is kept.
    pub(crate) fn deliver_available(&self) {
        let mut disconnected: Vec<Arc<Subscription>> = Vec::new();
        {
            let mut state = self.state.write();
            if state.deleted || state.subscriptions.is_empty() {
                return;
            }
            let (browsers, consumers): (Vec<Arc<Subscription>>, Vec<Arc<Subscription>>) = state
                .subscriptions
                .iter()
                .cloned()
                .partition(|s| s.is_browser());

            for browser in &browsers {
                let cursor = browser.browse_cursor();
                let pending: Vec<QueueEntry> = state
                    .entries
                    .range(cursor + 1..)
                    .map(|(_, e)| e)
                    .filter(|e| e.is_available())
                    .cloned()
                    .collect();
                for entry in &pending {
                    if let Offer::Disconnected = browser.offer(&self.name, entry) {
                        disconnected.push(Arc::clone(browser));
                        break;
                    }
                }
            }

            if !consumers.is_empty() {
                let n = consumers.len();
                let available: Vec<u64> = state
                    .entries
                    .iter()
                    .filter(|(_, e)| e.is_available())
                    .map(|(seq, _)| *seq)
                    .collect();
                for seq in available {
                    let Some(entry) = state.entries.get(&seq).cloned() else {
                        continue;
                    };
                    let mut placed = false;
                    for k in 0..n {
                        let idx = (state.round_robin + k) % n;
                        let consumer = &consumers[idx];
                        if disconnected.iter().any(|d| Arc::ptr_eq(d, consumer)) {
                            continue;
                        }
                        match consumer.offer(&self.name, &entry) {
                            Offer::Delivered => {
                                if let Some(e) = state.entries.get_mut(&seq) {
                                    e.acquire(consumer.id());
                                }
                                state.round_robin = (idx + 1) % n;
                                placed = true;
                                break;
                            }
                            Offer::Disconnected => disconnected.push(Arc::clone(consumer)),
                            Offer::NoCredit | Offer::Inactive => {}
                        }
                    }
                    if !placed {
                        break;
                    }
                }
            }
        }
        for subscription in disconnected {
            debug!(
                target: "amqcore::queue",
                queue = %self.name,
                consumer_tag = %subscription.consumer_tag(),
                "consumer went away, closing subscription"
            );
            subscription.close();
        }
    }

    // ───────────────────────────────────────────────────────────
    // Deletion
    // ───────────────────────────────────────────────────────────

    /// Clears the queue, releases blocked producers and detaches every
    /// subscription. Later operations fail with [`QueueError::QueueDeleted`].
    pub(crate) fn delete(&self) -> Result<u64> {
        let (subscriptions, removed) = {
            let mut state = self.state.write();
            if state.deleted {
                return Ok(0);
            }
            let ops: Vec<StoreOp> = state
                .ids()
                .into_iter()
                .map(|id| StoreOp::Dequeue {
                    queue: self.name.clone(),
                    id,
                })
                .collect();
            self.store.apply(&ops)?;
            let removed = state.clear();
            state.deleted = true;
            state.flow.release_all();
            state.active_consumer_count = 0;
            state.exclusive_holder = None;
            (std::mem::take(&mut state.subscriptions), removed)
        };
        for subscription in &subscriptions {
            subscription.detach();
        }
        info!(
            target: "amqcore::queue",
            queue = %self.name,
            removed,
            subscriptions = subscriptions.len(),
            "queue deleted"
        );
        Ok(removed)
    }

    fn ensure_live(&self, state: &QueueState) -> Result<()> {
        if state.deleted {
            return Err(QueueError::QueueDeleted(self.name.clone()));
        }
        Ok(())
    }

    fn missing(&self, id: MessageId) -> QueueError {
        QueueError::not_found(format!("message {id} is not on queue '{}'", self.name))
    }
}
