//! Consumer handles bound to a single queue.
//!
//! A subscription is either *consuming* (acquires entries, limited by credit,
//! must acknowledge or release them) or *browsing* (sees each available entry
//! once, never acquires). Deliveries are pushed over a `flume` channel whose
//! receiver belongs to the consumer.

pub mod credit;

pub use credit::CreditManager;

use std::collections::HashMap;
use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use flume::{Receiver, Sender};
use parking_lot::Mutex;
use tracing::debug;

use crate::core::channel::ChannelId;
use crate::core::error::{QueueError, Result};
use crate::core::message::{AmqMessage, MessageId};
use crate::core::queue::{Queue, QueueEntry};

pub type SubscriptionId = u64;

static NEXT_SUBSCRIPTION_ID: AtomicU64 = AtomicU64::new(1);

/// Consumer tag as chosen by the client (or generated by the broker).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConsumerTag(pub String);

impl ConsumerTag {
    /// Broker-generated tag for consumers that did not pick one.
    pub fn generate() -> Self {
        ConsumerTag(format!("amq.ctag-{}", uuid::Uuid::new_v4()))
    }
}

impl fmt::Display for ConsumerTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConsumerTag {
    fn from(s: &str) -> Self {
        ConsumerTag(s.to_owned())
    }
}

impl From<String> for ConsumerTag {
    fn from(s: String) -> Self {
        ConsumerTag(s)
    }
}

impl AsRef<str> for ConsumerTag {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Deref for ConsumerTag {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionKind {
    Consuming,
    Browsing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Active,
    Closed,
}

/// One message pushed to a consumer.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub consumer_tag: ConsumerTag,
    pub queue: String,
    pub message: Arc<AmqMessage>,
    pub redelivered: bool,
    /// False for browse deliveries, which must not be acknowledged.
    pub acquired: bool,
}

impl Delivery {
    #[inline]
    pub fn message_id(&self) -> MessageId {
        self.message.id()
    }
}

/// Outcome of offering an entry to a subscription during dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Offer {
    Delivered,
    NoCredit,
    Inactive,
    Disconnected,
}

#[derive(Debug)]
struct Binding {
    state: SubscriptionState,
    queue: Option<Weak<Queue>>,
    exclusive: bool,
    in_flight: HashMap<MessageId, u64>,
    /// Highest queue sequence a browser has been shown.
    browse_cursor: u64,
}

pub struct Subscription {
    id: SubscriptionId,
    consumer_tag: ConsumerTag,
    channel_id: ChannelId,
    kind: SubscriptionKind,
    credit: Arc<CreditManager>,
    sender: Sender<Delivery>,
    binding: Mutex<Binding>,
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("consumer_tag", &self.consumer_tag)
            .field("channel_id", &self.channel_id)
            .field("kind", &self.kind)
            .field("state", &self.state())
            .finish()
    }
}

/// Builds a subscription and hands back the receiving end of its delivery channel.
///
/// `browse` selects the browsing variant. An empty `consumer_tag` gets a
/// generated one.
pub fn create_subscription(
    channel_id: ChannelId,
    consumer_tag: impl Into<String>,
    browse: bool,
    credit: Arc<CreditManager>,
) -> (Arc<Subscription>, Receiver<Delivery>) {
    let tag: String = consumer_tag.into();
    let consumer_tag = if tag.is_empty() {
        ConsumerTag::generate()
    } else {
        ConsumerTag(tag)
    };
    let kind = if browse {
        SubscriptionKind::Browsing
    } else {
        SubscriptionKind::Consuming
    };
    let (tx, rx) = flume::unbounded();
    let subscription = Arc::new(Subscription {
        id: NEXT_SUBSCRIPTION_ID.fetch_add(1, Ordering::Relaxed),
        consumer_tag,
        channel_id,
        kind,
        credit,
        sender: tx,
        binding: Mutex::new(Binding {
            state: SubscriptionState::Active,
            queue: None,
            exclusive: false,
            in_flight: HashMap::new(),
            browse_cursor: 0,
        }),
    });
    (subscription, rx)
}

impl Subscription {
    #[inline]
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    #[inline]
    pub fn consumer_tag(&self) -> &ConsumerTag {
        &self.consumer_tag
    }

    #[inline]
    pub fn channel_id(&self) -> ChannelId {
        self.channel_id
    }

    #[inline]
    pub fn kind(&self) -> SubscriptionKind {
        self.kind
    }

    #[inline]
    pub fn is_browser(&self) -> bool {
        self.kind == SubscriptionKind::Browsing
    }

    pub fn state(&self) -> SubscriptionState {
        self.binding.lock().state
    }

    pub fn is_active(&self) -> bool {
        self.state() == SubscriptionState::Active
    }

    pub fn is_exclusive(&self) -> bool {
        self.binding.lock().exclusive
    }

    pub fn credit_manager(&self) -> &Arc<CreditManager> {
        &self.credit
    }

    /// Acquired deliveries not yet acknowledged or released.
    pub fn unacknowledged(&self) -> usize {
        self.binding.lock().in_flight.len()
    }

    /// Stops delivery. Entries this subscription still holds go back to the
    /// queue for redelivery. Returns false if it was already closed.
    pub fn close(&self) -> bool {
        let queue = {
            let mut binding = self.binding.lock();
            if binding.state == SubscriptionState::Closed {
                return false;
            }
            binding.state = SubscriptionState::Closed;
            binding.queue.take()
        };
        debug!(
            target: "amqcore::subscription",
            consumer_tag = %self.consumer_tag,
            "subscription closed"
        );
        match queue.and_then(|q| q.upgrade()) {
            Some(queue) => queue.subscription_closed(self),
            None => self.drain_in_flight(),
        };
        true
    }

    pub(crate) fn bind(&self, queue: Weak<Queue>, exclusive: bool) -> Result<()> {
        let mut binding = self.binding.lock();
        if binding.state == SubscriptionState::Closed {
            return Err(QueueError::SubscriptionClosed(self.consumer_tag.0.clone()));
        }
        if binding.queue.is_some() {
            return Err(QueueError::validation(format!(
                "subscription '{}' is already registered",
                self.consumer_tag
            )));
        }
        binding.queue = Some(queue);
        binding.exclusive = exclusive;
        Ok(())
    }

    /// Unbinds without touching queue state; used when the queue itself goes away.
    pub(crate) fn detach(&self) {
        {
            let mut binding = self.binding.lock();
            binding.state = SubscriptionState::Closed;
            binding.queue = None;
        }
        self.drain_in_flight();
    }

    pub(crate) fn browse_cursor(&self) -> u64 {
        self.binding.lock().browse_cursor
    }

    pub(crate) fn offer(&self, queue: &str, entry: &QueueEntry) -> Offer {
        let mut binding = self.binding.lock();
        if binding.state != SubscriptionState::Active {
            return Offer::Inactive;
        }
        let message = entry.message().clone();
        let size = message.size();
        let acquired = self.kind == SubscriptionKind::Consuming;
        if acquired && !self.credit.try_use(size) {
            return Offer::NoCredit;
        }
        let delivery = Delivery {
            consumer_tag: self.consumer_tag.clone(),
            queue: queue.to_string(),
            message,
            redelivered: entry.is_redelivered(),
            acquired,
        };
        if self.sender.send(delivery).is_err() {
            if acquired {
                self.credit.restore(1, size);
            }
            return Offer::Disconnected;
        }
        if acquired {
            binding.in_flight.insert(entry.message_id(), size);
        } else {
            binding.browse_cursor = binding.browse_cursor.max(entry.sequence());
        }
        Offer::Delivered
    }

    /// Forgets an acquired delivery and gives its credit back.
    pub(crate) fn settle(&self, id: MessageId) -> bool {
        let size = self.binding.lock().in_flight.remove(&id);
        match size {
            Some(size) => {
                self.credit.restore(1, size);
                true
            }
            None => false,
        }
    }

    pub(crate) fn holds(&self, id: MessageId) -> bool {
        self.binding.lock().in_flight.contains_key(&id)
    }

    pub(crate) fn drain_in_flight(&self) {
        let released: Vec<(MessageId, u64)> = self.binding.lock().in_flight.drain().collect();
        for (_, size) in released {
            self.credit.restore(1, size);
        }
    }
}
