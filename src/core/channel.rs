//! Producer-side view of a channel as the queue core sees it.
//!
//! Queues never talk to the wire. When a queue is overfull it marks the
//! publishing channel as blocked; the channel layer polls [`ProducerChannel::is_blocking`]
//! (or watches the set of blocking queues) and suspends publishes until every
//! queue that blocked it has released it.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

pub type ChannelId = u16;

#[derive(Debug)]
pub struct ProducerChannel {
    id: ChannelId,
    blocking: AtomicBool,
    blocked_by: Mutex<BTreeSet<String>>,
}

impl ProducerChannel {
    pub fn new(id: ChannelId) -> Arc<Self> {
        Arc::new(Self {
            id,
            blocking: AtomicBool::new(false),
            blocked_by: Mutex::new(BTreeSet::new()),
        })
    }

    #[inline]
    pub fn id(&self) -> ChannelId {
        self.id
    }

    #[inline]
    pub fn is_blocking(&self) -> bool {
        self.blocking.load(Ordering::SeqCst)
    }

    /// Names of the queues currently holding this channel blocked.
    pub fn blocking_queues(&self) -> Vec<String> {
        self.blocked_by.lock().iter().cloned().collect()
    }

    pub(crate) fn block(&self, queue: &str) {
        let mut blocked_by = self.blocked_by.lock();
        if blocked_by.insert(queue.to_string()) && blocked_by.len() == 1 {
            info!(target: "amqcore::flow", channel = self.id, queue, "channel blocked");
        }
        self.blocking.store(true, Ordering::SeqCst);
    }

    pub(crate) fn unblock(&self, queue: &str) {
        let mut blocked_by = self.blocked_by.lock();
        if !blocked_by.remove(queue) {
            return;
        }
        if blocked_by.is_empty() {
            self.blocking.store(false, Ordering::SeqCst);
            info!(target: "amqcore::flow", channel = self.id, queue, "channel unblocked");
        } else {
            debug!(
                target: "amqcore::flow",
                channel = self.id,
                queue,
                remaining = blocked_by.len(),
                "queue released channel, still blocked elsewhere"
            );
        }
    }
}
