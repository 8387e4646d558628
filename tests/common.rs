#![allow(dead_code)]

use std::sync::{Arc, Once};

use amqcore::core::delivery_mode::DeliveryMode;
use amqcore::core::incoming::DeliveryReport;
use amqcore::core::message::{ContentHeader, MessageId, PublishInfo};
use amqcore::core::queue::{Queue, QueueArguments, QueueAttributes};
use amqcore::core::store::MemoryMessageStore;
use amqcore::core::txn::TransactionalContext;
use amqcore::VirtualHost;
use bytes::Bytes;

pub fn init_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        // Another test binary may already own the global subscriber.
        let _ = amqcore::logging::init_logging("warn");
    });
}

/// A virtual host over an in-memory store the test can inspect and fail.
pub struct Harness {
    pub store: Arc<MemoryMessageStore>,
    pub vhost: Arc<VirtualHost>,
}

impl Harness {
    pub fn new() -> Self {
        init_logging();
        let store = Arc::new(MemoryMessageStore::new());
        let vhost = Arc::new(VirtualHost::new(
            "test",
            store.clone(),
            QueueArguments::default(),
        ));
        Self { store, vhost }
    }

    pub fn queue(&self, name: &str) -> Arc<Queue> {
        self.vhost
            .declare_queue(name, QueueAttributes::default())
            .expect("declare queue")
    }

    pub fn queue_with(&self, name: &str, arguments: QueueArguments) -> Arc<Queue> {
        self.vhost
            .declare_queue_with(name, QueueAttributes::default(), arguments)
            .expect("declare queue")
    }

    /// Publishes a persistent message of `size` bytes to `queues`.
    pub fn publish_to(
        &self,
        queues: &[&str],
        size: usize,
        txn: &mut dyn TransactionalContext,
    ) -> DeliveryReport {
        let header = ContentHeader::new(size as u64, DeliveryMode::Persistent);
        let publish = PublishInfo::new("amq.direct", queues.first().copied().unwrap_or(""));
        self.vhost
            .publish(publish, header, Bytes::from(vec![7u8; size]), queues, txn)
            .expect("publish")
    }

    /// Auto-commit publish of `count` messages of `size` bytes; returns their ids.
    pub fn fill(&self, queue: &str, count: usize, size: usize) -> Vec<MessageId> {
        let mut txn = self.vhost.auto_commit();
        (0..count)
            .map(|_| self.publish_to(&[queue], size, &mut txn).message_id)
            .collect()
    }
}
