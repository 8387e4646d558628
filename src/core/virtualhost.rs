//! The explicit broker context: one message store, one exchange registry and
//! the queues declared against them. Every collaborator a queue needs is
//! handed in from here; there is no global registry.

use std::sync::Arc;

use bytes::Bytes;
use tracing::info;

use crate::config::Config;
use crate::core::error::{QueueError, Result};
use crate::core::exchange::ExchangeRegistry;
use crate::core::incoming::{DeliveryReport, IncomingMessage};
use crate::core::message::{ContentHeader, PublishInfo};
use crate::core::queue::{Queue, QueueArguments, QueueAttributes, QueueContext, QueueRegistry};
use crate::core::store::{MemoryMessageStore, MessageStore};
use crate::core::txn::{LocalTransactionalContext, NonTransactionalContext, TransactionalContext};

#[derive(Debug)]
pub struct VirtualHost {
    name: String,
    store: Arc<dyn MessageStore>,
    exchanges: Arc<ExchangeRegistry>,
    queues: QueueRegistry,
    defaults: QueueArguments,
}

impl VirtualHost {
    pub fn new(
        name: impl Into<String>,
        store: Arc<dyn MessageStore>,
        defaults: QueueArguments,
    ) -> Self {
        let name = name.into();
        info!(target: "amqcore::vhost", vhost = %name, "virtual host created");
        Self {
            name,
            store,
            exchanges: Arc::new(ExchangeRegistry::with_defaults()),
            queues: QueueRegistry::new(),
            defaults,
        }
    }

    /// Virtual host backed by an in-memory store, using the configured queue defaults.
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.broker.virtual_host.clone(),
            Arc::new(MemoryMessageStore::new()),
            config.queues.arguments(),
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn store(&self) -> &Arc<dyn MessageStore> {
        &self.store
    }

    pub fn exchanges(&self) -> &Arc<ExchangeRegistry> {
        &self.exchanges
    }

    pub fn queues(&self) -> &QueueRegistry {
        &self.queues
    }

    pub fn default_arguments(&self) -> QueueArguments {
        self.defaults
    }

    fn context(&self) -> QueueContext {
        QueueContext {
            store: Arc::clone(&self.store),
            exchanges: Arc::clone(&self.exchanges),
        }
    }

    /// Declares with the host's default arguments. An existing queue of that
    /// name is returned as is.
    pub fn declare_queue(&self, name: &str, attributes: QueueAttributes) -> Result<Arc<Queue>> {
        self.declare_queue_with(name, attributes, self.defaults)
    }

    /// An empty name gets a server-generated `amq.gen-…` name.
    pub fn declare_queue_with(
        &self,
        name: &str,
        attributes: QueueAttributes,
        arguments: QueueArguments,
    ) -> Result<Arc<Queue>> {
        let name = if name.is_empty() {
            format!("amq.gen-{}", uuid::Uuid::new_v4())
        } else {
            name.to_string()
        };
        let (queue, created) = self.queues.get_or_create(&name, || {
            Queue::new(name.clone(), attributes.clone(), arguments, self.context())
        })?;
        if created {
            info!(
                target: "amqcore::vhost",
                vhost = %self.name,
                queue = %name,
                durable = attributes.durable,
                capacity = arguments.capacity,
                "queue declared"
            );
        } else if let Some(owner) = queue.owner() {
            if queue.is_exclusive() && attributes.owner.as_deref() != Some(owner) {
                return Err(QueueError::ExclusivityViolation {
                    queue: name,
                    reason: format!("queue is exclusive to '{owner}'"),
                });
            }
        }
        Ok(queue)
    }

    pub fn get_queue(&self, name: &str) -> Option<Arc<Queue>> {
        self.queues.get(name)
    }

    /// Removes the queue from the host, empties it and closes its
    /// subscriptions. Returns the number of messages that were on it.
    pub fn delete_queue(&self, name: &str) -> Result<u64> {
        let queue = self
            .queues
            .remove(name)
            .ok_or_else(|| QueueError::not_found(format!("queue '{name}'")))?;
        match queue.delete() {
            Ok(removed) => Ok(removed),
            Err(err) => {
                // Deletion did not take effect; keep the queue reachable.
                self.queues.get_or_create(name, || Ok(Arc::clone(&queue)))?;
                Err(err)
            }
        }
    }

    pub fn auto_commit(&self) -> NonTransactionalContext {
        NonTransactionalContext::new(Arc::clone(&self.store))
    }

    pub fn begin_transaction(&self) -> LocalTransactionalContext {
        LocalTransactionalContext::new(Arc::clone(&self.store))
    }

    pub fn new_incoming_message(&self, publish: PublishInfo, header: ContentHeader) -> IncomingMessage {
        IncomingMessage::new(Arc::clone(&self.store), publish, header)
    }

    /// Runs a whole publish: route to the named queues (unknown names route
    /// nowhere), append `body` as one chunk and deliver under `txn`.
    pub fn publish(
        &self,
        publish: PublishInfo,
        header: ContentHeader,
        body: Bytes,
        route_to: &[&str],
        txn: &mut dyn TransactionalContext,
    ) -> Result<DeliveryReport> {
        let targets: Vec<Arc<Queue>> = route_to
            .iter()
            .filter_map(|name| self.queues.get(name))
            .collect();
        let mut incoming = self.new_incoming_message(publish, header);
        incoming.routing_complete(targets)?;
        if !body.is_empty() {
            incoming.add_content_chunk(body)?;
        }
        incoming.deliver_to_queues(txn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::delivery_mode::DeliveryMode;

    fn vhost() -> VirtualHost {
        VirtualHost::new(
            "test",
            Arc::new(MemoryMessageStore::new()),
            QueueArguments::default(),
        )
    }

    #[test]
    fn declare_is_idempotent() {
        let vhost = vhost();
        let a = vhost.declare_queue("q", QueueAttributes::default()).unwrap();
        let b = vhost.declare_queue("q", QueueAttributes::default()).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(vhost.queues().len(), 1);
    }

    #[test]
    fn empty_name_is_generated() {
        let vhost = vhost();
        let q = vhost.declare_queue("", QueueAttributes::default()).unwrap();
        assert!(q.name().starts_with("amq.gen-"));
    }

    #[test]
    fn exclusive_queue_rejects_other_owners() {
        let vhost = vhost();
        let attrs = QueueAttributes {
            exclusive: true,
            owner: Some("conn-1".into()),
            ..Default::default()
        };
        vhost.declare_queue("private", attrs.clone()).unwrap();
        assert!(vhost.declare_queue("private", attrs).is_ok());
        let other = QueueAttributes {
            owner: Some("conn-2".into()),
            ..Default::default()
        };
        assert!(matches!(
            vhost.declare_queue("private", other),
            Err(QueueError::ExclusivityViolation { .. })
        ));
    }

    #[test]
    fn deleted_queue_is_skipped_by_later_delivery() {
        let vhost = vhost();
        let keep = vhost.declare_queue("keep", QueueAttributes::default()).unwrap();
        let gone = vhost.declare_queue("gone", QueueAttributes::default()).unwrap();

        let mut incoming = vhost.new_incoming_message(
            PublishInfo::new("amq.fanout", ""),
            ContentHeader::new(3, DeliveryMode::Persistent),
        );
        incoming.routing_complete(vec![keep.clone(), gone.clone()]).unwrap();
        incoming.add_content_chunk(Bytes::from_static(b"abc")).unwrap();

        assert_eq!(vhost.delete_queue("gone").unwrap(), 0);
        assert!(gone.is_deleted());

        let mut txn = vhost.auto_commit();
        let report = incoming.deliver_to_queues(&mut txn).unwrap();
        assert_eq!(report.delivered_to, vec!["keep".to_string()]);
        assert_eq!(report.skipped, vec!["gone".to_string()]);
        assert_eq!(keep.message_count(), 1);
        assert_eq!(gone.message_count(), 0);
        assert!(matches!(
            gone.delete_messages(0, 10),
            Err(QueueError::QueueDeleted(_))
        ));
    }

    #[test]
    fn delete_unknown_queue_is_not_found() {
        assert!(matches!(
            vhost().delete_queue("missing"),
            Err(QueueError::NotFound(_))
        ));
    }

    #[test]
    fn delete_queue_drops_store_associations() {
        let vhost = vhost();
        vhost.declare_queue("q", QueueAttributes::default()).unwrap();
        let mut txn = vhost.auto_commit();
        for _ in 0..3 {
            vhost
                .publish(
                    PublishInfo::new("", "q"),
                    ContentHeader::new(1, DeliveryMode::Persistent),
                    Bytes::from_static(b"x"),
                    &["q"],
                    &mut txn,
                )
                .unwrap();
        }
        assert_eq!(vhost.delete_queue("q").unwrap(), 3);
        assert!(vhost.get_queue("q").is_none());
        assert!(vhost.store().list_ids("q").unwrap().is_empty());
    }
}
