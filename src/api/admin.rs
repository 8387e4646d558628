//! Queue management facade.
//!
//! Every operation resolves the queue by name on the virtual host, validates
//! its input and returns a typed result; nothing here bypasses the queue's own
//! locking.

use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use crate::core::error::{QueueError, Result};
use crate::core::message::MessageId;
use crate::core::queue::{MessageSnapshot, Queue, QueueLimits, QueueNotification, QueueStats};
use crate::core::virtualhost::VirtualHost;

/// Attributes and counters of one queue.
#[derive(Debug, Clone, Serialize)]
pub struct QueueInfo {
    pub name: String,
    pub owner: Option<String>,
    pub durable: bool,
    pub auto_delete: bool,
    pub exclusive: bool,
    pub alternate_exchange: Option<String>,
    #[serde(flatten)]
    pub stats: QueueStats,
    pub limits: QueueLimits,
}

#[derive(Debug, Clone, Serialize)]
pub struct MessageContentView {
    pub id: MessageId,
    pub routing_key: String,
    pub content_type: Option<String>,
    pub persistent: bool,
    pub body_size: u64,
    pub content: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct QueueManagement {
    vhost: Arc<VirtualHost>,
}

impl QueueManagement {
    pub fn new(vhost: Arc<VirtualHost>) -> Self {
        Self { vhost }
    }

    pub fn virtual_host(&self) -> &Arc<VirtualHost> {
        &self.vhost
    }

    fn queue(&self, name: &str) -> Result<Arc<Queue>> {
        self.vhost
            .get_queue(name)
            .ok_or_else(|| QueueError::not_found(format!("queue '{name}'")))
    }

    pub fn queue_names(&self) -> Vec<String> {
        self.vhost.queues().names()
    }

    pub fn queue_info(&self, name: &str) -> Result<QueueInfo> {
        let queue = self.queue(name)?;
        Ok(QueueInfo {
            name: queue.name().to_string(),
            owner: queue.owner().map(str::to_string),
            durable: queue.is_durable(),
            auto_delete: queue.is_auto_delete(),
            exclusive: queue.is_exclusive(),
            alternate_exchange: queue.alternate_exchange().map(|e| e.name().to_string()),
            stats: queue.stats(),
            limits: queue.limits(),
        })
    }

    pub fn list_queues(&self) -> Vec<QueueInfo> {
        self.queue_names()
            .iter()
            .filter_map(|name| self.queue_info(name).ok())
            .collect()
    }

    // ───────────────────────────────────────────────────────────
    // Counters
    // ───────────────────────────────────────────────────────────

    pub fn message_count(&self, queue: &str) -> Result<u64> {
        Ok(self.queue(queue)?.message_count())
    }

    pub fn received_message_count(&self, queue: &str) -> Result<u64> {
        Ok(self.queue(queue)?.received_message_count())
    }

    pub fn queue_depth(&self, queue: &str) -> Result<u64> {
        Ok(self.queue(queue)?.queue_depth())
    }

    pub fn consumer_count(&self, queue: &str) -> Result<u64> {
        Ok(self.queue(queue)?.consumer_count())
    }

    pub fn active_consumer_count(&self, queue: &str) -> Result<u64> {
        Ok(self.queue(queue)?.active_consumer_count())
    }

    // ───────────────────────────────────────────────────────────
    // Alert thresholds
    // ───────────────────────────────────────────────────────────

    pub fn set_maximum_message_count(&self, queue: &str, value: u64) -> Result<()> {
        self.queue(queue)?.set_maximum_message_count(value);
        Ok(())
    }

    pub fn set_maximum_message_size(&self, queue: &str, value: u64) -> Result<()> {
        self.queue(queue)?.set_maximum_message_size(value);
        Ok(())
    }

    pub fn set_maximum_queue_depth(&self, queue: &str, value: u64) -> Result<()> {
        self.queue(queue)?.set_maximum_queue_depth(value);
        Ok(())
    }

    pub fn set_maximum_message_age(&self, queue: &str, value_ms: u64) -> Result<()> {
        self.queue(queue)?.set_maximum_message_age(value_ms);
        Ok(())
    }

    pub fn recent_notifications(&self, queue: &str) -> Result<Vec<QueueNotification>> {
        Ok(self.queue(queue)?.recent_notifications())
    }

    // ───────────────────────────────────────────────────────────
    // Flow control
    // ───────────────────────────────────────────────────────────

    pub fn capacity(&self, queue: &str) -> Result<u64> {
        Ok(self.queue(queue)?.capacity())
    }

    pub fn set_capacity(&self, queue: &str, capacity: u64) -> Result<()> {
        self.queue(queue)?.set_capacity(capacity)
    }

    pub fn flow_resume_capacity(&self, queue: &str) -> Result<u64> {
        Ok(self.queue(queue)?.flow_resume_capacity())
    }

    pub fn set_flow_resume_capacity(&self, queue: &str, resume: u64) -> Result<()> {
        self.queue(queue)?.set_flow_resume_capacity(resume)
    }

    pub fn is_flow_overfull(&self, queue: &str) -> Result<bool> {
        Ok(self.queue(queue)?.is_flow_overfull())
    }

    // ───────────────────────────────────────────────────────────
    // Message operations
    // ───────────────────────────────────────────────────────────

    pub fn delete_message_from_top(&self, queue: &str) -> Result<Option<MessageId>> {
        self.queue(queue)?.delete_message_from_top()
    }

    pub fn clear_queue(&self, queue: &str) -> Result<u64> {
        let queue = self.queue(queue)?;
        let mut txn = self.vhost.auto_commit();
        let removed = queue.clear_queue(&mut txn)?;
        info!(target: "amqcore::admin", queue = %queue.name(), removed, "clear requested via management");
        Ok(removed)
    }

    pub fn delete_messages(&self, queue: &str, from: i64, to: i64) -> Result<u64> {
        self.queue(queue)?.delete_messages(from, to)
    }

    pub fn view_messages(&self, queue: &str, from: i64, to: i64) -> Result<Vec<MessageSnapshot>> {
        self.queue(queue)?.view_messages(from, to)
    }

    pub fn view_message_content(&self, queue: &str, id: i64) -> Result<MessageContentView> {
        if id < 0 {
            return Err(QueueError::validation(format!(
                "message id must not be negative, got {id}"
            )));
        }
        let content = self.queue(queue)?.view_message_content(id as MessageId)?;
        Ok(MessageContentView {
            id: content.id,
            routing_key: content.metadata.publish.routing_key.clone(),
            content_type: content.metadata.header.content_type.clone(),
            persistent: content.metadata.header.delivery_mode.is_persistent(),
            body_size: content.metadata.header.body_size,
            content: content.content.to_vec(),
        })
    }

    // ───────────────────────────────────────────────────────────
    // Alternate exchange
    // ───────────────────────────────────────────────────────────

    pub fn alternate_exchange(&self, queue: &str) -> Result<Option<String>> {
        Ok(self
            .queue(queue)?
            .alternate_exchange()
            .map(|e| e.name().to_string()))
    }

    pub fn set_alternate_exchange(&self, queue: &str, exchange: Option<&str>) -> Result<()> {
        self.queue(queue)?.set_alternate_exchange(exchange)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ApiResponse;
    use crate::core::queue::{QueueArguments, QueueAttributes};
    use crate::core::store::MemoryMessageStore;

    fn management() -> QueueManagement {
        let vhost = Arc::new(VirtualHost::new(
            "admin-test",
            Arc::new(MemoryMessageStore::new()),
            QueueArguments::default(),
        ));
        vhost
            .declare_queue(
                "orders",
                QueueAttributes {
                    durable: true,
                    owner: Some("ops".into()),
                    ..Default::default()
                },
            )
            .unwrap();
        QueueManagement::new(vhost)
    }

    #[test]
    fn unknown_queue_is_not_found() {
        let mgmt = management();
        assert!(matches!(
            mgmt.message_count("nope"),
            Err(QueueError::NotFound(_))
        ));
    }

    #[test]
    fn info_reports_attributes() {
        let mgmt = management();
        let info = mgmt.queue_info("orders").unwrap();
        assert!(info.durable);
        assert_eq!(info.owner.as_deref(), Some("ops"));
        assert_eq!(info.stats.message_count, 0);
        assert_eq!(mgmt.list_queues().len(), 1);
    }

    #[test]
    fn negative_content_id_is_a_validation_error() {
        let mgmt = management();
        assert!(matches!(
            mgmt.view_message_content("orders", -1),
            Err(QueueError::Validation(_))
        ));
    }

    #[test]
    fn response_wraps_errors() {
        let mgmt = management();
        let resp: ApiResponse<u64> = mgmt.capacity("missing").into();
        assert!(!resp.success);
        assert!(resp.error.unwrap().contains("missing"));
        let ok: ApiResponse<u64> = mgmt.capacity("orders").into();
        assert_eq!(ok.data, Some(0));
    }
}
