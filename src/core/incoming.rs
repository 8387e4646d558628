//! Assembly of a published message.
//!
//! ```text
//!   Created ──routing_complete──▶ Routed ──add_content_chunk──▶ ContentReceiving
//!                                    │                                │
//!                                    └───────deliver_to_queues────────┴──▶ Delivered
//! ```
//!
//! Metadata is written to the store when routing completes and every chunk is
//! written as it arrives; the queue associations are created by the
//! transactional context at delivery.

use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;
use tracing::{debug, trace, warn};

use crate::core::content::ContentBuffer;
use crate::core::error::{QueueError, Result};
use crate::core::message::{
    current_timestamp, AmqMessage, ContentHeader, MessageId, MessageMetaData, PublishInfo,
};
use crate::core::queue::Queue;
use crate::core::store::MessageStore;
use crate::core::txn::TransactionalContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncomingState {
    Created,
    Routed,
    ContentReceiving,
    Delivered,
    Discarded,
}

/// Which queues actually received a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeliveryReport {
    pub message_id: MessageId,
    pub delivered_to: Vec<String>,
    /// Targets deleted between routing and delivery.
    pub skipped: Vec<String>,
    /// Mandatory message that reached no queue; the channel must return it.
    pub returned: bool,
}

#[derive(Debug)]
pub struct IncomingMessage {
    id: MessageId,
    publish: PublishInfo,
    header: ContentHeader,
    arrival_ms: u64,
    store: Arc<dyn MessageStore>,
    targets: Vec<Arc<Queue>>,
    content: ContentBuffer,
    state: IncomingState,
}

impl IncomingMessage {
    /// Starts assembling a message. The id is allocated from `store` right away.
    pub fn new(store: Arc<dyn MessageStore>, publish: PublishInfo, header: ContentHeader) -> Self {
        let id = store.next_message_id();
        let content = ContentBuffer::new(header.body_size);
        trace!(target: "amqcore::incoming", message_id = id, body_size = header.body_size, "incoming message");
        Self {
            id,
            publish,
            header,
            arrival_ms: current_timestamp(),
            store,
            targets: Vec::new(),
            content,
            state: IncomingState::Created,
        }
    }

    #[inline]
    pub fn id(&self) -> MessageId {
        self.id
    }

    #[inline]
    pub fn state(&self) -> IncomingState {
        self.state
    }

    pub fn publish_info(&self) -> &PublishInfo {
        &self.publish
    }

    pub fn content_header(&self) -> &ContentHeader {
        &self.header
    }

    pub fn body_size(&self) -> u64 {
        self.header.body_size
    }

    pub fn accumulated_size(&self) -> u64 {
        self.content.accumulated()
    }

    /// Queue names fixed at routing time.
    pub fn target_names(&self) -> Vec<String> {
        self.targets.iter().map(|q| q.name().to_string()).collect()
    }

    fn metadata(&self) -> MessageMetaData {
        MessageMetaData {
            publish: self.publish.clone(),
            header: self.header.clone(),
            arrival_ms: self.arrival_ms,
        }
    }

    /// Fixes the target queue set and persists the metadata. Callable once.
    pub fn routing_complete(&mut self, targets: Vec<Arc<Queue>>) -> Result<()> {
        if self.state != IncomingState::Created {
            return Err(QueueError::protocol(format!(
                "routing already completed for message {}",
                self.id
            )));
        }
        let mut unique: Vec<Arc<Queue>> = Vec::with_capacity(targets.len());
        for queue in targets {
            if !unique.iter().any(|q| Arc::ptr_eq(q, &queue)) {
                unique.push(queue);
            }
        }
        self.store.put_metadata(self.id, self.metadata())?;
        self.targets = unique;
        self.state = IncomingState::Routed;
        debug!(
            target: "amqcore::incoming",
            message_id = self.id,
            routing_key = %self.publish.routing_key,
            targets = self.targets.len(),
            "routing complete"
        );
        Ok(())
    }

    /// Appends a body chunk. Overrunning the declared body size is a protocol
    /// violation and leaves the accumulated content unchanged.
    pub fn add_content_chunk(&mut self, chunk: Bytes) -> Result<()> {
        match self.state {
            IncomingState::Routed | IncomingState::ContentReceiving => {}
            IncomingState::Created => {
                return Err(QueueError::protocol(format!(
                    "content for message {} received before routing",
                    self.id
                )))
            }
            IncomingState::Delivered | IncomingState::Discarded => {
                return Err(QueueError::protocol(format!(
                    "message {} is no longer accepting content",
                    self.id
                )))
            }
        }
        self.content.check_fits(chunk.len())?;
        let offset = self.content.accumulated();
        self.store.put_content(self.id, offset, &chunk)?;
        self.content.append(&chunk)?;
        self.state = IncomingState::ContentReceiving;
        trace!(
            target: "amqcore::incoming",
            message_id = self.id,
            offset,
            len = chunk.len(),
            "content chunk"
        );
        Ok(())
    }

    /// Enqueues the assembled message on every live target under `txn`.
    pub fn deliver_to_queues(
        &mut self,
        txn: &mut dyn TransactionalContext,
    ) -> Result<DeliveryReport> {
        match self.state {
            IncomingState::Routed | IncomingState::ContentReceiving => {}
            IncomingState::Created => {
                return Err(QueueError::protocol(format!(
                    "message {} delivered before routing",
                    self.id
                )))
            }
            IncomingState::Delivered | IncomingState::Discarded => {
                return Err(QueueError::protocol(format!(
                    "message {} already delivered",
                    self.id
                )))
            }
        }
        if !self.content.is_complete() {
            return Err(QueueError::protocol(format!(
                "message {} content incomplete: {} of {} bytes",
                self.id,
                self.content.accumulated(),
                self.content.declared_size()
            )));
        }

        let body = std::mem::replace(&mut self.content, ContentBuffer::new(0)).finalize()?;
        let message = Arc::new(AmqMessage::new(self.id, self.metadata(), body));

        let delivered_to = match txn.enqueue(&self.targets, &message) {
            Ok(accepted) => accepted,
            Err(err) => {
                self.state = IncomingState::Discarded;
                self.remove_if_unreferenced();
                return Err(err);
            }
        };
        let skipped: Vec<String> = self
            .targets
            .iter()
            .map(|q| q.name().to_string())
            .filter(|name| !delivered_to.contains(name))
            .collect();
        if !skipped.is_empty() {
            warn!(
                target: "amqcore::incoming",
                message_id = self.id,
                skipped = ?skipped,
                "target queues deleted before delivery"
            );
        }
        if delivered_to.is_empty() {
            // nothing enqueued or buffered references it
            self.remove_if_unreferenced();
        }
        self.state = IncomingState::Delivered;

        let returned = delivered_to.is_empty() && self.publish.mandatory;
        debug!(
            target: "amqcore::incoming",
            message_id = self.id,
            delivered = delivered_to.len(),
            returned,
            "message delivered"
        );
        Ok(DeliveryReport {
            message_id: self.id,
            delivered_to,
            skipped,
            returned,
        })
    }

    /// Abandons assembly and drops whatever was already written to the store.
    pub fn discard(mut self) -> Result<()> {
        if self.state == IncomingState::Delivered {
            return Err(QueueError::protocol(format!(
                "message {} already delivered",
                self.id
            )));
        }
        self.state = IncomingState::Discarded;
        if self.store.reference_count(self.id) == 0 {
            self.store.remove(self.id)?;
        }
        Ok(())
    }

    fn remove_if_unreferenced(&self) {
        if self.store.reference_count(self.id) > 0 {
            return;
        }
        if let Err(err) = self.store.remove(self.id) {
            warn!(target: "amqcore::incoming", message_id = self.id, error = %err, "failed to remove undelivered message");
        }
    }
}

impl Drop for IncomingMessage {
    fn drop(&mut self) {
        if matches!(
            self.state,
            IncomingState::Routed | IncomingState::ContentReceiving
        ) {
            debug!(target: "amqcore::incoming", message_id = self.id, "incomplete message dropped");
            self.remove_if_unreferenced();
        }
    }
}
