use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::core::delivery_mode::DeliveryMode;

/// Store-assigned message identifier. Strictly increasing, never reused.
pub type MessageId = u64;

/// Publish-time metadata from the `basic.publish` method.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishInfo {
    pub exchange: String,
    pub routing_key: String,
    pub mandatory: bool,
    pub immediate: bool,
}

impl PublishInfo {
    pub fn new(exchange: impl Into<String>, routing_key: impl Into<String>) -> Self {
        Self {
            exchange: exchange.into(),
            routing_key: routing_key.into(),
            mandatory: false,
            immediate: false,
        }
    }

    pub fn mandatory(mut self, mandatory: bool) -> Self {
        self.mandatory = mandatory;
        self
    }

    pub fn immediate(mut self, immediate: bool) -> Self {
        self.immediate = immediate;
        self
    }
}

/// Content header: declared body size plus the properties the queue cares about.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentHeader {
    pub body_size: u64,
    pub delivery_mode: DeliveryMode,
    pub content_type: Option<String>,
}

impl ContentHeader {
    pub fn new(body_size: u64, delivery_mode: DeliveryMode) -> Self {
        Self {
            body_size,
            delivery_mode,
            content_type: None,
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}

/// Everything the store keeps about a message apart from its body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageMetaData {
    pub publish: PublishInfo,
    pub header: ContentHeader,
    /// Arrival time in milliseconds since the epoch.
    pub arrival_ms: u64,
}

/// A fully assembled message. Immutable; shared by every queue it was routed to.
#[derive(Debug, Clone)]
pub struct AmqMessage {
    id: MessageId,
    metadata: MessageMetaData,
    content: Bytes,
}

impl AmqMessage {
    pub(crate) fn new(id: MessageId, metadata: MessageMetaData, content: Bytes) -> Self {
        Self {
            id,
            metadata,
            content,
        }
    }

    #[inline]
    pub fn id(&self) -> MessageId {
        self.id
    }

    #[inline]
    pub fn routing_key(&self) -> &str {
        &self.metadata.publish.routing_key
    }

    #[inline]
    pub fn is_persistent(&self) -> bool {
        self.metadata.header.delivery_mode.is_persistent()
    }

    /// Declared body size; this is what queue depth accounting uses.
    #[inline]
    pub fn size(&self) -> u64 {
        self.metadata.header.body_size
    }

    #[inline]
    pub fn arrival_ms(&self) -> u64 {
        self.metadata.arrival_ms
    }

    pub fn metadata(&self) -> &MessageMetaData {
        &self.metadata
    }

    pub fn content(&self) -> &Bytes {
        &self.content
    }
}

pub fn current_timestamp() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
