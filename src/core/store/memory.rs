use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use tracing::{error, trace};

use crate::core::error::StoreError;
use crate::core::message::{MessageId, MessageMetaData};
use crate::core::store::{MessageStore, StoreOp};

/// In-memory [`MessageStore`].
///
/// All maps sit behind one mutex so that a batch is applied as a unit.
/// `set_failing(true)` makes every mutating call fail with [`StoreError::Io`],
/// which is how store-failure propagation is exercised.
#[derive(Debug)]
pub struct MemoryMessageStore {
    next_id: AtomicU64,
    failing: AtomicBool,
    inner: Mutex<StoreInner>,
}

#[derive(Debug, Default)]
struct StoreInner {
    metadata: HashMap<MessageId, MessageMetaData>,
    content: HashMap<MessageId, BytesMut>,
    /// queue name → ids in enqueue order
    queues: HashMap<String, Vec<MessageId>>,
    references: HashMap<MessageId, usize>,
}

impl StoreInner {
    fn drop_message(&mut self, id: MessageId) {
        self.metadata.remove(&id);
        self.content.remove(&id);
        self.references.remove(&id);
    }

    fn is_enqueued(&self, queue: &str, id: MessageId) -> bool {
        self.queues
            .get(queue)
            .map(|ids| ids.contains(&id))
            .unwrap_or(false)
    }
}

impl Default for MemoryMessageStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryMessageStore {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            failing: AtomicBool::new(false),
            inner: Mutex::new(StoreInner::default()),
        }
    }

    /// Toggles simulated I/O failure for all mutating operations.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of messages with stored metadata.
    pub fn metadata_count(&self) -> usize {
        self.inner.lock().metadata.len()
    }

    /// Number of messages with stored content.
    pub fn content_count(&self) -> usize {
        self.inner.lock().content.len()
    }

    fn check_writable(&self, what: &str) -> Result<(), StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            error!(target: "amqcore::store", op = what, "simulated store failure");
            return Err(StoreError::Io(format!("{what}: store unavailable")));
        }
        Ok(())
    }
}

impl MessageStore for MemoryMessageStore {
    fn next_message_id(&self) -> MessageId {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    fn put_metadata(&self, id: MessageId, metadata: MessageMetaData) -> Result<(), StoreError> {
        self.check_writable("put_metadata")?;
        let mut inner = self.inner.lock();
        inner.metadata.insert(id, metadata);
        inner.references.entry(id).or_insert(0);
        trace!(target: "amqcore::store", message_id = id, "metadata stored");
        Ok(())
    }

    fn put_content(&self, id: MessageId, offset: u64, chunk: &Bytes) -> Result<(), StoreError> {
        self.check_writable("put_content")?;
        let mut inner = self.inner.lock();
        let body = inner.content.entry(id).or_default();
        if body.len() as u64 != offset {
            return Err(StoreError::Io(format!(
                "non-contiguous content write for message {id}: offset {offset}, stored {}",
                body.len()
            )));
        }
        body.extend_from_slice(chunk);
        Ok(())
    }

    fn get_metadata(&self, id: MessageId) -> Result<Option<MessageMetaData>, StoreError> {
        Ok(self.inner.lock().metadata.get(&id).cloned())
    }

    fn get_content(&self, id: MessageId) -> Result<Option<Bytes>, StoreError> {
        let inner = self.inner.lock();
        if !inner.metadata.contains_key(&id) && !inner.content.contains_key(&id) {
            return Ok(None);
        }
        Ok(Some(
            inner
                .content
                .get(&id)
                .map(|b| Bytes::copy_from_slice(b))
                .unwrap_or_default(),
        ))
    }

    fn remove(&self, id: MessageId) -> Result<(), StoreError> {
        self.check_writable("remove")?;
        let mut inner = self.inner.lock();
        for ids in inner.queues.values_mut() {
            ids.retain(|m| *m != id);
        }
        inner.drop_message(id);
        trace!(target: "amqcore::store", message_id = id, "message removed");
        Ok(())
    }

    fn list_ids(&self, queue: &str) -> Result<Vec<MessageId>, StoreError> {
        Ok(self
            .inner
            .lock()
            .queues
            .get(queue)
            .cloned()
            .unwrap_or_default())
    }

    fn reference_count(&self, id: MessageId) -> usize {
        self.inner
            .lock()
            .references
            .get(&id)
            .copied()
            .unwrap_or(0)
    }

    fn apply(&self, ops: &[StoreOp]) -> Result<(), StoreError> {
        if ops.is_empty() {
            return Ok(());
        }
        self.check_writable("apply")?;
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        // Validate the whole batch against the state it would see, then apply.
        let mut added: HashSet<(&str, MessageId)> = HashSet::new();
        let mut removed: HashSet<(&str, MessageId)> = HashSet::new();
        for op in ops {
            let key = (op.queue(), op.id());
            let present = (inner.is_enqueued(key.0, key.1) && !removed.contains(&key))
                || added.contains(&key);
            match op {
                StoreOp::Enqueue { id, .. } => {
                    if !inner.metadata.contains_key(id) {
                        return Err(StoreError::UnknownMessage(*id));
                    }
                    if !present {
                        removed.remove(&key);
                        added.insert(key);
                    }
                }
                StoreOp::Dequeue { queue, id } => {
                    if !present {
                        return Err(StoreError::NotEnqueued {
                            queue: queue.clone(),
                            id: *id,
                        });
                    }
                    added.remove(&key);
                    removed.insert(key);
                }
            }
        }

        let mut dequeued: HashMap<&str, HashSet<MessageId>> = HashMap::new();
        for op in ops {
            match op {
                StoreOp::Enqueue { queue, id } => {
                    let ids = inner.queues.entry(queue.clone()).or_default();
                    if !ids.contains(id) {
                        ids.push(*id);
                        *inner.references.entry(*id).or_insert(0) += 1;
                    }
                }
                StoreOp::Dequeue { queue, id } => {
                    dequeued.entry(queue.as_str()).or_default().insert(*id);
                    let refs = inner.references.entry(*id).or_insert(1);
                    *refs = refs.saturating_sub(1);
                    if *refs == 0 {
                        inner.drop_message(*id);
                    }
                }
            }
        }
        for (queue, ids) in dequeued {
            if let Some(list) = inner.queues.get_mut(queue) {
                list.retain(|id| !ids.contains(id));
            }
        }
        trace!(target: "amqcore::store", ops = ops.len(), "batch applied");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::delivery_mode::DeliveryMode;
    use crate::core::message::{ContentHeader, PublishInfo};

    fn meta(size: u64) -> MessageMetaData {
        MessageMetaData {
            publish: PublishInfo::new("amq.direct", "key"),
            header: ContentHeader::new(size, DeliveryMode::Persistent),
            arrival_ms: 0,
        }
    }

    fn enq(queue: &str, id: MessageId) -> StoreOp {
        StoreOp::Enqueue {
            queue: queue.to_string(),
            id,
        }
    }

    fn deq(queue: &str, id: MessageId) -> StoreOp {
        StoreOp::Dequeue {
            queue: queue.to_string(),
            id,
        }
    }

    #[test]
    fn ids_are_strictly_increasing() {
        let store = MemoryMessageStore::new();
        let a = store.next_message_id();
        let b = store.next_message_id();
        assert_eq!(a, 1);
        assert!(b > a);
    }

    #[test]
    fn message_is_dropped_when_last_queue_dequeues() {
        let store = MemoryMessageStore::new();
        let id = store.next_message_id();
        store.put_metadata(id, meta(3)).unwrap();
        store.put_content(id, 0, &Bytes::from_static(b"abc")).unwrap();
        store.apply(&[enq("q1", id), enq("q2", id)]).unwrap();
        assert_eq!(store.reference_count(id), 2);

        store.apply(&[deq("q1", id)]).unwrap();
        assert_eq!(store.metadata_count(), 1);
        assert_eq!(store.list_ids("q2").unwrap(), vec![id]);

        store.apply(&[deq("q2", id)]).unwrap();
        assert_eq!(store.metadata_count(), 0);
        assert_eq!(store.content_count(), 0);
        assert!(store.get_content(id).unwrap().is_none());
    }

    #[test]
    fn failed_batch_leaves_store_untouched() {
        let store = MemoryMessageStore::new();
        let id = store.next_message_id();
        store.put_metadata(id, meta(1)).unwrap();
        store.apply(&[enq("q", id)]).unwrap();

        let err = store.apply(&[deq("q", id), deq("q", 999)]).unwrap_err();
        assert_eq!(
            err,
            StoreError::NotEnqueued {
                queue: "q".into(),
                id: 999
            }
        );
        assert_eq!(store.list_ids("q").unwrap(), vec![id]);
        assert_eq!(store.reference_count(id), 1);
    }

    #[test]
    fn failing_store_rejects_writes() {
        let store = MemoryMessageStore::new();
        store.set_failing(true);
        let id = store.next_message_id();
        assert!(matches!(
            store.put_metadata(id, meta(1)),
            Err(StoreError::Io(_))
        ));
        store.set_failing(false);
        assert!(store.put_metadata(id, meta(1)).is_ok());
    }

    #[test]
    fn content_must_be_written_contiguously() {
        let store = MemoryMessageStore::new();
        let id = store.next_message_id();
        store.put_metadata(id, meta(4)).unwrap();
        store.put_content(id, 0, &Bytes::from_static(b"ab")).unwrap();
        assert!(store.put_content(id, 3, &Bytes::from_static(b"c")).is_err());
        store.put_content(id, 2, &Bytes::from_static(b"cd")).unwrap();
        assert_eq!(store.get_content(id).unwrap().unwrap().as_ref(), b"abcd");
    }
}
