mod common;

use std::sync::Arc;

use amqcore::core::delivery_mode::DeliveryMode;
use amqcore::core::message::{ContentHeader, PublishInfo};
use amqcore::core::store::MessageStore;
use amqcore::core::subscription::{create_subscription, CreditManager};
use amqcore::core::txn::TransactionalContext;
use amqcore::QueueError;
use bytes::Bytes;
use common::Harness;

const SIZE: usize = 64;

#[test]
fn committed_enqueues_become_visible_together() {
    let h = Harness::new();
    let a = h.queue("txn-a");
    let b = h.queue("txn-b");

    let mut txn = h.vhost.begin_transaction();
    for _ in 0..3 {
        let report = h.publish_to(&["txn-a", "txn-b"], SIZE, &mut txn);
        assert_eq!(report.delivered_to.len(), 2);
    }
    assert_eq!(txn.pending_operations(), 6);
    assert_eq!(a.message_count(), 0);
    assert_eq!(b.received_message_count(), 0);
    assert!(h.store.list_ids("txn-a").unwrap().is_empty());

    txn.commit().unwrap();
    assert_eq!(a.message_count(), 3);
    assert_eq!(b.message_count(), 3);
    assert_eq!(a.queue_depth(), 3 * SIZE as u64);
    assert_eq!(h.store.list_ids("txn-b").unwrap().len(), 3);
}

#[test]
fn rollback_leaves_queues_and_store_untouched() {
    let h = Harness::new();
    let queue = h.queue("rollback");
    h.fill("rollback", 2, SIZE);

    let mut txn = h.vhost.begin_transaction();
    h.publish_to(&["rollback"], SIZE, &mut txn);
    h.publish_to(&["rollback"], SIZE, &mut txn);
    assert_eq!(h.store.metadata_count(), 4);

    txn.rollback().unwrap();
    assert_eq!(queue.message_count(), 2);
    assert_eq!(queue.received_message_count(), 2);
    assert_eq!(h.store.metadata_count(), 2);
    assert_eq!(h.store.content_count(), 2);
}

#[test]
fn context_is_single_use() {
    let h = Harness::new();
    let queue = h.queue("single-use");
    let mut txn = h.vhost.begin_transaction();
    h.publish_to(&["single-use"], SIZE, &mut txn);
    txn.commit().unwrap();

    assert!(matches!(txn.commit(), Err(QueueError::ProtocolViolation(_))));
    assert!(matches!(txn.rollback(), Err(QueueError::ProtocolViolation(_))));
    assert!(matches!(
        queue.clear_queue(&mut txn),
        Err(QueueError::ProtocolViolation(_))
    ));
    assert_eq!(queue.message_count(), 1);
}

#[test]
fn deferred_clear_applies_at_commit() {
    let h = Harness::new();
    let queue = h.queue("deferred-clear");
    h.fill("deferred-clear", 5, SIZE);

    let mut txn = h.vhost.begin_transaction();
    assert_eq!(queue.clear_queue(&mut txn).unwrap(), 0);
    assert_eq!(queue.message_count(), 5);
    txn.commit().unwrap();
    assert_eq!(queue.message_count(), 0);
    assert_eq!(h.store.metadata_count(), 0);
}

#[test]
fn transactional_acks_are_undone_by_rollback() {
    let h = Harness::new();
    let queue = h.queue("txn-ack");
    let (sub, rx) = create_subscription(1, "c", false, Arc::new(CreditManager::with_prefetch(2)));
    queue.register_subscription(&sub, false).unwrap();
    let ids = h.fill("txn-ack", 2, SIZE);
    assert_eq!(rx.drain().count(), 2);

    let mut txn = h.vhost.begin_transaction();
    for id in &ids {
        queue.acknowledge(&sub, *id, &mut txn).unwrap();
    }
    assert!(matches!(
        queue.acknowledge(&sub, ids[0], &mut txn),
        Err(QueueError::ProtocolViolation(_))
    ));
    assert_eq!(queue.message_count(), 2);
    txn.rollback().unwrap();

    // handed back and redelivered to the still-active consumer
    let again: Vec<_> = rx.drain().collect();
    assert_eq!(again.len(), 2);
    assert!(again.iter().all(|d| d.redelivered));

    let mut txn = h.vhost.begin_transaction();
    for d in &again {
        queue.acknowledge(&sub, d.message_id(), &mut txn).unwrap();
    }
    txn.commit().unwrap();
    assert_eq!(queue.message_count(), 0);
    assert_eq!(h.store.metadata_count(), 0);
}

#[test]
fn failed_commit_changes_nothing() {
    let h = Harness::new();
    let a = h.queue("commit-a");
    let b = h.queue("commit-b");
    let existing = h.fill("commit-b", 1, SIZE)[0];

    let mut txn = h.vhost.begin_transaction();
    h.publish_to(&["commit-a"], SIZE, &mut txn);
    b.dequeue(existing, &mut txn).unwrap();

    // the dequeue target disappears before commit
    b.delete_message_from_top().unwrap();

    assert!(matches!(txn.commit(), Err(QueueError::NotFound(_))));
    assert_eq!(a.message_count(), 0);
    assert_eq!(a.received_message_count(), 0);
    assert_eq!(h.store.metadata_count(), 0);
    assert!(!txn.is_open());
}

#[test]
fn queue_deleted_before_commit_is_skipped() {
    let h = Harness::new();
    let keep = h.queue("keep");
    h.queue("drop");

    let mut txn = h.vhost.begin_transaction();
    h.publish_to(&["keep", "drop"], SIZE, &mut txn);
    h.vhost.delete_queue("drop").unwrap();
    txn.commit().unwrap();

    assert_eq!(keep.message_count(), 1);
    assert_eq!(h.store.metadata_count(), 1);
}

#[test]
fn store_failure_propagates_and_leaves_counters_alone() {
    let h = Harness::new();
    let queue = h.queue("failing");
    h.fill("failing", 1, SIZE);

    let mut incoming = h.vhost.new_incoming_message(
        PublishInfo::new("", "failing"),
        ContentHeader::new(0, Default::default()),
    );
    incoming.routing_complete(vec![queue.clone()]).unwrap();

    h.store.set_failing(true);
    let mut txn = h.vhost.auto_commit();
    let err = incoming.deliver_to_queues(&mut txn).unwrap_err();
    assert!(err.is_store_failure());
    assert!(queue.delete_message_from_top().unwrap_err().is_store_failure());
    assert_eq!(queue.message_count(), 1);
    assert_eq!(queue.received_message_count(), 1);

    h.store.set_failing(false);
    assert!(queue.delete_message_from_top().unwrap().is_some());
    assert_eq!(queue.message_count(), 0);
}

#[test]
fn auto_commit_is_not_transactional() {
    let h = Harness::new();
    let mut auto = h.vhost.auto_commit();
    assert!(!auto.is_transactional());
    auto.commit().unwrap();
    auto.rollback().unwrap();
    assert!(h.vhost.begin_transaction().is_transactional());
}

#[test]
fn transactional_publish_that_reaches_no_queue_is_not_kept() {
    let h = Harness::new();
    let gone = h.queue("gone");

    let mut txn = h.vhost.begin_transaction();
    let mut incoming = h.vhost.new_incoming_message(
        PublishInfo::new("amq.direct", "gone"),
        ContentHeader::new(SIZE as u64, DeliveryMode::Persistent),
    );
    incoming.routing_complete(vec![gone]).unwrap();
    incoming
        .add_content_chunk(Bytes::from(vec![1u8; SIZE]))
        .unwrap();
    h.vhost.delete_queue("gone").unwrap();

    let report = incoming.deliver_to_queues(&mut txn).unwrap();
    assert!(report.delivered_to.is_empty());
    assert_eq!(report.skipped, vec!["gone".to_string()]);
    assert_eq!(txn.pending_operations(), 0);

    // routed nowhere at all
    let report = h.publish_to(&[], SIZE, &mut txn);
    assert!(report.delivered_to.is_empty());

    txn.commit().unwrap();
    assert_eq!(h.store.metadata_count(), 0);
    assert_eq!(h.store.content_count(), 0);
}

#[test]
fn closing_a_consumer_keeps_entries_acked_in_an_open_transaction() {
    let h = Harness::new();
    let queue = h.queue("pending-ack");
    let (a, ra) = create_subscription(1, "a", false, Arc::new(CreditManager::unlimited()));
    queue.register_subscription(&a, false).unwrap();
    let ids = h.fill("pending-ack", 2, SIZE);
    assert_eq!(ra.drain().count(), 2);

    let mut txn = h.vhost.begin_transaction();
    queue.acknowledge(&a, ids[0], &mut txn).unwrap();

    let (b, rb) = create_subscription(2, "b", false, Arc::new(CreditManager::unlimited()));
    queue.register_subscription(&b, false).unwrap();
    assert!(a.close());

    // only the unacknowledged entry moves on
    let moved: Vec<_> = rb.drain().collect();
    assert_eq!(moved.len(), 1);
    assert_eq!(moved[0].message_id(), ids[1]);
    assert!(moved[0].redelivered);

    txn.commit().unwrap();
    assert_eq!(queue.message_count(), 1);
    let mut auto = h.vhost.auto_commit();
    queue.acknowledge(&b, ids[1], &mut auto).unwrap();
    assert_eq!(queue.message_count(), 0);
    assert_eq!(h.store.metadata_count(), 0);
}

#[test]
fn rolling_back_after_close_hands_the_entry_to_another_consumer() {
    let h = Harness::new();
    let queue = h.queue("pending-rollback");
    let (a, ra) = create_subscription(1, "a", false, Arc::new(CreditManager::unlimited()));
    queue.register_subscription(&a, false).unwrap();
    let id = h.fill("pending-rollback", 1, SIZE)[0];
    assert_eq!(ra.drain().count(), 1);

    let mut txn = h.vhost.begin_transaction();
    queue.acknowledge(&a, id, &mut txn).unwrap();
    let (b, rb) = create_subscription(2, "b", false, Arc::new(CreditManager::unlimited()));
    queue.register_subscription(&b, false).unwrap();
    a.close();
    assert!(rb.drain().next().is_none());

    txn.rollback().unwrap();
    let again: Vec<_> = rb.drain().collect();
    assert_eq!(again.len(), 1);
    assert_eq!(again[0].message_id(), id);
    assert!(again[0].redelivered);
}
