use super::*;
use crate::test_utils::{next_delivery, RecordingHandler, TestOutcome};
use std::time::Duration;

const QUEUE: &str = "user_creation_queue";

#[tokio::test]
async fn test_connection_is_lazy() {
    let hub = ChannelHub::new();
    let broker = hub.connect();
    assert_eq!(broker.state().await, ConnectionState::Unconnected);

    broker.publish(QUEUE, Envelope::event(&b"{}"[..])).await.unwrap();
    assert_eq!(broker.state().await, ConnectionState::Connected);
}

#[tokio::test]
async fn test_durable_queue_buffers_until_consumed() {
    let hub = ChannelHub::new();
    let publisher = hub.connect();
    let consumer = hub.connect();

    publisher
        .publish(QUEUE, Envelope::request("id-1", "amq.gen-x", &b"hello"[..]))
        .await
        .unwrap();

    let (handler, mut rx) = RecordingHandler::new();
    consumer
        .consume(QUEUE, QueueKind::Durable, Arc::new(handler))
        .await
        .unwrap();

    let delivery = next_delivery(&mut rx).await;
    assert_eq!(delivery.envelope.correlation_id.as_deref(), Some("id-1"));
    assert_eq!(delivery.envelope.reply_to.as_deref(), Some("amq.gen-x"));
    assert_eq!(&delivery.envelope.body[..], b"hello");
    assert!(!delivery.redelivered);
}

#[tokio::test]
async fn test_reply_publish_does_not_declare_queue() {
    let hub = ChannelHub::new();
    let broker = hub.connect();

    broker
        .publish("amq.gen-gone", Envelope::reply(Some("id".to_string()), &b"{}"[..]))
        .await
        .unwrap();

    assert!(!hub.has_queue("amq.gen-gone").await);
}

#[tokio::test]
async fn test_exclusive_queue_is_private_and_deleted_on_shutdown() {
    let hub = ChannelHub::new();
    let owner = hub.connect();
    let other = hub.connect();

    let queue = owner.declare_exclusive_queue().await.unwrap();
    assert!(queue.starts_with(GENERATED_QUEUE_PREFIX));
    assert!(hub.has_queue(&queue).await);

    let (handler, _rx) = RecordingHandler::new();
    let result = other
        .consume(&queue, QueueKind::Exclusive, Arc::new(handler))
        .await;
    assert!(matches!(result, Err(BrokerError::Consume(_))));

    owner.shutdown().await.unwrap();
    assert!(!hub.has_queue(&queue).await);

    // Late replies to a vanished queue are dropped, not errors.
    other
        .publish(&queue, Envelope::reply(Some("late".to_string()), &b"{}"[..]))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_exclusive_queues_are_unique() {
    let hub = ChannelHub::new();
    let broker = hub.connect();

    let first = broker.declare_exclusive_queue().await.unwrap();
    let second = broker.declare_exclusive_queue().await.unwrap();
    assert_ne!(first, second);
}

#[tokio::test]
async fn test_abandoned_message_is_redelivered_after_shutdown() {
    let hub = ChannelHub::new();
    let publisher = hub.connect();
    let failing = hub.connect();

    let (handler, mut failed_rx) = RecordingHandler::with_outcome(TestOutcome::Failed);
    failing
        .consume(QUEUE, QueueKind::Durable, Arc::new(handler))
        .await
        .unwrap();

    publisher
        .publish(QUEUE, Envelope::event(&b"work"[..]))
        .await
        .unwrap();
    next_delivery(&mut failed_rx).await;

    failing.shutdown().await.unwrap();

    let healthy = hub.connect();
    let (handler, mut rx) = RecordingHandler::new();
    healthy
        .consume(QUEUE, QueueKind::Durable, Arc::new(handler))
        .await
        .unwrap();

    let delivery = next_delivery(&mut rx).await;
    assert!(delivery.redelivered);
    assert_eq!(&delivery.envelope.body[..], b"work");
}

#[tokio::test]
async fn test_in_flight_message_is_redelivered_after_shutdown() {
    let hub = ChannelHub::new();
    let publisher = hub.connect();
    let stuck = hub.connect();

    let (handler, mut stuck_rx) = RecordingHandler::with_outcome(TestOutcome::Hang);
    stuck
        .consume(QUEUE, QueueKind::Durable, Arc::new(handler))
        .await
        .unwrap();

    publisher
        .publish(QUEUE, Envelope::event(&b"work"[..]))
        .await
        .unwrap();
    next_delivery(&mut stuck_rx).await;

    stuck.shutdown().await.unwrap();

    let healthy = hub.connect();
    let (handler, mut rx) = RecordingHandler::new();
    healthy
        .consume(QUEUE, QueueKind::Durable, Arc::new(handler))
        .await
        .unwrap();

    let delivery = next_delivery(&mut rx).await;
    assert!(delivery.redelivered);
    assert_eq!(&delivery.envelope.body[..], b"work");
}

#[tokio::test]
async fn test_acked_message_is_not_redelivered() {
    let hub = ChannelHub::new();
    let publisher = hub.connect();
    let consumer = hub.connect();

    let (handler, mut done_rx) = RecordingHandler::new();
    consumer
        .consume(QUEUE, QueueKind::Durable, Arc::new(handler))
        .await
        .unwrap();

    publisher
        .publish(QUEUE, Envelope::event(&b"done"[..]))
        .await
        .unwrap();
    next_delivery(&mut done_rx).await;
    // Let the consumer settle before shutting down.
    tokio::time::sleep(Duration::from_millis(20)).await;

    consumer.shutdown().await.unwrap();

    let next = hub.connect();
    let (handler, mut rx) = RecordingHandler::new();
    next.consume(QUEUE, QueueKind::Durable, Arc::new(handler))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_rejected_message_is_not_redelivered() {
    let hub = ChannelHub::new();
    let publisher = hub.connect();
    let rejecting = hub.connect();

    let (handler, mut rejected_rx) = RecordingHandler::with_outcome(TestOutcome::Malformed);
    rejecting
        .consume(QUEUE, QueueKind::Durable, Arc::new(handler))
        .await
        .unwrap();

    publisher
        .publish(QUEUE, Envelope::event(&b"garbage"[..]))
        .await
        .unwrap();
    next_delivery(&mut rejected_rx).await;

    rejecting.shutdown().await.unwrap();

    let healthy = hub.connect();
    let (handler, mut rx) = RecordingHandler::new();
    healthy
        .consume(QUEUE, QueueKind::Durable, Arc::new(handler))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_competing_consumers_each_message_once() {
    let hub = ChannelHub::new();
    let publisher = hub.connect();
    let first = hub.connect();
    let second = hub.connect();

    let (handler_a, mut rx_a) = RecordingHandler::new();
    let (handler_b, mut rx_b) = RecordingHandler::new();
    first
        .consume(QUEUE, QueueKind::Durable, Arc::new(handler_a))
        .await
        .unwrap();
    second
        .consume(QUEUE, QueueKind::Durable, Arc::new(handler_b))
        .await
        .unwrap();

    for i in 0..10u8 {
        publisher
            .publish(QUEUE, Envelope::event(vec![i]))
            .await
            .unwrap();
    }

    tokio::time::sleep(Duration::from_millis(100)).await;

    let mut seen = Vec::new();
    while let Ok(delivery) = rx_a.try_recv() {
        seen.push(delivery.envelope.body[0]);
    }
    while let Ok(delivery) = rx_b.try_recv() {
        seen.push(delivery.envelope.body[0]);
    }
    seen.sort_unstable();
    assert_eq!(seen, (0..10u8).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_operations_after_shutdown_are_closed() {
    let hub = ChannelHub::new();
    let broker = hub.connect();
    broker.shutdown().await.unwrap();
    broker.shutdown().await.unwrap();

    assert_eq!(broker.state().await, ConnectionState::Closed);
    assert!(matches!(
        broker.publish(QUEUE, Envelope::event(&b"{}"[..])).await,
        Err(BrokerError::Closed)
    ));
    assert!(matches!(
        broker.declare_exclusive_queue().await,
        Err(BrokerError::Closed)
    ));
}
