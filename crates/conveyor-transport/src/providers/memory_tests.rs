//! Tests for the in-memory transport.

use super::*;
use crate::message::QueueName;

fn transport_with(wait_seconds: u32, visibility_seconds: u32) -> InMemoryTransport {
    let config = QueueConfig::new(
        QueueName::new("test-queue".to_string()).unwrap(),
        "memory://test-queue".to_string(),
    )
    .with_wait_seconds(wait_seconds)
    .with_visibility_timeout_seconds(visibility_seconds);

    InMemoryTransport::new(config).unwrap()
}

mod send_receive {
    use super::*;

    /// Verify a sent message is received with its body intact.
    #[tokio::test]
    async fn test_send_then_receive() {
        let transport = transport_with(1, 30);

        let sent_id = transport
            .send(Bytes::from_static(b"payload"), None)
            .await
            .unwrap();

        let messages = transport.receive().await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].message_id, sent_id);
        assert_eq!(messages[0].body, Bytes::from_static(b"payload"));
        assert_eq!(messages[0].delivery_count, 1);
    }

    /// Verify messages are delivered in enqueue order.
    #[tokio::test]
    async fn test_fifo_order() {
        let transport = transport_with(1, 30);

        for i in 0..3u8 {
            transport.send(Bytes::from(vec![i]), None).await.unwrap();
        }

        let messages = transport.receive().await.unwrap();
        let bodies: Vec<u8> = messages.iter().map(|m| m.body[0]).collect();
        assert_eq!(bodies, vec![0, 1, 2]);
    }

    /// Verify an empty queue returns no messages once the wait elapses.
    #[tokio::test]
    async fn test_receive_empty_after_wait() {
        let transport = transport_with(0, 30);
        let messages = transport.receive().await.unwrap();
        assert!(messages.is_empty());
    }

    /// Verify a delayed message is invisible until its delay elapses.
    #[tokio::test]
    async fn test_enqueue_delay_honored() {
        let transport = transport_with(0, 30);

        transport
            .send(Bytes::from_static(b"delayed"), Some(1))
            .await
            .unwrap();

        // Immediately invisible
        assert!(transport.receive().await.unwrap().is_empty());
        assert_eq!(transport.stats().delayed, 1);

        tokio::time::sleep(std::time::Duration::from_millis(1200)).await;

        let messages = transport.receive().await.unwrap();
        assert_eq!(messages.len(), 1);
    }
}

mod acknowledgement {
    use super::*;

    /// Verify delete removes the in-flight message permanently.
    #[tokio::test]
    async fn test_delete_prevents_redelivery() {
        let transport = transport_with(0, 1);

        transport.send(Bytes::from_static(b"x"), None).await.unwrap();
        let messages = transport.receive().await.unwrap();
        transport.delete(&messages[0].token).await.unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(1200)).await;
        assert!(transport.receive().await.unwrap().is_empty());
        assert_eq!(transport.stats().in_flight, 0);
    }

    /// Verify deleting with a stale token fails.
    #[tokio::test]
    async fn test_delete_unknown_token() {
        let transport = transport_with(0, 30);
        let token = DeliveryToken::new("no-such-token".to_string()).unwrap();

        let result = transport.delete(&token).await;
        assert!(matches!(
            result,
            Err(TransportError::MessageNotFound { .. })
        ));
    }

    /// Verify an unacknowledged message is redelivered after the visibility
    /// timeout with an incremented delivery count.
    #[tokio::test]
    async fn test_visibility_timeout_redelivery() {
        let transport = transport_with(2, 1);

        transport.send(Bytes::from_static(b"x"), None).await.unwrap();

        let first = transport.receive().await.unwrap();
        assert_eq!(first[0].delivery_count, 1);

        // Not deleted; lock expires after 1s and the next receive redelivers
        let second = transport.receive().await.unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].delivery_count, 2);
        assert_eq!(second[0].message_id, first[0].message_id);
        assert_ne!(second[0].token, first[0].token);
    }

    /// Verify change_visibility reschedules redelivery of the same delivery.
    #[tokio::test]
    async fn test_change_visibility_defers_redelivery() {
        let transport = transport_with(0, 60);

        transport.send(Bytes::from_static(b"x"), None).await.unwrap();
        let messages = transport.receive().await.unwrap();

        // Without the change the 60s lock would hold; defer to 1s instead
        transport
            .change_visibility(&messages[0].token, 1)
            .await
            .unwrap();

        assert!(transport.receive().await.unwrap().is_empty());

        tokio::time::sleep(std::time::Duration::from_millis(1200)).await;
        let redelivered = transport.receive().await.unwrap();
        assert_eq!(redelivered.len(), 1);
        assert_eq!(redelivered[0].delivery_count, 2);
    }

    /// Verify change_visibility with a stale token fails.
    #[tokio::test]
    async fn test_change_visibility_unknown_token() {
        let transport = transport_with(0, 30);
        let token = DeliveryToken::new("no-such-token".to_string()).unwrap();

        let result = transport.change_visibility(&token, 10).await;
        assert!(matches!(
            result,
            Err(TransportError::MessageNotFound { .. })
        ));
    }
}

mod purge {
    use super::*;

    /// Verify purge clears visible, delayed, and in-flight messages.
    #[tokio::test]
    async fn test_purge_clears_everything() {
        let transport = transport_with(0, 30);

        transport.send(Bytes::from_static(b"a"), None).await.unwrap();
        transport.send(Bytes::from_static(b"b"), Some(60)).await.unwrap();
        transport.send(Bytes::from_static(b"c"), None).await.unwrap();

        // Put one message in flight
        let received = transport.receive().await.unwrap();
        assert!(!received.is_empty());

        transport.purge().await.unwrap();

        let stats = transport.stats();
        assert_eq!(stats.visible, 0);
        assert_eq!(stats.delayed, 0);
        assert_eq!(stats.in_flight, 0);
        assert!(transport.receive().await.unwrap().is_empty());
    }
}

mod sharing {
    use super::*;

    /// Verify clones observe the same queue state.
    #[tokio::test]
    async fn test_cloned_handles_share_state() {
        let producer = transport_with(1, 30);
        let consumer = producer.clone();

        producer
            .send(Bytes::from_static(b"shared"), None)
            .await
            .unwrap();

        let messages = consumer.receive().await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].body, Bytes::from_static(b"shared"));
    }
}
