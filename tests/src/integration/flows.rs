//! # Feed Flows
//!
//! Publish → subscribe → close scenarios through the in-process broker.
//!
//! ## Flows Tested:
//!
//! 1. **Reliable publish → bridge**: a confirmed publish reaches the reader
//! 2. **Terse producers**: legacy `name`/`message` payloads decode
//! 3. **Malformed payloads**: the feed ends and `close` reports the failure
//! 4. **Backlog**: messages queued while nobody consumed are delivered

#[cfg(test)]
mod tests {
    use crate::harness::{self, close, feed_config, next_event, sample_event};
    use broker_feed::{FeedError, FeedPublisher, SubscriptionBridge, UpdatesError};
    use feed_telemetry::{DELIVERIES_RECEIVED, EVENTS_FORWARDED};
    use shared_bus::{ExchangeKind, ExchangeOptions, InMemoryBroker, PublishConfirm, Publishing};
    use std::time::Duration;
    use tokio::time::sleep;

    #[tokio::test]
    async fn test_reliable_publish_reaches_feed() {
        harness::init();
        let broker = InMemoryBroker::new();

        let mut bridge = SubscriptionBridge::connect(&broker, &feed_config())
            .await
            .unwrap();
        let publisher = FeedPublisher::connect(&broker, &feed_config().with_reliable(true))
            .await
            .unwrap();

        assert_eq!(
            broker.exchange(harness::EXCHANGE),
            Some((
                ExchangeKind::Direct,
                ExchangeOptions {
                    durable: true,
                    auto_delete: true,
                    internal: false,
                }
            ))
        );

        let event = sample_event();
        let confirm = publisher
            .publish(&event, harness::BINDING_KEY)
            .await
            .unwrap();
        assert_eq!(confirm, PublishConfirm::Ack { sequence: 1 });

        let received = next_event(bridge.updates()).await.unwrap();
        assert_eq!(received, event);
        assert_eq!(received.entities, vec!["ns/foo", "ns/bar"]);
        assert_eq!(received.payload["ticket"], 42);
        assert_eq!(received.tags, vec!["sample"]);

        publisher.close().await.unwrap();
        close(bridge).await.unwrap();

        // Auto-delete topology goes away with the last consumer.
        assert!(broker.queue(harness::QUEUE).is_none());
        assert!(broker.exchange(harness::EXCHANGE).is_none());
        assert_eq!(broker.open_connections(), 0);
    }

    #[tokio::test]
    async fn test_terse_payload_is_decoded() {
        harness::init();
        let broker = InMemoryBroker::new();
        let mut bridge = SubscriptionBridge::connect(&broker, &feed_config())
            .await
            .unwrap();

        broker
            .publish(
                harness::EXCHANGE,
                harness::BINDING_KEY,
                Publishing::json(br#"{"name":"foo.bar","message":"My event"}"#.to_vec()),
            )
            .unwrap();

        let event = next_event(bridge.updates()).await.unwrap();
        assert_eq!(event.key, "foo.bar");
        assert_eq!(event.description, "My event");
        assert_eq!(event.importance, 0);
        assert!(event.created.is_none());

        close(bridge).await.unwrap();
    }

    #[tokio::test]
    async fn test_not_json_terminates_feed() {
        harness::init();
        let broker = InMemoryBroker::new();
        let mut bridge = SubscriptionBridge::connect(&broker, &feed_config())
            .await
            .unwrap();

        broker
            .publish(
                harness::EXCHANGE,
                harness::BINDING_KEY,
                Publishing::json(b"not-json".to_vec()),
            )
            .unwrap();

        assert_eq!(next_event(bridge.updates()).await, None);
        assert_eq!(bridge.updates().try_recv(), Err(UpdatesError::Exhausted));

        let err = close(bridge).await.unwrap_err();
        assert!(err.is_decode());
        assert!(err.to_string().contains("decode delivery 1"));
    }

    #[tokio::test]
    async fn test_unmatched_routing_key_is_not_delivered() {
        harness::init();
        let broker = InMemoryBroker::new();
        let mut bridge = SubscriptionBridge::connect(&broker, &feed_config())
            .await
            .unwrap();

        let routed = broker
            .publish(
                harness::EXCHANGE,
                "other-key",
                Publishing::json(serde_json::to_vec(&sample_event()).unwrap()),
            )
            .unwrap();
        assert_eq!(routed, 0);

        sleep(Duration::from_millis(20)).await;
        assert_eq!(bridge.updates().try_recv(), Ok(None));

        close(bridge).await.unwrap();
    }

    #[tokio::test]
    async fn test_slow_reader_receives_everything_in_order() {
        harness::init();
        let broker = InMemoryBroker::new();
        let mut bridge = SubscriptionBridge::connect(&broker, &feed_config())
            .await
            .unwrap();
        let publisher = FeedPublisher::connect(&broker, &feed_config()).await.unwrap();

        for i in 0..20 {
            let event = sample_event().with_importance(i);
            publisher.publish(&event, harness::BINDING_KEY).await.unwrap();
        }

        for i in 0..20 {
            if i % 5 == 0 {
                sleep(Duration::from_millis(5)).await;
            }
            let event = next_event(bridge.updates()).await.unwrap();
            assert_eq!(event.importance, i);
        }

        publisher.close().await.unwrap();
        close(bridge).await.unwrap();
    }

    #[tokio::test]
    async fn test_backlog_is_delivered_to_next_subscriber() {
        harness::init();
        let broker = InMemoryBroker::new();
        let config = feed_config().with_durable(false).with_auto_delete(false);

        let first = SubscriptionBridge::connect(&broker, &config).await.unwrap();
        close(first).await.unwrap();

        // The queue and its binding survive the consumer.
        for key in ["queued.one", "queued.two"] {
            broker
                .publish(
                    harness::EXCHANGE,
                    harness::BINDING_KEY,
                    Publishing::json(serde_json::to_vec(&sample_event().with_origin(key)).unwrap()),
                )
                .unwrap();
        }
        assert_eq!(broker.queue(harness::QUEUE).map(|q| q.messages), Some(2));

        let mut second = SubscriptionBridge::connect(&broker, &config).await.unwrap();
        assert_eq!(next_event(second.updates()).await.unwrap().origin, "queued.one");
        assert_eq!(next_event(second.updates()).await.unwrap().origin, "queued.two");

        close(second).await.unwrap();
    }

    #[tokio::test]
    async fn test_metrics_follow_the_feed() {
        harness::init();
        let broker = InMemoryBroker::new();
        let mut config = feed_config();
        config.consumer_tag = "metrics-consumer".to_string();

        let mut bridge = SubscriptionBridge::connect(&broker, &config).await.unwrap();
        let publisher = FeedPublisher::connect(&broker, &config).await.unwrap();
        publisher.publish(&sample_event(), harness::BINDING_KEY).await.unwrap();
        publisher.publish(&sample_event(), harness::BINDING_KEY).await.unwrap();

        next_event(bridge.updates()).await.unwrap();
        next_event(bridge.updates()).await.unwrap();
        assert_eq!(
            DELIVERIES_RECEIVED
                .with_label_values(&["metrics-consumer"])
                .get(),
            2.0
        );

        publisher.close().await.unwrap();
        close(bridge).await.unwrap();
        assert_eq!(
            EVENTS_FORWARDED.with_label_values(&["metrics-consumer"]).get(),
            2.0
        );

        let text = feed_telemetry::encode_metrics().unwrap();
        assert!(text.contains("feed_subscription_deliveries_received_total"));
    }

    #[tokio::test]
    async fn test_broker_refusal_is_reported_at_setup() {
        harness::init();
        let broker = InMemoryBroker::new();
        let mut config = feed_config();
        config.uri = "amqp:/missing-slash".to_string();

        let err = SubscriptionBridge::connect(&broker, &config)
            .await
            .unwrap_err();
        assert!(matches!(err, FeedError::InvalidConfig(_)));

        config.uri = "a mqp://localhost".to_string();
        let err = SubscriptionBridge::connect(&broker, &config)
            .await
            .unwrap_err();
        assert!(matches!(err, FeedError::Provisioning { .. }));
        assert_eq!(broker.open_connections(), 0);
    }
}
