//! # Topology Scenarios
//!
//! Exchange kinds, shared queues and conflicting declarations as seen
//! through the feed.

#[cfg(test)]
mod tests {
    use crate::harness::{self, close, consumer_config, next_event, sample_event};
    use broker_feed::{FeedError, FeedPublisher, SetupStep, SubscriptionBridge};
    use shared_bus::{BrokerError, ExchangeKind, InMemoryBroker};
    use std::time::Duration;
    use tokio::time::sleep;

    #[tokio::test]
    async fn test_fanout_reaches_every_queue() {
        harness::init();
        let broker = InMemoryBroker::new();

        let mut audit = SubscriptionBridge::connect(
            &broker,
            &consumer_config(ExchangeKind::Fanout, "audit", "", "audit-consumer"),
        )
        .await
        .unwrap();
        let mut mirror = SubscriptionBridge::connect(
            &broker,
            &consumer_config(ExchangeKind::Fanout, "mirror", "", "mirror-consumer"),
        )
        .await
        .unwrap();

        let publisher = FeedPublisher::connect(
            &broker,
            &consumer_config(ExchangeKind::Fanout, "", "", ""),
        )
        .await
        .unwrap();
        publisher
            .publish(&sample_event(), "ignored-by-fanout")
            .await
            .unwrap();

        assert_eq!(next_event(audit.updates()).await.unwrap().key, "foo.bar");
        assert_eq!(next_event(mirror.updates()).await.unwrap().key, "foo.bar");

        publisher.close().await.unwrap();
        close(audit).await.unwrap();
        close(mirror).await.unwrap();
    }

    #[tokio::test]
    async fn test_topic_wildcards() {
        harness::init();
        let broker = InMemoryBroker::new();

        let mut one_level = SubscriptionBridge::connect(
            &broker,
            &consumer_config(ExchangeKind::Topic, "orders.one", "orders.*", "one-level"),
        )
        .await
        .unwrap();
        let mut any_depth = SubscriptionBridge::connect(
            &broker,
            &consumer_config(ExchangeKind::Topic, "orders.any", "orders.#", "any-depth"),
        )
        .await
        .unwrap();

        let publisher = FeedPublisher::connect(
            &broker,
            &consumer_config(ExchangeKind::Topic, "", "", ""),
        )
        .await
        .unwrap();
        publisher
            .publish(&sample_event().with_origin("created"), "orders.created")
            .await
            .unwrap();
        publisher
            .publish(&sample_event().with_origin("eu"), "orders.eu.created")
            .await
            .unwrap();

        assert_eq!(next_event(any_depth.updates()).await.unwrap().origin, "created");
        assert_eq!(next_event(any_depth.updates()).await.unwrap().origin, "eu");
        assert_eq!(next_event(one_level.updates()).await.unwrap().origin, "created");

        sleep(Duration::from_millis(20)).await;
        assert_eq!(one_level.updates().try_recv(), Ok(None));

        publisher.close().await.unwrap();
        close(one_level).await.unwrap();
        close(any_depth).await.unwrap();
    }

    #[tokio::test]
    async fn test_consumers_on_one_queue_share_the_work() {
        harness::init();
        let broker = InMemoryBroker::new();
        let config = |tag: &str| consumer_config(ExchangeKind::Direct, "work", "jobs", tag);

        let mut first = SubscriptionBridge::connect(&broker, &config("worker-1"))
            .await
            .unwrap();
        let mut second = SubscriptionBridge::connect(&broker, &config("worker-2"))
            .await
            .unwrap();
        assert_eq!(broker.consumer_tags("work"), vec!["worker-1", "worker-2"]);

        let publisher = FeedPublisher::connect(&broker, &config("")).await.unwrap();
        for i in 0..4 {
            publisher
                .publish(&sample_event().with_importance(i), "jobs")
                .await
                .unwrap();
        }

        let a = next_event(first.updates()).await.unwrap().importance;
        let b = next_event(first.updates()).await.unwrap().importance;
        let c = next_event(second.updates()).await.unwrap().importance;
        let d = next_event(second.updates()).await.unwrap().importance;
        assert_eq!((a, b), (0, 2));
        assert_eq!((c, d), (1, 3));

        publisher.close().await.unwrap();
        close(first).await.unwrap();
        close(second).await.unwrap();
    }

    #[tokio::test]
    async fn test_broker_generated_queue_name() {
        harness::init();
        let broker = InMemoryBroker::new();

        let mut bridge = SubscriptionBridge::connect(
            &broker,
            &consumer_config(ExchangeKind::Direct, "", harness::BINDING_KEY, "anonymous"),
        )
        .await
        .unwrap();
        assert!(bridge.queue().starts_with("amq.gen-"));
        assert_eq!(
            broker.bindings(bridge.queue()),
            vec![(harness::EXCHANGE.to_string(), harness::BINDING_KEY.to_string())]
        );

        let publisher = FeedPublisher::connect(
            &broker,
            &consumer_config(ExchangeKind::Direct, "", "", ""),
        )
        .await
        .unwrap();
        publisher
            .publish(&sample_event().with_origin("anonymous"), harness::BINDING_KEY)
            .await
            .unwrap();
        assert_eq!(next_event(bridge.updates()).await.unwrap().origin, "anonymous");

        publisher.close().await.unwrap();
        close(bridge).await.unwrap();
    }

    #[tokio::test]
    async fn test_conflicting_exchange_declaration() {
        harness::init();
        let broker = InMemoryBroker::new();

        let existing = SubscriptionBridge::connect(&broker, &harness::feed_config())
            .await
            .unwrap();

        let mut conflicting = harness::feed_config().with_durable(false);
        conflicting.queue = "other-queue".to_string();
        conflicting.consumer_tag = "other-consumer".to_string();

        match SubscriptionBridge::connect(&broker, &conflicting).await {
            Err(FeedError::Provisioning { step, source }) => {
                assert_eq!(step, SetupStep::DeclareExchange);
                assert!(matches!(source, BrokerError::PreconditionFailed(_)));
            }
            other => panic!("expected a declaration conflict, got {other:?}"),
        }
        assert_eq!(broker.open_connections(), 1);

        close(existing).await.unwrap();
    }
}
