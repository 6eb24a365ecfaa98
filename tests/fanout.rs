use std::{sync::Arc, time::Duration};

use tokio::time::{sleep, timeout};
use zprobe::{
    service::ACK_TIMEOUT, Broker, LocalConnector, PatternSubscription, PublishOutcome,
    PublishRequest, ServiceInstance, ServiceRegistry,
};

async fn registry(broker: &Arc<Broker>) -> ServiceRegistry {
    let connector = Arc::new(LocalConnector::new(broker.clone()));
    let mut registry = ServiceRegistry::new(connector, ACK_TIMEOUT);
    registry.bootstrap().await.unwrap();
    registry
}

/// Ждёт, пока все экземпляры не обработают ожидаемое число доставок.
async fn wait_processed(
    registry: &ServiceRegistry,
    ids: &[u32],
    expected: u64,
) {
    timeout(Duration::from_secs(2), async {
        loop {
            let done = ids
                .iter()
                .all(|id| registry.get(*id).unwrap().stats().processed == expected);
            if done {
                break;
            }
            sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("deliveries were not processed in time");
}

/// Публикатор и три подписчика на `topic/*`: одна публикация в `topic/x`
/// доходит до трёх получателей, каждый получает её ровно один раз.
#[tokio::test]
async fn test_fanout_three_subscribers() {
    let broker = Arc::new(Broker::new());
    let mut registry = registry(&broker).await;

    let ids = registry.get_or_create_for_fanout(3).await.unwrap();
    assert_eq!(ids.len(), 3);
    for id in &ids {
        registry
            .get_mut(*id)
            .unwrap()
            .subscribe(PatternSubscription::new("topic/*"))
            .await
            .unwrap();
    }

    let outcome = registry
        .publisher()
        .unwrap()
        .publish(&PublishRequest::new("topic/x", "payload"))
        .await
        .unwrap();
    assert_eq!(outcome, PublishOutcome::Plain { receivers: 3 });

    wait_processed(&registry, &ids, 1).await;
    for id in &ids {
        assert_eq!(registry.get(*id).unwrap().stats().received, 1);
    }
}

/// После отписки дальнейшие публикации по шаблону никого не достигают.
#[tokio::test]
async fn test_unsubscribe_stops_deliveries() {
    let broker = Arc::new(Broker::new());
    let connector = Arc::new(LocalConnector::new(broker.clone()));

    let mut subscriber = ServiceInstance::new(1, connector.clone(), ACK_TIMEOUT);
    subscriber.setup().await.unwrap();
    let mut publisher = ServiceInstance::new(0, connector, ACK_TIMEOUT);
    publisher.setup().await.unwrap();

    subscriber
        .subscribe(PatternSubscription::new("news/*"))
        .await
        .unwrap();
    assert!(subscriber.unsubscribe("news/*").await.unwrap());

    let outcome = publisher
        .publish(&PublishRequest::new("news/today", "m").with_repeat(3))
        .await
        .unwrap();
    assert_eq!(outcome, PublishOutcome::Plain { receivers: 0 });

    sleep(Duration::from_millis(20)).await;
    assert_eq!(subscriber.stats().received, 0);

    publisher.dispose().await.unwrap();
    subscriber.dispose().await.unwrap();
    assert_eq!(broker.client_count(), 0);
}

/// Повтор `w5` даёт ровно пять отправок и сумму получателей.
#[tokio::test]
async fn test_publish_repeat_sums_receivers() {
    let broker = Arc::new(Broker::new());
    let mut registry = registry(&broker).await;

    let ids = registry.get_or_create_for_fanout(2).await.unwrap();
    for id in &ids {
        registry
            .get_mut(*id)
            .unwrap()
            .subscribe(PatternSubscription::new("c"))
            .await
            .unwrap();
    }

    let request = PublishRequest::new("c", "m")
        .with_delay(Duration::from_millis(1))
        .with_repeat(5);
    let outcome = registry.publisher().unwrap().publish(&request).await.unwrap();
    assert_eq!(outcome, PublishOutcome::Plain { receivers: 10 });

    wait_processed(&registry, &ids, 5).await;
    registry.dispose_all().await;
}
