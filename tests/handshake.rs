use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use tokio::time::{sleep, timeout, Instant};
use zprobe::{
    service::{ACK_MARKER, ACK_TIMEOUT, HANDSHAKE_FAILED},
    Broker, LocalConnector, PatternSubscription, PublishOutcome, PublishRequest, ServiceInstance,
};

async fn instance(
    broker: &Arc<Broker>,
    id: u32,
) -> ServiceInstance {
    let connector = Arc::new(LocalConnector::new(broker.clone()));
    let mut instance = ServiceInstance::new(id, connector, ACK_TIMEOUT);
    instance.setup().await.unwrap();
    instance
}

#[tokio::test]
async fn test_ack_with_responder() {
    let broker = Arc::new(Broker::new());
    let publisher = instance(&broker, 0).await;
    let mut responder = instance(&broker, 1).await;
    responder
        .subscribe(
            PatternSubscription::new("ch/*")
                .with_delay(Duration::from_millis(50))
                .with_handshake(true),
        )
        .await
        .unwrap();

    let baseline = publisher.subscription_count();
    let value = publisher
        .publish_with_ack("ch", Bytes::from_static(b"hello"))
        .await
        .unwrap();

    assert_eq!(value, ACK_MARKER);
    assert_eq!(publisher.subscription_count(), baseline);

    // счётчик ответчика обновляется после его публикации
    timeout(Duration::from_secs(1), async {
        while responder.stats().acks_sent != 1 {
            sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .unwrap();
}

/// Без ответчика ожидание заканчивается через таймаут подтверждения.
#[tokio::test(start_paused = true)]
async fn test_timeout_without_responder() {
    let broker = Arc::new(Broker::new());
    let publisher = instance(&broker, 0).await;
    let baseline = publisher.subscription_count();

    let started = Instant::now();
    let value = publisher
        .publish_with_ack("nobody", Bytes::from_static(b"hello"))
        .await
        .unwrap();

    assert_eq!(value, HANDSHAKE_FAILED);
    assert!(started.elapsed() >= ACK_TIMEOUT);
    assert!(started.elapsed() < ACK_TIMEOUT + Duration::from_millis(50));
    assert_eq!(publisher.subscription_count(), baseline);
}

/// Повтор с `repeat <= 0` выполняет ровно один handshake.
#[tokio::test(start_paused = true)]
async fn test_non_positive_repeat_runs_once() {
    let broker = Arc::new(Broker::new());
    let publisher = instance(&broker, 0).await;

    for repeat in [0, -5] {
        let request = PublishRequest::new("nobody", "m")
            .with_repeat(repeat)
            .with_handshake(true);
        let PublishOutcome::Handshake(summary) = publisher.publish(&request).await.unwrap() else {
            panic!("expected handshake outcome");
        };
        assert_eq!(summary.attempts, 1);
        assert_eq!(summary.failures, 1);
        assert_eq!(summary.legacy_total, HANDSHAKE_FAILED);
    }
}

/// Несколько ответчиков: ждём только первое подтверждение, временная
/// подписка всё равно снимается.
#[tokio::test]
async fn test_first_ack_wins_with_several_responders() {
    let broker = Arc::new(Broker::new());
    let publisher = instance(&broker, 0).await;
    let mut responders = Vec::new();
    for id in 1..=3 {
        let mut r = instance(&broker, id).await;
        r.subscribe(PatternSubscription::new("jobs/*").with_handshake(true))
            .await
            .unwrap();
        responders.push(r);
    }

    let baseline = publisher.subscription_count();
    for _ in 0..5 {
        let value = publisher
            .publish_with_ack("jobs", Bytes::from_static(b"run"))
            .await
            .unwrap();
        assert_eq!(value, ACK_MARKER);
        assert_eq!(publisher.subscription_count(), baseline);
    }
}
