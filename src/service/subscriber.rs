use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use bytes::Bytes;
use tokio::{task::JoinHandle, time::sleep};
use tracing::{debug, info, warn};
use uuid::Uuid;
use zprobe_error::ProbeResult;

use super::handshake::{parse_reply_marker, ACK_MARKER};
use crate::transport::{Message, Subscription, Transport};

/// Параметры подписки по шаблону.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternSubscription {
    pub pattern: String,
    /// Имитация времени обработки одной доставки
    pub delay: Duration,
    /// Подтверждать запросы с маркером `/replyTo/<token>`
    pub handshake: bool,
}

impl PatternSubscription {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            delay: Duration::from_millis(1),
            handshake: false,
        }
    }

    pub fn with_delay(
        mut self,
        delay: Duration,
    ) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_handshake(
        mut self,
        handshake: bool,
    ) -> Self {
        self.handshake = handshake;
        self
    }
}

/// Потокобезопасные счётчики доставок экземпляра.
#[derive(Debug, Default)]
pub struct SubscriberStats {
    /// Доставок получено
    pub received: AtomicU64,
    /// Доставок обработано (после задержки)
    pub processed: AtomicU64,
    /// Подтверждений отправлено
    pub acks_sent: AtomicU64,
    /// Подтверждений, которые не удалось отправить
    pub ack_failures: AtomicU64,
}

/// Снимок [`SubscriberStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub received: u64,
    pub processed: u64,
    pub acks_sent: u64,
    pub ack_failures: u64,
}

impl SubscriberStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            processed: self.processed.load(Ordering::Relaxed),
            acks_sent: self.acks_sent.load(Ordering::Relaxed),
            ack_failures: self.ack_failures.load(Ordering::Relaxed),
        }
    }
}

/// Всё, что нужно задаче доставки; только чтение.
#[derive(Clone)]
struct DeliveryContext {
    instance_id: u32,
    transport: Arc<dyn Transport>,
    stats: Arc<SubscriberStats>,
    delay: Duration,
    handshake: bool,
}

/// Подписки одного экземпляра сервиса.
///
/// Каждая подписка обслуживается своей задачей, которая читает доставки
/// в порядке транспорта и запускает обработку каждой отдельной задачей,
/// так что задержка одной доставки не блокирует следующую.
pub struct Subscriber {
    instance_id: u32,
    transport: Arc<dyn Transport>,
    stats: Arc<SubscriberStats>,
    active: HashMap<String, Vec<JoinHandle<()>>>,
}

impl Subscriber {
    pub fn new(
        instance_id: u32,
        transport: Arc<dyn Transport>,
        stats: Arc<SubscriberStats>,
    ) -> Self {
        Self {
            instance_id,
            transport,
            stats,
            active: HashMap::new(),
        }
    }

    pub async fn subscribe(
        &mut self,
        subscription: PatternSubscription,
    ) -> ProbeResult<()> {
        let stream = self.transport.subscribe(&subscription.pattern).await?;
        let ctx = DeliveryContext {
            instance_id: self.instance_id,
            transport: self.transport.clone(),
            stats: self.stats.clone(),
            delay: subscription.delay,
            handshake: subscription.handshake,
        };
        let task = tokio::spawn(dispatch(ctx, stream));

        info!(
            instance = self.instance_id,
            delay_ms = subscription.delay.as_millis() as u64,
            handshake = subscription.handshake,
            "PSubscribe: {}",
            subscription.pattern
        );
        self.active
            .entry(subscription.pattern)
            .or_default()
            .push(task);
        Ok(())
    }

    /// Снимает все обработчики шаблона. Неизвестный шаблон не считается ошибкой.
    pub async fn unsubscribe(
        &mut self,
        pattern: &str,
    ) -> ProbeResult<bool> {
        let removed = self.transport.unsubscribe(pattern).await?;
        // Потоки доставок закрыты транспортом, задачи завершатся сами.
        self.active.remove(pattern);
        if removed {
            info!(instance = self.instance_id, "PUnsubscribe: {pattern}");
        } else {
            debug!(instance = self.instance_id, "PUnsubscribe: no active subscription for {pattern}");
        }
        Ok(removed)
    }

    /// Активные шаблоны в алфавитном порядке.
    pub fn patterns(&self) -> Vec<String> {
        let mut patterns: Vec<String> = self.active.keys().cloned().collect();
        patterns.sort();
        patterns
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }
}

impl Drop for Subscriber {
    fn drop(&mut self) {
        for task in self.active.values().flatten() {
            task.abort();
        }
    }
}

async fn dispatch(
    ctx: DeliveryContext,
    mut stream: Subscription,
) {
    while let Some(message) = stream.recv().await {
        ctx.stats.received.fetch_add(1, Ordering::Relaxed);
        tokio::spawn(handle_delivery(ctx.clone(), message));
    }
    debug!(instance = ctx.instance_id, "Delivery stream closed: {}", stream.channel());
}

async fn handle_delivery(
    ctx: DeliveryContext,
    message: Message,
) {
    if ctx.handshake {
        acknowledge(&ctx, &message).await;
    }

    let work_id = Uuid::new_v4();
    let payload = message.payload_str();
    info!(
        instance = ctx.instance_id,
        %work_id,
        channel = %message.channel,
        "On {}[{work_id}]: {payload}",
        message.channel
    );

    sleep(ctx.delay).await;

    ctx.stats.processed.fetch_add(1, Ordering::Relaxed);
    info!(
        instance = ctx.instance_id,
        %work_id,
        channel = %message.channel,
        "On {}[{work_id}]: {payload} Processed",
        message.channel
    );
}

/// Отвечает [`ACK_MARKER`] в канал ответа, если он есть в имени канала.
async fn acknowledge(
    ctx: &DeliveryContext,
    message: &Message,
) {
    let Some(marker) = parse_reply_marker(&message.channel) else {
        return;
    };
    let reply = marker.ack_channel();
    match ctx
        .transport
        .publish(&reply, Bytes::from(ACK_MARKER.to_string()))
        .await
    {
        Ok(receivers) => {
            ctx.stats.acks_sent.fetch_add(1, Ordering::Relaxed);
            info!(instance = ctx.instance_id, receivers, "Publish {reply}: reply {ACK_MARKER}");
        }
        Err(err) => {
            ctx.stats.ack_failures.fetch_add(1, Ordering::Relaxed);
            warn!(instance = ctx.instance_id, "Failed to acknowledge on {reply}: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::time::{timeout, Instant};

    use super::*;
    use crate::transport::Broker;

    fn setup() -> (Arc<Broker>, Subscriber, Arc<dyn Transport>) {
        let broker = Arc::new(Broker::new());
        let transport: Arc<dyn Transport> = Arc::new(broker.connect());
        let subscriber = Subscriber::new(1, transport, Arc::new(SubscriberStats::default()));
        let publisher: Arc<dyn Transport> = Arc::new(broker.connect());
        (broker, subscriber, publisher)
    }

    async fn wait_for(
        stats: impl Fn() -> bool,
    ) {
        timeout(Duration::from_secs(2), async {
            while !stats() {
                sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .expect("condition not reached");
    }

    #[tokio::test]
    async fn test_delivery_is_processed() {
        let (_broker, mut subscriber, publisher) = setup();
        subscriber
            .subscribe(PatternSubscription::new("topic/*"))
            .await
            .unwrap();

        let n = publisher
            .publish("topic/x", Bytes::from_static(b"m"))
            .await
            .unwrap();
        assert_eq!(n, 1);

        let stats = subscriber.stats.clone();
        wait_for(|| stats.snapshot().processed == 1).await;
        assert_eq!(subscriber.stats().received, 1);
        assert_eq!(subscriber.stats().acks_sent, 0);
    }

    /// Задержка одной доставки не блокирует следующую.
    #[tokio::test(start_paused = true)]
    async fn test_deliveries_run_concurrently() {
        let (_broker, mut subscriber, publisher) = setup();
        subscriber
            .subscribe(PatternSubscription::new("slow").with_delay(Duration::from_millis(1000)))
            .await
            .unwrap();

        let started = Instant::now();
        for _ in 0..3 {
            publisher.publish("slow", Bytes::from_static(b"m")).await.unwrap();
        }

        let stats = subscriber.stats.clone();
        wait_for(|| stats.snapshot().processed == 3).await;
        assert!(started.elapsed() < Duration::from_millis(1500));
    }

    /// Ответчик подтверждает запрос с маркером до имитации задержки.
    #[tokio::test]
    async fn test_handshake_responder_acknowledges() {
        let (_broker, mut subscriber, publisher) = setup();
        subscriber
            .subscribe(
                PatternSubscription::new("ch/*")
                    .with_delay(Duration::from_millis(200))
                    .with_handshake(true),
            )
            .await
            .unwrap();

        let mut reply = publisher.subscribe("/replyTo/abc-123").await.unwrap();
        publisher
            .publish("ch/replyTo/abc-123", Bytes::from_static(b"hello"))
            .await
            .unwrap();

        let ack = timeout(Duration::from_millis(100), reply.recv())
            .await
            .expect("ack must arrive before the processing delay ends")
            .unwrap();
        assert_eq!(ack.payload_str(), "1");
        assert_eq!(subscriber.stats().acks_sent, 1);
    }

    /// Без маркера или с пустым исходным каналом подтверждения нет.
    #[tokio::test]
    async fn test_handshake_responder_ignores_malformed_marker() {
        let (_broker, mut subscriber, publisher) = setup();
        subscriber
            .subscribe(PatternSubscription::new("*").with_handshake(true))
            .await
            .unwrap();

        publisher.publish("plain", Bytes::from_static(b"m")).await.unwrap();
        publisher
            .publish("/replyTo/abc", Bytes::from_static(b"1"))
            .await
            .unwrap();

        let stats = subscriber.stats.clone();
        wait_for(|| stats.snapshot().processed == 2).await;
        assert_eq!(subscriber.stats().acks_sent, 0);
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_handler() {
        let (_broker, mut subscriber, publisher) = setup();
        subscriber
            .subscribe(PatternSubscription::new("topic/*"))
            .await
            .unwrap();
        assert_eq!(subscriber.patterns(), vec!["topic/*".to_string()]);

        assert!(subscriber.unsubscribe("topic/*").await.unwrap());
        assert!(subscriber.patterns().is_empty());

        let n = publisher
            .publish("topic/x", Bytes::from_static(b"m"))
            .await
            .unwrap();
        assert_eq!(n, 0);
        assert_eq!(subscriber.stats().received, 0);
    }

    #[tokio::test]
    async fn test_unsubscribe_unknown_pattern_is_noop() {
        let (_broker, mut subscriber, _publisher) = setup();
        assert!(!subscriber.unsubscribe("never/*").await.unwrap());
    }
}
