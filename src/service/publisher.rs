use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use tokio::time::sleep;
use tracing::info;
use zprobe_error::ProbeResult;

use crate::transport::Transport;

/// Запрос на публикацию, как его задаёт команда `pub`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishRequest {
    pub channel: String,
    pub payload: Bytes,
    /// Пауза между повторами
    pub delay: Duration,
    /// Число повторов; значения `<= 0` означают одну отправку
    pub repeat: i64,
    /// Ждать подтверждения каждой отправки
    pub handshake: bool,
}

impl PublishRequest {
    pub fn new(
        channel: impl Into<String>,
        payload: impl Into<Bytes>,
    ) -> Self {
        Self {
            channel: channel.into(),
            payload: payload.into(),
            delay: Duration::from_millis(1),
            repeat: 1,
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

    pub fn with_repeat(
        mut self,
        repeat: i64,
    ) -> Self {
        self.repeat = repeat;
        self
    }

    pub fn with_handshake(
        mut self,
        handshake: bool,
    ) -> Self {
        self.handshake = handshake;
        self
    }

    /// Фактическое число отправок.
    pub fn iterations(&self) -> i64 {
        self.repeat.max(1)
    }
}

/// Публикация без подтверждения.
#[derive(Clone)]
pub struct Publisher {
    instance_id: u32,
    transport: Arc<dyn Transport>,
}

impl Publisher {
    pub fn new(
        instance_id: u32,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            instance_id,
            transport,
        }
    }

    /// Отправляет `payload` ровно `max(repeat, 1)` раз с паузой `delay`
    /// между отправками и возвращает сумму числа получателей.
    pub async fn publish(
        &self,
        channel: &str,
        payload: Bytes,
        delay: Duration,
        repeat: i64,
    ) -> ProbeResult<usize> {
        let text = String::from_utf8_lossy(&payload).into_owned();
        let mut total = 0;

        for i in 0..repeat.max(1) {
            if i > 0 {
                sleep(delay).await;
            }
            let receivers = self.transport.publish(channel, payload.clone()).await?;
            total += receivers;
            info!(instance = self.instance_id, receivers, "Publish {channel}: {text}");
        }
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use tokio::time::Instant;

    use super::*;
    use crate::transport::Broker;

    #[test]
    fn test_request_iterations() {
        let req = PublishRequest::new("c", "m");
        assert_eq!(req.iterations(), 1);
        assert_eq!(req.clone().with_repeat(0).iterations(), 1);
        assert_eq!(req.clone().with_repeat(-3).iterations(), 1);
        assert_eq!(req.with_repeat(5).iterations(), 5);
    }

    /// Пять отправок с паузой между ними; после последней паузы нет.
    #[tokio::test(start_paused = true)]
    async fn test_publish_repeats_with_delay() {
        let broker = Arc::new(Broker::new());
        let listener = broker.connect();
        let mut sub = listener.subscribe("c").await.unwrap();

        let publisher = Publisher::new(0, Arc::new(broker.connect()));
        let started = Instant::now();
        let total = publisher
            .publish("c", Bytes::from_static(b"m"), Duration::from_millis(10), 5)
            .await
            .unwrap();

        assert_eq!(total, 5);
        assert_eq!(broker.publish_count.load(Ordering::Relaxed), 5);
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(40), "{elapsed:?}");
        assert!(elapsed < Duration::from_millis(50), "{elapsed:?}");
        for _ in 0..5 {
            assert!(sub.try_recv().is_some());
        }
    }

    #[tokio::test]
    async fn test_publish_non_positive_repeat_sends_once() {
        let broker = Arc::new(Broker::new());
        let publisher = Publisher::new(0, Arc::new(broker.connect()));

        for repeat in [0, -1] {
            let total = publisher
                .publish("nobody", Bytes::from_static(b"m"), Duration::from_millis(1), repeat)
                .await
                .unwrap();
            assert_eq!(total, 0);
        }
        assert_eq!(broker.publish_count.load(Ordering::Relaxed), 2);
    }
}
