//! Транспортный слой: абстракция pub/sub брокера и её реализации.
//!
//! - [`local`]: брокер внутри процесса (glob-маршрутизация, хуки для тестов);
//! - [`resp`]: клиент Redis поверх RESP2 с переподключением.

pub mod handlers;
pub mod local;
pub mod message;
pub mod resp;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{broadcast, mpsc};
use zprobe_error::ProbeResult;

pub use local::{Broker, LocalConnector, LocalTransport};
pub use message::Message;
pub use resp::{RedisConnector, RedisOptions, RedisTransport};

pub(crate) use handlers::HandlerTable;

/// Ёмкость broadcast-канала событий соединения.
pub const EVENT_CAPACITY: usize = 64;

/// Событие жизненного цикла соединения с брокером.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    ConnectionFailed { endpoint: String, reason: String },
    ConnectionRestored { endpoint: String },
    BrokerError { endpoint: String, message: String },
}

impl TransportEvent {
    pub fn endpoint(&self) -> &str {
        match self {
            Self::ConnectionFailed { endpoint, .. }
            | Self::ConnectionRestored { endpoint }
            | Self::BrokerError { endpoint, .. } => endpoint,
        }
    }
}

/// Является ли имя канала glob-шаблоном (`*`, `?` или `[`).
pub fn is_pattern(channel: &str) -> bool {
    channel.contains(['*', '?', '['])
}

/// Упорядоченный поток доставок одной подписки.
///
/// Поток завершается (`recv` возвращает `None`), когда подписку сняли
/// или соединение закрыли.
#[derive(Debug)]
pub struct Subscription {
    channel: Arc<str>,
    inner: mpsc::UnboundedReceiver<Message>,
}

impl Subscription {
    pub(crate) fn new(
        channel: Arc<str>,
        inner: mpsc::UnboundedReceiver<Message>,
    ) -> Self {
        Self { channel, inner }
    }

    /// Имя канала или шаблона, на который оформлена подписка.
    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub async fn recv(&mut self) -> Option<Message> {
        self.inner.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Message> {
        self.inner.try_recv().ok()
    }
}

/// Соединение с pub/sub брокером.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Подписывается на канал или шаблон (режим выбирается по [`is_pattern`]).
    async fn subscribe(
        &self,
        channel: &str,
    ) -> ProbeResult<Subscription>;

    /// Снимает все обработчики имени. `false`, если подписки не было.
    async fn unsubscribe(
        &self,
        channel: &str,
    ) -> ProbeResult<bool>;

    /// Публикует payload и возвращает число получателей.
    async fn publish(
        &self,
        channel: &str,
        payload: Bytes,
    ) -> ProbeResult<usize>;

    /// Поток событий жизненного цикла соединения.
    fn events(&self) -> broadcast::Receiver<TransportEvent>;

    /// Число активных имён подписок на этом соединении.
    fn subscription_count(&self) -> usize;

    fn endpoint(&self) -> String;

    /// Закрывает соединение; последующие операции возвращают ConnectionClosed.
    async fn close(&self) -> ProbeResult<()>;
}

/// Фабрика соединений, которую держит каждый экземпляр сервиса.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self) -> ProbeResult<Arc<dyn Transport>>;

    fn endpoint(&self) -> String;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_pattern() {
        assert!(is_pattern("topic/*"));
        assert!(is_pattern("h?llo"));
        assert!(is_pattern("h[ae]llo"));
        assert!(!is_pattern("topic/x"));
        assert!(!is_pattern("/replyTo/abc-123"));
    }

    #[test]
    fn test_event_endpoint() {
        let ev = TransportEvent::BrokerError {
            endpoint: "127.0.0.1:6379".into(),
            message: "ERR".into(),
        };
        assert_eq!(ev.endpoint(), "127.0.0.1:6379");
    }
}
