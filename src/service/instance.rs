use std::{fmt, sync::Arc, time::Duration};

use bytes::Bytes;
use tokio::sync::broadcast;
use zprobe_error::{ConnectionError, ProbeResult};

use super::{
    connection::{ConnectionEvent, ConnectionManager, ConnectionState},
    handshake::{HandshakeCoordinator, HandshakeSummary},
    publisher::{PublishRequest, Publisher},
    subscriber::{PatternSubscription, StatsSnapshot, Subscriber, SubscriberStats},
};
use crate::transport::Connector;

/// Результат публикации.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    Plain { receivers: usize },
    Handshake(HandshakeSummary),
}

impl fmt::Display for PublishOutcome {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            Self::Plain { receivers } => write!(f, "receivers={receivers}"),
            Self::Handshake(summary) => write!(f, "{summary}"),
        }
    }
}

/// Компоненты, доступные только после подключения.
struct Components {
    subscriber: Subscriber,
    publisher: Publisher,
    handshake: HandshakeCoordinator,
}

/// Экземпляр сервиса: соединение плюс подписчик, публикатор и handshake.
pub struct ServiceInstance {
    id: u32,
    connection: ConnectionManager,
    components: Option<Components>,
    stats: Arc<SubscriberStats>,
    ack_timeout: Duration,
}

impl ServiceInstance {
    pub fn new(
        id: u32,
        connector: Arc<dyn Connector>,
        ack_timeout: Duration,
    ) -> Self {
        Self {
            id,
            connection: ConnectionManager::new(id, connector),
            components: None,
            stats: Arc::new(SubscriberStats::default()),
            ack_timeout,
        }
    }

    /// Подключается и создаёт компоненты. Повторный вызов ничего не делает.
    pub async fn setup(&mut self) -> ProbeResult<()> {
        let transport = self.connection.connect().await?;
        if self.components.is_none() {
            self.components = Some(Components {
                subscriber: Subscriber::new(self.id, transport.clone(), self.stats.clone()),
                publisher: Publisher::new(self.id, transport.clone()),
                handshake: HandshakeCoordinator::new(self.id, transport, self.ack_timeout),
            });
        }
        Ok(())
    }

    fn components(&self) -> ProbeResult<&Components> {
        self.components.as_ref().ok_or_else(|| self.unusable())
    }

    fn components_mut(&mut self) -> ProbeResult<&mut Components> {
        let err = self.unusable();
        self.components.as_mut().ok_or(err)
    }

    fn unusable(&self) -> zprobe_error::StackError {
        if self.connection.is_disposed() {
            ConnectionError::Disposed {
                instance_id: self.id,
            }
            .into()
        } else {
            ConnectionError::NotConnected {
                instance_id: self.id,
            }
            .into()
        }
    }

    pub async fn subscribe(
        &mut self,
        subscription: PatternSubscription,
    ) -> ProbeResult<()> {
        self.components_mut()?.subscriber.subscribe(subscription).await
    }

    pub async fn unsubscribe(
        &mut self,
        pattern: &str,
    ) -> ProbeResult<bool> {
        self.components_mut()?.subscriber.unsubscribe(pattern).await
    }

    /// Публикация по запросу: обычная или с подтверждением.
    pub async fn publish(
        &self,
        request: &PublishRequest,
    ) -> ProbeResult<PublishOutcome> {
        let components = self.components()?;
        if request.handshake {
            let summary = components
                .handshake
                .publish_with_ack_repeated(
                    &request.channel,
                    request.payload.clone(),
                    request.delay,
                    request.repeat,
                )
                .await?;
            Ok(PublishOutcome::Handshake(summary))
        } else {
            let receivers = components
                .publisher
                .publish(
                    &request.channel,
                    request.payload.clone(),
                    request.delay,
                    request.repeat,
                )
                .await?;
            Ok(PublishOutcome::Plain { receivers })
        }
    }

    /// Один handshake без повторов.
    pub async fn publish_with_ack(
        &self,
        channel: &str,
        payload: Bytes,
    ) -> ProbeResult<i64> {
        self.components()?
            .handshake
            .publish_with_ack(channel, payload)
            .await
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn patterns(&self) -> Vec<String> {
        self.components
            .as_ref()
            .map(|c| c.subscriber.patterns())
            .unwrap_or_default()
    }

    /// Число активных подписок на соединении (включая временные каналы ответа).
    pub fn subscription_count(&self) -> usize {
        self.connection
            .transport()
            .map(|t| t.subscription_count())
            .unwrap_or(0)
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.connection.subscribe_events()
    }

    /// Останавливает подписки и освобождает соединение. Идемпотентно.
    pub async fn dispose(&mut self) -> ProbeResult<()> {
        self.components = None;
        self.connection.dispose().await
    }
}
