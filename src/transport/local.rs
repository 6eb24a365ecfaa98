use std::sync::{
    atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    Arc,
};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use globset::Glob;
use tokio::sync::broadcast;
use zprobe_error::{ConnectionError, ProbeResult, PubSubError};

use super::{
    is_pattern, Connector, HandlerTable, Message, Subscription, Transport, TransportEvent,
    EVENT_CAPACITY,
};

/// Адрес, которым представляется локальный брокер.
pub const LOCAL_ENDPOINT: &str = "memory://local";

type ClientId = u64;

/// Состояние одного клиента брокера: его маршруты и канал событий.
struct ClientSlot {
    routes: HandlerTable,
    events: broadcast::Sender<TransportEvent>,
}

/// Pub/Sub брокер внутри процесса.
///
/// Поддерживает:
/// - Точные подписки по имени канала
/// - Подписки по шаблонам (glob, `*` совпадает и с `/`)
/// - Подсчёт получателей по правилам Redis: один получатель на каждую
///   совпавшую пару (клиент, подписка)
/// - Синтетические события соединения для тестов
pub struct Broker {
    /// Подключённые клиенты → их маршруты
    clients: DashMap<ClientId, Arc<ClientSlot>>,
    next_client: AtomicU64,
    /// Общее количество вызовов `publish`
    pub publish_count: AtomicUsize,
    /// Суммарное число доставок по всем публикациям
    pub delivered_count: AtomicUsize,
}

impl Broker {
    pub fn new() -> Self {
        Self {
            clients: DashMap::new(),
            next_client: AtomicU64::new(1),
            publish_count: AtomicUsize::new(0),
            delivered_count: AtomicUsize::new(0),
        }
    }

    /// Открывает новое клиентское соединение с брокером.
    pub fn connect(self: &Arc<Self>) -> LocalTransport {
        let id = self.next_client.fetch_add(1, Ordering::Relaxed);
        let slot = Arc::new(ClientSlot {
            routes: HandlerTable::new(),
            events: broadcast::channel(EVENT_CAPACITY).0,
        });
        self.clients.insert(id, slot.clone());
        LocalTransport {
            broker: self.clone(),
            id,
            slot,
            closed: AtomicBool::new(false),
        }
    }

    /// Публикация сообщения в канал.
    ///
    /// Обходит маршруты всех клиентов и возвращает число маршрутов,
    /// получивших сообщение.
    pub fn publish(
        &self,
        channel: &str,
        payload: Bytes,
    ) -> usize {
        self.publish_count.fetch_add(1, Ordering::Relaxed);

        let message = Message::new(channel, payload);
        let receivers = self
            .clients
            .iter()
            .map(|client| client.value().routes.route(channel, &message))
            .sum();

        self.delivered_count.fetch_add(receivers, Ordering::Relaxed);
        receivers
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Общее число имён подписок по всем клиентам.
    pub fn route_count(&self) -> usize {
        self.clients.iter().map(|c| c.value().routes.len()).sum()
    }

    /// Рассылает всем клиентам событие обрыва соединения.
    pub fn simulate_outage(
        &self,
        reason: &str,
    ) {
        self.emit(|endpoint| TransportEvent::ConnectionFailed {
            endpoint,
            reason: reason.to_string(),
        });
    }

    /// Рассылает всем клиентам событие восстановления соединения.
    pub fn simulate_restore(&self) {
        self.emit(|endpoint| TransportEvent::ConnectionRestored { endpoint });
    }

    /// Рассылает всем клиентам сообщение об ошибке брокера.
    pub fn emit_error(
        &self,
        message: &str,
    ) {
        self.emit(|endpoint| TransportEvent::BrokerError {
            endpoint,
            message: message.to_string(),
        });
    }

    fn emit(
        &self,
        make: impl Fn(String) -> TransportEvent,
    ) {
        for client in self.clients.iter() {
            let _ = client
                .value()
                .events
                .send(make(client_endpoint(*client.key())));
        }
    }

    fn disconnect(
        &self,
        id: ClientId,
    ) {
        if let Some((_, slot)) = self.clients.remove(&id) {
            slot.routes.clear();
        }
    }
}

impl Default for Broker {
    fn default() -> Self {
        Self::new()
    }
}

fn client_endpoint(id: ClientId) -> String {
    format!("{LOCAL_ENDPOINT}#{id}")
}

/// Клиентское соединение с [`Broker`].
pub struct LocalTransport {
    broker: Arc<Broker>,
    id: ClientId,
    slot: Arc<ClientSlot>,
    closed: AtomicBool,
}

impl LocalTransport {
    fn ensure_open(&self) -> ProbeResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ConnectionError::ConnectionClosed.into());
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for LocalTransport {
    async fn subscribe(
        &self,
        channel: &str,
    ) -> ProbeResult<Subscription> {
        self.ensure_open()?;
        let matcher = if is_pattern(channel) {
            let glob = Glob::new(channel).map_err(PubSubError::from)?;
            Some(glob.compile_matcher())
        } else {
            None
        };
        let (subscription, _) = self.slot.routes.add(channel, matcher);
        Ok(subscription)
    }

    async fn unsubscribe(
        &self,
        channel: &str,
    ) -> ProbeResult<bool> {
        self.ensure_open()?;
        Ok(self.slot.routes.remove(channel))
    }

    async fn publish(
        &self,
        channel: &str,
        payload: Bytes,
    ) -> ProbeResult<usize> {
        self.ensure_open()?;
        Ok(self.broker.publish(channel, payload))
    }

    fn events(&self) -> broadcast::Receiver<TransportEvent> {
        self.slot.events.subscribe()
    }

    fn subscription_count(&self) -> usize {
        self.slot.routes.len()
    }

    fn endpoint(&self) -> String {
        client_endpoint(self.id)
    }

    async fn close(&self) -> ProbeResult<()> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.broker.disconnect(self.id);
        }
        Ok(())
    }
}

impl Drop for LocalTransport {
    fn drop(&mut self) {
        self.broker.disconnect(self.id);
    }
}

/// Фабрика соединений к общему локальному брокеру.
#[derive(Clone, Default)]
pub struct LocalConnector {
    broker: Arc<Broker>,
}

impl LocalConnector {
    pub fn new(broker: Arc<Broker>) -> Self {
        Self { broker }
    }

    pub fn broker(&self) -> &Arc<Broker> {
        &self.broker
    }
}

#[async_trait]
impl Connector for LocalConnector {
    async fn connect(&self) -> ProbeResult<Arc<dyn Transport>> {
        Ok(Arc::new(self.broker.connect()))
    }

    fn endpoint(&self) -> String {
        LOCAL_ENDPOINT.to_string()
    }
}
