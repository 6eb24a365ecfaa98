use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::{
    sync::{broadcast, mpsc, oneshot, Mutex},
    task::JoinHandle,
    time::sleep,
};
use tracing::{debug, info, warn};
use zprobe_error::{ConnectionError, ProbeResult, ResultExt, StackError, StatusCode};

use super::{connection::RespConnection, frame::RespFrame, RedisOptions};
use crate::transport::{
    is_pattern, Connector, HandlerTable, Message, Subscription, Transport, TransportEvent,
    EVENT_CAPACITY,
};

/// Время на корректную остановку фоновой задачи подписчика.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

/// Команды фоновой задаче, владеющей соединением подписчика.
enum Control {
    Subscribe {
        channel: Arc<str>,
        ack: oneshot::Sender<ProbeResult<()>>,
    },
    Unsubscribe {
        channel: Arc<str>,
        ack: oneshot::Sender<ProbeResult<()>>,
    },
    Shutdown,
}

/// Клиент Redis Pub/Sub.
///
/// Держит два соединения: командное (PUBLISH и прочие запросы с
/// таймаутами) и соединение подписчика, которым владеет фоновая задача.
/// Обрыв соединения подписчика порождает `ConnectionFailed`, задача
/// переподключается с экспоненциальной задержкой, переоформляет все
/// подписки и порождает `ConnectionRestored`.
pub struct RedisTransport {
    options: Arc<RedisOptions>,
    commands: Mutex<Option<RespConnection>>,
    handlers: Arc<HandlerTable>,
    control: mpsc::UnboundedSender<Control>,
    events: broadcast::Sender<TransportEvent>,
    closed: AtomicBool,
    worker: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl RedisTransport {
    /// Открывает оба соединения и запускает задачу подписчика.
    pub async fn connect(options: RedisOptions) -> ProbeResult<Self> {
        let options = Arc::new(options);
        let commands = RespConnection::open(&options)
            .await
            .context("Failed to open command connection")?;
        let subscriber = RespConnection::open(&options)
            .await
            .context("Failed to open subscriber connection")?;

        let handlers = Arc::new(HandlerTable::new());
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let worker = SubscriberWorker {
            options: options.clone(),
            conn: Some(subscriber),
            handlers: handlers.clone(),
            control: control_rx,
            events: events.clone(),
            pending: VecDeque::new(),
        };
        let handle = tokio::spawn(worker.run());

        info!(endpoint = options.primary_endpoint(), "Connected to Redis");

        Ok(Self {
            options,
            commands: Mutex::new(Some(commands)),
            handlers,
            control: control_tx,
            events,
            closed: AtomicBool::new(false),
            worker: parking_lot::Mutex::new(Some(handle)),
        })
    }

    fn ensure_open(&self) -> ProbeResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ConnectionError::ConnectionClosed.into());
        }
        Ok(())
    }

    async fn send_control(
        &self,
        make: impl FnOnce(oneshot::Sender<ProbeResult<()>>) -> Control,
    ) -> ProbeResult<()> {
        let (tx, rx) = oneshot::channel();
        self.control
            .send(make(tx))
            .map_err(|_| ConnectionError::ConnectionClosed)?;
        rx.await.map_err(|_| ConnectionError::ConnectionClosed)?
    }

    fn emit(
        &self,
        event: TransportEvent,
    ) {
        let _ = self.events.send(event);
    }
}

#[async_trait]
impl Transport for RedisTransport {
    async fn subscribe(
        &self,
        channel: &str,
    ) -> ProbeResult<Subscription> {
        self.ensure_open()?;
        let (subscription, first) = self.handlers.add(channel, None);
        if !first {
            return Ok(subscription);
        }

        let key: Arc<str> = Arc::from(channel);
        let result = self
            .send_control(|ack| Control::Subscribe {
                channel: key.clone(),
                ack,
            })
            .await;
        match result {
            Ok(()) => Ok(subscription),
            Err(err) => {
                self.handlers.remove(channel);
                Err(err.context(format!("Failed to subscribe to '{channel}'")))
            }
        }
    }

    async fn unsubscribe(
        &self,
        channel: &str,
    ) -> ProbeResult<bool> {
        self.ensure_open()?;
        if !self.handlers.remove(channel) {
            return Ok(false);
        }

        let key: Arc<str> = Arc::from(channel);
        match self
            .send_control(|ack| Control::Unsubscribe { channel: key, ack })
            .await
        {
            Ok(()) => Ok(true),
            // Без соединения подписка не будет переоформлена при переподключении.
            Err(err) if err.status_code() == StatusCode::ConnectionClosed => {
                warn!(channel, "Unsubscribe while disconnected: {err}");
                Ok(true)
            }
            Err(err) => Err(err),
        }
    }

    async fn publish(
        &self,
        channel: &str,
        payload: Bytes,
    ) -> ProbeResult<usize> {
        self.ensure_open()?;
        let mut guard = self.commands.lock().await;

        if guard.is_none() {
            let conn = RespConnection::open(&self.options)
                .await
                .context("Failed to reopen command connection")?;
            self.emit(TransportEvent::ConnectionRestored {
                endpoint: self.endpoint(),
            });
            *guard = Some(conn);
        }
        let conn = guard.as_mut().ok_or(ConnectionError::ConnectionClosed)?;

        let reply = conn
            .request([b"PUBLISH".as_slice(), channel.as_bytes(), payload.as_ref()])
            .await;
        match reply {
            Ok(RespFrame::Integer(n)) => Ok(n.max(0) as usize),
            Ok(other) => Err(ConnectionError::UnexpectedResponse {
                reply: other.describe(),
            }
            .into()),
            Err(err) if err.status_code() == StatusCode::ServerError => Err(err),
            Err(err) => {
                *guard = None;
                self.emit(TransportEvent::ConnectionFailed {
                    endpoint: self.endpoint(),
                    reason: err.to_string(),
                });
                Err(err.context(format!("Failed to publish to '{channel}'")))
            }
        }
    }

    fn events(&self) -> broadcast::Receiver<TransportEvent> {
        self.events.subscribe()
    }

    fn subscription_count(&self) -> usize {
        self.handlers.len()
    }

    fn endpoint(&self) -> String {
        self.options.primary_endpoint().to_string()
    }

    async fn close(&self) -> ProbeResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let _ = self.control.send(Control::Shutdown);
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            if tokio::time::timeout(SHUTDOWN_GRACE, handle).await.is_err() {
                warn!(endpoint = %self.endpoint(), "Subscriber task did not stop in time");
            }
        }
        self.handlers.clear();

        let conn = self.commands.lock().await.take();
        if let Some(conn) = conn {
            conn.close().await?;
        }
        debug!(endpoint = %self.endpoint(), "Redis transport closed");
        Ok(())
    }
}

impl Drop for RedisTransport {
    fn drop(&mut self) {
        if let Some(handle) = self.worker.get_mut().take() {
            handle.abort();
        }
    }
}

/// Ожидающее подтверждение команды подписки.
struct Pending {
    kind: &'static str,
    channel: Arc<str>,
    ack: oneshot::Sender<ProbeResult<()>>,
}

/// Фоновая задача, владеющая соединением подписчика.
struct SubscriberWorker {
    options: Arc<RedisOptions>,
    conn: Option<RespConnection>,
    handlers: Arc<HandlerTable>,
    control: mpsc::UnboundedReceiver<Control>,
    events: broadcast::Sender<TransportEvent>,
    pending: VecDeque<Pending>,
}

impl SubscriberWorker {
    async fn run(mut self) {
        loop {
            let Some(conn) = self.conn.as_mut() else {
                if self.reconnect().await {
                    continue;
                }
                break;
            };

            tokio::select! {
                cmd = self.control.recv() => match cmd {
                    None | Some(Control::Shutdown) => break,
                    Some(cmd) => self.handle_control(cmd).await,
                },
                frame = conn.read_frame() => match frame {
                    Ok(frame) => self.handle_frame(frame),
                    Err(err) => self.on_disconnect(err),
                },
            }
        }

        self.fail_pending();
        if let Some(conn) = self.conn.take() {
            let _ = conn.close().await;
        }
        debug!("Subscriber task stopped");
    }

    async fn handle_control(
        &mut self,
        cmd: Control,
    ) {
        let (kind, channel, ack) = match cmd {
            Control::Subscribe { channel, ack } => {
                let kind = if is_pattern(&channel) {
                    "psubscribe"
                } else {
                    "subscribe"
                };
                (kind, channel, ack)
            }
            Control::Unsubscribe { channel, ack } => {
                let kind = if is_pattern(&channel) {
                    "punsubscribe"
                } else {
                    "unsubscribe"
                };
                (kind, channel, ack)
            }
            Control::Shutdown => return,
        };

        let Some(conn) = self.conn.as_mut() else {
            let _ = ack.send(Err(ConnectionError::ConnectionClosed.into()));
            return;
        };
        match conn.send([kind.as_bytes(), channel.as_bytes()]).await {
            Ok(()) => self.pending.push_back(Pending { kind, channel, ack }),
            Err(err) => {
                let _ = ack.send(Err(err.clone()));
                self.on_disconnect(err);
            }
        }
    }

    fn handle_frame(
        &mut self,
        frame: RespFrame,
    ) {
        let items = match frame {
            RespFrame::Array(Some(items)) => items,
            RespFrame::Error(message) => {
                warn!(%message, "Broker error on subscriber connection");
                if let Some(pending) = self.pending.pop_front() {
                    let _ = pending.ack.send(Err(ConnectionError::ServerError {
                        message: message.clone(),
                    }
                    .into()));
                }
                self.emit(TransportEvent::BrokerError {
                    endpoint: self.endpoint(),
                    message,
                });
                return;
            }
            other => {
                debug!("Ignoring frame on subscriber connection: {}", other.describe());
                return;
            }
        };

        let kind = items
            .first()
            .and_then(RespFrame::as_text)
            .map(|k| k.to_ascii_lowercase())
            .unwrap_or_default();

        match (kind.as_str(), items.as_slice()) {
            ("message", [_, channel, payload]) => {
                if let (Some(channel), Some(payload)) = (channel.as_text(), payload.as_bytes()) {
                    let message = Message::new(&*channel, Bytes::copy_from_slice(payload));
                    self.handlers.dispatch(&channel, &message);
                }
            }
            ("pmessage", [_, pattern, channel, payload]) => {
                if let (Some(pattern), Some(channel), Some(payload)) =
                    (pattern.as_text(), channel.as_text(), payload.as_bytes())
                {
                    let message = Message::new(&*channel, Bytes::copy_from_slice(payload))
                        .with_pattern(&*pattern);
                    self.handlers.dispatch(&pattern, &message);
                }
            }
            (
                "subscribe" | "psubscribe" | "unsubscribe" | "punsubscribe",
                [_, channel, _count],
            ) => {
                let channel = channel.as_text().unwrap_or_default();
                self.confirm(&kind, &channel);
            }
            ("pong", _) => {}
            _ => debug!(kind = %kind, "Unexpected push frame on subscriber connection"),
        }
    }

    /// Подтверждает первую ожидающую команду с совпадающим типом и каналом.
    fn confirm(
        &mut self,
        kind: &str,
        channel: &str,
    ) {
        let position = self
            .pending
            .iter()
            .position(|p| p.kind == kind && &*p.channel == channel);
        if let Some(pending) = position.and_then(|i| self.pending.remove(i)) {
            debug!(kind, channel, "Subscription change confirmed");
            let _ = pending.ack.send(Ok(()));
        }
    }

    fn on_disconnect(
        &mut self,
        err: StackError,
    ) {
        warn!(endpoint = %self.endpoint(), "Subscriber connection lost: {err}");
        self.conn = None;
        self.fail_pending();
        self.emit(TransportEvent::ConnectionFailed {
            endpoint: self.endpoint(),
            reason: err.to_string(),
        });
    }

    fn fail_pending(&mut self) {
        for pending in self.pending.drain(..) {
            let _ = pending
                .ack
                .send(Err(ConnectionError::ConnectionClosed.into()));
        }
    }

    /// Переподключается с экспоненциальной задержкой.
    ///
    /// Возвращает `false`, если во время ожидания пришла команда остановки.
    async fn reconnect(&mut self) -> bool {
        let mut delay = self.options.reconnect_initial;
        loop {
            tokio::select! {
                cmd = self.control.recv() => match cmd {
                    None | Some(Control::Shutdown) => return false,
                    Some(Control::Subscribe { ack, .. } | Control::Unsubscribe { ack, .. }) => {
                        let _ = ack.send(Err(ConnectionError::ConnectionClosed.into()));
                        continue;
                    }
                },
                _ = sleep(delay) => {}
            }

            match self.resubscribe().await {
                Ok(conn) => {
                    info!(endpoint = %self.endpoint(), "Subscriber connection restored");
                    self.conn = Some(conn);
                    self.emit(TransportEvent::ConnectionRestored {
                        endpoint: self.endpoint(),
                    });
                    return true;
                }
                Err(err) => {
                    debug!(endpoint = %self.endpoint(), ?delay, "Reconnect attempt failed: {err}");
                    delay = (delay * 2).min(self.options.reconnect_max);
                }
            }
        }
    }

    /// Открывает новое соединение и переоформляет все активные подписки.
    async fn resubscribe(&self) -> ProbeResult<RespConnection> {
        let mut conn = RespConnection::open(&self.options).await?;
        for channel in self.handlers.keys() {
            let kind: &[u8] = if is_pattern(&channel) {
                b"PSUBSCRIBE"
            } else {
                b"SUBSCRIBE"
            };
            conn.send([kind, channel.as_bytes()]).await?;
        }
        Ok(conn)
    }

    fn endpoint(&self) -> String {
        self.options.primary_endpoint().to_string()
    }

    fn emit(
        &self,
        event: TransportEvent,
    ) {
        let _ = self.events.send(event);
    }
}

/// Фабрика соединений к Redis.
#[derive(Clone)]
pub struct RedisConnector {
    options: Arc<RedisOptions>,
}

impl RedisConnector {
    pub fn new(options: RedisOptions) -> Self {
        Self {
            options: Arc::new(options),
        }
    }
}

#[async_trait]
impl Connector for RedisConnector {
    async fn connect(&self) -> ProbeResult<Arc<dyn Transport>> {
        let transport = RedisTransport::connect((*self.options).clone()).await?;
        Ok(Arc::new(transport))
    }

    fn endpoint(&self) -> String {
        self.options.primary_endpoint().to_string()
    }
}
