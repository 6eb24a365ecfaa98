use std::{fmt, sync::Arc};

use tokio::{
    sync::broadcast::{self, error::RecvError},
    task::JoinHandle,
};
use tracing::{debug, info, warn};
use zprobe_error::{ConnectionError, ProbeResult};

use crate::transport::{Connector, Transport, TransportEvent, EVENT_CAPACITY};

/// Состояние соединения экземпляра сервиса в его жизненном цикле.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Ещё не подключались или уже освобождены
    Disconnected,
    /// Идёт установка соединения
    Connecting,
    Connected,
    /// Подключение не удалось; экземпляр непригоден до переподключения
    Failed,
}

impl fmt::Display for ConnectionState {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Событие соединения, помеченное экземпляром сервиса.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionEvent {
    pub instance_id: u32,
    pub event: TransportEvent,
}

/// Владелец единственного соединения экземпляра сервиса.
///
/// События транспорта пересылаются наблюдателем в поток
/// [`ConnectionEvent`] и логируются; на поведение они не влияют.
pub struct ConnectionManager {
    instance_id: u32,
    connector: Arc<dyn Connector>,
    transport: Option<Arc<dyn Transport>>,
    state: ConnectionState,
    disposed: bool,
    events: broadcast::Sender<ConnectionEvent>,
    watcher: Option<JoinHandle<()>>,
}

impl ConnectionManager {
    pub fn new(
        instance_id: u32,
        connector: Arc<dyn Connector>,
    ) -> Self {
        Self {
            instance_id,
            connector,
            transport: None,
            state: ConnectionState::Disconnected,
            disposed: false,
            events: broadcast::channel(EVENT_CAPACITY).0,
            watcher: None,
        }
    }

    /// Устанавливает соединение. Если оно уже есть, возвращает его же.
    pub async fn connect(&mut self) -> ProbeResult<Arc<dyn Transport>> {
        if self.disposed {
            return Err(ConnectionError::Disposed {
                instance_id: self.instance_id,
            }
            .into());
        }
        if let Some(transport) = &self.transport {
            return Ok(transport.clone());
        }

        self.state = ConnectionState::Connecting;
        debug!(instance = self.instance_id, endpoint = %self.connector.endpoint(), "Connecting");

        match self.connector.connect().await {
            Ok(transport) => {
                self.watcher = Some(self.spawn_watcher(transport.as_ref()));
                self.transport = Some(transport.clone());
                self.state = ConnectionState::Connected;
                info!(instance = self.instance_id, endpoint = %transport.endpoint(), "Connected");
                Ok(transport)
            }
            Err(err) => {
                self.state = ConnectionState::Failed;
                tracing::error!(instance = self.instance_id, "Broker not connected: {err}");
                Err(err)
            }
        }
    }

    fn spawn_watcher(
        &self,
        transport: &dyn Transport,
    ) -> JoinHandle<()> {
        let mut events = transport.events();
        let sender = self.events.clone();
        let instance_id = self.instance_id;

        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        log_event(instance_id, &event);
                        let _ = sender.send(ConnectionEvent { instance_id, event });
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(instance = instance_id, skipped, "Connection events lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }

    /// Текущее соединение.
    pub fn transport(&self) -> ProbeResult<Arc<dyn Transport>> {
        if self.disposed {
            return Err(ConnectionError::Disposed {
                instance_id: self.instance_id,
            }
            .into());
        }
        self.transport.clone().ok_or_else(|| {
            ConnectionError::NotConnected {
                instance_id: self.instance_id,
            }
            .into()
        })
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Подписка на события соединения этого экземпляра.
    pub fn subscribe_events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events.subscribe()
    }

    /// Освобождает соединение. Повторный вызов ничего не делает.
    pub async fn dispose(&mut self) -> ProbeResult<()> {
        if self.disposed {
            return Ok(());
        }
        self.disposed = true;
        self.state = ConnectionState::Disconnected;

        if let Some(watcher) = self.watcher.take() {
            watcher.abort();
        }
        if let Some(transport) = self.transport.take() {
            transport.close().await?;
            info!(instance = self.instance_id, "Connection disposed");
        }
        Ok(())
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Some(watcher) = self.watcher.take() {
            watcher.abort();
        }
    }
}

fn log_event(
    instance_id: u32,
    event: &TransportEvent,
) {
    match event {
        TransportEvent::ConnectionFailed { endpoint, reason } => {
            warn!(instance = instance_id, %endpoint, "Connection failed: {reason}")
        }
        TransportEvent::ConnectionRestored { endpoint } => {
            warn!(instance = instance_id, %endpoint, "Connection restored")
        }
        TransportEvent::BrokerError { endpoint, message } => {
            warn!(instance = instance_id, %endpoint, "Error message: {message}")
        }
    }
}
