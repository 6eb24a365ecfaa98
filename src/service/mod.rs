//! Ядро харнесса: экземпляры сервиса и операции над ними.
//!
//! - [`connection`]: жизненный цикл соединения и поток его событий;
//! - [`subscriber`]: подписки по шаблону с имитацией обработки;
//! - [`publisher`]: публикация с повторами;
//! - [`handshake`]: запрос/подтверждение через временные каналы ответа;
//! - [`registry`]: реестр экземпляров для fan-out сценариев.

pub mod connection;
pub mod handshake;
pub mod instance;
pub mod publisher;
pub mod registry;
pub mod subscriber;

pub use connection::{ConnectionEvent, ConnectionManager, ConnectionState};
pub use handshake::{
    HandshakeCoordinator, HandshakeSummary, ReplyCorrelation, ACK_MARKER, ACK_TIMEOUT,
    HANDSHAKE_FAILED,
};
pub use instance::{PublishOutcome, ServiceInstance};
pub use publisher::{PublishRequest, Publisher};
pub use registry::ServiceRegistry;
pub use subscriber::{PatternSubscription, StatsSnapshot, Subscriber, SubscriberStats};
