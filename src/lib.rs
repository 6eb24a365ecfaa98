/// Console grammar and command execution (psub, punsub, pub, list, dispose).
pub mod command;
/// Settings: connection-string profiles, timeouts, logging.
pub mod config;
/// Logging setup (filters, formats, sinks).
pub mod logging;
/// Service instances: connection lifecycle, subscribe, publish, handshake, registry.
pub mod service;
/// Pub/Sub transports: in-process broker and Redis RESP client.
pub mod transport;

// -----------------------------------------------------------------------------
//  Frequently used public types
// -----------------------------------------------------------------------------

/// Console commands.
pub use command::{CommandProcessor, CommandReply, HarnessCommand, LineOutcome};
/// Configuration.
pub use config::{Profile, Settings};
/// Logging.
pub use logging::{init_logging, LoggingConfig, LoggingHandle};
/// Service layer.
pub use service::{
    HandshakeSummary, PatternSubscription, PublishOutcome, PublishRequest, ServiceInstance,
    ServiceRegistry,
};
/// Transports.
pub use transport::{
    Broker, Connector, LocalConnector, Message, RedisConnector, RedisOptions, Transport,
    TransportEvent,
};
/// Error types shared by all layers.
pub use zprobe_error::{ProbeResult, StackError, StatusCode};
