//! Клиент Redis Pub/Sub поверх RESP2.

pub mod client;
pub mod connection;
pub mod frame;
pub mod options;

pub use client::{RedisConnector, RedisTransport};
pub use connection::RespConnection;
pub use frame::RespFrame;
pub use options::RedisOptions;
