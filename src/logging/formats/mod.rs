//! Слои `tracing-subscriber` для каждого [`LogFormat`](super::config::LogFormat).

pub mod compact;
pub mod json;
pub mod pretty;
