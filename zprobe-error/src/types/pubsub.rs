use std::any::Any;

use crate::{ErrorExt, StatusCode};

/// Ошибки подписки и публикации.
#[derive(Debug, Clone)]
pub enum PubSubError {
    /// Невалидный glob паттерн для подписки
    InvalidPattern { pattern: String, reason: String },
    /// Брокер не подтвердил подписку
    SubscribeFailed { channel: String, reason: String },
    /// Публикация отклонена транспортом
    PublishFailed { channel: String, reason: String },
    /// Поток доставок закрыт
    Closed { channel: String },
}

impl std::fmt::Display for PubSubError {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        match self {
            Self::InvalidPattern { pattern, reason } => {
                write!(f, "Invalid glob pattern '{pattern}': {reason}")
            }
            Self::SubscribeFailed { channel, reason } => {
                write!(f, "Subscribe to '{channel}' failed: {reason}")
            }
            Self::PublishFailed { channel, reason } => {
                write!(f, "Publish to '{channel}' failed: {reason}")
            }
            Self::Closed { channel } => write!(f, "Delivery stream closed: {channel}"),
        }
    }
}

impl std::error::Error for PubSubError {}

impl ErrorExt for PubSubError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidPattern { .. } => StatusCode::InvalidPattern,
            Self::SubscribeFailed { .. } => StatusCode::SubscriptionFailed,
            Self::PublishFailed { .. } => StatusCode::PublishFailed,
            Self::Closed { .. } => StatusCode::ConnectionClosed,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Конвертация из globset::Error
#[cfg(feature = "globset")]
impl From<globset::Error> for PubSubError {
    fn from(err: globset::Error) -> Self {
        PubSubError::InvalidPattern {
            pattern: err.glob().unwrap_or_default().to_string(),
            reason: err.kind().to_string(),
        }
    }
}
