use std::any::Any;

use crate::{ErrorExt, StatusCode};

/// Ошибки конфигурации харнесса.
#[derive(Debug, Clone)]
pub enum ConfigError {
    /// Конфигурацию не удалось загрузить или десериализовать
    Load { reason: String },
    /// Для выбранного профиля не задана строка подключения
    MissingConnectionString { profile: String },
    /// Строка подключения не разбирается
    InvalidConnectionString { value: String, reason: String },
    /// Неверное значение параметра
    InvalidValue { key: String, reason: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        match self {
            Self::Load { reason } => write!(f, "Failed to load configuration: {reason}"),
            Self::MissingConnectionString { profile } => {
                write!(f, "No connection string configured for profile '{profile}'")
            }
            Self::InvalidConnectionString { value, reason } => {
                write!(f, "Invalid connection string '{value}': {reason}")
            }
            Self::InvalidValue { key, reason } => write!(f, "Invalid value for '{key}': {reason}"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl ErrorExt for ConfigError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::MissingConnectionString { .. } => StatusCode::ConfigMissing,
            _ => StatusCode::ConfigInvalid,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
