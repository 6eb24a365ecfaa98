use crate::{ErrorExt, StatusCode};

/// Ошибки соединения с брокером.
#[derive(Debug, Clone)]
pub enum ConnectionError {
    /// Ошибка подключения к брокеру
    ConnectionFailed { address: String, reason: String },
    /// Таймаут подключения
    ConnectionTimeout { address: String },
    /// Соединение закрыто (брокером или локально)
    ConnectionClosed,
    /// Экземпляр сервиса ещё не подключён или подключение провалилось
    NotConnected { instance_id: u32 },
    /// Экземпляр сервиса уже освобождён
    Disposed { instance_id: u32 },
    /// Брокер ответил ошибкой
    ServerError { message: String },
    /// Ошибка протокола RESP
    Protocol { reason: String },
    /// Неожиданный ответ от брокера
    UnexpectedResponse { reply: String },
    /// Ошибка аутентификации
    AuthenticationFailed { reason: String },
    /// Таймаут чтения
    ReadTimeout,
    /// Таймаут записи
    WriteTimeout,
}

impl std::fmt::Display for ConnectionError {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        match self {
            Self::ConnectionFailed { address, reason } => {
                write!(f, "Failed to connect to {address}: {reason}")
            }
            Self::ConnectionTimeout { address } => write!(f, "Connection timeout: {address}"),
            Self::ConnectionClosed => write!(f, "Connection closed"),
            Self::NotConnected { instance_id } => {
                write!(f, "Service instance {instance_id} is not connected")
            }
            Self::Disposed { instance_id } => {
                write!(f, "Service instance {instance_id} is disposed")
            }
            Self::ServerError { message } => write!(f, "Server error: {message}"),
            Self::Protocol { reason } => write!(f, "Protocol error: {reason}"),
            Self::UnexpectedResponse { reply } => {
                write!(f, "Unexpected response from server: {reply}")
            }
            Self::AuthenticationFailed { reason } => {
                write!(f, "Authentication failed: {reason}")
            }
            Self::ReadTimeout => write!(f, "Read timeout"),
            Self::WriteTimeout => write!(f, "Write timeout"),
        }
    }
}

impl std::error::Error for ConnectionError {}

impl ErrorExt for ConnectionError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::ConnectionFailed { .. } => StatusCode::ConnectionFailed,
            Self::ConnectionTimeout { .. } => StatusCode::Timeout,
            Self::ConnectionClosed => StatusCode::ConnectionClosed,
            Self::NotConnected { .. } | Self::Disposed { .. } => StatusCode::NotConnected,
            Self::ServerError { .. } => StatusCode::ServerError,
            Self::Protocol { .. } | Self::UnexpectedResponse { .. } => StatusCode::ProtocolError,
            Self::AuthenticationFailed { .. } => StatusCode::ConnectionFailed,
            Self::ReadTimeout => StatusCode::ReadTimeout,
            Self::WriteTimeout => StatusCode::WriteTimeout,
        }
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn client_message(&self) -> String {
        match self {
            Self::ConnectionFailed { address, .. } => format!("Failed to connect to {address}"),
            Self::AuthenticationFailed { .. } => "Authentication failed".to_string(),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Тест проверяет статус код, Display и client_message для
    /// ConnectionFailed.
    #[test]
    fn test_connection_failed() {
        let err = ConnectionError::ConnectionFailed {
            address: "10.0.0.1:6379".to_string(),
            reason: "refused".to_string(),
        };
        assert_eq!(err.status_code(), StatusCode::ConnectionFailed);
        assert!(err.to_string().contains("refused"));
        assert_eq!(err.client_message(), "Failed to connect to 10.0.0.1:6379");
    }

    #[test]
    fn test_not_connected_and_disposed_share_code() {
        assert_eq!(
            ConnectionError::NotConnected { instance_id: 1 }.status_code(),
            StatusCode::NotConnected
        );
        assert_eq!(
            ConnectionError::Disposed { instance_id: 1 }.status_code(),
            StatusCode::NotConnected
        );
    }

    #[test]
    fn test_timeouts_are_retryable() {
        assert!(ConnectionError::ReadTimeout.status_code().is_retryable());
        assert!(ConnectionError::ConnectionClosed
            .status_code()
            .is_retryable());
        assert!(!ConnectionError::Protocol {
            reason: "x".to_string()
        }
        .status_code()
        .is_retryable());
    }
}
