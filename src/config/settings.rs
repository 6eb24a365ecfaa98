use std::{path::Path, sync::Arc, time::Duration};

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use tracing::info;
use zprobe_error::{ConfigError, ProbeResult};

use super::profile::Profile;
use crate::{
    logging::LoggingConfig,
    transport::{Connector, LocalConnector, RedisConnector, RedisOptions},
};

/// Имя файла конфигурации без расширения (`zprobe.json`, `zprobe.toml`).
pub const CONFIG_BASENAME: &str = "zprobe";
/// Префикс переменных окружения; вложенные ключи разделяются `__`.
pub const ENV_PREFIX: &str = "ZPROBE";
/// Схема строки подключения для брокера внутри процесса.
pub const LOCAL_SCHEME: &str = "memory://";

/// Строки подключения по профилям.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ConnectionStrings {
    pub cluster: Option<String>,
    pub master1: Option<String>,
    pub master2: Option<String>,
    pub master3: Option<String>,
    pub slave1: Option<String>,
    pub slave2: Option<String>,
    pub slave3: Option<String>,
    pub dev: Option<String>,
    pub default: Option<String>,
}

impl ConnectionStrings {
    pub fn get(
        &self,
        profile: Profile,
    ) -> Option<&str> {
        let value = match profile {
            Profile::Master1 => &self.master1,
            Profile::Master2 => &self.master2,
            Profile::Master3 => &self.master3,
            Profile::Slave1 => &self.slave1,
            Profile::Slave2 => &self.slave2,
            Profile::Slave3 => &self.slave3,
            Profile::Dev => &self.dev,
            Profile::Default => &self.default,
        };
        value.as_deref().filter(|s| !s.trim().is_empty())
    }
}

/// Таймауты клиента; ключи строки подключения их перекрывают.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ClientSettings {
    pub connect_timeout_ms: u64,
    /// Таймаут чтения/записи на командном соединении
    pub sync_timeout_ms: u64,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 5000,
            sync_timeout_ms: 5000,
        }
    }
}

/// Экспоненциальная задержка переподключения подписчика.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ReconnectSettings {
    pub initial_ms: u64,
    pub max_ms: u64,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            initial_ms: 100,
            max_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HandshakeSettings {
    /// Сколько ждать подтверждения
    pub ack_timeout_ms: u64,
}

impl Default for HandshakeSettings {
    fn default() -> Self {
        Self {
            ack_timeout_ms: 500,
        }
    }
}

/// Настройки харнесса.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Settings {
    pub connection_strings: ConnectionStrings,
    pub client: ClientSettings,
    pub reconnect: ReconnectSettings,
    pub handshake: HandshakeSettings,
    pub logging: LoggingConfig,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl Settings {
    /// Загружает настройки: значения по умолчанию, затем файл, затем
    /// переменные окружения `ZPROBE_*`.
    ///
    /// Без `path` ищется необязательный `zprobe.{json,toml,...}` в текущем
    /// каталоге; явно указанный файл обязателен.
    pub fn load(path: Option<&Path>) -> ProbeResult<Self> {
        let file = match path {
            Some(path) => File::from(path).required(true),
            None => File::with_name(CONFIG_BASENAME).required(false),
        };

        let cfg = Config::builder()
            // Значения по умолчанию
            .set_default("connection_strings.default", "127.0.0.1:6379")
            .map_err(load_error)?
            .set_default("handshake.ack_timeout_ms", 500)
            .map_err(load_error)?
            .add_source(file)
            // ZPROBE_CONNECTION_STRINGS__DEV=memory:// -> connection_strings.dev
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(load_error)?;

        let settings: Settings = cfg.try_deserialize().map_err(load_error)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = |key: &str, value: u64| {
            if value == 0 {
                Err(ConfigError::InvalidValue {
                    key: key.to_string(),
                    reason: "must be greater than zero".to_string(),
                })
            } else {
                Ok(())
            }
        };
        positive("client.connect_timeout_ms", self.client.connect_timeout_ms)?;
        positive("client.sync_timeout_ms", self.client.sync_timeout_ms)?;
        positive("reconnect.initial_ms", self.reconnect.initial_ms)?;
        positive("handshake.ack_timeout_ms", self.handshake.ack_timeout_ms)?;

        if self.reconnect.max_ms < self.reconnect.initial_ms {
            return Err(ConfigError::InvalidValue {
                key: "reconnect.max_ms".to_string(),
                reason: format!(
                    "{} is below reconnect.initial_ms {}",
                    self.reconnect.max_ms, self.reconnect.initial_ms
                ),
            });
        }
        self.logging.validate()
    }

    pub fn connection_string(
        &self,
        profile: Profile,
    ) -> Result<&str, ConfigError> {
        self.connection_strings
            .get(profile)
            .ok_or_else(|| ConfigError::MissingConnectionString {
                profile: profile.to_string(),
            })
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake.ack_timeout_ms)
    }

    /// Базовые параметры Redis из секций `client` и `reconnect`.
    pub fn redis_defaults(&self) -> RedisOptions {
        RedisOptions {
            connect_timeout: Duration::from_millis(self.client.connect_timeout_ms),
            sync_timeout: Duration::from_millis(self.client.sync_timeout_ms),
            ..RedisOptions::default()
        }
        .with_reconnect(
            Duration::from_millis(self.reconnect.initial_ms),
            Duration::from_millis(self.reconnect.max_ms),
        )
    }

    /// Фабрика соединений для профиля: `memory://` даёт брокер внутри
    /// процесса, остальное разбирается как строка подключения Redis.
    pub fn connector(
        &self,
        profile: Profile,
    ) -> ProbeResult<Arc<dyn Connector>> {
        let raw = self.connection_string(profile)?;
        if raw.trim().starts_with(LOCAL_SCHEME) {
            info!(%profile, "Using in-process broker");
            return Ok(Arc::new(LocalConnector::default()));
        }

        let options = RedisOptions::parse_with(raw, self.redis_defaults())?;
        info!(%profile, endpoint = options.primary_endpoint(), "Using Redis connection string");
        Ok(Arc::new(RedisConnector::new(options)))
    }
}

fn load_error(err: config::ConfigError) -> ConfigError {
    ConfigError::Load {
        reason: err.to_string(),
    }
}
