use std::time::Duration;

use zprobe_error::ConfigError;

/// Порт Redis по умолчанию.
pub const DEFAULT_PORT: u16 = 6379;

/// Параметры подключения к Redis, разобранные из строки подключения.
///
/// Формат: `host[:port][,host2:port]...[,password=..][,user=..][,name=..]
/// [,connectTimeout=ms][,syncTimeout=ms]`. Неизвестные ключи игнорируются.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedisOptions {
    pub endpoints: Vec<String>,
    pub password: Option<String>,
    pub user: Option<String>,
    pub client_name: Option<String>,
    pub connect_timeout: Duration,
    /// Таймаут чтения/записи на командном соединении
    pub sync_timeout: Duration,
    pub reconnect_initial: Duration,
    pub reconnect_max: Duration,
}

impl Default for RedisOptions {
    fn default() -> Self {
        Self {
            endpoints: vec![format!("127.0.0.1:{DEFAULT_PORT}")],
            password: None,
            user: None,
            client_name: None,
            connect_timeout: Duration::from_secs(5),
            sync_timeout: Duration::from_secs(5),
            reconnect_initial: Duration::from_millis(100),
            reconnect_max: Duration::from_secs(10),
        }
    }
}

impl RedisOptions {
    pub fn parse(input: &str) -> Result<Self, ConfigError> {
        Self::parse_with(input, Self::default())
    }

    /// Разбирает строку поверх `base`: ключи строки перекрывают значения
    /// базовых параметров.
    pub fn parse_with(
        input: &str,
        base: Self,
    ) -> Result<Self, ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidConnectionString {
            value: input.to_string(),
            reason,
        };

        let mut options = Self {
            endpoints: Vec::new(),
            ..base
        };

        for part in input.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let Some((key, value)) = part.split_once('=') else {
                options.endpoints.push(normalize_endpoint(part).map_err(invalid)?);
                continue;
            };
            let value = value.trim();
            match key.trim().to_ascii_lowercase().as_str() {
                "password" => options.password = Some(value.to_string()),
                "user" => options.user = Some(value.to_string()),
                "name" => options.client_name = Some(value.to_string()),
                "connecttimeout" => {
                    options.connect_timeout = parse_millis("connectTimeout", value).map_err(invalid)?
                }
                "synctimeout" => {
                    options.sync_timeout = parse_millis("syncTimeout", value).map_err(invalid)?
                }
                other => tracing::debug!(option = other, "Ignoring unsupported connection option"),
            }
        }

        if options.endpoints.is_empty() {
            return Err(invalid("no endpoint".to_string()));
        }
        Ok(options)
    }

    /// Первый адрес из списка; к нему и подключаемся.
    pub fn primary_endpoint(&self) -> &str {
        self.endpoints
            .first()
            .map(String::as_str)
            .unwrap_or("127.0.0.1:6379")
    }

    pub fn with_reconnect(
        mut self,
        initial: Duration,
        max: Duration,
    ) -> Self {
        self.reconnect_initial = initial;
        self.reconnect_max = max.max(initial);
        self
    }
}

fn normalize_endpoint(raw: &str) -> Result<String, String> {
    match raw.rsplit_once(':') {
        Some((host, port)) => {
            if host.is_empty() {
                return Err(format!("missing host in '{raw}'"));
            }
            port.parse::<u16>()
                .map_err(|_| format!("invalid port in '{raw}'"))?;
            Ok(raw.to_string())
        }
        None => Ok(format!("{raw}:{DEFAULT_PORT}")),
    }
}

fn parse_millis(
    key: &str,
    value: &str,
) -> Result<Duration, String> {
    value
        .parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|_| format!("{key} must be a number of milliseconds, got '{value}'"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_connection_string() {
        let opts = RedisOptions::parse(
            "10.0.0.1:7000, 10.0.0.2:7001,password=secret,name=probe,connectTimeout=1500,syncTimeout=250,abortConnect=false",
        )
        .unwrap();

        assert_eq!(opts.endpoints, vec!["10.0.0.1:7000", "10.0.0.2:7001"]);
        assert_eq!(opts.primary_endpoint(), "10.0.0.1:7000");
        assert_eq!(opts.password.as_deref(), Some("secret"));
        assert_eq!(opts.client_name.as_deref(), Some("probe"));
        assert_eq!(opts.connect_timeout, Duration::from_millis(1500));
        assert_eq!(opts.sync_timeout, Duration::from_millis(250));
    }

    #[test]
    fn test_parse_adds_default_port() {
        let opts = RedisOptions::parse("localhost").unwrap();
        assert_eq!(opts.endpoints, vec!["localhost:6379"]);
        assert!(opts.password.is_none());
    }

    #[test]
    fn test_parse_errors() {
        assert!(RedisOptions::parse("").is_err());
        assert!(RedisOptions::parse("password=x").is_err());
        assert!(RedisOptions::parse("host:notaport").is_err());
        assert!(RedisOptions::parse("host:6379,syncTimeout=fast").is_err());
    }

    #[test]
    fn test_parse_with_base_defaults() {
        let base = RedisOptions {
            connect_timeout: Duration::from_millis(900),
            sync_timeout: Duration::from_millis(900),
            ..RedisOptions::default()
        };
        let opts = RedisOptions::parse_with("host:1,syncTimeout=50", base).unwrap();
        assert_eq!(opts.endpoints, vec!["host:1"]);
        assert_eq!(opts.connect_timeout, Duration::from_millis(900));
        assert_eq!(opts.sync_timeout, Duration::from_millis(50));
    }

    #[test]
    fn test_with_reconnect_keeps_max_above_initial() {
        let opts = RedisOptions::default()
            .with_reconnect(Duration::from_millis(500), Duration::from_millis(100));
        assert_eq!(opts.reconnect_max, Duration::from_millis(500));
    }
}
