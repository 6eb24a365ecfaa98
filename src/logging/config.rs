use std::{env, fs, path::PathBuf, str::FromStr};

use serde::{Deserialize, Serialize};
use zprobe_error::ConfigError;

/// Переменная окружения, перекрывающая уровень логирования.
pub const LEVEL_ENV: &str = "ZPROBE_LOG_LEVEL";
/// Переменная окружения, перекрывающая формат консоли.
pub const FORMAT_ENV: &str = "ZPROBE_LOG_FORMAT";

const LEVELS: [&str; 6] = ["trace", "debug", "info", "warn", "error", "off"];

/// Формат вывода событий.
#[derive(Debug, Default, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
    #[default]
    Compact,
}

impl FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "pretty" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            other => Err(ConfigError::InvalidValue {
                key: "logging.format".to_string(),
                reason: format!("unknown log format '{other}'"),
            }),
        }
    }
}

/// Настройки консольного вывода.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct ConsoleConfig {
    pub enabled: bool,
    pub with_ansi: bool,
    pub with_target: bool,
    pub with_thread_ids: bool,
    pub with_line_numbers: bool,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            with_ansi: true,
            with_target: false,
            with_thread_ids: false,
            with_line_numbers: false,
        }
    }
}

/// Настройки файла с ежедневной ротацией.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct FileConfig {
    pub enabled: bool,
    pub dir: PathBuf,
    /// Префикс имени файла; к нему добавляется дата
    pub prefix: String,
    pub format: LogFormat,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            dir: PathBuf::from("logs"),
            prefix: "zprobe.log".to_string(),
            format: LogFormat::Json,
        }
    }
}

/// Конфигурация логирования (секция `logging`).
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Базовый уровень: trace, debug, info, warn, error, off
    pub level: String,
    /// Формат консоли
    pub format: LogFormat,
    pub console: ConsoleConfig,
    pub file: FileConfig,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::default(),
            console: ConsoleConfig::default(),
            file: FileConfig::default(),
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl LoggingConfig {
    /// Применяет `ZPROBE_LOG_LEVEL` и `ZPROBE_LOG_FORMAT`.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(level) = env::var(LEVEL_ENV) {
            self.level = level.trim().to_ascii_lowercase();
        }
        if let Ok(format) = env::var(FORMAT_ENV) {
            match format.parse() {
                Ok(format) => self.format = format,
                Err(err) => eprintln!("Ignoring {FORMAT_ENV}: {err}"),
            }
        }
    }

    /// Флаги `-v` / `-q` командной строки; `quiet` важнее.
    pub fn apply_verbosity(
        &mut self,
        verbose: bool,
        quiet: bool,
    ) {
        if quiet {
            self.level = "warn".to_string();
        } else if verbose {
            self.level = "debug".to_string();
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !LEVELS.contains(&self.level.as_str()) {
            return Err(ConfigError::InvalidValue {
                key: "logging.level".to_string(),
                reason: format!("unknown level '{}'", self.level),
            });
        }
        if self.file.enabled && self.file.prefix.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "logging.file.prefix".to_string(),
                reason: "must not be empty".to_string(),
            });
        }
        Ok(())
    }

    /// Создаёт каталог для файлового лога, если он включён.
    pub fn ensure_log_dir(&self) -> Result<(), ConfigError> {
        if self.file.enabled {
            fs::create_dir_all(&self.file.dir).map_err(|e| ConfigError::InvalidValue {
                key: "logging.file.dir".to_string(),
                reason: format!("{}: {e}", self.file.dir.display()),
            })?;
        }
        Ok(())
    }

    /// Директива для `EnvFilter`.
    pub fn build_filter_directive(&self) -> String {
        format!("{level},rustyline=warn", level = self.level)
    }
}
