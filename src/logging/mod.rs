//! Логирование харнесса поверх `tracing-subscriber`.
//!
//! Слои: `EnvFilter` (RUST_LOG важнее конфигурации), консоль в формате
//! compact/pretty/json и, по желанию, файл с ежедневной ротацией.

pub mod config;
mod filters;
pub mod formats;
mod formatter;
pub mod handle;
pub mod sinks;

pub use config::{ConsoleConfig, FileConfig, LogFormat, LoggingConfig};
pub use handle::LoggingHandle;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use zprobe_error::{GenericError, ProbeResult, StatusCode};

/// Устанавливает глобальный subscriber. Повторный вызов возвращает ошибку.
pub fn init_logging(mut config: LoggingConfig) -> ProbeResult<LoggingHandle> {
    config.apply_env_overrides();
    config.validate()?;
    config.ensure_log_dir()?;

    let env_filter = filters::build_filter_from_config(&config);
    let mut layers = Vec::new();

    if config.console.enabled {
        layers.push(sinks::console::layer_with_config(&config));
    }

    let file_guard = if config.file.enabled {
        let (file_layer, guard) = sinks::file::layer_with_config(&config);
        layers.push(file_layer);
        Some(guard)
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(layers)
        .try_init()
        .map_err(|e| GenericError::new(StatusCode::Internal, format!("logging init: {e}")))?;

    tracing::debug!(
        version = env!("CARGO_PKG_VERSION"),
        log_level = %config.level,
        format = ?config.format,
        file_enabled = config.file.enabled,
        "Logging system initialized"
    );

    Ok(LoggingHandle::new(file_guard))
}
