use std::time::{Duration, Instant};

use tracing_appender::non_blocking::WorkerGuard;

/// Handle жизненного цикла логирования.
///
/// Держит guard файлового writer'а: пока handle жив, фоновый поток
/// дописывает буферизованные события на диск.
pub struct LoggingHandle {
    file_guard: Option<WorkerGuard>,
    /// Порог, после которого медленный shutdown выводит предупреждение
    flush_timeout: Duration,
}

impl LoggingHandle {
    pub fn new(file_guard: Option<WorkerGuard>) -> Self {
        Self {
            file_guard,
            flush_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_flush_timeout(
        mut self,
        timeout: Duration,
    ) -> Self {
        self.flush_timeout = timeout;
        self
    }

    pub fn has_file_sink(&self) -> bool {
        self.file_guard.is_some()
    }

    /// Сбрасывает файловый буфер и отпускает guard.
    pub fn shutdown(mut self) {
        let Some(guard) = self.file_guard.take() else {
            return;
        };
        tracing::debug!("Flushing file log");

        let started = Instant::now();
        drop(guard);
        let elapsed = started.elapsed();
        if elapsed > self.flush_timeout {
            eprintln!(
                "WARNING: Logging shutdown took {}ms (timeout: {}ms)",
                elapsed.as_millis(),
                self.flush_timeout.as_millis()
            );
        }
    }
}
