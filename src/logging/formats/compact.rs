use tracing_subscriber::{fmt, layer::Layer as LayerTrait, registry::LookupSpan};

use crate::logging::config::ConsoleConfig;

/// Однострочный формат; формат консоли по умолчанию.
pub fn build_compact_layer<S, W>(
    console: &ConsoleConfig,
    writer: W,
    with_ansi: bool,
) -> Box<dyn LayerTrait<S> + Send + Sync>
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    W: for<'writer> fmt::MakeWriter<'writer> + Send + Sync + 'static,
{
    let layer = fmt::layer()
        .event_format(fmt::format().compact())
        .with_writer(writer)
        .with_ansi(with_ansi)
        .with_target(console.with_target)
        .with_thread_names(false)
        .with_thread_ids(console.with_thread_ids)
        .with_line_number(console.with_line_numbers);

    Box::new(layer)
}
