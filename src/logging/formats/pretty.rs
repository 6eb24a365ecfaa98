use tracing_subscriber::{
    fmt::{self as other_fmt, format::FmtSpan},
    layer::Layer as LayerTrait,
    registry::LookupSpan,
};

use crate::logging::config::ConsoleConfig;

/// Многострочный формат для отладки.
pub fn build_pretty_layer<S, W>(
    console: &ConsoleConfig,
    writer: W,
    with_ansi: bool,
) -> Box<dyn LayerTrait<S> + Send + Sync>
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    W: for<'writer> other_fmt::MakeWriter<'writer> + Send + Sync + 'static,
{
    let layer = other_fmt::layer()
        .event_format(other_fmt::format().pretty())
        .with_span_events(FmtSpan::CLOSE)
        .with_writer(writer)
        .with_ansi(with_ansi)
        .with_target(console.with_target)
        .with_thread_names(true)
        .with_thread_ids(console.with_thread_ids)
        .with_line_number(console.with_line_numbers);

    Box::new(layer)
}
