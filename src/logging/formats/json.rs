use tracing_subscriber::{fmt, layer::Layer as LayerTrait, registry::LookupSpan};

use crate::logging::config::ConsoleConfig;

/// JSON, одно событие на строку. Поля событий (`instance`, `channel`,
/// `work_id`, `token`) попадают в объект `fields`.
pub fn build_json_layer<S, W>(
    console: &ConsoleConfig,
    writer: W,
) -> Box<dyn LayerTrait<S> + Send + Sync>
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    W: for<'writer> fmt::MakeWriter<'writer> + Send + Sync + 'static,
{
    let json_fmt = fmt::format()
        .json()
        .with_current_span(true)
        .with_span_list(false);

    let layer = fmt::layer()
        .event_format(json_fmt)
        .with_writer(writer)
        .with_ansi(false)
        .with_target(console.with_target)
        .with_thread_names(true)
        .with_thread_ids(console.with_thread_ids)
        .with_line_number(console.with_line_numbers);

    Box::new(layer)
}
