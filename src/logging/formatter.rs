//! Выбор слоя по формату; тип формата стирается в boxed trait-объект.

use tracing_subscriber::{fmt::MakeWriter, layer::Layer as LayerTrait, registry::LookupSpan};

use super::{
    config::{ConsoleConfig, LogFormat},
    formats::{compact, json, pretty},
};

pub fn build_formatter<S, W>(
    console: &ConsoleConfig,
    format: LogFormat,
    writer: W,
    with_ansi: bool,
) -> Box<dyn LayerTrait<S> + Send + Sync>
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    W: for<'writer> MakeWriter<'writer> + Send + Sync + 'static,
{
    match format {
        LogFormat::Json => json::build_json_layer(console, writer),
        LogFormat::Pretty => pretty::build_pretty_layer(console, writer, with_ansi),
        LogFormat::Compact => compact::build_compact_layer(console, writer, with_ansi),
    }
}
