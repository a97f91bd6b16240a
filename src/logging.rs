use colored::*;
use std::fmt;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::fmt::format::{FormatEvent, FormatFields, Writer};
use tracing_subscriber::fmt::FmtContext;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::EnvFilter;

/// A custom tracing event formatter for colorizing log output based on level.
///
/// The benchmark's console output doubles as its result table, so the
/// formatter prints the bare message colored by severity, without
/// timestamps or level tags.
pub struct ColorizedFormatter;

impl<S, N> FormatEvent<S, N> for ColorizedFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        // Buffer the formatted fields to apply color to the entire line.
        let mut buffer = String::new();
        let mut buf_writer = Writer::new(&mut buffer);
        ctx.format_fields(buf_writer.by_ref(), event)?;

        let colored_output = match *event.metadata().level() {
            Level::INFO => buffer.white(),
            Level::WARN => buffer.yellow(),
            Level::ERROR => buffer.red(),
            Level::DEBUG => buffer.blue(),
            Level::TRACE => buffer.purple(),
        };

        writeln!(writer, "{}", colored_output)
    }
}

/// Install the global subscriber.
///
/// Verbosity defaults to `info` and can be raised with `-v` or overridden
/// entirely through `RUST_LOG`.
pub fn init(verbose: bool) {
    let default_directive = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    tracing_subscriber::fmt()
        .event_format(ColorizedFormatter)
        .with_env_filter(filter)
        .init();
}
