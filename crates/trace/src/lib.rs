mod sink;

use std::io::Write as _;

use tracing::Subscriber;
use tracing_subscriber::{Layer, registry::LookupSpan};

pub use sink::{DualSink, SinkWriter, Stream};

pub mod consts {
    /// Target for output produced by user scripts (`print`, `debug`).
    pub const TRACE_TARGET_SCRIPT: &str = "scriptbridge::script";
    /// Target for liveness monitor events.
    pub const TRACE_TARGET_MONITOR: &str = "scriptbridge::monitor";
}

/// Formatting layer writing every event through `sink`.
///
/// ANSI colours are disabled since the same bytes land in the log file.
pub fn fmt_layer<S>(sink: DualSink) -> impl Layer<S>
where
    S: Subscriber + for<'span> LookupSpan<'span>,
{
    tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_target(true)
        .with_writer(sink)
}

/// Route panic reports through the stderr side of `sink` so they reach the
/// log file as well.
pub fn install_panic_hook(sink: DualSink) {
    std::panic::set_hook(Box::new(move |info| {
        let mut writer = sink.stderr();
        let _ = writeln!(writer, "panic: {info}");
        let _ = writer.flush();
    }));
}
