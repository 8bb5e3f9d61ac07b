use anyhow::Context;
use scriptbridge::{AllowList, Bridge, EXIT_STARTUP};
use scriptbridge_trace::{DualSink, install_panic_hook};
use utils::otel::init_tracing;

mod cli;
mod server;
mod utils;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() {
    let args = cli::Args::parse_or_exit();

    let (sink, log_error) = match DualSink::open(&args.log_file) {
        Ok(sink) => (sink, None),
        Err(err) => (DualSink::console(), Some(err)),
    };
    install_panic_hook(sink.clone());

    let provider = match init_tracing(sink.clone()) {
        Ok(provider) => provider,
        Err(err) => {
            sink.stderr()
                .write_line(&format!("failed to initialise logging: {err:#}"));
            std::process::exit(EXIT_STARTUP);
        }
    };
    if let Some(err) = log_error {
        tracing::warn!(
            path = %args.log_file.display(),
            error = %err,
            "log file unavailable, logging to console only"
        );
    }

    let code = match run(&args, &sink).await {
        Ok(code) => code,
        Err(err) => {
            tracing::error!(error = ?err, "bridge failed to start");
            EXIT_STARTUP
        }
    };

    drop(provider);
    std::process::exit(code);
}

async fn run(args: &cli::Args, sink: &DualSink) -> anyhow::Result<i32> {
    let source = args.source()?;
    let allow = AllowList::standard().context("failed to build script allow-list")?;
    let bridge = Bridge::load(&source, &allow, args.bridge_config())
        .context("failed to load script")?
        .with_marker_writer(sink.stdout());

    bridge.start().await.context("failed to connect to host")?;

    tokio::select! {
        () = server::shutdown_signal() => {
            tracing::info!("shutdown requested");
            bridge.stop().await;
        }
        () = bridge.wait() => {}
    }
    Ok(bridge.exit_code())
}
