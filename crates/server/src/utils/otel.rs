use opentelemetry::{
    KeyValue, global,
    propagation::TextMapCompositePropagator,
    trace::{Tracer, TracerProvider, noop::NoopTracer},
};
use opentelemetry_otlp::{
    OTEL_EXPORTER_OTLP_ENDPOINT, OTEL_EXPORTER_OTLP_PROTOCOL, OTEL_EXPORTER_OTLP_TRACES_ENDPOINT,
    WithExportConfig,
};
use opentelemetry_sdk::{
    Resource,
    propagation::{BaggagePropagator, TraceContextPropagator},
    runtime,
    trace::{RandomIdGenerator, Sampler, span_processor_with_async_runtime::BatchSpanProcessor},
};
use opentelemetry_semantic_conventions::resource;
use scriptbridge_trace::{DualSink, fmt_layer};
use tracing::{Level, Subscriber, level_filters::LevelFilter};
use tracing_subscriber::{
    Layer, filter::FilterFn, layer::SubscriberExt, registry::LookupSpan, util::SubscriberInitExt,
};

const SERVICE_NAME: &str = "scriptbridge";

fn get_env_var(names: &[&'static str]) -> Option<String> {
    for name in names {
        if let Ok(value) = std::env::var(name) {
            return Some(value);
        }
    }
    None
}

/// Install the global subscriber: formatted events through `sink`, plus
/// OTLP span export when an endpoint is configured.
pub fn init_tracing(sink: DualSink) -> anyhow::Result<ProviderGuard> {
    let provider = if let Some(_endpoint) = get_env_var(&[
        OTEL_EXPORTER_OTLP_TRACES_ENDPOINT,
        OTEL_EXPORTER_OTLP_ENDPOINT,
    ]) {
        global::set_text_map_propagator(TextMapCompositePropagator::new(vec![
            Box::new(TraceContextPropagator::new()),
            Box::new(BaggagePropagator::new()),
        ]));

        let protocol = get_env_var(&[
            "OTEL_EXPORTER_OTLP_TRACES_PROTOCOL",
            OTEL_EXPORTER_OTLP_PROTOCOL,
        ])
        .unwrap_or_default();

        let exporter = match protocol.as_str() {
            "grpc" => opentelemetry_otlp::SpanExporter::builder()
                .with_tonic()
                .with_protocol(opentelemetry_otlp::Protocol::Grpc)
                .build(),
            "http/json" => opentelemetry_otlp::SpanExporter::builder()
                .with_http()
                .with_protocol(opentelemetry_otlp::Protocol::HttpJson)
                .build(),
            _ => opentelemetry_otlp::SpanExporter::builder()
                .with_http()
                .with_protocol(opentelemetry_otlp::Protocol::HttpBinary)
                .build(),
        }?;

        let provider = opentelemetry_sdk::trace::SdkTracerProvider::builder()
            .with_span_processor(BatchSpanProcessor::builder(exporter, runtime::Tokio).build())
            .with_sampler(Sampler::ParentBased(Box::new(Sampler::AlwaysOn)))
            .with_id_generator(RandomIdGenerator::default())
            .with_resource(
                Resource::builder()
                    .with_attribute(KeyValue::new(resource::SERVICE_NAME, SERVICE_NAME))
                    .build(),
            )
            .build();

        global::set_tracer_provider(provider.clone());
        Some(provider)
    } else {
        None
    };

    let envfilter = tracing_subscriber::EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .from_env()?;

    let registry =
        tracing_subscriber::Registry::default().with(fmt_layer(sink).with_filter(envfilter));

    match &provider {
        Some(provider) => registry
            .with(otel_layer(provider.tracer(SERVICE_NAME)))
            .try_init()?,
        None => registry.with(otel_layer(NoopTracer::new())).try_init()?,
    }

    Ok(ProviderGuard(provider))
}

fn otel_layer<S, T>(tracer: T) -> impl Layer<S>
where
    S: Subscriber + for<'span> LookupSpan<'span>,
    T: Tracer + 'static,
    T::Span: Send + Sync,
{
    tracing_opentelemetry::OpenTelemetryLayer::new(tracer)
        .with_location(false)
        .with_tracked_inactivity(false)
        .with_threads(false)
        .with_filter(FilterFn::new(|metadata| {
            *metadata.level() <= LevelFilter::INFO && metadata.target().starts_with(SERVICE_NAME)
        }))
}

/// Flushes and shuts down the tracer provider on drop.
pub struct ProviderGuard(Option<opentelemetry_sdk::trace::SdkTracerProvider>);

impl Drop for ProviderGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.0.take() {
            let _ = provider.shutdown();
        }
    }
}
