//! Tracing subscriber setup for the `tramita serve` path.
//!
//! CLI commands install their own plain `fmt` subscriber; the server path
//! calls [`init_tracing`] instead, which adds span close timing and an
//! optional OpenTelemetry bridge for local span inspection.

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::EnvFilter;

/// Keeps the OTel tracer provider alive for the server's lifetime.
///
/// Dropping the guard flushes buffered spans and shuts the provider down,
/// so hold it until after the server has stopped. When OTel export is off
/// the guard is empty and drop is a no-op.
pub struct TracingGuard {
    provider: Option<SdkTracerProvider>,
}

impl Drop for TracingGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.provider.take() {
            if let Err(e) = provider.shutdown() {
                eprintln!("warning: failed to flush spans: {e}");
            }
        }
    }
}

/// Install the global tracing subscriber for the server.
///
/// Always installs a structured `fmt` layer with span close timing,
/// filtered via `RUST_LOG`. With `enable_otel`, spans are additionally
/// exported through OpenTelemetry to stdout; the stdout exporter is meant
/// for local development and is the place to swap in OTLP for a real
/// collector.
///
/// # Errors
///
/// Fails if a global subscriber is already set.
pub fn init_tracing(enable_otel: bool) -> Result<TracingGuard, TryInitError> {
    let registry = tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_span_events(FmtSpan::CLOSE),
        );

    if !enable_otel {
        registry.try_init()?;
        return Ok(TracingGuard { provider: None });
    }

    let provider = SdkTracerProvider::builder()
        .with_simple_exporter(opentelemetry_stdout::SpanExporter::default())
        .build();
    let tracer = provider.tracer("tramita");

    registry
        .with(tracing_opentelemetry::layer().with_tracer(tracer))
        .try_init()?;
    opentelemetry::global::set_tracer_provider(provider.clone());

    Ok(TracingGuard {
        provider: Some(provider),
    })
}
