//! Logging for the `memoria` binary and its crates.
//!
//! Log lines go to stderr so that `--json` output on stdout stays
//! machine-readable. The CLI maps `-v`/`-q` to a directive such as
//! `info,memoria=debug`; an explicit `RUST_LOG` wins over it. `--otel` adds span
//! export to stdout and is meant for local inspection only.
//!
//! ```no_run
//! memoria_observe::tracing_setup::init_tracing(false, "warn").unwrap();
//! // ... run the command ...
//! memoria_observe::tracing_setup::shutdown_tracing();
//! ```

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use std::sync::OnceLock;

/// Set only when `--otel` was requested.
static TRACER_PROVIDER: OnceLock<SdkTracerProvider> = OnceLock::new();

/// Filter for the session: a parseable `RUST_LOG`, else the directive derived
/// from the CLI verbosity flags. A malformed `RUST_LOG` falls back silently.
pub fn build_env_filter(default_directive: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive))
}

/// Installs the process-wide subscriber. Closed spans are logged with their
/// duration, which is how retrieval and extraction timings show up at
/// `debug`.
///
/// # Errors
///
/// Fails when a subscriber is already installed, e.g. a second call in the
/// same process.
pub fn init_tracing(
    enable_otel: bool,
    default_directive: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE);

    let env_filter = build_env_filter(default_directive);

    if enable_otel {
        let provider = SdkTracerProvider::builder()
            .with_simple_exporter(opentelemetry_stdout::SpanExporter::default())
            .build();
        let tracer = provider.tracer("memoria");
        let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);

        let _ = TRACER_PROVIDER.set(provider.clone());
        opentelemetry::global::set_tracer_provider(provider);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .with(otel_layer)
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()?;
    }

    Ok(())
}

/// Flushes exported spans before exit. Does nothing without `--otel`.
pub fn shutdown_tracing() {
    if let Some(provider) = TRACER_PROVIDER.get() {
        if let Err(e) = provider.shutdown() {
            eprintln!("Warning: OTel tracer provider shutdown error: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directive_used_without_rust_log() {
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        let filter = build_env_filter("memoria=debug");
        assert_eq!(filter.to_string(), "memoria=debug");
    }

    #[test]
    fn test_shutdown_without_otel_is_noop() {
        shutdown_tracing();
    }
}
