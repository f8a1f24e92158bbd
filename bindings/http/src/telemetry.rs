//! Structured JSON logging for the server.
//!
//! Filter precedence: a `RUST_LOG` that parses wins, then `log_filter` from
//! the config. A `log_filter` that does not parse fails startup instead of
//! silently logging nothing.

use tracing::Subscriber;
use tracing_bunyan_formatter::{BunyanFormattingLayer, JsonStorageLayer};
use tracing_log::LogTracer;
use tracing_subscriber::{fmt::MakeWriter, layer::SubscriberExt, EnvFilter, Registry};

use crate::error::ApiError;

/// Pick the filter from an optional `RUST_LOG` value and the configured one.
pub fn resolve_filter(rust_log: Option<&str>, configured: &str) -> Result<EnvFilter, ApiError> {
    if let Some(directives) = rust_log {
        match EnvFilter::try_new(directives) {
            Ok(filter) => return Ok(filter),
            Err(err) => eprintln!("ignoring RUST_LOG={directives:?}: {err}"),
        }
    }
    EnvFilter::try_new(configured)
        .map_err(|e| ApiError::Telemetry(format!("invalid log_filter {configured:?}: {e}")))
}

/// Bunyan-formatted subscriber named `service`, writing records to `sink`.
pub fn build_subscriber<Sink>(service: &str, filter: EnvFilter, sink: Sink) -> impl Subscriber + Send + Sync
where
    Sink: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    let json = BunyanFormattingLayer::new(service.to_owned(), sink);
    Registry::default().with(filter).with(JsonStorageLayer).with(json)
}

/// Route `log` records into tracing and install `subscriber` globally.
/// Only the first call in a process succeeds.
pub fn install(subscriber: impl Subscriber + Send + Sync) -> Result<(), ApiError> {
    LogTracer::init().map_err(|e| ApiError::Telemetry(e.to_string()))?;
    tracing::subscriber::set_global_default(subscriber).map_err(|e| ApiError::Telemetry(e.to_string()))
}
