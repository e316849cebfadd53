// [libs/shared/telemetry/src/lib.rs]
//! Structured logging bootstrap shared by every orchestrator binary.
//!
//! Development builds get compact, human-readable output; release builds
//! emit flattened JSON suitable for log aggregation. A global panic hook
//! routes thread panics through `tracing` instead of letting them print
//! straight to stderr, so a panic in a background loop still shows up
//! alongside the rest of a service's structured logs.

use std::panic;

use tracing::{error, info, instrument};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Initializes the global `tracing` subscriber and panic hook for `service_name`.
///
/// # Behavior
/// - Debug builds: compact, colorized output with the target omitted.
/// - Release builds: one flattened JSON object per log line.
///
/// The filter defaults to `<service_name>=debug` (debug builds) or
/// `<service_name>=info` (release builds), with `tower_http` and `hyper`
/// pinned to `warn` to keep request-level noise down. Set `RUST_LOG` to
/// override.
///
/// # Panics
/// Panics if a global subscriber has already been installed in this process.
#[instrument(skip_all)]
pub fn init_tracing(service_name: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!(
            "{service_name}={level},tower_http=warn,hyper=warn",
            level = if cfg!(debug_assertions) { "debug" } else { "info" }
        )
        .into()
    });

    if cfg!(debug_assertions) {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().compact().with_target(false))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().flatten_event(true))
            .init();
    }

    let service = service_name.to_string();
    panic::set_hook(Box::new(move |info| {
        let location = info
            .location()
            .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
            .unwrap_or_else(|| "unknown".to_string());

        let payload = info
            .payload()
            .downcast_ref::<&str>()
            .copied()
            .or_else(|| info.payload().downcast_ref::<String>().map(|s| s.as_str()))
            .unwrap_or("<no panic message>");

        error!(target: "panic", service = %service, location = %location, "thread panicked: {payload}");
    }));

    info!(service = %service_name, "tracing initialized");
}
