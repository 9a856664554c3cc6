//! Tracing and diagnostics bootstrap for binaries and demos.
//!
//! Library code only emits through `tracing`; wiring a subscriber is the
//! host application's job, and these helpers do the standard wiring.

use tracing_error::ErrorLayer;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Install the default subscriber: env-filtered fmt output plus span-trace
/// capture for miette reports.
///
/// Respects `RUST_LOG`; without it, only warnings and above are shown.
/// Calling this twice panics, so keep it at the top of `main`.
pub fn init_tracing() {
    let fmt_layer = fmt::layer()
        .with_target(false)
        .with_span_events(FmtSpan::CLOSE);

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("warn,probeflow=info"))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .with(ErrorLayer::default())
        .init();
}

/// Pretty panic reports through miette.
pub fn init_miette() {
    miette::set_panic_hook();
}
