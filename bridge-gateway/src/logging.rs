//! Logging setup (SPEC_FULL.md §11). The donor wires a full OpenTelemetry
//! exporter pipeline behind its tracing subscriber; this proxy has one
//! upstream and no span collector to feed, so it keeps the subscriber half
//! of that setup only — `RUST_LOG`-driven filtering via `tracing-subscriber`.

use std::sync::OnceLock;

use tracing_subscriber::EnvFilter;

static INIT: OnceLock<()> = OnceLock::new();

pub fn init() {
    INIT.get_or_init(|| {
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
            .init();
    });
}
