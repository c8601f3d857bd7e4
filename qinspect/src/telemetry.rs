//! Tracing initialization.
//!
//! Sets up a `tracing-subscriber` registry with a console (fmt) layer filtered by `RUST_LOG`
//! (default `info`). Applications running on `sqlx` can additionally install the
//! [`SqlxCaptureLayer`] with [`init_telemetry_with_capture`]; it carries its own target filter so
//! query events reach the capture log even when the console only shows `info`.

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::capture::QueryLog;
use crate::capture::sqlx_layer::SqlxCaptureLayer;

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Initialize console logging
pub fn init_telemetry() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_filter(env_filter()))
        .try_init()?;

    info!("Telemetry initialized");
    Ok(())
}

/// Initialize console logging and record `sqlx` query events into `log`
pub fn init_telemetry_with_capture(log: Arc<QueryLog>) -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_filter(env_filter()))
        .with(SqlxCaptureLayer::new(log).with_filter(SqlxCaptureLayer::targets()))
        .try_init()?;

    info!("Telemetry initialized with sqlx query capture");
    Ok(())
}
