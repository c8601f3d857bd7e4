//! Prometheus metrics for query inspection.
//!
//! Instruments are owned by [`QueryMetrics`] and registered against a registry supplied by the
//! application, so tests and embedders can keep their own isolated registries.

mod queries;

pub use queries::QueryMetrics;

use prometheus::{Encoder, Registry, TextEncoder};

/// Encode every metric in `registry` in the Prometheus text exposition format
pub fn render(registry: &Registry) -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let mut buffer = vec![];
    encoder.encode(&registry.gather(), &mut buffer)?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}
