//! SQL query metrics.
//!
//! Latency gauges keyed by the call site (`file`, `linenum`) that issued an outlier query, plus
//! process-wide counters of analysed and duplicated queries.

use prometheus::{GaugeVec, IntCounter, Opts, Registry};
use tracing::warn;

use crate::capture::StackFrame;
use crate::inspect::OutlierKind;

/// Query metrics instruments using Prometheus
#[derive(Clone)]
pub struct QueryMetrics {
    /// Latency of queries over the standard deviation limit (seconds)
    pub(crate) stddev_latency: GaugeVec,
    /// Latency of queries over the absolute limit (seconds)
    pub(crate) absolute_latency: GaugeVec,
    /// Queries analysed across all requests
    pub(crate) queries_total: IntCounter,
    /// Duplicate queries reported across all requests
    pub(crate) duplicates_total: IntCounter,
    registry: Registry,
}

impl QueryMetrics {
    /// Create the instruments and register them with `registry`
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let stddev_latency = GaugeVec::new(
            Opts::new(
                "qinspect_sql_query_stddev_latency_seconds",
                "Latency of SQL queries exceeding the configured standard deviations above the request's mean query time",
            ),
            &["file", "linenum"],
        )?;
        registry.register(Box::new(stddev_latency.clone()))?;

        let absolute_latency = GaugeVec::new(
            Opts::new(
                "qinspect_sql_query_absolute_latency_seconds",
                "Latency of SQL queries exceeding the configured absolute limit",
            ),
            &["file", "linenum"],
        )?;
        registry.register(Box::new(absolute_latency.clone()))?;

        let queries_total = IntCounter::new("qinspect_sql_queries_total", "SQL queries analysed")?;
        registry.register(Box::new(queries_total.clone()))?;

        let duplicates_total = IntCounter::new(
            "qinspect_sql_duplicate_queries_total",
            "Repeated SQL queries beyond the first occurrence",
        )?;
        registry.register(Box::new(duplicates_total.clone()))?;

        Ok(Self {
            stddev_latency,
            absolute_latency,
            queries_total,
            duplicates_total,
            registry: registry.clone(),
        })
    }

    /// Get reference to the Prometheus registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Set the latency gauge of the limit `kind` for the call site `frame`
    pub fn record_outlier_latency(&self, kind: OutlierKind, frame: &StackFrame, elapsed: f64) {
        let gauges = match kind {
            OutlierKind::StdDev { .. } => &self.stddev_latency,
            OutlierKind::Absolute => &self.absolute_latency,
        };

        let line = frame.line.to_string();
        match gauges.get_metric_with_label_values(&[frame.file.as_str(), line.as_str()]) {
            Ok(gauge) => gauge.set(elapsed),
            Err(e) => warn!("Failed to record outlier latency for {}: {}", frame, e),
        }
    }

    /// Count one analysed request
    pub fn record_request(&self, queries: usize, duplicates: usize) {
        self.queries_total.inc_by(queries as u64);
        self.duplicates_total.inc_by(duplicates as u64);
    }
}

impl std::fmt::Debug for QueryMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryMetrics").finish_non_exhaustive()
    }
}
