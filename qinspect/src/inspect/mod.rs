//! Per-request query analysis.
//!
//! A [`QueryInspector`] turns the queries a request issued into a report: repeated queries are
//! grouped ([`duplicates`]), slow queries are flagged against the configured limits
//! ([`outliers`]), and a summary is logged and attached to the response ([`report`]).
//!
//! Analysis is observational. Nothing here alters the response beyond the summary fields, and a
//! request without a recorded baseline is passed over silently.

pub mod duplicates;
pub mod normalize;
pub mod outliers;
pub mod report;

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, instrument};

use crate::capture::{QueryLog, StackFrame};
use crate::config::InspectConfig;
use crate::metrics::QueryMetrics;
use crate::scope::{RequestBaseline, ScopeTracker};

pub use normalize::Normalizer;
pub use outliers::{OutlierFlag, OutlierKind};
pub use report::MetadataSink;

/// A normalized query, ready for analysis
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryInfo {
    pub sql: String,
    /// Seconds, never negative
    pub elapsed: f64,
    /// Call sites within the configured roots, outermost first
    pub stack: Vec<StackFrame>,
}

impl QueryInfo {
    pub fn first_frame(&self) -> Option<&StackFrame> {
        self.stack.first()
    }
}

/// Outcome of analysing one request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisResult {
    pub query_count: usize,
    /// Seconds
    pub total_sql_time: f64,
    /// Repeated executions beyond the first, over groups meeting `duplicate_min`
    pub duplicate_count: usize,
    pub outliers: Vec<OutlierFlag>,
}

#[derive(Debug, Clone)]
pub struct QueryInspector {
    config: Arc<InspectConfig>,
    metrics: QueryMetrics,
    tracker: ScopeTracker,
}

impl QueryInspector {
    pub fn new(config: Arc<InspectConfig>, log: Arc<QueryLog>, metrics: QueryMetrics) -> Self {
        let tracker = ScopeTracker::new(log, Normalizer::from_config(&config));
        Self {
            config,
            metrics,
            tracker,
        }
    }

    pub fn config(&self) -> &InspectConfig {
        &self.config
    }

    pub fn tracker(&self) -> &ScopeTracker {
        &self.tracker
    }

    pub fn metrics(&self) -> &QueryMetrics {
        &self.metrics
    }

    /// Record the start of a request in the current scope
    pub fn begin(&self) -> Option<RequestBaseline> {
        self.tracker.begin()
    }

    /// Analyse the queries issued since [`QueryInspector::begin`] in the current scope, writing
    /// the summary fields into `sink`.
    ///
    /// Returns `None` when no baseline was recorded; nothing is logged or written in that case.
    #[instrument(skip_all)]
    pub fn inspect_scope<S: MetadataSink + ?Sized>(&self, sink: &mut S) -> Option<AnalysisResult> {
        let Some(scoped) = self.tracker.end() else {
            debug!("No request baseline in scope, skipping query analysis");
            return None;
        };
        Some(self.analyze(&scoped.queries, scoped.request_elapsed, sink))
    }

    /// Run every check over `infos` and output the summary
    pub fn analyze<S: MetadataSink + ?Sized>(
        &self,
        infos: &[QueryInfo],
        request_elapsed: Duration,
        sink: &mut S,
    ) -> AnalysisResult {
        let config = self.config.as_ref();

        let duplicate_count = duplicates::check_duplicates(infos, config);
        let mut outliers = outliers::check_stddev_limit(infos, config, &self.metrics);
        outliers.extend(outliers::check_absolute_limit(infos, config, &self.metrics));
        let total_sql_time = report::output_stats(infos, duplicate_count, request_elapsed, config, sink);

        self.metrics.record_request(infos.len(), duplicate_count);

        AnalysisResult {
            query_count: infos.len(),
            total_sql_time,
            duplicate_count,
            outliers,
        }
    }
}
