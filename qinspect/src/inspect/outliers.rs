//! Latency outlier checks.
//!
//! Two independent checks run over a request's queries:
//!
//! - **Standard deviation**: flags queries slower than `mean + stddev * stddev_limit`.
//! - **Absolute**: flags queries slower than `absolute_limit` milliseconds.
//!
//! Both are strict (`elapsed > limit`) and purely observational. Every stack frame attributed to a
//! flagged query updates the matching latency gauge, and one warning is logged per flagged query.
//!
//! The deviation used by the first check is not the textbook sample standard deviation: it is
//! `sqrt(sum(|x - mean|) / n / (n - 1))`, i.e. mean absolute deviation inside the square root.

use serde::Serialize;
use tracing::warn;

use super::QueryInfo;
use super::report::{as_millis, truncate_sql};
use crate::capture::StackFrame;
use crate::config::InspectConfig;
use crate::metrics::QueryMetrics;

/// Which limit a query exceeded
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutlierKind {
    StdDev { multiplier: f64 },
    Absolute,
}

/// A query that exceeded a latency limit
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutlierFlag {
    pub kind: OutlierKind,
    pub sql: String,
    /// Seconds
    pub elapsed: f64,
    /// Seconds
    pub limit: f64,
    /// First attributable call site, if any
    pub frame: Option<StackFrame>,
}

impl OutlierFlag {
    /// Seconds over the limit
    pub fn excess(&self) -> f64 {
        self.elapsed - self.limit
    }
}

/// Mean and deviation of a batch's elapsed times, in seconds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatencyStats {
    pub mean: f64,
    pub stddev: f64,
}

impl LatencyStats {
    pub fn from_queries(infos: &[QueryInfo]) -> Option<Self> {
        if infos.is_empty() {
            return None;
        }

        // Running mean: exact when every sample is identical
        let mean = infos
            .iter()
            .enumerate()
            .fold(0.0, |mean, (i, info)| mean + (info.elapsed - mean) / (i + 1) as f64);

        let n = infos.len() as f64;
        let stddev = if infos.len() < 2 {
            0.0
        } else {
            let deviation: f64 = infos.iter().map(|info| (info.elapsed - mean).abs()).sum();
            ((1.0 / (n - 1.0)) * (deviation / n)).sqrt()
        };

        Some(Self { mean, stddev })
    }

    pub fn limit(&self, multiplier: f64) -> f64 {
        self.mean + self.stddev * multiplier
    }
}

pub fn check_stddev_limit(infos: &[QueryInfo], config: &InspectConfig, metrics: &QueryMetrics) -> Vec<OutlierFlag> {
    let Some(multiplier) = config.stddev_limit else {
        return Vec::new();
    };
    let Some(stats) = LatencyStats::from_queries(infos) else {
        return Vec::new();
    };

    flag_slow_queries(
        infos,
        stats.limit(multiplier),
        OutlierKind::StdDev { multiplier },
        config,
        metrics,
    )
}

pub fn check_absolute_limit(infos: &[QueryInfo], config: &InspectConfig, metrics: &QueryMetrics) -> Vec<OutlierFlag> {
    match config.absolute_limit_secs() {
        Some(limit) if !infos.is_empty() => flag_slow_queries(infos, limit, OutlierKind::Absolute, config, metrics),
        _ => Vec::new(),
    }
}

fn flag_slow_queries(
    infos: &[QueryInfo],
    limit: f64,
    kind: OutlierKind,
    config: &InspectConfig,
    metrics: &QueryMetrics,
) -> Vec<OutlierFlag> {
    infos
        .iter()
        .filter(|info| info.elapsed > limit)
        .map(|info| {
            for frame in &info.stack {
                metrics.record_outlier_latency(kind, frame, info.elapsed);
            }

            let flag = OutlierFlag {
                kind,
                sql: info.sql.clone(),
                elapsed: info.elapsed,
                limit,
                frame: info.first_frame().cloned(),
            };
            log_outlier(&flag, config.sql_log_limit);
            flag
        })
        .collect()
}

/// Multiplier as logged: whole deviations, truncated toward zero
fn whole_devs(multiplier: f64) -> i64 {
    multiplier.trunc() as i64
}

fn log_outlier(flag: &OutlierFlag, sql_log_limit: Option<usize>) {
    let sql = truncate_sql(&flag.sql, sql_log_limit);
    let elapsed_ms = as_millis(flag.elapsed);
    let limit_ms = as_millis(flag.limit);

    match (flag.kind, &flag.frame) {
        (OutlierKind::StdDev { multiplier }, Some(frame)) => warn!(
            "[SQL] query execution of {elapsed_ms} ms over limit of {limit_ms} ms ({} dev above mean) in file {}, line number {}: {sql}",
            whole_devs(multiplier),
            frame.file,
            frame.line
        ),
        (OutlierKind::StdDev { multiplier }, None) => warn!(
            "[SQL] query execution of {elapsed_ms} ms over limit of {limit_ms} ms ({} dev above mean): {sql}",
            whole_devs(multiplier)
        ),
        (OutlierKind::Absolute, Some(frame)) => warn!(
            "[SQL] query execution of {elapsed_ms} ms over absolute limit of {limit_ms} ms in file {}, line number {}: {sql}",
            frame.file, frame.line
        ),
        (OutlierKind::Absolute, None) => {
            warn!("[SQL] query execution of {elapsed_ms} ms over absolute limit of {limit_ms} ms: {sql}")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{CapturedLogs, query, query_at};
    use prometheus::Registry;

    fn metrics() -> (Registry, QueryMetrics) {
        let registry = Registry::new();
        let metrics = QueryMetrics::new(&registry).expect("Failed to create metrics");
        (registry, metrics)
    }

    fn family_size(registry: &Registry, name: &str) -> usize {
        registry
            .gather()
            .iter()
            .find(|family| family.name() == name)
            .map_or(0, |family| family.get_metric().len())
    }

    #[test]
    fn test_stats_single_query_has_zero_deviation() {
        let stats = LatencyStats::from_queries(&[query("SELECT 1", 0.25)]).unwrap();
        assert_eq!(stats.mean, 0.25);
        assert_eq!(stats.stddev, 0.0);
    }

    #[test]
    fn test_stats_empty_batch() {
        assert!(LatencyStats::from_queries(&[]).is_none());
    }

    #[test]
    fn test_stats_uses_absolute_deviation_formula() {
        let infos = vec![query("a", 1.0), query("b", 2.0), query("c", 3.0), query("d", 6.0)];
        let stats = LatencyStats::from_queries(&infos).unwrap();

        // mean = 3, sum |x - mean| = 2 + 1 + 0 + 3 = 6, sqrt(1/3 * 6/4) = sqrt(0.5)
        assert!((stats.mean - 3.0).abs() < 1e-12);
        assert!((stats.stddev - 0.5f64.sqrt()).abs() < 1e-12);
        assert!((stats.limit(2.0) - (3.0 + 2.0 * 0.5f64.sqrt())).abs() < 1e-12);
    }

    #[test]
    fn test_identical_latencies_never_flagged() {
        let (_registry, metrics) = metrics();
        for elapsed in [0.1, 0.3, 0.0123, 1.7] {
            let infos: Vec<_> = (0..7).map(|_| query("SELECT 1", elapsed)).collect();
            let stats = LatencyStats::from_queries(&infos).unwrap();
            assert_eq!(stats.stddev, 0.0);

            for multiplier in [0.0, 1.0, 3.0, 100.0] {
                let config = InspectConfig {
                    stddev_limit: Some(multiplier),
                    ..Default::default()
                };
                assert!(check_stddev_limit(&infos, &config, &metrics).is_empty());
            }
        }
    }

    #[test]
    fn test_stddev_flags_slow_query() {
        let logs = CapturedLogs::default();
        let _guard = tracing::subscriber::set_default(logs.subscriber());
        let (registry, metrics) = metrics();
        let config = InspectConfig {
            stddev_limit: Some(1.0),
            ..Default::default()
        };
        let mut infos: Vec<_> = (0..9).map(|_| query("SELECT * FROM books", 0.01)).collect();
        infos.push(query_at("SELECT * FROM reviews", 1.0, "src/reviews.rs", 12));

        let flags = check_stddev_limit(&infos, &config, &metrics);

        assert_eq!(flags.len(), 1);
        let flag = &flags[0];
        assert_eq!(flag.kind, OutlierKind::StdDev { multiplier: 1.0 });
        assert_eq!(flag.sql, "SELECT * FROM reviews");
        assert_eq!(flag.frame, Some(StackFrame::new("src/reviews.rs", 12)));
        assert!(flag.excess() > 0.0);

        let gauge = metrics.stddev_latency.with_label_values(&["src/reviews.rs", "12"]).get();
        assert_eq!(gauge, 1.0);
        assert_eq!(family_size(&registry, "qinspect_sql_query_absolute_latency_seconds"), 0);

        let contents = logs.contents();
        assert!(contents.contains("[SQL] query execution of 1000 ms over limit of"));
        assert!(contents.contains("(1 dev above mean) in file src/reviews.rs, line number 12: SELECT * FROM reviews"));
    }

    #[test]
    fn test_fractional_multiplier_logged_as_whole_devs() {
        let logs = CapturedLogs::default();
        let _guard = tracing::subscriber::set_default(logs.subscriber());
        let (_registry, metrics) = metrics();
        let config = InspectConfig {
            stddev_limit: Some(1.5),
            ..Default::default()
        };
        let mut infos: Vec<_> = (0..9).map(|_| query("SELECT * FROM books", 0.01)).collect();
        infos.push(query("SELECT * FROM reviews", 1.0));

        let flags = check_stddev_limit(&infos, &config, &metrics);

        assert_eq!(flags.len(), 1);
        assert_eq!(flags[0].kind, OutlierKind::StdDev { multiplier: 1.5 });
        let contents = logs.contents();
        assert!(contents.contains("(1 dev above mean): SELECT * FROM reviews"));
        assert!(!contents.contains("1.5 dev"));
    }

    #[test]
    fn test_stddev_disabled_without_multiplier() {
        let (_registry, metrics) = metrics();
        let infos = vec![query("a", 0.01), query("b", 10.0)];
        assert!(check_stddev_limit(&infos, &InspectConfig::default(), &metrics).is_empty());
    }

    #[test]
    fn test_absolute_limit_is_strict() {
        let (_registry, metrics) = metrics();
        let config = InspectConfig {
            absolute_limit: Some(100.0),
            ..Default::default()
        };

        let at_limit = vec![query("SELECT 1", 0.1)];
        assert!(check_absolute_limit(&at_limit, &config, &metrics).is_empty());

        let over_limit = vec![query("SELECT 1", 0.1 + 1e-9)];
        let flags = check_absolute_limit(&over_limit, &config, &metrics);
        assert_eq!(flags.len(), 1);
        assert_eq!(flags[0].kind, OutlierKind::Absolute);
        assert_eq!(flags[0].limit, 0.1);
    }

    #[test]
    fn test_absolute_without_frames_logs_frameless_and_skips_metrics() {
        let logs = CapturedLogs::default();
        let _guard = tracing::subscriber::set_default(logs.subscriber());
        let (registry, metrics) = metrics();
        let config = InspectConfig {
            absolute_limit: Some(100.0),
            ..Default::default()
        };

        let flags = check_absolute_limit(&[query("SELECT * FROM books", 0.15)], &config, &metrics);

        assert_eq!(flags.len(), 1);
        assert_eq!(flags[0].frame, None);
        assert_eq!(family_size(&registry, "qinspect_sql_query_absolute_latency_seconds"), 0);

        let contents = logs.contents();
        assert!(contents.contains("over absolute limit of 100 ms: SELECT * FROM books"));
        assert!(!contents.contains("line number"));
    }

    #[test]
    fn test_absolute_updates_gauge_for_every_frame() {
        let (registry, metrics) = metrics();
        let config = InspectConfig {
            absolute_limit: Some(50.0),
            ..Default::default()
        };
        let mut info = query_at("SELECT 1", 0.2, "src/handlers.rs", 40);
        info.stack.push(StackFrame::new("src/repo.rs", 8));

        check_absolute_limit(&[info], &config, &metrics);

        assert_eq!(family_size(&registry, "qinspect_sql_query_absolute_latency_seconds"), 2);
        assert_eq!(metrics.absolute_latency.with_label_values(&["src/repo.rs", "8"]).get(), 0.2);
    }

    #[test]
    fn test_negative_absolute_limit_flags_everything() {
        let logs = CapturedLogs::default();
        let _guard = tracing::subscriber::set_default(logs.subscriber());
        let (_registry, metrics) = metrics();
        let config = InspectConfig {
            absolute_limit: Some(-1.0),
            ..Default::default()
        };

        let flags = check_absolute_limit(&[query("SELECT 1", 0.0)], &config, &metrics);

        assert_eq!(flags.len(), 1);
        assert!(logs.contents().contains("over absolute limit of -1 ms"));
    }

    #[test]
    fn test_checks_fire_independently() {
        let (_registry, metrics) = metrics();
        let config = InspectConfig {
            stddev_limit: Some(1.0),
            absolute_limit: Some(500.0),
            ..Default::default()
        };
        let mut infos: Vec<_> = (0..9).map(|_| query("SELECT 1", 0.01)).collect();
        infos.push(query("SELECT 2", 0.9));

        assert_eq!(check_stddev_limit(&infos, &config, &metrics).len(), 1);
        assert_eq!(check_absolute_limit(&infos, &config, &metrics).len(), 1);
    }

    #[test]
    fn test_empty_batch_is_noop() {
        let (_registry, metrics) = metrics();
        let config = InspectConfig {
            stddev_limit: Some(1.0),
            absolute_limit: Some(-1.0),
            ..Default::default()
        };
        assert!(check_stddev_limit(&[], &config, &metrics).is_empty());
        assert!(check_absolute_limit(&[], &config, &metrics).is_empty());
    }
}
