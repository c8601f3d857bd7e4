//! Per-request summary output: the stats log line and the response metadata fields.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::time::Duration;

use axum::http::{HeaderMap, HeaderName, HeaderValue};
use tracing::{info, warn};

use super::QueryInfo;
use crate::config::InspectConfig;

pub const NUM_QUERIES_FIELD: &str = "X-QueryInspect-Num-SQL-Queries";
pub const TOTAL_SQL_TIME_FIELD: &str = "X-QueryInspect-Total-SQL-Time";
pub const TOTAL_REQUEST_TIME_FIELD: &str = "X-QueryInspect-Total-Request-Time";
pub const DUPLICATE_QUERIES_FIELD: &str = "X-QueryInspect-Duplicate-SQL-Queries";

const ELLIPSIS: &str = " ... ";

/// Destination for the named string fields attached to a response
pub trait MetadataSink {
    fn set_field(&mut self, name: &'static str, value: String);
}

impl MetadataSink for HeaderMap {
    fn set_field(&mut self, name: &'static str, value: String) {
        let header = match HeaderName::from_bytes(name.as_bytes()) {
            Ok(header) => header,
            Err(e) => {
                warn!("Skipping response header {}: {}", name, e);
                return;
            }
        };
        match HeaderValue::try_from(value) {
            Ok(value) => {
                self.insert(header, value);
            }
            Err(e) => warn!("Skipping response header {}: {}", name, e),
        }
    }
}

impl MetadataSink for BTreeMap<String, String> {
    fn set_field(&mut self, name: &'static str, value: String) {
        self.insert(name.to_string(), value);
    }
}

/// Seconds to whole milliseconds, truncating
pub(crate) fn as_millis(secs: f64) -> i64 {
    (secs * 1000.0) as i64
}

/// Shorten `sql` to at most `limit` characters, keeping its head and tail around an ellipsis.
pub fn truncate_sql(sql: &str, limit: Option<usize>) -> Cow<'_, str> {
    let Some(limit) = limit else {
        return Cow::Borrowed(sql);
    };

    let length = sql.chars().count();
    if length <= limit {
        return Cow::Borrowed(sql);
    }

    let keep = limit.saturating_sub(ELLIPSIS.len()) / 2;
    if keep == 0 {
        return Cow::Owned(sql.chars().take(limit).collect());
    }

    let head: String = sql.chars().take(keep).collect();
    let tail: String = sql.chars().skip(length - keep).collect();
    Cow::Owned(format!("{head}{ELLIPSIS}{tail}"))
}

/// Log the request summary and write the response fields, as configured.
///
/// Returns the total SQL time in seconds.
pub fn output_stats<S: MetadataSink + ?Sized>(
    infos: &[QueryInfo],
    duplicates: usize,
    request_elapsed: Duration,
    config: &InspectConfig,
    sink: &mut S,
) -> f64 {
    let sql_time: f64 = infos.iter().map(|info| info.elapsed).sum();
    let request_time = request_elapsed.as_secs_f64();

    if config.log_stats {
        info!(
            "[SQL] {} queries ({} duplicates), {} ms SQL time, {} ms total request time",
            infos.len(),
            duplicates,
            as_millis(sql_time),
            as_millis(request_time)
        );
    }

    if config.header_stats {
        sink.set_field(NUM_QUERIES_FIELD, infos.len().to_string());
        sink.set_field(TOTAL_SQL_TIME_FIELD, format!("{} ms", as_millis(sql_time)));
        sink.set_field(TOTAL_REQUEST_TIME_FIELD, format!("{} ms", as_millis(request_time)));
        sink.set_field(DUPLICATE_QUERIES_FIELD, duplicates.to_string());
    }

    sql_time
}
