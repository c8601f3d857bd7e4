//! Conversion of captured records into [`QueryInfo`].

use once_cell::sync::Lazy;
use regex::Regex;

use super::QueryInfo;
use crate::capture::sqlx_layer::LAYER_FILE;
use crate::capture::{CAPTURE_FILE, RawQueryRecord, STACK_FILE, StackFrame};
use crate::config::InspectConfig;

/// `= <integer literal>`, the part of a query that differs between otherwise identical lookups
static SQL_ID_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"=\s*\d+").expect("Failed to compile SQL id pattern"));

/// Source files of the instrumentation itself, never reported as call sites.
///
/// Resolved frames may carry absolute paths, so these are matched as path suffixes.
const OWN_FILES: &[&str] = &[CAPTURE_FILE, STACK_FILE, LAYER_FILE, file!()];

/// Replace every `= <digits>` with `= ?`.
pub fn mask_sql(sql: &str) -> String {
    SQL_ID_PATTERN.replace_all(sql, "= ?").into_owned()
}

#[derive(Debug, Clone, Default)]
pub struct Normalizer {
    roots: Vec<String>,
}

impl Normalizer {
    pub fn new(roots: Vec<String>) -> Self {
        Self { roots }
    }

    pub fn from_config(config: &InspectConfig) -> Self {
        Self::new(config.traceback_roots.clone())
    }

    /// Whether a frame from `path` belongs in a reported stack
    pub fn should_include(&self, path: &str) -> bool {
        if OWN_FILES.iter().any(|own| path.ends_with(own)) {
            return false;
        }
        self.roots.is_empty() || self.roots.iter().any(|root| path.starts_with(root.as_str()))
    }

    pub fn normalize(&self, records: &[RawQueryRecord]) -> Vec<QueryInfo> {
        records
            .iter()
            .filter_map(|record| {
                let sql = record.sql.as_deref()?;
                Some(QueryInfo {
                    sql: mask_sql(sql),
                    elapsed: record.elapsed.max(0.0),
                    stack: self.filter_stack(record.stack.as_deref().unwrap_or_default()),
                })
            })
            .collect()
    }

    fn filter_stack(&self, frames: &[StackFrame]) -> Vec<StackFrame> {
        frames.iter().filter(|frame| self.should_include(&frame.file)).cloned().collect()
    }
}
