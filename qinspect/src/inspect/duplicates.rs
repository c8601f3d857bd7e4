//! Grouping of identical (normalized) queries.

use std::collections::HashMap;

use tracing::warn;

use super::QueryInfo;
use super::report::truncate_sql;
use crate::capture::StackFrame;
use crate::config::InspectConfig;

/// Queries sharing the same normalized SQL, in capture order
#[derive(Debug, Clone)]
pub struct DuplicateGroup<'a> {
    pub sql: &'a str,
    pub queries: Vec<&'a QueryInfo>,
}

impl DuplicateGroup<'_> {
    pub fn count(&self) -> usize {
        self.queries.len()
    }
}

/// Group queries by SQL. Groups appear in order of their first occurrence.
pub fn group_queries(infos: &[QueryInfo]) -> Vec<DuplicateGroup<'_>> {
    let mut index: HashMap<&str, usize> = HashMap::new();
    let mut groups: Vec<DuplicateGroup<'_>> = Vec::new();

    for info in infos {
        match index.get(info.sql.as_str()) {
            Some(&i) => groups[i].queries.push(info),
            None => {
                index.insert(&info.sql, groups.len());
                groups.push(DuplicateGroup {
                    sql: &info.sql,
                    queries: vec![info],
                });
            }
        }
    }

    groups
}

/// Occurrence count per SQL, most frequent first. Ties keep first-occurrence order.
pub fn count_duplicates(infos: &[QueryInfo]) -> Vec<(&str, usize)> {
    let mut counts: Vec<_> = group_queries(infos).iter().map(|group| (group.sql, group.count())).collect();
    counts.sort_by(|a, b| b.1.cmp(&a.1));
    counts
}

/// Number of repeated executions beyond the first, over groups with at least
/// `duplicate_min` occurrences.
///
/// Logs one warning per such group when `log_queries` is set, least repeated first, followed by
/// the first occurrence's stack when `log_tracebacks` is set.
pub fn check_duplicates(infos: &[QueryInfo], config: &InspectConfig) -> usize {
    let groups = group_queries(infos);
    let mut duplicated: Vec<&DuplicateGroup<'_>> =
        groups.iter().filter(|group| group.count() >= config.duplicate_min).collect();
    duplicated.sort_by(|a, b| b.count().cmp(&a.count()));
    duplicated.reverse();

    let total: usize = duplicated.iter().map(|group| group.count()).sum();
    let extra = total - duplicated.len();

    if config.log_queries {
        for group in &duplicated {
            warn!(
                "[SQL] repeated query ({}x): {}",
                group.count(),
                truncate_sql(group.sql, config.sql_log_limit)
            );

            if config.log_tracebacks
                && let Some(first) = group.queries.first()
                && !first.stack.is_empty()
            {
                warn!("Traceback:\n{}", format_stack(&first.stack));
            }
        }
    }

    extra
}

/// Render frames one per line, innermost last
pub fn format_stack(frames: &[StackFrame]) -> String {
    frames
        .iter()
        .map(|frame| format!("  File \"{}\", line {}\n", frame.file, frame.line))
        .collect()
}
