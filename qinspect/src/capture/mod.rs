//! Query capture log.
//!
//! The [`QueryLog`] records every query the process issues, written by whatever wraps the database
//! access layer: [`QueryLog::capture`] and [`QueryLog::timed`] for code that calls the database
//! directly, or [`sqlx_layer::SqlxCaptureLayer`] for applications built on `sqlx`.
//!
//! Records captured inside a request scope are stored in that scope, one bounded window per log,
//! and vanish with it. Records captured outside any scope go to the log's own background window.
//! Each window holds at most `capacity` records, so a busy request or background job can only
//! evict its own oldest queries.
//!
//! Offsets are absolute within a window: [`QueryLog::len`] counts every record ever appended to
//! the current window, so an offset taken at request start stays meaningful after eviction.
pub mod sqlx_layer;
mod stack;

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::panic::Location;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::config::InspectConfig;
use crate::scope::{self, ScopeId};

pub(crate) use stack::STACK_FILE;

/// Source path of this module, excluded from captured stacks
pub(crate) const CAPTURE_FILE: &str = file!();

static NEXT_LOG_ID: AtomicU64 = AtomicU64::new(1);

/// A single frame of a captured call stack
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StackFrame {
    pub file: String,
    pub line: u32,
}

impl StackFrame {
    pub fn new(file: impl Into<String>, line: u32) -> Self {
        Self { file: file.into(), line }
    }
}

impl From<&Location<'_>> for StackFrame {
    fn from(location: &Location<'_>) -> Self {
        Self::new(location.file(), location.line())
    }
}

impl fmt::Display for StackFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

/// A query as captured, before normalization.
///
/// `sql` is `None` for driver operations that are not queries; those are skipped by analysis.
#[derive(Debug, Clone, PartialEq)]
pub struct RawQueryRecord {
    pub sql: Option<String>,
    /// Elapsed time in seconds
    pub elapsed: f64,
    pub stack: Option<Vec<StackFrame>>,
    pub scope: Option<ScopeId>,
}

/// Bounded run of records captured in one execution context.
#[derive(Debug, Default)]
pub(crate) struct CaptureWindow {
    records: VecDeque<RawQueryRecord>,
    /// Number of records dropped from the front to honor the capacity limit
    evicted: usize,
}

impl CaptureWindow {
    fn len(&self) -> usize {
        self.evicted + self.records.len()
    }

    fn push(&mut self, record: RawQueryRecord, capacity: usize) {
        if self.records.len() == capacity {
            self.records.pop_front();
            self.evicted += 1;
        }
        self.records.push_back(record);
    }

    fn since(&self, offset: usize) -> Vec<RawQueryRecord> {
        let start = offset.saturating_sub(self.evicted);
        self.records.iter().skip(start).cloned().collect()
    }
}

/// Bounded log of captured queries, partitioned by request scope.
#[derive(Debug)]
pub struct QueryLog {
    id: u64,
    background: RwLock<CaptureWindow>,
    capacity: usize,
    capture_stacks: bool,
}

impl QueryLog {
    pub fn new(capacity: usize, capture_stacks: bool) -> Self {
        Self {
            id: NEXT_LOG_ID.fetch_add(1, Ordering::Relaxed),
            background: RwLock::new(CaptureWindow::default()),
            capacity: capacity.max(1),
            capture_stacks,
        }
    }

    pub fn from_config(config: &InspectConfig) -> Self {
        Self::new(config.capture_limit, config.log_tracebacks)
    }

    /// Number of records ever appended in the current context, including evicted ones
    pub fn len(&self) -> usize {
        scope::with_capture_window(self.id, |window| window.len()).unwrap_or_else(|| {
            let background = self.background.read().unwrap_or_else(PoisonError::into_inner);
            background.len()
        })
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether captured records carry the call stack that issued them
    pub fn captures_stacks(&self) -> bool {
        self.capture_stacks
    }

    /// Append a record to the current context.
    pub fn record(&self, sql: Option<&str>, elapsed: Duration, stack: Option<Vec<StackFrame>>) {
        self.push(sql.map(str::to_owned), elapsed.as_secs_f64(), stack);
    }

    /// Append a query, attaching the caller's stack when stack capture is on.
    #[track_caller]
    pub fn capture(&self, sql: &str, elapsed: Duration) {
        let stack = self.stack_from(Location::caller());
        self.push(Some(sql.to_owned()), elapsed.as_secs_f64(), stack);
    }

    /// Run `query`, timing it, and capture it under `sql` once it completes.
    #[track_caller]
    pub fn timed<'a, F>(&'a self, sql: &'a str, query: F) -> impl Future<Output = F::Output> + 'a
    where
        F: Future + 'a,
    {
        let caller = Location::caller();
        async move {
            let start = Instant::now();
            let output = query.await;
            let stack = self.stack_from(caller);
            self.push(Some(sql.to_owned()), start.elapsed().as_secs_f64(), stack);
            output
        }
    }

    /// Records of the current context at or after `offset`, oldest first.
    ///
    /// Records older than the retained window are silently absent.
    pub fn since(&self, offset: usize) -> Vec<RawQueryRecord> {
        scope::with_capture_window(self.id, |window| window.since(offset)).unwrap_or_else(|| {
            let background = self.background.read().unwrap_or_else(PoisonError::into_inner);
            background.since(offset)
        })
    }

    pub(crate) fn push(&self, sql: Option<String>, elapsed: f64, stack: Option<Vec<StackFrame>>) {
        let scope = scope::current_scope_id();
        let record = RawQueryRecord {
            sql,
            elapsed,
            stack,
            scope,
        };

        if scope.is_some() {
            scope::with_capture_window(self.id, |window| window.push(record, self.capacity));
            return;
        }

        let mut background = self.background.write().unwrap_or_else(PoisonError::into_inner);
        background.push(record, self.capacity);
    }

    /// Full call stack ending at `callsite`, when stack capture is on
    pub(crate) fn stack_from(&self, callsite: impl Into<StackFrame>) -> Option<Vec<StackFrame>> {
        self.capture_stacks.then(|| stack::capture_stack(callsite.into()))
    }
}
