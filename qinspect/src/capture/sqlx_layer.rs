//! Capture of queries executed through `sqlx`.
//!
//! `sqlx` reports every statement it runs as a tracing event on the `sqlx::query` target, carrying
//! the statement (`db.statement`, or only `summary` for short statements) and its duration in
//! seconds (`elapsed_secs`). [`SqlxCaptureLayer`] appends those events to a [`QueryLog`].
//!
//! The events are emitted at `DEBUG` by default, so the layer should be given its own per-layer
//! filter rather than sharing the application's log filter:
//!
//! ```ignore
//! let capture = SqlxCaptureLayer::new(log).with_filter(SqlxCaptureLayer::targets());
//! ```
//!
//! The event is handled on the thread that ran the query, so when the log captures stacks the
//! record carries the full stack of the code that issued it, ending at the event's callsite.

use std::fmt;
use std::sync::Arc;

use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::filter::Targets;
use tracing_subscriber::layer::{Context, Layer};

use super::{QueryLog, StackFrame};

pub const SQLX_QUERY_TARGET: &str = "sqlx::query";

/// Source path of this module, excluded from captured stacks
pub(crate) const LAYER_FILE: &str = file!();

/// Tracing layer recording `sqlx` query events into a [`QueryLog`]
#[derive(Debug, Clone)]
pub struct SqlxCaptureLayer {
    log: Arc<QueryLog>,
}

impl SqlxCaptureLayer {
    pub fn new(log: Arc<QueryLog>) -> Self {
        Self { log }
    }

    /// Filter enabling every `sqlx` query event regardless of level
    pub fn targets() -> Targets {
        Targets::new().with_target(SQLX_QUERY_TARGET, Level::TRACE)
    }
}

#[derive(Default)]
struct QueryEventVisitor {
    statement: Option<String>,
    summary: Option<String>,
    elapsed_secs: Option<f64>,
}

impl QueryEventVisitor {
    fn sql(self) -> Option<String> {
        let statement = self.statement.map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
        statement.or(self.summary.filter(|s| !s.is_empty()))
    }
}

impl Visit for QueryEventVisitor {
    fn record_f64(&mut self, field: &Field, value: f64) {
        if field.name() == "elapsed_secs" {
            self.elapsed_secs = Some(value);
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        match field.name() {
            "db.statement" => self.statement = Some(value.to_string()),
            "summary" => self.summary = Some(value.to_string()),
            _ => {}
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        match field.name() {
            "db.statement" if self.statement.is_none() => self.statement = Some(format!("{value:?}")),
            "summary" if self.summary.is_none() => self.summary = Some(format!("{value:?}")),
            _ => {}
        }
    }
}

impl<S: Subscriber> Layer<S> for SqlxCaptureLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if event.metadata().target() != SQLX_QUERY_TARGET {
            return;
        }

        let mut visitor = QueryEventVisitor::default();
        event.record(&mut visitor);

        let metadata = event.metadata();
        let stack = match (metadata.file(), metadata.line()) {
            (Some(file), Some(line)) => self.log.stack_from(StackFrame::new(file, line)),
            _ => None,
        };

        let elapsed = visitor.elapsed_secs.unwrap_or_default().max(0.0);
        self.log.push(visitor.sql(), elapsed, stack);
    }
}
