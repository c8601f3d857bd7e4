//! Request scope tracking.
//!
//! Every request runs inside its own task-local scope (see [`in_request_scope`]). The scope holds
//! a unique [`ScopeId`], the [`RequestBaseline`] taken when the request started, and the queries
//! captured while it runs. Scopes are private to the future they wrap, so concurrent requests
//! never see each other's baseline or queries, and a request's records are dropped with it.
//!
//! Work spawned onto other tasks leaves the scope: queries issued there are captured in the
//! log's background window.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::capture::{CaptureWindow, QueryLog};
use crate::inspect::QueryInfo;
use crate::inspect::normalize::Normalizer;

static NEXT_SCOPE_ID: AtomicU64 = AtomicU64::new(1);

/// Identifier of one request's execution context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScopeId(u64);

impl ScopeId {
    fn next() -> Self {
        Self(NEXT_SCOPE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// State taken when a request starts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestBaseline {
    pub started_at: Instant,
    /// Records already captured in this scope when the request started
    pub query_offset: usize,
}

struct ScopeSlot {
    id: ScopeId,
    baseline: Cell<Option<RequestBaseline>>,
    /// Capture windows keyed by the id of the log that owns them
    windows: RefCell<HashMap<u64, CaptureWindow>>,
}

impl ScopeSlot {
    fn new() -> Self {
        Self {
            id: ScopeId::next(),
            baseline: Cell::new(None),
            windows: RefCell::new(HashMap::new()),
        }
    }
}

tokio::task_local! {
    static REQUEST_SCOPE: ScopeSlot;
}

/// Run `future` inside a fresh request scope.
pub async fn in_request_scope<F: Future>(future: F) -> F::Output {
    REQUEST_SCOPE.scope(ScopeSlot::new(), future).await
}

/// Run `f` inside a fresh request scope on the current thread, for synchronous handlers.
pub fn in_request_scope_sync<R>(f: impl FnOnce() -> R) -> R {
    REQUEST_SCOPE.sync_scope(ScopeSlot::new(), f)
}

/// Scope of the current execution context, if one is established
pub fn current_scope_id() -> Option<ScopeId> {
    REQUEST_SCOPE.try_with(|slot| slot.id).ok()
}

/// Run `f` on the current scope's capture window for log `log_id`, creating it on first use.
///
/// Returns `None` outside of a request scope.
pub(crate) fn with_capture_window<R>(log_id: u64, f: impl FnOnce(&mut CaptureWindow) -> R) -> Option<R> {
    REQUEST_SCOPE
        .try_with(|slot| {
            let mut windows = slot.windows.borrow_mut();
            f(windows.entry(log_id).or_default())
        })
        .ok()
}

/// Queries captured between [`ScopeTracker::begin`] and [`ScopeTracker::end`]
#[derive(Debug, Clone)]
pub struct ScopedQueries {
    pub baseline: RequestBaseline,
    pub request_elapsed: Duration,
    pub queries: Vec<QueryInfo>,
}

/// Tracks request baselines against a capture log.
#[derive(Debug, Clone)]
pub struct ScopeTracker {
    log: Arc<QueryLog>,
    normalizer: Normalizer,
}

impl ScopeTracker {
    pub fn new(log: Arc<QueryLog>, normalizer: Normalizer) -> Self {
        Self { log, normalizer }
    }

    pub fn log(&self) -> &Arc<QueryLog> {
        &self.log
    }

    /// Record the baseline for the current scope.
    ///
    /// Returns `None` outside of a request scope, in which case nothing is tracked.
    pub fn begin(&self) -> Option<RequestBaseline> {
        let baseline = RequestBaseline {
            started_at: Instant::now(),
            query_offset: self.log.len(),
        };

        REQUEST_SCOPE
            .try_with(|slot| {
                slot.baseline.set(Some(baseline));
                trace!(scope = ?slot.id, offset = baseline.query_offset, "Request baseline recorded");
                baseline
            })
            .ok()
    }

    /// Consume the current scope's baseline and return the normalized queries it issued.
    ///
    /// Returns `None` when no baseline was recorded in this scope, e.g. when the request was
    /// short-circuited before [`ScopeTracker::begin`] ran.
    pub fn end(&self) -> Option<ScopedQueries> {
        let baseline = REQUEST_SCOPE.try_with(|slot| slot.baseline.take()).ok().flatten()?;

        Some(ScopedQueries {
            baseline,
            request_elapsed: baseline.started_at.elapsed(),
            queries: self.queries_since(&baseline),
        })
    }

    /// Normalized queries captured in the current scope since `baseline`, without consuming it
    pub fn queries_since(&self, baseline: &RequestBaseline) -> Vec<QueryInfo> {
        let records = self.log.since(baseline.query_offset);
        self.normalizer.normalize(&records)
    }
}
