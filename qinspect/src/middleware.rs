//! Axum middleware running the query inspector around every request.
//!
//! The request is executed inside its own request scope: the baseline is recorded before the
//! handler runs and the analysis runs once the response is ready, writing the summary headers onto
//! it. Analysis never changes the status or body, and a failure inside it is logged and the
//! response is returned untouched.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use tracing::error;

use crate::inspect::{AnalysisResult, MetadataSink, QueryInspector};
use crate::scope::in_request_scope;

/// Install with `axum::middleware::from_fn_with_state(inspector, query_inspect_middleware)`.
pub async fn query_inspect_middleware(State(inspector): State<Arc<QueryInspector>>, request: Request, next: Next) -> Response {
    in_request_scope(async move {
        inspector.begin();
        let mut response = next.run(request).await;
        finish_request(&inspector, response.headers_mut());
        response
    })
    .await
}

/// Analyse the current scope into `sink`, containing any panic raised by the analysis
fn finish_request<S: MetadataSink + ?Sized>(inspector: &QueryInspector, sink: &mut S) -> Option<AnalysisResult> {
    match catch_unwind(AssertUnwindSafe(|| inspector.inspect_scope(sink))) {
        Ok(result) => result,
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            error!("Query inspection failed, response left unchanged: {}", message);
            None
        }
    }
}
