//! # qinspect: Per-Request SQL Query Inspection
//!
//! `qinspect` watches the SQL queries issued while a web request is handled and reports on them
//! once the response is ready: repeated queries (the classic N+1 pattern), queries that are slow
//! relative to the rest of the request or to a fixed limit, and a per-request summary of query
//! count and time.
//!
//! ## Overview
//!
//! Query capture and analysis are decoupled. Whatever wraps the database access layer appends
//! every executed statement to a [`QueryLog`](capture::QueryLog). Each request runs in its own
//! task-local scope ([`scope`]) and the log keeps the records captured there inside that scope, so
//! concurrent requests never see or evict each other's queries.
//!
//! When a request completes, the [`QueryInspector`](inspect::QueryInspector) takes the queries of
//! its scope, masks integer literals so that lookups differing only by id compare equal
//! ([`inspect::normalize`]), and runs three checks:
//!
//! - **Duplicates** ([`inspect::duplicates`]): identical queries executed at least `duplicate_min`
//!   times are logged and counted.
//! - **Outliers** ([`inspect::outliers`]): queries slower than a multiple of the request's
//!   deviation above its mean, or slower than an absolute limit, are logged and exported as
//!   Prometheus gauges labelled with the issuing call site.
//! - **Stats** ([`inspect::report`]): one summary log line and four `X-QueryInspect-*` response
//!   headers.
//!
//! Inspection is purely observational: it never changes a response's status or body, and a
//! failure inside the analysis leaves the response untouched.
//!
//! ## Integrating
//!
//! ```ignore
//! use std::sync::Arc;
//! use axum::{Router, middleware::from_fn_with_state};
//! use qinspect::{capture::QueryLog, inspect::QueryInspector, metrics::QueryMetrics};
//!
//! let config = Arc::new(config.inspect);
//! let log = Arc::new(QueryLog::from_config(&config));
//! let metrics = QueryMetrics::new(&prometheus::default_registry())?;
//! let inspector = Arc::new(QueryInspector::new(config, log.clone(), metrics));
//!
//! // For sqlx applications: feed `sqlx::query` events into the log
//! qinspect::telemetry::init_telemetry_with_capture(log)?;
//!
//! let app: Router = app.layer(from_fn_with_state(inspector, qinspect::middleware::query_inspect_middleware));
//! ```
//!
//! ## Demo Server
//!
//! The `qinspect` binary serves a small in-memory catalogue ([`demo`]) with the inspector
//! installed. `GET /authors` issues one query per author and is reported as repeating a query.
//!
//! ## Configuration
//!
//! See the [`config`] module for configuration options.

pub mod capture;
pub mod config;
pub mod demo;
pub mod errors;
pub mod inspect;
pub mod metrics;
pub mod middleware;
pub mod scope;
pub mod telemetry;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

use std::sync::Arc;

use axum::{
    Router,
    extract::State,
    http::header,
    middleware::from_fn_with_state,
    response::{IntoResponse, Response},
    routing::get,
};
use bon::Builder;
use prometheus::Registry;
use tokio::net::TcpListener;
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::{Level, debug, info, instrument};

use crate::capture::QueryLog;
use crate::inspect::QueryInspector;
use crate::metrics::QueryMetrics;

pub use config::Config;

/// Application state shared across all request handlers.
///
/// # Example
///
/// ```ignore
/// let state = AppState::builder()
///     .config(config)
///     .query_log(log)
///     .inspector(inspector)
///     .registry(registry)
///     .build();
/// ```
#[derive(Clone, Builder)]
pub struct AppState {
    pub config: Arc<Config>,
    pub query_log: Arc<QueryLog>,
    pub inspector: Arc<QueryInspector>,
    pub registry: Registry,
}

/// Expose every registered metric in the Prometheus text format
#[instrument(skip_all)]
async fn metrics_handler(State(state): State<AppState>) -> Result<Response, errors::Error> {
    let body = metrics::render(&state.registry)?;
    Ok(([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body).into_response())
}

/// Build the demo router.
///
/// The inspector wraps the demo routes only when `inspect.enabled` is set; the metrics endpoint is
/// never inspected.
pub fn build_router(state: AppState) -> Router {
    let mut router = Router::new()
        .route("/books", get(demo::list_books))
        .route("/authors", get(demo::list_authors));

    if state.config.inspect.enabled {
        router = router.layer(from_fn_with_state(
            state.inspector.clone(),
            middleware::query_inspect_middleware,
        ));
    } else {
        info!("Query inspection disabled");
    }

    if state.config.enable_metrics {
        router = router.route("/internal/metrics", get(metrics_handler));
    }

    router
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_request(DefaultOnRequest::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .with_state(state)
}

/// Main application struct that owns the router and configuration.
///
/// 1. **Create**: [`Application::new`] builds the capture log, metrics and inspector
/// 2. **Serve**: [`Application::serve`] binds to a TCP port and handles requests until shutdown
pub struct Application {
    router: Router,
    app_state: AppState,
    config: Arc<Config>,
}

impl Application {
    /// Create a new application instance with its own metrics registry
    pub fn new(config: Config) -> anyhow::Result<Self> {
        debug!("Starting query inspector with configuration: {:#?}", config);
        config.validate()?;

        let config = Arc::new(config);
        let registry = Registry::new();
        let inspect_config = Arc::new(config.inspect.clone());
        let query_log = Arc::new(QueryLog::from_config(&inspect_config));
        let metrics = QueryMetrics::new(&registry)?;
        let inspector = Arc::new(QueryInspector::new(inspect_config, query_log.clone(), metrics));

        let app_state = AppState::builder()
            .config(config.clone())
            .query_log(query_log)
            .inspector(inspector)
            .registry(registry)
            .build();

        let router = build_router(app_state.clone());

        Ok(Self {
            router,
            app_state,
            config,
        })
    }

    pub fn state(&self) -> &AppState {
        &self.app_state
    }

    /// Convert application into a test server (for tests)
    #[cfg(test)]
    pub fn into_test_server(self) -> axum_test::TestServer {
        axum_test::TestServer::new(self.router.into_make_service()).expect("Failed to create test server")
    }

    /// Start serving the application
    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let bind_addr = self.config.bind_address();
        let listener = TcpListener::bind(&bind_addr).await?;
        info!(
            "Query inspector demo listening on http://{}, available at http://localhost:{}",
            bind_addr, self.config.port
        );

        axum::serve(listener, self.router.into_make_service())
            .with_graceful_shutdown(shutdown)
            .await?;

        info!("Server stopped");
        Ok(())
    }
}

#[cfg(test)]
mod test;
