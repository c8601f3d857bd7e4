pub mod utils;

use std::future::IntoFuture;

use axum::http::StatusCode;

use crate::inspect::report::{DUPLICATE_QUERIES_FIELD, NUM_QUERIES_FIELD, TOTAL_REQUEST_TIME_FIELD, TOTAL_SQL_TIME_FIELD};
use crate::test_utils::CapturedLogs;
use utils::{create_test_app, create_test_config, header};

#[test_log::test(tokio::test)]
async fn test_books_reports_single_query() {
    let server = create_test_app(create_test_config());

    let response = server.get("/books").await;
    response.assert_status_ok();

    assert_eq!(header(&response, NUM_QUERIES_FIELD).as_deref(), Some("1"));
    assert_eq!(header(&response, DUPLICATE_QUERIES_FIELD).as_deref(), Some("0"));
    assert!(header(&response, TOTAL_SQL_TIME_FIELD).unwrap().ends_with(" ms"));
    assert!(header(&response, TOTAL_REQUEST_TIME_FIELD).unwrap().ends_with(" ms"));

    let books: serde_json::Value = response.json();
    assert_eq!(books.as_array().map(Vec::len), Some(5));
}

#[test_log::test(tokio::test)]
async fn test_authors_reports_repeated_lookup() {
    let server = create_test_app(create_test_config());

    let response = server.get("/authors").await;
    response.assert_status_ok();

    // One list query plus one books lookup per author, masked to the same SQL
    assert_eq!(header(&response, NUM_QUERIES_FIELD).as_deref(), Some("4"));
    assert_eq!(header(&response, DUPLICATE_QUERIES_FIELD).as_deref(), Some("2"));
}

#[test_log::test(tokio::test)]
async fn test_sequential_requests_are_independent() {
    let server = create_test_app(create_test_config());

    server.get("/authors").await.assert_status_ok();
    let response = server.get("/books").await;

    assert_eq!(header(&response, NUM_QUERIES_FIELD).as_deref(), Some("1"));
    assert_eq!(header(&response, DUPLICATE_QUERIES_FIELD).as_deref(), Some("0"));
}

#[test_log::test(tokio::test)]
async fn test_concurrent_requests_report_their_own_queries() {
    let server = create_test_app(create_test_config());

    let (authors, books) = tokio::join!(
        server.get("/authors").into_future(),
        server.get("/books").into_future()
    );

    assert_eq!(header(&authors, NUM_QUERIES_FIELD).as_deref(), Some("4"));
    assert_eq!(header(&authors, DUPLICATE_QUERIES_FIELD).as_deref(), Some("2"));
    assert_eq!(header(&books, NUM_QUERIES_FIELD).as_deref(), Some("1"));
    assert_eq!(header(&books, DUPLICATE_QUERIES_FIELD).as_deref(), Some("0"));
}

#[test_log::test(tokio::test)]
async fn test_disabled_inspector_adds_nothing() {
    let mut config = create_test_config();
    config.inspect.enabled = false;
    let server = create_test_app(config);

    let response = server.get("/authors").await;
    response.assert_status_ok();

    assert!(header(&response, NUM_QUERIES_FIELD).is_none());
    assert!(header(&response, DUPLICATE_QUERIES_FIELD).is_none());
}

#[test_log::test(tokio::test)]
async fn test_header_stats_disabled() {
    let mut config = create_test_config();
    config.inspect.header_stats = false;
    let server = create_test_app(config);

    let response = server.get("/authors").await;
    response.assert_status_ok();

    assert!(header(&response, NUM_QUERIES_FIELD).is_none());
}

#[tokio::test]
async fn test_repeated_query_logged_with_call_site() {
    let logs = CapturedLogs::default();
    let _guard = tracing::subscriber::set_default(logs.subscriber());

    let mut config = create_test_config();
    config.inspect.log_queries = true;
    config.inspect.log_tracebacks = true;
    let server = create_test_app(config);

    server.get("/authors").await.assert_status_ok();

    let contents = logs.contents();
    assert!(contents.contains("[SQL] repeated query (3x): SELECT id, title, author_id FROM books WHERE author_id = ?"));
    assert!(contents.contains("Traceback:"));
    assert!(contents.contains("demo.rs\", line "));
    assert!(contents.contains("[SQL] 4 queries (2 duplicates)"));
}

#[tokio::test]
async fn test_absolute_limit_warning_and_truncated_sql() {
    let logs = CapturedLogs::default();
    let _guard = tracing::subscriber::set_default(logs.subscriber());

    let mut config = create_test_config();
    config.inspect.log_queries = true;
    config.inspect.absolute_limit = Some(-1.0);
    config.inspect.sql_log_limit = Some(25);
    let server = create_test_app(config);

    server.get("/books").await.assert_status_ok();

    let contents = logs.contents();
    assert!(contents.contains("[SQL] 1 queries (0 duplicates),"));
    assert!(contents.contains("over absolute limit of -1 ms"));
    assert!(contents.contains("SELECT id, ... FROM books"));
    assert!(!contents.contains("SELECT id, title, author_id FROM books"));
}

#[tokio::test]
async fn test_traceback_roots_exclude_other_frames() {
    let logs = CapturedLogs::default();
    let _guard = tracing::subscriber::set_default(logs.subscriber());

    let mut config = create_test_config();
    config.inspect.log_queries = true;
    config.inspect.log_tracebacks = true;
    config.inspect.traceback_roots = vec!["/nonexistent/".to_string()];
    let server = create_test_app(config);

    server.get("/authors").await.assert_status_ok();

    let contents = logs.contents();
    assert!(contents.contains("[SQL] repeated query (3x):"));
    assert!(!contents.contains("Traceback:"));
}

#[test_log::test(tokio::test)]
async fn test_metrics_endpoint_exports_query_metrics() {
    let mut config = create_test_config();
    config.inspect.log_tracebacks = true;
    config.inspect.absolute_limit = Some(-1.0);
    let server = create_test_app(config);

    server.get("/authors").await.assert_status_ok();

    let response = server.get("/internal/metrics").await;
    response.assert_status_ok();
    let content = response.text();
    assert!(content.contains("qinspect_sql_queries_total 4"));
    assert!(content.contains("qinspect_sql_duplicate_queries_total 2"));
    assert!(content.contains("qinspect_sql_query_absolute_latency_seconds{file="));
    assert!(content.contains("demo.rs"));
}

#[test_log::test(tokio::test)]
async fn test_metrics_endpoint_not_inspected() {
    let server = create_test_app(create_test_config());

    let response = server.get("/internal/metrics").await;
    response.assert_status_ok();
    assert!(header(&response, NUM_QUERIES_FIELD).is_none());
}

#[test_log::test(tokio::test)]
async fn test_metrics_endpoint_disabled() {
    let mut config = create_test_config();
    config.enable_metrics = false;
    let server = create_test_app(config);

    server.get("/internal/metrics").expect_failure().await.assert_status(StatusCode::NOT_FOUND);
}

#[test]
fn test_invalid_config_rejected() {
    let mut config = create_test_config();
    config.inspect.duplicate_min = 0;

    assert!(crate::Application::new(config).is_err());
}
