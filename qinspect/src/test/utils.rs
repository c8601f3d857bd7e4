//! Test utilities for application-level testing
use axum_test::TestServer;

use crate::config::{Config, InspectConfig};

pub fn create_test_config() -> Config {
    Config {
        host: "127.0.0.1".to_string(),
        port: 0,
        enable_metrics: true,
        inspect: InspectConfig {
            enabled: true,
            ..Default::default()
        },
    }
}

pub fn create_test_app(config: Config) -> TestServer {
    crate::Application::new(config)
        .expect("Failed to create application")
        .into_test_server()
}

pub fn header(response: &axum_test::TestResponse, name: &str) -> Option<String> {
    response
        .headers()
        .get(name)
        .map(|value| value.to_str().expect("header should be ASCII").to_string())
}
