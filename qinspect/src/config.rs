//! Application configuration management.
//!
//! Configuration is loaded from a YAML file with environment variable overrides. The configuration
//! file path defaults to `config.yaml` but can be specified via `-f` flag or `QINSPECT_CONFIG`
//! environment variable.
//!
//! ## Loading Priority
//!
//! 1. **YAML config file** - Base configuration (default: `config.yaml`)
//! 2. **Environment variables** - Variables prefixed with `QINSPECT_` override YAML values
//!
//! For nested config values, use double underscores in environment variables. For example,
//! `QINSPECT_INSPECT__STDDEV_LIMIT=2` sets the `inspect.stddev_limit` field.
//!
//! ## Example
//!
//! ```yaml
//! port: 3000
//! enable_metrics: true
//! inspect:
//!   enabled: true
//!   log_queries: true
//!   duplicate_min: 3
//!   traceback_roots: ["src/"]
//!   stddev_limit: 2
//!   absolute_limit: 100  # milliseconds
//!   sql_log_limit: 120
//! ```
//!
//! The resulting [`Config`] is built once at startup and handed to every component by reference;
//! nothing in the crate reads ambient global settings.

use clap::Parser;
use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};

use crate::errors::Error;

/// Simple CLI args - just for specifying config file
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file
    #[arg(short = 'f', long, env = "QINSPECT_CONFIG", default_value = "config.yaml")]
    pub config: String,

    /// Validate configuration and exit without starting the server.
    #[arg(long)]
    pub validate: bool,
}

/// Main application configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// HTTP server host to bind to (e.g., "0.0.0.0" for all interfaces)
    pub host: String,
    /// HTTP server port to bind to
    pub port: u16,
    /// Expose the Prometheus registry at `/internal/metrics`
    pub enable_metrics: bool,
    /// Query inspection settings
    pub inspect: InspectConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            enable_metrics: true,
            inspect: InspectConfig::default(),
        }
    }
}

/// Settings for the per-request query inspector.
///
/// Every check is optional: the stddev and absolute checks only run when their limit is set.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct InspectConfig {
    /// Master switch. When off the middleware is never installed.
    pub enabled: bool,
    /// Emit one summary line per request
    pub log_stats: bool,
    /// Write the `X-QueryInspect-*` response headers
    pub header_stats: bool,
    /// Emit one warning per duplicated query group
    pub log_queries: bool,
    /// Attach the first occurrence's stack to duplicate warnings. Also turns on caller capture in
    /// the query log.
    pub log_tracebacks: bool,
    /// Minimum number of occurrences for a query to count as duplicated
    pub duplicate_min: usize,
    /// Path prefixes allowed in captured stacks. Empty keeps every frame.
    pub traceback_roots: Vec<String>,
    /// Multiplier of the standard deviation above the mean beyond which a query is an outlier
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stddev_limit: Option<f64>,
    /// Absolute latency limit in milliseconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub absolute_limit: Option<f64>,
    /// Maximum SQL length in log output before truncation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sql_log_limit: Option<usize>,
    /// Maximum number of records retained by the capture log
    pub capture_limit: usize,
}

impl Default for InspectConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            log_stats: true,
            header_stats: true,
            log_queries: false,
            log_tracebacks: false,
            duplicate_min: 2,
            traceback_roots: Vec::new(),
            stddev_limit: None,
            absolute_limit: None,
            sql_log_limit: None,
            capture_limit: 9000,
        }
    }
}

impl InspectConfig {
    /// Absolute limit converted to seconds, the unit of [`crate::inspect::QueryInfo::elapsed`]
    pub fn absolute_limit_secs(&self) -> Option<f64> {
        self.absolute_limit.map(|ms| ms / 1000.0)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.duplicate_min == 0 {
            return Err(Error::config("inspect.duplicate_min must be at least 1"));
        }

        if let Some(limit) = self.stddev_limit
            && (!limit.is_finite() || limit < 0.0)
        {
            return Err(Error::config(format!(
                "inspect.stddev_limit must be a non-negative number, got {limit}"
            )));
        }

        // Negative absolute limits are allowed: they flag every query.
        if let Some(limit) = self.absolute_limit
            && !limit.is_finite()
        {
            return Err(Error::config(format!("inspect.absolute_limit must be finite, got {limit}")));
        }

        if self.capture_limit == 0 {
            return Err(Error::config("inspect.capture_limit cannot be 0"));
        }

        Ok(())
    }
}

impl Config {
    #[allow(clippy::result_large_err)]
    pub fn load(args: &Args) -> Result<Self, figment::Error> {
        let config: Self = Self::figment(args).extract()?;
        config.validate().map_err(|e| figment::Error::from(e.to_string()))?;
        Ok(config)
    }

    /// Validate the configuration for consistency
    pub fn validate(&self) -> Result<(), Error> {
        self.inspect.validate()
    }

    pub fn figment(args: &Args) -> Figment {
        Figment::new()
            .merge(Yaml::file(&args.config))
            // QINSPECT_CONFIG names the file itself, not a field
            .merge(Env::prefixed("QINSPECT_").ignore(&["config"]).split("__"))
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
