//! TOML configuration loading for the replication publisher.
//!
//! Deserializes a [`Config`] from a TOML file using [Figment], merging
//! `OSMDBT_CONFIG_*` environment variables on top of the file values.
//!
//! ## Priority chain
//!
//! | Priority | Source | Mechanism |
//! |----------|--------|-----------|
//! | 1 (highest) | `OSMDBT_CONFIG_*` env vars | `merge` — always wins |
//! | 2 | TOML file values | `merge` — base configuration |
//! | 3 (lowest) | serde defaults | fill gaps only |
//!
//! All env vars are prefixed with `OSMDBT_CONFIG_` and use double underscores
//! to separate nested keys. For example, `OSMDBT_CONFIG_OSMDBT__LOG_DIR` maps
//! to `osmdbt.log_dir` in the config file.

use std::{
    net::SocketAddr,
    path::{Path, PathBuf},
};

use figment::{
    providers::{Env, Format as _, Toml},
    Figment,
};
use fs_err as fs;
use serde::Deserialize;

mod redacted;

pub use self::redacted::Redacted;

/// Environment variable prefix for configuration overrides.
pub const ENV_PREFIX: &str = "OSMDBT_CONFIG_";

/// Top-level service configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Paths and flags for the osmdbt tool suite.
    pub osmdbt: OsmdbtConfig,

    /// Flags for the osmium file inspector.
    #[serde(default)]
    pub osmium: OsmiumConfig,

    /// Application behavior (info collection, scheduling, shutdown).
    #[serde(default)]
    pub app: AppConfig,

    /// Object storage connection and publication settings.
    pub object_storage: ObjectStorageConfig,

    /// Cross-service coordinator (arstotzka) settings.
    #[serde(default)]
    pub arstotzka: ArstotzkaConfig,

    /// Logging, tracing, and metrics settings.
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl Config {
    /// Load configuration from a TOML file with `OSMDBT_CONFIG_*` env-var
    /// overrides. Nested keys use double underscore separators.
    pub fn load(file: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let input_path = file.into();
        let config_path = fs::canonicalize(&input_path).map_err(|source| ConfigError::Io {
            path: input_path,
            source,
        })?;

        Figment::new()
            .merge(Toml::file(&config_path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(|source| ConfigError::Figment {
                path: config_path,
                source: Box::new(source),
            })
    }
}

/// Paths and flags for the osmdbt tool suite plus the staging tree roots.
#[derive(Debug, Clone, Deserialize)]
pub struct OsmdbtConfig {
    /// Directory containing the `osmdbt-*` binaries.
    pub bin_dir: PathBuf,

    /// Path to the osmdbt tools' own configuration file, passed as `-c`.
    pub config_path: PathBuf,

    /// Staging directory for diff files and the working state file.
    pub changes_dir: PathBuf,

    /// Staging directory for osmdbt run files.
    pub run_dir: PathBuf,

    /// Staging directory for replication log files.
    pub log_dir: PathBuf,

    /// Maximum number of changes pulled per `osmdbt-get-log` invocation.
    #[serde(default = "default_get_log_max_changes")]
    pub get_log_max_changes: u64,

    /// When false, the tools run with `-q` (quiet).
    #[serde(default)]
    pub verbose: bool,
}

fn default_get_log_max_changes() -> u64 {
    50_000
}

/// Flags for `osmium fileinfo`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OsmiumConfig {
    /// Pass `--verbose` to osmium.
    #[serde(default)]
    pub verbose: bool,

    /// Pass `--progress` (true) or `--no-progress` (false) to osmium.
    #[serde(default)]
    pub progress: bool,
}

/// Application behavior settings.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Whether to run the inspector on published diffs and attach the result
    /// to the finalized action.
    #[serde(default)]
    pub should_collect_info: bool,

    /// Address of the liveness/metrics HTTP endpoint.
    #[serde(default = "default_liveness_addr")]
    pub liveness_addr: SocketAddr,

    /// Hard safety timer for graceful shutdown, in seconds. When the timer
    /// expires the process terminates even if the in-flight job has not
    /// reached a phase boundary.
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,

    /// Scheduler settings.
    #[serde(default)]
    pub cron: CronConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            should_collect_info: false,
            liveness_addr: default_liveness_addr(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
            cron: CronConfig::default(),
        }
    }
}

fn default_liveness_addr() -> SocketAddr {
    ([0, 0, 0, 0], 8080).into()
}

fn default_shutdown_timeout_secs() -> u64 {
    10
}

/// Scheduler mode. When `enabled` is false the service runs one job and
/// exits; otherwise it runs a job on every tick of `expression`.
#[derive(Debug, Clone, Deserialize)]
pub struct CronConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Seconds-resolution cron expression, e.g. `"0 */5 * * * *"`.
    #[serde(default = "default_cron_expression")]
    pub expression: String,

    /// Sleep applied after a failed job before the next tick is accepted.
    #[serde(default = "default_failure_penalty_seconds")]
    pub failure_penalty_seconds: u64,
}

impl Default for CronConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            expression: default_cron_expression(),
            failure_penalty_seconds: default_failure_penalty_seconds(),
        }
    }
}

fn default_cron_expression() -> String {
    "0 * * * * *".to_string()
}

fn default_failure_penalty_seconds() -> u64 {
    60
}

/// Object storage connection and publication settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ObjectStorageConfig {
    /// Custom S3-compatible endpoint. When omitted the AWS default endpoint
    /// for `region` is used.
    pub endpoint: Option<String>,

    /// Bucket receiving the replication objects.
    pub bucket_name: String,

    /// Canned ACL applied to every uploaded object.
    #[serde(default = "default_acl")]
    pub acl: String,

    pub region: Option<String>,

    pub credentials: Option<ObjectStorageCredentials>,
}

fn default_acl() -> String {
    "public-read".to_string()
}

/// Static object-storage credentials.
#[derive(Debug, Clone, Deserialize)]
pub struct ObjectStorageCredentials {
    pub access_key: String,
    pub secret_key: Redacted<String>,
}

/// Cross-service coordinator settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ArstotzkaConfig {
    /// When false, a no-op mediator is wired and no coordination happens.
    #[serde(default)]
    pub enabled: bool,

    /// Identifier under which this service reserves access and records
    /// actions.
    #[serde(default = "default_service_id")]
    pub service_id: String,

    /// Mediator client options.
    #[serde(default)]
    pub mediator: MediatorClientConfig,
}

impl Default for ArstotzkaConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            service_id: default_service_id(),
            mediator: MediatorClientConfig::default(),
        }
    }
}

fn default_service_id() -> String {
    "osmdbt".to_string()
}

/// Mediator HTTP client options.
#[derive(Debug, Clone, Deserialize)]
pub struct MediatorClientConfig {
    #[serde(default = "default_mediator_url")]
    pub url: String,

    #[serde(default = "default_mediator_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for MediatorClientConfig {
    fn default() -> Self {
        Self {
            url: default_mediator_url(),
            timeout_secs: default_mediator_timeout_secs(),
        }
    }
}

fn default_mediator_url() -> String {
    "http://localhost:8081".to_string()
}

fn default_mediator_timeout_secs() -> u64 {
    30
}

/// Logging, tracing, and metrics settings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TelemetryConfig {
    /// Default log level for the workspace crates; overridable per crate via
    /// `RUST_LOG`.
    pub logger: Option<String>,

    #[serde(default)]
    pub tracing: TracingConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// OpenTelemetry trace export settings.
#[derive(Debug, Clone, Deserialize)]
pub struct TracingConfig {
    #[serde(default)]
    pub enabled: bool,

    /// OTLP collector endpoint, e.g. `"http://localhost:4317"`.
    pub url: Option<String>,

    /// Ratio of traces to sample, from 0.0 (none) to 1.0 (all).
    #[serde(default = "default_trace_ratio")]
    pub ratio: f64,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: None,
            ratio: default_trace_ratio(),
        }
    }
}

fn default_trace_ratio() -> f64 {
    1.0
}

/// Metrics settings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub buckets: MetricsBuckets,
}

/// Histogram bucket boundaries, in seconds.
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsBuckets {
    #[serde(default = "default_job_duration_buckets")]
    pub osmdbt_job_duration_seconds: Vec<f64>,

    #[serde(default = "default_command_duration_buckets")]
    pub osmdbt_command_duration_seconds: Vec<f64>,
}

impl Default for MetricsBuckets {
    fn default() -> Self {
        Self {
            osmdbt_job_duration_seconds: default_job_duration_buckets(),
            osmdbt_command_duration_seconds: default_command_duration_buckets(),
        }
    }
}

fn default_job_duration_buckets() -> Vec<f64> {
    vec![0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0]
}

fn default_command_duration_buckets() -> Vec<f64> {
    vec![0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0]
}

/// Error type for config loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The config file could not be resolved on disk.
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The config file (or an env override) failed to parse or validate.
    #[error("failed to load config from {path}: {source}")]
    Figment {
        path: PathBuf,
        #[source]
        source: Box<figment::Error>,
    },
}

impl ConfigError {
    pub fn path(&self) -> &Path {
        match self {
            ConfigError::Io { path, .. } | ConfigError::Figment { path, .. } => path,
        }
    }
}

#[cfg(test)]
mod tests {
    use figment::providers::{Format as _, Toml};

    use super::*;

    const MINIMAL: &str = r#"
        [osmdbt]
        bin_dir = "/usr/local/bin"
        config_path = "/etc/osmdbt/osmdbt-config.yaml"
        changes_dir = "/data/changes"
        run_dir = "/data/run"
        log_dir = "/data/log"

        [object_storage]
        bucket_name = "osm-replication"
    "#;

    fn from_toml(toml: &str) -> Config {
        Figment::new()
            .merge(Toml::string(toml))
            .extract()
            .expect("config should parse")
    }

    #[test]
    fn minimal_config_gets_defaults() {
        //* When
        let config = from_toml(MINIMAL);

        //* Then
        assert_eq!(config.osmdbt.get_log_max_changes, 50_000);
        assert!(!config.osmdbt.verbose);
        assert!(!config.app.should_collect_info);
        assert!(!config.app.cron.enabled);
        assert_eq!(config.app.shutdown_timeout_secs, 10);
        assert_eq!(config.object_storage.acl, "public-read");
        assert!(config.object_storage.credentials.is_none());
        assert!(!config.arstotzka.enabled);
        assert!(config.telemetry.logger.is_none());
        assert!(!config.telemetry.tracing.enabled);
        assert!(!config
            .telemetry
            .metrics
            .buckets
            .osmdbt_job_duration_seconds
            .is_empty());
    }

    #[test]
    fn full_config_parses() {
        //* Given
        let toml = r#"
            [osmdbt]
            bin_dir = "/opt/osmdbt/bin"
            config_path = "/opt/osmdbt/osmdbt-config.yaml"
            changes_dir = "/data/changes"
            run_dir = "/data/run"
            log_dir = "/data/log"
            get_log_max_changes = 10000
            verbose = true

            [osmium]
            verbose = true
            progress = false

            [app]
            should_collect_info = true
            shutdown_timeout_secs = 5

            [app.cron]
            enabled = true
            expression = "0 */5 * * * *"
            failure_penalty_seconds = 120

            [object_storage]
            endpoint = "http://minio:9000"
            bucket_name = "replication"
            acl = "private"
            region = "eu-central-1"

            [object_storage.credentials]
            access_key = "AKIA"
            secret_key = "SECRET"

            [arstotzka]
            enabled = true
            service_id = "osm-replication"

            [arstotzka.mediator]
            url = "http://arstotzka:8081"
            timeout_secs = 10

            [telemetry]
            logger = "debug"

            [telemetry.tracing]
            enabled = true
            url = "http://otel:4317"
            ratio = 0.25

            [telemetry.metrics.buckets]
            osmdbt_job_duration_seconds = [1.0, 10.0, 60.0]
            osmdbt_command_duration_seconds = [0.5, 5.0]
        "#;

        //* When
        let config = from_toml(toml);

        //* Then
        assert_eq!(config.osmdbt.get_log_max_changes, 10_000);
        assert!(config.app.cron.enabled);
        assert_eq!(config.app.cron.expression, "0 */5 * * * *");
        assert_eq!(config.app.cron.failure_penalty_seconds, 120);
        let credentials = config.object_storage.credentials.expect("credentials");
        assert_eq!(credentials.access_key, "AKIA");
        assert_eq!(*credentials.secret_key, "SECRET");
        assert_eq!(format!("{:?}", credentials.secret_key), "<redacted>");
        assert_eq!(config.arstotzka.mediator.timeout_secs, 10);
        assert_eq!(config.telemetry.tracing.ratio, 0.25);
        assert_eq!(
            config.telemetry.metrics.buckets.osmdbt_command_duration_seconds,
            vec![0.5, 5.0]
        );
    }

    #[test]
    fn unknown_top_level_key_is_rejected() {
        //* Given
        let toml = format!("{MINIMAL}\n[surprise]\nkey = 1\n");

        //* When
        let result: Result<Config, _> = Figment::new().merge(Toml::string(&toml)).extract();

        //* Then
        assert!(result.is_err());
    }
}
