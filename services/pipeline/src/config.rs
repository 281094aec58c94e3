use rif_extract::{ExtractionOptions, S3Config};
use rif_load::{DatabaseConfig, LoadOptions};
use serde::Deserialize;
use std::time::Duration;

/// Main configuration for the pipeline service
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// Bucket the data sets arrive in
    pub s3: S3Config,
    /// Data set discovery
    #[serde(default)]
    pub extraction: ExtractionOptions,
    /// Destination database
    pub database: DatabaseConfig,
    /// Loader tuning
    #[serde(default)]
    pub load: LoadOptions,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging/metrics
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Metrics port
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
    /// Delay between the end of one monitor cycle and the start of the next
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
}

fn default_service_name() -> String {
    "rif-pipeline".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_poll_interval_secs() -> u64 {
    30
}

impl Config {
    /// Load configuration from environment and config files
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .set_default("service.name", default_service_name())?
            .set_default("service.log_level", default_log_level())?
            .set_default("service.metrics_port", i64::from(default_metrics_port()))?
            .add_source(config::File::with_name("config/rif-pipeline").required(false))
            .add_source(config::File::with_name("/etc/rif/pipeline").required(false))
            // RIF_PIPELINE__S3__BUCKET -> s3.bucket
            .add_source(
                config::Environment::with_prefix("RIF_PIPELINE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize().map_err(Into::into)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.service.poll_interval_secs)
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            metrics_port: default_metrics_port(),
            poll_interval_secs: default_poll_interval_secs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::{File, FileFormat};
    use rif_extract::RifFileType;

    fn parse(toml: &str) -> Config {
        config::Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = parse(
            r#"
            [s3]
            bucket = "rif-incoming"

            [database]
            url = "postgres://localhost/rif"
            "#,
        );

        assert_eq!(config.service.name, "rif-pipeline");
        assert_eq!(config.poll_interval(), Duration::from_secs(30));
        assert_eq!(config.s3.region, "us-east-1");
        assert_eq!(config.extraction.max_files_per_run, 100);
        assert!(config.extraction.data_set_filter.is_none());
        assert_eq!(config.load.load_concurrency, 4);
        assert!(config.database.run_migrations);
    }

    #[test]
    fn test_full_config() {
        let config = parse(
            r#"
            [service]
            log_level = "debug"
            poll_interval_secs = 5

            [s3]
            bucket = "rif-incoming"
            endpoint_url = "http://localhost:9000"
            force_path_style = true

            [extraction]
            data_set_filter = "PDE"
            max_files_per_run = 10

            [database]
            url = "postgres://localhost/rif"
            max_connections = 4

            [load]
            load_concurrency = 8
            "#,
        );

        assert_eq!(config.service.log_level, "debug");
        assert_eq!(config.poll_interval(), Duration::from_secs(5));
        assert!(config.s3.force_path_style);
        assert_eq!(config.extraction.data_set_filter, Some(RifFileType::Pde));
        assert_eq!(config.database.max_connections, 4);
        assert_eq!(config.load.load_concurrency, 8);
    }
}
