//! Application configuration.
//!
//! Values are layered: built-in defaults, then an optional YAML file, then
//! `ALPHA_FORGE_*` environment variables. Command-line flags are applied by the
//! CLI on top, after which [`AppConfig::validate`] runs.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::client::ClientConfig;
use crate::scheduler::{WorkerConfig, WorkerPoolConfig};

/// Placeholder printed instead of secrets.
pub const REDACTED: &str = "********";

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    /// A setting has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    /// IO error while reading configuration.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The configuration file is not valid YAML for this schema.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Complete configuration of a run.
#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    pub client: ClientConfig,
    pub worker: WorkerConfig,
    pub pool: WorkerPoolConfig,
}

/// On-disk layout. Every field is optional; absent fields keep their value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigFile {
    pub client: ClientSection,
    pub worker: WorkerSection,
    pub pool: PoolSection,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dry_run: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClientSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backoff_factor: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retryable_status_codes: Option<Vec<u16>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WorkerSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idle_backoff_secs: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub poll_interval_secs: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_timeout_secs: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schedule_timeout_secs: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PoolSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initial_workers: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_timeout_secs: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health_check_interval_secs: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_log_interval_secs: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shutdown_timeout_secs: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_window: Option<usize>,
}

impl AppConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults, then `path` if given, then the process environment.
    ///
    /// Does not validate; the caller applies CLI overrides first.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(path) = path {
            config.apply_file(ConfigFile::from_yaml_file(path)?)?;
        }
        config.apply_env()?;
        Ok(config)
    }

    /// Defaults overlaid with a YAML file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_file(ConfigFile::from_yaml_file(path)?)?;
        Ok(config)
    }

    /// Overlays every field present in `file`.
    pub fn apply_file(&mut self, file: ConfigFile) -> Result<(), ConfigError> {
        let ClientSection {
            base_url,
            timeout_secs,
            max_retries,
            backoff_factor,
            retryable_status_codes,
            username,
            password,
        } = file.client;

        if let Some(val) = base_url {
            self.client.base_url = val;
        }
        if let Some(val) = timeout_secs {
            self.client.timeout = secs_to_duration(val, "client.timeout_secs")?;
        }
        if let Some(val) = max_retries {
            self.client.max_retries = val;
        }
        if let Some(val) = backoff_factor {
            self.client.backoff_factor = val;
        }
        if let Some(val) = retryable_status_codes {
            self.client.retryable_status_codes = val;
        }
        if username.is_some() {
            self.client.username = username;
        }
        if password.is_some() {
            self.client.password = password;
        }

        let worker = file.worker;
        if let Some(val) = worker.batch_size {
            self.worker.batch_size = val;
        }
        if let Some(val) = worker.idle_backoff_secs {
            self.worker.idle_backoff = secs_to_duration(val, "worker.idle_backoff_secs")?;
        }
        if let Some(val) = worker.poll_interval_secs {
            self.worker.default_poll_interval = secs_to_duration(val, "worker.poll_interval_secs")?;
        }
        if let Some(val) = worker.task_timeout_secs {
            self.worker.task_timeout = secs_to_duration(val, "worker.task_timeout_secs")?;
        }
        if let Some(val) = worker.schedule_timeout_secs {
            self.worker.schedule_timeout = secs_to_duration(val, "worker.schedule_timeout_secs")?;
        }

        let pool = file.pool;
        if let Some(val) = pool.initial_workers {
            self.pool.initial_workers = val;
        }
        if let Some(val) = pool.worker_timeout_secs {
            self.pool.worker_timeout = secs_to_duration(val, "pool.worker_timeout_secs")?;
        }
        if let Some(val) = pool.health_check_interval_secs {
            self.pool.health_check_interval =
                Some(secs_to_duration(val, "pool.health_check_interval_secs")?);
        }
        if let Some(val) = pool.status_log_interval_secs {
            self.pool.status_log_interval = secs_to_duration(val, "pool.status_log_interval_secs")?;
        }
        if let Some(val) = pool.shutdown_timeout_secs {
            self.pool.shutdown_timeout = secs_to_duration(val, "pool.shutdown_timeout_secs")?;
        }
        if let Some(val) = pool.duration_window {
            self.pool.duration_window = val;
        }

        if let Some(dry_run) = file.dry_run {
            self.set_dry_run(dry_run);
        }
        Ok(())
    }

    /// Overlays settings from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `ALPHA_FORGE_BASE_URL`: Platform base URL
    /// - `ALPHA_FORGE_USERNAME` / `ALPHA_FORGE_PASSWORD`: Platform credentials
    /// - `ALPHA_FORGE_TIMEOUT_SECS`: Per-request timeout (default: 30)
    /// - `ALPHA_FORGE_MAX_RETRIES`: Retries after the first attempt (default: 3)
    /// - `ALPHA_FORGE_BACKOFF_FACTOR`: Exponential backoff base (default: 1.5)
    /// - `ALPHA_FORGE_RETRYABLE_STATUS_CODES`: Comma-separated status codes
    /// - `ALPHA_FORGE_WORKERS`: Initial worker count (default: 1)
    /// - `ALPHA_FORGE_WORKER_TIMEOUT_SECS`: Health check timeout, 0 disables (default: 300)
    /// - `ALPHA_FORGE_TASK_TIMEOUT_SECS`: Per-task budget (default: 1800)
    /// - `ALPHA_FORGE_POLL_INTERVAL_SECS`: Poll delay without Retry-After (default: 5)
    /// - `ALPHA_FORGE_BATCH_SIZE`: Tasks per schedule call (default: 1)
    /// - `ALPHA_FORGE_DRY_RUN`: Skip platform calls (default: false)
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env_with(|key| std::env::var(key).ok())
    }

    /// Overlays settings from an explicit variable map instead of the process
    /// environment.
    pub fn apply_env_map(&mut self, vars: &HashMap<String, String>) -> Result<(), ConfigError> {
        self.apply_env_with(|key| vars.get(key).cloned())
    }

    fn apply_env_with(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(val) = lookup("ALPHA_FORGE_BASE_URL") {
            self.client.base_url = val;
        }
        if let Some(val) = lookup("ALPHA_FORGE_USERNAME") {
            self.client.username = Some(val);
        }
        if let Some(val) = lookup("ALPHA_FORGE_PASSWORD") {
            self.client.password = Some(val);
        }
        if let Some(val) = lookup("ALPHA_FORGE_TIMEOUT_SECS") {
            let secs = parse_env_value(&val, "ALPHA_FORGE_TIMEOUT_SECS")?;
            self.client.timeout = secs_to_duration(secs, "ALPHA_FORGE_TIMEOUT_SECS")?;
        }
        if let Some(val) = lookup("ALPHA_FORGE_MAX_RETRIES") {
            self.client.max_retries = parse_env_value(&val, "ALPHA_FORGE_MAX_RETRIES")?;
        }
        if let Some(val) = lookup("ALPHA_FORGE_BACKOFF_FACTOR") {
            self.client.backoff_factor = parse_env_value(&val, "ALPHA_FORGE_BACKOFF_FACTOR")?;
        }
        if let Some(val) = lookup("ALPHA_FORGE_RETRYABLE_STATUS_CODES") {
            self.client.retryable_status_codes = val
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| parse_env_value(s, "ALPHA_FORGE_RETRYABLE_STATUS_CODES"))
                .collect::<Result<_, _>>()?;
        }

        if let Some(val) = lookup("ALPHA_FORGE_WORKERS") {
            self.pool.initial_workers = parse_env_value(&val, "ALPHA_FORGE_WORKERS")?;
        }
        if let Some(val) = lookup("ALPHA_FORGE_WORKER_TIMEOUT_SECS") {
            let secs = parse_env_value(&val, "ALPHA_FORGE_WORKER_TIMEOUT_SECS")?;
            self.pool.worker_timeout = secs_to_duration(secs, "ALPHA_FORGE_WORKER_TIMEOUT_SECS")?;
        }

        if let Some(val) = lookup("ALPHA_FORGE_TASK_TIMEOUT_SECS") {
            let secs = parse_env_value(&val, "ALPHA_FORGE_TASK_TIMEOUT_SECS")?;
            self.worker.task_timeout = secs_to_duration(secs, "ALPHA_FORGE_TASK_TIMEOUT_SECS")?;
        }
        if let Some(val) = lookup("ALPHA_FORGE_POLL_INTERVAL_SECS") {
            let secs = parse_env_value(&val, "ALPHA_FORGE_POLL_INTERVAL_SECS")?;
            self.worker.default_poll_interval =
                secs_to_duration(secs, "ALPHA_FORGE_POLL_INTERVAL_SECS")?;
        }
        if let Some(val) = lookup("ALPHA_FORGE_BATCH_SIZE") {
            self.worker.batch_size = parse_env_value(&val, "ALPHA_FORGE_BATCH_SIZE")?;
        }

        if let Some(val) = lookup("ALPHA_FORGE_DRY_RUN") {
            self.set_dry_run(parse_env_bool(&val, "ALPHA_FORGE_DRY_RUN")?);
        }
        Ok(())
    }

    /// Dry-run applies to workers and is reported by the pool status.
    pub fn set_dry_run(&mut self, dry_run: bool) {
        self.worker.dry_run = dry_run;
        self.pool.dry_run = dry_run;
    }

    pub fn dry_run(&self) -> bool {
        self.worker.dry_run
    }

    /// Fails unless both credentials are set.
    pub fn require_credentials(&self) -> Result<(), ConfigError> {
        if self.client.username.is_none() {
            return Err(ConfigError::MissingEnvVar("ALPHA_FORGE_USERNAME".to_string()));
        }
        if self.client.password.is_none() {
            return Err(ConfigError::MissingEnvVar("ALPHA_FORGE_PASSWORD".to_string()));
        }
        Ok(())
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if any values are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        // Client validation
        if let Err(e) = reqwest::Url::parse(&self.client.base_url) {
            return Err(ConfigError::ValidationFailed(format!(
                "base_url '{}' is not a valid URL: {}",
                self.client.base_url, e
            )));
        }

        if self.client.timeout.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "timeout must be greater than 0".to_string(),
            ));
        }

        if !self.client.backoff_factor.is_finite() || self.client.backoff_factor < 0.0 {
            return Err(ConfigError::ValidationFailed(
                "backoff_factor must be a non-negative number".to_string(),
            ));
        }

        if let Some(code) = self
            .client
            .retryable_status_codes
            .iter()
            .find(|code| !(100..=599).contains(*code))
        {
            return Err(ConfigError::ValidationFailed(format!(
                "retryable status code {} is not an HTTP status",
                code
            )));
        }

        if self.client.username.is_some() != self.client.password.is_some() {
            return Err(ConfigError::ValidationFailed(
                "username and password must be set together".to_string(),
            ));
        }

        // Worker validation
        if self.worker.batch_size == 0 {
            return Err(ConfigError::ValidationFailed(
                "batch_size must be greater than 0".to_string(),
            ));
        }

        if self.worker.task_timeout.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "task_timeout must be greater than 0".to_string(),
            ));
        }

        if self.worker.schedule_timeout.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "schedule_timeout must be greater than 0".to_string(),
            ));
        }

        if self.worker.default_poll_interval.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "poll_interval must be greater than 0".to_string(),
            ));
        }

        // Pool validation
        if self.pool.shutdown_timeout.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "shutdown_timeout must be greater than 0".to_string(),
            ));
        }

        if self.pool.duration_window == 0 {
            return Err(ConfigError::ValidationFailed(
                "duration_window must be greater than 0".to_string(),
            ));
        }

        if matches!(self.pool.health_check_interval, Some(interval) if interval.is_zero()) {
            return Err(ConfigError::ValidationFailed(
                "health_check_interval must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Renders the effective configuration as YAML with the password hidden.
    pub fn to_redacted_yaml(&self) -> Result<String, ConfigError> {
        let mut file = ConfigFile::from(self);
        if file.client.password.is_some() {
            file.client.password = Some(REDACTED.to_string());
        }
        Ok(serde_yaml::to_string(&file)?)
    }
}

impl ConfigFile {
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&contents)
    }

    pub fn from_yaml_str(contents: &str) -> Result<Self, ConfigError> {
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(contents)?)
    }
}

impl From<&AppConfig> for ConfigFile {
    fn from(config: &AppConfig) -> Self {
        let client = &config.client;
        let worker = &config.worker;
        let pool = &config.pool;

        Self {
            client: ClientSection {
                base_url: Some(client.base_url.clone()),
                timeout_secs: Some(client.timeout.as_secs_f64()),
                max_retries: Some(client.max_retries),
                backoff_factor: Some(client.backoff_factor),
                retryable_status_codes: Some(client.retryable_status_codes.clone()),
                username: client.username.clone(),
                password: client.password.clone(),
            },
            worker: WorkerSection {
                batch_size: Some(worker.batch_size),
                idle_backoff_secs: Some(worker.idle_backoff.as_secs_f64()),
                poll_interval_secs: Some(worker.default_poll_interval.as_secs_f64()),
                task_timeout_secs: Some(worker.task_timeout.as_secs_f64()),
                schedule_timeout_secs: Some(worker.schedule_timeout.as_secs_f64()),
            },
            pool: PoolSection {
                initial_workers: Some(pool.initial_workers),
                worker_timeout_secs: Some(pool.worker_timeout.as_secs_f64()),
                health_check_interval_secs: pool.health_check_interval.map(|d| d.as_secs_f64()),
                status_log_interval_secs: Some(pool.status_log_interval.as_secs_f64()),
                shutdown_timeout_secs: Some(pool.shutdown_timeout.as_secs_f64()),
                duration_window: Some(pool.duration_window),
            },
            dry_run: Some(config.dry_run()),
        }
    }
}

/// Parse an environment variable value into a type.
fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("could not parse '{}'", value),
    })
}

/// Parse an environment variable as a boolean.
fn parse_env_bool(value: &str, key: &str) -> Result<bool, ConfigError> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected boolean value, got '{}'", value),
        }),
    }
}

fn secs_to_duration(secs: f64, key: &str) -> Result<Duration, ConfigError> {
    Duration::try_from_secs_f64(secs).map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("expected a non-negative number of seconds, got {}", secs),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.client.base_url, "https://api.worldquantbrain.com");
        assert_eq!(config.client.timeout, Duration::from_secs(30));
        assert_eq!(config.client.max_retries, 3);
        assert!((config.client.backoff_factor - 1.5).abs() < f64::EPSILON);
        assert_eq!(
            config.client.retryable_status_codes,
            vec![429, 500, 502, 503, 504]
        );
        assert_eq!(config.pool.initial_workers, 1);
        assert_eq!(config.pool.worker_timeout, Duration::from_secs(300));
        assert_eq!(config.worker.task_timeout, Duration::from_secs(1800));
        assert_eq!(config.worker.batch_size, 1);
        assert!(!config.dry_run());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_yaml_file_overlays_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "client:\n  max_retries: 5\n  timeout_secs: 12.5\npool:\n  initial_workers: 4\n  worker_timeout_secs: 0\ndry_run: true"
        )
        .unwrap();

        let config = AppConfig::from_yaml_file(file.path()).unwrap();
        assert_eq!(config.client.max_retries, 5);
        assert_eq!(config.client.timeout, Duration::from_millis(12_500));
        assert!((config.client.backoff_factor - 1.5).abs() < f64::EPSILON);
        assert_eq!(config.pool.initial_workers, 4);
        assert_eq!(config.pool.effective_health_check_interval(), None);
        assert!(config.dry_run());
        assert!(config.pool.dry_run);
    }

    #[test]
    fn test_yaml_rejects_unknown_fields() {
        let err = ConfigFile::from_yaml_str("client:\n  retries: 5\n").unwrap_err();
        assert!(matches!(err, ConfigError::Yaml(_)));
    }

    #[test]
    fn test_empty_yaml_is_default() {
        let file = ConfigFile::from_yaml_str("  \n").unwrap();
        assert!(file.client.base_url.is_none());
        assert!(file.dry_run.is_none());
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = AppConfig::from_yaml_file("/definitely/not/here.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }

    #[test]
    fn test_negative_duration_rejected() {
        let mut config = AppConfig::default();
        let file = ConfigFile::from_yaml_str("worker:\n  task_timeout_secs: -1\n").unwrap();
        let err = config.apply_file(file).unwrap_err();
        assert!(err.to_string().contains("worker.task_timeout_secs"));
    }

    #[test]
    fn test_env_overlay() {
        let mut config = AppConfig::default();
        config
            .apply_env_map(&vars(&[
                ("ALPHA_FORGE_BASE_URL", "http://localhost:8080"),
                ("ALPHA_FORGE_USERNAME", "analyst"),
                ("ALPHA_FORGE_PASSWORD", "hunter2"),
                ("ALPHA_FORGE_MAX_RETRIES", "7"),
                ("ALPHA_FORGE_RETRYABLE_STATUS_CODES", "429, 503"),
                ("ALPHA_FORGE_WORKERS", "3"),
                ("ALPHA_FORGE_POLL_INTERVAL_SECS", "0.5"),
                ("ALPHA_FORGE_DRY_RUN", "yes"),
            ]))
            .unwrap();

        assert_eq!(config.client.base_url, "http://localhost:8080");
        assert_eq!(config.client.max_retries, 7);
        assert_eq!(config.client.retryable_status_codes, vec![429, 503]);
        assert_eq!(config.pool.initial_workers, 3);
        assert_eq!(config.worker.default_poll_interval, Duration::from_millis(500));
        assert!(config.dry_run());
        assert!(config.require_credentials().is_ok());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_invalid_value() {
        let mut config = AppConfig::default();
        let err = config
            .apply_env_map(&vars(&[("ALPHA_FORGE_MAX_RETRIES", "many")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "ALPHA_FORGE_MAX_RETRIES"));
    }

    #[test]
    fn test_parse_env_bool() {
        assert!(parse_env_bool("true", "test").unwrap());
        assert!(parse_env_bool("ON", "test").unwrap());
        assert!(!parse_env_bool("0", "test").unwrap());
        assert!(!parse_env_bool("no", "test").unwrap());
        assert!(parse_env_bool("maybe", "test").is_err());
    }

    #[test]
    fn test_validation_failures() {
        let mut config = AppConfig::default();
        config.client.base_url = "not a url".to_string();
        assert!(config.validate().unwrap_err().to_string().contains("base_url"));

        let mut config = AppConfig::default();
        config.worker.batch_size = 0;
        assert!(config.validate().unwrap_err().to_string().contains("batch_size"));

        let mut config = AppConfig::default();
        config.client.retryable_status_codes = vec![429, 999];
        assert!(config.validate().unwrap_err().to_string().contains("999"));

        let mut config = AppConfig::default();
        config.client.username = Some("analyst".to_string());
        assert!(config.validate().unwrap_err().to_string().contains("together"));

        let mut config = AppConfig::default();
        config.pool.health_check_interval = Some(Duration::ZERO);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_require_credentials() {
        let config = AppConfig::default();
        let err = config.require_credentials().unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(ref name) if name == "ALPHA_FORGE_USERNAME"));
    }

    #[test]
    fn test_redacted_yaml_hides_password() {
        let mut config = AppConfig::default();
        config.client = config.client.with_credentials("analyst", "hunter2");

        let yaml = config.to_redacted_yaml().unwrap();
        assert!(yaml.contains("analyst"));
        assert!(!yaml.contains("hunter2"));
        assert!(yaml.contains(REDACTED));

        let parsed = ConfigFile::from_yaml_str(&yaml).unwrap();
        assert_eq!(parsed.client.max_retries, Some(3));
    }
}
