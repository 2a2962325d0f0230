use std::{env, fmt, fs, path, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::monitoring::checker::CheckerOptions;
use crate::monitoring::response::MAX_RESPONSE_BODY_SIZE;
use crate::monitoring::scheduler::SchedulerOptions;

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to read {path}: {source}")]
    ReadFailed { path: path::PathBuf, source: std::io::Error },
    #[error("failed to write {path}: {source}")]
    WriteFailed { path: path::PathBuf, source: std::io::Error },
    #[error("failed to parse configuration: {0}")]
    ParseFailed(String),
    #[error("no configuration directory: set XDG_CONFIG_HOME or HOME")]
    ConfigPathUnavailable,
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub queue: QueueConfig,
    pub scheduler: SchedulerConfig,
    pub workers: WorkersConfig,
    pub checker: CheckerConfig,
    pub alerting: AlertingConfig,
    pub health: HealthConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: path::PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { path: "pulse.db".into() }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueBackend {
    #[default]
    Redis,
    Memory,
}

impl std::str::FromStr for QueueBackend {
    type Err = Error;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "redis" => Ok(QueueBackend::Redis),
            "memory" => Ok(QueueBackend::Memory),
            other => Err(Error::Invalid(format!("unknown queue backend {other:?}"))),
        }
    }
}

impl fmt::Display for QueueBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueBackend::Redis => write!(f, "redis"),
            QueueBackend::Memory => write!(f, "memory"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub backend: QueueBackend,
    pub redis_url: String,
    pub key: String,
    pub dequeue_timeout_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            backend: QueueBackend::Redis,
            redis_url: "redis://127.0.0.1:6379".into(),
            key: crate::queue::DEFAULT_QUEUE_KEY.into(),
            dequeue_timeout_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub poll_interval_secs: u64,
    pub shutdown_timeout_secs: u64,
    pub enqueue_attempts: u32,
    pub enqueue_retry_delay_ms: u64,
    pub dedupe_in_flight: bool,
    pub in_flight_ttl_secs: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 10,
            shutdown_timeout_secs: 30,
            enqueue_attempts: 3,
            enqueue_retry_delay_ms: 1_000,
            dedupe_in_flight: true,
            in_flight_ttl_secs: 600,
            region: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkersConfig {
    pub count: usize,
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self { count: 3 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckerConfig {
    pub http_timeout_secs: u64,
    pub tcp_timeout_secs: u64,
    pub max_body_bytes: usize,
    pub user_agent: String,
}

impl Default for CheckerConfig {
    fn default() -> Self {
        Self {
            http_timeout_secs: 30,
            tcp_timeout_secs: 30,
            max_body_bytes: MAX_RESPONSE_BODY_SIZE,
            user_agent: CheckerOptions::default().user_agent,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertingConfig {
    pub failure_threshold: u32,
}

impl Default for AlertingConfig {
    fn default() -> Self {
        Self { failure_threshold: 3 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    pub enabled: bool,
    pub bind: String,
    pub port: u16,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self { enabled: true, bind: "0.0.0.0".into(), port: 8081 }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub format: String,
}

/// Used to ensure we are actually reading a toml file
fn normalize_toml_path(path: &path::Path) -> path::PathBuf {
    let mut path = path.to_path_buf();
    if path.extension().map(|ext| ext != "toml").unwrap_or(true) {
        path.set_extension("toml");
    }
    path
}

/// Get default config path ($XDG_CONFIG_HOME/pulse/config.toml or
/// $HOME/.config/...)
pub fn default_config_path() -> Result<path::PathBuf, Error> {
    let path = if let Ok(config_home) = env::var("XDG_CONFIG_HOME") {
        path::PathBuf::from(config_home)
    } else if let Some(home_dir) = env::home_dir() {
        home_dir.join(".config")
    } else {
        return Err(Error::ConfigPathUnavailable);
    };

    Ok(path.join("pulse/config.toml"))
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let write_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str, value: &dyn fmt::Display| {
                writeln!(f, "  {:indent$}{}: {}", "", label, value, indent = level * 2)
            }
        };
        let write_title_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str| {
                writeln!(f, "{:indent$}{}", "", label, indent = level * 2)
            }
        };

        let write_title_1 = write_title_indented(1);
        let write_1 = write_indented(1);

        writeln!(f, "Current Configuration State:")?;
        write_title_1(f, "Database")?;
        write_1(f, "Path", &self.database.path.display())?;

        write_title_1(f, "Queue")?;
        write_1(f, "Backend", &self.queue.backend)?;
        write_1(f, "Redis URL", &self.queue.redis_url)?;
        write_1(f, "Key", &self.queue.key)?;
        write_1(f, "Dequeue Timeout (ms)", &self.queue.dequeue_timeout_ms)?;

        write_title_1(f, "Scheduler")?;
        write_1(f, "Poll Interval (s)", &self.scheduler.poll_interval_secs)?;
        write_1(f, "Shutdown Timeout (s)", &self.scheduler.shutdown_timeout_secs)?;
        write_1(f, "Enqueue Attempts", &self.scheduler.enqueue_attempts)?;
        write_1(f, "Enqueue Retry Delay (ms)", &self.scheduler.enqueue_retry_delay_ms)?;
        write_1(f, "Dedupe In-Flight", &self.scheduler.dedupe_in_flight)?;
        write_1(f, "In-Flight TTL (s)", &self.scheduler.in_flight_ttl_secs)?;
        write_1(f, "Region", &self.scheduler.region.as_deref().unwrap_or("any"))?;

        write_title_1(f, "Workers")?;
        write_1(f, "Count", &self.workers.count)?;

        write_title_1(f, "Checker")?;
        write_1(f, "HTTP Timeout (s)", &self.checker.http_timeout_secs)?;
        write_1(f, "TCP Timeout (s)", &self.checker.tcp_timeout_secs)?;
        write_1(f, "Max Body Bytes", &self.checker.max_body_bytes)?;
        write_1(f, "User Agent", &self.checker.user_agent)?;

        write_title_1(f, "Alerting")?;
        write_1(f, "Failure Threshold", &self.alerting.failure_threshold)?;

        write_title_1(f, "Health")?;
        write_1(f, "Enabled", &self.health.enabled)?;
        write_1(f, "Bind Address", &self.health.bind)?;
        write_1(f, "Port", &self.health.port)?;

        write_title_1(f, "Logging")?;
        let format =
            if self.logging.format.is_empty() { "compact" } else { self.logging.format.as_str() };
        write_1(f, "Format", &format)?;

        Ok(())
    }
}

impl Config {
    /// Generate Config structure from file
    ///
    /// Creates a default config in ~/.config/pulse/config.toml
    ///  or the specified path, with the name config.toml if one does not exist
    pub fn from_config(optional_path: Option<impl AsRef<path::Path>>) -> Result<Self, Error> {
        let config_path: path::PathBuf = if let Some(path) = optional_path {
            normalize_toml_path(path.as_ref())
        } else {
            default_config_path()?
        };

        if config_path.exists() {
            let raw_string = fs::read_to_string(&config_path)
                .map_err(|source| Error::ReadFailed { path: config_path.clone(), source })?;
            toml::from_str(raw_string.as_str()).map_err(|err| Error::ParseFailed(err.to_string()))
        } else {
            let config = Self::default();
            config.write_config(&config_path)?;
            Ok(config)
        }
    }

    /// Load from file, then apply `PULSE_*` environment overrides
    pub fn load(optional_path: Option<impl AsRef<path::Path>>) -> Result<Self, Error> {
        let mut config = Self::from_config(optional_path)?;
        config.apply_env(|name| env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize and write a config to a file
    pub fn write_config(&self, path: &path::Path) -> Result<(), Error> {
        let config_str: String =
            toml::to_string_pretty(self).map_err(|err| Error::ParseFailed(err.to_string()))?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|source| Error::WriteFailed { path: parent.to_path_buf(), source })?;
        }

        fs::write(path, config_str)
            .map_err(|source| Error::WriteFailed { path: path.to_path_buf(), source })
    }

    /// Apply overrides looked up through `var`
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<(), Error> {
        fn parsed<T: std::str::FromStr>(name: &str, raw: String) -> Result<T, Error> {
            raw.trim().parse().map_err(|_| Error::Invalid(format!("{name}={raw:?}")))
        }

        if let Some(raw) = var("PULSE_DATABASE_PATH") {
            self.database.path = raw.into();
        }
        if let Some(raw) = var("PULSE_QUEUE_BACKEND") {
            self.queue.backend = raw.parse()?;
        }
        if let Some(raw) = var("PULSE_REDIS_URL") {
            self.queue.redis_url = raw;
        }
        if let Some(raw) = var("PULSE_QUEUE_KEY") {
            self.queue.key = raw;
        }
        if let Some(raw) = var("PULSE_WORKERS") {
            self.workers.count = parsed("PULSE_WORKERS", raw)?;
        }
        if let Some(raw) = var("PULSE_REGION") {
            self.scheduler.region = Some(raw).filter(|region| !region.trim().is_empty());
        }
        if let Some(raw) = var("PULSE_HEALTH_PORT") {
            self.health.port = parsed("PULSE_HEALTH_PORT", raw)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.workers.count == 0 {
            return Err(Error::Invalid("workers.count must be at least 1".into()));
        }
        if self.scheduler.poll_interval_secs == 0 {
            return Err(Error::Invalid("scheduler.poll_interval_secs must be at least 1".into()));
        }
        if self.queue.key.trim().is_empty() {
            return Err(Error::Invalid("queue.key cannot be empty".into()));
        }
        Ok(())
    }

    pub fn checker_options(&self) -> CheckerOptions {
        CheckerOptions {
            http_timeout: Duration::from_secs(self.checker.http_timeout_secs),
            tcp_timeout: Duration::from_secs(self.checker.tcp_timeout_secs),
            max_body_bytes: self.checker.max_body_bytes,
            user_agent: self.checker.user_agent.clone(),
        }
    }

    pub fn scheduler_options(&self) -> SchedulerOptions {
        SchedulerOptions {
            poll_interval: Duration::from_secs(self.scheduler.poll_interval_secs),
            enqueue_attempts: self.scheduler.enqueue_attempts,
            enqueue_retry_delay: Duration::from_millis(self.scheduler.enqueue_retry_delay_ms),
            region: self.scheduler.region.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn writes_defaults_when_missing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested/config.toml");

        let config = Config::from_config(Some(&path)).expect("config");
        assert!(path.exists());
        assert_eq!(config.workers.count, 3);
        assert_eq!(config.queue.key, "pulse:jobs");
        assert_eq!(config.health.port, 8081);

        let reread = Config::from_config(Some(&path)).expect("reread");
        assert_eq!(reread.scheduler.poll_interval_secs, 10);
    }

    #[test]
    fn partial_files_fill_in_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        fs::write(&path, "[queue]\nbackend = \"memory\"\n\n[workers]\ncount = 8\n").expect("write");

        let config = Config::from_config(Some(&path)).expect("config");
        assert_eq!(config.queue.backend, QueueBackend::Memory);
        assert_eq!(config.queue.dequeue_timeout_ms, 5_000);
        assert_eq!(config.workers.count, 8);
        assert!(config.scheduler.dedupe_in_flight);
    }

    #[test]
    fn rejects_malformed_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        fs::write(&path, "[workers\ncount = ").expect("write");
        assert!(matches!(Config::from_config(Some(&path)), Err(Error::ParseFailed(_))));
    }

    #[test]
    fn environment_overrides() {
        let vars = HashMap::from([
            ("PULSE_QUEUE_BACKEND", "Memory"),
            ("PULSE_WORKERS", "5"),
            ("PULSE_REGION", "eu-west"),
            ("PULSE_HEALTH_PORT", "9000"),
            ("PULSE_DATABASE_PATH", "/tmp/pulse-test.db"),
        ]);
        let mut config = Config::default();
        config.apply_env(|name| vars.get(name).map(|v| v.to_string())).expect("overrides");

        assert_eq!(config.queue.backend, QueueBackend::Memory);
        assert_eq!(config.workers.count, 5);
        assert_eq!(config.scheduler.region.as_deref(), Some("eu-west"));
        assert_eq!(config.health.port, 9000);
        assert_eq!(config.database.path, path::PathBuf::from("/tmp/pulse-test.db"));
    }

    #[test]
    fn invalid_overrides_are_reported() {
        let mut config = Config::default();
        let result = config.apply_env(|name| (name == "PULSE_WORKERS").then(|| "many".to_string()));
        assert!(matches!(result, Err(Error::Invalid(_))));

        let config = Config { workers: WorkersConfig { count: 0 }, ..Default::default() };
        assert!(config.validate().is_err());
    }
}
