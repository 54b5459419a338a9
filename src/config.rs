// Configuration File Support
//
// This module provides configuration file parsing for toolguard.
// Supports TOML format with environment variable overrides.
// Configuration files are loaded from XDG config directory: ~/.config/toolguard/config.toml

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::tools::{
    CommandValidator, EnvironmentPolicy, ExecutionOptions, ExecutorConfig, MonitorConfig,
    ToolExecutor, DEFAULT_PASSTHROUGH, DEFAULT_RESTRICTED_PATH,
};

/// Prefix for environment variable overrides
const ENV_PREFIX: &str = "TOOLGUARD_";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// Logging configuration
    pub logging: LoggingConfig,

    /// Command execution policy
    pub execution: ExecutionConfig,

    /// Metrics / ops server configuration
    pub metrics: MetricsConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (json, pretty, compact)
    pub format: String,

    /// Whether to log to file
    pub log_to_file: bool,

    /// Log file path (if log_to_file is true)
    pub log_file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "compact".to_string(),
            log_to_file: false,
            log_file: None,
        }
    }
}

/// Command execution policy
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Executable names that may be run (empty means the built-in default list)
    pub allowed_commands: Vec<String>,

    /// Search path for bare command names (host PATH when unset)
    pub search_path: Option<String>,

    /// PATH handed to children running with a restricted environment
    pub restricted_path: String,

    /// Host variables copied into a restricted environment
    pub passthrough_env: Vec<String>,

    /// Milliseconds between SIGTERM and SIGKILL
    pub grace_period_ms: u64,

    /// Milliseconds between resource samples
    pub monitor_interval_ms: u64,

    /// Number of samples averaged for the CPU ceiling
    pub cpu_window_samples: usize,

    /// Options applied when a caller brings none
    pub defaults: ExecutionOptions,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            allowed_commands: Vec::new(),
            search_path: None,
            restricted_path: DEFAULT_RESTRICTED_PATH.to_string(),
            passthrough_env: DEFAULT_PASSTHROUGH.iter().map(|s| s.to_string()).collect(),
            grace_period_ms: 2_000,
            monitor_interval_ms: 1_000,
            cpu_window_samples: 5,
            defaults: ExecutionOptions::default(),
        }
    }
}

impl ExecutionConfig {
    /// Validator for the configured allow-list and search path
    pub fn validator(&self) -> CommandValidator {
        let validator = if self.allowed_commands.is_empty() {
            CommandValidator::with_default_whitelist()
        } else {
            CommandValidator::with_whitelist(self.allowed_commands.clone())
        };

        match &self.search_path {
            Some(search_path) => validator.with_search_path(search_path),
            None => validator,
        }
    }

    /// Engine configuration derived from this policy
    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig::default()
            .with_grace(Duration::from_millis(self.grace_period_ms))
            .with_monitor(MonitorConfig {
                interval: Duration::from_millis(self.monitor_interval_ms),
                cpu_window: self.cpu_window_samples,
            })
            .with_environment(EnvironmentPolicy::new(
                self.restricted_path.clone(),
                self.passthrough_env.clone(),
            ))
            .with_default_options(self.defaults.clone())
    }

    /// Build an executor for this policy
    pub fn build_executor(&self) -> ToolExecutor {
        ToolExecutor::from_parts(self.validator(), self.executor_config())
    }
}

/// Metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MetricsConfig {
    /// Whether to start the ops server alongside `run`
    pub enabled: bool,

    /// Port for the ops server
    pub port: u16,

    /// Address the ops server binds to
    pub bind_address: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: 9090,
            bind_address: "127.0.0.1".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from the default XDG config directory
    ///
    /// # Returns
    ///
    /// * `Result<Config>` - The loaded configuration with defaults applied
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed.
    /// If the config file does not exist, returns default configuration.
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();
        Self::load_from_path(&config_path)
    }

    /// Load configuration from a specific path
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed, or
    /// if the result (after environment overrides) fails validation.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let config = if path.exists() {
            let content = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file from {:?}", path))?;

            let config: Config = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file from {:?}", path))?;

            tracing::info!("Loaded configuration from {:?}", path);
            config
        } else {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            Self::default()
        };

        // Apply environment variable overrides
        let config = config.apply_env_overrides();

        // Validate configuration
        config.validate()?;

        Ok(config)
    }

    /// Get the default configuration file path
    ///
    /// Returns `~/.config/toolguard/config.toml` on Linux
    pub fn config_path() -> PathBuf {
        if let Some(proj_dirs) = directories::ProjectDirs::from("com", "toolguard", "toolguard") {
            proj_dirs.config_dir().join("config.toml")
        } else {
            // Fallback if XDG dirs cannot be determined
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
            PathBuf::from(home)
                .join(".config")
                .join("toolguard")
                .join("config.toml")
        }
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Environment variables take precedence over config file values:
    /// - TOOLGUARD_LOG_LEVEL
    /// - TOOLGUARD_LOG_FORMAT
    /// - TOOLGUARD_ALLOWED_COMMANDS (comma-separated)
    /// - TOOLGUARD_RESTRICTED_PATH
    /// - TOOLGUARD_MAX_CONCURRENT
    /// - TOOLGUARD_TIMEOUT_MS
    /// - TOOLGUARD_MEMORY_LIMIT_MB
    /// - TOOLGUARD_CPU_LIMIT_PERCENT
    /// - TOOLGUARD_METRICS_ENABLED
    /// - TOOLGUARD_METRICS_PORT
    fn apply_env_overrides(self) -> Self {
        self.apply_overrides(|name| std::env::var(format!("{}{}", ENV_PREFIX, name)).ok())
    }

    fn apply_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        // Logging overrides
        if let Some(level) = lookup("LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = lookup("LOG_FORMAT") {
            self.logging.format = format;
        }

        // Execution overrides
        if let Some(commands) = lookup("ALLOWED_COMMANDS") {
            self.execution.allowed_commands = commands
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(path) = lookup("RESTRICTED_PATH") {
            self.execution.restricted_path = path;
        }
        if let Some(limit) = lookup("MAX_CONCURRENT").and_then(|v| v.parse().ok()) {
            self.execution.defaults.max_concurrent_processes = limit;
        }
        if let Some(timeout) = lookup("TIMEOUT_MS").and_then(|v| v.parse().ok()) {
            self.execution.defaults.timeout_ms = timeout;
        }
        if let Some(memory) = lookup("MEMORY_LIMIT_MB").and_then(|v| v.parse().ok()) {
            self.execution.defaults.memory_limit_mb = memory;
        }
        if let Some(cpu) = lookup("CPU_LIMIT_PERCENT").and_then(|v| v.parse().ok()) {
            self.execution.defaults.cpu_limit_percent = cpu;
        }

        // Metrics overrides
        if let Some(enabled) = lookup("METRICS_ENABLED") {
            self.metrics.enabled = enabled.parse().unwrap_or(self.metrics.enabled);
        }
        if let Some(port) = lookup("METRICS_PORT").and_then(|v| v.parse().ok()) {
            self.metrics.port = port;
        }

        self
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<()> {
        // Validate logging level
        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!(
                "Invalid log level: {}. Must be one of: trace, debug, info, warn, error",
                self.logging.level
            ),
        }

        // Validate logging format
        match self.logging.format.to_lowercase().as_str() {
            "json" | "pretty" | "compact" => {}
            _ => anyhow::bail!(
                "Invalid log format: {}. Must be one of: json, pretty, compact",
                self.logging.format
            ),
        }
        if self.logging.log_to_file && self.logging.log_file.is_none() {
            anyhow::bail!("log_to_file is enabled but no log_file is configured");
        }

        // Validate execution policy
        let execution = &self.execution;
        for command in &execution.allowed_commands {
            if command.is_empty() || command.contains(['/', '\\']) || command.contains(char::is_whitespace) {
                anyhow::bail!("Allowed command '{}' must be a bare executable name", command);
            }
        }
        if execution.restricted_path.is_empty() {
            anyhow::bail!("Restricted PATH must not be empty");
        }
        if execution.monitor_interval_ms == 0 {
            anyhow::bail!("Monitor interval must be > 0");
        }
        if execution.cpu_window_samples == 0 {
            anyhow::bail!("CPU window must contain at least one sample");
        }
        execution
            .defaults
            .validate()
            .context("Invalid default execution options")?;

        // Validate metrics configuration
        if self.metrics.port == 0 {
            anyhow::bail!("Metrics port must be > 0");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.format, "compact");
        assert!(config.execution.allowed_commands.is_empty());
        assert_eq!(config.execution.grace_period_ms, 2_000);
        assert_eq!(config.execution.defaults.timeout_ms, 300_000);
        assert!(!config.metrics.enabled);
        assert_eq!(config.metrics.port, 9090);
    }

    #[test]
    fn test_config_validation_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation_invalid_log_level() {
        let mut config = Config::default();
        config.logging.level = "invalid".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_invalid_log_format() {
        let mut config = Config::default();
        config.logging.format = "invalid".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_log_file_required() {
        let mut config = Config::default();
        config.logging.log_to_file = true;
        assert!(config.validate().is_err());

        config.logging.log_file = Some("/tmp/toolguard.log".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation_invalid_allowed_command() {
        let mut config = Config::default();
        config.execution.allowed_commands = vec!["/usr/bin/nmap".to_string()];
        assert!(config.validate().is_err());

        config.execution.allowed_commands = vec!["nmap -sV".to_string()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_invalid_defaults() {
        let mut config = Config::default();
        config.execution.defaults.niceness = 25;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_invalid_monitor() {
        let mut config = Config::default();
        config.execution.monitor_interval_ms = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.execution.cpu_window_samples = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_invalid_metrics_port() {
        let mut config = Config::default();
        config.metrics.port = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let config = Config::load_from_path("/nonexistent/toolguard/config.toml").unwrap();
        assert_eq!(config.logging.level, Config::default().logging.level);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[logging]
level = "debug"
format = "json"

[execution]
allowed_commands = ["nmap", "echo"]
grace_period_ms = 500

[execution.defaults]
timeoutMs = 1000
memoryLimitMB = 256

[metrics]
port = 9191
"#
        )
        .unwrap();

        let config = Config::load_from_path(file.path()).unwrap();
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, "json");
        assert_eq!(config.execution.allowed_commands, vec!["nmap", "echo"]);
        assert_eq!(config.execution.grace_period_ms, 500);
        assert_eq!(config.execution.defaults.timeout_ms, 1000);
        assert_eq!(config.execution.defaults.memory_limit_mb, 256);
        assert!(config.execution.defaults.restricted_environment);
        assert_eq!(config.metrics.port, 9191);
    }

    #[test]
    fn test_load_invalid_toml() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "this is not = = toml").unwrap();
        assert!(Config::load_from_path(file.path()).is_err());
    }

    #[test]
    fn test_load_rejects_unknown_option_keys() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[execution.defaults]\nshell = true").unwrap();
        assert!(Config::load_from_path(file.path()).is_err());
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            ("LOG_LEVEL", "warn"),
            ("ALLOWED_COMMANDS", "nmap, dig ,"),
            ("MAX_CONCURRENT", "3"),
            ("TIMEOUT_MS", "1500"),
            ("CPU_LIMIT_PERCENT", "80"),
            ("METRICS_PORT", "not-a-port"),
        ]
        .into_iter()
        .collect();

        let config = Config::default().apply_overrides(|name| vars.get(name).map(|v| v.to_string()));

        assert_eq!(config.logging.level, "warn");
        assert_eq!(config.execution.allowed_commands, vec!["nmap", "dig"]);
        assert_eq!(config.execution.defaults.max_concurrent_processes, 3);
        assert_eq!(config.execution.defaults.timeout_ms, 1500);
        assert_eq!(config.execution.defaults.cpu_limit_percent, 80);
        // Unparseable values leave the default in place
        assert_eq!(config.metrics.port, 9090);
    }

    #[test]
    fn test_build_executor_uses_policy() {
        let mut config = Config::default();
        config.execution.allowed_commands = vec!["echo".to_string()];
        config.execution.grace_period_ms = 250;

        let executor = config.execution.build_executor();
        assert!(executor.validator().is_allowed("echo"));
        assert!(!executor.validator().is_allowed("nmap"));
        assert_eq!(executor.config().grace, Duration::from_millis(250));
    }
}
