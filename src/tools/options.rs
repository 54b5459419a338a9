//! Per-call execution options

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

use super::environment;
use super::error::ExecutionError;
use super::monitor::ResourceLimits;
use super::timeout::ExecutionTimeout;

/// Default timeout (5 minutes)
pub const DEFAULT_TIMEOUT_MS: u64 = 300_000;

/// Default per-stream capture cap (10 MiB)
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 10 * 1024 * 1024;

/// Default concurrency ceiling
pub const DEFAULT_MAX_CONCURRENT_PROCESSES: usize = 10;

/// Highest accepted niceness
pub const MAX_NICENESS: u8 = 19;

/// Options for a single `execute` call
///
/// Every field has a default, so a partial JSON object is a valid option set.
/// Unknown keys are rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct ExecutionOptions {
    /// Wall-clock timeout; `0` disables the timer
    pub timeout_ms: u64,

    /// Working directory for the child (inherits ours when unset)
    pub working_directory: Option<PathBuf>,

    /// Variables added on top of the (possibly restricted) environment
    pub extra_env: HashMap<String, String>,

    /// Cap applied to stdout and stderr separately
    pub max_output_bytes: usize,

    /// Scheduling niceness, 0-19 (Unix only)
    pub niceness: u8,

    /// Resident memory ceiling in MB; `0` is unlimited
    #[serde(rename = "memoryLimitMB")]
    pub memory_limit_mb: u64,

    /// Average CPU ceiling in percent of one core; `0` is unlimited
    pub cpu_limit_percent: u8,

    /// Start the child from a minimal environment
    pub restricted_environment: bool,

    /// Global concurrency ceiling checked at admission; `0` is unlimited
    pub max_concurrent_processes: usize,

    pub capture_stdout: bool,

    pub capture_stderr: bool,

    /// Stream output while the child runs (forced on when limits are set)
    pub streaming: bool,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_TIMEOUT_MS,
            working_directory: None,
            extra_env: HashMap::new(),
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            niceness: 0,
            memory_limit_mb: 0,
            cpu_limit_percent: 0,
            restricted_environment: true,
            max_concurrent_processes: DEFAULT_MAX_CONCURRENT_PROCESSES,
            capture_stdout: true,
            capture_stderr: true,
            streaming: true,
        }
    }
}

impl ExecutionOptions {
    /// Overlay a partial JSON object onto these options
    ///
    /// Keys present in `patch` replace the corresponding field; everything
    /// else keeps its current value.
    ///
    /// # Errors
    ///
    /// Returns [`ExecutionError::InvalidOptions`] if `patch` is not an object,
    /// contains unknown keys or has values of the wrong type.
    ///
    /// # Example
    ///
    /// ```
    /// use toolguard::tools::ExecutionOptions;
    ///
    /// let options = ExecutionOptions::default()
    ///     .overlay(&serde_json::json!({ "timeoutMs": 1000 }))
    ///     .unwrap();
    /// assert_eq!(options.timeout_ms, 1000);
    /// assert!(options.restricted_environment);
    /// ```
    pub fn overlay(&self, patch: &serde_json::Value) -> Result<Self, ExecutionError> {
        let patch = patch.as_object().ok_or_else(|| {
            ExecutionError::InvalidOptions("options must be a JSON object".to_string())
        })?;

        let mut merged = match serde_json::to_value(self) {
            Ok(serde_json::Value::Object(map)) => map,
            Ok(_) | Err(_) => {
                return Err(ExecutionError::InvalidOptions(
                    "options could not be serialized".to_string(),
                ))
            }
        };
        for (key, value) in patch {
            merged.insert(key.clone(), value.clone());
        }

        serde_json::from_value(serde_json::Value::Object(merged))
            .map_err(|e| ExecutionError::InvalidOptions(e.to_string()))
    }

    /// Check value ranges and caller-supplied environment
    pub fn validate(&self) -> Result<(), ExecutionError> {
        if self.niceness > MAX_NICENESS {
            return Err(ExecutionError::InvalidOptions(format!(
                "niceness must be between 0 and {}, got {}",
                MAX_NICENESS, self.niceness
            )));
        }
        if self.cpu_limit_percent > 100 {
            return Err(ExecutionError::InvalidOptions(format!(
                "cpuLimitPercent must be between 0 and 100, got {}",
                self.cpu_limit_percent
            )));
        }
        if self.max_output_bytes == 0 {
            return Err(ExecutionError::InvalidOptions(
                "maxOutputBytes must be positive".to_string(),
            ));
        }
        if let Some(dir) = &self.working_directory {
            if !dir.is_dir() {
                return Err(ExecutionError::InvalidOptions(format!(
                    "working directory '{}' does not exist",
                    dir.display()
                )));
            }
        }
        environment::check_extra_env(&self.extra_env, self.restricted_environment)
            .map_err(ExecutionError::InvalidOptions)
    }

    pub fn resource_limits(&self) -> ResourceLimits {
        ResourceLimits {
            memory_limit_mb: self.memory_limit_mb,
            cpu_limit_percent: self.cpu_limit_percent,
        }
    }

    /// Streaming is mandatory whenever a resource ceiling is set
    pub fn uses_streaming(&self) -> bool {
        self.streaming || !self.resource_limits().is_unlimited()
    }

    pub fn timeout(&self) -> ExecutionTimeout {
        ExecutionTimeout::from_millis(self.timeout_ms)
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_max_output_bytes(mut self, max_output_bytes: usize) -> Self {
        self.max_output_bytes = max_output_bytes;
        self
    }

    pub fn with_working_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }

    pub fn with_env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_env.insert(name.into(), value.into());
        self
    }

    pub fn with_memory_limit_mb(mut self, limit: u64) -> Self {
        self.memory_limit_mb = limit;
        self
    }

    pub fn with_cpu_limit_percent(mut self, limit: u8) -> Self {
        self.cpu_limit_percent = limit;
        self
    }

    pub fn with_max_concurrent_processes(mut self, limit: usize) -> Self {
        self.max_concurrent_processes = limit;
        self
    }

    pub fn with_niceness(mut self, niceness: u8) -> Self {
        self.niceness = niceness;
        self
    }

    pub fn unrestricted_environment(mut self) -> Self {
        self.restricted_environment = false;
        self
    }

    pub fn simple_mode(mut self) -> Self {
        self.streaming = false;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults() {
        let options = ExecutionOptions::default();
        assert_eq!(options.timeout_ms, 300_000);
        assert_eq!(options.max_output_bytes, 10 * 1024 * 1024);
        assert!(options.restricted_environment);
        assert!(options.capture_stdout && options.capture_stderr);
        assert!(options.streaming);
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let options: ExecutionOptions =
            serde_json::from_value(json!({ "timeoutMs": 1000, "memoryLimitMB": 64 })).unwrap();
        assert_eq!(options.timeout_ms, 1000);
        assert_eq!(options.memory_limit_mb, 64);
        assert_eq!(options.max_output_bytes, DEFAULT_MAX_OUTPUT_BYTES);
    }

    #[test]
    fn test_unknown_keys_rejected() {
        let result = serde_json::from_value::<ExecutionOptions>(json!({ "shell": true }));
        assert!(result.is_err());

        let err = ExecutionOptions::default()
            .overlay(&json!({ "timeout": 5 }))
            .unwrap_err();
        assert!(matches!(err, ExecutionError::InvalidOptions(_)));
    }

    #[test]
    fn test_overlay_keeps_base_values() {
        let base = ExecutionOptions::default()
            .with_timeout_ms(5_000)
            .with_env("SCAN_PROFILE", "fast");

        let merged = base
            .overlay(&json!({ "cpuLimitPercent": 50, "restrictedEnvironment": false }))
            .unwrap();

        assert_eq!(merged.timeout_ms, 5_000);
        assert_eq!(merged.cpu_limit_percent, 50);
        assert!(!merged.restricted_environment);
        assert_eq!(merged.extra_env.get("SCAN_PROFILE").unwrap(), "fast");
    }

    #[test]
    fn test_overlay_rejects_non_object() {
        assert!(ExecutionOptions::default().overlay(&json!([1, 2])).is_err());
        assert!(ExecutionOptions::default()
            .overlay(&json!({ "timeoutMs": "soon" }))
            .is_err());
    }

    #[test]
    fn test_validate_ranges() {
        assert!(ExecutionOptions::default().with_niceness(20).validate().is_err());
        assert!(ExecutionOptions::default().with_niceness(19).validate().is_ok());
        assert!(ExecutionOptions::default()
            .with_cpu_limit_percent(101)
            .validate()
            .is_err());
        assert!(ExecutionOptions::default()
            .with_max_output_bytes(0)
            .validate()
            .is_err());
        assert!(ExecutionOptions::default()
            .with_working_directory("/definitely/not/a/dir")
            .validate()
            .is_err());
        assert!(ExecutionOptions::default()
            .with_env("LD_PRELOAD", "/tmp/x.so")
            .validate()
            .is_err());
    }

    #[test]
    fn test_limits_force_streaming() {
        let options = ExecutionOptions::default().simple_mode();
        assert!(!options.uses_streaming());
        assert!(options.with_memory_limit_mb(10).uses_streaming());
    }

    #[test]
    fn test_zero_timeout_disables_timer() {
        let options = ExecutionOptions::default().with_timeout_ms(0);
        assert!(options.timeout().is_disabled());
    }
}
