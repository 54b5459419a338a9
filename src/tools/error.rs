//! Execution error taxonomy

use serde::{Deserialize, Serialize};
use std::fmt;

use super::monitor::ResourceViolation;
use super::validator::{CommandValidationError, RiskClass};

/// Closed classification carried by a failed [`ExecutionResult`](super::ExecutionResult)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Capacity,
    Spawn,
    Timeout,
    ResourceLimit,
    Exit,
    Shutdown,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Capacity => "capacity",
            ErrorKind::Spawn => "spawn",
            ErrorKind::Timeout => "timeout",
            ErrorKind::ResourceLimit => "resource_limit",
            ErrorKind::Exit => "exit",
            ErrorKind::Shutdown => "shutdown",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything that can stop an execution from producing a clean exit
#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    #[error("Command validation failed: {0}")]
    Validation(#[from] CommandValidationError),

    #[error("Invalid execution options: {0}")]
    InvalidOptions(String),

    #[error("Process limit reached ({active}/{limit} running)")]
    Capacity { active: usize, limit: usize },

    #[error("Process registry is shutting down; no new executions are admitted")]
    ShuttingDown,

    #[error("Failed to spawn process '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to wait for process: {0}")]
    Wait(#[source] std::io::Error),

    #[error("Command timed out after {0}ms")]
    Timeout(u64),

    #[error("{0}")]
    ResourceLimit(ResourceViolation),

    #[error("Command exited with code {0}")]
    Exit(i32),

    #[error("Command terminated by signal {0}")]
    Signaled(i32),

    #[error("Command terminated because the process registry shut down")]
    Shutdown,
}

impl ExecutionError {
    /// Tag recorded in the execution result
    pub fn kind(&self) -> ErrorKind {
        match self {
            ExecutionError::Validation(_) | ExecutionError::InvalidOptions(_) => {
                ErrorKind::Validation
            }
            ExecutionError::Capacity { .. } | ExecutionError::ShuttingDown => ErrorKind::Capacity,
            ExecutionError::Spawn { .. } => ErrorKind::Spawn,
            ExecutionError::Timeout(_) => ErrorKind::Timeout,
            ExecutionError::ResourceLimit(_) => ErrorKind::ResourceLimit,
            ExecutionError::Wait(_) | ExecutionError::Exit(_) | ExecutionError::Signaled(_) => {
                ErrorKind::Exit
            }
            ExecutionError::Shutdown => ErrorKind::Shutdown,
        }
    }

    /// Risk classification, for validation rejections only
    pub fn risk_class(&self) -> Option<RiskClass> {
        match self {
            ExecutionError::Validation(err) => Some(err.risk_class()),
            _ => None,
        }
    }
}
