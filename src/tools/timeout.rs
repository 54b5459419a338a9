//! Execution Timeout Management
//!
//! This module provides the timeout and grace window applied to every child.
//! Termination is always two-phase: SIGTERM when the timeout fires, SIGKILL
//! when the grace window runs out.

use std::time::Duration;
use tokio::time::{self, Instant};

/// Grace window between SIGTERM and SIGKILL
pub const DEFAULT_GRACE: Duration = Duration::from_secs(2);

/// Execution timeout configuration
///
/// Timeouts are enforced to prevent commands from hanging indefinitely.
/// A timeout of zero disables the timer; the grace window still applies to
/// resource-limit and shutdown terminations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionTimeout {
    /// The timeout duration (`None` when disabled)
    duration: Option<Duration>,

    /// Time between the terminate request and the forced kill
    grace: Duration,
}

impl Default for ExecutionTimeout {
    fn default() -> Self {
        Self::long()
    }
}

impl ExecutionTimeout {
    /// Create a new execution timeout
    ///
    /// # Example
    ///
    /// ```
    /// use std::time::Duration;
    /// use toolguard::tools::ExecutionTimeout;
    ///
    /// let timeout = ExecutionTimeout::new(Duration::from_secs(30));
    /// assert_eq!(timeout.duration(), Some(Duration::from_secs(30)));
    /// ```
    pub fn new(duration: Duration) -> Self {
        Self {
            duration: Some(duration),
            grace: DEFAULT_GRACE,
        }
    }

    /// No timer; the process may run until it exits or is killed
    pub fn disabled() -> Self {
        Self {
            duration: None,
            grace: DEFAULT_GRACE,
        }
    }

    /// Create a timeout from milliseconds; `0` disables the timer
    pub fn from_millis(ms: u64) -> Self {
        if ms == 0 {
            Self::disabled()
        } else {
            Self::new(Duration::from_millis(ms))
        }
    }

    /// Create a timeout for long-running operations (5 minutes, default)
    pub fn long() -> Self {
        Self::new(Duration::from_secs(300))
    }

    /// Override the grace window
    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Get the timeout duration
    pub fn duration(&self) -> Option<Duration> {
        self.duration
    }

    /// Get the grace window
    pub fn grace(&self) -> Duration {
        self.grace
    }

    pub fn is_disabled(&self) -> bool {
        self.duration.is_none()
    }

    /// Timeout in whole milliseconds, `0` when disabled
    pub fn as_millis(&self) -> u64 {
        self.duration.map(|d| d.as_millis() as u64).unwrap_or(0)
    }

    /// Wait until the timeout measured from `start` expires
    ///
    /// Never resolves when the timer is disabled.
    pub async fn expired(&self, start: Instant) {
        match self.duration {
            Some(duration) => time::sleep_until(start + duration).await,
            None => std::future::pending::<()>().await,
        }
    }
}
