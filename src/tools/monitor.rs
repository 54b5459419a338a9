//! Resource Monitor
//!
//! Periodically samples a running child's resident memory and CPU usage and
//! reports the first limit violation over a channel. The monitor only knows
//! the pid; it never owns or kills the process. Acting on a violation is the
//! execution engine's job.
//!
//! # Sampling
//!
//! - Memory is compared against the ceiling on every sample.
//! - CPU is averaged over a trailing window of samples and only evaluated
//!   once the window is full, so a short burst at startup is not a violation.
//!   CPU figures are percent of one core (a process saturating two cores
//!   reads 200%).
//! - A sample that cannot be taken (process gone or zombie) ends monitoring
//!   without reporting anything.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;
use sysinfo::{Pid, ProcessRefreshKind, ProcessStatus, ProcessesToUpdate, System};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, warn};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Which ceiling was crossed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LimitKind {
    Memory,
    Cpu,
}

impl LimitKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LimitKind::Memory => "memory",
            LimitKind::Cpu => "cpu",
        }
    }
}

impl fmt::Display for LimitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ceilings for one execution; zero disables a ceiling
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceLimits {
    pub memory_limit_mb: u64,
    pub cpu_limit_percent: u8,
}

impl ResourceLimits {
    pub fn is_unlimited(&self) -> bool {
        self.memory_limit_mb == 0 && self.cpu_limit_percent == 0
    }
}

/// One observation of a running process
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResourceSample {
    /// Resident set size in bytes
    pub rss_bytes: u64,
    /// CPU usage since the previous sample, percent of one core
    pub cpu_percent: f32,
}

/// A crossed ceiling
///
/// Memory figures are in MB, CPU figures in percent of one core.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceViolation {
    pub limit: LimitKind,
    pub observed: f64,
    pub ceiling: f64,
}

impl fmt::Display for ResourceViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.limit {
            LimitKind::Memory => write!(
                f,
                "memory limit exceeded: {:.1} MB resident, limit {:.0} MB",
                self.observed, self.ceiling
            ),
            LimitKind::Cpu => write!(
                f,
                "cpu limit exceeded: {:.1}% average, limit {:.0}%",
                self.observed, self.ceiling
            ),
        }
    }
}

/// Sampling cadence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorConfig {
    pub interval: Duration,
    pub cpu_window: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            cpu_window: 5,
        }
    }
}

/// Source of resource samples for a pid
pub trait ProcessSampler: Send + 'static {
    /// `None` means the process is gone and monitoring should stop
    fn sample(&mut self, pid: u32) -> Option<ResourceSample>;
}

/// Production sampler backed by `sysinfo`
pub struct SysinfoSampler {
    system: System,
}

impl Default for SysinfoSampler {
    fn default() -> Self {
        Self {
            system: System::new(),
        }
    }
}

impl ProcessSampler for SysinfoSampler {
    fn sample(&mut self, pid: u32) -> Option<ResourceSample> {
        let pid = Pid::from_u32(pid);
        self.system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[pid]),
            true,
            ProcessRefreshKind::nothing().with_memory().with_cpu(),
        );

        let process = self.system.process(pid)?;
        if matches!(process.status(), ProcessStatus::Zombie | ProcessStatus::Dead) {
            return None;
        }

        Some(ResourceSample {
            rss_bytes: process.memory(),
            cpu_percent: process.cpu_usage(),
        })
    }
}

/// Applies ceilings to a stream of samples
#[derive(Debug)]
pub struct LimitEvaluator {
    limits: ResourceLimits,
    window: VecDeque<f32>,
    window_size: usize,
}

impl LimitEvaluator {
    pub fn new(limits: ResourceLimits, window_size: usize) -> Self {
        let window_size = window_size.max(1);
        Self {
            limits,
            window: VecDeque::with_capacity(window_size),
            window_size,
        }
    }

    /// Feed one sample; returns the first ceiling it crosses
    pub fn observe(&mut self, sample: ResourceSample) -> Option<ResourceViolation> {
        if self.limits.memory_limit_mb > 0 {
            let ceiling = self.limits.memory_limit_mb as f64;
            let observed = sample.rss_bytes as f64 / BYTES_PER_MB;
            if observed > ceiling {
                return Some(ResourceViolation {
                    limit: LimitKind::Memory,
                    observed,
                    ceiling,
                });
            }
        }

        if self.limits.cpu_limit_percent > 0 {
            if self.window.len() == self.window_size {
                self.window.pop_front();
            }
            self.window.push_back(sample.cpu_percent);

            if self.window.len() == self.window_size {
                let average =
                    self.window.iter().map(|v| *v as f64).sum::<f64>() / self.window_size as f64;
                let ceiling = self.limits.cpu_limit_percent as f64;
                if average > ceiling {
                    return Some(ResourceViolation {
                        limit: LimitKind::Cpu,
                        observed: average,
                        ceiling,
                    });
                }
            }
        }

        None
    }
}

/// Handle to a running monitor task
///
/// Dropping the handle stops sampling.
#[derive(Debug)]
pub struct MonitorHandle {
    violations: mpsc::Receiver<ResourceViolation>,
    task: JoinHandle<()>,
}

impl MonitorHandle {
    /// Wait for a violation; `None` once the monitor has stopped without one
    pub async fn violation(&mut self) -> Option<ResourceViolation> {
        self.violations.recv().await
    }

    /// Stop sampling
    pub fn detach(self) {
        self.task.abort();
    }
}

impl Drop for MonitorHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Start monitoring `pid` with the `sysinfo` sampler
pub fn attach(pid: u32, limits: ResourceLimits, config: MonitorConfig) -> MonitorHandle {
    attach_with_sampler(pid, limits, config, SysinfoSampler::default())
}

/// Start monitoring `pid` with a caller-provided sampler
pub fn attach_with_sampler<S: ProcessSampler>(
    pid: u32,
    limits: ResourceLimits,
    config: MonitorConfig,
    mut sampler: S,
) -> MonitorHandle {
    let (tx, rx) = mpsc::channel(1);

    let task = tokio::spawn(async move {
        let mut evaluator = LimitEvaluator::new(limits, config.cpu_window);
        let mut ticker = time::interval(config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            let Some(sample) = sampler.sample(pid) else {
                debug!(pid, "Process no longer sampleable, monitor stopping");
                return;
            };

            if let Some(violation) = evaluator.observe(sample) {
                warn!(pid, limit = %violation.limit, "{}", violation);
                let _ = tx.send(violation).await;
                return;
            }
        }
    });

    MonitorHandle {
        violations: rx,
        task,
    }
}
