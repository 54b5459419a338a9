//! Tool Execution Subsystem
//!
//! This module provides secure subprocess execution for agent tool calls.
//! It enforces strict security measures to prevent shell injection attacks
//! and runaway processes.
//!
//! # Security Features
//!
//! - **Command Whitelisting**: Only known-safe executables are allowed
//! - **List Invocation**: Commands are executed as lists, never through a shell
//! - **Argument Screening**: Metacharacters, destructive patterns, environment
//!   expansion and path traversal are rejected before anything is spawned
//! - **Restricted Environment**: Children start from a minimal environment
//! - **Timeout Enforcement**: Every execution can be bounded, with a two-phase kill
//! - **Resource Limits**: Memory and CPU ceilings enforced by a sampling monitor
//! - **Concurrency Ceiling**: A global cap on running children, with fail-fast admission
//!
//! # Architecture
//!
//! The module is organized into:
//! - `validator.rs`: Command validation and whitelisting
//! - `path_safety.rs`: Path normalisation and the pluggable path policy
//! - `executor.rs`: The execution engine
//! - `registry.rs`: Admission control and the table of running children
//! - `monitor.rs`: Memory/CPU sampling
//! - `timeout.rs`: Timeout and grace window
//! - `environment.rs`: Restricted child environment
//! - `options.rs`: Per-call options
//! - `output.rs`: Bounded output capture
//! - `process.rs`: Process-group signalling
//! - `error.rs`: Error taxonomy
//!
//! # Example
//!
//! ```no_run
//! use toolguard::tools::{ExecutionOptions, ToolExecutor};
//!
//! #[tokio::main]
//! async fn main() {
//!     let executor = ToolExecutor::new();
//!     let options = ExecutionOptions::default().with_timeout_ms(30_000);
//!
//!     let result = executor
//!         .execute("nmap", &["-sV", "scanme.nmap.org"], &options)
//!         .await;
//!
//!     println!("Exit code: {:?}", result.exit_code);
//!     println!("Stdout: {}", result.stdout);
//! }
//! ```

mod environment;
mod error;
mod executor;
mod monitor;
mod options;
mod output;
mod path_safety;
mod process;
mod registry;
mod timeout;
mod validator;

pub use environment::{EnvironmentPolicy, DEFAULT_PASSTHROUGH, DEFAULT_RESTRICTED_PATH};
pub use error::{ErrorKind, ExecutionError};
pub use executor::{ExecutionResult, ExecutorConfig, ToolExecutor};
pub use monitor::{
    attach, attach_with_sampler, LimitKind, MonitorConfig, MonitorHandle, ProcessSampler,
    ResourceLimits, ResourceSample, ResourceViolation, SysinfoSampler,
};
pub use options::{ExecutionOptions, DEFAULT_MAX_CONCURRENT_PROCESSES};
pub use path_safety::{DefaultPathSafety, PathSafety};
pub use registry::{ActiveExecution, AdmissionToken, ProcessRegistry, RegisteredProcess};
pub use timeout::{ExecutionTimeout, DEFAULT_GRACE};
pub use validator::{CommandValidationError, CommandValidator, RiskClass, SafeCommand};
