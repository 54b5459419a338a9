//! toolguard Library
//!
//! Secure command execution for untrusted callers: allow-listed executables,
//! screened arguments, no shell, bounded time, memory, CPU and concurrency,
//! and guaranteed cleanup of every child process.
//!
//! The engine lives in [`tools`]. The remaining modules are the ambient stack
//! the `toolguard` binary is built from.

pub mod config;
pub mod logging;
pub mod metrics;
pub mod ops_server;
pub mod tools;
