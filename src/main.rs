// toolguard - Main Entry Point
//
// Command-line front end for the secure execution engine:
// - `run`: execute one allow-listed command under the configured limits
// - `check`: validate a command without running it
// - `config`: print the effective configuration
// - `serve`: run the ops HTTP server
//
// OS signal handling lives here; the library never registers handlers.

use anyhow::{Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing::{error, info, warn};

use toolguard::config::Config;
use toolguard::tools::{ErrorKind, ExecutionOptions, ExecutionResult, ToolExecutor};
use toolguard::{logging, metrics, ops_server};

/// toolguard: allow-listed, resource-bounded command execution
#[derive(Parser, Debug)]
#[command(name = "toolguard")]
#[command(version)]
#[command(about = "Secure command execution for untrusted callers", long_about = None)]
struct Args {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file (default: XDG config dir)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Execute a command under the configured policy
    Run(RunArgs),
    /// Validate a command without running it
    Check {
        /// Executable name or path
        command: String,

        /// Arguments to validate
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// Print the effective configuration as TOML
    Config,
    /// Run the ops HTTP server (health, metrics, executions, reset)
    Serve {
        /// Port to listen on (overrides configuration)
        #[arg(long)]
        port: Option<u16>,
    },
}

#[derive(ClapArgs, Debug)]
struct RunArgs {
    /// Timeout in milliseconds (0 disables)
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Working directory for the child
    #[arg(long)]
    working_directory: Option<PathBuf>,

    /// Extra environment variable (KEY=VALUE, repeatable)
    #[arg(long = "env", value_parser = parse_env_pair)]
    env: Vec<(String, String)>,

    /// Cap on captured stdout and stderr, in bytes
    #[arg(long)]
    max_output_bytes: Option<usize>,

    /// Scheduling niceness (0-19)
    #[arg(long)]
    niceness: Option<u8>,

    /// Resident memory ceiling in MB (0 = unlimited)
    #[arg(long)]
    memory_limit_mb: Option<u64>,

    /// CPU ceiling in percent of one core (0 = unlimited)
    #[arg(long)]
    cpu_limit_percent: Option<u8>,

    /// Inherit the full host environment
    #[arg(long)]
    unrestricted_env: bool,

    /// Concurrency ceiling (0 = unlimited)
    #[arg(long)]
    max_concurrent: Option<usize>,

    /// Discard stdout
    #[arg(long)]
    no_stdout: bool,

    /// Discard stderr
    #[arg(long)]
    no_stderr: bool,

    /// Collect output after exit instead of streaming it
    #[arg(long)]
    simple: bool,

    /// Partial options object (camelCase keys) applied after the flags
    #[arg(long)]
    options_json: Option<String>,

    /// Print the full result as JSON
    #[arg(long)]
    json: bool,

    /// Executable name or path
    command: String,

    /// Arguments passed to the command as-is
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,
}

impl RunArgs {
    /// Options from configured defaults, then flags, then the JSON overlay
    fn options(&self, defaults: &ExecutionOptions) -> Result<ExecutionOptions> {
        let mut options = defaults.clone();

        if let Some(timeout_ms) = self.timeout_ms {
            options.timeout_ms = timeout_ms;
        }
        if let Some(dir) = &self.working_directory {
            options.working_directory = Some(dir.clone());
        }
        for (name, value) in &self.env {
            options.extra_env.insert(name.clone(), value.clone());
        }
        if let Some(max_output_bytes) = self.max_output_bytes {
            options.max_output_bytes = max_output_bytes;
        }
        if let Some(niceness) = self.niceness {
            options.niceness = niceness;
        }
        if let Some(memory) = self.memory_limit_mb {
            options.memory_limit_mb = memory;
        }
        if let Some(cpu) = self.cpu_limit_percent {
            options.cpu_limit_percent = cpu;
        }
        if let Some(limit) = self.max_concurrent {
            options.max_concurrent_processes = limit;
        }
        if self.unrestricted_env {
            options.restricted_environment = false;
        }
        if self.no_stdout {
            options.capture_stdout = false;
        }
        if self.no_stderr {
            options.capture_stderr = false;
        }
        if self.simple {
            options.streaming = false;
        }

        if let Some(raw) = &self.options_json {
            let patch: serde_json::Value =
                serde_json::from_str(raw).context("--options-json is not valid JSON")?;
            options = options.overlay(&patch)?;
        }

        Ok(options)
    }
}

fn parse_env_pair(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((name, value)) if !name.is_empty() => Ok((name.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{}'", raw)),
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::load_from_path(path),
        None => Config::load(),
    }
    .context("Failed to load configuration")?;

    logging::init(&config.logging, args.verbose)?;
    metrics::init().context("Failed to initialize metrics")?;

    match args.command {
        Commands::Run(run) => run_command(&config, run).await,
        Commands::Check { command, args } => Ok(check_command(&config, &command, &args)),
        Commands::Config => {
            let rendered =
                toml::to_string_pretty(&config).context("Failed to render configuration")?;
            println!("# {}", Config::config_path().display());
            print!("{}", rendered);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Serve { port } => {
            serve(&config, port).await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Execute one command and mirror its outcome
async fn run_command(config: &Config, run: RunArgs) -> Result<ExitCode> {
    let options = run.options(&config.execution.defaults)?;
    let executor = config.execution.build_executor();

    let ops = if config.metrics.enabled {
        let addr = ops_address(config, None)?;
        let executor = executor.clone();
        Some(tokio::spawn(async move {
            if let Err(e) =
                ops_server::start_ops_server(addr, executor, std::future::pending()).await
            {
                error!("Ops server stopped: {:#}", e);
            }
        }))
    } else {
        None
    };

    let signals = {
        let executor = executor.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            executor.shutdown();
        })
    };

    let result = executor.execute(&run.command, &run.args, &options).await;

    signals.abort();
    drain(&executor, Duration::from_millis(config.execution.grace_period_ms)).await;
    if let Some(ops) = ops {
        ops.abort();
    }

    if run.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&result).context("Failed to serialise result")?
        );
    } else {
        print!("{}", result.stdout);
        eprint!("{}", result.stderr);
        if result.truncated {
            eprintln!("toolguard: output truncated at {} bytes", options.max_output_bytes);
        }
        if let Some(message) = &result.error {
            eprintln!("toolguard: {}", message);
        }
    }

    Ok(ExitCode::from(exit_status(&result)))
}

/// Process exit status for a result
///
/// The child's own code when it exited; otherwise a conventional code per
/// failure kind (124 timeout, 126 refused, 127 spawn failure).
fn exit_status(result: &ExecutionResult) -> u8 {
    if let Some(code) = result.exit_code {
        return (code & 0xff) as u8;
    }
    match result.error_kind {
        Some(ErrorKind::Timeout) => 124,
        Some(ErrorKind::Validation) | Some(ErrorKind::Capacity) => 126,
        Some(ErrorKind::Spawn) => 127,
        Some(ErrorKind::ResourceLimit) => 137,
        Some(ErrorKind::Shutdown) => 143,
        Some(ErrorKind::Exit) | None => 1,
    }
}

fn check_command(config: &Config, command: &str, args: &[String]) -> ExitCode {
    match config.execution.validator().validate(command, args) {
        Ok(safe) => {
            println!("allowed: {}", safe.program.display());
            ExitCode::SUCCESS
        }
        Err(e) => {
            println!("rejected [{}]: {}", e.risk_class(), e);
            ExitCode::FAILURE
        }
    }
}

/// Run the ops server until a termination signal arrives
async fn serve(config: &Config, port: Option<u16>) -> Result<()> {
    let addr = ops_address(config, port)?;
    let executor = config.execution.build_executor();

    ops_server::start_ops_server(addr, executor.clone(), shutdown_signal()).await?;

    drain(&executor, Duration::from_millis(config.execution.grace_period_ms)).await;
    Ok(())
}

/// Close admission, give running children the grace window, then force-kill
async fn drain(executor: &ToolExecutor, grace: Duration) {
    executor.shutdown();
    let registry = executor.registry();
    if !registry.wait_idle(grace + Duration::from_secs(1)).await {
        let killed = registry.force_kill_all();
        warn!(killed, "Force-killed processes that outlived the grace window");
    }
    info!("Shutdown complete");
}

fn ops_address(config: &Config, port: Option<u16>) -> Result<SocketAddr> {
    let port = port.unwrap_or(config.metrics.port);
    format!("{}:{}", config.metrics.bind_address, port)
        .parse()
        .with_context(|| {
            format!(
                "Invalid ops server address {}:{}",
                config.metrics.bind_address, port
            )
        })
}

/// Resolves on Ctrl-C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to register SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl-C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
