#![forbid(unsafe_code)]

//! `mcp-deployer` — deploy a stdio tool server and exercise it.
//!
//! Detects the installed package runners, launches a server, prints its
//! tool list, optionally invokes one tool, and cleans up on exit. Results go
//! to stdout as JSON; logs go to stderr.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use mcp_deployer::models::launch::LaunchSpec;
use mcp_deployer::models::runtime::RuntimeKind;
use mcp_deployer::orchestrator::deployer::Deployer;
use mcp_deployer::orchestrator::registry::SessionRegistry;
use mcp_deployer::platform::SystemPlatform;
use mcp_deployer::{AppError, DeployerConfig, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "mcp-deployer", about = "Deploy and exercise stdio MCP tool servers", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file. Defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the detected package runners as JSON.
    Runtimes,
    /// Launch a server, run the handshake and print its tools.
    Deploy(DeployArgs),
}

#[derive(Debug, Args)]
struct DeployArgs {
    /// Package to run through the runner (e.g. `@scope/server`).
    #[arg(long, conflicts_with = "command", required_unless_present = "command")]
    package: Option<String>,

    /// Full launch command; `{transport}` is replaced by the transport token.
    #[arg(long)]
    command: Option<String>,

    /// Runner to use when the command does not name one (node or python).
    #[arg(long)]
    runtime: Option<RuntimeKind>,

    /// Per-request timeout in seconds; defaults to the configured value.
    #[arg(long)]
    timeout: Option<u64>,

    /// Tool to invoke once the handshake completes.
    #[arg(long)]
    call: Option<String>,

    /// JSON arguments for `--call`.
    #[arg(long, requires = "call", default_value = "{}")]
    args: String,

    /// Keep the server running until ctrl-c / SIGTERM.
    #[arg(long)]
    hold: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format)?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(cli))
}

async fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => DeployerConfig::load_from_path(path)?,
        None => DeployerConfig::default(),
    };
    let config = Arc::new(config);

    let deployer = Deployer::new(
        Arc::clone(&config),
        Arc::new(SystemPlatform),
        Arc::new(SessionRegistry::new()),
    );

    match cli.command {
        Command::Runtimes => print_json(&deployer.detect_runtimes().await),
        Command::Deploy(args) => {
            let outcome = deploy(&deployer, &config, args).await;
            let cleaned = deployer.cleanup_all().await;
            if cleaned > 0 {
                info!(cleaned, "sessions cleaned up");
            }
            outcome
        }
    }
}

async fn deploy(
    deployer: &Deployer<SystemPlatform>,
    config: &DeployerConfig,
    args: DeployArgs,
) -> Result<()> {
    let timeout = args
        .timeout
        .map_or_else(|| config.request_timeout(), Duration::from_secs);
    let spec = match (args.command, args.package) {
        (Some(command), _) => LaunchSpec::command(command, timeout),
        (None, Some(package)) => LaunchSpec::package(package, timeout),
        (None, None) => {
            return Err(AppError::Config(
                "deploy needs --package or --command".into(),
            ))
        }
    };

    let deployed = deployer.deploy(&spec, args.runtime).await?;
    print_json(&deployed)?;

    if let Some(tool) = args.call {
        let arguments: Value = serde_json::from_str(&args.args)
            .map_err(|err| AppError::Config(format!("--args is not valid JSON: {err}")))?;
        let result = deployer
            .call_tool(&deployed.session_id, &tool, arguments, timeout)
            .await?;
        print_json(&result)?;
    }

    if args.hold {
        info!(session_id = %deployed.session_id, "holding session, press ctrl-c to stop");
        shutdown_signal().await;
        info!("shutdown signal received");
    }

    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|err| AppError::Io(format!("failed to render output: {err}")))?;
    println!("{text}");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    result = ctrl_c => {
                        if let Err(err) = result {
                            tracing::error!(%err, "ctrl-c signal handler failed");
                        }
                    }
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                if let Err(err) = ctrl_c.await {
                    tracing::error!(%err, "ctrl-c signal handler failed");
                }
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
