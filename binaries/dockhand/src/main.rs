//! dockhand - declarative container lifecycle manager.
//!
//! Starts, stops, inspects and tears down the services declared in a TOML
//! configuration file. Each service is one named container; every command is
//! idempotent with respect to the live state of the Docker daemon.
//!
//! # Usage
//!
//! ```bash
//! # Start (creating if needed) the service declared as [services.cache]
//! dockhand --config dockhand.toml start cache
//!
//! # Run a command inside it
//! dockhand --config dockhand.toml exec cache -- redis-cli PING
//!
//! # Back up, then remove container, image, volumes and network
//! dockhand --config dockhand.toml delete cache --force --backup
//!
//! # Print the default configuration
//! dockhand print-config
//! ```

mod config;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use config::DockhandConfig;
use dockhand_orchestrator::{ContainerConfig, DockerRuntime, ManagerRegistry, StartOutcome};
use futures::StreamExt;
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// CLI arguments for dockhand.
#[derive(Parser, Debug)]
#[command(
    name = "dockhand",
    about = "Declarative lifecycle manager for named Docker containers",
    version,
    author
)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short, long, value_name = "FILE", env = "DOCKHAND_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, value_name = "LEVEL", global = true)]
    log_level: Option<String>,

    /// Enable JSON log output.
    #[arg(long, global = true)]
    json_logs: bool,

    /// Directory receiving backup tarballs.
    #[arg(long, value_name = "DIR", global = true)]
    backup_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Command {
    /// Start a service, creating its container if needed.
    Start {
        /// Service name.
        name: String,
    },

    /// Stop a service.
    Stop {
        /// Service name.
        name: String,

        /// Seconds to wait before the container is killed.
        #[arg(short, long, value_name = "SECS")]
        timeout: Option<u64>,
    },

    /// Restart a service.
    Restart {
        /// Service name.
        name: String,
    },

    /// Remove a service's container, image, managed volumes and network.
    Delete {
        /// Service name.
        name: String,

        /// Remove even if the container refuses to stop.
        #[arg(long)]
        force: bool,

        /// Export and snapshot the container before removing anything.
        #[arg(long)]
        backup: bool,
    },

    /// Print a service's logs.
    Logs {
        /// Service name.
        name: String,

        /// Keep streaming until the container stops or Ctrl+C.
        #[arg(short, long)]
        follow: bool,
    },

    /// Run a command inside a service's container.
    Exec {
        /// Service name.
        name: String,

        /// Command and arguments.
        #[arg(last = true, required = true)]
        cmd: Vec<String>,
    },

    /// Show the live state of one or all services.
    Status {
        /// Service name (all services if omitted).
        name: Option<String>,
    },

    /// Print the default configuration and exit.
    PrintConfig,
}

/// Initialize tracing based on configuration.
fn init_tracing(config: &config::LoggingConfig, json_logs: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .context("Failed to parse log filter")?;

    let format = if json_logs || config.format == "json" {
        "json"
    } else {
        &config.format
    };

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .try_init()
                .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {}", e))?;
        }
        "compact" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().compact().with_writer(std::io::stderr))
                .try_init()
                .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {}", e))?;
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().pretty().with_writer(std::io::stderr))
                .try_init()
                .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {}", e))?;
        }
    }

    Ok(())
}

/// Resolves when Ctrl+C or SIGTERM arrives.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Looks up the named service in the configuration.
fn service(config: &DockhandConfig, name: &str) -> Result<ContainerConfig> {
    config
        .service(name)
        .cloned()
        .with_context(|| format!("No service named '{name}' in configuration"))
}

/// Registers the named service and returns its container name.
async fn register(registry: &ManagerRegistry, config: &DockhandConfig, name: &str) -> Result<String> {
    let service = service(config, name)?;
    let container = service.name.clone();
    registry.register(service).await?;
    Ok(container)
}

fn print_default_config() -> Result<()> {
    println!("{}", toml::to_string_pretty(&DockhandConfig::default())?);
    Ok(())
}

async fn run(command: Command, config: DockhandConfig) -> Result<ExitCode> {
    let runtime = Arc::new(DockerRuntime::with_connection(config.docker.connection()));
    let registry = ManagerRegistry::new(runtime, config.manager.options());

    match command {
        Command::Start { name } => {
            let service = service(&config, &name)?;
            let container = service.name.clone();
            let outcome = registry.start(service).await?;
            let verb = match outcome {
                StartOutcome::Created => "created",
                StartOutcome::Started => "started",
            };
            println!("{container}: {verb}");
        }
        Command::Stop { name, timeout } => {
            let container = register(&registry, &config, &name).await?;
            let timeout = timeout
                .map(Duration::from_secs)
                .unwrap_or_else(|| config.manager.stop_timeout());
            registry.stop(&container, timeout).await?;
            println!("{container}: stopped");
        }
        Command::Restart { name } => {
            let container = register(&registry, &config, &name).await?;
            registry.restart(&container).await?;
            println!("{container}: restarted");
        }
        Command::Delete { name, force, backup } => {
            let container = register(&registry, &config, &name).await?;
            let outcome = registry.delete(&container, force, backup).await?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
        Command::Logs { name, follow } => {
            let container = register(&registry, &config, &name).await?;
            let mut logs = registry.stream_logs(&container, follow).await?;
            let shutdown = shutdown_signal();
            tokio::pin!(shutdown);
            let mut stdout = std::io::stdout();
            loop {
                tokio::select! {
                    chunk = logs.next() => match chunk {
                        Some(chunk) => {
                            stdout.write_all(chunk?.as_bytes())?;
                            stdout.flush()?;
                        }
                        None => break,
                    },
                    _ = &mut shutdown => {
                        info!("Interrupted");
                        break;
                    }
                }
            }
        }
        Command::Exec { name, cmd } => {
            let container = register(&registry, &config, &name).await?;
            let output = registry.exec(&container, &cmd).await?;
            print!("{}", output.stdout);
            eprint!("{}", output.stderr);
            if !output.success() {
                return Ok(ExitCode::from(exit_status(output.exit_code)));
            }
        }
        Command::Status { name } => {
            let names = match name {
                Some(name) => vec![name],
                None => config.services.keys().cloned().collect(),
            };
            for name in names {
                let container = register(&registry, &config, &name).await?;
                match registry.status(&container).await? {
                    Some(state) => println!("{container}: {state}"),
                    None => println!("{container}: absent"),
                }
            }
        }
        Command::PrintConfig => print_default_config()?,
    }

    Ok(ExitCode::SUCCESS)
}

/// Clamps a container exit code into a process exit status.
fn exit_status(code: i64) -> u8 {
    u8::try_from(code).unwrap_or(1)
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Parse CLI arguments
    let args = CliArgs::parse();

    // Handle print-config
    if args.command == Command::PrintConfig {
        print_default_config()?;
        return Ok(ExitCode::SUCCESS);
    }

    // Load configuration
    let mut config = if let Some(ref config_path) = args.config {
        DockhandConfig::from_file(config_path)
            .with_context(|| format!("Failed to load config from {:?}", config_path))?
    } else {
        DockhandConfig::default()
    };

    // Merge CLI arguments
    config.merge_cli_args(&args);

    // Validate configuration
    config.validate().context("Invalid configuration")?;

    // Initialize tracing
    init_tracing(&config.logging, args.json_logs)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        services = config.services.len(),
        "dockhand starting"
    );

    match run(args.command, config).await {
        Ok(code) => Ok(code),
        Err(e) => {
            error!(error = %e, "Command failed");
            Err(e)
        }
    }
}
