use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::BoxMakeWriter;

use voicegate_core::config::{Config, LoggingConfig};
use voicegate_gateway::GatewayState;
use voicegate_providers::Services;

#[derive(Parser)]
#[command(
    name = "voicegate",
    about = "Real-time voice gateway: stream PCM in, get spoken replies back",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path (default: ~/.voicegate/config.json)
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway server
    Serve {
        /// Port to listen on (default: 8888)
        #[arg(long)]
        port: Option<u16>,

        /// Address to bind (default: 0.0.0.0)
        #[arg(long)]
        bind: Option<String>,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Ask a running gateway for its health
    Status,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show the effective configuration
    Show,
    /// Validate the configuration
    Check,
}

/// Install the global subscriber. `RUST_LOG` wins over config; `--verbose` over `level`.
fn init_tracing(logging: &LoggingConfig, verbose: bool) {
    let level = if verbose {
        "debug".to_string()
    } else {
        logging.level.clone().unwrap_or_else(|| "info".into())
    };
    let directives = std::iter::once(level)
        .chain(logging.filters.iter().cloned())
        .collect::<Vec<_>>()
        .join(",");

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&directives))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let writer = match logging.output.as_str() {
        "stdout" => BoxMakeWriter::new(std::io::stdout),
        _ => BoxMakeWriter::new(std::io::stderr),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer);
    if logging.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load config
    let config_path = cli
        .config
        .map(PathBuf::from)
        .unwrap_or_else(Config::default_path);

    let config = Config::load(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;

    init_tracing(&config.logging(), cli.verbose);

    match cli.command {
        Commands::Serve { port, bind } => {
            let (warnings, errors) = config.validate();
            for w in &warnings {
                tracing::warn!("config: {w}");
            }
            if !errors.is_empty() {
                for e in &errors {
                    tracing::error!("config: {e}");
                }
                anyhow::bail!("refusing to start with {} config error(s)", errors.len());
            }

            let gateway = config.gateway();
            let port = port.unwrap_or(gateway.port);
            let bind = bind.unwrap_or(gateway.bind);

            let services = Services::from_config(&config)?;
            let state = Arc::new(GatewayState::new(config, services));
            tracing::info!(
                pool_size = state.pool.size(),
                pool_capacity = state.pool.capacity(),
                "Starting voicegate on {bind}:{port}"
            );
            voicegate_gateway::start_gateway(state, &bind, port).await?;
        }
        Commands::Config { action } => match action {
            ConfigAction::Show => {
                let json = serde_json::to_string_pretty(&config)?;
                println!("{json}");
            }
            ConfigAction::Check => {
                let (warnings, errors) = config.validate();
                println!("Config: {}", config_path.display());
                for w in &warnings {
                    println!("  warning: {w}");
                }
                for e in &errors {
                    println!("  error:   {e}");
                }
                if !errors.is_empty() {
                    anyhow::bail!("{} error(s) found", errors.len());
                }
                println!("OK ({} warning(s))", warnings.len());
            }
        },
        Commands::Status => {
            let gateway = config.gateway();
            println!("voicegate v{}", env!("CARGO_PKG_VERSION"));
            println!("Config: {}", config_path.display());
            println!("Listen: {}:{}{}", gateway.bind, gateway.port, gateway.path);

            let url = format!("http://127.0.0.1:{}/health", gateway.port);
            let client = reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(3))
                .build()?;
            match client.get(&url).send().await {
                Ok(resp) => {
                    let health: serde_json::Value = resp.json().await?;
                    println!("Status: {}", health["status"].as_str().unwrap_or("unknown"));
                    println!("Sessions: {}", health["sessions"]);
                    println!(
                        "Pool: {} running, {} admitted, capacity {}",
                        health["pool"]["running"],
                        health["pool"]["in_flight"],
                        health["pool"]["capacity"]
                    );
                }
                Err(_) => println!("Status: not running"),
            }
        }
    }

    Ok(())
}
