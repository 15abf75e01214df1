use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use cas_measure::PrometheusMetrics;
use cas_meter::commands::{disk_space, import, num_keys, write_metrics, ImportConfig};
use cas_meter::config::{StoreArgs, StoreConfig, Stores, StoresConfig};
use cas_meter::server::{run_server, Listen};

#[derive(Parser)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Parser, Debug)]
pub struct ServerConfig {
    #[arg(long, default_value = "localhost")]
    host: String,

    #[arg(long, default_value = "8014")]
    port: u16,

    #[arg(long, default_value = "localhost")]
    metric_host: String,

    #[arg(long, default_value = "9100")]
    metric_port: u16,

    #[arg(
        long,
        help = "TOML file describing the served stores; without it a single store is built from the flags below"
    )]
    stores_config: Option<PathBuf>,

    #[arg(long, default_value = "blocks", help = "Store name used in request paths")]
    store_name: String,

    #[command(flatten)]
    store: StoreArgs,

    #[arg(
        long,
        default_value = "info",
        help = "Log level (error, warn, info, debug, trace). Can also be set via RUST_LOG env var"
    )]
    log_level: String,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Inspect a fjall block store
    Inspect {
        #[arg(long, default_value = ".")]
        data_root: PathBuf,

        #[command(subcommand)]
        command: InspectCommand,
    },

    /// Store files as blocks and print the recorded metrics
    Import(ImportConfig),

    /// Start the block server
    Server(ServerConfig),
}

#[derive(Debug, Subcommand)]
pub enum InspectCommand {
    // number of keys
    NumKeys,
    DiskSpace,
}

fn setup_tracing(log_level: &str) {
    // Try to use RUST_LOG env var first, fall back to CLI flag
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .unwrap_or_else(|_| {
            eprintln!("Invalid log level '{}', falling back to 'info'", log_level);
            EnvFilter::new("info")
        });

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let cli = Cli::parse();

    let log_level = match &cli.command {
        Command::Server(config) => config.log_level.as_str(),
        _ => "info",
    };

    setup_tracing(log_level);

    let metrics = PrometheusMetrics::global();

    match cli.command {
        Command::Inspect { command, data_root } => match command {
            InspectCommand::NumKeys => {
                let num_keys = num_keys(data_root, &metrics)?;
                println!("Number of keys: {num_keys}");
            }
            InspectCommand::DiskSpace => {
                let disk_space = disk_space(data_root)?;
                println!("Disk space: {disk_space}");
            }
        },
        Command::Import(config) => {
            for block in import(config, &metrics)? {
                println!("{} {}", block.cid(), block.len());
            }
            write_metrics(&mut std::io::stdout().lock())?;
        }
        Command::Server(config) => {
            run(config)?;
        }
    }
    Ok(())
}

#[tokio::main]
async fn run(args: ServerConfig) -> anyhow::Result<()> {
    let metrics = PrometheusMetrics::global();

    let stores = match &args.stores_config {
        Some(path) => {
            info!("Loading stores from {}", path.display());
            StoresConfig::load_from_file(path)?.open(&metrics)?
        }
        None => {
            let store = StoreConfig::from(&args.store).open(&args.store_name, &metrics)?;
            Stores::single(&args.store_name, store)
        }
    };

    let listen = Listen {
        host: args.host,
        port: args.port,
        metric_host: args.metric_host,
        metric_port: args.metric_port,
    };
    run_server(listen, stores).await
}
