use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use forge_node::config::NodeConfig;
use forge_node::logging;
use forge_node::node::ForgeNode;
use std::path::{Path, PathBuf};
use tracing::info;

const DEFAULT_CONFIG: &str = "./forge-config.toml";

#[derive(Parser)]
#[command(name = "forge")]
#[command(about = "ProjectForge escrow node", long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Verbosity level (can be repeated)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the transaction monitor and snapshot loop until Ctrl-C
    Start {
        /// Data directory for snapshots
        #[arg(short, long)]
        data_dir: Option<PathBuf>,

        /// JSON-RPC endpoint of the wallet provider
        #[arg(long)]
        rpc_url: Option<String>,

        /// Use an in-process simulated chain
        #[arg(long)]
        simulate: bool,
    },

    /// Write a default configuration file
    Init {
        /// Output directory for configuration
        #[arg(short, long, default_value = ".")]
        output: PathBuf,

        /// Configure for the simulated chain
        #[arg(long)]
        simulate: bool,
    },

    /// Print record counts and pending contributions
    Status {
        #[arg(long)]
        simulate: bool,
    },

    /// Resolve stuck pending contributions from their receipts
    Reconcile {
        /// Only touch contributions pending for at least this long
        #[arg(long, default_value = "900")]
        min_age_secs: i64,

        #[arg(long)]
        simulate: bool,
    },
}

/// Config file (explicit, then `./forge-config.toml`), then environment
fn load_config(path: Option<&Path>) -> Result<NodeConfig> {
    let mut config = match path {
        Some(path) => NodeConfig::from_file(path)
            .with_context(|| format!("reading config {:?}", path))?,
        None if Path::new(DEFAULT_CONFIG).exists() => {
            NodeConfig::from_file(Path::new(DEFAULT_CONFIG))?
        }
        None => NodeConfig::default(),
    };
    config.apply_env_overrides();
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = load_config(cli.config.as_deref())?;

    if let Err(e) = logging::init_logging(&config.logging, cli.verbose) {
        eprintln!("Failed to initialize logging: {}", e);
    }

    match cli.command {
        Commands::Start {
            data_dir,
            rpc_url,
            simulate,
        } => {
            // CLI flags beat env and file
            if let Some(data_dir) = data_dir {
                config.node.data_dir = data_dir;
            }
            if let Some(rpc_url) = rpc_url {
                config.chain.rpc_url = rpc_url;
            }
            if simulate {
                config.chain.simulate = true;
            }

            if cli.verbose == 0 && std::env::var("RUST_LOG").is_err() {
                logging::display_boot_banner(env!("CARGO_PKG_VERSION"));
            }
            info!(
                version = env!("CARGO_PKG_VERSION"),
                data_dir = ?config.node.data_dir,
                rpc_url = %config.chain.rpc_url,
                simulate = config.chain.simulate,
                "🧬 Starting escrow node"
            );

            let node = ForgeNode::new(config).await?;
            node.run(async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::error!(error = %e, "Failed to listen for Ctrl-C");
                }
            })
            .await
        }

        Commands::Init { output, simulate } => {
            std::fs::create_dir_all(&output)?;
            let mut config = NodeConfig::default();
            config.chain.simulate = simulate;

            let path = output.join("forge-config.toml");
            config.save_to_file(&path)?;
            info!(path = ?path, "✨ Configuration written");
            Ok(())
        }

        Commands::Status { simulate } => {
            config.chain.simulate |= simulate;
            let node = ForgeNode::new(config).await?;
            let status = node.status().await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
            Ok(())
        }

        Commands::Reconcile {
            min_age_secs,
            simulate,
        } => {
            config.chain.simulate |= simulate;
            let node = ForgeNode::new(config).await?;
            let report = node
                .reconcile(chrono::Duration::seconds(min_age_secs))
                .await?;
            node.save_snapshot().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
    }
}
