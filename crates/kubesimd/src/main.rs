//! kubesimd — the kubesim daemon.
//!
//! Single binary that assembles the control plane:
//! - Cluster state + scheduler
//! - In-process node agents
//! - Health monitor
//! - Autoscaler (optional)
//! - REST API
//!
//! # Usage
//!
//! ```text
//! kubesimd run --config kubesim.toml --algorithm best-fit --nodes 3
//! kubesimd config --config kubesim.toml
//! ```

mod control_plane;

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use kubesim_core::{KubesimConfig, SchedulingAlgorithm};

#[derive(Parser)]
#[command(name = "kubesimd", about = "kubesim cluster orchestrator daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(clap::Args)]
struct ConfigArgs {
    /// Path to kubesim.toml. Defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Address the REST API listens on.
    #[arg(long)]
    bind: Option<String>,

    /// Placement heuristic: first-fit, best-fit or worst-fit.
    #[arg(long)]
    algorithm: Option<SchedulingAlgorithm>,

    /// Enable the autoscaler.
    #[arg(long)]
    auto_scale: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Run the control plane: state, agents, health monitor, autoscaler and API.
    Run {
        #[command(flatten)]
        config: ConfigArgs,

        /// Nodes of default capacity to create at startup.
        #[arg(long, default_value = "0")]
        nodes: u32,

        #[arg(long, value_enum, default_value = "text")]
        log_format: LogFormat,
    },
    /// Print the effective configuration as TOML and exit.
    Config {
        #[command(flatten)]
        config: ConfigArgs,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            config,
            nodes,
            log_format,
        } => {
            init_tracing(log_format);
            let config = load_config(&config)?;
            control_plane::run_control_plane(config, nodes).await
        }
        Command::Config { config } => {
            let config = load_config(&config)?;
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
    }
}

const DEFAULT_LOG_FILTER: &str = "info,kubesimd=debug,kubesim_state=debug,kubesim_placement=debug,\
kubesim_health=debug,kubesim_autoscale=debug,kubesim_cluster=debug,kubesim_api=debug";

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

/// File, then `KUBESIM_*` environment, then command-line flags.
fn load_config(args: &ConfigArgs) -> anyhow::Result<KubesimConfig> {
    let mut config = match &args.config {
        Some(path) => KubesimConfig::from_file(path)?,
        None => KubesimConfig::default(),
    };
    config.apply_env()?;

    if let Some(bind) = &args.bind {
        config.api.bind = bind.clone();
    }
    if let Some(algorithm) = args.algorithm {
        config.scheduler.algorithm = algorithm;
    }
    if args.auto_scale {
        config.autoscale.enabled = true;
    }

    config.validate()?;
    Ok(config)
}
