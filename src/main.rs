//! clusterboot - Bootstrap a kubeadm cluster over SSH
//!
//! Focused on:
//! - Ordered, fail-fast bootstrap steps
//! - Parallel per-host work with isolated failures
//! - Templated addon manifests

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use clusterboot::addons::build_addons_manifest;
use clusterboot::config::{ClusterConfig, load_cluster_config};
use clusterboot::state::DEFAULT_WORK_DIR;
use clusterboot::transport::OfflineConnector;
use clusterboot::transport::openssh::OpenSshConnector;
use clusterboot::{State, Step, generate, run_steps};

#[derive(Parser)]
#[command(name = "clusterboot")]
#[command(author, version, about = "Bootstrap a kubeadm Kubernetes cluster over SSH", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Bootstrap the cluster (runs all steps)
    Install {
        /// Cluster configuration file
        #[arg(env = "CLUSTERBOOT_CONFIG")]
        config: PathBuf,

        /// Remote working directory, relative to the SSH user's home
        #[arg(long, env = "CLUSTERBOOT_WORK_DIR", default_value = DEFAULT_WORK_DIR)]
        work_dir: String,

        /// SSH connect timeout in seconds
        #[arg(long, default_value_t = 30)]
        connect_timeout: u64,

        /// Run only the named steps, in bootstrap order
        #[arg(long = "step", value_name = "STEP")]
        steps: Vec<String>,
    },
    /// Write every generated file to a local directory
    Generate {
        #[arg(env = "CLUSTERBOOT_CONFIG")]
        config: PathBuf,

        /// Output directory
        #[arg(short, long, default_value = "clusterboot-out")]
        output: PathBuf,
    },
    /// Print the combined addons manifest
    RenderAddons {
        #[arg(env = "CLUSTERBOOT_CONFIG")]
        config: PathBuf,
    },
    /// List the bootstrap steps
    Steps,
}

fn init_logging(verbosity: u8) -> Result<()> {
    let level = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    // RUST_LOG wins over -v
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("clusterboot={}", level)));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")
}

async fn load(path: &Path) -> Result<ClusterConfig> {
    load_cluster_config(path)
        .await
        .with_context(|| format!("Failed to load cluster config {}", path.display()))
}

fn select_steps(names: &[String]) -> Result<Vec<Step>> {
    if names.is_empty() {
        return Ok(Step::ALL.to_vec());
    }
    for name in names {
        if !Step::ALL.iter().any(|s| s.as_str() == name) {
            anyhow::bail!("Unknown step '{}'", name);
        }
    }
    Ok(Step::ALL
        .into_iter()
        .filter(|s| names.iter().any(|n| n == s.as_str()))
        .collect())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose)?;
    let verbose = cli.verbose > 0;

    match cli.command {
        Commands::Install {
            config,
            work_dir,
            connect_timeout,
            steps,
        } => {
            let steps = select_steps(&steps)?;
            let cluster = load(&config).await?;
            let connector = OpenSshConnector::new().with_connect_timeout(connect_timeout);
            let mut state = State::new(cluster, Arc::new(connector))
                .with_work_dir(work_dir)
                .with_verbose(verbose);

            run_steps(&mut state, &steps).await?;

            if let Some(join) = &state.join_command {
                info!("Join additional nodes with:");
                println!("{}", join);
            }
        }
        Commands::Generate { config, output } => {
            let cluster = load(&config).await?;
            let mut state =
                State::new(cluster, Arc::new(OfflineConnector)).with_verbose(verbose);
            generate(&mut state, &output).await?;
        }
        Commands::RenderAddons { config } => {
            let cluster = load(&config).await?;
            let manifest = build_addons_manifest(&cluster, verbose).await?;
            print!("{}", manifest);
        }
        Commands::Steps => {
            for (i, step) in Step::ALL.iter().enumerate() {
                println!("{:>2}. {}", i + 1, step);
            }
        }
    }

    Ok(())
}
