//! System Index Manager - descriptor validation and dry-run reconciliation

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use system_index_manager::cluster::{
    ClusterStateProvider, ClusterStateSnapshot, InMemoryCluster, MutationRecord,
};
use system_index_manager::config::{load_registry, ManagerConfig};
use system_index_manager::controller::{PassReport, SystemIndexManager};
use system_index_manager::descriptor::DescriptorRegistry;
use system_index_manager::evaluator::{assess, Assessment};
use system_index_manager::retry::RetryPolicy;

/// System Index Manager - keeps managed index schemas in line with their descriptors
#[derive(Parser, Debug)]
#[command(name = "system-index-manager", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate a descriptor file
    ///
    /// Fails on malformed descriptors or overlapping index patterns, exactly
    /// as the manager would at startup.
    Validate {
        /// Path to the descriptor file (YAML or JSON)
        #[arg(short = 'f', long = "descriptors", env = "SYSTEM_INDEX_DESCRIPTORS")]
        descriptors: PathBuf,
    },

    /// Print the assessment of every descriptor against a cluster state
    Plan(StateArgs),

    /// Run a reconciliation pass against an in-memory copy of a cluster state
    ///
    /// Applies the resulting updates to the copy, waits for them to settle
    /// and prints the mutations and the resulting state.
    Simulate {
        #[command(flatten)]
        state: StateArgs,

        /// Timeout for each admin API call in seconds
        #[arg(long, env = "SYSTEM_INDEX_MUTATION_TIMEOUT_SECS", default_value = "30")]
        mutation_timeout_secs: u64,

        /// Attempts per admin API call, including the first
        #[arg(long, env = "SYSTEM_INDEX_MUTATION_ATTEMPTS", default_value = "1")]
        max_attempts: u32,

        /// Timeout for the whole simulation in seconds
        #[arg(long, default_value = "60")]
        timeout_secs: u64,
    },
}

/// Descriptor file and cluster state arguments
#[derive(clap::Args, Debug)]
struct StateArgs {
    /// Path to the descriptor file (YAML or JSON)
    #[arg(short = 'f', long = "descriptors", env = "SYSTEM_INDEX_DESCRIPTORS")]
    descriptors: PathBuf,

    /// Path to a cluster state snapshot (JSON)
    #[arg(short = 's', long = "state")]
    state: PathBuf,
}

#[derive(Serialize)]
struct SimulationReport {
    first_pass: PassReport,
    mutations: Vec<MutationRecord>,
    final_pass: PassReport,
    final_state: ClusterStateSnapshot,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Validate { descriptors } => run_validate(&descriptors),
        Commands::Plan(args) => run_plan(&args).await,
        Commands::Simulate {
            state,
            mutation_timeout_secs,
            max_attempts,
            timeout_secs,
        } => {
            let config = ManagerConfig {
                mutation_timeout: Duration::from_secs(mutation_timeout_secs),
                retry: RetryPolicy::with_max_attempts(max_attempts),
                ..Default::default()
            };
            run_simulate(&state, config, Duration::from_secs(timeout_secs)).await
        }
    }
}

fn load_descriptors(path: &Path) -> anyhow::Result<DescriptorRegistry> {
    load_registry(path).map_err(|e| anyhow::anyhow!("Invalid descriptor file {:?}: {}", path, e))
}

async fn load_state(path: &Path) -> anyhow::Result<ClusterStateSnapshot> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to read cluster state {:?}: {}", path, e))?;
    serde_json::from_str(&content)
        .map_err(|e| anyhow::anyhow!("Failed to parse cluster state {:?}: {}", path, e))
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| anyhow::anyhow!("Failed to serialize output: {}", e))?;
    println!("{json}");
    Ok(())
}

fn run_validate(path: &Path) -> anyhow::Result<()> {
    let registry = load_descriptors(path)?;
    for descriptor in registry.all() {
        println!(
            "{}\tprimary={}\tversion={}\tsettings={}",
            descriptor.index_pattern(),
            descriptor.primary_index(),
            descriptor.mappings_version(),
            descriptor.settings().len()
        );
    }
    println!("{} descriptor(s) valid", registry.len());
    Ok(())
}

async fn run_plan(args: &StateArgs) -> anyhow::Result<()> {
    let registry = load_descriptors(&args.descriptors)?;
    let state = load_state(&args.state).await?;

    let assessments: Vec<Assessment> = registry
        .all()
        .iter()
        .map(|descriptor| assess(descriptor.as_ref(), &state))
        .collect();
    print_json(&assessments)
}

async fn run_simulate(
    args: &StateArgs,
    config: ManagerConfig,
    timeout: Duration,
) -> anyhow::Result<()> {
    let registry = Arc::new(load_descriptors(&args.descriptors)?);
    let cluster = Arc::new(InMemoryCluster::new(load_state(&args.state).await?));
    let manager = SystemIndexManager::new(registry, cluster.clone(), cluster.clone(), config);

    let first_pass = manager.on_cluster_state_changed();
    tokio::time::timeout(timeout, manager.wait_idle())
        .await
        .map_err(|_| anyhow::anyhow!("Updates did not settle within {:?}", timeout))?;
    let final_pass = manager.on_cluster_state_changed();
    tokio::time::timeout(timeout, manager.wait_idle())
        .await
        .map_err(|_| anyhow::anyhow!("Updates did not settle within {:?}", timeout))?;

    tracing::info!(
        mutations = cluster.mutations().len(),
        "Simulation complete"
    );

    print_json(&SimulationReport {
        first_pass,
        mutations: cluster.mutations(),
        final_pass,
        final_state: ClusterStateSnapshot::clone(&cluster.snapshot()),
    })
}
