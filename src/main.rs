//! solo CLI - deploy and manage Hedera networks on Kubernetes

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{Shell, generate};
use solo::commands::deployment::DeploymentCreateOptions;
use solo::commands::explorer::{ExplorerDeployOptions, ExplorerDestroyOptions};
use solo::commands::network::{NetworkDeployOptions, NetworkDestroyOptions, NetworkRefreshOptions};
use solo::commands::{CommandEnv, KubeConnector};
use solo::config::{LocalConfig, Settings};
use solo::helm::HelmCli;
use solo::utils::errors::display_error_and_exit;
use solo::utils::{CommonPrereqs, Prerequisite, logger};
use solo::{log_error, log_info, log_warn};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "solo")]
#[command(author, version, about = "Deploy and manage Hedera networks on Kubernetes", long_about = None)]
struct Cli {
    /// Verbose output (can be used multiple times: -v, -vv, -vvv)
    /// -v: INFO, -vv: DEBUG, -vvv: TRACE
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Path to the solo settings file (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Path to the local deployment config (YAML)
    #[arg(long, global = true)]
    local_config: Option<PathBuf>,

    /// Path to kubeconfig file
    #[arg(long, global = true, env = "KUBECONFIG")]
    kubeconfig: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage the consensus network of a deployment
    Network {
        #[command(subcommand)]
        command: NetworkCommands,
    },

    /// Manage the mirror node explorer
    Explorer {
        #[command(subcommand)]
        command: ExplorerCommands,
    },

    /// Manage deployments
    Deployment {
        #[command(subcommand)]
        command: DeploymentCommands,
    },

    /// Inspect solo settings
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },

    /// Check prerequisites
    Check,

    /// Generate shell completion scripts
    Completion {
        /// Shell type
        #[arg(value_enum)]
        shell: Shell,
    },

    /// Show version information
    Version,
}

#[derive(Subcommand)]
enum NetworkCommands {
    /// Install the network chart and record its components
    Deploy {
        /// Deployment name (defaults to the current deployment)
        #[arg(short, long)]
        deployment: Option<String>,

        /// Consensus node aliases (comma-separated)
        #[arg(short = 'i', long, value_delimiter = ',', required = true)]
        node_aliases: Vec<String>,

        /// Extra helm arguments, e.g. "--set a=b --values file.yaml"
        #[arg(long, default_value = "")]
        values: String,

        /// Chart version to install instead of the configured one
        #[arg(long)]
        chart_version: Option<String>,
    },

    /// Uninstall the network
    Destroy {
        /// Deployment name (defaults to the current deployment)
        #[arg(short, long)]
        deployment: Option<String>,

        /// Delete the namespace if the teardown times out
        #[arg(long)]
        force: bool,

        /// Delete persistent volume claims
        #[arg(long)]
        delete_pvcs: bool,

        /// Delete secrets
        #[arg(long)]
        delete_secrets: bool,

        /// Teardown deadline in seconds (defaults to timeouts.destroy_secs)
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Upgrade the network chart, reusing the values of the last release
    Refresh {
        /// Deployment name (defaults to the current deployment)
        #[arg(short, long)]
        deployment: Option<String>,

        /// Consensus nodes to refresh (comma-separated, default: all)
        #[arg(short = 'i', long, value_delimiter = ',')]
        node_aliases: Vec<String>,

        /// Extra helm arguments
        #[arg(long, default_value = "")]
        values: String,
    },
}

#[derive(Subcommand)]
enum ExplorerCommands {
    /// Install the mirror node explorer
    Deploy {
        /// Deployment name (defaults to the current deployment)
        #[arg(short, long)]
        deployment: Option<String>,

        /// Cluster reference to install on (default: the deployment's first cluster)
        #[arg(long)]
        cluster_ref: Option<String>,

        /// Extra helm arguments
        #[arg(long, default_value = "")]
        values: String,
    },

    /// Uninstall the mirror node explorer
    Destroy {
        /// Deployment name (defaults to the current deployment)
        #[arg(short, long)]
        deployment: Option<String>,

        /// Cluster reference the explorer runs on
        #[arg(long)]
        cluster_ref: Option<String>,
    },
}

#[derive(Subcommand)]
enum DeploymentCommands {
    /// Create the remote config of a deployment declared in the local config
    Create {
        /// Deployment name (defaults to the current deployment)
        #[arg(short, long)]
        deployment: Option<String>,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print an example settings file
    Example,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logger::init(cli.verbose);

    if let Err(err) = run(cli).await {
        display_error_and_exit(err);
    }
}

async fn run(cli: Cli) -> Result<()> {
    match &cli.command {
        Commands::Network { command } => handle_network_command(&cli, command).await,
        Commands::Explorer { command } => handle_explorer_command(&cli, command).await,
        Commands::Deployment { command } => handle_deployment_command(&cli, command).await,
        Commands::Config { command } => handle_config_command(command),
        Commands::Check => handle_check_command(),
        Commands::Completion { shell } => handle_completion_command(*shell),
        Commands::Version => handle_version_command(),
    }
}

/// Load settings and the local config, and wire up the real clients
fn command_env(cli: &Cli) -> Result<CommandEnv> {
    let settings = Settings::load(cli.config.as_deref())?;

    let local_path = settings.local_config_path(cli.local_config.as_deref());
    let local_config = LocalConfig::load(&local_path)
        .with_context(|| format!("Failed to read local config {}", local_path.display()))?;

    let kubeconfig = cli.kubeconfig.clone().or_else(|| {
        settings
            .defaults
            .kubeconfig_path
            .as_ref()
            .map(PathBuf::from)
    });

    Ok(CommandEnv {
        settings,
        local_config,
        helm: Arc::new(HelmCli::new(kubeconfig.clone())),
        connector: Arc::new(KubeConnector::new(kubeconfig)),
    })
}

/// Explicit flag > current deployment in the local config > settings default
fn resolve_deployment(flag: &Option<String>, env: &CommandEnv) -> String {
    flag.clone()
        .or_else(|| {
            env.local_config
                .as_ref()
                .and_then(|local| local.current_deployment_name.clone())
        })
        .unwrap_or_else(|| env.settings.defaults.deployment.clone())
}

async fn handle_network_command(cli: &Cli, command: &NetworkCommands) -> Result<()> {
    let env = command_env(cli)?;

    match command {
        NetworkCommands::Deploy {
            deployment,
            node_aliases,
            values,
            chart_version,
        } => {
            solo::commands::network::deploy(
                &env,
                NetworkDeployOptions {
                    deployment: resolve_deployment(deployment, &env),
                    node_aliases: node_aliases.clone(),
                    values: values.clone(),
                    chart_version: chart_version.clone(),
                },
            )
            .await?;
            Ok(())
        }
        NetworkCommands::Destroy {
            deployment,
            force,
            delete_pvcs,
            delete_secrets,
            timeout,
        } => {
            let outcome = solo::commands::network::destroy(
                &env,
                NetworkDestroyOptions {
                    deployment: resolve_deployment(deployment, &env),
                    force: *force,
                    delete_pvcs: *delete_pvcs,
                    delete_secrets: *delete_secrets,
                    timeout: timeout.map(Duration::from_secs),
                },
            )
            .await?;

            if outcome.success {
                log_info!("Network destroyed");
            } else {
                log_warn!("Network destroy timed out; check the namespace before redeploying");
            }
            Ok(())
        }
        NetworkCommands::Refresh {
            deployment,
            node_aliases,
            values,
        } => {
            solo::commands::network::refresh(
                &env,
                NetworkRefreshOptions {
                    deployment: resolve_deployment(deployment, &env),
                    node_aliases: node_aliases.clone(),
                    values: values.clone(),
                },
            )
            .await?;
            log_info!("Network refreshed");
            Ok(())
        }
    }
}

async fn handle_explorer_command(cli: &Cli, command: &ExplorerCommands) -> Result<()> {
    let env = command_env(cli)?;

    match command {
        ExplorerCommands::Deploy {
            deployment,
            cluster_ref,
            values,
        } => {
            solo::commands::explorer::deploy(
                &env,
                ExplorerDeployOptions {
                    deployment: resolve_deployment(deployment, &env),
                    cluster_ref: cluster_ref.clone(),
                    values: values.clone(),
                },
            )
            .await?;
            Ok(())
        }
        ExplorerCommands::Destroy {
            deployment,
            cluster_ref,
        } => {
            solo::commands::explorer::destroy(
                &env,
                ExplorerDestroyOptions {
                    deployment: resolve_deployment(deployment, &env),
                    cluster_ref: cluster_ref.clone(),
                },
            )
            .await?;
            log_info!("Explorer destroyed");
            Ok(())
        }
    }
}

async fn handle_deployment_command(cli: &Cli, command: &DeploymentCommands) -> Result<()> {
    let env = command_env(cli)?;

    match command {
        DeploymentCommands::Create { deployment } => {
            solo::commands::deployment::create(
                &env,
                DeploymentCreateOptions {
                    deployment: resolve_deployment(deployment, &env),
                },
            )
            .await?;
            Ok(())
        }
    }
}

fn handle_config_command(command: &ConfigCommands) -> Result<()> {
    match command {
        ConfigCommands::Example => {
            print!("{}", Settings::example_config()?);
            Ok(())
        }
    }
}

fn handle_check_command() -> Result<()> {
    log_info!("Checking prerequisites...");

    let helm = CommonPrereqs::helm();
    let kubectl = CommonPrereqs::kubectl();
    let prereqs: Vec<&dyn Prerequisite> = vec![&helm, &kubectl];

    let (found, missing) = CommonPrereqs::check_all(&prereqs);
    for name in &found {
        println!("  ✓ {}", name);
    }
    if missing.is_empty() {
        log_info!("All prerequisites satisfied");
        return Ok(());
    }

    for (name, hint) in &missing {
        log_error!("Missing {}: {}", name, hint);
        println!("  ✗ {} ({})", name, hint);
    }
    std::process::exit(1);
}

fn handle_completion_command(shell: Shell) -> Result<()> {
    let mut cmd = Cli::command();
    generate(shell, &mut cmd, "solo", &mut io::stdout());
    Ok(())
}

fn handle_version_command() -> Result<()> {
    println!("solo {}", env!("CARGO_PKG_VERSION"));
    println!("Deploy and manage Hedera networks on Kubernetes");
    Ok(())
}
