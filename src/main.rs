//! dropletctl - fleet provisioning from the command line
//!
//! Thin operational wrapper around the `droplet_fleet` library: validate a
//! fleet configuration, inspect the account (droplets, images, regions,
//! sizes, SSH keys), run a provisioning round for a label, and destroy
//! droplets by id.
//!
//! ## Usage
//!
//! ```bash
//! # Validate a fleet config
//! dropletctl --config fleet.json validate
//!
//! # Inspect the account
//! dropletctl --config fleet.json list droplets
//! dropletctl --config fleet.json list sizes
//!
//! # Provision 4 executors' worth of agents for a label
//! dropletctl --config fleet.json provision --label linux --workload 4
//!
//! # Destroy a droplet
//! dropletctl --config fleet.json destroy 3164444
//! ```

use clap::{Parser, Subcommand};
use droplet_fleet::{
    DigitalOceanClient, DropletApi, FleetConfig, InMemoryRegistry, Label, PlannedInstance,
    ProvisioningController, TcpConnector,
};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "dropletctl")]
#[command(about = "Capacity-bounded DigitalOcean droplet fleet provisioning", long_about = None)]
struct Cli {
    /// Path to the fleet configuration (JSON)
    #[arg(long, global = true, default_value = "fleet.json")]
    config: String,

    /// API token override; falls back to the config, then DIGITALOCEAN_TOKEN
    #[arg(long, global = true)]
    token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate the fleet configuration and exit
    Validate,

    /// List account resources
    List {
        #[command(subcommand)]
        what: ListWhat,
    },

    /// Run one provisioning round and wait for the created agents
    Provision {
        /// Workload label to provision for; omit for label-less workloads
        #[arg(long)]
        label: Option<String>,

        /// Executors' worth of capacity to provision
        #[arg(long, default_value_t = 1)]
        workload: u32,
    },

    /// Destroy a droplet by id
    Destroy {
        /// Droplet id
        id: u64,
    },
}

#[derive(Subcommand)]
enum ListWhat {
    /// Droplets visible to the account
    Droplets,
    /// Images (distributions and snapshots)
    Images,
    /// Datacenter regions
    Regions,
    /// Droplet size classes
    Sizes,
    /// Registered SSH keys
    Keys,
}

fn load_config(cli: &Cli) -> anyhow::Result<FleetConfig> {
    let raw = std::fs::read_to_string(&cli.config)?;
    let mut fleet: FleetConfig = serde_json::from_str(&raw)?;
    if let Some(token) = &cli.token {
        fleet.auth_token = token.clone();
    } else if fleet.auth_token.is_empty() {
        if let Ok(token) = std::env::var("DIGITALOCEAN_TOKEN") {
            fleet.auth_token = token;
        }
    }
    Ok(fleet)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dropletctl=info,droplet_fleet=info,warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let fleet = load_config(&cli)?;

    match cli.command {
        Commands::Validate => {
            fleet.validate()?;
            println!(
                "fleet '{}' is valid ({} templates)",
                fleet.name,
                fleet.templates.len()
            );
            Ok(())
        }

        Commands::List { what } => {
            let api = DigitalOceanClient::new(&fleet.auth_token)?;
            handle_list(&api, what).await
        }

        Commands::Provision { label, workload } => {
            handle_provision(fleet, label.map(Label::new), workload).await
        }

        Commands::Destroy { id } => {
            let api = DigitalOceanClient::new(&fleet.auth_token)?;
            api.destroy_droplet(id).await?;
            info!("Droplet {} destruction initiated", id);
            Ok(())
        }
    }
}

async fn handle_list(api: &DigitalOceanClient, what: ListWhat) -> anyhow::Result<()> {
    match what {
        ListWhat::Droplets => {
            for d in api.list_droplets().await? {
                println!(
                    "{:>12}  {:?}  {}  {}",
                    d.id,
                    d.status,
                    d.public_ip().unwrap_or("-"),
                    d.name
                );
            }
        }
        ListWhat::Images => {
            for i in api.list_images().await? {
                println!("{:>16}  {}  ({})", i.identifier(), i.name, i.distribution);
            }
        }
        ListWhat::Regions => {
            for r in api.list_regions().await? {
                let marker = if r.available { " " } else { "!" };
                println!("{marker} {:<10} {}", r.slug, r.name);
            }
        }
        ListWhat::Sizes => {
            for s in api.list_sizes().await? {
                println!("{}", s.label());
            }
        }
        ListWhat::Keys => {
            for k in api.list_keys().await? {
                println!("{:>10}  {}  {}", k.id, k.fingerprint, k.name);
            }
        }
    }
    Ok(())
}

async fn handle_provision(
    fleet: FleetConfig,
    label: Option<Label>,
    workload: u32,
) -> anyhow::Result<()> {
    let api = Arc::new(DigitalOceanClient::new(&fleet.auth_token)?);
    let registry = Arc::new(InMemoryRegistry::new());
    let connector = Arc::new(TcpConnector::new(
        fleet.connect_timeout(),
        fleet.connection_retry_wait(),
    ));
    let controller = ProvisioningController::new(fleet, api, registry, connector)?;

    let planned = controller.provision(label.as_ref(), workload).await;
    if planned.is_empty() {
        warn!("Nothing provisioned: no eligible template under its cap");
        return Ok(());
    }

    let results =
        futures::future::join_all(planned.into_iter().map(PlannedInstance::resolve)).await;
    let mut failures = 0usize;
    for result in results {
        match result {
            Ok(Some(node)) => println!(
                "{}  droplet {}  {}",
                node.name,
                node.droplet_id,
                node.host.as_deref().unwrap_or("-")
            ),
            Ok(None) => info!("A planned instance was cancelled by the cap re-check"),
            Err(e) => {
                warn!("Provisioning failed: {}", e);
                failures += 1;
            }
        }
    }
    if failures > 0 {
        anyhow::bail!("{} of the planned instances failed", failures);
    }
    Ok(())
}
