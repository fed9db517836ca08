use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use color_eyre::eyre::{bail, WrapErr};
use color_eyre::Result;
use env_logger::Env;
use log::{info, warn};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;

use monerosim_registry::config::{load_config, RegistryConfig};
use monerosim_registry::discovery::AgentDiscovery;
use monerosim_registry::public_node::{SelectionStrategy, StatusUpdater};
use monerosim_registry::registry::{AttributeValue, NodeStatus, Registration, RegistrationWriter};

/// Inspect and maintain the shared agent registry of a Monero simulation
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the registry settings YAML file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Shared state directory (overrides the settings file)
    #[arg(short, long)]
    shared_dir: Option<PathBuf>,

    /// Give up waiting for a writer lock after this many seconds
    #[arg(long)]
    lock_timeout: Option<f64>,

    /// Log filter when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Register or update an agent record
    Register {
        id: String,
        #[arg(long = "type")]
        agent_type: Option<String>,
        #[arg(long)]
        ip: Option<String>,
        #[arg(long)]
        p2p_port: Option<u16>,
        #[arg(long)]
        agent_rpc_port: Option<u16>,
        #[arg(long)]
        wallet_rpc_port: Option<u16>,
        #[arg(long)]
        wallet_address: Option<String>,
        #[arg(long)]
        hash_rate: Option<f64>,
        /// Attribute as KEY=VALUE, repeatable
        #[arg(long = "attr", value_parser = parse_key_val)]
        attributes: Vec<(String, String)>,
    },
    /// List agents, optionally filtered by type or attribute
    List {
        #[arg(long = "type")]
        agent_type: Option<String>,
        /// Attribute filter as KEY=VALUE
        #[arg(long = "attr", value_parser = parse_key_val)]
        attribute: Option<(String, String)>,
    },
    /// Show one agent by id
    Show { id: String },
    /// Miner agents with their RPC ports
    Miners,
    /// Wallet-bearing agents
    Wallets,
    /// Block controller agents
    BlockControllers,
    /// Wallet agents eligible for mining reward distributions
    Recipients,
    /// Registered public nodes
    PublicNodes {
        #[arg(long)]
        status: Option<NodeStatus>,
    },
    /// Select available public nodes
    Select {
        /// random, first or round_robin (default from settings)
        #[arg(long)]
        strategy: Option<String>,
        /// Agent ids never to select, repeatable
        #[arg(long)]
        exclude: Vec<String>,
        /// Number of consecutive selections
        #[arg(long, default_value_t = 1)]
        count: usize,
    },
    /// Set the status of a public node
    SetStatus { id: String, status: NodeStatus },
    /// Populate public_nodes.json from agents flagged is_public_node
    SeedPublicNodes,
    /// Registry summary
    Stats,
}

/// Parse a single KEY=VALUE pair
fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("invalid KEY=VALUE: no '=' found in '{}'", s))?;
    if key.is_empty() {
        return Err(format!("invalid KEY=VALUE: empty key in '{}'", s));
    }
    Ok((key.to_string(), value.to_string()))
}

/// Literal `true`/`false` query with tolerant coercion, anything else compared as text
fn query_value(raw: &str) -> AttributeValue {
    match raw {
        "true" => AttributeValue::Bool(true),
        "false" => AttributeValue::Bool(false),
        other => AttributeValue::from(other),
    }
}

fn rfc3339(unix_secs: f64) -> Option<String> {
    DateTime::<Utc>::from_timestamp(unix_secs.trunc() as i64, (unix_secs.fract() * 1e9) as u32)
        .map(|t| t.to_rfc3339())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value).wrap_err("Failed to render output")?);
    Ok(())
}

fn resolve_config(args: &Args) -> Result<RegistryConfig> {
    let mut config = match &args.config {
        Some(path) => load_config(path)
            .wrap_err_with(|| format!("Failed to load settings from '{}'", path.display()))?,
        None => RegistryConfig::default(),
    };
    if let Some(dir) = &args.shared_dir {
        config.shared_dir = dir.clone();
    }
    if let Some(secs) = args.lock_timeout {
        if !secs.is_finite() || secs < 0.0 {
            bail!("--lock-timeout must be a non-negative number of seconds");
        }
        config.lock.timeout = Some(Duration::from_secs_f64(secs));
    }
    config.validate().wrap_err("Invalid registry settings")?;
    Ok(config)
}

fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();

    env_logger::Builder::from_env(Env::default().default_filter_or(&args.log_level)).init();

    let config = resolve_config(&args)?;
    info!("Shared state directory: {:?}", config.shared_dir);

    run(args.command, &config)
}

fn run(command: Command, config: &RegistryConfig) -> Result<()> {
    let store = config
        .open_store()
        .wrap_err_with(|| format!("Failed to open shared directory '{}'", config.shared_dir.display()))?;
    let mut discovery = AgentDiscovery::from_store(&store, config.cache);

    match command {
        Command::Register {
            id,
            agent_type,
            ip,
            p2p_port,
            agent_rpc_port,
            wallet_rpc_port,
            wallet_address,
            hash_rate,
            attributes,
        } => {
            let mut registration = Registration::new(&id);
            if let Some(agent_type) = agent_type {
                registration = registration.agent_type(agent_type);
            }
            if let Some(ip) = ip {
                registration = registration.ip_addr(ip);
            }
            if let Some(port) = p2p_port {
                registration = registration.p2p_port(port);
            }
            if let Some(port) = agent_rpc_port {
                registration = registration.agent_rpc_port(port);
            }
            if let Some(port) = wallet_rpc_port {
                registration = registration.wallet_rpc_port(port);
            }
            if let Some(address) = wallet_address {
                registration = registration.wallet_address(address);
            }
            if let Some(rate) = hash_rate {
                registration = registration.hash_rate(rate);
            }
            for (key, value) in attributes {
                registration = registration.attribute(key, value);
            }

            let outcome = RegistrationWriter::new(store)
                .register(&registration)
                .wrap_err_with(|| format!("Failed to register agent '{}'", id))?;
            print_json(&serde_json::json!({ "id": id, "outcome": outcome.to_string() }))
        }
        Command::List { agent_type, attribute } => {
            let mut agents = match &agent_type {
                Some(agent_type) => discovery.find_by_type(agent_type, true)?,
                None => discovery.get_registry(true)?.agents.clone(),
            };
            if let Some((name, raw)) = attribute {
                let query = query_value(&raw);
                agents.retain(|a| a.attribute(&name).is_some_and(|v| v.matches(&query)));
            }
            print_json(&agents)
        }
        Command::Show { id } => match discovery.get_agent_by_id(&id, true)? {
            Some(agent) => print_json(&agent),
            None => bail!("Agent '{}' not found in {}", id, config.shared_dir.display()),
        },
        Command::Miners => print_json(&discovery.get_miners(true)?),
        Command::Wallets => print_json(&discovery.get_wallet_agents(true)?),
        Command::BlockControllers => print_json(&discovery.get_block_controllers(true)?),
        Command::Recipients => print_json(&discovery.get_distribution_recipients(true)?),
        Command::PublicNodes { status } => print_json(&discovery.get_public_nodes(status, true)?),
        Command::Select { strategy, exclude, count } => {
            let strategy = match strategy {
                Some(name) => SelectionStrategy::parse_lenient(&name),
                None => config.selection.strategy(),
            };
            let exclude: Vec<&str> = exclude.iter().map(String::as_str).collect();
            let mut selector = config.selection.selector();

            let mut picks = Vec::with_capacity(count);
            for _ in 0..count {
                match selector.select_public_node(&mut discovery, strategy, &exclude)? {
                    Some(address) => picks.push(address),
                    None => {
                        warn!("No public node available for selection");
                        break;
                    }
                }
            }
            print_json(&picks)
        }
        Command::SetStatus { id, status } => {
            let updated = StatusUpdater::new(store)
                .try_update(&id, status)
                .wrap_err_with(|| format!("Failed to update status of '{}'", id))?;
            if !updated {
                bail!("Public node '{}' not found", id);
            }
            print_json(&serde_json::json!({ "agent_id": id, "status": status }))
        }
        Command::SeedPublicNodes => {
            let agents = discovery.get_registry(true)?.agents.clone();
            let seeded = StatusUpdater::new(store)
                .seed_from_agents(&agents)
                .wrap_err("Failed to seed public nodes")?;
            print_json(&serde_json::json!({ "seeded": seeded }))
        }
        Command::Stats => {
            let stats = discovery.get_registry_stats(true)?;
            let mut value = serde_json::to_value(&stats).wrap_err("Failed to render stats")?;
            if let (Some(obj), Some(when)) = (value.as_object_mut(), rfc3339(stats.last_updated)) {
                obj.insert("last_updated_rfc3339".to_string(), serde_json::Value::String(when));
            }
            print_json(&value)
        }
    }
}
