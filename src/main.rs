use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use swimnode::logging::init_logging;
use swimnode::{MembershipEvent, SwimConfig, SwimService};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// JSON configuration file
    #[arg(long)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a membership node until Ctrl-C
    Run {
        /// Identity of this node (defaults to the bind address)
        #[arg(long)]
        id: Option<String>,
        #[arg(long)]
        bind: Option<String>,
        /// Contact peer, as `ID` or `ID=ADDR`
        #[arg(long = "peer")]
        peers: Vec<String>,
    },
    /// Print the default configuration
    DefaultConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => SwimConfig::from_file(path)?,
        None => SwimConfig::default(),
    };

    match cli.command {
        Commands::DefaultConfig => {
            println!("{}", SwimConfig::default().to_json()?);
        }
        Commands::Run { id, bind, peers } => {
            if let Some(id) = id {
                config.node_id = Some(id);
            }
            if let Some(bind) = bind {
                config.bind_addr = bind.parse()?;
            }
            for peer in peers {
                add_peer(&mut config, &peer)?;
            }

            init_logging(&config.log_level);
            run(config).await?;
        }
    }

    Ok(())
}

fn add_peer(config: &mut SwimConfig, arg: &str) -> Result<()> {
    let id = match arg.split_once('=') {
        Some((id, addr)) => {
            if id.is_empty() {
                bail!("Invalid peer '{}': empty identity", arg);
            }
            config.address_book.insert(id.to_string(), addr.parse()?);
            id.to_string()
        }
        None => arg.to_string(),
    };

    if !config.contact_peers.contains(&id) {
        config.contact_peers.push(id);
    }
    Ok(())
}

async fn run(config: SwimConfig) -> Result<()> {
    let service = SwimService::bind(config).await?;
    log::info!("Listening on {}", service.local_addr()?);

    let mut handle = service.spawn();
    let mut events = handle.take_events();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            Some(event) = async {
                match events.as_mut() {
                    Some(rx) => rx.recv().await,
                    None => std::future::pending().await,
                }
            } => {
                match event {
                    MembershipEvent::MemberDead(status) => log::warn!("Member {} is now dead", status.owner),
                    other => log::debug!("Membership event: {:?}", other),
                }
            }
        }
    }

    handle.shutdown().await
}
