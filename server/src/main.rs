use clap::Parser;
use log::{info, warn};
use server::network::{Server, ServerMessage};
use shared::collaborators::LogPresentation;
use shared::{Collaborators, SessionConfig};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to bind the server socket to
    #[arg(short = 'b', long, default_value = "127.0.0.1:8080")]
    bind: String,

    /// Simulation ticks per second; overrides the config file
    #[arg(short = 't', long)]
    tick_rate: Option<u32>,

    /// Maximum number of connected proxies
    #[arg(short = 'm', long, default_value = "7")]
    max_clients: usize,

    /// JSON session config
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// RNG seed for level picks, buffs and spawn points
    #[arg(long)]
    seed: Option<u64>,

    /// Simulated scene load time in seconds
    #[arg(long, default_value = "0.5")]
    load_time: f32,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => SessionConfig::load(path)?,
        None => SessionConfig::default(),
    };
    if let Some(tick_rate) = args.tick_rate {
        config.tick_rate = tick_rate;
    }
    if args.seed.is_some() {
        config.seed = args.seed;
    }
    config.validate()?;

    let spawn_seed = config.seed.unwrap_or_else(rand::random);
    info!("Starting server...");
    info!("Tick rate: {} Hz, max clients: {}", config.tick_rate, args.max_clients);

    let collaborators = Collaborators::headless(
        spawn_seed,
        args.load_time,
        Box::new(LogPresentation::new("host")),
    );
    let mut server = Server::new(&args.bind, config, collaborators, args.max_clients).await?;
    let shutdown = server.shutdown_handle();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, shutting down gracefully...");
            if shutdown.send(ServerMessage::Shutdown).is_err() {
                warn!("Server loop already stopped");
            }
        }
    });

    server.run().await?;
    Ok(())
}
