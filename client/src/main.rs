use clap::Parser;
use client::network::Client;
use log::info;
use shared::SessionConfig;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:8080")]
    server: String,

    /// Simulate network latency in milliseconds
    #[arg(short = 'l', long, default_value = "0")]
    fake_ping: u64,

    /// JSON session config; must match the server's
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Seed for the bot and the local spawn geometry
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

    let config = match &args.config {
        Some(path) => SessionConfig::load(path)?,
        None => SessionConfig::default(),
    };
    let seed = args.seed.unwrap_or_else(rand::random);

    info!("Starting client...");
    info!("Connecting to: {}", args.server);
    if args.fake_ping > 0 {
        info!("Simulating {}ms latency", args.fake_ping);
    }

    let mut client = Client::new(&args.server, config, seed, args.load_time, args.fake_ping).await?;
    client.run().await?;

    Ok(())
}
