//! ShoalDB server binary.
//!
//! Opens the engine and serves it over TCP.

use std::path::PathBuf;

use shoal_core::config::EngineConfig;
use shoal_core::Engine;
use shoal_server::protocol::DEFAULT_ADDR;
use shoal_server::ShoalServer;
use tracing::info;

struct Args {
    addr: String,
    data_dir: PathBuf,
    shard_capacity: Option<usize>,
}

fn parse_args() -> Args {
    let args: Vec<String> = std::env::args().collect();
    let mut addr = DEFAULT_ADDR.to_string();
    let mut data_dir = PathBuf::from("shoal-data");
    let mut shard_capacity = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--addr" => {
                i += 1;
                addr = args[i].clone();
            }
            "--data-dir" => {
                i += 1;
                data_dir = PathBuf::from(&args[i]);
            }
            "--shard-capacity" => {
                i += 1;
                shard_capacity = match args[i].parse() {
                    Ok(n) => Some(n),
                    Err(_) => {
                        eprintln!("invalid --shard-capacity: {}", args[i]);
                        std::process::exit(1);
                    }
                };
            }
            other => {
                eprintln!("unknown argument: {other}");
                eprintln!("usage: shoal-server [--addr HOST:PORT] [--data-dir PATH] [--shard-capacity N]");
                std::process::exit(1);
            }
        }
        i += 1;
    }

    Args {
        addr,
        data_dir,
        shard_capacity,
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = parse_args();

    let mut config = EngineConfig::at(&args.data_dir);
    if let Some(capacity) = args.shard_capacity {
        config.shard_capacity = capacity;
    }

    info!(addr = %args.addr, data_dir = %args.data_dir.display(), "starting");

    let engine = Engine::open(config)?;
    let server = ShoalServer::bind(engine, args.addr.as_str()).await?;
    server.run().await?;

    Ok(())
}
