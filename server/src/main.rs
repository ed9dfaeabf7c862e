use clap::Parser;
use log::info;
use server::network::Server;
use shared::config::GameConfig;
use shared::DEFAULT_PORT;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Server IP address to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,
    /// Server port to listen on
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,
    /// Simulation ticks per second
    #[arg(short, long, default_value_t = 30)]
    tick_rate: u32,
    /// Maximum number of connected clients
    #[arg(short, long, default_value_t = 16)]
    max_clients: usize,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let args = Args::parse();
    let config = Arc::new(GameConfig::default().with_tick_rate(args.tick_rate));
    let address = format!("{}:{}", args.host, args.port);

    info!(
        "Starting server on {} ({} Hz, up to {} clients)",
        address, config.tick_rate, args.max_clients
    );
    let mut server = Server::new(&address, config, args.max_clients).await?;

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
