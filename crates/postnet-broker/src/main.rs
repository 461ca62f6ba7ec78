use clap::Parser;
use postnet_broker::BrokerConfig;

/// Deterministic input-sync broker: orders posts, persists them per room,
/// and fans them out to watchers.
#[derive(Parser, Debug)]
#[command(name = "postnet-broker", version, about)]
struct Args {
    /// Address to bind to.
    #[arg(long, default_value = "0.0.0.0")]
    bind: String,

    /// Port to listen on.
    #[arg(long, default_value_t = 8080)]
    port: u16,

    /// Directory holding each room's `.dat`/`.idx` pair.
    #[arg(long, default_value = "db")]
    db_dir: std::path::PathBuf,

    /// Informational only: the broker runs no game logic and never ticks,
    /// but accepts this for parity with engines that expect it echoed.
    #[arg(long)]
    tick_rate: Option<u32>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();
    if let Some(rate) = args.tick_rate {
        log::info!("tick-rate {rate} accepted for parity; the broker itself does not tick");
    }
    let config = BrokerConfig {
        bind: args.bind,
        port: args.port,
        data_dir: args.db_dir,
    };
    postnet_broker::serve(&config).await
}
