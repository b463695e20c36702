use clap::Parser;
use log::info;
use server::config::GameConfig;
use server::network::Server;

#[derive(Parser, Debug)]
#[command(author, version, about = "Authority for the day/night survival round")]
struct Args {
    /// Address to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// UDP port to listen on
    #[arg(short, long, default_value = "8080")]
    port: u16,

    /// Simulation ticks per second
    #[arg(short, long, default_value = "30")]
    tick_rate: u32,

    /// Maximum number of connected sessions
    #[arg(short, long, default_value = "16")]
    max_clients: usize,

    /// Length of a day in seconds
    #[arg(long, default_value = "60")]
    day_duration: f32,

    /// Length of a night in seconds
    #[arg(long, default_value = "30")]
    night_duration: f32,

    /// Days played before the round ends
    #[arg(long, default_value = "7")]
    max_days: u32,

    /// Seconds after dawn before pending infections resolve
    #[arg(long, default_value = "5")]
    morning_grace: f32,

    /// Seed for reproducible role deals, spawns and agent wandering
    #[arg(long)]
    seed: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let mut config = GameConfig {
        tick_rate: args.tick_rate,
        max_clients: args.max_clients,
        seed: args.seed,
        ..GameConfig::default()
    };
    config.round.day_duration = args.day_duration;
    config.round.night_duration = args.night_duration;
    config.round.max_days = args.max_days;
    config.round.morning_grace = args.morning_grace;
    config.validate()?;

    let addr = format!("{}:{}", args.host, args.port);
    info!(
        "Starting authority on {} ({} days, {}s day, {}s night)",
        addr, config.round.max_days, config.round.day_duration, config.round.night_duration
    );

    let mut server = Server::new(&addr, config).await?;
    server.run().await
}
