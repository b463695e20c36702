use clap::Parser;
use client::network::Client;
use log::info;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Authority address
    #[arg(short = 's', long, default_value = "127.0.0.1:8080")]
    server: String,

    /// Log filter used when RUST_LOG is unset
    #[arg(short = 'v', long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&args.log_level))
        .init();

    info!("Starting observer");
    let mut client = Client::new(&args.server).await?;
    client.run().await?;

    Ok(())
}
