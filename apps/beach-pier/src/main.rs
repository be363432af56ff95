use beach_pier::{
    cli::{self, Cli, Commands},
    config::Config,
    server,
};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Quiet by default; RUST_LOG overrides.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,beach_pier=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();

    if let Some(Commands::Debug {
        url,
        identity,
        command,
    }) = cli.command
    {
        if let Err(e) = cli::run_debug_client(url, identity, command).await {
            error!("Debug client error: {:#}", e);
            std::process::exit(1);
        }
        return;
    }

    let mut config = Config::from_env();
    if let Some(host) = cli.host {
        config.host = host;
    }
    if let Some(port) = cli.port {
        config.port = port;
    }
    info!("Starting Beach Pier on {}", config.bind_addr());
    info!("Default launch URL: {}", config.default_launch_url);

    if let Err(e) = server::run(config).await {
        error!("Beach Pier stopped: {:#}", e);
        std::process::exit(1);
    }
}
