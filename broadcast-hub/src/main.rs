use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};

use broadcast_hub::{
    cli::{Cli, Command},
    client,
    hub::BroadcastHub,
    server::Server,
};

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Command::Server(args) => {
            let listener = TcpListener::bind(args.listen).await?;
            let hub = Arc::new(BroadcastHub::with_config(args.hub_config()));
            let server = Server::with_config(listener, hub, args.server_config());
            let addr = server.local_addr()?;
            let config = server.hub().config();
            info!(
                delivery_timeout = ?config.delivery_timeout,
                on_duplicate = ?config.duplicate_policy,
                "hub listening on {}",
                addr
            );
            if let Err(err) = server.run_until_ctrl_c().await {
                warn!("hub exited with error: {err:?}");
                return Err(err);
            }
        }
        Command::Client(args) => client::run(args).await?,
    }

    Ok(())
}
