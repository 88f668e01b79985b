use std::{net::SocketAddr, time::Duration};

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::{
    config::{DuplicatePolicy, HubConfig},
    server::{DEFAULT_QUEUE_CAPACITY, ServerConfig},
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the broadcast hub, accepting local TCP connections.
    Server(ServerArgs),
    /// Connect to a hub and chat with everyone else on it.
    Client(ClientArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ServerArgs {
    /// Socket address the hub should bind to. Use port 0 for an ephemeral port.
    #[arg(long, default_value = "127.0.0.1:5000")]
    pub listen: SocketAddr,

    /// Milliseconds a single delivery may take before the recipient is evicted.
    #[arg(long, default_value_t = 5000)]
    pub delivery_timeout_ms: u64,

    /// What to do when a name that is already connected joins again.
    #[arg(long, value_enum, default_value_t = OnDuplicate::Replace)]
    pub on_duplicate: OnDuplicate,

    /// Messages queued per client before delivery to it has to wait.
    #[arg(long, default_value_t = DEFAULT_QUEUE_CAPACITY)]
    pub queue_capacity: usize,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnDuplicate {
    /// Drop the older session and keep the new one.
    Replace,
    /// Refuse the new session.
    Reject,
}

impl From<OnDuplicate> for DuplicatePolicy {
    fn from(value: OnDuplicate) -> Self {
        match value {
            OnDuplicate::Replace => DuplicatePolicy::Replace,
            OnDuplicate::Reject => DuplicatePolicy::Reject,
        }
    }
}

impl ServerArgs {
    pub fn hub_config(&self) -> HubConfig {
        HubConfig::default()
            .delivery_timeout(Duration::from_millis(self.delivery_timeout_ms))
            .duplicate_policy(self.on_duplicate.into())
    }

    pub fn server_config(&self) -> ServerConfig {
        ServerConfig::default().queue_capacity(self.queue_capacity)
    }
}

#[derive(Args, Debug, Clone)]
pub struct ClientArgs {
    /// Name other participants will see.
    #[arg(long)]
    pub name: String,

    /// Address of the hub to connect to.
    #[arg(long, default_value = "127.0.0.1:5000")]
    pub server: SocketAddr,
}
