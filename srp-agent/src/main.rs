mod cli;

use std::sync::Arc;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use srp_core::agent::dialer::ServiceFlowTable;
use srp_core::agent::link::{self, AgentLinkConfig};

#[tokio::main]
async fn main() {
    let args = cli::Args::parse();

    if args.log {
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::new(args.log_level.clone()))
            .init();
    }

    info!(agent_id = %args.name, server = %args.server, "starting agent");

    let flows = Arc::new(ServiceFlowTable::new());
    let config = AgentLinkConfig {
        server_http: args.server,
        id: args.name,
        description: args.description,
    };

    tokio::select! {
        _ = link::run(config, flows) => {}
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
        }
    }
}
