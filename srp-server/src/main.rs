mod cli;
mod error;
mod http;

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use srp_core::registry::{ExposureRegistry, ServiceRegistry};
use srp_core::server::agents::AgentRegistry;
use srp_core::server::exposure::ExposureManager;
use srp_core::server::user::UserFlowTable;
use srp_core::server::acceptor;
use srp_registry::{InMemoryExposureRegistry, SledServiceRegistry};

use crate::http::AppState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = cli::Args::parse();

    if args.log {
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::new(args.log_level.clone()))
            .init();
    }

    let services: Arc<dyn ServiceRegistry> = Arc::new(SledServiceRegistry::open(&args.db)?);
    let exposures: Arc<dyn ExposureRegistry> = Arc::new(InMemoryExposureRegistry::new());
    let agents = Arc::new(AgentRegistry::new());
    let users = Arc::new(UserFlowTable::new());
    let exposure_manager = Arc::new(ExposureManager::new(
        services.clone(),
        exposures,
        agents.clone(),
        users.clone(),
    ));

    let data_listener = TcpListener::bind(("0.0.0.0", args.data)).await?;
    info!(port = args.data, "data port listening");

    let acceptor_agents = agents.clone();
    let acceptor_users = users.clone();
    let acceptor_task = tokio::spawn(async move {
        acceptor::run(data_listener, acceptor_agents, acceptor_users).await;
    });

    let state = AppState {
        services,
        agents,
        exposure_manager,
        data_port: args.data,
    };

    let http_addr = SocketAddr::from(([0, 0, 0, 0], args.http));
    let http_listener = TcpListener::bind(http_addr).await?;
    info!(port = args.http, "control API listening");

    let app = http::router(state);

    let server = axum::serve(http_listener, app).with_graceful_shutdown(shutdown_signal());

    tokio::select! {
        result = server => {
            if let Err(err) = result {
                warn!(?err, "control API server exited with error");
            }
        }
        _ = acceptor_task => {
            warn!("data port acceptor exited");
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutdown signal received"),
        Err(err) => warn!(?err, "failed to install shutdown signal handler"),
    }
}
