//! Agent-side server link: a single long-lived framed tunnel to the server.
//! Repeatedly attempts to establish the tunnel with a 1-second backoff
//! between attempts, forever.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::agent::dialer::{self, ServiceFlowTable};
use crate::handshake::{self, AgentRegistration, HandshakeResponse};
use crate::segment::Segment;
use crate::transport;

const TUNNEL_SEND_QUEUE_CAPACITY: usize = 1;
const RECONNECT_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to discover data port from {0}")]
    DataportDiscovery(String, #[source] reqwest::Error),
    #[error("data port response {0:?} is not a valid decimal port number")]
    DataportMalformed(String),
    #[error("failed to dial tunnel at {0}")]
    Dial(String, #[source] std::io::Error),
    #[error("handshake failed")]
    Handshake(#[from] handshake::Error),
    #[error("server rejected registration: {0}")]
    Rejected(String),
}

#[derive(Clone)]
pub struct AgentLinkConfig {
    /// `host:http_port` of the server's control API.
    pub server_http: String,
    pub id: String,
    pub description: String,
}

/// Runs forever: discover the data port, dial, handshake, run the tunnel
/// until either direction fails, then retry after a fixed backoff. Never
/// returns; callers spawn this as a background task.
pub async fn run(config: AgentLinkConfig, flows: Arc<ServiceFlowTable>) {
    loop {
        match connect_once(&config).await {
            Ok(stream) => {
                info!(agent_id = %config.id, "tunnel established");
                run_tunnel(stream, &flows).await;
                warn!(agent_id = %config.id, "tunnel closed, reconnecting");
            }
            Err(err) => {
                warn!(error = %err, agent_id = %config.id, "tunnel setup failed, retrying");
            }
        }

        tokio::time::sleep(RECONNECT_BACKOFF).await;
    }
}

async fn connect_once(config: &AgentLinkConfig) -> Result<TcpStream, Error> {
    let data_port = discover_dataport(&config.server_http).await?;

    let server_host = config
        .server_http
        .split(':')
        .next()
        .unwrap_or(&config.server_http);
    let dial_addr = format!("{server_host}:{data_port}");

    let mut stream = TcpStream::connect(&dial_addr)
        .await
        .map_err(|err| Error::Dial(dial_addr.clone(), err))?;

    let registration = AgentRegistration {
        id: config.id.clone(),
        description: config.description.clone(),
    };
    handshake::write_message(&mut stream, &registration).await?;

    let response: HandshakeResponse = handshake::read_message(&mut stream).await?;
    if !response.succeeded {
        return Err(Error::Rejected(response.message));
    }

    Ok(stream)
}

async fn discover_dataport(server_http: &str) -> Result<u16, Error> {
    let url = format!("http://{server_http}/api/v1/dataport");

    let response = reqwest::get(&url)
        .await
        .and_then(reqwest::Response::error_for_status)
        .map_err(|err| Error::DataportDiscovery(url.clone(), err))?;

    let body = response
        .text()
        .await
        .map_err(|err| Error::DataportDiscovery(url.clone(), err))?;

    body.trim()
        .parse()
        .map_err(|_| Error::DataportMalformed(body))
}

async fn run_tunnel(stream: TcpStream, flows: &Arc<ServiceFlowTable>) {
    let (mut reader, mut writer) = transport::split_tcp(stream);
    let (tunnel_tx, mut tunnel_rx) = mpsc::channel::<Segment>(TUNNEL_SEND_QUEUE_CAPACITY);

    let send_task = tokio::spawn(async move {
        while let Some(segment) = tunnel_rx.recv().await {
            if writer.send(&segment).await.is_err() {
                break;
            }
        }
    });

    let recv_flows = flows.clone();
    let recv_task = tokio::spawn(async move {
        loop {
            let segment = match reader.receive().await {
                Ok(segment) => segment,
                Err(_) => break,
            };

            if let Err(err) = dialer::dispatch(&recv_flows, tunnel_tx.clone(), segment).await {
                warn!(?err, "failed to dispatch inbound segment to service");
            }
        }
    });

    tokio::select! {
        _ = send_task => {},
        _ = recv_task => {},
    }
}
