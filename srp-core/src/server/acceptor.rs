//! Server-side agent acceptor: accepts tunnel connections, runs the
//! registration handshake, and installs the session into the agent registry.

use std::sync::Arc;

use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::handshake::{self, AgentRegistration, HandshakeResponse};
use crate::segment::Segment;
use crate::server::agents::{self, AgentRegistry, AgentSession};
use crate::server::user::UserFlowTable;
use crate::transport;

const AGENT_SEND_QUEUE_CAPACITY: usize = 1;

#[derive(Debug, Error)]
pub enum Error {
    #[error("handshake failed")]
    Handshake(#[from] handshake::Error),
    #[error("agent registration rejected")]
    Registration(#[from] agents::Error),
}

/// Accepts tunnel connections on the configured data port until the
/// listener itself fails (bind errors happen before this loop starts; a
/// failing `accept` here means the listener's underlying socket died).
pub async fn run(listener: TcpListener, agents: Arc<AgentRegistry>, users: Arc<UserFlowTable>) {
    loop {
        let (socket, peer) = match listener.accept().await {
            Ok(pair) => pair,
            Err(err) => {
                warn!(?err, "data port accept failed");
                break;
            }
        };

        let agents = agents.clone();
        let users = users.clone();

        tokio::spawn(async move {
            if let Err(err) = handle_connection(socket, agents, users).await {
                warn!(?err, %peer, "agent connection ended");
            }
        });
    }
}

async fn handle_connection(
    mut socket: TcpStream,
    agents: Arc<AgentRegistry>,
    users: Arc<UserFlowTable>,
) -> Result<(), Error> {
    let registration: AgentRegistration = handshake::read_message(&mut socket).await?;

    // Claim the id before replying at all: this is the atomic decision of
    // who wins a race between two connections registering under the same
    // id. A loser must never hear `Succeeded: true` and must never have its
    // send/recv tasks spawned.
    if let Err(err) = agents.reserve(&registration.id) {
        let response = HandshakeResponse::rejected(format!(
            "agent id {:?} is already connected",
            registration.id
        ));
        let _ = handshake::write_message(&mut socket, &response).await;
        return Err(Error::Registration(err));
    }

    if let Err(err) = handshake::write_message(&mut socket, &HandshakeResponse::ok()).await {
        agents.release_reservation(&registration.id);
        return Err(err.into());
    }

    let (mut reader, mut writer) = transport::split_tcp(socket);
    let (send_tx, mut send_rx) = mpsc::channel::<Segment>(AGENT_SEND_QUEUE_CAPACITY);

    let send_task = tokio::spawn(async move {
        while let Some(segment) = send_rx.recv().await {
            if writer.send(&segment).await.is_err() {
                break;
            }
        }
    });

    let recv_users = users.clone();
    let recv_id = registration.id.clone();
    let recv_task = tokio::spawn(async move {
        loop {
            let segment = match reader.receive().await {
                Ok(segment) => segment,
                Err(_) => break,
            };

            if recv_users
                .forward_to_user(&segment.header.user, segment.payload)
                .await
                .is_err()
            {
                warn!(agent_id = %recv_id, "dropping segment: no such user");
            }
        }
    });

    let id = registration.id.clone();
    let session = AgentSession::new(
        id.clone(),
        registration.description.clone(),
        send_tx,
        send_task.abort_handle(),
        recv_task.abort_handle(),
    );

    agents.finalize(session);
    info!(agent_id = %id, "agent connected");

    tokio::select! {
        _ = send_task => {},
        _ = recv_task => {},
    }

    agents.remove(&id);
    info!(agent_id = %id, "agent disconnected");

    Ok(())
}
