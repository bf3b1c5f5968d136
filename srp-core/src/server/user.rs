//! Server-side user connection table: one entry per accepted user flow,
//! keyed by the user's remote `ip:port`.

use std::collections::HashMap;
use std::net::SocketAddrV4;
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::{debug, warn};

use crate::registry::ServiceRegistry;
use crate::segment::Segment;
use crate::server::agents::AgentRegistry;

pub const READ_BUF_LEN: usize = 1024;

#[derive(Debug, Error)]
pub enum Error {
    #[error("no user flow for {0}")]
    NoSuchUser(SocketAddrV4),
}

struct UserFlowHandle {
    /// The exposure this flow belongs to; used to cancel every flow bound
    /// to an exposure when it is torn down.
    service_id: String,
    send_tx: mpsc::Sender<Vec<u8>>,
    send_abort: AbortHandle,
    recv_abort: AbortHandle,
}

impl UserFlowHandle {
    fn cancel(&self) {
        self.send_abort.abort();
        self.recv_abort.abort();
    }
}

#[derive(Default)]
pub struct UserFlowTable {
    flows: Mutex<HashMap<SocketAddrV4, UserFlowHandle>>,
}

impl UserFlowTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// `ForwardToUser(addr, payload)`: drops the segment and surfaces
    /// [`Error::NoSuchUser`] when the flow no longer exists.
    pub async fn forward_to_user(&self, addr: &SocketAddrV4, payload: Vec<u8>) -> Result<(), Error> {
        let send_tx = {
            let flows = self.flows.lock().unwrap();
            flows.get(addr).map(|h| h.send_tx.clone())
        }
        .ok_or(Error::NoSuchUser(*addr))?;

        send_tx
            .send(payload)
            .await
            .map_err(|_| Error::NoSuchUser(*addr))
    }

    fn remove(&self, addr: &SocketAddrV4) {
        if let Some(handle) = self.flows.lock().unwrap().remove(addr) {
            handle.cancel();
        }
    }

    /// Cancels every flow bound to `service_id`: used when its exposure is
    /// deleted or replaced.
    pub fn cancel_for_service(&self, service_id: &str) {
        let mut flows = self.flows.lock().unwrap();
        let dead: Vec<SocketAddrV4> = flows
            .iter()
            .filter(|(_, h)| h.service_id == service_id)
            .map(|(addr, _)| *addr)
            .collect();

        for addr in dead {
            if let Some(handle) = flows.remove(&addr) {
                handle.cancel();
            }
        }
    }
}

/// Runs one accepted user connection until either direction fails, then
/// tears the flow down. The service address is looked up per read, not
/// cached, so a service-address update takes effect on the next byte read
/// from the user; bytes already in flight may still land on the stale
/// address.
pub async fn run_flow(
    socket: TcpStream,
    remote_addr: SocketAddrV4,
    service_id: String,
    agent_id: String,
    services: Arc<dyn ServiceRegistry>,
    agents: Arc<AgentRegistry>,
    table: Arc<UserFlowTable>,
) {
    let (mut read_half, mut write_half) = socket.into_split();
    let (send_tx, mut send_rx) = mpsc::channel::<Vec<u8>>(1);

    let send_task = tokio::spawn(async move {
        while let Some(chunk) = send_rx.recv().await {
            if write_half.write_all(&chunk).await.is_err() {
                break;
            }
        }
    });

    let recv_service_id = service_id.clone();
    let recv_agent_id = agent_id.clone();
    let recv_task = tokio::spawn(async move {
        let mut buf = vec![0u8; READ_BUF_LEN];
        loop {
            let n = match read_half.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => n,
            };

            let service_addr = match services.get_service(&recv_service_id).await {
                Ok(record) => match crate::address::parse(&record.addr) {
                    Ok(addr) => addr,
                    Err(_) => break,
                },
                Err(_) => break,
            };

            let segment = Segment::new(remote_addr, service_addr, buf[..n].to_vec());

            if agents.send_to(&recv_agent_id, segment).await.is_err() {
                warn!(agent_id = %recv_agent_id, "dropping segment: agent not connected");
                break;
            }
        }
    });

    let send_abort = send_task.abort_handle();
    let recv_abort = recv_task.abort_handle();

    table.flows.lock().unwrap().insert(
        remote_addr,
        UserFlowHandle {
            service_id: service_id.clone(),
            send_tx,
            send_abort,
            recv_abort,
        },
    );

    debug!(%remote_addr, %service_id, "user flow installed");

    tokio::select! {
        _ = send_task => {},
        _ = recv_task => {},
    }

    table.remove(&remote_addr);
    debug!(%remote_addr, "user flow torn down");
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tokio::net::TcpListener;

    use crate::registry::{self, ServiceRecord};
    use crate::server::agents::AgentSession;

    struct FixedRegistry(ServiceRecord);

    #[async_trait]
    impl ServiceRegistry for FixedRegistry {
        async fn get_service(&self, _id: &str) -> Result<ServiceRecord, registry::Error> {
            Ok(self.0.clone())
        }
        async fn list_services(&self) -> Result<Vec<ServiceRecord>, registry::Error> {
            Ok(vec![self.0.clone()])
        }
        async fn create_service(&self, _record: ServiceRecord) -> Result<(), registry::Error> {
            Ok(())
        }
        async fn update_service(&self, _record: ServiceRecord) -> Result<(), registry::Error> {
            Ok(())
        }
        async fn delete_service(&self, _id: &str) -> Result<(), registry::Error> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn byte_stream_reaches_agent_and_flow_is_torn_down_on_eof() {
        let services: Arc<dyn ServiceRegistry> = Arc::new(FixedRegistry(ServiceRecord {
            id: "svc".into(),
            addr: "127.0.0.1:9000".into(),
            description: "".into(),
        }));
        let agents = Arc::new(AgentRegistry::new());
        let table = Arc::new(UserFlowTable::new());

        // Fake agent session whose recv side we read from directly.
        let (tx, mut rx) = mpsc::channel(1);
        let noop = tokio::spawn(async {});
        let session = AgentSession::new(
            "a1".into(),
            "".into(),
            tx,
            noop.abort_handle(),
            noop.abort_handle(),
        );
        agents.reserve("a1").unwrap();
        agents.finalize(session);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let client = TcpStream::connect(addr).await.unwrap();
        let remote_addr = match client.local_addr().unwrap() {
            std::net::SocketAddr::V4(v4) => v4,
            _ => unreachable!(),
        };

        let (socket, _) = listener.accept().await.unwrap();

        let flow = tokio::spawn(run_flow(
            socket,
            remote_addr,
            "svc".into(),
            "a1".into(),
            services,
            agents,
            table,
        ));

        let mut client = client;
        client.write_all(b"ping").await.unwrap();

        let segment = rx.recv().await.unwrap();
        assert_eq!(segment.payload, b"ping");
        assert_eq!(segment.header.service().as_str(), "127.0.0.1:9000");

        drop(client);
        flow.await.unwrap();
    }
}
