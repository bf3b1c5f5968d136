//! Agent-side service dialer: for each `(user, service)` key seen inbound,
//! maintains one outbound TCP connection to the intranet service and
//! shuttles bytes.

use std::collections::HashMap;
use std::net::{SocketAddr, SocketAddrV4};
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::{debug, warn};

use crate::segment::Segment;

pub const READ_BUF_LEN: usize = 1024;
const SERVICE_SEND_QUEUE_CAPACITY: usize = 1;

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to dial service {0}")]
    DialFailed(SocketAddrV4, #[source] std::io::Error),
}

struct ServiceFlowHandle {
    send_tx: mpsc::Sender<Vec<u8>>,
    send_abort: AbortHandle,
    recv_abort: AbortHandle,
}

impl ServiceFlowHandle {
    fn cancel(&self) {
        self.send_abort.abort();
        self.recv_abort.abort();
    }
}

fn flow_key(user: &SocketAddrV4, service: &SocketAddrV4) -> String {
    format!("{}->{}", crate::address::render(user), crate::address::render(service))
}

#[derive(Default)]
pub struct ServiceFlowTable {
    flows: Mutex<HashMap<String, ServiceFlowHandle>>,
}

impl ServiceFlowTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn remove(&self, key: &str) {
        if let Some(handle) = self.flows.lock().unwrap().remove(key) {
            handle.cancel();
        }
    }
}

/// Dispatches one inbound segment from the server tunnel: dials the service
/// lazily on the first segment for a key, then enqueues the payload.
/// Enqueue is non-blocking for a queue of capacity 1; the caller blocks if
/// the service socket is stalled, which is the backpressure mechanism.
pub async fn dispatch(
    table: &Arc<ServiceFlowTable>,
    tunnel_tx: mpsc::Sender<Segment>,
    segment: Segment,
) -> Result<(), Error> {
    let key = flow_key(&segment.header.user, &segment.header.service);

    let send_tx = {
        let flows = table.flows.lock().unwrap();
        flows.get(&key).map(|h| h.send_tx.clone())
    };

    let send_tx = match send_tx {
        Some(tx) => tx,
        None => install(table, &key, segment.header.user, segment.header.service, tunnel_tx).await?,
    };

    if send_tx.send(segment.payload).await.is_err() {
        // The flow died between lookup and enqueue; it will be re-dialed on
        // the next segment for this key.
        table.remove(&key);
    }

    Ok(())
}

async fn install(
    table: &Arc<ServiceFlowTable>,
    key: &str,
    user_addr: SocketAddrV4,
    service_addr: SocketAddrV4,
    tunnel_tx: mpsc::Sender<Segment>,
) -> Result<mpsc::Sender<Vec<u8>>, Error> {
    let socket = TcpStream::connect(SocketAddr::V4(service_addr))
        .await
        .map_err(|err| Error::DialFailed(service_addr, err))?;

    let (mut read_half, mut write_half) = socket.into_split();
    let (send_tx, mut send_rx) = mpsc::channel::<Vec<u8>>(SERVICE_SEND_QUEUE_CAPACITY);

    let send_task = tokio::spawn(async move {
        while let Some(chunk) = send_rx.recv().await {
            if write_half.write_all(&chunk).await.is_err() {
                warn!("service socket write failed, cancelling flow");
                break;
            }
        }
    });

    let recv_task = tokio::spawn(async move {
        let mut buf = vec![0u8; READ_BUF_LEN];
        loop {
            let n = match read_half.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => n,
            };

            let out = Segment::new(user_addr, service_addr, buf[..n].to_vec());
            if tunnel_tx.send(out).await.is_err() {
                break;
            }
        }
    });

    let handle = ServiceFlowHandle {
        send_tx: send_tx.clone(),
        send_abort: send_task.abort_handle(),
        recv_abort: recv_task.abort_handle(),
    };

    table.flows.lock().unwrap().insert(key.to_string(), handle);
    debug!(%user_addr, %service_addr, "service flow installed");

    let table = table.clone();
    let key = key.to_string();
    tokio::spawn(async move {
        tokio::select! {
            _ = send_task => {},
            _ = recv_task => {},
        }
        table.remove(&key);
        debug!(key, "service flow torn down");
    });

    Ok(send_tx)
}
