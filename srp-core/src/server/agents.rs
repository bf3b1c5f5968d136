//! Server-side agent registry: tracks connected agents by id and dispatches
//! outbound segments to the right agent's tunnel.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;

use crate::segment::Segment;

#[derive(Debug, Error)]
pub enum Error {
    #[error("agent {0:?} is already connected")]
    DuplicateAgent(String),
    #[error("no agent connected with id {0:?}")]
    NoSuchAgent(String),
}

/// One connected agent's tunnel. `send_tx` is a capacity-1 queue: a stalled
/// tunnel blocks `send`, which blocks whichever flow tried to forward to it,
/// which stops that flow reading its own socket. This is the only
/// backpressure mechanism and must not be widened.
pub struct AgentSession {
    pub id: String,
    pub description: String,
    pub connected_since: Instant,
    send_tx: mpsc::Sender<Segment>,
    send_abort: AbortHandle,
    recv_abort: AbortHandle,
}

impl AgentSession {
    pub fn new(
        id: String,
        description: String,
        send_tx: mpsc::Sender<Segment>,
        send_abort: AbortHandle,
        recv_abort: AbortHandle,
    ) -> Self {
        Self {
            id,
            description,
            connected_since: Instant::now(),
            send_tx,
            send_abort,
            recv_abort,
        }
    }

    fn cancel(&self) {
        self.send_abort.abort();
        self.recv_abort.abort();
    }
}

/// `None` marks an id that has been reserved (a registration is in
/// progress) but whose tasks have not started yet; `Some` is a fully
/// installed session. The reserve/finalize split lets a caller settle who
/// wins a race for an id *before* spawning any tasks on behalf of the
/// connection, so a losing racer never gets told it succeeded.
#[derive(Default)]
pub struct AgentRegistry {
    sessions: Mutex<HashMap<String, Option<AgentSession>>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically claims `id` for a registration in progress. Concurrent
    /// callers racing for the same id see exactly one success; every other
    /// caller gets `DuplicateAgent` and must never spawn send/recv tasks or
    /// reply `Succeeded: true` to its peer.
    pub fn reserve(&self, id: &str) -> Result<(), Error> {
        let mut sessions = self.sessions.lock().unwrap();
        if sessions.contains_key(id) {
            return Err(Error::DuplicateAgent(id.to_string()));
        }
        sessions.insert(id.to_string(), None);
        Ok(())
    }

    /// Installs the session for a previously reserved id, replacing its
    /// placeholder.
    pub fn finalize(&self, session: AgentSession) {
        self.sessions
            .lock()
            .unwrap()
            .insert(session.id.clone(), Some(session));
    }

    /// Releases a reservation that never reached `finalize` (e.g. the
    /// connection died mid-handshake).
    pub fn release_reservation(&self, id: &str) {
        self.sessions.lock().unwrap().remove(id);
    }

    pub fn remove(&self, id: &str) {
        if let Some(Some(session)) = self.sessions.lock().unwrap().remove(id) {
            session.cancel();
        }
    }

    /// `SendToAgent(id, segment)`: concurrent calls serialize through the
    /// agent's own mpsc queue, not through this registry's lock.
    pub async fn send_to(&self, id: &str, segment: Segment) -> Result<(), Error> {
        let send_tx = {
            let sessions = self.sessions.lock().unwrap();
            sessions
                .get(id)
                .and_then(|s| s.as_ref())
                .map(|s| s.send_tx.clone())
                .ok_or_else(|| Error::NoSuchAgent(id.to_string()))?
        };

        send_tx
            .send(segment)
            .await
            .map_err(|_| Error::NoSuchAgent(id.to_string()))
    }

    pub fn is_connected(&self, id: &str) -> bool {
        self.sessions.lock().unwrap().contains_key(id)
    }

    pub fn list(&self) -> Vec<(String, String, Instant)> {
        self.sessions
            .lock()
            .unwrap()
            .values()
            .flatten()
            .map(|s| (s.id.clone(), s.description.clone(), s.connected_since))
            .collect()
    }
}
