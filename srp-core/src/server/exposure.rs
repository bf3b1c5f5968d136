//! Server-side exposure listener: one TCP listener per exposed service,
//! accepting user connections and mapping each to the owning agent.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tokio::net::TcpListener;
use tokio::task::AbortHandle;
use tracing::{debug, error, warn};

use crate::registry::{self, ExposureRecord, ExposureRegistry, ServiceRegistry};
use crate::server::agents::AgentRegistry;
use crate::server::user::{self, UserFlowTable};

#[derive(Debug, Error)]
pub enum Error {
    #[error("service {0:?} not found")]
    ServiceNotFound(String),
    #[error("failed to bind public port {0}")]
    ListenFailed(u16, #[source] std::io::Error),
}

struct ExposureInstance {
    agent_id: String,
    port: u16,
    accept_abort: AbortHandle,
}

impl ExposureInstance {
    fn cancel(&self) {
        self.accept_abort.abort();
    }
}

pub struct ExposureManager {
    instances: Mutex<HashMap<String, ExposureInstance>>,
    services: Arc<dyn ServiceRegistry>,
    exposures: Arc<dyn ExposureRegistry>,
    agents: Arc<AgentRegistry>,
    users: Arc<UserFlowTable>,
}

impl ExposureManager {
    pub fn new(
        services: Arc<dyn ServiceRegistry>,
        exposures: Arc<dyn ExposureRegistry>,
        agents: Arc<AgentRegistry>,
        users: Arc<UserFlowTable>,
    ) -> Self {
        Self {
            instances: Mutex::new(HashMap::new()),
            services,
            exposures,
            agents,
            users,
        }
    }

    /// Creating an exposure for a service that already has one tears the old
    /// one down first: closes its listener and cancels every user flow
    /// bound to it. Agent presence is **not** verified here; forwarding
    /// fails lazily at send time if the agent is absent.
    pub async fn create_exposure(
        &self,
        service_id: &str,
        agent_id: &str,
        port: u16,
    ) -> Result<(), Error> {
        self.teardown(service_id);

        self.services
            .get_service(service_id)
            .await
            .map_err(|_| Error::ServiceNotFound(service_id.to_string()))?;

        let listener = TcpListener::bind(("0.0.0.0", port))
            .await
            .map_err(|err| Error::ListenFailed(port, err))?;

        let accept_task = tokio::spawn(serve_users(
            listener,
            service_id.to_string(),
            agent_id.to_string(),
            self.services.clone(),
            self.agents.clone(),
            self.users.clone(),
        ));

        let instance = ExposureInstance {
            agent_id: agent_id.to_string(),
            port,
            accept_abort: accept_task.abort_handle(),
        };

        self.instances
            .lock()
            .unwrap()
            .insert(service_id.to_string(), instance);

        if let Err(err) = self
            .exposures
            .create_exposure(ExposureRecord {
                service_id: service_id.to_string(),
                agent_id: agent_id.to_string(),
                public_port: port,
            })
            .await
        {
            warn!(?err, service_id, "exposure registry write failed after listener bind");
        }

        debug!(service_id, agent_id, port, "exposure installed");

        Ok(())
    }

    /// Closes the listener; existing user flows are cancelled immediately
    /// rather than left to die lazily.
    pub async fn delete_exposure(&self, service_id: &str) {
        self.teardown(service_id);
        if let Err(err) = self.exposures.delete_exposure(service_id).await {
            warn!(?err, service_id, "exposure registry delete failed");
        }
    }

    fn teardown(&self, service_id: &str) {
        if let Some(instance) = self.instances.lock().unwrap().remove(service_id) {
            instance.cancel();
        }
        self.users.cancel_for_service(service_id);
    }

    pub fn agent_for(&self, service_id: &str) -> Option<String> {
        self.instances
            .lock()
            .unwrap()
            .get(service_id)
            .map(|i| i.agent_id.clone())
    }

    pub fn port_for(&self, service_id: &str) -> Option<u16> {
        self.instances.lock().unwrap().get(service_id).map(|i| i.port)
    }
}

async fn serve_users(
    listener: TcpListener,
    service_id: String,
    agent_id: String,
    services: Arc<dyn ServiceRegistry>,
    agents: Arc<AgentRegistry>,
    users: Arc<UserFlowTable>,
) {
    loop {
        let (socket, remote_addr) = match listener.accept().await {
            Ok(pair) => pair,
            Err(err) => {
                error!(?err, service_id, "exposure listener accept failed");
                break;
            }
        };

        let remote_addr = match remote_addr {
            SocketAddr::V4(v4) => v4,
            SocketAddr::V6(_) => {
                warn!("rejecting ipv6 user connection (not supported, spec non-goal)");
                continue;
            }
        };

        tokio::spawn(user::run_flow(
            socket,
            remote_addr,
            service_id.clone(),
            agent_id.clone(),
            services.clone(),
            agents.clone(),
            users.clone(),
        ));
    }
}
