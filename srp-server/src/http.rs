//! Control HTTP API. Consumed by agents for `GET dataport` and by operators
//! for service and exposure CRUD.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::info;

use srp_core::registry::{ServiceRecord, ServiceRegistry};
use srp_core::server::agents::AgentRegistry;
use srp_core::server::exposure::ExposureManager;

use crate::error::Error;

#[derive(Clone)]
pub struct AppState {
    pub services: Arc<dyn ServiceRegistry>,
    pub agents: Arc<AgentRegistry>,
    pub exposure_manager: Arc<ExposureManager>,
    pub data_port: u16,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/dataport", get(get_dataport))
        .route("/api/v1/services", get(list_services).post(create_service))
        .route(
            "/api/v1/services/:id",
            get(get_service).put(update_service).delete(delete_service),
        )
        .route("/api/v1/agents", get(list_agents))
        .route(
            "/api/v1/services/:id/exposure",
            put(create_exposure).delete(delete_exposure),
        )
        .with_state(state)
}

async fn get_dataport(State(state): State<AppState>) -> String {
    state.data_port.to_string()
}

/// A `ServiceRecord` enriched with its current exposure, if any — the
/// `exposed_by`/`server_port` fields the registry itself has no notion of,
/// composed from the exposure manager on every read rather than stored.
#[derive(Serialize, Deserialize)]
struct ServiceView {
    id: String,
    addr: String,
    description: String,
    exposed_by: Option<String>,
    server_port: Option<u16>,
}

impl ServiceView {
    fn compose(record: ServiceRecord, exposure_manager: &ExposureManager) -> Self {
        let exposed_by = exposure_manager.agent_for(&record.id);
        let server_port = exposure_manager.port_for(&record.id);
        Self {
            id: record.id,
            addr: record.addr,
            description: record.description,
            exposed_by,
            server_port,
        }
    }
}

async fn list_services(State(state): State<AppState>) -> Result<Json<Vec<ServiceView>>, Error> {
    let services = state
        .services
        .list_services()
        .await?
        .into_iter()
        .map(|record| ServiceView::compose(record, &state.exposure_manager))
        .collect();
    Ok(Json(services))
}

async fn create_service(
    State(state): State<AppState>,
    Json(record): Json<ServiceRecord>,
) -> Result<(), Error> {
    if record.id.is_empty() {
        return Err(srp_core::registry::Error::MissingId.into());
    }
    srp_core::address::parse(&record.addr)
        .map_err(|e| srp_core::registry::Error::InvalidAddress(record.addr.clone(), e))?;
    state.services.create_service(record).await?;
    Ok(())
}

async fn get_service(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ServiceView>, Error> {
    let record = state.services.get_service(&id).await?;
    Ok(Json(ServiceView::compose(record, &state.exposure_manager)))
}

async fn update_service(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(mut record): Json<ServiceRecord>,
) -> Result<(), Error> {
    if id.is_empty() {
        return Err(srp_core::registry::Error::MissingId.into());
    }
    srp_core::address::parse(&record.addr)
        .map_err(|e| srp_core::registry::Error::InvalidAddress(record.addr.clone(), e))?;
    record.id = id;
    state.services.update_service(record).await?;
    Ok(())
}

async fn delete_service(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<(), Error> {
    // Deleting a service must also tear down its exposure.
    state.exposure_manager.delete_exposure(&id).await;
    state.services.delete_service(&id).await?;
    Ok(())
}

#[derive(Serialize)]
struct AgentView {
    id: String,
    description: String,
}

async fn list_agents(State(state): State<AppState>) -> Json<Vec<AgentView>> {
    let agents = state
        .agents
        .list()
        .into_iter()
        .map(|(id, description, _since)| AgentView { id, description })
        .collect();

    Json(agents)
}

#[derive(Deserialize)]
struct ExposureQuery {
    agent: String,
    port: u16,
}

async fn create_exposure(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<ExposureQuery>,
) -> Result<(), Error> {
    state
        .exposure_manager
        .create_exposure(&id, &query.agent, query.port)
        .await?;
    info!(service_id = %id, agent_id = %query.agent, port = query.port, "exposure created");
    Ok(())
}

async fn delete_exposure(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<(), Error> {
    state.exposure_manager.delete_exposure(&id).await;
    info!(service_id = %id, "exposure deleted");
    Ok(())
}
