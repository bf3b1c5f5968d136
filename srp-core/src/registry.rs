//! The two external collaborators the data plane consumes: a service
//! registry (CRUD over `ServiceRecord`) and an exposure registry (CRUD over
//! `ExposureRecord`). Spec names these as interfaces only; this module
//! defines the trait surface the data plane depends on so `srp-core` never
//! needs to know whether the backing store is an embedded KV file or an
//! in-memory map. Concrete implementations live in the `srp-registry` crate.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceRecord {
    pub id: String,
    /// `"ip:port"`, validated with [`crate::address::parse`] on write.
    pub addr: String,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExposureRecord {
    pub service_id: String,
    pub agent_id: String,
    pub public_port: u16,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("service {0:?} not found")]
    ServiceNotFound(String),
    #[error("service {0:?} already exists")]
    DuplicateService(String),
    #[error("{0:?} is not a valid service address")]
    InvalidAddress(String, #[source] crate::address::Error),
    #[error("service id must not be empty")]
    MissingId,
    #[error("registry backend error")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

#[async_trait]
pub trait ServiceRegistry: Send + Sync {
    async fn get_service(&self, id: &str) -> Result<ServiceRecord, Error>;
    async fn list_services(&self) -> Result<Vec<ServiceRecord>, Error>;
    async fn create_service(&self, record: ServiceRecord) -> Result<(), Error>;
    async fn update_service(&self, record: ServiceRecord) -> Result<(), Error>;
    async fn delete_service(&self, id: &str) -> Result<(), Error>;
}

#[async_trait]
pub trait ExposureRegistry: Send + Sync {
    async fn get_exposure(&self, service_id: &str) -> Result<Option<ExposureRecord>, Error>;
    async fn list_exposures(&self) -> Result<Vec<ExposureRecord>, Error>;
    async fn create_exposure(&self, record: ExposureRecord) -> Result<(), Error>;
    async fn delete_exposure(&self, service_id: &str) -> Result<(), Error>;
}
