//! Concrete implementations of the two collaborators `srp-core` consumes
//! only as traits: a `sled`-backed [`ServiceRegistry`] and an in-memory
//! [`ExposureRegistry`]. `sled`'s calls are synchronous and fast enough to
//! call directly from an async method with no blocking-pool hop.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use srp_core::registry::{
    Error as RegistryError, ExposureRecord, ExposureRegistry, ServiceRecord, ServiceRegistry,
};

#[derive(Debug, Error)]
pub enum Error {
    #[error("sled error")]
    Sled(#[from] sled::Error),
    #[error("serde error")]
    Serde(#[from] serde_json::Error),
}

/// One `sled` tree named `service`, keys are service ids, values are
/// JSON-encoded [`ServiceRecord`]s.
pub struct SledServiceRegistry {
    tree: sled::Tree,
}

impl SledServiceRegistry {
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self, Error> {
        let db = sled::open(path)?;
        let tree = db.open_tree("service")?;
        Ok(Self { tree })
    }

    fn backend(err: Error) -> RegistryError {
        RegistryError::Backend(Box::new(err))
    }
}

#[async_trait]
impl ServiceRegistry for SledServiceRegistry {
    async fn get_service(&self, id: &str) -> Result<ServiceRecord, RegistryError> {
        let bytes = self
            .tree
            .get(id)
            .map_err(|e| Self::backend(e.into()))?
            .ok_or_else(|| RegistryError::ServiceNotFound(id.to_string()))?;

        serde_json::from_slice(&bytes).map_err(|e| Self::backend(e.into()))
    }

    async fn list_services(&self) -> Result<Vec<ServiceRecord>, RegistryError> {
        self.tree
            .iter()
            .map(|entry| {
                let (_, bytes) = entry.map_err(|e| Self::backend(e.into()))?;
                serde_json::from_slice(&bytes).map_err(|e| Self::backend(e.into()))
            })
            .collect()
    }

    async fn create_service(&self, record: ServiceRecord) -> Result<(), RegistryError> {
        if self
            .tree
            .contains_key(&record.id)
            .map_err(|e| Self::backend(e.into()))?
        {
            return Err(RegistryError::DuplicateService(record.id));
        }

        let bytes = serde_json::to_vec(&record).map_err(|e| Self::backend(e.into()))?;
        self.tree
            .insert(&record.id, bytes)
            .map_err(|e| Self::backend(e.into()))?;
        self.tree.flush_async().await.map_err(|e| Self::backend(e.into()))?;
        debug!(service_id = %record.id, "service created");
        Ok(())
    }

    async fn update_service(&self, record: ServiceRecord) -> Result<(), RegistryError> {
        let bytes = serde_json::to_vec(&record).map_err(|e| Self::backend(e.into()))?;
        self.tree
            .insert(&record.id, bytes)
            .map_err(|e| Self::backend(e.into()))?;
        self.tree.flush_async().await.map_err(|e| Self::backend(e.into()))?;
        Ok(())
    }

    async fn delete_service(&self, id: &str) -> Result<(), RegistryError> {
        self.tree.remove(id).map_err(|e| Self::backend(e.into()))?;
        self.tree.flush_async().await.map_err(|e| Self::backend(e.into()))?;
        debug!(service_id = id, "service deleted");
        Ok(())
    }
}

/// Exposures are not persisted; a fresh server has none until the operator
/// recreates them.
#[derive(Default)]
pub struct InMemoryExposureRegistry {
    exposures: Mutex<HashMap<String, ExposureRecord>>,
}

impl InMemoryExposureRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ExposureRegistry for InMemoryExposureRegistry {
    async fn get_exposure(&self, service_id: &str) -> Result<Option<ExposureRecord>, RegistryError> {
        Ok(self.exposures.lock().unwrap().get(service_id).cloned())
    }

    async fn list_exposures(&self) -> Result<Vec<ExposureRecord>, RegistryError> {
        Ok(self.exposures.lock().unwrap().values().cloned().collect())
    }

    async fn create_exposure(&self, record: ExposureRecord) -> Result<(), RegistryError> {
        self.exposures
            .lock()
            .unwrap()
            .insert(record.service_id.clone(), record);
        Ok(())
    }

    async fn delete_exposure(&self, service_id: &str) -> Result<(), RegistryError> {
        self.exposures.lock().unwrap().remove(service_id);
        Ok(())
    }
}
