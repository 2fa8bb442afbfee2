//! Collaborators consumed by the engine
//!
//! Persistence, the container registry and the dock registry are injected
//! into the coordinator as trait objects; the engine never reaches for
//! ambient state.

pub mod memory;

use crate::models::{ContainerCode, ContainerPlacement, StorageArea};
use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

pub use memory::{InMemoryRepository, StaticContainerRegistry, StaticDockRegistry};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    #[error("Storage backend unavailable: {0}")]
    Unavailable(String),
}

impl From<RepositoryError> for crate::error::EngineError {
    fn from(err: RepositoryError) -> Self {
        crate::error::EngineError::Persistence(err.to_string())
    }
}

#[async_trait]
pub trait Repository: Send + Sync {
    async fn load_area(&self, id: &str) -> Result<Option<StorageArea>, RepositoryError>;

    async fn save_area(&self, area: &StorageArea) -> Result<(), RepositoryError>;

    async fn delete_area(&self, id: &str) -> Result<(), RepositoryError>;

    async fn load_placement(&self, id: Uuid) -> Result<Option<ContainerPlacement>, RepositoryError>;

    async fn save_placement(&self, placement: &ContainerPlacement) -> Result<(), RepositoryError>;

    async fn delete_placement(&self, id: Uuid) -> Result<(), RepositoryError>;

    /// Active placements stored for an area.
    async fn list_placements(&self, area_id: &str) -> Result<Vec<ContainerPlacement>, RepositoryError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainerInfo {
    pub teu: u32,
}

#[async_trait]
pub trait ContainerRegistry: Send + Sync {
    /// `None` when the container is unknown.
    async fn resolve(&self, code: &ContainerCode) -> Result<Option<ContainerInfo>, RepositoryError>;
}

#[async_trait]
pub trait DockRegistry: Send + Sync {
    async fn dock_exists(&self, dock_code: &str) -> Result<bool, RepositoryError>;
}
