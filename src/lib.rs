//! YardCore: spatial allocation and capacity tracking for container storage
//! areas (yards and warehouses).
//!
//! [`PlacementCoordinator`] is the entry point. It owns the area catalog and
//! the global container index, and talks to persistence and the container and
//! dock registries through the traits in [`repository`].

pub mod config;
pub mod engine;
pub mod error;
pub mod logger;
pub mod models;
pub mod repository;

pub use config::EngineConfig;
pub use engine::PlacementCoordinator;
pub use error::{EngineError, ErrorKind, ErrorResponse};
pub use models::{
    AreaBounds, AreaDescription, AreaType, CapacityReport, ContainerCode, ContainerPlacement,
    Coordinate, DockDistanceEntry, GridView, NewStorageArea, PlacementResult, PlacementState,
    StorageArea,
};
pub use repository::{
    ContainerInfo, ContainerRegistry, DockRegistry, InMemoryRepository, Repository,
    RepositoryError, StaticContainerRegistry, StaticDockRegistry,
};
