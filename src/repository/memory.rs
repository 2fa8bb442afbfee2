use super::{ContainerInfo, ContainerRegistry, DockRegistry, Repository, RepositoryError};
use crate::models::{ContainerCode, ContainerPlacement, StorageArea};
use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use uuid::Uuid;

/// Process-local repository.
///
/// Writes can be made to fail on demand, which is how outage handling is
/// exercised without a real backend.
#[derive(Default)]
pub struct InMemoryRepository {
    areas: DashMap<String, StorageArea>,
    placements: DashMap<Uuid, ContainerPlacement>,
    failing_writes: AtomicU32,
    unavailable: AtomicBool,
    writes: AtomicU64,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next `count` write calls fail with `Unavailable`.
    pub fn fail_next_writes(&self, count: u32) {
        self.failing_writes.store(count, Ordering::SeqCst);
    }

    /// Every call fails until switched back.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Successful writes so far.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn area(&self, id: &str) -> Option<StorageArea> {
        self.areas.get(id).map(|entry| entry.value().clone())
    }

    pub fn placement_count(&self) -> usize {
        self.placements.len()
    }

    fn check_read(&self) -> Result<(), RepositoryError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(RepositoryError::Unavailable("repository offline".to_string()));
        }
        Ok(())
    }

    fn check_write(&self) -> Result<(), RepositoryError> {
        self.check_read()?;
        let consumed = self
            .failing_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1));
        if consumed.is_ok() {
            return Err(RepositoryError::Unavailable("injected write failure".to_string()));
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn load_area(&self, id: &str) -> Result<Option<StorageArea>, RepositoryError> {
        self.check_read()?;
        Ok(self.area(id))
    }

    async fn save_area(&self, area: &StorageArea) -> Result<(), RepositoryError> {
        self.check_write()?;
        self.areas.insert(area.id.clone(), area.clone());
        Ok(())
    }

    async fn delete_area(&self, id: &str) -> Result<(), RepositoryError> {
        self.check_write()?;
        self.areas.remove(id);
        Ok(())
    }

    async fn load_placement(&self, id: Uuid) -> Result<Option<ContainerPlacement>, RepositoryError> {
        self.check_read()?;
        Ok(self.placements.get(&id).map(|entry| entry.value().clone()))
    }

    async fn save_placement(&self, placement: &ContainerPlacement) -> Result<(), RepositoryError> {
        self.check_write()?;
        self.placements.insert(placement.id, placement.clone());
        Ok(())
    }

    async fn delete_placement(&self, id: Uuid) -> Result<(), RepositoryError> {
        self.check_write()?;
        self.placements.remove(&id);
        Ok(())
    }

    async fn list_placements(&self, area_id: &str) -> Result<Vec<ContainerPlacement>, RepositoryError> {
        self.check_read()?;
        let mut placements: Vec<ContainerPlacement> = self
            .placements
            .iter()
            .filter(|entry| entry.area_id == area_id && entry.state.is_active())
            .map(|entry| entry.value().clone())
            .collect();
        placements.sort_by_key(|p| p.coord);
        Ok(placements)
    }
}

/// Container registry backed by a fixed table.
#[derive(Default)]
pub struct StaticContainerRegistry {
    containers: DashMap<ContainerCode, ContainerInfo>,
}

impl StaticContainerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, code: ContainerCode, teu: u32) {
        self.containers.insert(code, ContainerInfo { teu });
    }
}

#[async_trait]
impl ContainerRegistry for StaticContainerRegistry {
    async fn resolve(&self, code: &ContainerCode) -> Result<Option<ContainerInfo>, RepositoryError> {
        Ok(self.containers.get(code).map(|entry| *entry.value()))
    }
}

/// Dock registry backed by a fixed set of dock codes.
#[derive(Default)]
pub struct StaticDockRegistry {
    docks: DashSet<String>,
}

impl StaticDockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_docks<I, S>(codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let registry = Self::new();
        for code in codes {
            registry.docks.insert(code.into());
        }
        registry
    }

    pub fn register(&self, code: &str) {
        self.docks.insert(code.to_string());
    }
}

#[async_trait]
impl DockRegistry for StaticDockRegistry {
    async fn dock_exists(&self, dock_code: &str) -> Result<bool, RepositoryError> {
        Ok(self.docks.contains(dock_code))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Coordinate;

    fn placement(area: &str, raw: &str, coord: Coordinate) -> ContainerPlacement {
        ContainerPlacement::new(area, ContainerCode::parse(raw).unwrap(), coord, 1)
    }

    #[tokio::test]
    async fn test_injected_write_failures_are_consumed() {
        let repo = InMemoryRepository::new();
        let p = placement("a", "MSCU6639870", Coordinate::new(0, 0, 0));

        repo.fail_next_writes(2);
        assert!(repo.save_placement(&p).await.is_err());
        assert!(repo.save_placement(&p).await.is_err());
        assert!(repo.save_placement(&p).await.is_ok());
        assert_eq!(repo.write_count(), 1);
    }

    #[tokio::test]
    async fn test_list_placements_filters_by_area() {
        let repo = InMemoryRepository::new();
        repo.save_placement(&placement("a", "MSCU6639870", Coordinate::new(1, 0, 0))).await.unwrap();
        repo.save_placement(&placement("a", "CSQU3054383", Coordinate::new(0, 0, 0))).await.unwrap();
        repo.save_placement(&placement("b", "TGHU1234567", Coordinate::new(0, 0, 0))).await.unwrap();

        let listed = repo.list_placements("a").await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].coord, Coordinate::new(0, 0, 0));
    }

    #[tokio::test]
    async fn test_unavailable_blocks_reads() {
        let repo = InMemoryRepository::new();
        repo.set_unavailable(true);
        assert!(matches!(repo.load_area("a").await, Err(RepositoryError::Unavailable(_))));
        repo.set_unavailable(false);
        assert_eq!(repo.load_area("a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_static_registries() {
        let containers = StaticContainerRegistry::new();
        let code = ContainerCode::parse("MSCU6639870").unwrap();
        containers.register(code.clone(), 2);
        assert_eq!(containers.resolve(&code).await.unwrap(), Some(ContainerInfo { teu: 2 }));

        let docks = StaticDockRegistry::with_docks(["D1", "D2"]);
        assert!(docks.dock_exists("D1").await.unwrap());
        assert!(!docks.dock_exists("D3").await.unwrap());
    }
}
