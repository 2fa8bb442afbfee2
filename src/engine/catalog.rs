//! Storage area catalog
//!
//! Holds one [`AreaCell`] per storage area. A cell keeps the descriptive
//! profile, the occupancy state (grid, ledger, placements) and the dock
//! distances behind separate locks so that configuration reads never wait
//! on placement traffic.

use crate::engine::capacity::CapacityLedger;
use crate::engine::dock_distance::DockDistanceRegistry;
use crate::engine::locks::AreaLocks;
use crate::engine::slot_grid::SlotGrid;
use crate::error::EngineError;
use crate::models::area::normalize_resource_code;
use crate::models::{
    AreaBounds, AreaDescription, AreaType, ContainerCode, ContainerPlacement, NewStorageArea,
    StorageArea,
};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct AreaProfile {
    pub name: String,
    pub description: String,
    pub area_type: AreaType,
    pub resource_codes: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Everything that must change together when a container enters, moves
/// within, or leaves an area.
#[derive(Debug)]
pub struct Occupancy {
    pub(crate) grid: SlotGrid,
    pub(crate) ledger: CapacityLedger,
    pub(crate) placements: HashMap<ContainerCode, ContainerPlacement>,
    pub(crate) retired: bool,
}

impl Occupancy {
    fn new(bounds: AreaBounds, max_capacity: u32) -> Self {
        Self::from_parts(
            SlotGrid::new(bounds),
            CapacityLedger::new(max_capacity),
            HashMap::new(),
        )
    }

    pub(crate) fn from_parts(
        grid: SlotGrid,
        ledger: CapacityLedger,
        placements: HashMap<ContainerCode, ContainerPlacement>,
    ) -> Self {
        Self {
            grid,
            ledger,
            placements,
            retired: false,
        }
    }
}

pub struct AreaCell {
    id: String,
    pub(crate) profile: RwLock<AreaProfile>,
    pub(crate) occupancy: Mutex<Occupancy>,
    pub(crate) docks: RwLock<DockDistanceRegistry>,
    /// Held from copying the area record until the repository has stored it.
    pub(crate) record_writes: Arc<tokio::sync::Mutex<()>>,
}

impl AreaCell {
    pub fn id(&self) -> &str {
        &self.id
    }
}

pub struct StorageAreaCatalog {
    areas: DashMap<String, Arc<AreaCell>>,
    locks: AreaLocks,
}

impl StorageAreaCatalog {
    pub fn new(lock_timeout: Duration) -> Self {
        Self {
            areas: DashMap::new(),
            locks: AreaLocks::new(lock_timeout),
        }
    }

    pub fn locks(&self) -> &AreaLocks {
        &self.locks
    }

    /// Registers a new, empty storage area under a fresh id.
    pub fn create(&self, request: NewStorageArea) -> Result<StorageArea, EngineError> {
        request.validate()?;
        let now = Utc::now();
        let resource_codes = request
            .resource_codes
            .iter()
            .map(|code| normalize_resource_code(code))
            .collect::<Result<BTreeSet<_>, _>>()?;

        let area = StorageArea {
            id: Uuid::new_v4().to_string(),
            name: request.name.trim().to_string(),
            description: request.description,
            area_type: request.area_type,
            bounds: request.bounds,
            max_capacity: request.max_capacity,
            current_capacity: 0,
            resource_codes,
            dock_distances: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        self.insert(&area)?;
        info!(area_id = %area.id, name = %area.name, bounds = %area.bounds, "Storage area created");
        Ok(area)
    }

    /// Registers an area record with empty occupancy.
    pub fn insert(&self, area: &StorageArea) -> Result<Arc<AreaCell>, EngineError> {
        self.insert_with_occupancy(area, Occupancy::new(area.bounds, area.max_capacity))
    }

    /// Publishes an area whose occupancy was rebuilt before registration, so
    /// no caller can observe it half-populated.
    pub(crate) fn insert_with_occupancy(
        &self,
        area: &StorageArea,
        occupancy: Occupancy,
    ) -> Result<Arc<AreaCell>, EngineError> {
        if area.max_capacity == 0 {
            return Err(EngineError::InvalidArea(
                "max capacity must be at least 1 TEU".to_string(),
            ));
        }
        let docks = DockDistanceRegistry::from_entries(&area.dock_distances)?;
        let cell = Arc::new(AreaCell {
            id: area.id.clone(),
            profile: RwLock::new(AreaProfile {
                name: area.name.clone(),
                description: area.description.clone(),
                area_type: area.area_type,
                resource_codes: area.resource_codes.clone(),
                created_at: area.created_at,
                updated_at: area.updated_at,
            }),
            occupancy: Mutex::new(occupancy),
            docks: RwLock::new(docks),
            record_writes: Arc::new(tokio::sync::Mutex::new(())),
        });

        match self.areas.entry(area.id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(EngineError::AreaAlreadyExists(area.id.clone()))
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(Arc::clone(&cell));
                Ok(cell)
            }
        }
    }

    pub fn cell(&self, area_id: &str) -> Result<Arc<AreaCell>, EngineError> {
        self.areas
            .get(area_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| EngineError::AreaNotFound(area_id.to_string()))
    }

    pub fn contains(&self, area_id: &str) -> bool {
        self.areas.contains_key(area_id)
    }

    pub fn area_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.areas.iter().map(|entry| entry.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn describe(&self, area_id: &str) -> Result<AreaDescription, EngineError> {
        let cell = self.cell(area_id)?;
        let bounds = self.locks.occupancy(&cell)?.grid.bounds();
        let profile = self.locks.profile(&cell)?;
        Ok(AreaDescription {
            id: cell.id().to_string(),
            name: profile.name.clone(),
            description: profile.description.clone(),
            area_type: profile.area_type,
            bounds,
            resource_codes: profile.resource_codes.clone(),
        })
    }

    /// Changes the grid dimensions. Returns the previous bounds.
    pub fn resize(&self, area_id: &str, bounds: AreaBounds) -> Result<AreaBounds, EngineError> {
        let cell = self.cell(area_id)?;
        let mut occupancy = self.locks.occupancy(&cell)?;
        let previous = occupancy.grid.bounds();
        occupancy
            .grid
            .set_bounds(bounds)
            .map_err(|orphaned| EngineError::ResizeConflict {
                area_id: area_id.to_string(),
                bounds,
                orphaned: orphaned.len(),
            })?;
        drop(occupancy);

        self.touch(&cell)?;
        info!(area_id = %area_id, from = %previous, to = %bounds, "Storage area resized");
        Ok(previous)
    }

    /// Returns the previous maximum.
    pub fn set_max_capacity(&self, area_id: &str, max: u32) -> Result<u32, EngineError> {
        if max == 0 {
            return Err(EngineError::InvalidArea(
                "max capacity must be at least 1 TEU".to_string(),
            ));
        }
        let cell = self.cell(area_id)?;
        let mut occupancy = self.locks.occupancy(&cell)?;
        let previous = occupancy.ledger.max();
        occupancy.ledger.set_max(max)?;
        drop(occupancy);

        self.touch(&cell)?;
        Ok(previous)
    }

    pub fn rename(&self, area_id: &str, name: &str) -> Result<(), EngineError> {
        if name.trim().is_empty() {
            return Err(EngineError::InvalidArea("name is required".to_string()));
        }
        let cell = self.cell(area_id)?;
        let mut profile = self.locks.profile_mut(&cell)?;
        profile.name = name.trim().to_string();
        profile.updated_at = Utc::now();
        Ok(())
    }

    pub fn set_description(&self, area_id: &str, description: &str) -> Result<(), EngineError> {
        let cell = self.cell(area_id)?;
        let mut profile = self.locks.profile_mut(&cell)?;
        profile.description = description.to_string();
        profile.updated_at = Utc::now();
        Ok(())
    }

    /// Returns false if the resource was already associated.
    pub fn add_resource(&self, area_id: &str, code: &str) -> Result<bool, EngineError> {
        let code = normalize_resource_code(code)?;
        let cell = self.cell(area_id)?;
        let mut profile = self.locks.profile_mut(&cell)?;
        let added = profile.resource_codes.insert(code);
        if added {
            profile.updated_at = Utc::now();
        }
        Ok(added)
    }

    /// Returns false if the resource was not associated.
    pub fn remove_resource(&self, area_id: &str, code: &str) -> Result<bool, EngineError> {
        let cell = self.cell(area_id)?;
        let mut profile = self.locks.profile_mut(&cell)?;
        let removed = profile.resource_codes.remove(code.trim());
        if removed {
            profile.updated_at = Utc::now();
        }
        Ok(removed)
    }

    /// Drops an area that holds no placements and returns its final record.
    pub fn remove(&self, area_id: &str) -> Result<StorageArea, EngineError> {
        let cell = self.cell(area_id)?;
        let record = {
            let mut occupancy = self.locks.occupancy(&cell)?;
            if !occupancy.placements.is_empty() {
                return Err(EngineError::AreaNotEmpty {
                    area_id: area_id.to_string(),
                    occupied: occupancy.placements.len(),
                });
            }
            let record = self.assemble(&cell, &occupancy)?;
            occupancy.retired = true;
            self.areas.remove(area_id);
            record
        };
        info!(area_id = %area_id, "Storage area removed");
        Ok(record)
    }

    /// Restores a removed area that was retired but could not be deleted
    /// from the repository.
    pub(crate) fn reinstate(&self, cell: Arc<AreaCell>) -> Result<(), EngineError> {
        cell.occupancy.lock().retired = false;
        match self.areas.entry(cell.id().to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(EngineError::AreaAlreadyExists(cell.id().to_string()))
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(cell);
                Ok(())
            }
        }
    }

    /// Current persisted shape of an area.
    pub fn record(&self, area_id: &str) -> Result<StorageArea, EngineError> {
        let cell = self.cell(area_id)?;
        let occupancy = self.locks.occupancy(&cell)?;
        self.assemble(&cell, &occupancy)
    }

    /// Lock order: occupancy (held by caller), then profile, then docks.
    fn assemble(&self, cell: &AreaCell, occupancy: &Occupancy) -> Result<StorageArea, EngineError> {
        let profile = self.locks.profile(cell)?;
        let docks = self.locks.docks(cell)?;
        Ok(StorageArea {
            id: cell.id().to_string(),
            name: profile.name.clone(),
            description: profile.description.clone(),
            area_type: profile.area_type,
            bounds: occupancy.grid.bounds(),
            max_capacity: occupancy.ledger.max(),
            current_capacity: occupancy.ledger.current(),
            resource_codes: profile.resource_codes.clone(),
            dock_distances: docks.entries(),
            created_at: profile.created_at,
            updated_at: profile.updated_at,
        })
    }

    fn touch(&self, cell: &AreaCell) -> Result<(), EngineError> {
        self.locks.profile_mut(cell)?.updated_at = Utc::now();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Coordinate;

    fn catalog() -> StorageAreaCatalog {
        StorageAreaCatalog::new(Duration::from_millis(50))
    }

    fn yard(catalog: &StorageAreaCatalog) -> StorageArea {
        let request = NewStorageArea::new("Yard A", AreaType::Yard, AreaBounds::new(2, 2, 1).unwrap(), 4)
            .with_resource(" RTG-01 ")
            .with_resource("RTG-01");
        catalog.create(request).unwrap()
    }

    #[test]
    fn test_create_and_describe() {
        let catalog = catalog();
        let area = yard(&catalog);

        let described = catalog.describe(&area.id).unwrap();
        assert_eq!(described.name, "Yard A");
        assert_eq!(described.area_type, AreaType::Yard);
        assert_eq!(described.bounds, AreaBounds::new(2, 2, 1).unwrap());
        assert_eq!(described.resource_codes.len(), 1, "Resource codes are a set");
        assert!(described.resource_codes.contains("RTG-01"));
    }

    #[test]
    fn test_describe_unknown_area() {
        let catalog = catalog();
        assert_eq!(
            catalog.describe("missing").unwrap_err(),
            EngineError::AreaNotFound("missing".to_string())
        );
    }

    #[test]
    fn test_insert_duplicate_id() {
        let catalog = catalog();
        let area = yard(&catalog);
        assert!(matches!(catalog.insert(&area), Err(EngineError::AreaAlreadyExists(_))));
    }

    #[test]
    fn test_resize_grow_and_shrink_empty() {
        let catalog = catalog();
        let area = yard(&catalog);

        let previous = catalog.resize(&area.id, AreaBounds::new(4, 4, 2).unwrap()).unwrap();
        assert_eq!(previous, AreaBounds::new(2, 2, 1).unwrap());
        catalog.resize(&area.id, AreaBounds::new(1, 1, 1).unwrap()).unwrap();
        assert_eq!(catalog.describe(&area.id).unwrap().bounds.slot_count(), 1);
    }

    #[test]
    fn test_resize_conflict_when_slot_would_be_orphaned() {
        let catalog = catalog();
        let area = yard(&catalog);
        let cell = catalog.cell(&area.id).unwrap();
        cell.occupancy
            .lock()
            .grid
            .place(Coordinate::new(1, 1, 0), ContainerCode::parse("MSCU6639870").unwrap())
            .unwrap();

        let err = catalog.resize(&area.id, AreaBounds::new(1, 2, 1).unwrap()).unwrap_err();
        assert!(matches!(err, EngineError::ResizeConflict { orphaned: 1, .. }));
        assert_eq!(catalog.describe(&area.id).unwrap().bounds, AreaBounds::new(2, 2, 1).unwrap());
    }

    #[test]
    fn test_resources_add_remove() {
        let catalog = catalog();
        let area = yard(&catalog);
        assert!(catalog.add_resource(&area.id, "RS-02").unwrap());
        assert!(!catalog.add_resource(&area.id, "RS-02").unwrap());
        assert!(catalog.remove_resource(&area.id, "RTG-01").unwrap());
        assert!(!catalog.remove_resource(&area.id, "RTG-01").unwrap());
        assert!(catalog.add_resource(&area.id, "").is_err());

        let codes = catalog.describe(&area.id).unwrap().resource_codes;
        assert_eq!(codes.into_iter().collect::<Vec<_>>(), vec!["RS-02".to_string()]);
    }

    #[test]
    fn test_remove_empty_area_retires_cell() {
        let catalog = catalog();
        let area = yard(&catalog);
        let cell = catalog.cell(&area.id).unwrap();

        let record = catalog.remove(&area.id).unwrap();
        assert_eq!(record.id, area.id);
        assert!(!catalog.contains(&area.id));
        assert!(matches!(
            catalog.locks().occupancy(&cell),
            Err(EngineError::AreaNotFound(_))
        ));
    }

    #[test]
    fn test_record_reflects_configuration() {
        let catalog = catalog();
        let area = yard(&catalog);
        catalog.rename(&area.id, "Yard North").unwrap();
        catalog.set_description(&area.id, "Reefer stacks").unwrap();
        catalog.set_max_capacity(&area.id, 8).unwrap();

        let record = catalog.record(&area.id).unwrap();
        assert_eq!(record.name, "Yard North");
        assert_eq!(record.description, "Reefer stacks");
        assert_eq!(record.max_capacity, 8);
        assert_eq!(record.current_capacity, 0);
        assert!(catalog.rename(&area.id, " ").is_err());
    }
}
