//! Placement coordinator
//!
//! The only component that changes a [`SlotGrid`] and its [`CapacityLedger`]
//! together. Every mutation is a synchronous critical section under the area
//! lock. Repository writes run after the lock is released; a write that still
//! fails after retries is compensated in memory before `Persistence` is
//! returned, so a retryable error always means nothing was committed.
//!
//! Lock order: area occupancy, then the container index shard. Area record
//! writes for one area are additionally serialized by an async gate that is
//! taken before any synchronous lock and held until the record is stored.

use crate::config::EngineConfig;
use crate::engine::capacity::CapacityLedger;
use crate::engine::catalog::{Occupancy, StorageAreaCatalog};
use crate::engine::slot_grid::SlotGrid;
use crate::error::EngineError;
use crate::models::{
    AreaBounds, AreaDescription, CapacityReport, ContainerCode, ContainerPlacement,
    Coordinate, DockDistanceEntry, GridView, NewStorageArea, PlacementResult, PlacementState,
    StorageArea,
};
use crate::repository::{ContainerRegistry, DockRegistry, Repository, RepositoryError};
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, error, info, warn};

/// Where a container currently sits.
#[derive(Debug, Clone, PartialEq, Eq)]
struct IndexEntry {
    area_id: String,
    coord: Coordinate,
}

pub struct PlacementCoordinator {
    catalog: StorageAreaCatalog,
    index: DashMap<ContainerCode, IndexEntry>,
    repository: Arc<dyn Repository>,
    containers: Arc<dyn ContainerRegistry>,
    docks: Arc<dyn DockRegistry>,
    config: EngineConfig,
}

impl PlacementCoordinator {
    pub fn new(
        config: EngineConfig,
        repository: Arc<dyn Repository>,
        containers: Arc<dyn ContainerRegistry>,
        docks: Arc<dyn DockRegistry>,
    ) -> Self {
        Self {
            catalog: StorageAreaCatalog::new(config.lock_timeout()),
            index: DashMap::new(),
            repository,
            containers,
            docks,
            config,
        }
    }

    pub fn catalog(&self) -> &StorageAreaCatalog {
        &self.catalog
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ===== Placement =====

    /// Places `container` at `coord`, charging `teu` against the area.
    pub async fn place(
        &self,
        area_id: &str,
        container: &ContainerCode,
        coord: Coordinate,
        teu: u32,
    ) -> Result<PlacementResult, EngineError> {
        let placement = self.commit_place(area_id, container, coord, teu)?;

        if let Err(err) = self
            .with_retry("save_placement", || self.repository.save_placement(&placement))
            .await
        {
            self.guarded("place", container, self.rollback_place(&placement))?;
            return Err(err);
        }

        self.refresh_area_record(area_id).await;
        info!(
            area_id = %area_id,
            container = %container,
            coord = %coord,
            teu,
            "Container placed"
        );
        Ok(PlacementResult::from(&placement))
    }

    /// Like [`place`](Self::place), with the weight taken from the container registry.
    pub async fn place_registered(
        &self,
        area_id: &str,
        container: &ContainerCode,
        coord: Coordinate,
    ) -> Result<PlacementResult, EngineError> {
        let info = self
            .with_retry("resolve_container", || self.containers.resolve(container))
            .await?
            .ok_or_else(|| EngineError::ContainerNotFound(container.to_string()))?;
        self.place(area_id, container, coord, info.teu).await
    }

    /// Takes a container out of the area. Returns the final placement record.
    pub async fn remove(
        &self,
        area_id: &str,
        container: &ContainerCode,
    ) -> Result<ContainerPlacement, EngineError> {
        let (before, removed) = self.commit_remove(area_id, container)?;

        if let Err(err) = self
            .with_retry("delete_placement", || self.repository.delete_placement(before.id))
            .await
        {
            self.guarded("remove", container, self.rollback_remove(&before))?;
            return Err(err);
        }

        self.refresh_area_record(area_id).await;
        info!(
            area_id = %area_id,
            container = %container,
            coord = %removed.coord,
            teu = removed.teu,
            "Container removed"
        );
        Ok(removed)
    }

    /// Moves a container to another slot of the same area. The ledger is untouched.
    pub async fn move_container(
        &self,
        area_id: &str,
        container: &ContainerCode,
        to: Coordinate,
    ) -> Result<PlacementResult, EngineError> {
        let (before, after) = self.commit_move(area_id, container, to)?;
        if before.coord == after.coord {
            debug!(area_id = %area_id, container = %container, "Move to current slot ignored");
            return Ok(PlacementResult::from(&after));
        }

        if let Err(err) = self
            .with_retry("save_placement", || self.repository.save_placement(&after))
            .await
        {
            self.guarded("move", container, self.rollback_move(&before, &after))?;
            return Err(err);
        }

        info!(
            area_id = %area_id,
            container = %container,
            from = %before.coord,
            to = %after.coord,
            "Container moved"
        );
        Ok(PlacementResult::from(&after))
    }

    /// Moves a container into another area. Capacity is charged to the
    /// destination and released from the source in the same critical section.
    pub async fn transfer(
        &self,
        from_area: &str,
        to_area: &str,
        container: &ContainerCode,
        coord: Coordinate,
    ) -> Result<PlacementResult, EngineError> {
        if from_area == to_area {
            return self.move_container(from_area, container, coord).await;
        }

        let (before, after) = self.commit_transfer(from_area, to_area, container, coord)?;

        if let Err(err) = self
            .with_retry("save_placement", || self.repository.save_placement(&after))
            .await
        {
            self.guarded("transfer", container, self.rollback_transfer(&before, &after))?;
            return Err(err);
        }

        self.refresh_area_record(from_area).await;
        self.refresh_area_record(to_area).await;
        info!(
            container = %container,
            from_area = %from_area,
            to_area = %to_area,
            coord = %coord,
            teu = after.teu,
            "Container transferred"
        );
        Ok(PlacementResult::from(&after))
    }

    // ===== Queries =====

    pub fn container_at(&self, area_id: &str, coord: Coordinate) -> Result<ContainerCode, EngineError> {
        let cell = self.catalog.cell(area_id)?;
        let occupancy = self.catalog.locks().occupancy(&cell)?;
        occupancy.grid.bounds().check(coord)?;
        occupancy
            .grid
            .at(coord)
            .cloned()
            .ok_or(EngineError::SlotEmpty(coord))
    }

    /// Consistent view of every occupied slot, taken under the area lock.
    pub fn snapshot_grid(&self, area_id: &str) -> Result<GridView, EngineError> {
        let cell = self.catalog.cell(area_id)?;
        let (bounds, occupied) = {
            let occupancy = self.catalog.locks().occupancy(&cell)?;
            (occupancy.grid.bounds(), occupancy.grid.snapshot())
        };
        Ok(GridView::new(bounds, occupied))
    }

    /// Area and coordinate of a container, wherever it is stored.
    pub fn locate(&self, container: &ContainerCode) -> Option<(String, Coordinate)> {
        self.index
            .get(container)
            .map(|entry| (entry.area_id.clone(), entry.coord))
    }

    pub fn placement(
        &self,
        area_id: &str,
        container: &ContainerCode,
    ) -> Result<ContainerPlacement, EngineError> {
        let cell = self.catalog.cell(area_id)?;
        let occupancy = self.catalog.locks().occupancy(&cell)?;
        occupancy
            .placements
            .get(container)
            .cloned()
            .ok_or_else(|| EngineError::NotPlaced(container.clone()))
    }

    pub fn capacity(&self, area_id: &str) -> Result<CapacityReport, EngineError> {
        let cell = self.catalog.cell(area_id)?;
        let occupancy = self.catalog.locks().occupancy(&cell)?;
        Ok(CapacityReport {
            area_id: area_id.to_string(),
            current: occupancy.ledger.current(),
            max: occupancy.ledger.max(),
            occupied_slots: occupancy.grid.len(),
            total_slots: occupancy.grid.bounds().slot_count(),
        })
    }

    // ===== Area configuration =====

    pub async fn create_area(&self, request: NewStorageArea) -> Result<StorageArea, EngineError> {
        let area = self.catalog.create(request)?;
        let _gate = self.record_gate(&area.id).await?;
        let saved = match self.catalog.record(&area.id) {
            Ok(record) => {
                self.with_retry("save_area", || self.repository.save_area(&record))
                    .await
            }
            Err(err) => Err(err),
        };
        if let Err(err) = saved {
            if let Err(cleanup) = self.catalog.remove(&area.id) {
                error!(area_id = %area.id, error = %cleanup, "Failed to discard unsaved storage area");
            }
            return Err(err);
        }
        Ok(area)
    }

    pub fn describe(&self, area_id: &str) -> Result<AreaDescription, EngineError> {
        self.catalog.describe(area_id)
    }

    /// Returns the previous bounds.
    pub async fn resize_area(&self, area_id: &str, bounds: AreaBounds) -> Result<AreaBounds, EngineError> {
        let _gate = self.record_gate(area_id).await?;
        let previous = self.catalog.resize(area_id, bounds)?;
        self.save_area_or_revert(area_id, || {
            self.catalog.resize(area_id, previous).map(|_| ())
        })
        .await?;
        Ok(previous)
    }

    /// Returns the previous maximum.
    pub async fn set_max_capacity(&self, area_id: &str, max: u32) -> Result<u32, EngineError> {
        let _gate = self.record_gate(area_id).await?;
        let previous = self.catalog.set_max_capacity(area_id, max)?;
        self.save_area_or_revert(area_id, || {
            self.catalog.set_max_capacity(area_id, previous).map(|_| ())
        })
        .await?;
        info!(area_id = %area_id, from = previous, to = max, "Max capacity changed");
        Ok(previous)
    }

    pub async fn rename_area(&self, area_id: &str, name: &str) -> Result<(), EngineError> {
        let _gate = self.record_gate(area_id).await?;
        let previous = self.catalog.describe(area_id)?.name;
        self.catalog.rename(area_id, name)?;
        self.save_area_or_revert(area_id, || self.catalog.rename(area_id, &previous))
            .await
    }

    pub async fn set_area_description(&self, area_id: &str, description: &str) -> Result<(), EngineError> {
        let _gate = self.record_gate(area_id).await?;
        let previous = self.catalog.describe(area_id)?.description;
        self.catalog.set_description(area_id, description)?;
        self.save_area_or_revert(area_id, || self.catalog.set_description(area_id, &previous))
            .await
    }

    /// Returns false if the resource was already associated.
    pub async fn add_resource(&self, area_id: &str, code: &str) -> Result<bool, EngineError> {
        let _gate = self.record_gate(area_id).await?;
        let added = self.catalog.add_resource(area_id, code)?;
        if added {
            self.save_area_or_revert(area_id, || {
                self.catalog.remove_resource(area_id, code).map(|_| ())
            })
            .await?;
        }
        Ok(added)
    }

    /// Returns false if the resource was not associated.
    pub async fn remove_resource(&self, area_id: &str, code: &str) -> Result<bool, EngineError> {
        let _gate = self.record_gate(area_id).await?;
        let removed = self.catalog.remove_resource(area_id, code)?;
        if removed {
            self.save_area_or_revert(area_id, || {
                self.catalog.add_resource(area_id, code).map(|_| ())
            })
            .await?;
        }
        Ok(removed)
    }

    /// Deletes an empty area. Fails `AreaNotEmpty` while placements remain.
    pub async fn delete_area(&self, area_id: &str) -> Result<StorageArea, EngineError> {
        let _gate = self.record_gate(area_id).await?;
        let cell = self.catalog.cell(area_id)?;
        let record = self.catalog.remove(area_id)?;

        if let Err(err) = self
            .with_retry("delete_area", || self.repository.delete_area(area_id))
            .await
        {
            if let Err(reinstate) = self.catalog.reinstate(cell) {
                error!(area_id = %area_id, error = %reinstate, "Failed to reinstate storage area");
                return Err(EngineError::InternalConsistency(format!(
                    "area {} was removed in memory but not from the repository",
                    area_id
                )));
            }
            return Err(err);
        }
        Ok(record)
    }

    // ===== Dock distances =====

    /// Records the distance to a known dock. Returns the previous distance.
    pub async fn set_dock_distance(
        &self,
        area_id: &str,
        dock_code: &str,
        distance: f64,
    ) -> Result<Option<f64>, EngineError> {
        if !distance.is_finite() || distance < 0.0 {
            return Err(EngineError::InvalidDistance(distance));
        }
        let dock_code = dock_code.trim();
        if dock_code.is_empty() {
            return Err(EngineError::InvalidArea("dock code must not be empty".to_string()));
        }
        let cell = self.catalog.cell(area_id)?;
        let known = self
            .with_retry("dock_exists", || self.docks.dock_exists(dock_code))
            .await?;
        if !known {
            return Err(EngineError::DockNotFound(dock_code.to_string()));
        }

        let _gate = self.record_gate(area_id).await?;
        let previous = self.catalog.locks().docks_mut(&cell)?.upsert(dock_code, distance)?;
        self.save_area_or_revert(area_id, || {
            let mut docks = self.catalog.locks().docks_mut(&cell)?;
            match previous {
                Some(value) => docks.upsert(dock_code, value).map(|_| ()),
                None => docks.remove(dock_code).map(|_| ()),
            }
        })
        .await?;

        debug!(area_id = %area_id, dock_code = %dock_code, distance, "Dock distance recorded");
        Ok(previous)
    }

    /// Returns the removed distance.
    pub async fn remove_dock_distance(&self, area_id: &str, dock_code: &str) -> Result<f64, EngineError> {
        let _gate = self.record_gate(area_id).await?;
        let cell = self.catalog.cell(area_id)?;
        let removed = self.catalog.locks().docks_mut(&cell)?.remove(dock_code)?;
        self.save_area_or_revert(area_id, || {
            self.catalog
                .locks()
                .docks_mut(&cell)?
                .upsert(dock_code, removed)
                .map(|_| ())
        })
        .await?;
        Ok(removed)
    }

    pub fn distance_to(&self, area_id: &str, dock_code: &str) -> Result<f64, EngineError> {
        let cell = self.catalog.cell(area_id)?;
        let docks = self.catalog.locks().docks(&cell)?;
        docks.distance_to(dock_code)
    }

    /// The `k` closest docks, nearest first.
    pub fn nearest_docks(&self, area_id: &str, k: usize) -> Result<Vec<DockDistanceEntry>, EngineError> {
        let cell = self.catalog.cell(area_id)?;
        let docks = self.catalog.locks().docks(&cell)?;
        Ok(docks.nearest(k))
    }

    pub fn dock_distances(&self, area_id: &str) -> Result<Vec<DockDistanceEntry>, EngineError> {
        let cell = self.catalog.cell(area_id)?;
        let docks = self.catalog.locks().docks(&cell)?;
        Ok(docks.entries())
    }

    // ===== Recovery =====

    /// Loads an area and its placements from the repository.
    ///
    /// Every placement is re-checked against bounds, slot uniqueness and the
    /// capacity maximum; the current capacity is recomputed from placements
    /// rather than trusted from the stored record.
    pub async fn restore_area(&self, area_id: &str) -> Result<CapacityReport, EngineError> {
        if self.catalog.contains(area_id) {
            return Err(EngineError::AreaAlreadyExists(area_id.to_string()));
        }
        let area = self
            .with_retry("load_area", || self.repository.load_area(area_id))
            .await?
            .ok_or_else(|| EngineError::AreaNotFound(area_id.to_string()))?;
        let placements = self
            .with_retry("list_placements", || self.repository.list_placements(area_id))
            .await?;

        let restored = placements.len();
        self.commit_restore(&area, placements)?;
        let report = self.capacity(area_id)?;

        if report.current != area.current_capacity {
            warn!(
                area_id = %area_id,
                stored = area.current_capacity,
                recomputed = report.current,
                "Stored capacity disagreed with placements, using recomputed value"
            );
        }
        info!(area_id = %area_id, placements = restored, current = report.current, "Storage area restored");
        Ok(report)
    }

    /// Cross-checks grid, ledger, placements and the container index for one area.
    pub fn verify(&self, area_id: &str) -> Result<(), EngineError> {
        let cell = self.catalog.cell(area_id)?;
        let occupancy = self.catalog.locks().occupancy(&cell)?;

        let violation = |detail: String| {
            error!(area_id = %area_id, detail = %detail, "Consistency check failed");
            EngineError::InternalConsistency(format!("area {}: {}", area_id, detail))
        };

        if !occupancy.grid.is_consistent() {
            return Err(violation("grid forward and reverse indexes disagree".to_string()));
        }
        if occupancy.grid.len() != occupancy.placements.len() {
            return Err(violation(format!(
                "{} occupied slots but {} placements",
                occupancy.grid.len(),
                occupancy.placements.len()
            )));
        }
        let total: u64 = occupancy.placements.values().map(|p| u64::from(p.teu)).sum();
        if total != u64::from(occupancy.ledger.current()) {
            return Err(violation(format!(
                "placements hold {} TEU but ledger records {}",
                total,
                occupancy.ledger.current()
            )));
        }
        if occupancy.ledger.current() > occupancy.ledger.max() {
            return Err(violation(format!(
                "ledger {} exceeds max {}",
                occupancy.ledger.current(),
                occupancy.ledger.max()
            )));
        }
        for (container, placement) in &occupancy.placements {
            if occupancy.grid.locate(container) != Some(placement.coord) {
                return Err(violation(format!("{} is not at {} in the grid", container, placement.coord)));
            }
            let indexed = self.index.get(container).map(|entry| entry.value().clone());
            let expected = IndexEntry {
                area_id: area_id.to_string(),
                coord: placement.coord,
            };
            if indexed.as_ref() != Some(&expected) {
                return Err(violation(format!("{} has a stale container index entry", container)));
            }
        }
        Ok(())
    }

    // ===== Critical sections =====

    fn commit_place(
        &self,
        area_id: &str,
        container: &ContainerCode,
        coord: Coordinate,
        teu: u32,
    ) -> Result<ContainerPlacement, EngineError> {
        if teu == 0 {
            return Err(EngineError::InvalidWeight(teu));
        }
        let cell = self.catalog.cell(area_id)?;
        let mut guard = self.catalog.locks().occupancy(&cell)?;
        let occupancy = &mut *guard;

        let claim = match self.index.entry(container.clone()) {
            Entry::Occupied(held) => {
                let held = held.get();
                return Err(EngineError::ContainerAlreadyPlaced {
                    container: container.clone(),
                    area_id: held.area_id.clone(),
                    coord: held.coord,
                });
            }
            Entry::Vacant(claim) => claim,
        };

        occupancy.grid.bounds().check(coord)?;
        occupancy.ledger.reserve(teu)?;
        if let Err(err) = occupancy.grid.place(coord, container.clone()) {
            occupancy.ledger.release(teu)?;
            return Err(err);
        }

        let placement = ContainerPlacement::new(area_id, container.clone(), coord, teu);
        occupancy.placements.insert(container.clone(), placement.clone());
        claim.insert(IndexEntry {
            area_id: area_id.to_string(),
            coord,
        });
        Ok(placement)
    }

    /// Returns the placement as it was and the final `Removed` record.
    fn commit_remove(
        &self,
        area_id: &str,
        container: &ContainerCode,
    ) -> Result<(ContainerPlacement, ContainerPlacement), EngineError> {
        let cell = self.catalog.cell(area_id)?;
        let mut guard = self.catalog.locks().occupancy(&cell)?;
        let occupancy = &mut *guard;

        let before = occupancy
            .placements
            .get(container)
            .filter(|p| p.state.can_transition_to(PlacementState::Removed))
            .cloned()
            .ok_or_else(|| EngineError::NotPlaced(container.clone()))?;

        occupancy.grid.vacate(before.coord)?;
        occupancy.placements.remove(container);
        self.index.remove(container);
        occupancy.ledger.release(before.teu)?;

        let mut removed = before.clone();
        removed.state = PlacementState::Removed;
        removed.updated_at = Utc::now();
        Ok((before, removed))
    }

    fn commit_move(
        &self,
        area_id: &str,
        container: &ContainerCode,
        to: Coordinate,
    ) -> Result<(ContainerPlacement, ContainerPlacement), EngineError> {
        let cell = self.catalog.cell(area_id)?;
        let mut guard = self.catalog.locks().occupancy(&cell)?;
        let occupancy = &mut *guard;

        let before = occupancy
            .placements
            .get(container)
            .filter(|p| p.state.can_transition_to(PlacementState::Moved))
            .cloned()
            .ok_or_else(|| EngineError::NotPlaced(container.clone()))?;

        occupancy.grid.bounds().check(to)?;
        if before.coord == to {
            return Ok((before.clone(), before));
        }
        occupancy.grid.relocate(container, to)?;

        let mut after = before.clone();
        after.coord = to;
        after.state = PlacementState::Moved;
        after.updated_at = Utc::now();
        occupancy.placements.insert(container.clone(), after.clone());
        if let Some(mut indexed) = self.index.get_mut(container) {
            indexed.coord = to;
        }
        Ok((before, after))
    }

    fn commit_transfer(
        &self,
        from_area: &str,
        to_area: &str,
        container: &ContainerCode,
        coord: Coordinate,
    ) -> Result<(ContainerPlacement, ContainerPlacement), EngineError> {
        let source_cell = self.catalog.cell(from_area)?;
        let target_cell = self.catalog.cell(to_area)?;
        let (mut source, mut target) = self
            .catalog
            .locks()
            .occupancy_pair(&source_cell, &target_cell)?;

        let before = source
            .placements
            .get(container)
            .filter(|p| p.state.can_transition_to(PlacementState::Moved))
            .cloned()
            .ok_or_else(|| EngineError::NotPlaced(container.clone()))?;

        let after = self.shift(&mut source, &mut target, &before, to_area, coord)?;
        Ok((before, after))
    }

    /// Moves `placement` from `source` into `target` at `coord`. The
    /// destination is fully validated and charged before the source is touched.
    fn shift(
        &self,
        source: &mut Occupancy,
        target: &mut Occupancy,
        placement: &ContainerPlacement,
        target_area: &str,
        coord: Coordinate,
    ) -> Result<ContainerPlacement, EngineError> {
        let container = &placement.container;
        target.grid.bounds().check(coord)?;
        if let Some(occupant) = target.grid.at(coord) {
            return Err(EngineError::SlotOccupied {
                coord,
                occupant: occupant.clone(),
            });
        }
        target.ledger.reserve(placement.teu)?;
        if let Err(err) = target.grid.place(coord, container.clone()) {
            target.ledger.release(placement.teu)?;
            return Err(err);
        }

        source.grid.vacate(placement.coord)?;
        source.placements.remove(container);

        let mut moved = placement.clone();
        moved.area_id = target_area.to_string();
        moved.coord = coord;
        moved.state = PlacementState::Moved;
        moved.updated_at = Utc::now();
        target.placements.insert(container.clone(), moved.clone());
        self.index.insert(
            container.clone(),
            IndexEntry {
                area_id: target_area.to_string(),
                coord,
            },
        );

        source.ledger.release(placement.teu)?;
        Ok(moved)
    }

    fn commit_restore(
        &self,
        area: &StorageArea,
        placements: Vec<ContainerPlacement>,
    ) -> Result<(), EngineError> {
        let mut grid = SlotGrid::new(area.bounds);
        let mut ledger = CapacityLedger::new(area.max_capacity);
        let mut by_container = HashMap::with_capacity(placements.len());

        for placement in placements {
            if placement.area_id != area.id || !placement.state.is_active() {
                return Err(EngineError::InternalConsistency(format!(
                    "stored placement {} is not active in area {}",
                    placement.id, area.id
                )));
            }
            if placement.teu == 0 {
                return Err(EngineError::InvalidWeight(placement.teu));
            }
            ledger.reserve(placement.teu)?;
            grid.place(placement.coord, placement.container.clone())?;
            by_container.insert(placement.container.clone(), placement);
        }

        let mut claimed: Vec<ContainerCode> = Vec::with_capacity(by_container.len());
        for (container, placement) in &by_container {
            match self.index.entry(container.clone()) {
                Entry::Occupied(held) => {
                    let err = EngineError::ContainerAlreadyPlaced {
                        container: container.clone(),
                        area_id: held.get().area_id.clone(),
                        coord: held.get().coord,
                    };
                    drop(held);
                    self.release_claims(&claimed);
                    return Err(err);
                }
                Entry::Vacant(slot) => {
                    slot.insert(IndexEntry {
                        area_id: area.id.clone(),
                        coord: placement.coord,
                    });
                    claimed.push(container.clone());
                }
            }
        }

        let occupancy = Occupancy::from_parts(grid, ledger, by_container);
        if let Err(err) = self.catalog.insert_with_occupancy(area, occupancy) {
            self.release_claims(&claimed);
            return Err(err);
        }
        Ok(())
    }

    fn release_claims(&self, claimed: &[ContainerCode]) {
        for container in claimed {
            self.index.remove(container);
        }
    }

    // ===== Compensation =====
    //
    // Rollbacks take the unbounded locks: the change is already visible in
    // memory and must be undone even if the area is under load.

    fn rollback_place(&self, placement: &ContainerPlacement) -> Result<(), EngineError> {
        let cell = self.catalog.cell(&placement.area_id)?;
        let mut guard = self.catalog.locks().occupancy_unbounded(&cell)?;
        let occupancy = &mut *guard;

        let coord = match occupancy.placements.get(&placement.container) {
            Some(current) if current.id == placement.id => current.coord,
            _ => {
                warn!(container = %placement.container, "Placement left the area before rollback");
                return Ok(());
            }
        };
        occupancy.grid.vacate(coord)?;
        occupancy.placements.remove(&placement.container);
        self.index.remove(&placement.container);
        occupancy.ledger.release(placement.teu)?;
        Ok(())
    }

    fn rollback_remove(&self, before: &ContainerPlacement) -> Result<(), EngineError> {
        let cell = self.catalog.cell(&before.area_id)?;
        let mut guard = self.catalog.locks().occupancy_unbounded(&cell)?;
        let occupancy = &mut *guard;

        let claim = match self.index.entry(before.container.clone()) {
            Entry::Occupied(_) => {
                return Err(EngineError::ContainerAlreadyPlaced {
                    container: before.container.clone(),
                    area_id: before.area_id.clone(),
                    coord: before.coord,
                })
            }
            Entry::Vacant(claim) => claim,
        };
        occupancy.ledger.reserve(before.teu)?;
        if let Err(err) = occupancy.grid.place(before.coord, before.container.clone()) {
            occupancy.ledger.release(before.teu)?;
            return Err(err);
        }
        occupancy.placements.insert(before.container.clone(), before.clone());
        claim.insert(IndexEntry {
            area_id: before.area_id.clone(),
            coord: before.coord,
        });
        Ok(())
    }

    fn rollback_move(&self, before: &ContainerPlacement, after: &ContainerPlacement) -> Result<(), EngineError> {
        let cell = self.catalog.cell(&before.area_id)?;
        let mut guard = self.catalog.locks().occupancy_unbounded(&cell)?;
        let occupancy = &mut *guard;

        match occupancy.placements.get(&after.container) {
            Some(current) if current.id == after.id && current.coord == after.coord => {}
            _ => {
                warn!(container = %after.container, "Placement changed again before rollback");
                return Ok(());
            }
        }
        occupancy.grid.relocate(&after.container, before.coord)?;
        occupancy.placements.insert(before.container.clone(), before.clone());
        if let Some(mut indexed) = self.index.get_mut(&before.container) {
            indexed.coord = before.coord;
        }
        Ok(())
    }

    fn rollback_transfer(&self, before: &ContainerPlacement, after: &ContainerPlacement) -> Result<(), EngineError> {
        let current_cell = self.catalog.cell(&after.area_id)?;
        let original_cell = self.catalog.cell(&before.area_id)?;
        let (mut current, mut original) = self
            .catalog
            .locks()
            .occupancy_pair_unbounded(&current_cell, &original_cell)?;

        match current.placements.get(&after.container) {
            Some(placed) if placed.id == after.id && placed.coord == after.coord => {}
            _ => {
                warn!(container = %after.container, "Placement changed again before rollback");
                return Ok(());
            }
        }
        self.shift(&mut current, &mut original, after, &before.area_id, before.coord)?;
        original.placements.insert(before.container.clone(), before.clone());
        Ok(())
    }

    /// A failed rollback leaves memory ahead of the repository.
    fn guarded(
        &self,
        operation: &'static str,
        container: &ContainerCode,
        outcome: Result<(), EngineError>,
    ) -> Result<(), EngineError> {
        match outcome {
            Ok(()) => {
                warn!(operation, container = %container, "Rolled back after persistence failure");
                Ok(())
            }
            Err(err) => {
                error!(operation, container = %container, error = %err, "Rollback failed");
                Err(EngineError::InternalConsistency(format!(
                    "{} of {} could not be rolled back: {}",
                    operation, container, err
                )))
            }
        }
    }

    // ===== Persistence =====

    /// Calls the repository, retrying with exponential backoff.
    async fn with_retry<T, F, Fut>(&self, operation: &'static str, mut call: F) -> Result<T, EngineError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RepositoryError>>,
    {
        let mut attempt = 0u32;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(err) if attempt < self.config.persistence_retries => {
                    attempt += 1;
                    let delay = self.config.backoff(attempt);
                    warn!(
                        operation,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Repository call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    warn!(operation, attempts = attempt + 1, error = %err, "Repository call failed");
                    return Err(err.into());
                }
            }
        }
    }

    /// Saves the area record after a configuration change, undoing the change
    /// through `revert` if the record cannot be stored. The caller holds the
    /// area's record gate.
    async fn save_area_or_revert<F>(&self, area_id: &str, revert: F) -> Result<(), EngineError>
    where
        F: FnOnce() -> Result<(), EngineError>,
    {
        let saved = match self.catalog.record(area_id) {
            Ok(record) => {
                self.with_retry("save_area", || self.repository.save_area(&record))
                    .await
            }
            Err(err) => Err(err),
        };
        let Err(err) = saved else {
            return Ok(());
        };

        if let Err(revert_err) = revert() {
            error!(area_id = %area_id, error = %revert_err, "Failed to revert area change");
            return Err(EngineError::InternalConsistency(format!(
                "area {} changed in memory but could not be saved: {}",
                area_id, revert_err
            )));
        }
        Err(err)
    }

    /// Best-effort write of the area record so its stored current capacity
    /// tracks the ledger. Placements remain the source of truth on restore.
    /// Skipped once the area has been removed.
    async fn refresh_area_record(&self, area_id: &str) {
        let _gate = match self.record_gate(area_id).await {
            Ok(gate) => gate,
            Err(err) => {
                debug!(area_id = %area_id, error = %err, "Skipped area record refresh");
                return;
            }
        };
        let record = match self.catalog.record(area_id) {
            Ok(record) => record,
            Err(err) => {
                debug!(area_id = %area_id, error = %err, "Skipped area record refresh");
                return;
            }
        };
        if let Err(err) = self
            .with_retry("save_area", || self.repository.save_area(&record))
            .await
        {
            warn!(area_id = %area_id, error = %err, "Area record refresh failed");
        }
    }

    /// Held from copying an area record until the repository has stored it.
    async fn record_gate(&self, area_id: &str) -> Result<OwnedMutexGuard<()>, EngineError> {
        let cell = self.catalog.cell(area_id)?;
        Ok(Arc::clone(&cell.record_writes).lock_owned().await)
    }
}
