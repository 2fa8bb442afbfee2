use crate::error::EngineError;
use crate::models::{AreaBounds, ContainerCode, Coordinate};
use std::collections::{BTreeMap, HashMap};

/// Sparse bay/row/tier occupancy index of one storage area.
///
/// The forward map (coordinate -> container) and the reverse map
/// (container -> coordinate) are only ever changed together.
#[derive(Debug, Clone)]
pub struct SlotGrid {
    bounds: AreaBounds,
    forward: BTreeMap<Coordinate, ContainerCode>,
    reverse: HashMap<ContainerCode, Coordinate>,
}

impl SlotGrid {
    pub fn new(bounds: AreaBounds) -> Self {
        Self {
            bounds,
            forward: BTreeMap::new(),
            reverse: HashMap::new(),
        }
    }

    pub fn bounds(&self) -> AreaBounds {
        self.bounds
    }

    pub fn place(&mut self, coord: Coordinate, container: ContainerCode) -> Result<(), EngineError> {
        self.bounds.check(coord)?;
        if let Some(occupant) = self.forward.get(&coord) {
            return Err(EngineError::SlotOccupied {
                coord,
                occupant: occupant.clone(),
            });
        }
        // a container holds at most one slot; report the slot it already holds
        if let Some(existing) = self.reverse.get(&container) {
            return Err(EngineError::SlotOccupied {
                coord: *existing,
                occupant: container,
            });
        }
        self.reverse.insert(container.clone(), coord);
        self.forward.insert(coord, container);
        Ok(())
    }

    pub fn vacate(&mut self, coord: Coordinate) -> Result<ContainerCode, EngineError> {
        let container = self
            .forward
            .remove(&coord)
            .ok_or(EngineError::SlotEmpty(coord))?;
        self.reverse.remove(&container);
        Ok(container)
    }

    /// Moves a resident container to an empty in-bounds slot in one step.
    pub fn relocate(&mut self, container: &ContainerCode, to: Coordinate) -> Result<Coordinate, EngineError> {
        let from = self
            .locate(container)
            .ok_or_else(|| EngineError::NotPlaced(container.clone()))?;
        self.bounds.check(to)?;
        if from == to {
            return Ok(from);
        }
        if let Some(occupant) = self.forward.get(&to) {
            return Err(EngineError::SlotOccupied {
                coord: to,
                occupant: occupant.clone(),
            });
        }
        if let Some(code) = self.forward.remove(&from) {
            self.forward.insert(to, code);
        }
        self.reverse.insert(container.clone(), to);
        Ok(from)
    }

    pub fn at(&self, coord: Coordinate) -> Option<&ContainerCode> {
        self.forward.get(&coord)
    }

    pub fn locate(&self, container: &ContainerCode) -> Option<Coordinate> {
        self.reverse.get(container).copied()
    }

    /// Occupied slots ordered by (bay, row, tier).
    pub fn snapshot(&self) -> Vec<(Coordinate, ContainerCode)> {
        self.forward
            .iter()
            .map(|(coord, code)| (*coord, code.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.forward.len()
    }

    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }

    pub fn occupied_outside(&self, bounds: AreaBounds) -> Vec<Coordinate> {
        self.forward
            .keys()
            .filter(|coord| !bounds.contains(**coord))
            .copied()
            .collect()
    }

    /// Changes the grid dimensions if no occupied slot would fall outside them.
    pub fn set_bounds(&mut self, bounds: AreaBounds) -> Result<(), Vec<Coordinate>> {
        let orphaned = self.occupied_outside(bounds);
        if !orphaned.is_empty() {
            return Err(orphaned);
        }
        self.bounds = bounds;
        Ok(())
    }

    pub fn is_consistent(&self) -> bool {
        self.forward.len() == self.reverse.len()
            && self
                .forward
                .iter()
                .all(|(coord, code)| self.reverse.get(code) == Some(coord) && self.bounds.contains(*coord))
    }
}
