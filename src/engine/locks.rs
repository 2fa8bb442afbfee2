use crate::engine::catalog::{AreaCell, AreaProfile, Occupancy};
use crate::engine::dock_distance::DockDistanceRegistry;
use crate::error::EngineError;
use parking_lot::{MutexGuard, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tracing::warn;

type OccupancyGuard<'a> = MutexGuard<'a, Occupancy>;

/// Bounded acquisition of per-area locks.
///
/// Every wait is capped by `timeout`; an expired wait is reported as
/// [`EngineError::Busy`]. When two areas are needed at once they are always
/// locked in ascending area id order, whichever order the caller names them.
///
/// The unbounded variants exist for compensating a change that was already
/// made in memory; those must not give up on a busy area.
#[derive(Debug, Clone, Copy)]
pub struct AreaLocks {
    timeout: Duration,
}

impl AreaLocks {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn occupancy<'a>(&self, cell: &'a AreaCell) -> Result<OccupancyGuard<'a>, EngineError> {
        self.acquire(cell, Some(self.timeout))
    }

    pub(crate) fn occupancy_unbounded<'a>(&self, cell: &'a AreaCell) -> Result<OccupancyGuard<'a>, EngineError> {
        self.acquire(cell, None)
    }

    /// Locks two distinct areas. Guards are returned in argument order.
    pub fn occupancy_pair<'a>(
        &self,
        first: &'a AreaCell,
        second: &'a AreaCell,
    ) -> Result<(OccupancyGuard<'a>, OccupancyGuard<'a>), EngineError> {
        self.acquire_pair(first, second, Some(self.timeout))
    }

    pub(crate) fn occupancy_pair_unbounded<'a>(
        &self,
        first: &'a AreaCell,
        second: &'a AreaCell,
    ) -> Result<(OccupancyGuard<'a>, OccupancyGuard<'a>), EngineError> {
        self.acquire_pair(first, second, None)
    }

    pub fn docks<'a>(&self, cell: &'a AreaCell) -> Result<RwLockReadGuard<'a, DockDistanceRegistry>, EngineError> {
        cell.docks
            .try_read_for(self.timeout)
            .ok_or_else(|| self.busy(cell.id()))
    }

    pub fn docks_mut<'a>(&self, cell: &'a AreaCell) -> Result<RwLockWriteGuard<'a, DockDistanceRegistry>, EngineError> {
        cell.docks
            .try_write_for(self.timeout)
            .ok_or_else(|| self.busy(cell.id()))
    }

    pub fn profile<'a>(&self, cell: &'a AreaCell) -> Result<RwLockReadGuard<'a, AreaProfile>, EngineError> {
        cell.profile
            .try_read_for(self.timeout)
            .ok_or_else(|| self.busy(cell.id()))
    }

    pub fn profile_mut<'a>(&self, cell: &'a AreaCell) -> Result<RwLockWriteGuard<'a, AreaProfile>, EngineError> {
        cell.profile
            .try_write_for(self.timeout)
            .ok_or_else(|| self.busy(cell.id()))
    }

    fn acquire<'a>(&self, cell: &'a AreaCell, wait: Option<Duration>) -> Result<OccupancyGuard<'a>, EngineError> {
        let guard = match wait {
            Some(timeout) => cell
                .occupancy
                .try_lock_for(timeout)
                .ok_or_else(|| self.busy(cell.id()))?,
            None => cell.occupancy.lock(),
        };
        // a removed area may still be referenced by callers that looked it up earlier
        if guard.retired {
            return Err(EngineError::AreaNotFound(cell.id().to_string()));
        }
        Ok(guard)
    }

    fn acquire_pair<'a>(
        &self,
        first: &'a AreaCell,
        second: &'a AreaCell,
        wait: Option<Duration>,
    ) -> Result<(OccupancyGuard<'a>, OccupancyGuard<'a>), EngineError> {
        if first.id() == second.id() {
            return Err(EngineError::InvalidArea(format!(
                "cannot lock area {} twice",
                first.id()
            )));
        }
        if first.id() < second.id() {
            let a = self.acquire(first, wait)?;
            let b = self.acquire(second, wait)?;
            Ok((a, b))
        } else {
            let b = self.acquire(second, wait)?;
            let a = self.acquire(first, wait)?;
            Ok((a, b))
        }
    }

    fn busy(&self, area_id: &str) -> EngineError {
        warn!(
            area_id = %area_id,
            timeout_ms = self.timeout.as_millis() as u64,
            "Area lock wait timed out"
        );
        EngineError::Busy(area_id.to_string())
    }
}
