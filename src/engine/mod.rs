pub mod capacity;
pub mod catalog;
pub mod coordinator;
pub mod dock_distance;
pub mod locks;
pub mod slot_grid;

pub use capacity::CapacityLedger;
pub use catalog::{AreaCell, AreaProfile, Occupancy, StorageAreaCatalog};
pub use coordinator::PlacementCoordinator;
pub use dock_distance::DockDistanceRegistry;
pub use locks::AreaLocks;
pub use slot_grid::SlotGrid;
