pub mod area;
pub mod container;
pub mod coordinate;
pub mod placement;

pub use area::{AreaDescription, AreaType, DockDistanceEntry, NewStorageArea, StorageArea};
pub use container::ContainerCode;
pub use coordinate::{AreaBounds, Coordinate};
pub use placement::{
    CapacityReport, ContainerPlacement, GridView, PlacementResult, PlacementState, SlotView,
};
