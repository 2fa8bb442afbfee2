use crate::models::container::ContainerCode;
use crate::models::coordinate::{AreaBounds, Coordinate};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle of a placement: Absent -> Placed -> (Moved)* -> Removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlacementState {
    Absent,
    Placed,
    Moved,
    Removed,
}

impl PlacementState {
    /// True while the container physically occupies a slot.
    pub fn is_active(&self) -> bool {
        matches!(self, PlacementState::Placed | PlacementState::Moved)
    }

    pub fn can_transition_to(&self, next: PlacementState) -> bool {
        matches!(
            (self, next),
            (PlacementState::Absent, PlacementState::Placed)
                | (PlacementState::Placed, PlacementState::Moved)
                | (PlacementState::Moved, PlacementState::Moved)
                | (PlacementState::Placed, PlacementState::Removed)
                | (PlacementState::Moved, PlacementState::Removed)
        )
    }
}

/// A container resident at one coordinate of one storage area
/// (a "manifest entry").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerPlacement {
    pub id: Uuid,
    pub container: ContainerCode,
    pub area_id: String,
    pub coord: Coordinate,
    pub teu: u32,
    pub state: PlacementState,
    pub placed_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ContainerPlacement {
    pub fn new(area_id: &str, container: ContainerCode, coord: Coordinate, teu: u32) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            container,
            area_id: area_id.to_string(),
            coord,
            teu,
            state: PlacementState::Placed,
            placed_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlacementResult {
    pub placement_id: Uuid,
    pub area_id: String,
    pub container_ref: ContainerCode,
    pub bay: u32,
    pub row: u32,
    pub tier: u32,
}

impl From<&ContainerPlacement> for PlacementResult {
    fn from(placement: &ContainerPlacement) -> Self {
        Self {
            placement_id: placement.id,
            area_id: placement.area_id.clone(),
            container_ref: placement.container.clone(),
            bay: placement.coord.bay,
            row: placement.coord.row,
            tier: placement.coord.tier,
        }
    }
}

impl PlacementResult {
    pub fn coord(&self) -> Coordinate {
        Coordinate::new(self.bay, self.row, self.tier)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotView {
    pub bay: u32,
    pub row: u32,
    pub tier: u32,
    pub container_ref: ContainerCode,
}

/// Point-in-time rendering of an area's occupied slots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GridView {
    pub max_bays: u32,
    pub max_rows: u32,
    pub max_tiers: u32,
    pub slots: Vec<SlotView>,
}

impl GridView {
    pub fn new(bounds: AreaBounds, occupied: Vec<(Coordinate, ContainerCode)>) -> Self {
        Self {
            max_bays: bounds.max_bays(),
            max_rows: bounds.max_rows(),
            max_tiers: bounds.max_tiers(),
            slots: occupied
                .into_iter()
                .map(|(coord, container_ref)| SlotView {
                    bay: coord.bay,
                    row: coord.row,
                    tier: coord.tier,
                    container_ref,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapacityReport {
    pub area_id: String,
    pub current: u32,
    pub max: u32,
    pub occupied_slots: usize,
    pub total_slots: u64,
}

impl CapacityReport {
    /// Share of the TEU maximum in use, between 0.0 and 1.0.
    pub fn utilization(&self) -> f64 {
        if self.max == 0 {
            return 0.0;
        }
        f64::from(self.current) / f64::from(self.max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_machine_transitions() {
        use PlacementState::*;
        assert!(Absent.can_transition_to(Placed));
        assert!(Placed.can_transition_to(Moved));
        assert!(Moved.can_transition_to(Moved));
        assert!(Moved.can_transition_to(Removed));
        assert!(!Absent.can_transition_to(Moved));
        assert!(!Absent.can_transition_to(Removed));
        assert!(!Removed.can_transition_to(Placed));
        assert!(!Removed.can_transition_to(Moved));
        assert!(!Placed.can_transition_to(Placed));
    }

    #[test]
    fn test_grid_view_wire_shape() {
        let bounds = AreaBounds::new(2, 2, 1).unwrap();
        let code = ContainerCode::parse("MSCU6639870").unwrap();
        let view = GridView::new(bounds, vec![(Coordinate::new(1, 0, 0), code)]);
        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["maxBays"], 2);
        assert_eq!(json["slots"][0]["bay"], 1);
        assert_eq!(json["slots"][0]["containerRef"], "MSCU6639870");
    }

    #[test]
    fn test_utilization() {
        let report = CapacityReport {
            area_id: "a".to_string(),
            current: 3,
            max: 4,
            occupied_slots: 3,
            total_slots: 4,
        };
        assert!((report.utilization() - 0.75).abs() < f64::EPSILON);
    }
}
