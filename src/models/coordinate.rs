use crate::error::EngineError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One addressable cell of a storage area grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Coordinate {
    pub bay: u32,
    pub row: u32,
    pub tier: u32,
}

impl Coordinate {
    pub const fn new(bay: u32, row: u32, tier: u32) -> Self {
        Self { bay, row, tier }
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.bay, self.row, self.tier)
    }
}

impl From<(u32, u32, u32)> for Coordinate {
    fn from((bay, row, tier): (u32, u32, u32)) -> Self {
        Self::new(bay, row, tier)
    }
}

/// Grid dimensions of a storage area. Every axis is at least one slot wide,
/// which is checked once in [`AreaBounds::new`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawBounds", into = "RawBounds")]
pub struct AreaBounds {
    max_bays: u32,
    max_rows: u32,
    max_tiers: u32,
}

#[derive(Serialize, Deserialize)]
struct RawBounds {
    max_bays: u32,
    max_rows: u32,
    max_tiers: u32,
}

impl AreaBounds {
    pub fn new(max_bays: u32, max_rows: u32, max_tiers: u32) -> Result<Self, EngineError> {
        if max_bays == 0 || max_rows == 0 || max_tiers == 0 {
            return Err(EngineError::InvalidBounds(format!(
                "every dimension must be at least 1, got {}x{}x{}",
                max_bays, max_rows, max_tiers
            )));
        }
        Ok(Self {
            max_bays,
            max_rows,
            max_tiers,
        })
    }

    pub fn max_bays(&self) -> u32 {
        self.max_bays
    }

    pub fn max_rows(&self) -> u32 {
        self.max_rows
    }

    pub fn max_tiers(&self) -> u32 {
        self.max_tiers
    }

    pub fn contains(&self, coord: Coordinate) -> bool {
        coord.bay < self.max_bays && coord.row < self.max_rows && coord.tier < self.max_tiers
    }

    pub fn check(&self, coord: Coordinate) -> Result<(), EngineError> {
        if self.contains(coord) {
            Ok(())
        } else {
            Err(EngineError::OutOfBounds {
                coord,
                bounds: *self,
            })
        }
    }

    pub fn slot_count(&self) -> u64 {
        u64::from(self.max_bays) * u64::from(self.max_rows) * u64::from(self.max_tiers)
    }
}

impl fmt::Display for AreaBounds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}x{}", self.max_bays, self.max_rows, self.max_tiers)
    }
}

impl TryFrom<RawBounds> for AreaBounds {
    type Error = EngineError;

    fn try_from(raw: RawBounds) -> Result<Self, Self::Error> {
        AreaBounds::new(raw.max_bays, raw.max_rows, raw.max_tiers)
    }
}

impl From<AreaBounds> for RawBounds {
    fn from(bounds: AreaBounds) -> Self {
        RawBounds {
            max_bays: bounds.max_bays,
            max_rows: bounds.max_rows,
            max_tiers: bounds.max_tiers,
        }
    }
}
