//! Engine error taxonomy
//!
//! Domain components raise typed [`EngineError`]s; layers above the
//! coordinator only map [`ErrorKind`] to a response code.

use crate::models::{AreaBounds, ContainerCode, Coordinate};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    // Validation
    #[error("Coordinate {coord} is outside area bounds {bounds}")]
    OutOfBounds { coord: Coordinate, bounds: AreaBounds },
    #[error("Invalid area bounds: {0}")]
    InvalidBounds(String),
    #[error("Dock distance must be finite and non-negative, got {0}")]
    InvalidDistance(f64),
    #[error("Invalid container code {code:?}: {reason}")]
    InvalidContainerCode { code: String, reason: String },
    #[error("Invalid storage area: {0}")]
    InvalidArea(String),
    #[error("TEU weight must be at least 1, got {0}")]
    InvalidWeight(u32),

    // Not found
    #[error("Storage area not found: {0}")]
    AreaNotFound(String),
    #[error("Container not registered: {0}")]
    ContainerNotFound(String),
    #[error("Dock not found: {0}")]
    DockNotFound(String),
    #[error("Slot {0} is empty")]
    SlotEmpty(Coordinate),
    #[error("Container {0} is not placed in this area")]
    NotPlaced(ContainerCode),

    // Conflict
    #[error("Slot {coord} is occupied by {occupant}")]
    SlotOccupied { coord: Coordinate, occupant: ContainerCode },
    #[error("Capacity exceeded: requested {requested} TEU with {current}/{max} in use")]
    CapacityExceeded { requested: u32, current: u32, max: u32 },
    #[error("Container {container} is already placed in area {area_id} at {coord}")]
    ContainerAlreadyPlaced {
        container: ContainerCode,
        area_id: String,
        coord: Coordinate,
    },
    #[error("Resizing area {area_id} to {bounds} would orphan {orphaned} occupied slot(s)")]
    ResizeConflict {
        area_id: String,
        bounds: AreaBounds,
        orphaned: usize,
    },
    #[error("Storage area {area_id} still holds {occupied} placement(s)")]
    AreaNotEmpty { area_id: String, occupied: usize },
    #[error("Storage area already exists: {0}")]
    AreaAlreadyExists(String),
    #[error("Max capacity {requested_max} is below current usage {current}")]
    CapacityBelowUsage { requested_max: u32, current: u32 },

    // Transient
    #[error("Storage area {0} is busy, retry later")]
    Busy(String),
    #[error("Persistence failure: {0}")]
    Persistence(String),

    #[error("Internal consistency violation: {0}")]
    InternalConsistency(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    Busy,
    Persistence,
    InternalConsistency,
}

impl ErrorKind {
    pub fn status_code(&self) -> u16 {
        match self {
            ErrorKind::Validation => 400,
            ErrorKind::NotFound => 404,
            ErrorKind::Conflict => 409,
            ErrorKind::Busy | ErrorKind::Persistence => 503,
            ErrorKind::InternalConsistency => 500,
        }
    }

    /// Transient failures where nothing was committed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::Busy | ErrorKind::Persistence)
    }
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::OutOfBounds { .. }
            | EngineError::InvalidBounds(_)
            | EngineError::InvalidDistance(_)
            | EngineError::InvalidContainerCode { .. }
            | EngineError::InvalidArea(_)
            | EngineError::InvalidWeight(_) => ErrorKind::Validation,
            EngineError::AreaNotFound(_)
            | EngineError::ContainerNotFound(_)
            | EngineError::DockNotFound(_)
            | EngineError::SlotEmpty(_)
            | EngineError::NotPlaced(_) => ErrorKind::NotFound,
            EngineError::SlotOccupied { .. }
            | EngineError::CapacityExceeded { .. }
            | EngineError::ContainerAlreadyPlaced { .. }
            | EngineError::ResizeConflict { .. }
            | EngineError::AreaNotEmpty { .. }
            | EngineError::AreaAlreadyExists(_)
            | EngineError::CapacityBelowUsage { .. } => ErrorKind::Conflict,
            EngineError::Busy(_) => ErrorKind::Busy,
            EngineError::Persistence(_) => ErrorKind::Persistence,
            EngineError::InternalConsistency(_) => ErrorKind::InternalConsistency,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }
}

/// Body returned to callers of the service layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub kind: ErrorKind,
    pub status: u16,
    pub message: String,
    pub retryable: bool,
}

impl From<&EngineError> for ErrorResponse {
    fn from(err: &EngineError) -> Self {
        let kind = err.kind();
        Self {
            kind,
            status: kind.status_code(),
            message: err.to_string(),
            retryable: kind.is_retryable(),
        }
    }
}

impl ErrorResponse {
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "error": {
                "kind": self.kind,
                "message": self.message,
                "retryable": self.retryable,
            },
            "status": self.status,
        })
    }
}
