use crate::error::EngineError;
use crate::models::coordinate::AreaBounds;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AreaType {
    Yard,
    Warehouse,
}

impl fmt::Display for AreaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AreaType::Yard => f.write_str("Yard"),
            AreaType::Warehouse => f.write_str("Warehouse"),
        }
    }
}

/// Distance from a storage area to one dock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DockDistanceEntry {
    pub dock_code: String,
    pub distance: f64,
}

/// Persisted shape of a storage area.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageArea {
    pub id: String,
    pub name: String,
    pub description: String,
    pub area_type: AreaType,
    pub bounds: AreaBounds,
    pub max_capacity: u32,
    pub current_capacity: u32,
    pub resource_codes: BTreeSet<String>,
    pub dock_distances: Vec<DockDistanceEntry>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Request to create a storage area.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewStorageArea {
    pub name: String,
    pub description: String,
    pub area_type: AreaType,
    pub bounds: AreaBounds,
    pub max_capacity: u32,
    #[serde(default)]
    pub resource_codes: Vec<String>,
}

impl NewStorageArea {
    pub fn new(name: &str, area_type: AreaType, bounds: AreaBounds, max_capacity: u32) -> Self {
        Self {
            name: name.to_string(),
            description: String::new(),
            area_type,
            bounds,
            max_capacity,
            resource_codes: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    pub fn with_resource(mut self, code: &str) -> Self {
        self.resource_codes.push(code.to_string());
        self
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.name.trim().is_empty() {
            return Err(EngineError::InvalidArea("name is required".to_string()));
        }
        if self.max_capacity == 0 {
            return Err(EngineError::InvalidArea(
                "max capacity must be at least 1 TEU".to_string(),
            ));
        }
        for code in &self.resource_codes {
            normalize_resource_code(code)?;
        }
        Ok(())
    }
}

pub(crate) fn normalize_resource_code(code: &str) -> Result<String, EngineError> {
    let trimmed = code.trim();
    if trimmed.is_empty() {
        return Err(EngineError::InvalidArea(
            "resource code must not be empty".to_string(),
        ));
    }
    Ok(trimmed.to_string())
}

/// Answer of `describe`: what a caller needs to address an area.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AreaDescription {
    pub id: String,
    pub name: String,
    pub description: String,
    pub area_type: AreaType,
    pub bounds: AreaBounds,
    pub resource_codes: BTreeSet<String>,
}
