use crate::error::EngineError;
use crate::models::DockDistanceEntry;
use std::collections::BTreeMap;

/// Dock code -> distance index of one storage area.
#[derive(Debug, Clone, Default)]
pub struct DockDistanceRegistry {
    distances: BTreeMap<String, f64>,
}

impl DockDistanceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: &[DockDistanceEntry]) -> Result<Self, EngineError> {
        let mut registry = Self::new();
        for entry in entries {
            registry.upsert(&entry.dock_code, entry.distance)?;
        }
        Ok(registry)
    }

    /// Inserts or replaces a distance. Returns the previous value, if any.
    pub fn upsert(&mut self, dock_code: &str, distance: f64) -> Result<Option<f64>, EngineError> {
        if !distance.is_finite() || distance < 0.0 {
            return Err(EngineError::InvalidDistance(distance));
        }
        let dock_code = dock_code.trim();
        if dock_code.is_empty() {
            return Err(EngineError::InvalidArea("dock code must not be empty".to_string()));
        }
        Ok(self.distances.insert(dock_code.to_string(), distance))
    }

    pub fn remove(&mut self, dock_code: &str) -> Result<f64, EngineError> {
        self.distances
            .remove(dock_code.trim())
            .ok_or_else(|| EngineError::DockNotFound(dock_code.to_string()))
    }

    pub fn distance_to(&self, dock_code: &str) -> Result<f64, EngineError> {
        self.distances
            .get(dock_code.trim())
            .copied()
            .ok_or_else(|| EngineError::DockNotFound(dock_code.to_string()))
    }

    /// The `k` closest docks; equal distances are ordered by dock code.
    pub fn nearest(&self, k: usize) -> Vec<DockDistanceEntry> {
        let mut entries = self.entries();
        entries.sort_by(|a, b| {
            a.distance
                .total_cmp(&b.distance)
                .then_with(|| a.dock_code.cmp(&b.dock_code))
        });
        entries.truncate(k);
        entries
    }

    /// All entries ordered by dock code.
    pub fn entries(&self) -> Vec<DockDistanceEntry> {
        self.distances
            .iter()
            .map(|(dock_code, distance)| DockDistanceEntry {
                dock_code: dock_code.clone(),
                distance: *distance,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.distances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.distances.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nearest_single() {
        let mut registry = DockDistanceRegistry::new();
        registry.upsert("D1", 100.0).unwrap();
        registry.upsert("D2", 50.0).unwrap();

        let nearest = registry.nearest(1);
        assert_eq!(
            nearest,
            vec![DockDistanceEntry { dock_code: "D2".to_string(), distance: 50.0 }]
        );
    }

    #[test]
    fn test_nearest_ties_broken_by_code() {
        let mut registry = DockDistanceRegistry::new();
        registry.upsert("D9", 10.0).unwrap();
        registry.upsert("D3", 10.0).unwrap();
        registry.upsert("D5", 5.0).unwrap();
        registry.upsert("D1", 20.0).unwrap();

        let codes: Vec<_> = registry.nearest(3).into_iter().map(|e| e.dock_code).collect();
        assert_eq!(codes, vec!["D5", "D3", "D9"]);
    }

    #[test]
    fn test_nearest_k_larger_than_registry() {
        let mut registry = DockDistanceRegistry::new();
        registry.upsert("D1", 1.0).unwrap();
        assert_eq!(registry.nearest(10).len(), 1);
        assert!(registry.nearest(0).is_empty());
    }

    #[test]
    fn test_negative_or_nan_distance_rejected() {
        let mut registry = DockDistanceRegistry::new();
        assert_eq!(registry.upsert("D1", -0.5), Err(EngineError::InvalidDistance(-0.5)));
        assert!(registry.upsert("D1", f64::NAN).is_err());
        assert!(registry.upsert("D1", f64::INFINITY).is_err());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_upsert_replaces() {
        let mut registry = DockDistanceRegistry::new();
        assert_eq!(registry.upsert("D1", 100.0).unwrap(), None);
        assert_eq!(registry.upsert("D1", 40.0).unwrap(), Some(100.0));
        assert_eq!(registry.distance_to("D1").unwrap(), 40.0);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_remove_unknown_dock() {
        let mut registry = DockDistanceRegistry::new();
        registry.upsert("D1", 1.0).unwrap();
        assert_eq!(registry.remove("D1").unwrap(), 1.0);
        assert_eq!(registry.remove("D1"), Err(EngineError::DockNotFound("D1".to_string())));
        assert!(registry.distance_to("D1").is_err());
    }
}
