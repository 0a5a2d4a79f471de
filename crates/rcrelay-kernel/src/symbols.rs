//! [`SymbolTable`] – named presets used by manual commands.

use std::time::Duration;

/// Built-in presets: throttle positions, the default throttle window (ms),
/// and steering positions.
const PRESETS: [(&str, f32); 7] = [
    ("forward", 65.0),
    ("reverse", 105.0),
    ("stop", 90.0),
    ("throttleTime", 500.0),
    ("left", 40.0),
    ("right", 100.0),
    ("neutral", 75.0),
];

/// Read-only keyword → value mapping, built once at startup.
///
/// Lookups are exact-case and range over every entry, so any keyword can
/// stand in for a position.
#[derive(Debug, Clone)]
pub struct SymbolTable {
    entries: Vec<(&'static str, f32)>,
}

impl SymbolTable {
    pub fn get(&self, keyword: &str) -> Option<f32> {
        self.entries
            .iter()
            .find(|(k, _)| *k == keyword)
            .map(|(_, v)| *v)
    }

    /// Throttle position that halts the vehicle.
    pub fn stop(&self) -> f32 {
        self.get("stop").unwrap_or(90.0)
    }

    /// Steering position that points the wheels straight.
    pub fn neutral(&self) -> f32 {
        self.get("neutral").unwrap_or(75.0)
    }

    /// Default throttle safety window.
    pub fn throttle_time(&self) -> Duration {
        Duration::from_millis(self.get("throttleTime").unwrap_or(500.0) as u64)
    }
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self {
            entries: PRESETS.to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_match_vehicle_calibration() {
        let table = SymbolTable::default();
        assert_eq!(table.get("forward"), Some(65.0));
        assert_eq!(table.get("reverse"), Some(105.0));
        assert_eq!(table.get("left"), Some(40.0));
        assert_eq!(table.get("right"), Some(100.0));
        assert_eq!(table.stop(), 90.0);
        assert_eq!(table.neutral(), 75.0);
        assert_eq!(table.throttle_time(), Duration::from_millis(500));
    }

    #[test]
    fn lookup_is_exact_case() {
        let table = SymbolTable::default();
        assert_eq!(table.get("Forward"), None);
        assert_eq!(table.get("throttletime"), None);
        assert_eq!(table.get(""), None);
    }

    #[test]
    fn duration_keyword_resolves_like_any_other() {
        assert_eq!(SymbolTable::default().get("throttleTime"), Some(500.0));
    }
}
