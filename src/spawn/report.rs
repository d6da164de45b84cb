//! Human-readable telemetry report.

use crate::types::UnitId;
use core::fmt;
use serde::Serialize;
use std::collections::HashMap;

use super::hierarchy::HierarchyNode;
use super::telemetry::UnitRecord;

/// Registry and hierarchy snapshot rendered for operators.
///
/// `Display` prints the active count, a registry table, and the hierarchy as
/// an indented tree rooted at the sentinel.
#[derive(Debug, Clone, Serialize)]
pub struct TelemetryReport {
    /// Root sentinel.
    pub root: UnitId,
    /// Global unit ceiling.
    pub capacity: usize,
    /// Registered units, root included.
    pub units: Vec<UnitRecord>,
    /// Parents with children.
    pub hierarchy: Vec<HierarchyNode>,
}

impl TelemetryReport {
    /// Governed units, the root excluded.
    #[must_use]
    pub fn active(&self) -> usize {
        self.units.iter().filter(|u| u.unit != self.root).count()
    }

    fn write_tree(
        &self,
        f: &mut fmt::Formatter<'_>,
        unit: UnitId,
        level: usize,
        children: &HashMap<UnitId, &[UnitId]>,
        sites: &HashMap<UnitId, &str>,
    ) -> fmt::Result {
        let site = sites.get(&unit).copied().unwrap_or("?");
        writeln!(f, "{:indent$}{unit} {site}", "", indent = level * 2)?;
        for child in children.get(&unit).copied().unwrap_or_default() {
            self.write_tree(f, *child, level + 1, children, sites)?;
        }
        Ok(())
    }
}

impl fmt::Display for TelemetryReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== rift-governor telemetry ===")?;
        writeln!(f, "active units {}/{}", self.active(), self.capacity)?;
        writeln!(
            f,
            "{:<8} {:>8} {:<16} {:<8} {:>5} {:>14} LOCATION",
            "RIFT_ID", "PID", "TID", "PARENT", "DEPTH", "SPAWN_TIME"
        )?;
        for record in &self.units {
            let parent = if record.parent.is_none() {
                "-".to_string()
            } else {
                record.parent.to_string()
            };
            writeln!(
                f,
                "{:<8} {:>8} {:<16} {:<8} {:>5} {:>14} {}",
                record.unit.to_string(),
                record.host.process_id,
                record.host.thread.as_deref().unwrap_or("-"),
                parent,
                record.depth,
                record.spawn_time.to_string(),
                record.site,
            )?;
        }

        writeln!(f, "hierarchy:")?;
        let children: HashMap<UnitId, &[UnitId]> = self
            .hierarchy
            .iter()
            .map(|node| (node.unit, node.children.as_slice()))
            .collect();
        let sites: HashMap<UnitId, &str> = self
            .units
            .iter()
            .map(|u| (u.unit, u.site.as_str()))
            .collect();
        self.write_tree(f, self.root, 1, &children, &sites)
    }
}
