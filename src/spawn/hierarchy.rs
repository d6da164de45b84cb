//! Parent → children table.
//!
//! Guarded by its own lock, distinct from the telemetry registry lock.
//! Registering telemetry and recording the child link are two sequential,
//! independently locked steps; the supervisor reconciles a unit that made it
//! into telemetry but not into its parent's node.

use crate::types::UnitId;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::collections::HashMap;

/// Site label for nodes created implicitly by [`HierarchyTable::add_child`].
pub const IMPLICIT_NODE_SITE: &str = "system_create";

/// Snapshot of one hierarchy node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HierarchyNode {
    /// The parent unit.
    pub unit: UnitId,
    /// Site label recorded when the node was created.
    pub site: String,
    /// Children in insertion order.
    pub children: Vec<UnitId>,
}

/// Outcome of [`HierarchyTable::add_child`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildLink {
    /// The child was appended.
    Added,
    /// The child was already listed; nothing changed.
    AlreadyPresent,
    /// The parent holds the ceiling; nothing changed.
    Full,
}

impl ChildLink {
    /// True unless the parent was full.
    #[must_use]
    pub const fn is_linked(self) -> bool {
        !matches!(self, Self::Full)
    }
}

#[derive(Debug)]
struct Node {
    site: String,
    children: SmallVec<[UnitId; 8]>,
}

/// Tracks each unit's children, bounded per parent.
#[derive(Debug)]
pub struct HierarchyTable {
    nodes: Mutex<HashMap<UnitId, Node>>,
    max_children: usize,
}

impl HierarchyTable {
    /// Creates a table that admits at most `max_children` per parent.
    #[must_use]
    pub fn new(max_children: usize) -> Self {
        Self {
            nodes: Mutex::new(HashMap::new()),
            max_children,
        }
    }

    /// Per-parent ceiling.
    #[must_use]
    pub const fn max_children(&self) -> usize {
        self.max_children
    }

    /// Creates a node for `unit` if none exists.
    pub fn ensure_node(&self, unit: UnitId, site: &str) {
        self.nodes.lock().entry(unit).or_insert_with(|| Node {
            site: site.to_string(),
            children: SmallVec::new(),
        });
    }

    /// Appends `child` under `parent`, creating the parent node lazily.
    ///
    /// The child gets its own node labelled `child_site`. Nothing changes once
    /// the parent holds the ceiling or when the child is already listed.
    pub fn add_child(&self, parent: UnitId, child: UnitId, child_site: &str) -> ChildLink {
        let mut nodes = self.nodes.lock();
        let node = nodes.entry(parent).or_insert_with(|| Node {
            site: IMPLICIT_NODE_SITE.to_string(),
            children: SmallVec::new(),
        });
        if node.children.contains(&child) {
            return ChildLink::AlreadyPresent;
        }
        if node.children.len() >= self.max_children {
            return ChildLink::Full;
        }
        node.children.push(child);
        nodes.entry(child).or_insert_with(|| Node {
            site: child_site.to_string(),
            children: SmallVec::new(),
        });
        ChildLink::Added
    }

    /// Removes `child` from `parent`'s list.
    pub fn remove_child(&self, parent: UnitId, child: UnitId) -> bool {
        let mut nodes = self.nodes.lock();
        let Some(node) = nodes.get_mut(&parent) else {
            return false;
        };
        let before = node.children.len();
        node.children.retain(|c| *c != child);
        node.children.len() != before
    }

    /// Moves `child` from `from` to `to`. Fails without change when `to` is full.
    pub fn move_child(&self, child: UnitId, from: UnitId, to: UnitId) -> bool {
        let mut nodes = self.nodes.lock();
        let target = nodes.entry(to).or_insert_with(|| Node {
            site: IMPLICIT_NODE_SITE.to_string(),
            children: SmallVec::new(),
        });
        if !target.children.contains(&child) {
            if target.children.len() >= self.max_children {
                return false;
            }
            target.children.push(child);
        }
        if let Some(source) = nodes.get_mut(&from) {
            source.children.retain(|c| *c != child);
        }
        true
    }

    /// Drops `unit`'s node, returning its children.
    pub fn remove_node(&self, unit: UnitId) -> Vec<UnitId> {
        self.nodes
            .lock()
            .remove(&unit)
            .map(|node| node.children.into_vec())
            .unwrap_or_default()
    }

    /// Children of `unit`.
    #[must_use]
    pub fn children(&self, unit: UnitId) -> Vec<UnitId> {
        self.nodes
            .lock()
            .get(&unit)
            .map(|node| node.children.to_vec())
            .unwrap_or_default()
    }

    /// Number of children of `unit`.
    #[must_use]
    pub fn child_count(&self, unit: UnitId) -> usize {
        self.nodes
            .lock()
            .get(&unit)
            .map_or(0, |node| node.children.len())
    }

    /// True if `child` is listed under `parent`.
    #[must_use]
    pub fn is_child(&self, parent: UnitId, child: UnitId) -> bool {
        self.nodes
            .lock()
            .get(&parent)
            .is_some_and(|node| node.children.contains(&child))
    }

    /// Snapshot of every node that has children, ordered by unit id.
    #[must_use]
    pub fn snapshot(&self) -> Vec<HierarchyNode> {
        let nodes = self.nodes.lock();
        let mut out: Vec<HierarchyNode> = nodes
            .iter()
            .filter(|(_, node)| !node.children.is_empty())
            .map(|(unit, node)| HierarchyNode {
                unit: *unit,
                site: node.site.clone(),
                children: node.children.to_vec(),
            })
            .collect();
        drop(nodes);
        out.sort_by_key(|node| node.unit);
        out
    }
}
