//! Conflict graph: an undirected graph whose vertices are classes and whose
//! edges connect any two classes that share at least one conflict slot.

#![allow(clippy::unwrap_used)] // ids looked up here were just inserted during build()

use std::collections::{BTreeSet, HashMap, HashSet};

use tracing::debug;

use crate::error::{SchedulerError, SchedulerResult};
use crate::model::{palette, ClassId, ClassItem, Slot};

/// A vertex's available-slot set (`AllSlots \ forbidden`) plus its adjacency.
///
/// Adjacency is stored as a set of ids, never cross-pointers (spec.md §9,
/// "cyclic references" redesign note): the graph is freely `Clone`/`Send`
/// and workers can take an immutable snapshot.
#[derive(Debug, Clone)]
pub struct ConflictGraph {
    /// Insertion order of class-ids. Iteration and tie-breaking both walk
    /// this order, so colorings are reproducible given the same input
    /// ordering (spec.md §4.2).
    order: Vec<ClassId>,
    available: HashMap<ClassId, HashSet<Slot>>,
    adjacency: HashMap<ClassId, BTreeSet<ClassId>>,
}

impl ConflictGraph {
    /// Builds the graph: for every unordered pair of active classes, adds an
    /// edge iff their forbidden sets intersect. Fails with `InvalidInput` if
    /// any vertex's available set is empty before coloring begins.
    pub fn build(classes: &[ClassItem]) -> SchedulerResult<Self> {
        let full_palette: HashSet<Slot> = palette().into_iter().collect();
        let active: Vec<&ClassItem> = classes.iter().filter(|c| c.active).collect();

        let mut order = Vec::with_capacity(active.len());
        let mut available = HashMap::with_capacity(active.len());
        let mut adjacency: HashMap<ClassId, BTreeSet<ClassId>> = HashMap::with_capacity(active.len());

        for class in &active {
            order.push(class.id.clone());
            let slots: HashSet<Slot> =
                full_palette.difference(&class.forbidden).copied().collect();
            if slots.is_empty() {
                return Err(SchedulerError::InvalidInput(format!(
                    "class {} has no available slot: every palette slot is forbidden",
                    class.id
                )));
            }
            available.insert(class.id.clone(), slots);
            adjacency.insert(class.id.clone(), BTreeSet::new());
        }

        for i in 0..active.len() {
            for j in (i + 1)..active.len() {
                let a = active[i];
                let b = active[j];
                if !a.forbidden.is_disjoint(&b.forbidden) {
                    adjacency.get_mut(&a.id).unwrap().insert(b.id.clone());
                    adjacency.get_mut(&b.id).unwrap().insert(a.id.clone());
                }
            }
        }

        debug!(vertices = order.len(), "conflict graph built");
        Ok(Self { order, available, adjacency })
    }

    pub fn order(&self) -> &[ClassId] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn available(&self, id: &str) -> &HashSet<Slot> {
        &self.available[id]
    }

    pub fn neighbors(&self, id: &str) -> &BTreeSet<ClassId> {
        &self.adjacency[id]
    }

    pub fn degree(&self, id: &str) -> usize {
        self.adjacency[id].len()
    }

    /// Connected components, each as a list of class-ids in graph-order.
    /// Used by the Parallel Dispatcher to partition work (spec.md §4.8).
    pub fn connected_components(&self) -> Vec<Vec<ClassId>> {
        let mut visited: HashSet<&str> = HashSet::with_capacity(self.order.len());
        let mut components = Vec::new();
        for start in &self.order {
            if visited.contains(start.as_str()) {
                continue;
            }
            let mut component = Vec::new();
            let mut stack = vec![start.clone()];
            visited.insert(start.as_str());
            while let Some(id) = stack.pop() {
                component.push(id.clone());
                for n in self.neighbors(&id) {
                    if visited.insert(n.as_str()) {
                        stack.push(n.clone());
                    }
                }
            }
            // Keep graph-order within each component for determinism.
            component.sort_by_key(|id| self.order.iter().position(|o| o == id).unwrap());
            components.push(component);
        }
        components
    }

    /// Restricts the graph to `ids`, keeping each kept vertex's original
    /// `available` set and any adjacency edge whose *other* endpoint is also
    /// in `ids`. Used by the Parallel Dispatcher to color a chunk or
    /// connected component in isolation while still respecting intra-chunk
    /// edges (spec.md §4.8).
    pub fn restricted_to(&self, ids: &[ClassId]) -> Self {
        let keep: HashSet<&str> = ids.iter().map(|s| s.as_str()).collect();
        let order: Vec<ClassId> = self.order.iter().filter(|id| keep.contains(id.as_str())).cloned().collect();
        let mut available = HashMap::with_capacity(order.len());
        let mut adjacency: HashMap<ClassId, BTreeSet<ClassId>> = HashMap::with_capacity(order.len());
        for id in &order {
            available.insert(id.clone(), self.available[id].clone());
            let kept_neighbors: BTreeSet<ClassId> = self
                .adjacency[id]
                .iter()
                .filter(|n| keep.contains(n.as_str()))
                .cloned()
                .collect();
            adjacency.insert(id.clone(), kept_neighbors);
        }
        Self { order, available, adjacency }
    }

    /// A deterministic fingerprint of this graph's structure, used as the
    /// Schedule Cache key (spec.md §4.6).
    pub fn fingerprint(&self) -> u64 {
        use std::hash::{Hash, Hasher};
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        let mut ids: Vec<&ClassId> = self.order.iter().collect();
        ids.sort();
        for id in &ids {
            id.hash(&mut hasher);
            let neighbors = self.neighbors(id);
            for n in neighbors {
                n.hash(&mut hasher);
            }
        }
        hasher.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Slot;

    #[test]
    fn disjoint_forbidden_sets_yield_no_edge() {
        let classes = vec![
            ClassItem::new("A", "A").with_forbidden([Slot::new(1, 1)]),
            ClassItem::new("B", "B").with_forbidden([Slot::new(2, 2)]),
        ];
        let g = ConflictGraph::build(&classes).unwrap();
        assert!(g.neighbors("A").is_empty());
        assert!(g.neighbors("B").is_empty());
    }

    #[test]
    fn shared_forbidden_slot_yields_edge() {
        let classes = vec![
            ClassItem::new("A", "A").with_forbidden([Slot::new(1, 1)]),
            ClassItem::new("B", "B").with_forbidden([Slot::new(1, 1), Slot::new(2, 2)]),
        ];
        let g = ConflictGraph::build(&classes).unwrap();
        assert!(g.neighbors("A").contains("B"));
        assert!(g.neighbors("B").contains("A"));
    }

    #[test]
    fn fully_forbidden_class_is_rejected() {
        let all: Vec<Slot> = palette();
        let classes = vec![ClassItem::new("X", "X").with_forbidden(all)];
        assert!(ConflictGraph::build(&classes).is_err());
    }

    #[test]
    fn inactive_classes_are_excluded() {
        let mut b = ClassItem::new("B", "B");
        b.active = false;
        let classes = vec![ClassItem::new("A", "A"), b];
        let g = ConflictGraph::build(&classes).unwrap();
        assert_eq!(g.len(), 1);
    }

    #[test]
    fn connected_components_split_independent_cliques() {
        let classes = vec![
            ClassItem::new("A", "A").with_forbidden([Slot::new(1, 1)]),
            ClassItem::new("B", "B").with_forbidden([Slot::new(1, 1)]),
            ClassItem::new("C", "C").with_forbidden([Slot::new(2, 2)]),
            ClassItem::new("D", "D").with_forbidden([Slot::new(2, 2)]),
        ];
        let g = ConflictGraph::build(&classes).unwrap();
        let comps = g.connected_components();
        assert_eq!(comps.len(), 2);
    }

    #[test]
    fn fingerprint_is_deterministic() {
        let classes = vec![
            ClassItem::new("A", "A").with_forbidden([Slot::new(1, 1)]),
            ClassItem::new("B", "B").with_forbidden([Slot::new(1, 1)]),
        ];
        let g1 = ConflictGraph::build(&classes).unwrap();
        let g2 = ConflictGraph::build(&classes).unwrap();
        assert_eq!(g1.fingerprint(), g2.fingerprint());
    }
}
