//! Width and consistency diagnostics.
//!
//! A [`ConsistencyReport`] is an owned, read-only summary built after a
//! resolution or propagation pass. It never affects simulation; the caller
//! decides how to show it.

use std::collections::{BTreeMap, BTreeSet};

use crate::id::{BundleId, CircuitId, StateNodeId};
use crate::location::Location;
use crate::netlist::NetlistCache;
use crate::sim::{BundleRef, PropagatorStatus};
use crate::state::StateTree;

/// A bundle of a circuit definition whose ports disagree on width.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WidthConflict {
    pub circuit: CircuitId,
    pub bundle: BundleId,
    pub location: Location,
    pub widths: Vec<u8>,
}

/// Health of one bundle in one state node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BundleStatus {
    Ok,
    WidthConflict { location: Location, widths: Vec<u8> },
    /// The bundle was still changing when propagation gave up.
    Oscillating { location: Location },
    /// Error bits remain after the fixpoint.
    Contention { location: Location },
}

impl BundleStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, BundleStatus::Ok)
    }

    /// Representative failure point, if any.
    pub fn location(&self) -> Option<Location> {
        match self {
            BundleStatus::Ok => None,
            BundleStatus::WidthConflict { location, .. }
            | BundleStatus::Oscillating { location }
            | BundleStatus::Contention { location } => Some(*location),
        }
    }
}

/// Everything currently wrong with the simulated circuits.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsistencyReport {
    pub width_conflicts: Vec<WidthConflict>,
    /// Bundles holding E bits after a completed drain.
    pub contentions: Vec<BundleRef>,
    pub oscillating: Vec<BundleRef>,
    node_circuits: BTreeMap<StateNodeId, CircuitId>,
}

impl ConsistencyReport {
    /// Gather diagnostics from resolved netlists and the current state.
    ///
    /// Contention is only meaningful at a fixpoint, so it is collected only
    /// when the last drain finished idle.
    pub fn collect(
        netlists: &NetlistCache,
        tree: &StateTree,
        status: PropagatorStatus,
        oscillating: &[BundleRef],
    ) -> Self {
        let mut report = ConsistencyReport::default();
        let circuits: BTreeSet<CircuitId> = tree.iter().map(|(_, n)| n.circuit()).collect();
        for circuit in circuits {
            let Some(netlist) = netlists.get(circuit) else {
                continue;
            };
            report
                .width_conflicts
                .extend(netlist.conflicts().iter().map(|c| WidthConflict {
                    circuit,
                    bundle: c.bundle,
                    location: c.location,
                    widths: c.widths.clone(),
                }));
        }

        for (id, node) in tree.iter() {
            report.node_circuits.insert(id, node.circuit());
            if status != PropagatorStatus::Idle {
                continue;
            }
            for (b, value) in node.bundle_values().iter().enumerate() {
                if !value.has_error() {
                    continue;
                }
                let bundle = BundleId(b as u32);
                let location = node
                    .netlist()
                    .bundle(bundle)
                    .and_then(|b| b.locations.first().copied())
                    .unwrap_or(Location::new(0, 0));
                report.contentions.push(BundleRef {
                    node: id,
                    circuit: node.circuit(),
                    bundle,
                    location,
                });
            }
        }
        report.contentions.sort();

        if status == PropagatorStatus::Oscillating {
            report.oscillating = oscillating.to_vec();
        }
        report
    }

    pub fn is_clean(&self) -> bool {
        self.width_conflicts.is_empty() && self.contentions.is_empty() && self.oscillating.is_empty()
    }

    /// Is this bundle OK, and if not, where should the failure be shown.
    pub fn bundle_status(&self, node: StateNodeId, bundle: BundleId) -> BundleStatus {
        if let Some(circuit) = self.node_circuits.get(&node) {
            if let Some(c) = self
                .width_conflicts
                .iter()
                .find(|c| c.circuit == *circuit && c.bundle == bundle)
            {
                return BundleStatus::WidthConflict {
                    location: c.location,
                    widths: c.widths.clone(),
                };
            }
        }
        let matches = |r: &&BundleRef| r.node == node && r.bundle == bundle;
        if let Some(r) = self.oscillating.iter().find(matches) {
            return BundleStatus::Oscillating {
                location: r.location,
            };
        }
        if let Some(r) = self.contentions.iter().find(matches) {
            return BundleStatus::Contention {
                location: r.location,
            };
        }
        BundleStatus::Ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit::CircuitLibrary;
    use crate::component::ComponentKind;
    use crate::config::SimConfig;
    use crate::propagator::Propagator;
    use crate::test_utils::*;

    #[test]
    fn width_conflict_reported_with_location() {
        let mut lib = CircuitLibrary::new();
        let c = lib.add_circuit("c");
        lib.add_component(c, ComponentKind::Pin { width: 2, output: false }, Location::new(0, 0))
            .unwrap();
        lib.add_component(c, ComponentKind::Pin { width: 3, output: true }, Location::new(30, 0))
            .unwrap();
        lib.add_wire(c, Location::new(0, 0), Location::new(30, 0)).unwrap();
        let mut netlists = NetlistCache::new();
        netlists.refresh(&lib).unwrap();
        let mut tree = StateTree::new();
        let root = tree.create_root(&netlists, c).unwrap()[0];

        let report = ConsistencyReport::collect(&netlists, &tree, PropagatorStatus::Idle, &[]);
        assert_eq!(report.width_conflicts.len(), 1);
        let status = report.bundle_status(root, BundleId(0));
        assert_eq!(
            status,
            BundleStatus::WidthConflict {
                location: Location::new(0, 0),
                widths: vec![2, 3],
            }
        );
        assert_eq!(status.location(), Some(Location::new(0, 0)));
        assert!(!report.is_clean());
    }

    #[test]
    fn contention_reported_after_fixpoint() {
        let bus = contention_bus();
        let mut netlists = NetlistCache::new();
        netlists.refresh(&bus.library).unwrap();
        let mut tree = StateTree::new();
        let root = tree.create_root(&netlists, bus.circuit).unwrap()[0];
        let mut prop = Propagator::new();
        prop.mark_node(&tree, root);
        let outcome = prop.nudge(&mut tree, &netlists, &SimConfig::default());

        let report = ConsistencyReport::collect(&netlists, &tree, outcome.status, &outcome.oscillating);
        assert_eq!(report.contentions.len(), 1);
        let bundle = report.contentions[0].bundle;
        assert!(matches!(
            report.bundle_status(root, bundle),
            BundleStatus::Contention { .. }
        ));
    }

    #[test]
    fn empty_tree_is_clean() {
        let report = ConsistencyReport::collect(
            &NetlistCache::new(),
            &StateTree::new(),
            PropagatorStatus::Idle,
            &[],
        );
        assert!(report.is_clean());
    }
}
