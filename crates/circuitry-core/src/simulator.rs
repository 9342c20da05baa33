//! The single-threaded simulation facade.
//!
//! [`Simulator`] owns a circuit library, the netlists resolved from it, every
//! state tree and the propagator. Topology edits go through
//! [`Simulator::library_mut`]; before the next step the simulator notices the
//! changed generations, resolves again and re-keys every affected state node.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::circuit::{CircuitError, CircuitLibrary};
use crate::component::{ComponentData, ComponentKind};
use crate::config::{ConfigError, SimConfig};
use crate::id::{BundleId, CircuitId, ComponentId, PortRef, StateNodeId};
use crate::location::Location;
use crate::netlist::{Netlist, NetlistCache};
use crate::propagator::Propagator;
use crate::report::ConsistencyReport;
use crate::sim::{PropagatorStatus, StateHash, StepOutcome, StopHandle};
use crate::state::{StateError, StateTree};
use crate::value::Value;

/// Errors surfaced by the facade.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SimError {
    #[error(transparent)]
    Circuit(#[from] CircuitError),
    #[error(transparent)]
    State(#[from] StateError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("component {0:?} is not an input pin")]
    NotAnInputPin(ComponentId),
    #[error("value of width {got} poked into a pin of width {expected}")]
    WidthMismatch { expected: u8, got: u8 },
}

// ---------------------------------------------------------------------------
// Snapshots
// ---------------------------------------------------------------------------

/// Owned copy of one state node's bundle values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeSnapshot {
    pub circuit: CircuitId,
    pub parent: Option<StateNodeId>,
    pub bundle_values: Vec<Value>,
}

/// Immutable picture of the whole simulation between two steps.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimSnapshot {
    /// Publication sequence number; 0 for snapshots not taken via a handle.
    pub seq: u64,
    pub tick: u64,
    pub status: PropagatorStatus,
    pub nodes: BTreeMap<StateNodeId, NodeSnapshot>,
    pub report: ConsistencyReport,
    pub hash: u64,
}

impl SimSnapshot {
    pub fn bundle_value(&self, node: StateNodeId, bundle: BundleId) -> Option<Value> {
        self.nodes
            .get(&node)?
            .bundle_values
            .get(bundle.index())
            .copied()
    }
}

// ---------------------------------------------------------------------------
// Simulator
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Simulator {
    library: CircuitLibrary,
    netlists: NetlistCache,
    tree: StateTree,
    propagator: Propagator,
    config: SimConfig,
}

impl Simulator {
    pub fn new(library: CircuitLibrary) -> Result<Self, SimError> {
        Self::with_config(library, SimConfig::default())
    }

    pub fn with_config(library: CircuitLibrary, config: SimConfig) -> Result<Self, SimError> {
        config.validate()?;
        let mut netlists = NetlistCache::new();
        netlists.refresh(&library)?;
        Ok(Self {
            library,
            netlists,
            tree: StateTree::new(),
            propagator: Propagator::new(),
            config,
        })
    }

    pub fn library(&self) -> &CircuitLibrary {
        &self.library
    }

    /// Topology edits. Takes effect at the next sync or step.
    pub fn library_mut(&mut self) -> &mut CircuitLibrary {
        &mut self.library
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: SimConfig) -> Result<(), SimError> {
        config.validate()?;
        self.config = config;
        Ok(())
    }

    pub fn tree(&self) -> &StateTree {
        &self.tree
    }

    pub fn propagator(&self) -> &Propagator {
        &self.propagator
    }

    pub fn status(&self) -> PropagatorStatus {
        self.propagator.status()
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.propagator.stop_handle()
    }

    /// The current netlist of `circuit`, resolving it first if it is stale.
    pub fn netlist(&mut self, circuit: CircuitId) -> Result<Arc<Netlist>, SimError> {
        self.sync()?;
        self.netlists
            .get(circuit)
            .cloned()
            .ok_or(SimError::Circuit(CircuitError::CircuitNotFound(circuit)))
    }

    /// Bring netlists and state nodes up to date with the library.
    ///
    /// Nodes of removed definitions are destroyed with their subtrees; nodes
    /// whose netlist moved are re-keyed and fully re-marked.
    pub fn sync(&mut self) -> Result<(), SimError> {
        let changed = self.netlists.refresh(&self.library)?;
        if changed.is_empty() && self.tree.iter().all(|(_, n)| self.netlists.get(n.circuit()).is_some()) {
            return Ok(());
        }

        let orphaned: Vec<StateNodeId> = self
            .tree
            .iter()
            .filter(|(_, n)| self.netlists.get(n.circuit()).is_none())
            .map(|(id, _)| id)
            .collect();
        for id in orphaned {
            if self.tree.contains(id) {
                let removed = self.tree.destroy(id)?;
                self.propagator.purge(&removed);
            }
        }

        // Parents first, so destroyed children are never re-keyed.
        let mut order = Vec::new();
        let roots: Vec<StateNodeId> = self.tree.roots().collect();
        for root in roots {
            order.extend(self.tree.subtree(root));
        }
        for id in order {
            let Some(node) = self.tree.get(id) else {
                continue;
            };
            let stale = self
                .netlists
                .get(node.circuit())
                .is_some_and(|n| n.generation() != node.generation());
            if !stale {
                continue;
            }
            let outcome = self.tree.rekey(&self.netlists, id)?;
            self.propagator.purge(&outcome.removed);
            self.propagator.mark_node(&self.tree, id);
            for created in outcome.created {
                self.propagator.mark_node(&self.tree, created);
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // State lifecycle
    // -----------------------------------------------------------------------

    /// A fresh simulation root for `circuit`. Nothing is evaluated until the
    /// next step.
    pub fn create_root(&mut self, circuit: CircuitId) -> Result<StateNodeId, SimError> {
        self.sync()?;
        let created = self.tree.create_root(&self.netlists, circuit)?;
        for node in &created {
            self.propagator.mark_node(&self.tree, *node);
        }
        created
            .first()
            .copied()
            .ok_or(SimError::Circuit(CircuitError::CircuitNotFound(circuit)))
    }

    /// An independent deep copy of the subtree at `node`, as a new root.
    /// Pending work of the source carries over to the copy.
    pub fn clone_state(&mut self, node: StateNodeId) -> Result<StateNodeId, SimError> {
        self.sync()?;
        let source = self.tree.subtree(node);
        let created = self.tree.clone_subtree(node)?;
        let mapping: BTreeMap<StateNodeId, StateNodeId> =
            source.into_iter().zip(created.iter().copied()).collect();
        let pending: Vec<_> = self.propagator.queue().items().to_vec();
        for item in pending {
            if let Some(copy) = mapping.get(&item.node) {
                self.propagator.mark(*copy, item.component);
            }
        }
        created
            .first()
            .copied()
            .ok_or(SimError::State(StateError::NodeNotFound(node)))
    }

    /// Release `node` and all its descendants.
    pub fn destroy_state(&mut self, node: StateNodeId) -> Result<(), SimError> {
        let removed = self.tree.destroy(node)?;
        self.propagator.purge(&removed);
        Ok(())
    }

    /// The child node for sub-circuit `component` of `parent`, creating it
    /// if needed.
    pub fn child_state(
        &mut self,
        parent: StateNodeId,
        component: ComponentId,
    ) -> Result<StateNodeId, SimError> {
        self.sync()?;
        if let Some(child) = self.tree.node(parent)?.child(component) {
            return Ok(child);
        }
        let created = self.tree.instantiate_child(&self.netlists, parent, component)?;
        for node in &created {
            self.propagator.mark_node(&self.tree, *node);
        }
        self.propagator.mark(parent, component);
        created
            .first()
            .copied()
            .ok_or(SimError::State(StateError::NotASubcircuit(component)))
    }

    // -----------------------------------------------------------------------
    // Pokes and private data
    // -----------------------------------------------------------------------

    /// Set the value an input pin drives. Takes effect at the next step.
    pub fn poke_pin(&mut self, node: StateNodeId, pin: ComponentId, value: Value) -> Result<(), SimError> {
        self.sync()?;
        let state = self.tree.node_mut(node)?;
        let Some(ComponentKind::Pin { width, output: false }) = state.netlist().kind(pin).cloned() else {
            return Err(SimError::NotAnInputPin(pin));
        };
        if value.width() != width {
            return Err(SimError::WidthMismatch {
                expected: width,
                got: value.width(),
            });
        }
        state.set_data(pin, ComponentData::Pin { value })?;
        self.propagator.mark(node, pin);
        Ok(())
    }

    /// Poke the input pin carrying `label`.
    pub fn poke_label(&mut self, node: StateNodeId, label: &str, value: Value) -> Result<(), SimError> {
        let circuit = self.tree.node(node)?.circuit();
        let pin = self
            .library
            .circuit(circuit)
            .and_then(|c| c.find_labeled(label))
            .ok_or_else(|| SimError::Circuit(CircuitError::InvalidAttribute(format!("no component labeled {label}"))))?;
        self.poke_pin(node, pin, value)
    }

    pub fn component_data(&self, node: StateNodeId, component: ComponentId) -> Result<ComponentData, SimError> {
        let state = self.tree.node(node)?;
        if state.netlist().kind(component).is_none() {
            return Err(StateError::StaleComponent(component).into());
        }
        state
            .data(component)
            .cloned()
            .ok_or(SimError::State(StateError::NoData(component)))
    }

    /// Overwrite a component's private data (register and memory editors).
    pub fn set_component_data(
        &mut self,
        node: StateNodeId,
        component: ComponentId,
        data: ComponentData,
    ) -> Result<(), SimError> {
        self.sync()?;
        self.tree.node_mut(node)?.set_data(component, data)?;
        self.propagator.mark(node, component);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Stepping
    // -----------------------------------------------------------------------

    /// Drain pending work.
    pub fn nudge(&mut self) -> Result<StepOutcome, SimError> {
        self.sync()?;
        Ok(self
            .propagator
            .nudge(&mut self.tree, &self.netlists, &self.config))
    }

    /// Advance the clock and drain.
    pub fn tick(&mut self) -> Result<StepOutcome, SimError> {
        self.sync()?;
        Ok(self
            .propagator
            .tick(&mut self.tree, &self.netlists, &self.config))
    }

    /// Clear every node's values and private data, rewind the clock, and
    /// settle from scratch.
    pub fn reset(&mut self) -> Result<StepOutcome, SimError> {
        self.sync()?;
        self.propagator.reset();
        let roots: Vec<StateNodeId> = self.tree.roots().collect();
        for root in &roots {
            self.tree.reset_subtree(*root);
        }
        let ids: Vec<StateNodeId> = self.tree.ids().collect();
        for id in ids {
            self.propagator.mark_node(&self.tree, id);
        }
        tracing::info!(roots = roots.len(), "simulation reset");
        Ok(self
            .propagator
            .nudge(&mut self.tree, &self.netlists, &self.config))
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn bundle_value(&self, node: StateNodeId, bundle: BundleId) -> Result<Value, SimError> {
        let state = self.tree.node(node)?;
        state
            .bundle_value(bundle)
            .ok_or_else(|| SimError::State(StateError::NodeNotFound(node)))
    }

    /// Value at one port of one component, fitted to the port width.
    pub fn port_value(&self, node: StateNodeId, component: ComponentId, port: usize) -> Result<Value, SimError> {
        let state = self.tree.node(node)?;
        let ports = state
            .netlist()
            .component_ports(component)
            .ok_or(StateError::StaleComponent(component))?;
        if port >= ports.specs.len() {
            return Err(CircuitError::PortNotFound { component, port }.into());
        }
        state
            .port_value(PortRef::new(component, port))
            .ok_or_else(|| SimError::State(StateError::StaleComponent(component)))
    }

    /// Value of the bundle at a schematic point, for wire colouring. Points
    /// inside a wire read as the wire's bundle.
    pub fn value_at(&self, node: StateNodeId, location: Location) -> Result<Option<Value>, SimError> {
        let state = self.tree.node(node)?;
        let netlist = state.netlist();
        let bundle = netlist.bundle_at(location).or_else(|| {
            self.library
                .circuit(state.circuit())?
                .wires()
                .find(|(_, w)| w.contains(location))
                .and_then(|(_, w)| netlist.bundle_at(w.a))
        });
        Ok(bundle.and_then(|b| state.bundle_value(b)))
    }

    pub fn report(&self) -> ConsistencyReport {
        let last = self.propagator.last_outcome();
        ConsistencyReport::collect(&self.netlists, &self.tree, self.propagator.status(), &last.oscillating)
    }

    /// Hash of the tick counter and every node's bundle values, taken in
    /// tree order (roots, then depth-first by sub-circuit component), so the
    /// hash does not depend on arena slot numbers.
    pub fn state_hash(&self) -> StateHash {
        let mut hash = StateHash::new();
        hash.write_u64(self.propagator.tick_count());
        let roots: Vec<StateNodeId> = self.tree.roots().collect();
        for root in roots {
            for id in self.tree.subtree(root) {
                if let Some(node) = self.tree.get(id) {
                    hash.write_u32(node.bundle_values().len() as u32);
                    for v in node.bundle_values() {
                        hash.write_value(v);
                    }
                }
            }
        }
        hash
    }

    pub fn snapshot(&self) -> SimSnapshot {
        let nodes = self
            .tree
            .iter()
            .map(|(id, n)| {
                (
                    id,
                    NodeSnapshot {
                        circuit: n.circuit(),
                        parent: n.parent().map(|(p, _)| p),
                        bundle_values: n.bundle_values().to_vec(),
                    },
                )
            })
            .collect();
        SimSnapshot {
            seq: 0,
            tick: self.propagator.tick_count(),
            status: self.propagator.status(),
            nodes,
            report: self.report(),
            hash: self.state_hash().finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::*;

    #[test]
    fn poke_validates_pin_and_width() {
        let and = and_with_switches();
        let mut sim = Simulator::new(and.library).unwrap();
        let root = sim.create_root(and.circuit).unwrap();
        assert_eq!(
            sim.poke_pin(root, and.gate, Value::TRUE),
            Err(SimError::NotAnInputPin(and.gate))
        );
        assert_eq!(
            sim.poke_pin(root, and.a, Value::from_int(2, 1)),
            Err(SimError::WidthMismatch { expected: 1, got: 2 })
        );
    }

    #[test]
    fn wire_edit_rekeys_before_next_step() {
        let and = and_with_switches();
        let mut sim = Simulator::new(and.library).unwrap();
        let root = sim.create_root(and.circuit).unwrap();
        sim.poke_pin(root, and.a, Value::TRUE).unwrap();
        sim.poke_pin(root, and.b, Value::TRUE).unwrap();
        sim.nudge().unwrap();
        assert_eq!(sim.port_value(root, and.out, 0).unwrap(), Value::TRUE);

        for wire in &and.b_wires {
            sim.library_mut().remove_wire(and.circuit, *wire).unwrap();
        }
        sim.nudge().unwrap();
        assert_eq!(sim.port_value(root, and.out, 0).unwrap(), Value::unknown(1));
    }

    #[test]
    fn value_at_reads_wire_interior() {
        let bus = contention_bus();
        let mut sim = Simulator::new(bus.library).unwrap();
        let root = sim.create_root(bus.circuit).unwrap();
        sim.nudge().unwrap();
        let v = sim.value_at(root, Location::new(25, 0)).unwrap().unwrap();
        assert_eq!(v, Value::error(1));
        assert_eq!(sim.value_at(root, Location::new(999, 999)).unwrap(), None);
    }

    #[test]
    fn reset_rewinds_clock_and_data() {
        let clocked = clock_probe();
        let mut sim = Simulator::new(clocked.library).unwrap();
        let root = sim.create_root(clocked.circuit).unwrap();
        sim.tick().unwrap();
        assert_eq!(sim.port_value(root, clocked.probe, 0).unwrap(), Value::TRUE);
        sim.reset().unwrap();
        assert_eq!(sim.propagator().tick_count(), 0);
        assert_eq!(sim.port_value(root, clocked.probe, 0).unwrap(), Value::FALSE);
    }

    #[test]
    fn removing_root_definition_destroys_its_states() {
        let and = and_with_switches();
        let mut sim = Simulator::new(and.library).unwrap();
        let root = sim.create_root(and.circuit).unwrap();
        sim.library_mut().remove_circuit(and.circuit).unwrap();
        sim.sync().unwrap();
        assert!(sim.tree().get(root).is_none());
        assert_eq!(
            sim.bundle_value(root, BundleId(0)),
            Err(SimError::State(StateError::NodeNotFound(root)))
        );
    }

    #[test]
    fn invalid_config_rejected() {
        let config = SimConfig {
            max_rounds: 0,
            ..SimConfig::default()
        };
        assert_eq!(
            Simulator::with_config(CircuitLibrary::new(), config).unwrap_err(),
            SimError::Config(ConfigError::ZeroRoundBudget)
        );
    }
}
