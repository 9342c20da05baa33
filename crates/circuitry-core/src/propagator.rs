//! The event-driven propagator.
//!
//! Work is drained in rounds. A round takes every pending item, in marking
//! order (or reversed, per [`QueueOrder`]), and evaluates each one against the
//! bundle values as they stood when the round began. What the items drive is
//! collected and committed only once the whole round has been evaluated, so
//! every component in a round sees the same inputs and the processing order
//! cannot change the outcome. A register fed by another register's output
//! therefore latches the old value on a shared clock edge.
//!
//! Committed outputs that change a bundle mark every component attached to
//! that bundle; those marks form the next round. The drain ends when a round
//! leaves nothing behind (a fixpoint), when the round budget runs out
//! (oscillation), or when a stop request is seen at a round boundary.
//!
//! No wall-clock time is involved anywhere, so a given circuit and input
//! sequence always takes the same number of rounds and ends in the same
//! state.

use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;

use crate::component::{ComponentData, ComponentKind};
use crate::config::{QueueOrder, SimConfig};
use crate::id::{BundleId, ComponentId, PortRef, StateNodeId};
use crate::location::Location;
use crate::netlist::NetlistCache;
use crate::queue::{WorkItem, WorkQueue};
use crate::sim::{BundleRef, PropagatorStatus, StepOutcome, StopHandle};
use crate::state::StateTree;
use crate::value::Value;

type Change = (StateNodeId, BundleId);

/// A write produced while evaluating a round, applied after it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Commit {
    /// An output port asserts a value onto its bundle.
    Drive {
        node: StateNodeId,
        port: PortRef,
        value: Value,
    },
    /// A parent port value copied onto a child's input pin.
    ChildPin {
        node: StateNodeId,
        pin: ComponentId,
        value: Value,
    },
}

/// Drives every state node of a [`StateTree`] towards a fixpoint.
#[derive(Debug, Clone, Default)]
pub struct Propagator {
    queue: WorkQueue,
    status: PropagatorStatus,
    tick: u64,
    stop: StopHandle,
    last: StepOutcome,
}

impl Propagator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> PropagatorStatus {
        self.status
    }

    /// Clock ticks elapsed since the last reset.
    pub fn tick_count(&self) -> u64 {
        self.tick
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn queue(&self) -> &WorkQueue {
        &self.queue
    }

    /// Outcome of the most recent drain.
    pub fn last_outcome(&self) -> &StepOutcome {
        &self.last
    }

    pub fn has_pending(&self) -> bool {
        !self.queue.is_empty()
    }

    // -----------------------------------------------------------------------
    // Marking
    // -----------------------------------------------------------------------

    pub fn mark(&mut self, node: StateNodeId, component: ComponentId) {
        self.queue.mark(node, component);
    }

    /// Mark every evaluated component of `node`.
    pub fn mark_node(&mut self, tree: &StateTree, node: StateNodeId) {
        let Some(state) = tree.get(node) else {
            return;
        };
        for (id, kind) in state.netlist().components() {
            if kind.is_evaluated() {
                self.queue.mark(node, id);
            }
        }
    }

    /// Forget pending work for destroyed nodes.
    pub fn purge(&mut self, nodes: &[StateNodeId]) {
        self.queue.purge(nodes);
    }

    /// Back to tick zero with nothing pending.
    pub fn reset(&mut self) {
        self.queue.clear();
        self.tick = 0;
        self.status = PropagatorStatus::Idle;
        self.last = StepOutcome::default();
    }

    // -----------------------------------------------------------------------
    // Stepping
    // -----------------------------------------------------------------------

    /// Drain pending work to a fixpoint, the round budget, or a stop request.
    pub fn nudge(
        &mut self,
        tree: &mut StateTree,
        netlists: &NetlistCache,
        config: &SimConfig,
    ) -> StepOutcome {
        self.status = PropagatorStatus::Running;
        let mut outcome = StepOutcome::default();
        let window = config.oscillation_window.max(1) as usize;
        let mut recent: VecDeque<BTreeSet<Change>> = VecDeque::with_capacity(window);

        loop {
            if self.queue.is_empty() {
                self.status = PropagatorStatus::Idle;
                break;
            }
            if self.stop.take() {
                tracing::info!(rounds = outcome.rounds, pending = self.queue.len(), "propagation stopped");
                self.status = PropagatorStatus::Stopped;
                break;
            }
            if outcome.rounds >= config.max_rounds {
                self.status = PropagatorStatus::Oscillating;
                outcome.oscillating = oscillating_bundles(tree, &recent);
                tracing::warn!(
                    rounds = outcome.rounds,
                    bundles = outcome.oscillating.len(),
                    "propagation did not settle"
                );
                break;
            }

            let mut round = self.queue.take_round();
            if config.queue_order == QueueOrder::Reverse {
                round.reverse();
            }
            tracing::trace!(round = outcome.rounds, items = round.len(), "propagation round");

            let mut commits = Vec::new();
            for item in round {
                outcome.evaluations += 1;
                self.evaluate(tree, netlists, item, &mut commits);
            }
            let mut changed = BTreeSet::new();
            for commit in commits {
                self.apply(tree, commit, &mut changed);
            }
            outcome.changes += changed.len() as u64;
            if recent.len() == window {
                recent.pop_front();
            }
            recent.push_back(changed);
            outcome.rounds += 1;
        }

        outcome.status = self.status;
        self.last = outcome.clone();
        outcome
    }

    /// Advance the clock one tick, re-evaluate every clock, then drain.
    pub fn tick(
        &mut self,
        tree: &mut StateTree,
        netlists: &NetlistCache,
        config: &SimConfig,
    ) -> StepOutcome {
        self.tick += 1;
        let clocks: Vec<WorkItem> = tree
            .iter()
            .flat_map(|(node, state)| {
                state
                    .netlist()
                    .components()
                    .filter(|(_, kind)| matches!(kind, ComponentKind::Clock { .. }))
                    .map(move |(id, _)| WorkItem::new(node, id))
                    .collect::<Vec<_>>()
            })
            .collect();
        for item in clocks {
            self.queue.push(item);
        }
        self.nudge(tree, netlists, config)
    }

    // -----------------------------------------------------------------------
    // Evaluation
    // -----------------------------------------------------------------------

    fn evaluate(
        &mut self,
        tree: &mut StateTree,
        netlists: &NetlistCache,
        item: WorkItem,
        commits: &mut Vec<Commit>,
    ) {
        let Some(state) = tree.get(item.node) else {
            return;
        };
        let netlist = Arc::clone(state.netlist());
        let Some(kind) = netlist.kind(item.component) else {
            return;
        };
        match kind {
            ComponentKind::Subcircuit { .. } => {
                self.evaluate_subcircuit(tree, netlists, item, commits);
            }
            ComponentKind::Pin { output: true, .. } => {
                if let Some((parent, component)) = state.parent() {
                    self.queue.mark(parent, component);
                }
            }
            _ => {
                let inputs = state.input_values(item.component);
                let Some(state) = tree.get_mut(item.node) else {
                    return;
                };
                let outputs = kind.evaluate(&inputs, state.data_mut(item.component), self.tick);
                commits.extend(outputs.into_iter().map(|(port, value)| Commit::Drive {
                    node: item.node,
                    port: PortRef::new(item.component, port),
                    value,
                }));
            }
        }
    }

    /// Copy parent port values onto the child's input pins, and the child's
    /// output pin values onto the parent's output ports.
    fn evaluate_subcircuit(
        &mut self,
        tree: &mut StateTree,
        netlists: &NetlistCache,
        item: WorkItem,
        commits: &mut Vec<Commit>,
    ) {
        let existing = tree.get(item.node).and_then(|s| s.child(item.component));
        let child = match existing {
            Some(child) => child,
            None => match tree.instantiate_child(netlists, item.node, item.component) {
                Ok(created) => {
                    for node in &created {
                        self.mark_node(tree, *node);
                    }
                    match created.first() {
                        Some(child) => *child,
                        None => return,
                    }
                }
                Err(e) => {
                    tracing::warn!(node = ?item.node, component = ?item.component, error = %e, "sub-circuit not instantiated");
                    return;
                }
            },
        };

        let Some(parent_inputs) = tree.get(item.node).map(|s| s.input_values(item.component)) else {
            return;
        };
        let Some(child_state) = tree.get(child) else {
            return;
        };
        let interface = child_state.netlist().interface();

        for (pin, value) in interface.inputs.iter().zip(&parent_inputs) {
            commits.push(Commit::ChildPin {
                node: child,
                pin: pin.component,
                value: *value,
            });
        }

        let first_output = interface.inputs.len();
        for (j, pin) in interface.outputs.iter().enumerate() {
            let value = child_state
                .port_value(PortRef::new(pin.component, 0))
                .unwrap_or(Value::unknown(pin.width));
            commits.push(Commit::Drive {
                node: item.node,
                port: PortRef::new(item.component, first_output + j),
                value,
            });
        }
    }

    /// Apply one write from the round just evaluated.
    fn apply(&mut self, tree: &mut StateTree, commit: Commit, changed: &mut BTreeSet<Change>) {
        match commit {
            Commit::Drive { node, port, value } => self.drive(tree, node, port, value, changed),
            Commit::ChildPin { node, pin, value } => {
                let Some(state) = tree.get_mut(node) else {
                    return;
                };
                if let Some(ComponentData::Pin { value: current }) = state.data_mut(pin) {
                    if *current != value {
                        *current = value;
                        self.queue.mark(node, pin);
                    }
                }
            }
        }
    }

    fn drive(
        &mut self,
        tree: &mut StateTree,
        node: StateNodeId,
        port: PortRef,
        value: Value,
        changed: &mut BTreeSet<Change>,
    ) {
        let Some(state) = tree.get_mut(node) else {
            return;
        };
        let bundles = state.drive(port, value);
        if bundles.is_empty() {
            return;
        }
        let netlist = Arc::clone(state.netlist());
        for bundle in bundles {
            changed.insert((node, bundle));
            if let Some(b) = netlist.bundle(bundle) {
                for component in &b.components {
                    self.queue.mark(node, *component);
                }
            }
        }
    }
}

fn oscillating_bundles(tree: &StateTree, recent: &VecDeque<BTreeSet<Change>>) -> Vec<BundleRef> {
    let all: BTreeSet<Change> = recent.iter().flatten().copied().collect();
    all.into_iter()
        .filter_map(|(node, bundle)| {
            let state = tree.get(node)?;
            let location = state
                .netlist()
                .bundle(bundle)?
                .locations
                .first()
                .copied()
                .unwrap_or(Location::new(0, 0));
            Some(BundleRef {
                node,
                circuit: state.circuit(),
                bundle,
                location,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::*;

    fn setup(lib: &crate::circuit::CircuitLibrary, circuit: crate::id::CircuitId) -> (NetlistCache, StateTree, Propagator, StateNodeId) {
        let mut netlists = NetlistCache::new();
        netlists.refresh(lib).unwrap();
        let mut tree = StateTree::new();
        let created = tree.create_root(&netlists, circuit).unwrap();
        let mut prop = Propagator::new();
        for node in &created {
            prop.mark_node(&tree, *node);
        }
        (netlists, tree, prop, created[0])
    }

    fn poke(tree: &mut StateTree, prop: &mut Propagator, node: StateNodeId, pin: ComponentId, v: Value) {
        tree.node_mut(node)
            .unwrap()
            .set_data(pin, ComponentData::Pin { value: v })
            .unwrap();
        prop.mark(node, pin);
    }

    #[test]
    fn and_gate_settles() {
        let and = and_with_switches();
        let config = SimConfig::default();
        let (netlists, mut tree, mut prop, root) = setup(&and.library, and.circuit);
        poke(&mut tree, &mut prop, root, and.a, Value::TRUE);
        let outcome = prop.nudge(&mut tree, &netlists, &config);
        assert!(outcome.is_stable());
        let out = tree.node(root).unwrap().port_value(PortRef::new(and.out, 0));
        assert_eq!(out, Some(Value::FALSE));

        poke(&mut tree, &mut prop, root, and.b, Value::TRUE);
        prop.nudge(&mut tree, &netlists, &config);
        let out = tree.node(root).unwrap().port_value(PortRef::new(and.out, 0));
        assert_eq!(out, Some(Value::TRUE));

        // Settled: another nudge does nothing.
        let again = prop.nudge(&mut tree, &netlists, &config);
        assert_eq!(again.rounds, 0);
        assert_eq!(again.changes, 0);
    }

    #[test]
    fn plain_inverter_ring_oscillates_from_power_on() {
        let ring = inverter_ring();
        let config = SimConfig {
            max_rounds: 50,
            ..SimConfig::default()
        };
        let (netlists, mut tree, mut prop, root) = setup(&ring.library, ring.circuit);
        let outcome = prop.nudge(&mut tree, &netlists, &config);
        assert_eq!(outcome.status, PropagatorStatus::Oscillating);
        assert_eq!(outcome.rounds, 50);

        let netlist = Arc::clone(tree.node(root).unwrap().netlist());
        for stage in &ring.stages {
            let out = netlist.port_bundle(PortRef::new(*stage, 1)).unwrap();
            assert!(outcome.oscillating.iter().any(|r| r.bundle == out));
            let level = tree.node(root).unwrap().bundle_value(out).unwrap();
            assert!(level.is_fully_defined());
        }

        // Reset powers the gates up low again, and the ring runs again.
        tree.reset_subtree(root);
        prop.reset();
        prop.mark_node(&tree, root);
        let outcome = prop.nudge(&mut tree, &netlists, &config);
        assert_eq!(outcome.status, PropagatorStatus::Oscillating);
    }

    #[test]
    fn kicked_ring_oscillates_within_budget() {
        let ring = kicked_ring();
        let config = SimConfig {
            max_rounds: 50,
            ..SimConfig::default()
        };
        let (netlists, mut tree, mut prop, root) = setup(&ring.library, ring.circuit);
        poke(&mut tree, &mut prop, root, ring.kick, Value::TRUE);
        assert!(prop.nudge(&mut tree, &netlists, &config).is_stable());

        poke(&mut tree, &mut prop, root, ring.kick, Value::FALSE);
        let outcome = prop.nudge(&mut tree, &netlists, &config);
        assert_eq!(outcome.status, PropagatorStatus::Oscillating);
        assert_eq!(outcome.rounds, 50);
        assert!(!outcome.oscillating.is_empty());
        assert_eq!(prop.status(), PropagatorStatus::Oscillating);
    }

    #[test]
    fn stop_request_keeps_queue() {
        let ring = kicked_ring();
        let config = SimConfig::default();
        let (netlists, mut tree, mut prop, root) = setup(&ring.library, ring.circuit);
        poke(&mut tree, &mut prop, root, ring.kick, Value::TRUE);
        prop.stop_handle().request_stop();
        let outcome = prop.nudge(&mut tree, &netlists, &config);
        assert_eq!(outcome.status, PropagatorStatus::Stopped);
        assert_eq!(outcome.rounds, 0);
        assert!(prop.has_pending());
        assert!(prop.nudge(&mut tree, &netlists, &config).is_stable());
    }

    #[test]
    fn clock_tick_toggles_output() {
        let clocked = clock_probe();
        let config = SimConfig::default();
        let (netlists, mut tree, mut prop, root) = setup(&clocked.library, clocked.circuit);
        prop.nudge(&mut tree, &netlists, &config);
        let probe = PortRef::new(clocked.probe, 0);
        assert_eq!(tree.node(root).unwrap().port_value(probe), Some(Value::FALSE));
        prop.tick(&mut tree, &netlists, &config);
        assert_eq!(prop.tick_count(), 1);
        assert_eq!(tree.node(root).unwrap().port_value(probe), Some(Value::TRUE));
        prop.tick(&mut tree, &netlists, &config);
        assert_eq!(tree.node(root).unwrap().port_value(probe), Some(Value::FALSE));
    }

    #[test]
    fn registers_in_series_move_one_stage_per_edge() {
        for order in [QueueOrder::Insertion, QueueOrder::Reverse] {
            let chain = shift_chain();
            let config = SimConfig {
                queue_order: order,
                ..SimConfig::default()
            };
            let (netlists, mut tree, mut prop, root) = setup(&chain.library, chain.circuit);
            poke(&mut tree, &mut prop, root, chain.data, Value::TRUE);
            assert!(prop.nudge(&mut tree, &netlists, &config).is_stable());

            let q = |tree: &StateTree, i: usize| {
                let port = PortRef::new(chain.registers[i], crate::component::ports::REGISTER_Q);
                tree.node(root).unwrap().port_value(port).unwrap()
            };
            prop.tick(&mut tree, &netlists, &config);
            assert_eq!((q(&tree, 0), q(&tree, 1)), (Value::TRUE, Value::FALSE), "{order:?}");
            prop.tick(&mut tree, &netlists, &config);
            assert_eq!((q(&tree, 0), q(&tree, 1)), (Value::TRUE, Value::FALSE), "{order:?}");
            prop.tick(&mut tree, &netlists, &config);
            assert_eq!((q(&tree, 0), q(&tree, 1)), (Value::TRUE, Value::TRUE), "{order:?}");
        }
    }

    #[test]
    fn round_reads_values_from_before_the_round() {
        let ring = inverter_ring();
        let config = SimConfig {
            max_rounds: 1,
            ..SimConfig::default()
        };
        let (netlists, mut tree, mut prop, root) = setup(&ring.library, ring.circuit);
        prop.nudge(&mut tree, &netlists, &config);
        // Every stage saw the powered-up 0 on its input, whatever the order.
        let state = tree.node(root).unwrap();
        for stage in &ring.stages {
            assert_eq!(state.port_value(PortRef::new(*stage, 1)), Some(Value::TRUE));
        }
    }

    #[test]
    fn destroyed_nodes_are_skipped() {
        let and = and_with_switches();
        let config = SimConfig::default();
        let (netlists, mut tree, mut prop, root) = setup(&and.library, and.circuit);
        let removed = tree.destroy(root).unwrap();
        prop.purge(&removed);
        assert!(!prop.has_pending());
        assert!(prop.nudge(&mut tree, &netlists, &config).is_stable());
    }
}
