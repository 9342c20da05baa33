//! The simulation state tree.
//!
//! One [`StateNode`] exists per instantiation of a circuit definition. A
//! definition placed twice as a sub-circuit gets two nodes with independent
//! bundle values and component data. Nodes live in a slot arena: a
//! destroyed node's id simply stops resolving, so long-lived holders of an
//! id (a UI tree view, say) cannot keep a dead subtree alive.
//!
//! Links point both ways but are plain ids: a node knows its parent and the
//! sub-circuit component it stands for, and keeps a map from its own
//! sub-circuit components to child nodes. Definitions are referenced by
//! [`CircuitId`] and by the shared [`Netlist`] the node was keyed against.

use std::collections::BTreeMap;
use std::sync::Arc;

use slotmap::{SecondaryMap, SlotMap};

use crate::component::{ComponentData, ComponentKind, PortDir};
use crate::id::{BundleId, CircuitId, ComponentId, PortRef, StateNodeId};
use crate::netlist::{BundleWidth, Netlist, NetlistCache};
use crate::value::{BitState, Value};

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors from state tree operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StateError {
    #[error("state node not found: {0:?}")]
    NodeNotFound(StateNodeId),
    #[error("no resolved netlist for circuit {0:?}")]
    UnknownCircuit(CircuitId),
    #[error("component {0:?} does not exist in this state node's circuit")]
    StaleComponent(ComponentId),
    #[error("component {0:?} is not a sub-circuit")]
    NotASubcircuit(ComponentId),
    #[error("circuit {0:?} would be instantiated inside itself")]
    RecursiveInstantiation(CircuitId),
    #[error("data does not match the kind of component {0:?}")]
    DataMismatch(ComponentId),
    #[error("component {0:?} keeps no private data")]
    NoData(ComponentId),
}

// ---------------------------------------------------------------------------
// StateNode
// ---------------------------------------------------------------------------

/// Mutable simulation state of one circuit instantiation.
#[derive(Debug, Clone)]
pub struct StateNode {
    circuit: CircuitId,
    parent: Option<(StateNodeId, ComponentId)>,
    children: BTreeMap<ComponentId, StateNodeId>,
    netlist: Arc<Netlist>,
    threads: Vec<BitState>,
    bundle_values: Vec<Value>,
    drivers: BTreeMap<PortRef, Value>,
    data: SecondaryMap<ComponentId, ComponentData>,
}

impl StateNode {
    fn new(netlist: Arc<Netlist>, parent: Option<(StateNodeId, ComponentId)>) -> Self {
        let mut node = Self {
            circuit: netlist.circuit(),
            parent,
            children: BTreeMap::new(),
            threads: Vec::new(),
            bundle_values: Vec::new(),
            drivers: BTreeMap::new(),
            data: SecondaryMap::new(),
            netlist,
        };
        node.seed_drivers();
        node.reset_values();
        node.reset_data();
        node
    }

    pub fn circuit(&self) -> CircuitId {
        self.circuit
    }

    /// Enclosing node and the sub-circuit component this node stands for.
    pub fn parent(&self) -> Option<(StateNodeId, ComponentId)> {
        self.parent
    }

    pub fn child(&self, component: ComponentId) -> Option<StateNodeId> {
        self.children.get(&component).copied()
    }

    pub fn children(&self) -> impl Iterator<Item = (ComponentId, StateNodeId)> + '_ {
        self.children.iter().map(|(c, n)| (*c, *n))
    }

    pub fn netlist(&self) -> &Arc<Netlist> {
        &self.netlist
    }

    /// Generation of the netlist this node is keyed against.
    pub fn generation(&self) -> u64 {
        self.netlist.generation()
    }

    pub fn bundle_value(&self, bundle: BundleId) -> Option<Value> {
        self.bundle_values.get(bundle.index()).copied()
    }

    pub fn bundle_values(&self) -> &[Value] {
        &self.bundle_values
    }

    /// Value present at a port, fitted to the port's width.
    pub fn port_value(&self, port: PortRef) -> Option<Value> {
        let ports = self.netlist.component_ports(port.component)?;
        let spec = ports.specs.get(port.port)?;
        let bundle = ports.bundles.get(port.port)?;
        self.bundle_value(*bundle).map(|v| v.fit(spec.width))
    }

    /// Values at every port of `component`, in port order.
    pub fn input_values(&self, component: ComponentId) -> Vec<Value> {
        let Some(ports) = self.netlist.component_ports(component) else {
            return Vec::new();
        };
        ports
            .specs
            .iter()
            .zip(&ports.bundles)
            .map(|(spec, b)| {
                self.bundle_value(*b)
                    .unwrap_or(Value::NIL)
                    .fit(spec.width)
            })
            .collect()
    }

    /// Value currently asserted by an output port, if it drives at all.
    pub fn driver(&self, port: PortRef) -> Option<Value> {
        self.drivers.get(&port).copied()
    }

    pub fn data(&self, component: ComponentId) -> Option<&ComponentData> {
        self.data.get(component)
    }

    pub fn data_mut(&mut self, component: ComponentId) -> Option<&mut ComponentData> {
        self.data.get_mut(component)
    }

    /// Replace a component's private data. The shape must match its kind.
    pub fn set_data(&mut self, component: ComponentId, data: ComponentData) -> Result<(), StateError> {
        let kind = self
            .netlist
            .kind(component)
            .ok_or(StateError::StaleComponent(component))?;
        if kind.initial_data().is_none() {
            return Err(StateError::NoData(component));
        }
        if !kind.accepts(&data) {
            return Err(StateError::DataMismatch(component));
        }
        self.data.insert(component, data);
        Ok(())
    }

    /// Assert `value` from an output port. Returns the bundles whose
    /// resolved value changed as a result.
    pub fn drive(&mut self, port: PortRef, value: Value) -> Vec<BundleId> {
        let Some(ports) = self.netlist.component_ports(port.component) else {
            return Vec::new();
        };
        let (Some(spec), Some(&bundle)) = (ports.specs.get(port.port), ports.bundles.get(port.port))
        else {
            return Vec::new();
        };
        let value = value.fit(spec.width);
        if self.drivers.get(&port) == Some(&value) {
            return Vec::new();
        }
        self.drivers.insert(port, value);

        let netlist = Arc::clone(&self.netlist);
        let Some(b) = netlist.bundle(bundle) else {
            return Vec::new();
        };
        let mut touched: Vec<BundleId> = Vec::new();
        for t in &b.threads {
            let state = self.thread_state(&netlist, t.index());
            if self.threads[t.index()] != state {
                self.threads[t.index()] = state;
                if let Some(thread) = netlist.thread(*t) {
                    touched.extend(thread.bits.iter().map(|(b, _)| *b));
                }
            }
        }
        touched.sort();
        touched.dedup();
        touched.retain(|b| self.refresh_bundle(&netlist, *b));
        touched
    }

    /// Merge every driver of a thread.
    fn thread_state(&self, netlist: &Netlist, thread: usize) -> BitState {
        netlist.threads()[thread]
            .drivers
            .iter()
            .filter_map(|d| self.drivers.get(&d.port).map(|v| v.bit(d.bit)))
            .fold(BitState::Unknown, BitState::combine)
    }

    /// Reassemble a bundle's value from its threads. Returns whether it changed.
    fn refresh_bundle(&mut self, netlist: &Netlist, bundle: BundleId) -> bool {
        let Some(b) = netlist.bundle(bundle) else {
            return false;
        };
        let value = match &b.width {
            BundleWidth::Undetermined => Value::NIL,
            BundleWidth::Conflict(widths) => {
                Value::unknown(widths.iter().copied().max().unwrap_or(0))
            }
            BundleWidth::Fixed(w) => b
                .threads
                .iter()
                .enumerate()
                .fold(Value::unknown(*w), |v, (i, t)| {
                    v.with_bit(i as u8, self.threads[t.index()])
                }),
        };
        let slot = &mut self.bundle_values[bundle.index()];
        if *slot == value {
            false
        } else {
            *slot = value;
            true
        }
    }

    /// Threads back to floating, then every driver reapplied.
    fn reset_values(&mut self) {
        let netlist = Arc::clone(&self.netlist);
        self.threads = (0..netlist.thread_count())
            .map(|t| self.thread_state(&netlist, t))
            .collect();
        self.bundle_values = vec![Value::NIL; netlist.bundle_count()];
        for b in 0..netlist.bundle_count() {
            self.refresh_bundle(&netlist, BundleId(b as u32));
        }
    }

    /// Gate outputs without a driver start out driving 0.
    fn seed_drivers(&mut self) {
        let netlist = Arc::clone(&self.netlist);
        for (id, kind) in netlist.components() {
            if !kind.powers_up_low() {
                continue;
            }
            let Some(ports) = netlist.component_ports(id) else {
                continue;
            };
            for (i, spec) in ports.specs.iter().enumerate() {
                if spec.dir == PortDir::Output {
                    self.drivers
                        .entry(PortRef::new(id, i))
                        .or_insert(Value::from_int(spec.width, 0));
                }
            }
        }
    }

    fn reset_data(&mut self) {
        self.data.clear();
        for (id, kind) in self.netlist.components() {
            if let Some(d) = kind.initial_data() {
                self.data.insert(id, d);
            }
        }
    }

    /// Forget all driven values and component data.
    pub fn reset(&mut self) {
        self.drivers.clear();
        self.seed_drivers();
        self.reset_data();
        self.reset_values();
    }

    /// Move onto a freshly resolved netlist of the same definition.
    /// Drivers of surviving output ports and data of surviving components
    /// whose kind still accepts it are kept; everything else starts fresh.
    fn rekey(&mut self, netlist: Arc<Netlist>) {
        self.drivers.retain(|port, _| {
            netlist
                .component_ports(port.component)
                .and_then(|p| p.outputs().find(|(i, _)| *i == port.port))
                .is_some()
        });
        let old = std::mem::take(&mut self.data);
        for (id, kind) in netlist.components() {
            let kept = old.get(id).filter(|d| kind.accepts(d)).cloned();
            if let Some(d) = kept.or_else(|| kind.initial_data()) {
                self.data.insert(id, d);
            }
        }
        self.netlist = netlist;
        // Fitted to possibly changed port widths.
        let drivers = std::mem::take(&mut self.drivers);
        let netlist = Arc::clone(&self.netlist);
        for (port, value) in drivers {
            if let Some(spec) = netlist
                .component_ports(port.component)
                .and_then(|p| p.specs.get(port.port))
            {
                self.drivers.insert(port, value.fit(spec.width));
            }
        }
        self.seed_drivers();
        self.reset_values();
    }
}

// ---------------------------------------------------------------------------
// StateTree
// ---------------------------------------------------------------------------

/// What a re-key did to the tree below the re-keyed node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RekeyOutcome {
    pub removed: Vec<StateNodeId>,
    pub created: Vec<StateNodeId>,
}

/// Arena of all state nodes, across every independent simulation root.
#[derive(Debug, Clone, Default)]
pub struct StateTree {
    nodes: SlotMap<StateNodeId, StateNode>,
}

impl StateTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: StateNodeId) -> Option<&StateNode> {
        self.nodes.get(id)
    }

    pub fn get_mut(&mut self, id: StateNodeId) -> Option<&mut StateNode> {
        self.nodes.get_mut(id)
    }

    pub fn node(&self, id: StateNodeId) -> Result<&StateNode, StateError> {
        self.nodes.get(id).ok_or(StateError::NodeNotFound(id))
    }

    pub fn node_mut(&mut self, id: StateNodeId) -> Result<&mut StateNode, StateError> {
        self.nodes.get_mut(id).ok_or(StateError::NodeNotFound(id))
    }

    pub fn contains(&self, id: StateNodeId) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = StateNodeId> + '_ {
        self.nodes.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (StateNodeId, &StateNode)> {
        self.nodes.iter()
    }

    pub fn roots(&self) -> impl Iterator<Item = StateNodeId> + '_ {
        self.nodes
            .iter()
            .filter(|(_, n)| n.parent.is_none())
            .map(|(id, _)| id)
    }

    pub fn parent(&self, id: StateNodeId) -> Option<StateNodeId> {
        self.nodes.get(id)?.parent.map(|(p, _)| p)
    }

    pub fn children(&self, id: StateNodeId) -> Vec<StateNodeId> {
        self.nodes
            .get(id)
            .map(|n| n.children.values().copied().collect())
            .unwrap_or_default()
    }

    /// Sub-circuit components leading from the root down to `id`.
    pub fn path(&self, id: StateNodeId) -> Result<Vec<ComponentId>, StateError> {
        let mut path = Vec::new();
        let mut cursor = self.node(id)?;
        while let Some((parent, component)) = cursor.parent {
            path.push(component);
            cursor = self.node(parent)?;
        }
        path.reverse();
        Ok(path)
    }

    pub fn root_of(&self, id: StateNodeId) -> Result<StateNodeId, StateError> {
        let mut current = id;
        while let Some((parent, _)) = self.node(current)?.parent {
            current = parent;
        }
        Ok(current)
    }

    /// `id` and every node below it, parents before children.
    pub fn subtree(&self, id: StateNodeId) -> Vec<StateNodeId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(n) = stack.pop() {
            if let Some(node) = self.nodes.get(n) {
                out.push(n);
                stack.extend(node.children.values().rev().copied());
            }
        }
        out
    }

    // -----------------------------------------------------------------------
    // Construction
    // -----------------------------------------------------------------------

    /// Create a root node for `circuit` with its whole sub-circuit hierarchy.
    /// Returns every created node, root first.
    pub fn create_root(
        &mut self,
        netlists: &NetlistCache,
        circuit: CircuitId,
    ) -> Result<Vec<StateNodeId>, StateError> {
        let netlist = netlists
            .get(circuit)
            .ok_or(StateError::UnknownCircuit(circuit))?;
        let root = self.nodes.insert(StateNode::new(Arc::clone(netlist), None));
        let mut created = vec![root];
        if let Err(e) = self.instantiate_all(netlists, root, &mut created) {
            self.remove_subtree(root);
            return Err(e);
        }
        Ok(created)
    }

    /// The child node standing for sub-circuit `component` of `parent`,
    /// created (with its own hierarchy) on first use.
    pub fn instantiate_child(
        &mut self,
        netlists: &NetlistCache,
        parent: StateNodeId,
        component: ComponentId,
    ) -> Result<Vec<StateNodeId>, StateError> {
        let node = self.node(parent)?;
        if let Some(existing) = node.child(component) {
            return Ok(vec![existing]);
        }
        let kind = node
            .netlist
            .kind(component)
            .ok_or(StateError::StaleComponent(component))?;
        let ComponentKind::Subcircuit { circuit } = *kind else {
            return Err(StateError::NotASubcircuit(component));
        };

        // The definition DAG is checked at edit time; this guards libraries
        // assembled some other way.
        let mut cursor = Some(parent);
        while let Some(n) = cursor {
            let ancestor = self.node(n)?;
            if ancestor.circuit == circuit {
                return Err(StateError::RecursiveInstantiation(circuit));
            }
            cursor = ancestor.parent.map(|(p, _)| p);
        }

        let netlist = netlists
            .get(circuit)
            .ok_or(StateError::UnknownCircuit(circuit))?;
        let child = self
            .nodes
            .insert(StateNode::new(Arc::clone(netlist), Some((parent, component))));
        self.node_mut(parent)?.children.insert(component, child);

        let mut created = vec![child];
        if let Err(e) = self.instantiate_all(netlists, child, &mut created) {
            self.destroy(child)?;
            return Err(e);
        }
        Ok(created)
    }

    fn instantiate_all(
        &mut self,
        netlists: &NetlistCache,
        node: StateNodeId,
        created: &mut Vec<StateNodeId>,
    ) -> Result<(), StateError> {
        let subs: Vec<ComponentId> = self
            .node(node)?
            .netlist
            .subcircuits()
            .map(|(c, _)| c)
            .collect();
        for component in subs {
            if self.node(node)?.child(component).is_none() {
                created.extend(self.instantiate_child(netlists, node, component)?);
            }
        }
        Ok(())
    }

    /// Deep copy of the subtree at `id` as a new, detached root.
    /// Returns every new node, root first.
    pub fn clone_subtree(&mut self, id: StateNodeId) -> Result<Vec<StateNodeId>, StateError> {
        let source = self.subtree(id);
        if source.is_empty() {
            return Err(StateError::NodeNotFound(id));
        }
        let mut mapping: BTreeMap<StateNodeId, StateNodeId> = BTreeMap::new();
        let mut created = Vec::with_capacity(source.len());
        for old in &source {
            let mut copy = self.node(*old)?.clone();
            copy.children.clear();
            copy.parent = match copy.parent {
                Some((p, c)) if *old != id => mapping.get(&p).map(|np| (*np, c)),
                _ => None,
            };
            let parent = copy.parent;
            let new = self.nodes.insert(copy);
            if let Some((p, c)) = parent {
                self.node_mut(p)?.children.insert(c, new);
            }
            mapping.insert(*old, new);
            created.push(new);
        }
        Ok(created)
    }

    /// Remove `id` and everything below it, detaching it from its parent.
    /// Returns every removed id.
    pub fn destroy(&mut self, id: StateNodeId) -> Result<Vec<StateNodeId>, StateError> {
        let parent = self.node(id)?.parent;
        if let Some((p, c)) = parent {
            if let Some(node) = self.nodes.get_mut(p) {
                node.children.remove(&c);
            }
        }
        Ok(self.remove_subtree(id))
    }

    fn remove_subtree(&mut self, id: StateNodeId) -> Vec<StateNodeId> {
        let ids = self.subtree(id);
        for n in &ids {
            self.nodes.remove(*n);
        }
        ids
    }

    /// Reset every node of the subtree at `id`.
    pub fn reset_subtree(&mut self, id: StateNodeId) {
        for n in self.subtree(id) {
            if let Some(node) = self.nodes.get_mut(n) {
                node.reset();
            }
        }
    }

    /// Bring `id` onto the current netlist of its definition. Children of
    /// removed or retargeted sub-circuit components are destroyed; new
    /// sub-circuit components get children.
    pub fn rekey(
        &mut self,
        netlists: &NetlistCache,
        id: StateNodeId,
    ) -> Result<RekeyOutcome, StateError> {
        let node = self.node(id)?;
        let netlist = netlists
            .get(node.circuit)
            .ok_or(StateError::UnknownCircuit(node.circuit))?;
        let mut outcome = RekeyOutcome::default();

        let stale: Vec<(ComponentId, StateNodeId)> = node
            .children
            .iter()
            .filter(|(component, child)| {
                let target = match netlist.kind(**component) {
                    Some(ComponentKind::Subcircuit { circuit }) => Some(*circuit),
                    _ => None,
                };
                self.nodes.get(**child).map(|c| c.circuit) != target
            })
            .map(|(c, n)| (*c, *n))
            .collect();
        for (_, child) in stale {
            outcome.removed.extend(self.destroy(child)?);
        }

        let from = self.node(id)?.generation();
        self.node_mut(id)?.rekey(Arc::clone(netlist));
        tracing::debug!(
            node = ?id,
            from,
            to = netlist.generation(),
            removed = outcome.removed.len(),
            "rekeyed state node"
        );

        self.instantiate_all(netlists, id, &mut outcome.created)?;
        Ok(outcome)
    }
}
