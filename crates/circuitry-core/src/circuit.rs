//! Circuit definitions and the library that owns them.
//!
//! A [`Circuit`] is static topology: placed components and wire segments.
//! Definitions reference each other through [`ComponentKind::Subcircuit`],
//! forming a DAG. The [`CircuitLibrary`] is the only way to edit topology, so
//! it can reject edits that would make a definition contain itself and keep
//! every definition's generation counter current.
//!
//! # Generations
//!
//! Every edit bumps the edited circuit's generation and the generation of
//! every definition that instantiates it, directly or transitively (a changed
//! pin set changes the ports of every sub-circuit component that uses it).
//! Netlists and state nodes compare generations to know when to re-resolve.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use serde::{Deserialize, Serialize};
use slotmap::SlotMap;

use crate::component::{Component, ComponentKind, PortSpec};
use crate::id::{CircuitId, ComponentId, WireId};
use crate::location::Location;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors that can occur while editing circuit topology.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CircuitError {
    #[error("circuit not found: {0:?}")]
    CircuitNotFound(CircuitId),
    #[error("component not found: {0:?}")]
    ComponentNotFound(ComponentId),
    #[error("wire not found: {0:?}")]
    WireNotFound(WireId),
    #[error("port {port} does not exist on component {component:?}")]
    PortNotFound { component: ComponentId, port: usize },
    #[error("invalid bit width {0} (expected 1..=64)")]
    InvalidWidth(u8),
    #[error("invalid attribute: {0}")]
    InvalidAttribute(String),
    #[error("wire from {0} to {1} is neither horizontal nor vertical")]
    DiagonalWire(Location, Location),
    #[error("wire at {0} has zero length")]
    ZeroLengthWire(Location),
    #[error("placing {child:?} inside {parent:?} would make a circuit contain itself")]
    RecursiveSubcircuit { parent: CircuitId, child: CircuitId },
    #[error("circuit {0:?} is still instantiated by another circuit")]
    CircuitInUse(CircuitId),
}

// ---------------------------------------------------------------------------
// Wires
// ---------------------------------------------------------------------------

/// An axis-aligned wire segment. Endpoints are stored in sorted order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wire {
    pub a: Location,
    pub b: Location,
}

impl Wire {
    pub fn new(a: Location, b: Location) -> Result<Self, CircuitError> {
        if a == b {
            return Err(CircuitError::ZeroLengthWire(a));
        }
        if a.x != b.x && a.y != b.y {
            return Err(CircuitError::DiagonalWire(a, b));
        }
        let (a, b) = if a <= b { (a, b) } else { (b, a) };
        Ok(Self { a, b })
    }

    pub fn is_horizontal(&self) -> bool {
        self.a.y == self.b.y
    }

    /// Whether `loc` lies on this segment, endpoints included.
    pub fn contains(&self, loc: Location) -> bool {
        if self.is_horizontal() {
            loc.y == self.a.y && loc.x >= self.a.x && loc.x <= self.b.x
        } else {
            loc.x == self.a.x && loc.y >= self.a.y && loc.y <= self.b.y
        }
    }
}

// ---------------------------------------------------------------------------
// Interface
// ---------------------------------------------------------------------------

/// A pin as seen from outside the circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterfacePin {
    pub component: ComponentId,
    pub location: Location,
    pub width: u8,
}

/// The pins that become ports when a circuit is used as a sub-circuit:
/// input pins first, then output pins, each in location order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Interface {
    pub inputs: Vec<InterfacePin>,
    pub outputs: Vec<InterfacePin>,
}

impl Interface {
    /// Port layout of a sub-circuit component: inputs down the left edge,
    /// outputs down the right edge.
    pub fn ports(&self) -> Vec<PortSpec> {
        let inputs = self.inputs.iter().enumerate().map(|(i, pin)| PortSpec {
            dx: 0,
            dy: 20 * i as i32,
            width: pin.width,
            dir: crate::component::PortDir::Input,
        });
        let outputs = self.outputs.iter().enumerate().map(|(j, pin)| PortSpec {
            dx: 60,
            dy: 20 * j as i32,
            width: pin.width,
            dir: crate::component::PortDir::Output,
        });
        inputs.chain(outputs).collect()
    }

    pub fn port_count(&self) -> usize {
        self.inputs.len() + self.outputs.len()
    }
}

// ---------------------------------------------------------------------------
// Circuit
// ---------------------------------------------------------------------------

/// One circuit definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Circuit {
    name: String,
    components: SlotMap<ComponentId, Component>,
    wires: SlotMap<WireId, Wire>,
    generation: u64,
}

impl Circuit {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            components: SlotMap::with_key(),
            wires: SlotMap::with_key(),
            generation: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Topology generation. Changes whenever this circuit or any circuit it
    /// instantiates is edited.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn component(&self, id: ComponentId) -> Option<&Component> {
        self.components.get(id)
    }

    pub fn components(&self) -> impl Iterator<Item = (ComponentId, &Component)> {
        self.components.iter()
    }

    pub fn component_count(&self) -> usize {
        self.components.len()
    }

    pub fn contains_component(&self, id: ComponentId) -> bool {
        self.components.contains_key(id)
    }

    pub fn wire(&self, id: WireId) -> Option<&Wire> {
        self.wires.get(id)
    }

    pub fn wires(&self) -> impl Iterator<Item = (WireId, &Wire)> {
        self.wires.iter()
    }

    pub fn wire_count(&self) -> usize {
        self.wires.len()
    }

    /// The definitions this circuit instantiates directly.
    pub fn subcircuits(&self) -> impl Iterator<Item = CircuitId> + '_ {
        self.components.values().filter_map(|c| match c.kind {
            ComponentKind::Subcircuit { circuit } => Some(circuit),
            _ => None,
        })
    }

    /// This circuit's pins as seen from a parent.
    pub fn interface(&self) -> Interface {
        let mut inputs = Vec::new();
        let mut outputs = Vec::new();
        for (id, comp) in &self.components {
            if let ComponentKind::Pin { width, output } = comp.kind {
                let pin = InterfacePin {
                    component: id,
                    location: comp.anchor,
                    width,
                };
                if output {
                    outputs.push(pin);
                } else {
                    inputs.push(pin);
                }
            }
        }
        inputs.sort_by_key(|p| p.location);
        outputs.sort_by_key(|p| p.location);
        Interface { inputs, outputs }
    }

    /// Find the component carrying `label`.
    pub fn find_labeled(&self, label: &str) -> Option<ComponentId> {
        self.components
            .iter()
            .find(|(_, c)| c.label.as_deref() == Some(label))
            .map(|(id, _)| id)
    }
}

// ---------------------------------------------------------------------------
// CircuitLibrary
// ---------------------------------------------------------------------------

/// Owns every circuit definition and performs all topology edits.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CircuitLibrary {
    circuits: SlotMap<CircuitId, Circuit>,
}

impl CircuitLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_circuit(&mut self, name: impl Into<String>) -> CircuitId {
        self.circuits.insert(Circuit::new(name))
    }

    /// Remove a definition. Fails while any other definition instantiates it.
    pub fn remove_circuit(&mut self, id: CircuitId) -> Result<Circuit, CircuitError> {
        if !self.circuits.contains_key(id) {
            return Err(CircuitError::CircuitNotFound(id));
        }
        let in_use = self
            .circuits
            .iter()
            .any(|(other, c)| other != id && c.subcircuits().any(|s| s == id));
        if in_use {
            return Err(CircuitError::CircuitInUse(id));
        }
        self.circuits
            .remove(id)
            .ok_or(CircuitError::CircuitNotFound(id))
    }

    pub fn circuit(&self, id: CircuitId) -> Option<&Circuit> {
        self.circuits.get(id)
    }

    pub fn circuits(&self) -> impl Iterator<Item = (CircuitId, &Circuit)> {
        self.circuits.iter()
    }

    pub fn find_circuit(&self, name: &str) -> Option<CircuitId> {
        self.circuits
            .iter()
            .find(|(_, c)| c.name == name)
            .map(|(id, _)| id)
    }

    fn circuit_mut(&mut self, id: CircuitId) -> Result<&mut Circuit, CircuitError> {
        self.circuits
            .get_mut(id)
            .ok_or(CircuitError::CircuitNotFound(id))
    }

    fn get(&self, id: CircuitId) -> Result<&Circuit, CircuitError> {
        self.circuits.get(id).ok_or(CircuitError::CircuitNotFound(id))
    }

    // -----------------------------------------------------------------------
    // Component edits
    // -----------------------------------------------------------------------

    /// Place a component. Sub-circuit kinds are checked for recursion.
    pub fn add_component(
        &mut self,
        circuit: CircuitId,
        kind: ComponentKind,
        anchor: Location,
    ) -> Result<ComponentId, CircuitError> {
        self.insert_component(circuit, Component::new(kind, anchor))
    }

    /// Place a fully described component (kind, anchor and label).
    pub fn insert_component(
        &mut self,
        circuit: CircuitId,
        component: Component,
    ) -> Result<ComponentId, CircuitError> {
        self.check_kind(circuit, &component.kind)?;
        let id = self.circuit_mut(circuit)?.components.insert(component);
        self.touch(circuit);
        Ok(id)
    }

    pub fn remove_component(
        &mut self,
        circuit: CircuitId,
        id: ComponentId,
    ) -> Result<Component, CircuitError> {
        let removed = self
            .circuit_mut(circuit)?
            .components
            .remove(id)
            .ok_or(CircuitError::ComponentNotFound(id))?;
        self.touch(circuit);
        Ok(removed)
    }

    pub fn move_component(
        &mut self,
        circuit: CircuitId,
        id: ComponentId,
        anchor: Location,
    ) -> Result<(), CircuitError> {
        let comp = self
            .circuit_mut(circuit)?
            .components
            .get_mut(id)
            .ok_or(CircuitError::ComponentNotFound(id))?;
        comp.anchor = anchor;
        self.touch(circuit);
        Ok(())
    }

    /// Replace a component's kind, e.g. after a width attribute change.
    pub fn set_component_kind(
        &mut self,
        circuit: CircuitId,
        id: ComponentId,
        kind: ComponentKind,
    ) -> Result<(), CircuitError> {
        self.check_kind(circuit, &kind)?;
        let comp = self
            .circuit_mut(circuit)?
            .components
            .get_mut(id)
            .ok_or(CircuitError::ComponentNotFound(id))?;
        comp.kind = kind;
        self.touch(circuit);
        Ok(())
    }

    pub fn set_label(
        &mut self,
        circuit: CircuitId,
        id: ComponentId,
        label: Option<String>,
    ) -> Result<(), CircuitError> {
        let comp = self
            .circuit_mut(circuit)?
            .components
            .get_mut(id)
            .ok_or(CircuitError::ComponentNotFound(id))?;
        comp.label = label;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Wire edits
    // -----------------------------------------------------------------------

    pub fn add_wire(
        &mut self,
        circuit: CircuitId,
        a: Location,
        b: Location,
    ) -> Result<WireId, CircuitError> {
        let wire = Wire::new(a, b)?;
        let id = self.circuit_mut(circuit)?.wires.insert(wire);
        self.touch(circuit);
        Ok(id)
    }

    /// Connect two points with a horizontal-then-vertical path.
    /// Returns one or two wire ids (none if the points coincide).
    pub fn add_path(
        &mut self,
        circuit: CircuitId,
        a: Location,
        b: Location,
    ) -> Result<Vec<WireId>, CircuitError> {
        let corner = Location::new(b.x, a.y);
        let mut ids = Vec::new();
        if a != corner {
            ids.push(self.add_wire(circuit, a, corner)?);
        }
        if corner != b {
            ids.push(self.add_wire(circuit, corner, b)?);
        }
        Ok(ids)
    }

    pub fn remove_wire(&mut self, circuit: CircuitId, id: WireId) -> Result<Wire, CircuitError> {
        let wire = self
            .circuit_mut(circuit)?
            .wires
            .remove(id)
            .ok_or(CircuitError::WireNotFound(id))?;
        self.touch(circuit);
        Ok(wire)
    }

    // -----------------------------------------------------------------------
    // Port queries
    // -----------------------------------------------------------------------

    /// Port layout of `component`, resolving sub-circuit interfaces.
    pub fn ports(&self, component: &Component) -> Vec<PortSpec> {
        match component.kind {
            ComponentKind::Subcircuit { circuit } => {
                let interface = self.circuits.get(circuit).map(Circuit::interface);
                component.kind.ports(interface.as_ref())
            }
            _ => component.kind.ports(None),
        }
    }

    /// Absolute location of one port.
    pub fn port_location(
        &self,
        circuit: CircuitId,
        component: ComponentId,
        port: usize,
    ) -> Result<Location, CircuitError> {
        let comp = self
            .get(circuit)?
            .component(component)
            .ok_or(CircuitError::ComponentNotFound(component))?;
        self.ports(comp)
            .get(port)
            .map(|p| p.at(comp.anchor))
            .ok_or(CircuitError::PortNotFound { component, port })
    }

    // -----------------------------------------------------------------------
    // Hierarchy
    // -----------------------------------------------------------------------

    /// Whether `ancestor` instantiates `descendant`, directly or transitively.
    /// A circuit counts as containing itself.
    pub fn contains(&self, ancestor: CircuitId, descendant: CircuitId) -> bool {
        let mut seen = BTreeSet::new();
        let mut stack = vec![ancestor];
        while let Some(c) = stack.pop() {
            if c == descendant {
                return true;
            }
            if !seen.insert(c) {
                continue;
            }
            if let Some(circuit) = self.circuits.get(c) {
                stack.extend(circuit.subcircuits());
            }
        }
        false
    }

    /// Definitions ordered so every circuit comes after the circuits it
    /// instantiates (Kahn's algorithm over the instantiation DAG).
    pub fn dependency_order(&self) -> Vec<CircuitId> {
        let mut in_degree: BTreeMap<CircuitId, usize> = BTreeMap::new();
        let mut users: BTreeMap<CircuitId, Vec<CircuitId>> = BTreeMap::new();
        for (id, circuit) in &self.circuits {
            let deps: BTreeSet<CircuitId> = circuit
                .subcircuits()
                .filter(|c| self.circuits.contains_key(*c))
                .collect();
            in_degree.insert(id, deps.len());
            for dep in deps {
                users.entry(dep).or_default().push(id);
            }
        }

        let mut queue: VecDeque<CircuitId> = in_degree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut order = Vec::with_capacity(in_degree.len());
        while let Some(id) = queue.pop_front() {
            order.push(id);
            for user in users.get(&id).into_iter().flatten() {
                if let Some(d) = in_degree.get_mut(user) {
                    *d -= 1;
                    if *d == 0 {
                        queue.push_back(*user);
                    }
                }
            }
        }
        order
    }

    fn check_kind(&self, circuit: CircuitId, kind: &ComponentKind) -> Result<(), CircuitError> {
        self.get(circuit)?;
        kind.validate()?;
        if let ComponentKind::Subcircuit { circuit: child } = kind {
            self.get(*child)?;
            if self.contains(*child, circuit) {
                return Err(CircuitError::RecursiveSubcircuit {
                    parent: circuit,
                    child: *child,
                });
            }
        }
        Ok(())
    }

    /// Bump the generation of `circuit` and of everything that uses it.
    fn touch(&mut self, circuit: CircuitId) {
        let affected: Vec<CircuitId> = self
            .circuits
            .keys()
            .filter(|id| self.contains(*id, circuit))
            .collect();
        for id in affected {
            if let Some(c) = self.circuits.get_mut(id) {
                c.generation += 1;
            }
        }
    }
}
