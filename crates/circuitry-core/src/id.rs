use serde::{Deserialize, Serialize};
use slotmap::new_key_type;

new_key_type! {
    /// Identifies a circuit definition in the library.
    pub struct CircuitId;

    /// Identifies a placed component within its circuit definition.
    pub struct ComponentId;

    /// Identifies a wire segment within its circuit definition.
    pub struct WireId;

    /// Identifies a node of the simulation state tree.
    pub struct StateNodeId;
}

/// Identifies a bundle (electrical net) within one resolved netlist.
/// Only meaningful together with the netlist generation it came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BundleId(pub u32);

/// Identifies a bit thread: one electrical bit, possibly spanning several
/// bundles joined through splitters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ThreadId(pub u32);

impl BundleId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl ThreadId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// One port of one component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PortRef {
    pub component: ComponentId,
    pub port: usize,
}

impl PortRef {
    pub fn new(component: ComponentId, port: usize) -> Self {
        Self { component, port }
    }
}
