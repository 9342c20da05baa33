//! Netlist resolution: wires, splitters and ports reduced to bundles.
//!
//! Resolution runs in two passes, both over path-compressed union-find:
//!
//! 1. **Locations.** Every wire end and every component port is a point.
//!    Wire ends are joined, and any point lying on a wire (ends or interior)
//!    joins that wire. Each resulting class is a [`Bundle`]. Bundle ids are
//!    assigned in order of each class's smallest location, so the partition
//!    is stable for a given topology.
//! 2. **Bits.** Each bit of each bundle with a settled width is a slot.
//!    Splitters join combined-side bits to fan-out bits. Each resulting class
//!    is a [`Thread`]: one electrical bit, carrying one [`BitState`] per
//!    state node.
//!
//! A netlist is never patched. Any topology edit bumps the circuit
//! generation, and the simulator resolves again from scratch.
//!
//! [`BitState`]: crate::value::BitState

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use slotmap::SecondaryMap;

use crate::circuit::{CircuitError, CircuitLibrary, Interface};
use crate::component::{ComponentKind, PortDir, PortSpec, ports};
use crate::id::{BundleId, CircuitId, ComponentId, PortRef, ThreadId};
use crate::location::Location;

// ---------------------------------------------------------------------------
// Union-find
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct UnionFind {
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
            rank: vec![0; n],
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        let mut root = x;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        while self.parent[x] != root {
            let next = self.parent[x];
            self.parent[x] = root;
            x = next;
        }
        root
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra == rb {
            return;
        }
        match self.rank[ra].cmp(&self.rank[rb]) {
            std::cmp::Ordering::Less => self.parent[ra] = rb,
            std::cmp::Ordering::Greater => self.parent[rb] = ra,
            std::cmp::Ordering::Equal => {
                self.parent[rb] = ra;
                self.rank[ra] += 1;
            }
        }
    }

    /// Dense class numbers, assigned in order of each class's first member.
    fn classes(&mut self) -> (Vec<usize>, usize) {
        let mut by_root = BTreeMap::new();
        let mut class = Vec::with_capacity(self.parent.len());
        for i in 0..self.parent.len() {
            let root = self.find(i);
            let next = by_root.len();
            class.push(*by_root.entry(root).or_insert(next));
        }
        (class, by_root.len())
    }
}

// ---------------------------------------------------------------------------
// Resolved types
// ---------------------------------------------------------------------------

/// Width agreement of a bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BundleWidth {
    /// No port touches the bundle.
    Undetermined,
    Fixed(u8),
    /// Ports disagree; the distinct widths in ascending order.
    Conflict(Vec<u8>),
}

impl BundleWidth {
    pub fn fixed(&self) -> Option<u8> {
        match self {
            BundleWidth::Fixed(w) => Some(*w),
            _ => None,
        }
    }
}

/// One electrical net.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bundle {
    /// Every point in the bundle, sorted.
    pub locations: Vec<Location>,
    pub width: BundleWidth,
    /// Ports of evaluated components attached here (splitters excluded).
    pub ports: Vec<PortRef>,
    /// Components attached here, deduplicated, in port order.
    pub components: Vec<ComponentId>,
    /// Thread carrying each bit. Empty unless the width is fixed.
    pub threads: Vec<ThreadId>,
}

/// One output port bit driving a thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Driver {
    pub port: PortRef,
    pub bit: u8,
}

/// One electrical bit, possibly spanning several bundles through splitters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Thread {
    /// `(bundle, bit)` positions this thread occupies.
    pub bits: Vec<(BundleId, u8)>,
    pub drivers: Vec<Driver>,
}

/// A bundle whose ports disagree on width.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WidthIncompatibility {
    pub bundle: BundleId,
    /// Representative point for highlighting.
    pub location: Location,
    pub widths: Vec<u8>,
}

/// Port layout and bundle binding of one component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentPorts {
    pub specs: Vec<PortSpec>,
    pub bundles: Vec<BundleId>,
}

impl ComponentPorts {
    /// Bundles the component drives.
    pub fn outputs(&self) -> impl Iterator<Item = (usize, BundleId)> + '_ {
        self.specs
            .iter()
            .zip(&self.bundles)
            .enumerate()
            .filter(|(_, (spec, _))| spec.dir == PortDir::Output)
            .map(|(i, (_, b))| (i, *b))
    }
}

// ---------------------------------------------------------------------------
// Netlist
// ---------------------------------------------------------------------------

/// The resolved connectivity of one circuit definition at one generation.
#[derive(Debug, Clone)]
pub struct Netlist {
    circuit: CircuitId,
    generation: u64,
    bundles: Vec<Bundle>,
    threads: Vec<Thread>,
    conflicts: Vec<WidthIncompatibility>,
    component_ports: SecondaryMap<ComponentId, ComponentPorts>,
    kinds: SecondaryMap<ComponentId, ComponentKind>,
    interface: Interface,
}

impl Netlist {
    /// Resolve `circuit` as it currently stands in `library`.
    pub fn resolve(library: &CircuitLibrary, circuit: CircuitId) -> Result<Netlist, CircuitError> {
        let def = library
            .circuit(circuit)
            .ok_or(CircuitError::CircuitNotFound(circuit))?;

        // Port layouts, in component order.
        let mut layouts: Vec<(ComponentId, &ComponentKind, Vec<PortSpec>, Vec<Location>)> =
            Vec::with_capacity(def.component_count());
        for (id, comp) in def.components() {
            let specs = library.ports(comp);
            let locs = specs.iter().map(|s| s.at(comp.anchor)).collect();
            layouts.push((id, &comp.kind, specs, locs));
        }

        // Pass 1: locations.
        let mut points: BTreeSet<Location> = BTreeSet::new();
        for (_, wire) in def.wires() {
            points.insert(wire.a);
            points.insert(wire.b);
        }
        for (_, _, _, locs) in &layouts {
            points.extend(locs.iter().copied());
        }
        let points: Vec<Location> = points.into_iter().collect();
        let index: BTreeMap<Location, usize> =
            points.iter().enumerate().map(|(i, l)| (*l, i)).collect();
        let by_column: BTreeMap<(i32, i32), usize> = points
            .iter()
            .enumerate()
            .map(|(i, l)| ((l.x, l.y), i))
            .collect();

        let mut uf = UnionFind::new(points.len());
        for (_, wire) in def.wires() {
            let (Some(&a), Some(&b)) = (index.get(&wire.a), index.get(&wire.b)) else {
                continue;
            };
            if wire.is_horizontal() {
                for (_, &i) in index.range(wire.a..=wire.b) {
                    uf.union(a, i);
                }
            } else {
                for (_, &i) in by_column.range((wire.a.x, wire.a.y)..=(wire.b.x, wire.b.y)) {
                    uf.union(a, i);
                }
            }
            uf.union(a, b);
        }
        let (class, bundle_count) = uf.classes();

        let mut bundles: Vec<Bundle> = (0..bundle_count)
            .map(|_| Bundle {
                locations: Vec::new(),
                width: BundleWidth::Undetermined,
                ports: Vec::new(),
                components: Vec::new(),
                threads: Vec::new(),
            })
            .collect();
        for (i, loc) in points.iter().enumerate() {
            bundles[class[i]].locations.push(*loc);
        }

        // Port binding and width agreement.
        let mut widths: Vec<BTreeSet<u8>> = vec![BTreeSet::new(); bundle_count];
        let mut component_ports = SecondaryMap::new();
        let mut kinds = SecondaryMap::new();
        for (id, kind, specs, locs) in &layouts {
            let mut bound = Vec::with_capacity(specs.len());
            for (port, (spec, loc)) in specs.iter().zip(locs).enumerate() {
                let b = index.get(loc).map(|i| class[*i]).unwrap_or_default();
                if spec.width > 0 {
                    widths[b].insert(spec.width);
                }
                if kind.is_evaluated() {
                    let bundle = &mut bundles[b];
                    bundle.ports.push(PortRef::new(*id, port));
                    if !bundle.components.contains(id) {
                        bundle.components.push(*id);
                    }
                }
                bound.push(BundleId(b as u32));
            }
            component_ports.insert(
                *id,
                ComponentPorts {
                    specs: specs.clone(),
                    bundles: bound,
                },
            );
            kinds.insert(*id, (*kind).clone());
        }

        let mut conflicts = Vec::new();
        for (b, (bundle, set)) in bundles.iter_mut().zip(widths).enumerate() {
            bundle.width = match set.len() {
                0 => BundleWidth::Undetermined,
                1 => BundleWidth::Fixed(set.iter().copied().next().unwrap_or(0)),
                _ => {
                    let widths: Vec<u8> = set.into_iter().collect();
                    let location = bundle.locations.first().copied().unwrap_or(Location::new(0, 0));
                    tracing::warn!(
                        circuit = def.name(),
                        %location,
                        ?widths,
                        "incompatible widths on bundle"
                    );
                    conflicts.push(WidthIncompatibility {
                        bundle: BundleId(b as u32),
                        location,
                        widths: widths.clone(),
                    });
                    BundleWidth::Conflict(widths)
                }
            };
        }

        // Pass 2: bits.
        let mut offsets = Vec::with_capacity(bundle_count);
        let mut slots = 0usize;
        for bundle in &bundles {
            offsets.push(slots);
            slots += bundle.width.fixed().map_or(0, usize::from);
        }
        let mut bits_uf = UnionFind::new(slots);
        for (id, kind, _, _) in &layouts {
            let ComponentKind::Splitter { bit_map, .. } = kind else {
                continue;
            };
            let Some(bound) = component_ports.get(*id) else {
                continue;
            };
            let combined = bound.bundles[ports::SPLITTER_COMBINED].index();
            if bundles[combined].width.fixed().is_none() {
                continue;
            }
            let mut next_bit: BTreeMap<u8, usize> = BTreeMap::new();
            for (i, end) in bit_map.iter().enumerate() {
                let Some(end) = end else { continue };
                let j = next_bit.entry(*end).or_insert(0);
                let Some(end_bundle) = bound.bundles.get(ports::splitter_end(*end)) else {
                    continue;
                };
                let e = end_bundle.index();
                if bundles[e].width.fixed().is_some() {
                    bits_uf.union(offsets[combined] + i, offsets[e] + *j);
                }
                *j += 1;
            }
        }
        let (thread_of, thread_count) = bits_uf.classes();
        let mut threads: Vec<Thread> = (0..thread_count)
            .map(|_| Thread {
                bits: Vec::new(),
                drivers: Vec::new(),
            })
            .collect();
        for (b, bundle) in bundles.iter_mut().enumerate() {
            let Some(width) = bundle.width.fixed() else {
                continue;
            };
            for bit in 0..width {
                let t = thread_of[offsets[b] + bit as usize];
                threads[t].bits.push((BundleId(b as u32), bit));
                bundle.threads.push(ThreadId(t as u32));
            }
        }

        // Drivers.
        for (id, bound) in &component_ports {
            if !kinds.get(id).is_some_and(ComponentKind::is_evaluated) {
                continue;
            }
            for (port, b) in bound.outputs() {
                for (bit, t) in bundles[b.index()].threads.iter().enumerate() {
                    threads[t.index()].drivers.push(Driver {
                        port: PortRef::new(id, port),
                        bit: bit as u8,
                    });
                }
            }
        }

        tracing::debug!(
            circuit = def.name(),
            generation = def.generation(),
            bundles = bundles.len(),
            threads = threads.len(),
            conflicts = conflicts.len(),
            "resolved netlist"
        );

        Ok(Netlist {
            circuit,
            generation: def.generation(),
            bundles,
            threads,
            conflicts,
            component_ports,
            kinds,
            interface: def.interface(),
        })
    }

    pub fn circuit(&self) -> CircuitId {
        self.circuit
    }

    /// Generation of the definition this netlist was resolved from.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn bundles(&self) -> &[Bundle] {
        &self.bundles
    }

    pub fn bundle(&self, id: BundleId) -> Option<&Bundle> {
        self.bundles.get(id.index())
    }

    pub fn bundle_count(&self) -> usize {
        self.bundles.len()
    }

    pub fn threads(&self) -> &[Thread] {
        &self.threads
    }

    pub fn thread(&self, id: ThreadId) -> Option<&Thread> {
        self.threads.get(id.index())
    }

    pub fn thread_count(&self) -> usize {
        self.threads.len()
    }

    /// Bundles whose ports disagree on width.
    pub fn conflicts(&self) -> &[WidthIncompatibility] {
        &self.conflicts
    }

    /// The bundle containing `loc`, if any point of the netlist is there.
    pub fn bundle_at(&self, loc: Location) -> Option<BundleId> {
        self.bundles
            .iter()
            .position(|b| b.locations.binary_search(&loc).is_ok())
            .map(|i| BundleId(i as u32))
    }

    pub fn component_ports(&self, id: ComponentId) -> Option<&ComponentPorts> {
        self.component_ports.get(id)
    }

    pub fn port_bundle(&self, port: PortRef) -> Option<BundleId> {
        self.component_ports
            .get(port.component)
            .and_then(|p| p.bundles.get(port.port))
            .copied()
    }

    /// Component kind as of resolution.
    pub fn kind(&self, id: ComponentId) -> Option<&ComponentKind> {
        self.kinds.get(id)
    }

    pub fn components(&self) -> impl Iterator<Item = (ComponentId, &ComponentKind)> {
        self.kinds.iter()
    }

    /// Sub-circuit components and the definitions they instantiate.
    pub fn subcircuits(&self) -> impl Iterator<Item = (ComponentId, CircuitId)> + '_ {
        self.kinds.iter().filter_map(|(id, k)| match k {
            ComponentKind::Subcircuit { circuit } => Some((id, *circuit)),
            _ => None,
        })
    }

    pub fn interface(&self) -> &Interface {
        &self.interface
    }

    /// Same bundle grouping, widths, threads and conflicts.
    pub fn same_partition(&self, other: &Netlist) -> bool {
        self.bundles == other.bundles
            && self.threads == other.threads
            && self.conflicts == other.conflicts
    }
}

// ---------------------------------------------------------------------------
// Cache
// ---------------------------------------------------------------------------

/// Current netlist of every definition in a library, shared with state nodes.
#[derive(Debug, Clone, Default)]
pub struct NetlistCache {
    netlists: BTreeMap<CircuitId, Arc<Netlist>>,
}

impl NetlistCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, circuit: CircuitId) -> Option<&Arc<Netlist>> {
        self.netlists.get(&circuit)
    }

    pub fn len(&self) -> usize {
        self.netlists.len()
    }

    pub fn is_empty(&self) -> bool {
        self.netlists.is_empty()
    }

    /// Resolve every definition whose generation moved, and forget removed
    /// ones. Returns the circuits that got a new netlist.
    pub fn refresh(&mut self, library: &CircuitLibrary) -> Result<Vec<CircuitId>, CircuitError> {
        self.netlists
            .retain(|id, _| library.circuit(*id).is_some());
        let mut changed = Vec::new();
        for id in library.dependency_order() {
            let Some(def) = library.circuit(id) else {
                continue;
            };
            let fresh = self
                .netlists
                .get(&id)
                .is_some_and(|n| n.generation() == def.generation());
            if !fresh {
                self.netlists
                    .insert(id, Arc::new(Netlist::resolve(library, id)?));
                changed.push(id);
            }
        }
        Ok(changed)
    }
}
