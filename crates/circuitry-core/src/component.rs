//! Component kinds: port layout, attribute validation, and behavior.
//!
//! Every placeable element is a variant of the closed [`ComponentKind`] enum.
//! The propagator calls [`ComponentKind::evaluate`] with the values present
//! at the component's ports and its private [`ComponentData`]; the kind
//! answers with the values it drives onto its output ports. Sub-circuits and
//! splitters are the two exceptions: splitters are folded into the netlist by
//! the resolver and never evaluate, and sub-circuits are evaluated by the
//! propagator because they reach into a child state node.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::circuit::{CircuitError, Interface};
use crate::id::CircuitId;
use crate::location::Location;
use crate::value::{BitState, MAX_WIDTH, Value};

pub const MAX_GATE_INPUTS: u8 = 32;
pub const MAX_SELECT_BITS: u8 = 5;
pub const MAX_ADDR_BITS: u8 = 24;
pub const MAX_FANOUT: u8 = 32;

/// Port indices for the fixed-layout kinds.
pub mod ports {
    pub const NOT_IN: usize = 0;
    pub const NOT_OUT: usize = 1;

    pub const BUFFER_IN: usize = 0;
    pub const BUFFER_CONTROL: usize = 1;
    pub const BUFFER_OUT: usize = 2;

    pub const ARITH_A: usize = 0;
    pub const ARITH_B: usize = 1;
    pub const ARITH_CARRY_IN: usize = 2;
    pub const ARITH_OUT: usize = 3;
    pub const ARITH_CARRY_OUT: usize = 4;

    pub const REGISTER_D: usize = 0;
    pub const REGISTER_CLOCK: usize = 1;
    pub const REGISTER_ENABLE: usize = 2;
    pub const REGISTER_Q: usize = 3;

    pub const RAM_ADDR: usize = 0;
    pub const RAM_DATA_IN: usize = 1;
    pub const RAM_WRITE_ENABLE: usize = 2;
    pub const RAM_CLOCK: usize = 3;
    pub const RAM_DATA_OUT: usize = 4;

    pub const SPLITTER_COMBINED: usize = 0;

    /// Output port of a gate with `inputs` inputs.
    pub const fn gate_out(inputs: u8) -> usize {
        inputs as usize
    }

    /// Select port of a multiplexer with `select` select bits.
    pub const fn mux_select(select: u8) -> usize {
        1 << select
    }

    /// Output port of a multiplexer with `select` select bits.
    pub const fn mux_out(select: u8) -> usize {
        (1 << select) + 1
    }

    /// Fan-out end `k` of a splitter.
    pub const fn splitter_end(k: u8) -> usize {
        1 + k as usize
    }
}

// ---------------------------------------------------------------------------
// Ports
// ---------------------------------------------------------------------------

/// Signal direction of a port, seen from the component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PortDir {
    Input,
    Output,
    /// Splitter ends: neither read nor driven by evaluation.
    Passive,
}

/// One port: its offset from the component anchor, width, and direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortSpec {
    pub dx: i32,
    pub dy: i32,
    pub width: u8,
    pub dir: PortDir,
}

impl PortSpec {
    fn input(dx: i32, dy: i32, width: u8) -> Self {
        Self { dx, dy, width, dir: PortDir::Input }
    }

    fn output(dx: i32, dy: i32, width: u8) -> Self {
        Self { dx, dy, width, dir: PortDir::Output }
    }

    fn passive(dx: i32, dy: i32, width: u8) -> Self {
        Self { dx, dy, width, dir: PortDir::Passive }
    }

    /// Absolute location of this port for a component anchored at `anchor`.
    pub fn at(&self, anchor: Location) -> Location {
        anchor.translate(self.dx, self.dy)
    }
}

// ---------------------------------------------------------------------------
// Kinds
// ---------------------------------------------------------------------------

/// Boolean function of a multi-input gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GateOp {
    And,
    Or,
    Xor,
    Nand,
    Nor,
    Xnor,
}

impl GateOp {
    fn apply(self, inputs: &[Value], width: u8) -> Value {
        let fold = |f: fn(Value, Value) -> Value| {
            inputs
                .iter()
                .copied()
                .reduce(f)
                .unwrap_or_else(|| Value::unknown(width))
        };
        match self {
            GateOp::And => fold(Value::and),
            GateOp::Or => fold(Value::or),
            GateOp::Xor => fold(Value::xor),
            GateOp::Nand => fold(Value::and).not(),
            GateOp::Nor => fold(Value::or).not(),
            GateOp::Xnor => fold(Value::xor).not(),
        }
    }
}

/// Every kind of component the engine can simulate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComponentKind {
    /// Circuit interface point. Input pins drive their poked (or, inside a
    /// sub-circuit, parent-supplied) value; output pins are read.
    Pin { width: u8, output: bool },
    Constant { value: Value },
    /// Square wave driven by the simulation tick counter.
    Clock { high: u32, low: u32 },
    Gate { op: GateOp, width: u8, inputs: u8 },
    Not { width: u8 },
    /// Tri-state buffer.
    ControlledBuffer { width: u8 },
    Adder { width: u8 },
    Subtractor { width: u8 },
    Multiplexer { select: u8, width: u8 },
    /// Rising-edge register with enable.
    Register { width: u8 },
    /// Synchronous-write, asynchronous-read memory.
    Ram { addr_width: u8, data_width: u8 },
    /// Joins bits of a `width`-wide bundle to `fanout` narrower bundles.
    /// `bit_map[i]` names the end that bit `i` of the combined side goes to.
    Splitter {
        width: u8,
        fanout: u8,
        bit_map: Vec<Option<u8>>,
    },
    /// An instance of another circuit definition.
    Subcircuit { circuit: CircuitId },
}

fn check_width(width: u8) -> Result<(), CircuitError> {
    if width == 0 || width > MAX_WIDTH {
        return Err(CircuitError::InvalidWidth(width));
    }
    Ok(())
}

fn attr(detail: impl Into<String>) -> CircuitError {
    CircuitError::InvalidAttribute(detail.into())
}

impl ComponentKind {
    /// A splitter whose combined bits are spread over the ends in order,
    /// low bits to end 0.
    pub fn splitter(width: u8, fanout: u8) -> Self {
        let bit_map = (0..width)
            .map(|i| {
                if fanout == 0 {
                    None
                } else {
                    Some((i as u32 * fanout as u32 / width as u32) as u8)
                }
            })
            .collect();
        ComponentKind::Splitter {
            width,
            fanout,
            bit_map,
        }
    }

    /// Short name for logs and diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            ComponentKind::Pin { output: false, .. } => "input pin",
            ComponentKind::Pin { output: true, .. } => "output pin",
            ComponentKind::Constant { .. } => "constant",
            ComponentKind::Clock { .. } => "clock",
            ComponentKind::Gate { .. } => "gate",
            ComponentKind::Not { .. } => "not",
            ComponentKind::ControlledBuffer { .. } => "controlled buffer",
            ComponentKind::Adder { .. } => "adder",
            ComponentKind::Subtractor { .. } => "subtractor",
            ComponentKind::Multiplexer { .. } => "multiplexer",
            ComponentKind::Register { .. } => "register",
            ComponentKind::Ram { .. } => "ram",
            ComponentKind::Splitter { .. } => "splitter",
            ComponentKind::Subcircuit { .. } => "subcircuit",
        }
    }

    /// Check attribute ranges. Sub-circuit references are checked by the
    /// library, which knows the other definitions.
    pub fn validate(&self) -> Result<(), CircuitError> {
        match self {
            ComponentKind::Pin { width, .. }
            | ComponentKind::Not { width }
            | ComponentKind::ControlledBuffer { width }
            | ComponentKind::Adder { width }
            | ComponentKind::Subtractor { width }
            | ComponentKind::Register { width } => check_width(*width),
            ComponentKind::Constant { value } => check_width(value.width()),
            ComponentKind::Clock { high, low } => {
                if *high == 0 || *low == 0 {
                    return Err(attr("clock phases must be at least one tick"));
                }
                Ok(())
            }
            ComponentKind::Gate { width, inputs, .. } => {
                check_width(*width)?;
                if *inputs < 2 || *inputs > MAX_GATE_INPUTS {
                    return Err(attr(format!("gate input count {inputs} out of range")));
                }
                Ok(())
            }
            ComponentKind::Multiplexer { select, width } => {
                check_width(*width)?;
                if *select == 0 || *select > MAX_SELECT_BITS {
                    return Err(attr(format!("select width {select} out of range")));
                }
                Ok(())
            }
            ComponentKind::Ram {
                addr_width,
                data_width,
            } => {
                check_width(*data_width)?;
                if *addr_width == 0 || *addr_width > MAX_ADDR_BITS {
                    return Err(attr(format!("address width {addr_width} out of range")));
                }
                Ok(())
            }
            ComponentKind::Splitter {
                width,
                fanout,
                bit_map,
            } => {
                check_width(*width)?;
                if *fanout == 0 || *fanout > MAX_FANOUT {
                    return Err(attr(format!("splitter fan-out {fanout} out of range")));
                }
                if bit_map.len() != *width as usize {
                    return Err(attr("splitter bit map length must equal its width"));
                }
                let mut counts = vec![0u8; *fanout as usize];
                for end in bit_map.iter().flatten() {
                    let slot = counts
                        .get_mut(*end as usize)
                        .ok_or_else(|| attr(format!("splitter bit mapped to missing end {end}")))?;
                    *slot += 1;
                }
                if counts.contains(&0) {
                    return Err(attr("every splitter end needs at least one bit"));
                }
                Ok(())
            }
            ComponentKind::Subcircuit { .. } => Ok(()),
        }
    }

    /// Port layout. `interface` is the child definition's interface and is
    /// only consulted for sub-circuits.
    pub fn ports(&self, interface: Option<&Interface>) -> Vec<PortSpec> {
        match self {
            ComponentKind::Pin { width, output } => {
                if *output {
                    vec![PortSpec::input(0, 0, *width)]
                } else {
                    vec![PortSpec::output(0, 0, *width)]
                }
            }
            ComponentKind::Constant { value } => vec![PortSpec::output(0, 0, value.width())],
            ComponentKind::Clock { .. } => vec![PortSpec::output(0, 0, 1)],
            ComponentKind::Gate { width, inputs, .. } => {
                let n = *inputs as i32;
                let mut ports: Vec<PortSpec> = (0..n)
                    .map(|i| PortSpec::input(-50, 10 * (2 * i - (n - 1)), *width))
                    .collect();
                ports.push(PortSpec::output(0, 0, *width));
                ports
            }
            ComponentKind::Not { width } => vec![
                PortSpec::input(-30, 0, *width),
                PortSpec::output(0, 0, *width),
            ],
            ComponentKind::ControlledBuffer { width } => vec![
                PortSpec::input(-20, 0, *width),
                PortSpec::input(-10, 10, 1),
                PortSpec::output(0, 0, *width),
            ],
            ComponentKind::Adder { width } | ComponentKind::Subtractor { width } => vec![
                PortSpec::input(-40, -10, *width),
                PortSpec::input(-40, 10, *width),
                PortSpec::input(-20, -20, 1),
                PortSpec::output(0, 0, *width),
                PortSpec::output(-20, 20, 1),
            ],
            ComponentKind::Multiplexer { select, width } => {
                let n = 1i32 << *select;
                let mut ports: Vec<PortSpec> = (0..n)
                    .map(|i| PortSpec::input(-30, 10 * (2 * i - (n - 1)), *width))
                    .collect();
                ports.push(PortSpec::input(-20, 10 * n, *select));
                ports.push(PortSpec::output(0, 0, *width));
                ports
            }
            ComponentKind::Register { width } => vec![
                PortSpec::input(-30, 0, *width),
                PortSpec::input(-30, 20, 1),
                PortSpec::input(-20, 30, 1),
                PortSpec::output(0, 0, *width),
            ],
            ComponentKind::Ram {
                addr_width,
                data_width,
            } => vec![
                PortSpec::input(-60, 0, *addr_width),
                PortSpec::input(-60, 20, *data_width),
                PortSpec::input(-60, 40, 1),
                PortSpec::input(-60, 60, 1),
                PortSpec::output(0, 0, *data_width),
            ],
            ComponentKind::Splitter {
                width,
                fanout,
                bit_map,
            } => {
                let mut ports = vec![PortSpec::passive(0, 0, *width)];
                for k in 0..*fanout {
                    let w = bit_map.iter().filter(|e| **e == Some(k)).count() as u8;
                    ports.push(PortSpec::passive(20, 10 * (k as i32 + 1), w));
                }
                ports
            }
            ComponentKind::Subcircuit { .. } => interface.map(Interface::ports).unwrap_or_default(),
        }
    }

    /// Whether the propagator evaluates this kind. Splitters do not.
    pub fn is_evaluated(&self) -> bool {
        !matches!(self, ComponentKind::Splitter { .. })
    }

    /// Whether this kind drives 0 on its outputs from the moment a state
    /// node is created or reset, before it is first evaluated. Logic gates
    /// do, so a feedback loop of gates starts from a defined level instead
    /// of sitting at X forever.
    pub fn powers_up_low(&self) -> bool {
        matches!(self, ComponentKind::Gate { .. } | ComponentKind::Not { .. })
    }

    /// Private per-instance data a fresh state node starts with.
    pub fn initial_data(&self) -> Option<ComponentData> {
        match self {
            ComponentKind::Pin {
                width,
                output: false,
            } => Some(ComponentData::Pin {
                value: Value::from_int(*width, 0),
            }),
            ComponentKind::Register { width } => Some(ComponentData::Register {
                stored: Value::from_int(*width, 0),
                last_clock: BitState::Unknown,
            }),
            ComponentKind::Ram { .. } => Some(ComponentData::Ram {
                contents: BTreeMap::new(),
                last_clock: BitState::Unknown,
            }),
            _ => None,
        }
    }

    /// Whether `data` has the shape this kind keeps.
    pub fn accepts(&self, data: &ComponentData) -> bool {
        match (self, data) {
            (ComponentKind::Pin { width, output: false }, ComponentData::Pin { value }) => {
                value.width() == *width
            }
            (ComponentKind::Register { width }, ComponentData::Register { stored, .. }) => {
                stored.width() == *width
            }
            (ComponentKind::Ram { data_width, .. }, ComponentData::Ram { contents, .. }) => {
                contents.values().all(|v| v.width() == *data_width)
            }
            _ => false,
        }
    }

    /// Compute the values this component drives.
    ///
    /// `inputs[i]` is the value present at port `i`, already fitted to the
    /// port's width. Returns `(port, value)` pairs for the output ports.
    pub fn evaluate(
        &self,
        inputs: &[Value],
        data: Option<&mut ComponentData>,
        tick: u64,
    ) -> Vec<(usize, Value)> {
        let input = |i: usize| inputs.get(i).copied().unwrap_or(Value::NIL);
        match self {
            ComponentKind::Pin { width, output } => {
                if *output {
                    return Vec::new();
                }
                let value = match data {
                    Some(ComponentData::Pin { value }) => value.fit(*width),
                    _ => Value::unknown(*width),
                };
                vec![(0, value)]
            }
            ComponentKind::Constant { value } => vec![(0, *value)],
            ComponentKind::Clock { high, low } => {
                let period = u64::from(*high) + u64::from(*low);
                let phase = tick % period.max(1);
                vec![(0, Value::from_bool(phase >= u64::from(*low)))]
            }
            ComponentKind::Gate { op, width, inputs: n } => {
                let out = op.apply(&inputs[..(*n as usize).min(inputs.len())], *width);
                vec![(ports::gate_out(*n), out)]
            }
            ComponentKind::Not { .. } => vec![(ports::NOT_OUT, input(ports::NOT_IN).not())],
            ComponentKind::ControlledBuffer { width } => {
                let out = match input(ports::BUFFER_CONTROL).bit(0) {
                    BitState::One => input(ports::BUFFER_IN),
                    BitState::Zero => Value::unknown(*width),
                    BitState::Unknown | BitState::Error => Value::error(*width),
                };
                vec![(ports::BUFFER_OUT, out)]
            }
            ComponentKind::Adder { .. } => {
                let carry_in = floating_as_zero(input(ports::ARITH_CARRY_IN));
                let (sum, carry) = input(ports::ARITH_A).add(input(ports::ARITH_B), carry_in);
                vec![(ports::ARITH_OUT, sum), (ports::ARITH_CARRY_OUT, carry)]
            }
            ComponentKind::Subtractor { .. } => {
                let borrow_in = floating_as_zero(input(ports::ARITH_CARRY_IN));
                let (diff, borrow) = input(ports::ARITH_A).sub(input(ports::ARITH_B), borrow_in);
                vec![(ports::ARITH_OUT, diff), (ports::ARITH_CARRY_OUT, borrow)]
            }
            ComponentKind::Multiplexer { select, width } => {
                let sel = input(ports::mux_select(*select));
                let out = match sel.to_int() {
                    Some(i) => input(i as usize),
                    None if sel.has_error() => Value::error(*width),
                    None => Value::unknown(*width),
                };
                vec![(ports::mux_out(*select), out)]
            }
            ComponentKind::Register { width } => {
                let clock = input(ports::REGISTER_CLOCK).bit(0);
                let enabled = input(ports::REGISTER_ENABLE).bit(0) != BitState::Zero;
                let out = match data {
                    Some(ComponentData::Register { stored, last_clock }) => {
                        if is_rising(*last_clock, clock) && enabled {
                            *stored = input(ports::REGISTER_D);
                        }
                        *last_clock = clock;
                        *stored
                    }
                    _ => Value::unknown(*width),
                };
                vec![(ports::REGISTER_Q, out)]
            }
            ComponentKind::Ram { data_width, .. } => {
                let addr = input(ports::RAM_ADDR);
                let clock = input(ports::RAM_CLOCK).bit(0);
                let write = input(ports::RAM_WRITE_ENABLE).bit(0) == BitState::One;
                let out = match data {
                    Some(ComponentData::Ram {
                        contents,
                        last_clock,
                    }) => {
                        if is_rising(*last_clock, clock) && write {
                            if let Some(a) = addr.to_int() {
                                contents.insert(a, input(ports::RAM_DATA_IN));
                            }
                        }
                        *last_clock = clock;
                        match addr.to_int() {
                            Some(a) => contents
                                .get(&a)
                                .copied()
                                .unwrap_or(Value::from_int(*data_width, 0)),
                            None if addr.has_error() => Value::error(*data_width),
                            None => Value::unknown(*data_width),
                        }
                    }
                    _ => Value::unknown(*data_width),
                };
                vec![(ports::RAM_DATA_OUT, out)]
            }
            ComponentKind::Splitter { .. } | ComponentKind::Subcircuit { .. } => Vec::new(),
        }
    }
}

/// An unconnected carry input counts as 0.
fn floating_as_zero(v: Value) -> Value {
    if v.is_unknown() { Value::FALSE } else { v }
}

fn is_rising(before: BitState, now: BitState) -> bool {
    before == BitState::Zero && now == BitState::One
}

// ---------------------------------------------------------------------------
// Private data
// ---------------------------------------------------------------------------

/// Mutable per-instance data owned by a state node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComponentData {
    /// Value an input pin drives.
    Pin { value: Value },
    Register { stored: Value, last_clock: BitState },
    /// Sparse contents; unwritten addresses read as 0.
    Ram {
        contents: BTreeMap<u64, Value>,
        last_clock: BitState,
    },
}

// ---------------------------------------------------------------------------
// Placed component
// ---------------------------------------------------------------------------

/// A component placed on a circuit definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Component {
    pub kind: ComponentKind,
    pub anchor: Location,
    #[serde(default)]
    pub label: Option<String>,
}

impl Component {
    pub fn new(kind: ComponentKind, anchor: Location) -> Self {
        Self {
            kind,
            anchor,
            label: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}
