//! Shared circuit builders for unit tests, integration tests and benchmarks.
//!
//! Gated behind `#[cfg(any(test, feature = "test-utils"))]` so these helpers
//! are available in unit tests, integration tests, and benchmarks (via the
//! `test-utils` feature).

use crate::circuit::{CircuitError, CircuitLibrary};
use crate::component::{ComponentKind, GateOp};
use crate::id::{CircuitId, ComponentId, WireId};
use crate::location::Location;
use crate::value::Value;

// ===========================================================================
// Wiring helpers
// ===========================================================================

pub fn loc(x: i32, y: i32) -> Location {
    Location::new(x, y)
}

/// Add one wire per consecutive pair of points.
pub fn wire_path(
    lib: &mut CircuitLibrary,
    circuit: CircuitId,
    points: &[Location],
) -> Result<Vec<WireId>, CircuitError> {
    points
        .windows(2)
        .map(|w| lib.add_wire(circuit, w[0], w[1]))
        .collect()
}

/// Wire port `from` to port `to` with a horizontal-then-vertical elbow.
pub fn connect(
    lib: &mut CircuitLibrary,
    circuit: CircuitId,
    from: (ComponentId, usize),
    to: (ComponentId, usize),
) -> Result<Vec<WireId>, CircuitError> {
    let a = lib.port_location(circuit, from.0, from.1)?;
    let b = lib.port_location(circuit, to.0, to.1)?;
    lib.add_path(circuit, a, b)
}

pub fn input_pin(lib: &mut CircuitLibrary, circuit: CircuitId, width: u8, at: Location) -> ComponentId {
    lib.add_component(circuit, ComponentKind::Pin { width, output: false }, at)
        .expect("input pin")
}

pub fn output_pin(lib: &mut CircuitLibrary, circuit: CircuitId, width: u8, at: Location) -> ComponentId {
    lib.add_component(circuit, ComponentKind::Pin { width, output: true }, at)
        .expect("output pin")
}

// ===========================================================================
// AND gate with two switches
// ===========================================================================

pub struct AndCircuit {
    pub library: CircuitLibrary,
    pub circuit: CircuitId,
    pub a: ComponentId,
    pub b: ComponentId,
    pub gate: ComponentId,
    pub out: ComponentId,
    /// The wire from switch B to the gate.
    pub b_wires: Vec<WireId>,
}

/// Two input pins into a 2-input AND gate, output to an output pin.
pub fn and_with_switches() -> AndCircuit {
    let mut library = CircuitLibrary::new();
    let circuit = library.add_circuit("and");
    let gate = library
        .add_component(
            circuit,
            ComponentKind::Gate {
                op: GateOp::And,
                width: 1,
                inputs: 2,
            },
            loc(100, 40),
        )
        .expect("gate");
    let a = input_pin(&mut library, circuit, 1, loc(20, 30));
    let b = input_pin(&mut library, circuit, 1, loc(20, 50));
    let out = output_pin(&mut library, circuit, 1, loc(140, 40));
    connect(&mut library, circuit, (a, 0), (gate, 0)).expect("wire a");
    let b_wires = connect(&mut library, circuit, (b, 0), (gate, 1)).expect("wire b");
    connect(&mut library, circuit, (gate, 2), (out, 0)).expect("wire out");
    AndCircuit {
        library,
        circuit,
        a,
        b,
        gate,
        out,
        b_wires,
    }
}

// ===========================================================================
// Gate chain
// ===========================================================================

pub struct GateChain {
    pub library: CircuitLibrary,
    pub circuit: CircuitId,
    /// The first input of the first gate, then the second input of each
    /// gate in chain order.
    pub inputs: Vec<ComponentId>,
    pub gates: Vec<ComponentId>,
    pub out: ComponentId,
}

/// A left-to-right chain of 2-input gates. Gate `i` reads gate `i - 1` on
/// its first input and its own input pin on the second.
pub fn gate_chain(ops: &[GateOp]) -> GateChain {
    let mut library = CircuitLibrary::new();
    let circuit = library.add_circuit("chain");
    let mut inputs = Vec::with_capacity(ops.len() + 1);
    let mut gates: Vec<ComponentId> = Vec::with_capacity(ops.len());

    for (i, op) in ops.iter().enumerate() {
        let x = 200 * (i as i32 + 1);
        let gate = library
            .add_component(
                circuit,
                ComponentKind::Gate {
                    op: *op,
                    width: 1,
                    inputs: 2,
                },
                loc(x, 0),
            )
            .expect("gate");
        match gates.last() {
            Some(prev) => {
                connect(&mut library, circuit, (*prev, 2), (gate, 0)).expect("chain wire");
            }
            None => {
                let first = input_pin(&mut library, circuit, 1, loc(x - 100, -10));
                connect(&mut library, circuit, (first, 0), (gate, 0)).expect("first wire");
                inputs.push(first);
            }
        }
        let side = input_pin(&mut library, circuit, 1, loc(x - 50, 100));
        connect(&mut library, circuit, (side, 0), (gate, 1)).expect("side wire");
        inputs.push(side);
        gates.push(gate);
    }

    let end = 200 * (ops.len() as i32) + 50;
    let out = output_pin(&mut library, circuit, 1, loc(end, 0));
    if let Some(last) = gates.last() {
        connect(&mut library, circuit, (*last, 2), (out, 0)).expect("out wire");
    }
    GateChain {
        library,
        circuit,
        inputs,
        gates,
        out,
    }
}

// ===========================================================================
// Bus contention
// ===========================================================================

pub struct ContentionBus {
    pub library: CircuitLibrary,
    pub circuit: CircuitId,
    pub high: ComponentId,
    pub low: ComponentId,
    pub probe: ComponentId,
}

/// A constant 1 and a constant 0 on one wire, with an output pin tapping
/// the middle.
pub fn contention_bus() -> ContentionBus {
    let mut library = CircuitLibrary::new();
    let circuit = library.add_circuit("bus");
    let high = library
        .add_component(circuit, ComponentKind::Constant { value: Value::TRUE }, loc(0, 0))
        .expect("high");
    let low = library
        .add_component(circuit, ComponentKind::Constant { value: Value::FALSE }, loc(100, 0))
        .expect("low");
    let probe = output_pin(&mut library, circuit, 1, loc(50, 0));
    library.add_wire(circuit, loc(0, 0), loc(100, 0)).expect("bus wire");
    ContentionBus {
        library,
        circuit,
        high,
        low,
        probe,
    }
}

// ===========================================================================
// Ring oscillators
// ===========================================================================

pub struct RingCircuit {
    pub library: CircuitLibrary,
    pub circuit: CircuitId,
    pub stages: Vec<ComponentId>,
}

/// Three NOT gates wired output to input in a loop, nothing else.
pub fn inverter_ring() -> RingCircuit {
    let mut library = CircuitLibrary::new();
    let circuit = library.add_circuit("ring");
    let stages: Vec<ComponentId> = [100, 200, 300]
        .into_iter()
        .map(|x| {
            library
                .add_component(circuit, ComponentKind::Not { width: 1 }, loc(x, 0))
                .expect("not")
        })
        .collect();
    // NOT ports: input at (x - 30, 0), output at (x, 0).
    wire_path(&mut library, circuit, &[loc(100, 0), loc(170, 0)]).expect("stage wire");
    wire_path(&mut library, circuit, &[loc(200, 0), loc(270, 0)]).expect("stage wire");
    wire_path(
        &mut library,
        circuit,
        &[loc(300, 0), loc(300, 100), loc(40, 100), loc(40, 0), loc(70, 0)],
    )
    .expect("feedback wire");
    RingCircuit {
        library,
        circuit,
        stages,
    }
}

pub struct KickedRing {
    pub library: CircuitLibrary,
    pub circuit: CircuitId,
    /// Drives the NOR stage: 1 forces the ring to a known state, 0 lets
    /// it run.
    pub kick: ComponentId,
    pub stages: Vec<ComponentId>,
}

/// Three inverting stages in a loop: a NOR gated by `kick`, then two NOTs.
pub fn kicked_ring() -> KickedRing {
    let mut library = CircuitLibrary::new();
    let circuit = library.add_circuit("kicked ring");
    let nor = library
        .add_component(
            circuit,
            ComponentKind::Gate {
                op: GateOp::Nor,
                width: 1,
                inputs: 2,
            },
            loc(100, 0),
        )
        .expect("nor");
    let n1 = library
        .add_component(circuit, ComponentKind::Not { width: 1 }, loc(200, 0))
        .expect("not");
    let n2 = library
        .add_component(circuit, ComponentKind::Not { width: 1 }, loc(300, 0))
        .expect("not");
    let kick = input_pin(&mut library, circuit, 1, loc(20, -10));

    wire_path(&mut library, circuit, &[loc(20, -10), loc(50, -10)]).expect("kick wire");
    wire_path(&mut library, circuit, &[loc(100, 0), loc(170, 0)]).expect("stage wire");
    wire_path(&mut library, circuit, &[loc(200, 0), loc(270, 0)]).expect("stage wire");
    wire_path(
        &mut library,
        circuit,
        &[loc(300, 0), loc(300, 100), loc(30, 100), loc(30, 10), loc(50, 10)],
    )
    .expect("feedback wire");

    KickedRing {
        library,
        circuit,
        kick,
        stages: vec![nor, n1, n2],
    }
}

// ===========================================================================
// Clock
// ===========================================================================

pub struct ClockCircuit {
    pub library: CircuitLibrary,
    pub circuit: CircuitId,
    pub clock: ComponentId,
    pub probe: ComponentId,
}

/// A 1-1 clock wired to an output pin.
pub fn clock_probe() -> ClockCircuit {
    let mut library = CircuitLibrary::new();
    let circuit = library.add_circuit("clock");
    let clock = library
        .add_component(circuit, ComponentKind::Clock { high: 1, low: 1 }, loc(0, 0))
        .expect("clock");
    let probe = output_pin(&mut library, circuit, 1, loc(40, 0));
    library.add_wire(circuit, loc(0, 0), loc(40, 0)).expect("wire");
    ClockCircuit {
        library,
        circuit,
        clock,
        probe,
    }
}

// ===========================================================================
// Register cells
// ===========================================================================

pub struct RegisterPair {
    pub library: CircuitLibrary,
    /// The 1-bit register cell: inputs D and CLK, output Q.
    pub cell: CircuitId,
    pub cell_register: ComponentId,
    pub top: CircuitId,
    /// Sub-circuit components placing the cell twice.
    pub instances: [ComponentId; 2],
    /// Data input pins, one per instance.
    pub data: [ComponentId; 2],
    /// Output pins, one per instance.
    pub outputs: [ComponentId; 2],
    /// Clock input pin shared by both instances.
    pub clock: ComponentId,
}

/// A 1-bit register sub-circuit placed twice in a top circuit, each copy
/// with its own data pin and output pin and a shared clock pin.
pub fn register_pair() -> RegisterPair {
    let mut library = CircuitLibrary::new();

    let cell = library.add_circuit("cell");
    input_pin(&mut library, cell, 1, loc(0, 0));
    input_pin(&mut library, cell, 1, loc(0, 40));
    output_pin(&mut library, cell, 1, loc(200, 0));
    let cell_register = library
        .add_component(cell, ComponentKind::Register { width: 1 }, loc(100, 0))
        .expect("register");
    wire_path(&mut library, cell, &[loc(0, 0), loc(70, 0)]).expect("d wire");
    wire_path(&mut library, cell, &[loc(0, 40), loc(70, 40), loc(70, 20)]).expect("clk wire");
    wire_path(&mut library, cell, &[loc(100, 0), loc(200, 0)]).expect("q wire");

    // Cell ports: D at (0,0), CLK at (0,20), Q at (60,0).
    let top = library.add_circuit("top");
    let first = library
        .add_component(top, ComponentKind::Subcircuit { circuit: cell }, loc(100, 0))
        .expect("first instance");
    let second = library
        .add_component(top, ComponentKind::Subcircuit { circuit: cell }, loc(100, 200))
        .expect("second instance");
    let d0 = input_pin(&mut library, top, 1, loc(20, 0));
    let d1 = input_pin(&mut library, top, 1, loc(20, 200));
    let q0 = output_pin(&mut library, top, 1, loc(200, 0));
    let q1 = output_pin(&mut library, top, 1, loc(200, 200));
    let clock = input_pin(&mut library, top, 1, loc(20, 110));

    wire_path(&mut library, top, &[loc(20, 0), loc(100, 0)]).expect("d0 wire");
    wire_path(&mut library, top, &[loc(20, 200), loc(100, 200)]).expect("d1 wire");
    wire_path(&mut library, top, &[loc(160, 0), loc(200, 0)]).expect("q0 wire");
    wire_path(&mut library, top, &[loc(160, 200), loc(200, 200)]).expect("q1 wire");
    wire_path(
        &mut library,
        top,
        &[loc(20, 110), loc(90, 110), loc(90, 20), loc(100, 20)],
    )
    .expect("clock wire");
    wire_path(&mut library, top, &[loc(90, 110), loc(90, 220), loc(100, 220)]).expect("clock wire");

    RegisterPair {
        library,
        cell,
        cell_register,
        top,
        instances: [first, second],
        data: [d0, d1],
        outputs: [q0, q1],
        clock,
    }
}

// ===========================================================================
// Shift chain
// ===========================================================================

pub struct ShiftChain {
    pub library: CircuitLibrary,
    pub circuit: CircuitId,
    pub data: ComponentId,
    pub clock: ComponentId,
    /// Register 0 reads `data`, register 1 reads register 0's output.
    pub registers: [ComponentId; 2],
    pub out: ComponentId,
}

/// Two 1-bit registers in series on one 1-1 clock, the second feeding an
/// output pin. Enables are left floating, which counts as enabled.
pub fn shift_chain() -> ShiftChain {
    let mut library = CircuitLibrary::new();
    let circuit = library.add_circuit("shift");
    let data = input_pin(&mut library, circuit, 1, loc(0, 0));
    let first = library
        .add_component(circuit, ComponentKind::Register { width: 1 }, loc(100, 0))
        .expect("register");
    let second = library
        .add_component(circuit, ComponentKind::Register { width: 1 }, loc(200, 0))
        .expect("register");
    let clock = library
        .add_component(circuit, ComponentKind::Clock { high: 1, low: 1 }, loc(0, 100))
        .expect("clock");
    let out = output_pin(&mut library, circuit, 1, loc(260, 0));

    // Register ports: D at (x - 30, 0), CLK at (x - 30, 20), Q at (x, 0).
    wire_path(&mut library, circuit, &[loc(0, 0), loc(70, 0)]).expect("d wire");
    wire_path(&mut library, circuit, &[loc(100, 0), loc(170, 0)]).expect("q0 wire");
    wire_path(&mut library, circuit, &[loc(200, 0), loc(260, 0)]).expect("q1 wire");
    wire_path(
        &mut library,
        circuit,
        &[loc(0, 100), loc(60, 100), loc(60, 20), loc(70, 20)],
    )
    .expect("clock wire");
    wire_path(
        &mut library,
        circuit,
        &[loc(60, 100), loc(160, 100), loc(160, 20), loc(170, 20)],
    )
    .expect("clock wire");

    ShiftChain {
        library,
        circuit,
        data,
        clock,
        registers: [first, second],
        out,
    }
}

// ===========================================================================
// Splitter fan-out
// ===========================================================================

pub struct SplitterFanout {
    pub library: CircuitLibrary,
    pub circuit: CircuitId,
    /// 4-bit input pin on the combined end.
    pub wide: ComponentId,
    pub splitter: ComponentId,
    /// 2-bit output pins on bits 0..2 and 2..4.
    pub lo: ComponentId,
    pub hi: ComponentId,
}

/// A 4-bit input pin split into two 2-bit output pins.
pub fn splitter_fanout() -> SplitterFanout {
    let mut library = CircuitLibrary::new();
    let circuit = library.add_circuit("split");
    let wide = input_pin(&mut library, circuit, 4, loc(0, 0));
    let splitter = library
        .add_component(circuit, ComponentKind::splitter(4, 2), loc(40, 0))
        .expect("splitter");
    let lo = output_pin(&mut library, circuit, 2, loc(100, 10));
    let hi = output_pin(&mut library, circuit, 2, loc(100, 20));

    // Splitter ends: combined at (40, 0), end 0 at (60, 10), end 1 at (60, 20).
    wire_path(&mut library, circuit, &[loc(0, 0), loc(40, 0)]).expect("combined wire");
    wire_path(&mut library, circuit, &[loc(60, 10), loc(100, 10)]).expect("lo wire");
    wire_path(&mut library, circuit, &[loc(60, 20), loc(100, 20)]).expect("hi wire");

    SplitterFanout {
        library,
        circuit,
        wide,
        splitter,
        lo,
        hi,
    }
}
