//! Integration tests for flat circuits: the AND gate walkthrough, bus
//! contention, oscillation, width conflicts, splitters and clocked chains,
//! driven through the [`Simulator`] facade the way an editor would.

use circuitry_core::component::{ComponentKind, ports};
use circuitry_core::config::{QueueOrder, SimConfig};
use circuitry_core::id::PortRef;
use circuitry_core::location::Location;
use circuitry_core::report::BundleStatus;
use circuitry_core::sim::PropagatorStatus;
use circuitry_core::simulator::Simulator;
use circuitry_core::test_utils::*;
use circuitry_core::value::Value;

// ============================================================================
// AND gate with two switches
// ============================================================================

#[test]
fn and_gate_walkthrough() {
    let and = and_with_switches();
    let mut sim = Simulator::new(and.library).unwrap();
    let root = sim.create_root(and.circuit).unwrap();

    sim.poke_pin(root, and.a, Value::TRUE).unwrap();
    sim.poke_pin(root, and.b, Value::FALSE).unwrap();
    assert!(sim.nudge().unwrap().is_stable());
    assert_eq!(sim.port_value(root, and.out, 0).unwrap(), Value::FALSE);

    sim.poke_pin(root, and.b, Value::TRUE).unwrap();
    let outcome = sim.nudge().unwrap();
    assert_eq!(outcome.status, PropagatorStatus::Idle);
    assert_eq!(sim.port_value(root, and.out, 0).unwrap(), Value::TRUE);

    // Disconnecting B leaves the gate input floating.
    for wire in &and.b_wires {
        sim.library_mut().remove_wire(and.circuit, *wire).unwrap();
    }
    sim.nudge().unwrap();
    assert_eq!(sim.port_value(root, and.gate, 1).unwrap(), Value::unknown(1));
    assert_eq!(sim.port_value(root, and.out, 0).unwrap(), Value::unknown(1));
    assert!(sim.report().is_clean());
}

#[test]
fn settled_circuit_does_no_more_work() {
    let and = and_with_switches();
    let mut sim = Simulator::new(and.library).unwrap();
    let root = sim.create_root(and.circuit).unwrap();
    sim.poke_pin(root, and.a, Value::TRUE).unwrap();
    sim.nudge().unwrap();
    let hash = sim.state_hash();

    let again = sim.nudge().unwrap();
    assert_eq!(again.rounds, 0);
    assert_eq!(again.evaluations, 0);
    assert_eq!(sim.state_hash(), hash);
}

#[test]
fn poke_by_label() {
    let mut and = and_with_switches();
    and.library
        .set_label(and.circuit, and.a, Some("A".to_string()))
        .unwrap();
    and.library
        .set_label(and.circuit, and.b, Some("B".to_string()))
        .unwrap();
    let mut sim = Simulator::new(and.library).unwrap();
    let root = sim.create_root(and.circuit).unwrap();

    sim.poke_label(root, "A", Value::TRUE).unwrap();
    sim.poke_label(root, "B", Value::TRUE).unwrap();
    sim.nudge().unwrap();
    assert_eq!(sim.port_value(root, and.out, 0).unwrap(), Value::TRUE);
    assert!(sim.poke_label(root, "C", Value::TRUE).is_err());
}

#[test]
fn wire_values_for_rendering() {
    let and = and_with_switches();
    let mut sim = Simulator::new(and.library).unwrap();
    let root = sim.create_root(and.circuit).unwrap();
    sim.poke_pin(root, and.a, Value::TRUE).unwrap();
    sim.poke_pin(root, and.b, Value::TRUE).unwrap();
    sim.nudge().unwrap();

    // Midway along the output wire from the gate at (100,40) to (140,40).
    let v = sim.value_at(root, Location::new(120, 40)).unwrap();
    assert_eq!(v, Some(Value::TRUE));
}

// ============================================================================
// Bus contention
// ============================================================================

#[test]
fn contention_yields_error_then_recovers() {
    let bus = contention_bus();
    let mut sim = Simulator::new(bus.library).unwrap();
    let root = sim.create_root(bus.circuit).unwrap();
    sim.nudge().unwrap();

    let probe = sim.port_value(root, bus.probe, 0).unwrap();
    assert_eq!(probe, Value::error(1));
    let report = sim.report();
    assert_eq!(report.contentions.len(), 1);
    let bundle = report.contentions[0].bundle;
    assert!(matches!(
        report.bundle_status(root, bundle),
        BundleStatus::Contention { .. }
    ));

    sim.library_mut().remove_component(bus.circuit, bus.low).unwrap();
    assert!(sim.nudge().unwrap().is_stable());
    assert_eq!(sim.port_value(root, bus.probe, 0).unwrap(), Value::TRUE);
    assert!(sim.report().is_clean());
}

#[test]
fn changing_a_constant_updates_the_bus() {
    let bus = contention_bus();
    let mut sim = Simulator::new(bus.library).unwrap();
    let root = sim.create_root(bus.circuit).unwrap();
    sim.nudge().unwrap();

    sim.library_mut()
        .set_component_kind(bus.circuit, bus.low, ComponentKind::Constant { value: Value::TRUE })
        .unwrap();
    sim.nudge().unwrap();
    assert_eq!(sim.port_value(root, bus.probe, 0).unwrap(), Value::TRUE);
}

// ============================================================================
// Oscillation
// ============================================================================

#[test]
fn odd_inverter_ring_oscillates_on_its_own() {
    let ring = inverter_ring();
    let mut sim = Simulator::new(ring.library).unwrap();
    let root = sim.create_root(ring.circuit).unwrap();

    let outcome = sim.nudge().unwrap();
    assert_eq!(outcome.status, PropagatorStatus::Oscillating);
    assert_eq!(outcome.rounds, SimConfig::default().max_rounds);
    let netlist = sim.netlist(ring.circuit).unwrap();
    let loop_bundle = netlist.port_bundle(PortRef::new(ring.stages[2], 1)).unwrap();
    assert!(outcome.oscillating.iter().any(|r| r.bundle == loop_bundle && r.node == root));

    // Reset starts the same run over.
    assert_eq!(sim.reset().unwrap().status, PropagatorStatus::Oscillating);
    assert!(!sim.report().oscillating.is_empty());
}

#[test]
fn kicked_ring_is_reported_as_oscillating() {
    let ring = kicked_ring();
    let mut sim = Simulator::new(ring.library).unwrap();
    let root = sim.create_root(ring.circuit).unwrap();
    sim.poke_pin(root, ring.kick, Value::TRUE).unwrap();
    assert!(sim.nudge().unwrap().is_stable());

    sim.poke_pin(root, ring.kick, Value::FALSE).unwrap();
    let outcome = sim.nudge().unwrap();
    assert_eq!(outcome.status, PropagatorStatus::Oscillating);
    assert_eq!(outcome.rounds, SimConfig::default().max_rounds);
    assert!(!outcome.oscillating.is_empty());
    assert!(outcome.oscillating.iter().all(|r| r.node == root));

    // A stage output on the loop is among the reported bundles.
    let netlist = sim.netlist(ring.circuit).unwrap();
    let nor_out = netlist
        .port_bundle(PortRef::new(ring.stages[0], 2))
        .unwrap();
    assert!(outcome.oscillating.iter().any(|r| r.bundle == nor_out));

    let report = sim.report();
    assert_eq!(report.oscillating, outcome.oscillating);
    assert!(matches!(
        report.bundle_status(root, nor_out),
        BundleStatus::Oscillating { .. }
    ));
}

#[test]
fn kicking_the_ring_again_recovers() {
    let ring = kicked_ring();
    let config = SimConfig {
        max_rounds: 40,
        ..SimConfig::default()
    };
    let mut sim = Simulator::with_config(ring.library, config).unwrap();
    let root = sim.create_root(ring.circuit).unwrap();
    sim.poke_pin(root, ring.kick, Value::TRUE).unwrap();
    sim.nudge().unwrap();
    sim.poke_pin(root, ring.kick, Value::FALSE).unwrap();
    assert_eq!(sim.nudge().unwrap().status, PropagatorStatus::Oscillating);

    sim.poke_pin(root, ring.kick, Value::TRUE).unwrap();
    let outcome = sim.nudge().unwrap();
    assert!(outcome.is_stable());
    assert!(sim.report().oscillating.is_empty());
}

// ============================================================================
// Width conflicts
// ============================================================================

#[test]
fn width_conflict_reads_unknown_and_is_reported() {
    let mut and = and_with_switches();
    // Widen switch A; its bundle now joins a 2-bit port and a 1-bit port.
    and.library
        .set_component_kind(and.circuit, and.a, ComponentKind::Pin { width: 2, output: false })
        .unwrap();
    let mut sim = Simulator::new(and.library).unwrap();
    let root = sim.create_root(and.circuit).unwrap();
    sim.poke_pin(root, and.a, Value::from_int(2, 3)).unwrap();
    sim.poke_pin(root, and.b, Value::TRUE).unwrap();
    sim.nudge().unwrap();

    let report = sim.report();
    assert_eq!(report.width_conflicts.len(), 1);
    let conflict = &report.width_conflicts[0];
    assert_eq!(conflict.widths, vec![1, 2]);
    assert_eq!(conflict.location, Location::new(20, 30));
    assert!(matches!(
        report.bundle_status(root, conflict.bundle),
        BundleStatus::WidthConflict { .. }
    ));

    // The gate keeps simulating with an unknown input.
    assert_eq!(sim.port_value(root, and.gate, 0).unwrap(), Value::unknown(1));
    assert_eq!(sim.port_value(root, and.out, 0).unwrap(), Value::unknown(1));
}

// ============================================================================
// Splitters
// ============================================================================

#[test]
fn splitter_carries_bits_to_both_ends() {
    let split = splitter_fanout();
    let mut sim = Simulator::new(split.library).unwrap();
    let root = sim.create_root(split.circuit).unwrap();
    sim.poke_pin(root, split.wide, Value::from_int(4, 0b1001)).unwrap();
    assert!(sim.nudge().unwrap().is_stable());
    assert_eq!(sim.port_value(root, split.lo, 0).unwrap(), Value::from_int(2, 0b01));
    assert_eq!(sim.port_value(root, split.hi, 0).unwrap(), Value::from_int(2, 0b10));

    sim.poke_pin(root, split.wide, Value::from_int(4, 0b0110)).unwrap();
    sim.nudge().unwrap();
    assert_eq!(sim.port_value(root, split.lo, 0).unwrap(), Value::from_int(2, 0b10));
    assert_eq!(sim.port_value(root, split.hi, 0).unwrap(), Value::from_int(2, 0b01));
}

#[test]
fn contention_crosses_the_splitter() {
    let split = splitter_fanout();
    let mut sim = Simulator::new(split.library).unwrap();
    let root = sim.create_root(split.circuit).unwrap();
    sim.poke_pin(root, split.wide, Value::from_int(4, 0b1001)).unwrap();
    sim.nudge().unwrap();

    // A constant 11 on the high end disagrees with the pin on bit 2 only.
    let constant = sim
        .library_mut()
        .add_component(
            split.circuit,
            ComponentKind::Constant { value: Value::from_int(2, 0b11) },
            Location::new(100, 60),
        )
        .unwrap();
    sim.library_mut()
        .add_wire(split.circuit, Location::new(100, 20), Location::new(100, 60))
        .unwrap();
    assert!(sim.nudge().unwrap().is_stable());

    assert_eq!(sim.port_value(root, split.hi, 0).unwrap().to_string(), "1E");
    assert_eq!(sim.port_value(root, split.wide, 0).unwrap().to_string(), "1E01");
    assert_eq!(sim.port_value(root, split.lo, 0).unwrap(), Value::from_int(2, 0b01));
    assert_eq!(sim.report().contentions.len(), 2);

    sim.library_mut().remove_component(split.circuit, constant).unwrap();
    sim.nudge().unwrap();
    assert_eq!(sim.port_value(root, split.hi, 0).unwrap(), Value::from_int(2, 0b10));
    assert!(sim.report().is_clean());
}

// ============================================================================
// Clocked chains
// ============================================================================

#[test]
fn shift_chain_moves_one_stage_per_rising_edge() {
    for order in [QueueOrder::Insertion, QueueOrder::Reverse] {
        let chain = shift_chain();
        let config = SimConfig {
            queue_order: order,
            ..SimConfig::default()
        };
        let mut sim = Simulator::with_config(chain.library, config).unwrap();
        let root = sim.create_root(chain.circuit).unwrap();
        sim.poke_pin(root, chain.data, Value::TRUE).unwrap();
        sim.nudge().unwrap();

        let stages = |sim: &Simulator| {
            (
                sim.port_value(root, chain.registers[0], ports::REGISTER_Q).unwrap(),
                sim.port_value(root, chain.registers[1], ports::REGISTER_Q).unwrap(),
            )
        };
        assert_eq!(stages(&sim), (Value::FALSE, Value::FALSE), "{order:?}");

        // Rising edge: only the first stage takes the new bit.
        sim.tick().unwrap();
        assert_eq!(stages(&sim), (Value::TRUE, Value::FALSE), "{order:?}");
        // Falling edge: nothing moves.
        sim.poke_pin(root, chain.data, Value::FALSE).unwrap();
        sim.tick().unwrap();
        assert_eq!(stages(&sim), (Value::TRUE, Value::FALSE), "{order:?}");
        // Next rising edge: the bit reaches the output, the 0 enters.
        sim.tick().unwrap();
        assert_eq!(stages(&sim), (Value::FALSE, Value::TRUE), "{order:?}");
        assert_eq!(sim.port_value(root, chain.out, 0).unwrap(), Value::TRUE);
    }
}

// ============================================================================
// Drain order
// ============================================================================

#[test]
fn reverse_order_reaches_the_same_fixpoint() {
    let run = |order: QueueOrder| {
        let and = and_with_switches();
        let config = SimConfig {
            queue_order: order,
            ..SimConfig::default()
        };
        let mut sim = Simulator::with_config(and.library, config).unwrap();
        let root = sim.create_root(and.circuit).unwrap();
        sim.poke_pin(root, and.a, Value::TRUE).unwrap();
        sim.poke_pin(root, and.b, Value::TRUE).unwrap();
        sim.nudge().unwrap();
        sim.state_hash()
    };
    assert_eq!(run(QueueOrder::Insertion), run(QueueOrder::Reverse));
}
