//! Property-based tests for the Circuitry core engine.
//!
//! Uses proptest to generate random values and random combinational chains,
//! then verify the lattice laws and the determinism of resolution and
//! propagation.

use circuitry_core::component::GateOp;
use circuitry_core::config::{QueueOrder, SimConfig};
use circuitry_core::netlist::Netlist;
use circuitry_core::simulator::Simulator;
use circuitry_core::test_utils::*;
use circuitry_core::value::{BitState, Value};
use proptest::prelude::*;

// ===========================================================================
// Generators
// ===========================================================================

fn arb_bit() -> impl Strategy<Value = BitState> {
    prop_oneof![
        Just(BitState::Zero),
        Just(BitState::One),
        Just(BitState::Unknown),
        Just(BitState::Error),
    ]
}

fn arb_value(width: u8) -> impl Strategy<Value = Value> {
    proptest::collection::vec(arb_bit(), width as usize)
        .prop_map(|bits| Value::from_bits(&bits).expect("width within range"))
}

/// Three values of one shared width.
fn arb_triple() -> impl Strategy<Value = (Value, Value, Value)> {
    (1u8..=64).prop_flat_map(|w| (arb_value(w), arb_value(w), arb_value(w)))
}

fn arb_defined(width: u8) -> impl Strategy<Value = Value> {
    any::<u64>().prop_map(move |bits| Value::from_int(width, bits))
}

fn arb_op() -> impl Strategy<Value = GateOp> {
    prop_oneof![
        Just(GateOp::And),
        Just(GateOp::Or),
        Just(GateOp::Xor),
        Just(GateOp::Nand),
        Just(GateOp::Nor),
        Just(GateOp::Xnor),
    ]
}

/// Pin values for a chain, including floating inputs.
fn arb_pin() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::FALSE),
        Just(Value::TRUE),
        Just(Value::unknown(1)),
    ]
}

fn arb_chain() -> impl Strategy<Value = (Vec<GateOp>, Vec<Value>)> {
    (1usize..=12).prop_flat_map(|n| {
        (
            proptest::collection::vec(arb_op(), n),
            proptest::collection::vec(arb_pin(), n + 1),
        )
    })
}

/// Build, poke and settle a chain under one queue order.
fn settle_chain(ops: &[GateOp], pins: &[Value], order: QueueOrder) -> (Simulator, u64) {
    let chain = gate_chain(ops);
    let config = SimConfig {
        queue_order: order,
        ..SimConfig::default()
    };
    let mut sim = Simulator::with_config(chain.library, config).expect("valid config");
    let root = sim.create_root(chain.circuit).expect("root");
    for (pin, value) in chain.inputs.iter().zip(pins) {
        sim.poke_pin(root, *pin, *value).expect("poke");
    }
    let outcome = sim.nudge().expect("nudge");
    assert!(outcome.is_stable());
    let hash = sim.state_hash().finish();
    (sim, hash)
}

// ===========================================================================
// Properties
// ===========================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn combine_is_commutative((a, b, _) in arb_triple()) {
        prop_assert_eq!(a.combine(b), b.combine(a));
    }

    #[test]
    fn combine_is_associative((a, b, c) in arb_triple()) {
        prop_assert_eq!(a.combine(b).combine(c), a.combine(b.combine(c)));
    }

    #[test]
    fn combine_is_idempotent_on_defined_values(v in (1u8..=64).prop_flat_map(arb_defined)) {
        prop_assert_eq!(v.combine(v), v);
    }

    #[test]
    fn all_unknown_is_identity(v in (1u8..=64).prop_flat_map(arb_value)) {
        prop_assert_eq!(v.combine(Value::unknown(v.width())), v);
        prop_assert_eq!(Value::unknown(v.width()).combine(v), v);
        prop_assert_eq!(v.combine(Value::NIL), v);
    }

    #[test]
    fn bit_combine_matches_word_combine(a in arb_bit(), b in arb_bit()) {
        let word = Value::from_bits(&[a]).unwrap().combine(Value::from_bits(&[b]).unwrap());
        prop_assert_eq!(word.bit(0), a.combine(b));
    }

    #[test]
    fn display_round_trips(v in (1u8..=64).prop_flat_map(arb_value)) {
        let text = v.to_string();
        prop_assert_eq!(text.len(), v.width() as usize);
        prop_assert_eq!(text.parse::<Value>().unwrap(), v);
    }

    #[test]
    fn defined_add_matches_integer_add(
        w in 1u8..=63,
        a in any::<u64>(),
        b in any::<u64>(),
    ) {
        let mask = (1u64 << w) - 1;
        let (sum, carry) = Value::from_int(w, a).add(Value::from_int(w, b), Value::FALSE);
        let expected = (a & mask) + (b & mask);
        prop_assert_eq!(sum.to_int(), Some(expected & mask));
        prop_assert_eq!(carry, Value::from_bool(expected > mask));
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(40))]

    /// Resolving an unchanged topology twice gives the same partition.
    #[test]
    fn resolution_is_idempotent((ops, _) in arb_chain()) {
        let chain = gate_chain(&ops);
        let first = Netlist::resolve(&chain.library, chain.circuit).unwrap();
        let second = Netlist::resolve(&chain.library, chain.circuit).unwrap();
        prop_assert!(first.same_partition(&second));
        prop_assert_eq!(first.generation(), second.generation());
    }

    /// Acyclic circuits settle to the same values whatever the drain order.
    #[test]
    fn fixpoint_is_order_independent((ops, pins) in arb_chain()) {
        let (_, forward) = settle_chain(&ops, &pins, QueueOrder::Insertion);
        let (_, backward) = settle_chain(&ops, &pins, QueueOrder::Reverse);
        prop_assert_eq!(forward, backward);
    }

    /// Once settled, further nudges change nothing.
    #[test]
    fn settled_chain_stays_settled((ops, pins) in arb_chain()) {
        let (mut sim, hash) = settle_chain(&ops, &pins, QueueOrder::Insertion);
        let again = sim.nudge().unwrap();
        prop_assert!(again.is_stable());
        prop_assert_eq!(again.changes, 0);
        prop_assert_eq!(sim.state_hash().finish(), hash);
    }
}
