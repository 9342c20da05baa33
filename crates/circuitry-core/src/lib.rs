//! Circuitry Core -- the simulation engine for a digital logic editor.
//!
//! This crate turns an editable wiring diagram into electrical nets, keeps
//! one tree of simulation states per open view, and propagates four-valued
//! signals until the circuit settles, oscillates, or is told to stop.
//!
//! # Step Pipeline
//!
//! Each call to [`simulator::Simulator::nudge`] (or `tick`, which first
//! advances every clock) runs these phases:
//!
//! 1. **Sync** -- Re-resolve netlists of edited circuits and re-key the
//!    state nodes built from them.
//! 2. **Drain** -- Evaluate dirty components round by round against the
//!    values from before the round, then commit what they drive. A bundle
//!    that changes marks every component reading it.
//! 3. **Classify** -- Stop at a fixpoint (`Idle`), at the round budget
//!    (`Oscillating`) or on request (`Stopped`).
//!
//! Topology edits go through the [`circuit::CircuitLibrary`]; the simulator
//! picks them up lazily on the next step:
//!
//! ```rust,ignore
//! let mut sim = Simulator::new(library)?;
//! let root = sim.create_root(circuit)?;
//! sim.poke_pin(root, switch, Value::TRUE)?;
//! let outcome = sim.nudge()?;
//! assert!(outcome.is_stable());
//! ```
//!
//! # Key Types
//!
//! - [`value::Value`] -- Up to 64 bits, each 0, 1, X (floating) or E (error).
//! - [`circuit::CircuitLibrary`] -- Circuit definitions forming a DAG via
//!   sub-circuit components.
//! - [`netlist::Netlist`] -- Bundles and bit threads resolved from one
//!   definition.
//! - [`state::StateTree`] -- Per-instantiation simulation state; always a
//!   tree.
//! - [`propagator::Propagator`] -- Work queue drain with an oscillation
//!   budget.
//! - [`report::ConsistencyReport`] -- Width conflicts, contention and
//!   oscillation as data.
//! - [`handle::SimHandle`] -- Thread-safe wrapper publishing immutable
//!   snapshots.

pub mod circuit;
pub mod component;
pub mod config;
pub mod handle;
pub mod id;
pub mod location;
pub mod netlist;
pub mod propagator;
pub mod queue;
pub mod report;
pub mod sim;
pub mod simulator;
pub mod state;
pub mod value;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
