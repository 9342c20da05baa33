//! Propagation status, step outcomes, and state hashing.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};

use crate::id::{BundleId, CircuitId, StateNodeId};
use crate::location::Location;
use crate::value::Value;

// ---------------------------------------------------------------------------
// Propagator status
// ---------------------------------------------------------------------------

/// Where the propagator stands after its most recent drain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PropagatorStatus {
    /// No pending work: the last drain reached a fixpoint.
    #[default]
    Idle,
    /// A drain is in progress.
    Running,
    /// The round budget ran out before a fixpoint.
    Oscillating,
    /// A stop request interrupted the drain. Pending work is kept.
    Stopped,
}

// ---------------------------------------------------------------------------
// Bundle references
// ---------------------------------------------------------------------------

/// A bundle inside a particular state node, with a point to highlight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BundleRef {
    pub node: StateNodeId,
    pub circuit: CircuitId,
    pub bundle: BundleId,
    pub location: Location,
}

// ---------------------------------------------------------------------------
// Step outcome
// ---------------------------------------------------------------------------

/// Result of one `nudge`, `tick` or `reset`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepOutcome {
    pub status: PropagatorStatus,
    /// Rounds run in this drain.
    pub rounds: u32,
    /// Component evaluations performed.
    pub evaluations: u64,
    /// Bundle value changes observed.
    pub changes: u64,
    /// Bundles still changing when the budget ran out.
    pub oscillating: Vec<BundleRef>,
}

impl StepOutcome {
    pub fn is_stable(&self) -> bool {
        self.status == PropagatorStatus::Idle
    }
}

// ---------------------------------------------------------------------------
// Stop handle
// ---------------------------------------------------------------------------

/// Cross-thread request to interrupt a running drain.
///
/// The flag is checked between rounds and consumed by the drain that
/// observes it.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Clear the flag, returning whether it was set.
    pub fn take(&self) -> bool {
        self.0.swap(false, Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// State hash
// ---------------------------------------------------------------------------

/// A simple deterministic hash of simulation state for determinism checks.
///
/// Uses FNV-1a (64-bit) for speed and simplicity. Not cryptographic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateHash(pub u64);

impl StateHash {
    const FNV_OFFSET: u64 = 0xcbf29ce484222325;
    const FNV_PRIME: u64 = 0x100000001b3;

    pub fn new() -> Self {
        Self(Self::FNV_OFFSET)
    }

    /// Feed bytes into the hash.
    pub fn write(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.0 ^= b as u64;
            self.0 = self.0.wrapping_mul(Self::FNV_PRIME);
        }
    }

    pub fn write_u64(&mut self, v: u64) {
        self.write(&v.to_le_bytes());
    }

    pub fn write_u32(&mut self, v: u32) {
        self.write(&v.to_le_bytes());
    }

    /// Feed a logic value: width and all three bit masks.
    pub fn write_value(&mut self, v: &Value) {
        self.write(&[v.width()]);
        self.write_u64(v.ones_mask());
        self.write_u64(v.unknown_mask());
        self.write_u64(v.error_mask());
    }

    pub fn finish(self) -> u64 {
        self.0
    }
}

impl Default for StateHash {
    fn default() -> Self {
        Self::new()
    }
}
