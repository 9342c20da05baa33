use serde::{Deserialize, Serialize};

/// Order in which the items of one propagation round are evaluated.
///
/// Fixpoints of combinational circuits do not depend on it; it exists so a
/// run can be reproduced bit for bit, and so that independence can be tested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueOrder {
    /// First marked, first evaluated.
    #[default]
    Insertion,
    /// Last marked, first evaluated.
    Reverse,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("max_rounds must be at least 1")]
    ZeroRoundBudget,
    #[error("oscillation_window must be at least 1")]
    ZeroWindow,
    #[error("tick_period_ms must be at least 1")]
    ZeroTickPeriod,
}

/// Tunables of the propagator and the threaded handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Propagation rounds allowed per `nudge` or `tick` before the
    /// propagator reports oscillation.
    pub max_rounds: u32,
    /// How many final rounds contribute to the oscillating bundle set.
    pub oscillation_window: u32,
    /// Period of the auto-tick thread.
    pub tick_period_ms: u64,
    /// Whether a poke through the handle propagates immediately.
    pub auto_propagate: bool,
    pub queue_order: QueueOrder,
}

impl SimConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_rounds == 0 {
            return Err(ConfigError::ZeroRoundBudget);
        }
        if self.oscillation_window == 0 {
            return Err(ConfigError::ZeroWindow);
        }
        if self.tick_period_ms == 0 {
            return Err(ConfigError::ZeroTickPeriod);
        }
        Ok(())
    }
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            max_rounds: 1000,
            oscillation_window: 8,
            tick_period_ms: 500,
            auto_propagate: true,
            queue_order: QueueOrder::Insertion,
        }
    }
}
