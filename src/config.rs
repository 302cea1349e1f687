//! Engine configuration

use std::time::Duration;

use crate::error::{Error, Result};

// =============================================================================
// Constants
// =============================================================================

/// Default cap on concurrent reads per device
pub const DEFAULT_MAX_IN_FLIGHT: usize = 6;

/// Default iteration budget for one synchronous dispatch pass
pub const DEFAULT_PASS_BUDGET: usize = 10_000;

/// Default cap on concurrently scheduled background overflow passes
pub const DEFAULT_MAX_BACKGROUND_PASSES: usize = 2;

/// Default tick after which a blocked waiter re-kicks the dispatch loop
pub const DEFAULT_WAIT_TICK: Duration = Duration::from_millis(100);

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the read-ahead engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maximum concurrent reads per device
    pub max_in_flight_per_device: usize,

    /// Number of submissions one synchronous dispatch pass may perform
    /// before overflowing to a background task
    pub pass_budget: usize,

    /// Maximum number of background overflow passes scheduled at once
    /// (0 disables the overflow path entirely)
    pub max_background_passes: usize,

    /// How long `wait` and `quiesce` block before self-healing with a
    /// dispatch pass of their own
    pub wait_tick: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_in_flight_per_device: DEFAULT_MAX_IN_FLIGHT,
            pass_budget: DEFAULT_PASS_BUDGET,
            max_background_passes: DEFAULT_MAX_BACKGROUND_PASSES,
            wait_tick: DEFAULT_WAIT_TICK,
        }
    }
}

impl EngineConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.max_in_flight_per_device == 0 {
            return Err(Error::InvalidConfig(
                "max_in_flight_per_device must be > 0".into(),
            ));
        }
        if self.pass_budget == 0 {
            return Err(Error::InvalidConfig("pass_budget must be > 0".into()));
        }
        if self.wait_tick.is_zero() {
            return Err(Error::InvalidConfig("wait_tick must be > 0".into()));
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
