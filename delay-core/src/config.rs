//! Engine-wide timing configuration.

use crate::clock::{DEFAULT_CLOCK_KHZ, DEFAULT_TIMER_OFFSET, TickClock, Ticks};

/// Smallest gap between consecutive entries the compare handler can service.
pub const DEFAULT_MIN_SPACING: Ticks = 10;

/// Configuration baked into the reference firmware.
pub const DEFAULT_ENGINE_CONFIG: EngineConfig = EngineConfig::new(
    TickClock::new(DEFAULT_CLOCK_KHZ, DEFAULT_TIMER_OFFSET),
    DEFAULT_MIN_SPACING,
);

/// Timing parameters shared by the schedule validator and the front-ends.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct EngineConfig {
    clock: TickClock,
    min_spacing: Ticks,
}

impl EngineConfig {
    /// Creates a configuration from a clock and a minimum entry spacing.
    pub const fn new(clock: TickClock, min_spacing: Ticks) -> Self {
        Self { clock, min_spacing }
    }

    /// Returns the tick/microsecond converter.
    pub const fn clock(&self) -> &TickClock {
        &self.clock
    }

    /// Minimum number of ticks between an entry and its predecessor (or tick 0).
    pub const fn min_spacing(&self) -> Ticks {
        self.min_spacing
    }

    /// Returns a copy with a different minimum spacing.
    #[must_use]
    pub const fn with_min_spacing(mut self, min_spacing: Ticks) -> Self {
        self.min_spacing = min_spacing;
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        DEFAULT_ENGINE_CONFIG
    }
}
