//! Conversions between compare-timer ticks and physical microseconds.
//!
//! Every tick value stored in a schedule is measured from the instant the
//! hardware timer was started by the trigger handler. The trigger edge itself
//! happens a fixed number of ticks earlier (the handler entry latency), so the
//! clock folds that offset into both directions of the conversion. Operators
//! always see delays relative to the physical edge.

use core::fmt;

/// Native unit of the 16-bit compare timer.
pub type Ticks = u16;

/// Microseconds relative to the trigger edge.
pub type Micros = f32;

/// Tick rate of the reference board (64 MHz core clock, prescaler 32).
pub const DEFAULT_CLOCK_KHZ: u32 = 2_000;

/// Measured latency between the trigger edge and the first usable timer tick.
pub const DEFAULT_TIMER_OFFSET: Ticks = 6;

/// Reasons a microsecond value cannot be represented in the timer epoch.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum ClockError {
    /// Value was NaN or infinite.
    NotFinite,
    /// Value lands before the first tick the timer can compare against.
    BelowLatency { micros: Micros, minimum: Micros },
    /// Value lands past the last tick of the timer epoch.
    OutOfRange { micros: Micros, maximum: Micros },
}

impl fmt::Display for ClockError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClockError::NotFinite => f.write_str("delay is not a finite number"),
            ClockError::BelowLatency { micros, minimum } => {
                write!(f, "{micros}us is below the trigger latency of {minimum}us")
            }
            ClockError::OutOfRange { micros, maximum } => {
                write!(f, "{micros}us exceeds the timer epoch of {maximum}us")
            }
        }
    }
}

/// Tick/microsecond converter parameterised by timer rate and latency offset.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TickClock {
    clock_khz: u32,
    timer_offset: Ticks,
}

impl TickClock {
    /// Creates a clock running at `clock_khz` with `timer_offset` ticks of latency.
    ///
    /// A zero rate is bumped to 1 kHz so conversions never divide by zero.
    pub const fn new(clock_khz: u32, timer_offset: Ticks) -> Self {
        Self {
            clock_khz: if clock_khz == 0 { 1 } else { clock_khz },
            timer_offset,
        }
    }

    /// Timer rate in kHz.
    pub const fn clock_khz(&self) -> u32 {
        self.clock_khz
    }

    /// Latency offset in ticks.
    pub const fn timer_offset(&self) -> Ticks {
        self.timer_offset
    }

    /// Converts a scheduled tick into microseconds after the trigger edge.
    #[allow(clippy::cast_precision_loss)]
    pub fn ticks_to_micros(&self, ticks: Ticks) -> Micros {
        let physical = u32::from(ticks) + u32::from(self.timer_offset);
        (physical as f32) * 1_000.0 / (self.clock_khz as f32)
    }

    /// Converts microseconds after the trigger edge into a scheduled tick.
    ///
    /// Values outside the timer epoch are clamped to `0..=Ticks::MAX`; NaN maps
    /// to zero. Use [`TickClock::checked_micros_to_ticks`] to reject them instead.
    pub fn micros_to_ticks(&self, micros: Micros) -> Ticks {
        match self.checked_micros_to_ticks(micros) {
            Ok(ticks) => ticks,
            Err(ClockError::OutOfRange { .. }) => Ticks::MAX,
            Err(ClockError::BelowLatency { .. } | ClockError::NotFinite) => 0,
        }
    }

    /// Converts microseconds into ticks, rejecting values the timer cannot hit.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn checked_micros_to_ticks(&self, micros: Micros) -> Result<Ticks, ClockError> {
        if !micros.is_finite() {
            return Err(ClockError::NotFinite);
        }

        let physical = libm::round(f64::from(micros) * f64::from(self.clock_khz) / 1_000.0);
        let offset = f64::from(self.timer_offset);
        if physical < offset {
            return Err(ClockError::BelowLatency {
                micros,
                minimum: self.ticks_to_micros(0),
            });
        }

        let ticks = physical - offset;
        if ticks > f64::from(Ticks::MAX) {
            return Err(ClockError::OutOfRange {
                micros,
                maximum: self.epoch_micros(),
            });
        }

        Ok(ticks as Ticks)
    }

    /// Longest delay after the trigger edge the timer epoch can represent.
    pub fn epoch_micros(&self) -> Micros {
        self.ticks_to_micros(Ticks::MAX)
    }

    /// Duration of a span of ticks, without the latency offset.
    #[allow(clippy::cast_precision_loss)]
    pub fn span_micros(&self, ticks: Ticks) -> Micros {
        f32::from(ticks) * 1_000.0 / (self.clock_khz as f32)
    }
}

impl Default for TickClock {
    fn default() -> Self {
        Self::new(DEFAULT_CLOCK_KHZ, DEFAULT_TIMER_OFFSET)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offset_is_added_before_conversion() {
        let clock = TickClock::new(2_000, 6);
        assert_eq!(clock.ticks_to_micros(0), 3.0);
        assert_eq!(clock.ticks_to_micros(14), 10.0);
    }

    #[test]
    fn micros_round_half_up() {
        let clock = TickClock::new(2_000, 0);
        assert_eq!(clock.micros_to_ticks(10.0), 20);
        assert_eq!(clock.micros_to_ticks(10.25), 21);
        assert_eq!(clock.micros_to_ticks(10.2), 20);
    }

    #[test]
    fn round_trip_holds_for_every_tick() {
        let clock = TickClock::default();
        for ticks in 0..=Ticks::MAX {
            assert_eq!(clock.micros_to_ticks(clock.ticks_to_micros(ticks)), ticks);
        }
    }

    #[test]
    fn round_trip_holds_for_odd_rates() {
        let clock = TickClock::new(16_000, 11);
        for ticks in (0..=Ticks::MAX).step_by(7) {
            assert_eq!(clock.micros_to_ticks(clock.ticks_to_micros(ticks)), ticks);
        }
    }

    #[test]
    fn checked_conversion_rejects_latency_and_epoch() {
        let clock = TickClock::new(2_000, 6);
        assert!(matches!(
            clock.checked_micros_to_ticks(1.0),
            Err(ClockError::BelowLatency { .. })
        ));
        assert!(matches!(
            clock.checked_micros_to_ticks(clock.epoch_micros() + 1.0),
            Err(ClockError::OutOfRange { .. })
        ));
        assert_eq!(
            clock.checked_micros_to_ticks(f32::NAN),
            Err(ClockError::NotFinite)
        );
        assert_eq!(clock.checked_micros_to_ticks(3.0), Ok(0));
    }

    #[test]
    fn unchecked_conversion_clamps() {
        let clock = TickClock::new(2_000, 6);
        assert_eq!(clock.micros_to_ticks(-5.0), 0);
        assert_eq!(clock.micros_to_ticks(1.0e9), Ticks::MAX);
    }

    #[test]
    fn zero_rate_is_bumped() {
        assert_eq!(TickClock::new(0, 0).clock_khz(), 1);
    }
}
