//! Shared rendering for the `status` command.

use core::fmt;

use crate::config::EngineConfig;
use crate::engine::EngineStatus;

/// Renders an [`EngineStatus`] and the active timing configuration.
#[derive(Clone, Copy, Debug)]
pub struct StatusFormatter<'a> {
    status: &'a EngineStatus,
    config: &'a EngineConfig,
    entries: usize,
    capacity: usize,
}

impl<'a> StatusFormatter<'a> {
    #[must_use]
    pub const fn new(
        status: &'a EngineStatus,
        config: &'a EngineConfig,
        entries: usize,
        capacity: usize,
    ) -> Self {
        Self {
            status,
            config,
            entries,
            capacity,
        }
    }

    /// Writes the arbiter line (e.g. `trigger state=armed cursor=0/4 cycles=12`).
    pub fn write_trigger_line<W: fmt::Write>(&self, writer: &mut W) -> fmt::Result {
        write!(
            writer,
            "trigger state={} cursor={}/{} cycles={}",
            self.status.state, self.status.cursor, self.status.count, self.status.completed_cycles
        )
    }

    /// Writes the table usage line (e.g. `table entries=4/10`).
    pub fn write_table_line<W: fmt::Write>(&self, writer: &mut W) -> fmt::Result {
        write!(writer, "table entries={}/{}", self.entries, self.capacity)
    }

    /// Writes the timing line (e.g. `clock 2000kHz latency=3.000us spacing=5.000us max=32770.500us`).
    pub fn write_clock_line<W: fmt::Write>(&self, writer: &mut W) -> fmt::Result {
        let clock = self.config.clock();
        write!(
            writer,
            "clock {}kHz latency={:.3}us spacing={:.3}us max={:.3}us",
            clock.clock_khz(),
            clock.ticks_to_micros(0),
            clock.span_micros(self.config.min_spacing()),
            clock.epoch_micros(),
        )
    }
}
