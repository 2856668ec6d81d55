//! Text rendering of the delay table.
//!
//! Rows are written one line at a time so front-ends can choose their own line
//! endings and buffering.

use core::fmt;

use crate::clock::TickClock;
use crate::schedule::{DelayEntry, label_for_index};

/// Renders `label  micros  ticks  channels` rows for a schedule.
#[derive(Clone, Copy, Debug)]
pub struct DelayTableFormatter<'a> {
    entries: &'a [DelayEntry],
    clock: &'a TickClock,
}

impl<'a> DelayTableFormatter<'a> {
    #[must_use]
    pub const fn new(entries: &'a [DelayEntry], clock: &'a TickClock) -> Self {
        Self { entries, clock }
    }

    /// Number of data rows.
    pub fn row_count(&self) -> usize {
        self.entries.len()
    }

    /// Column header, or `(empty)` when there is nothing to show.
    pub fn write_header<W: fmt::Write>(&self, writer: &mut W) -> fmt::Result {
        if self.entries.is_empty() {
            writer.write_str("(empty)")
        } else {
            writer.write_str("entry     micros  ticks    54321")
        }
    }

    /// Writes row `index` (e.g. `A         10.000     14    11111`).
    pub fn write_row<W: fmt::Write>(&self, writer: &mut W, index: usize) -> fmt::Result {
        let Some(entry) = self.entries.get(index) else {
            return Ok(());
        };
        let label = label_for_index(index).unwrap_or('?');
        write!(
            writer,
            "{label:<5} {micros:>10.3} {ticks:>6}    {pattern}",
            micros = self.clock.ticks_to_micros(entry.ticks),
            ticks = entry.ticks,
            pattern = entry.pattern,
        )
    }
}
