//! Delay-list data structures shared by firmware and host targets.
//!
//! A schedule is a short, fixed-capacity list of [`DelayEntry`] values kept
//! strictly ascending by tick offset. The compare handler walks it by index, so
//! every mutation here preserves ordering and the minimum spacing the handler
//! needs between consecutive compare events. Everything in this module is
//! `no_std` friendly and allocation free.

use core::fmt;

use heapless::Vec;

use crate::clock::{ClockError, Micros, Ticks};
use crate::config::EngineConfig;

pub mod example;

pub use example::{EXAMPLE_SCHEDULE, example_schedule};

/// Number of entries the reference board can hold.
pub const SCHEDULE_CAPACITY: usize = 10;

/// Number of controlled output channels.
pub const CHANNEL_COUNT: u8 = 5;

/// Port bit carrying channel 1; channels 2..5 follow upwards.
pub const FIRST_CHANNEL_BIT: u8 = 3;

/// Port bits driven by schedule entries.
pub const CHANNEL_MASK: u8 = 0b1111_1000;

/// Port bit shared with the trigger input; kept high so the pull-up stays on.
pub const TRIGGER_IDLE_BIT: u8 = 0b0000_0100;

/// Level of every controlled output at the instant an entry fires.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub struct OutputPattern(u8);

impl OutputPattern {
    /// Every channel low.
    pub const ALL_LOW: Self = Self(0);
    /// Every channel high.
    pub const ALL_HIGH: Self = Self(CHANNEL_MASK);

    /// Builds a pattern from port bits, discarding anything outside [`CHANNEL_MASK`].
    pub const fn from_bits(bits: u8) -> Self {
        Self(bits & CHANNEL_MASK)
    }

    /// Builds a pattern from a channel mask where bit 0 is channel 1.
    pub const fn from_channels(channels: u8) -> Self {
        Self::from_bits(channels << FIRST_CHANNEL_BIT)
    }

    /// Port bits for the controlled channels.
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Channel mask where bit 0 is channel 1.
    pub const fn channels(self) -> u8 {
        self.0 >> FIRST_CHANNEL_BIT
    }

    /// Byte written to the output port, including the trigger idle bit.
    pub const fn port_value(self) -> u8 {
        self.0 | TRIGGER_IDLE_BIT
    }

    /// Inverts every controlled channel.
    #[must_use]
    pub const fn complement(self) -> Self {
        Self(!self.0 & CHANNEL_MASK)
    }

    /// Returns `true` when the 1-based `channel` is driven high.
    pub const fn is_high(self, channel: u8) -> bool {
        if channel == 0 || channel > CHANNEL_COUNT {
            return false;
        }
        self.channels() & (1 << (channel - 1)) != 0
    }
}

impl fmt::Display for OutputPattern {
    /// Renders channels 5..1 as a bit string (e.g. `10110`).
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for channel in (1..=CHANNEL_COUNT).rev() {
            f.write_str(if self.is_high(channel) { "1" } else { "0" })?;
        }
        Ok(())
    }
}

/// One scheduled output transition.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct DelayEntry {
    pub ticks: Ticks,
    pub pattern: OutputPattern,
}

impl DelayEntry {
    pub const fn new(ticks: Ticks, pattern: OutputPattern) -> Self {
        Self { ticks, pattern }
    }
}

/// Timing problems detected while inserting an entry.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum TimingViolation {
    /// Requested delay falls outside the timer epoch.
    Unrepresentable(ClockError),
    /// Entry would fire too soon after its predecessor (or after the trigger).
    TooCloseToPrevious {
        previous: Ticks,
        requested: Ticks,
        min_spacing: Ticks,
    },
    /// Entry would leave its successor too little time.
    TooCloseToNext {
        next: Ticks,
        requested: Ticks,
        min_spacing: Ticks,
    },
    /// An entry already fires on this tick.
    Duplicate { ticks: Ticks },
}

impl fmt::Display for TimingViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimingViolation::Unrepresentable(err) => err.fmt(f),
            TimingViolation::TooCloseToPrevious {
                previous,
                requested,
                min_spacing,
            } => write!(
                f,
                "tick {requested} is not more than {min_spacing} ticks after tick {previous}"
            ),
            TimingViolation::TooCloseToNext {
                next,
                requested,
                min_spacing,
            } => write!(
                f,
                "tick {requested} is not more than {min_spacing} ticks before tick {next}"
            ),
            TimingViolation::Duplicate { ticks } => {
                write!(f, "an entry already fires at tick {ticks}")
            }
        }
    }
}

/// Errors reported by schedule mutations. The list is unchanged on error.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum ScheduleError {
    /// Every slot is in use.
    ListFull { capacity: usize },
    /// Index does not name an existing entry.
    IndexOutOfRange { index: usize, count: usize },
    /// Entry would break the timing guarantees of the compare handler.
    Timing(TimingViolation),
}

impl ScheduleError {
    /// Returns `true` for list-full and bad-index errors.
    pub const fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            ScheduleError::ListFull { .. } | ScheduleError::IndexOutOfRange { .. }
        )
    }
}

impl From<TimingViolation> for ScheduleError {
    fn from(value: TimingViolation) -> Self {
        ScheduleError::Timing(value)
    }
}

impl fmt::Display for ScheduleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScheduleError::ListFull { capacity } => {
                write!(f, "list full ({capacity} entries)")
            }
            ScheduleError::IndexOutOfRange { index, count } => match label_for_index(*index) {
                Some(label) => write!(f, "index {label} out of range ({count} entries)"),
                None => write!(f, "index {index} out of range ({count} entries)"),
            },
            ScheduleError::Timing(violation) => violation.fmt(f),
        }
    }
}

/// Operator-facing label for an entry index (`0 -> 'A'`).
pub fn label_for_index(index: usize) -> Option<char> {
    u8::try_from(index)
        .ok()
        .filter(|value| *value < 26)
        .map(|value| char::from(b'A' + value))
}

/// Index named by an operator label, case-insensitive.
pub fn index_for_label(label: char) -> Option<usize> {
    if label.is_ascii_alphabetic() {
        Some(usize::from(label.to_ascii_uppercase() as u8 - b'A'))
    } else {
        None
    }
}

/// Ordered, fixed-capacity schedule of delay entries.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DelayList<const CAPACITY: usize = SCHEDULE_CAPACITY> {
    entries: Vec<DelayEntry, CAPACITY>,
}

impl<const CAPACITY: usize> DelayList<CAPACITY> {
    /// Creates an empty schedule.
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Builds a schedule from entries, validating each one as it is inserted.
    pub fn from_entries(entries: &[DelayEntry], min_spacing: Ticks) -> Result<Self, ScheduleError> {
        let mut list = Self::new();
        for entry in entries {
            list.insert_entry(entry.ticks, Some(entry.pattern), min_spacing)?;
        }
        Ok(list)
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` when no entries are stored.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns `true` when every slot is used.
    pub fn is_full(&self) -> bool {
        self.entries.is_full()
    }

    /// Maximum number of entries.
    pub const fn capacity(&self) -> usize {
        CAPACITY
    }

    /// Entries in firing order.
    pub fn entries(&self) -> &[DelayEntry] {
        self.entries.as_slice()
    }

    /// Returns the entry at `index`.
    pub fn get(&self, index: usize) -> Option<&DelayEntry> {
        self.entries.get(index)
    }

    /// Index the entry for `ticks` would occupy: the first entry at or after it.
    pub fn insertion_index(&self, ticks: Ticks) -> usize {
        self.entries
            .iter()
            .position(|entry| entry.ticks >= ticks)
            .unwrap_or(self.entries.len())
    }

    /// Inserts an entry `micros` after the trigger edge.
    ///
    /// Without an explicit pattern the new entry toggles every channel relative
    /// to its predecessor, or drives everything low at the head of the list.
    /// Returns the index the entry landed on.
    pub fn insert(
        &mut self,
        micros: Micros,
        pattern: Option<OutputPattern>,
        config: &EngineConfig,
    ) -> Result<usize, ScheduleError> {
        self.ensure_capacity()?;
        let ticks = config
            .clock()
            .checked_micros_to_ticks(micros)
            .map_err(TimingViolation::Unrepresentable)?;
        self.insert_entry(ticks, pattern, config.min_spacing())
    }

    /// Inserts an entry at an explicit tick offset.
    pub fn insert_entry(
        &mut self,
        ticks: Ticks,
        pattern: Option<OutputPattern>,
        min_spacing: Ticks,
    ) -> Result<usize, ScheduleError> {
        self.ensure_capacity()?;

        let index = self.insertion_index(ticks);
        self.check_spacing(index, ticks, min_spacing)?;

        let pattern = pattern.unwrap_or_else(|| match index.checked_sub(1) {
            Some(previous) => self.entries[previous].pattern.complement(),
            None => OutputPattern::ALL_LOW,
        });

        self.entries
            .insert(index, DelayEntry::new(ticks, pattern))
            .map_err(|_| ScheduleError::ListFull { capacity: CAPACITY })?;
        Ok(index)
    }

    /// Removes the entry at `index`, shifting later entries down.
    pub fn remove_at(&mut self, index: usize) -> Result<DelayEntry, ScheduleError> {
        if index >= self.entries.len() {
            return Err(ScheduleError::IndexOutOfRange {
                index,
                count: self.entries.len(),
            });
        }
        Ok(self.entries.remove(index))
    }

    /// Removes every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    fn ensure_capacity(&self) -> Result<(), ScheduleError> {
        if self.entries.is_full() {
            Err(ScheduleError::ListFull { capacity: CAPACITY })
        } else {
            Ok(())
        }
    }

    fn check_spacing(
        &self,
        index: usize,
        ticks: Ticks,
        min_spacing: Ticks,
    ) -> Result<(), TimingViolation> {
        // The trigger itself acts as the predecessor of the first entry.
        let previous = index
            .checked_sub(1)
            .map_or(0, |previous| self.entries[previous].ticks);
        if ticks - previous <= min_spacing {
            return Err(TimingViolation::TooCloseToPrevious {
                previous,
                requested: ticks,
                min_spacing,
            });
        }

        if let Some(next) = self.entries.get(index) {
            if next.ticks == ticks {
                return Err(TimingViolation::Duplicate { ticks });
            }
            if next.ticks - ticks <= min_spacing {
                return Err(TimingViolation::TooCloseToNext {
                    next: next.ticks,
                    requested: ticks,
                    min_spacing,
                });
            }
        }

        Ok(())
    }
}

impl<const CAPACITY: usize> Default for DelayList<CAPACITY> {
    fn default() -> Self {
        Self::new()
    }
}
