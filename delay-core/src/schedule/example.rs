//! Built-in schedule installed when the store holds nothing usable.

use super::{DelayEntry, DelayList, OutputPattern, ScheduleError};
use crate::clock::Ticks;

/// Two pulses on every channel: high at 13, low at 75, high at 149, low at 228.
pub const EXAMPLE_SCHEDULE: [DelayEntry; 4] = [
    DelayEntry::new(13, OutputPattern::ALL_HIGH),
    DelayEntry::new(75, OutputPattern::ALL_LOW),
    DelayEntry::new(149, OutputPattern::ALL_HIGH),
    DelayEntry::new(228, OutputPattern::ALL_LOW),
];

/// Builds [`EXAMPLE_SCHEDULE`] as a validated list.
pub fn example_schedule<const CAPACITY: usize>(
    min_spacing: Ticks,
) -> Result<DelayList<CAPACITY>, ScheduleError> {
    DelayList::from_entries(&EXAMPLE_SCHEDULE, min_spacing)
}
