//! Telemetry event catalog and ring buffer shared by firmware and host targets.
//!
//! Events carry compact numeric codes so they can be mirrored over a log
//! channel, while the payload enums keep the details the console needs. The
//! recorder never allocates and stays `no_std` compatible; platforms pick the
//! instant type.

use core::{fmt, time::Duration};

use heapless::HistoryBuf;

use crate::engine::ArmState;

/// Sequential identifier assigned to each record.
pub type EventId = u32;

/// Discriminated telemetry events.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TelemetryEventKind {
    CycleArmed,
    CycleComplete,
    ScheduleChanged,
    ScheduleSaved,
    ScheduleLoaded,
    DefaultScheduleInstalled,
    StoreFault,
    CommandRejected,
    Custom(u16),
}

impl fmt::Display for TelemetryEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TelemetryEventKind::CycleArmed => f.write_str("cycle-armed"),
            TelemetryEventKind::CycleComplete => f.write_str("cycle-complete"),
            TelemetryEventKind::ScheduleChanged => f.write_str("schedule-changed"),
            TelemetryEventKind::ScheduleSaved => f.write_str("schedule-saved"),
            TelemetryEventKind::ScheduleLoaded => f.write_str("schedule-loaded"),
            TelemetryEventKind::DefaultScheduleInstalled => {
                f.write_str("default-schedule-installed")
            }
            TelemetryEventKind::StoreFault => f.write_str("store-fault"),
            TelemetryEventKind::CommandRejected => f.write_str("command-rejected"),
            TelemetryEventKind::Custom(code) => write!(f, "custom({code})"),
        }
    }
}

impl TelemetryEventKind {
    const CYCLE_ARMED_CODE: u16 = 0x0001;
    const CYCLE_COMPLETE_CODE: u16 = 0x0002;
    const SCHEDULE_CHANGED_CODE: u16 = 0x0010;
    const SCHEDULE_SAVED_CODE: u16 = 0x0011;
    const SCHEDULE_LOADED_CODE: u16 = 0x0012;
    const DEFAULT_SCHEDULE_CODE: u16 = 0x0013;
    const STORE_FAULT_CODE: u16 = 0x0020;
    const COMMAND_REJECTED_CODE: u16 = 0x0030;

    /// Encodes the event into a compact transport-friendly discriminant.
    #[must_use]
    pub const fn to_raw(self) -> u16 {
        match self {
            TelemetryEventKind::CycleArmed => Self::CYCLE_ARMED_CODE,
            TelemetryEventKind::CycleComplete => Self::CYCLE_COMPLETE_CODE,
            TelemetryEventKind::ScheduleChanged => Self::SCHEDULE_CHANGED_CODE,
            TelemetryEventKind::ScheduleSaved => Self::SCHEDULE_SAVED_CODE,
            TelemetryEventKind::ScheduleLoaded => Self::SCHEDULE_LOADED_CODE,
            TelemetryEventKind::DefaultScheduleInstalled => Self::DEFAULT_SCHEDULE_CODE,
            TelemetryEventKind::StoreFault => Self::STORE_FAULT_CODE,
            TelemetryEventKind::CommandRejected => Self::COMMAND_REJECTED_CODE,
            TelemetryEventKind::Custom(code) => code,
        }
    }

    /// Decodes a raw discriminant, falling back to [`TelemetryEventKind::Custom`].
    #[must_use]
    pub const fn from_raw(code: u16) -> Self {
        match code {
            Self::CYCLE_ARMED_CODE => TelemetryEventKind::CycleArmed,
            Self::CYCLE_COMPLETE_CODE => TelemetryEventKind::CycleComplete,
            Self::SCHEDULE_CHANGED_CODE => TelemetryEventKind::ScheduleChanged,
            Self::SCHEDULE_SAVED_CODE => TelemetryEventKind::ScheduleSaved,
            Self::SCHEDULE_LOADED_CODE => TelemetryEventKind::ScheduleLoaded,
            Self::DEFAULT_SCHEDULE_CODE => TelemetryEventKind::DefaultScheduleInstalled,
            Self::STORE_FAULT_CODE => TelemetryEventKind::StoreFault,
            Self::COMMAND_REJECTED_CODE => TelemetryEventKind::CommandRejected,
            other => TelemetryEventKind::Custom(other),
        }
    }
}

/// Payloads carried alongside telemetry events.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TelemetryPayload {
    None,
    /// Arbiter transition details.
    Cycle(CycleTelemetry),
    /// Number of entries in the schedule after the event.
    Schedule { entries: u8 },
}

impl TelemetryPayload {
    #[must_use]
    pub const fn none() -> Self {
        TelemetryPayload::None
    }

    #[must_use]
    pub fn schedule(entries: usize) -> Self {
        TelemetryPayload::Schedule {
            entries: truncate_count(entries),
        }
    }
}

/// Arbiter cycle summary.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct CycleTelemetry {
    pub state: ArmState,
    pub entries: u8,
    pub completed_cycles: u32,
    /// Time from arming to completion, when the platform tracked it.
    pub armed_for: Option<Duration>,
}

impl CycleTelemetry {
    #[must_use]
    pub const fn new(state: ArmState, entries: u8, completed_cycles: u32) -> Self {
        Self {
            state,
            entries,
            completed_cycles,
            armed_for: None,
        }
    }
}

/// Total number of telemetry entries retained in memory.
pub const TELEMETRY_RING_CAPACITY: usize = 64;

/// Monotonic instant wrappers used for telemetry timestamps.
pub trait TelemetryInstant: Copy {
    /// Returns the saturating duration from `earlier` to `self`.
    fn saturating_duration_since(&self, earlier: Self) -> Duration;
}

/// Telemetry record stored in the ring buffer.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TelemetryRecord<TInstant>
where
    TInstant: Copy,
{
    pub id: EventId,
    pub timestamp: TInstant,
    pub event: TelemetryEventKind,
    pub details: TelemetryPayload,
}

/// Telemetry ring buffer type alias.
pub type TelemetryRing<TInstant, const CAPACITY: usize = TELEMETRY_RING_CAPACITY> =
    HistoryBuf<TelemetryRecord<TInstant>, CAPACITY>;

/// Records telemetry events into a fixed-size ring buffer.
pub struct TelemetryRecorder<TInstant, const CAPACITY: usize = TELEMETRY_RING_CAPACITY>
where
    TInstant: Copy,
{
    ring: TelemetryRing<TInstant, CAPACITY>,
    armed_at: Option<TInstant>,
    next_event_id: EventId,
}

impl<TInstant, const CAPACITY: usize> TelemetryRecorder<TInstant, CAPACITY>
where
    TInstant: TelemetryInstant,
{
    #[must_use]
    pub const fn new() -> Self {
        Self {
            ring: HistoryBuf::new(),
            armed_at: None,
            next_event_id: 0,
        }
    }

    /// Records in chronological order.
    pub fn oldest_first(&self) -> impl Iterator<Item = &TelemetryRecord<TInstant>> + '_ {
        self.ring.oldest_ordered()
    }

    pub fn latest(&self) -> Option<&TelemetryRecord<TInstant>> {
        self.ring.recent()
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    /// Records the foreground arming the trigger.
    pub fn record_armed(&mut self, entries: usize, timestamp: TInstant) -> EventId {
        self.armed_at = Some(timestamp);
        let payload = TelemetryPayload::Cycle(CycleTelemetry::new(
            ArmState::Armed,
            truncate_count(entries),
            0,
        ));
        self.record(TelemetryEventKind::CycleArmed, payload, timestamp)
    }

    /// Records a finished cycle, measuring from the matching arm.
    pub fn record_cycle_complete(
        &mut self,
        entries: usize,
        completed_cycles: u32,
        timestamp: TInstant,
    ) -> EventId {
        let mut cycle =
            CycleTelemetry::new(ArmState::Idle, truncate_count(entries), completed_cycles);
        cycle.armed_for = self
            .armed_at
            .take()
            .map(|armed| timestamp.saturating_duration_since(armed));
        self.record(
            TelemetryEventKind::CycleComplete,
            TelemetryPayload::Cycle(cycle),
            timestamp,
        )
    }

    /// Records an arbitrary event with the supplied payload.
    pub fn record(
        &mut self,
        event: TelemetryEventKind,
        payload: TelemetryPayload,
        timestamp: TInstant,
    ) -> EventId {
        let id = self.next_event_id;
        self.next_event_id = self.next_event_id.wrapping_add(1);

        self.ring.write(TelemetryRecord {
            id,
            timestamp,
            event,
            details: payload,
        });

        id
    }
}

impl<TInstant, const CAPACITY: usize> Default for TelemetryRecorder<TInstant, CAPACITY>
where
    TInstant: TelemetryInstant,
{
    fn default() -> Self {
        Self::new()
    }
}

fn truncate_count(count: usize) -> u8 {
    match u8::try_from(count) {
        Ok(value) => value,
        Err(_) => u8::MAX,
    }
}
