//! Firmware side of the telemetry ring.
//!
//! `delay-core` records structured events; this module supplies the instant
//! type and mirrors each record to defmt (or stdout on host builds) so the
//! RTT log shows the same history the ring keeps.

#![cfg_attr(not(target_os = "none"), allow(dead_code))]

use core::fmt::{self, Write};
use core::time::Duration;

use delay_core::telemetry::{
    TelemetryEventKind, TelemetryInstant, TelemetryPayload, TelemetryRecord, TelemetryRecorder,
};
use embassy_time::Instant;
use heapless::String;

/// Longest formatted log line; longer lines are cut short.
pub const LOG_LINE_LEN: usize = 96;

/// `embassy_time::Instant` wrapper used for telemetry timestamps.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct FirmwareInstant(Instant);

impl FirmwareInstant {
    pub const fn from_micros(micros: u64) -> Self {
        Self(Instant::from_micros(micros))
    }

    pub fn as_micros(self) -> u64 {
        self.0.as_micros()
    }
}

impl From<Instant> for FirmwareInstant {
    fn from(value: Instant) -> Self {
        Self(value)
    }
}

impl TelemetryInstant for FirmwareInstant {
    fn saturating_duration_since(&self, earlier: Self) -> Duration {
        Duration::from_micros(self.0.saturating_duration_since(earlier.0).as_micros())
    }
}

pub type FirmwareTelemetry = TelemetryRecorder<FirmwareInstant>;

/// Log prefix for the subsystem that produced `event`.
pub const fn subsystem(event: TelemetryEventKind) -> &'static str {
    match event {
        TelemetryEventKind::CycleArmed
        | TelemetryEventKind::CycleComplete
        | TelemetryEventKind::Custom(_) => "engine",
        TelemetryEventKind::ScheduleChanged | TelemetryEventKind::CommandRejected => "console",
        TelemetryEventKind::ScheduleSaved
        | TelemetryEventKind::ScheduleLoaded
        | TelemetryEventKind::DefaultScheduleInstalled
        | TelemetryEventKind::StoreFault => "storage",
    }
}

/// Writes the log line for `record`.
pub fn format_record<W: Write>(
    writer: &mut W,
    record: &TelemetryRecord<FirmwareInstant>,
) -> fmt::Result {
    write!(
        writer,
        "{}: #{} {} t={}us",
        subsystem(record.event),
        record.id,
        record.event,
        record.timestamp.as_micros()
    )?;

    match record.details {
        TelemetryPayload::None => Ok(()),
        TelemetryPayload::Schedule { entries } => write!(writer, " entries={entries}"),
        TelemetryPayload::Cycle(cycle) => {
            write!(
                writer,
                " state={} entries={} cycles={}",
                cycle.state, cycle.entries, cycle.completed_cycles
            )?;
            match cycle.armed_for {
                Some(armed_for) => write!(writer, " armed_for={}us", armed_for.as_micros()),
                None => Ok(()),
            }
        }
    }
}

/// Mirrors the most recent record of `recorder` to the log sink.
pub fn log_latest(recorder: &FirmwareTelemetry) {
    if let Some(record) = recorder.latest() {
        log_record(record);
    }
}

pub fn log_record(record: &TelemetryRecord<FirmwareInstant>) {
    let mut line: String<LOG_LINE_LEN> = String::new();
    // A full buffer only truncates the line.
    let _ = format_record(&mut line, record);
    match record.event {
        TelemetryEventKind::StoreFault | TelemetryEventKind::CommandRejected => emit_warn(&line),
        _ => emit_info(&line),
    }
}

#[cfg(target_os = "none")]
fn emit_info(line: &str) {
    defmt::info!("{=str}", line);
}

#[cfg(target_os = "none")]
fn emit_warn(line: &str) {
    defmt::warn!("{=str}", line);
}

#[cfg(not(target_os = "none"))]
fn emit_info(line: &str) {
    println!("{line}");
}

#[cfg(not(target_os = "none"))]
fn emit_warn(line: &str) {
    println!("warn: {line}");
}
