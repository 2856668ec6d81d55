use std::fs::{self, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant as HostInstant};

use delay_core::config::EngineConfig;
use delay_core::engine::DelayEngine;
use delay_core::engine::sim::SimulatedHardware;
use delay_core::persist::{ScheduleSource, load_or_default};
use delay_core::repl::{CommandError, CommandExecutor};
use delay_core::schedule::{SCHEDULE_CAPACITY, label_for_index};
use delay_core::telemetry::{
    TelemetryEventKind, TelemetryInstant, TelemetryPayload, TelemetryRecord, TelemetryRecorder,
};

use crate::store::HostStore;

/// Port writes kept per simulated cycle; one per schedule entry is enough.
const TRACE_DEPTH: usize = SCHEDULE_CAPACITY;

/// Upper bound for `trigger <n>`.
pub const MAX_TRIGGER_COUNT: u32 = 1_000;

pub const META_HELP: &[(&str, &str)] = &[
    ("trigger [<n>]", "fire n simulated trigger edges and print the port writes"),
    ("events", "show the telemetry ring"),
    ("exit", "leave the emulator"),
];

/// Session parameters taken from the command line.
#[derive(Clone, Debug, Default)]
pub struct SessionOptions {
    pub config: EngineConfig,
    pub store: Option<PathBuf>,
    pub transcript: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct SessionInstant(HostInstant);

impl SessionInstant {
    fn now() -> Self {
        Self(HostInstant::now())
    }
}

impl TelemetryInstant for SessionInstant {
    fn saturating_duration_since(&self, earlier: Self) -> Duration {
        self.0.saturating_duration_since(earlier.0)
    }
}

/// Engine, simulated board and store behind the emulator prompt.
pub struct Session {
    executor: CommandExecutor<DelayEngine, HostStore>,
    hardware: SimulatedHardware<TRACE_DEPTH>,
    telemetry: TelemetryRecorder<SessionInstant>,
    transcript: Option<TranscriptLogger>,
    started_at: SessionInstant,
}

impl Session {
    pub fn new(options: &SessionOptions) -> io::Result<Self> {
        let store = match &options.store {
            Some(path) => HostStore::file(path),
            None => HostStore::memory(),
        };
        let transcript = match &options.transcript {
            Some(path) => Some(TranscriptLogger::new(path)?),
            None => None,
        };

        Self::with_store(options.config, store, transcript)
    }

    fn with_store(
        config: EngineConfig,
        mut store: HostStore,
        transcript: Option<TranscriptLogger>,
    ) -> io::Result<Self> {
        let started_at = SessionInstant::now();
        let mut telemetry = TelemetryRecorder::new();

        let (list, source) = load_or_default(&mut store, config.min_spacing())
            .map_err(|err| io::Error::other(format!("{}: {err}", store.describe())))?;
        let event = match source {
            ScheduleSource::Stored => TelemetryEventKind::ScheduleLoaded,
            ScheduleSource::ExampleAfterErased | ScheduleSource::ExampleAfterCorrupt(_) => {
                TelemetryEventKind::DefaultScheduleInstalled
            }
        };
        telemetry.record(event, TelemetryPayload::schedule(list.len()), started_at);

        let engine = DelayEngine::new();
        engine
            .replace_schedule(list)
            .map_err(|err| io::Error::other(err.to_string()))?;

        Ok(Self {
            executor: CommandExecutor::new(engine, store, config),
            hardware: SimulatedHardware::new(),
            telemetry,
            transcript,
            started_at,
        })
    }

    pub fn engine(&self) -> &DelayEngine {
        self.executor.gateway()
    }

    pub fn config(&self) -> &EngineConfig {
        self.executor.config()
    }

    /// Runs one prompt line and returns the response lines.
    pub fn handle_command(&mut self, line: &str) -> io::Result<Vec<String>> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Ok(Vec::new());
        }

        let elapsed = self.elapsed();
        if let Some(transcript) = self.transcript.as_mut() {
            transcript.append_line(elapsed, TranscriptRole::Host, trimmed)?;
        }

        let lines = self.dispatch(trimmed);
        if let Some(transcript) = self.transcript.as_mut() {
            for response in &lines {
                transcript.append_line(elapsed, TranscriptRole::Emulator, response)?;
            }
        }
        Ok(lines)
    }

    fn dispatch(&mut self, line: &str) -> Vec<String> {
        let mut words = line.split_whitespace();
        match words.next() {
            Some(word) if word.eq_ignore_ascii_case("trigger") => {
                match parse_trigger_count(words.next(), words.next()) {
                    Ok(count) => self.trigger(count),
                    Err(message) => vec![format!("error: {message}")],
                }
            }
            Some(word) if word.eq_ignore_ascii_case("events") && words.next().is_none() => {
                self.events()
            }
            _ => self.execute(line),
        }
    }

    fn execute(&mut self, line: &str) -> Vec<String> {
        let mut lines = match self.executor.execute(line) {
            Ok(outcome) => {
                if let Some((event, payload)) = outcome.telemetry() {
                    self.telemetry.record(event, payload, SessionInstant::now());
                }
                let mut rendered = String::new();
                // Writing into a String cannot fail.
                let _ = outcome.render(self.executor.config(), "\n", &mut rendered);
                rendered.lines().map(str::to_owned).collect()
            }
            Err(err) => {
                let event = match &err {
                    CommandError::Persist(delay_core::persist::PersistError::Store(_)) => {
                        TelemetryEventKind::StoreFault
                    }
                    _ => TelemetryEventKind::CommandRejected,
                };
                self.telemetry
                    .record(event, TelemetryPayload::none(), SessionInstant::now());
                vec![format!("error: {err}")]
            }
        };

        if line.trim().eq_ignore_ascii_case("help") {
            for (usage, summary) in META_HELP {
                lines.push(format!("{usage:<28} {summary}"));
            }
        }
        lines
    }

    /// Fires `count` edges, one complete cycle each.
    pub fn trigger(&mut self, count: u32) -> Vec<String> {
        let mut lines = Vec::new();
        for _ in 0..count {
            self.hardware.clear_trace();
            let entries = self.engine().schedule_snapshot().len();
            self.telemetry.record_armed(entries, SessionInstant::now());

            let engine = self.executor.gateway();
            if let Err(err) = self.hardware.run_triggered_cycle(engine) {
                lines.push(format!("error: {err}"));
                break;
            }

            let status = engine.status();
            self.telemetry.record_cycle_complete(
                status.count,
                status.completed_cycles,
                SessionInstant::now(),
            );
            lines.push(format!(
                "cycle {}: {} writes",
                status.completed_cycles,
                self.hardware.trace().len()
            ));
            lines.extend(self.trace_lines());
        }
        lines
    }

    fn trace_lines(&self) -> Vec<String> {
        let clock = self.config().clock();
        self.hardware
            .trace()
            .iter()
            .enumerate()
            .map(|(index, event)| {
                format!(
                    "  {label} t={micros:.3}us tick={tick} {pattern}",
                    label = label_for_index(index).unwrap_or('?'),
                    micros = clock.ticks_to_micros(event.tick),
                    tick = event.tick,
                    pattern = event.pattern,
                )
            })
            .collect()
    }

    fn events(&self) -> Vec<String> {
        if self.telemetry.is_empty() {
            return vec!["(no events)".to_string()];
        }
        self.telemetry
            .oldest_first()
            .map(|record| describe_record(record, self.started_at))
            .collect()
    }

    fn elapsed(&self) -> Duration {
        SessionInstant::now().saturating_duration_since(self.started_at)
    }

    #[cfg(test)]
    fn with_memory_store(config: EngineConfig) -> Self {
        Self::with_store(config, HostStore::memory(), None).unwrap()
    }
}

fn parse_trigger_count(count: Option<&str>, extra: Option<&str>) -> Result<u32, String> {
    if let Some(extra) = extra {
        return Err(format!("unexpected `{extra}`; usage: trigger [<n>]"));
    }
    let Some(count) = count else {
        return Ok(1);
    };
    match count.parse::<u32>() {
        Ok(value) if (1..=MAX_TRIGGER_COUNT).contains(&value) => Ok(value),
        _ => Err(format!("trigger count must be 1..={MAX_TRIGGER_COUNT}")),
    }
}

fn describe_record(record: &TelemetryRecord<SessionInstant>, started_at: SessionInstant) -> String {
    let offset = record.timestamp.saturating_duration_since(started_at);
    let detail = match record.details {
        TelemetryPayload::None => String::new(),
        TelemetryPayload::Schedule { entries } => format!(" entries={entries}"),
        TelemetryPayload::Cycle(cycle) => {
            let mut detail = format!(
                " state={} entries={} cycles={}",
                cycle.state, cycle.entries, cycle.completed_cycles
            );
            if let Some(armed_for) = cycle.armed_for {
                detail.push_str(&format!(" armed_for={}us", armed_for.as_micros()));
            }
            detail
        }
    };
    format!(
        "#{id} +{ms}ms {event}{detail}",
        id = record.id,
        ms = offset.as_millis(),
        event = record.event,
    )
}

/// Appends the prompt conversation to a file.
struct TranscriptLogger {
    writer: BufWriter<fs::File>,
}

impl TranscriptLogger {
    fn new(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;

        let mut logger = Self {
            writer: BufWriter::new(file),
        };
        writeln!(logger.writer, "# Trigger delay emulator transcript")?;
        writeln!(logger.writer, "# Timestamps are milliseconds since session start")?;
        writeln!(logger.writer)?;
        logger.writer.flush()?;
        Ok(logger)
    }

    fn append_line(&mut self, elapsed: Duration, role: TranscriptRole, line: &str) -> io::Result<()> {
        writeln!(
            self.writer,
            "[+{:>6} ms] {} {}",
            elapsed.as_millis(),
            role.prefix(),
            line
        )?;
        self.writer.flush()
    }
}

enum TranscriptRole {
    Host,
    Emulator,
}

impl TranscriptRole {
    fn prefix(&self) -> &'static str {
        match self {
            TranscriptRole::Host => "HOST>",
            TranscriptRole::Emulator => "EMU <",
        }
    }
}
