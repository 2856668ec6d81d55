//! Console command dispatcher.
//!
//! Parsed commands are applied to a [`ScheduleGateway`] (the engine in
//! practice) and a [`NonVolatileStore`]. The dispatcher never touches the
//! arbiter itself; front-ends disarm before executing and re-arm afterwards,
//! and the gateway refuses edits while a cycle is armed or running.

use core::fmt;

use crate::config::EngineConfig;
use crate::engine::{DelayEngine, EngineError, EngineStatus};
use crate::persist::{self, NonVolatileStore, PersistError};
use crate::schedule::{DelayEntry, DelayList, SCHEDULE_CAPACITY, ScheduleError};
use crate::telemetry::{TelemetryEventKind, TelemetryPayload};

use super::catalog::{self, CommandSpec};
use super::grammar::{self, Command, InsertCommand, RemoveTarget};
use super::status::StatusFormatter;
use super::table::DelayTableFormatter;

/// Foreground access to the schedule owned by the engine.
pub trait ScheduleGateway<const CAPACITY: usize> {
    /// Copies the current schedule.
    fn schedule(&self) -> DelayList<CAPACITY>;

    fn status(&self) -> EngineStatus;

    /// Runs `edit` against the live schedule if no cycle is in flight.
    fn modify_schedule<R>(
        &self,
        edit: impl FnOnce(&mut DelayList<CAPACITY>) -> R,
    ) -> Result<R, EngineError>;
}

impl<const CAPACITY: usize> ScheduleGateway<CAPACITY> for DelayEngine<CAPACITY> {
    fn schedule(&self) -> DelayList<CAPACITY> {
        self.schedule_snapshot()
    }

    fn status(&self) -> EngineStatus {
        DelayEngine::status(self)
    }

    fn modify_schedule<R>(
        &self,
        edit: impl FnOnce(&mut DelayList<CAPACITY>) -> R,
    ) -> Result<R, EngineError> {
        self.edit_schedule(edit)
    }
}

impl<T, const CAPACITY: usize> ScheduleGateway<CAPACITY> for &T
where
    T: ScheduleGateway<CAPACITY>,
{
    fn schedule(&self) -> DelayList<CAPACITY> {
        (**self).schedule()
    }

    fn status(&self) -> EngineStatus {
        (**self).status()
    }

    fn modify_schedule<R>(
        &self,
        edit: impl FnOnce(&mut DelayList<CAPACITY>) -> R,
    ) -> Result<R, EngineError> {
        (**self).modify_schedule(edit)
    }
}

/// Command execution successes.
#[derive(Clone, Debug, PartialEq)]
pub enum CommandOutcome<const CAPACITY: usize = SCHEDULE_CAPACITY> {
    Table(DelayList<CAPACITY>),
    Inserted { index: usize, entry: DelayEntry },
    Removed { index: usize, entry: DelayEntry },
    Cleared { removed: usize },
    Saved { bytes: usize, entries: usize },
    Loaded { entries: usize },
    Status { status: EngineStatus, entries: usize },
    Help { topic: Option<&'static CommandSpec> },
}

impl<const CAPACITY: usize> CommandOutcome<CAPACITY> {
    /// Telemetry to record for this outcome, if it changed anything.
    pub fn telemetry(&self) -> Option<(TelemetryEventKind, TelemetryPayload)> {
        match self {
            CommandOutcome::Inserted { .. }
            | CommandOutcome::Removed { .. }
            | CommandOutcome::Cleared { .. } => Some((
                TelemetryEventKind::ScheduleChanged,
                TelemetryPayload::none(),
            )),
            CommandOutcome::Saved { entries, .. } => Some((
                TelemetryEventKind::ScheduleSaved,
                TelemetryPayload::schedule(*entries),
            )),
            CommandOutcome::Loaded { entries } => Some((
                TelemetryEventKind::ScheduleLoaded,
                TelemetryPayload::schedule(*entries),
            )),
            _ => None,
        }
    }

    /// Writes the operator-facing response, ending every line with `newline`.
    pub fn render<W: fmt::Write>(
        &self,
        config: &EngineConfig,
        newline: &str,
        writer: &mut W,
    ) -> fmt::Result {
        match self {
            CommandOutcome::Table(list) => {
                let table = DelayTableFormatter::new(list.entries(), config.clock());
                table.write_header(writer)?;
                writer.write_str(newline)?;
                for index in 0..table.row_count() {
                    table.write_row(writer, index)?;
                    writer.write_str(newline)?;
                }
                Ok(())
            }
            CommandOutcome::Inserted { index, entry } | CommandOutcome::Removed { index, entry } => {
                let verb = if matches!(self, CommandOutcome::Inserted { .. }) {
                    "inserted"
                } else {
                    "removed"
                };
                let entries = [*entry];
                let table = DelayTableFormatter::new(&entries, config.clock());
                write!(writer, "{verb} ")?;
                table.write_row(writer, 0)?;
                if *index != 0 {
                    write!(writer, " at position {}", index + 1)?;
                }
                writer.write_str(newline)
            }
            CommandOutcome::Cleared { removed } => {
                write!(writer, "removed {removed} entries{newline}")
            }
            CommandOutcome::Saved { bytes, entries } => {
                write!(writer, "saved {entries} entries ({bytes} bytes){newline}")
            }
            CommandOutcome::Loaded { entries } => {
                write!(writer, "loaded {entries} entries{newline}")
            }
            CommandOutcome::Status { status, entries } => {
                let formatter = StatusFormatter::new(status, config, *entries, CAPACITY);
                formatter.write_trigger_line(writer)?;
                writer.write_str(newline)?;
                formatter.write_table_line(writer)?;
                writer.write_str(newline)?;
                formatter.write_clock_line(writer)?;
                writer.write_str(newline)
            }
            CommandOutcome::Help { topic: Some(spec) } => {
                write!(writer, "{}: {}{newline}", spec.usage, spec.summary)
            }
            CommandOutcome::Help { topic: None } => {
                for spec in catalog::commands() {
                    write!(writer, "{:<28} {}{newline}", spec.usage, spec.summary)?;
                }
                Ok(())
            }
        }
    }
}

/// Errors surfaced while executing a command.
#[derive(Clone, Debug, PartialEq)]
pub enum CommandError<'a, E> {
    Parse(grammar::ParseError<'a>),
    Schedule(ScheduleError),
    Engine(EngineError),
    Persist(PersistError<E>),
    UnknownHelpTopic(&'a str),
}

impl<'a, E> From<grammar::ParseError<'a>> for CommandError<'a, E> {
    fn from(error: grammar::ParseError<'a>) -> Self {
        Self::Parse(error)
    }
}

impl<'a, E> From<ScheduleError> for CommandError<'a, E> {
    fn from(error: ScheduleError) -> Self {
        Self::Schedule(error)
    }
}

impl<'a, E> From<EngineError> for CommandError<'a, E> {
    fn from(error: EngineError) -> Self {
        Self::Engine(error)
    }
}

impl<'a, E> From<PersistError<E>> for CommandError<'a, E> {
    fn from(error: PersistError<E>) -> Self {
        Self::Persist(error)
    }
}

impl<'a, E: fmt::Debug> fmt::Display for CommandError<'a, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandError::Parse(err) => err.fmt(f),
            CommandError::Schedule(err) => err.fmt(f),
            CommandError::Engine(err) => err.fmt(f),
            CommandError::Persist(err) => err.fmt(f),
            CommandError::UnknownHelpTopic(topic) => write!(f, "no help for `{topic}`"),
        }
    }
}

type CommandResult<'a, E, const CAPACITY: usize> =
    Result<CommandOutcome<CAPACITY>, CommandError<'a, E>>;

/// Dispatches console commands onto the schedule and the store.
pub struct CommandExecutor<G, P, const CAPACITY: usize = SCHEDULE_CAPACITY> {
    gateway: G,
    store: P,
    config: EngineConfig,
}

impl<G, P, const CAPACITY: usize> CommandExecutor<G, P, CAPACITY> {
    pub const fn new(gateway: G, store: P, config: EngineConfig) -> Self {
        Self {
            gateway,
            store,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    pub fn store_mut(&mut self) -> &mut P {
        &mut self.store
    }

    /// Consumes the executor and yields the gateway and store.
    pub fn into_inner(self) -> (G, P) {
        (self.gateway, self.store)
    }
}

impl<G, P, const CAPACITY: usize> CommandExecutor<G, P, CAPACITY>
where
    G: ScheduleGateway<CAPACITY>,
    P: NonVolatileStore,
{
    /// Parses and executes a console line.
    pub fn execute<'a>(&mut self, line: &'a str) -> CommandResult<'a, P::Error, CAPACITY> {
        let command = grammar::parse(line)?;
        self.dispatch(command)
    }

    /// Executes an already parsed command.
    pub fn dispatch<'a>(&mut self, command: Command<'a>) -> CommandResult<'a, P::Error, CAPACITY> {
        match command {
            Command::List => Ok(CommandOutcome::Table(self.gateway.schedule())),
            Command::Insert(insert) => self.handle_insert(insert),
            Command::Remove(target) => self.handle_remove(target),
            Command::Save => {
                let list = self.gateway.schedule();
                let bytes = persist::save_schedule(&mut self.store, &list)?;
                Ok(CommandOutcome::Saved {
                    bytes,
                    entries: list.len(),
                })
            }
            Command::Load => {
                let list: DelayList<CAPACITY> =
                    persist::load_schedule(&mut self.store, self.config.min_spacing())?;
                let entries = list.len();
                self.gateway
                    .modify_schedule(move |current| *current = list)?;
                Ok(CommandOutcome::Loaded { entries })
            }
            Command::Status => Ok(CommandOutcome::Status {
                status: self.gateway.status(),
                entries: self.gateway.schedule().len(),
            }),
            Command::Help(help) => match help.topic {
                None => Ok(CommandOutcome::Help { topic: None }),
                Some(topic) => catalog::find(topic)
                    .map(|spec| CommandOutcome::Help { topic: Some(spec) })
                    .ok_or(CommandError::UnknownHelpTopic(topic)),
            },
        }
    }

    fn handle_insert<'a>(&mut self, insert: InsertCommand) -> CommandResult<'a, P::Error, CAPACITY> {
        let config = self.config;
        let (index, entry) = self.gateway.modify_schedule(|list| {
            let index = list.insert(insert.micros, insert.pattern, &config)?;
            Ok::<_, ScheduleError>((index, list.entries()[index]))
        })??;
        Ok(CommandOutcome::Inserted { index, entry })
    }

    fn handle_remove<'a>(&mut self, target: RemoveTarget) -> CommandResult<'a, P::Error, CAPACITY> {
        match target {
            RemoveTarget::All => {
                let removed = self.gateway.modify_schedule(|list| {
                    let removed = list.len();
                    list.clear();
                    removed
                })?;
                Ok(CommandOutcome::Cleared { removed })
            }
            RemoveTarget::Entry(index) => {
                let entry = self
                    .gateway
                    .modify_schedule(|list| list.remove_at(index))??;
                Ok(CommandOutcome::Removed { index, entry })
            }
        }
    }
}
