//! Operator console shared between firmware and emulator targets.
//!
//! [`grammar`] turns a line into a [`grammar::Command`], [`commands`] applies
//! it to the engine and store, and [`table`]/[`status`] render the results.

pub mod catalog;
pub mod commands;
pub mod grammar;
pub mod status;
pub mod table;

pub use commands::{CommandError, CommandExecutor, CommandOutcome, ScheduleGateway};
