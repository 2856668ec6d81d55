#![no_std]

#[cfg(feature = "alloc")]
extern crate alloc;

// Timed-sequence engine for the trigger delay generator.
//
// This crate stays portable across MCU firmware and host tooling by avoiding the
// Rust standard library and keeping every hardware touch point behind the
// capability traits in `engine`.

pub mod clock;
pub mod config;
pub mod engine;
pub mod persist;
pub mod repl;
pub mod schedule;
pub mod telemetry;
