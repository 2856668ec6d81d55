//! Tick-accurate stand-in for the board timer, trigger line and output port.
//!
//! Host tooling and tests drive [`SimulatedHardware::step`] once per timer
//! tick. Each port write is captured in a bounded trace together with the
//! counter value it happened on.

use heapless::Vec;

use super::{ChannelOutputs, CompareTimer, DelayEngine, EngineError, TriggerInput};
use crate::clock::Ticks;
use crate::schedule::OutputPattern;

/// Default number of port writes retained per run.
pub const TRACE_CAPACITY: usize = 32;

/// One captured port write.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TraceEvent {
    pub tick: Ticks,
    pub pattern: OutputPattern,
}

/// Simulated compare timer, EXTI line and GPIO port.
#[derive(Clone, Debug, Default)]
pub struct SimulatedHardware<const TRACE: usize = TRACE_CAPACITY> {
    counter: Ticks,
    compare: Option<Ticks>,
    running: bool,
    edge_enabled: bool,
    pending_edge: bool,
    outputs: OutputPattern,
    trace: Vec<TraceEvent, TRACE>,
    trace_overflowed: bool,
}

impl<const TRACE: usize> SimulatedHardware<TRACE> {
    pub fn new() -> Self {
        Self {
            counter: 0,
            compare: None,
            running: false,
            edge_enabled: false,
            pending_edge: false,
            outputs: OutputPattern::ALL_LOW,
            trace: Vec::new(),
            trace_overflowed: false,
        }
    }

    /// Latches a trigger edge; it is delivered on the next step if enabled.
    pub fn raise_edge(&mut self) {
        self.pending_edge = true;
    }

    /// Advances the simulation by one timer tick.
    pub fn step<const CAPACITY: usize>(&mut self, engine: &DelayEngine<CAPACITY>) {
        if self.edge_enabled && self.pending_edge {
            self.pending_edge = false;
            engine.on_trigger_edge(self);
        }

        if !self.running {
            return;
        }

        if self.compare == Some(self.counter) {
            engine.on_compare_match(self);
        }
        self.counter = self.counter.wrapping_add(1);
    }

    /// Arms the engine, delivers one edge and steps until the cycle completes.
    pub fn run_triggered_cycle<const CAPACITY: usize>(
        &mut self,
        engine: &DelayEngine<CAPACITY>,
    ) -> Result<(), EngineError> {
        let mut triggered = false;
        engine.run_cycle(self, |engine, hw| {
            if !triggered {
                hw.raise_edge();
                triggered = true;
            }
            hw.step(engine);
        })
    }

    /// Port writes captured since the last [`SimulatedHardware::clear_trace`].
    pub fn trace(&self) -> &[TraceEvent] {
        self.trace.as_slice()
    }

    /// Returns `true` if writes were dropped because the trace was full.
    pub fn trace_overflowed(&self) -> bool {
        self.trace_overflowed
    }

    pub fn clear_trace(&mut self) {
        self.trace.clear();
        self.trace_overflowed = false;
    }

    /// Current level of the output port.
    pub fn outputs(&self) -> OutputPattern {
        self.outputs
    }

    pub fn counter(&self) -> Ticks {
        self.counter
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn is_edge_enabled(&self) -> bool {
        self.edge_enabled
    }
}

impl<const TRACE: usize> CompareTimer for SimulatedHardware<TRACE> {
    fn stop(&mut self) {
        self.running = false;
    }

    fn start(&mut self) {
        self.running = true;
    }

    fn reset_counter(&mut self) {
        self.counter = 0;
    }

    fn set_compare(&mut self, ticks: Ticks) {
        self.compare = Some(ticks);
    }
}

impl<const TRACE: usize> ChannelOutputs for SimulatedHardware<TRACE> {
    fn write(&mut self, pattern: OutputPattern) {
        self.outputs = pattern;
        let event = TraceEvent {
            tick: self.counter,
            pattern,
        };
        if self.trace.push(event).is_err() {
            self.trace_overflowed = true;
        }
    }
}

impl<const TRACE: usize> TriggerInput for SimulatedHardware<TRACE> {
    fn enable_edge(&mut self) {
        self.edge_enabled = true;
    }

    fn disable_edge(&mut self) {
        self.edge_enabled = false;
    }

    fn clear_pending(&mut self) {
        self.pending_edge = false;
    }
}
