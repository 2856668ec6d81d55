//! Trigger arbiter and compare-match sequencer.
//!
//! [`DelayEngine`] owns the schedule and the small amount of state shared
//! between the foreground loop and the two interrupt handlers. The foreground
//! arms the engine, the edge handler starts the compare timer, and the compare
//! handler walks the schedule one entry per match. The foreground re-arms only
//! once every entry has fired; edges arriving in between are ignored.
//!
//! Arming copies the schedule into flat tick and pattern arrays. The compare
//! handler reads only those arrays and the cursor, never the list itself.
//!
//! Hardware is reached through three narrow capability traits so the same
//! engine drives the STM32 board support and [`sim::SimulatedHardware`].

use core::cell::RefCell;
use core::fmt;

use critical_section::Mutex;
use portable_atomic::{AtomicU8, AtomicU16, AtomicU32, AtomicUsize, Ordering};

use crate::clock::Ticks;
use crate::schedule::{DelayList, OutputPattern, SCHEDULE_CAPACITY};

pub mod sim;

/// Free-running compare timer that starts counting from the trigger.
pub trait CompareTimer {
    /// Halts the counter without resetting it.
    fn stop(&mut self);
    /// Starts counting from the current counter value.
    fn start(&mut self);
    /// Resets the counter to tick 0.
    fn reset_counter(&mut self);
    /// Programs the next compare-match tick.
    fn set_compare(&mut self, ticks: Ticks);
}

/// Port driving the controlled output lines.
pub trait ChannelOutputs {
    /// Writes every controlled line at once.
    fn write(&mut self, pattern: OutputPattern);
}

/// Edge-triggered interrupt line connected to the trigger input.
pub trait TriggerInput {
    fn enable_edge(&mut self);
    fn disable_edge(&mut self);
    /// Drops an edge latched while detection was disabled.
    fn clear_pending(&mut self);
}

/// Everything the foreground needs to arm and finish a cycle.
pub trait DelayHardware: CompareTimer + ChannelOutputs + TriggerInput {}

impl<T> DelayHardware for T where T: CompareTimer + ChannelOutputs + TriggerInput {}

/// Arbiter state shared between the foreground and both interrupt handlers.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ArmState {
    /// Edge detection off, timer stopped; the schedule may be edited.
    Idle,
    /// Waiting for a trigger edge.
    Armed,
    /// Timer running; the compare handler is walking the schedule.
    Running,
}

impl ArmState {
    const IDLE: u8 = 0;
    const ARMED: u8 = 1;
    const RUNNING: u8 = 2;

    const fn to_raw(self) -> u8 {
        match self {
            ArmState::Idle => Self::IDLE,
            ArmState::Armed => Self::ARMED,
            ArmState::Running => Self::RUNNING,
        }
    }

    const fn from_raw(raw: u8) -> Self {
        match raw {
            Self::ARMED => ArmState::Armed,
            Self::RUNNING => ArmState::Running,
            _ => ArmState::Idle,
        }
    }
}

impl fmt::Display for ArmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ArmState::Idle => "idle",
            ArmState::Armed => "armed",
            ArmState::Running => "running",
        })
    }
}

/// Result of servicing a trigger edge.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum EdgeResponse {
    /// Engine was not armed; the edge had no effect.
    Ignored,
    /// Timer started; compare matches will follow.
    Started,
    /// Schedule is empty, so the cycle finished on the edge itself.
    Completed,
}

/// Result of servicing a compare match.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SequencerStep {
    /// Entry applied and the next compare programmed.
    Fired,
    /// Last entry applied; the cycle is complete.
    Finished,
    /// Match arrived past the last armed entry.
    Spurious,
}

/// Errors reported by foreground engine operations.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum EngineError {
    /// Operation needs a different arbiter state.
    Busy(ArmState),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::Busy(state) => write!(f, "engine busy ({state})"),
        }
    }
}

/// Point-in-time view of the arbiter.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct EngineStatus {
    pub state: ArmState,
    pub cursor: usize,
    pub count: usize,
    pub completed_cycles: u32,
}

/// Owned trigger arbiter and sequencer.
pub struct DelayEngine<const CAPACITY: usize = SCHEDULE_CAPACITY> {
    schedule: Mutex<RefCell<DelayList<CAPACITY>>>,
    armed_ticks: [AtomicU16; CAPACITY],
    armed_patterns: [AtomicU8; CAPACITY],
    state: AtomicU8,
    cursor: AtomicUsize,
    count: AtomicUsize,
    completed_cycles: AtomicU32,
}

impl<const CAPACITY: usize> DelayEngine<CAPACITY> {
    /// Creates an idle engine with an empty schedule.
    pub const fn new() -> Self {
        Self {
            schedule: Mutex::new(RefCell::new(DelayList::new())),
            armed_ticks: [const { AtomicU16::new(0) }; CAPACITY],
            armed_patterns: [const { AtomicU8::new(0) }; CAPACITY],
            state: AtomicU8::new(ArmState::IDLE),
            cursor: AtomicUsize::new(0),
            count: AtomicUsize::new(0),
            completed_cycles: AtomicU32::new(0),
        }
    }

    /// Current arbiter state.
    pub fn state(&self) -> ArmState {
        ArmState::from_raw(self.state.load(Ordering::Acquire))
    }

    /// Snapshot of the arbiter for status reporting.
    pub fn status(&self) -> EngineStatus {
        EngineStatus {
            state: self.state(),
            cursor: self.cursor.load(Ordering::Acquire),
            count: self.count.load(Ordering::Acquire),
            completed_cycles: self.completed_cycles.load(Ordering::Relaxed),
        }
    }

    /// Returns `true` once a running cycle has applied every entry.
    pub fn is_cycle_complete(&self) -> bool {
        self.state() == ArmState::Running
            && self.cursor.load(Ordering::Acquire) >= self.count.load(Ordering::Acquire)
    }

    /// Prepares the hardware for the next trigger and enables edge detection.
    pub fn arm<H>(&self, hw: &mut H) -> Result<(), EngineError>
    where
        H: CompareTimer + TriggerInput,
    {
        critical_section::with(|cs| {
            let state = self.state();
            if state == ArmState::Running {
                return Err(EngineError::Busy(state));
            }

            let schedule = self.schedule.borrow_ref(cs);
            hw.stop();
            hw.reset_counter();
            for ((ticks, pattern), entry) in self
                .armed_ticks
                .iter()
                .zip(&self.armed_patterns)
                .zip(schedule.entries())
            {
                ticks.store(entry.ticks, Ordering::Relaxed);
                pattern.store(entry.pattern.bits(), Ordering::Relaxed);
            }
            self.cursor.store(0, Ordering::Release);
            self.count.store(schedule.len(), Ordering::Release);
            if let Some(first) = schedule.get(0) {
                hw.set_compare(first.ticks);
            }
            hw.clear_pending();
            self.set_state(ArmState::Armed);
            hw.enable_edge();
            Ok(())
        })
    }

    /// Returns an armed engine to idle so the schedule can be edited.
    pub fn disarm<H>(&self, hw: &mut H) -> Result<(), EngineError>
    where
        H: TriggerInput,
    {
        critical_section::with(|_| match self.state() {
            ArmState::Running => Err(EngineError::Busy(ArmState::Running)),
            ArmState::Armed => {
                hw.disable_edge();
                hw.clear_pending();
                self.set_state(ArmState::Idle);
                Ok(())
            }
            ArmState::Idle => Ok(()),
        })
    }

    /// Edge interrupt body.
    pub fn on_trigger_edge<H>(&self, hw: &mut H) -> EdgeResponse
    where
        H: CompareTimer + TriggerInput,
    {
        if self.state() != ArmState::Armed {
            return EdgeResponse::Ignored;
        }

        hw.disable_edge();
        self.set_state(ArmState::Running);
        if self.count.load(Ordering::Acquire) == 0 {
            return EdgeResponse::Completed;
        }
        hw.start();
        EdgeResponse::Started
    }

    /// Compare-match interrupt body.
    ///
    /// Writes the armed pattern at the cursor and programs the following
    /// tick. The timer only runs between an edge and [`Self::finish_cycle`],
    /// so the cursor bound is the only check.
    pub fn on_compare_match<H>(&self, hw: &mut H) -> SequencerStep
    where
        H: CompareTimer + ChannelOutputs,
    {
        let cursor = self.cursor.load(Ordering::Acquire);
        let count = self.count.load(Ordering::Acquire);
        if cursor >= count {
            return SequencerStep::Spurious;
        }

        hw.write(OutputPattern::from_bits(
            self.armed_patterns[cursor].load(Ordering::Relaxed),
        ));
        let next = cursor + 1;
        self.cursor.store(next, Ordering::Release);

        if next < count {
            hw.set_compare(self.armed_ticks[next].load(Ordering::Relaxed));
            SequencerStep::Fired
        } else {
            SequencerStep::Finished
        }
    }

    /// Stops the timer after a completed cycle and returns to idle.
    ///
    /// Returns `false` while the cycle is still in flight or the engine was
    /// never triggered.
    pub fn finish_cycle<H>(&self, hw: &mut H) -> bool
    where
        H: CompareTimer,
    {
        if !self.is_cycle_complete() {
            return false;
        }

        hw.stop();
        self.set_state(ArmState::Idle);
        self.completed_cycles.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Arms, then spins on `idle` until the cycle completes.
    ///
    /// `idle` is called between completion checks; host targets use it to
    /// advance simulated time.
    pub fn run_cycle<H, F>(&self, hw: &mut H, mut idle: F) -> Result<(), EngineError>
    where
        H: DelayHardware,
        F: FnMut(&Self, &mut H),
    {
        self.arm(hw)?;
        while !self.finish_cycle(hw) {
            idle(self, hw);
        }
        Ok(())
    }

    /// Runs `edit` against the schedule while no cycle is armed or in flight.
    pub fn edit_schedule<R>(
        &self,
        edit: impl FnOnce(&mut DelayList<CAPACITY>) -> R,
    ) -> Result<R, EngineError> {
        critical_section::with(|cs| {
            let state = self.state();
            if state != ArmState::Idle {
                return Err(EngineError::Busy(state));
            }
            let mut schedule = self.schedule.borrow_ref_mut(cs);
            Ok(edit(&mut schedule))
        })
    }

    /// Swaps in a complete schedule.
    pub fn replace_schedule(&self, schedule: DelayList<CAPACITY>) -> Result<(), EngineError> {
        self.edit_schedule(|current| *current = schedule)
    }

    /// Copies the current schedule.
    pub fn schedule_snapshot(&self) -> DelayList<CAPACITY> {
        critical_section::with(|cs| self.schedule.borrow_ref(cs).clone())
    }

    fn set_state(&self, state: ArmState) {
        self.state.store(state.to_raw(), Ordering::Release);
    }
}

impl<const CAPACITY: usize> Default for DelayEngine<CAPACITY> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::DelayEntry;
    use heapless::Vec as HeaplessVec;

    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    enum HwCall {
        Stop,
        Start,
        Reset,
        Compare(Ticks),
        Write(u8),
        EdgeOn,
        EdgeOff,
        ClearPending,
    }

    #[derive(Default)]
    struct RecordingHardware {
        calls: HeaplessVec<HwCall, 32>,
    }

    impl RecordingHardware {
        fn push(&mut self, call: HwCall) {
            self.calls.push(call).expect("call log full");
        }
    }

    impl CompareTimer for RecordingHardware {
        fn stop(&mut self) {
            self.push(HwCall::Stop);
        }

        fn start(&mut self) {
            self.push(HwCall::Start);
        }

        fn reset_counter(&mut self) {
            self.push(HwCall::Reset);
        }

        fn set_compare(&mut self, ticks: Ticks) {
            self.push(HwCall::Compare(ticks));
        }
    }

    impl ChannelOutputs for RecordingHardware {
        fn write(&mut self, pattern: OutputPattern) {
            self.push(HwCall::Write(pattern.bits()));
        }
    }

    impl TriggerInput for RecordingHardware {
        fn enable_edge(&mut self) {
            self.push(HwCall::EdgeOn);
        }

        fn disable_edge(&mut self) {
            self.push(HwCall::EdgeOff);
        }

        fn clear_pending(&mut self) {
            self.push(HwCall::ClearPending);
        }
    }

    fn engine_with(entries: &[DelayEntry]) -> DelayEngine {
        let engine = DelayEngine::new();
        let list = DelayList::from_entries(entries, 10).expect("valid schedule");
        engine.replace_schedule(list).expect("idle engine");
        engine
    }

    #[test]
    fn arm_programs_first_entry_before_enabling_edge() {
        let engine = engine_with(&[
            DelayEntry::new(20, OutputPattern::ALL_HIGH),
            DelayEntry::new(40, OutputPattern::ALL_LOW),
        ]);
        let mut hw = RecordingHardware::default();

        engine.arm(&mut hw).expect("arm");

        assert_eq!(
            hw.calls.as_slice(),
            &[
                HwCall::Stop,
                HwCall::Reset,
                HwCall::Compare(20),
                HwCall::ClearPending,
                HwCall::EdgeOn,
            ]
        );
        assert_eq!(engine.state(), ArmState::Armed);
        assert_eq!(engine.status().count, 2);
    }

    #[test]
    fn edge_starts_timer_and_masks_further_edges() {
        let engine = engine_with(&[DelayEntry::new(20, OutputPattern::ALL_HIGH)]);
        let mut hw = RecordingHardware::default();
        engine.arm(&mut hw).expect("arm");
        hw.calls.clear();

        assert_eq!(engine.on_trigger_edge(&mut hw), EdgeResponse::Started);
        assert_eq!(hw.calls.as_slice(), &[HwCall::EdgeOff, HwCall::Start]);
        assert_eq!(engine.state(), ArmState::Running);

        assert_eq!(engine.on_trigger_edge(&mut hw), EdgeResponse::Ignored);
        assert_eq!(hw.calls.len(), 2);
    }

    #[test]
    fn edge_while_idle_is_ignored() {
        let engine = engine_with(&[DelayEntry::new(20, OutputPattern::ALL_HIGH)]);
        let mut hw = RecordingHardware::default();
        assert_eq!(engine.on_trigger_edge(&mut hw), EdgeResponse::Ignored);
        assert!(hw.calls.is_empty());
    }

    #[test]
    fn compare_walks_schedule_and_reprograms() {
        let engine = engine_with(&[
            DelayEntry::new(20, OutputPattern::ALL_HIGH),
            DelayEntry::new(40, OutputPattern::ALL_LOW),
        ]);
        let mut hw = RecordingHardware::default();
        engine.arm(&mut hw).expect("arm");
        engine.on_trigger_edge(&mut hw);
        hw.calls.clear();

        assert_eq!(engine.on_compare_match(&mut hw), SequencerStep::Fired);
        assert_eq!(
            hw.calls.as_slice(),
            &[HwCall::Write(0b1111_1000), HwCall::Compare(40)]
        );

        assert_eq!(engine.on_compare_match(&mut hw), SequencerStep::Finished);
        assert_eq!(hw.calls.last(), Some(&HwCall::Write(0)));
        assert!(engine.is_cycle_complete());

        assert_eq!(engine.on_compare_match(&mut hw), SequencerStep::Spurious);
    }

    #[test]
    fn compare_match_reads_the_armed_copy_only() {
        let engine = engine_with(&[
            DelayEntry::new(20, OutputPattern::ALL_HIGH),
            DelayEntry::new(40, OutputPattern::from_channels(0b0_0110)),
        ]);
        let mut hw = RecordingHardware::default();
        engine.arm(&mut hw).expect("arm");
        engine.on_trigger_edge(&mut hw);
        hw.calls.clear();

        // Holding the list mutably would panic if the handler borrowed it.
        critical_section::with(|cs| {
            let mut list = engine.schedule.borrow_ref_mut(cs);
            list.clear();
            assert_eq!(engine.on_compare_match(&mut hw), SequencerStep::Fired);
            assert_eq!(engine.on_compare_match(&mut hw), SequencerStep::Finished);
        });

        assert_eq!(
            hw.calls.as_slice(),
            &[
                HwCall::Write(0b1111_1000),
                HwCall::Compare(40),
                HwCall::Write(0b0011_0000),
            ]
        );
    }

    #[test]
    fn rearm_refreshes_the_armed_copy() {
        let engine = engine_with(&[
            DelayEntry::new(20, OutputPattern::ALL_HIGH),
            DelayEntry::new(40, OutputPattern::ALL_LOW),
        ]);
        let mut hw = RecordingHardware::default();
        engine.arm(&mut hw).expect("arm");
        engine.disarm(&mut hw).expect("disarm");
        engine
            .replace_schedule(
                DelayList::from_entries(&[DelayEntry::new(30, OutputPattern::ALL_LOW)], 10)
                    .expect("valid schedule"),
            )
            .expect("idle");

        engine.arm(&mut hw).expect("arm");
        engine.on_trigger_edge(&mut hw);
        hw.calls.clear();
        assert_eq!(engine.on_compare_match(&mut hw), SequencerStep::Finished);
        assert_eq!(hw.calls.as_slice(), &[HwCall::Write(0)]);
    }

    #[test]
    fn finish_cycle_stops_timer_and_counts() {
        let engine = engine_with(&[DelayEntry::new(20, OutputPattern::ALL_HIGH)]);
        let mut hw = RecordingHardware::default();
        engine.arm(&mut hw).expect("arm");
        assert!(!engine.finish_cycle(&mut hw));

        engine.on_trigger_edge(&mut hw);
        assert!(!engine.finish_cycle(&mut hw));
        engine.on_compare_match(&mut hw);
        hw.calls.clear();

        assert!(engine.finish_cycle(&mut hw));
        assert_eq!(hw.calls.as_slice(), &[HwCall::Stop]);
        assert_eq!(engine.state(), ArmState::Idle);
        assert_eq!(engine.status().completed_cycles, 1);
    }

    #[test]
    fn empty_schedule_completes_on_edge() {
        let engine = DelayEngine::<SCHEDULE_CAPACITY>::new();
        let mut hw = RecordingHardware::default();
        engine.arm(&mut hw).expect("arm");
        assert!(!hw.calls.contains(&HwCall::Compare(0)));

        assert_eq!(engine.on_trigger_edge(&mut hw), EdgeResponse::Completed);
        assert!(!hw.calls.contains(&HwCall::Start));
        assert!(engine.finish_cycle(&mut hw));
    }

    #[test]
    fn edits_are_refused_outside_idle() {
        let engine = engine_with(&[DelayEntry::new(20, OutputPattern::ALL_HIGH)]);
        let mut hw = RecordingHardware::default();
        engine.arm(&mut hw).expect("arm");

        assert_eq!(
            engine.edit_schedule(|list| list.clear()),
            Err(EngineError::Busy(ArmState::Armed))
        );

        engine.on_trigger_edge(&mut hw);
        assert_eq!(
            engine.disarm(&mut hw),
            Err(EngineError::Busy(ArmState::Running))
        );
        assert_eq!(engine.arm(&mut hw), Err(EngineError::Busy(ArmState::Running)));
        assert_eq!(engine.schedule_snapshot().len(), 1);
    }

    #[test]
    fn disarm_returns_to_idle() {
        let engine = engine_with(&[DelayEntry::new(20, OutputPattern::ALL_HIGH)]);
        let mut hw = RecordingHardware::default();
        engine.arm(&mut hw).expect("arm");
        hw.calls.clear();

        engine.disarm(&mut hw).expect("disarm");
        assert_eq!(hw.calls.as_slice(), &[HwCall::EdgeOff, HwCall::ClearPending]);
        assert_eq!(engine.state(), ArmState::Idle);
        assert_eq!(engine.edit_schedule(|list| list.len()), Ok(1));
    }
}
