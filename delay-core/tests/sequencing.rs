use delay_core::engine::sim::{SimulatedHardware, TraceEvent};
use delay_core::engine::{ArmState, DelayEngine, EdgeResponse};
use delay_core::schedule::{DelayList, EXAMPLE_SCHEDULE, OutputPattern};

fn example_engine() -> DelayEngine {
    let engine = DelayEngine::new();
    let list = DelayList::from_entries(&EXAMPLE_SCHEDULE, 10).expect("example schedule");
    engine.replace_schedule(list).expect("idle engine");
    engine
}

fn expected_trace() -> [TraceEvent; 4] {
    [
        TraceEvent {
            tick: 13,
            pattern: OutputPattern::from_bits(0b1111_1000),
        },
        TraceEvent {
            tick: 75,
            pattern: OutputPattern::from_bits(0),
        },
        TraceEvent {
            tick: 149,
            pattern: OutputPattern::from_bits(0b1111_1000),
        },
        TraceEvent {
            tick: 228,
            pattern: OutputPattern::from_bits(0),
        },
    ]
}

#[test]
fn example_schedule_fires_on_every_tick() {
    let engine = example_engine();
    let mut hw = SimulatedHardware::<16>::new();

    hw.run_triggered_cycle(&engine).expect("cycle");

    assert_eq!(hw.trace(), &expected_trace());
    assert!(!hw.is_running());
    assert_eq!(engine.state(), ArmState::Idle);
    assert_eq!(engine.status().cursor, 4);
    assert_eq!(engine.status().completed_cycles, 1);
}

#[test]
fn nothing_changes_after_last_entry() {
    let engine = example_engine();
    let mut hw = SimulatedHardware::<16>::new();
    hw.run_triggered_cycle(&engine).expect("cycle");

    for _ in 0..1_000 {
        hw.step(&engine);
    }

    assert_eq!(hw.trace().len(), 4);
    assert_eq!(hw.outputs(), OutputPattern::ALL_LOW);
}

#[test]
fn edges_during_a_cycle_do_not_retrigger() {
    let engine = example_engine();
    let mut hw = SimulatedHardware::<16>::new();
    engine.arm(&mut hw).expect("arm");

    hw.raise_edge();
    hw.step(&engine);
    assert_eq!(engine.state(), ArmState::Running);

    while !engine.finish_cycle(&mut hw) {
        hw.raise_edge();
        hw.step(&engine);
    }
    assert_eq!(hw.trace(), &expected_trace());

    // The edge latched during the run is dropped when re-arming.
    engine.arm(&mut hw).expect("re-arm");
    for _ in 0..300 {
        hw.step(&engine);
    }
    assert_eq!(engine.state(), ArmState::Armed);
    assert_eq!(hw.trace().len(), 4);
}

#[test]
fn back_to_back_cycles_repeat_the_trace() {
    let engine = example_engine();
    let mut hw = SimulatedHardware::<16>::new();

    for cycle in 1..=3 {
        hw.clear_trace();
        hw.run_triggered_cycle(&engine).expect("cycle");
        assert_eq!(hw.trace(), &expected_trace());
        assert_eq!(engine.status().completed_cycles, cycle);
    }
}

#[test]
fn empty_schedule_completes_immediately() {
    let engine = DelayEngine::<10>::new();
    let mut hw = SimulatedHardware::<4>::new();
    engine.arm(&mut hw).expect("arm");

    assert_eq!(engine.on_trigger_edge(&mut hw), EdgeResponse::Completed);
    assert!(engine.is_cycle_complete());
    assert!(engine.finish_cycle(&mut hw));
    assert!(hw.trace().is_empty());
}

#[test]
fn schedule_edits_apply_to_next_cycle() {
    let engine = example_engine();
    let mut hw = SimulatedHardware::<16>::new();
    hw.run_triggered_cycle(&engine).expect("first cycle");

    engine
        .edit_schedule(|list| list.remove_at(3))
        .expect("idle")
        .expect("entry D");
    hw.clear_trace();
    hw.run_triggered_cycle(&engine).expect("second cycle");

    assert_eq!(hw.trace(), &expected_trace()[..3]);
}
