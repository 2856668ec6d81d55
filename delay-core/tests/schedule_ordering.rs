use delay_core::clock::{TickClock, Ticks};
use delay_core::config::EngineConfig;
use delay_core::schedule::{DelayList, OutputPattern, ScheduleError, TimingViolation};

const SPACING: Ticks = 10;

/// Small deterministic generator so runs are reproducible.
struct Lcg(u32);

impl Lcg {
    fn next(&mut self) -> u32 {
        self.0 = self.0.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
        self.0 >> 8
    }
}

fn assert_well_formed(list: &DelayList) {
    let mut previous = 0;
    for entry in list.entries() {
        assert!(
            entry.ticks - previous > SPACING,
            "tick {} follows {previous}",
            entry.ticks
        );
        previous = entry.ticks;
    }
}

#[test]
fn random_edits_keep_list_sorted_and_spaced() {
    let mut rng = Lcg(0x5eed);
    let mut list = DelayList::new();

    for _ in 0..2_000 {
        if rng.next() % 3 == 0 && !list.is_empty() {
            let index = rng.next() as usize % list.len();
            list.remove_at(index).expect("index in range");
        } else {
            let ticks = (rng.next() % 400) as Ticks;
            let before = list.clone();
            match list.insert_entry(ticks, None, SPACING) {
                Ok(index) => assert_eq!(list.entries()[index].ticks, ticks),
                Err(_) => assert_eq!(list, before),
            }
        }
        assert_well_formed(&list);
    }
}

#[test]
fn insert_position_is_first_entry_not_earlier() {
    let mut list = DelayList::<10>::new();
    for ticks in [100, 20, 60, 200, 140] {
        list.insert_entry(ticks, None, SPACING).expect("insert");
    }
    let order: Vec<Ticks> = list.entries().iter().map(|entry| entry.ticks).collect();
    assert_eq!(order, [20, 60, 100, 140, 200]);
}

#[test]
fn omitted_pattern_alternates_along_the_list() {
    let mut list = DelayList::<10>::new();
    list.insert_entry(20, Some(OutputPattern::from_channels(0b1_0001)), SPACING)
        .expect("first");
    list.insert_entry(40, None, SPACING).expect("second");
    list.insert_entry(60, None, SPACING).expect("third");

    let patterns: Vec<u8> = list
        .entries()
        .iter()
        .map(|entry| entry.pattern.channels())
        .collect();
    assert_eq!(patterns, [0b1_0001, 0b0_1110, 0b1_0001]);
}

#[test]
fn capacity_boundary() {
    let config = EngineConfig::default();
    let clock = TickClock::default();
    let mut list = DelayList::<10>::new();
    for step in 0..10u16 {
        let micros = clock.ticks_to_micros(20 + step * 20);
        list.insert(micros, None, &config).expect("insert");
    }
    assert!(list.is_full());
    assert_eq!(
        list.insert(clock.ticks_to_micros(1_000), None, &config),
        Err(ScheduleError::ListFull { capacity: 10 })
    );

    for _ in 0..10 {
        list.remove_at(0).expect("remove");
    }
    assert!(list.is_empty());
    assert_eq!(
        list.remove_at(0),
        Err(ScheduleError::IndexOutOfRange { index: 0, count: 0 })
    );
}

#[test]
fn delays_past_epoch_are_rejected() {
    let config = EngineConfig::default();
    let mut list = DelayList::<10>::new();
    let too_late = config.clock().epoch_micros() + 10.0;
    assert!(matches!(
        list.insert(too_late, None, &config),
        Err(ScheduleError::Timing(TimingViolation::Unrepresentable(_)))
    ));
    assert!(list.is_empty());
}
