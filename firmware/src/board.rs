//! Register-level drivers for the delay engine.
//!
//! The sequencer interrupts need single register writes, so the engine's
//! hardware traits are implemented straight on the PAC rather than through the
//! async HAL drivers. Pin modes (pull-up on the trigger, push-pull outputs) are
//! still configured through `embassy_stm32::gpio` in the runtime.
//!
//! Wiring on the reference board:
//! * TIM3 channel 1 compare: sequencer timer, `TIM3_TIM4` interrupt.
//! * PB2 / EXTI line 2 rising edge: trigger input, `EXTI2_3` interrupt.
//! * PB3..PB7: channel outputs 1..5, written together through `GPIOB.BSRR`.

use delay_core::clock::Ticks;
use delay_core::config::DEFAULT_ENGINE_CONFIG;
use delay_core::engine::{ChannelOutputs, CompareTimer, TriggerInput};
use delay_core::schedule::{CHANNEL_MASK, OutputPattern, TRIGGER_IDLE_BIT};
use embassy_stm32::pac;

/// Timer kernel clock with the PLL configuration set up in the runtime.
pub const TIMER_KERNEL_KHZ: u32 = 64_000;

/// EXTI line wired to the trigger input.
pub const TRIGGER_LINE: usize = 2;

const TRIGGER_PORT_B: u8 = 1;
const COMPARE_CHANNEL: usize = 0;
const DRIVEN_PINS: u32 = (CHANNEL_MASK | TRIGGER_IDLE_BIT) as u32;

const fn timer_prescaler() -> u16 {
    let divider = TIMER_KERNEL_KHZ / DEFAULT_ENGINE_CONFIG.clock().clock_khz();
    (divider - 1) as u16
}

/// Handle to the timer, EXTI line and output port used by the engine.
///
/// The handle is zero-sized; interrupt handlers and the foreground each create
/// one. Exclusive register access is provided by the engine's critical
/// sections and by the interrupts never nesting.
pub struct DelayBoard {
    _private: (),
}

impl DelayBoard {
    /// Enables clocks and configures TIM3 and EXTI line 2. Interrupts stay
    /// masked in the NVIC until the runtime unmasks them.
    pub fn init() -> Self {
        pac::RCC.apbenr1().modify(|w| w.set_tim3en(true));

        let tim = pac::TIM3;
        tim.cr1().modify(|w| w.set_cen(false));
        tim.psc().write_value(timer_prescaler());
        tim.arr().write(|w| w.set_arr(Ticks::MAX));
        // Update events from UG reload the counters without raising UIF.
        tim.cr1()
            .modify(|w| w.set_urs(pac::timer::vals::Urs::COUNTER_ONLY));
        // Load the prescaler now so the first cycle already runs at the tick rate.
        tim.egr().write(|w| w.set_ug(true));
        tim.sr().write_value(pac::timer::regs::SrGp16(0));
        tim.dier().modify(|w| w.set_ccie(COMPARE_CHANNEL, true));

        let exti = pac::EXTI;
        exti.exticr(TRIGGER_LINE / 4)
            .modify(|w| w.set_exti(TRIGGER_LINE % 4, TRIGGER_PORT_B));
        exti.rtsr(0).modify(|w| w.set_line(TRIGGER_LINE, true));
        exti.ftsr(0).modify(|w| w.set_line(TRIGGER_LINE, false));
        exti.imr(0).modify(|w| w.set_line(TRIGGER_LINE, false));

        let mut board = Self { _private: () };
        board.write(OutputPattern::ALL_LOW);
        board
    }

    /// Handle for use inside interrupt handlers after [`DelayBoard::init`].
    pub const fn handle() -> Self {
        Self { _private: () }
    }

    /// Clears the compare-match flag; called first in the timer interrupt.
    pub fn acknowledge_compare(&mut self) {
        pac::TIM3
            .sr()
            .modify(|w| w.set_ccif(COMPARE_CHANNEL, false));
    }
}

impl CompareTimer for DelayBoard {
    fn stop(&mut self) {
        pac::TIM3.cr1().modify(|w| w.set_cen(false));
    }

    fn start(&mut self) {
        pac::TIM3.cr1().modify(|w| w.set_cen(true));
    }

    /// Clears both the counter and the prescaler counter so the first tick
    /// after `start` is a full tick long.
    fn reset_counter(&mut self) {
        let tim = pac::TIM3;
        tim.egr().write(|w| w.set_ug(true));
        tim.sr().modify(|w| w.set_ccif(COMPARE_CHANNEL, false));
    }

    fn set_compare(&mut self, ticks: Ticks) {
        pac::TIM3
            .ccr(COMPARE_CHANNEL)
            .write(|w| w.set_ccr(ticks));
    }
}

impl ChannelOutputs for DelayBoard {
    fn write(&mut self, pattern: OutputPattern) {
        let set = u32::from(pattern.port_value()) & DRIVEN_PINS;
        let reset = !set & DRIVEN_PINS;
        pac::GPIOB
            .bsrr()
            .write_value(pac::gpio::regs::Bsrr(set | (reset << 16)));
    }
}

impl TriggerInput for DelayBoard {
    fn enable_edge(&mut self) {
        pac::EXTI.imr(0).modify(|w| w.set_line(TRIGGER_LINE, true));
    }

    fn disable_edge(&mut self) {
        pac::EXTI.imr(0).modify(|w| w.set_line(TRIGGER_LINE, false));
    }

    fn clear_pending(&mut self) {
        pac::EXTI.rpr(0).write(|w| w.set_line(TRIGGER_LINE, true));
    }
}
