use core::fmt::Write as _;

use cortex_m::interrupt as cm_interrupt;
use cortex_m::register::primask;
use critical_section::{self, RawRestoreState};
use defmt_rtt as _;
use delay_core::config::{DEFAULT_ENGINE_CONFIG, EngineConfig};
use delay_core::engine::{ArmState, DelayEngine, EdgeResponse, SequencerStep, TriggerInput};
use delay_core::persist::{PersistError, ScheduleSource, load_or_default};
use delay_core::repl::{CommandError, CommandExecutor};
use delay_core::schedule::{DelayList, example_schedule};
use delay_core::telemetry::{TelemetryEventKind, TelemetryPayload};
use embassy_executor::Spawner;
use embassy_futures::select::{Either, select};
use embassy_stm32 as hal;
use embassy_stm32::flash::Flash;
use embassy_stm32::gpio::{Input, Level, Output, Pull, Speed};
use embassy_stm32::interrupt;
use embassy_stm32::interrupt::{InterruptExt, Priority};
use embassy_stm32::rcc::{Pll, PllMul, PllPreDiv, PllRDiv, PllSource, Sysclk};
use embassy_stm32::usart::{
    BufferedUart, BufferedUartRx, BufferedUartTx, Config as UartConfig, DataBits, Parity,
    StopBits,
};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use embassy_time::{Duration, Instant, Timer};
use embedded_io_async::{Read, Write};
use heapless::String;
use static_cell::StaticCell;

use crate::board::DelayBoard;
use crate::console::{ConsoleLine, Echo, Ingest, NEWLINE, PROMPT, accepts_input};
use crate::storage::{FlashStore, StoreError};
use crate::telemetry::{FirmwareInstant, FirmwareTelemetry, log_latest};

const CONSOLE_BAUD: u32 = 115_200;
const UART_TX_BUFFER_SIZE: usize = 256;
const UART_RX_BUFFER_SIZE: usize = 64;
const RESPONSE_LEN: usize = 1024;

/// Trigger edge and compare match.
const SEQUENCER_PRIORITY: Priority = Priority::P0;
/// Console UART and the time driver; never delays a sequencer interrupt.
const BACKGROUND_PRIORITY: Priority = Priority::P2;

critical_section::set_impl!(InterruptCriticalSection);

struct InterruptCriticalSection;

unsafe impl critical_section::Impl for InterruptCriticalSection {
    unsafe fn acquire() -> RawRestoreState {
        let primask = primask::read();
        cm_interrupt::disable();
        primask.is_active()
    }

    unsafe fn release(restore_state: RawRestoreState) {
        if restore_state {
            unsafe {
                cm_interrupt::enable();
            }
        }
    }
}

static ENGINE: DelayEngine = DelayEngine::new();
static CYCLE_DONE: Signal<CriticalSectionRawMutex, ()> = Signal::new();

static UART_TX_BUFFER: StaticCell<[u8; UART_TX_BUFFER_SIZE]> = StaticCell::new();
static UART_RX_BUFFER: StaticCell<[u8; UART_RX_BUFFER_SIZE]> = StaticCell::new();

embassy_stm32::bind_interrupts!(struct UartIrqs {
    USART3_4_5_6_LPUART1 => embassy_stm32::usart::BufferedInterruptHandler<hal::peripherals::USART5>;
});

type Executor = CommandExecutor<&'static DelayEngine, FlashStore<'static>>;

#[interrupt]
fn TIM3_TIM4() {
    let mut board = DelayBoard::handle();
    board.acknowledge_compare();
    if ENGINE.on_compare_match(&mut board) == SequencerStep::Finished {
        CYCLE_DONE.signal(());
    }
}

#[interrupt]
fn EXTI2_3() {
    let mut board = DelayBoard::handle();
    board.clear_pending();
    if ENGINE.on_trigger_edge(&mut board) == EdgeResponse::Completed {
        CYCLE_DONE.signal(());
    }
}

fn clock_config() -> hal::Config {
    let mut config = hal::Config::default();
    // HSI16 / 1 * 8 / 2 = 64 MHz
    config.rcc.pll = Some(Pll {
        source: PllSource::HSI,
        prediv: PllPreDiv::DIV1,
        mul: PllMul::MUL8,
        divp: None,
        divq: None,
        divr: Some(PllRDiv::DIV2),
    });
    config.rcc.sys = Sysclk::PLL1_R;
    config.time_interrupt_priority = BACKGROUND_PRIORITY;
    config
}

fn now() -> FirmwareInstant {
    FirmwareInstant::from(Instant::now())
}

#[embassy_executor::main]
pub async fn main(_spawner: Spawner) {
    let hal::Peripherals {
        PB0,
        PB1,
        PB2,
        PB3,
        PB4,
        PB5,
        PB6,
        PB7,
        USART5,
        FLASH,
        ..
    } = hal::init(clock_config());

    let _trigger = Input::new(PB2, Pull::Up);
    let _outputs = [
        Output::new(PB3, Level::Low, Speed::VeryHigh),
        Output::new(PB4, Level::Low, Speed::VeryHigh),
        Output::new(PB5, Level::Low, Speed::VeryHigh),
        Output::new(PB6, Level::Low, Speed::VeryHigh),
        Output::new(PB7, Level::Low, Speed::VeryHigh),
    ];
    let mut board = DelayBoard::init();

    let config = DEFAULT_ENGINE_CONFIG;
    let mut telemetry = FirmwareTelemetry::new();
    let mut store = FlashStore::new(Flash::new_blocking(FLASH));
    install_startup_schedule(&mut store, &config, &mut telemetry);

    interrupt::TIM3_TIM4.set_priority(SEQUENCER_PRIORITY);
    interrupt::EXTI2_3.set_priority(SEQUENCER_PRIORITY);
    unsafe {
        interrupt::TIM3_TIM4.enable();
        interrupt::EXTI2_3.enable();
    }

    let mut uart_config = UartConfig::default();
    uart_config.baudrate = CONSOLE_BAUD;
    uart_config.data_bits = DataBits::DataBits8;
    uart_config.stop_bits = StopBits::STOP1;
    uart_config.parity = Parity::ParityNone;

    let uart = BufferedUart::new(
        USART5,
        PB1,
        PB0,
        UART_TX_BUFFER.init([0; UART_TX_BUFFER_SIZE]),
        UART_RX_BUFFER.init([0; UART_RX_BUFFER_SIZE]),
        UartIrqs,
        uart_config,
    )
    .expect("failed to initialize console UART");
    interrupt::USART3_4_5_6_LPUART1.set_priority(BACKGROUND_PRIORITY);
    let (mut uart_tx, mut uart_rx) = uart.split();

    let mut executor: Executor = CommandExecutor::new(&ENGINE, store, config);
    let mut console = ConsoleLine::new();
    write_console(&mut uart_tx, PROMPT.as_bytes()).await;

    loop {
        arm(&mut board, &mut telemetry);
        serve_until_cycle_done(
            &mut board,
            &mut executor,
            &mut console,
            &mut telemetry,
            &mut uart_tx,
            &mut uart_rx,
        )
        .await;
        complete_cycle(&mut board, &mut telemetry);
    }
}

fn install_startup_schedule(
    store: &mut FlashStore<'static>,
    config: &EngineConfig,
    telemetry: &mut FirmwareTelemetry,
) {
    let (list, event) = match load_or_default(store, config.min_spacing()) {
        Ok((list, ScheduleSource::Stored)) => (list, TelemetryEventKind::ScheduleLoaded),
        Ok((list, ScheduleSource::ExampleAfterErased)) => {
            (list, TelemetryEventKind::DefaultScheduleInstalled)
        }
        Ok((list, ScheduleSource::ExampleAfterCorrupt(fault))) => {
            defmt::warn!(
                "storage: stored schedule rejected: {}",
                defmt::Display2Format(&fault)
            );
            (list, TelemetryEventKind::DefaultScheduleInstalled)
        }
        Err(err) => {
            defmt::error!("storage: load failed: {}", defmt::Display2Format(&err));
            if let PersistError::Store(_) = err {
                telemetry.record(TelemetryEventKind::StoreFault, TelemetryPayload::none(), now());
                log_latest(telemetry);
            }
            match example_schedule(config.min_spacing()) {
                Ok(list) => (list, TelemetryEventKind::DefaultScheduleInstalled),
                Err(err) => {
                    defmt::error!(
                        "engine: built-in schedule rejected: {}",
                        defmt::Display2Format(&err)
                    );
                    (DelayList::new(), TelemetryEventKind::ScheduleChanged)
                }
            }
        }
    };

    let entries = list.len();
    ENGINE
        .replace_schedule(list)
        .expect("engine idle before first arm");
    telemetry.record(event, TelemetryPayload::schedule(entries), now());
    log_latest(telemetry);
}

fn arm(board: &mut DelayBoard, telemetry: &mut FirmwareTelemetry) {
    CYCLE_DONE.reset();
    match ENGINE.arm(board) {
        Ok(()) => {
            telemetry.record_armed(ENGINE.status().count, now());
            log_latest(telemetry);
        }
        Err(err) => defmt::warn!("engine: arm refused: {}", defmt::Display2Format(&err)),
    }
}

/// Services the console until the armed cycle completes.
async fn serve_until_cycle_done(
    board: &mut DelayBoard,
    executor: &mut Executor,
    console: &mut ConsoleLine,
    telemetry: &mut FirmwareTelemetry,
    uart_tx: &mut BufferedUartTx<'static>,
    uart_rx: &mut BufferedUartRx<'static>,
) {
    let mut ingress = [0u8; UART_RX_BUFFER_SIZE];
    loop {
        if !accepts_input(ENGINE.state()) {
            // Received bytes stay in the driver buffer until the cycle ends.
            CYCLE_DONE.wait().await;
            return;
        }

        let count = match select(CYCLE_DONE.wait(), uart_rx.read(&mut ingress)).await {
            Either::First(()) => return,
            Either::Second(Ok(count)) => count,
            Either::Second(Err(_)) => {
                defmt::warn!("console: UART read error");
                Timer::after(Duration::from_millis(5)).await;
                continue;
            }
        };

        for &byte in &ingress[..count] {
            settle_cycle(board, telemetry).await;
            match console.ingest(byte) {
                Ok(Ingest::Complete) => {
                    write_console(uart_tx, NEWLINE.as_bytes()).await;
                    service_line(board, executor, console, telemetry, uart_tx).await;
                    console.clear();
                    write_console(uart_tx, PROMPT.as_bytes()).await;
                }
                Ok(ingest) => {
                    let echo = Echo::for_byte(byte, ingest);
                    write_console(uart_tx, echo.as_bytes()).await;
                }
                Err(err) => {
                    defmt::warn!("console: {}", err.message());
                    write_console(uart_tx, NEWLINE.as_bytes()).await;
                    write_console(uart_tx, err.message().as_bytes()).await;
                    write_console(uart_tx, NEWLINE.as_bytes()).await;
                }
            }
        }

        if ENGINE.state() == ArmState::Idle {
            arm(board, telemetry);
        }
    }
}

/// Waits out a running cycle, leaving the engine idle.
async fn settle_cycle(board: &mut DelayBoard, telemetry: &mut FirmwareTelemetry) {
    if accepts_input(ENGINE.state()) {
        return;
    }
    CYCLE_DONE.wait().await;
    complete_cycle(board, telemetry);
}

fn complete_cycle(board: &mut DelayBoard, telemetry: &mut FirmwareTelemetry) {
    if ENGINE.finish_cycle(board) {
        let status = ENGINE.status();
        telemetry.record_cycle_complete(status.count, status.completed_cycles, now());
        log_latest(telemetry);
    }
}

/// Runs one console line with the trigger disarmed, then re-arms.
async fn service_line(
    board: &mut DelayBoard,
    executor: &mut Executor,
    console: &ConsoleLine,
    telemetry: &mut FirmwareTelemetry,
    uart_tx: &mut BufferedUartTx<'static>,
) {
    let line = match console.line() {
        Ok(line) if line.is_empty() => return,
        Ok(line) => line,
        Err(err) => {
            write_console(uart_tx, err.message().as_bytes()).await;
            write_console(uart_tx, NEWLINE.as_bytes()).await;
            return;
        }
    };

    // Commands never interrupt a running sequence.
    while ENGINE.disarm(board).is_err() {
        settle_cycle(board, telemetry).await;
    }

    let mut response: String<RESPONSE_LEN> = String::new();
    let rendered = match executor.execute(line) {
        Ok(outcome) => {
            if let Some((event, payload)) = outcome.telemetry() {
                telemetry.record(event, payload, now());
                log_latest(telemetry);
            }
            outcome.render(executor.config(), NEWLINE, &mut response)
        }
        Err(err) => {
            let event = match &err {
                CommandError::Persist(PersistError::Store(StoreError::Flash(_))) => {
                    TelemetryEventKind::StoreFault
                }
                _ => TelemetryEventKind::CommandRejected,
            };
            telemetry.record(event, TelemetryPayload::none(), now());
            log_latest(telemetry);
            write!(response, "error: {err}{NEWLINE}")
        }
    };
    if rendered.is_err() {
        defmt::warn!("console: response truncated at {} bytes", RESPONSE_LEN);
    }
    write_console(uart_tx, response.as_bytes()).await;

    arm(board, telemetry);
}

async fn write_console(uart_tx: &mut BufferedUartTx<'static>, bytes: &[u8]) {
    if bytes.is_empty() {
        return;
    }
    if uart_tx.write_all(bytes).await.is_err() {
        defmt::warn!("console: UART write error");
    }
}
