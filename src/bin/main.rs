// pulse-fw entry point
//
// Boot sequence: logger -> heap -> board -> bus managers -> heartbeat
// Main loop: Scheduler::run with the WFI hook; everything after boot is a
// task posted by the timer interrupt or by a finished bus transfer.
//
// The scheduler and timer multiplexer are plain statics; the bus managers
// own esp-hal drivers, so they are placed in StaticCells at boot.

#![no_std]
#![no_main]

use core::cell::RefCell;

use critical_section::Mutex;
use esp_backtrace as _;
use esp_hal::clock::CpuClock;
use esp_hal::gpio::Output;
use log::{info, warn};
use static_cell::StaticCell;

use pulse_core::board::{Board, I2cPort, OneShotCountdown, SpiPort, pins};
use pulse_core::drivers::bus::{BusConfig, BusManager};
use pulse_core::drivers::heartbeat::{DEFAULT_INTERVAL, Heartbeat};
use pulse_core::drivers::i2c::I2cSlave;
use pulse_core::drivers::spi::{DataHandling, SpiController, SpiSlave, SpiTarget};
use pulse_core::drivers::timer::{Millis, TimerMux};
use pulse_core::kernel::{Scheduler, Wfi, wake};

extern crate alloc;

esp_bootloader_esp_idf::esp_app_desc!();

// peripherals settle before the first bus traffic
const BOOT_DELAY: Millis = Millis::from_ticks(150);

// port expander registers (inputs on both ports)
const EXPANDER_INPUT: u8 = 0x00;
const EXPANDER_CONFIG: u8 = 0x06;

// synthesizer control word: reset, 28-bit frequency writes
const DDS_RESET: [u8; 2] = [0x21, 0x00];

// display controller software reset
const DISPLAY_SW_RESET: u8 = 0x01;

// blocking buses retry inside the bus lock; an absent device must give up
const BUS_RETRIES: u32 = 8;

type I2cBus = BusManager<'static, I2cPort, Scheduler>;
type SpiBus = BusManager<'static, SpiController<SpiPort>, Scheduler>;

static SCHED: Scheduler = Scheduler::new();
static TIMER: TimerMux<'static, OneShotCountdown, Scheduler> =
    TimerMux::new(OneShotCountdown::new(), &SCHED);

static I2C_BUS: StaticCell<I2cBus> = StaticCell::new();
static SPI_BUS: StaticCell<SpiBus> = StaticCell::new();

static LED: StaticCell<Mutex<RefCell<Output<'static>>>> = StaticCell::new();

#[esp_hal::handler(priority = esp_hal::interrupt::Priority::Priority1)]
fn timer_handler() {
    OneShotCountdown::clear_interrupt();
    TIMER.on_fired();
}

#[esp_hal::main]
fn main() -> ! {
    esp_println::logger::init_logger_from_env();
    let config = esp_hal::Config::default().with_cpu_clock(CpuClock::max());
    let peripherals = esp_hal::init(config);
    esp_alloc::heap_allocator!(size: 64 * 1024);

    info!("booting...");

    let board = match Board::init(peripherals, timer_handler) {
        Ok(board) => board,
        Err(e) => panic!("board init failed: {}", e),
    };
    info!("hardware initialized.");

    let bus_config = BusConfig::new().with_max_retries(BUS_RETRIES);
    let i2c: &'static I2cBus = I2C_BUS.init(BusManager::with_config(board.i2c, &SCHED, bus_config));
    let spi: &'static SpiBus = SPI_BUS.init(BusManager::with_config(
        SpiController::new(board.spi),
        &SCHED,
        bus_config,
    ));

    let led: &'static Mutex<RefCell<Output<'static>>> = LED.init(Mutex::new(RefCell::new(board.led)));
    let mut heartbeat = Heartbeat::new(&TIMER, led);
    if !heartbeat.start(DEFAULT_INTERVAL) {
        warn!("heartbeat: no timer slot");
    }

    let id = TIMER.async_wait(BOOT_DELAY, move || bring_up(i2c, spi), false);
    if !id.is_valid() {
        warn!("boot: no timer slot for bring-up");
    }

    info!("entering scheduler.");
    SCHED.run(&mut Wfi);

    warn!("scheduler stopped");
    loop {
        wake::wait_for_interrupt();
    }
}

fn bring_up(i2c: &'static I2cBus, spi: &'static SpiBus) {
    for addr in [pins::ADDR_PORT_EXPANDER_1, pins::ADDR_PORT_EXPANDER_2] {
        let expander = I2cSlave::new(i2c, addr);
        if let Err(e) = expander.async_write_register(EXPANDER_CONFIG, &[0xFF, 0xFF], None) {
            warn!("expander {:#04x}: {}", addr, e);
            continue;
        }
        let queued = expander.async_read_register(EXPANDER_INPUT, 2, move |buttons| {
            info!("expander {:#04x}: inputs {:02x?}", addr, buttons.as_slice());
        });
        if let Err(e) = queued {
            warn!("expander {:#04x}: {}", addr, e);
        }
    }

    for line in [pins::LINE_DDS1, pins::LINE_DDS2] {
        let dds = SpiSlave::new(spi, SpiTarget::new(line));
        if let Err(e) = dds.async_write(&DDS_RESET, DataHandling::SynthCommand, None) {
            warn!("dds on line {}: {}", line, e);
        }
    }

    let display = SpiSlave::new(
        spi,
        SpiTarget::new(pins::LINE_DISPLAY_CS).with_command_line(pins::LINE_DISPLAY_DC),
    );
    if let Err(e) = display.async_write(&[DISPLAY_SW_RESET], DataHandling::DisplayCommand, None) {
        warn!("display: {}", e);
    }

    info!("bring-up queued.");
}
