//! ESP32-C3 bring-up board
//!
//! Maps the physical hardware onto the driver capabilities: a timer-group
//! one-shot timer as the countdown timer, I2C0 and SPI2 in blocking mode
//! behind the blocking bus adapters (their transfers finish inside the bus
//! manager, so they need no interrupt), and the select lines and status LED
//! as plain outputs. GPIO numbers live in [`pins`].

pub mod pins;

use alloc::vec;
use core::cell::RefCell;
use core::fmt;

use critical_section::Mutex;
use embedded_hal::spi::Phase;
use esp_hal::{
    Blocking,
    gpio::{Level, Output, OutputConfig},
    i2c,
    interrupt::InterruptHandler,
    peripherals::Peripherals,
    spi,
    time::{Duration, Instant, Rate},
    timer::{OneShotTimer, timg::TimerGroup},
};
use log::warn;

use crate::drivers::i2c::BlockingI2c;
use crate::drivers::spi::BlockingSpi;
use crate::drivers::timer::CountdownTimer;

pub type I2cDriver = i2c::master::I2c<'static, Blocking>;
pub type SpiDriver = spi::master::Spi<'static, Blocking>;
pub type I2cPort = BlockingI2c<I2cDriver>;
pub type SpiPort = BlockingSpi<SpiDriver, Output<'static>>;

// The one-shot timer is shared between the countdown (cooperative side)
// and the expiry interrupt, which has to acknowledge it.
static HW_TIMER: Mutex<RefCell<Option<OneShotTimer<'static, Blocking>>>> =
    Mutex::new(RefCell::new(None));

/// Countdown timer on the timer-group one-shot timer. Elapsed time comes
/// from the system timer, so it stays valid after the one-shot has fired.
pub struct OneShotCountdown {
    started: Option<Instant>,
    armed_ms: u32,
    frozen_ms: u32,
}

impl OneShotCountdown {
    pub const fn new() -> Self {
        Self {
            started: None,
            armed_ms: 0,
            frozen_ms: 0,
        }
    }

    /// Acknowledge the expiry. Call first thing in the timer interrupt.
    pub fn clear_interrupt() {
        critical_section::with(|cs| {
            if let Some(timer) = HW_TIMER.borrow_ref_mut(cs).as_mut() {
                timer.clear_interrupt();
            }
        });
    }

    fn running_ms(&self, since: Instant) -> u32 {
        let ms = since.elapsed().as_millis().min(u64::from(self.armed_ms));
        ms as u32
    }
}

impl Default for OneShotCountdown {
    fn default() -> Self {
        Self::new()
    }
}

impl CountdownTimer for OneShotCountdown {
    fn start(&mut self, ms: u32) {
        critical_section::with(|cs| {
            if let Some(timer) = HW_TIMER.borrow_ref_mut(cs).as_mut() {
                if timer.schedule(Duration::from_millis(u64::from(ms))).is_err() {
                    warn!("board: failed to arm timer for {}ms", ms);
                }
            }
        });
        self.armed_ms = ms;
        self.started = Some(Instant::now());
    }

    fn stop(&mut self) {
        critical_section::with(|cs| {
            if let Some(timer) = HW_TIMER.borrow_ref_mut(cs).as_mut() {
                timer.stop();
                timer.clear_interrupt();
            }
        });
        if let Some(since) = self.started.take() {
            self.frozen_ms = self.running_ms(since);
        }
    }

    fn elapsed(&self) -> u32 {
        match self.started {
            Some(since) => self.running_ms(since),
            None => self.frozen_ms,
        }
    }
}

#[derive(Debug)]
pub enum BoardError {
    I2c(i2c::master::ConfigError),
    Spi(spi::master::ConfigError),
}

impl fmt::Display for BoardError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::I2c(e) => write!(f, "i2c config: {:?}", e),
            Self::Spi(e) => write!(f, "spi config: {:?}", e),
        }
    }
}

/// Complete board hardware, ready to hand to the bus managers.
pub struct Board {
    pub i2c: I2cPort,
    pub spi: SpiPort,
    pub led: Output<'static>,
}

impl Board {
    /// `timer_irq` must call [`OneShotCountdown::clear_interrupt`] and then
    /// the timer multiplexer's expiry entry point.
    pub fn init(p: Peripherals, timer_irq: InterruptHandler) -> Result<Self, BoardError> {
        Self::init_timer(p.TIMG0, timer_irq);

        let i2c_cfg =
            i2c::master::Config::default().with_frequency(Rate::from_khz(pins::I2C_FREQ_KHZ));
        let i2c = i2c::master::I2c::new(p.I2C0, i2c_cfg)
            .map_err(BoardError::I2c)?
            .with_sda(p.GPIO4)
            .with_scl(p.GPIO5);

        let spi = spi::master::Spi::new(p.SPI2, spi_config(Phase::CaptureOnFirstTransition))
            .map_err(BoardError::Spi)?
            .with_sck(p.GPIO6)
            .with_mosi(p.GPIO7)
            .with_miso(p.GPIO2);

        // order must match the LINE_* indices in pins
        let lines = vec![
            Output::new(p.GPIO10, Level::High, OutputConfig::default()),
            Output::new(p.GPIO3, Level::High, OutputConfig::default()),
            Output::new(p.GPIO1, Level::High, OutputConfig::default()),
            Output::new(p.GPIO0, Level::High, OutputConfig::default()),
            Output::new(p.GPIO21, Level::High, OutputConfig::default()),
        ];

        let led = Output::new(p.GPIO8, Level::Low, OutputConfig::default());

        Ok(Board {
            i2c: BlockingI2c::new(i2c),
            spi: BlockingSpi::new(spi, lines).with_phase_control(set_spi_phase),
            led,
        })
    }

    fn init_timer(timg0: esp_hal::peripherals::TIMG0<'static>, handler: InterruptHandler) {
        let timg0 = TimerGroup::new(timg0);
        let mut timer = OneShotTimer::new(timg0.timer0);
        critical_section::with(|cs| {
            timer.set_interrupt_handler(handler);
            timer.listen();
            HW_TIMER.borrow_ref_mut(cs).replace(timer);
        });
    }
}

fn spi_config(phase: Phase) -> spi::master::Config {
    let mode = match phase {
        Phase::CaptureOnFirstTransition => spi::Mode::_0,
        Phase::CaptureOnSecondTransition => spi::Mode::_1,
    };
    spi::master::Config::default()
        .with_frequency(Rate::from_mhz(pins::SPI_FREQ_MHZ))
        .with_mode(mode)
}

fn set_spi_phase(spi: &mut SpiDriver, phase: Phase) {
    if let Err(e) = spi.apply_config(&spi_config(phase)) {
        warn!("board: spi mode change failed: {:?}", e);
    }
}
