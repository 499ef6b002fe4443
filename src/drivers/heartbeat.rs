// Status LED blinker on a repeating software timer

use core::cell::RefCell;

use critical_section::Mutex;
use embedded_hal::digital::StatefulOutputPin;
use log::warn;

use super::timer::{CountdownTimer, Millis, TimerMux};
use crate::kernel::{TaskSink, WaitId};

pub const DEFAULT_INTERVAL: Millis = Millis::from_ticks(500);

pub struct Heartbeat<'a, T, S: ?Sized, P: 'static, const M: usize> {
    timer: &'a TimerMux<'a, T, S, M>,
    led: &'static Mutex<RefCell<P>>,
    id: WaitId,
    interval: Millis,
}

impl<'a, T, S, P, const M: usize> Heartbeat<'a, T, S, P, M>
where
    T: CountdownTimer,
    S: TaskSink + ?Sized,
    P: StatefulOutputPin + Send,
{
    /// Takes over `led` and switches it on.
    pub fn new(timer: &'a TimerMux<'a, T, S, M>, led: &'static Mutex<RefCell<P>>) -> Self {
        critical_section::with(|cs| {
            if led.borrow_ref_mut(cs).set_high().is_err() {
                warn!("heartbeat: led write failed");
            }
        });
        Self {
            timer,
            led,
            id: WaitId::INVALID,
            interval: DEFAULT_INTERVAL,
        }
    }

    /// Toggle the LED every `interval`. Returns false if the timer had no
    /// free slot.
    pub fn start(&mut self, interval: Millis) -> bool {
        self.stop();
        let led = self.led;
        self.interval = interval;
        self.id = self.timer.async_repeat(interval, move || {
            critical_section::with(|cs| {
                if led.borrow_ref_mut(cs).toggle().is_err() {
                    warn!("heartbeat: led toggle failed");
                }
            })
        });
        self.id.is_valid()
    }

    /// Restart the blinking with a new period.
    pub fn set_interval(&mut self, interval: Millis) -> bool {
        self.start(interval)
    }

    pub fn stop(&mut self) {
        if self.id.is_valid() {
            self.timer.abort(&mut self.id);
        }
    }

    pub fn is_running(&self) -> bool {
        self.id.is_valid()
    }

    pub fn interval(&self) -> Millis {
        self.interval
    }
}
