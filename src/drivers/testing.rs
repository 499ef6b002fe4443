// Simulated peripherals for the driver unit tests. Time only moves when a
// test moves it; interrupts are delivered by the test calling the
// driver's entry point.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::vec::Vec;

use super::bus::{BusDevice, TransferStatus};
use super::timer::CountdownTimer;

#[derive(Default)]
struct TimerSim {
    now: u64,
    started_at: u64,
    armed: Option<u32>,
    frozen: u32,
    starts: Vec<u32>,
    stops: usize,
}

/// Countdown timer over a manual millisecond clock. Clones share state.
#[derive(Clone, Default)]
pub struct SimTimer(Arc<Mutex<TimerSim>>);

impl CountdownTimer for SimTimer {
    fn start(&mut self, ms: u32) {
        let mut s = self.0.lock().unwrap();
        s.started_at = s.now;
        s.armed = Some(ms);
        s.starts.push(ms);
    }

    fn stop(&mut self) {
        let mut s = self.0.lock().unwrap();
        s.stops += 1;
        if let Some(ms) = s.armed.take() {
            s.frozen = ((s.now - s.started_at) as u32).min(ms);
        }
    }

    fn elapsed(&self) -> u32 {
        let s = self.0.lock().unwrap();
        match s.armed {
            Some(ms) => ((s.now - s.started_at) as u32).min(ms),
            None => s.frozen,
        }
    }
}

impl SimTimer {
    pub fn now(&self) -> u64 {
        self.0.lock().unwrap().now
    }

    /// Move the clock without delivering any expiry (a late interrupt).
    pub fn set_now(&self, now: u64) {
        self.0.lock().unwrap().now = now;
    }

    pub fn last_start(&self) -> Option<u32> {
        self.0.lock().unwrap().starts.last().copied()
    }

    pub fn start_count(&self) -> usize {
        self.0.lock().unwrap().starts.len()
    }

    pub fn stop_count(&self) -> usize {
        self.0.lock().unwrap().stops
    }

    pub fn is_armed(&self) -> bool {
        self.0.lock().unwrap().armed.is_some()
    }

    /// If the armed deadline is at or before `until`, move the clock to it,
    /// disarm and return true. The caller then delivers the interrupt.
    pub fn take_expiry(&self, until: u64) -> bool {
        let mut s = self.0.lock().unwrap();
        match s.armed {
            Some(ms) if s.started_at + u64::from(ms) <= until => {
                s.now = s.started_at + u64::from(ms);
                s.frozen = ms;
                s.armed = None;
                true
            }
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusEvent<T, F> {
    Select(T),
    Deselect(T),
    Transmit(T, F, Vec<u8>),
    Receive(T, F, usize),
}

/// Bus device that records every call. Receives fill the buffer with
/// `fill, fill+1, ...`. Completions are delivered by the test, except for
/// transfers given an outcome up front with [`SimBus::finish_inline`].
#[derive(Clone)]
pub struct SimBus<T, F> {
    events: Arc<Mutex<Vec<BusEvent<T, F>>>>,
    inline: Arc<Mutex<VecDeque<TransferStatus>>>,
    fill: u8,
}

impl<T, F> SimBus<T, F> {
    pub fn new(fill: u8) -> Self {
        Self {
            events: Arc::new(Mutex::new(Vec::new())),
            inline: Arc::new(Mutex::new(VecDeque::new())),
            fill,
        }
    }

    /// The next transfers finish inside `begin_*` with these outcomes.
    pub fn finish_inline(&self, outcomes: &[TransferStatus]) {
        self.inline.lock().unwrap().extend(outcomes.iter().copied());
    }

    fn outcome(&self) -> Option<TransferStatus> {
        self.inline.lock().unwrap().pop_front()
    }
}

impl<T: Clone, F: Clone> SimBus<T, F> {
    pub fn events(&self) -> Vec<BusEvent<T, F>> {
        self.events.lock().unwrap().clone()
    }

    pub fn transfers(&self) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| matches!(e, BusEvent::Transmit(..) | BusEvent::Receive(..)))
            .count()
    }
}

impl<T: Copy, F: Copy + Default> BusDevice for SimBus<T, F> {
    type Target = T;
    type Framing = F;

    fn begin_transmit(&mut self, target: T, framing: F, data: &[u8]) -> Option<TransferStatus> {
        self.events
            .lock()
            .unwrap()
            .push(BusEvent::Transmit(target, framing, data.to_vec()));
        self.outcome()
    }

    fn begin_receive(&mut self, target: T, framing: F, buf: &mut [u8]) -> Option<TransferStatus> {
        for (i, b) in buf.iter_mut().enumerate() {
            *b = self.fill.wrapping_add(i as u8);
        }
        self.events
            .lock()
            .unwrap()
            .push(BusEvent::Receive(target, framing, buf.len()));
        self.outcome()
    }

    fn select(&mut self, target: T) {
        self.events.lock().unwrap().push(BusEvent::Select(target));
    }

    fn deselect(&mut self, target: T) {
        self.events.lock().unwrap().push(BusEvent::Deselect(target));
    }
}
