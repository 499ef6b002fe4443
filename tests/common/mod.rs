// Simulated board for the scenario tests: a millisecond clock driving a
// countdown timer, and an I2C-style bus device whose completions arrive a
// fixed latency after each transfer starts.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use pulse_core::drivers::{BusDevice, CountdownTimer, TransferStatus};

pub fn leak<T>(value: T) -> &'static T {
    Box::leak(Box::new(value))
}

#[derive(Default)]
struct TimerState {
    now: u64,
    started_at: u64,
    armed: Option<u32>,
    frozen: u32,
}

#[derive(Clone, Default)]
pub struct SimTimer(Arc<Mutex<TimerState>>);

impl CountdownTimer for SimTimer {
    fn start(&mut self, ms: u32) {
        let mut s = self.0.lock().unwrap();
        s.started_at = s.now;
        s.armed = Some(ms);
    }

    fn stop(&mut self) {
        let mut s = self.0.lock().unwrap();
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

    pub fn set_now(&self, now: u64) {
        self.0.lock().unwrap().now = now;
    }

    pub fn deadline(&self) -> Option<u64> {
        let s = self.0.lock().unwrap();
        s.armed.map(|ms| s.started_at + u64::from(ms))
    }

    /// Jump to the armed deadline and disarm. The caller delivers the
    /// interrupt.
    pub fn expire(&self) -> bool {
        let mut s = self.0.lock().unwrap();
        match s.armed.take() {
            Some(ms) => {
                s.now = s.started_at + u64::from(ms);
                s.frozen = ms;
                true
            }
            None => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Wire {
    Write { addr: u8, data: Vec<u8>, at: u64 },
    Read { addr: u8, len: usize, at: u64 },
}

struct DeviceState {
    log: Vec<Wire>,
    in_flight: Option<u64>,
    // outcomes for upcoming transfers; empty means success
    script: Vec<TransferStatus>,
}

/// Bus device on the shared clock. A transfer started at `t` completes at
/// `t + latency`; reads return `0x40, 0x41, ...`.
#[derive(Clone)]
pub struct SimDevice {
    clock: SimTimer,
    latency: u64,
    state: Arc<Mutex<DeviceState>>,
}

impl SimDevice {
    pub fn new(clock: SimTimer, latency: u64) -> Self {
        Self {
            clock,
            latency,
            state: Arc::new(Mutex::new(DeviceState {
                log: Vec::new(),
                in_flight: None,
                script: Vec::new(),
            })),
        }
    }

    /// Outcomes for the next transfers, in order.
    pub fn script(&self, outcomes: &[TransferStatus]) {
        self.state.lock().unwrap().script = outcomes.iter().rev().copied().collect();
    }

    pub fn log(&self) -> Vec<Wire> {
        self.state.lock().unwrap().log.clone()
    }

    pub fn completion_due(&self) -> Option<u64> {
        self.state.lock().unwrap().in_flight
    }

    /// Take the pending completion, if any.
    pub fn complete(&self) -> Option<TransferStatus> {
        let mut s = self.state.lock().unwrap();
        s.in_flight.take()?;
        Some(s.script.pop().unwrap_or(TransferStatus::Success))
    }

    fn begin(&mut self, entry: Wire) -> Option<TransferStatus> {
        let mut s = self.state.lock().unwrap();
        assert!(s.in_flight.is_none(), "transfer started while another is in flight");
        s.log.push(entry);
        s.in_flight = Some(self.clock.now() + self.latency);
        None
    }
}

impl BusDevice for SimDevice {
    type Target = u8;
    type Framing = ();

    fn begin_transmit(&mut self, addr: u8, _: (), data: &[u8]) -> Option<TransferStatus> {
        let at = self.clock.now();
        self.begin(Wire::Write {
            addr,
            data: data.to_vec(),
            at,
        })
    }

    fn begin_receive(&mut self, addr: u8, _: (), buf: &mut [u8]) -> Option<TransferStatus> {
        for (i, b) in buf.iter_mut().enumerate() {
            *b = 0x40 + i as u8;
        }
        let at = self.clock.now();
        self.begin(Wire::Read {
            addr,
            len: buf.len(),
            at,
        })
    }
}
