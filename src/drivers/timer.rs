// Software timers multiplexed onto one hardware countdown timer
//
// Every active wait keeps its own remaining time. The table is kept sorted
// descending, so the earliest deadline sits in the last slot and the
// hardware is always programmed with exactly that remaining time. Any
// change to the table (insert, abort, query) first stops the hardware and
// charges the elapsed time to every wait, so reprogramming never loses or
// gains time.
//
// The table, id counter and hardware timer share one critical_section
// Mutex; on_fired() runs from the timer interrupt.

use alloc::vec::Vec;
use core::cell::RefCell;
use core::fmt;

use critical_section::Mutex;
use fugit::MillisDurationU32;
use log::{trace, warn};

use crate::kernel::{Handler, IdGenerator, TaskSink, WaitId};

pub const DEFAULT_MAX_WAITS: usize = 20;

pub type Millis = MillisDurationU32;

/// One-shot countdown timer hardware.
pub trait CountdownTimer {
    /// Arm for `ms` milliseconds. Expires at most once per start; `0`
    /// expires as soon as possible.
    fn start(&mut self, ms: u32);

    /// Halt without expiring. A pending, not yet handled expiry is
    /// discarded.
    fn stop(&mut self);

    /// Milliseconds counted since the last start(), frozen by stop().
    fn elapsed(&self) -> u32;
}

struct ActiveWait {
    callback: Handler,
    period: i64,
    remaining: i64,
    id: WaitId,
    repeating: bool,
}

struct TimerState<T> {
    timer: T,
    waits: Vec<ActiveWait>,
    ids: IdGenerator,
}

impl<T: CountdownTimer> TimerState<T> {
    // stop the hardware and charge the time it ran to every wait
    fn suspend(&mut self) {
        if self.waits.is_empty() {
            return;
        }
        self.timer.stop();
        let elapsed = i64::from(self.timer.elapsed());
        for wait in self.waits.iter_mut() {
            wait.remaining -= elapsed;
        }
    }

    // earliest deadline to the last slot, then program the hardware with it
    fn sort_and_start(&mut self) {
        self.waits.sort_by(|a, b| b.remaining.cmp(&a.remaining));
        if let Some(next) = self.waits.last() {
            let ms = clamp_ms(next.remaining);
            trace!("timer: next expiry in {}ms ({} active)", ms, self.waits.len());
            self.timer.start(ms);
        }
    }

    fn position(&self, id: WaitId) -> Option<usize> {
        self.waits.iter().position(|w| w.id == id)
    }
}

fn clamp_ms(ms: i64) -> u32 {
    ms.clamp(0, i64::from(u32::MAX)) as u32
}

pub struct TimerMux<'a, T, S: ?Sized, const M: usize = DEFAULT_MAX_WAITS> {
    state: Mutex<RefCell<TimerState<T>>>,
    sink: &'a S,
}

impl<'a, T, S, const M: usize> TimerMux<'a, T, S, M>
where
    T: CountdownTimer,
    S: TaskSink + ?Sized,
{
    pub const fn new(timer: T, sink: &'a S) -> Self {
        Self {
            state: Mutex::new(RefCell::new(TimerState {
                timer,
                waits: Vec::new(),
                ids: IdGenerator::new(),
            })),
            sink,
        }
    }

    /// Post `callback` to the scheduler once `duration` has passed (and
    /// again every `duration` if `repeating`).
    ///
    /// Returns [`WaitId::INVALID`] when all `M` slots are in use.
    pub fn async_wait<F>(&self, duration: Millis, callback: F, repeating: bool) -> WaitId
    where
        F: Fn() + Clone + Send + 'static,
    {
        let callback = Handler::new(callback);
        let mut ms = i64::from(duration.to_millis());
        if repeating && ms == 0 {
            // a zero period would re-expire forever inside the interrupt
            ms = 1;
        }

        critical_section::with(|cs| {
            let mut st = self.state.borrow_ref_mut(cs);
            if st.waits.len() >= M {
                warn!("timer: all {} wait slots in use", M);
                return WaitId::INVALID;
            }

            let st = &mut *st;
            let waits = &st.waits;
            let id = st.ids.next_free(|id| waits.iter().any(|w| w.id == id));
            st.suspend();
            st.waits.push(ActiveWait {
                callback,
                period: ms,
                remaining: ms,
                id,
                repeating,
            });
            st.sort_and_start();
            id
        })
    }

    /// `async_wait` with `repeating = true`.
    pub fn async_repeat<F>(&self, period: Millis, callback: F) -> WaitId
    where
        F: Fn() + Clone + Send + 'static,
    {
        self.async_wait(period, callback, true)
    }

    /// Cancel a wait. Once this returns the wait can no longer expire.
    ///
    /// On success `id` is set to [`WaitId::INVALID`] and the time the wait
    /// still had left is returned. Unknown ids leave `id` alone and return 0.
    pub fn abort(&self, id: &mut WaitId) -> u32 {
        critical_section::with(|cs| {
            let mut st = self.state.borrow_ref_mut(cs);
            if st.waits.is_empty() {
                return 0;
            }

            st.suspend();
            let mut left = 0;
            if let Some(pos) = st.position(*id) {
                let wait = st.waits.remove(pos);
                left = clamp_ms(wait.remaining);
                trace!("timer: aborted {} with {}ms left", id, left);
                id.invalidate();
            }

            st.sort_and_start();
            left
        })
    }

    /// Time left on a wait, 0 if `id` is not active.
    ///
    /// The countdown hardware can only be read while stopped, so this
    /// stops it, resynchronizes every wait and restarts it.
    pub fn remaining_time(&self, id: WaitId) -> u32 {
        critical_section::with(|cs| {
            let mut st = self.state.borrow_ref_mut(cs);
            if st.waits.is_empty() {
                return 0;
            }

            st.suspend();
            let left = st
                .position(id)
                .map(|pos| clamp_ms(st.waits[pos].remaining))
                .unwrap_or(0);
            st.sort_and_start();
            left
        })
    }

    /// Timer interrupt entry point.
    pub fn on_fired(&self) {
        critical_section::with(|cs| {
            let mut st = self.state.borrow_ref_mut(cs);
            let st = &mut *st;

            let Some(last) = st.waits.len().checked_sub(1) else {
                warn!("timer: expiry with no active wait");
                return;
            };

            // the hardware ran for exactly what the last slot had left
            let elapsed = st.waits[last].remaining.max(0);
            self.dispatch(&st.waits[last]);
            st.waits[last].remaining = 0;

            for wait in st.waits[..last].iter_mut() {
                wait.remaining -= elapsed;
                if wait.remaining <= 0 {
                    self.dispatch(wait);
                }
            }

            st.waits.retain_mut(|wait| {
                if wait.remaining > 0 {
                    true
                } else if wait.repeating {
                    wait.remaining = wait.period;
                    true
                } else {
                    false
                }
            });

            st.sort_and_start();
        });
    }

    pub fn active_waits(&self) -> usize {
        critical_section::with(|cs| self.state.borrow_ref(cs).waits.len())
    }

    /// Whether `id` is still armed. Does not touch the hardware.
    pub fn is_active(&self, id: WaitId) -> bool {
        critical_section::with(|cs| self.state.borrow_ref(cs).position(id).is_some())
    }

    pub const fn capacity(&self) -> usize {
        M
    }

    fn dispatch(&self, wait: &ActiveWait) {
        trace!("timer: {} expired", wait.id);
        // overflow is logged by the sink; the expiry is lost either way
        let _ = self.sink.post(wait.callback.task());
    }
}

impl<T, S: ?Sized, const M: usize> fmt::Debug for TimerMux<'_, T, S, M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let active = critical_section::with(|cs| self.state.borrow_ref(cs).waits.len());
        f.debug_struct("TimerMux")
            .field("active", &active)
            .field("capacity", &M)
            .finish()
    }
}
