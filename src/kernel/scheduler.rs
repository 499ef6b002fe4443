// Cooperative run-to-completion scheduler
// Single core, no preemption between tasks. Interrupt handlers and tasks
// both post work through add_task(); run() executes it strictly FIFO and
// sleeps the core whenever the queue is empty.
//
// The queue lives in a critical_section::Mutex, the only lock in the system.

use core::cell::RefCell;
use core::fmt;
use core::sync::atomic::{AtomicBool, Ordering};

use critical_section::{CriticalSection, Mutex};
use log::error;

use super::queue::TaskQueue;
use super::task::Task;
use super::wake::Sleep;

pub const DEFAULT_QUEUE_SIZE: usize = 20;

/// The task queue was full; the rejected task has been dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFull;

impl fmt::Display for QueueFull {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("task queue full")
    }
}

/// Anything that accepts deferred work. Drivers post completions through
/// this so they don't depend on the scheduler's queue size.
pub trait TaskSink {
    fn post(&self, task: Task) -> Result<(), QueueFull>;
}

pub struct Scheduler<const N: usize = DEFAULT_QUEUE_SIZE> {
    queue: Mutex<RefCell<TaskQueue<Task, N>>>,
    stopped: AtomicBool,
}

impl<const N: usize> Scheduler<N> {
    pub const fn new() -> Self {
        Self {
            queue: Mutex::new(RefCell::new(TaskQueue::new())),
            stopped: AtomicBool::new(false),
        }
    }

    /// Queue `f` for the cooperative context. Callable from interrupt
    /// handlers and from task bodies.
    pub fn add_task<F>(&self, f: F) -> Result<(), QueueFull>
    where
        F: FnOnce() + Send + 'static,
    {
        self.post(Task::new(f))
    }

    /// Run tasks until stop() is called. With an empty queue the core is
    /// parked in `sleep` until the next interrupt.
    pub fn run<S: Sleep>(&self, sleep: &mut S) {
        loop {
            if self.stopped.load(Ordering::Acquire) {
                return;
            }

            let next = critical_section::with(|cs| {
                let next = self.queue.borrow_ref_mut(cs).pop();
                if next.is_none() {
                    sleep.sleep();
                }
                next
            });

            if let Some(task) = next {
                task.run();
            }
        }
    }

    /// Run everything queued, including tasks posted along the way, then
    /// return instead of sleeping. Returns how many tasks ran.
    pub fn run_until_idle(&self) -> usize {
        let mut ran = 0;
        while !self.stopped.load(Ordering::Acquire) {
            let Some(task) = critical_section::with(|cs| self.queue.borrow_ref_mut(cs).pop())
            else {
                break;
            };
            task.run();
            ran += 1;
        }
        ran
    }

    /// Takes effect once the current task returns.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Drop every pending task and clear the stop flag.
    pub fn reset(&self) {
        critical_section::with(|cs| self.queue.borrow_ref_mut(cs).clear());
        self.stopped.store(false, Ordering::Release);
    }

    pub fn pending(&self) -> usize {
        critical_section::with(|cs| self.queue.borrow_ref(cs).available())
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    /// Run `f` with interrupts masked.
    pub fn lock<R>(&self, f: impl FnOnce(CriticalSection<'_>) -> R) -> R {
        critical_section::with(f)
    }
}

impl<const N: usize> TaskSink for Scheduler<N> {
    fn post(&self, task: Task) -> Result<(), QueueFull> {
        let pushed = critical_section::with(|cs| self.queue.borrow_ref_mut(cs).push(task));
        if pushed.is_err() {
            error!("scheduler: queue full ({} slots), task dropped", N);
            #[cfg(feature = "strict-queue")]
            panic!("scheduler: queue full ({} slots)", N);
            #[cfg(not(feature = "strict-queue"))]
            return Err(QueueFull);
        }
        Ok(())
    }
}

impl<const N: usize> Default for Scheduler<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> fmt::Debug for Scheduler<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("pending", &self.pending())
            .field("capacity", &N)
            .field("stopped", &self.is_stopped())
            .finish()
    }
}
