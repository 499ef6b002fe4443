// Asynchronous I/O and scheduling core for the two-channel signal generator.
//
// kernel/  task queue, cooperative scheduler, wait ids, WFI hook
// drivers/ timer multiplexer, shared-bus managers, slave drivers, heartbeat
// board/   ESP32-C3 bring-up (feature "esp32c3")
//
// Nothing here blocks: every call enqueues work and returns, results come
// back later as tasks posted to the scheduler.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod drivers;
pub mod kernel;

#[cfg(feature = "esp32c3")]
pub mod board;

pub use kernel::{Scheduler, Task};
