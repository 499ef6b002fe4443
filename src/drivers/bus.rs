// Serialized, interrupt-completed transfers on a shared serial bus
//
// One BusManager per physical bus. Requests are queued as BusTasks and
// executed strictly in order: the head task's transfer is started on the
// device, and the completion interrupt (on_transfer_complete) either
// advances it (next chunk), retries it, or finishes it and starts the next.
// Devices that finish a transfer inside begin_* (blocking peripherals)
// return the outcome instead, and the manager steps them on the spot.
// Completion callbacks are never run in interrupt context; they are posted
// to the scheduler together with the transfer buffer.
//
// Queue, busy flag and device share one critical_section Mutex. Hooks run
// inside it and must stay short (a GPIO write, typically).

use alloc::boxed::Box;
use alloc::vec;
use alloc::vec::Vec;
use core::cell::RefCell;
use core::fmt;

use critical_section::Mutex;
use log::{debug, error, trace, warn};

use crate::kernel::{Task, TaskQueue, TaskSink};

pub const DEFAULT_BUS_QUEUE: usize = 20;

/// Hardware result reported by the completion interrupt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatus {
    Success,
    Error,
}

impl TransferStatus {
    pub const fn is_ok(self) -> bool {
        matches!(self, Self::Success)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusError {
    /// The bus queue had no free slot; the request was dropped.
    QueueFull,
    /// A grouped submission needs more free slots than the queue has.
    NoRoom { needed: usize, free: usize },
}

impl fmt::Display for BusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::QueueFull => f.write_str("bus queue full"),
            Self::NoRoom { needed, free } => {
                write!(f, "bus queue has {} free slots, {} needed", free, needed)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BusConfig {
    /// Failed attempts tolerated before a task is dropped. `None` retries
    /// until the transfer succeeds. Synchronous devices retry inside the
    /// bus lock, so they should always have a limit.
    pub max_retries: Option<u32>,
}

impl BusConfig {
    pub const fn new() -> Self {
        Self { max_retries: None }
    }

    pub const fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = Some(retries);
        self
    }
}

/// Transfer data. Owned buffers are handed to the completion callback (or
/// freed); static ones are sent in place without copying.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Buffer {
    Owned(Vec<u8>),
    Static(&'static [u8]),
}

impl Buffer {
    pub fn as_slice(&self) -> &[u8] {
        match self {
            Self::Owned(v) => v,
            Self::Static(s) => s,
        }
    }

    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn into_vec(self) -> Vec<u8> {
        match self {
            Self::Owned(v) => v,
            Self::Static(s) => s.to_vec(),
        }
    }
}

impl From<Vec<u8>> for Buffer {
    fn from(v: Vec<u8>) -> Self {
        Self::Owned(v)
    }
}

impl From<&'static [u8]> for Buffer {
    fn from(s: &'static [u8]) -> Self {
        Self::Static(s)
    }
}

impl<const L: usize> From<&'static [u8; L]> for Buffer {
    fn from(s: &'static [u8; L]) -> Self {
        Self::Static(s)
    }
}

enum Payload {
    Transmit(Buffer),
    Receive(Vec<u8>),
}

impl Payload {
    fn len(&self) -> usize {
        match self {
            Self::Transmit(b) => b.len(),
            Self::Receive(v) => v.len(),
        }
    }

    fn into_buffer(self) -> Buffer {
        match self {
            Self::Transmit(b) => b,
            Self::Receive(v) => Buffer::Owned(v),
        }
    }
}

/// Runs once, right before the first byte of a task moves (pre) or after
/// its last byte (post).
pub type Hook = Box<dyn FnOnce() + Send>;

/// Receives the task's buffer; posted to the scheduler on success.
pub type Completion = Box<dyn FnOnce(Buffer) + Send>;

/// Box a closure as a completion callback.
pub fn on_done<F>(f: F) -> Option<Completion>
where
    F: FnOnce(Buffer) + Send + 'static,
{
    Some(Box::new(f))
}

/// One queued transfer: target, direction and data, plus the hooks that
/// bracket it and the callback that receives the buffer.
pub struct BusTask<T, F> {
    target: T,
    framing: F,
    payload: Payload,
    chunk: Option<usize>,
    offset: usize,
    attempts: u32,
    started: bool,
    pre_call: Option<Hook>,
    post_call: Option<Hook>,
    callback: Option<Completion>,
}

impl<T, F: Default> BusTask<T, F> {
    pub fn write(target: T, data: impl Into<Buffer>) -> Self {
        Self::with_payload(target, Payload::Transmit(data.into()))
    }

    pub fn read(target: T, len: usize) -> Self {
        Self::with_payload(target, Payload::Receive(vec![0; len]))
    }

    fn with_payload(target: T, payload: Payload) -> Self {
        Self {
            target,
            framing: F::default(),
            payload,
            chunk: None,
            offset: 0,
            attempts: 0,
            started: false,
            pre_call: None,
            post_call: None,
            callback: None,
        }
    }
}

impl<T, F> BusTask<T, F> {
    pub fn framing(mut self, framing: F) -> Self {
        self.framing = framing;
        self
    }

    /// Transfer in pieces of at most `size` bytes, keeping the device
    /// selected between them. `0` disables chunking.
    pub fn chunked(mut self, size: usize) -> Self {
        self.chunk = (size > 0).then_some(size);
        self
    }

    pub fn pre_call<H: FnOnce() + Send + 'static>(mut self, hook: H) -> Self {
        self.pre_call = Some(Box::new(hook));
        self
    }

    pub fn post_call<H: FnOnce() + Send + 'static>(mut self, hook: H) -> Self {
        self.post_call = Some(Box::new(hook));
        self
    }

    pub fn on_complete<C: FnOnce(Buffer) + Send + 'static>(mut self, callback: C) -> Self {
        self.callback = Some(Box::new(callback));
        self
    }

    fn with_hooks(mut self, pre_call: Option<Hook>, callback: Option<Completion>) -> Self {
        self.pre_call = pre_call;
        self.callback = callback;
        self
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_write(&self) -> bool {
        matches!(self.payload, Payload::Transmit(_))
    }

    // byte range of the transfer currently in flight
    fn window(&self) -> (usize, usize) {
        let len = self.len();
        let end = match self.chunk {
            Some(size) => (self.offset + size).min(len),
            None => len,
        };
        (self.offset, end)
    }
}

impl<T: fmt::Debug, F: fmt::Debug> fmt::Debug for BusTask<T, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BusTask")
            .field("target", &self.target)
            .field("framing", &self.framing)
            .field("write", &self.is_write())
            .field("len", &self.len())
            .field("offset", &self.offset)
            .field("chunk", &self.chunk)
            .field("attempts", &self.attempts)
            .finish()
    }
}

/// Serial bus hardware.
///
/// `begin_*` start a transfer. Interrupt-driven hardware returns `None` and
/// the platform reports the outcome later through
/// [`BusManager::on_transfer_complete`]; the receive buffer stays untouched
/// by the manager until then. Hardware that has already finished returns
/// the outcome, and must not call `on_transfer_complete` for it.
pub trait BusDevice {
    /// Addressing (I2C address, SPI select lines).
    type Target: Copy;
    /// Per-request line setup (SPI clock phase, command/data line).
    type Framing: Copy + Default;

    fn begin_transmit(
        &mut self,
        target: Self::Target,
        framing: Self::Framing,
        data: &[u8],
    ) -> Option<TransferStatus>;

    fn begin_receive(
        &mut self,
        target: Self::Target,
        framing: Self::Framing,
        buf: &mut [u8],
    ) -> Option<TransferStatus>;

    /// Called before the first transfer of a task.
    fn select(&mut self, _target: Self::Target) {}

    /// Called after the last transfer of a task, successful or dropped.
    fn deselect(&mut self, _target: Self::Target) {}
}

type TaskOf<D> = BusTask<<D as BusDevice>::Target, <D as BusDevice>::Framing>;

struct BusState<D: BusDevice, const N: usize> {
    device: D,
    queue: TaskQueue<TaskOf<D>, N>,
    busy: bool,
}

enum Step {
    NextChunk,
    Retry(u32),
    Finished,
    Dropped(u32),
}

pub struct BusManager<'a, D: BusDevice, S: ?Sized, const N: usize = DEFAULT_BUS_QUEUE> {
    state: Mutex<RefCell<BusState<D, N>>>,
    sink: &'a S,
    config: BusConfig,
}

impl<'a, D, S, const N: usize> BusManager<'a, D, S, N>
where
    D: BusDevice,
    S: TaskSink + ?Sized,
{
    pub const fn new(device: D, sink: &'a S) -> Self {
        Self::with_config(device, sink, BusConfig::new())
    }

    pub const fn with_config(device: D, sink: &'a S, config: BusConfig) -> Self {
        Self {
            state: Mutex::new(RefCell::new(BusState {
                device,
                queue: TaskQueue::new(),
                busy: false,
            })),
            sink,
            config,
        }
    }

    /// Queue a transfer; starts it at once if the bus is idle.
    pub fn submit(&self, task: TaskOf<D>) -> Result<(), BusError> {
        critical_section::with(|cs| {
            let mut st = self.state.borrow_ref_mut(cs);
            if st.queue.push(task).is_err() {
                warn!("bus: queue full ({} slots), request dropped", N);
                return Err(BusError::QueueFull);
            }
            if !st.busy {
                self.pump(&mut st);
            }
            Ok(())
        })
    }

    /// Queue several transfers back to back with nothing interleaved.
    /// Either all are queued or none is.
    pub fn submit_all<const K: usize>(&self, tasks: [TaskOf<D>; K]) -> Result<(), BusError> {
        critical_section::with(|cs| {
            let mut st = self.state.borrow_ref_mut(cs);
            let free = st.queue.free();
            if free < K {
                warn!("bus: {} requests do not fit in {} free slots", K, free);
                return Err(BusError::NoRoom { needed: K, free });
            }
            for task in tasks {
                // room was checked above
                let _ = st.queue.push(task);
            }
            if !st.busy {
                self.pump(&mut st);
            }
            Ok(())
        })
    }

    pub fn async_write(
        &self,
        target: D::Target,
        data: impl Into<Buffer>,
        pre_call: Option<Hook>,
        callback: Option<Completion>,
    ) -> Result<(), BusError> {
        self.submit(BusTask::write(target, data).with_hooks(pre_call, callback))
    }

    pub fn async_read(
        &self,
        target: D::Target,
        len: usize,
        pre_call: Option<Hook>,
        callback: Option<Completion>,
    ) -> Result<(), BusError> {
        self.submit(BusTask::read(target, len).with_hooks(pre_call, callback))
    }

    /// Transfer-complete interrupt entry point.
    pub fn on_transfer_complete(&self, status: TransferStatus) {
        critical_section::with(|cs| {
            let mut st = self.state.borrow_ref_mut(cs);
            if !st.busy {
                warn!("bus: completion ({:?}) with no transfer in flight", status);
                return;
            }
            self.complete(&mut st, status);
            self.pump(&mut st);
        });
    }

    pub fn is_busy(&self) -> bool {
        critical_section::with(|cs| self.state.borrow_ref(cs).busy)
    }

    /// Queued tasks, including the one in flight.
    pub fn pending(&self) -> usize {
        critical_section::with(|cs| self.state.borrow_ref(cs).queue.available())
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    pub fn config(&self) -> BusConfig {
        self.config
    }

    /// Run `f` on the device with the bus locked, for setup outside of any
    /// transfer.
    pub fn with_device<R>(&self, f: impl FnOnce(&mut D) -> R) -> R {
        critical_section::with(|cs| f(&mut self.state.borrow_ref_mut(cs).device))
    }

    fn advance(&self, task: &mut TaskOf<D>, status: TransferStatus) -> Step {
        match status {
            TransferStatus::Success => {
                let (_, end) = task.window();
                task.offset = end;
                if task.offset < task.len() {
                    Step::NextChunk
                } else {
                    Step::Finished
                }
            }
            TransferStatus::Error => {
                task.attempts = task.attempts.saturating_add(1);
                match self.config.max_retries {
                    Some(max) if task.attempts > max => Step::Dropped(task.attempts),
                    _ => Step::Retry(task.attempts),
                }
            }
        }
    }

    fn finish(&self, mut task: TaskOf<D>) {
        if let Some(post) = task.post_call.take() {
            post();
        }
        let buffer = task.payload.into_buffer();
        match task.callback {
            Some(callback) => {
                // overflow is logged by the sink
                let _ = self.sink.post(Task::new(move || callback(buffer)));
            }
            None => drop(buffer),
        }
    }

    // apply the outcome of the head task's transfer
    fn complete(&self, st: &mut BusState<D, N>, status: TransferStatus) {
        let step = match st.queue.peek_mut() {
            Some(task) => self.advance(task, status),
            None => return,
        };

        match step {
            Step::NextChunk => {}
            Step::Retry(attempt) => debug!("bus: transfer failed, retry #{}", attempt),
            Step::Finished => {
                if let Some(task) = st.queue.pop() {
                    st.device.deselect(task.target);
                    self.finish(task);
                }
            }
            Step::Dropped(attempts) => {
                error!("bus: transfer dropped after {} failed attempts", attempts);
                if let Some(task) = st.queue.pop() {
                    st.device.deselect(task.target);
                }
            }
        }
    }

    // keep the bus moving until a transfer is in flight or the queue is empty
    fn pump(&self, st: &mut BusState<D, N>) {
        while let Some(status) = Self::start_head(st) {
            self.complete(st, status);
        }
    }

    // start (or continue) the head task, or mark the bus idle; returns the
    // outcome if the device finished the transfer on the spot
    fn start_head(st: &mut BusState<D, N>) -> Option<TransferStatus> {
        let Some(task) = st.queue.peek_mut() else {
            st.busy = false;
            return None;
        };
        st.busy = true;

        if !task.started {
            task.started = true;
            if let Some(pre) = task.pre_call.take() {
                pre();
            }
            st.device.select(task.target);
        }

        let (start, end) = task.window();
        trace!("bus: bytes {}..{} of {}", start, end, task.len());
        match &mut task.payload {
            Payload::Transmit(buf) => {
                st.device
                    .begin_transmit(task.target, task.framing, &buf.as_slice()[start..end])
            }
            Payload::Receive(buf) => {
                st.device
                    .begin_receive(task.target, task.framing, &mut buf[start..end])
            }
        }
    }
}

impl<D: BusDevice, S: ?Sized, const N: usize> fmt::Debug for BusManager<'_, D, S, N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (pending, busy) = critical_section::with(|cs| {
            let st = self.state.borrow_ref(cs);
            (st.queue.available(), st.busy)
        });
        f.debug_struct("BusManager")
            .field("pending", &pending)
            .field("busy", &busy)
            .field("config", &self.config)
            .finish()
    }
}
