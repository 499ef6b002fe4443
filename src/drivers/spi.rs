// Synchronous-serial (SPI) devices on a BusManager
//
// Every request carries a DataHandling tag. SpiController turns the tag into
// line setup before each transfer (clock phase, command/data line) and owns
// chip select around each task; SpiSlave picks the tag, buffer ownership
// and chunking per request.
//
// Select and command/data lines are numbered (LineId); the board decides
// which physical pin each number is.

use alloc::vec::Vec;

use embedded_hal::digital::{OutputPin, PinState};
use embedded_hal::spi::{Phase, SpiBus};
use log::{debug, warn};

use super::bus::{BusDevice, BusError, BusManager, BusTask, Buffer, Completion, TransferStatus};
use crate::kernel::TaskSink;

/// Bytes per transfer for synthesizer waveform data.
pub const SYNTH_WORD: usize = 4;

pub type LineId = u8;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DataHandling {
    #[default]
    Standard,
    DisplayCommand,
    DisplayData,
    SynthCommand,
    SynthData,
}

impl DataHandling {
    pub const fn phase(self) -> Phase {
        match self {
            Self::SynthCommand | Self::SynthData => Phase::CaptureOnSecondTransition,
            _ => Phase::CaptureOnFirstTransition,
        }
    }

    /// Command/data line level, for devices that have one.
    pub const fn command_line(self) -> Option<PinState> {
        match self {
            Self::DisplayCommand => Some(PinState::Low),
            Self::DisplayData => Some(PinState::High),
            _ => None,
        }
    }

    pub const fn chunk(self) -> Option<usize> {
        match self {
            Self::SynthData => Some(SYNTH_WORD),
            _ => None,
        }
    }

    /// Bulk payloads (frame buffers, waveform tables) are normally sent from
    /// static memory instead of being copied.
    pub const fn is_bulk(self) -> bool {
        matches!(self, Self::DisplayData | Self::SynthData)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpiTarget {
    pub chip_select: LineId,
    pub command_data: Option<LineId>,
}

impl SpiTarget {
    pub const fn new(chip_select: LineId) -> Self {
        Self {
            chip_select,
            command_data: None,
        }
    }

    pub const fn with_command_line(mut self, line: LineId) -> Self {
        self.command_data = Some(line);
        self
    }
}

/// SPI peripheral plus its select and command/data lines.
///
/// `begin_*` follow the [`BusDevice`] contract: `None` while the transfer
/// runs and the platform will report it to
/// [`BusManager::on_transfer_complete`], or the outcome if it is already
/// done.
pub trait SpiPort {
    fn set_phase(&mut self, phase: Phase);
    fn drive(&mut self, line: LineId, state: PinState);
    fn begin_transmit(&mut self, data: &[u8]) -> Option<TransferStatus>;
    fn begin_receive(&mut self, buf: &mut [u8]) -> Option<TransferStatus>;
}

/// Bus device for an SPI port: chip select active low around each task,
/// tag-driven line setup before every transfer.
pub struct SpiController<P> {
    port: P,
    phase: Option<Phase>,
}

impl<P: SpiPort> SpiController<P> {
    pub const fn new(port: P) -> Self {
        Self { port, phase: None }
    }

    pub fn port(&mut self) -> &mut P {
        &mut self.port
    }

    fn prepare(&mut self, target: SpiTarget, handling: DataHandling) {
        let phase = handling.phase();
        if self.phase != Some(phase) {
            self.port.set_phase(phase);
            self.phase = Some(phase);
        }
        if let (Some(line), Some(level)) = (target.command_data, handling.command_line()) {
            self.port.drive(line, level);
        }
    }
}

impl<P: SpiPort> BusDevice for SpiController<P> {
    type Target = SpiTarget;
    type Framing = DataHandling;

    fn begin_transmit(
        &mut self,
        target: SpiTarget,
        handling: DataHandling,
        data: &[u8],
    ) -> Option<TransferStatus> {
        self.prepare(target, handling);
        self.port.begin_transmit(data)
    }

    fn begin_receive(
        &mut self,
        target: SpiTarget,
        handling: DataHandling,
        buf: &mut [u8],
    ) -> Option<TransferStatus> {
        self.prepare(target, handling);
        self.port.begin_receive(buf)
    }

    fn select(&mut self, target: SpiTarget) {
        self.port.drive(target.chip_select, PinState::Low);
    }

    fn deselect(&mut self, target: SpiTarget) {
        self.port.drive(target.chip_select, PinState::High);
    }
}

pub struct SpiSlave<'a, P, S: ?Sized, const N: usize>
where
    P: SpiPort,
{
    bus: &'a BusManager<'a, SpiController<P>, S, N>,
    target: SpiTarget,
}

impl<'a, P, S, const N: usize> SpiSlave<'a, P, S, N>
where
    P: SpiPort,
    S: TaskSink + ?Sized,
{
    pub const fn new(bus: &'a BusManager<'a, SpiController<P>, S, N>, target: SpiTarget) -> Self {
        Self { bus, target }
    }

    pub const fn target(&self) -> SpiTarget {
        self.target
    }

    /// Send a copy of `data`.
    pub fn async_write(
        &self,
        data: &[u8],
        handling: DataHandling,
        callback: Option<Completion>,
    ) -> Result<(), BusError> {
        if handling.is_bulk() {
            debug!("spi: copying {} bytes of {:?}", data.len(), handling);
        }
        self.submit(BusTask::write(self.target, data.to_vec()), handling, callback)
    }

    /// Send `data` in place; it is handed back to the callback.
    pub fn async_write_static(
        &self,
        data: &'static [u8],
        handling: DataHandling,
        callback: Option<Completion>,
    ) -> Result<(), BusError> {
        self.submit(BusTask::write(self.target, data), handling, callback)
    }

    pub fn async_read<F>(&self, len: usize, handling: DataHandling, callback: F) -> Result<(), BusError>
    where
        F: FnOnce(Buffer) + Send + 'static,
    {
        let task = BusTask::read(self.target, len).on_complete(callback);
        self.submit(task, handling, None)
    }

    fn submit(
        &self,
        mut task: BusTask<SpiTarget, DataHandling>,
        handling: DataHandling,
        callback: Option<Completion>,
    ) -> Result<(), BusError> {
        task = task.framing(handling);
        if let Some(size) = handling.chunk() {
            task = task.chunked(size);
        }
        if let Some(callback) = callback {
            task = task.on_complete(callback);
        }
        self.bus.submit(task)
    }
}

/// Switches the peripheral's clock phase (mode changes are not part of the
/// embedded-hal traits).
pub type PhaseControl<B> = fn(&mut B, Phase);

/// SPI port over a blocking embedded-hal bus and output pins.
///
/// Like [`BlockingI2c`](super::i2c::BlockingI2c), the transfer completes
/// inside `begin_*` and its outcome goes straight back to the manager.
pub struct BlockingSpi<B, O> {
    bus: B,
    lines: Vec<O>,
    phase_control: Option<PhaseControl<B>>,
}

impl<B: SpiBus, O: OutputPin> BlockingSpi<B, O> {
    pub const fn new(bus: B, lines: Vec<O>) -> Self {
        Self {
            bus,
            lines,
            phase_control: None,
        }
    }

    pub fn with_phase_control(mut self, control: PhaseControl<B>) -> Self {
        self.phase_control = Some(control);
        self
    }

    pub fn release(self) -> (B, Vec<O>) {
        (self.bus, self.lines)
    }

    fn status<E: embedded_hal::spi::Error>(result: Result<(), E>) -> TransferStatus {
        match result {
            Ok(()) => TransferStatus::Success,
            Err(e) => {
                debug!("spi: transfer failed: {:?}", e.kind());
                TransferStatus::Error
            }
        }
    }
}

impl<B: SpiBus, O: OutputPin> SpiPort for BlockingSpi<B, O> {
    fn set_phase(&mut self, phase: Phase) {
        if let Some(control) = self.phase_control {
            control(&mut self.bus, phase);
        }
    }

    fn drive(&mut self, line: LineId, state: PinState) {
        let Some(pin) = self.lines.get_mut(usize::from(line)) else {
            warn!("spi: no output line {}", line);
            return;
        };
        if pin.set_state(state).is_err() {
            warn!("spi: failed to drive line {}", line);
        }
    }

    fn begin_transmit(&mut self, data: &[u8]) -> Option<TransferStatus> {
        let result = self.bus.write(data).and_then(|()| self.bus.flush());
        Some(Self::status(result))
    }

    fn begin_receive(&mut self, buf: &mut [u8]) -> Option<TransferStatus> {
        let result = self.bus.read(buf).and_then(|()| self.bus.flush());
        Some(Self::status(result))
    }
}

#[cfg(test)]
mod tests {
    use super::{
        BlockingSpi, DataHandling, LineId, SpiController, SpiPort, SpiSlave, SpiTarget,
    };
    use crate::drivers::bus::{BusManager, Buffer, TransferStatus, on_done};
    use crate::kernel::Scheduler;
    use core::convert::Infallible;
    use embedded_hal::digital::{ErrorType as PinErrorType, OutputPin, PinState};
    use embedded_hal::spi::{ErrorKind, ErrorType, Phase, SpiBus};
    use std::sync::{Arc, Mutex};
    use std::vec::Vec;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Op {
        Phase(Phase),
        Drive(LineId, PinState),
        Tx(Vec<u8>),
        Rx(usize),
    }

    #[derive(Clone, Default)]
    struct SimPort(Arc<Mutex<Vec<Op>>>);

    impl SimPort {
        fn ops(&self) -> Vec<Op> {
            self.0.lock().unwrap().clone()
        }
    }

    impl SpiPort for SimPort {
        fn set_phase(&mut self, phase: Phase) {
            self.0.lock().unwrap().push(Op::Phase(phase));
        }
        fn drive(&mut self, line: LineId, state: PinState) {
            self.0.lock().unwrap().push(Op::Drive(line, state));
        }
        fn begin_transmit(&mut self, data: &[u8]) -> Option<TransferStatus> {
            self.0.lock().unwrap().push(Op::Tx(data.to_vec()));
            None
        }
        fn begin_receive(&mut self, buf: &mut [u8]) -> Option<TransferStatus> {
            buf.fill(0xC3);
            self.0.lock().unwrap().push(Op::Rx(buf.len()));
            None
        }
    }

    type Manager = BusManager<'static, SpiController<SimPort>, Scheduler<8>, 8>;

    fn rig() -> (SimPort, &'static Scheduler<8>, &'static Manager) {
        let port = SimPort::default();
        let sched: &'static Scheduler<8> = Box::leak(Box::new(Scheduler::new()));
        let mgr = Box::leak(Box::new(BusManager::new(SpiController::new(port.clone()), sched)));
        (port, sched, mgr)
    }

    const CS: LineId = 0;
    const DC: LineId = 1;

    #[test]
    fn display_command_then_data_drive_the_dc_line() {
        static FRAME: [u8; 6] = [0xFF; 6];
        let (port, _sched, mgr) = rig();
        let panel = SpiSlave::new(mgr, SpiTarget::new(CS).with_command_line(DC));

        panel
            .async_write(&[0x24], DataHandling::DisplayCommand, None)
            .unwrap();
        panel
            .async_write_static(&FRAME, DataHandling::DisplayData, None)
            .unwrap();
        mgr.on_transfer_complete(TransferStatus::Success);
        mgr.on_transfer_complete(TransferStatus::Success);

        assert_eq!(
            port.ops(),
            vec![
                Op::Drive(CS, PinState::Low),
                Op::Phase(Phase::CaptureOnFirstTransition),
                Op::Drive(DC, PinState::Low),
                Op::Tx(vec![0x24]),
                Op::Drive(CS, PinState::High),
                Op::Drive(CS, PinState::Low),
                Op::Drive(DC, PinState::High),
                Op::Tx(vec![0xFF; 6]),
                Op::Drive(CS, PinState::High),
            ]
        );
        assert!(!mgr.is_busy());
    }

    #[test]
    fn synth_data_goes_out_in_words_under_one_select() {
        static WAVE: [u8; 8] = [1, 2, 3, 4, 5, 6, 7, 8];
        let (port, sched, mgr) = rig();
        let synth = SpiSlave::new(mgr, SpiTarget::new(2));
        let back = Arc::new(Mutex::new(None));

        let b = back.clone();
        synth
            .async_write_static(
                &WAVE,
                DataHandling::SynthData,
                on_done(move |buf| *b.lock().unwrap() = Some(buf)),
            )
            .unwrap();
        mgr.on_transfer_complete(TransferStatus::Success);
        mgr.on_transfer_complete(TransferStatus::Success);
        sched.run_until_idle();

        assert_eq!(
            port.ops(),
            vec![
                Op::Drive(2, PinState::Low),
                Op::Phase(Phase::CaptureOnSecondTransition),
                Op::Tx(vec![1, 2, 3, 4]),
                Op::Tx(vec![5, 6, 7, 8]),
                Op::Drive(2, PinState::High),
            ]
        );
        assert_eq!(*back.lock().unwrap(), Some(Buffer::Static(&WAVE)));
    }

    #[test]
    fn phase_is_only_switched_when_it_changes() {
        let (port, _sched, mgr) = rig();
        let dev = SpiSlave::new(mgr, SpiTarget::new(CS));
        dev.async_write(&[1], DataHandling::Standard, None).unwrap();
        dev.async_write(&[2], DataHandling::Standard, None).unwrap();
        dev.async_write(&[3], DataHandling::SynthCommand, None)
            .unwrap();
        for _ in 0..3 {
            mgr.on_transfer_complete(TransferStatus::Success);
        }

        let phases: Vec<Op> = port
            .ops()
            .into_iter()
            .filter(|op| matches!(op, Op::Phase(_)))
            .collect();
        assert_eq!(
            phases,
            vec![
                Op::Phase(Phase::CaptureOnFirstTransition),
                Op::Phase(Phase::CaptureOnSecondTransition),
            ]
        );
    }

    #[test]
    fn read_returns_clocked_in_bytes() {
        let (port, sched, mgr) = rig();
        let dev = SpiSlave::new(mgr, SpiTarget::new(CS));
        let got = Arc::new(Mutex::new(None));

        let g = got.clone();
        dev.async_read(2, DataHandling::Standard, move |b| {
            *g.lock().unwrap() = Some(b)
        })
        .unwrap();
        mgr.on_transfer_complete(TransferStatus::Success);
        sched.run_until_idle();

        assert!(port.ops().contains(&Op::Rx(2)));
        assert_eq!(*got.lock().unwrap(), Some(Buffer::Owned(vec![0xC3, 0xC3])));
    }

    #[test]
    fn data_handling_table() {
        assert_eq!(DataHandling::default(), DataHandling::Standard);
        assert_eq!(DataHandling::SynthData.chunk(), Some(4));
        assert_eq!(DataHandling::DisplayData.chunk(), None);
        assert_eq!(DataHandling::Standard.command_line(), None);
        assert!(DataHandling::DisplayData.is_bulk());
        assert!(!DataHandling::DisplayCommand.is_bulk());
    }

    // blocking adapter

    #[derive(Default)]
    struct FakeSpi {
        written: Vec<u8>,
        fail_next: bool,
        mode: Option<Phase>,
    }

    impl ErrorType for FakeSpi {
        type Error = ErrorKind;
    }

    impl SpiBus for FakeSpi {
        fn read(&mut self, words: &mut [u8]) -> Result<(), ErrorKind> {
            words.fill(0x11);
            Ok(())
        }
        fn write(&mut self, words: &[u8]) -> Result<(), ErrorKind> {
            if core::mem::take(&mut self.fail_next) {
                return Err(ErrorKind::Overrun);
            }
            self.written.extend_from_slice(words);
            Ok(())
        }
        fn transfer(&mut self, read: &mut [u8], write: &[u8]) -> Result<(), ErrorKind> {
            self.write(write)?;
            self.read(read)
        }
        fn transfer_in_place(&mut self, words: &mut [u8]) -> Result<(), ErrorKind> {
            self.read(words)
        }
        fn flush(&mut self) -> Result<(), ErrorKind> {
            Ok(())
        }
    }

    #[derive(Clone, Copy, Default, Debug, PartialEq)]
    struct FakePin(Option<bool>);

    impl PinErrorType for FakePin {
        type Error = Infallible;
    }

    impl OutputPin for FakePin {
        fn set_low(&mut self) -> Result<(), Infallible> {
            self.0 = Some(false);
            Ok(())
        }
        fn set_high(&mut self) -> Result<(), Infallible> {
            self.0 = Some(true);
            Ok(())
        }
    }

    #[test]
    fn blocking_port_drives_lines_and_reports() {
        let mut port = BlockingSpi::new(
            FakeSpi::default(),
            vec![FakePin::default(), FakePin::default()],
        )
        .with_phase_control(|bus, phase| bus.mode = Some(phase));

        port.set_phase(Phase::CaptureOnSecondTransition);
        port.drive(1, PinState::Low);
        port.drive(7, PinState::High);
        let first = port.begin_transmit(&[1, 2]);
        port.bus.fail_next = true;
        let second = port.begin_transmit(&[3]);
        let mut buf = [0u8; 2];
        let third = port.begin_receive(&mut buf);

        assert_eq!(buf, [0x11; 2]);
        assert_eq!(
            [first, second, third],
            [
                Some(TransferStatus::Success),
                Some(TransferStatus::Error),
                Some(TransferStatus::Success)
            ]
        );
        let (bus, lines) = port.release();
        assert_eq!(bus.written, vec![1, 2]);
        assert_eq!(bus.mode, Some(Phase::CaptureOnSecondTransition));
        assert_eq!(lines, vec![FakePin(None), FakePin(Some(false))]);
    }

    #[test]
    fn blocking_display_write_releases_select_at_once() {
        let sched: &'static Scheduler<8> = Box::leak(Box::new(Scheduler::new()));
        let port = BlockingSpi::new(FakeSpi::default(), vec![FakePin::default(); 2]);
        let mgr: BusManager<'static, SpiController<BlockingSpi<FakeSpi, FakePin>>, Scheduler<8>, 4> =
            BusManager::new(SpiController::new(port), sched);
        let panel = SpiSlave::new(&mgr, SpiTarget::new(CS).with_command_line(DC));

        panel
            .async_write(&[0x24], DataHandling::DisplayCommand, None)
            .unwrap();
        panel
            .async_write(&[0xAA, 0x55], DataHandling::DisplayData, None)
            .unwrap();

        assert!(!mgr.is_busy());
        assert_eq!(sched.pending(), 0);
        let (written, lines) = mgr.with_device(|c| {
            let port = c.port();
            (port.bus.written.clone(), port.lines.clone())
        });
        assert_eq!(written, vec![0x24, 0xAA, 0x55]);
        assert_eq!(lines, vec![FakePin(Some(true)), FakePin(Some(true))]);
    }
}
