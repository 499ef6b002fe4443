// Two-wire (I2C) devices on a BusManager
//
// An I2C bus device is any BusDevice addressed by a 7-bit address with no
// per-request framing. I2cSlave binds one address to a manager and adds the
// register-access pattern (address write, then data), and BlockingI2c
// drives such a bus from an embedded-hal blocking I2c implementation.

use alloc::vec::Vec;

use embedded_hal::i2c::I2c;
use log::debug;

use super::bus::{BusDevice, BusError, BusManager, BusTask, Buffer, Completion, TransferStatus};
use crate::kernel::TaskSink;

/// Register address width on the wire. Sent most significant byte first.
pub trait RegisterAddress: Copy {
    fn encode(self, out: &mut Vec<u8>);
}

impl RegisterAddress for u8 {
    fn encode(self, out: &mut Vec<u8>) {
        out.push(self);
    }
}

impl RegisterAddress for u16 {
    fn encode(self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_be_bytes());
    }
}

pub struct I2cSlave<'a, D, S: ?Sized, const N: usize>
where
    D: BusDevice<Target = u8, Framing = ()>,
{
    bus: &'a BusManager<'a, D, S, N>,
    address: u8,
}

impl<'a, D, S, const N: usize> I2cSlave<'a, D, S, N>
where
    D: BusDevice<Target = u8, Framing = ()>,
    S: TaskSink + ?Sized,
{
    pub const fn new(bus: &'a BusManager<'a, D, S, N>, address: u8) -> Self {
        Self { bus, address }
    }

    pub const fn address(&self) -> u8 {
        self.address
    }

    /// Write `data` (copied) to the device.
    pub fn async_write(&self, data: &[u8], callback: Option<Completion>) -> Result<(), BusError> {
        self.bus
            .async_write(self.address, data.to_vec(), None, callback)
    }

    /// Read `len` bytes straight from the device (no register address).
    pub fn async_read<F>(&self, len: usize, callback: F) -> Result<(), BusError>
    where
        F: FnOnce(Buffer) + Send + 'static,
    {
        self.bus
            .submit(BusTask::read(self.address, len).on_complete(callback))
    }

    /// Write `value` to register `reg` in a single transfer.
    pub fn async_write_register<R: RegisterAddress>(
        &self,
        reg: R,
        value: &[u8],
        callback: Option<Completion>,
    ) -> Result<(), BusError> {
        let mut frame = Vec::with_capacity(2 + value.len());
        reg.encode(&mut frame);
        frame.extend_from_slice(value);
        self.bus.async_write(self.address, frame, None, callback)
    }

    /// Read `len` bytes starting at register `reg`.
    ///
    /// Queued as an address write followed by a read, both or neither, so
    /// no other request on the bus can slip in between.
    pub fn async_read_register<R, F>(&self, reg: R, len: usize, callback: F) -> Result<(), BusError>
    where
        R: RegisterAddress,
        F: FnOnce(Buffer) + Send + 'static,
    {
        let mut addr = Vec::with_capacity(2);
        reg.encode(&mut addr);
        self.bus.submit_all([
            BusTask::write(self.address, addr),
            BusTask::read(self.address, len).on_complete(callback),
        ])
    }
}

/// Bus device over a blocking embedded-hal I2C peripheral.
///
/// The transfer happens inside `begin_*`, which hands its outcome straight
/// back to the manager.
pub struct BlockingI2c<B> {
    bus: B,
}

impl<B: I2c> BlockingI2c<B> {
    pub const fn new(bus: B) -> Self {
        Self { bus }
    }

    pub fn release(self) -> B {
        self.bus
    }

    fn status<E: embedded_hal::i2c::Error>(address: u8, result: Result<(), E>) -> TransferStatus {
        match result {
            Ok(()) => TransferStatus::Success,
            Err(e) => {
                debug!("i2c: transfer with {:#04x} failed: {:?}", address, e.kind());
                TransferStatus::Error
            }
        }
    }
}

impl<B: I2c> BusDevice for BlockingI2c<B> {
    type Target = u8;
    type Framing = ();

    fn begin_transmit(&mut self, address: u8, _: (), data: &[u8]) -> Option<TransferStatus> {
        let result = self.bus.write(address, data);
        Some(Self::status(address, result))
    }

    fn begin_receive(&mut self, address: u8, _: (), buf: &mut [u8]) -> Option<TransferStatus> {
        let result = self.bus.read(address, buf);
        Some(Self::status(address, result))
    }
}
