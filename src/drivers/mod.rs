// Peripheral multiplexing and device drivers, board-independent.
//
// Each module talks to hardware only through a small capability trait
// (CountdownTimer, BusDevice, SpiPort, embedded-hal pins), so the same code
// runs on the board and against the simulated peripherals in the tests.
// Pin assignments and bus wiring live in board/.

pub mod bus;
pub mod heartbeat;
pub mod i2c;
pub mod spi;
pub mod timer;

#[cfg(test)]
pub(crate) mod testing;

pub use bus::{BusConfig, BusDevice, BusError, BusManager, BusTask, Buffer, TransferStatus};
pub use heartbeat::Heartbeat;
pub use i2c::{BlockingI2c, I2cSlave};
pub use spi::{BlockingSpi, DataHandling, SpiController, SpiSlave, SpiTarget};
pub use timer::{CountdownTimer, Millis, TimerMux};
