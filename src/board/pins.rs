//! GPIO |     Function      |      Notes
//! -----+-------------------+----------------------------------
//!  0   | Display D/C       | Low = command, high = data
//!  1   | Display CS        | Active low
//!  2   | SPI2 MISO         | Only the display controller answers
//!  3   | DDS2 CS           | Channel 2 synthesizer, active low
//!  4   | I2C0 SDA          | 4.7K pull-up on board
//!  5   | I2C0 SCL          | 4.7K pull-up on board
//!  6   | SPI2 SCK          |
//!  7   | SPI2 MOSI         |
//!  8   | Status LED        | Heartbeat, active high
//! 10   | DDS1 CS           | Channel 1 synthesizer, active low
//! 21   | DAC CS            | Support voltage DAC, active low

use crate::drivers::spi::LineId;

// ----- I2C0 -----
pub const I2C_SDA: u8 = 4;
pub const I2C_SCL: u8 = 5;
pub const I2C_FREQ_KHZ: u32 = 400;

// ----- I2C slave addresses -----
pub const ADDR_PORT_EXPANDER_1: u8 = 0x24;
pub const ADDR_PORT_EXPANDER_2: u8 = 0x22;
pub const ADDR_EEPROM: u8 = 0x50;
pub const ADDR_CLOCK_GENERATOR: u8 = 0x60;

// ----- SPI2 -----
pub const SPI_SCK: u8 = 6;
pub const SPI_MOSI: u8 = 7;
pub const SPI_MISO: u8 = 2;
pub const SPI_FREQ_MHZ: u32 = 10;

// ----- SPI select / command lines (index into BlockingSpi's line table) -----
pub const LINE_DDS1: LineId = 0; // GPIO10
pub const LINE_DDS2: LineId = 1; // GPIO3
pub const LINE_DISPLAY_CS: LineId = 2; // GPIO1
pub const LINE_DISPLAY_DC: LineId = 3; // GPIO0
pub const LINE_DAC: LineId = 4; // GPIO21

// ----- Status LED -----
pub const STATUS_LED: u8 = 8;
