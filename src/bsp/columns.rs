use core::convert::Infallible;

use bitfield::{bitfield, Bit, BitMut};
use embedded_hal::blocking::spi::Write;
use embedded_hal::digital::v2::OutputPin;
use rgb::RGB8;
use static_assertions as sa;

use crate::utils::InfallibleResult;
use super::NCOLS;

/// Columns handled by a single TLC5952
pub const COLS_PER_DRIVER: usize = 8;
/// Number of chained drivers
pub const NDRIVERS: usize = NCOLS / COLS_PER_DRIVER;

/// Value of bits 24..31 that selects the control latch
const CMD_CONTROL: u32 = 0xff;
/// Global brightness is a 7-bit current setting per colour
const BRIGHTNESS_MASK: u8 = 0x7f;

/// Current limit that gives 20 mA per colour
///
/// Full scale is 35 mA for red/green and 26.3 mA for blue at the
/// reference resistor used on the board.
pub const MAX_CURRENT: RGB8 = RGB8 { r: 72, g: 72, b: 96 };

sa::const_assert_eq!(NCOLS % COLS_PER_DRIVER, 0);
sa::const_assert_eq!(NDRIVERS, 2);

/// LED colour channel of a column
#[derive(Clone, Copy, PartialEq, Eq, defmt::Format)]
#[cfg_attr(test, derive(Debug))]
pub enum Color {
    Red = 0,
    Green = 1,
    Blue = 2,
}

impl Color {
    pub const ALL: [Color; 3] = [Color::Red, Color::Green, Color::Blue];
}

/// On/off pattern of all column channels, one data word per driver
///
/// Driver `col / 8` holds the column, its channel bit is `(col % 8) * 3 + color`.
/// Bit 24 of a data word must stay 0 to select the on/off latch.
#[derive(Clone, Copy, Default, PartialEq, Eq, defmt::Format)]
#[cfg_attr(test, derive(Debug))]
pub struct ColumnData(pub [u32; NDRIVERS]);

impl ColumnData {
    pub const OFF: Self = Self([0; NDRIVERS]);

    const fn position(col: usize, color: Color) -> (usize, usize) {
        (col / COLS_PER_DRIVER, (col % COLS_PER_DRIVER) * 3 + color as usize)
    }

    pub fn set(&mut self, col: usize, color: Color) {
        debug_assert!(col < NCOLS);
        let (word, bit) = Self::position(col, color);
        self.0[word].set_bit(bit, true);
    }

    pub fn clear(&mut self, col: usize, color: Color) {
        debug_assert!(col < NCOLS);
        let (word, bit) = Self::position(col, color);
        self.0[word].set_bit(bit, false);
    }

    pub fn get(&self, col: usize, color: Color) -> bool {
        let (word, bit) = Self::position(col, color);
        self.0[word].bit(bit)
    }

    pub fn is_off(&self) -> bool {
        self == &Self::OFF
    }

    /// Data word shifted into given driver
    pub fn word(&self, driver: usize) -> u32 {
        self.0[driver]
    }
}

bitfield! {
    /// TLC5952 control word with the global brightness of each colour
    #[derive(Clone, Copy, PartialEq, Eq)]
    pub struct ControlWord(u32);
    impl Debug;
    u8;
    pub red, set_red: 6, 0;
    pub green, set_green: 13, 7;
    pub blue, set_blue: 20, 14;
    pub command, set_command: 31, 24;
}

impl ControlWord {
    pub fn new(brightness: RGB8) -> Self {
        let mut word = Self(0);
        word.set_red(brightness.r & BRIGHTNESS_MASK);
        word.set_green(brightness.g & BRIGHTNESS_MASK);
        word.set_blue(brightness.b & BRIGHTNESS_MASK);
        word.set_command(CMD_CONTROL as u8);
        word
    }
}

/// Column side of the LED matrix
pub trait ColumnDriver {
    type Error;

    /// Shift out new column pattern and latch it
    fn transmit(&mut self, columns: &ColumnData) -> Result<(), Self::Error>;

    /// Set global current of each colour
    fn set_brightness(&mut self, brightness: RGB8) -> Result<(), Self::Error>;

    /// Last configured global brightness
    fn brightness(&self) -> RGB8;

    /// Turn all columns off
    fn blank(&mut self) -> Result<(), Self::Error> {
        self.transmit(&ColumnData::OFF)
    }
}

/// Single TLC5952 on a 16-bit SPI bus with a dedicated latch pin
pub struct Tlc5952<SPI, LAT> {
    spi: SPI,
    latch: LAT,
}

impl<SPI, LAT> Tlc5952<SPI, LAT>
where
    SPI: Write<u16>,
    LAT: OutputPin<Error = Infallible>,
{
    pub fn new(spi: SPI, mut latch: LAT) -> Self {
        latch.set_low().infallible();
        Self { spi, latch }
    }

    /// Send 32-bit word (high half first); the top 7 bits fall off the 25-bit register
    fn shift(&mut self, word: u32) -> Result<(), SPI::Error> {
        self.spi.write(&[(word >> 16) as u16, word as u16])?;
        self.latch.set_high().infallible();
        self.latch.set_low().infallible();
        Ok(())
    }

    pub fn free(self) -> (SPI, LAT) {
        (self.spi, self.latch)
    }
}

/// Both column drivers: columns 0..8 on the first, 8..16 on the second
pub struct ColumnChain<S0, L0, S1, L1> {
    low: Tlc5952<S0, L0>,
    high: Tlc5952<S1, L1>,
    brightness: RGB8,
}

impl<S0, L0, S1, L1> ColumnChain<S0, L0, S1, L1>
where
    S0: Write<u16>,
    S1: Write<u16, Error = S0::Error>,
    L0: OutputPin<Error = Infallible>,
    L1: OutputPin<Error = Infallible>,
{
    /// Configure default brightness and leave all columns off
    pub fn new(low: Tlc5952<S0, L0>, high: Tlc5952<S1, L1>) -> Result<Self, S0::Error> {
        let mut chain = Self { low, high, brightness: MAX_CURRENT };
        chain.set_brightness(MAX_CURRENT)?;
        chain.blank()?;
        Ok(chain)
    }

    pub fn free(self) -> (Tlc5952<S0, L0>, Tlc5952<S1, L1>) {
        (self.low, self.high)
    }
}

impl<S0, L0, S1, L1> ColumnDriver for ColumnChain<S0, L0, S1, L1>
where
    S0: Write<u16>,
    S1: Write<u16, Error = S0::Error>,
    L0: OutputPin<Error = Infallible>,
    L1: OutputPin<Error = Infallible>,
{
    type Error = S0::Error;

    fn transmit(&mut self, columns: &ColumnData) -> Result<(), Self::Error> {
        self.low.shift(columns.word(0))?;
        self.high.shift(columns.word(1))
    }

    fn set_brightness(&mut self, brightness: RGB8) -> Result<(), Self::Error> {
        let word = ControlWord::new(brightness).0;
        self.low.shift(word)?;
        self.high.shift(word)?;
        self.brightness = RGB8::new(
            brightness.r & BRIGHTNESS_MASK,
            brightness.g & BRIGHTNESS_MASK,
            brightness.b & BRIGHTNESS_MASK,
        );
        Ok(())
    }

    fn brightness(&self) -> RGB8 {
        self.brightness
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use std::vec::Vec;

    /// Records everything sent to the columns
    #[derive(Default)]
    pub struct ColumnsMock {
        pub frames: Vec<ColumnData>,
        pub blanks: usize,
        pub brightness: Option<RGB8>,
    }

    impl ColumnDriver for ColumnsMock {
        type Error = Infallible;

        fn transmit(&mut self, columns: &ColumnData) -> Result<(), Self::Error> {
            if columns.is_off() {
                self.blanks += 1;
            }
            self.frames.push(*columns);
            Ok(())
        }

        fn set_brightness(&mut self, brightness: RGB8) -> Result<(), Self::Error> {
            self.brightness = Some(brightness);
            Ok(())
        }

        fn brightness(&self) -> RGB8 {
            self.brightness.unwrap_or(MAX_CURRENT)
        }
    }
}
