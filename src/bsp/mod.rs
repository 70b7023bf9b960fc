//! Board support package
//!
//! Board geometry and the drivers for the peripherals located on the board:
//! TLC5952 column drivers, row decoder, non-volatile hold map storage and
//! the touch channel wiring. Drivers are written against `embedded-hal`
//! traits so that the same code runs on the MCU and in host tests.

pub mod channels;
pub mod columns;
pub mod counters;
pub mod nvm;
pub mod rows;

use static_assertions as sa;

/// Core clock feeding the scan timer
pub const CLOCK_FREQUENCY: u32 = 48_000_000;

/// LED matrix rows (driven by the row decoder)
pub const NROWS: usize = 16;
/// LED matrix columns (two TLC5952 drivers, 8 RGB columns each)
pub const NCOLS: usize = 16;
/// Number of physical hold positions on the wall
pub const NHOLDS: usize = NROWS * NCOLS;

/// Number of capacitive touch channels wired on the board
pub const NCHANNELS: usize = 22;

// Hold positions are addressed with a single byte
sa::const_assert!(NHOLDS <= 256);
// Touched channels are reported as a bitmask
sa::const_assert!(NCHANNELS <= 32);
