use core::convert::Infallible;

use embedded_hal::digital::v2::OutputPin;

use crate::utils::{drive_bus, InfallibleResult};
use super::NROWS;

/// Rows are selected through a 3-bit address shared by two 8-row decoder banks
pub const ROWS_PER_BANK: usize = 8;

/// Row side of the LED matrix
pub trait RowDriver {
    /// Switch the active row, turning the previous one off first
    fn activate(&mut self, row: u8);

    /// Turn all rows off
    fn deactivate_all(&mut self);
}

/// Row decoder pair with shared address lines and a separate enable per bank
///
/// Pins are expected to be type-erased (`downgrade()`d) so that a single type
/// can be used for all of them.
pub struct RowSelect<P> {
    address: [P; 3],
    enable: [P; 2],
    selected: u8,
}

impl<P: OutputPin<Error = Infallible>> RowSelect<P> {
    pub fn new(address: [P; 3], enable: [P; 2]) -> Self {
        let mut rows = Self { address, enable, selected: 0 };
        rows.deactivate_all();
        rows
    }

    pub fn selected(&self) -> u8 {
        self.selected
    }

}

impl<P: OutputPin<Error = Infallible>> RowDriver for RowSelect<P> {
    fn activate(&mut self, row: u8) {
        debug_assert!((row as usize) < NROWS);
        self.selected = row;
        // avoid ghosting while address lines settle
        self.deactivate_all();
        drive_bus(&mut self.address, row);
        let bank = row as usize / ROWS_PER_BANK;
        self.enable[bank].set_high().infallible();
    }

    fn deactivate_all(&mut self) {
        for pin in self.enable.iter_mut() {
            pin.set_low().infallible();
        }
    }
}
