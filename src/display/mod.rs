//! LED matrix display
//!
//! Routes (sets of hold positions with a colour) are rendered on the row/column
//! scanned matrix using software PWM. The [`engine::Display`] runs from the main
//! loop and generates run-length encoded frames into the [`fifo::FrameFifo`]. Frames
//! are consumed by [`scan::ScanOutput`] from a periodic timer interrupt which
//! drives the column and row drivers.
//!
//! Each row is lit for `max_brightness` PWM steps per scan, so the timer period is
//! recalculated whenever the set of lit rows changes to keep the scan frequency
//! constant.

pub mod conflict;
pub mod engine;
pub mod fifo;
pub mod heartbeat;
pub mod scan;

use heapless::Vec;
use rgb::RGB8;
use static_assertions as sa;

use crate::bsp::{NCOLS, NROWS};

pub use engine::Display;
pub use fifo::{Frame, FrameFifo};
pub use scan::{ScanOutput, TickTimer};

/// Full scans of the matrix per second
pub const SCAN_FREQ: u32 = 60;
/// Bits of each colour channel that are displayed
pub const COLOR_DEPTH_BITS: u32 = 5;
/// Number of PWM levels
pub const COLOR_DEPTH: usize = 1 << COLOR_DEPTH_BITS;
/// Maximum number of holds in a route
pub const ROUTE_LEN: usize = 20;
/// Number of routes that can be displayed at the same time
pub const MAX_ROUTES: usize = 8;
/// Capacity of the frame queue
pub const FIFO_LEN: usize = 32;
/// Maximum number of routes waiting for a shared hold
pub const MAX_CONFLICTS: usize = 16;
/// Length of one heartbeat cycle in seconds
pub const HEARTBEAT_PERIOD: u32 = 2;
/// Seconds between switching routes that share a hold
pub const FLASH_PERIOD: u32 = 1;
/// Frames generated by a single call to [`Display::process`]
pub const FRAMES_PER_PROCESS: usize = 3;

sa::const_assert!(COLOR_DEPTH <= u8::MAX as usize);
sa::const_assert!(MAX_ROUTES <= u8::MAX as usize);
sa::const_assert!(MAX_CONFLICTS <= u8::MAX as usize);
sa::const_assert_eq!(NROWS * NCOLS, 256);

#[derive(Clone, Copy, PartialEq, Eq, defmt::Format)]
#[cfg_attr(test, derive(Debug))]
pub enum DisplayError {
    /// Route id 0 marks free slots and cannot be shown
    InvalidId,
    /// More than [`ROUTE_LEN`] holds
    RouteTooLong,
    /// All route slots are in use
    RouteCapacity,
    /// Not enough conflict entries to register all shared holds
    ConflictCapacity,
}

/// Set of holds lit with a single colour
#[derive(Clone, PartialEq, Eq)]
#[cfg_attr(test, derive(Debug))]
pub struct Route {
    pub id: u8,
    /// Breathing effect
    pub heartbeat: bool,
    /// 8-bit colour, reduced to [`COLOR_DEPTH_BITS`] when displayed
    pub color: RGB8,
    /// Logical hold positions
    pub holds: Vec<u8, ROUTE_LEN>,
}

impl Route {
    pub fn new(id: u8, color: RGB8) -> Self {
        Self { id, heartbeat: false, color, holds: Vec::new() }
    }

    pub fn with_heartbeat(mut self, heartbeat: bool) -> Self {
        self.heartbeat = heartbeat;
        self
    }

    pub fn with_holds(mut self, holds: &[u8]) -> Result<Self, DisplayError> {
        self.holds = Vec::from_slice(holds).map_err(|_| DisplayError::RouteTooLong)?;
        Ok(self)
    }

    pub fn push_hold(&mut self, hold: u8) -> Result<(), DisplayError> {
        self.holds.push(hold).map_err(|_| DisplayError::RouteTooLong)
    }
}

/// Physical LED location in the matrix
#[derive(Clone, Copy, PartialEq, Eq, defmt::Format)]
#[cfg_attr(test, derive(Debug))]
pub struct Position {
    pub row: u8,
    pub col: u8,
}

impl Position {
    /// Single byte index, `row << 4 | col`
    pub const fn index(&self) -> u8 {
        self.row << 4 | self.col
    }

    pub const fn from_index(index: u8) -> Self {
        Self { row: index >> 4, col: index & 0xf }
    }
}

/// Map logical hold number to the LED position on the wiring harness
///
/// Odd and even logical columns are routed to alternating physical rows and the
/// upper logical half (`>= 64`) is folded in between. Arithmetic is on bytes and
/// wraps, so logical rows 12..15 land on the same LEDs as logical rows 4..7.
pub const fn translate(logical: u8) -> Position {
    let p = logical & 0xf0;
    let offset = if logical % 2 == 1 {
        if p < 64 {
            p << 1
        } else {
            ((p - 64) << 1).wrapping_add(16)
        }
    } else if p < 64 {
        (p << 1).wrapping_add(16)
    } else {
        (p - 64) << 1
    };
    Position::from_index((logical & 0xf).wrapping_add(offset))
}

/// Display side of the scan output that the engine needs to control
///
/// Implementations are shared with the timer interrupt, so the caller must
/// hold exclusive access (e.g. a lock that masks the scan interrupt).
pub trait ScanHardware {
    /// Timer ticks per PWM step
    fn set_period(&mut self, ticks: u32);

    /// Start consuming frames
    fn start(&mut self);

    /// Stop output, rows and columns are switched off on the next tick
    fn stop(&mut self);

    /// Nothing to display; blanks the columns immediately when set
    fn set_blank(&mut self, blank: bool);

    fn set_brightness(&mut self, brightness: RGB8);

    fn brightness(&self) -> RGB8;
}

/// Exclusive access to a [`ScanHardware`] shared with the scan interrupt
pub trait ScanLock {
    type Hw: ScanHardware;

    fn lock<R>(&mut self, f: impl FnOnce(&mut Self::Hw) -> R) -> R;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn translate_known_positions() {
        let cases = [
            // logical, row, col
            (0x00, 1, 0),
            (0x01, 0, 1),
            (0x02, 1, 2),
            (0x05, 0, 5),
            (0x10, 3, 0),
            (0x11, 2, 1),
            (0x40, 0, 0),
            (0x41, 1, 1),
            (0x7f, 7, 15),
            (0x80, 8, 0),
            (0x81, 9, 1),
            (0xf0, 6, 0),
            (0xff, 7, 15),
        ];
        for (logical, row, col) in cases {
            assert_eq!(translate(logical), Position { row, col }, "logical {:#04x}", logical);
        }
    }

    #[test]
    fn translate_keeps_column() {
        for logical in 0..=255u8 {
            assert_eq!(translate(logical).col, logical & 0xf);
        }
    }

    #[test]
    fn translate_lower_half_is_bijective() {
        let mut seen = [false; 256];
        for logical in 0..128u8 {
            let i = translate(logical).index() as usize;
            assert!(!seen[i], "logical {} collides", logical);
            seen[i] = true;
        }
    }

    #[test]
    fn route_length_is_limited() {
        let holds: std::vec::Vec<u8> = (0..ROUTE_LEN as u8 + 1).collect();
        let route = Route::new(1, RGB8::new(1, 2, 3));
        assert_eq!(route.clone().with_holds(&holds).unwrap_err(), DisplayError::RouteTooLong);
        assert_eq!(route.with_holds(&holds[..ROUTE_LEN]).unwrap().holds.len(), ROUTE_LEN);
    }
}
