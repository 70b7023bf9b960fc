use rgb::RGB8;

use crate::bsp::columns::ColumnDriver;
use crate::bsp::counters::Counter;
use crate::bsp::rows::RowDriver;
use super::fifo::FrameFifo;
use super::{ScanHardware, ScanLock};

/// Periodic timer that paces the scan
pub trait TickTimer {
    fn set_period(&mut self, ticks: u32);
    fn start(&mut self);
    fn stop(&mut self);
}

#[derive(Clone, Copy, Default, PartialEq, Eq, defmt::Format)]
#[cfg_attr(test, derive(Debug))]
pub struct ScanCounters {
    /// Ticks without a frame available
    pub misses: Counter,
    /// Failed column transmissions
    pub bus_errors: Counter,
}

/// Frame consumer driving the LED matrix from the timer interrupt
pub struct ScanOutput<'a, C, R, T> {
    fifo: &'a FrameFifo,
    columns: C,
    rows: R,
    timer: T,
    enabled: bool,
    blank: bool,
    repeat: u8,
    active_row: Option<u8>,
    counters: ScanCounters,
}

impl<'a, C, R, T> ScanOutput<'a, C, R, T>
where
    C: ColumnDriver,
    R: RowDriver,
    T: TickTimer,
{
    pub fn new(fifo: &'a FrameFifo, columns: C, mut rows: R, timer: T) -> Self {
        rows.deactivate_all();
        Self {
            fifo,
            columns,
            rows,
            timer,
            enabled: false,
            blank: true,
            repeat: 0,
            active_row: None,
            counters: ScanCounters::default(),
        }
    }

    /// Handle a timer tick
    pub fn on_tick(&mut self) {
        if !self.enabled {
            self.rows.deactivate_all();
            self.blank_columns();
            self.timer.stop();
            return;
        }

        if self.blank {
            return;
        }

        if self.repeat > 0 {
            self.repeat -= 1;
            return;
        }

        match self.fifo.get() {
            Some(frame) => {
                if self.columns.transmit(&frame.columns).is_err() {
                    self.counters.bus_errors.inc();
                }
                if self.active_row != Some(frame.row) {
                    self.rows.activate(frame.row);
                    self.active_row = Some(frame.row);
                }
                self.repeat = frame.repeat;
            },
            // keep current output for another tick
            None => self.counters.misses.inc(),
        }
    }

    pub fn counters(&self) -> ScanCounters {
        self.counters
    }

    /// Take counters, resetting them
    pub fn pop_counters(&mut self) -> ScanCounters {
        let counters = self.counters;
        self.counters = ScanCounters::default();
        counters
    }

    pub fn free(self) -> (C, R, T) {
        (self.columns, self.rows, self.timer)
    }

    fn blank_columns(&mut self) {
        if self.columns.blank().is_err() {
            self.counters.bus_errors.inc();
        }
    }
}

impl<'a, C, R, T> ScanHardware for ScanOutput<'a, C, R, T>
where
    C: ColumnDriver,
    R: RowDriver,
    T: TickTimer,
{
    fn set_period(&mut self, ticks: u32) {
        self.timer.set_period(ticks);
    }

    fn start(&mut self) {
        self.enabled = true;
        self.repeat = 0;
        self.active_row = None;
        self.timer.start();
    }

    fn stop(&mut self) {
        self.enabled = false;
    }

    fn set_blank(&mut self, blank: bool) {
        self.blank = blank;
        if blank {
            self.blank_columns();
        }
    }

    fn set_brightness(&mut self, brightness: RGB8) {
        if self.columns.set_brightness(brightness).is_err() {
            defmt::warn!("Setting brightness failed");
            self.counters.bus_errors.inc();
        }
    }

    fn brightness(&self) -> RGB8 {
        self.columns.brightness()
    }
}

/// Direct access for an output that is not shared with a running interrupt
impl<'a, C, R, T> ScanLock for ScanOutput<'a, C, R, T>
where
    C: ColumnDriver,
    R: RowDriver,
    T: TickTimer,
{
    type Hw = Self;

    fn lock<F>(&mut self, f: impl FnOnce(&mut Self) -> F) -> F {
        f(self)
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use super::*;

    #[derive(Default)]
    pub struct TimerMock {
        pub period: Option<u32>,
        pub running: bool,
    }

    impl TickTimer for TimerMock {
        fn set_period(&mut self, ticks: u32) {
            self.period = Some(ticks);
        }

        fn start(&mut self) {
            self.running = true;
        }

        fn stop(&mut self) {
            self.running = false;
        }
    }
}
