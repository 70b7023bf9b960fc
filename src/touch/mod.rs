//! Capacitive touch sensing
//!
//! Each electrode is charged with a constant current for a fixed time and the
//! resulting voltage is sampled by the ADC. A finger adds capacitance and lowers
//! the sample. [`acquisition::Acquisition`] runs in interrupts and scans all channels
//! in rounds, the finished rounds are handed over through a [`SampleMailbox`] to the
//! [`filter::TouchFilter`] running in the main loop, which tracks the untouched
//! baseline and reports debounced events to a [`TouchEvents`] implementation.

pub mod acquisition;
pub mod filter;

use core::cell::RefCell;

use critical_section::Mutex;

use crate::bsp::counters::Counter;
use crate::bsp::NCHANNELS;

pub use acquisition::{Acquisition, TouchFrontEnd};
pub use filter::TouchFilter;

/// Drop below baseline that counts as a touch
pub const THRESHOLD: i32 = 100;
/// Consecutive rounds above threshold to confirm a press
pub const PRESS_COUNT: u8 = 3;
/// Consecutive rounds below threshold to confirm a release
pub const RELEASE_COUNT: u8 = 3;
/// Rounds used to establish the baseline before detection starts
pub const WARMUP_ROUNDS: u16 = 32;

/// One sample per channel
pub type Samples = [u16; NCHANNELS];

/// Bit per channel
pub type ChannelMask = u32;

/// Receiver of debounced touch events
pub trait TouchEvents {
    fn on_press(&mut self, channel: u8);

    fn on_release(&mut self, channel: u8);

    /// Contact level of a held channel changed
    fn on_level(&mut self, _channel: u8, _level: u8) {}
}

impl<T: TouchEvents> TouchEvents for &mut T {
    fn on_press(&mut self, channel: u8) {
        (**self).on_press(channel)
    }

    fn on_release(&mut self, channel: u8) {
        (**self).on_release(channel)
    }

    fn on_level(&mut self, channel: u8, level: u8) {
        (**self).on_level(channel, level)
    }
}

/// Discards all events
pub struct NoEvents;

impl TouchEvents for NoEvents {
    fn on_press(&mut self, _channel: u8) {}
    fn on_release(&mut self, _channel: u8) {}
}

struct Slot {
    samples: Samples,
    fresh: bool,
    overruns: Counter,
}

/// Hands finished rounds from the acquisition interrupt to the main loop
///
/// Holds at most one round, a round that was not taken in time is replaced.
pub struct SampleMailbox {
    slot: Mutex<RefCell<Slot>>,
}

impl SampleMailbox {
    pub const fn new() -> Self {
        Self {
            slot: Mutex::new(RefCell::new(Slot {
                samples: [0; NCHANNELS],
                fresh: false,
                overruns: Counter::new(),
            })),
        }
    }

    pub fn publish(&self, samples: &Samples) {
        critical_section::with(|cs| {
            let mut slot = self.slot.borrow_ref_mut(cs);
            if slot.fresh {
                slot.overruns.inc();
            }
            slot.samples = *samples;
            slot.fresh = true;
        })
    }

    /// Take the latest round if it has not been taken yet
    pub fn take(&self) -> Option<Samples> {
        critical_section::with(|cs| {
            let mut slot = self.slot.borrow_ref_mut(cs);
            if !slot.fresh {
                return None;
            }
            slot.fresh = false;
            Some(slot.samples)
        })
    }

    /// Rounds replaced before being taken
    pub fn pop_overruns(&self) -> u16 {
        critical_section::with(|cs| self.slot.borrow_ref_mut(cs).overruns.pop())
    }
}

impl Default for SampleMailbox {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mailbox_takes_once() {
        let mb = SampleMailbox::new();
        assert_eq!(mb.take(), None);
        mb.publish(&[7; NCHANNELS]);
        assert_eq!(mb.take(), Some([7; NCHANNELS]));
        assert_eq!(mb.take(), None);
        assert_eq!(mb.pop_overruns(), 0);
    }

    #[test]
    fn mailbox_keeps_latest() {
        let mb = SampleMailbox::new();
        mb.publish(&[1; NCHANNELS]);
        mb.publish(&[2; NCHANNELS]);
        assert_eq!(mb.take(), Some([2; NCHANNELS]));
        assert_eq!(mb.pop_overruns(), 1);
        assert_eq!(mb.pop_overruns(), 0);
    }
}
