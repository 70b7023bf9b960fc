use core::cell::RefCell;

use critical_section::Mutex;

use crate::bsp::columns::ColumnData;
use super::FIFO_LEN;

/// Column pattern for a row, held on the outputs for `repeat + 1` timer ticks
#[derive(Clone, Copy, PartialEq, Eq, defmt::Format)]
#[cfg_attr(test, derive(Debug))]
pub struct Frame {
    pub row: u8,
    pub repeat: u8,
    pub columns: ColumnData,
}

impl Frame {
    pub const EMPTY: Self = Self { row: 0, repeat: 0, columns: ColumnData::OFF };
}

impl Default for Frame {
    fn default() -> Self {
        Self::EMPTY
    }
}

struct Ring {
    buf: [Frame; FIFO_LEN],
    head: usize,
    count: usize,
}

/// Bounded frame queue between the frame generator and the scan interrupt
///
/// Single producer, single consumer. Every access runs in a short critical
/// section, so the queue can live in a `static` shared by both sides.
pub struct FrameFifo {
    ring: Mutex<RefCell<Ring>>,
}

impl FrameFifo {
    pub const fn new() -> Self {
        Self {
            ring: Mutex::new(RefCell::new(Ring {
                buf: [Frame::EMPTY; FIFO_LEN],
                head: 0,
                count: 0,
            })),
        }
    }

    /// Append a frame, gives it back if the queue is full
    pub fn put(&self, frame: Frame) -> Result<(), Frame> {
        critical_section::with(|cs| {
            let mut ring = self.ring.borrow_ref_mut(cs);
            if ring.count == FIFO_LEN {
                return Err(frame);
            }
            let tail = (ring.head + ring.count) % FIFO_LEN;
            ring.buf[tail] = frame;
            ring.count += 1;
            Ok(())
        })
    }

    pub fn get(&self) -> Option<Frame> {
        critical_section::with(|cs| {
            let mut ring = self.ring.borrow_ref_mut(cs);
            if ring.count == 0 {
                return None;
            }
            let frame = ring.buf[ring.head];
            ring.head = (ring.head + 1) % FIFO_LEN;
            ring.count -= 1;
            Some(frame)
        })
    }

    /// Drop all pending frames
    pub fn clear(&self) {
        critical_section::with(|cs| self.ring.borrow_ref_mut(cs).count = 0);
    }

    pub fn len(&self) -> usize {
        critical_section::with(|cs| self.ring.borrow_ref(cs).count)
    }

    pub fn full(&self) -> bool {
        self.len() == FIFO_LEN
    }

    pub fn empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for FrameFifo {
    fn default() -> Self {
        Self::new()
    }
}
