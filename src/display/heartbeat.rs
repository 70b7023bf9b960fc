use super::{COLOR_DEPTH, HEARTBEAT_PERIOD, SCAN_FREQ};

/// Number of scans in a single heartbeat cycle
const CYCLE: u32 = HEARTBEAT_PERIOD * SCAN_FREQ;

/// Triangular intensity envelope of heartbeat routes
///
/// Advanced once per full scan. Level rises from 1 to [`COLOR_DEPTH`] during the
/// first half of the cycle and falls back symmetrically.
#[derive(Clone, Copy, PartialEq, Eq, defmt::Format)]
#[cfg_attr(test, derive(Debug))]
pub struct Heartbeat {
    count: u32,
    level: u8,
}

impl Heartbeat {
    pub const fn new() -> Self {
        Self { count: 0, level: Self::level_at(0) }
    }

    const fn level_at(count: u32) -> u8 {
        let depth = COLOR_DEPTH as u32;
        let level = if count >= CYCLE / 2 {
            depth * (CYCLE - count - 1) * 2 / CYCLE + 1
        } else {
            depth * count * 2 / CYCLE + 1
        };
        level as u8
    }

    pub fn advance(&mut self) {
        self.count = (self.count + 1) % CYCLE;
        self.level = Self::level_at(self.count);
    }

    pub fn level(&self) -> u8 {
        self.level
    }

    /// Apply envelope to a colour channel intensity
    pub fn scale(&self, intensity: u8) -> u8 {
        (intensity as u32 * self.level as u32 / COLOR_DEPTH as u32) as u8
    }
}

impl Default for Heartbeat {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::vec::Vec;

    fn cycle() -> Vec<u8> {
        let mut hb = Heartbeat::new();
        let mut levels = vec![hb.level()];
        for _ in 1..CYCLE {
            hb.advance();
            levels.push(hb.level());
        }
        levels
    }

    #[test]
    fn level_range() {
        let levels = cycle();
        assert_eq!(*levels.iter().min().unwrap(), 1);
        assert_eq!(*levels.iter().max().unwrap() as usize, COLOR_DEPTH);
    }

    #[test]
    fn symmetric_triangle() {
        let levels = cycle();
        let n = levels.len();
        for i in 0..n {
            assert_eq!(levels[i], levels[n - 1 - i], "at {}", i);
        }
        for w in levels[..n / 2].windows(2) {
            assert!(w[0] <= w[1]);
        }
    }

    #[test]
    fn periodic() {
        let mut hb = Heartbeat::new();
        let first = cycle();
        for round in 0..3 {
            for (i, expected) in first.iter().enumerate() {
                assert_eq!(hb.level(), *expected, "round {} step {}", round, i);
                hb.advance();
            }
        }
    }

    #[test]
    fn scaling() {
        let mut hb = Heartbeat::new();
        assert_eq!(hb.scale(31), 0);
        while hb.level() as usize != COLOR_DEPTH {
            hb.advance();
        }
        assert_eq!(hb.scale(31), 31);
        assert_eq!(hb.scale(0), 0);
    }
}
