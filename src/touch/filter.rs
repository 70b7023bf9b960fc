use crate::bsp::NCHANNELS;
use super::{ChannelMask, Samples, TouchEvents};
use super::{PRESS_COUNT, RELEASE_COUNT, THRESHOLD, WARMUP_ROUNDS};

type Fix = fixed::types::I17F15;

/// Depth of the slow average used for contact level
const LONG_AVG_DEPTH: i32 = 64;
/// Weight of a new sample in the fast filter is `1 / FAST_DIV`
const FAST_DIV: i32 = 4;
/// Drop of the slow average relative to baseline, in percent, for each contact level
const LEVEL_PERCENT: [u8; 6] = [10, 20, 35, 50, 65, 80];

/// Detection state of a single channel
#[derive(Clone, Copy, Default, PartialEq, Eq, defmt::Format)]
#[cfg_attr(test, derive(Debug))]
pub struct ChannelState {
    raw: u16,
    filtered: i32,
    baseline: i32,
    hits: u8,
    misses: u8,
    /// Slow average scaled by its depth
    long_acc: i32,
    pressed: bool,
    level: u8,
}

impl ChannelState {
    fn init(&mut self, baseline: i32) {
        *self = Self {
            raw: baseline as u16,
            filtered: baseline,
            baseline,
            long_acc: baseline * LONG_AVG_DEPTH,
            ..Default::default()
        };
    }

    pub fn raw(&self) -> u16 {
        self.raw
    }

    pub fn filtered(&self) -> i32 {
        self.filtered
    }

    pub fn baseline(&self) -> i32 {
        self.baseline
    }

    /// How far the filtered sample is below baseline
    pub fn delta(&self) -> i32 {
        self.baseline - self.filtered
    }

    pub fn pressed(&self) -> bool {
        self.pressed
    }

    pub fn level(&self) -> u8 {
        self.level
    }

    fn long_avg(&self) -> i32 {
        self.long_acc / LONG_AVG_DEPTH
    }

    /// Number of level thresholds exceeded by the slow average
    fn contact_level(&self) -> u8 {
        let drop = self.baseline - self.long_avg();
        if drop <= 0 || self.baseline <= 0 {
            return 0;
        }
        let ratio = Fix::from_num(drop) / Fix::from_num(self.baseline);
        LEVEL_PERCENT.iter()
            .filter(|&&p| ratio >= Fix::from_num(p) / Fix::from_num(100))
            .count() as u8
    }
}

/// Baseline tracking touch detector
pub struct TouchFilter {
    channels: [ChannelState; NCHANNELS],
    warmup: u16,
    warmup_acc: [u32; NCHANNELS],
    touched: ChannelMask,
    changed: bool,
}

impl TouchFilter {
    pub fn new() -> Self {
        Self {
            channels: [ChannelState::default(); NCHANNELS],
            warmup: 0,
            warmup_acc: [0; NCHANNELS],
            touched: 0,
            changed: false,
        }
    }

    /// Forget all state and start a new warm-up
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    pub fn warmed_up(&self) -> bool {
        self.warmup >= WARMUP_ROUNDS
    }

    /// Channels with a confirmed touch
    pub fn touched(&self) -> ChannelMask {
        self.touched
    }

    /// Whether the last round changed [`Self::touched`]
    pub fn changed(&self) -> bool {
        self.changed
    }

    pub fn channel(&self, ch: usize) -> &ChannelState {
        &self.channels[ch]
    }

    /// Process a round of samples
    pub fn process(&mut self, samples: &Samples, events: &mut impl TouchEvents) {
        let prev = self.touched;

        if !self.warmed_up() {
            self.accumulate(samples);
            self.changed = false;
            return;
        }

        let mut above = false;
        for (ch, (state, &sample)) in self.channels.iter_mut().zip(samples.iter()).enumerate() {
            let ch = ch as u8;
            state.raw = sample;
            state.filtered += (sample as i32 - state.filtered) / FAST_DIV;
            state.long_acc += sample as i32 - state.long_acc / LONG_AVG_DEPTH;

            if state.delta() > THRESHOLD {
                above = true;
                state.misses = 0;
                state.hits = state.hits.saturating_add(1);
                if !state.pressed && state.hits >= PRESS_COUNT {
                    defmt::debug!("Touch press {}", ch);
                    state.pressed = true;
                    events.on_press(ch);
                }
            } else {
                state.hits = 0;
                if state.pressed {
                    state.misses = state.misses.saturating_add(1);
                    if state.misses >= RELEASE_COUNT {
                        defmt::debug!("Touch release {}", ch);
                        state.pressed = false;
                        state.misses = 0;
                        state.level = 0;
                        events.on_release(ch);
                    }
                }
            }

            if state.pressed {
                let level = state.contact_level();
                if level != state.level {
                    state.level = level;
                    events.on_level(ch, level);
                }
            }
        }

        // baseline only follows slow drift when nothing is near
        if !above {
            for state in self.channels.iter_mut() {
                state.baseline += (state.filtered - state.baseline).signum();
            }
        }

        self.touched = self.channels.iter()
            .enumerate()
            .filter(|(_, s)| s.pressed)
            .fold(0, |mask, (ch, _)| mask | 1 << ch);
        self.changed = self.touched != prev;
    }

    fn accumulate(&mut self, samples: &Samples) {
        for (acc, &s) in self.warmup_acc.iter_mut().zip(samples.iter()) {
            *acc += s as u32;
        }
        self.warmup += 1;

        if self.warmed_up() {
            for (state, acc) in self.channels.iter_mut().zip(self.warmup_acc.iter()) {
                state.init((acc / WARMUP_ROUNDS as u32) as i32);
            }
            defmt::info!("Touch baseline ready");
        }
    }
}

impl Default for TouchFilter {
    fn default() -> Self {
        Self::new()
    }
}
