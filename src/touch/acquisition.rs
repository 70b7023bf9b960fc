use crate::bsp::channels::{TouchChannel, CHANNELS};
use crate::bsp::NCHANNELS;
use super::{SampleMailbox, Samples, WARMUP_ROUNDS};

/// Charge-time measurement front end
///
/// The pulse is expected to trigger the ADC conversion when it ends, the
/// conversion result is then delivered to [`Acquisition::on_conversion`].
pub trait TouchFrontEnd {
    /// Ground the electrode
    fn discharge(&mut self, channel: &TouchChannel);

    /// Route electrode to the ADC and release it from ground
    fn select(&mut self, channel: &TouchChannel);

    /// Start constant current pulse into the selected electrode
    fn start_pulse(&mut self);

    /// Turn the current source off and ground its output
    fn stop_pulse(&mut self);

    /// Arm the delay between two rounds, ends with [`Acquisition::on_interval`]
    fn start_interval(&mut self);

    /// Halt the interval timer, the delay only runs once per round
    fn stop_interval(&mut self);
}

#[derive(Clone, Copy, PartialEq, Eq, defmt::Format)]
#[cfg_attr(test, derive(Debug))]
pub enum Phase {
    Idle,
    /// Electrode is being charged and sampled
    Sampling(u8),
    /// Waiting for the next round
    Interval,
}

/// Channel scan sequencer, runs from the ADC and interval timer interrupts
pub struct Acquisition<'a, F> {
    front: F,
    mailbox: &'a SampleMailbox,
    phase: Phase,
    samples: Samples,
    rounds: u16,
}

impl<'a, F: TouchFrontEnd> Acquisition<'a, F> {
    pub fn new(mut front: F, mailbox: &'a SampleMailbox) -> Self {
        for channel in CHANNELS.iter() {
            front.discharge(channel);
        }
        Self { front, mailbox, phase: Phase::Idle, samples: [0; NCHANNELS], rounds: 0 }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Whether the baseline warm-up rounds have been completed
    pub fn warmed_up(&self) -> bool {
        self.rounds >= WARMUP_ROUNDS
    }

    /// Start scanning, restarting the warm-up
    pub fn start(&mut self) {
        if self.phase != Phase::Idle {
            return;
        }
        defmt::debug!("Touch acquisition started");
        self.rounds = 0;
        self.sample(0);
    }

    pub fn stop(&mut self) {
        match self.phase {
            Phase::Sampling(ch) => {
                self.front.stop_pulse();
                self.front.discharge(&CHANNELS[ch as usize]);
            },
            Phase::Interval => self.front.stop_interval(),
            Phase::Idle => {},
        }
        self.phase = Phase::Idle;
    }

    /// ADC conversion of the selected channel finished
    pub fn on_conversion(&mut self, sample: u16) {
        let ch = match self.phase {
            Phase::Sampling(ch) => ch as usize,
            _ => return,
        };

        self.front.stop_pulse();
        self.samples[ch] = sample;
        self.front.discharge(&CHANNELS[ch]);

        if ch + 1 < NCHANNELS {
            self.sample(ch + 1);
            return;
        }

        self.mailbox.publish(&self.samples);
        self.rounds = self.rounds.saturating_add(1);
        if self.warmed_up() {
            self.phase = Phase::Interval;
            self.front.start_interval();
        } else {
            self.sample(0);
        }
    }

    /// Delay between rounds elapsed
    pub fn on_interval(&mut self) {
        self.front.stop_interval();
        if self.phase == Phase::Interval {
            self.sample(0);
        }
    }

    fn sample(&mut self, ch: usize) {
        self.front.select(&CHANNELS[ch]);
        self.front.start_pulse();
        self.phase = Phase::Sampling(ch as u8);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::vec::Vec;

    #[derive(Clone, Copy, PartialEq, Debug)]
    enum Op {
        Discharge(TouchChannel),
        Select(TouchChannel),
        Start,
        Stop,
        Interval,
        IntervalStop,
    }

    #[derive(Default)]
    struct FrontMock {
        ops: Vec<Op>,
    }

    impl TouchFrontEnd for FrontMock {
        fn discharge(&mut self, channel: &TouchChannel) {
            self.ops.push(Op::Discharge(*channel));
        }

        fn select(&mut self, channel: &TouchChannel) {
            self.ops.push(Op::Select(*channel));
        }

        fn start_pulse(&mut self) {
            self.ops.push(Op::Start);
        }

        fn stop_pulse(&mut self) {
            self.ops.push(Op::Stop);
        }

        fn start_interval(&mut self) {
            self.ops.push(Op::Interval);
        }

        fn stop_interval(&mut self) {
            self.ops.push(Op::IntervalStop);
        }
    }

    fn round(acq: &mut Acquisition<FrontMock>, base: u16) {
        for ch in 0..NCHANNELS {
            assert_eq!(acq.phase(), Phase::Sampling(ch as u8));
            acq.on_conversion(base + ch as u16);
        }
    }

    #[test]
    fn channel_sequence() {
        let mb = SampleMailbox::new();
        let mut acq = Acquisition::new(FrontMock::default(), &mb);
        acq.front.ops.clear();

        acq.start();
        assert_eq!(acq.front.ops, [Op::Select(CHANNELS[0]), Op::Start]);
        acq.front.ops.clear();

        acq.on_conversion(500);
        assert_eq!(acq.front.ops, [
            Op::Stop,
            Op::Discharge(CHANNELS[0]),
            Op::Select(CHANNELS[1]),
            Op::Start,
        ]);
        assert_eq!(mb.take(), None);
    }

    #[test]
    fn warmup_rounds_are_back_to_back() {
        let mb = SampleMailbox::new();
        let mut acq = Acquisition::new(FrontMock::default(), &mb);
        acq.start();

        for r in 0..WARMUP_ROUNDS - 1 {
            round(&mut acq, r);
            let samples = mb.take().unwrap();
            assert_eq!(samples[0], r);
            assert_eq!(samples[NCHANNELS - 1], r + NCHANNELS as u16 - 1);
            assert!(!acq.warmed_up());
            assert!(!acq.front.ops.contains(&Op::Interval));
        }

        round(&mut acq, 0);
        assert!(acq.warmed_up());
        assert_eq!(acq.phase(), Phase::Interval);
        assert_eq!(acq.front.ops.last(), Some(&Op::Interval));

        // stray conversion while waiting is ignored
        acq.on_conversion(1);
        assert_eq!(acq.phase(), Phase::Interval);

        acq.on_interval();
        assert_eq!(acq.phase(), Phase::Sampling(0));
        round(&mut acq, 100);
        assert_eq!(acq.phase(), Phase::Interval);
        assert_eq!(mb.take().map(|s| s[3]), Some(103));
    }

    #[test]
    fn stop_grounds_active_channel() {
        let mb = SampleMailbox::new();
        let mut acq = Acquisition::new(FrontMock::default(), &mb);
        acq.start();
        acq.on_conversion(1);
        acq.front.ops.clear();

        acq.stop();
        assert_eq!(acq.phase(), Phase::Idle);
        assert_eq!(acq.front.ops, [Op::Stop, Op::Discharge(CHANNELS[1])]);

        acq.on_interval();
        assert_eq!(acq.phase(), Phase::Idle);
    }

    #[test]
    fn interval_timer_runs_once_per_round() {
        let mb = SampleMailbox::new();
        let mut acq = Acquisition::new(FrontMock::default(), &mb);
        acq.start();
        for r in 0..WARMUP_ROUNDS {
            round(&mut acq, r);
        }
        assert_eq!(acq.front.ops.last(), Some(&Op::Interval));
        acq.front.ops.clear();

        acq.on_interval();
        assert_eq!(acq.front.ops, [Op::IntervalStop, Op::Select(CHANNELS[0]), Op::Start]);

        round(&mut acq, 0);
        assert_eq!(acq.phase(), Phase::Interval);
        acq.front.ops.clear();

        // stopping while waiting halts the timer too
        acq.stop();
        assert_eq!(acq.phase(), Phase::Idle);
        assert_eq!(acq.front.ops, [Op::IntervalStop]);
    }
}
