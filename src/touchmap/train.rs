use smlang::statemachine;

use crate::bsp::{NCHANNELS, NHOLDS};
use super::{HoldIndicator, HoldMap, UNMAPPED};

pub type Train = StateMachine<Context>;

statemachine! {
    temporary_context: &mut dyn HoldIndicator,
    transitions: {
        *Idle + Start / show_first = Waiting,
        Waiting + Touched / record = Recorded,
        Recorded + Next / show_next = Waiting,
        Recorded + Finish / finish = Idle,
        Waiting + Cancel / abort = Idle,
    }
}

pub struct Context {
    table: [u8; NHOLDS],
    hold: u16,
    touched: u8,
    done: bool,
}

impl Default for Context {
    fn default() -> Self {
        Self { table: [UNMAPPED; NHOLDS], hold: 0, touched: 0, done: false }
    }
}

impl StateMachineContext for Context {
    fn show_first(&mut self, ind: &mut dyn HoldIndicator) {
        defmt::info!("Touch map training started");
        self.table = [UNMAPPED; NHOLDS];
        self.hold = 0;
        self.done = false;
        ind.show_hold(0);
    }

    fn record(&mut self, ind: &mut dyn HoldIndicator) {
        defmt::debug!("Hold {} on channel {}", self.hold, self.touched);
        self.table[self.hold as usize] = self.touched;
        ind.hide_hold();
    }

    fn show_next(&mut self, ind: &mut dyn HoldIndicator) {
        self.hold += 1;
        ind.show_hold(self.hold as u8);
    }

    fn finish(&mut self, _: &mut dyn HoldIndicator) {
        defmt::info!("Touch map training finished");
        self.done = true;
    }

    fn abort(&mut self, ind: &mut dyn HoldIndicator) {
        defmt::info!("Touch map training cancelled at hold {}", self.hold);
        ind.hide_hold();
    }
}

impl StateMachine<Context> {
    pub fn idle() -> Self {
        Self::new(Context::default())
    }

    pub fn is_active(&self) -> bool {
        self.state() != &States::Idle
    }

    /// Hold waiting for a touch
    pub fn progress(&self) -> Option<u8> {
        self.is_active().then_some(self.context.hold as u8)
    }

    pub fn start(&mut self, ind: &mut dyn HoldIndicator) {
        self.process_event(ind, Events::Start).ok();
    }

    pub fn cancel(&mut self, ind: &mut dyn HoldIndicator) {
        self.process_event(ind, Events::Cancel).ok();
    }

    /// Assign the lit hold to the touched channel and move on
    pub fn press(&mut self, ind: &mut dyn HoldIndicator, channel: u8) {
        if channel as usize >= NCHANNELS {
            return;
        }
        self.context.touched = channel;
        if self.process_event(ind, Events::Touched).is_err() {
            return;
        }
        let event = if (self.context.hold as usize) + 1 < NHOLDS {
            Events::Next
        } else {
            Events::Finish
        };
        self.process_event(ind, event).ok();
    }

    /// Map built by the last completed training
    pub fn take_result(&mut self) -> Option<HoldMap> {
        if !self.context.done {
            return None;
        }
        self.context.done = false;
        Some(HoldMap::from_table(self.context.table))
    }
}
