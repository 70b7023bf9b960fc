use smlang::statemachine;

use super::{ChannelHolds, HoldIndicator, HoldMap};

/// Time each candidate hold stays lit, in milliseconds
pub const DWELL_MS: u32 = 1000;

pub type GetHold = StateMachine<Context>;

statemachine! {
    temporary_context: &mut dyn HoldIndicator,
    transitions: {
        *Idle + Start / arm = WaitForTouch,
        WaitForTouch + Cancel = Idle,

        // Holds of the touched channel are lit one after another
        WaitForTouch + Press [has_candidates] / show_first = Cycling,
        Cycling + Timeout / show_next = Cycling,

        // Letting go selects the hold that is currently lit
        Cycling + Release [same_channel] / select = Idle,
        Cycling + Cancel / hide = Idle,
    }
}

#[derive(Default)]
pub struct Context {
    candidates: ChannelHolds,
    index: usize,
    channel: u8,
    released: u8,
    selected: Option<u8>,
    // Context sets `restart`; in tick() it becomes `deadline`
    restart: bool,
    deadline: Option<u32>,
}

impl Context {
    fn current(&self) -> Option<u8> {
        self.candidates.get(self.index).copied()
    }
}

impl StateMachineContext for Context {
    fn arm(&mut self, _: &mut dyn HoldIndicator) {
        defmt::info!("Waiting for touch");
        self.selected = None;
        self.deadline = None;
    }

    fn has_candidates(&mut self, _: &mut dyn HoldIndicator) -> Result<(), ()> {
        if self.candidates.is_empty() { Err(()) } else { Ok(()) }
    }

    fn show_first(&mut self, ind: &mut dyn HoldIndicator) {
        self.index = 0;
        self.show(ind);
    }

    fn show_next(&mut self, ind: &mut dyn HoldIndicator) {
        self.index = (self.index + 1) % self.candidates.len().max(1);
        self.show(ind);
    }

    fn same_channel(&mut self, _: &mut dyn HoldIndicator) -> Result<(), ()> {
        if self.released == self.channel { Ok(()) } else { Err(()) }
    }

    fn select(&mut self, ind: &mut dyn HoldIndicator) {
        ind.hide_hold();
        self.selected = self.current();
        self.deadline = None;
        defmt::info!("Selected hold {}", self.selected);
    }

    fn hide(&mut self, ind: &mut dyn HoldIndicator) {
        ind.hide_hold();
        self.deadline = None;
    }
}

impl Context {
    fn show(&mut self, ind: &mut dyn HoldIndicator) {
        if let Some(hold) = self.current() {
            ind.show_hold(hold);
        }
        self.restart = true;
    }
}

impl StateMachine<Context> {
    pub fn idle() -> Self {
        Self::new(Context::default())
    }

    pub fn is_active(&self) -> bool {
        self.state() != &States::Idle
    }

    /// Hold lit while cycling
    pub fn current(&self) -> Option<u8> {
        match self.state() {
            States::Cycling => self.context.current(),
            _ => None,
        }
    }

    pub fn start(&mut self, ind: &mut dyn HoldIndicator) {
        self.process_event(ind, Events::Start).ok();
    }

    pub fn cancel(&mut self, ind: &mut dyn HoldIndicator) {
        self.process_event(ind, Events::Cancel).ok();
    }

    pub fn press(&mut self, ind: &mut dyn HoldIndicator, map: &HoldMap, channel: u8) {
        if self.state() != &States::WaitForTouch {
            return;
        }
        self.context.channel = channel;
        self.context.candidates = map.holds(channel).iter().copied().collect();
        if self.process_event(ind, Events::Press).is_err() {
            defmt::info!("No holds on channel {}", channel);
        }
    }

    pub fn release(&mut self, ind: &mut dyn HoldIndicator, channel: u8) {
        self.context.released = channel;
        self.process_event(ind, Events::Release).ok();
    }

    /// Advance the cycle, `now` in milliseconds
    pub fn tick(&mut self, ind: &mut dyn HoldIndicator, now: u32) {
        if self.context.restart {
            self.context.restart = false;
            self.context.deadline = Some(now.wrapping_add(DWELL_MS));
        }
        if let Some(deadline) = self.context.deadline {
            if now.wrapping_sub(deadline) as i32 >= 0 {
                self.context.deadline = None;
                self.process_event(ind, Events::Timeout).ok();
                // start counting the next dwell from this tick
                self.tick(ind, now);
            }
        }
    }

    /// Hold chosen by the last finished selection
    pub fn take_selected(&mut self) -> Option<u8> {
        self.context.selected.take()
    }
}
