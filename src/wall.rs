//! Top level handle of the wall
//!
//! Owns the display engine, the touch filter and the touch map, and provides the
//! operations of the command layer. All methods run in the main loop. Those that
//! touch the scan output get a [`ScanLock`] and only lock it for short updates.

use heapless::Deque;
use rgb::RGB8;

use crate::bsp::counters::Counter;
use crate::bsp::nvm::{NonVolatileStore, NvmError};
use crate::bsp::NHOLDS;
use crate::display::engine::DisplayCounters;
use crate::display::{Display, DisplayError, FrameFifo, Route, ScanHardware, ScanLock};
use crate::touch::{ChannelMask, SampleMailbox, TouchEvents, TouchFilter};
use crate::touchmap::gethold::GetHold;
use crate::touchmap::train::Train;
use crate::touchmap::{HoldIndicator, HoldMap};

/// Route used to light the hold that the user is asked about
pub const INDICATOR_ROUTE: u8 = 254;
pub const INDICATOR_COLOR: RGB8 = RGB8::new(255, 255, 255);
/// Touch events kept for the command layer in raw mode
pub const RAW_QUEUE_LEN: usize = 32;

#[derive(Clone, Copy, PartialEq, Eq, defmt::Format)]
#[cfg_attr(test, derive(Debug))]
pub enum RawEvent {
    Press(u8),
    Release(u8),
    Level(u8, u8),
}

/// Result of a finished touch operation
#[derive(Clone, Copy, PartialEq, Eq, defmt::Format)]
#[cfg_attr(test, derive(Debug))]
pub enum Event {
    HoldSelected(u8),
    Trained,
    /// Map is in use but could not be persisted
    TrainFailed(NvmError),
}

/// Receiver of touch events
#[derive(Clone, Copy, PartialEq, Eq, defmt::Format)]
#[cfg_attr(test, derive(Debug))]
pub enum Owner {
    Nobody,
    Raw,
    GetHold,
    Train,
}

#[derive(Clone, Copy, Default, PartialEq, Eq, defmt::Format)]
#[cfg_attr(test, derive(Debug))]
pub struct Diagnostics {
    pub display: DisplayCounters,
    /// Touch rounds replaced before the main loop took them
    pub sample_overruns: u16,
    /// Raw events lost on a full queue
    pub raw_dropped: Counter,
}

fn show(display: &mut Display, route: Route, scan: &mut impl ScanLock) -> Result<(), DisplayError> {
    scan.lock(|hw| {
        let result = display.show_route(route, hw);
        if !display.is_enabled() {
            display.enable(hw);
        }
        result
    })
}

/// Lights single holds with the indicator route
struct Indicator<'d, 'f, L> {
    display: &'d mut Display<'f>,
    scan: &'d mut L,
}

impl<'d, 'f, L: ScanLock> HoldIndicator for Indicator<'d, 'f, L> {
    fn show_hold(&mut self, hold: u8) {
        let mut route = Route::new(INDICATOR_ROUTE, INDICATOR_COLOR);
        let result = route.push_hold(hold)
            .and_then(|_| show(&mut *self.display, route, &mut *self.scan));
        if let Err(e) = result {
            defmt::warn!("Cannot show hold {}: {}", hold, e);
        }
    }

    fn hide_hold(&mut self) {
        let display = &mut *self.display;
        self.scan.lock(|hw| display.hide_route(INDICATOR_ROUTE, hw));
    }
}

/// Passes touch events to the current owner
struct Router<'w, 'f, L> {
    owner: Owner,
    display: &'w mut Display<'f>,
    scan: &'w mut L,
    map: &'w HoldMap,
    get_hold: &'w mut GetHold,
    train: &'w mut Train,
    raw: &'w mut Deque<RawEvent, RAW_QUEUE_LEN>,
    raw_dropped: &'w mut Counter,
}

impl<'w, 'f, L: ScanLock> Router<'w, 'f, L> {
    fn relay(&mut self, event: RawEvent) {
        if self.raw.push_back(event).is_err() {
            self.raw_dropped.inc();
        }
    }
}

impl<'w, 'f, L: ScanLock> TouchEvents for Router<'w, 'f, L> {
    fn on_press(&mut self, channel: u8) {
        match self.owner {
            Owner::Raw => self.relay(RawEvent::Press(channel)),
            Owner::GetHold => {
                let map = self.map;
                let mut ind = Indicator { display: &mut *self.display, scan: &mut *self.scan };
                self.get_hold.press(&mut ind, map, channel);
            },
            Owner::Train => {
                let mut ind = Indicator { display: &mut *self.display, scan: &mut *self.scan };
                self.train.press(&mut ind, channel);
            },
            Owner::Nobody => {},
        }
    }

    fn on_release(&mut self, channel: u8) {
        match self.owner {
            Owner::Raw => self.relay(RawEvent::Release(channel)),
            Owner::GetHold => {
                let mut ind = Indicator { display: &mut *self.display, scan: &mut *self.scan };
                self.get_hold.release(&mut ind, channel);
            },
            Owner::Train | Owner::Nobody => {},
        }
    }

    fn on_level(&mut self, channel: u8, level: u8) {
        if self.owner == Owner::Raw {
            self.relay(RawEvent::Level(channel, level));
        }
    }
}

pub struct Wall<'a, S> {
    display: Display<'a>,
    mailbox: &'a SampleMailbox,
    filter: TouchFilter,
    map: HoldMap,
    store: S,
    owner: Owner,
    get_hold: GetHold,
    train: Train,
    raw: Deque<RawEvent, RAW_QUEUE_LEN>,
    raw_dropped: Counter,
}

impl<'a, S: NonVolatileStore> Wall<'a, S> {
    /// Create the wall, loading the touch map from `store`
    pub fn new(fifo: &'a FrameFifo, mailbox: &'a SampleMailbox, mut store: S) -> Self {
        let map = HoldMap::load(&mut store);
        defmt::info!("Touch map trained: {=bool}", map.is_trained());
        Self {
            display: Display::new(fifo),
            mailbox,
            filter: TouchFilter::new(),
            map,
            store,
            owner: Owner::Nobody,
            get_hold: GetHold::idle(),
            train: Train::idle(),
            raw: Deque::new(),
            raw_dropped: Counter::new(),
        }
    }

    pub fn display(&self) -> &Display<'a> {
        &self.display
    }

    pub fn owner(&self) -> Owner {
        self.owner
    }

    pub fn show_route(&mut self, route: Route, scan: &mut impl ScanLock) -> Result<(), DisplayError> {
        if route.id == INDICATOR_ROUTE && self.owner_uses_indicator() {
            return Err(DisplayError::InvalidId);
        }
        show(&mut self.display, route, scan)
    }

    pub fn hide_route(&mut self, id: u8, scan: &mut impl ScanLock) {
        let display = &mut self.display;
        scan.lock(|hw| display.hide_route(id, hw));
    }

    pub fn set_brightness(&mut self, brightness: RGB8, scan: &mut impl ScanLock) {
        scan.lock(|hw| hw.set_brightness(brightness));
    }

    pub fn get_brightness(&self, scan: &mut impl ScanLock) -> RGB8 {
        scan.lock(|hw| hw.brightness())
    }

    /// Start selecting a hold by touch, finished with [`Event::HoldSelected`]
    pub fn get_hold(&mut self, scan: &mut impl ScanLock) {
        if !self.map.is_trained() {
            defmt::warn!("Selecting hold with untrained touch map");
        }
        self.set_owner(Owner::GetHold, scan);
        let mut ind = Indicator { display: &mut self.display, scan };
        self.get_hold.start(&mut ind);
    }

    /// Channel of every hold
    pub fn get_touchmap(&self) -> &[u8; NHOLDS] {
        self.map.table()
    }

    /// Start training the touch map, finished with [`Event::Trained`]
    pub fn retrain_touchmap(&mut self, scan: &mut impl ScanLock) {
        self.set_owner(Owner::Train, scan);
        let mut ind = Indicator { display: &mut self.display, scan };
        self.train.start(&mut ind);
    }

    /// Hold waiting for a touch during training
    pub fn training_progress(&self) -> Option<u8> {
        self.train.progress()
    }

    /// Relay touch events to the command layer through [`Self::pop_raw_event`]
    pub fn raw_touch_mode(&mut self, on: bool, scan: &mut impl ScanLock) {
        if on {
            self.set_owner(Owner::Raw, scan);
        } else if self.owner == Owner::Raw {
            self.set_owner(Owner::Nobody, scan);
        }
    }

    pub fn pop_raw_event(&mut self) -> Option<RawEvent> {
        self.raw.pop_front()
    }

    /// Abort any touch operation
    pub fn cancel_touch(&mut self, scan: &mut impl ScanLock) {
        self.set_owner(Owner::Nobody, scan);
    }

    /// Remove all routes, abort touch operations and restart touch calibration
    pub fn reset(&mut self, scan: &mut impl ScanLock) {
        defmt::info!("Reset");
        self.set_owner(Owner::Nobody, scan);
        let display = &mut self.display;
        scan.lock(|hw| display.clear(hw));
        self.filter.reset();
    }

    /// Channels currently touched
    pub fn touched(&self) -> ChannelMask {
        self.filter.touched()
    }

    /// Counters since the previous call
    pub fn diagnostics(&mut self) -> Diagnostics {
        Diagnostics {
            display: self.display.pop_counters(),
            sample_overruns: self.mailbox.pop_overruns(),
            raw_dropped: core::mem::take(&mut self.raw_dropped),
        }
    }

    /// Main loop step, `now` in milliseconds
    pub fn poll(&mut self, now: u32, scan: &mut impl ScanLock) -> Option<Event> {
        self.display.process();
        if self.display.needs_sync() {
            let display = &mut self.display;
            scan.lock(|hw| display.sync(hw));
        }

        if let Some(samples) = self.mailbox.take() {
            let mut router = Router {
                owner: self.owner,
                display: &mut self.display,
                scan: &mut *scan,
                map: &self.map,
                get_hold: &mut self.get_hold,
                train: &mut self.train,
                raw: &mut self.raw,
                raw_dropped: &mut self.raw_dropped,
            };
            self.filter.process(&samples, &mut router);
        }

        match self.owner {
            Owner::GetHold => {
                let mut ind = Indicator { display: &mut self.display, scan };
                self.get_hold.tick(&mut ind, now);
                let hold = self.get_hold.take_selected()?;
                self.owner = Owner::Nobody;
                Some(Event::HoldSelected(hold))
            },
            Owner::Train => {
                let map = self.train.take_result()?;
                self.owner = Owner::Nobody;
                let result = map.store(&mut self.store);
                self.map = map;
                match result {
                    Ok(()) => Some(Event::Trained),
                    Err(e) => {
                        defmt::warn!("Storing touch map failed: {}", e);
                        Some(Event::TrainFailed(e))
                    },
                }
            },
            Owner::Raw | Owner::Nobody => None,
        }
    }

    fn owner_uses_indicator(&self) -> bool {
        matches!(self.owner, Owner::GetHold | Owner::Train)
    }

    fn set_owner(&mut self, owner: Owner, scan: &mut impl ScanLock) {
        let mut ind = Indicator { display: &mut self.display, scan };
        match self.owner {
            Owner::GetHold => self.get_hold.cancel(&mut ind),
            Owner::Train => self.train.cancel(&mut ind),
            Owner::Raw => self.raw.clear(),
            Owner::Nobody => {},
        }
        if owner != self.owner {
            defmt::debug!("Touch owner {} -> {}", self.owner, owner);
        }
        self.owner = owner;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bsp::nvm::{mock::MemFlash, FlashStore};
    use crate::bsp::NCHANNELS;
    use crate::display::engine::mock::HwMock;
    use crate::display::translate;
    use crate::touch::{Samples, WARMUP_ROUNDS};
    use crate::touchmap::mock::table_with_hold5_on_ch3;
    use std::vec::Vec;

    const BASE: u16 = 1000;
    const STEP_MS: u32 = 10;

    type TestWall<'a> = Wall<'a, FlashStore<MemFlash>>;

    struct Rig<'a> {
        wall: TestWall<'a>,
        mailbox: &'a SampleMailbox,
        hw: HwMock,
        now: u32,
        events: Vec<Event>,
    }

    impl<'a> Rig<'a> {
        fn new(fifo: &'a FrameFifo, mailbox: &'a SampleMailbox) -> Self {
            let store = FlashStore::new(MemFlash::default(), 0);
            let mut rig = Self {
                wall: Wall::new(fifo, mailbox, store),
                mailbox,
                hw: HwMock::default(),
                now: 0,
                events: Vec::new(),
            };
            for _ in 0..WARMUP_ROUNDS {
                rig.round(None);
            }
            rig
        }

        fn round(&mut self, touch: Option<u8>) {
            let mut samples: Samples = [BASE; NCHANNELS];
            if let Some(ch) = touch {
                samples[ch as usize] = BASE / 2;
            }
            self.mailbox.publish(&samples);
            self.now += STEP_MS;
            if let Some(event) = self.wall.poll(self.now, &mut self.hw) {
                self.events.push(event);
            }
        }

        fn press(&mut self, ch: u8) {
            for _ in 0..3 {
                self.round(Some(ch));
            }
            assert_ne!(self.wall.touched() & 1 << ch, 0);
        }

        fn release(&mut self) {
            for _ in 0..10 {
                self.round(None);
            }
            assert_eq!(self.wall.touched(), 0);
        }

        fn tap(&mut self, ch: u8) {
            self.press(ch);
            self.release();
        }

        fn indicated(&self, hold: u8) -> bool {
            self.wall.display().displayed(translate(hold)) == Some(INDICATOR_ROUTE)
        }
    }

    #[test]
    fn train_then_get_hold() {
        let fifo = FrameFifo::new();
        let mailbox = SampleMailbox::new();
        let mut rig = Rig::new(&fifo, &mailbox);
        let table = table_with_hold5_on_ch3();

        rig.wall.retrain_touchmap(&mut rig.hw);
        assert_eq!(rig.wall.owner(), Owner::Train);
        for (hold, &ch) in table.iter().enumerate() {
            assert_eq!(rig.wall.training_progress(), Some(hold as u8));
            assert!(rig.indicated(hold as u8));
            rig.tap(ch);
        }
        assert_eq!(rig.events, [Event::Trained]);
        assert_eq!(rig.wall.owner(), Owner::Nobody);
        assert_eq!(rig.wall.get_touchmap(), &table);
        assert!(rig.wall.display().route_ids().next().is_none());

        let stored = HoldMap::load(&mut rig.wall.store);
        assert_eq!(stored.table(), &table);

        rig.events.clear();
        rig.wall.get_hold(&mut rig.hw);
        rig.press(3);
        assert!(rig.indicated(5));
        rig.release();
        assert_eq!(rig.events, [Event::HoldSelected(5)]);
        assert!(!rig.indicated(5));
    }

    #[test]
    fn raw_mode_relays_events() {
        let fifo = FrameFifo::new();
        let mailbox = SampleMailbox::new();
        let mut rig = Rig::new(&fifo, &mailbox);

        // nobody listens
        rig.tap(2);
        assert_eq!(rig.wall.pop_raw_event(), None);

        rig.wall.raw_touch_mode(true, &mut rig.hw);
        rig.tap(7);
        let events: Vec<RawEvent> = core::iter::from_fn(|| rig.wall.pop_raw_event())
            .filter(|e| !matches!(e, RawEvent::Level(..)))
            .collect();
        assert_eq!(events, [RawEvent::Press(7), RawEvent::Release(7)]);

        rig.wall.raw_touch_mode(false, &mut rig.hw);
        rig.tap(7);
        assert_eq!(rig.wall.pop_raw_event(), None);
        assert!(rig.events.is_empty());
    }

    #[test]
    fn owners_are_exclusive() {
        let fifo = FrameFifo::new();
        let mailbox = SampleMailbox::new();
        let mut rig = Rig::new(&fifo, &mailbox);

        rig.wall.retrain_touchmap(&mut rig.hw);
        rig.tap(1);
        assert_eq!(rig.wall.training_progress(), Some(1));
        assert!(rig.indicated(1));

        // starting another operation aborts training
        rig.wall.raw_touch_mode(true, &mut rig.hw);
        assert_eq!(rig.wall.training_progress(), None);
        assert!(!rig.indicated(1));
        assert!(!rig.wall.get_touchmap().iter().any(|&c| c == 1));

        rig.wall.get_hold(&mut rig.hw);
        assert_eq!(rig.wall.owner(), Owner::GetHold);
        rig.tap(4);
        assert_eq!(rig.wall.pop_raw_event(), None);
        // untrained map has no holds, still waiting
        assert_eq!(rig.wall.owner(), Owner::GetHold);

        rig.wall.cancel_touch(&mut rig.hw);
        assert_eq!(rig.wall.owner(), Owner::Nobody);
        assert!(rig.events.is_empty());
    }

    #[test]
    fn routes_and_reset() {
        let fifo = FrameFifo::new();
        let mailbox = SampleMailbox::new();
        let mut rig = Rig::new(&fifo, &mailbox);

        let route = Route::new(1, RGB8::new(255, 0, 0)).with_holds(&[0, 1]).unwrap();
        rig.wall.show_route(route, &mut rig.hw).unwrap();
        assert!(rig.wall.display().is_enabled());
        assert!(rig.hw.running);
        assert_eq!(rig.wall.display().displayed(translate(1)), Some(1));
        for _ in 0..5 {
            rig.round(None);
        }
        assert!(!fifo.empty());

        rig.wall.set_brightness(RGB8::new(10, 10, 10), &mut rig.hw);
        assert_eq!(rig.wall.get_brightness(&mut rig.hw), RGB8::new(10, 10, 10));

        rig.wall.hide_route(1, &mut rig.hw);
        assert_eq!(rig.wall.display().displayed(translate(1)), None);

        rig.wall.get_hold(&mut rig.hw);
        let indicator = Route::new(INDICATOR_ROUTE, RGB8::new(1, 1, 1));
        assert_eq!(rig.wall.show_route(indicator, &mut rig.hw), Err(DisplayError::InvalidId));

        let route = Route::new(2, RGB8::new(0, 255, 0)).with_holds(&[9]).unwrap();
        rig.wall.show_route(route, &mut rig.hw).unwrap();
        rig.wall.reset(&mut rig.hw);
        assert_eq!(rig.wall.owner(), Owner::Nobody);
        assert!(rig.wall.display().route_ids().next().is_none());
        assert!(!rig.wall.display().is_enabled());
        assert!(!rig.hw.running);
        assert!(fifo.empty());

        // reset restarts calibration, so touches are ignored for a while
        rig.wall.raw_touch_mode(true, &mut rig.hw);
        rig.round(Some(0));
        rig.round(Some(0));
        rig.round(Some(0));
        assert_eq!(rig.wall.touched(), 0);
    }

    #[test]
    fn diagnostics_collect_counters() {
        let fifo = FrameFifo::new();
        let mailbox = SampleMailbox::new();
        let mut rig = Rig::new(&fifo, &mailbox);

        for id in 1..=9 {
            let route = Route::new(id, RGB8::new(255, 255, 255)).with_holds(&[id]).unwrap();
            let result = rig.wall.show_route(route, &mut rig.hw);
            assert_eq!(result.is_err(), id == 9);
        }
        mailbox.publish(&[BASE; NCHANNELS]);
        mailbox.publish(&[BASE; NCHANNELS]);

        let diag = rig.wall.diagnostics();
        assert_eq!(diag.display.dropped_routes.get(), 1);
        assert_eq!(diag.sample_overruns, 1);
        assert_eq!(diag.raw_dropped.get(), 0);

        // counters restart after being reported
        assert_eq!(rig.wall.diagnostics(), Diagnostics::default());
        rig.wall.raw_touch_mode(true, &mut rig.hw);
        for _ in 0..RAW_QUEUE_LEN {
            rig.press(0);
            rig.release();
        }
        assert!(rig.wall.diagnostics().raw_dropped.get() > 0);
        assert_eq!(rig.wall.diagnostics().raw_dropped.get(), 0);
    }
}
