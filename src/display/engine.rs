use heapless::Vec;

use crate::bsp::columns::{Color, ColumnData};
use crate::bsp::counters::Counter;
use crate::bsp::{CLOCK_FREQUENCY, NCOLS, NROWS};
use super::conflict::{Conflicts, Slot};
use super::fifo::{Frame, FrameFifo};
use super::heartbeat::Heartbeat;
use super::{translate, DisplayError, Position, Route, ScanHardware};
use super::{COLOR_DEPTH, COLOR_DEPTH_BITS, FLASH_PERIOD, FRAMES_PER_PROCESS, MAX_CONFLICTS, MAX_ROUTES,
    ROUTE_LEN, SCAN_FREQ};

/// Route as stored in a slot, colour reduced to the display depth
#[derive(Clone)]
struct ActiveRoute {
    id: u8,
    heartbeat: bool,
    levels: [u8; 3],
    holds: Vec<u8, ROUTE_LEN>,
}

impl ActiveRoute {
    fn new(route: Route) -> Self {
        let shift = 8 - COLOR_DEPTH_BITS;
        let c = route.color;
        Self {
            id: route.id,
            heartbeat: route.heartbeat,
            levels: [c.r >> shift, c.g >> shift, c.b >> shift],
            holds: route.holds,
        }
    }

    fn max_level(&self) -> u8 {
        self.levels.iter().copied().max().unwrap_or(0)
    }

    /// PWM on-time of each colour in the current heartbeat phase
    fn levels(&self, heartbeat: &Heartbeat) -> [u8; 3] {
        if self.heartbeat {
            self.levels.map(|l| heartbeat.scale(l))
        } else {
            self.levels
        }
    }
}

/// Summary of a matrix row
#[derive(Clone, Copy, Default, PartialEq, Eq, defmt::Format)]
#[cfg_attr(test, derive(Debug))]
pub struct Row {
    holds: [Option<Slot>; NCOLS],
    enabled: bool,
    max_brightness: u8,
}

impl Row {
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// PWM steps needed for this row
    pub fn max_brightness(&self) -> u8 {
        self.max_brightness
    }
}

#[derive(Clone, Copy, Default, PartialEq, Eq, defmt::Format)]
#[cfg_attr(test, derive(Debug))]
pub struct DisplayCounters {
    pub dropped_routes: Counter,
    pub dropped_conflicts: Counter,
}

/// Frame generator position
struct Cursor {
    row: usize,
    pwm_pos: usize,
    frame: Frame,
    /// PWM positions at which some channel turns off
    pwm_flags: [bool; COLOR_DEPTH],
}

impl Cursor {
    const fn new() -> Self {
        Self { row: 0, pwm_pos: 0, frame: Frame::EMPTY, pwm_flags: [false; COLOR_DEPTH] }
    }
}

/// Frame generator of the LED matrix
///
/// Lives in the main loop. Operations that change what is displayed take the
/// [`ScanHardware`] so they can retune and blank the output, the caller must
/// make sure that the scan interrupt cannot run meanwhile.
pub struct Display<'a> {
    fifo: &'a FrameFifo,
    routes: [Option<ActiveRoute>; MAX_ROUTES],
    rows: [Row; NROWS],
    conflicts: Conflicts,
    heartbeat: Heartbeat,
    cursor: Cursor,
    scans: u32,
    enabled: bool,
    blank: bool,
    period: u32,
    period_stale: bool,
    counters: DisplayCounters,
}

impl<'a> Display<'a> {
    const NO_ROUTE: Option<ActiveRoute> = None;

    pub fn new(fifo: &'a FrameFifo) -> Self {
        fifo.clear();
        Self {
            fifo,
            routes: [Self::NO_ROUTE; MAX_ROUTES],
            rows: [Row::default(); NROWS],
            conflicts: Conflicts::new(),
            heartbeat: Heartbeat::new(),
            cursor: Cursor::new(),
            scans: 0,
            enabled: false,
            blank: true,
            period: Self::period_for(0),
            period_stale: true,
            counters: DisplayCounters::default(),
        }
    }

    /// Timer period that keeps the scan frequency for given number of PWM steps per scan
    const fn period_for(pulses: u32) -> u32 {
        let pulses = if pulses == 0 { COLOR_DEPTH as u32 } else { pulses };
        CLOCK_FREQUENCY / SCAN_FREQ / pulses
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn is_blank(&self) -> bool {
        self.blank
    }

    pub fn period(&self) -> u32 {
        self.period
    }

    pub fn row(&self, row: usize) -> &Row {
        &self.rows[row]
    }

    pub fn counters(&self) -> DisplayCounters {
        self.counters
    }

    /// Take the counters, resetting them
    pub fn pop_counters(&mut self) -> DisplayCounters {
        core::mem::take(&mut self.counters)
    }

    /// Ids of the routes being displayed
    pub fn route_ids(&self) -> impl Iterator<Item = u8> + '_ {
        self.routes.iter().flatten().map(|r| r.id)
    }

    /// Id of the route currently visible at given position
    pub fn displayed(&self, pos: Position) -> Option<u8> {
        let slot = self.rows[pos.row as usize].holds[pos.col as usize]?;
        self.routes[slot as usize].as_ref().map(|r| r.id)
    }

    /// Ids of the routes waiting for given position
    pub fn waiting(&self, pos: Position) -> impl Iterator<Item = u8> + '_ {
        self.conflicts.waiting(pos.index())
            .filter_map(|slot| self.routes[slot as usize].as_ref().map(|r| r.id))
    }

    /// Start output and prime the frame queue
    pub fn enable(&mut self, hw: &mut impl ScanHardware) {
        self.enabled = true;
        self.update_period(hw);
        hw.start();
        self.process();
    }

    pub fn disable(&mut self, hw: &mut impl ScanHardware) {
        self.enabled = false;
        hw.stop();
        self.fifo.clear();
    }

    /// Display a route, replacing a route with the same id
    ///
    /// A conflict that cannot be recorded leaves the route partially displayed
    /// and returns [`DisplayError::ConflictCapacity`].
    pub fn show_route(&mut self, route: Route, hw: &mut impl ScanHardware) -> Result<(), DisplayError> {
        if route.id == 0 {
            return Err(DisplayError::InvalidId);
        }

        let slot = match self.find(route.id) {
            Some(slot) => {
                self.clear_holds(slot);
                slot
            },
            None => match self.routes.iter().position(Option::is_none) {
                Some(free) => free as Slot,
                None => {
                    defmt::warn!("No free slot for route {}", route.id);
                    self.counters.dropped_routes.inc();
                    return Err(DisplayError::RouteCapacity);
                },
            },
        };

        defmt::debug!("Show route {} in slot {}: {} holds", route.id, slot, route.holds.len());
        self.routes[slot as usize] = Some(ActiveRoute::new(route));
        let result = self.set_holds(slot);

        self.changed(hw);
        result
    }

    /// Remove route from the display, unknown ids are ignored
    pub fn hide_route(&mut self, id: u8, hw: &mut impl ScanHardware) {
        if let Some(slot) = self.find(id) {
            defmt::debug!("Hide route {} from slot {}", id, slot);
            self.clear_holds(slot);
            self.routes[slot as usize] = None;
        }
        self.changed(hw);
    }

    /// Remove all routes and disable the display
    pub fn clear(&mut self, hw: &mut impl ScanHardware) {
        self.blank = true;
        hw.set_blank(true);

        self.routes = [Self::NO_ROUTE; MAX_ROUTES];
        self.rows = [Row::default(); NROWS];
        self.conflicts.clear();
        self.cursor = Cursor::new();
        self.fifo.clear();

        self.disable(hw);
    }

    /// Whether the timer period has to be updated with [`Self::sync`]
    pub fn needs_sync(&self) -> bool {
        self.period_stale
    }

    /// Apply timer period changes caused by conflict rotation
    pub fn sync(&mut self, hw: &mut impl ScanHardware) {
        if self.period_stale {
            self.update_period(hw);
        }
    }

    /// Generate up to [`FRAMES_PER_PROCESS`] frames while there is space in the queue
    pub fn process(&mut self) {
        if self.blank || !self.enabled {
            return;
        }

        let mut frames = 0;
        let mut skipped = 0;
        while frames < FRAMES_PER_PROCESS && !self.fifo.full() {
            let row_idx = self.cursor.row;
            if !self.rows[row_idx].enabled {
                self.next_row();
                skipped += 1;
                if skipped > NROWS {
                    break;
                }
                continue;
            }
            skipped = 0;

            let row = &self.rows[row_idx];
            let max = row.max_brightness as usize;
            let cursor = &mut self.cursor;

            if cursor.pwm_pos == 0 {
                // turn on everything that is lit in this row
                cursor.frame = Frame { row: row_idx as u8, repeat: 0, columns: ColumnData::OFF };
                cursor.pwm_flags = [false; COLOR_DEPTH];
                for (col, slot) in row.holds.iter().enumerate() {
                    let route = match slot.and_then(|s| self.routes[s as usize].as_ref()) {
                        Some(route) => route,
                        None => continue,
                    };
                    for (color, level) in Color::ALL.iter().zip(route.levels(&self.heartbeat)) {
                        if level > 0 {
                            cursor.frame.columns.set(col, *color);
                            cursor.pwm_flags[level as usize] = true;
                        }
                    }
                }
            } else {
                // turn off channels that reached their level
                cursor.frame.repeat = 0;
                for (col, slot) in row.holds.iter().enumerate() {
                    let route = match slot.and_then(|s| self.routes[s as usize].as_ref()) {
                        Some(route) => route,
                        None => continue,
                    };
                    for (color, level) in Color::ALL.iter().zip(route.levels(&self.heartbeat)) {
                        if level as usize == cursor.pwm_pos {
                            cursor.frame.columns.clear(col, *color);
                        }
                    }
                }
            }

            // merge positions without any transition
            cursor.pwm_pos += 1;
            while cursor.pwm_pos < max && !cursor.pwm_flags[cursor.pwm_pos] {
                cursor.pwm_pos += 1;
                cursor.frame.repeat += 1;
            }

            // cannot fail, queue is not full and only the interrupt removes frames
            let _ = self.fifo.put(cursor.frame);
            frames += 1;

            if cursor.pwm_pos >= max {
                self.next_row();
            }
        }
    }

    fn find(&self, id: u8) -> Option<Slot> {
        self.routes.iter()
            .position(|r| matches!(r, Some(r) if r.id == id))
            .map(|i| i as Slot)
    }

    /// Occupy the positions of a route or queue it where they are taken
    fn set_holds(&mut self, slot: Slot) -> Result<(), DisplayError> {
        let route = match &self.routes[slot as usize] {
            Some(route) => route,
            None => return Ok(()),
        };

        let mut result = Ok(());
        for &hold in route.holds.iter() {
            let pos = translate(hold);
            let cell = &mut self.rows[pos.row as usize].holds[pos.col as usize];
            match *cell {
                None => *cell = Some(slot),
                // same hold listed twice
                Some(s) if s == slot => {},
                Some(_) if self.conflicts.contains(pos.index(), slot) => {},
                Some(_) => {
                    if self.conflicts.push(pos.index(), slot).is_err() {
                        defmt::warn!("Conflict list full, dropping hold {} of route {}", hold, route.id);
                        self.counters.dropped_conflicts.inc();
                        result = Err(DisplayError::ConflictCapacity);
                    }
                },
            }
        }

        self.recalc_rows();
        result
    }

    /// Release all positions of a route, promoting waiting routes
    fn clear_holds(&mut self, slot: Slot) {
        if let Some(route) = &self.routes[slot as usize] {
            for &hold in route.holds.iter() {
                let pos = translate(hold);
                let cell = &mut self.rows[pos.row as usize].holds[pos.col as usize];
                if *cell == Some(slot) {
                    *cell = self.conflicts.pop_front(pos.index());
                }
            }
        }
        self.conflicts.remove_route(slot);
        self.recalc_rows();
    }

    fn recalc_rows(&mut self) {
        for row in self.rows.iter_mut() {
            row.enabled = false;
            row.max_brightness = 0;
            for slot in row.holds.iter().flatten() {
                row.enabled = true;
                if let Some(route) = &self.routes[*slot as usize] {
                    row.max_brightness = row.max_brightness.max(route.max_level());
                }
            }
        }
    }

    /// Common tail of operations that change the displayed set
    fn changed(&mut self, hw: &mut impl ScanHardware) {
        self.blank = !self.rows.iter().any(|r| r.enabled);
        hw.set_blank(self.blank);
        self.update_period(hw);
        // new pattern starts at a row boundary
        self.cursor.pwm_pos = 0;
        self.fifo.clear();
    }

    fn update_period(&mut self, hw: &mut impl ScanHardware) {
        let pulses = self.rows.iter().map(|r| r.max_brightness as u32).sum();
        self.period = Self::period_for(pulses);
        self.period_stale = false;
        hw.set_period(self.period);
    }

    fn next_row(&mut self) {
        self.cursor.row = (self.cursor.row + 1) % NROWS;
        self.cursor.pwm_pos = 0;
        if self.cursor.row == 0 {
            self.heartbeat.advance();
            self.scans = (self.scans + 1) % (SCAN_FREQ * FLASH_PERIOD);
            if self.scans == 0 {
                self.rotate_conflicts();
            }
        }
    }

    /// Show the next waiting route at every shared position
    fn rotate_conflicts(&mut self) {
        if self.conflicts.is_empty() {
            return;
        }

        let positions: Vec<u8, MAX_CONFLICTS> = self.conflicts.positions().collect();
        for pos in positions {
            let p = Position::from_index(pos);
            let cell = &mut self.rows[p.row as usize].holds[p.col as usize];
            *cell = match *cell {
                Some(displayed) => Some(self.conflicts.rotate(pos, displayed)),
                None => self.conflicts.pop_front(pos),
            };
        }

        // visible routes changed, so can the PWM length of their rows
        self.recalc_rows();
        self.period_stale = true;
    }
}
