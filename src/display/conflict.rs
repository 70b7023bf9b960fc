//! Routes sharing a single LED
//!
//! The first route that claims a position is displayed, every further claimant
//! is appended to a per-position waiting list. Lists are singly linked chains
//! in a fixed entry arena, each chain starts at a head entry that is the next
//! route to be displayed. Rotating a position moves the displayed route to
//! the back of the list and brings the head forward, so all routes get their
//! turn in round robin order.

use super::MAX_CONFLICTS;

/// Index of a route slot in the display engine
pub type Slot = u8;

#[derive(Clone, Copy, PartialEq, Eq, defmt::Format)]
#[cfg_attr(test, derive(Debug))]
struct Entry {
    /// Physical position index
    pos: u8,
    route: Slot,
    next: Option<u8>,
    head: bool,
}

/// No free entry left in the arena
#[derive(Clone, Copy, PartialEq, Eq, defmt::Format)]
#[cfg_attr(test, derive(Debug))]
pub struct ArenaFull;

pub struct Conflicts {
    entries: [Option<Entry>; MAX_CONFLICTS],
}

impl Conflicts {
    pub const fn new() -> Self {
        Self { entries: [None; MAX_CONFLICTS] }
    }

    pub fn clear(&mut self) {
        self.entries = [None; MAX_CONFLICTS];
    }

    pub fn is_empty(&self) -> bool {
        self.entries.iter().all(Option::is_none)
    }

    fn entry(&self, i: u8) -> Option<&Entry> {
        self.entries[i as usize].as_ref()
    }

    fn entry_mut(&mut self, i: u8) -> Option<&mut Entry> {
        self.entries[i as usize].as_mut()
    }

    fn head(&self, pos: u8) -> Option<u8> {
        self.entries.iter()
            .position(|e| matches!(e, Some(e) if e.head && e.pos == pos))
            .map(|i| i as u8)
    }

    /// Chain of entry indices starting at `head`, returns the length
    fn chain(&self, head: u8, out: &mut [u8; MAX_CONFLICTS]) -> usize {
        let mut len = 0;
        let mut cur = Some(head);
        while let Some(i) = cur {
            // arena entries can only be linked once, so a chain never exceeds the arena
            if len == MAX_CONFLICTS {
                break;
            }
            out[len] = i;
            len += 1;
            cur = self.entry(i).and_then(|e| e.next);
        }
        len
    }

    /// Routes waiting for given position, in display order
    pub fn waiting(&self, pos: u8) -> impl Iterator<Item = Slot> + '_ {
        let mut cur = self.head(pos);
        core::iter::from_fn(move || {
            let e = self.entry(cur?)?;
            cur = e.next;
            Some(e.route)
        })
    }

    pub fn contains(&self, pos: u8, route: Slot) -> bool {
        self.waiting(pos).any(|r| r == route)
    }

    /// Positions that have routes waiting
    pub fn positions(&self) -> impl Iterator<Item = u8> + '_ {
        self.entries.iter()
            .filter_map(|e| e.as_ref())
            .filter(|e| e.head)
            .map(|e| e.pos)
    }

    /// Append route to the waiting list of a position
    pub fn push(&mut self, pos: u8, route: Slot) -> Result<(), ArenaFull> {
        let free = self.entries.iter().position(Option::is_none).ok_or(ArenaFull)? as u8;
        let tail = self.head(pos).map(|head| {
            let mut chain = [0; MAX_CONFLICTS];
            let len = self.chain(head, &mut chain);
            chain[len - 1]
        });
        self.entries[free as usize] = Some(Entry { pos, route, next: None, head: tail.is_none() });
        if let Some(e) = tail.and_then(|t| self.entry_mut(t)) {
            e.next = Some(free);
        }
        Ok(())
    }

    /// Take the first waiting route of a position
    pub fn pop_front(&mut self, pos: u8) -> Option<Slot> {
        let head = self.head(pos)?;
        let entry = self.entries[head as usize].take()?;
        if let Some(next) = entry.next.and_then(|n| self.entry_mut(n)) {
            next.head = true;
        }
        Some(entry.route)
    }

    /// Move `displayed` to the back of the list and return the route to display instead
    ///
    /// Routes bubble one place forward in their entries so no entry is allocated.
    pub fn rotate(&mut self, pos: u8, displayed: Slot) -> Slot {
        let head = match self.head(pos) {
            Some(head) => head,
            None => return displayed,
        };
        let mut chain = [0; MAX_CONFLICTS];
        let len = self.chain(head, &mut chain);
        let mut carry = displayed;
        for &i in chain[..len].iter().rev() {
            if let Some(e) = self.entry_mut(i) {
                core::mem::swap(&mut e.route, &mut carry);
            }
        }
        carry
    }

    /// Remove all waiting entries of a route, keeping order of the others
    pub fn remove_route(&mut self, route: Slot) {
        for h in 0..MAX_CONFLICTS as u8 {
            if !matches!(self.entry(h), Some(e) if e.head) {
                continue;
            }
            let mut chain = [0; MAX_CONFLICTS];
            let len = self.chain(h, &mut chain);
            let mut prev: Option<u8> = None;
            for &i in chain[..len].iter() {
                let entry = match self.entry(i) {
                    Some(e) => *e,
                    None => continue,
                };
                if entry.route != route {
                    prev = Some(i);
                    continue;
                }
                self.entries[i as usize] = None;
                match prev.and_then(|p| self.entry_mut(p)) {
                    Some(p) => p.next = entry.next,
                    None => {
                        if let Some(n) = entry.next.and_then(|n| self.entry_mut(n)) {
                            n.head = true;
                        }
                    },
                }
            }
        }
    }
}

impl Default for Conflicts {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::vec::Vec;

    fn waiting(c: &Conflicts, pos: u8) -> Vec<Slot> {
        c.waiting(pos).collect()
    }

    #[test]
    fn push_appends_per_position() {
        let mut c = Conflicts::new();
        c.push(10, 1).unwrap();
        c.push(20, 5).unwrap();
        c.push(10, 2).unwrap();
        c.push(10, 3).unwrap();
        assert_eq!(waiting(&c, 10), [1, 2, 3]);
        assert_eq!(waiting(&c, 20), [5]);
        assert!(waiting(&c, 30).is_empty());
        let mut positions: Vec<u8> = c.positions().collect();
        positions.sort();
        assert_eq!(positions, [10, 20]);
    }

    #[test]
    fn arena_capacity() {
        let mut c = Conflicts::new();
        for i in 0..MAX_CONFLICTS as u8 {
            c.push(i % 3, i).unwrap();
        }
        assert_eq!(c.push(0, 100), Err(ArenaFull));
        c.pop_front(0);
        assert_eq!(c.push(0, 100), Ok(()));
        assert_eq!(waiting(&c, 0).last(), Some(&100));
    }

    #[test]
    fn round_robin() {
        // route 0 is displayed, 1..4 wait
        let k = 4;
        let mut c = Conflicts::new();
        for r in 1..k {
            c.push(7, r).unwrap();
        }
        let mut displayed = 0;
        let mut seen = Vec::new();
        for _ in 0..k {
            displayed = c.rotate(7, displayed);
            seen.push(displayed);
        }
        assert_eq!(seen, [1, 2, 3, 0]);
        assert_eq!(waiting(&c, 7), [1, 2, 3]);
    }

    #[test]
    fn rotate_without_list() {
        let mut c = Conflicts::new();
        assert_eq!(c.rotate(3, 4), 4);
    }

    #[test]
    fn pop_front_promotes_next() {
        let mut c = Conflicts::new();
        c.push(1, 4).unwrap();
        c.push(1, 5).unwrap();
        assert_eq!(c.pop_front(1), Some(4));
        assert_eq!(waiting(&c, 1), [5]);
        assert_eq!(c.pop_front(1), Some(5));
        assert_eq!(c.pop_front(1), None);
        assert!(c.is_empty());
    }

    #[test]
    fn remove_keeps_order() {
        let mut c = Conflicts::new();
        for (pos, route) in [(1, 2), (1, 3), (2, 3), (1, 4), (1, 3 + 10), (2, 5)] {
            c.push(pos, route).unwrap();
        }
        c.remove_route(3);
        assert_eq!(waiting(&c, 1), [2, 4, 13]);
        assert_eq!(waiting(&c, 2), [5]);

        c.remove_route(2);
        assert_eq!(waiting(&c, 1), [4, 13]);
        c.remove_route(13);
        assert_eq!(waiting(&c, 1), [4]);
        c.remove_route(4);
        c.remove_route(5);
        assert!(c.is_empty());
    }
}
