/// Saturating event counter used for diagnostics
#[derive(Default, Clone, Copy, PartialEq, Eq, defmt::Format)]
#[cfg_attr(test, derive(Debug))]
pub struct Counter {
    cnt: u16,
}

impl Counter {
    pub const fn new() -> Self {
        Self { cnt: 0 }
    }

    pub fn inc(&mut self) {
        self.cnt = self.cnt.saturating_add(1);
    }

    pub fn get(&self) -> u16 {
        self.cnt
    }

    pub fn pop(&mut self) -> u16 {
        let val = self.cnt;
        self.cnt = 0;
        val
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn saturates_and_pops() {
        let mut c = Counter::new();
        for _ in 0..70_000u32 {
            c.inc();
        }
        assert_eq!(c.get(), u16::MAX);
        assert_eq!(c.pop(), u16::MAX);
        assert_eq!(c.get(), 0);
    }
}
