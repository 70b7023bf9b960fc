//! Mapping between touch channels and holds
//!
//! Several holds share one touch channel. The persisted table stores the channel
//! of every hold, the reverse map lists the holds of each channel. The table is
//! created by the [`train`] state machine which lights the holds one by one and
//! records the channel touched for each. [`gethold`] resolves a touch back to a
//! single hold by cycling through the holds of the touched channel until the
//! user lets go.

pub mod gethold;
pub mod train;

use heapless::Vec;

use crate::bsp::nvm::{NonVolatileStore, NvmError};
use crate::bsp::{NCHANNELS, NHOLDS};

/// Holds that can be assigned to a single channel
pub const MAX_HOLDS_PER_CHANNEL: usize = 15;
/// Table value of holds without a channel
pub const UNMAPPED: u8 = 0xff;
/// Offset of the table in the non-volatile store
const NVM_OFFSET: usize = 0;

/// Shows the hold that the user is asked about
pub trait HoldIndicator {
    fn show_hold(&mut self, hold: u8);
    fn hide_hold(&mut self);
}

pub type ChannelHolds = Vec<u8, MAX_HOLDS_PER_CHANNEL>;

/// Persisted hold to channel table with its reverse map
pub struct HoldMap {
    table: [u8; NHOLDS],
    reverse: [ChannelHolds; NCHANNELS],
    trained: bool,
}

impl HoldMap {
    const NO_HOLDS: ChannelHolds = Vec::new();

    pub fn untrained() -> Self {
        Self {
            table: [UNMAPPED; NHOLDS],
            reverse: [Self::NO_HOLDS; NCHANNELS],
            trained: false,
        }
    }

    pub fn from_table(table: [u8; NHOLDS]) -> Self {
        let mut reverse = [Self::NO_HOLDS; NCHANNELS];
        for (hold, &channel) in table.iter().enumerate() {
            let holds = match reverse.get_mut(channel as usize) {
                Some(holds) => holds,
                None => {
                    if channel != UNMAPPED {
                        defmt::warn!("Hold {} has invalid channel {}", hold, channel);
                    }
                    continue;
                },
            };
            if holds.push(hold as u8).is_err() {
                defmt::warn!("Too many holds on channel {}, dropping {}", channel, hold);
            }
        }
        Self { table, reverse, trained: true }
    }

    /// Read the table, an invalid store gives an untrained map
    pub fn load(store: &mut impl NonVolatileStore) -> Self {
        if !store.is_valid() {
            defmt::info!("No touch map stored");
            return Self::untrained();
        }
        let mut table = [0; NHOLDS];
        match store.read(NVM_OFFSET, &mut table) {
            Ok(()) => Self::from_table(table),
            Err(e) => {
                defmt::warn!("Reading touch map failed: {}", e);
                Self::untrained()
            },
        }
    }

    pub fn store(&self, store: &mut impl NonVolatileStore) -> Result<(), NvmError> {
        store.program(NVM_OFFSET, &self.table)
    }

    pub fn is_trained(&self) -> bool {
        self.trained
    }

    pub fn table(&self) -> &[u8; NHOLDS] {
        &self.table
    }

    /// Holds assigned to a channel in ascending order
    pub fn holds(&self, channel: u8) -> &[u8] {
        self.reverse.get(channel as usize).map_or(&[], |h| h.as_slice())
    }

    pub fn channel(&self, hold: u8) -> Option<u8> {
        let channel = self.table[hold as usize];
        ((channel as usize) < NCHANNELS).then_some(channel)
    }
}

impl Default for HoldMap {
    fn default() -> Self {
        Self::untrained()
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use std::vec::Vec;

    #[derive(Default)]
    pub struct IndicatorMock {
        pub shown: Option<u8>,
        pub history: Vec<u8>,
    }

    impl HoldIndicator for IndicatorMock {
        fn show_hold(&mut self, hold: u8) {
            self.shown = Some(hold);
            self.history.push(hold);
        }

        fn hide_hold(&mut self) {
            self.shown = None;
        }
    }

    /// Every hold mapped to a channel other than 3, except hold 5 which is on 3
    pub fn table_with_hold5_on_ch3() -> [u8; NHOLDS] {
        let mut table = [0; NHOLDS];
        for (i, ch) in table.iter_mut().enumerate() {
            let c = (i % (NCHANNELS - 1)) as u8;
            *ch = if c >= 3 { c + 1 } else { c };
        }
        table[5] = 3;
        table
    }
}
