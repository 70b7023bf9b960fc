use bitfield::bitfield;

use super::NCHANNELS;

bitfield! {
    /// Wiring of a single touch electrode
    ///
    /// Electrode pin (`port`, `pin`), analog multiplexer selector and the ADC
    /// input the multiplexer output is connected to.
    #[derive(Clone, Copy, PartialEq, Eq)]
    pub struct TouchChannel(u16);
    impl Debug;
    u8;
    pub port, _: 1, 0;
    pub pin, _: 5, 2;
    pub amux, _: 7, 6;
    pub adc, _: 11, 8;
}

impl TouchChannel {
    pub const fn new(port: u8, pin: u8, amux: u8, adc: u8) -> Self {
        Self(
            (port as u16 & 0x3)
                | (pin as u16 & 0xf) << 2
                | (amux as u16 & 0x3) << 6
                | (adc as u16 & 0xf) << 8,
        )
    }
}

impl defmt::Format for TouchChannel {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "P{}.{}/mux{}/an{}", self.port(), self.pin(), self.amux(), self.adc());
    }
}

const fn ch(port: u8, pin: u8, amux: u8, adc: u8) -> TouchChannel {
    TouchChannel::new(port, pin, amux, adc)
}

/// Channel index to electrode wiring
pub const CHANNELS: [TouchChannel; NCHANNELS] = [
    ch(1, 2, 0, 4),
    ch(0, 1, 0, 1),
    ch(1, 15, 0, 9),
    ch(1, 14, 2, 10),
    ch(1, 14, 0, 10),
    ch(1, 14, 3, 10),
    ch(1, 14, 1, 10),
    ch(1, 13, 2, 11),
    ch(1, 13, 1, 11),
    ch(1, 13, 0, 11),
    ch(1, 13, 3, 11),
    ch(2, 3, 0, 12),
    ch(2, 2, 0, 8),
    ch(2, 1, 0, 9),
    ch(1, 3, 2, 5),
    ch(1, 3, 0, 5),
    ch(1, 3, 3, 5),
    ch(1, 3, 1, 5),
    ch(2, 0, 2, 6),
    ch(2, 0, 1, 6),
    ch(2, 0, 0, 6),
    ch(2, 0, 3, 6),
];
