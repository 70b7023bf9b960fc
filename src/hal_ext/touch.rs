use crate::bsp::channels::TouchChannel;
use crate::bsp::CLOCK_FREQUENCY;
use crate::hal;
use crate::touch::TouchFrontEnd;
use crate::utils::{drive_bus, InfallibleResult};
use embedded_hal::digital::v2::OutputPin;
use hal::gpio::{Output, Pin, PushPull};

/// Delay between touch rounds
pub const INTERVAL_MS: u16 = 5;

type OutPin = Pin<Output<PushPull>>;

// GPIO ports share the register layout
fn port(port: u8) -> &'static hal::pac::gpioa::RegisterBlock {
    let ptr = match port {
        0 => hal::pac::GPIOA::ptr(),
        1 => hal::pac::GPIOB::ptr() as *const _,
        _ => hal::pac::GPIOC::ptr() as *const _,
    };
    unsafe { &*ptr }
}

/// Touch front end using the ADC, a charge pin driving the electrodes through
/// a resistor, the analog multiplexers and TIM14 for the round interval
pub struct AdcTouch {
    adc: hal::pac::ADC,
    interval: hal::pac::TIM14,
    charge: OutPin,
    mux: [OutPin; 2],
}

impl AdcTouch {
    pub fn new(
        adc: hal::pac::ADC,
        interval: hal::pac::TIM14,
        charge: OutPin,
        mux: [OutPin; 2],
        _rcc: &mut hal::rcc::Rcc,
    ) -> Self {
        let rcc_regs = unsafe { &*hal::pac::RCC::ptr() };
        rcc_regs.apb2enr.modify(|_, w| w.adcen().enabled());
        rcc_regs.apb1enr.modify(|_, w| w.tim14en().enabled());

        // ADC on PCLK/2, calibrate before enabling
        adc.cfgr2.write(|w| unsafe { w.bits(0b01 << 30) });
        adc.cr.modify(|_, w| w.adcal().set_bit());
        while adc.cr.read().adcal().bit_is_set() {}
        adc.cr.modify(|_, w| w.aden().set_bit());
        while adc.isr.read().adrdy().bit_is_clear() {}
        // 41.5 cycles, this is also the electrode charge time
        adc.smpr.write(|w| unsafe { w.bits(0b100) });
        adc.ier.write(|w| w.eocie().set_bit());

        // Millisecond timer, halted after each update
        interval.psc.write(|w| w.psc().bits((CLOCK_FREQUENCY / 1000 - 1) as u16));
        interval.arr.write(|w| unsafe { w.bits(INTERVAL_MS as u32) });
        interval.cr1.write(|w| w.urs().set_bit());
        interval.egr.write(|w| w.ug().set_bit());
        interval.sr.modify(|_, w| w.uif().clear_bit());
        interval.dier.write(|w| w.uie().set_bit());

        let mut s = Self { adc, interval, charge, mux };
        s.charge.set_low().infallible();
        s
    }

    /// Result of the finished conversion, clears the interrupt
    pub fn read_conversion() -> u16 {
        let adc = unsafe { &*hal::pac::ADC::ptr() };
        adc.dr.read().bits() as u16
    }

    /// Acknowledge the interval interrupt
    pub fn clear_interval_irq() {
        let tim = unsafe { &*hal::pac::TIM14::ptr() };
        tim.sr.modify(|_, w| w.uif().clear_bit());
    }

    fn set_mode(channel: &TouchChannel, mode: u32) {
        let gpio = port(channel.port());
        let shift = 2 * channel.pin() as u32;
        gpio.moder.modify(|r, w| unsafe { w.bits(r.bits() & !(0b11 << shift) | mode << shift) });
    }
}

impl TouchFrontEnd for AdcTouch {
    fn discharge(&mut self, channel: &TouchChannel) {
        port(channel.port()).bsrr.write(|w| unsafe { w.bits(1 << (channel.pin() as u32 + 16)) });
        Self::set_mode(channel, 0b01);
    }

    fn select(&mut self, channel: &TouchChannel) {
        drive_bus(&mut self.mux, channel.amux());
        Self::set_mode(channel, 0b11);
        self.adc.chselr.write(|w| unsafe { w.bits(1 << channel.adc() as u32) });
    }

    fn start_pulse(&mut self) {
        self.charge.set_high().infallible();
        self.adc.cr.modify(|_, w| w.adstart().set_bit());
    }

    fn stop_pulse(&mut self) {
        self.charge.set_low().infallible();
    }

    fn start_interval(&mut self) {
        self.interval.cnt.write(|w| unsafe { w.bits(0) });
        self.interval.cr1.modify(|_, w| w.cen().set_bit());
    }

    // TIM14 has no one-pulse mode
    fn stop_interval(&mut self) {
        self.interval.cr1.modify(|_, w| w.cen().clear_bit());
    }
}
