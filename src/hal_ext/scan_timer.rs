use crate::display::TickTimer;
use crate::hal;

/// TIM2 running from the core clock, update interrupt paces the matrix scan
pub struct ScanTimer {
    tim: hal::pac::TIM2,
}

impl ScanTimer {
    pub fn new(tim: hal::pac::TIM2, _rcc: &mut hal::rcc::Rcc) -> Self {
        // Need to access `.regs` but it's private
        let rcc_regs = unsafe { &*hal::pac::RCC::ptr() };
        rcc_regs.apb1enr.modify(|_, w| w.tim2en().enabled());
        rcc_regs.apb1rstr.modify(|_, w| w.tim2rst().set_bit());
        rcc_regs.apb1rstr.modify(|_, w| w.tim2rst().clear_bit());

        // Count core clock cycles, update event only on overflow
        tim.psc.write(|w| w.psc().bits(0));
        tim.cr1.write(|w| w.urs().set_bit().arpe().set_bit());
        tim.dier.write(|w| w.uie().set_bit());

        Self { tim }
    }

    /// Acknowledge the update interrupt
    pub fn clear_irq() {
        let tim = unsafe { &*hal::pac::TIM2::ptr() };
        tim.sr.modify(|_, w| w.uif().clear_bit());
    }
}

impl TickTimer for ScanTimer {
    fn set_period(&mut self, ticks: u32) {
        // preloaded, applies from the next update
        self.tim.arr.write(|w| unsafe { w.bits(ticks.saturating_sub(1)) });
    }

    fn start(&mut self) {
        self.tim.cnt.write(|w| unsafe { w.bits(0) });
        self.tim.egr.write(|w| w.ug().set_bit());
        Self::clear_irq();
        self.tim.cr1.modify(|_, w| w.cen().set_bit());
    }

    fn stop(&mut self) {
        self.tim.cr1.modify(|_, w| w.cen().clear_bit());
    }
}
