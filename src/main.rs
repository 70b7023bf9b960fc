#![no_main]
#![no_std]

use panic_probe as _;
use defmt_rtt as _;
use stm32f0xx_hal as hal;
use holdlight as lib;

use lib::display::{FrameFifo, ScanHardware, ScanLock};
use lib::touch::SampleMailbox;

#[allow(dead_code)]
mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

static FIFO: FrameFifo = FrameFifo::new();
static MAILBOX: SampleMailbox = SampleMailbox::new();

/// Scan output shared with the scan interrupt through an RTIC resource
pub struct Locked<M>(M);

impl<M> ScanLock for Locked<M>
where
    M: rtic::Mutex,
    M::T: ScanHardware,
{
    type Hw = M::T;

    fn lock<R>(&mut self, f: impl FnOnce(&mut M::T) -> R) -> R {
        self.0.lock(f)
    }
}

#[rtic::app(device = crate::hal::pac)]
mod app {
    use cortex_m::interrupt::free as ifree;
    use super::hal;
    use hal::prelude::*;
    use hal::gpio::{gpioa, gpiob, Alternate, Output, Pin, PushPull, AF0};
    use hal::spi::{NoMiso, SixteenBit, Spi};

    use super::{built_info, lib, Locked, FIFO, MAILBOX};
    use lib::bsp::columns::{ColumnChain, Tlc5952};
    use lib::bsp::nvm::{FlashStore, BLOCK_SIZE};
    use lib::bsp::rows::RowSelect;
    use lib::display::ScanOutput;
    use lib::hal_ext::{flash::InternalFlash, scan_timer::ScanTimer, touch::AdcTouch};
    use lib::touch::Acquisition;
    use lib::wall::Wall;

    /// Hold map lives in the last 2 KiB page, excluded from the program in memory.x
    const NVM_OFFSET: u32 = 126 * 1024;
    const REPORT_PERIOD_MS: u32 = 5000;

    type OutPin = Pin<Output<PushPull>>;
    type Spi1 = Spi<hal::pac::SPI1, gpioa::PA5<Alternate<AF0>>, NoMiso, gpioa::PA7<Alternate<AF0>>, SixteenBit>;
    type Spi2 = Spi<hal::pac::SPI2, gpiob::PB13<Alternate<AF0>>, NoMiso, gpiob::PB15<Alternate<AF0>>, SixteenBit>;
    type Columns = ColumnChain<Spi1, OutPin, Spi2, OutPin>;
    type Scan = ScanOutput<'static, Columns, RowSelect<OutPin>, ScanTimer>;
    type Store = FlashStore<InternalFlash>;

    #[shared]
    struct Shared {
        scan: Scan,
        #[lock_free]
        touch: Acquisition<'static, AdcTouch>,
    }

    #[local]
    struct Local {
        wall: Wall<'static, Store>,
    }

    #[monotonic(binds = SysTick, default = true)]
    type Mono = systick_monotonic::Systick<MONO_HZ>;
    pub const MONO_HZ: u32 = 1000;

    #[init]
    fn init(cx: init::Context) -> (Shared, Local, init::Monotonics) {
        let core = cx.core;
        let mut dev = cx.device;

        // Scan timer runs from PCLK, keep it at the core clock
        let sysclk: hal::time::Hertz = 48.mhz().into();
        let mut rcc = dev.RCC
            .configure()
            .hsi48()
            .enable_crs(dev.CRS)
            .sysclk(sysclk)
            .pclk(sysclk)
            .freeze(&mut dev.FLASH);

        let gpioa = dev.GPIOA.split(&mut rcc);
        let gpiob = dev.GPIOB.split(&mut rcc);
        let gpioc = dev.GPIOC.split(&mut rcc);

        // Column drivers, one SPI per TLC5952
        let (sck1, mosi1, lat1) = ifree(|cs| (
            gpioa.pa5.into_alternate_af0(cs),
            gpioa.pa7.into_alternate_af0(cs),
            gpioa.pa4.into_push_pull_output(cs).downgrade(),
        ));
        let (sck2, mosi2, lat2) = ifree(|cs| (
            gpiob.pb13.into_alternate_af0(cs),
            gpiob.pb15.into_alternate_af0(cs),
            gpiob.pb12.into_push_pull_output(cs).downgrade(),
        ));
        let spi1 = Spi::spi1(dev.SPI1, (sck1, NoMiso, mosi1), hal::spi::MODE_0, 8.mhz(), &mut rcc)
            .into_16bit_width();
        let spi2 = Spi::spi2(dev.SPI2, (sck2, NoMiso, mosi2), hal::spi::MODE_0, 8.mhz(), &mut rcc)
            .into_16bit_width();
        let columns = ColumnChain::new(Tlc5952::new(spi1, lat1), Tlc5952::new(spi2, lat2)).unwrap();

        // Row decoders
        let rows = ifree(|cs| RowSelect::new(
            [
                gpioc.pc8.into_push_pull_output(cs).downgrade(),
                gpioc.pc9.into_push_pull_output(cs).downgrade(),
                gpioc.pc10.into_push_pull_output(cs).downgrade(),
            ],
            [
                gpioc.pc11.into_push_pull_output(cs).downgrade(),
                gpioc.pc12.into_push_pull_output(cs).downgrade(),
            ],
        ));

        let scan = ScanOutput::new(&FIFO, columns, rows, ScanTimer::new(dev.TIM2, &mut rcc));

        // Touch front end, electrode pins are switched directly through registers
        let (charge, mux) = ifree(|cs| (
            gpioa.pa8.into_push_pull_output(cs).downgrade(),
            [
                gpioc.pc6.into_push_pull_output(cs).downgrade(),
                gpioc.pc7.into_push_pull_output(cs).downgrade(),
            ],
        ));
        let front = AdcTouch::new(dev.ADC, dev.TIM14, charge, mux, &mut rcc);
        let mut touch = Acquisition::new(front, &MAILBOX);
        touch.start();

        let store = FlashStore::new(InternalFlash::new(dev.FLASH), NVM_OFFSET);
        let wall = Wall::new(&FIFO, &MAILBOX, store);

        defmt::info!("Liftoff! v{=str} ({})", built_info::PKG_VERSION, built_info::GIT_COMMIT_HASH_SHORT);
        defmt::debug!("Size of: wall={=usize} scan={=usize} nvm block={=usize}",
            core::mem::size_of::<Wall<'static, Store>>(),
            core::mem::size_of::<Scan>(),
            BLOCK_SIZE,
        );

        let mono = systick_monotonic::Systick::new(core.SYST, sysclk.0);

        (Shared { scan, touch }, Local { wall }, init::Monotonics(mono))
    }

    #[task(binds = TIM2, priority = 3, shared = [scan])]
    fn scan_tick(mut cx: scan_tick::Context) {
        ScanTimer::clear_irq();
        cx.shared.scan.lock(|scan| scan.on_tick());
    }

    #[task(binds = ADC_COMP, priority = 2, shared = [touch])]
    fn touch_conversion(cx: touch_conversion::Context) {
        let sample = AdcTouch::read_conversion();
        cx.shared.touch.on_conversion(sample);
    }

    #[task(binds = TIM14, priority = 2, shared = [touch])]
    fn touch_interval(cx: touch_interval::Context) {
        AdcTouch::clear_interval_irq();
        cx.shared.touch.on_interval();
    }

    /// Cooperative main loop
    #[idle(shared = [scan], local = [wall])]
    fn idle(cx: idle::Context) -> ! {
        let wall = cx.local.wall;
        let mut scan = Locked(cx.shared.scan);
        let mut report_at = REPORT_PERIOD_MS;

        loop {
            let now = monotonics::now().ticks() as u32;

            if let Some(event) = wall.poll(now, &mut scan) {
                defmt::info!("Event: {}", event);
            }

            if now.wrapping_sub(report_at) as i32 >= 0 {
                report_at = now.wrapping_add(REPORT_PERIOD_MS);
                let counters = scan.0.lock(|s| s.pop_counters());
                defmt::info!("Scan: {} Wall: {}", counters, wall.diagnostics());
            }

            // SysTick wakes us up at least every millisecond
            if cfg!(feature = "idle-sleep") {
                rtic::export::wfi();
            }
        }
    }
}
