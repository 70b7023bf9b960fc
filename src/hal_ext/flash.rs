use embedded_storage::nor_flash::{
    ErrorType, NorFlash, NorFlashError, NorFlashErrorKind, ReadNorFlash,
};

use crate::hal;

/// Start of the flash in the address space
const FLASH_BASE: u32 = 0x0800_0000;
/// STM32F072xB
const FLASH_SIZE: usize = 128 * 1024;
const PAGE_SIZE: usize = 2048;

const KEY1: u32 = 0x4567_0123;
const KEY2: u32 = 0xcdef_89ab;

#[derive(Clone, Copy, PartialEq, Eq, Debug, defmt::Format)]
pub enum FlashError {
    NotAligned,
    OutOfBounds,
    /// Programming of a non-erased location
    Programming,
    WriteProtected,
}

impl NorFlashError for FlashError {
    fn kind(&self) -> NorFlashErrorKind {
        match self {
            FlashError::NotAligned => NorFlashErrorKind::NotAligned,
            FlashError::OutOfBounds => NorFlashErrorKind::OutOfBounds,
            _ => NorFlashErrorKind::Other,
        }
    }
}

/// Internal flash as [`NorFlash`], offsets are relative to the flash start
pub struct InternalFlash {
    flash: hal::pac::FLASH,
}

impl InternalFlash {
    /// Flash is already clocked, but HAL keeps `FLASH` after `freeze`
    pub fn new(flash: hal::pac::FLASH) -> Self {
        Self { flash }
    }

    fn check(offset: u32, len: usize, align: usize) -> Result<(), FlashError> {
        let offset = offset as usize;
        if offset % align != 0 || len % align != 0 {
            return Err(FlashError::NotAligned);
        }
        if offset + len > FLASH_SIZE {
            return Err(FlashError::OutOfBounds);
        }
        Ok(())
    }

    fn unlock(&mut self) {
        if self.flash.cr.read().lock().bit_is_set() {
            self.flash.keyr.write(|w| unsafe { w.fkeyr().bits(KEY1) });
            self.flash.keyr.write(|w| unsafe { w.fkeyr().bits(KEY2) });
        }
    }

    fn lock(&mut self) {
        self.flash.cr.modify(|_, w| w.lock().set_bit());
    }

    /// Wait for the current operation and collect its status
    fn wait(&mut self) -> Result<(), FlashError> {
        while self.flash.sr.read().bsy().bit_is_set() {}
        let sr = self.flash.sr.read();
        // flags are cleared by writing 1
        self.flash.sr.write(|w| w.eop().set_bit().pgerr().set_bit().wrprt().set_bit());
        if sr.wrprt().bit_is_set() {
            Err(FlashError::WriteProtected)
        } else if sr.pgerr().bit_is_set() {
            Err(FlashError::Programming)
        } else {
            Ok(())
        }
    }

    fn erase_page(&mut self, address: u32) -> Result<(), FlashError> {
        self.flash.cr.modify(|_, w| w.per().set_bit());
        self.flash.ar.write(|w| unsafe { w.far().bits(address) });
        self.flash.cr.modify(|_, w| w.strt().set_bit());
        let result = self.wait();
        self.flash.cr.modify(|_, w| w.per().clear_bit());
        result
    }

    fn program(&mut self, address: u32, bytes: &[u8]) -> Result<(), FlashError> {
        self.flash.cr.modify(|_, w| w.pg().set_bit());
        let mut result = Ok(());
        for (i, half) in bytes.chunks_exact(2).enumerate() {
            let word = u16::from_le_bytes([half[0], half[1]]);
            let ptr = (address as usize + 2 * i) as *mut u16;
            unsafe { core::ptr::write_volatile(ptr, word) };
            result = self.wait();
            if result.is_err() {
                break;
            }
        }
        self.flash.cr.modify(|_, w| w.pg().clear_bit());
        result
    }
}

impl ErrorType for InternalFlash {
    type Error = FlashError;
}

impl ReadNorFlash for InternalFlash {
    const READ_SIZE: usize = 1;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        Self::check(offset, bytes.len(), Self::READ_SIZE)?;
        let src = (FLASH_BASE + offset) as *const u8;
        for (i, b) in bytes.iter_mut().enumerate() {
            *b = unsafe { core::ptr::read_volatile(src.add(i)) };
        }
        Ok(())
    }

    fn capacity(&self) -> usize {
        FLASH_SIZE
    }
}

impl NorFlash for InternalFlash {
    const WRITE_SIZE: usize = 2;
    const ERASE_SIZE: usize = PAGE_SIZE;

    fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error> {
        if to < from {
            return Err(FlashError::OutOfBounds);
        }
        Self::check(from, (to - from) as usize, Self::ERASE_SIZE)?;
        self.unlock();
        let result = (from..to).step_by(PAGE_SIZE)
            .try_for_each(|page| self.erase_page(FLASH_BASE + page));
        self.lock();
        result
    }

    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        Self::check(offset, bytes.len(), Self::WRITE_SIZE)?;
        self.unlock();
        let result = self.program(FLASH_BASE + offset, bytes);
        self.lock();
        result
    }
}
