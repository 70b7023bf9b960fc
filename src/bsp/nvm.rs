use embedded_storage::nor_flash::{NorFlash, NorFlashError, NorFlashErrorKind, ReadNorFlash};

/// Size of the persisted data block
pub const BLOCK_SIZE: usize = 1024;
/// Marks the block as programmed, stored little endian in the last two bytes
pub const SIGNATURE: u16 = 0x3a9d;
const SIGNATURE_OFFSET: usize = BLOCK_SIZE - 2;

/// Bytes available for user data
pub const DATA_SIZE: usize = SIGNATURE_OFFSET;

#[derive(Clone, Copy, PartialEq, Eq)]
#[cfg_attr(test, derive(Debug))]
pub enum NvmError {
    /// Block has never been programmed
    Invalid,
    /// Access outside of the data area
    OutOfBounds,
    Flash(NorFlashErrorKind),
}

impl defmt::Format for NvmError {
    fn format(&self, f: defmt::Formatter) {
        match self {
            NvmError::Invalid => defmt::write!(f, "Invalid"),
            NvmError::OutOfBounds => defmt::write!(f, "OutOfBounds"),
            NvmError::Flash(kind) => {
                let kind = match kind {
                    NorFlashErrorKind::NotAligned => "not aligned",
                    NorFlashErrorKind::OutOfBounds => "out of bounds",
                    _ => "other",
                };
                defmt::write!(f, "Flash({=str})", kind)
            },
        }
    }
}

/// Small block of persistent bytes that is always rewritten as a whole
pub trait NonVolatileStore {
    /// Whether the block carries a valid signature
    fn is_valid(&self) -> bool;

    /// Read `buf.len()` bytes starting at `offset`, fails if the block is not valid
    fn read(&mut self, offset: usize, buf: &mut [u8]) -> Result<(), NvmError>;

    /// Replace `data.len()` bytes at `offset` keeping the rest of the block,
    /// then erase and program the block together with the signature
    fn program(&mut self, offset: usize, data: &[u8]) -> Result<(), NvmError>;
}

/// [`NonVolatileStore`] in a dedicated region of NOR flash
///
/// The region starts at `base` (aligned to the erase size) and spans at
/// least one erase unit.
pub struct FlashStore<F> {
    flash: F,
    base: u32,
    valid: bool,
}

fn flash_err<E: NorFlashError>(e: E) -> NvmError {
    NvmError::Flash(e.kind())
}

fn check_bounds(offset: usize, len: usize) -> Result<(), NvmError> {
    match offset.checked_add(len) {
        Some(end) if end <= DATA_SIZE => Ok(()),
        _ => Err(NvmError::OutOfBounds),
    }
}

impl<F: NorFlash> FlashStore<F> {
    pub fn new(mut flash: F, base: u32) -> Self {
        debug_assert_eq!(base as usize % F::ERASE_SIZE, 0);
        let mut sig = [0u8; 2];
        let valid = match flash.read(base + SIGNATURE_OFFSET as u32, &mut sig) {
            Ok(()) => u16::from_le_bytes(sig) == SIGNATURE,
            Err(e) => {
                defmt::warn!("NVM signature read failed: {}", flash_err(e));
                false
            },
        };
        defmt::debug!("NVM at 0x{:08x} valid={}", base, valid);
        Self { flash, base, valid }
    }

    pub fn free(self) -> F {
        self.flash
    }

    fn erase_end(&self) -> u32 {
        let size = (BLOCK_SIZE + F::ERASE_SIZE - 1) / F::ERASE_SIZE * F::ERASE_SIZE;
        self.base + size as u32
    }
}

impl<F: NorFlash> NonVolatileStore for FlashStore<F> {
    fn is_valid(&self) -> bool {
        self.valid
    }

    fn read(&mut self, offset: usize, buf: &mut [u8]) -> Result<(), NvmError> {
        if !self.valid {
            return Err(NvmError::Invalid);
        }
        check_bounds(offset, buf.len())?;
        self.flash.read(self.base + offset as u32, buf).map_err(flash_err)
    }

    fn program(&mut self, offset: usize, data: &[u8]) -> Result<(), NvmError> {
        check_bounds(offset, data.len())?;

        let mut block = [0xffu8; BLOCK_SIZE];
        if self.valid {
            self.flash.read(self.base, &mut block[..DATA_SIZE]).map_err(flash_err)?;
        }
        block[offset..offset + data.len()].copy_from_slice(data);
        block[SIGNATURE_OFFSET..].copy_from_slice(&SIGNATURE.to_le_bytes());

        // block is invalid from here on until programming succeeds
        self.valid = false;
        self.flash.erase(self.base, self.erase_end()).map_err(flash_err)?;
        self.flash.write(self.base, &block).map_err(flash_err)?;
        self.valid = true;

        defmt::info!("NVM programmed {} bytes at {}", data.len(), offset);
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use embedded_storage::nor_flash::ErrorType;

    pub const FLASH_SIZE: usize = 2048;

    /// RAM backed flash with NOR semantics (writes can only clear bits)
    pub struct MemFlash {
        pub data: [u8; FLASH_SIZE],
        pub erases: usize,
    }

    impl Default for MemFlash {
        fn default() -> Self {
            Self { data: [0xff; FLASH_SIZE], erases: 0 }
        }
    }

    impl ErrorType for MemFlash {
        type Error = NorFlashErrorKind;
    }

    impl ReadNorFlash for MemFlash {
        const READ_SIZE: usize = 1;

        fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
            let offset = offset as usize;
            let src = self.data.get(offset..offset + bytes.len())
                .ok_or(NorFlashErrorKind::OutOfBounds)?;
            bytes.copy_from_slice(src);
            Ok(())
        }

        fn capacity(&self) -> usize {
            FLASH_SIZE
        }
    }

    impl NorFlash for MemFlash {
        const WRITE_SIZE: usize = 2;
        const ERASE_SIZE: usize = 2048;

        fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error> {
            let range = self.data.get_mut(from as usize..to as usize)
                .ok_or(NorFlashErrorKind::OutOfBounds)?;
            range.fill(0xff);
            self.erases += 1;
            Ok(())
        }

        fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
            let offset = offset as usize;
            if offset % Self::WRITE_SIZE != 0 || bytes.len() % Self::WRITE_SIZE != 0 {
                return Err(NorFlashErrorKind::NotAligned);
            }
            let dst = self.data.get_mut(offset..offset + bytes.len())
                .ok_or(NorFlashErrorKind::OutOfBounds)?;
            for (d, s) in dst.iter_mut().zip(bytes) {
                *d &= *s;
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::mock::MemFlash;

    #[test]
    fn blank_flash_is_invalid() {
        let mut store = FlashStore::new(MemFlash::default(), 0);
        assert!(!store.is_valid());
        let mut buf = [0u8; 4];
        assert_eq!(store.read(0, &mut buf), Err(NvmError::Invalid));
    }

    #[test]
    fn program_sets_signature() {
        let mut store = FlashStore::new(MemFlash::default(), 0);
        store.program(0, &[1, 2, 3]).unwrap();
        assert!(store.is_valid());

        let flash = store.free();
        assert_eq!(&flash.data[..4], &[1, 2, 3, 0xff]);
        assert_eq!(&flash.data[BLOCK_SIZE - 2..BLOCK_SIZE], &[0x9d, 0x3a]);
        assert_eq!(flash.erases, 1);

        // signature is picked up after restart
        let mut store = FlashStore::new(flash, 0);
        assert!(store.is_valid());
        let mut buf = [0u8; 3];
        store.read(0, &mut buf).unwrap();
        assert_eq!(buf, [1, 2, 3]);
    }

    #[test]
    fn partial_program_keeps_other_bytes() {
        let mut store = FlashStore::new(MemFlash::default(), 0);
        store.program(0, &[0xaa; 8]).unwrap();
        store.program(2, &[0x11, 0x22]).unwrap();

        let mut buf = [0u8; 8];
        store.read(0, &mut buf).unwrap();
        assert_eq!(buf, [0xaa, 0xaa, 0x11, 0x22, 0xaa, 0xaa, 0xaa, 0xaa]);
        assert_eq!(store.free().erases, 2);
    }

    #[test]
    fn signature_area_is_not_writable() {
        let mut store = FlashStore::new(MemFlash::default(), 0);
        assert_eq!(store.program(DATA_SIZE - 1, &[0, 0]), Err(NvmError::OutOfBounds));
        assert_eq!(store.program(usize::MAX, &[0]), Err(NvmError::OutOfBounds));
        assert!(!store.is_valid());
    }
}
