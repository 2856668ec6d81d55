//! Flash-backed schedule store.
//!
//! The schedule lives at the start of the last 2 KiB flash page. Flash can
//! only be programmed after an erase, so every write copies the region into
//! RAM, patches it, erases the page and programs the region back in
//! double-word units.

use delay_core::persist::{MAX_IMAGE_LEN, NonVolatileStore};
use embassy_stm32::flash::{Blocking, Error as FlashError, FLASH_SIZE, Flash, WRITE_SIZE};

/// Erase granularity on the STM32G0.
pub const PAGE_SIZE: u32 = 2 * 1024;

/// Offset of the schedule page from the start of flash.
pub const STORE_PAGE_OFFSET: u32 = FLASH_SIZE as u32 - PAGE_SIZE;

/// Bytes of the page exposed through [`NonVolatileStore`], rounded up to a
/// whole number of flash words.
pub const REGION_LEN: usize = MAX_IMAGE_LEN.div_ceil(WRITE_SIZE) * WRITE_SIZE;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreError {
    /// Access falls outside the store region.
    OutOfRange { offset: u32, len: usize },
    Flash(FlashError),
}

pub struct FlashStore<'d> {
    flash: Flash<'d, Blocking>,
}

impl<'d> FlashStore<'d> {
    pub fn new(flash: Flash<'d, Blocking>) -> Self {
        Self { flash }
    }

    fn region(offset: u32, len: usize) -> Result<(u32, usize), StoreError> {
        let start = offset as usize;
        match start.checked_add(len) {
            Some(end) if end <= REGION_LEN => Ok((STORE_PAGE_OFFSET + offset, start)),
            _ => Err(StoreError::OutOfRange { offset, len }),
        }
    }
}

impl NonVolatileStore for FlashStore<'_> {
    type Error = StoreError;

    fn read(&mut self, offset: u32, buf: &mut [u8]) -> Result<(), Self::Error> {
        let (address, _) = Self::region(offset, buf.len())?;
        self.flash
            .blocking_read(address, buf)
            .map_err(StoreError::Flash)
    }

    fn write(&mut self, offset: u32, data: &[u8]) -> Result<(), Self::Error> {
        let (_, start) = Self::region(offset, data.len())?;

        let mut region = [0xFFu8; REGION_LEN];
        self.flash
            .blocking_read(STORE_PAGE_OFFSET, &mut region)
            .map_err(StoreError::Flash)?;
        region[start..start + data.len()].copy_from_slice(data);

        self.flash
            .blocking_erase(STORE_PAGE_OFFSET, STORE_PAGE_OFFSET + PAGE_SIZE)
            .map_err(StoreError::Flash)?;
        self.flash
            .blocking_write(STORE_PAGE_OFFSET, &region)
            .map_err(StoreError::Flash)
    }
}
