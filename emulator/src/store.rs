//! Host stand-ins for the flash page holding the schedule.

use std::fs;
use std::io;
use std::path::PathBuf;

use delay_core::persist::NonVolatileStore;

/// Value read back from bytes that were never written.
pub const ERASED_BYTE: u8 = 0xFF;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HostStoreError {
    Io(io::ErrorKind),
    OffsetOverflow,
}

impl From<io::Error> for HostStoreError {
    fn from(value: io::Error) -> Self {
        HostStoreError::Io(value.kind())
    }
}

enum Backing {
    File(PathBuf),
    Memory(Vec<u8>),
}

/// Byte-addressed store that behaves like erased flash past its end.
pub struct HostStore {
    backing: Backing,
}

impl HostStore {
    /// Store persisted to `path`. A missing file reads as erased.
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            backing: Backing::File(path.into()),
        }
    }

    /// Store that lives for the session only.
    pub fn memory() -> Self {
        Self {
            backing: Backing::Memory(Vec::new()),
        }
    }

    pub fn describe(&self) -> String {
        match &self.backing {
            Backing::File(path) => path.display().to_string(),
            Backing::Memory(_) => "memory".to_string(),
        }
    }

    fn contents(&self) -> io::Result<Vec<u8>> {
        match &self.backing {
            Backing::File(path) => match fs::read(path) {
                Ok(bytes) => Ok(bytes),
                Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
                Err(err) => Err(err),
            },
            Backing::Memory(bytes) => Ok(bytes.clone()),
        }
    }

    fn replace(&mut self, bytes: Vec<u8>) -> io::Result<()> {
        match &mut self.backing {
            Backing::File(path) => fs::write(path, bytes),
            Backing::Memory(current) => {
                *current = bytes;
                Ok(())
            }
        }
    }
}

impl NonVolatileStore for HostStore {
    type Error = HostStoreError;

    fn read(&mut self, offset: u32, buf: &mut [u8]) -> Result<(), Self::Error> {
        let contents = self.contents()?;
        let start = usize::try_from(offset).map_err(|_| HostStoreError::OffsetOverflow)?;
        for (index, byte) in buf.iter_mut().enumerate() {
            *byte = contents.get(start + index).copied().unwrap_or(ERASED_BYTE);
        }
        Ok(())
    }

    fn write(&mut self, offset: u32, data: &[u8]) -> Result<(), Self::Error> {
        let mut contents = self.contents()?;
        let start = usize::try_from(offset).map_err(|_| HostStoreError::OffsetOverflow)?;
        let end = start
            .checked_add(data.len())
            .ok_or(HostStoreError::OffsetOverflow)?;
        if contents.len() < end {
            contents.resize(end, ERASED_BYTE);
        }
        contents[start..end].copy_from_slice(data);
        self.replace(contents)?;
        Ok(())
    }
}
