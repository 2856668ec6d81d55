//! Non-volatile image of the delay schedule.
//!
//! Layout at [`SCHEDULE_BASE_OFFSET`], all fields little-endian `u16`:
//!
//! ```text
//! count | tick[0] pattern[0] | tick[1] pattern[1] | ...
//! ```
//!
//! An erased store reads back `0xFFFF` as the count, which is reported as
//! [`PersistError::Uninitialized`] rather than as corruption.

use core::fmt;

use crate::clock::Ticks;
use crate::schedule::{
    DelayEntry, DelayList, OutputPattern, ScheduleError, example_schedule,
};

/// Byte offset of the schedule image inside the store.
pub const SCHEDULE_BASE_OFFSET: u32 = 0;

/// Count value read back from erased storage.
pub const ERASED_COUNT: u16 = 0xFFFF;

const HEADER_LEN: usize = 2;
const ENTRY_LEN: usize = 4;

/// Largest image [`save_schedule`] stages on the stack.
pub const MAX_IMAGE_LEN: usize = HEADER_LEN + ENTRY_LEN * 64;

/// Bytes needed to store `entries` entries.
pub const fn image_len(entries: usize) -> usize {
    HEADER_LEN + ENTRY_LEN * entries
}

/// Byte-addressed persistent storage.
pub trait NonVolatileStore {
    type Error: Copy + fmt::Debug;

    fn read(&mut self, offset: u32, buf: &mut [u8]) -> Result<(), Self::Error>;

    /// Writes `data` at `offset`. Implementations handle erase granularity.
    fn write(&mut self, offset: u32, data: &[u8]) -> Result<(), Self::Error>;
}

/// Reasons a stored image was rejected.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum ImageFault {
    /// Fewer bytes than the header announces.
    Truncated { needed: usize, available: usize },
    /// Stored count exceeds the schedule capacity.
    CountTooLarge { count: u16, capacity: usize },
    /// Pattern word carries bits outside the port byte.
    InvalidPattern { index: usize, raw: u16 },
    /// Entry does not follow its predecessor.
    Unsorted {
        index: usize,
        previous: Ticks,
        ticks: Ticks,
    },
    /// Entry breaks spacing or capacity.
    InvalidEntry { index: usize, error: ScheduleError },
    /// Output buffer cannot hold the encoded image.
    BufferTooSmall { needed: usize, available: usize },
}

impl fmt::Display for ImageFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageFault::Truncated { needed, available } => {
                write!(f, "image truncated ({available} of {needed} bytes)")
            }
            ImageFault::CountTooLarge { count, capacity } => {
                write!(f, "stored count {count} exceeds capacity {capacity}")
            }
            ImageFault::InvalidPattern { index, raw } => {
                write!(f, "entry {index} has invalid pattern {raw:#06x}")
            }
            ImageFault::Unsorted {
                index,
                previous,
                ticks,
            } => write!(f, "entry {index} at tick {ticks} follows tick {previous}"),
            ImageFault::InvalidEntry { index, error } => {
                write!(f, "entry {index} rejected: {error}")
            }
            ImageFault::BufferTooSmall { needed, available } => {
                write!(f, "image needs {needed} bytes, buffer holds {available}")
            }
        }
    }
}

/// Errors reported while saving or loading the schedule.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum PersistError<E> {
    /// Underlying store failed.
    Store(E),
    /// Store holds no schedule yet.
    Uninitialized,
    /// Stored image is unusable.
    Corrupt(ImageFault),
    /// The built-in example does not fit the configured spacing or capacity.
    DefaultRejected(ScheduleError),
}

impl<E> From<ImageFault> for PersistError<E> {
    fn from(value: ImageFault) -> Self {
        PersistError::Corrupt(value)
    }
}

impl<E: fmt::Debug> fmt::Display for PersistError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PersistError::Store(err) => write!(f, "store error: {err:?}"),
            PersistError::Uninitialized => f.write_str("no schedule stored"),
            PersistError::Corrupt(fault) => write!(f, "stored schedule corrupt: {fault}"),
            PersistError::DefaultRejected(err) => write!(f, "built-in schedule rejected: {err}"),
        }
    }
}

/// Where the schedule returned by [`load_or_default`] came from.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum ScheduleSource {
    Stored,
    /// Store was erased; the example schedule was installed.
    ExampleAfterErased,
    /// Stored image was rejected; the example schedule was installed.
    ExampleAfterCorrupt(ImageFault),
}

/// Encodes `list` into `out`, returning the number of bytes written.
pub fn encode_schedule<const CAPACITY: usize>(
    list: &DelayList<CAPACITY>,
    out: &mut [u8],
) -> Result<usize, ImageFault> {
    let needed = image_len(list.len());
    if out.len() < needed {
        return Err(ImageFault::BufferTooSmall {
            needed,
            available: out.len(),
        });
    }

    let count = u16::try_from(list.len()).map_err(|_| ImageFault::BufferTooSmall {
        needed,
        available: out.len(),
    })?;
    out[..HEADER_LEN].copy_from_slice(&count.to_le_bytes());

    for (slot, entry) in out[HEADER_LEN..needed]
        .chunks_exact_mut(ENTRY_LEN)
        .zip(list.entries())
    {
        slot[..2].copy_from_slice(&entry.ticks.to_le_bytes());
        slot[2..].copy_from_slice(&u16::from(entry.pattern.bits()).to_le_bytes());
    }

    Ok(needed)
}

/// Decodes an image produced by [`encode_schedule`].
pub fn decode_schedule<const CAPACITY: usize>(
    bytes: &[u8],
    min_spacing: Ticks,
) -> Result<DelayList<CAPACITY>, PersistError<core::convert::Infallible>> {
    let count = decode_count::<CAPACITY>(bytes.get(..HEADER_LEN).ok_or(
        ImageFault::Truncated {
            needed: HEADER_LEN,
            available: bytes.len(),
        },
    )?)?;

    let needed = image_len(usize::from(count));
    let body = bytes
        .get(HEADER_LEN..needed)
        .ok_or(ImageFault::Truncated {
            needed,
            available: bytes.len(),
        })?;

    let mut list = DelayList::new();
    for (index, raw) in body.chunks_exact(ENTRY_LEN).enumerate() {
        push_entry(&mut list, index, raw, min_spacing)?;
    }
    Ok(list)
}

/// Writes `list` to the store at [`SCHEDULE_BASE_OFFSET`].
pub fn save_schedule<S, const CAPACITY: usize>(
    store: &mut S,
    list: &DelayList<CAPACITY>,
) -> Result<usize, PersistError<S::Error>>
where
    S: NonVolatileStore,
{
    let mut image = [0u8; MAX_IMAGE_LEN];
    let len = encode_schedule(list, &mut image)?;
    store
        .write(SCHEDULE_BASE_OFFSET, &image[..len])
        .map_err(PersistError::Store)?;
    Ok(len)
}

/// Reads the schedule stored at [`SCHEDULE_BASE_OFFSET`].
pub fn load_schedule<S, const CAPACITY: usize>(
    store: &mut S,
    min_spacing: Ticks,
) -> Result<DelayList<CAPACITY>, PersistError<S::Error>>
where
    S: NonVolatileStore,
{
    let mut header = [0u8; HEADER_LEN];
    store
        .read(SCHEDULE_BASE_OFFSET, &mut header)
        .map_err(PersistError::Store)?;
    let count = decode_count::<CAPACITY>(&header).map_err(widen)?;

    let mut list = DelayList::new();
    let mut offset = SCHEDULE_BASE_OFFSET + HEADER_LEN as u32;
    for index in 0..usize::from(count) {
        let mut raw = [0u8; ENTRY_LEN];
        store.read(offset, &mut raw).map_err(PersistError::Store)?;
        push_entry(&mut list, index, &raw, min_spacing)?;
        offset += ENTRY_LEN as u32;
    }
    Ok(list)
}

/// Loads the stored schedule, installing the example schedule when the store
/// is erased or holds an unusable image. Store failures are still reported,
/// as is an example schedule that `min_spacing` or `CAPACITY` cannot hold.
pub fn load_or_default<S, const CAPACITY: usize>(
    store: &mut S,
    min_spacing: Ticks,
) -> Result<(DelayList<CAPACITY>, ScheduleSource), PersistError<S::Error>>
where
    S: NonVolatileStore,
{
    match load_schedule(store, min_spacing) {
        Ok(list) => Ok((list, ScheduleSource::Stored)),
        Err(PersistError::Uninitialized) => Ok((
            example_schedule(min_spacing).map_err(PersistError::DefaultRejected)?,
            ScheduleSource::ExampleAfterErased,
        )),
        Err(PersistError::Corrupt(fault)) => Ok((
            example_schedule(min_spacing).map_err(PersistError::DefaultRejected)?,
            ScheduleSource::ExampleAfterCorrupt(fault),
        )),
        Err(err @ (PersistError::Store(_) | PersistError::DefaultRejected(_))) => Err(err),
    }
}

fn decode_count<const CAPACITY: usize>(
    header: &[u8],
) -> Result<u16, PersistError<core::convert::Infallible>> {
    let count = u16::from_le_bytes([header[0], header[1]]);
    if count == ERASED_COUNT {
        return Err(PersistError::Uninitialized);
    }
    if usize::from(count) > CAPACITY {
        return Err(PersistError::Corrupt(ImageFault::CountTooLarge {
            count,
            capacity: CAPACITY,
        }));
    }
    Ok(count)
}

fn push_entry<const CAPACITY: usize>(
    list: &mut DelayList<CAPACITY>,
    index: usize,
    raw: &[u8],
    min_spacing: Ticks,
) -> Result<(), ImageFault> {
    let ticks = u16::from_le_bytes([raw[0], raw[1]]);
    let pattern_word = u16::from_le_bytes([raw[2], raw[3]]);
    let pattern = u8::try_from(pattern_word).map_err(|_| ImageFault::InvalidPattern {
        index,
        raw: pattern_word,
    })?;

    if let Some(previous) = list.entries().last() {
        if ticks <= previous.ticks {
            return Err(ImageFault::Unsorted {
                index,
                previous: previous.ticks,
                ticks,
            });
        }
    }

    let entry = DelayEntry::new(ticks, OutputPattern::from_bits(pattern));
    list.insert_entry(entry.ticks, Some(entry.pattern), min_spacing)
        .map(|_| ())
        .map_err(|error| ImageFault::InvalidEntry { index, error })
}

fn widen<E>(error: PersistError<core::convert::Infallible>) -> PersistError<E> {
    match error {
        PersistError::Uninitialized => PersistError::Uninitialized,
        PersistError::Corrupt(fault) => PersistError::Corrupt(fault),
        PersistError::DefaultRejected(err) => PersistError::DefaultRejected(err),
        PersistError::Store(never) => match never {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::{EXAMPLE_SCHEDULE, SCHEDULE_CAPACITY, TimingViolation};

    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    struct OutOfBounds;

    struct RamStore {
        bytes: [u8; 64],
    }

    impl RamStore {
        fn erased() -> Self {
            Self { bytes: [0xFF; 64] }
        }
    }

    impl NonVolatileStore for RamStore {
        type Error = OutOfBounds;

        fn read(&mut self, offset: u32, buf: &mut [u8]) -> Result<(), Self::Error> {
            let start = offset as usize;
            let src = self.bytes.get(start..start + buf.len()).ok_or(OutOfBounds)?;
            buf.copy_from_slice(src);
            Ok(())
        }

        fn write(&mut self, offset: u32, data: &[u8]) -> Result<(), Self::Error> {
            let start = offset as usize;
            let dst = self
                .bytes
                .get_mut(start..start + data.len())
                .ok_or(OutOfBounds)?;
            dst.copy_from_slice(data);
            Ok(())
        }
    }

    fn example() -> DelayList {
        DelayList::from_entries(&EXAMPLE_SCHEDULE, 10).expect("example")
    }

    #[test]
    fn encodes_little_endian_layout() {
        let mut out = [0u8; 32];
        let len = encode_schedule(&example(), &mut out).expect("encode");
        assert_eq!(len, 18);
        assert_eq!(&out[..6], &[4, 0, 13, 0, 0xF8, 0]);
        assert_eq!(&out[14..18], &[228, 0, 0, 0]);
    }

    #[test]
    fn encode_rejects_short_buffer() {
        let mut out = [0u8; 8];
        assert_eq!(
            encode_schedule(&example(), &mut out),
            Err(ImageFault::BufferTooSmall {
                needed: 18,
                available: 8
            })
        );
    }

    #[test]
    fn decode_reports_erased_header() {
        let result = decode_schedule::<SCHEDULE_CAPACITY>(&[0xFF, 0xFF], 10);
        assert_eq!(result, Err(PersistError::Uninitialized));
    }

    #[test]
    fn decode_rejects_oversized_count() {
        let result = decode_schedule::<SCHEDULE_CAPACITY>(&[11, 0], 10);
        assert!(matches!(
            result,
            Err(PersistError::Corrupt(ImageFault::CountTooLarge { count: 11, .. }))
        ));
    }

    #[test]
    fn decode_rejects_unsorted_entries() {
        let image = [2, 0, 40, 0, 0, 0, 20, 0, 0, 0];
        assert!(matches!(
            decode_schedule::<SCHEDULE_CAPACITY>(&image, 10),
            Err(PersistError::Corrupt(ImageFault::Unsorted {
                index: 1,
                previous: 40,
                ticks: 20
            }))
        ));
    }

    #[test]
    fn decode_rejects_truncated_body() {
        let image = [2, 0, 40, 0, 0, 0];
        assert!(matches!(
            decode_schedule::<SCHEDULE_CAPACITY>(&image, 10),
            Err(PersistError::Corrupt(ImageFault::Truncated { needed: 10, .. }))
        ));
    }

    #[test]
    fn store_round_trip() {
        let mut store = RamStore::erased();
        save_schedule(&mut store, &example()).expect("save");
        let loaded: DelayList = load_schedule(&mut store, 10).expect("load");
        assert_eq!(loaded, example());
    }

    #[test]
    fn load_or_default_installs_example_on_erased_store() {
        let mut store = RamStore::erased();
        let (list, source) =
            load_or_default::<_, SCHEDULE_CAPACITY>(&mut store, 10).expect("load");
        assert_eq!(source, ScheduleSource::ExampleAfterErased);
        assert_eq!(list.entries(), &EXAMPLE_SCHEDULE);
    }

    #[test]
    fn load_or_default_replaces_corrupt_image() {
        let mut store = RamStore::erased();
        store.bytes[..6].copy_from_slice(&[1, 0, 20, 0, 0x00, 0x01]);
        let (list, source) =
            load_or_default::<_, SCHEDULE_CAPACITY>(&mut store, 10).expect("load");
        assert!(matches!(
            source,
            ScheduleSource::ExampleAfterCorrupt(ImageFault::InvalidPattern { index: 0, raw: 0x0100 })
        ));
        assert_eq!(list.len(), EXAMPLE_SCHEDULE.len());
    }

    #[test]
    fn load_or_default_reports_example_that_breaks_spacing() {
        let mut store = RamStore::erased();
        let result = load_or_default::<_, SCHEDULE_CAPACITY>(&mut store, 20);
        assert!(matches!(
            result,
            Err(PersistError::DefaultRejected(ScheduleError::Timing(
                TimingViolation::TooCloseToPrevious { previous: 0, requested: 13, .. }
            )))
        ));

        save_schedule(&mut store, &DelayList::<SCHEDULE_CAPACITY>::new()).expect("save");
        let (list, source) =
            load_or_default::<_, SCHEDULE_CAPACITY>(&mut store, 20).expect("stored");
        assert_eq!(source, ScheduleSource::Stored);
        assert!(list.is_empty());
    }

    #[test]
    fn decode_rejects_entries_below_spacing() {
        let image = [1, 0, 4, 0, 0, 0];
        assert!(matches!(
            decode_schedule::<SCHEDULE_CAPACITY>(&image, 10),
            Err(PersistError::Corrupt(ImageFault::InvalidEntry { index: 0, .. }))
        ));
    }

    #[test]
    fn load_propagates_store_errors() {
        let mut list = DelayList::<SCHEDULE_CAPACITY>::new();
        for step in 0..10u16 {
            list.insert_entry(20 + step * 10, None, 10).expect("entry");
        }
        let mut store = RamStore::erased();
        save_schedule(&mut store, &list).expect("save");

        let mut short = ShortStore(&mut store);
        let result = load_schedule::<_, SCHEDULE_CAPACITY>(&mut short, 10);
        assert_eq!(result, Err(PersistError::Store(OutOfBounds)));
    }

    /// Store whose readable window ends after 16 bytes.
    struct ShortStore<'a>(&'a mut RamStore);

    impl NonVolatileStore for ShortStore<'_> {
        type Error = OutOfBounds;

        fn read(&mut self, offset: u32, buf: &mut [u8]) -> Result<(), Self::Error> {
            if offset as usize + buf.len() > 16 {
                return Err(OutOfBounds);
            }
            self.0.read(offset, buf)
        }

        fn write(&mut self, offset: u32, data: &[u8]) -> Result<(), Self::Error> {
            self.0.write(offset, data)
        }
    }
}
