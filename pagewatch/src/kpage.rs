//! Per-frame attributes from `/proc/kpagecount` and `/proc/kpageflags`,
//! reading as zero when a file cannot be opened.

use std::fs::File;
use std::io::{Read, Seek};
use std::marker::PhantomData;
use std::ops::Range;
use std::path::PathBuf;

use bitflags::bitflags;
use byteorder::{ByteOrder, LittleEndian};

use crate::config::Config;
use crate::entry::ENTRY_SIZE;
use crate::pagemap::read_records;

bitflags! {
    /// Bits of a `/proc/kpageflags` record. Bits 17 and 19 are not named here;
    /// any bit the kernel sets beyond these is kept as-is.
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PageFlags: u64 {
        const LOCKED = 1 << 0;
        const ERROR = 1 << 1;
        const REFERENCED = 1 << 2;
        const UPTODATE = 1 << 3;
        const DIRTY = 1 << 4;
        const LRU = 1 << 5;
        const ACTIVE = 1 << 6;
        const SLAB = 1 << 7;
        const WRITEBACK = 1 << 8;
        const RECLAIM = 1 << 9;
        const BUDDY = 1 << 10;
        const MMAP = 1 << 11;
        const ANON = 1 << 12;
        const SWAPCACHE = 1 << 13;
        const SWAPBACKED = 1 << 14;
        const COMPOUND_HEAD = 1 << 15;
        const COMPOUND_TAIL = 1 << 16;
        const UNEVICTABLE = 1 << 18;
        const NOPAGE = 1 << 20;
    }
}

impl PageFlags {
    /// The pagemap documentation lists HUGE at bit 16 next to COMPOUND_TAIL.
    /// Whether that is a shared position or a typo for 17 is unclear, so it
    /// is the same bit here.
    pub const HUGE: PageFlags = PageFlags::COMPOUND_TAIL;
}

/// One kind of per-frame record stream.
pub trait FrameAttribute {
    /// File name under the proc root.
    const FILE: &'static str;
    type Value: Copy + Default + PartialEq + std::fmt::Debug;

    fn from_raw(raw: u64) -> Self::Value;
}

/// `/proc/kpagecount`: how many times each frame is mapped.
#[derive(Debug, Clone, Copy)]
pub struct KPageCount;

impl FrameAttribute for KPageCount {
    const FILE: &'static str = "kpagecount";
    type Value = u64;

    fn from_raw(raw: u64) -> u64 {
        raw
    }
}

/// `/proc/kpageflags`: state flags of each frame.
#[derive(Debug, Clone, Copy)]
pub struct KPageFlags;

impl FrameAttribute for KPageFlags {
    const FILE: &'static str = "kpageflags";
    type Value = PageFlags;

    fn from_raw(raw: u64) -> PageFlags {
        PageFlags::from_bits_retain(raw)
    }
}

enum Source<R> {
    Stream(R),
    Fallback { capacity: u64 },
}

pub struct FrameAttributeReader<A, R = File> {
    source: Source<R>,
    path: PathBuf,
    _kind: PhantomData<A>,
}

impl<A: FrameAttribute> FrameAttributeReader<A, File> {
    /// Opens `<proc_root>/<A::FILE>`, or falls back to
    /// `config.fallback_frames` zero entries if that is not possible.
    pub fn open(config: &Config) -> Self {
        let path = config.kpage_path(A::FILE);
        match File::open(&path) {
            Ok(file) => {
                debug!("Opened {}", path.display());
                FrameAttributeReader {
                    source: Source::Stream(file),
                    path,
                    _kind: PhantomData,
                }
            }
            Err(e) => {
                warn!(
                    "Unable to open {} ({}); using {} zero entries",
                    path.display(),
                    e,
                    config.fallback_frames
                );
                FrameAttributeReader {
                    source: Source::Fallback {
                        capacity: config.fallback_frames,
                    },
                    path,
                    _kind: PhantomData,
                }
            }
        }
    }
}

impl<A: FrameAttribute, R: Read + Seek> FrameAttributeReader<A, R> {
    pub fn new(stream: R) -> Self {
        FrameAttributeReader {
            source: Source::Stream(stream),
            path: PathBuf::from(A::FILE),
            _kind: PhantomData,
        }
    }

    pub fn fallback(capacity: u64) -> Self {
        FrameAttributeReader {
            source: Source::Fallback { capacity },
            path: PathBuf::from(A::FILE),
            _kind: PhantomData,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self.source, Source::Fallback { .. })
    }

    /// Number of frames the source can answer for. procfs files refuse
    /// SEEK_END, so the end is found by reading single records.
    pub fn len(&mut self) -> u64 {
        if let Source::Fallback { capacity } = self.source {
            return capacity;
        }
        if !self.has_frame(0) {
            return 0;
        }
        // `lo` is readable, `hi` is not
        let mut lo = 0u64;
        let mut hi = 1u64;
        while self.has_frame(hi) {
            lo = hi;
            hi = match hi.checked_mul(2) {
                Some(next) if next <= u64::MAX / ENTRY_SIZE as u64 => next,
                _ => u64::MAX / ENTRY_SIZE as u64,
            };
            if hi == lo {
                return lo + 1;
            }
        }
        while hi - lo > 1 {
            let mid = lo + (hi - lo) / 2;
            if self.has_frame(mid) {
                lo = mid;
            } else {
                hi = mid;
            }
        }
        lo + 1
    }

    pub fn is_empty(&mut self) -> bool {
        self.len() == 0
    }

    fn has_frame(&mut self, pfn: u64) -> bool {
        let stream = match self.source {
            Source::Fallback { capacity } => return pfn < capacity,
            Source::Stream(ref mut stream) => stream,
        };
        let mut buf = [0u8; ENTRY_SIZE];
        matches!(
            read_records(stream, &self.path, pfn * ENTRY_SIZE as u64, &mut buf),
            Ok(n) if n == ENTRY_SIZE
        )
    }

    /// The record for frame `pfn`. Missing data and read failures read as zero.
    pub fn value_for_frame(&mut self, pfn: u64) -> A::Value {
        let stream = match self.source {
            Source::Fallback { .. } => return A::from_raw(0),
            Source::Stream(ref mut stream) => stream,
        };
        let offset = match pfn.checked_mul(ENTRY_SIZE as u64) {
            Some(offset) => offset,
            None => return A::from_raw(0),
        };
        let mut buf = [0u8; ENTRY_SIZE];
        match read_records(stream, &self.path, offset, &mut buf) {
            Ok(n) if n == ENTRY_SIZE => A::from_raw(LittleEndian::read_u64(&buf)),
            Ok(_) => A::from_raw(0),
            Err(e) => {
                warn!("Reading frame {} failed: {}", pfn, e);
                A::from_raw(0)
            }
        }
    }

    /// Records for the frames in `pfns`, read in one positioned read. Frames
    /// past the end of the data read as zero; a fallback only answers for
    /// frames below its capacity.
    pub fn values_for_range(&mut self, pfns: Range<u64>) -> Vec<A::Value> {
        let stream = match self.source {
            Source::Fallback { capacity } => {
                let count = pfns.end.min(capacity).saturating_sub(pfns.start);
                return vec![A::from_raw(0); count as usize];
            }
            Source::Stream(ref mut stream) => stream,
        };
        let count = pfns.end.saturating_sub(pfns.start);
        let (offset, len) = match (
            pfns.start.checked_mul(ENTRY_SIZE as u64),
            count
                .checked_mul(ENTRY_SIZE as u64)
                .and_then(|len| usize::try_from(len).ok()),
        ) {
            (Some(offset), Some(len)) => (offset, len),
            _ => {
                warn!("Frame range {:?} is too large to read", pfns);
                return Vec::new();
            }
        };
        let count = len / ENTRY_SIZE;
        let mut buf = vec![0u8; len];
        let got = match read_records(stream, &self.path, offset, &mut buf) {
            Ok(got) => got,
            Err(e) => {
                warn!("Reading frames {:?} failed: {}", pfns, e);
                return vec![A::from_raw(0); count];
            }
        };
        // bytes past `got` may hold a partial record
        buf[got..].iter_mut().for_each(|b| *b = 0);
        let mut raw = vec![0u64; count];
        LittleEndian::read_u64_into(&buf, &mut raw);
        raw.into_iter().map(A::from_raw).collect()
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FrameInfo {
    pub count: u64,
    pub flags: PageFlags,
}

/// The count and flags readers, queried together.
pub struct FrameAttributes<R = File> {
    pub count: FrameAttributeReader<KPageCount, R>,
    pub flags: FrameAttributeReader<KPageFlags, R>,
}

impl FrameAttributes<File> {
    pub fn open(config: &Config) -> Self {
        FrameAttributes {
            count: FrameAttributeReader::open(config),
            flags: FrameAttributeReader::open(config),
        }
    }
}

impl<R: Read + Seek> FrameAttributes<R> {
    pub fn new(
        count: FrameAttributeReader<KPageCount, R>,
        flags: FrameAttributeReader<KPageFlags, R>,
    ) -> Self {
        FrameAttributes { count, flags }
    }

    pub fn lookup(&mut self, pfn: u64) -> FrameInfo {
        FrameInfo {
            count: self.count.value_for_frame(pfn),
            flags: self.flags.value_for_frame(pfn),
        }
    }
}
