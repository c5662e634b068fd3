//! Virtual-to-physical page resolution for a running Linux process.
//!
//! maps and pagemap are read at different moments while the target runs;
//! stop it first if the numbers must agree exactly.

#[macro_use]
extern crate scan_fmt;

#[macro_use]
extern crate log;

extern crate byteorder;
extern crate chrono;

pub mod config;
pub mod dump;
pub mod entry;
pub mod error;
pub mod kpage;
pub mod maps;
pub mod pagemap;
pub mod statistics;
pub mod walk;

pub use config::Config;
pub use entry::PageTableEntry;
pub use error::{Error, Result};
pub use kpage::{FrameAttributeReader, FrameAttributes, FrameInfo, PageFlags};
pub use maps::{MemoryRegion, PagePermissions};
pub use pagemap::PageTableReader;
pub use walk::{PageResolution, RegionPageWalker};

use chrono::{DateTime, Utc};

pub struct ProcessMemory {
    pub pid: u32,
    pub timestamp: DateTime<Utc>,
    pub page_size: u64,
    pub segments: Vec<VirtualSegment>,
}

/// One region and its resolved pages. Unmapped pages are only counted, so a
/// sparse reservation costs nothing per page.
pub struct VirtualSegment {
    pub region: MemoryRegion,
    /// Present and swapped pages, in address order.
    pub pages: Vec<Page>,
    pub unmapped_pages: u64,
}

impl VirtualSegment {
    pub fn total_pages(&self) -> u64 {
        self.pages.len() as u64 + self.unmapped_pages
    }

    pub fn present_pages(&self) -> usize {
        self.pages
            .iter()
            .filter(|p| matches!(p.status, PageStatus::Present { .. }))
            .count()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub address: u64,
    pub status: PageStatus,
    pub frame: Option<FrameInfo>,
}

impl Page {
    pub fn from_resolution(resolution: &PageResolution) -> Self {
        Page {
            address: resolution.address,
            status: PageStatus::from_entry(resolution.entry),
            frame: resolution.frame,
        }
    }

    /// Mapped by exactly one page table, i.e. counts towards USS.
    pub fn is_unique(&self) -> bool {
        matches!(self.status, PageStatus::Present { .. })
            && matches!(self.frame, Some(FrameInfo { count: 1, .. }))
    }

    pub fn is_shared(&self) -> bool {
        matches!(self.status, PageStatus::Present { .. })
            && matches!(self.frame, Some(FrameInfo { count, .. }) if count > 1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageStatus {
    /// Not mapped, or no pagemap data for it.
    Unmapped,
    Swapped { swap_type: u64, swap_offset: u64 },
    Present { pfn: u64 },
}

impl PageStatus {
    pub fn from_entry(entry: Option<PageTableEntry>) -> Self {
        let entry = match entry {
            Some(entry) => entry,
            None => return PageStatus::Unmapped,
        };
        if let (Some(swap_type), Some(swap_offset)) = (entry.swap_type(), entry.swap_offset()) {
            return PageStatus::Swapped {
                swap_type,
                swap_offset,
            };
        }
        match entry.pfn() {
            Some(pfn) => PageStatus::Present { pfn },
            None => PageStatus::Unmapped,
        }
    }
}
