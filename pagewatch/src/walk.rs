//! Walking a region page by page.

use std::fs::File;
use std::io::{Read, Seek};

use crate::config::Config;
use crate::entry::PageTableEntry;
use crate::error::{Error, Result};
use crate::kpage::{FrameAttributes, FrameInfo};
use crate::maps::MemoryRegion;
use crate::pagemap::PageTableReader;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageResolution {
    pub address: u64,
    pub vpn: u64,
    /// `None` when the pagemap stream had no record for this page.
    pub entry: Option<PageTableEntry>,
    /// Only for present pages, and only when frame attributes were supplied.
    pub frame: Option<FrameInfo>,
}

impl PageResolution {
    pub fn pfn(&self) -> Option<u64> {
        self.entry.and_then(|e| e.pfn())
    }

    /// No frame: unmapped, in swap, or nothing to read.
    pub fn is_unresolved(&self) -> bool {
        self.pfn().is_none()
    }
}

pub struct RegionPageWalker<'a, R = File, F = File> {
    pagemap: &'a mut PageTableReader<R>,
    frames: Option<&'a mut FrameAttributes<F>>,
    page_size: u64,
    chunk_entries: usize,
    verify_page_shift: bool,
}

impl<'a, R: Read + Seek> RegionPageWalker<'a, R, File> {
    pub fn new(pagemap: &'a mut PageTableReader<R>, config: &Config) -> Self {
        RegionPageWalker {
            pagemap,
            frames: None,
            page_size: config.page_size.max(1),
            chunk_entries: config.chunk_entries.max(1),
            verify_page_shift: config.verify_page_shift,
        }
    }
}

impl<'a, R: Read + Seek, F: Read + Seek> RegionPageWalker<'a, R, F> {
    /// Enrich every present frame with its kpagecount/kpageflags records.
    pub fn with_frames<G: Read + Seek>(
        self,
        frames: &'a mut FrameAttributes<G>,
    ) -> RegionPageWalker<'a, R, G> {
        RegionPageWalker {
            pagemap: self.pagemap,
            frames: Some(frames),
            page_size: self.page_size,
            chunk_entries: self.chunk_entries,
            verify_page_shift: self.verify_page_shift,
        }
    }

    pub fn walk(&mut self, region: &MemoryRegion) -> Walk<'_, R, F> {
        Walk {
            pagemap: &mut *self.pagemap,
            frames: self.frames.as_deref_mut(),
            page_size: self.page_size,
            chunk_entries: self.chunk_entries,
            verify_page_shift: self.verify_page_shift,
            next_addr: region.start,
            end: region.end,
            pending: Vec::new().into_iter(),
            done: false,
        }
    }
}

/// Lazy page sequence of one region. Stops after the first error.
pub struct Walk<'w, R, F> {
    pagemap: &'w mut PageTableReader<R>,
    frames: Option<&'w mut FrameAttributes<F>>,
    page_size: u64,
    chunk_entries: usize,
    verify_page_shift: bool,
    next_addr: u64,
    end: u64,
    pending: std::vec::IntoIter<Option<PageTableEntry>>,
    done: bool,
}

impl<'w, R: Read + Seek, F: Read + Seek> Walk<'w, R, F> {
    fn refill(&mut self) -> Result<()> {
        let remaining = (self.end - self.next_addr).div_ceil(self.page_size);
        let count = remaining.min(self.chunk_entries as u64) as usize;
        let vpn = self.next_addr / self.page_size;
        self.pending = self.pagemap.entries(vpn, count)?.into_iter();
        Ok(())
    }

    fn resolve(
        &mut self,
        address: u64,
        entry: Option<PageTableEntry>,
    ) -> Result<PageResolution> {
        if let Some(e) = entry {
            if self.verify_page_shift
                && e.present
                && !e.swapped
                && e.page_size() != self.page_size
            {
                return Err(Error::Inconsistency {
                    address,
                    page_size: e.page_size(),
                    expected: self.page_size,
                });
            }
        }
        let frame = match (entry.and_then(|e| e.pfn()), self.frames.as_mut()) {
            (Some(pfn), Some(frames)) => Some(frames.lookup(pfn)),
            _ => None,
        };
        Ok(PageResolution {
            address,
            vpn: address / self.page_size,
            entry,
            frame,
        })
    }
}

impl<'w, R: Read + Seek, F: Read + Seek> Iterator for Walk<'w, R, F> {
    type Item = Result<PageResolution>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.next_addr >= self.end {
            return None;
        }
        if self.pending.len() == 0 {
            if let Err(e) = self.refill() {
                self.done = true;
                return Some(Err(e));
            }
        }
        let entry = self.pending.next().flatten();
        let address = self.next_addr;
        self.next_addr = self.next_addr.saturating_add(self.page_size);
        let resolution = self.resolve(address, entry);
        if resolution.is_err() {
            self.done = true;
        }
        Some(resolution)
    }
}
