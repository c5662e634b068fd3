use std::io::{Read, Seek};

use chrono::Utc;

use crate::config::Config;
use crate::error::Result;
use crate::kpage::FrameAttributes;
use crate::maps::{self, MemoryRegion};
use crate::pagemap::PageTableReader;
use crate::walk::RegionPageWalker;
use crate::{Page, PageStatus, ProcessMemory, VirtualSegment};

/// Snapshot of every mapped page of `pid`.
///
/// The maps file is read first, then pagemap is walked region by region.
/// These are separate reads and the process is not paused between them.
///
/// Failing to open pagemap or parse maps aborts the capture. Unreadable
/// kpagecount/kpageflags only zero the frame data.
pub fn capture(pid: u32, config: &Config) -> Result<ProcessMemory> {
    let snapshot_time = Utc::now();
    let regions = maps::read_maps(pid, config)?;
    debug!("Process {} has {} regions", pid, regions.len());

    let mut pagemap = PageTableReader::open(pid, config)?;
    let mut frames = if config.with_frame_attributes {
        Some(FrameAttributes::open(config))
    } else {
        None
    };

    let start_time = Utc::now();
    let mut walker = RegionPageWalker::new(&mut pagemap, config);
    if let Some(frames) = frames.as_mut() {
        walker = walker.with_frames(frames);
    }
    let segments = collect_segments(&mut walker, regions)?;
    debug!(
        "Walked {} segments in {} ms",
        segments.len(),
        (Utc::now() - start_time).num_milliseconds()
    );

    Ok(ProcessMemory {
        pid,
        timestamp: snapshot_time,
        page_size: config.page_size,
        segments,
    })
}

/// Walks each region in order, keeping present and swapped pages and
/// counting the rest.
pub fn collect_segments<R: Read + Seek, F: Read + Seek>(
    walker: &mut RegionPageWalker<'_, R, F>,
    regions: Vec<MemoryRegion>,
) -> Result<Vec<VirtualSegment>> {
    let mut segments = Vec::with_capacity(regions.len());
    for region in regions {
        let mut pages = Vec::new();
        let mut unmapped_pages = 0;
        for resolution in walker.walk(&region) {
            let page = Page::from_resolution(&resolution?);
            if page.status == PageStatus::Unmapped {
                unmapped_pages += 1;
            } else {
                pages.push(page);
            }
        }
        debug!(
            "Segment at 0x{:x} with size {} has {} resolved and {} unmapped pages",
            region.start,
            region.size(),
            pages.len(),
            unmapped_pages
        );
        segments.push(VirtualSegment {
            region,
            pages,
            unmapped_pages,
        });
    }
    Ok(segments)
}
