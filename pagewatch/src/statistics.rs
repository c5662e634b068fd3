use std::fmt;

use crate::{PageStatus, ProcessMemory};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PageAnalysis {
    pub page_size: u64,
    pub total_pages: u64,
    pub unmapped_pages: u64,
    pub swapped_pages: u64,
    pub present_pages: u64,
    /// Present pages whose frame is mapped exactly once.
    pub unique_pages: u64,
    /// Present pages whose frame is mapped more than once.
    pub shared_pages: u64,
}

impl PageAnalysis {
    pub fn rss_bytes(&self) -> u64 {
        self.present_pages * self.page_size
    }

    /// Unique set size.
    pub fn uss_bytes(&self) -> u64 {
        self.unique_pages * self.page_size
    }

    pub fn swap_bytes(&self) -> u64 {
        self.swapped_pages * self.page_size
    }
}

impl fmt::Display for PageAnalysis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Total pages: {}", self.total_pages)?;
        writeln!(f, "Unmapped pages: {}", self.unmapped_pages)?;
        writeln!(f, "Swapped pages: {}", self.swapped_pages)?;
        writeln!(f, "Present pages: {}", self.present_pages)?;
        writeln!(f, "Shared pages: {}", self.shared_pages)?;
        writeln!(f, "RSS: {} kB", self.rss_bytes() / 1024)?;
        write!(f, "USS: {} kB", self.uss_bytes() / 1024)
    }
}

pub fn page_analytics(memory: &ProcessMemory) -> PageAnalysis {
    let mut analysis = PageAnalysis {
        page_size: memory.page_size,
        ..PageAnalysis::default()
    };
    for segment in &memory.segments {
        let mut present = 0;
        analysis.total_pages += segment.total_pages();
        analysis.unmapped_pages += segment.unmapped_pages;
        for page in &segment.pages {
            match page.status {
                PageStatus::Unmapped => analysis.unmapped_pages += 1,
                PageStatus::Swapped { .. } => analysis.swapped_pages += 1,
                PageStatus::Present { .. } => {
                    analysis.present_pages += 1;
                    present += 1;
                }
            }
            if page.is_unique() {
                analysis.unique_pages += 1;
            } else if page.is_shared() {
                analysis.shared_pages += 1;
            }
        }
        debug!(
            "Segment start {:x} with {} pages, {} present",
            segment.region.start,
            segment.total_pages(),
            present
        );
    }
    analysis
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kpage::{FrameInfo, PageFlags};
    use crate::{maps, Page, VirtualSegment};
    use chrono::Utc;

    fn present(pfn: u64, count: u64) -> Page {
        Page {
            address: 0,
            status: PageStatus::Present { pfn },
            frame: Some(FrameInfo {
                count,
                flags: PageFlags::empty(),
            }),
        }
    }

    #[test]
    fn test_page_analytics() {
        let region = maps::parse("00000000-00005000 rw-p 00000000 00:00 0")
            .unwrap()
            .remove(0);
        let memory = ProcessMemory {
            pid: 1,
            timestamp: Utc::now(),
            page_size: 4096,
            segments: vec![VirtualSegment {
                region,
                pages: vec![
                    present(10, 1),
                    present(11, 2),
                    present(12, 1),
                    Page {
                        address: 0x4000,
                        status: PageStatus::Swapped {
                            swap_type: 0,
                            swap_offset: 9,
                        },
                        frame: None,
                    },
                ],
                unmapped_pages: 1,
            }],
        };
        let analysis = page_analytics(&memory);
        assert_eq!(analysis.total_pages, 5);
        assert_eq!(analysis.present_pages, 3);
        assert_eq!(analysis.unmapped_pages, 1);
        assert_eq!(analysis.swapped_pages, 1);
        assert_eq!(analysis.unique_pages, 2);
        assert_eq!(analysis.shared_pages, 1);
        assert_eq!(analysis.uss_bytes(), 8192);
        assert_eq!(analysis.rss_bytes(), 3 * 4096);
        assert!(analysis.to_string().contains("USS: 8 kB"));
    }
}
