use std::path::PathBuf;

/// Base page size assumed unless configured otherwise.
pub const PAGE_SIZE: u64 = 4096;

/// Frames covered by the zero fallback of an unreadable kpagecount/kpageflags stream.
pub const FALLBACK_FRAMES: u64 = 4 << 20;

/// Page-table records fetched per positioned read while walking a region.
pub const CHUNK_ENTRIES: usize = 512;

#[derive(Debug, Clone)]
pub struct Config {
    pub proc_root: PathBuf,
    pub page_size: u64,
    pub fallback_frames: u64,
    pub chunk_entries: usize,
    /// Reject present pages whose decoded page shift disagrees with `page_size`.
    /// Kernels since 3.11 reuse bits 55-60 as soft-dirty/exclusive markers; turn
    /// this off there.
    pub verify_page_shift: bool,
    pub with_frame_attributes: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            proc_root: PathBuf::from("/proc"),
            page_size: PAGE_SIZE,
            fallback_frames: FALLBACK_FRAMES,
            chunk_entries: CHUNK_ENTRIES,
            verify_page_shift: true,
            with_frame_attributes: true,
        }
    }
}

impl Config {
    pub fn with_proc_root<P: Into<PathBuf>>(mut self, root: P) -> Self {
        self.proc_root = root.into();
        self
    }

    pub fn with_page_size(mut self, page_size: u64) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn with_fallback_frames(mut self, frames: u64) -> Self {
        self.fallback_frames = frames;
        self
    }

    pub fn with_chunk_entries(mut self, entries: usize) -> Self {
        self.chunk_entries = entries.max(1);
        self
    }

    pub fn with_verify_page_shift(mut self, verify: bool) -> Self {
        self.verify_page_shift = verify;
        self
    }

    pub fn with_frame_attributes(mut self, enabled: bool) -> Self {
        self.with_frame_attributes = enabled;
        self
    }

    pub fn maps_path(&self, pid: u32) -> PathBuf {
        self.proc_root.join(pid.to_string()).join("maps")
    }

    pub fn pagemap_path(&self, pid: u32) -> PathBuf {
        self.proc_root.join(pid.to_string()).join("pagemap")
    }

    pub fn kpage_path(&self, file: &str) -> PathBuf {
        self.proc_root.join(file)
    }
}
