//! Positioned reads of `/proc/PID/pagemap`, always whole 8-byte records.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use byteorder::{ByteOrder, LittleEndian};

use crate::config::Config;
use crate::entry::{PageTableEntry, ENTRY_SIZE};
use crate::error::{Error, Result};

pub struct PageTableReader<R = File> {
    stream: R,
    path: PathBuf,
}

impl PageTableReader<File> {
    /// Opens `<proc_root>/<pid>/pagemap`. Failure is fatal for a walk.
    pub fn open(pid: u32, config: &Config) -> Result<Self> {
        let path = config.pagemap_path(pid);
        let stream = File::open(&path).map_err(|e| Error::open(&path, e))?;
        debug!("Opened {}", path.display());
        Ok(PageTableReader { stream, path })
    }
}

impl<R: Read + Seek> PageTableReader<R> {
    pub fn new(stream: R) -> Self {
        PageTableReader {
            stream,
            path: PathBuf::from("pagemap"),
        }
    }

    /// The decoded record for virtual page `vpn`, or `None` if the stream has
    /// no data there.
    pub fn entry_for_page(&mut self, vpn: u64) -> Result<Option<PageTableEntry>> {
        let offset = match vpn.checked_mul(ENTRY_SIZE as u64) {
            Some(offset) => offset,
            None => return Ok(None),
        };
        let mut buf = [0u8; ENTRY_SIZE];
        if self.read_records(offset, &mut buf)? < ENTRY_SIZE {
            return Ok(None);
        }
        Ok(Some(PageTableEntry::decode(&buf)))
    }

    /// Records for `count` consecutive pages starting at `first_vpn`, read in
    /// one positioned read. Pages past the end of the data come back `None`.
    pub fn entries(
        &mut self,
        first_vpn: u64,
        count: usize,
    ) -> Result<Vec<Option<PageTableEntry>>> {
        let offset = match first_vpn.checked_mul(ENTRY_SIZE as u64) {
            Some(offset) => offset,
            None => return Ok(vec![None; count]),
        };
        let mut buf = vec![0u8; count * ENTRY_SIZE];
        let got = self.read_records(offset, &mut buf)? / ENTRY_SIZE;
        let mut raw = vec![0u64; got];
        LittleEndian::read_u64_into(&buf[..got * ENTRY_SIZE], &mut raw);
        let mut entries: Vec<Option<PageTableEntry>> = raw
            .into_iter()
            .map(|value| Some(PageTableEntry::from_raw(value)))
            .collect();
        entries.resize(count, None);
        Ok(entries)
    }

    pub fn into_inner(self) -> R {
        self.stream
    }

    fn read_records(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        read_records(&mut self.stream, &self.path, offset, buf)
    }
}

/// Fills `buf` from `offset` until it is full or the stream ends, and returns
/// how many bytes of whole records were read. Shared by every kernel record
/// stream, all of which have the same alignment rule.
pub(crate) fn read_records<R: Read + Seek>(
    stream: &mut R,
    path: &Path,
    offset: u64,
    buf: &mut [u8],
) -> Result<usize> {
    if offset % ENTRY_SIZE as u64 != 0 || buf.len() % ENTRY_SIZE != 0 {
        return Err(Error::Alignment {
            offset,
            len: buf.len(),
        });
    }
    stream
        .seek(SeekFrom::Start(offset))
        .map_err(|e| Error::io(path, e))?;
    let mut filled = 0;
    while filled < buf.len() {
        match stream.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(Error::io(path, e)),
        }
    }
    Ok(filled - filled % ENTRY_SIZE)
}
