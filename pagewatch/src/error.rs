use std::io;
use std::path::{Path, PathBuf};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A region-map line did not match `start-end perms offset dev inode [path]`.
    #[error("malformed maps line {line_number} ({reason}): {line:?}")]
    Parse {
        line_number: usize,
        line: String,
        reason: &'static str,
    },

    /// A read of a kernel record stream was not 8-byte aligned or sized.
    #[error("unaligned record read: offset {offset}, length {len}")]
    Alignment { offset: u64, len: usize },

    #[error("permission denied opening {}: {source}", .path.display())]
    Permission { path: PathBuf, source: io::Error },

    /// A present, non-swapped page reported a page size other than the base page size.
    #[error("page at 0x{address:x} reports page size {page_size}, expected {expected}")]
    Inconsistency {
        address: u64,
        page_size: u64,
        expected: u64,
    },

    #[error("I/O error on {}: {source}", .path.display())]
    Io { path: PathBuf, source: io::Error },
}

impl Error {
    // Opening a kernel stream: permission problems get their own variant.
    pub(crate) fn open(path: &Path, source: io::Error) -> Self {
        match source.kind() {
            io::ErrorKind::PermissionDenied => Error::Permission {
                path: path.to_path_buf(),
                source,
            },
            _ => Error::Io {
                path: path.to_path_buf(),
                source,
            },
        }
    }

    pub(crate) fn io(path: &Path, source: io::Error) -> Self {
        Error::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
