//! Parsing of `/proc/PID/maps`. Regions come back in file order, unmerged.

use std::fmt;
use std::fs::File;
use std::io::Read;

use bitflags::bitflags;
use chrono::Utc;

use crate::config::Config;
use crate::error::{Error, Result};

bitflags! {
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PagePermissions: u8 {
        const READ = 1;
        const WRITE = 1 << 1;
        const EXECUTE = 1 << 2;
        const SHARED = 1 << 3;
        const PRIVATE = 1 << 4;
    }
}

impl PagePermissions {
    /// Maps each permission character to its flag. Characters other than
    /// `rwxsp-` contribute nothing here; `MemoryRegion::perms` keeps them.
    pub fn from_chars(perms: &str) -> Self {
        perms.chars().fold(PagePermissions::empty(), |acc, c| match c {
            'r' => acc | PagePermissions::READ,
            'w' => acc | PagePermissions::WRITE,
            'x' => acc | PagePermissions::EXECUTE,
            's' => acc | PagePermissions::SHARED,
            'p' => acc | PagePermissions::PRIVATE,
            _ => acc,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryRegion {
    pub start: u64,
    pub end: u64,
    pub permissions: PagePermissions,
    /// Permission field as printed, including characters without a flag.
    pub perms: String,
    pub offset: u64,
    /// `major:minor`, as printed.
    pub device: String,
    pub inode: u64,
    pub path: Option<String>,
}

impl MemoryRegion {
    pub fn size(&self) -> u64 {
        self.end - self.start
    }

    pub fn page_count(&self, page_size: u64) -> u64 {
        self.size().div_ceil(page_size.max(1))
    }

    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.start && addr < self.end
    }

    pub fn is_anonymous(&self) -> bool {
        self.path.is_none()
    }

    /// `[heap]`, `[stack]`, `[vdso]`, `[vsyscall]` and friends.
    pub fn is_pseudo(&self) -> bool {
        self.path
            .as_deref()
            .map_or(false, |p| p.starts_with('[') && p.ends_with(']'))
    }
}

impl fmt::Display for MemoryRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:08x}-{:08x} {} {:08x} {} {:<10} {}",
            self.start,
            self.end,
            self.perms,
            self.offset,
            self.device,
            self.inode,
            self.path.as_deref().unwrap_or("")
        )
    }
}

// Splits off the next whitespace-delimited token.
fn next_token(s: &str) -> Option<(&str, &str)> {
    let s = s.trim_start();
    if s.is_empty() {
        return None;
    }
    match s.find(char::is_whitespace) {
        Some(idx) => Some((&s[..idx], &s[idx..])),
        None => Some((s, "")),
    }
}

// True when `token` is two runs of hex digits joined by a single `sep`.
fn is_hex_pair(token: &str, sep: char) -> bool {
    match token.split_once(sep) {
        Some((a, b)) => {
            !a.is_empty()
                && !b.is_empty()
                && a.chars().all(|c| c.is_ascii_hexdigit())
                && b.chars().all(|c| c.is_ascii_hexdigit())
        }
        None => false,
    }
}

fn parse_line(line_number: usize, line: &str) -> Result<MemoryRegion> {
    let fail = |reason: &'static str| {
        error!("Unable to parse maps line {}: {}", line_number, line);
        Error::Parse {
            line_number,
            line: line.to_string(),
            reason,
        }
    };

    let (range, rest) = next_token(line).ok_or_else(|| fail("empty line"))?;
    if !is_hex_pair(range, '-') {
        return Err(fail("bad address range"));
    }
    let (start, end) = scan_fmt!(range, "{x}-{x}", [hex u64], [hex u64])
        .map_err(|_| fail("bad address range"))?;
    if start >= end {
        return Err(fail("start not below end"));
    }

    let (perms, rest) = next_token(rest).ok_or_else(|| fail("missing permissions"))?;

    let (offset, rest) = next_token(rest).ok_or_else(|| fail("missing offset"))?;
    let offset = u64::from_str_radix(offset, 16).map_err(|_| fail("bad offset"))?;

    let (device, rest) = next_token(rest).ok_or_else(|| fail("missing device"))?;
    if !is_hex_pair(device, ':') {
        return Err(fail("bad device"));
    }
    scan_fmt!(device, "{x}:{x}", [hex u32], [hex u32]).map_err(|_| fail("bad device"))?;

    let (inode, rest) = next_token(rest).ok_or_else(|| fail("missing inode"))?;
    if !inode.chars().all(|c| c.is_ascii_digit()) {
        return Err(fail("bad inode"));
    }
    let inode = inode.parse::<u64>().map_err(|_| fail("bad inode"))?;

    // The path may contain spaces (and a " (deleted)" suffix); keep it whole.
    let path = rest.trim_start().trim_end_matches(|c: char| c == '\r' || c == '\n');
    let path = if path.is_empty() {
        None
    } else {
        Some(path.to_string())
    };

    Ok(MemoryRegion {
        start,
        end,
        permissions: PagePermissions::from_chars(perms),
        perms: perms.to_string(),
        offset,
        device: device.to_string(),
        inode,
        path,
    })
}

/// Parses region-map text, one region per line, in file order.
pub fn parse(text: &str) -> Result<Vec<MemoryRegion>> {
    text.lines()
        .enumerate()
        .map(|(idx, line)| parse_line(idx + 1, line))
        .collect()
}

/// Reads `<proc_root>/<pid>/maps` in one read and parses it.
pub fn read_maps(pid: u32, config: &Config) -> Result<Vec<MemoryRegion>> {
    let start_time = Utc::now();
    let path = config.maps_path(pid);
    let mut file = File::open(&path).map_err(|e| Error::open(&path, e))?;
    let mut text = String::new();
    file.read_to_string(&mut text).map_err(|e| Error::io(&path, e))?;
    let regions = parse(&text)?;
    debug!(
        "Parsed {} regions from {} in {} ms",
        regions.len(),
        path.display(),
        (Utc::now() - start_time).num_milliseconds()
    );
    Ok(regions)
}

/// First region whose `[start, end)` holds `addr`.
pub fn find_region(regions: &[MemoryRegion], addr: u64) -> Option<&MemoryRegion> {
    regions.iter().find(|r| r.contains(addr))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
00400000-00407000 r-xp 00000000 08:01 2998286        /bin/bzip2
00606000-00607000 r--p 00006000 08:01 2998286        /bin/bzip2
00608000-00609000 rw-p 00608000 00:00 0
023a7000-023c8000 rw-p 023a7000 00:00 0              [heap]
7f2259a68000-7f2259bd0000 r-xp 00000000 08:01 91302  /lib/libc-2.9.so
7f2259bd0000-7f2259dd0000 ---p 00168000 08:01 91302  /lib/libc-2.9.so
7fff621f6000-7fff6220b000 rw-p 7ffffffea000 00:00 0  [stack]
7fff623fe000-7fff623ff000 r-xp 7fff623fe000 00:00 0  [vdso]
ffffffffff600000-ffffffffff601000 r-xp 00000000 00:00 0  [vsyscall]
";

    #[test]
    fn test_sample_one_region_per_line() {
        let regions = parse(SAMPLE).unwrap();
        assert_eq!(regions.len(), SAMPLE.lines().count());
        for r in &regions {
            assert!(r.start < r.end);
        }
    }

    #[test]
    fn test_file_backed_line() {
        let regions = parse(SAMPLE).unwrap();
        let bzip = &regions[0];
        assert_eq!(bzip.start, 0x0040_0000);
        assert_eq!(bzip.end, 0x0040_7000);
        assert_eq!(
            bzip.permissions,
            PagePermissions::READ | PagePermissions::EXECUTE | PagePermissions::PRIVATE
        );
        assert_eq!(bzip.perms, "r-xp");
        assert_eq!(bzip.offset, 0);
        assert_eq!(bzip.device, "08:01");
        assert_eq!(bzip.inode, 2_998_286);
        assert_eq!(bzip.path.as_deref(), Some("/bin/bzip2"));
    }

    #[test]
    fn test_heap_line_kept_verbatim() {
        let regions = parse(SAMPLE).unwrap();
        let heap = &regions[3];
        assert_eq!(heap.path.as_deref(), Some("[heap]"));
        assert_eq!(heap.inode, 0);
        assert_eq!(heap.offset, 0x023a_7000);
        assert!(heap.is_pseudo());
        assert!(!heap.is_anonymous());
    }

    #[test]
    fn test_anonymous_line() {
        let regions = parse(SAMPLE).unwrap();
        let anon = &regions[2];
        assert!(anon.is_anonymous());
        assert!(!anon.is_pseudo());
        assert_eq!(anon.path, None);
    }

    #[test]
    fn test_no_permissions() {
        let regions = parse(SAMPLE).unwrap();
        assert_eq!(regions[5].permissions, PagePermissions::PRIVATE);
    }

    #[test]
    fn test_vsyscall_high_address() {
        let regions = parse(SAMPLE).unwrap();
        let vsyscall = regions.last().unwrap();
        assert_eq!(vsyscall.start, 0xffff_ffff_ff60_0000);
        assert_eq!(vsyscall.path.as_deref(), Some("[vsyscall]"));
    }

    #[test]
    fn test_path_with_spaces() {
        let regions =
            parse("7f0000000000-7f0000001000 rw-s 00000000 00:05 1234 /dev/shm/my file (deleted)")
                .unwrap();
        assert_eq!(regions[0].path.as_deref(), Some("/dev/shm/my file (deleted)"));
        assert!(regions[0].permissions.contains(PagePermissions::SHARED));
    }

    #[test]
    fn test_unrecognized_permission_char_kept() {
        let regions = parse("00400000-00401000 r-xpq 00000000 00:00 0").unwrap();
        assert_eq!(regions[0].perms, "r-xpq");
        assert_eq!(
            regions[0].permissions,
            PagePermissions::READ | PagePermissions::EXECUTE | PagePermissions::PRIVATE
        );
    }

    #[test]
    fn test_bad_lines_rejected() {
        let bad = [
            "",
            "00400000 r-xp 00000000 08:01 1 /bin/x",
            "zz-00407000 r-xp 00000000 08:01 1 /bin/x",
            "00407000-00400000 r-xp 00000000 08:01 1 /bin/x",
            "00400000-00407000 r-xp 0000zz00 08:01 1 /bin/x",
            "00400000-00407000 r-xp 00000000 0801 1 /bin/x",
            "00400000-00407000 r-xp 00000000 08:01 abc /bin/x",
            "00400000-00407000 r-xp 00000000 08:01",
        ];
        for line in bad.iter() {
            assert!(
                matches!(parse_line(1, line), Err(Error::Parse { .. })),
                "accepted {:?}",
                line
            );
        }
    }

    #[test]
    fn test_error_reports_line_number() {
        let text = "00400000-00407000 r-xp 00000000 08:01 1 /bin/x\ngarbage\n";
        match parse(text) {
            Err(Error::Parse { line_number, line, .. }) => {
                assert_eq!(line_number, 2);
                assert_eq!(line, "garbage");
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_order_is_not_resorted() {
        let text = "\
00600000-00601000 rw-p 00000000 00:00 0
00400000-00401000 r--p 00000000 00:00 0
";
        let regions = parse(text).unwrap();
        assert_eq!(regions[0].start, 0x60_0000);
        assert_eq!(regions[1].start, 0x40_0000);
    }

    #[test]
    fn test_find_region() {
        let regions = parse(SAMPLE).unwrap();
        let heap = find_region(&regions, 0x023a_8123).unwrap();
        assert_eq!(heap.path.as_deref(), Some("[heap]"));
        assert!(find_region(&regions, 0x0040_7000).is_none());
    }

    #[test]
    fn test_page_count() {
        let regions = parse(SAMPLE).unwrap();
        assert_eq!(regions[0].page_count(4096), 7);
    }
}
