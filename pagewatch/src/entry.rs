//! The 64-bit `/proc/PID/pagemap` record: present (63), swapped (62),
//! page shift (55-60), PFN or swap type/offset (0-54).

use byteorder::{ByteOrder, LittleEndian};

pub const ENTRY_SIZE: usize = 8;

const PRESENT_BIT: u64 = 1 << 63;
const SWAPPED_BIT: u64 = 1 << 62;
const SHIFT_MASK: u64 = 0x3f << 55;
const SHIFT_BITS: u64 = 0x3f;
const SHIFT_POS: u32 = 55;
const VALUE_MASK: u64 = (1 << 55) - 1;
const SWAP_TYPE_MASK: u64 = 0x1f;
const SWAP_OFFSET_POS: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PageTableEntry {
    pub present: bool,
    pub swapped: bool,
    pub page_shift: u8,
    /// Bits 0-54. Meaning depends on `present` and `swapped`.
    pub value: u64,
}

impl PageTableEntry {
    pub fn from_raw(raw: u64) -> Self {
        PageTableEntry {
            present: raw & PRESENT_BIT != 0,
            swapped: raw & SWAPPED_BIT != 0,
            page_shift: ((raw & SHIFT_MASK) >> SHIFT_POS) as u8,
            value: raw & VALUE_MASK,
        }
    }

    pub fn to_raw(&self) -> u64 {
        let mut raw = self.value & VALUE_MASK;
        raw |= (u64::from(self.page_shift) & SHIFT_BITS) << SHIFT_POS;
        if self.present {
            raw |= PRESENT_BIT;
        }
        if self.swapped {
            raw |= SWAPPED_BIT;
        }
        raw
    }

    /// Decodes one little-endian record.
    pub fn decode(bytes: &[u8; ENTRY_SIZE]) -> Self {
        Self::from_raw(LittleEndian::read_u64(bytes))
    }

    pub fn encode(&self) -> [u8; ENTRY_SIZE] {
        let mut bytes = [0u8; ENTRY_SIZE];
        LittleEndian::write_u64(&mut bytes, self.to_raw());
        bytes
    }

    pub fn page_size(&self) -> u64 {
        1u64 << self.page_shift
    }

    /// The physical frame number, for a present page that is not in swap.
    pub fn pfn(&self) -> Option<u64> {
        if self.present && !self.swapped {
            Some(self.value)
        } else {
            None
        }
    }

    pub fn swap_type(&self) -> Option<u64> {
        if self.swapped {
            Some(self.value & SWAP_TYPE_MASK)
        } else {
            None
        }
    }

    pub fn swap_offset(&self) -> Option<u64> {
        if self.swapped {
            Some(self.value >> SWAP_OFFSET_POS)
        } else {
            None
        }
    }

    /// Neither present nor swapped.
    pub fn is_unmapped(&self) -> bool {
        !self.present && !self.swapped
    }
}
