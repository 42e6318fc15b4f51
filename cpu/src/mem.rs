//! The memory unit: a flat array of 36-bit words with per-page
//! protection keys.
//!
//! Each backing cell is 64 bits wide; the low 36 bits are data and the
//! eight bits above them, in the first word of each 512-word page,
//! hold the page's protection key.  The key field of the other words
//! in a page is unused — every access reads the key from the page's
//! base word, so all words of a page carry the same key by
//! construction.
//!
//! # Protection keys
//!
//! An eight-bit key with four semantic bands:
//!
//! | Key          | Meaning |
//! |--------------|---------|
//! | `0x00`       | supervisor page; only a caller with key 0 matches |
//! | `0x01..0xFD` | ordinary page; exact match required, key 0 bypasses |
//! | `0xFE`       | world-readable; writes require a match |
//! | `0xFF`       | world-readable and world-writable |
//!
//! Faults are reported as a sum type rather than as sentinel values in
//! the high bits of a wider word; no fault can be mistaken for data.

use base::prelude::*;

/// Why a memory access failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemFault {
    /// The address is beyond the fitted memory.
    Bounds,
    /// The caller's key does not open the page.
    Key,
}

impl std::fmt::Display for MemFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MemFault::Bounds => f.write_str("address is outside fitted memory"),
            MemFault::Key => f.write_str("protection key mismatch"),
        }
    }
}

impl std::error::Error for MemFault {}

const DATA_MASK: u64 = (1 << 36) - 1;
const KEY_SHIFT: u32 = 36;

pub const KEY_SUPERVISOR: u8 = 0x00;
pub const KEY_PUBLIC_READ: u8 = 0xFE;
pub const KEY_PUBLIC_WRITE: u8 = 0xFF;

#[derive(Debug)]
pub struct MemoryUnit {
    cells: Vec<u64>,
}

impl MemoryUnit {
    /// Allocate `words` words of zeroed memory with all page keys 0.
    pub fn new(words: u32) -> MemoryUnit {
        MemoryUnit {
            cells: vec![0; words as usize],
        }
    }

    pub fn size(&self) -> u32 {
        self.cells.len() as u32
    }

    fn in_bounds(&self, addr: Address) -> Result<usize, MemFault> {
        let index = usize::from(addr);
        if index < self.cells.len() {
            Ok(index)
        } else {
            Err(MemFault::Bounds)
        }
    }

    /// The protection key of the page containing `addr`.
    pub fn page_key(&self, addr: Address) -> Result<u8, MemFault> {
        let base = self.in_bounds(addr.page_base())?;
        Ok((self.cells[base] >> KEY_SHIFT) as u8)
    }

    /// Read one word under protection key `key`.
    pub fn read(&self, key: u8, addr: Address) -> Result<Word, MemFault> {
        let index = self.in_bounds(addr)?;
        let page = self.page_key(addr)?;
        if page == KEY_PUBLIC_READ || page == KEY_PUBLIC_WRITE {
            // Public page, any caller may read.
        } else if key != KEY_SUPERVISOR && key != page {
            return Err(MemFault::Key);
        }
        Ok(Word::truncating(self.cells[index]))
    }

    /// Write one word under protection key `key`.  The key field of
    /// the target cell is not disturbed.
    pub fn write(&mut self, key: u8, addr: Address, data: Word) -> Result<(), MemFault> {
        let index = self.in_bounds(addr)?;
        let page = self.page_key(addr)?;
        if page == KEY_PUBLIC_WRITE {
            // World-writable.
        } else if key != KEY_SUPERVISOR && key != page {
            // 0xFE pages are world-readable but keyed for writes.
            return Err(MemFault::Key);
        }
        let tag = self.cells[index] & !DATA_MASK;
        self.cells[index] = tag | data.bits();
        Ok(())
    }

    /// Set the protection key of the page containing `addr`.
    pub fn set_key(&mut self, key: u8, addr: Address) -> Result<(), MemFault> {
        let base = self.in_bounds(addr.page_base())?;
        let data = self.cells[base] & DATA_MASK;
        self.cells[base] = ((key as u64) << KEY_SHIFT) | data;
        Ok(())
    }

    /// Loader access: read a word with no key check.  Used by the
    /// deposit/examine surface, interrupt vector save areas, and the
    /// IOCPU host window.
    pub fn fetch_raw(&self, addr: Address) -> Result<Word, MemFault> {
        let index = self.in_bounds(addr)?;
        Ok(Word::truncating(self.cells[index]))
    }

    /// Loader access: store a word with no key check, preserving the
    /// key field.
    pub fn store_raw(&mut self, addr: Address, data: Word) -> Result<(), MemFault> {
        let index = self.in_bounds(addr)?;
        let tag = self.cells[index] & !DATA_MASK;
        self.cells[index] = tag | data.bits();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_with_key(key: u8) -> MemoryUnit {
        let mut mem = MemoryUnit::new(2048);
        mem.set_key(key, Address::new(0o2000)).unwrap();
        mem.store_raw(Address::new(0o2000), w36!(0o1234)).unwrap();
        mem.store_raw(Address::new(0o2001), w36!(0o5670)).unwrap();
        mem
    }

    #[test]
    fn bounds_fault_iff_address_too_large() {
        let mem = MemoryUnit::new(1024);
        assert!(mem.read(0, Address::new(1023)).is_ok());
        assert_eq!(
            mem.read(0, Address::new(1024)),
            Err(MemFault::Bounds)
        );
        let mut mem = mem;
        assert_eq!(
            mem.write(0, Address::new(4096), Word::ZERO),
            Err(MemFault::Bounds)
        );
    }

    #[test]
    fn key_bands() {
        // For every (caller, page) combination the outcome is exactly
        // what the band table says.
        let cases: &[(u8, u8, bool, bool)] = &[
            // caller, page, read_ok, write_ok
            (0x00, 0x00, true, true),
            (0x42, 0x00, false, false),
            (0x00, 0x42, true, true),
            (0x42, 0x42, true, true),
            (0x43, 0x42, false, false),
            (0x00, 0xFE, true, true),
            (0x42, 0xFE, true, false),
            (0xFE, 0xFE, true, true),
            (0x00, 0xFF, true, true),
            (0x42, 0xFF, true, true),
        ];
        for &(caller, page, read_ok, write_ok) in cases {
            let mut mem = unit_with_key(page);
            let addr = Address::new(0o2001);
            assert_eq!(
                mem.read(caller, addr).is_ok(),
                read_ok,
                "read caller={caller:#x} page={page:#x}"
            );
            assert_eq!(
                mem.write(caller, addr, w36!(7)).is_ok(),
                write_ok,
                "write caller={caller:#x} page={page:#x}"
            );
        }
    }

    #[test]
    fn key_mismatch_is_a_key_fault_not_bounds() {
        let mem = unit_with_key(0x42);
        assert_eq!(
            mem.read(0x43, Address::new(0o2001)),
            Err(MemFault::Key)
        );
    }

    #[test]
    fn set_then_get_key_round_trips() {
        let mut mem = MemoryUnit::new(4096);
        for key in [0x00_u8, 0x01, 0x42, 0xFD, 0xFE, 0xFF] {
            mem.set_key(key, Address::new(0o3123)).unwrap();
            assert_eq!(mem.page_key(Address::new(0o3123)).unwrap(), key);
            // Any address within the page reads the same key.
            assert_eq!(mem.page_key(Address::new(0o3000)).unwrap(), key);
            assert_eq!(mem.page_key(Address::new(0o3777)).unwrap(), key);
        }
    }

    #[test]
    fn set_key_preserves_page_base_data() {
        let mut mem = MemoryUnit::new(1024);
        mem.store_raw(Address::new(0o1000), w36!(0o707070)).unwrap();
        mem.set_key(0x17, Address::new(0o1234)).unwrap();
        assert_eq!(
            mem.fetch_raw(Address::new(0o1000)).unwrap(),
            w36!(0o707070)
        );
        assert_eq!(mem.page_key(Address::new(0o1000)).unwrap(), 0x17);
    }

    #[test]
    fn write_preserves_key_field() {
        let mut mem = unit_with_key(0x42);
        mem.write(0x42, Address::new(0o2000), w36!(0o55)).unwrap();
        assert_eq!(mem.page_key(Address::new(0o2000)).unwrap(), 0x42);
        assert_eq!(
            mem.read(0x42, Address::new(0o2000)).unwrap(),
            w36!(0o55)
        );
    }
}
