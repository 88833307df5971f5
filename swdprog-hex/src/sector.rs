// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! Sector accumulator
//!
//! Collects data record bytes into one contiguous, [`SECTOR_SIZE`] byte
//! window.  The window starts at the address of the first record placed in
//! it, aligned down to a half-word.  Bytes not covered by any record read as
//! `0xFF`, the erased flash value, so they program as no-ops.

use static_assertions::const_assert;

use crate::SECTOR_SIZE;
use crate::record::MAX_DATA_LEN;

// Any single record must fit an empty sector.
const_assert!(MAX_DATA_LEN <= SECTOR_SIZE);

const ERASED: u8 = 0xFF;

/// An accumulating sector buffer
#[derive(Debug, Clone)]
pub struct Sector {
    base: u32,
    len: usize,
    data: [u8; SECTOR_SIZE],
}

impl Default for Sector {
    fn default() -> Self {
        Self::new()
    }
}

impl Sector {
    pub fn new() -> Self {
        Self {
            base: 0,
            len: 0,
            data: [ERASED; SECTOR_SIZE],
        }
    }

    /// Returns true if no bytes have been added since the last reset.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Start address of the sector.  Only meaningful when not empty.
    pub fn base(&self) -> u32 {
        self.base
    }

    /// The accumulated bytes, from the base address up to the end of the
    /// highest addressed record.
    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len]
    }

    /// Address one past the last accumulated byte.
    pub fn end(&self) -> u32 {
        self.base.wrapping_add(self.len as u32)
    }

    /// Whether `len` bytes at `addr` can be placed in this sector without
    /// flushing it first.  Always true for an empty sector and a record
    /// sized `len`.
    pub fn fits(&self, addr: u32, len: usize) -> bool {
        if self.is_empty() {
            return (addr & 1) as usize + len <= SECTOR_SIZE;
        }
        if addr < self.base {
            return false;
        }
        let offset = (addr - self.base) as usize;
        offset
            .checked_add(len)
            .is_some_and(|end| end <= SECTOR_SIZE)
    }

    /// Places `bytes` at `addr`.  An empty sector is rebased to `addr`
    /// aligned down to a half-word, with an odd leading byte left erased.
    ///
    /// Returns false, leaving the sector untouched, if the bytes do not fit.
    /// Call [`Self::fits()`] first, and flush if needed.
    pub fn push(&mut self, addr: u32, bytes: &[u8]) -> bool {
        if !self.fits(addr, bytes.len()) {
            return false;
        }
        if self.is_empty() {
            self.base = addr & !1;
        }

        let offset = (addr - self.base) as usize;
        let end = offset + bytes.len();
        self.data[offset..end].copy_from_slice(bytes);
        self.len = self.len.max(end);
        true
    }

    /// Removes the last byte if the sector holds an odd number of bytes,
    /// returning it with its address.  The sector then ends on a half-word
    /// boundary, and the byte can start the next sector.
    pub fn take_odd_tail(&mut self) -> Option<(u32, u8)> {
        if self.len % 2 == 0 {
            return None;
        }
        self.len -= 1;
        let byte = self.data[self.len];
        self.data[self.len] = ERASED;
        Some((self.end(), byte))
    }

    /// Empties the sector and restores the erased fill.
    pub fn reset(&mut self) {
        self.data = [ERASED; SECTOR_SIZE];
        self.len = 0;
        self.base = 0;
    }
}
