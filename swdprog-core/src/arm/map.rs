// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! ARM Memory Access Port Registers
//!
//! The MEM-AP exposes the target's address space through a transfer address
//! register (TAR) and a data window (DRW).  CSW controls the access size and
//! whether TAR auto-increments after each DRW access.

use crate::arm::register::{ApRegister, ReadableRegister, RegisterDescriptor, WritableRegister};
use crate::register_data;
use alloc::{format, string::String};

/// Control/Status Word Register descriptor (read-write)
pub struct CswRegister;

impl RegisterDescriptor for CswRegister {
    const ADDRESS: u8 = 0x00;
    type Value = Csw;
}

impl ReadableRegister for CswRegister {}
impl WritableRegister for CswRegister {}
impl ApRegister for CswRegister {}

/// Control/Status Word register data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Csw(u32);

register_data!(Csw);

impl Csw {
    const SIZE_MASK: u32 = 0b111;
    const SIZE_SHIFT: u32 = 0;

    const ADDRINC_MASK: u32 = 0b11;
    const ADDRINC_SHIFT: u32 = 4;

    const DEVICE_EN: u32 = 1 << 6;

    const PROT_MASK: u32 = 0b1111111;
    const PROT_SHIFT: u32 = 24;

    // Size values
    pub const SIZE_8BIT: u32 = 0b000;
    pub const SIZE_16BIT: u32 = 0b001;
    pub const SIZE_32BIT: u32 = 0b010;

    // Address increment values
    pub const ADDRINC_OFF: u32 = 0b00;
    pub const ADDRINC_SINGLE: u32 = 0b01;

    // HPROT: privileged data access, master type debug
    const PROT_DEFAULT: u32 = (1 << 5) | (1 << 1);

    /// Creates a CSW value for the given access size and increment mode,
    /// with the debug master and privileged access bits set.
    pub fn new(size: u32, addrinc: u32) -> Self {
        let mut csw = Csw(0);
        csw.set_prot(Self::PROT_DEFAULT);
        csw.set_size(size);
        csw.set_addrinc(addrinc);
        csw.0 |= Self::DEVICE_EN;
        csw
    }

    /// 32-bit access, auto-incrementing TAR after each DRW access.  Used for
    /// block transfers.
    pub fn word_auto_inc() -> Self {
        Self::new(Self::SIZE_32BIT, Self::ADDRINC_SINGLE)
    }

    /// 16-bit access, no auto-increment.  Used for flash half-word
    /// programming.
    pub fn half_word() -> Self {
        Self::new(Self::SIZE_16BIT, Self::ADDRINC_OFF)
    }

    /// Get raw register value
    pub fn value(&self) -> u32 {
        self.0
    }

    /// Get size field
    pub fn size(&self) -> u32 {
        (self.0 >> Self::SIZE_SHIFT) & Self::SIZE_MASK
    }

    /// Get address increment field
    pub fn addrinc(&self) -> u32 {
        (self.0 >> Self::ADDRINC_SHIFT) & Self::ADDRINC_MASK
    }

    /// Set size field
    pub fn set_size(&mut self, size: u32) {
        self.0 = (self.0 & !(Self::SIZE_MASK << Self::SIZE_SHIFT))
            | ((size & Self::SIZE_MASK) << Self::SIZE_SHIFT);
    }

    /// Set address increment field
    pub fn set_addrinc(&mut self, addrinc: u32) {
        self.0 = (self.0 & !(Self::ADDRINC_MASK << Self::ADDRINC_SHIFT))
            | ((addrinc & Self::ADDRINC_MASK) << Self::ADDRINC_SHIFT);
    }

    /// Set protection field
    pub fn set_prot(&mut self, prot: u32) {
        self.0 = (self.0 & !(Self::PROT_MASK << Self::PROT_SHIFT))
            | ((prot & Self::PROT_MASK) << Self::PROT_SHIFT);
    }

    /// Get transfer configuration description
    pub fn transfer_config(&self) -> String {
        let size = match self.size() {
            Self::SIZE_8BIT => "8-bit",
            Self::SIZE_16BIT => "16-bit",
            Self::SIZE_32BIT => "32-bit",
            _ => "Other",
        };

        let addrinc = match self.addrinc() {
            Self::ADDRINC_OFF => "Off",
            Self::ADDRINC_SINGLE => "Single",
            _ => "Other",
        };

        format!("Size: {size}, AddrInc: {addrinc}")
    }
}

impl Default for Csw {
    fn default() -> Self {
        Self::new(Self::SIZE_32BIT, Self::ADDRINC_OFF)
    }
}

/// Transfer Address Register descriptor (read-write)
pub struct TarRegister;

impl RegisterDescriptor for TarRegister {
    const ADDRESS: u8 = 0x04;
    type Value = Tar;
}

impl ReadableRegister for TarRegister {}
impl WritableRegister for TarRegister {}
impl ApRegister for TarRegister {}

/// Transfer Address Register data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Tar(u32);

register_data!(Tar);

impl Tar {
    /// Get target address
    pub fn target_address(&self) -> u32 {
        self.0
    }
}

/// Data Read/Write Register descriptor (read-write)
pub struct DrwRegister;

impl RegisterDescriptor for DrwRegister {
    const ADDRESS: u8 = 0x0C;
    type Value = Drw;
}

impl ReadableRegister for DrwRegister {}
impl WritableRegister for DrwRegister {}
impl ApRegister for DrwRegister {}

/// Data Read/Write Register data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Drw(u32);

register_data!(Drw);

impl Drw {
    /// Get data value
    pub fn data(&self) -> u32 {
        self.0
    }

    /// Places a half-word on the byte lanes selected by bit 1 of `addr`, as
    /// the MEM-AP requires for 16-bit accesses.
    pub fn from_half_word(addr: u32, value: u16) -> Self {
        Drw((value as u32) << ((addr & 0x2) * 8))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn word_auto_inc_csw() {
        let csw = Csw::word_auto_inc();
        assert_eq!(csw.size(), Csw::SIZE_32BIT);
        assert_eq!(csw.addrinc(), Csw::ADDRINC_SINGLE);
        assert_eq!(csw.transfer_config(), "Size: 32-bit, AddrInc: Single");
    }

    #[test]
    fn half_word_csw() {
        let csw = Csw::half_word();
        assert_eq!(csw.size(), Csw::SIZE_16BIT);
        assert_eq!(csw.addrinc(), Csw::ADDRINC_OFF);
    }

    #[test]
    fn half_word_lanes() {
        assert_eq!(Drw::from_half_word(0x0800_0000, 0xBEEF).data(), 0x0000_BEEF);
        assert_eq!(Drw::from_half_word(0x0800_0002, 0xBEEF).data(), 0xBEEF_0000);
    }
}
