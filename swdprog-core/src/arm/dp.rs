// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! ARM Debug Port Registers
//!
//! Only the DPv1 registers needed to attach to a single target and drive its
//! MEM-AP are modelled.

use crate::arm::register::{DpRegister, ReadableRegister, RegisterDescriptor, WritableRegister};
use crate::register_data;
use alloc::{format, string::String};
use core::fmt;

/// IDCODE Register descriptor (read-only)
pub struct IdCodeRegister;

impl RegisterDescriptor for IdCodeRegister {
    const ADDRESS: u8 = 0x00;
    type Value = IdCode;
}

impl ReadableRegister for IdCodeRegister {}
impl DpRegister for IdCodeRegister {}

/// ARM Debug Port IDCODE register data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct IdCode(u32);

impl IdCode {
    /// Value read when SWDIO is stuck low, or nothing drives the line
    /// against a pull-down.
    pub const ALL_ZERO: IdCode = IdCode(0);

    /// Value read when SWDIO floats high, typically no target attached.
    pub const ALL_ONE: IdCode = IdCode(0xFFFF_FFFF);

    pub const fn from_u32(value: u32) -> Self {
        IdCode(value)
    }

    pub const fn data(&self) -> u32 {
        self.0
    }

    /// Get revision field (bits 31:28)
    pub fn revision(&self) -> u8 {
        ((self.0 >> 28) & 0xF) as u8
    }

    /// Get part number (bits 27:20)
    pub fn part_number(&self) -> u8 {
        ((self.0 >> 20) & 0xFF) as u8
    }

    /// Get JEDEC designer ID (bits 11:1)
    pub fn designer_id(&self) -> u16 {
        ((self.0 >> 1) & 0x7FF) as u16
    }

    /// Returns true if this value cannot have come from a live target.  An
    /// all-zero or all-one IDCODE means the link is dead or disconnected.
    pub fn is_degenerate(&self) -> bool {
        *self == Self::ALL_ZERO || *self == Self::ALL_ONE
    }

    /// Get manufacturer name if known
    pub fn designer_name(&self) -> &'static str {
        match self.designer_id() {
            0x23B => "ARM Ltd",
            _ => "Unknown",
        }
    }
}

impl From<u32> for IdCode {
    fn from(value: u32) -> Self {
        Self::from_u32(value)
    }
}

impl From<IdCode> for u32 {
    fn from(value: IdCode) -> u32 {
        value.0
    }
}

impl fmt::Display for IdCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if f.alternate() {
            write!(
                f,
                "0x{:08X} (designer {}, part 0x{:02X}, rev {})",
                self.0,
                self.designer_name(),
                self.part_number(),
                self.revision()
            )
        } else {
            write!(f, "0x{:08X}", self.0)
        }
    }
}

/// ABORT Register descriptor (write-only, shares its address with IDCODE)
pub struct AbortRegister;

impl RegisterDescriptor for AbortRegister {
    const ADDRESS: u8 = 0x00;
    type Value = Abort;
}

impl WritableRegister for AbortRegister {}
impl DpRegister for AbortRegister {}

/// ARM Debug Port ABORT register data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Abort(u32);

register_data!(Abort, write_only);

impl Abort {
    const STKCMPCLR: u32 = 1 << 1;
    const STKERRCLR: u32 = 1 << 2;
    const WDERRCLR: u32 = 1 << 3;
    const ORUNERRCLR: u32 = 1 << 4;

    /// An ABORT value that clears every sticky error flag.
    pub const fn clear_all() -> Self {
        Abort(Self::STKCMPCLR | Self::STKERRCLR | Self::WDERRCLR | Self::ORUNERRCLR)
    }
}

/// CTRL/STAT Register descriptor (read-write)
pub struct CtrlStatRegister;

impl RegisterDescriptor for CtrlStatRegister {
    const ADDRESS: u8 = 0x04;
    type Value = CtrlStat;
}

impl ReadableRegister for CtrlStatRegister {}
impl WritableRegister for CtrlStatRegister {}
impl DpRegister for CtrlStatRegister {}

/// ARM Debug Port CTRL/STAT register data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CtrlStat(u32);

register_data!(CtrlStat);

impl CtrlStat {
    const STICKYORUN: u32 = 1 << 1;
    const STICKYCMP: u32 = 1 << 4;
    const STICKYERR: u32 = 1 << 5;
    const WDATAERR: u32 = 1 << 7;

    const CDBGPWRUPREQ: u32 = 1 << 28;
    const CDBGPWRUPACK: u32 = 1 << 29;
    const CSYSPWRUPREQ: u32 = 1 << 30;
    const CSYSPWRUPACK: u32 = 1 << 31;

    /// A CTRL/STAT value requesting both debug and system power-up.
    pub const fn power_up_request() -> Self {
        CtrlStat(Self::CDBGPWRUPREQ | Self::CSYSPWRUPREQ)
    }

    /// Get raw register value
    pub fn value(&self) -> u32 {
        self.0
    }

    pub fn stickyorun(&self) -> bool {
        self.0 & Self::STICKYORUN != 0
    }

    pub fn stickycmp(&self) -> bool {
        self.0 & Self::STICKYCMP != 0
    }

    pub fn stickyerr(&self) -> bool {
        self.0 & Self::STICKYERR != 0
    }

    pub fn wdataerr(&self) -> bool {
        self.0 & Self::WDATAERR != 0
    }

    pub fn cdbgpwrupack(&self) -> bool {
        self.0 & Self::CDBGPWRUPACK != 0
    }

    pub fn csyspwrupack(&self) -> bool {
        self.0 & Self::CSYSPWRUPACK != 0
    }

    /// Both power domains have acknowledged a power-up request.
    pub fn powered_up(&self) -> bool {
        self.cdbgpwrupack() && self.csyspwrupack()
    }

    pub fn has_errors(&self) -> bool {
        self.stickyorun() || self.stickycmp() || self.stickyerr() || self.wdataerr()
    }

    /// Get error state description
    pub fn error_states(&self) -> String {
        let mut errors = [""; 4];
        let mut count = 0;

        for (set, name) in [
            (self.stickyorun(), "STICKYORUN"),
            (self.stickycmp(), "STICKYCMP"),
            (self.stickyerr(), "STICKYERR"),
            (self.wdataerr(), "WDATAERR"),
        ] {
            if set {
                errors[count] = name;
                count += 1;
            }
        }

        if count == 0 {
            "No errors".into()
        } else {
            format!("Errors: {}", errors[..count].join(", "))
        }
    }

    /// Get power state description
    pub fn power_states(&self) -> String {
        format!(
            "Debug: {}, System: {}",
            if self.cdbgpwrupack() { "ACK" } else { "nak" },
            if self.csyspwrupack() { "ACK" } else { "nak" }
        )
    }
}

/// SELECT Register descriptor (write-only on DPv1)
pub struct SelectRegister;

impl RegisterDescriptor for SelectRegister {
    const ADDRESS: u8 = 0x08;
    type Value = Select;
}

impl WritableRegister for SelectRegister {}
impl DpRegister for SelectRegister {}

/// ARM Debug Port SELECT register data.  The default selects AP 0, bank 0,
/// which holds the MEM-AP CSW, TAR and DRW registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Select(u32);

register_data!(Select);

impl Select {
    const APSEL_MASK: u32 = 0xFF;
    const APSEL_SHIFT: u32 = 24;

    const APBANKSEL_MASK: u32 = 0xF;
    const APBANKSEL_SHIFT: u32 = 4;

    /// Get access port select
    pub fn apsel(&self) -> u32 {
        (self.0 >> Self::APSEL_SHIFT) & Self::APSEL_MASK
    }

    /// Get AP bank select
    pub fn apbanksel(&self) -> u32 {
        (self.0 >> Self::APBANKSEL_SHIFT) & Self::APBANKSEL_MASK
    }
}

/// RDBUFF Register descriptor (read-only)
///
/// Holds the result of the previous AP read, which is posted.
pub struct RdBuffRegister;

impl RegisterDescriptor for RdBuffRegister {
    const ADDRESS: u8 = 0x0C;
    type Value = RdBuff;
}

impl ReadableRegister for RdBuffRegister {}
impl DpRegister for RdBuffRegister {}

/// ARM Debug Port RDBUFF register data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RdBuff(u32);

register_data!(RdBuff);

impl RdBuff {
    /// Get the buffered data
    pub fn data(&self) -> u32 {
        self.0
    }
}
