// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! Contains ARM specific objects and routines

pub mod dp;
pub mod map;
pub mod register;

use core::fmt;
use serde::{Deserialize, Serialize};

use crate::flash::FlashRegs;
use dp::IdCode;

/// Target MCU family, as identified from the DP IDCODE.
///
/// The family selects the flash controller register block used when
/// programming the target.  `Unknown` targets can be connected to and have
/// their memory read and written, but cannot be flashed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum McuFamily {
    /// Cortex-M0 based, e.g. STM32F0
    CortexM0,
    /// Cortex-M3 based, e.g. STM32F1
    CortexM3,
    /// Cortex-M4 based, e.g. STM32F3
    CortexM4,
    /// IDCODE not in the known table
    Unknown,
}

impl McuFamily {
    pub const IDCODE_M0: IdCode = IdCode::from_u32(0x0BB1_1477);
    pub const IDCODE_M3: IdCode = IdCode::from_u32(0x4BA0_0477);
    pub const IDCODE_M4: IdCode = IdCode::from_u32(0x4BA0_1477);

    /// Every family with a known IDCODE, in table order.
    pub const KNOWN: [McuFamily; 3] = [McuFamily::CortexM0, McuFamily::CortexM3, McuFamily::CortexM4];

    /// Identifies the MCU family by exact match against the known IDCODE
    /// table.  Anything not in the table is [`McuFamily::Unknown`].
    pub fn from_idcode(idcode: IdCode) -> McuFamily {
        match idcode {
            Self::IDCODE_M0 => McuFamily::CortexM0,
            Self::IDCODE_M3 => McuFamily::CortexM3,
            Self::IDCODE_M4 => McuFamily::CortexM4,
            _ => McuFamily::Unknown,
        }
    }

    /// Returns the DP IDCODE for this family, or `None` for `Unknown`.
    pub fn idcode(&self) -> Option<IdCode> {
        match self {
            McuFamily::CortexM0 => Some(Self::IDCODE_M0),
            McuFamily::CortexM3 => Some(Self::IDCODE_M3),
            McuFamily::CortexM4 => Some(Self::IDCODE_M4),
            McuFamily::Unknown => None,
        }
    }

    /// Returns the flash controller register block for this family, or
    /// `None` if the family is `Unknown`.
    pub fn flash_regs(&self) -> Option<FlashRegs> {
        match self {
            McuFamily::CortexM0 => Some(FlashRegs::STM32F0),
            McuFamily::CortexM3 => Some(FlashRegs::STM32F1),
            McuFamily::CortexM4 => Some(FlashRegs::STM32F3),
            McuFamily::Unknown => None,
        }
    }

    /// Returns true if the family is in the known table.
    pub fn is_known(&self) -> bool {
        !matches!(self, McuFamily::Unknown)
    }

    /// Returns the family as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            McuFamily::CortexM0 => "Cortex-M0",
            McuFamily::CortexM3 => "Cortex-M3",
            McuFamily::CortexM4 => "Cortex-M4",
            McuFamily::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for McuFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ARM {}", self.as_str())
    }
}
