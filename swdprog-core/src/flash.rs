// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! swdprog-core - STM32 flash controller register map
//!
//! Covers the half-word programmed flash controller found on the STM32F0,
//! STM32F1 and STM32F3 lines.  Each family gets its own [`FlashRegs`] so the
//! flash sequencer never hardcodes one family's addresses.

use core::fmt;
use static_assertions::const_assert;

/// Flash controller register block for one MCU family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlashRegs {
    /// Base address of the controller's register block
    pub base: u32,

    /// Base address of main flash memory
    pub flash_base: u32,

    /// Erase granularity in bytes
    pub page_size: u32,
}

const FLASH_KEYR_OFFSET: u32 = 0x04;
const FLASH_SR_OFFSET: u32 = 0x0C;
const FLASH_CR_OFFSET: u32 = 0x10;
const FLASH_AR_OFFSET: u32 = 0x14;

const STM32_FLASH_REG_BASE: u32 = 0x4002_2000;
const STM32_FLASH_BASE: u32 = 0x0800_0000;

impl FlashRegs {
    /// STM32F0 (Cortex-M0)
    pub const STM32F0: FlashRegs = FlashRegs {
        base: STM32_FLASH_REG_BASE,
        flash_base: STM32_FLASH_BASE,
        page_size: 1024,
    };

    /// STM32F1 (Cortex-M3)
    pub const STM32F1: FlashRegs = FlashRegs {
        base: STM32_FLASH_REG_BASE,
        flash_base: STM32_FLASH_BASE,
        page_size: 1024,
    };

    /// STM32F3 (Cortex-M4)
    pub const STM32F3: FlashRegs = FlashRegs {
        base: STM32_FLASH_REG_BASE,
        flash_base: STM32_FLASH_BASE,
        page_size: 2048,
    };

    /// FLASH_KEYR address
    pub const fn keyr(&self) -> u32 {
        self.base + FLASH_KEYR_OFFSET
    }

    /// FLASH_SR address
    pub const fn sr(&self) -> u32 {
        self.base + FLASH_SR_OFFSET
    }

    /// FLASH_CR address
    pub const fn cr(&self) -> u32 {
        self.base + FLASH_CR_OFFSET
    }

    /// FLASH_AR address
    pub const fn ar(&self) -> u32 {
        self.base + FLASH_AR_OFFSET
    }
}

// Registers must stay word aligned within the block.
const_assert!(FLASH_KEYR_OFFSET % 4 == 0);
const_assert!(FLASH_SR_OFFSET % 4 == 0);
const_assert!(FLASH_CR_OFFSET % 4 == 0);
const_assert!(FLASH_AR_OFFSET % 4 == 0);

/// FLASH_KEYR register
///
/// Writing `KEY1` then `KEY2` unlocks FLASH_CR.  Any other sequence locks it
/// until the next reset.
pub struct FlashKeyr;

impl FlashKeyr {
    pub const KEY1: u32 = 0x4567_0123;
    pub const KEY2: u32 = 0xCDEF_89AB;
}

/// FLASH_CR register bits
pub struct FlashCr;

impl FlashCr {
    pub const PG: u32 = 1 << 0;
    pub const PER: u32 = 1 << 1;
    pub const MER: u32 = 1 << 2;
    pub const STRT: u32 = 1 << 6;
    pub const LOCK: u32 = 1 << 7;
}

/// FLASH_SR register data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FlashSr(u32);

impl FlashSr {
    pub const BSY: u32 = 1 << 0;
    pub const PGERR: u32 = 1 << 2;
    pub const WRPRTERR: u32 = 1 << 4;
    pub const EOP: u32 = 1 << 5;

    /// Error flags, which are cleared by writing 1
    pub const ERROR_MASK: u32 = Self::PGERR | Self::WRPRTERR;

    /// Whether a flash operation is in progress.
    pub fn busy(&self) -> bool {
        self.0 & Self::BSY != 0
    }

    /// Whether programming or write protection errors are flagged.
    pub fn errors(&self) -> bool {
        self.0 & Self::ERROR_MASK != 0
    }

    /// Whether the last operation completed.
    pub fn eop(&self) -> bool {
        self.0 & Self::EOP != 0
    }

    /// Get raw register value
    pub fn value(&self) -> u32 {
        self.0
    }
}

impl From<u32> for FlashSr {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<FlashSr> for u32 {
    fn from(sr: FlashSr) -> Self {
        sr.0
    }
}

impl fmt::Display for FlashSr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X}", self.0)?;
        if f.alternate() {
            if self.busy() {
                write!(f, " BSY")?;
            }
            if self.0 & Self::PGERR != 0 {
                write!(f, " PGERR")?;
            }
            if self.0 & Self::WRPRTERR != 0 {
                write!(f, " WRPRTERR")?;
            }
            if self.eop() {
                write!(f, " EOP")?;
            }
        }
        Ok(())
    }
}
