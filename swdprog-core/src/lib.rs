// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! swdprog is a standalone SWD flash programmer for ARM Cortex-M targets.
//!
//! swdprog-core - Core ARM debug and MCU concepts used by swdprog.
//!
//! Designed to be used in conjunction with the `swdprog-swd` library, which
//! drives the Serial Wire Debug (SWD) wire protocol and the flash
//! programming sequence.  Nothing in this crate touches hardware.
//!
//! * [`arm`] - typed DP and MEM-AP registers, and IDCODE to [`McuFamily`]
//!   identification.
//! * [`flash`] - per family flash controller register blocks.
//!
//! This library is `no_std` compatible, and requires an `alloc`
//! implementation.

#![cfg_attr(not(test), no_std)]

pub mod arm;
pub mod flash;

extern crate alloc;

#[doc(inline)]
pub use crate::arm::McuFamily;
#[doc(inline)]
pub use crate::flash::FlashRegs;
