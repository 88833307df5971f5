// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! swdprog-swd library
//!
//! Bit-banged ARM Serial Wire Debug (SWD) and STM32 flash programming.
//!
//! This is used to attach to a single ARM Cortex-M target, identify it, and
//! erase, program and verify its internal flash from an Intel HEX image,
//! using the
//! [ARM SWD protocol](https://developer.arm.com/documentation/ihi0031/latest/)
//!
//! It is `no_std`, and drives any GPIO that implements the `embedded-hal`
//! 1.0 digital and delay traits.  It requires an `alloc` implementation.
//!
//! The following diagram shows the key `swdprog-swd` concepts.
//!
//! ```text
//!   HEX file  --  swdprog_hex::process_file
//! ----------------------
//!       Flasher           \
//! ----------------------   \
//!     SwdInterface          |--  SwdError
//! ----------------------   /
//!     SwdProtocol         /
//! ----------------------
//!   SwdLink (GpioLink)   >======================<       SWD Target
//!                          SWDIO/SWCLK/nRESET/GND
//! ```
//!
//! * [`Flasher`] sequences the target's flash controller: unlock, erase,
//!   program, verify and lock.  It is also the [`swdprog_hex::SectorSink`]
//!   that HEX images are streamed into.
//! * [`SwdInterface`] owns the connection to the target: line reset,
//!   IDCODE, power-up, hardware reset, and memory access through the MEM-AP.
//! * [`SwdProtocol`] performs single SWD transactions on DP and AP
//!   registers.
//! * [`SwdLink`] is the bit level link, implemented over GPIOs by
//!   [`GpioLink`].
//!
//! `swdprog-swd` uses the [`swdprog_core`] library for register and MCU
//! definitions that are not SWD specific.

#![cfg_attr(not(test), no_std)]

pub mod flash;
pub mod interface;
pub mod link;
pub mod protocol;

#[doc(inline)]
pub use crate::flash::{FlashConfig, Flasher};
#[doc(inline)]
pub use crate::interface::{SwdConfig, SwdInterface};
#[doc(inline)]
pub use crate::link::{Direction, GpioLink, Speed, SwdLink, SwdioPin};
#[doc(inline)]
pub use crate::protocol::{SwdProtocol, WaitRetry};

extern crate alloc;
use alloc::format;
use alloc::string::String;
use core::fmt;
use serde::Serialize;
use swdprog_hex::HexError;

/// Core error type used by all swdprog-swd objects
///
/// Methods are provided to make it easier to handle errors, by checking if
/// either a retry or reset is required:
///
/// - [`SwdError::requires_retry()`]
/// - [`SwdError::requires_reset()`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwdError {
    /// The target answered WAIT.  Returned immediately under
    /// [`WaitRetry::Never`], or once the retry budget is used up under
    /// [`WaitRetry::Bounded`].
    WaitAck,

    /// The target answered FAULT.  Sticky errors need clearing, normally by
    /// reconnecting with [`SwdInterface::connect()`].
    FaultAck,

    /// The ACK was not OK, WAIT or FAULT, or read data failed its parity
    /// check.  A line of all 1s, which is what a missing target looks like,
    /// ends up here.
    ProtocolError,

    /// Connect failed: no valid IDCODE, or the debug domain would not power
    /// up.
    ConnectionFailed,

    /// The target's IDCODE is not in the known family table, so its flash
    /// controller cannot be located.
    UnknownDevice,

    /// A memory transaction through the MEM-AP failed.  Bytes before the
    /// failing word may already have been transferred.
    MemoryAccessFailed,

    /// No target is connected.  Call [`SwdInterface::connect()`] first.
    NotReady,

    /// The API was called incorrectly, such as with a misaligned address.
    Api,

    /// The flash unlock key writes failed.
    UnlockFailed,

    /// A flash erase timed out or the controller flagged an error.
    EraseFailed,

    /// A flash half-word write timed out or the controller flagged an error.
    /// Reported for the whole chunk.
    ProgramFailed,

    /// Flash contents did not match the expected data.  Reported for the
    /// whole chunk.
    VerifyMismatch,

    /// The HEX image could not be read or parsed.
    Hex(HexError),
}

impl SwdError {
    /// Returns true if the error requires the target to be reconnected, or
    /// possibly hardware reset, to recover.
    pub fn requires_reset(&self) -> bool {
        matches!(
            self,
            SwdError::FaultAck | SwdError::ProtocolError | SwdError::ConnectionFailed
        )
    }

    /// Returns true if the error is a transient error that can be retried.
    /// This is just the `WaitAck` error from the SWD target.
    pub fn requires_retry(&self) -> bool {
        matches!(self, SwdError::WaitAck)
    }

    /// Returns true if the error requires neither a reset nor retry to
    /// recover.  Normally this means an application error, an unsupported
    /// target, or a bad image.
    pub fn requires_other(&self) -> bool {
        !self.requires_reset() && !self.requires_retry()
    }

    /// Returns a string representation of the error.
    pub fn as_str(&self) -> &'static str {
        match self {
            SwdError::WaitAck => "Wait ACK",
            SwdError::FaultAck => "Fault ACK",
            SwdError::ProtocolError => "Protocol Error",
            SwdError::ConnectionFailed => "Connection Failed",
            SwdError::UnknownDevice => "Unknown Device",
            SwdError::MemoryAccessFailed => "Memory Access Failed",
            SwdError::NotReady => "Not Ready",
            SwdError::Api => "API Error",
            SwdError::UnlockFailed => "Flash Unlock Failed",
            SwdError::EraseFailed => "Flash Erase Failed",
            SwdError::ProgramFailed => "Flash Program Failed",
            SwdError::VerifyMismatch => "Flash Verify Mismatch",
            SwdError::Hex(_) => "HEX Image Error",
        }
    }
}

impl Serialize for SwdError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct;
        let mut state = serializer.serialize_struct("SwdError", 2)?;

        let kind = match self {
            SwdError::WaitAck => "wait ack",
            SwdError::FaultAck => "fault ack",
            SwdError::ProtocolError => "protocol error",
            SwdError::ConnectionFailed => "connection failed",
            SwdError::UnknownDevice => "unknown device",
            SwdError::MemoryAccessFailed => "memory access failed",
            SwdError::NotReady => "not ready",
            SwdError::Api => "api error",
            SwdError::UnlockFailed => "unlock failed",
            SwdError::EraseFailed => "erase failed",
            SwdError::ProgramFailed => "program failed",
            SwdError::VerifyMismatch => "verify mismatch",
            SwdError::Hex(_) => "hex",
        };

        state.serialize_field("kind", kind)?;

        let detail = match self {
            SwdError::Hex(e) => format!("{e}"),
            _ => String::new(), // empty detail for variants without data
        };
        state.serialize_field("detail", detail.as_str())?;
        state.end()
    }
}

impl fmt::Display for SwdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SwdError::Hex(e) => write!(f, "{}: {e}", self.as_str()),
            _ => write!(f, "{}", self.as_str()),
        }
    }
}

impl From<HexError> for SwdError {
    fn from(error: HexError) -> Self {
        SwdError::Hex(error)
    }
}
