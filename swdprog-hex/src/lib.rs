// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! swdprog-hex - Intel HEX streaming for swdprog
//!
//! Reads an Intel HEX image from any seekable byte source, a sector at a
//! time, and hands the image to a [`SectorSink`] as contiguous chunks of at
//! most [`SECTOR_SIZE`] bytes.  The sink is normally `swdprog-swd`'s flash
//! programmer, but nothing here knows about flash.
//!
//! The same file is streamed twice when programming a target: once with
//! [`Pass::Program`] and, after [`HexSource::rewind()`], once with
//! [`Pass::Verify`].
//!
//! ```text
//!   HexSource  --read_sector-->  record parser  -->  Sector  --flush-->  SectorSink
//!   (SD card)                    (record.rs)        (sector.rs)          (flash)
//! ```
//!
//! This crate is `no_std` and platform agnostic.

#![cfg_attr(not(test), no_std)]

pub mod record;
pub mod sector;
pub mod stream;

#[doc(inline)]
pub use crate::record::{Record, RecordType};
#[doc(inline)]
pub use crate::sector::Sector;
#[doc(inline)]
pub use crate::stream::{HexStats, Pass, process_file};

extern crate alloc;
use alloc::format;
use alloc::string::String;
use core::fmt;
use embedded_io::{ErrorKind, Read, Seek, SeekFrom};
use serde::Serialize;

/// Size of the chunks handed to a [`SectorSink`], and of the reads made from
/// a [`HexSource`].
pub const SECTOR_SIZE: usize = 512;

/// Longest valid record line, excluding the line terminator: the start code
/// plus two characters for each of the byte count, 2 address bytes, record
/// type, 255 data bytes and checksum.
pub const MAX_LINE_LEN: usize = 1 + 2 * (1 + 2 + 1 + 255 + 1);

/// Errors produced while reading and parsing an Intel HEX image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HexError {
    /// A non-empty line did not start with `:`.
    InvalidStartCode,

    /// A line contained a character that is not a hex digit.
    InvalidHex,

    /// A line was too short, had an odd number of hex digits, or its byte
    /// count did not match the data present.
    InvalidLength,

    /// The record checksum did not match.
    ChecksumMismatch,

    /// The record type is not one of 00-05.
    UnsupportedRecord(u8),

    /// A line exceeded [`MAX_LINE_LEN`] characters.
    LineTooLong,

    /// The underlying source failed.
    Io(ErrorKind),
}

impl HexError {
    /// Returns a string representation of the error.
    pub fn as_str(&self) -> &'static str {
        match self {
            HexError::InvalidStartCode => "Invalid Start Code",
            HexError::InvalidHex => "Invalid Hex Digit",
            HexError::InvalidLength => "Invalid Record Length",
            HexError::ChecksumMismatch => "Checksum Mismatch",
            HexError::UnsupportedRecord(_) => "Unsupported Record Type",
            HexError::LineTooLong => "Line Too Long",
            HexError::Io(_) => "I/O Error",
        }
    }
}

impl fmt::Display for HexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HexError::UnsupportedRecord(kind) => write!(f, "{}: 0x{kind:02X}", self.as_str()),
            HexError::Io(kind) => write!(f, "{}: {kind:?}", self.as_str()),
            _ => write!(f, "{}", self.as_str()),
        }
    }
}

impl Serialize for HexError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct;
        let mut state = serializer.serialize_struct("HexError", 2)?;

        let kind = match self {
            HexError::InvalidStartCode => "invalid start code",
            HexError::InvalidHex => "invalid hex",
            HexError::InvalidLength => "invalid length",
            HexError::ChecksumMismatch => "checksum mismatch",
            HexError::UnsupportedRecord(_) => "unsupported record",
            HexError::LineTooLong => "line too long",
            HexError::Io(_) => "io",
        };
        state.serialize_field("kind", kind)?;

        let detail = match self {
            HexError::UnsupportedRecord(kind) => format!("{kind:02X}"),
            HexError::Io(kind) => format!("{kind:?}"),
            _ => String::new(),
        };
        state.serialize_field("detail", detail.as_str())?;
        state.end()
    }
}

/// A seekable source of HEX file bytes, such as a file on an SD card.
///
/// Implemented for every [`embedded_io::Read`] + [`embedded_io::Seek`] type.
pub trait HexSource {
    /// Reads up to `buf.len()` bytes.  Returns the number of bytes read,
    /// with 0 meaning end of file.
    fn read_sector(&mut self, buf: &mut [u8]) -> Result<usize, HexError>;

    /// Returns to the start of the file, so it can be streamed again.
    fn rewind(&mut self) -> Result<(), HexError>;
}

impl<T> HexSource for T
where
    T: Read + Seek,
{
    fn read_sector(&mut self, buf: &mut [u8]) -> Result<usize, HexError> {
        self.read(buf)
            .map_err(|e| HexError::Io(embedded_io::Error::kind(&e)))
    }

    fn rewind(&mut self) -> Result<(), HexError> {
        self.seek(SeekFrom::Start(0))
            .map(|_| ())
            .map_err(|e| HexError::Io(embedded_io::Error::kind(&e)))
    }
}

/// Receives accumulated image chunks.
///
/// Each call carries one contiguous chunk of at most [`SECTOR_SIZE`] bytes
/// starting at `addr`.  Gaps inside a chunk are filled with `0xFF`.
pub trait SectorSink {
    /// Error type, which must be able to carry a [`HexError`] so that parse
    /// failures and sink failures come back through one `Result`.
    type Error: From<HexError>;

    /// Writes `data` to the target at `addr`.
    fn program(&mut self, addr: u32, data: &[u8]) -> Result<(), Self::Error>;

    /// Checks the target holds `data` at `addr`.
    fn verify(&mut self, addr: u32, data: &[u8]) -> Result<(), Self::Error>;
}
