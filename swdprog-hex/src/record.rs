// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! Intel HEX record parsing
//!
//! A record is one line of the form `:LLAAAATT<data>CC`, where every field
//! is pairs of hex digits:
//!
//! * `LL` - number of data bytes
//! * `AAAA` - 16-bit address offset, big-endian
//! * `TT` - record type
//! * `CC` - two's complement of the sum of all preceding bytes

use core::fmt;

use crate::HexError;

pub const START_CODE: u8 = b':';

/// Intel HEX record type values
pub const REC_DATA: u8 = 0x00;
pub const REC_EOF: u8 = 0x01;
pub const REC_EXT_SEGMENT_ADDR: u8 = 0x02;
pub const REC_START_SEGMENT_ADDR: u8 = 0x03;
pub const REC_EXT_LINEAR_ADDR: u8 = 0x04;
pub const REC_START_LINEAR_ADDR: u8 = 0x05;

/// Maximum data bytes in one record
pub const MAX_DATA_LEN: usize = 255;

// Byte count, 2 address bytes, record type, checksum
const OVERHEAD_BYTES: usize = 5;

/// Intel HEX record types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordType {
    Data = REC_DATA,
    EndOfFile = REC_EOF,
    ExtendedSegmentAddress = REC_EXT_SEGMENT_ADDR,
    StartSegmentAddress = REC_START_SEGMENT_ADDR,
    ExtendedLinearAddress = REC_EXT_LINEAR_ADDR,
    StartLinearAddress = REC_START_LINEAR_ADDR,
}

impl RecordType {
    /// Convert a record type byte to a `RecordType`
    ///
    /// Returns:
    /// - `Ok(RecordType)`: If the byte is a known record type.
    /// - `Err(HexError::UnsupportedRecord)`: Otherwise.
    pub fn from_byte(byte: u8) -> Result<Self, HexError> {
        match byte {
            REC_DATA => Ok(Self::Data),
            REC_EOF => Ok(Self::EndOfFile),
            REC_EXT_SEGMENT_ADDR => Ok(Self::ExtendedSegmentAddress),
            REC_START_SEGMENT_ADDR => Ok(Self::StartSegmentAddress),
            REC_EXT_LINEAR_ADDR => Ok(Self::ExtendedLinearAddress),
            REC_START_LINEAR_ADDR => Ok(Self::StartLinearAddress),
            _ => Err(HexError::UnsupportedRecord(byte)),
        }
    }

    pub fn to_byte(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordType::Data => write!(f, "Data"),
            RecordType::EndOfFile => write!(f, "End Of File"),
            RecordType::ExtendedSegmentAddress => write!(f, "Extended Segment Address"),
            RecordType::StartSegmentAddress => write!(f, "Start Segment Address"),
            RecordType::ExtendedLinearAddress => write!(f, "Extended Linear Address"),
            RecordType::StartLinearAddress => write!(f, "Start Linear Address"),
        }
    }
}

/// One decoded Intel HEX record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    record_type: RecordType,
    offset: u16,
    len: u8,
    data: [u8; MAX_DATA_LEN],
}

impl Record {
    /// Parses one record line, without its line terminator.
    ///
    /// Arguments:
    /// - `line`: The raw line bytes, starting with `:`.
    ///
    /// Returns:
    /// - `Ok(Record)`: If the line is a well formed record with a valid
    ///   checksum.
    /// - `Err(HexError)`: Describing the first problem found.
    pub fn parse(line: &[u8]) -> Result<Self, HexError> {
        let (&start, digits) = line.split_first().ok_or(HexError::InvalidStartCode)?;
        if start != START_CODE {
            return Err(HexError::InvalidStartCode);
        }

        if digits.len() % 2 != 0 || digits.len() < OVERHEAD_BYTES * 2 {
            return Err(HexError::InvalidLength);
        }

        let mut bytes = [0u8; MAX_DATA_LEN + OVERHEAD_BYTES];
        let count = digits.len() / 2;
        if count > bytes.len() {
            return Err(HexError::LineTooLong);
        }
        for (byte, pair) in bytes.iter_mut().zip(digits.chunks_exact(2)) {
            *byte = hex_byte(pair[0], pair[1])?;
        }
        let bytes = &bytes[..count];

        let len = bytes[0];
        if len as usize + OVERHEAD_BYTES != count {
            return Err(HexError::InvalidLength);
        }

        let sum = bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
        if sum != 0 {
            return Err(HexError::ChecksumMismatch);
        }

        let offset = u16::from_be_bytes([bytes[1], bytes[2]]);
        let record_type = RecordType::from_byte(bytes[3])?;

        let mut data = [0u8; MAX_DATA_LEN];
        data[..len as usize].copy_from_slice(&bytes[4..4 + len as usize]);

        let record = Record {
            record_type,
            offset,
            len,
            data,
        };
        record.check_length()?;
        Ok(record)
    }

    // Address records have a fixed payload size.
    fn check_length(&self) -> Result<(), HexError> {
        let expected = match self.record_type {
            RecordType::Data => return Ok(()),
            RecordType::EndOfFile => 0,
            RecordType::ExtendedSegmentAddress | RecordType::ExtendedLinearAddress => 2,
            RecordType::StartSegmentAddress | RecordType::StartLinearAddress => 4,
        };
        if self.len == expected {
            Ok(())
        } else {
            Err(HexError::InvalidLength)
        }
    }

    pub fn record_type(&self) -> RecordType {
        self.record_type
    }

    /// The 16-bit address offset field
    pub fn offset(&self) -> u16 {
        self.offset
    }

    pub fn data(&self) -> &[u8] {
        &self.data[..self.len as usize]
    }

    /// For an Extended Linear Address record, the upper 16 bits of all
    /// following data addresses.
    pub fn upper_address(&self) -> Option<u32> {
        match self.record_type {
            RecordType::ExtendedLinearAddress => {
                Some((u16::from_be_bytes([self.data[0], self.data[1]]) as u32) << 16)
            }
            _ => None,
        }
    }

    /// For a Start Linear Address record, the execution start address.
    pub fn start_address(&self) -> Option<u32> {
        match self.record_type {
            RecordType::StartLinearAddress => Some(u32::from_be_bytes([
                self.data[0],
                self.data[1],
                self.data[2],
                self.data[3],
            ])),
            _ => None,
        }
    }
}

fn hex_digit(c: u8) -> Result<u8, HexError> {
    match c {
        b'0'..=b'9' => Ok(c - b'0'),
        b'A'..=b'F' => Ok(c - b'A' + 10),
        b'a'..=b'f' => Ok(c - b'a' + 10),
        _ => Err(HexError::InvalidHex),
    }
}

fn hex_byte(high: u8, low: u8) -> Result<u8, HexError> {
    Ok((hex_digit(high)? << 4) | hex_digit(low)?)
}
