// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! Streams a HEX file from a [`HexSource`] into a [`SectorSink`].

use core::fmt;
#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::record::{Record, RecordType};
use crate::sector::Sector;
use crate::{HexError, HexSource, MAX_LINE_LEN, SECTOR_SIZE, SectorSink};

/// Which [`SectorSink`] method each completed sector is handed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pass {
    Program,
    Verify,
}

impl fmt::Display for Pass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pass::Program => write!(f, "Program"),
            Pass::Verify => write!(f, "Verify"),
        }
    }
}

/// Summary of one pass over a HEX file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HexStats {
    /// Number of sectors handed to the sink
    pub sectors: u32,

    /// Total bytes handed to the sink, including `0xFF` gap fill
    pub bytes: u32,

    /// Execution start address, if the file contained a Start Linear
    /// Address record
    pub start_address: Option<u32>,
}

/// Streams every data record in `source` to `sink`, one sector at a time.
///
/// The source is read from its current position, in [`SECTOR_SIZE`] byte
/// reads, until an End Of File record or the end of the source.  Any partly
/// filled sector is flushed at the end.
///
/// Arguments:
/// - `source`: The HEX file.  Rewind it before calling again for a second
///   pass.
/// - `pass`: Whether to call [`SectorSink::program()`] or
///   [`SectorSink::verify()`].
/// - `sink`: The receiver of each sector.
///
/// Returns:
/// - `Ok(HexStats)`: If the whole file was streamed and every sink call
///   succeeded.
/// - `Err(K::Error)`: The first parse, source or sink error.  Sectors
///   before the failure have already been handed to the sink.
pub fn process_file<S, K>(source: &mut S, pass: Pass, sink: &mut K) -> Result<HexStats, K::Error>
where
    S: HexSource + ?Sized,
    K: SectorSink + ?Sized,
{
    debug!("Exec:  HEX {pass} pass");
    let mut streamer = Streamer::new(pass);
    let mut buf = [0u8; SECTOR_SIZE];

    'read: loop {
        let count = source.read_sector(&mut buf)?;
        if count == 0 {
            break;
        }

        for &byte in &buf[..count] {
            match byte {
                b'\r' | b'\n' => streamer.end_line(sink)?,
                _ => streamer.push_byte(byte)?,
            }
            if streamer.done {
                break 'read;
            }
        }
    }

    // Last line may be unterminated
    if !streamer.done {
        streamer.end_line(sink)?;
    }
    streamer.flush(sink)?;

    debug!(
        "OK:    HEX {pass} pass, {} sectors, {} bytes",
        streamer.stats.sectors, streamer.stats.bytes
    );
    Ok(streamer.stats)
}

struct Streamer {
    pass: Pass,
    sector: Sector,
    upper_address: u32,
    line: [u8; MAX_LINE_LEN],
    line_len: usize,
    done: bool,
    stats: HexStats,
}

impl Streamer {
    fn new(pass: Pass) -> Self {
        Self {
            pass,
            sector: Sector::new(),
            upper_address: 0,
            line: [0; MAX_LINE_LEN],
            line_len: 0,
            done: false,
            stats: HexStats::default(),
        }
    }

    fn push_byte(&mut self, byte: u8) -> Result<(), HexError> {
        if self.line_len == MAX_LINE_LEN {
            warn!("Error: HEX line exceeds {MAX_LINE_LEN} characters");
            return Err(HexError::LineTooLong);
        }
        self.line[self.line_len] = byte;
        self.line_len += 1;
        Ok(())
    }

    fn end_line<K>(&mut self, sink: &mut K) -> Result<(), K::Error>
    where
        K: SectorSink + ?Sized,
    {
        if self.line_len == 0 {
            return Ok(());
        }
        let record = Record::parse(&self.line[..self.line_len])?;
        self.line_len = 0;
        self.handle_record(&record, sink)
    }

    fn handle_record<K>(&mut self, record: &Record, sink: &mut K) -> Result<(), K::Error>
    where
        K: SectorSink + ?Sized,
    {
        match record.record_type() {
            RecordType::Data => {
                let addr = self.upper_address.wrapping_add(record.offset() as u32);
                let data = record.data();
                if !self.sector.fits(addr, data.len()) {
                    // Keep half-words whole across a contiguous sector break
                    let carry = if self.sector.end() == addr {
                        self.sector.take_odd_tail()
                    } else {
                        None
                    };
                    self.flush(sink)?;
                    if let Some((tail_addr, byte)) = carry {
                        self.sector.push(tail_addr, &[byte]);
                    }
                }
                let placed = self.sector.push(addr, data);
                debug_assert!(placed);
            }
            RecordType::EndOfFile => {
                trace!("Value: HEX end of file");
                self.done = true;
            }
            RecordType::ExtendedLinearAddress => {
                if let Some(upper) = record.upper_address() {
                    trace!("Value: HEX upper address 0x{upper:08X}");
                    self.upper_address = upper;
                }
            }
            RecordType::StartLinearAddress => {
                if let Some(start) = record.start_address() {
                    info!("Value: HEX start address 0x{start:08X}");
                    self.stats.start_address = Some(start);
                }
            }
            RecordType::ExtendedSegmentAddress | RecordType::StartSegmentAddress => {
                trace!("Info:  Ignoring {} record", record.record_type());
            }
        }
        Ok(())
    }

    fn flush<K>(&mut self, sink: &mut K) -> Result<(), K::Error>
    where
        K: SectorSink + ?Sized,
    {
        if self.sector.is_empty() {
            return Ok(());
        }

        let addr = self.sector.base();
        let data = self.sector.as_slice();
        trace!("Exec:  {} 0x{addr:08X} {} bytes", self.pass, data.len());
        match self.pass {
            Pass::Program => sink.program(addr, data)?,
            Pass::Verify => sink.verify(addr, data)?,
        }

        self.stats.sectors += 1;
        self.stats.bytes += data.len() as u32;
        self.sector.reset();
        Ok(())
    }
}
