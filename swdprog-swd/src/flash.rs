// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! Flash Sequencer
//!
//! Drives an STM32F0/F1/F3 style flash controller through the target's
//! memory, using a connected [`SwdInterface`].  The controller is left
//! locked after every erase and every programmed chunk, whether or not the
//! operation succeeded.
//!
//! ```text
//!   Locked --unlock--> Unlocked --+--> Erasing ----+--lock--> Locked
//!                                 +--> Programming +
//!                                 +--> Verifying --+
//! ```
//!
//! [`Flasher`] is also a [`SectorSink`], so a HEX image can be streamed
//! straight into it with [`swdprog_hex::process_file()`], or all in one go
//! with [`Flasher::program_image()`].

use core::fmt;
#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};
use serde::{Deserialize, Serialize};

use crate::SwdError;
use crate::interface::SwdInterface;
use crate::link::SwdLink;
use swdprog_core::flash::{FlashCr, FlashKeyr, FlashRegs, FlashSr};
use swdprog_hex::{HexSource, HexStats, Pass, SectorSink, process_file};

// Largest verify read, which sets the size of the read buffer.
const MAX_VERIFY_CHUNK_BYTES: usize = 256;

/// Flash controller polling and verification settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlashConfig {
    /// Maximum SR polls while waiting for BSY to clear.
    pub busy_poll_limit: u32,

    /// Pause between SR polls.
    pub busy_poll_interval_us: u32,

    /// Bytes read back per verify round trip.  Clamped to 1 to 256.
    pub verify_chunk_bytes: usize,
}

impl Default for FlashConfig {
    fn default() -> Self {
        Self {
            busy_poll_limit: 1000,
            busy_poll_interval_us: 1000,
            verify_chunk_bytes: MAX_VERIFY_CHUNK_BYTES,
        }
    }
}

impl fmt::Display for FlashConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "busy poll {}x{}us, verify chunk {} bytes",
            self.busy_poll_limit, self.busy_poll_interval_us, self.verify_chunk_bytes
        )
    }
}

/// Flash Sequencer object
///
/// Borrows a connected [`SwdInterface`] for as long as flash operations are
/// needed.
///
/// ```rust,ignore
/// use swdprog_swd::{Flasher, SwdInterface};
///
/// let mut swd = SwdInterface::new(link);
/// swd.connect()?;
///
/// let mut flasher = Flasher::new(&mut swd)?;
/// let stats = flasher.program_image(&mut file)?;
/// ```
pub struct Flasher<'a, L> {
    swd: &'a mut SwdInterface<L>,
    regs: FlashRegs,
    config: FlashConfig,
}

impl<'a, L: SwdLink> Flasher<'a, L> {
    /// Create a flasher for the connected target's family, with the default
    /// [`FlashConfig`].
    pub fn new(swd: &'a mut SwdInterface<L>) -> Result<Self, SwdError> {
        Self::with_config(swd, FlashConfig::default())
    }

    /// Create a flasher for the connected target's family.
    ///
    /// Arguments:
    /// - `swd`: A connected session.
    /// - `config`: Polling and verify settings.
    ///
    /// Returns:
    /// - `Ok(Flasher)`: If the target's family has a known flash controller.
    /// - `Err(SwdError::NotReady)`: If `swd` is not connected.
    /// - `Err(SwdError::UnknownDevice)`: If the family is not known.
    pub fn with_config(
        swd: &'a mut SwdInterface<L>,
        config: FlashConfig,
    ) -> Result<Self, SwdError> {
        let family = swd.family().ok_or(SwdError::NotReady)?;
        let Some(regs) = family.flash_regs() else {
            warn!("Error: No flash controller for {family}");
            return Err(SwdError::UnknownDevice);
        };
        debug!("Value: {family} flash controller at {:#010X}", regs.base);
        Ok(Self::with_regs(swd, regs, config))
    }

    /// Create a flasher for an explicitly chosen controller register block,
    /// regardless of the identified family.
    pub fn with_regs(swd: &'a mut SwdInterface<L>, regs: FlashRegs, config: FlashConfig) -> Self {
        Self { swd, regs, config }
    }

    pub fn regs(&self) -> &FlashRegs {
        &self.regs
    }

    pub fn config(&self) -> &FlashConfig {
        &self.config
    }

    /// Unlocks the flash controller by writing the two key values to KEYR.
    ///
    /// There is no read back of the lock state.  Unlocking an already
    /// unlocked controller is harmless.
    ///
    /// Returns:
    /// - `Ok(())`: if both keys were written.
    /// - `Err(SwdError::UnlockFailed)`: if either write failed.
    pub fn unlock(&mut self) -> Result<(), SwdError> {
        trace!("Exec:  Unlock flash");
        let keyr = self.regs.keyr();
        self.swd
            .write_mem(keyr, FlashKeyr::KEY1)
            .and_then(|_| self.swd.write_mem(keyr, FlashKeyr::KEY2))
            .map_err(|e| {
                warn!("Error: Flash unlock: {e}");
                SwdError::UnlockFailed
            })?;
        trace!("OK:    Unlock flash");
        Ok(())
    }

    /// Locks the flash controller by setting LOCK in CR.  Locking an already
    /// locked controller is harmless.
    pub fn lock(&mut self) -> Result<(), SwdError> {
        trace!("Exec:  Lock flash");
        self.swd.write_mem(self.regs.cr(), FlashCr::LOCK)?;
        trace!("OK:    Lock flash");
        Ok(())
    }

    /// Whether CR reports the controller locked.
    pub fn is_locked(&mut self) -> Result<bool, SwdError> {
        let cr = self.swd.read_mem(self.regs.cr())?;
        Ok(cr & FlashCr::LOCK != 0)
    }

    /// Erases all of main flash.  The controller must be unlocked.
    ///
    /// Returns:
    /// - `Ok(())`: if the erase completed.
    /// - `Err(SwdError::EraseFailed)`: on a write failure, a busy timeout or
    ///   an error flag in SR.
    pub fn mass_erase(&mut self) -> Result<(), SwdError> {
        info!("Exec:  Mass erase");
        let result = self.erase(FlashCr::MER, None);
        if result.is_ok() {
            info!("OK:    Mass erase");
        }
        result
    }

    /// Erases the page containing `addr`.  The controller must be unlocked.
    ///
    /// The page's start address, from the family's page size, is what is
    /// written to AR.
    ///
    /// Returns:
    /// - `Err(SwdError::Api)`: if `addr` is below main flash.
    /// - Otherwise as for [`Self::mass_erase()`].
    pub fn erase_page(&mut self, addr: u32) -> Result<(), SwdError> {
        if addr < self.regs.flash_base {
            info!("Error: Attempt to erase page below flash at {addr:#010X}");
            return Err(SwdError::Api);
        }
        let page = addr & !(self.regs.page_size - 1);
        debug!("Exec:  Erase page {page:#010X}");
        self.erase(FlashCr::PER, Some(page))
    }

    /// Unlocks, mass erases and locks the flash.  The lock is attempted even
    /// if the unlock or erase fails.
    pub fn erase_chip(&mut self) -> Result<(), SwdError> {
        let result = self.unlock().and_then(|_| self.mass_erase());
        let lock = self.lock();
        result.and(lock)
    }

    /// Programs `data` at `addr`, a half-word at a time.  The controller
    /// must be unlocked and the range erased.
    ///
    /// Bytes are paired little endian.  If `data` has an odd length the last
    /// byte is paired with 0.  The controller is polled after every
    /// half-word.
    ///
    /// Arguments:
    /// - `addr`: Half-word aligned flash address.
    /// - `data`: The bytes to program.
    ///
    /// Returns:
    /// - `Ok(())`: if every half-word was programmed.
    /// - `Err(SwdError::Api)`: if `addr` is not half-word aligned, or the
    ///   range runs past the top of the address space.
    /// - `Err(SwdError::ProgramFailed)`: if any half-word failed.  Earlier
    ///   half-words remain programmed.
    pub fn program(&mut self, addr: u32, data: &[u8]) -> Result<(), SwdError> {
        if addr & 0x1 != 0 {
            info!("Error: Attempt to program on non-2 byte boundary");
            return Err(SwdError::Api);
        }
        check_range(addr, data.len())?;
        if data.is_empty() {
            return Ok(());
        }

        debug!("Exec:  Program {} bytes at {addr:#010X}", data.len());
        self.swd
            .write_mem(self.regs.cr(), FlashCr::PG)
            .map_err(|e| {
                warn!("Error: Set PG: {e}");
                SwdError::ProgramFailed
            })?;

        let result = self.program_half_words(addr, data);
        let clear = self.clear_cr(SwdError::ProgramFailed);

        match &result {
            Ok(()) => debug!("OK:    Program {} bytes at {addr:#010X}", data.len()),
            Err(e) => warn!("Error: Program at {addr:#010X}: {e}"),
        }
        result.and(clear)
    }

    /// Reads back flash from `addr` and compares it with `expected`.
    ///
    /// Returns:
    /// - `Ok(())`: if every byte matched.
    /// - `Err(SwdError::VerifyMismatch)`: at the first mismatch.
    /// - `Err(SwdError::Api)`: if the range runs past the top of the address
    ///   space.
    /// - `Err(SwdError)`: if a memory read failed.
    pub fn verify(&mut self, addr: u32, expected: &[u8]) -> Result<(), SwdError> {
        check_range(addr, expected.len())?;
        debug!("Exec:  Verify {} bytes at {addr:#010X}", expected.len());
        let chunk_size = self.config.verify_chunk_bytes.clamp(1, MAX_VERIFY_CHUNK_BYTES);
        let mut buf = [0u8; MAX_VERIFY_CHUNK_BYTES];

        let mut chunk_addr = addr;
        for chunk in expected.chunks(chunk_size) {
            let actual = &mut buf[..chunk.len()];
            self.swd.read_block(chunk_addr, actual)?;

            if let Some(offset) = actual.iter().zip(chunk).position(|(a, e)| a != e) {
                warn!(
                    "Error: Verify mismatch at {:#010X}: expected {:#04X}, read {:#04X}",
                    chunk_addr.wrapping_add(offset as u32),
                    chunk[offset],
                    actual[offset]
                );
                return Err(SwdError::VerifyMismatch);
            }
            chunk_addr = chunk_addr.wrapping_add(chunk.len() as u32);
        }

        debug!("OK:    Verify {} bytes at {addr:#010X}", expected.len());
        Ok(())
    }

    /// Programs a whole Intel HEX image.
    ///
    /// Mass erases the flash, streams the image through [`Self::program()`]
    /// a sector at a time, then rewinds it and streams it again through
    /// [`Self::verify()`].
    ///
    /// Arguments:
    /// - `source`: The HEX file.  It is rewound before each pass.
    ///
    /// Returns:
    /// - `Ok(HexStats)`: Statistics from the verify pass.
    /// - `Err(SwdError)`: The first failure.  The flash is left locked.
    pub fn program_image<S>(&mut self, source: &mut S) -> Result<HexStats, SwdError>
    where
        S: HexSource + ?Sized,
    {
        info!("Exec:  Program image");
        self.erase_chip()?;

        source.rewind()?;
        let programmed = process_file(source, Pass::Program, self)?;
        info!(
            "OK:    Programmed {} bytes in {} sectors",
            programmed.bytes, programmed.sectors
        );

        source.rewind()?;
        let verified = process_file(source, Pass::Verify, self)?;
        info!(
            "OK:    Verified {} bytes in {} sectors",
            verified.bytes, verified.sectors
        );

        Ok(verified)
    }
}

// Internal functions
impl<L: SwdLink> Flasher<'_, L> {
    // Shared by mass and page erase.  CR is cleared whatever happens.
    fn erase(&mut self, mode: u32, addr: Option<u32>) -> Result<(), SwdError> {
        let result = self.start_erase(mode, addr);
        let clear = self.clear_cr(SwdError::EraseFailed);
        result.and(clear)
    }

    fn start_erase(&mut self, mode: u32, addr: Option<u32>) -> Result<(), SwdError> {
        let cr = self.regs.cr();
        let setup = self.swd.write_mem(cr, mode).and_then(|_| match addr {
            Some(addr) => self.swd.write_mem(self.regs.ar(), addr),
            None => Ok(()),
        });
        setup
            .and_then(|_| self.swd.write_mem(cr, mode | FlashCr::STRT))
            .map_err(|e| {
                warn!("Error: Start erase: {e}");
                SwdError::EraseFailed
            })?;

        self.wait_busy(SwdError::EraseFailed)
    }

    fn program_half_words(&mut self, addr: u32, data: &[u8]) -> Result<(), SwdError> {
        for (ii, pair) in data.chunks(2).enumerate() {
            let half_word = u16::from_le_bytes([pair[0], pair.get(1).copied().unwrap_or(0)]);
            let half_addr = addr.wrapping_add((ii as u32) * 2);

            self.swd.write_mem_u16(half_addr, half_word).map_err(|e| {
                debug!("Error: Half-word write at {half_addr:#010X}: {e}");
                SwdError::ProgramFailed
            })?;
            self.wait_busy(SwdError::ProgramFailed)?;
        }
        Ok(())
    }

    fn clear_cr(&mut self, failure: SwdError) -> Result<(), SwdError> {
        self.swd.write_mem(self.regs.cr(), 0).map_err(|e| {
            warn!("Error: Clear CR: {e}");
            failure
        })
    }

    // Polls SR until BSY clears.  Error flags are cleared before returning
    // `failure`, and EOP is cleared on success.
    fn wait_busy(&mut self, failure: SwdError) -> Result<(), SwdError> {
        let sr_addr = self.regs.sr();

        for attempt in 0..self.config.busy_poll_limit {
            let sr = match self.swd.read_mem(sr_addr) {
                Ok(value) => FlashSr::from(value),
                Err(e) => {
                    debug!("Error: Read SR: {e}");
                    return Err(failure);
                }
            };

            if sr.errors() {
                warn!("Error: Flash SR {sr:#}");
                let _ = self
                    .swd
                    .write_mem(sr_addr, sr.value() & FlashSr::ERROR_MASK);
                return Err(failure);
            }

            if !sr.busy() {
                if sr.eop() {
                    self.swd.write_mem(sr_addr, FlashSr::EOP).map_err(|e| {
                        warn!("Error: Clear EOP: {e}");
                        failure.clone()
                    })?;
                }
                return Ok(());
            }

            if attempt % 100 == 99 {
                trace!("Wait:  Flash busy after {} polls", attempt + 1);
            }
            self.swd.delay_us(self.config.busy_poll_interval_us);
        }

        warn!(
            "Error: Flash busy timeout after {} polls",
            self.config.busy_poll_limit
        );
        Err(failure)
    }
}

// Rejects ranges that run past the top of the 32-bit address space.
fn check_range(addr: u32, len: usize) -> Result<(), SwdError> {
    if u64::from(addr) + len as u64 > 1 << 32 {
        info!("Error: Range of {len} bytes at {addr:#010X} overflows");
        return Err(SwdError::Api);
    }
    Ok(())
}

impl<L: SwdLink> SectorSink for Flasher<'_, L> {
    type Error = SwdError;

    /// Programs one sector, unlocking before and locking after.
    fn program(&mut self, addr: u32, data: &[u8]) -> Result<(), SwdError> {
        let result = self
            .unlock()
            .and_then(|_| Flasher::program(self, addr, data));
        let lock = self.lock();
        result.and(lock)
    }

    fn verify(&mut self, addr: u32, data: &[u8]) -> Result<(), SwdError> {
        Flasher::verify(self, addr, data)
    }
}
