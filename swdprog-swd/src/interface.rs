// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! SWD Target Session
//!
//! [`SwdInterface`] owns the [`SwdProtocol`] and the state of the connection
//! to a single target: its IDCODE, MCU family and the current MEM-AP CSW
//! setting.  It provides connect, identify and reset, strongly typed DP and
//! AP register access, and memory access through MEM-AP 0.
//!
//! ```rust,ignore
//! use swdprog_swd::SwdInterface;
//!
//! let mut swd = SwdInterface::new(link);
//! let family = swd.connect()?;
//! let word = swd.read_mem(0x0800_0000)?;
//! ```

use core::fmt;
#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};
use serde::{Deserialize, Serialize};

use crate::SwdError;
use crate::link::SwdLink;
use crate::protocol::{SwdProtocol, WaitRetry};
use swdprog_core::arm::McuFamily;
use swdprog_core::arm::dp::{
    Abort, AbortRegister, CtrlStat, CtrlStatRegister, IdCode, IdCodeRegister, Select,
    SelectRegister,
};
use swdprog_core::arm::map::{Csw, CswRegister, Drw, DrwRegister, Tar, TarRegister};
use swdprog_core::arm::register::{ApRegister, DpRegister, ReadableRegister, WritableRegister};

// MEM-AP TAR auto-increment is only guaranteed within a 1KB block
const SWD_MEMORY_BOUNDARY: u32 = 0x400;

// Interval between CTRL/STAT power-up acknowledgement polls
const POWER_UP_POLL_US: u32 = 100;

/// Target session timing and retry settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SwdConfig {
    /// What to do when the target answers WAIT.
    pub wait_retry: WaitRetry,

    /// Pause after the line reset, before reading IDCODE.
    pub connect_settle_ms: u32,

    /// How long nRESET is held asserted.
    pub reset_pulse_ms: u32,

    /// Pause after nRESET is released.
    pub reset_recovery_ms: u32,

    /// Number of CTRL/STAT polls allowed for the power-up acknowledgements.
    pub power_up_retries: u32,
}

impl Default for SwdConfig {
    fn default() -> Self {
        Self {
            wait_retry: WaitRetry::Never,
            connect_settle_ms: 10,
            reset_pulse_ms: 10,
            reset_recovery_ms: 100,
            power_up_retries: 100,
        }
    }
}

impl fmt::Display for SwdConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "wait {:?}, settle {}ms, reset {}ms/{}ms, power up retries {}",
            self.wait_retry,
            self.connect_settle_ms,
            self.reset_pulse_ms,
            self.reset_recovery_ms,
            self.power_up_retries
        )
    }
}

/// SWD Target Session object
///
/// Create using [`SwdInterface::new()`] or [`SwdInterface::with_config()`],
/// then call [`SwdInterface::connect()`] before accessing memory.
///
/// The DP and AP register methods do not require a connection, so they can
/// be used to probe a target.  The memory methods do, and return
/// [`SwdError::NotReady`] otherwise.
#[derive(Debug)]
pub struct SwdInterface<L> {
    protocol: SwdProtocol<L>,
    config: SwdConfig,
    idcode: Option<IdCode>,
    family: Option<McuFamily>,
    csw: Option<Csw>,
}

impl<L: SwdLink> SwdInterface<L> {
    /// Create a new session over `link`, with the default [`SwdConfig`].
    pub fn new(link: L) -> Self {
        Self::with_config(link, SwdConfig::default())
    }

    /// Create a new session over `link`.
    ///
    /// Arguments:
    /// - `link`: The bit level link to the target.
    /// - `config`: Session timing and WAIT settings.
    ///
    /// Returns:
    /// - A new, unconnected, `SwdInterface`.
    pub fn with_config(link: L, config: SwdConfig) -> Self {
        let mut protocol = SwdProtocol::new(link);
        protocol.set_wait_retry(config.wait_retry);
        Self {
            protocol,
            config,
            idcode: None,
            family: None,
            csw: None,
        }
    }

    pub fn config(&self) -> &SwdConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: SwdConfig) {
        debug!("SWD config: {config}");
        self.protocol.set_wait_retry(config.wait_retry);
        self.config = config;
    }

    pub fn link(&self) -> &L {
        self.protocol.link()
    }

    pub fn link_mut(&mut self) -> &mut L {
        self.protocol.link_mut()
    }

    /// Direct access to the packet layer.  Using this while connected may
    /// leave the cached CSW out of step with the target.
    pub fn protocol_mut(&mut self) -> &mut SwdProtocol<L> {
        &mut self.protocol
    }

    /// Consumes the session, returning the link.
    pub fn into_link(self) -> L {
        self.protocol.into_link()
    }

    /// Whether [`Self::connect()`] has succeeded since the last reset or
    /// disconnect.
    pub fn is_connected(&self) -> bool {
        self.idcode.is_some()
    }

    /// IDCODE of the connected target.
    pub fn idcode(&self) -> Option<IdCode> {
        self.idcode
    }

    /// MCU family of the connected target.
    pub fn family(&self) -> Option<McuFamily> {
        self.family
    }

    /// Connects to the target.
    ///
    /// Performs a line reset, waits for the target to settle, reads IDCODE
    /// and rejects all 0s and all 1s as there being no target.  Then clears
    /// any sticky errors and powers up the debug and system domains.
    ///
    /// An IDCODE that is not in the known table still connects, returning
    /// [`McuFamily::Unknown`].  Memory can be accessed but the target cannot
    /// be flashed.
    ///
    /// Returns:
    /// - `Ok(McuFamily)`: The identified target family.
    /// - `Err(SwdError::ConnectionFailed)`: If any step failed.
    pub fn connect(&mut self) -> Result<McuFamily, SwdError> {
        trace!("Exec:  Connect");
        self.reset_internal_state();

        match self.connect_inner() {
            Ok((idcode, family)) => {
                info!("OK:    Connected to {family}, IDCODE {idcode}");
                self.idcode = Some(idcode);
                self.family = Some(family);
                Ok(family)
            }
            Err(e) => {
                warn!("Error: Connect failed: {e}");
                Err(SwdError::ConnectionFailed)
            }
        }
    }

    /// Forgets the connected target.  Nothing is sent on the bus.
    pub fn disconnect(&mut self) {
        trace!("Exec:  Disconnect");
        self.reset_internal_state();
    }

    /// Reads the DP IDCODE register.
    ///
    /// A line reset is required first, which [`Self::connect()`] does.
    pub fn detect(&mut self) -> Result<IdCode, SwdError> {
        let idcode = self.read_dp_register(IdCodeRegister)?;
        trace!("Value: IDCODE: {idcode}");
        Ok(idcode)
    }

    /// Maps an IDCODE to its MCU family.  Anything not in the known table is
    /// [`McuFamily::Unknown`].
    pub fn identify(idcode: IdCode) -> McuFamily {
        McuFamily::from_idcode(idcode)
    }

    /// Pulses the target's nRESET line.
    ///
    /// This forgets the connected target.  Call [`Self::connect()`] again
    /// afterwards.
    pub fn reset_target(&mut self) {
        trace!("Exec:  Reset target");
        self.protocol.set_reset(true);
        self.delay_ms(self.config.reset_pulse_ms);
        self.protocol.set_reset(false);
        self.delay_ms(self.config.reset_recovery_ms);
        self.reset_internal_state();
        trace!("OK:    Reset target");
    }

    /// Write a Debug Port register
    ///
    /// Arguments:
    /// - `reg`: The register to write, which must implement the `DpRegister`
    ///   trait.
    /// - `value`: The value to write.
    ///
    /// Returns:
    /// - `Ok(())` if the register was written successfully.
    /// - `Err(SwdError)` if there was an error writing the register.
    ///
    /// ```rust,ignore
    /// use swdprog_core::arm::dp::{Abort, AbortRegister};
    /// swd.write_dp_register(AbortRegister, Abort::clear_all())?;
    /// ```
    pub fn write_dp_register<R>(&mut self, _reg: R, value: R::Value) -> Result<(), SwdError>
    where
        R: WritableRegister + DpRegister,
        R::Value: Into<u32>,
    {
        self.protocol.write_dp(R::ADDRESS, R::to_raw(value))
    }

    /// Write an Access Port register in MEM-AP 0, bank 0.
    ///
    /// ```rust,ignore
    /// use swdprog_core::arm::map::{Tar, TarRegister};
    /// swd.write_ap_register(TarRegister, Tar::from(0x2000_0000))?;
    /// ```
    pub fn write_ap_register<R>(&mut self, _reg: R, value: R::Value) -> Result<(), SwdError>
    where
        R: WritableRegister + ApRegister,
        R::Value: Into<u32>,
    {
        self.protocol.write_ap(R::ADDRESS, R::to_raw(value))
    }

    /// Read a Debug Port register.
    ///
    /// Arguments:
    /// - `reg`: The register to read, which must implement the `DpRegister`
    ///   trait.
    ///
    /// Returns:
    /// - `Ok(value)` if the register was read successfully, where `value` is
    ///   the value read from the register.
    /// - `Err(SwdError)` if there was an error reading the register.
    ///
    /// ```rust,ignore
    /// use swdprog_core::arm::dp::CtrlStatRegister;
    /// let value = swd.read_dp_register(CtrlStatRegister)?;
    /// ```
    pub fn read_dp_register<R>(&mut self, _reg: R) -> Result<R::Value, SwdError>
    where
        R: ReadableRegister + DpRegister,
        R::Value: From<u32>,
    {
        let raw = self.protocol.read_dp(R::ADDRESS)?;
        Ok(R::from_raw(raw))
    }

    /// Read an Access Port register in MEM-AP 0, bank 0.  The posted result
    /// is collected from DP RDBUFF.
    pub fn read_ap_register<R>(&mut self, _reg: R) -> Result<R::Value, SwdError>
    where
        R: ReadableRegister + ApRegister,
        R::Value: From<u32>,
    {
        let raw = self.protocol.read_ap(R::ADDRESS)?;
        Ok(R::from_raw(raw))
    }

    /// Clears the DP sticky error flags.
    pub fn clear_errors(&mut self) -> Result<(), SwdError> {
        trace!("Exec:  Clear errors");
        self.write_dp_register(AbortRegister, Abort::clear_all())?;
        trace!("OK:    Clear errors");
        Ok(())
    }

    /// Requests debug and system power-up, and waits for both to be
    /// acknowledged.
    ///
    /// Returns:
    /// - `Ok(())`: if the domains powered up.
    /// - `Err(SwdError::ConnectionFailed)`: if the acknowledgements did not
    ///   arrive within `power_up_retries` polls.
    /// - `Err(SwdError)`: if a DP access failed.
    pub fn power_up_debug_domain(&mut self) -> Result<(), SwdError> {
        trace!("Exec:  Power up debug domain");

        // AP 0, bank 0 holds CSW, TAR and DRW
        self.write_dp_register(SelectRegister, Select::default())?;
        self.write_dp_register(CtrlStatRegister, CtrlStat::power_up_request())?;

        for attempt in 0..=self.config.power_up_retries {
            let status = self.read_dp_register(CtrlStatRegister)?;
            if status.has_errors() {
                debug!("Value: DP errors {}", status.error_states());
            }
            if status.powered_up() {
                debug!("OK:    Debug domain powered up {}", status.power_states());
                return Ok(());
            }
            trace!("Retry: Power up {attempt} {}", status.power_states());
            self.protocol.delay_us(POWER_UP_POLL_US);
        }

        warn!("Error: Debug domain did not power up");
        Err(SwdError::ConnectionFailed)
    }

    /// Reads a 32-bit value from the target's memory.
    ///
    /// Arguments:
    /// - `addr`: Word aligned address to read from.
    ///
    /// Returns:
    /// - `Ok(u32)`: The value read.
    /// - `Err(SwdError::Api)`: If `addr` is not word aligned.
    /// - `Err(SwdError::NotReady)`: If not connected.
    /// - `Err(SwdError::MemoryAccessFailed)`: If a transaction failed.
    pub fn read_mem(&mut self, addr: u32) -> Result<u32, SwdError> {
        if addr & 0x3 != 0 {
            info!("Error: Attempt to read on non-4 byte boundary");
            return Err(SwdError::Api);
        }
        self.check_connected()?;

        let result = self.read_word(addr);
        self.memory_result(result)
    }

    /// Writes a 32-bit value to the target's memory.
    ///
    /// Note that to write to flash, the flash controller must be unlocked and
    /// programming enabled, and most controllers only accept half-word
    /// writes.  Use [`crate::Flasher`] for this.
    ///
    /// Arguments:
    /// - `addr`: Word aligned address to write to.
    /// - `data`: The value to write.
    ///
    /// Returns:
    /// - `Ok(())`: if the write was successful.
    /// - `Err(SwdError)`: as for [`Self::read_mem()`].
    pub fn write_mem(&mut self, addr: u32, data: u32) -> Result<(), SwdError> {
        if addr & 0x3 != 0 {
            info!("Error: Attempt to write on non-4 byte boundary");
            return Err(SwdError::Api);
        }
        self.check_connected()?;

        let result = self.write_word(addr, data);
        self.memory_result(result)
    }

    /// Writes a 16-bit value to the target's memory, using a 16-bit MEM-AP
    /// access.
    ///
    /// Arguments:
    /// - `addr`: Half-word aligned address to write to.
    /// - `data`: The value to write.
    pub fn write_mem_u16(&mut self, addr: u32, data: u16) -> Result<(), SwdError> {
        if addr & 0x1 != 0 {
            info!("Error: Attempt to write on non-2 byte boundary");
            return Err(SwdError::Api);
        }
        self.check_connected()?;

        let result = self.write_half_word(addr, data);
        self.memory_result(result)
    }

    /// Reads a block of memory from the target into `buf`.
    ///
    /// Uses 32-bit auto-incrementing accesses, reprogramming TAR at each 1KB
    /// boundary.  `addr` need not be word aligned: the leading bytes of the
    /// first word, and the trailing bytes of the last, are discarded.
    ///
    /// Arguments:
    /// - `addr`: The starting address in the target's memory.
    /// - `buf`: Filled with the data read.  Its length sets the number of
    ///   bytes read.
    ///
    /// Returns:
    /// - `Ok(())`: if the whole block was read.
    /// - `Err(SwdError)`: if any word failed, in which case the contents of
    ///   `buf` are undefined.
    pub fn read_block(&mut self, addr: u32, buf: &mut [u8]) -> Result<(), SwdError> {
        if buf.is_empty() {
            return Ok(());
        }
        self.check_connected()?;

        trace!("Exec:  Read block {} bytes from {addr:#010X}", buf.len());
        let result = self.read_block_inner(addr, buf);
        self.memory_result(result)
    }

    /// Writes a block of memory to the target from `data`.
    ///
    /// Uses 32-bit auto-incrementing accesses, reprogramming TAR at each 1KB
    /// boundary.  If `data` is not a whole number of words, the final word
    /// is read first and only the bytes covered by `data` are changed.
    ///
    /// Arguments:
    /// - `addr`: The word aligned starting address in the target's memory.
    /// - `data`: The bytes to write.
    ///
    /// Returns:
    /// - `Ok(())`: if the whole block was written.
    /// - `Err(SwdError::Api)`: if `addr` is not word aligned.
    /// - `Err(SwdError)`: if any word failed.  Words before the failing one
    ///   have been written.
    pub fn write_block(&mut self, addr: u32, data: &[u8]) -> Result<(), SwdError> {
        if addr & 0x3 != 0 {
            info!("Error: Attempt to write block on non-4 byte boundary");
            return Err(SwdError::Api);
        }
        if data.is_empty() {
            return Ok(());
        }
        self.check_connected()?;

        trace!("Exec:  Write block {} bytes to {addr:#010X}", data.len());
        let result = self.write_block_inner(addr, data);
        self.memory_result(result)
    }

    pub(crate) fn delay_us(&mut self, us: u32) {
        self.protocol.delay_us(us);
    }
}

// Internal functions
impl<L: SwdLink> SwdInterface<L> {
    fn reset_internal_state(&mut self) {
        self.idcode = None;
        self.family = None;
        self.csw = None;
    }

    fn connect_inner(&mut self) -> Result<(IdCode, McuFamily), SwdError> {
        self.protocol.line_reset();
        self.delay_ms(self.config.connect_settle_ms);

        let idcode = self.detect()?;
        if idcode.is_degenerate() {
            debug!("Value: Degenerate IDCODE {idcode}");
            return Err(SwdError::ConnectionFailed);
        }

        self.clear_errors()?;
        self.power_up_debug_domain()?;

        let family = Self::identify(idcode);
        if !family.is_known() {
            info!("Info:  Unknown MCU family: {idcode}");
        }
        Ok((idcode, family))
    }

    fn delay_ms(&mut self, ms: u32) {
        self.protocol.delay_us(ms.saturating_mul(1000));
    }

    fn check_connected(&self) -> Result<(), SwdError> {
        if self.is_connected() {
            Ok(())
        } else {
            debug!("Attempt to access memory before connect");
            Err(SwdError::NotReady)
        }
    }

    // Transport failures during memory access are reported as a memory
    // access failure.  The CSW may not be what we think it is afterwards.
    fn memory_result<T>(&mut self, result: Result<T, SwdError>) -> Result<T, SwdError> {
        result.map_err(|e| {
            debug!("Error: Memory access: {e}");
            self.csw = None;
            match e {
                SwdError::Api | SwdError::NotReady => e,
                _ => SwdError::MemoryAccessFailed,
            }
        })
    }

    fn set_csw(&mut self, csw: Csw) -> Result<(), SwdError> {
        if self.csw == Some(csw) {
            return Ok(());
        }
        trace!("Exec:  Set CSW {csw}");
        self.write_ap_register(CswRegister, csw)?;
        self.csw = Some(csw);
        Ok(())
    }

    fn set_tar(&mut self, addr: u32) -> Result<(), SwdError> {
        self.write_ap_register(TarRegister, Tar::from(addr))
    }

    fn read_word(&mut self, addr: u32) -> Result<u32, SwdError> {
        self.set_csw(Csw::word_auto_inc())?;
        self.set_tar(addr)?;
        let data = self.read_ap_register(DrwRegister)?;
        Ok(data.data())
    }

    fn write_word(&mut self, addr: u32, data: u32) -> Result<(), SwdError> {
        self.set_csw(Csw::word_auto_inc())?;
        self.set_tar(addr)?;
        self.write_ap_register(DrwRegister, Drw::from(data))
    }

    fn write_half_word(&mut self, addr: u32, data: u16) -> Result<(), SwdError> {
        self.set_csw(Csw::half_word())?;
        self.set_tar(addr)?;
        self.write_ap_register(DrwRegister, Drw::from_half_word(addr, data))
    }

    fn read_block_inner(&mut self, addr: u32, buf: &mut [u8]) -> Result<(), SwdError> {
        let lead = (addr & 0x3) as usize;
        let mut word_addr = addr & !0x3;
        let mut filled = 0;

        self.set_csw(Csw::word_auto_inc())?;
        self.set_tar(word_addr)?;

        while filled < buf.len() {
            let word = self.read_ap_register(DrwRegister)?.data().to_le_bytes();

            let skip = if filled == 0 { lead } else { 0 };
            let count = (4 - skip).min(buf.len() - filled);
            buf[filled..filled + count].copy_from_slice(&word[skip..skip + count]);
            filled += count;

            word_addr = word_addr.wrapping_add(4);
            if filled < buf.len() && word_addr & (SWD_MEMORY_BOUNDARY - 1) == 0 {
                trace!("Info:  TAR reload at {word_addr:#010X}");
                self.set_tar(word_addr)?;
            }
        }

        Ok(())
    }

    fn write_block_inner(&mut self, addr: u32, data: &[u8]) -> Result<(), SwdError> {
        let mut word_addr = addr;

        self.set_csw(Csw::word_auto_inc())?;
        self.set_tar(word_addr)?;

        let mut words = data.chunks_exact(4);
        for (ii, chunk) in words.by_ref().enumerate() {
            if ii != 0 && word_addr & (SWD_MEMORY_BOUNDARY - 1) == 0 {
                trace!("Info:  TAR reload at {word_addr:#010X}");
                self.set_tar(word_addr)?;
            }
            let word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            self.write_ap_register(DrwRegister, Drw::from(word))?;
            word_addr = word_addr.wrapping_add(4);
        }

        // Merge a partial last word with what is already there
        let tail = words.remainder();
        if !tail.is_empty() {
            let mut bytes = self.read_word(word_addr)?.to_le_bytes();
            bytes[..tail.len()].copy_from_slice(tail);
            self.write_word(word_addr, u32::from_le_bytes(bytes))?;
        }

        Ok(())
    }
}
