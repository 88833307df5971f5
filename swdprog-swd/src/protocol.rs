// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! ARM SWD Wire Protocol Implementation
//!
//! This module turns DP and AP register accesses into SWD packets, sent over
//! an [`SwdLink`].  Each packet is an 8-bit request, a turnaround, a 3-bit
//! ACK and, on an OK ACK, 32 data bits plus parity in the appropriate
//! direction.  Every transaction is followed by one idle bit with SWDIO
//! driven low.
//!
//! [`SwdProtocol::transfer()`] performs exactly one packet and reports what
//! happened.  The register methods build on it, applying the configured
//! [`WaitRetry`] policy and converting ACKs into [`SwdError`]s.

use core::fmt;
#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::SwdError;
use crate::link::{Direction, SwdLink};
use swdprog_core::arm::dp::RdBuffRegister;
use swdprog_core::arm::register::RegisterDescriptor;

// A line reset is at least 50 clocks with SWDIO high, followed by idle
// clocks.  We send 56 high, then 8 low, twice.
const LINE_RESET_HIGH_BYTES: usize = 7;
const LINE_RESET_REPEATS: usize = 2;

/// What to do when the target answers WAIT.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum WaitRetry {
    /// Fail the operation with [`SwdError::WaitAck`] immediately.
    #[default]
    Never,

    /// Retry the same transaction up to `retries` more times, pausing
    /// `backoff_us` microseconds between attempts.
    Bounded { retries: u32, backoff_us: u32 },
}

/// SWD ACK response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ack {
    Ok,
    Wait,
    Fault,

    /// Any other ACK value, or a read whose parity check failed.
    ProtocolError,
}

impl Ack {
    /// Decode the 3 ACK bits, as received LSB first.
    pub fn from_bits(bits: u8) -> Self {
        match bits {
            0b001 => Ack::Ok,
            0b010 => Ack::Wait,
            0b100 => Ack::Fault,
            _ => Ack::ProtocolError,
        }
    }

    /// Converts a non-OK ACK to the matching error.
    pub fn to_result(self) -> Result<(), SwdError> {
        match self {
            Ack::Ok => Ok(()),
            Ack::Wait => Err(SwdError::WaitAck),
            Ack::Fault => Err(SwdError::FaultAck),
            Ack::ProtocolError => Err(SwdError::ProtocolError),
        }
    }
}

/// Outcome of a single SWD packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transaction {
    /// The ACK, downgraded to [`Ack::ProtocolError`] if read data failed its
    /// parity check.
    pub ack: Ack,

    /// Read data.  Only present for reads with an OK ACK and good parity.
    pub data: Option<u32>,

    /// False only when read data was received with bad parity.
    pub parity_ok: bool,
}

/// SWD Protocol object
///
/// Owns the [`SwdLink`] and performs DP and AP register transactions on it.
/// It is normally used through [`crate::SwdInterface`], which adds
/// connection management and memory access.
///
/// ```rust,ignore
/// use swdprog_swd::SwdProtocol;
///
/// let mut protocol = SwdProtocol::new(link);
/// protocol.line_reset();
/// let idcode = protocol.read_dp(0x00)?;
/// ```
#[derive(Debug)]
pub struct SwdProtocol<L> {
    link: L,
    wait_retry: WaitRetry,
}

impl<L: SwdLink> SwdProtocol<L> {
    /// Create a new SWD protocol instance, which does not retry on WAIT.
    pub fn new(link: L) -> Self {
        Self {
            link,
            wait_retry: WaitRetry::default(),
        }
    }

    pub fn wait_retry(&self) -> WaitRetry {
        self.wait_retry
    }

    pub fn set_wait_retry(&mut self, wait_retry: WaitRetry) {
        trace!("Info:  WAIT policy {wait_retry:?}");
        self.wait_retry = wait_retry;
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    /// Consumes the protocol object, returning the link.
    pub fn into_link(self) -> L {
        self.link
    }

    /// Performs an SWD line reset: 56 clocks with SWDIO high, 8 with it low,
    /// twice.
    pub fn line_reset(&mut self) {
        trace!("Exec:  Line reset");
        self.link.set_swdio_direction(Direction::Output);
        for _ in 0..LINE_RESET_REPEATS {
            for _ in 0..LINE_RESET_HIGH_BYTES {
                self.link.write_byte(0xFF);
            }
            self.link.write_byte(0x00);
        }
    }

    /// Performs exactly one SWD packet.
    ///
    /// This never retries, and never fails: the outcome, including any ACK
    /// or parity problem, is described by the returned [`Transaction`].
    ///
    /// Arguments:
    /// - `op`: The operation, including the register address.
    /// - `data`: Data to write.  Ignored for reads.
    ///
    /// Returns:
    /// - The `Transaction` result.  SWDIO is left driven low after the
    ///   trailing idle bit.
    pub fn transfer(&mut self, op: SwdOp, data: u32) -> Transaction {
        let mut result = Transaction {
            ack: Ack::ProtocolError,
            data: None,
            parity_ok: true,
        };

        self.link.set_swdio_direction(Direction::Output);
        self.link.write_byte(op.to_request());

        // Turnaround, then the target drives the ACK
        self.link.set_swdio_direction(Direction::Input);
        self.link.read_bit();
        let mut ack = 0u8;
        for ii in 0..3 {
            if self.link.read_bit() {
                ack |= 1 << ii;
            }
        }
        result.ack = Ack::from_bits(ack);

        if result.ack == Ack::Ok {
            if op.is_read() {
                let value = self.read_u32();
                let parity = self.link.read_bit();
                self.link.read_bit(); // Turnaround

                if calculate_parity(value) == parity {
                    result.data = Some(value);
                } else {
                    debug!("SWD read parity error: data=0x{value:08X}, parity={parity}");
                    result.ack = Ack::ProtocolError;
                    result.parity_ok = false;
                }
            } else {
                self.link.read_bit(); // Turnaround
                self.link.set_swdio_direction(Direction::Output);
                self.write_u32(data);
                self.link.write_bit(calculate_parity(data));
            }
        }

        // Single idle bit, leaving SWDIO low
        self.link.set_swdio_direction(Direction::Output);
        self.link.write_bit(false);

        result
    }

    /// Read a Debug Port register.
    ///
    /// Arguments:
    /// - `addr`: Register address, 0x0, 0x4, 0x8 or 0xC.
    ///
    /// Returns:
    /// - `Ok(u32)`: The register value.
    /// - `Err(SwdError)`: The non-OK ACK, or `ProtocolError` on bad parity.
    pub fn read_dp(&mut self, addr: u8) -> Result<u32, SwdError> {
        self.execute(SwdOp::DpRead(addr), 0)
    }

    /// Write a Debug Port register.
    pub fn write_dp(&mut self, addr: u8, data: u32) -> Result<(), SwdError> {
        self.execute(SwdOp::DpWrite(addr), data).map(|_| ())
    }

    /// Read an Access Port register in the currently selected AP bank.
    ///
    /// AP reads are posted, so this issues the AP read and then collects the
    /// value from DP RDBUFF.
    ///
    /// Arguments:
    /// - `addr`: Register address within the bank.
    ///
    /// Returns:
    /// - `Ok(u32)`: The register value, from RDBUFF.
    /// - `Err(SwdError)`: If either transaction failed.
    pub fn read_ap(&mut self, addr: u8) -> Result<u32, SwdError> {
        self.execute(SwdOp::ApRead(addr), 0)?;
        self.execute(SwdOp::DpRead(RdBuffRegister::ADDRESS), 0)
    }

    /// Write an Access Port register in the currently selected AP bank.
    pub fn write_ap(&mut self, addr: u8, data: u32) -> Result<(), SwdError> {
        self.execute(SwdOp::ApWrite(addr), data).map(|_| ())
    }

    pub(crate) fn delay_us(&mut self, us: u32) {
        self.link.delay_us(us);
    }

    pub(crate) fn set_reset(&mut self, asserted: bool) {
        self.link.set_reset(asserted);
    }
}

// Internal functions
impl<L: SwdLink> SwdProtocol<L> {
    // Runs one operation under the WAIT policy.  Writes return 0.
    fn execute(&mut self, op: SwdOp, data: u32) -> Result<u32, SwdError> {
        let request = op.to_request();
        if op.is_read() {
            trace!("Exec:  {op}  SWD: {request:#04X}");
        } else {
            trace!("Exec:  {op} SWD: {request:#04X} {data:#010X}");
        }

        let mut attempt = 0;
        let result = loop {
            let transaction = self.transfer(op, data);
            match transaction.ack {
                Ack::Ok => break Ok(transaction.data.unwrap_or_default()),
                Ack::Wait => trace!("Wait:  {op}"),
                ack => break ack.to_result().map(|_| 0),
            }

            match self.wait_retry {
                WaitRetry::Never => break Err(SwdError::WaitAck),
                WaitRetry::Bounded {
                    retries,
                    backoff_us,
                } => {
                    attempt += 1;
                    if attempt > retries {
                        break Err(SwdError::WaitAck);
                    }
                    trace!("Retry: {op} {attempt}");
                    if backoff_us > 0 {
                        self.link.delay_us(backoff_us);
                    }
                }
            }
        };

        match &result {
            Ok(value) if op.is_read() => trace!("OK:    {op}            {value:#010X}"),
            Ok(_) => trace!("OK:    {op}"),
            Err(e) => debug!("Error: {op}  {e:?}"),
        }

        result
    }

    fn read_u32(&mut self) -> u32 {
        let mut value = 0u32;
        for ii in 0..32 {
            if self.link.read_bit() {
                value |= 1 << ii;
            }
        }
        value
    }

    fn write_u32(&mut self, value: u32) {
        for byte in value.to_le_bytes() {
            self.link.write_byte(byte);
        }
    }
}

/// SWD Operations
///
/// Each operation contains the register address as a u8 (0x0, 0x4, 0x8 or
/// 0xC).
///
/// SWD request format
/// Bit 0: Start (1)
/// Bit 1: APnDP (0=DP, 1=AP)
/// Bit 2: RnW (0=write, 1=read)
/// Bit 3: A2 (address bit 2)
/// Bit 4: A3 (address bit 3)
/// Bit 5: Parity
/// Bit 6: Stop (0)
/// Bit 7: Park (1)
///
/// ```rust
/// use swdprog_swd::protocol::SwdOp;
///
/// assert_eq!(SwdOp::DpRead(0x00).to_request(), 0xA5);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwdOp {
    DpRead(u8),
    DpWrite(u8),
    ApRead(u8),
    ApWrite(u8),
}

impl SwdOp {
    /// Builds the 8-bit request, sent LSB first.
    pub fn to_request(&self) -> u8 {
        let (base, addr) = match self {
            // start=1, APnDP=0, RnW=1, park=1
            SwdOp::DpRead(a) => (0x85, a),
            // start=1, APnDP=0, RnW=0, park=1
            SwdOp::DpWrite(a) => (0x81, a),
            // start=1, APnDP=1, RnW=1, park=1
            SwdOp::ApRead(a) => (0x87, a),
            // start=1, APnDP=1, RnW=0, park=1
            SwdOp::ApWrite(a) => (0x83, a),
        };

        let request = base | ((addr & 0x0C) << 1); // A[3:2] to bits 4:3
        Self::add_parity(request)
    }

    fn add_parity(request: u8) -> u8 {
        // Parity covers APnDP, RnW and A[3:2], bits 1 to 4
        let parity = calculate_parity(request & 0x1E) as u8;
        request | (parity << 5)
    }

    pub fn is_read(&self) -> bool {
        matches!(self, SwdOp::DpRead(_) | SwdOp::ApRead(_))
    }

    pub fn is_ap(&self) -> bool {
        matches!(self, SwdOp::ApRead(_) | SwdOp::ApWrite(_))
    }

    pub fn address(&self) -> u8 {
        match self {
            SwdOp::DpRead(a) | SwdOp::DpWrite(a) | SwdOp::ApRead(a) | SwdOp::ApWrite(a) => *a,
        }
    }
}

impl fmt::Display for SwdOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SwdOp::DpRead(a) => write!(f, "DP Read 0x{a:02X}"),
            SwdOp::DpWrite(a) => write!(f, "DP Write 0x{a:02X}"),
            SwdOp::ApRead(a) => write!(f, "AP Read 0x{a:02X}"),
            SwdOp::ApWrite(a) => write!(f, "AP Write 0x{a:02X}"),
        }
    }
}

/// Calculate SWD parity - 1 for an odd number of bits set to 1, 0 otherwise.
pub fn calculate_parity<T>(value: T) -> bool
where
    T: Into<u64>,
{
    (value.into().count_ones() % 2) == 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::vec::Vec;

    // Replays canned SWDIO levels and records everything written.
    #[derive(Default)]
    struct ScriptLink {
        reads: VecDeque<bool>,
        writes: Vec<bool>,
        clocks: usize,
        delays: Vec<u32>,
    }

    impl ScriptLink {
        fn respond(&mut self, bits: &[bool]) {
            self.reads.extend(bits.iter().copied());
        }

        fn respond_word(&mut self, value: u32, parity: bool) {
            for ii in 0..32 {
                self.reads.push_back((value >> ii) & 1 == 1);
            }
            self.reads.push_back(parity);
        }
    }

    impl SwdLink for ScriptLink {
        fn set_swdio_direction(&mut self, _direction: Direction) {}

        fn write_bit(&mut self, bit: bool) {
            self.clocks += 1;
            self.writes.push(bit);
        }

        fn read_bit(&mut self) -> bool {
            self.clocks += 1;
            // Undriven line floats high
            self.reads.pop_front().unwrap_or(true)
        }

        fn set_reset(&mut self, _asserted: bool) {}

        fn delay_us(&mut self, us: u32) {
            self.delays.push(us);
        }
    }

    const TRN: bool = true;
    const ACK_OK: [bool; 3] = [true, false, false];
    const ACK_WAIT: [bool; 3] = [false, true, false];
    const ACK_FAULT: [bool; 3] = [false, false, true];

    #[test]
    fn request_bytes() {
        assert_eq!(SwdOp::DpRead(0x00).to_request(), 0xA5);
        assert_eq!(SwdOp::DpWrite(0x00).to_request(), 0x81);
        assert_eq!(SwdOp::DpRead(0x04).to_request(), 0x8D);
        assert_eq!(SwdOp::DpWrite(0x08).to_request(), 0xB1);
        assert_eq!(SwdOp::DpRead(0x0C).to_request(), 0xBD);
        assert_eq!(SwdOp::ApWrite(0x04).to_request(), 0x8B);
        assert_eq!(SwdOp::ApRead(0x0C).to_request(), 0x9F);
    }

    #[test]
    fn request_framing_and_parity() {
        for addr in [0x00, 0x04, 0x08, 0x0C] {
            for op in [
                SwdOp::DpRead(addr),
                SwdOp::DpWrite(addr),
                SwdOp::ApRead(addr),
                SwdOp::ApWrite(addr),
            ] {
                let request = op.to_request();
                assert_eq!(request & 0x01, 0x01, "{op} start");
                assert_eq!(request & 0x40, 0x00, "{op} stop");
                assert_eq!(request & 0x80, 0x80, "{op} park");
                assert_eq!((request & 0x3E).count_ones() % 2, 0, "{op} parity");
            }
        }
    }

    #[test]
    fn ack_decode() {
        assert_eq!(Ack::from_bits(1), Ack::Ok);
        assert_eq!(Ack::from_bits(2), Ack::Wait);
        assert_eq!(Ack::from_bits(4), Ack::Fault);
        assert_eq!(Ack::from_bits(7), Ack::ProtocolError);
        assert_eq!(Ack::from_bits(0), Ack::ProtocolError);
    }

    #[test]
    fn read_transaction() {
        let mut link = ScriptLink::default();
        link.respond(&[TRN]);
        link.respond(&ACK_OK);
        link.respond_word(0x4BA0_0477, calculate_parity(0x4BA0_0477u32));
        let mut protocol = SwdProtocol::new(link);

        let transaction = protocol.transfer(SwdOp::DpRead(0x00), 0);
        assert_eq!(transaction.ack, Ack::Ok);
        assert_eq!(transaction.data, Some(0x4BA0_0477));
        assert!(transaction.parity_ok);

        // Request, turnaround, ACK, data, parity, turnaround, idle
        assert_eq!(protocol.link().clocks, 8 + 1 + 3 + 32 + 1 + 1 + 1);
        assert_eq!(protocol.link().writes.last(), Some(&false));
    }

    #[test]
    fn write_transaction() {
        let mut link = ScriptLink::default();
        link.respond(&[TRN]);
        link.respond(&ACK_OK);
        let mut protocol = SwdProtocol::new(link);

        let transaction = protocol.transfer(SwdOp::ApWrite(0x04), 0x0000_0003);
        assert_eq!(transaction.ack, Ack::Ok);
        assert_eq!(transaction.data, None);

        // Request, then 32 data bits, parity and idle
        let writes = &protocol.link().writes;
        assert_eq!(writes.len(), 8 + 32 + 1 + 1);
        assert!(writes[8] && writes[9]);
        assert!(writes[10..40].iter().all(|bit| !bit));
        assert!(!writes[40]); // Even parity
        assert_eq!(protocol.link().clocks, 8 + 1 + 3 + 1 + 32 + 1 + 1);
    }

    #[test]
    fn fault_is_thirteen_clocks() {
        let mut link = ScriptLink::default();
        link.respond(&[TRN]);
        link.respond(&ACK_FAULT);
        let mut protocol = SwdProtocol::new(link);

        let transaction = protocol.transfer(SwdOp::DpRead(0x04), 0);
        assert_eq!(transaction.ack, Ack::Fault);
        assert_eq!(transaction.data, None);
        assert_eq!(protocol.link().clocks, 13);
    }

    #[test]
    fn bad_parity_is_protocol_error() {
        let mut link = ScriptLink::default();
        link.respond(&[TRN]);
        link.respond(&ACK_OK);
        link.respond_word(0x1, false);
        let mut protocol = SwdProtocol::new(link);

        let transaction = protocol.transfer(SwdOp::DpRead(0x00), 0);
        assert_eq!(transaction.ack, Ack::ProtocolError);
        assert_eq!(transaction.data, None);
        assert!(!transaction.parity_ok);
    }

    #[test]
    fn no_target_is_protocol_error() {
        let mut protocol = SwdProtocol::new(ScriptLink::default());
        assert_eq!(protocol.read_dp(0x00), Err(SwdError::ProtocolError));
    }

    #[test]
    fn wait_without_retry() {
        let mut link = ScriptLink::default();
        link.respond(&[TRN]);
        link.respond(&ACK_WAIT);
        let mut protocol = SwdProtocol::new(link);

        assert_eq!(protocol.write_dp(0x08, 0), Err(SwdError::WaitAck));
        assert_eq!(protocol.link().clocks, 13);
    }

    #[test]
    fn wait_with_bounded_retry() {
        let mut link = ScriptLink::default();
        for _ in 0..2 {
            link.respond(&[TRN]);
            link.respond(&ACK_WAIT);
        }
        link.respond(&[TRN]);
        link.respond(&ACK_OK);
        link.respond_word(0x1234_5678, calculate_parity(0x1234_5678u32));

        let mut protocol = SwdProtocol::new(link);
        protocol.set_wait_retry(WaitRetry::Bounded {
            retries: 3,
            backoff_us: 10,
        });

        assert_eq!(protocol.read_dp(0x04), Ok(0x1234_5678));
        assert_eq!(protocol.link().delays, [10, 10]);
    }

    #[test]
    fn bounded_retry_gives_up() {
        let mut link = ScriptLink::default();
        for _ in 0..3 {
            link.respond(&[TRN]);
            link.respond(&ACK_WAIT);
        }
        let mut protocol = SwdProtocol::new(link);
        protocol.set_wait_retry(WaitRetry::Bounded {
            retries: 2,
            backoff_us: 0,
        });

        assert_eq!(protocol.read_dp(0x04), Err(SwdError::WaitAck));
        assert!(protocol.link().reads.is_empty());
        assert!(protocol.link().delays.is_empty());
    }

    #[test]
    fn line_reset_sequence() {
        let mut protocol = SwdProtocol::new(ScriptLink::default());
        protocol.line_reset();

        let writes = &protocol.link().writes;
        assert_eq!(writes.len(), 128);
        for half in writes.chunks(64) {
            assert!(half[..56].iter().all(|bit| *bit));
            assert!(half[56..].iter().all(|bit| !bit));
        }
    }

    #[test]
    fn parity() {
        assert!(!calculate_parity(0u32));
        assert!(calculate_parity(1u32));
        assert!(!calculate_parity(0xFFFF_FFFFu32));
        assert!(calculate_parity(0x8000_0000u32));
    }
}
