// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! Simulated SWD target
//!
//! Implements [`SwdLink`] by decoding the host's bits as a target would:
//! line reset detection, request parsing, ACK and data phases.  Behind that
//! sit a DP, a MEM-AP with posted reads and TAR auto-increment that wraps
//! within 1KB, flash and RAM, and an STM32F1 style flash controller.
//!
//! Every bit is recorded so tests can count clocks.

#![allow(dead_code)]

use std::collections::VecDeque;

use swdprog_core::flash::{FlashCr, FlashKeyr, FlashRegs, FlashSr};
use swdprog_swd::{Direction, SwdInterface, SwdLink};

pub const IDCODE_M3: u32 = 0x4BA0_0477;

pub const FLASH_BASE: u32 = 0x0800_0000;
pub const FLASH_SIZE: usize = 64 * 1024;
pub const PAGE_SIZE: usize = 1024;
pub const RAM_BASE: u32 = 0x2000_0000;
pub const RAM_SIZE: usize = 8 * 1024;

pub const ACK_OK: u8 = 0b001;
pub const ACK_WAIT: u8 = 0b010;
pub const ACK_FAULT: u8 = 0b100;

const REGS: FlashRegs = FlashRegs::STM32F1;

// CTRL/STAT power-up request and acknowledge bits
const CDBGPWRUPREQ: u32 = 1 << 28;
const CSYSPWRUPREQ: u32 = 1 << 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bit {
    Write(bool),
    Read(bool),
}

#[derive(Debug, Clone, Copy)]
enum Phase {
    Reset,
    Idle,
    Request { bits: u8, count: u8 },
    WriteData { ap: bool, addr: u8, value: u64, count: u8 },
}

/// Flash controller model
#[derive(Debug)]
pub struct FlashModel {
    pub locked: bool,
    key_stage: u8,
    pub cr: u32,
    pub sr: u32,
    pub ar: u32,
    busy_remaining: u32,

    /// SR reads that report BSY after each operation starts
    pub busy_cycles: u32,
    /// Never finish an operation
    pub stuck_busy: bool,
    /// Refuse to program, flagging WRPRTERR
    pub write_protected: bool,

    pub key_writes: usize,
    pub bad_keys: usize,
    /// Every value written to CR, locked or not
    pub cr_writes: Vec<u32>,
    pub sr_reads: usize,
    pub mass_erases: usize,
    pub page_erases: Vec<u32>,
    pub half_words: Vec<(u32, u16)>,
}

impl Default for FlashModel {
    fn default() -> Self {
        Self {
            locked: true,
            key_stage: 0,
            cr: 0,
            sr: 0,
            ar: 0,
            busy_remaining: 0,
            busy_cycles: 2,
            stuck_busy: false,
            write_protected: false,
            key_writes: 0,
            bad_keys: 0,
            cr_writes: Vec::new(),
            sr_reads: 0,
            mass_erases: 0,
            page_erases: Vec::new(),
            half_words: Vec::new(),
        }
    }
}

impl FlashModel {
    fn start_busy(&mut self) {
        if self.stuck_busy || self.busy_cycles > 0 {
            self.busy_remaining = self.busy_cycles.max(1);
        } else {
            self.sr |= FlashSr::EOP;
        }
    }

    fn read_sr(&mut self) -> u32 {
        self.sr_reads += 1;
        if self.busy_remaining == 0 {
            return self.sr;
        }
        if !self.stuck_busy {
            self.busy_remaining -= 1;
            if self.busy_remaining == 0 {
                self.sr |= FlashSr::EOP;
            }
        }
        self.sr | FlashSr::BSY
    }

    fn read_cr(&self) -> u32 {
        if self.locked {
            self.cr | FlashCr::LOCK
        } else {
            self.cr
        }
    }

    fn write_keyr(&mut self, value: u32) {
        self.key_writes += 1;
        if !self.locked {
            return;
        }
        match (self.key_stage, value) {
            (0, FlashKeyr::KEY1) => self.key_stage = 1,
            (1, FlashKeyr::KEY2) => {
                self.locked = false;
                self.key_stage = 0;
            }
            _ => {
                self.bad_keys += 1;
                self.key_stage = 0;
            }
        }
    }

    fn write_sr(&mut self, value: u32) {
        let w1c = FlashSr::PGERR | FlashSr::WRPRTERR | FlashSr::EOP;
        self.sr &= !(value & w1c);
    }

    fn write_cr(&mut self, value: u32, flash: &mut [u8]) {
        if self.locked {
            return;
        }
        if value & FlashCr::LOCK != 0 {
            self.locked = true;
            self.cr = 0;
            return;
        }

        self.cr = value & !FlashCr::STRT;
        if value & FlashCr::STRT == 0 {
            return;
        }
        if value & FlashCr::MER != 0 {
            flash.fill(0xFF);
            self.mass_erases += 1;
            self.start_busy();
        } else if value & FlashCr::PER != 0 {
            let page = (self.ar.wrapping_sub(FLASH_BASE) as usize) / PAGE_SIZE;
            let start = page * PAGE_SIZE;
            if start < flash.len() {
                flash[start..start + PAGE_SIZE].fill(0xFF);
            }
            self.page_erases.push(self.ar);
            self.start_busy();
        }
    }

    fn program(&mut self, addr: u32, half_word: u16, flash: &mut [u8]) {
        if self.locked || self.cr & FlashCr::PG == 0 {
            self.sr |= FlashSr::PGERR;
            return;
        }
        if self.write_protected {
            self.sr |= FlashSr::WRPRTERR;
            return;
        }

        let offset = (addr - FLASH_BASE) as usize;
        let current = u16::from_le_bytes([flash[offset], flash[offset + 1]]);
        if current != 0xFFFF && half_word != 0 {
            self.sr |= FlashSr::PGERR;
            return;
        }

        flash[offset..offset + 2].copy_from_slice(&half_word.to_le_bytes());
        self.half_words.push((addr, half_word));
        self.start_busy();
    }
}

/// Simulated target, implementing [`SwdLink`]
pub struct SimTarget {
    pub idcode: u32,
    /// When false nothing drives SWDIO, so it floats high
    pub present: bool,
    pub refuse_power_up: bool,

    /// ACKs to return instead of OK, one per request
    pub forced_acks: VecDeque<u8>,
    /// Invert the parity bit of the next read
    pub corrupt_parity: bool,

    pub trace: Vec<Bit>,
    pub direction: Direction,
    pub direction_errors: usize,
    pub line_resets: usize,
    pub transactions: usize,
    pub write_parity_errors: usize,
    pub abort_writes: usize,
    pub resets: usize,
    pub reset_asserted: bool,
    pub delay_total_us: u64,

    phase: Phase,
    ones_run: u32,
    queue: VecDeque<bool>,

    ctrl_stat: u32,
    select: u32,
    rdbuff: u32,
    csw: u32,
    tar: u32,
    pub tar_writes: Vec<u32>,

    pub flash: Vec<u8>,
    pub ram: Vec<u8>,
    pub fc: FlashModel,
}

impl SimTarget {
    pub fn new(idcode: u32) -> Self {
        Self {
            idcode,
            present: true,
            refuse_power_up: false,
            forced_acks: VecDeque::new(),
            corrupt_parity: false,
            trace: Vec::new(),
            direction: Direction::Output,
            direction_errors: 0,
            line_resets: 0,
            transactions: 0,
            write_parity_errors: 0,
            abort_writes: 0,
            resets: 0,
            reset_asserted: false,
            delay_total_us: 0,
            phase: Phase::Reset,
            ones_run: 0,
            queue: VecDeque::new(),
            ctrl_stat: 0,
            select: 0,
            rdbuff: 0,
            csw: 0,
            tar: 0,
            tar_writes: Vec::new(),
            flash: vec![0xFF; FLASH_SIZE],
            ram: vec![0; RAM_SIZE],
            fc: FlashModel::default(),
        }
    }

    /// An STM32F1 class Cortex-M3 target
    pub fn stm32f1() -> Self {
        Self::new(IDCODE_M3)
    }

    /// Nothing connected
    pub fn absent() -> Self {
        let mut sim = Self::new(IDCODE_M3);
        sim.present = false;
        sim
    }

    pub fn flash_at(&self, addr: u32, len: usize) -> &[u8] {
        let offset = (addr - FLASH_BASE) as usize;
        &self.flash[offset..offset + len]
    }

    pub fn ram_at(&self, addr: u32, len: usize) -> &[u8] {
        let offset = (addr - RAM_BASE) as usize;
        &self.ram[offset..offset + len]
    }

    pub fn writes(&self) -> usize {
        self.trace.iter().filter(|b| matches!(b, Bit::Write(_))).count()
    }

    pub fn reads(&self) -> usize {
        self.trace.iter().filter(|b| matches!(b, Bit::Read(_))).count()
    }

    fn powered(&self) -> bool {
        !self.refuse_power_up
            && self.ctrl_stat & (CDBGPWRUPREQ | CSYSPWRUPREQ) == CDBGPWRUPREQ | CSYSPWRUPREQ
    }

    fn respond(&mut self, value: u32, bits: usize) {
        for ii in 0..bits {
            self.queue.push_back((value >> ii) & 1 == 1);
        }
    }

    fn handle_request(&mut self, request: u8) {
        self.phase = Phase::Idle;

        let ap = (request >> 1) & 1 == 1;
        let read = (request >> 2) & 1 == 1;
        let addr = ((request >> 3) & 0x3) << 2;
        let parity = (request >> 5) & 1;
        let stop = (request >> 6) & 1;
        let park = (request >> 7) & 1;
        let expected_parity = (((request >> 1) & 0xF).count_ones() % 2) as u8;

        if !self.present
            || self.line_resets == 0
            || stop != 0
            || park != 1
            || parity != expected_parity
        {
            return;
        }
        self.transactions += 1;

        let ack = match self.forced_acks.pop_front() {
            Some(ack) => ack,
            None if ap && !self.powered() => ACK_FAULT,
            None => ACK_OK,
        };

        // Turnaround, then ACK
        self.queue.push_back(true);
        self.respond(ack as u32, 3);
        if ack != ACK_OK {
            return;
        }

        if read {
            let value = if ap {
                self.ap_read(addr)
            } else {
                self.dp_read(addr)
            };
            self.respond(value, 32);
            let mut parity = value.count_ones() % 2 == 1;
            if self.corrupt_parity {
                self.corrupt_parity = false;
                parity = !parity;
            }
            self.queue.push_back(parity);
            self.queue.push_back(true);
        } else {
            self.queue.push_back(true);
            self.phase = Phase::WriteData {
                ap,
                addr,
                value: 0,
                count: 0,
            };
        }
    }

    fn complete_write(&mut self, ap: bool, addr: u8, value: u64) {
        let data = value as u32;
        let parity = (value >> 32) & 1 == 1;
        if parity != (data.count_ones() % 2 == 1) {
            self.write_parity_errors += 1;
            return;
        }
        if ap {
            self.ap_write(addr, data);
        } else {
            self.dp_write(addr, data);
        }
    }

    fn dp_read(&mut self, addr: u8) -> u32 {
        match addr {
            0x00 => self.idcode,
            0x04 => {
                if self.refuse_power_up {
                    self.ctrl_stat
                } else {
                    // Acknowledges mirror requests
                    self.ctrl_stat | ((self.ctrl_stat & (CDBGPWRUPREQ | CSYSPWRUPREQ)) << 1)
                }
            }
            0x0C => self.rdbuff,
            _ => 0,
        }
    }

    fn dp_write(&mut self, addr: u8, data: u32) {
        match addr {
            0x00 => self.abort_writes += 1,
            0x04 => self.ctrl_stat = data,
            0x08 => self.select = data,
            _ => (),
        }
    }

    fn ap_read(&mut self, addr: u8) -> u32 {
        let value = match addr {
            0x00 => self.csw,
            0x04 => self.tar,
            0x0C => {
                let value = self.mem_read32(self.tar & !0x3);
                self.bump_tar();
                value
            }
            _ => 0,
        };
        // Posted: return the previous result
        std::mem::replace(&mut self.rdbuff, value)
    }

    fn ap_write(&mut self, addr: u8, data: u32) {
        match addr {
            0x00 => self.csw = data,
            0x04 => {
                self.tar = data;
                self.tar_writes.push(data);
            }
            0x0C => {
                match self.csw & 0x7 {
                    0b010 => self.mem_write32(self.tar & !0x3, data),
                    0b001 => {
                        let half_word = (data >> ((self.tar & 0x2) * 8)) as u16;
                        self.mem_write16(self.tar & !0x1, half_word);
                    }
                    _ => (),
                }
                self.bump_tar();
            }
            _ => (),
        }
    }

    // Auto-increment only wraps within a 1KB block, as real MEM-APs may
    fn bump_tar(&mut self) {
        if (self.csw >> 4) & 0x3 == 0b01 {
            let size = 1u32 << (self.csw & 0x7);
            self.tar = (self.tar & !0x3FF) | (self.tar.wrapping_add(size) & 0x3FF);
        }
    }

    fn mem_read32(&mut self, addr: u32) -> u32 {
        if let Some(offset) = region(addr, FLASH_BASE, FLASH_SIZE, 4) {
            read_le(&self.flash, offset)
        } else if let Some(offset) = region(addr, RAM_BASE, RAM_SIZE, 4) {
            read_le(&self.ram, offset)
        } else if addr == REGS.sr() {
            self.fc.read_sr()
        } else if addr == REGS.cr() {
            self.fc.read_cr()
        } else if addr == REGS.ar() {
            self.fc.ar
        } else {
            0
        }
    }

    fn mem_write32(&mut self, addr: u32, data: u32) {
        if region(addr, FLASH_BASE, FLASH_SIZE, 4).is_some() {
            // Word writes to flash are not supported by the controller
            self.fc.sr |= FlashSr::PGERR;
        } else if let Some(offset) = region(addr, RAM_BASE, RAM_SIZE, 4) {
            self.ram[offset..offset + 4].copy_from_slice(&data.to_le_bytes());
        } else if addr == REGS.keyr() {
            self.fc.write_keyr(data);
        } else if addr == REGS.sr() {
            self.fc.write_sr(data);
        } else if addr == REGS.cr() {
            self.fc.cr_writes.push(data);
            self.fc.write_cr(data, &mut self.flash);
        } else if addr == REGS.ar() && !self.fc.locked {
            self.fc.ar = data;
        }
    }

    fn mem_write16(&mut self, addr: u32, data: u16) {
        if region(addr, FLASH_BASE, FLASH_SIZE, 2).is_some() {
            self.fc.program(addr, data, &mut self.flash);
        } else if let Some(offset) = region(addr, RAM_BASE, RAM_SIZE, 2) {
            self.ram[offset..offset + 2].copy_from_slice(&data.to_le_bytes());
        }
    }
}

fn region(addr: u32, base: u32, size: usize, len: usize) -> Option<usize> {
    let offset = addr.checked_sub(base)? as usize;
    (offset + len <= size).then_some(offset)
}

fn read_le(mem: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        mem[offset],
        mem[offset + 1],
        mem[offset + 2],
        mem[offset + 3],
    ])
}

impl SwdLink for SimTarget {
    fn set_swdio_direction(&mut self, direction: Direction) {
        self.direction = direction;
    }

    fn write_bit(&mut self, bit: bool) {
        self.trace.push(Bit::Write(bit));
        if self.direction != Direction::Output {
            self.direction_errors += 1;
        }

        if bit {
            self.ones_run += 1;
        } else {
            self.ones_run = 0;
        }
        if self.ones_run >= 50 {
            if self.ones_run == 50 {
                self.line_resets += 1;
            }
            self.phase = Phase::Reset;
            self.queue.clear();
            return;
        }

        let phase = self.phase;
        match phase {
            Phase::Reset => {
                if !bit {
                    self.phase = Phase::Idle;
                }
            }
            Phase::Idle => {
                if bit {
                    self.phase = Phase::Request { bits: 1, count: 1 };
                }
            }
            Phase::Request { bits, count } => {
                let bits = bits | ((bit as u8) << count);
                let count = count + 1;
                if count == 8 {
                    self.handle_request(bits);
                } else {
                    self.phase = Phase::Request { bits, count };
                }
            }
            Phase::WriteData {
                ap,
                addr,
                value,
                count,
            } => {
                let value = value | ((bit as u64) << count);
                let count = count + 1;
                if count == 33 {
                    self.phase = Phase::Idle;
                    self.complete_write(ap, addr, value);
                } else {
                    self.phase = Phase::WriteData {
                        ap,
                        addr,
                        value,
                        count,
                    };
                }
            }
        }
    }

    fn read_bit(&mut self) -> bool {
        if self.direction != Direction::Input {
            self.direction_errors += 1;
        }
        self.ones_run = 0;

        // Undriven line floats high
        let bit = self.queue.pop_front().unwrap_or(true);
        self.trace.push(Bit::Read(bit));
        bit
    }

    fn set_reset(&mut self, asserted: bool) {
        if asserted && !self.reset_asserted {
            self.resets += 1;
            self.fc.locked = true;
            self.fc.cr = 0;
            self.fc.key_stage = 0;
        }
        self.reset_asserted = asserted;
    }

    fn delay_us(&mut self, us: u32) {
        self.delay_total_us += us as u64;
    }
}

/// A session connected to `sim`.
pub fn connected(sim: SimTarget) -> SwdInterface<SimTarget> {
    let mut swd = SwdInterface::new(sim);
    swd.connect().expect("connect to simulated target");
    swd
}
