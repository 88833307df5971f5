// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! SWD bit level link
//!
//! [`SwdLink`] is the lowest layer: it clocks single bits on SWCLK while
//! driving or sampling SWDIO, and drives the target's nRESET line.
//! Everything above it is expressed in terms of these operations, so a
//! simulated target can stand in for real hardware.
//!
//! [`GpioLink`] implements the link on top of `embedded-hal` 1.0 GPIO and
//! delay traits.

use core::convert::Infallible;
use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{InputPin, OutputPin};
#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

/// Direction of the SWDIO line, from the programmer's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Programmer drives SWDIO
    Output,

    /// Target drives SWDIO
    Input,
}

/// SWD clock speed setting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Speed {
    /// Aims to be roughly 500kHz clock
    Slow,

    /// Aims to be roughly 1MHz clock
    #[default]
    Medium,

    /// Aims to be roughly 2MHz clock
    Fast,

    /// Aims to be roughly 4MHz clock
    Turbo,
}

impl Speed {
    /// Returns the **approximate** speed in kHz for this SWD speed setting.
    pub fn speed_khz(&self) -> u32 {
        match self {
            Speed::Slow => 500,
            Speed::Medium => 1000,
            Speed::Fast => 2000,
            Speed::Turbo => 4000,
        }
    }

    // Each of SWCLK low and high lasts this long.
    fn half_period_ns(&self) -> u32 {
        match self {
            Speed::Slow => 1000,
            Speed::Medium => 500,
            Speed::Fast => 250,
            Speed::Turbo => 125,
        }
    }
}

/// Bit level access to an SWD target.
///
/// Bits are clocked with SWCLK low then high.  Output bits are set up
/// before the rising edge.  Input bits are sampled while SWCLK is still
/// low, before the rising edge, as the target shifts out its next bit on
/// that edge.
///
/// Multi-bit fields are sent and received least significant bit first.
pub trait SwdLink {
    /// Sets whether SWDIO is driven by the programmer or the target.
    fn set_swdio_direction(&mut self, direction: Direction);

    /// Drives SWDIO to `bit` and clocks one cycle.
    fn write_bit(&mut self, bit: bool);

    /// Clocks one cycle and returns the sampled SWDIO level.
    ///
    /// The sample is taken with SWCLK low, before the rising edge, not
    /// after SWCLK has been driven high.  The target changes SWDIO on the
    /// rising edge, so this is the middle of the bit's valid window.
    fn read_bit(&mut self) -> bool;

    /// Asserts (true) or releases (false) the target's nRESET line.
    fn set_reset(&mut self, asserted: bool);

    /// Busy-waits for at least `us` microseconds.
    fn delay_us(&mut self, us: u32);

    /// Writes 8 bits, LSB first.
    fn write_byte(&mut self, byte: u8) {
        for ii in 0..8 {
            self.write_bit((byte >> ii) & 1 == 1);
        }
    }

    /// Reads 8 bits, LSB first.
    fn read_byte(&mut self) -> u8 {
        let mut byte = 0u8;
        for ii in 0..8 {
            if self.read_bit() {
                byte |= 1 << ii;
            }
        }
        byte
    }
}

/// A GPIO that can switch between driving and sampling, as SWDIO must.
///
/// HALs generally expose this as a "flex" or open pin type.  Implement this
/// trait on a thin wrapper around it.
pub trait SwdioPin: InputPin + OutputPin {
    /// Stops driving the pin and enables its input.
    fn set_as_input(&mut self);

    /// Enables the pin's output driver.
    fn set_as_output(&mut self);
}

/// [`SwdLink`] over three GPIOs and a delay provider.
///
/// nRESET is active low.  The link starts with SWDIO as an output, SWCLK
/// low and nRESET released.
///
/// ```rust,ignore
/// use swdprog_swd::{GpioLink, Speed};
///
/// let link = GpioLink::new(swclk, swdio, nreset, delay, Speed::Medium);
/// let mut swd = swdprog_swd::SwdInterface::new(link);
/// ```
pub struct GpioLink<CLK, DIO, RST, D> {
    swclk: CLK,
    swdio: DIO,
    nreset: RST,
    delay: D,
    speed: Speed,
    half_period_ns: u32,
}

impl<CLK, DIO, RST, D> GpioLink<CLK, DIO, RST, D>
where
    CLK: OutputPin<Error = Infallible>,
    DIO: SwdioPin<Error = Infallible>,
    RST: OutputPin<Error = Infallible>,
    D: DelayNs,
{
    /// Create a new GPIO link.
    ///
    /// Arguments:
    /// - `swclk`: SWCLK output pin.
    /// - `swdio`: SWDIO bidirectional pin.
    /// - `nreset`: Target nRESET output pin.  Active low.
    /// - `delay`: Delay provider, used for clock timing and reset pulses.
    /// - `speed`: Initial clock speed.
    ///
    /// Returns:
    /// - A new `GpioLink`, with the lines in their idle states.
    pub fn new(swclk: CLK, swdio: DIO, nreset: RST, delay: D, speed: Speed) -> Self {
        let mut link = Self {
            swclk,
            swdio,
            nreset,
            delay,
            speed,
            half_period_ns: speed.half_period_ns(),
        };

        infallible(link.swclk.set_low());
        link.swdio.set_as_output();
        infallible(link.swdio.set_high());
        infallible(link.nreset.set_high());

        debug!("SWD link created, SWDIO output high, SWCLK low, nRESET released");
        link
    }

    pub fn speed(&self) -> Speed {
        self.speed
    }

    pub fn set_speed(&mut self, speed: Speed) {
        self.speed = speed;
        self.half_period_ns = speed.half_period_ns();
        debug!("SWD speed set to {speed:?}");
    }

    /// Returns the pins and delay provider.
    pub fn release(self) -> (CLK, DIO, RST, D) {
        (self.swclk, self.swdio, self.nreset, self.delay)
    }
}

impl<CLK, DIO, RST, D> SwdLink for GpioLink<CLK, DIO, RST, D>
where
    CLK: OutputPin<Error = Infallible>,
    DIO: SwdioPin<Error = Infallible>,
    RST: OutputPin<Error = Infallible>,
    D: DelayNs,
{
    #[inline]
    fn set_swdio_direction(&mut self, direction: Direction) {
        match direction {
            Direction::Output => self.swdio.set_as_output(),
            Direction::Input => self.swdio.set_as_input(),
        }
    }

    #[inline]
    fn write_bit(&mut self, bit: bool) {
        infallible(self.swdio.set_state(bit.into()));
        infallible(self.swclk.set_low());
        self.delay.delay_ns(self.half_period_ns);
        infallible(self.swclk.set_high());
        self.delay.delay_ns(self.half_period_ns);
    }

    #[inline]
    fn read_bit(&mut self) -> bool {
        infallible(self.swclk.set_low());
        self.delay.delay_ns(self.half_period_ns);

        // Sample before the rising edge, which shifts out the next bit
        let bit = infallible(self.swdio.is_high());

        infallible(self.swclk.set_high());
        self.delay.delay_ns(self.half_period_ns);
        bit
    }

    fn set_reset(&mut self, asserted: bool) {
        if asserted {
            infallible(self.nreset.set_low());
        } else {
            infallible(self.nreset.set_high());
        }
    }

    fn delay_us(&mut self, us: u32) {
        self.delay.delay_us(us);
    }
}

#[inline]
fn infallible<T>(result: Result<T, Infallible>) -> T {
    match result {
        Ok(value) => value,
        Err(never) => match never {},
    }
}
