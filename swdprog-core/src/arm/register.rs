// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! ARM SWD Register Access Traits
//!
//! Each DP or AP register is described by a zero-sized descriptor type that
//! carries its 2-bit register address and the type of value held in it.
//! `swdprog_swd::SwdInterface` uses these to give strongly typed access:
//!
//! * `SwdInterface::read_dp_register`
//! * `SwdInterface::write_dp_register`
//! * `SwdInterface::read_ap_register`
//! * `SwdInterface::write_ap_register`
//!
//! A register that is only readable does not implement [`WritableRegister`],
//! so attempting to write it is a compile time error.

/// Base trait for all ARM debug register descriptors
pub trait RegisterDescriptor {
    /// Byte address of the register within the DP or AP bank.  Only bits
    /// 2 and 3 are transmitted in an SWD request.
    const ADDRESS: u8;

    /// The value type held in the register
    type Value;
}

/// Registers that can be read
pub trait ReadableRegister: RegisterDescriptor {
    /// Convert raw 32-bit data to register value
    fn from_raw(data: u32) -> Self::Value
    where
        Self::Value: From<u32>,
    {
        Self::Value::from(data)
    }
}

/// Registers that can be written
pub trait WritableRegister: RegisterDescriptor {
    /// Convert register value to raw 32-bit data
    fn to_raw(value: Self::Value) -> u32
    where
        Self::Value: Into<u32>,
    {
        value.into()
    }
}

/// Debug Port registers (accessed via DP transactions)
pub trait DpRegister: RegisterDescriptor {}

/// Access Port registers (accessed via AP transactions, with the result of
/// reads collected from DP RDBUFF)
pub trait ApRegister: RegisterDescriptor {}

/// Generates the conversions and formatting shared by every register value
/// type, which must be a tuple struct around a `u32`.
///
/// `register_data!(Name)` produces both directions of `u32` conversion.
/// `register_data!(Name, write_only)` omits `From<u32>`, as write-only
/// registers are never constructed from target data.
#[macro_export]
macro_rules! register_data {
    ($name:ident) => {
        impl From<u32> for $name {
            fn from(value: u32) -> Self {
                $name(value)
            }
        }

        $crate::register_data!($name, write_only);
    };
    ($name:ident, write_only) => {
        impl From<$name> for u32 {
            fn from(value: $name) -> u32 {
                value.0
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                write!(f, "0x{:08X}", self.0)
            }
        }
    };
}
