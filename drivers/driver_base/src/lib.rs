// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

//! Device driver interfaces shared by the x-kernel storage drivers.
//!
//! It provides the common error type and the [`DriverOps`] trait every
//! device driver implements. Block devices additionally implement
//! `block::BlockDriverOps`.

#![no_std]

/// All supported device kinds.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum DeviceKind {
    /// Block storage device (e.g., disk, SD card).
    Block,
    /// Character device (e.g., serial port).
    Char,
}

/// The error type for driver operation failures.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum DriverError {
    /// An entity already exists.
    AlreadyExists,
    /// Try again, for non-blocking APIs.
    WouldBlock,
    /// Bad internal state.
    BadState,
    /// Invalid parameter/argument.
    InvalidInput,
    /// Input/output error.
    Io,
    /// Not enough space/cannot allocate memory (DMA).
    NoMemory,
    /// No medium present in a removable-media device.
    NoMedia,
    /// The medium is write protected.
    ReadOnly,
    /// Device or resource is busy.
    ResourceBusy,
    /// The device did not answer in time.
    Timeout,
    /// This operation is unsupported or unimplemented.
    Unsupported,
}

impl DriverError {
    /// Stable error message for display/logging.
    pub const fn message(&self) -> &'static str {
        match self {
            DriverError::AlreadyExists => "Entity already exists",
            DriverError::WouldBlock => "Try again",
            DriverError::BadState => "Bad state",
            DriverError::InvalidInput => "Invalid parameter",
            DriverError::Io => "Input/output error",
            DriverError::NoMemory => "Not enough memory",
            DriverError::NoMedia => "No medium found",
            DriverError::ReadOnly => "Read-only medium",
            DriverError::ResourceBusy => "Resource is busy",
            DriverError::Timeout => "Timed out",
            DriverError::Unsupported => "Unsupported operation",
        }
    }
}

impl core::fmt::Display for DriverError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.message())
    }
}

/// A specialized `Result` type for device operations.
pub type DriverResult<T = ()> = Result<T, DriverError>;

/// Common operations that require all device drivers to implement.
pub trait DriverOps: Send + Sync {
    /// The name of the device.
    fn name(&self) -> &str;

    /// The kind of the device.
    fn device_kind(&self) -> DeviceKind;

    /// The IRQ number of the device, if applicable.
    fn irq(&self) -> Option<usize> {
        None
    }
}
