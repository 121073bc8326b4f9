// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

//! Common traits and types for block storage drivers.
//!
//! Drivers:
//!
//! - [`SdhciDriver`](crate::sdhci::SdhciDriver): SD cards behind a standard SDHCI controller
//!   (feature `sdhci`).

#![cfg_attr(not(test), no_std)]

#[cfg(feature = "sdhci")]
pub mod sdhci;

use driver_base::{DriverOps, DriverResult};

/// Operations that require a block storage device driver to implement.
pub trait BlockDriverOps: DriverOps {
    /// The number of blocks in this storage device.
    ///
    /// The total size of the device is `num_blocks() * block_size()`.
    fn num_blocks(&self) -> u64;

    /// The size of each block in bytes.
    fn block_size(&self) -> usize;

    /// Reads blocks from the device into `buf`, starting at `block_id`.
    ///
    /// The length of `buf` must be a multiple of [`Self::block_size`].
    fn read_block(&mut self, block_id: u64, buf: &mut [u8]) -> DriverResult;

    /// Writes blocks from `buf` to the device, starting at `block_id`.
    ///
    /// The length of `buf` must be a multiple of [`Self::block_size`].
    fn write_block(&mut self, block_id: u64, buf: &[u8]) -> DriverResult;

    /// Flushes buffered data to the device.
    fn flush(&mut self) -> DriverResult;
}

/// Static description of a storage medium, as shown to the storage stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaInfo {
    pub removable: bool,
    pub ejectable: bool,
    pub lockable: bool,
    pub write_cache: bool,
    pub block_size: usize,
    pub vendor: &'static str,
    pub product: &'static str,
    pub revision: &'static str,
}
