// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

//! SD card driver for standard SDHCI controllers.

use core::time::Duration;

use driver_base::{DeviceKind, DriverError, DriverOps, DriverResult};
use sdhci::{
    MediaListener, ReadBuffer, SECTOR_SIZE, SdhciConfig, SdhciError, SdhciHal, SdhciHost,
    WriteBuffer,
};

use crate::{BlockDriverOps, MediaInfo};

const MEDIA_INFO: MediaInfo = MediaInfo {
    removable: true,
    ejectable: false,
    lockable: false,
    write_cache: false,
    block_size: SECTOR_SIZE,
    vendor: "Generic",
    product: "SDHCI Controller",
    revision: "2",
};

/// SD card block device on an SDHCI controller.
pub struct SdhciDriver<H: SdhciHal> {
    host: SdhciHost<H>,
    irq: Option<usize>,
}

impl<H: SdhciHal> SdhciDriver<H> {
    /// Attaches to the controller behind `bus` and initializes the card in
    /// the slot, if any.
    pub fn new(hal: H, bus: H::Bus, config: SdhciConfig) -> DriverResult<Self> {
        let host = SdhciHost::new(hal, bus, config).map_err(|err| {
            log::warn!("SDHCI driver: initialization failed: {err}");
            convert_sdhci_error(err)
        })?;
        log::info!(
            "SDHCI driver: attached, {} blocks",
            host.capacity().saturating_add(1)
        );
        Ok(Self { host, irq: None })
    }

    /// Records the interrupt line the platform routes to [`Self::handle_irq`].
    pub fn with_irq(mut self, irq: usize) -> Self {
        self.irq = Some(irq);
        self
    }

    pub fn host(&self) -> &SdhciHost<H> {
        &self.host
    }

    pub fn set_media_listener(&mut self, listener: MediaListener) {
        self.host.set_media_listener(listener);
    }

    pub fn handle_irq(&self) -> bool {
        self.host.handle_irq()
    }

    /// Presence poll; returns the delay until the next one.
    pub fn handle_timer(&self) -> Duration {
        self.host.handle_timer()
    }

    pub fn media_info(&self) -> MediaInfo {
        MEDIA_INFO
    }

    /// Returns `(present, changed)`; see [`SdhciHost::query_media_presence`].
    pub fn media_presence(&self) -> (bool, bool) {
        self.host.query_media_presence()
    }

    pub fn write_protected(&self) -> bool {
        self.host.query_write_protect()
    }

    pub fn format(&mut self) -> DriverResult {
        self.host.format().map_err(convert_sdhci_error)
    }

    pub fn eject(&mut self) -> DriverResult {
        self.host.eject().map_err(convert_sdhci_error)
    }

    pub fn lock_media(&mut self, locked: bool) -> DriverResult {
        self.host.lock_media(locked).map_err(convert_sdhci_error)
    }

    pub fn suspend(&self) {
        self.host.suspend();
    }

    pub fn resume(&self) {
        self.host.resume();
    }
}

/// Converts SDHCI specific errors to generalized driver errors.
fn convert_sdhci_error(err: SdhciError) -> DriverError {
    use SdhciError::*;
    match err {
        Timeout => DriverError::Timeout,
        Io => DriverError::Io,
        NoMedia => DriverError::NoMedia,
        ReadOnly => DriverError::ReadOnly,
        CardInit => DriverError::Io,
        InvalidInput => DriverError::InvalidInput,
        NoMemory => DriverError::NoMemory,
        Unsupported => DriverError::Unsupported,
    }
}

/// Whole blocks covered by a buffer of `len` bytes.
fn block_count(len: usize) -> DriverResult<u32> {
    if len % SECTOR_SIZE != 0 {
        return Err(DriverError::InvalidInput);
    }
    u32::try_from(len / SECTOR_SIZE).map_err(|_| DriverError::InvalidInput)
}

impl<H: SdhciHal> DriverOps for SdhciDriver<H> {
    fn device_kind(&self) -> DeviceKind {
        DeviceKind::Block
    }

    fn name(&self) -> &str {
        "sdhci"
    }

    fn irq(&self) -> Option<usize> {
        self.irq
    }
}

impl<H: SdhciHal> BlockDriverOps for SdhciDriver<H> {
    /// Blocks `0..=max_block`, where `max_block` is the value derived from
    /// the card's CSD.
    fn num_blocks(&self) -> u64 {
        self.host.capacity().saturating_add(1)
    }

    fn block_size(&self) -> usize {
        self.host.block_size()
    }

    fn read_block(&mut self, block_id: u64, buf: &mut [u8]) -> DriverResult {
        let count = block_count(buf.len())?;
        self.host
            .transfer(&mut ReadBuffer::new(buf), block_id, count)
            .map(|_| ())
            .map_err(convert_sdhci_error)
    }

    fn write_block(&mut self, block_id: u64, buf: &[u8]) -> DriverResult {
        let count = block_count(buf.len())?;
        self.host
            .transfer(&mut WriteBuffer::new(buf), block_id, count)
            .map(|_| ())
            .map_err(convert_sdhci_error)
    }

    fn flush(&mut self) -> DriverResult {
        Ok(())
    }
}
