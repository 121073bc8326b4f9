// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

//! SDMA transfers through a fixed bounce buffer.
//!
//! The controller stops at every 32 KiB boundary of the bounce buffer and
//! raises a DMA interrupt. The driver then drains (read) or refills (write)
//! the buffer and rewrites the SDMA address register, which resumes the
//! transfer from the start of the buffer.

use core::slice;

use log::{debug, error, warn};

use super::{Direction, IoBuffer};
use crate::{
    SECTOR_SIZE,
    cmd::{CardStatus, READ_MULTIPLE_BLOCK, WRITE_MULTIPLE_BLOCK},
    error::{SdhciError, SdhciResult},
    hal::{DmaRegion, SdhciHal},
    host::{ResetKind, SdhciHost, TransferContext},
    irq::{COMMAND_COMPLETE_TIMEOUT, DMA_TIMEOUT},
    regs::{BLOCK_SIZE, NORMAL_INT, TIMEOUT_CONTROL},
};

/// Size of the bounce buffer; also the SDMA boundary.
pub const BOUNCE_BUFFER_SIZE: usize = 32 * 1024;
/// Attempts made for a DMA request that keeps timing out.
pub const DMA_RETRY_COUNT: u32 = 5;

const BOUNCE_BLOCKS: u32 = (BOUNCE_BUFFER_SIZE / SECTOR_SIZE) as u32;

const CC: u16 = NORMAL_INT::CMD_COMPLETE::SET.value;
const XC: u16 = NORMAL_INT::TRANSFER_COMPLETE::SET.value;
const DMA: u16 = NORMAL_INT::DMA_INT::SET.value;
const BRR: u16 = NORMAL_INT::BUFFER_READ_READY::SET.value;

const SIGNAL_ENABLE: u16 = 0x01FF;
/// Every error status bit except the two vendor-specific ones.
const ERROR_CLEAR: u16 = 0xF3FF;

/// DMA-capable staging buffer owned by the transfer lock.
pub(crate) struct BounceBuffer {
    region: DmaRegion,
    paddr: u32,
}

impl BounceBuffer {
    /// Allocates the bounce buffer. SDMA takes a 32-bit address, so memory
    /// above 4 GiB is rejected.
    pub fn alloc<H: SdhciHal>(hal: &H) -> SdhciResult<Self> {
        let region = hal
            .dma_alloc(BOUNCE_BUFFER_SIZE, BOUNCE_BUFFER_SIZE)
            .ok_or(SdhciError::NoMemory)?;
        let Ok(paddr) = u32::try_from(region.paddr) else {
            error!("sdhci: bounce buffer at {:#x} is out of SDMA reach", region.paddr);
            unsafe { hal.dma_dealloc(region) };
            return Err(SdhciError::NoMemory);
        };
        if region.size < BOUNCE_BUFFER_SIZE {
            unsafe { hal.dma_dealloc(region) };
            return Err(SdhciError::NoMemory);
        }
        Ok(Self { region, paddr })
    }

    pub fn paddr(&self) -> u32 {
        self.paddr
    }

    fn as_slice(&self) -> &[u8] {
        unsafe { slice::from_raw_parts(self.region.vaddr.as_ptr(), BOUNCE_BUFFER_SIZE) }
    }

    fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { slice::from_raw_parts_mut(self.region.vaddr.as_ptr(), BOUNCE_BUFFER_SIZE) }
    }

    pub fn into_region(self) -> DmaRegion {
        self.region
    }
}

impl<H: SdhciHal> SdhciHost<H> {
    /// Runs a DMA request, repeating it while it times out.
    pub(super) fn dma_with_retry(
        &self,
        ctx: &mut TransferContext,
        buffer: &mut dyn IoBuffer,
        block: u64,
        count: u16,
        offset: usize,
    ) -> SdhciResult {
        let mut attempt = 1;
        loop {
            match self.dma_transfer(ctx, buffer, block, count, offset) {
                Err(SdhciError::Timeout) if attempt < DMA_RETRY_COUNT => {
                    if !self.media_ready() {
                        warn!("sdhci: card lost during DMA recovery");
                        return Err(SdhciError::Timeout);
                    }
                    warn!(
                        "sdhci: DMA timeout at block {} (attempt {}/{})",
                        block, attempt, DMA_RETRY_COUNT
                    );
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    fn dma_transfer(
        &self,
        ctx: &mut TransferContext,
        buffer: &mut dyn IoBuffer,
        block: u64,
        count: u16,
        offset: usize,
    ) -> SdhciResult {
        let bounce = ctx.bounce.as_mut().ok_or(SdhciError::NoMemory)?;
        let address = self.card.lock().block_address(block)?;
        if self.config.reset_war {
            self.reset(ResetKind::CommandAndData);
        }
        let direction = buffer.direction();
        let total = u32::from(count);

        // Blocks already moved between the caller's buffer and the bounce buffer.
        let mut moved = 0;
        if direction == Direction::Write {
            moved = fill_bounce(bounce, buffer, offset, total.min(BOUNCE_BLOCKS))?;
        }

        self.regs
            .set_timeout_control(TIMEOUT_CONTROL::DATA_TIMEOUT.val(0xE));
        self.regs.set_normal_int_signal_enable(SIGNAL_ENABLE);
        self.regs.set_error_int_signal_enable(SIGNAL_ENABLE);
        self.regs.set_normal_int_status_enable(0xFFFF);
        self.regs.set_error_int_status_enable(0xFFFF);
        self.regs.clear_normal_int(BRR | XC | CC | DMA);
        self.regs.clear_error_int(ERROR_CLEAR);
        self.regs.set_sdma_address(bounce.paddr());
        self.regs.set_block_size(
            BLOCK_SIZE::BLOCK_SIZE.val(SECTOR_SIZE as u16)
                + BLOCK_SIZE::SDMA_BOUNDARY::Boundary32K,
        );
        self.regs.set_block_count(count);

        let (cmd, errors) = match direction {
            Direction::Read => (READ_MULTIPLE_BLOCK, CardStatus::READ_ERRORS),
            Direction::Write => (WRITE_MULTIPLE_BLOCK, CardStatus::WRITE_ERRORS),
        };
        self.send_dma_command(cmd, address);

        if let Err(err) = self.wait_for_status(CC, COMMAND_COMPLETE_TIMEOUT) {
            warn!("sdhci: no command complete for CMD{}: {err}", cmd.index);
            self.disable_signals();
            self.recover_card();
            return Err(err);
        }

        let status = CardStatus::from_bits_retain(self.regs.response(0));
        if status.intersects(errors) {
            error!("sdhci: CMD{} rejected, card status {:?}", cmd.index, status);
            self.disable_signals();
            self.recover_card();
            return Err(SdhciError::Io);
        }

        let deadline = self.hal.now() + DMA_TIMEOUT;
        let result = loop {
            let listener = self.irq.listen();
            let int = self.regs.normal_int_status();

            if int.is_set(NORMAL_INT::ERROR) {
                self.report_error_status(int.get());
                self.reset(ResetKind::CommandAndData);
                break Err(SdhciError::Io);
            }
            if int.is_set(NORMAL_INT::TRANSFER_COMPLETE) {
                if direction == Direction::Read {
                    let n = (total - moved).min(BOUNCE_BLOCKS);
                    if let Err(e) = drain_bounce(bounce, buffer, offset, moved, n) {
                        break Err(e);
                    }
                }
                self.regs.clear_normal_int(XC | DMA);
                break Ok(());
            }
            if int.is_set(NORMAL_INT::DMA_INT) {
                let n = (total - moved).min(BOUNCE_BLOCKS);
                let step = match direction {
                    Direction::Read => drain_bounce(bounce, buffer, offset, moved, n),
                    Direction::Write => {
                        fill_bounce(bounce, buffer, offset + moved as usize * SECTOR_SIZE, n)
                    }
                };
                match step {
                    Ok(done) => moved += done,
                    Err(e) => break Err(e),
                }
                self.regs.clear_normal_int(DMA);
                self.regs.set_sdma_address(bounce.paddr());
                continue;
            }

            if self.hal.now() >= deadline {
                error!(
                    "sdhci: DMA timeout, {} of {} blocks staged",
                    moved, total
                );
                self.regs.dump();
                break Err(SdhciError::Timeout);
            }
            self.sleep_until(listener, deadline);
        };

        self.disable_signals();
        result
    }

    fn disable_signals(&self) {
        self.regs.set_normal_int_signal_enable(0);
        self.regs.set_error_int_signal_enable(0);
    }

    /// Brings the card back after a failed DMA command. A card that does not
    /// come back is marked for remount.
    fn recover_card(&self) {
        debug!("sdhci: resetting controller and card");
        self.reset(ResetKind::All);
        match self.init_card() {
            Ok(info) => {
                if !self.adopt_card(info) {
                    self.mark_remount();
                }
            }
            Err(err) => {
                error!("sdhci: card did not come back after reset: {err}");
                self.mark_remount();
            }
        }
    }
}

/// Copies `blocks` blocks from the caller's buffer at `offset` into the
/// bounce buffer.
fn fill_bounce(
    bounce: &mut BounceBuffer,
    buffer: &dyn IoBuffer,
    offset: usize,
    blocks: u32,
) -> SdhciResult<u32> {
    let len = blocks as usize * SECTOR_SIZE;
    if buffer.read_bytes(offset, &mut bounce.as_mut_slice()[..len]) != len {
        return Err(SdhciError::InvalidInput);
    }
    Ok(blocks)
}

/// Copies `blocks` blocks from the bounce buffer into the caller's buffer,
/// after the `moved` blocks already delivered.
fn drain_bounce(
    bounce: &BounceBuffer,
    buffer: &mut dyn IoBuffer,
    offset: usize,
    moved: u32,
    blocks: u32,
) -> SdhciResult<u32> {
    let len = blocks as usize * SECTOR_SIZE;
    let at = offset + moved as usize * SECTOR_SIZE;
    if buffer.write_bytes(at, &bounce.as_slice()[..len]) != len {
        return Err(SdhciError::InvalidInput);
    }
    Ok(blocks)
}
