// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

use log::debug;
use tock_registers::fields::FieldValue;

use super::IoBuffer;
use crate::{
    SECTOR_SIZE,
    cmd::*,
    error::{SdhciError, SdhciResult},
    hal::SdhciHal,
    host::{ResetKind, SdhciHost},
    regs::{BLOCK_SIZE, NORMAL_INT, TIMEOUT_CONTROL, TRANSFER_MODE},
};

/// Largest number of blocks moved by one multi-block command.
pub const PIO_CHUNK_BLOCKS: u32 = 2048;

const WORDS_PER_BLOCK: usize = SECTOR_SIZE / 4;

const CC: u16 = NORMAL_INT::CMD_COMPLETE::SET.value;
const XC: u16 = NORMAL_INT::TRANSFER_COMPLETE::SET.value;
const BRR: u16 = NORMAL_INT::BUFFER_READ_READY::SET.value;
const BWR: u16 = NORMAL_INT::BUFFER_WRITE_READY::SET.value;

impl<H: SdhciHal> SdhciHost<H> {
    fn pio_prepare(&self, blocks: u16, mode: FieldValue<u16, TRANSFER_MODE::Register>) {
        if self.config.reset_war {
            self.reset(ResetKind::CommandAndData);
        }
        self.regs.set_normal_int_status_enable(0xFFFF);
        self.regs.set_error_int_status_enable(0xFFFF);
        self.regs.clear_normal_int(CC | XC | BRR | BWR);
        self.regs.clear_error_int(0xFFFF);
        self.regs
            .set_timeout_control(TIMEOUT_CONTROL::DATA_TIMEOUT.val(0xE));
        self.regs
            .set_block_size(BLOCK_SIZE::BLOCK_SIZE.val(SECTOR_SIZE as u16));
        self.regs.set_block_count(blocks);
        self.regs.set_transfer_mode(mode);
    }

    /// Leaves the controller ready for the next command after a failed one.
    fn pio_abort(&self, err: SdhciError) -> SdhciError {
        debug!("sdhci: PIO transfer failed: {err}");
        self.reset(ResetKind::CommandAndData);
        err
    }

    fn read_port_block(&self, buffer: &mut dyn IoBuffer, offset: usize) -> SdhciResult {
        let mut stage = [0u8; SECTOR_SIZE];
        for word in stage.chunks_exact_mut(4) {
            word.copy_from_slice(&self.regs.read_data_port().to_le_bytes());
        }
        if buffer.write_bytes(offset, &stage) != SECTOR_SIZE {
            return Err(SdhciError::InvalidInput);
        }
        Ok(())
    }

    fn write_port_block(&self, buffer: &dyn IoBuffer, offset: usize) -> SdhciResult {
        let mut stage = [0u8; SECTOR_SIZE];
        if buffer.read_bytes(offset, &mut stage) != SECTOR_SIZE {
            return Err(SdhciError::InvalidInput);
        }
        for word in stage.chunks_exact(4).take(WORDS_PER_BLOCK) {
            self.regs
                .write_data_port(u32::from_le_bytes([word[0], word[1], word[2], word[3]]));
        }
        Ok(())
    }

    pub(super) fn pio_read_single(
        &self,
        buffer: &mut dyn IoBuffer,
        block: u64,
        offset: usize,
    ) -> SdhciResult {
        let card = *self.card.lock();
        let address = card.block_address(block)?;
        self.pio_prepare(1, TRANSFER_MODE::DATA_DIRECTION::Read);
        self.send_command(READ_SINGLE_BLOCK, address);
        self.poll_status(CC, "command complete")
            .and_then(|()| self.poll_status(BRR, "buffer read ready"))
            .and_then(|()| self.read_port_block(buffer, offset))
            .and_then(|()| self.poll_status(XC, "transfer complete"))
            .map_err(|e| self.pio_abort(e))
    }

    pub(super) fn pio_write_single(
        &self,
        buffer: &mut dyn IoBuffer,
        block: u64,
        offset: usize,
    ) -> SdhciResult {
        let card = *self.card.lock();
        let address = card.block_address(block)?;
        self.pio_prepare(1, TRANSFER_MODE::DATA_DIRECTION::Write);
        self.send_command(WRITE_BLOCK, address);
        self.poll_status(CC, "command complete")
            .and_then(|()| self.poll_status(BWR, "buffer write ready"))
            .and_then(|()| self.write_port_block(buffer, offset))
            .and_then(|()| self.poll_status(XC, "transfer complete"))
            .map_err(|e| self.pio_abort(e))
    }

    pub(super) fn pio_read_multi(
        &self,
        buffer: &mut dyn IoBuffer,
        block: u64,
        count: u16,
        offset: usize,
    ) -> SdhciResult {
        let card = *self.card.lock();
        let address = card.block_address(block)?;
        self.pio_prepare(
            count,
            TRANSFER_MODE::DATA_DIRECTION::Read
                + TRANSFER_MODE::MULTI_BLOCK::SET
                + TRANSFER_MODE::BLOCK_COUNT_ENABLE::SET
                + TRANSFER_MODE::AUTO_CMD12::SET,
        );
        self.send_command(READ_MULTIPLE_BLOCK, address);

        let mut run = || -> SdhciResult {
            self.poll_status(CC, "command complete")?;
            for i in 0..usize::from(count) {
                self.poll_status(BRR, "buffer read ready")?;
                self.read_port_block(buffer, offset + i * SECTOR_SIZE)?;
            }
            self.poll_status(XC, "transfer complete")
        };
        run().map_err(|e| self.pio_abort(e))
    }

    pub(super) fn pio_write_multi(
        &self,
        buffer: &mut dyn IoBuffer,
        block: u64,
        count: u16,
        offset: usize,
    ) -> SdhciResult {
        let card = *self.card.lock();
        let address = card.block_address(block)?;
        self.pio_prepare(
            count,
            TRANSFER_MODE::DATA_DIRECTION::Write
                + TRANSFER_MODE::MULTI_BLOCK::SET
                + TRANSFER_MODE::BLOCK_COUNT_ENABLE::SET
                + TRANSFER_MODE::AUTO_CMD12::SET,
        );

        let run = || -> SdhciResult {
            // Pre-erase hint; lets the card prepare `count` blocks at once.
            self.send_command(APP_CMD, card.rca_arg());
            self.poll_status(CC, "command complete")?;
            self.send_command(SET_WR_BLK_ERASE_COUNT, u32::from(count));
            self.poll_status(CC, "command complete")?;

            self.send_command(WRITE_MULTIPLE_BLOCK, address);
            self.poll_status(CC, "command complete")?;
            for i in 0..usize::from(count) {
                self.poll_status(BWR, "buffer write ready")?;
                self.write_port_block(buffer, offset + i * SECTOR_SIZE)?;
            }
            self.poll_status(XC, "transfer complete")
        };
        run().map_err(|e| self.pio_abort(e))
    }
}
