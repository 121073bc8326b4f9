// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

//! SD commands and the command dispatcher.

use core::time::Duration;

use bitflags::bitflags;
use log::{trace, warn};
use tock_registers::fields::FieldValue;

use crate::{
    hal::SdhciHal,
    host::SdhciHost,
    regs::{COMMAND, PRESENT_STATE, TRANSFER_MODE},
};

/// How long the dispatcher waits for the command line to go idle.
const COMMAND_INHIBIT_TIMEOUT: Duration = Duration::from_secs(1);

/// Response format a command expects from the card.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    R0,
    R1,
    R1b,
    R2,
    R3,
    R4,
    R5,
    R5b,
    R6,
    R7,
}

impl ResponseKind {
    /// Response-type, CRC-check and index-check bits of the command register.
    pub fn flags(self) -> FieldValue<u16, COMMAND::Register> {
        use COMMAND::{CRC_CHECK, INDEX_CHECK, RESPONSE_TYPE};

        match self {
            ResponseKind::R0 => RESPONSE_TYPE::None,
            ResponseKind::R1 | ResponseKind::R5 | ResponseKind::R6 | ResponseKind::R7 => {
                RESPONSE_TYPE::Short48 + CRC_CHECK::SET + INDEX_CHECK::SET
            }
            ResponseKind::R1b | ResponseKind::R5b => {
                RESPONSE_TYPE::Short48Busy + CRC_CHECK::SET + INDEX_CHECK::SET
            }
            ResponseKind::R2 => RESPONSE_TYPE::Long136 + CRC_CHECK::SET,
            ResponseKind::R3 | ResponseKind::R4 => RESPONSE_TYPE::Short48,
        }
    }
}

/// An SD command: index plus expected response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Command {
    pub index: u8,
    pub response: ResponseKind,
    /// Application-specific command, must follow APP_CMD.
    pub app: bool,
}

impl Command {
    const fn new(index: u8, response: ResponseKind) -> Self {
        Self {
            index,
            response,
            app: false,
        }
    }

    const fn app(index: u8, response: ResponseKind) -> Self {
        Self {
            index,
            response,
            app: true,
        }
    }

    /// Whether the command moves data over the DAT lines.
    pub const fn has_data(&self) -> bool {
        !self.app && matches!(self.index, 17 | 18 | 24 | 25)
    }

    /// Whether the command is a multi-block read or write.
    pub const fn is_multi_block(&self) -> bool {
        !self.app && matches!(self.index, 18 | 25)
    }

    /// Whether the command reads from the card.
    pub const fn is_read(&self) -> bool {
        !self.app && matches!(self.index, 17 | 18)
    }

    /// Full command register value.
    pub fn encode(&self) -> FieldValue<u16, COMMAND::Register> {
        let value = COMMAND::CMD_INDEX.val(self.index as u16) + self.response.flags();
        if self.has_data() {
            value + COMMAND::DATA_PRESENT::SET
        } else {
            value
        }
    }
}

pub const GO_IDLE_STATE: Command = Command::new(0, ResponseKind::R0);
pub const ALL_SEND_CID: Command = Command::new(2, ResponseKind::R2);
pub const SEND_RELATIVE_ADDR: Command = Command::new(3, ResponseKind::R6);
pub const SWITCH_FUNC: Command = Command::new(6, ResponseKind::R1);
pub const SELECT_CARD: Command = Command::new(7, ResponseKind::R1b);
pub const SEND_IF_COND: Command = Command::new(8, ResponseKind::R7);
pub const SEND_CSD: Command = Command::new(9, ResponseKind::R2);
pub const STOP_TRANSMISSION: Command = Command::new(12, ResponseKind::R1b);
pub const SEND_STATUS: Command = Command::new(13, ResponseKind::R1);
pub const SET_BLOCKLEN: Command = Command::new(16, ResponseKind::R1);
pub const READ_SINGLE_BLOCK: Command = Command::new(17, ResponseKind::R1);
pub const READ_MULTIPLE_BLOCK: Command = Command::new(18, ResponseKind::R1);
pub const WRITE_BLOCK: Command = Command::new(24, ResponseKind::R1);
pub const WRITE_MULTIPLE_BLOCK: Command = Command::new(25, ResponseKind::R1);
pub const APP_CMD: Command = Command::new(55, ResponseKind::R1);

pub const SET_BUS_WIDTH: Command = Command::app(6, ResponseKind::R1);
pub const SET_WR_BLK_ERASE_COUNT: Command = Command::app(23, ResponseKind::R1);
pub const SD_SEND_OP_COND: Command = Command::app(41, ResponseKind::R3);

/// SEND_IF_COND argument: 2.7-3.6 V range, check pattern 0xAA.
pub const IF_COND_ARG: u32 = 0x1AA;
/// SD_SEND_OP_COND argument for version 2.0 cards, with host capacity support.
pub const OCR_ARG_HCS: u32 = 0x40FF_8000;
/// SD_SEND_OP_COND argument for legacy cards.
pub const OCR_ARG_LEGACY: u32 = 0x00FF_8000;
/// SWITCH_FUNC argument selecting high-speed in function group 1.
pub const SWITCH_HIGH_SPEED_ARG: u32 = 0x01FF_FFF1;
/// SET_BUS_WIDTH argument for a 4-bit bus.
pub const BUS_WIDTH_4BIT_ARG: u32 = 2;

/// OCR power-up done (busy bit clear).
pub const OCR_READY: u32 = 1 << 31;
/// OCR card capacity status.
pub const OCR_HIGH_CAPACITY: u32 = 1 << 30;

bitflags! {
    /// Card status carried in R1 responses.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CardStatus: u32 {
        const OUT_OF_RANGE = 1 << 31;
        const ADDRESS_ERROR = 1 << 30;
        const BLOCK_LEN_ERROR = 1 << 29;
        const ERASE_SEQ_ERROR = 1 << 28;
        const ERASE_PARAM = 1 << 27;
        const WP_VIOLATION = 1 << 26;
        const CARD_IS_LOCKED = 1 << 25;
        const LOCK_UNLOCK_FAILED = 1 << 24;
        const COM_CRC_ERROR = 1 << 23;
        const ILLEGAL_COMMAND = 1 << 22;
        const CARD_ECC_FAILED = 1 << 21;
        const CC_ERROR = 1 << 20;
        const ERROR = 1 << 19;
        const CSD_OVERWRITE = 1 << 16;
        const WP_ERASE_SKIP = 1 << 15;
        const CARD_ECC_DISABLED = 1 << 14;
        const ERASE_RESET = 1 << 13;
        const READY_FOR_DATA = 1 << 8;
        const APP_CMD = 1 << 5;
        const AKE_SEQ_ERROR = 1 << 3;
    }
}

impl CardStatus {
    /// Bits that fail a multi-block read.
    pub const READ_ERRORS: Self = Self::OUT_OF_RANGE
        .union(Self::ADDRESS_ERROR)
        .union(Self::ERASE_PARAM)
        .union(Self::WP_VIOLATION)
        .union(Self::CARD_IS_LOCKED)
        .union(Self::LOCK_UNLOCK_FAILED)
        .union(Self::COM_CRC_ERROR)
        .union(Self::ILLEGAL_COMMAND)
        .union(Self::CARD_ECC_FAILED)
        .union(Self::CC_ERROR)
        .union(Self::ERROR);

    /// Bits that fail a multi-block write.
    pub const WRITE_ERRORS: Self = Self::READ_ERRORS.union(Self::BLOCK_LEN_ERROR);

    /// Bits that reject SET_BUS_WIDTH.
    pub const BUS_WIDTH_ERRORS: Self = Self::ILLEGAL_COMMAND.union(Self::ERROR);
}

impl<H: SdhciHal> SdhciHost<H> {
    /// Issues `cmd` for a PIO transfer or a non-data command.
    ///
    /// Completion is not awaited; callers wait on the interrupt status.
    pub(crate) fn send_command(&self, cmd: Command, arg: u32) {
        self.dispatch(cmd, arg, false);
    }

    /// Issues a data command with the DMA enable bit set.
    pub(crate) fn send_dma_command(&self, cmd: Command, arg: u32) {
        self.dispatch(cmd, arg, true);
    }

    fn dispatch(&self, cmd: Command, arg: u32, dma: bool) {
        if cmd != GO_IDLE_STATE {
            self.wait_command_line();
        }

        self.regs.set_argument(arg);
        if cmd.is_multi_block() {
            let mut mode = TRANSFER_MODE::MULTI_BLOCK::SET
                + TRANSFER_MODE::BLOCK_COUNT_ENABLE::SET
                + TRANSFER_MODE::AUTO_CMD12::SET;
            if cmd.is_read() {
                mode = mode + TRANSFER_MODE::DATA_DIRECTION::Read;
            }
            if dma {
                mode = mode + TRANSFER_MODE::DMA_ENABLE::SET;
            }
            self.regs.set_transfer_mode(mode);
        }

        let value = cmd.encode();
        trace!(
            "sdhci: {}CMD{} arg={:#010x} reg={:#06x}",
            if cmd.app { "A" } else { "" },
            cmd.index,
            arg,
            value.value
        );
        self.regs.set_command(value);
    }

    fn wait_command_line(&self) {
        let deadline = self.hal.now() + COMMAND_INHIBIT_TIMEOUT;
        while self.regs.present_state().is_set(PRESENT_STATE::CMD_INHIBIT) {
            if self.hal.now() >= deadline {
                // The controller drops the command; the caller's status wait
                // reports the failure.
                warn!("sdhci: command line still inhibited, issuing anyway");
                return;
            }
            self.hal.delay(Duration::from_micros(10));
        }
    }
}
