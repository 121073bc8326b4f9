// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

//! Card identification and the initialization sequence.
//!
//! Initialization walks the card from power-up to the transfer state:
//! voltage check, operating-condition poll, identification, addressing,
//! CSD read and selection, then the optional bus-width and high-speed
//! switches. Cards that ignore SEND_IF_COND take the legacy branch, which
//! keeps polling the operating condition for as long as the card reports
//! busy unless [`SdhciConfig::legacy_op_cond_timeout`] bounds it.
//!
//! [`SdhciConfig::legacy_op_cond_timeout`]: crate::SdhciConfig::legacy_op_cond_timeout

use core::time::Duration;

use log::{debug, info, warn};

use crate::{
    cmd::*,
    clock::{CLOCK_DEFAULT_HZ, CLOCK_HIGH_SPEED_HZ, CLOCK_IDENTIFY_HZ},
    error::{SdhciError, SdhciResult},
    hal::SdhciHal,
    host::{ResetKind, SdhciHost},
    regs::{BLOCK_SIZE, HOST_CONTROL, PRESENT_STATE},
    SECTOR_SIZE,
};

const IF_COND_POLLS: usize = 100;
const IF_COND_POLL_INTERVAL: Duration = Duration::from_millis(10);
const OP_COND_ATTEMPTS: usize = 80;
const OP_COND_INTERVAL: Duration = Duration::from_millis(25);
const LEGACY_OP_COND_INTERVAL: Duration = Duration::from_millis(1);

/// Expands the 120 bits of an R2 response into the 128-bit card register
/// they carry. The controller strips the CRC byte, so the register sits
/// eight bits higher than the response words.
pub fn register_from_response(words: [u32; 4]) -> u128 {
    let raw = (u128::from(words[3]) << 96)
        | (u128::from(words[2]) << 64)
        | (u128::from(words[1]) << 32)
        | u128::from(words[0]);
    raw << 8
}

/// Inverse of [`register_from_response`]: the response words a controller
/// reports for a 128-bit card register.
pub fn response_from_register(reg: u128) -> [u32; 4] {
    let raw = reg >> 8;
    [
        raw as u32,
        (raw >> 32) as u32,
        (raw >> 64) as u32,
        (raw >> 96) as u32,
    ]
}

/// Extracts register bits `msb..=lsb`.
const fn field(reg: u128, msb: u32, lsb: u32) -> u128 {
    (reg >> lsb) & ((1u128 << (msb - lsb + 1)) - 1)
}

/// Card identification register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cid {
    words: [u32; 4],
}

impl Cid {
    pub fn from_response(words: [u32; 4]) -> Self {
        Self { words }
    }

    /// Response words as reported by the controller, lowest first.
    pub fn words(&self) -> [u32; 4] {
        self.words
    }

    fn reg(&self) -> u128 {
        register_from_response(self.words)
    }

    pub fn manufacturer_id(&self) -> u8 {
        field(self.reg(), 127, 120) as u8
    }

    pub fn oem_id(&self) -> [u8; 2] {
        (field(self.reg(), 119, 104) as u16).to_be_bytes()
    }

    pub fn product_name(&self) -> [u8; 5] {
        let name = (field(self.reg(), 103, 64) as u64).to_be_bytes();
        [name[3], name[4], name[5], name[6], name[7]]
    }

    /// Product revision as (major, minor).
    pub fn product_revision(&self) -> (u8, u8) {
        let prv = field(self.reg(), 63, 56) as u8;
        (prv >> 4, prv & 0xF)
    }

    pub fn serial_number(&self) -> u32 {
        field(self.reg(), 55, 24) as u32
    }

    /// Manufacturing date as (year, month).
    pub fn manufacture_date(&self) -> (u16, u8) {
        let mdt = field(self.reg(), 19, 8) as u16;
        (2000 + (mdt >> 4), (mdt & 0xF) as u8)
    }
}

/// Card-specific data, reduced to what capacity needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Csd {
    /// Standard capacity layout.
    V1 {
        read_bl_len: u8,
        c_size: u16,
        c_size_mult: u8,
    },
    /// High capacity layout.
    V2 { c_size: u32 },
}

impl Csd {
    /// Parses an R2 response. Returns `None` for unknown CSD structures.
    pub fn from_response(words: [u32; 4]) -> Option<Self> {
        let reg = register_from_response(words);
        match field(reg, 127, 126) {
            0 => Some(Csd::V1 {
                read_bl_len: field(reg, 83, 80) as u8,
                c_size: field(reg, 73, 62) as u16,
                c_size_mult: field(reg, 49, 47) as u8,
            }),
            1 => Some(Csd::V2 {
                c_size: field(reg, 69, 48) as u32,
            }),
            _ => None,
        }
    }

    /// Largest block number reported for the card.
    ///
    /// Version 1 yields the last addressable block; version 2 yields the
    /// block count `(c_size + 1) * 1024`.
    pub fn max_block(&self) -> u64 {
        match *self {
            Csd::V1 {
                read_bl_len,
                c_size,
                c_size_mult,
            } => {
                let ratio = (1u64 << read_bl_len) / SECTOR_SIZE as u64;
                ((u64::from(c_size) + 1) * ratio * (1u64 << (c_size_mult + 2))).saturating_sub(1)
            }
            Csd::V2 { c_size } => (u64::from(c_size) + 1) * 1024,
        }
    }
}

/// State of the card established by the last successful initialization.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CardInfo {
    /// Relative card address.
    pub rca: u16,
    /// Block-addressed (SDHC/SDXC) rather than byte-addressed.
    pub high_capacity: bool,
    pub max_block: u64,
    pub cid: Option<Cid>,
    pub bus_4bit: bool,
    pub high_speed: bool,
}

impl CardInfo {
    /// Command argument addressing `block`: the block number on high
    /// capacity cards, the byte offset otherwise.
    ///
    /// Fails with [`SdhciError::InvalidInput`] when the address does not fit
    /// the 32-bit argument.
    pub fn block_address(&self, block: u64) -> SdhciResult<u32> {
        let address = if self.high_capacity {
            Some(block)
        } else {
            block.checked_mul(SECTOR_SIZE as u64)
        };
        address
            .and_then(|address| u32::try_from(address).ok())
            .ok_or(SdhciError::InvalidInput)
    }

    pub(crate) fn rca_arg(&self) -> u32 {
        u32::from(self.rca) << 16
    }
}

impl<H: SdhciHal> SdhciHost<H> {
    /// Runs the initialization sequence and returns the resulting card state.
    ///
    /// The caller decides whether to publish it; nothing is stored here.
    pub(crate) fn init_card(&self) -> SdhciResult<CardInfo> {
        self.set_clock(CLOCK_IDENTIFY_HZ);
        self.set_power();

        self.send_command(GO_IDLE_STATE, 0);
        self.hal.delay(Duration::from_millis(30));
        self.send_command(SEND_IF_COND, IF_COND_ARG);

        let mut info = CardInfo::default();
        if self.if_cond_answered() {
            info.high_capacity = self.op_cond_v2()?;
        } else {
            debug!("sdhci: no answer to SEND_IF_COND, legacy card");
            self.reset(ResetKind::CommandAndData);
            self.send_command(GO_IDLE_STATE, 0);
            self.op_cond_legacy()?;
        }

        self.send_command(ALL_SEND_CID, 0);
        self.hal.delay(Duration::from_millis(1));
        let cid = Cid::from_response(self.regs.response_words());
        info.cid = Some(cid);

        self.send_command(SEND_RELATIVE_ADDR, 0);
        self.hal.delay(Duration::from_millis(1));
        self.set_clock(CLOCK_DEFAULT_HZ);
        info.rca = (self.regs.response(0) >> 16) as u16;

        self.send_command(SEND_CSD, info.rca_arg());
        self.hal.delay(Duration::from_millis(10));
        let csd = Csd::from_response(self.regs.response_words()).ok_or_else(|| {
            warn!("sdhci: unknown CSD structure");
            SdhciError::CardInit
        })?;
        info.max_block = csd.max_block();

        self.send_command(SELECT_CARD, info.rca_arg());
        self.hal.delay(Duration::from_millis(10));

        if self.config.wide_bus {
            info.bus_4bit = self.switch_bus_width(&info);
        }
        if self.config.high_speed {
            self.send_command(SWITCH_FUNC, SWITCH_HIGH_SPEED_ARG);
            self.hal.delay(Duration::from_millis(10));
            self.set_clock(CLOCK_HIGH_SPEED_HZ);
            self.regs.modify_host_control(HOST_CONTROL::HIGH_SPEED::SET);
            info.high_speed = true;
        }

        self.regs
            .set_block_size(BLOCK_SIZE::BLOCK_SIZE.val(SECTOR_SIZE as u16));
        self.regs.set_block_count(1);
        self.regs.modify_host_control(HOST_CONTROL::LED::SET);
        self.regs.clear_error_int(0xFFFF);
        self.regs.clear_normal_int(0xFFFF);

        let (year, month) = cid.manufacture_date();
        info!(
            "sdhci: card {:02x} {:?} sn {:#010x} ({}-{:02}), rca {:#06x}, {} blocks, {}",
            cid.manufacturer_id(),
            core::str::from_utf8(&cid.product_name()).unwrap_or("?"),
            cid.serial_number(),
            year,
            month,
            info.rca,
            info.max_block,
            if info.high_capacity { "SDHC" } else { "SDSC" }
        );
        Ok(info)
    }

    fn if_cond_answered(&self) -> bool {
        for _ in 0..IF_COND_POLLS {
            if !self.regs.present_state().is_set(PRESENT_STATE::CMD_INHIBIT) {
                return true;
            }
            self.hal.delay(IF_COND_POLL_INTERVAL);
        }
        false
    }

    /// Operating-condition poll for version 2.0 cards. Returns the
    /// card capacity status.
    fn op_cond_v2(&self) -> SdhciResult<bool> {
        for _ in 0..OP_COND_ATTEMPTS {
            self.send_command(APP_CMD, 0);
            self.send_command(SD_SEND_OP_COND, OCR_ARG_HCS);
            self.hal.delay(OP_COND_INTERVAL);
            let ocr = self.regs.response(0);
            if ocr & OCR_READY != 0 {
                return Ok(ocr & OCR_HIGH_CAPACITY != 0);
            }
        }
        warn!("sdhci: card stayed busy after {} SD_SEND_OP_COND", OP_COND_ATTEMPTS);
        Err(SdhciError::CardInit)
    }

    fn op_cond_legacy(&self) -> SdhciResult {
        let start = self.hal.now();
        loop {
            self.send_command(APP_CMD, 0);
            self.send_command(SD_SEND_OP_COND, OCR_ARG_LEGACY);
            self.hal.delay(LEGACY_OP_COND_INTERVAL);
            if self.regs.response(0) & OCR_READY != 0 {
                return Ok(());
            }
            if let Some(limit) = self.config.legacy_op_cond_timeout
                && self.hal.now() - start >= limit
            {
                warn!("sdhci: legacy card stayed busy for {:?}", limit);
                return Err(SdhciError::CardInit);
            }
        }
    }

    /// Requests a 4-bit bus; falls back to 1-bit if the card refuses.
    fn switch_bus_width(&self, info: &CardInfo) -> bool {
        self.send_command(APP_CMD, info.rca_arg());
        self.send_command(SET_BUS_WIDTH, BUS_WIDTH_4BIT_ARG);
        self.hal.delay(Duration::from_millis(30));

        let status = CardStatus::from_bits_retain(self.regs.response(0));
        let accepted = !status.intersects(CardStatus::BUS_WIDTH_ERRORS);
        if accepted {
            self.regs
                .modify_host_control(HOST_CONTROL::DATA_WIDTH_4BIT::SET);
        } else {
            warn!("sdhci: card refused 4-bit bus ({:?}), staying at 1-bit", status);
            self.reset(ResetKind::CommandAndData);
        }
        self.hal.delay(Duration::from_millis(30));
        accepted
    }
}
