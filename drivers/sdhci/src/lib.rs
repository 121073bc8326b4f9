// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

//! SD Host Controller Interface driver.
//!
//! [`SdhciHost`] drives one SDHCI slot: it brings an SD/SDHC card from
//! power-up to the transfer state, serves block reads and writes through the
//! data port or through SDMA, and tracks card insertion and removal.
//!
//! The platform supplies register access, a clock, delays, a sleeping wait
//! and DMA memory through [`SdhciHal`]. It must route the controller
//! interrupt to [`SdhciHost::handle_irq`] and call
//! [`SdhciHost::handle_timer`] at the period that function returns, starting
//! [`PRESENCE_FIRST_POLL`] after attach.
//!
//! ```ignore
//! let bus = unsafe { MmioBus::new(base) };
//! let host = SdhciHost::new(hal, bus, SdhciConfig::default())?;
//! let mut buf = [0u8; 1024];
//! host.transfer(&mut ReadBuffer::new(&mut buf), 0, 2)?;
//! ```

#![cfg_attr(not(test), no_std)]

mod card;
mod clock;
pub mod cmd;
mod config;
mod error;
mod hal;
mod host;
mod irq;
mod presence;
mod transfer;

pub mod regs;

pub use self::{
    card::{CardInfo, Cid, Csd, register_from_response, response_from_register},
    clock::{
        BusVoltage, CLOCK_DEFAULT_HZ, CLOCK_HIGH_SPEED_HZ, CLOCK_IDENTIFY_HZ, MAX_DIVISOR,
        compute_divisor,
    },
    cmd::{CardStatus, Command, ResponseKind},
    config::SdhciConfig,
    error::{SdhciError, SdhciResult},
    hal::{DmaRegion, SdhciHal},
    host::{MediaListener, ResetKind, SdhciHost},
    irq::{COMMAND_COMPLETE_TIMEOUT, DMA_TIMEOUT, PIO_POLL_PASS, PIO_POLL_PASSES},
    presence::{CardPresence, MediaState, PRESENCE_FIRST_POLL, PRESENCE_POLL_PERIOD},
    regs::{MmioBus, RegisterBus},
    transfer::{
        BOUNCE_BUFFER_SIZE, DMA_RETRY_COUNT, Direction, IoBuffer, PIO_CHUNK_BLOCKS, ReadBuffer,
        WriteBuffer,
    },
};

/// Size of a card block; the driver always transfers whole 512-byte blocks.
pub const SECTOR_SIZE: usize = 512;
