// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

//! Behavioral switches of the driver.
//!
//! Each switch has a cargo feature of the same name that sets its default,
//! so a kernel build can pin the behavior at compile time while tests build
//! any combination at run time.

use core::time::Duration;

/// Driver configuration, fixed at attach time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SdhciConfig {
    /// Fail every write and report the card as write protected.
    pub read_only: bool,
    /// Switch the card to a 4-bit data bus after selection.
    pub wide_bus: bool,
    /// Switch the card to high-speed timing and a 50 MHz clock.
    pub high_speed: bool,
    /// Use multi-block commands for PIO requests of more than one block.
    pub multi_block: bool,
    /// Move data through the SDMA bounce buffer instead of the data port.
    pub sdma: bool,
    /// Reset the command and data lines before every PIO or SDMA transfer.
    pub reset_war: bool,
    /// Bound on the power-up wait of cards that do not answer SEND_IF_COND.
    /// `None` waits for as long as the card stays busy.
    pub legacy_op_cond_timeout: Option<Duration>,
}

impl SdhciConfig {
    /// Configuration selected by the crate's cargo features.
    pub const fn from_features() -> Self {
        Self {
            read_only: cfg!(feature = "read-only"),
            wide_bus: cfg!(feature = "wide-bus"),
            high_speed: cfg!(feature = "high-speed"),
            multi_block: cfg!(feature = "multi-block"),
            sdma: cfg!(feature = "sdma"),
            reset_war: cfg!(feature = "reset-war"),
            legacy_op_cond_timeout: None,
        }
    }

    pub const fn with_read_only(mut self, enable: bool) -> Self {
        self.read_only = enable;
        self
    }

    pub const fn with_wide_bus(mut self, enable: bool) -> Self {
        self.wide_bus = enable;
        self
    }

    pub const fn with_high_speed(mut self, enable: bool) -> Self {
        self.high_speed = enable;
        self
    }

    pub const fn with_multi_block(mut self, enable: bool) -> Self {
        self.multi_block = enable;
        self
    }

    pub const fn with_sdma(mut self, enable: bool) -> Self {
        self.sdma = enable;
        self
    }

    pub const fn with_reset_war(mut self, enable: bool) -> Self {
        self.reset_war = enable;
        self
    }

    pub const fn with_legacy_op_cond_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.legacy_op_cond_timeout = timeout;
        self
    }
}

impl Default for SdhciConfig {
    fn default() -> Self {
        Self::from_features()
    }
}
