// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

//! SD clock and bus power.

use core::time::Duration;

use log::{debug, warn};

use crate::{
    hal::SdhciHal,
    host::SdhciHost,
    regs::{CAPABILITIES, CLOCK_CONTROL, POWER_CONTROL},
};

/// Identification-mode clock.
pub const CLOCK_IDENTIFY_HZ: u32 = 400_000;
/// Default-speed clock.
pub const CLOCK_DEFAULT_HZ: u32 = 25_000_000;
/// High-speed clock.
pub const CLOCK_HIGH_SPEED_HZ: u32 = 50_000_000;

/// Largest divisor the 8-bit SDCLK frequency select can express.
pub const MAX_DIVISOR: u32 = 256;

const CLOCK_STABLE_TIMEOUT: Duration = Duration::from_millis(20);

/// Smallest power-of-two divisor bringing `base_hz` down to `target_hz`.
///
/// Saturates at [`MAX_DIVISOR`] when even that is too fast.
pub const fn compute_divisor(base_hz: u32, target_hz: u32) -> u32 {
    let mut div = 1;
    while div < MAX_DIVISOR && base_hz / div > target_hz {
        div *= 2;
    }
    div
}

/// Bus voltage picked from the capability register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusVoltage {
    V3_3,
    V3_0,
    V1_8,
}

impl<H: SdhciHal> SdhciHost<H> {
    /// Base clock reported by the capability register, in Hz.
    pub fn base_clock_hz(&self) -> u32 {
        self.regs.capabilities().read(CAPABILITIES::BASE_CLK_FREQ) * 1_000_000
    }

    /// Programs the SD clock to at most `target_hz` and returns the divisor.
    pub fn set_clock(&self, target_hz: u32) -> u32 {
        self.regs.set_clock_control(0);
        self.regs
            .set_clock_control(CLOCK_CONTROL::INTERNAL_CLK_EN::SET.value);

        let deadline = self.hal.now() + CLOCK_STABLE_TIMEOUT;
        while !self
            .regs
            .clock_control()
            .is_set(CLOCK_CONTROL::INTERNAL_CLK_STABLE)
        {
            if self.hal.now() >= deadline {
                warn!("sdhci: internal clock not stable");
                break;
            }
            self.hal.delay(Duration::from_micros(10));
        }

        let base = self.base_clock_hz();
        if base == 0 {
            warn!("sdhci: controller does not report a base clock");
        }
        let div = compute_divisor(base, target_hz);
        let value = CLOCK_CONTROL::INTERNAL_CLK_EN::SET
            + CLOCK_CONTROL::FREQ_SELECT.val((div >> 1) as u16)
            + CLOCK_CONTROL::SD_CLK_EN::SET;
        self.regs.set_clock_control(value.value);

        debug!(
            "sdhci: clock {} Hz requested, base {} Hz / {} = {} Hz",
            target_hz,
            base,
            div,
            base / div
        );
        div
    }

    /// Powers the bus at the highest voltage the controller supports.
    pub fn set_power(&self) -> Option<BusVoltage> {
        let caps = self.regs.capabilities();
        let (voltage, code) = if caps.is_set(CAPABILITIES::SUPPORT_3V3) {
            (BusVoltage::V3_3, POWER_CONTROL::BUS_VOLTAGE::V3_3)
        } else if caps.is_set(CAPABILITIES::SUPPORT_3V0) {
            (BusVoltage::V3_0, POWER_CONTROL::BUS_VOLTAGE::V3_0)
        } else if caps.is_set(CAPABILITIES::SUPPORT_1V8) {
            (BusVoltage::V1_8, POWER_CONTROL::BUS_VOLTAGE::V1_8)
        } else {
            warn!("sdhci: no supported bus voltage");
            return None;
        };

        self.regs.set_power_control(code.value);
        self.regs
            .set_power_control((code + POWER_CONTROL::BUS_POWER::SET).value);
        debug!("sdhci: bus power on at {:?}", voltage);
        Some(voltage)
    }
}
