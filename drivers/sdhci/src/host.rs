// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

//! The controller facade.

extern crate alloc;

use alloc::boxed::Box;
use core::{
    mem,
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};

use lock_api::Mutex;
use log::{debug, info, warn};

use crate::{
    SECTOR_SIZE,
    card::CardInfo,
    config::SdhciConfig,
    error::{SdhciError, SdhciResult},
    hal::SdhciHal,
    irq::IrqCoordinator,
    presence::{CardPresence, MediaState},
    regs::{CAPABILITIES, HOST_CONTROL, Registers, SOFTWARE_RESET},
    transfer::BounceBuffer,
};

const RESET_TIMEOUT: Duration = Duration::from_millis(100);
const SETTLE_DELAY: Duration = Duration::from_millis(10);

/// Callback receiving media state changes.
pub type MediaListener = Box<dyn Fn(MediaState) + Send + Sync>;

/// Lines cleared by a software reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetKind {
    /// The whole controller, including clock and power.
    All,
    Command,
    Data,
    CommandAndData,
}

/// State guarded by the transfer lock.
pub(crate) struct TransferContext {
    pub bounce: Option<BounceBuffer>,
}

/// One SDHCI slot and the card in it.
pub struct SdhciHost<H: SdhciHal> {
    pub(crate) hal: H,
    pub(crate) regs: Registers<H::Bus>,
    pub(crate) config: SdhciConfig,
    /// Serializes command issuance and data transfers.
    pub(crate) xfer: Mutex<H::RawMutex, TransferContext>,
    pub(crate) presence: Mutex<H::RawMutex, CardPresence>,
    pub(crate) card: spin::Mutex<CardInfo>,
    pub(crate) irq: IrqCoordinator,
    pub(crate) media_listener: Option<MediaListener>,
    suspended: AtomicBool,
}

impl<H: SdhciHal> SdhciHost<H> {
    /// Attaches to a controller: allocates the bounce buffer when SDMA is
    /// configured, resets the controller and initializes a card that is
    /// already in the slot.
    pub fn new(hal: H, bus: H::Bus, config: SdhciConfig) -> SdhciResult<Self> {
        let bounce = if config.sdma {
            Some(BounceBuffer::alloc(&hal)?)
        } else {
            None
        };

        let host = Self {
            hal,
            regs: Registers::new(bus),
            config,
            xfer: Mutex::new(TransferContext { bounce }),
            presence: Mutex::new(CardPresence::NotPresent),
            card: spin::Mutex::new(CardInfo::default()),
            irq: IrqCoordinator::new(),
            media_listener: None,
            suspended: AtomicBool::new(false),
        };

        let caps = host.regs.capabilities();
        info!(
            "sdhci: controller version {:#06x}, base clock {} MHz, sdma {}, config {:?}",
            host.regs.host_version(),
            caps.read(CAPABILITIES::BASE_CLK_FREQ),
            caps.is_set(CAPABILITIES::SUPPORT_SDMA),
            host.config
        );
        if host.config.sdma && !caps.is_set(CAPABILITIES::SUPPORT_SDMA) {
            warn!("sdhci: SDMA configured but not advertised by the controller");
        }

        host.power_cycle();
        if host.card_inserted() {
            match host.init_card() {
                Ok(info) => {
                    host.adopt_card(info);
                    *host.presence.lock() = CardPresence::Present;
                }
                Err(err) => warn!("sdhci: card in slot failed to initialize: {err}"),
            }
        }
        Ok(host)
    }

    /// Installs the callback told about insertions and removals.
    pub fn set_media_listener(&mut self, listener: MediaListener) {
        self.media_listener = Some(listener);
    }

    pub fn config(&self) -> &SdhciConfig {
        &self.config
    }

    pub fn hal(&self) -> &H {
        &self.hal
    }

    /// State of the current card, as of its last initialization.
    pub fn card_info(&self) -> CardInfo {
        *self.card.lock()
    }

    /// Highest block number reported by the card.
    pub fn capacity(&self) -> u64 {
        self.card.lock().max_block
    }

    pub const fn block_size(&self) -> usize {
        SECTOR_SIZE
    }

    /// Command argument the controller sends to address `block`.
    pub fn block_address(&self, block: u64) -> SdhciResult<u32> {
        self.card.lock().block_address(block)
    }

    pub fn dump_registers(&self) {
        self.regs.dump();
    }

    /// Switches the activity LED.
    pub fn set_led(&self, on: bool) {
        let value = if on {
            HOST_CONTROL::LED::SET
        } else {
            HOST_CONTROL::LED::CLEAR
        };
        self.regs.modify_host_control(value);
    }

    /// Issues a software reset and waits for the controller to finish it.
    pub fn reset(&self, kind: ResetKind) {
        let value = match kind {
            ResetKind::All => SOFTWARE_RESET::RESET_ALL::SET,
            ResetKind::Command => SOFTWARE_RESET::RESET_CMD::SET,
            ResetKind::Data => SOFTWARE_RESET::RESET_DATA::SET,
            ResetKind::CommandAndData => {
                SOFTWARE_RESET::RESET_CMD::SET + SOFTWARE_RESET::RESET_DATA::SET
            }
        };
        self.regs.set_software_reset(value);

        let deadline = self.hal.now() + RESET_TIMEOUT;
        while self.regs.software_reset().get() & value.value != 0 {
            if self.hal.now() >= deadline {
                warn!("sdhci: {:?} reset did not complete", kind);
                return;
            }
            self.hal.delay(Duration::from_micros(10));
        }
        debug!("sdhci: {:?} reset done", kind);
    }

    fn power_cycle(&self) {
        self.regs.set_power_control(0);
        self.reset(ResetKind::All);
        self.hal.delay(SETTLE_DELAY);
    }

    /// Blocks new transfers until [`Self::resume`]. Waits for the transfer in
    /// flight, if any.
    pub fn suspend(&self) {
        if self.suspended.swap(true, Ordering::AcqRel) {
            return;
        }
        mem::forget(self.xfer.lock());
        debug!("sdhci: suspended");
    }

    /// Restarts the controller after a power transition.
    ///
    /// A card that was present and still is gets re-initialized; if it
    /// answers with a different CID it is flagged for remount.
    pub fn resume(&self) {
        if self.suspended.load(Ordering::Acquire) {
            self.power_cycle();
            self.revalidate_card();
            self.suspended.store(false, Ordering::Release);
            // Releases the guard forgotten in `suspend`.
            unsafe { self.xfer.force_unlock() };
        } else {
            let _guard = self.xfer.lock();
            self.power_cycle();
            self.revalidate_card();
        }
        debug!("sdhci: resumed");
    }

    fn revalidate_card(&self) {
        if self.card_presence() != CardPresence::Present || !self.card_inserted() {
            return;
        }
        match self.init_card() {
            Ok(info) => {
                if !self.adopt_card(info) {
                    self.mark_remount();
                }
            }
            Err(err) => {
                warn!("sdhci: card failed to come back: {err}");
                self.mark_remount();
            }
        }
    }

    pub fn format(&self) -> SdhciResult {
        Err(SdhciError::Unsupported)
    }

    pub fn eject(&self) -> SdhciResult {
        Err(SdhciError::Unsupported)
    }

    pub fn lock_media(&self, _locked: bool) -> SdhciResult {
        Err(SdhciError::Unsupported)
    }
}

impl<H: SdhciHal> Drop for SdhciHost<H> {
    fn drop(&mut self) {
        self.regs.set_power_control(0);
        if let Some(bounce) = self.xfer.get_mut().bounce.take() {
            unsafe { self.hal.dma_dealloc(bounce.into_region()) };
        }
    }
}
