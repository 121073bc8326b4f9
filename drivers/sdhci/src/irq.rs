// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

//! Interrupt-status waits.
//!
//! Two kinds of waits exist. Status polls spin on the normal interrupt
//! status register under a time budget and are used by initialization and
//! the PIO path. Sleeping waits block on an [`Event`] that the interrupt
//! handler notifies; the waiter re-reads the status itself after every
//! wakeup, so the handler never needs to know what anyone is waiting for.

use core::time::Duration;

use event_listener::{Event, EventListener};
use log::{error, warn};

use crate::{
    error::{SdhciError, SdhciResult},
    hal::SdhciHal,
    host::SdhciHost,
    regs::NORMAL_INT,
};

/// Budget for command-complete ahead of a DMA transfer.
pub const COMMAND_COMPLETE_TIMEOUT: Duration = Duration::from_millis(2500);
/// Budget for a whole DMA transfer to make progress.
pub const DMA_TIMEOUT: Duration = Duration::from_secs(5);
/// Number of passes a PIO poll gets before it gives up.
pub const PIO_POLL_PASSES: u32 = 10;
/// Length of one PIO poll pass.
pub const PIO_POLL_PASS: Duration = Duration::from_millis(500);

const POLL_INTERVAL: Duration = Duration::from_micros(10);

/// Wakes threads sleeping on controller interrupts.
pub(crate) struct IrqCoordinator {
    event: Event,
}

impl IrqCoordinator {
    pub fn new() -> Self {
        Self {
            event: Event::new(),
        }
    }

    /// Registers interest in the next interrupt. Must be called before the
    /// status is checked, or an interrupt in between is lost.
    pub fn listen(&self) -> EventListener {
        self.event.listen()
    }

    pub fn notify_all(&self) {
        self.event.notify(usize::MAX);
    }
}

impl<H: SdhciHal> SdhciHost<H> {
    /// Spins until a bit of `mask` shows up in the normal interrupt status,
    /// then clears exactly those bits.
    ///
    /// Fails with [`SdhciError::Io`] as soon as the error interrupt bit is
    /// set, and with [`SdhciError::Timeout`] once `timeout` has passed.
    pub(crate) fn wait_for_status(&self, mask: u16, timeout: Duration) -> SdhciResult {
        let deadline = self.hal.now() + timeout;
        loop {
            let status = self.regs.normal_int_status();
            if status.is_set(NORMAL_INT::ERROR) {
                self.report_error_status(status.get());
                return Err(SdhciError::Io);
            }
            let hit = status.get() & mask;
            if hit != 0 {
                self.regs.clear_normal_int(hit);
                return Ok(());
            }
            if self.hal.now() >= deadline {
                return Err(SdhciError::Timeout);
            }
            self.hal.delay(POLL_INTERVAL);
        }
    }

    /// PIO variant of [`Self::wait_for_status`]: polls in passes, warns after
    /// each pass that comes up empty, and turns exhaustion into an I/O error.
    pub(crate) fn poll_status(&self, mask: u16, what: &str) -> SdhciResult {
        for pass in 1..=PIO_POLL_PASSES {
            match self.wait_for_status(mask, PIO_POLL_PASS) {
                Err(SdhciError::Timeout) => {
                    warn!("sdhci: still waiting for {what} (pass {pass}/{PIO_POLL_PASSES})");
                }
                result => return result,
            }
        }
        error!("sdhci: gave up waiting for {what}");
        self.regs.dump();
        Err(SdhciError::Io)
    }

    /// Sleeps until the interrupt handler fires or `deadline` passes.
    /// Returns `false` on deadline expiry.
    pub(crate) fn sleep_until(&self, listener: EventListener, deadline: Duration) -> bool {
        if self.hal.now() >= deadline {
            return false;
        }
        self.hal.block_until(listener, deadline)
    }

    pub(crate) fn report_error_status(&self, normal: u16) {
        let err = self.regs.error_int_status();
        error!(
            "sdhci: error interrupt, status {:#06x} error {:#06x}",
            normal,
            err.get()
        );
    }

    /// Interrupt handler entry point.
    ///
    /// Wakes every thread sleeping on the controller; they re-check the
    /// status registers themselves. Returns `true` if the controller had an
    /// interrupt pending.
    pub fn handle_irq(&self) -> bool {
        let pending = self.regs.normal_int_status().get() != 0;
        self.irq.notify_all();
        pending
    }
}
