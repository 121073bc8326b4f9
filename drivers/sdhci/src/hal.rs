// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

//! Platform services the driver calls into.

use core::{ptr::NonNull, time::Duration};

use event_listener::EventListener;

use crate::regs::RegisterBus;

/// A physically contiguous memory region usable as a DMA target.
#[derive(Debug)]
pub struct DmaRegion {
    /// Bus address programmed into the controller.
    pub paddr: u64,
    /// Kernel virtual address of the same memory.
    pub vaddr: NonNull<u8>,
    /// Length in bytes.
    pub size: usize,
}

unsafe impl Send for DmaRegion {}
unsafe impl Sync for DmaRegion {}

/// Services provided by the platform hosting the controller.
///
/// The driver never sleeps, allocates or reads a clock on its own; every
/// such operation goes through this trait.
pub trait SdhciHal: Send + Sync {
    /// Access path to the controller's register window.
    type Bus: RegisterBus;
    /// Lock used for the transfer and presence locks. It must put the
    /// waiter to sleep or spin; the holder may block for seconds.
    type RawMutex: lock_api::RawMutex + Send + Sync;

    /// Monotonic time since an arbitrary epoch.
    fn now(&self) -> Duration;

    /// Busy-waits or sleeps for at least `duration`.
    fn delay(&self, duration: Duration);

    /// Blocks until `listener` is notified or `now()` passes `deadline`.
    ///
    /// Returns `true` if the listener fired. A spurious early return is
    /// allowed; the caller re-checks the hardware either way.
    fn block_until(&self, listener: EventListener, deadline: Duration) -> bool;

    /// Allocates `size` bytes of DMA-capable memory aligned to `align`.
    fn dma_alloc(&self, size: usize, align: usize) -> Option<DmaRegion>;

    /// Releases a region returned by [`SdhciHal::dma_alloc`].
    ///
    /// # Safety
    ///
    /// `region` must come from `dma_alloc` on the same HAL and must not be
    /// used afterwards.
    unsafe fn dma_dealloc(&self, region: DmaRegion);
}
