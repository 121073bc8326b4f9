// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

//! Block transfers.
//!
//! A request is served entirely under the transfer lock. With SDMA enabled
//! every request goes through the bounce buffer; otherwise multi-block
//! requests use multi-block commands when allowed and everything else is
//! moved one block at a time through the data port.

mod dma;
mod pio;

pub(crate) use dma::BounceBuffer;
pub use dma::{BOUNCE_BUFFER_SIZE, DMA_RETRY_COUNT};
pub use pio::PIO_CHUNK_BLOCKS;

use log::{trace, warn};

use crate::{
    SECTOR_SIZE,
    error::{SdhciError, SdhciResult},
    hal::SdhciHal,
    host::{SdhciHost, TransferContext},
};

/// Direction of a transfer, seen from the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Card to memory.
    Read,
    /// Memory to card.
    Write,
}

/// Memory taking part in a transfer.
///
/// The driver only moves bytes through these accessors, so the buffer may
/// be scattered or live in another address space.
pub trait IoBuffer {
    fn direction(&self) -> Direction;

    /// Length in bytes.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copies buffer contents at `offset` into `dst`; returns bytes copied.
    fn read_bytes(&self, offset: usize, dst: &mut [u8]) -> usize;

    /// Copies `src` into the buffer at `offset`; returns bytes copied.
    fn write_bytes(&mut self, offset: usize, src: &[u8]) -> usize;
}

/// Destination of a read.
pub struct ReadBuffer<'a> {
    buf: &'a mut [u8],
}

impl<'a> ReadBuffer<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf }
    }
}

impl IoBuffer for ReadBuffer<'_> {
    fn direction(&self) -> Direction {
        Direction::Read
    }

    fn len(&self) -> usize {
        self.buf.len()
    }

    fn read_bytes(&self, offset: usize, dst: &mut [u8]) -> usize {
        copy_out(self.buf, offset, dst)
    }

    fn write_bytes(&mut self, offset: usize, src: &[u8]) -> usize {
        let Some(tail) = self.buf.get_mut(offset..) else {
            return 0;
        };
        let n = tail.len().min(src.len());
        tail[..n].copy_from_slice(&src[..n]);
        n
    }
}

/// Source of a write.
pub struct WriteBuffer<'a> {
    buf: &'a [u8],
}

impl<'a> WriteBuffer<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }
}

impl IoBuffer for WriteBuffer<'_> {
    fn direction(&self) -> Direction {
        Direction::Write
    }

    fn len(&self) -> usize {
        self.buf.len()
    }

    fn read_bytes(&self, offset: usize, dst: &mut [u8]) -> usize {
        copy_out(self.buf, offset, dst)
    }

    fn write_bytes(&mut self, _offset: usize, _src: &[u8]) -> usize {
        0
    }
}

fn copy_out(buf: &[u8], offset: usize, dst: &mut [u8]) -> usize {
    let Some(tail) = buf.get(offset..) else {
        return 0;
    };
    let n = tail.len().min(dst.len());
    dst[..n].copy_from_slice(&tail[..n]);
    n
}

impl<H: SdhciHal> SdhciHost<H> {
    /// Submits a request and reports its outcome through `completion`.
    ///
    /// `completion` runs exactly once, on the calling thread, after the
    /// transfer lock has been released, so it may submit further requests.
    pub fn submit_transfer<F>(
        &self,
        buffer: &mut dyn IoBuffer,
        start_block: u64,
        block_count: u32,
        completion: F,
    ) where
        F: FnOnce(SdhciResult<usize>),
    {
        let result = self.transfer(buffer, start_block, block_count);
        completion(result);
    }

    /// Moves `block_count` blocks starting at `start_block` between the card
    /// and `buffer`, returning the number of bytes transferred.
    pub fn transfer(
        &self,
        buffer: &mut dyn IoBuffer,
        start_block: u64,
        block_count: u32,
    ) -> SdhciResult<usize> {
        if block_count == 0 {
            return Ok(0);
        }
        let bytes = block_count as usize * SECTOR_SIZE;
        if buffer.len() < bytes {
            warn!(
                "sdhci: buffer of {} bytes too small for {} blocks",
                buffer.len(),
                block_count
            );
            return Err(SdhciError::InvalidInput);
        }
        let direction = buffer.direction();
        if direction == Direction::Write && self.config.read_only {
            return Err(SdhciError::ReadOnly);
        }

        let mut ctx = self.xfer.lock();
        if !self.media_ready() {
            self.mark_remount();
            return Err(SdhciError::NoMedia);
        }
        let max_block = self.card.lock().max_block;
        let in_range = start_block
            .checked_add(u64::from(block_count - 1))
            .is_some_and(|last| last <= max_block);
        if !in_range {
            warn!(
                "sdhci: {} blocks at {} past the last block {}",
                block_count, start_block, max_block
            );
            return Err(SdhciError::InvalidInput);
        }
        trace!(
            "sdhci: {:?} {} blocks at {}",
            direction, block_count, start_block
        );

        let result = if self.config.sdma {
            self.dma_request(&mut ctx, buffer, start_block, block_count)
        } else if self.config.multi_block && block_count > 1 {
            self.pio_multi_request(buffer, start_block, block_count)
        } else {
            self.pio_single_request(buffer, start_block, block_count)
        };
        drop(ctx);

        result.map(|()| bytes)
    }

    fn dma_request(
        &self,
        ctx: &mut TransferContext,
        buffer: &mut dyn IoBuffer,
        start_block: u64,
        block_count: u32,
    ) -> SdhciResult {
        let mut done = 0;
        while done < block_count {
            let n = (block_count - done).min(u32::from(u16::MAX));
            self.dma_with_retry(
                ctx,
                buffer,
                start_block + u64::from(done),
                n as u16,
                done as usize * SECTOR_SIZE,
            )?;
            done += n;
        }
        Ok(())
    }

    fn pio_multi_request(
        &self,
        buffer: &mut dyn IoBuffer,
        start_block: u64,
        block_count: u32,
    ) -> SdhciResult {
        let mut done = 0;
        while done < block_count {
            let n = (block_count - done).min(PIO_CHUNK_BLOCKS);
            let block = start_block + u64::from(done);
            let offset = done as usize * SECTOR_SIZE;
            match buffer.direction() {
                Direction::Read => self.pio_read_multi(buffer, block, n as u16, offset)?,
                Direction::Write => self.pio_write_multi(buffer, block, n as u16, offset)?,
            }
            done += n;
        }
        Ok(())
    }

    fn pio_single_request(
        &self,
        buffer: &mut dyn IoBuffer,
        start_block: u64,
        block_count: u32,
    ) -> SdhciResult {
        for i in 0..block_count {
            let block = start_block + u64::from(i);
            let offset = i as usize * SECTOR_SIZE;
            match buffer.direction() {
                Direction::Read => self.pio_read_single(buffer, block, offset)?,
                Direction::Write => self.pio_write_single(buffer, block, offset)?,
            }
        }
        Ok(())
    }
}
