// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

//! Software model of an SDHCI controller with one SD card slot, and a HAL
//! running on a virtual clock.

#![allow(dead_code)]

use std::{
    alloc::{self, Layout},
    future::Future,
    pin::Pin,
    ptr::{self, NonNull},
    sync::{
        Arc, Mutex, MutexGuard,
        atomic::{AtomicU64, AtomicUsize, Ordering},
    },
    task::{Context, Wake, Waker},
    thread::{self, Thread},
    time::Duration,
};

use event_listener::EventListener;
use sdhci::{
    DmaRegion, RegisterBus, SdhciConfig, SdhciHal, SdhciHost, regs::offset,
    response_from_register,
};

pub const RCA: u16 = 0xB368;
pub const CARD_BLOCKS: usize = 4096;
pub const BLOCK: usize = 512;

const CC: u16 = 1 << 0;
const XC: u16 = 1 << 1;
const DMA_INT: u16 = 1 << 3;
const BWR: u16 = 1 << 4;
const BRR: u16 = 1 << 5;
const ERROR: u16 = 1 << 15;

const CMD_TIMEOUT_ERROR: u16 = 1 << 0;
const DATA_CRC_ERROR: u16 = 1 << 5;

const DMA_STEP_BLOCKS: u32 = 64;

/// Card-side state of the model.
#[derive(Clone)]
pub struct CardModel {
    pub cid: [u32; 4],
    pub csd: [u32; 4],
    pub high_capacity: bool,
    /// Leaves SEND_IF_COND unanswered and the command line inhibited until
    /// a command reset.
    pub legacy: bool,
    /// SD_SEND_OP_COND calls answered busy before the card reports ready.
    pub busy_polls: u32,
    pub reject_bus_width: bool,
    pub write_protected: bool,
    pub data: Vec<u8>,
}

impl CardModel {
    /// Version 2.0 high-capacity card, CSD structure 1.
    pub fn sdhc() -> Self {
        let csd = (1u128 << 126) | (9 << 80) | (3 << 48) | 1;
        Self::new(response_from_register(csd), true, false)
    }

    /// Standard-capacity card, CSD structure 0, 4096 blocks.
    pub fn sdsc() -> Self {
        let csd = (9u128 << 80) | (1023 << 62) | 1;
        Self::new(response_from_register(csd), false, false)
    }

    /// Version 1.x card that ignores SEND_IF_COND.
    pub fn legacy() -> Self {
        let mut card = Self::sdsc();
        card.legacy = true;
        card
    }

    fn new(csd: [u32; 4], high_capacity: bool, legacy: bool) -> Self {
        let mut data = vec![0u8; CARD_BLOCKS * BLOCK];
        fastrand::fill(&mut data);
        Self {
            cid: cid_words(0x1234_5678),
            csd,
            high_capacity,
            legacy,
            busy_polls: 2,
            reject_bus_width: false,
            write_protected: false,
            data,
        }
    }

    /// High-capacity card whose CSD reports `c_size`. Only the first
    /// [`CARD_BLOCKS`] blocks hold data.
    pub fn sdhc_with_c_size(c_size: u32) -> Self {
        let csd = (1u128 << 126) | (9 << 80) | (u128::from(c_size) << 48) | 1;
        Self::new(response_from_register(csd), true, false)
    }

    pub fn with_serial(mut self, serial: u32) -> Self {
        self.cid = cid_words(serial);
        self
    }

    pub fn block(&self, n: usize) -> &[u8] {
        &self.data[n * BLOCK..(n + 1) * BLOCK]
    }

    pub fn blocks(&self, start: usize, count: usize) -> &[u8] {
        &self.data[start * BLOCK..(start + count) * BLOCK]
    }
}

fn cid_words(serial: u32) -> [u32; 4] {
    let mut reg: u128 = 0x03 << 120;
    reg |= u128::from(u16::from_be_bytes(*b"SD")) << 104;
    for (i, b) in b"SIM01".iter().enumerate() {
        reg |= u128::from(*b) << (96 - 8 * i);
    }
    reg |= 0x10 << 56;
    reg |= u128::from(serial) << 24;
    reg |= 0x186 << 8;
    reg |= 1;
    response_from_register(reg)
}

/// Faults the model injects on request.
#[derive(Debug, Default, Clone)]
pub struct Faults {
    /// Raises a data CRC error instead of completing this command index.
    pub error_on_command: Option<u8>,
    /// Swallows the next `n` commands with this index: no completion, no data.
    pub swallow: Option<(u8, u32)>,
    /// Completes data commands but never moves any data.
    pub stall_data: bool,
    /// Raises a data CRC error when the data phase starts.
    pub data_error: bool,
    /// Holds SDMA progress until [`FakeSdhci::release_dma`].
    pub hold_dma: bool,
    /// Sets `hold_dma` once this many SDMA chunks have moved.
    pub hold_after_steps: Option<u32>,
    /// Virtual time each SDMA chunk takes.
    pub step_time: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandRecord {
    pub index: u8,
    pub app: bool,
    pub arg: u32,
    pub command: u16,
    pub transfer_mode: u16,
}

struct Pio {
    read: bool,
    block: usize,
    remaining: u32,
    word: usize,
    buf: [u8; BLOCK],
}

struct Dma {
    read: bool,
    block: usize,
    remaining: u32,
}

struct State {
    regs: [u8; 256],
    capabilities: u32,
    card: Option<CardModel>,
    normal: u16,
    error: u16,
    cmd_inhibit: bool,
    app_cmd: bool,
    op_cond_polls: u32,
    pio: Option<Pio>,
    dma: Option<Dma>,
    dma_regions: Vec<(u32, usize, usize)>,
    faults: Faults,
    commands: Vec<CommandRecord>,
    sdma_writes: Vec<u32>,
    power_writes: Vec<u8>,
    clock_writes: Vec<u16>,
    resets: Vec<u8>,
    dma_steps: u32,
    clock: Option<Arc<AtomicU64>>,
}

/// The controller model. Shared between the bus handed to the driver and the
/// test body.
pub struct FakeSdhci {
    state: Mutex<State>,
}

impl FakeSdhci {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(State {
                regs: [0; 256],
                // 50 MHz base clock, high speed, SDMA, 3.3 V.
                capabilities: (50 << 8) | (1 << 21) | (1 << 22) | (1 << 24),
                card: None,
                normal: 0,
                error: 0,
                cmd_inhibit: false,
                app_cmd: false,
                op_cond_polls: 0,
                pio: None,
                dma: None,
                dma_regions: Vec::new(),
                faults: Faults::default(),
                commands: Vec::new(),
                sdma_writes: Vec::new(),
                power_writes: Vec::new(),
                clock_writes: Vec::new(),
                resets: Vec::new(),
                dma_steps: 0,
                clock: None,
            }),
        })
    }

    pub fn with_card(card: CardModel) -> Arc<Self> {
        let fake = Self::new();
        fake.insert(card);
        fake
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub fn insert(&self, card: CardModel) {
        self.state().card = Some(card);
    }

    pub fn remove(&self) -> Option<CardModel> {
        let mut st = self.state();
        st.pio = None;
        st.dma = None;
        st.card.take()
    }

    pub fn card<R>(&self, f: impl FnOnce(&mut CardModel) -> R) -> R {
        f(self.state().card.as_mut().expect("no card in slot"))
    }

    pub fn set_capabilities(&self, caps: u32) {
        self.state().capabilities = caps;
    }

    pub fn faults<R>(&self, f: impl FnOnce(&mut Faults) -> R) -> R {
        f(&mut self.state().faults)
    }

    pub fn commands(&self) -> Vec<CommandRecord> {
        self.state().commands.clone()
    }

    /// Issued commands as `(app, index)`.
    pub fn command_indices(&self) -> Vec<(bool, u8)> {
        self.state()
            .commands
            .iter()
            .map(|c| (c.app, c.index))
            .collect()
    }

    pub fn count_commands(&self, app: bool, index: u8) -> usize {
        self.state()
            .commands
            .iter()
            .filter(|c| c.app == app && c.index == index)
            .count()
    }

    pub fn sdma_writes(&self) -> Vec<u32> {
        self.state().sdma_writes.clone()
    }

    pub fn power_writes(&self) -> Vec<u8> {
        self.state().power_writes.clone()
    }

    pub fn clock_writes(&self) -> Vec<u16> {
        self.state().clock_writes.clone()
    }

    pub fn resets(&self) -> Vec<u8> {
        self.state().resets.clone()
    }

    pub fn host_control(&self) -> u8 {
        self.state().regs[offset::HOST_CONTROL]
    }

    pub fn clear_logs(&self) {
        let mut st = self.state();
        st.commands.clear();
        st.sdma_writes.clear();
        st.power_writes.clear();
        st.clock_writes.clear();
        st.resets.clear();
    }

    /// Shares the HAL's virtual clock so data movement can take time.
    pub fn attach_clock(&self, clock: Arc<AtomicU64>) {
        self.state().clock = Some(clock);
    }

    /// Lets held SDMA progress and moves the next chunk right away.
    pub fn release_dma(&self) {
        let mut st = self.state();
        st.faults.hold_dma = false;
        st.dma_step();
    }

    pub fn map_dma(&self, paddr: u32, vaddr: *mut u8, len: usize) {
        self.state().dma_regions.push((paddr, vaddr as usize, len));
    }

    pub fn unmap_dma(&self, paddr: u32) {
        self.state().dma_regions.retain(|r| r.0 != paddr);
    }

    fn read(&self, off: usize, width: usize) -> u32 {
        let mut st = self.state();
        match (off, width) {
            (o, 4) if o == offset::PRESENT_STATE => st.present_state(),
            (o, 4) if o == offset::CAPABILITIES => st.capabilities,
            (o, 4) if o == offset::BUFFER_DATA => st.read_port(),
            (o, 2) if o == offset::NORMAL_INT_STATUS => {
                st.advance_dma();
                u32::from(st.normal_status())
            }
            (o, 2) if o == offset::ERROR_INT_STATUS => u32::from(st.error),
            (o, 2) if o == offset::CLOCK_CONTROL => {
                let clk = st.reg16(o);
                // Internal clock is stable as soon as it is enabled.
                u32::from(if clk & 1 != 0 { clk | 2 } else { clk })
            }
            (o, 1) if o == offset::SOFTWARE_RESET => 0,
            (o, 2) if o == offset::HOST_VERSION => 0x0002,
            _ => {
                let mut bytes = [0u8; 4];
                bytes[..width].copy_from_slice(&st.regs[off..off + width]);
                u32::from_le_bytes(bytes)
            }
        }
    }

    fn write(&self, off: usize, width: usize, value: u32) {
        let mut st = self.state();
        match (off, width) {
            (o, 2) if o == offset::NORMAL_INT_STATUS => st.normal &= !(value as u16),
            (o, 2) if o == offset::ERROR_INT_STATUS => st.error &= !(value as u16),
            (o, 4) if o == offset::BUFFER_DATA => st.write_port(value),
            (o, 1) if o == offset::SOFTWARE_RESET => st.software_reset(value as u8),
            (o, 2) if o == offset::COMMAND => {
                st.store(off, width, value);
                st.command(value as u16);
            }
            _ => {
                st.store(off, width, value);
                if off == offset::SDMA_ADDRESS {
                    st.sdma_writes.push(value);
                } else if off == offset::POWER_CONTROL {
                    st.power_writes.push(value as u8);
                } else if off == offset::CLOCK_CONTROL {
                    st.clock_writes.push(value as u16);
                }
            }
        }
    }
}

impl State {
    fn store(&mut self, off: usize, width: usize, value: u32) {
        self.regs[off..off + width].copy_from_slice(&value.to_le_bytes()[..width]);
    }

    fn reg16(&self, off: usize) -> u16 {
        u16::from_le_bytes([self.regs[off], self.regs[off + 1]])
    }

    fn reg32(&self, off: usize) -> u32 {
        u32::from_le_bytes([
            self.regs[off],
            self.regs[off + 1],
            self.regs[off + 2],
            self.regs[off + 3],
        ])
    }

    fn normal_status(&self) -> u16 {
        if self.error != 0 {
            self.normal | ERROR
        } else {
            self.normal
        }
    }

    fn present_state(&self) -> u32 {
        let mut state = 0;
        if self.cmd_inhibit {
            state |= 1 << 0;
        }
        match &self.pio {
            Some(pio) if pio.read => state |= 1 << 11,
            Some(_) => state |= 1 << 10,
            None => {}
        }
        if let Some(card) = &self.card {
            state |= (1 << 16) | (1 << 17) | (1 << 18);
            if !card.write_protected {
                state |= 1 << 19;
            }
        }
        state
    }

    fn software_reset(&mut self, value: u8) {
        self.resets.push(value);
        if value & 1 != 0 {
            self.regs = [0; 256];
            self.normal = 0;
            self.error = 0;
            self.app_cmd = false;
        }
        if value & 0b011 != 0 {
            self.cmd_inhibit = false;
        }
        if value & 0b101 != 0 {
            self.pio = None;
            self.dma = None;
            self.normal &= !(XC | DMA_INT | BRR | BWR);
        }
    }

    fn command(&mut self, value: u16) {
        let index = ((value >> 8) & 0x3F) as u8;
        let arg = self.reg32(offset::ARGUMENT);
        let mode = self.reg16(offset::TRANSFER_MODE);
        let app = std::mem::take(&mut self.app_cmd);
        self.commands.push(CommandRecord {
            index,
            app,
            arg,
            command: value,
            transfer_mode: mode,
        });

        if let Some((idx, n)) = &mut self.faults.swallow
            && *idx == index
            && *n > 0
        {
            *n -= 1;
            return;
        }
        if self.faults.error_on_command == Some(index) {
            self.error |= DATA_CRC_ERROR;
            return;
        }
        let Some(card) = self.card.as_ref() else {
            self.error |= CMD_TIMEOUT_ERROR;
            return;
        };

        let mut resp = [0u32; 4];
        let mut data = false;
        match (app, index) {
            (_, 0) => self.op_cond_polls = 0,
            (false, 8) => {
                if card.legacy {
                    self.cmd_inhibit = true;
                    return;
                }
                resp[0] = arg & 0xFFF;
            }
            (_, 55) => {
                self.app_cmd = true;
                resp[0] = (1 << 5) | (1 << 8);
            }
            (true, 41) => {
                self.op_cond_polls += 1;
                let mut ocr = 0x00FF_8000;
                if self.op_cond_polls > card.busy_polls {
                    ocr |= 1 << 31;
                    if card.high_capacity && arg & (1 << 30) != 0 {
                        ocr |= 1 << 30;
                    }
                }
                resp[0] = ocr;
            }
            (false, 2) => resp = card.cid,
            (false, 3) => resp[0] = u32::from(RCA) << 16,
            (false, 9) => resp = card.csd,
            (true, 6) => {
                resp[0] = if card.reject_bus_width {
                    1 << 22
                } else {
                    0x0920
                }
            }
            (false, 17 | 18 | 24 | 25) => {
                resp[0] = 0x0900;
                data = true;
            }
            _ => resp[0] = 0x0900,
        }
        for (i, word) in resp.iter().enumerate() {
            self.store(offset::RESPONSE + i * 4, 4, *word);
        }
        self.normal |= CC;
        if data {
            self.start_data(index, arg, mode);
        }
    }

    fn start_data(&mut self, index: u8, arg: u32, mode: u16) {
        let Some(card) = self.card.as_ref() else {
            return;
        };
        let block = if card.high_capacity {
            arg as usize
        } else {
            assert_eq!(arg as usize % BLOCK, 0, "unaligned byte address {arg:#x}");
            arg as usize / BLOCK
        };
        let count = match index {
            17 | 24 => 1,
            _ => u32::from(self.reg16(offset::BLOCK_COUNT)),
        };
        let read = matches!(index, 17 | 18);
        if self.faults.stall_data {
            return;
        }

        if mode & 1 != 0 {
            self.dma = Some(Dma {
                read,
                block,
                remaining: count,
            });
            return;
        }
        if self.faults.data_error {
            self.error |= DATA_CRC_ERROR;
            return;
        }
        let mut pio = Pio {
            read,
            block,
            remaining: count,
            word: 0,
            buf: [0; BLOCK],
        };
        if read {
            pio.buf.copy_from_slice(&card.data[block * BLOCK..(block + 1) * BLOCK]);
            self.normal |= BRR;
        } else {
            self.normal |= BWR;
        }
        self.pio = Some(pio);
    }

    fn read_port(&mut self) -> u32 {
        let Some(pio) = self.pio.as_mut() else {
            return 0;
        };
        let at = pio.word * 4;
        let word = u32::from_le_bytes([
            pio.buf[at],
            pio.buf[at + 1],
            pio.buf[at + 2],
            pio.buf[at + 3],
        ]);
        pio.word += 1;
        if pio.word == BLOCK / 4 {
            pio.word = 0;
            pio.block += 1;
            pio.remaining -= 1;
            if pio.remaining == 0 {
                self.pio = None;
                self.normal |= XC;
            } else if let Some(card) = &self.card {
                let b = pio.block;
                pio.buf.copy_from_slice(&card.data[b * BLOCK..(b + 1) * BLOCK]);
                self.normal |= BRR;
            }
        }
        word
    }

    fn write_port(&mut self, value: u32) {
        let Some(pio) = self.pio.as_mut() else {
            return;
        };
        let at = pio.word * 4;
        pio.buf[at..at + 4].copy_from_slice(&value.to_le_bytes());
        pio.word += 1;
        if pio.word == BLOCK / 4 {
            if let Some(card) = self.card.as_mut() {
                let b = pio.block;
                card.data[b * BLOCK..(b + 1) * BLOCK].copy_from_slice(&pio.buf);
            }
            pio.word = 0;
            pio.block += 1;
            pio.remaining -= 1;
            if pio.remaining == 0 {
                self.pio = None;
                self.normal |= XC;
            } else {
                self.normal |= BWR;
            }
        }
    }

    /// The data phase runs while the driver polls, once it has acknowledged
    /// command completion and the previous DMA interrupt.
    fn advance_dma(&mut self) {
        if self.dma.is_some() && !self.faults.hold_dma && self.normal & (CC | DMA_INT | XC) == 0 {
            self.dma_step();
        }
    }

    fn dma_step(&mut self) {
        if self.dma.is_none() {
            return;
        }
        if self.faults.hold_after_steps.is_some_and(|limit| self.dma_steps >= limit) {
            self.faults.hold_dma = true;
            return;
        }
        let Some(mut dma) = self.dma.take() else {
            return;
        };
        self.dma_steps += 1;
        if let Some(clock) = &self.clock {
            clock.fetch_add(self.faults.step_time.as_nanos() as u64, Ordering::SeqCst);
        }
        if self.faults.data_error {
            self.error |= DATA_CRC_ERROR;
            return;
        }
        let paddr = self.reg32(offset::SDMA_ADDRESS);
        let (_, vaddr, len) = *self
            .dma_regions
            .iter()
            .find(|r| r.0 == paddr)
            .unwrap_or_else(|| panic!("SDMA address {paddr:#x} is not mapped"));
        let n = dma.remaining.min(DMA_STEP_BLOCKS) as usize;
        assert!(n * BLOCK <= len);
        let card = self.card.as_mut().expect("no card in slot");
        let range = dma.block * BLOCK..(dma.block + n) * BLOCK;
        unsafe {
            if dma.read {
                ptr::copy_nonoverlapping(card.data[range].as_ptr(), vaddr as *mut u8, n * BLOCK);
            } else {
                ptr::copy_nonoverlapping(
                    vaddr as *const u8,
                    card.data[range].as_mut_ptr(),
                    n * BLOCK,
                );
            }
        }
        dma.block += n;
        dma.remaining -= n as u32;
        if dma.remaining == 0 {
            self.normal |= XC;
        } else {
            self.normal |= DMA_INT;
            self.dma = Some(dma);
        }
    }
}

/// Register window of a [`FakeSdhci`].
#[derive(Clone)]
pub struct FakeBus(pub Arc<FakeSdhci>);

impl RegisterBus for FakeBus {
    fn read_u8(&self, offset: usize) -> u8 {
        self.0.read(offset, 1) as u8
    }

    fn read_u16(&self, offset: usize) -> u16 {
        self.0.read(offset, 2) as u16
    }

    fn read_u32(&self, offset: usize) -> u32 {
        self.0.read(offset, 4)
    }

    fn write_u8(&self, offset: usize, value: u8) {
        self.0.write(offset, 1, u32::from(value));
    }

    fn write_u16(&self, offset: usize, value: u16) {
        self.0.write(offset, 2, u32::from(value));
    }

    fn write_u32(&self, offset: usize, value: u32) {
        self.0.write(offset, 4, value);
    }
}

struct ThreadWaker(Thread);

impl Wake for ThreadWaker {
    fn wake(self: Arc<Self>) {
        self.0.unpark();
    }
}

/// HAL on a virtual clock. Delays advance the clock instantly; a blocked
/// wait advances it in 50 ms steps per millisecond of real time.
pub struct TestHal {
    pub fake: Arc<FakeSdhci>,
    clock: Arc<AtomicU64>,
    dma_base: u64,
    next_dma: AtomicU64,
    pub live_allocations: Arc<AtomicUsize>,
}

impl TestHal {
    pub fn new(fake: Arc<FakeSdhci>) -> Self {
        Self::with_dma_base(fake, 0x8000_0000)
    }

    pub fn with_dma_base(fake: Arc<FakeSdhci>, dma_base: u64) -> Self {
        let clock = Arc::new(AtomicU64::new(0));
        fake.attach_clock(clock.clone());
        Self {
            fake,
            clock,
            dma_base,
            next_dma: AtomicU64::new(0),
            live_allocations: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn advance(&self, d: Duration) {
        self.clock.fetch_add(d.as_nanos() as u64, Ordering::SeqCst);
    }
}

impl SdhciHal for TestHal {
    type Bus = FakeBus;
    type RawMutex = spin::Mutex<()>;

    fn now(&self) -> Duration {
        Duration::from_nanos(self.clock.load(Ordering::SeqCst))
    }

    fn delay(&self, duration: Duration) {
        self.advance(duration);
    }

    fn block_until(&self, mut listener: EventListener, deadline: Duration) -> bool {
        let waker = Waker::from(Arc::new(ThreadWaker(thread::current())));
        let mut cx = Context::from_waker(&waker);
        loop {
            if Pin::new(&mut listener).poll(&mut cx).is_ready() {
                return true;
            }
            if self.now() >= deadline {
                return false;
            }
            thread::park_timeout(Duration::from_millis(1));
            self.advance(Duration::from_millis(50));
        }
    }

    fn dma_alloc(&self, size: usize, align: usize) -> Option<DmaRegion> {
        let layout = Layout::from_size_align(size, align).ok()?;
        let vaddr = NonNull::new(unsafe { alloc::alloc_zeroed(layout) })?;
        let paddr = self.dma_base + self.next_dma.fetch_add(size as u64, Ordering::SeqCst);
        if let Ok(bus) = u32::try_from(paddr) {
            self.fake.map_dma(bus, vaddr.as_ptr(), size);
        }
        self.live_allocations.fetch_add(1, Ordering::SeqCst);
        Some(DmaRegion { paddr, vaddr, size })
    }

    unsafe fn dma_dealloc(&self, region: DmaRegion) {
        if let Ok(bus) = u32::try_from(region.paddr) {
            self.fake.unmap_dma(bus);
        }
        self.live_allocations.fetch_sub(1, Ordering::SeqCst);
        let layout = Layout::from_size_align(region.size, region.size.next_power_of_two())
            .expect("bad layout");
        unsafe { alloc::dealloc(region.vaddr.as_ptr(), layout) };
    }
}

/// Attaches a driver to a model holding `card`.
pub fn attach(card: CardModel, config: SdhciConfig) -> (SdhciHost<TestHal>, Arc<FakeSdhci>) {
    let fake = FakeSdhci::with_card(card);
    let hal = TestHal::new(fake.clone());
    let host = SdhciHost::new(hal, FakeBus(fake.clone()), config).expect("attach failed");
    (host, fake)
}

/// Every feature off; tests enable what they exercise.
pub fn base_config() -> SdhciConfig {
    SdhciConfig::from_features()
        .with_read_only(false)
        .with_wide_bus(false)
        .with_high_speed(false)
        .with_multi_block(false)
        .with_sdma(false)
        .with_reset_war(false)
}
