// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

//! SDHCI register window.
//!
//! The controller exposes a 256-byte little-endian window laid out as in the
//! SD Host Controller Simplified Specification. [`SdhciRegisters`] pins that
//! layout field-for-field (the macro rejects any gap or overlap), and every
//! access goes through a [`RegisterBus`] so the same driver code can run
//! against real MMIO or against a software model.
//!
//! Every read hits the bus. Nothing is cached across a wait loop, since the
//! controller changes these registers behind the driver's back.

use core::{mem::offset_of, ptr::NonNull};

use log::debug;
use tock_registers::{
    LocalRegisterCopy, register_bitfields, register_structs,
    fields::FieldValue,
    registers::{ReadOnly, ReadWrite},
};

register_bitfields! [
    u32,
    /// Present State Register (0x24)
    pub PRESENT_STATE [
        /// Command Inhibit (CMD)
        CMD_INHIBIT OFFSET(0) NUMBITS(1) [],
        /// Command Inhibit (DAT)
        DAT_INHIBIT OFFSET(1) NUMBITS(1) [],
        /// DAT Line Active
        DAT_ACTIVE OFFSET(2) NUMBITS(1) [],
        /// Write Transfer Active
        WRITE_ACTIVE OFFSET(8) NUMBITS(1) [],
        /// Read Transfer Active
        READ_ACTIVE OFFSET(9) NUMBITS(1) [],
        /// Buffer Write Enable
        BUFFER_WRITE_ENABLE OFFSET(10) NUMBITS(1) [],
        /// Buffer Read Enable
        BUFFER_READ_ENABLE OFFSET(11) NUMBITS(1) [],
        /// Card Inserted
        CARD_INSERTED OFFSET(16) NUMBITS(1) [],
        /// Card State Stable
        CARD_STABLE OFFSET(17) NUMBITS(1) [],
        /// Card Detect Pin Level
        CARD_DETECT_PIN OFFSET(18) NUMBITS(1) [],
        /// Write Protect Switch Pin Level (1 = writes enabled)
        WRITE_ENABLED OFFSET(19) NUMBITS(1) [],
        /// DAT[3:0] Line Signal Level
        DAT_LEVEL OFFSET(20) NUMBITS(4) [],
        /// CMD Line Signal Level
        CMD_LEVEL OFFSET(24) NUMBITS(1) []
    ],

    /// Capabilities Register (0x40)
    pub CAPABILITIES [
        /// Timeout Clock Frequency
        TIMEOUT_CLK_FREQ OFFSET(0) NUMBITS(6) [],
        /// Timeout Clock Unit (0=KHz, 1=MHz)
        TIMEOUT_CLK_UNIT OFFSET(7) NUMBITS(1) [],
        /// Base Clock Frequency For SD Clock, in MHz
        BASE_CLK_FREQ OFFSET(8) NUMBITS(8) [],
        /// Max Block Length
        MAX_BLOCK_LEN OFFSET(16) NUMBITS(2) [],
        /// ADMA2 Support
        SUPPORT_ADMA2 OFFSET(19) NUMBITS(1) [],
        /// High Speed Support
        SUPPORT_HIGHSPEED OFFSET(21) NUMBITS(1) [],
        /// SDMA Support
        SUPPORT_SDMA OFFSET(22) NUMBITS(1) [],
        /// Suspend/Resume Support
        SUPPORT_SUSPEND OFFSET(23) NUMBITS(1) [],
        /// Voltage Support 3.3V
        SUPPORT_3V3 OFFSET(24) NUMBITS(1) [],
        /// Voltage Support 3.0V
        SUPPORT_3V0 OFFSET(25) NUMBITS(1) [],
        /// Voltage Support 1.8V
        SUPPORT_1V8 OFFSET(26) NUMBITS(1) [],
        /// 64-bit System Bus Support
        SUPPORT_64BIT OFFSET(28) NUMBITS(1) []
    ]
];

register_bitfields! [
    u16,
    /// Block Size Register (0x04)
    pub BLOCK_SIZE [
        /// Transfer Block Size
        BLOCK_SIZE OFFSET(0) NUMBITS(12) [],
        /// SDMA Buffer Boundary
        SDMA_BOUNDARY OFFSET(12) NUMBITS(3) [
            Boundary4K = 0,
            Boundary8K = 1,
            Boundary16K = 2,
            Boundary32K = 3,
            Boundary64K = 4,
            Boundary128K = 5,
            Boundary256K = 6,
            Boundary512K = 7
        ]
    ],

    /// Transfer Mode Register (0x0C)
    pub TRANSFER_MODE [
        /// DMA Enable
        DMA_ENABLE OFFSET(0) NUMBITS(1) [],
        /// Block Count Enable
        BLOCK_COUNT_ENABLE OFFSET(1) NUMBITS(1) [],
        /// Auto CMD12 Enable
        AUTO_CMD12 OFFSET(2) NUMBITS(1) [],
        /// Data Transfer Direction (1=read, 0=write)
        DATA_DIRECTION OFFSET(4) NUMBITS(1) [
            Write = 0,
            Read = 1
        ],
        /// Multi Block Select
        MULTI_BLOCK OFFSET(5) NUMBITS(1) []
    ],

    /// Command Register (0x0E)
    pub COMMAND [
        /// Response Type
        RESPONSE_TYPE OFFSET(0) NUMBITS(2) [
            None = 0,
            Long136 = 1,
            Short48 = 2,
            Short48Busy = 3
        ],
        /// Command CRC Check Enable
        CRC_CHECK OFFSET(3) NUMBITS(1) [],
        /// Command Index Check Enable
        INDEX_CHECK OFFSET(4) NUMBITS(1) [],
        /// Data Present Select
        DATA_PRESENT OFFSET(5) NUMBITS(1) [],
        /// Command Type
        CMD_TYPE OFFSET(6) NUMBITS(2) [],
        /// Command Index
        CMD_INDEX OFFSET(8) NUMBITS(6) []
    ],

    /// Clock Control Register (0x2C)
    pub CLOCK_CONTROL [
        /// Internal Clock Enable
        INTERNAL_CLK_EN OFFSET(0) NUMBITS(1) [],
        /// Internal Clock Stable
        INTERNAL_CLK_STABLE OFFSET(1) NUMBITS(1) [],
        /// SD Clock Enable
        SD_CLK_EN OFFSET(2) NUMBITS(1) [],
        /// SDCLK Frequency Select
        FREQ_SELECT OFFSET(8) NUMBITS(8) []
    ],

    /// Normal Interrupt Status / Status Enable / Signal Enable (0x30, 0x34, 0x38)
    pub NORMAL_INT [
        /// Command Complete
        CMD_COMPLETE OFFSET(0) NUMBITS(1) [],
        /// Transfer Complete
        TRANSFER_COMPLETE OFFSET(1) NUMBITS(1) [],
        /// Block Gap Event
        BLOCK_GAP OFFSET(2) NUMBITS(1) [],
        /// DMA Interrupt
        DMA_INT OFFSET(3) NUMBITS(1) [],
        /// Buffer Write Ready
        BUFFER_WRITE_READY OFFSET(4) NUMBITS(1) [],
        /// Buffer Read Ready
        BUFFER_READ_READY OFFSET(5) NUMBITS(1) [],
        /// Card Insertion
        CARD_INSERTION OFFSET(6) NUMBITS(1) [],
        /// Card Removal
        CARD_REMOVAL OFFSET(7) NUMBITS(1) [],
        /// Card Interrupt
        CARD_INT OFFSET(8) NUMBITS(1) [],
        /// Error Interrupt (status register only)
        ERROR OFFSET(15) NUMBITS(1) []
    ],

    /// Error Interrupt Status / Status Enable / Signal Enable (0x32, 0x36, 0x3A)
    pub ERROR_INT [
        /// Command Timeout Error
        CMD_TIMEOUT OFFSET(0) NUMBITS(1) [],
        /// Command CRC Error
        CMD_CRC OFFSET(1) NUMBITS(1) [],
        /// Command End Bit Error
        CMD_END_BIT OFFSET(2) NUMBITS(1) [],
        /// Command Index Error
        CMD_INDEX OFFSET(3) NUMBITS(1) [],
        /// Data Timeout Error
        DATA_TIMEOUT OFFSET(4) NUMBITS(1) [],
        /// Data CRC Error
        DATA_CRC OFFSET(5) NUMBITS(1) [],
        /// Data End Bit Error
        DATA_END_BIT OFFSET(6) NUMBITS(1) [],
        /// Current Limit Error
        CURRENT_LIMIT OFFSET(7) NUMBITS(1) [],
        /// Auto CMD12 Error
        AUTO_CMD12 OFFSET(8) NUMBITS(1) [],
        /// ADMA Error
        ADMA OFFSET(9) NUMBITS(1) []
    ]
];

register_bitfields! [
    u8,
    /// Host Control Register (0x28)
    pub HOST_CONTROL [
        /// LED Control
        LED OFFSET(0) NUMBITS(1) [],
        /// Data Transfer Width (1=4-bit)
        DATA_WIDTH_4BIT OFFSET(1) NUMBITS(1) [],
        /// High Speed Enable
        HIGH_SPEED OFFSET(2) NUMBITS(1) [],
        /// DMA Select
        DMA_SELECT OFFSET(3) NUMBITS(2) [
            SDMA = 0,
            ADMA32 = 2,
            ADMA64 = 3
        ]
    ],

    /// Power Control Register (0x29)
    pub POWER_CONTROL [
        /// SD Bus Power
        BUS_POWER OFFSET(0) NUMBITS(1) [],
        /// SD Bus Voltage Select
        BUS_VOLTAGE OFFSET(1) NUMBITS(3) [
            V3_3 = 7,
            V3_0 = 6,
            V1_8 = 5
        ]
    ],

    /// Timeout Control Register (0x2E)
    pub TIMEOUT_CONTROL [
        /// Data Timeout Counter Value (TMCLK x 2^(13+n))
        DATA_TIMEOUT OFFSET(0) NUMBITS(4) []
    ],

    /// Software Reset Register (0x2F)
    pub SOFTWARE_RESET [
        /// Software Reset For All
        RESET_ALL OFFSET(0) NUMBITS(1) [],
        /// Software Reset For CMD Line
        RESET_CMD OFFSET(1) NUMBITS(1) [],
        /// Software Reset For DAT Line
        RESET_DATA OFFSET(2) NUMBITS(1) []
    ]
];

register_structs! {
    /// SDHCI controller register map, one instance per slot.
    pub SdhciRegisters {
        (0x000 => sdma_address: ReadWrite<u32>),
        (0x004 => block_size: ReadWrite<u16, BLOCK_SIZE::Register>),
        (0x006 => block_count: ReadWrite<u16>),
        (0x008 => argument: ReadWrite<u32>),
        (0x00C => transfer_mode: ReadWrite<u16, TRANSFER_MODE::Register>),
        (0x00E => command: ReadWrite<u16, COMMAND::Register>),
        (0x010 => response: [ReadOnly<u32>; 4]),
        (0x020 => buffer_data: ReadWrite<u32>),
        (0x024 => present_state: ReadOnly<u32, PRESENT_STATE::Register>),
        (0x028 => host_control: ReadWrite<u8, HOST_CONTROL::Register>),
        (0x029 => power_control: ReadWrite<u8, POWER_CONTROL::Register>),
        (0x02A => block_gap_control: ReadWrite<u8>),
        (0x02B => wakeup_control: ReadWrite<u8>),
        (0x02C => clock_control: ReadWrite<u16, CLOCK_CONTROL::Register>),
        (0x02E => timeout_control: ReadWrite<u8, TIMEOUT_CONTROL::Register>),
        (0x02F => software_reset: ReadWrite<u8, SOFTWARE_RESET::Register>),
        (0x030 => normal_int_status: ReadWrite<u16, NORMAL_INT::Register>),
        (0x032 => error_int_status: ReadWrite<u16, ERROR_INT::Register>),
        (0x034 => normal_int_status_enable: ReadWrite<u16, NORMAL_INT::Register>),
        (0x036 => error_int_status_enable: ReadWrite<u16, ERROR_INT::Register>),
        (0x038 => normal_int_signal_enable: ReadWrite<u16, NORMAL_INT::Register>),
        (0x03A => error_int_signal_enable: ReadWrite<u16, ERROR_INT::Register>),
        (0x03C => auto_cmd12_error_status: ReadOnly<u16>),
        (0x03E => _reserved0),
        (0x040 => capabilities: ReadOnly<u32, CAPABILITIES::Register>),
        (0x044 => _reserved1),
        (0x048 => max_current_capabilities: ReadOnly<u32>),
        (0x04C => _reserved2),
        (0x050 => force_event_auto_cmd12: ReadWrite<u16>),
        (0x052 => force_event_error_int: ReadWrite<u16>),
        (0x054 => adma_error_status: ReadOnly<u8>),
        (0x055 => _reserved3),
        (0x058 => adma_system_address: ReadWrite<u32>),
        (0x05C => _reserved4),
        (0x0FC => slot_int_status: ReadOnly<u16>),
        (0x0FE => host_version: ReadOnly<u16>),
        (0x100 => @END),
    }
}

/// Size in bytes of the register window of one slot.
pub const REGISTER_WINDOW_SIZE: usize = core::mem::size_of::<SdhciRegisters>();

/// Byte offsets of the registers the driver touches.
pub mod offset {
    use super::*;

    pub const SDMA_ADDRESS: usize = offset_of!(SdhciRegisters, sdma_address);
    pub const BLOCK_SIZE: usize = offset_of!(SdhciRegisters, block_size);
    pub const BLOCK_COUNT: usize = offset_of!(SdhciRegisters, block_count);
    pub const ARGUMENT: usize = offset_of!(SdhciRegisters, argument);
    pub const TRANSFER_MODE: usize = offset_of!(SdhciRegisters, transfer_mode);
    pub const COMMAND: usize = offset_of!(SdhciRegisters, command);
    pub const RESPONSE: usize = offset_of!(SdhciRegisters, response);
    pub const BUFFER_DATA: usize = offset_of!(SdhciRegisters, buffer_data);
    pub const PRESENT_STATE: usize = offset_of!(SdhciRegisters, present_state);
    pub const HOST_CONTROL: usize = offset_of!(SdhciRegisters, host_control);
    pub const POWER_CONTROL: usize = offset_of!(SdhciRegisters, power_control);
    pub const CLOCK_CONTROL: usize = offset_of!(SdhciRegisters, clock_control);
    pub const TIMEOUT_CONTROL: usize = offset_of!(SdhciRegisters, timeout_control);
    pub const SOFTWARE_RESET: usize = offset_of!(SdhciRegisters, software_reset);
    pub const NORMAL_INT_STATUS: usize = offset_of!(SdhciRegisters, normal_int_status);
    pub const ERROR_INT_STATUS: usize = offset_of!(SdhciRegisters, error_int_status);
    pub const NORMAL_INT_STATUS_ENABLE: usize =
        offset_of!(SdhciRegisters, normal_int_status_enable);
    pub const ERROR_INT_STATUS_ENABLE: usize = offset_of!(SdhciRegisters, error_int_status_enable);
    pub const NORMAL_INT_SIGNAL_ENABLE: usize =
        offset_of!(SdhciRegisters, normal_int_signal_enable);
    pub const ERROR_INT_SIGNAL_ENABLE: usize = offset_of!(SdhciRegisters, error_int_signal_enable);
    pub const CAPABILITIES: usize = offset_of!(SdhciRegisters, capabilities);
    pub const MAX_CURRENT_CAPABILITIES: usize =
        offset_of!(SdhciRegisters, max_current_capabilities);
    pub const HOST_VERSION: usize = offset_of!(SdhciRegisters, host_version);
}

/// Raw access to a register window.
///
/// Implementations must perform a real bus access on every call: reads of
/// status registers observe hardware state changes, and writes to the
/// command, reset or status registers trigger them.
pub trait RegisterBus: Send + Sync {
    fn read_u8(&self, offset: usize) -> u8;
    fn read_u16(&self, offset: usize) -> u16;
    fn read_u32(&self, offset: usize) -> u32;
    fn write_u8(&self, offset: usize, value: u8);
    fn write_u16(&self, offset: usize, value: u16);
    fn write_u32(&self, offset: usize, value: u32);
}

/// A register window mapped into the kernel's address space.
pub struct MmioBus {
    base: NonNull<u8>,
}

unsafe impl Send for MmioBus {}
unsafe impl Sync for MmioBus {}

impl MmioBus {
    /// Creates a bus over a mapped register window.
    ///
    /// # Safety
    ///
    /// `base` must point to a device mapping of at least
    /// [`REGISTER_WINDOW_SIZE`] bytes that stays valid for the lifetime of
    /// the bus and is not accessed through any other path.
    pub const unsafe fn new(base: NonNull<u8>) -> Self {
        Self { base }
    }

    #[inline]
    fn ptr<T>(&self, offset: usize) -> *mut T {
        debug_assert!(offset + core::mem::size_of::<T>() <= REGISTER_WINDOW_SIZE);
        unsafe { self.base.as_ptr().add(offset).cast() }
    }
}

impl RegisterBus for MmioBus {
    fn read_u8(&self, offset: usize) -> u8 {
        unsafe { self.ptr::<u8>(offset).read_volatile() }
    }

    fn read_u16(&self, offset: usize) -> u16 {
        u16::from_le(unsafe { self.ptr::<u16>(offset).read_volatile() })
    }

    fn read_u32(&self, offset: usize) -> u32 {
        u32::from_le(unsafe { self.ptr::<u32>(offset).read_volatile() })
    }

    fn write_u8(&self, offset: usize, value: u8) {
        unsafe { self.ptr::<u8>(offset).write_volatile(value) }
    }

    fn write_u16(&self, offset: usize, value: u16) {
        unsafe { self.ptr::<u16>(offset).write_volatile(value.to_le()) }
    }

    fn write_u32(&self, offset: usize, value: u32) {
        unsafe { self.ptr::<u32>(offset).write_volatile(value.to_le()) }
    }
}

/// Typed view over a [`RegisterBus`].
pub struct Registers<B> {
    bus: B,
}

impl<B: RegisterBus> Registers<B> {
    pub const fn new(bus: B) -> Self {
        Self { bus }
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn present_state(&self) -> LocalRegisterCopy<u32, PRESENT_STATE::Register> {
        LocalRegisterCopy::new(self.bus.read_u32(offset::PRESENT_STATE))
    }

    pub fn capabilities(&self) -> LocalRegisterCopy<u32, CAPABILITIES::Register> {
        LocalRegisterCopy::new(self.bus.read_u32(offset::CAPABILITIES))
    }

    /// Specification and vendor version numbers.
    pub fn host_version(&self) -> u16 {
        self.bus.read_u16(offset::HOST_VERSION)
    }

    pub fn normal_int_status(&self) -> LocalRegisterCopy<u16, NORMAL_INT::Register> {
        LocalRegisterCopy::new(self.bus.read_u16(offset::NORMAL_INT_STATUS))
    }

    pub fn error_int_status(&self) -> LocalRegisterCopy<u16, ERROR_INT::Register> {
        LocalRegisterCopy::new(self.bus.read_u16(offset::ERROR_INT_STATUS))
    }

    /// Write-1-to-clear of the normal interrupt status bits in `mask`.
    pub fn clear_normal_int(&self, mask: u16) {
        self.bus.write_u16(offset::NORMAL_INT_STATUS, mask);
    }

    /// Write-1-to-clear of the error interrupt status bits in `mask`.
    pub fn clear_error_int(&self, mask: u16) {
        self.bus.write_u16(offset::ERROR_INT_STATUS, mask);
    }

    pub fn set_normal_int_status_enable(&self, mask: u16) {
        self.bus.write_u16(offset::NORMAL_INT_STATUS_ENABLE, mask);
    }

    pub fn set_error_int_status_enable(&self, mask: u16) {
        self.bus.write_u16(offset::ERROR_INT_STATUS_ENABLE, mask);
    }

    pub fn set_normal_int_signal_enable(&self, mask: u16) {
        self.bus.write_u16(offset::NORMAL_INT_SIGNAL_ENABLE, mask);
    }

    pub fn set_error_int_signal_enable(&self, mask: u16) {
        self.bus.write_u16(offset::ERROR_INT_SIGNAL_ENABLE, mask);
    }

    pub fn set_argument(&self, arg: u32) {
        self.bus.write_u32(offset::ARGUMENT, arg);
    }

    pub fn set_command(&self, value: FieldValue<u16, COMMAND::Register>) {
        self.bus.write_u16(offset::COMMAND, value.value);
    }

    pub fn set_transfer_mode(&self, value: FieldValue<u16, TRANSFER_MODE::Register>) {
        self.bus.write_u16(offset::TRANSFER_MODE, value.value);
    }

    pub fn set_block_size(&self, value: FieldValue<u16, BLOCK_SIZE::Register>) {
        self.bus.write_u16(offset::BLOCK_SIZE, value.value);
    }

    pub fn set_block_count(&self, count: u16) {
        self.bus.write_u16(offset::BLOCK_COUNT, count);
    }

    pub fn set_sdma_address(&self, paddr: u32) {
        self.bus.write_u32(offset::SDMA_ADDRESS, paddr);
    }

    pub fn set_timeout_control(&self, value: FieldValue<u8, TIMEOUT_CONTROL::Register>) {
        self.bus.write_u8(offset::TIMEOUT_CONTROL, value.value);
    }

    /// Response word `index` (0..4) of the last command.
    pub fn response(&self, index: usize) -> u32 {
        self.bus.read_u32(offset::RESPONSE + index * 4)
    }

    /// All four response words, lowest first.
    pub fn response_words(&self) -> [u32; 4] {
        [0, 1, 2, 3].map(|i| self.response(i))
    }

    pub fn read_data_port(&self) -> u32 {
        self.bus.read_u32(offset::BUFFER_DATA)
    }

    pub fn write_data_port(&self, value: u32) {
        self.bus.write_u32(offset::BUFFER_DATA, value);
    }

    pub fn host_control(&self) -> LocalRegisterCopy<u8, HOST_CONTROL::Register> {
        LocalRegisterCopy::new(self.bus.read_u8(offset::HOST_CONTROL))
    }

    /// Read-modify-write of the host control register.
    pub fn modify_host_control(&self, value: FieldValue<u8, HOST_CONTROL::Register>) {
        let mut reg = self.host_control();
        reg.modify(value);
        self.bus.write_u8(offset::HOST_CONTROL, reg.get());
    }

    pub fn power_control(&self) -> LocalRegisterCopy<u8, POWER_CONTROL::Register> {
        LocalRegisterCopy::new(self.bus.read_u8(offset::POWER_CONTROL))
    }

    pub fn set_power_control(&self, value: u8) {
        self.bus.write_u8(offset::POWER_CONTROL, value);
    }

    pub fn clock_control(&self) -> LocalRegisterCopy<u16, CLOCK_CONTROL::Register> {
        LocalRegisterCopy::new(self.bus.read_u16(offset::CLOCK_CONTROL))
    }

    pub fn set_clock_control(&self, value: u16) {
        self.bus.write_u16(offset::CLOCK_CONTROL, value);
    }

    pub fn software_reset(&self) -> LocalRegisterCopy<u8, SOFTWARE_RESET::Register> {
        LocalRegisterCopy::new(self.bus.read_u8(offset::SOFTWARE_RESET))
    }

    pub fn set_software_reset(&self, value: FieldValue<u8, SOFTWARE_RESET::Register>) {
        self.bus.write_u8(offset::SOFTWARE_RESET, value.value);
    }

    /// Logs the registers that matter when diagnosing a stuck transfer.
    pub fn dump(&self) {
        debug!("sdhci: ==== register dump ====");
        debug!(
            "sdhci: sdma_addr={:#010x} blk_size={:#06x} blk_cnt={}",
            self.bus.read_u32(offset::SDMA_ADDRESS),
            self.bus.read_u16(offset::BLOCK_SIZE),
            self.bus.read_u16(offset::BLOCK_COUNT),
        );
        debug!(
            "sdhci: argument={:#010x} xfer_mode={:#06x} command={:#06x}",
            self.bus.read_u32(offset::ARGUMENT),
            self.bus.read_u16(offset::TRANSFER_MODE),
            self.bus.read_u16(offset::COMMAND),
        );
        debug!(
            "sdhci: present={:#010x} host_ctl={:#04x} power={:#04x} clock={:#06x}",
            self.present_state().get(),
            self.host_control().get(),
            self.power_control().get(),
            self.clock_control().get(),
        );
        debug!(
            "sdhci: int_status={:#06x} err_status={:#06x} caps={:#010x} max_current={:#010x}",
            self.normal_int_status().get(),
            self.error_int_status().get(),
            self.capabilities().get(),
            self.bus.read_u32(offset::MAX_CURRENT_CAPABILITIES),
        );
        debug!("sdhci: version={:#06x}", self.host_version());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_window_is_256_bytes() {
        assert_eq!(REGISTER_WINDOW_SIZE, 0x100);
    }

    #[test]
    fn offsets_match_standard_layout() {
        assert_eq!(offset::SDMA_ADDRESS, 0x00);
        assert_eq!(offset::BLOCK_SIZE, 0x04);
        assert_eq!(offset::BLOCK_COUNT, 0x06);
        assert_eq!(offset::ARGUMENT, 0x08);
        assert_eq!(offset::TRANSFER_MODE, 0x0C);
        assert_eq!(offset::COMMAND, 0x0E);
        assert_eq!(offset::RESPONSE, 0x10);
        assert_eq!(offset::BUFFER_DATA, 0x20);
        assert_eq!(offset::PRESENT_STATE, 0x24);
        assert_eq!(offset::HOST_CONTROL, 0x28);
        assert_eq!(offset::POWER_CONTROL, 0x29);
        assert_eq!(offset::CLOCK_CONTROL, 0x2C);
        assert_eq!(offset::TIMEOUT_CONTROL, 0x2E);
        assert_eq!(offset::SOFTWARE_RESET, 0x2F);
        assert_eq!(offset::NORMAL_INT_STATUS, 0x30);
        assert_eq!(offset::ERROR_INT_STATUS, 0x32);
        assert_eq!(offset::NORMAL_INT_STATUS_ENABLE, 0x34);
        assert_eq!(offset::ERROR_INT_STATUS_ENABLE, 0x36);
        assert_eq!(offset::NORMAL_INT_SIGNAL_ENABLE, 0x38);
        assert_eq!(offset::ERROR_INT_SIGNAL_ENABLE, 0x3A);
        assert_eq!(offset::CAPABILITIES, 0x40);
        assert_eq!(offset::MAX_CURRENT_CAPABILITIES, 0x48);
        assert_eq!(offset::HOST_VERSION, 0xFE);
    }

    #[test]
    fn power_codes() {
        let v33 = POWER_CONTROL::BUS_VOLTAGE::V3_3;
        assert_eq!(v33.value, 0x0E);
        assert_eq!((v33 + POWER_CONTROL::BUS_POWER::SET).value, 0x0F);
        assert_eq!(POWER_CONTROL::BUS_VOLTAGE::V3_0.value, 0x0C);
        assert_eq!(POWER_CONTROL::BUS_VOLTAGE::V1_8.value, 0x0A);
    }

    /// Register file backed by plain memory.
    struct RamBus(spin::Mutex<[u8; REGISTER_WINDOW_SIZE]>);

    impl RegisterBus for RamBus {
        fn read_u8(&self, offset: usize) -> u8 {
            self.0.lock()[offset]
        }

        fn read_u16(&self, offset: usize) -> u16 {
            let regs = self.0.lock();
            u16::from_le_bytes([regs[offset], regs[offset + 1]])
        }

        fn read_u32(&self, offset: usize) -> u32 {
            let regs = self.0.lock();
            u32::from_le_bytes([regs[offset], regs[offset + 1], regs[offset + 2], regs[offset + 3]])
        }

        fn write_u8(&self, offset: usize, value: u8) {
            self.0.lock()[offset] = value;
        }

        fn write_u16(&self, offset: usize, value: u16) {
            self.0.lock()[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
        }

        fn write_u32(&self, offset: usize, value: u32) {
            self.0.lock()[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
        }
    }

    #[test]
    fn host_version_reads_last_halfword() {
        let regs = Registers::new(RamBus(spin::Mutex::new([0; REGISTER_WINDOW_SIZE])));
        regs.bus().write_u16(offset::HOST_VERSION, 0x9902);
        regs.bus().write_u16(offset::HOST_VERSION - 2, 0x0001);
        assert_eq!(regs.host_version(), 0x9902);
    }

    #[test]
    fn sdma_boundary_32k() {
        let v = BLOCK_SIZE::BLOCK_SIZE.val(512) + BLOCK_SIZE::SDMA_BOUNDARY::Boundary32K;
        assert_eq!(v.value, 0x3200);
    }
}
