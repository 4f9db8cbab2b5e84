//! Common definitions shared by the distance-squared accelerator firmware,
//! the host tools and the hardware model.
//!
//! This module provides the memory map of the system-on-chip, the device
//! parameter tables that describe which peripherals exist and how they were
//! synthesized, and the vector length the accelerator was built for.

#![no_std]

/// Number of `f64` elements in each input vector.
///
/// The accelerator kernel is synthesized for a fixed trip count, so hardware
/// and software must agree on this value at compile time.
pub const VECTOR_LEN: usize = 256;

// Memory-mapped I/O address space definitions for the system-on-chip.
//
// Defines the physical address layout for the interrupt controller, the two
// DMA engines, the accelerator control bus and the debug peripherals. These
// addresses must match the hardware block design.
pub mod mmio {
    /// Base address of the CLINT (Core Local Interruptor) in QEMU 'virt' machine.
    pub const CLINT_BASE: usize = 0x200_0000;

    /// Memory-mapped address for the machine timer compare register.
    pub const MTIMECMP_ADDR: usize = CLINT_BASE + 0x4000;

    /// Memory-mapped address for the machine timer counter register.
    ///
    /// This 64-bit register increments at a fixed frequency (10 MHz in QEMU)
    /// and is the time base for completion deadlines.
    pub const MTIME_ADDR: usize = CLINT_BASE + 0xBFF8;

    /// Base address of the platform-level interrupt controller (PLIC).
    pub const PLIC_BASE: usize = 0x0C00_0000;

    /// Base address of the 16550-compatible debug UART.
    pub const UART0_BASE: usize = 0x1000_0000;

    /// Address of the QEMU test finisher used to terminate simulation.
    pub const TEST_FINISHER: usize = 0x10_0000;

    /// Register window of the DMA engine streaming vector A.
    pub const DMA_A_BASE: usize = 0x4040_0000;

    /// Register window of the DMA engine streaming vector B.
    pub const DMA_B_BASE: usize = 0x4041_0000;

    /// AXI-Lite control bus of the distance-squared accelerator.
    pub const DISTANCE_SQUARED_BASE: usize = 0x43C0_0000;

    /// Base address of high RAM region.
    pub const RAM_BASE: usize = 0x8000_0000;
}

/// Device parameters for the peripherals present in the hardware design.
///
/// Each driver looks up its configuration by device identifier in these
/// tables before touching any register. A missing entry means the
/// peripheral was not synthesized into the bitstream.
pub mod params {
    use crate::mmio;

    /// Device identifier of the single interrupt controller.
    pub const PLIC_DEVICE_ID: u16 = 0;

    /// Number of interrupt sources wired into the PLIC, including the
    /// reserved source 0.
    pub const PLIC_NUM_SOURCES: u32 = 64;

    /// PLIC context of hart 0 in machine mode.
    pub const PLIC_HART0_M_CONTEXT: u32 = 0;

    /// Device identifier of the DMA engine feeding vector A.
    pub const DMA_A_DEVICE_ID: u16 = 0;

    /// Device identifier of the DMA engine feeding vector B.
    pub const DMA_B_DEVICE_ID: u16 = 1;

    /// Device identifier of the distance-squared accelerator.
    pub const DISTANCE_SQUARED_DEVICE_ID: u16 = 0;

    /// Interrupt line of the accelerator's `interrupt` output.
    pub const DISTANCE_SQUARED_IRQ: u32 = 61;

    /// Machine timer ticks per millisecond.
    pub const MTIME_TICKS_PER_MS: u64 = 10_000;

    /// Static configuration of a PLIC instance.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct IntcConfig {
        pub device_id: u16,
        pub base_addr: usize,
        /// Hart context whose enable bits, threshold and claim register
        /// are used.
        pub context: u32,
        pub num_sources: u32,
    }

    /// Static configuration of an AXI DMA engine.
    ///
    /// Whether the engine was built with the scatter-gather engine is not
    /// part of the table; drivers probe it from the status register.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DmaConfig {
        pub device_id: u16,
        pub base_addr: usize,
        /// Memory-map to stream (host to device) channel present.
        pub has_mm2s: bool,
        /// Stream to memory-map (device to host) channel present.
        pub has_s2mm: bool,
        /// Memory-mapped data width in bytes.
        pub data_width: usize,
        /// Data realignment engine present; without it buffer addresses must
        /// be aligned to `data_width`.
        pub has_dre: bool,
        /// Largest byte count accepted by the length register.
        pub max_transfer_len: usize,
    }

    /// Static configuration of the accelerator's control bus.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AcceleratorConfig {
        pub device_id: u16,
        pub base_addr: usize,
    }

    /// Width of the DMA length register in bits.
    const DMA_LENGTH_WIDTH: u32 = 23;

    pub static INTC_CONFIG_TABLE: [IntcConfig; 1] = [IntcConfig {
        device_id: PLIC_DEVICE_ID,
        base_addr: mmio::PLIC_BASE,
        context: PLIC_HART0_M_CONTEXT,
        num_sources: PLIC_NUM_SOURCES,
    }];

    pub static DMA_CONFIG_TABLE: [DmaConfig; 2] = [
        DmaConfig {
            device_id: DMA_A_DEVICE_ID,
            base_addr: mmio::DMA_A_BASE,
            has_mm2s: true,
            has_s2mm: false,
            data_width: 8,
            has_dre: false,
            max_transfer_len: (1 << DMA_LENGTH_WIDTH) - 1,
        },
        DmaConfig {
            device_id: DMA_B_DEVICE_ID,
            base_addr: mmio::DMA_B_BASE,
            has_mm2s: true,
            has_s2mm: false,
            data_width: 8,
            has_dre: false,
            max_transfer_len: (1 << DMA_LENGTH_WIDTH) - 1,
        },
    ];

    pub const DISTANCE_SQUARED_CONFIG: AcceleratorConfig = AcceleratorConfig {
        device_id: DISTANCE_SQUARED_DEVICE_ID,
        base_addr: mmio::DISTANCE_SQUARED_BASE,
    };

    /// Finds the interrupt controller configuration for `device_id`.
    pub fn lookup_intc(device_id: u16) -> Option<IntcConfig> {
        INTC_CONFIG_TABLE
            .iter()
            .find(|cfg| cfg.device_id == device_id)
            .copied()
    }

    /// Finds the DMA engine configuration for `device_id`.
    pub fn lookup_dma(device_id: u16) -> Option<DmaConfig> {
        DMA_CONFIG_TABLE
            .iter()
            .find(|cfg| cfg.device_id == device_id)
            .copied()
    }
}
