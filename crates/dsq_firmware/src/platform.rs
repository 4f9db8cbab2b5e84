//! Board services for the bare-metal firmware.
//!
//! Register windows are reached through identity-mapped MMIO, device
//! configurations come from the compile-time tables in `dsq_common`, and the
//! machine timer is the deadline clock.

use dsq_common::mmio;
use dsq_common::params::{self, DmaConfig, IntcConfig, MTIME_TICKS_PER_MS};
use dsq_core::intc::IrqDispatch;
use dsq_core::platform::Platform;
use dsq_core::regs::Mmio;
use riscv::register::{mie, mstatus};
use spin::Once;

/// Interrupt controller the machine external interrupt is routed to.
pub static IRQ_ENTRY: Once<&'static dyn IrqDispatch> = Once::new();

/// Register windows the drivers may bind.
const WINDOWS: [usize; 4] = [
    mmio::PLIC_BASE,
    mmio::DMA_A_BASE,
    mmio::DMA_B_BASE,
    mmio::DISTANCE_SQUARED_BASE,
];

#[derive(Debug, Clone, Copy)]
pub struct FirmwarePlatform;

impl Platform for FirmwarePlatform {
    type Bus = Mmio;

    fn intc_config(&self, device_id: u16) -> Option<IntcConfig> {
        params::lookup_intc(device_id)
    }

    fn dma_config(&self, device_id: u16) -> Option<DmaConfig> {
        params::lookup_dma(device_id)
    }

    fn map(&self, base_addr: usize) -> Option<Mmio> {
        // Every window in the table is an identity-mapped device region.
        WINDOWS
            .contains(&base_addr)
            .then(|| unsafe { Mmio::new(base_addr) })
    }

    fn install_irq_entry(&self, entry: &'static dyn IrqDispatch) {
        IRQ_ENTRY.call_once(|| entry);
        unsafe {
            mie::set_mext();
            mstatus::set_mie();
        }
    }

    /// The hart's data accesses are coherent with the DMA masters; a full
    /// fence orders the buffer stores before the engine is programmed.
    fn flush_dcache_range(&self, _addr: usize, _len: usize) {
        unsafe { core::arch::asm!("fence rw, rw") };
    }

    fn now(&self) -> u64 {
        unsafe { (mmio::MTIME_ADDR as *const u64).read_volatile() }
    }

    fn ticks_per_ms(&self) -> u64 {
        MTIME_TICKS_PER_MS
    }
}
