use crate::intc::IrqDispatch;
use crate::regs::RegisterBus;
use dsq_common::params::{DmaConfig, IntcConfig};

/// Board services the drivers depend on.
///
/// A platform knows which peripherals were synthesized (configuration
/// lookup), how to reach their registers, how to route the processor's
/// external interrupt into the interrupt controller, and how to make memory
/// written by the processor visible to DMA engines.
pub trait Platform {
    /// Register window type handed to every driver.
    type Bus: RegisterBus + Send + Sync + 'static;

    /// Looks up the interrupt controller configuration for `device_id`.
    fn intc_config(&self, device_id: u16) -> Option<IntcConfig>;

    /// Looks up the DMA engine configuration for `device_id`.
    fn dma_config(&self, device_id: u16) -> Option<DmaConfig>;

    /// Binds the register window starting at `base_addr`.
    ///
    /// Returns `None` when nothing responds at that address.
    fn map(&self, base_addr: usize) -> Option<Self::Bus>;

    /// Routes the processor's external interrupt exception to `entry` and
    /// unmasks it.
    ///
    /// Called at most once per interrupt controller instance.
    fn install_irq_entry(&self, entry: &'static dyn IrqDispatch);

    /// Writes back data cache lines covering `addr..addr + len` so a DMA
    /// engine reading physical memory observes the processor's stores.
    fn flush_dcache_range(&self, addr: usize, len: usize);

    /// Monotonic time in platform ticks.
    fn now(&self) -> u64;

    fn ticks_per_ms(&self) -> u64;

    /// Hint issued on every iteration of a busy-wait loop.
    fn relax(&self) {
        core::hint::spin_loop();
    }
}
