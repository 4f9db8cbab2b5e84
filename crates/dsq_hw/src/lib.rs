//! Behavioral model of the distance-squared system-on-chip.
//!
//! Implements the register interfaces of the interrupt controller, the two
//! AXI DMA engines and the distance-squared core closely enough for the
//! drivers in `dsq_core` to run unmodified on a host. Each peripheral is a
//! [`bus::SimDevice`]; the [`soc::SimPlatform`] wires them together, maps
//! their register windows at the addresses from `dsq_common::mmio` and
//! delivers the core's completion interrupt from the core's own thread,
//! the way a hart would take an external interrupt while the main flow spins.

/// Register window adapter between simulated devices and the driver bus.
pub mod bus;

/// Model of the distance-squared high-level-synthesis core.
pub mod distance_squared;

/// Model of a simple-mode AXI DMA engine.
pub mod dma;

/// Model of the platform-level interrupt controller.
pub mod plic;

/// Board assembly and the [`dsq_core::platform::Platform`] implementation.
pub mod soc;

pub use bus::{SimBus, SimDevice};
pub use soc::{SimPlatform, SocBuilder};
