use dsq_core::regs::RegisterBus;
use std::sync::Arc;

/// A peripheral's register window.
///
/// Offsets are relative to the window base. Reads may have side effects
/// (claim registers, clear-on-read status bits), so every driver access
/// reaches the device.
pub trait SimDevice: Send + Sync {
    fn read(&self, offset: usize) -> u32;

    fn write(&self, offset: usize, value: u32);
}

/// Driver-facing handle to a simulated register window.
#[derive(Clone)]
pub struct SimBus(Arc<dyn SimDevice>);

impl SimBus {
    pub fn new(device: Arc<dyn SimDevice>) -> Self {
        Self(device)
    }
}

impl RegisterBus for SimBus {
    fn read(&self, offset: usize) -> u32 {
        self.0.read(offset)
    }

    fn write(&self, offset: usize, value: u32) {
        self.0.write(offset, value)
    }
}
