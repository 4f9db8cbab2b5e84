use crate::platform::Platform;
use crate::regs::RegisterBus;
use crate::{AccelError, Peripheral};
use bitflags::bitflags;
use core::sync::atomic::{AtomicBool, Ordering};
use dsq_common::params::AcceleratorConfig;
use modular_bitfield::prelude::*;

const AP_CTRL: usize = 0x00;
const GIE: usize = 0x04;
const IER: usize = 0x08;
const ISR: usize = 0x0C;
const RESULT_LO: usize = 0x10;
const RESULT_HI: usize = 0x14;

#[bitfield]
#[derive(Debug, Clone, Copy)]
pub struct ApCtrl {
    pub start: bool,
    pub done: bool,
    pub idle: bool,
    pub ready: bool,
    #[skip]
    _unused0: B3,
    pub auto_restart: bool,
    #[skip]
    _unused1: B24,
}

impl ApCtrl {
    fn from_raw(raw: u32) -> Self {
        Self::from_bytes(raw.to_le_bytes())
    }

    fn raw(self) -> u32 {
        u32::from_le_bytes(self.into_bytes())
    }
}

bitflags! {
    /// Local interrupt sources of the accelerator.
    pub struct AccelIrq: u32 {
        const AP_DONE = 1 << 0;
        const AP_READY = 1 << 1;
    }
}

/// Control bus of the distance-squared accelerator.
///
/// `running` mirrors whether software considers the device active: set by
/// [`start`](Self::start), cleared by the completion handler when it does not
/// restart the device.
///
/// There is no stop operation. The core has no halt control; once started it
/// runs to `ap_done`. Stopping means masking its interrupt and not starting it
/// again, which is what the controller's disarm path does.
pub struct AcceleratorDevice<B> {
    bus: B,
    config: AcceleratorConfig,
    running: AtomicBool,
}

impl<B: RegisterBus> AcceleratorDevice<B> {
    /// Binds the control bus at `config.base_addr`.
    ///
    /// # Errors
    ///
    /// `Initialization(Accelerator)` if nothing is mapped at that address.
    pub fn initialize<P>(platform: &P, config: AcceleratorConfig) -> Result<Self, AccelError>
    where
        P: Platform<Bus = B>,
    {
        let bus = platform
            .map(config.base_addr)
            .ok_or(AccelError::Initialization(Peripheral::Accelerator))?;
        Ok(Self {
            bus,
            config,
            running: AtomicBool::new(false),
        })
    }

    fn ctrl(&self) -> ApCtrl {
        ApCtrl::from_raw(self.bus.read(AP_CTRL))
    }

    /// Pulses `ap_start`, keeping the auto-restart setting.
    pub fn start(&self) {
        let ctrl = ApCtrl::new()
            .with_auto_restart(self.ctrl().auto_restart())
            .with_start(true);
        self.running.store(true, Ordering::Release);
        self.bus.write(AP_CTRL, ctrl.raw());
    }

    /// `ap_done` is clear-on-read in hardware; call once per completion.
    pub fn is_done(&self) -> bool {
        self.ctrl().done()
    }

    /// `ap_idle`: no invocation is in progress.
    pub fn is_idle(&self) -> bool {
        self.ctrl().idle()
    }

    /// The last start has been accepted and another may be issued.
    pub fn is_ready(&self) -> bool {
        !self.ctrl().start()
    }

    /// Opens the gate that lets any enabled local source reach the line.
    pub fn enable_global_interrupt(&self) {
        self.bus.write(GIE, 1);
    }

    /// Closes the gate; first thing the completion handler does.
    pub fn disable_global_interrupt(&self) {
        self.bus.write(GIE, 0);
    }

    /// Enables the local sources in `mask`.
    pub fn enable_interrupts(&self, mask: AccelIrq) {
        self.bus.set_bits(IER, mask.bits());
    }

    /// Disables the local sources in `mask`.
    pub fn disable_interrupts(&self, mask: AccelIrq) {
        self.bus.clear_bits(IER, mask.bits());
    }

    /// Acknowledges the sources in `mask`. The status register is
    /// toggle-on-write, so only the bits being cleared are written.
    pub fn clear_interrupt(&self, mask: AccelIrq) {
        self.bus.write(ISR, mask.bits());
    }

    /// Local sources currently latched in the status register.
    pub fn interrupt_status(&self) -> AccelIrq {
        AccelIrq::from_bits_truncate(self.bus.read(ISR))
    }

    /// Reads the 64-bit result register pair as an IEEE-754 double.
    pub fn read_result(&self) -> f64 {
        let lo = self.bus.read(RESULT_LO) as u64;
        let hi = self.bus.read(RESULT_HI) as u64;
        f64::from_bits(lo | (hi << 32))
    }

    /// Whether the device was started and not yet seen to stop.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub(crate) fn mark_stopped(&self) {
        self.running.store(false, Ordering::Release);
    }

    /// Configuration the device was bound with.
    pub fn config(&self) -> &AcceleratorConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intc::IrqDispatch;
    use crate::regs::mock::RegFile;
    use dsq_common::params::{DISTANCE_SQUARED_CONFIG, DmaConfig, IntcConfig};
    use std::boxed::Box;

    struct Board(&'static RegFile);

    impl Platform for Board {
        type Bus = &'static RegFile;

        fn intc_config(&self, _device_id: u16) -> Option<IntcConfig> {
            None
        }

        fn dma_config(&self, _device_id: u16) -> Option<DmaConfig> {
            None
        }

        fn map(&self, _base_addr: usize) -> Option<&'static RegFile> {
            Some(self.0)
        }

        fn install_irq_entry(&self, _entry: &'static dyn IrqDispatch) {}

        fn flush_dcache_range(&self, _addr: usize, _len: usize) {}

        fn now(&self) -> u64 {
            0
        }

        fn ticks_per_ms(&self) -> u64 {
            1
        }
    }

    fn device() -> (&'static RegFile, AcceleratorDevice<&'static RegFile>) {
        let regs: &'static RegFile = Box::leak(Box::default());
        let device = AcceleratorDevice::initialize(&Board(regs), DISTANCE_SQUARED_CONFIG).unwrap();
        (regs, device)
    }

    #[test]
    fn start_keeps_auto_restart() {
        let (regs, device) = device();
        regs.set(AP_CTRL, 1 << 7 | 1 << 2);
        device.start();
        assert_eq!(regs.get(AP_CTRL), 1 << 7 | 1);
        assert!(device.is_running());
        device.mark_stopped();
        assert!(!device.is_running());
    }

    #[test]
    fn result_register_pair_is_little_word_first() {
        let (regs, device) = device();
        let bits = 5_559_680.0f64.to_bits();
        regs.set(RESULT_LO, bits as u32);
        regs.set(RESULT_HI, (bits >> 32) as u32);
        assert_eq!(device.read_result(), 5_559_680.0);
    }

    #[test]
    fn interrupt_masks() {
        let (regs, device) = device();
        device.enable_interrupts(AccelIrq::AP_DONE | AccelIrq::AP_READY);
        device.disable_interrupts(AccelIrq::AP_READY);
        assert_eq!(regs.get(IER), 1);

        device.enable_global_interrupt();
        assert_eq!(regs.get(GIE), 1);
        device.disable_global_interrupt();
        assert_eq!(regs.get(GIE), 0);

        regs.set(ISR, 0b11);
        assert_eq!(device.interrupt_status(), AccelIrq::all());
        device.clear_interrupt(AccelIrq::AP_DONE);
        assert_eq!(regs.writes().last(), Some(&(ISR, 1)));
    }
}
