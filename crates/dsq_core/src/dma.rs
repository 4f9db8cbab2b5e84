use crate::platform::Platform;
use crate::regs::{RegisterBus, split_addr};
use crate::{AccelError, Peripheral, TransferFault};
use bitflags::bitflags;
use dsq_common::params::DmaConfig;
use log::{debug, error};
use modular_bitfield::prelude::*;

const MM2S_DMACR: usize = 0x00;
const MM2S_DMASR: usize = 0x04;
const MM2S_SA: usize = 0x18;
const MM2S_SA_MSB: usize = 0x1C;
const MM2S_LENGTH: usize = 0x28;

const S2MM_DMACR: usize = 0x30;
const S2MM_DMASR: usize = 0x34;
const S2MM_DA: usize = 0x48;
const S2MM_DA_MSB: usize = 0x4C;
const S2MM_LENGTH: usize = 0x58;

/// Status polls allowed for a soft reset to self-clear.
const RESET_POLL_LIMIT: u32 = 10_000;

/// Channel control register (`MM2S_DMACR` / `S2MM_DMACR`).
#[bitfield]
#[derive(Debug, Clone, Copy)]
pub struct DmaControl {
    pub run_stop: bool,
    #[skip]
    _unused0: B1,
    pub reset: bool,
    #[skip]
    _unused1: B9,
    pub ioc_irq_en: bool,
    pub dly_irq_en: bool,
    pub err_irq_en: bool,
    #[skip]
    _unused2: B17,
}

/// Channel status register (`MM2S_DMASR` / `S2MM_DMASR`).
#[bitfield]
#[derive(Debug, Clone, Copy)]
pub struct DmaStatus {
    pub halted: bool,
    pub idle: bool,
    #[skip]
    _unused0: B1,
    pub sg_included: bool,
    pub internal_err: bool,
    pub slave_err: bool,
    pub decode_err: bool,
    #[skip]
    _unused1: B5,
    pub ioc_irq: bool,
    pub dly_irq: bool,
    pub err_irq: bool,
    #[skip]
    _unused2: B17,
}

impl DmaControl {
    fn from_raw(raw: u32) -> Self {
        Self::from_bytes(raw.to_le_bytes())
    }

    fn raw(self) -> u32 {
        u32::from_le_bytes(self.into_bytes())
    }
}

impl DmaStatus {
    fn from_raw(raw: u32) -> Self {
        Self::from_bytes(raw.to_le_bytes())
    }

    fn has_error(&self) -> bool {
        self.internal_err() || self.slave_err() || self.decode_err()
    }
}

bitflags! {
    /// Interrupt sources shared by the control and status registers.
    pub struct DmaIrq: u32 {
        const IOC = 1 << 12;
        const DELAY = 1 << 13;
        const ERROR = 1 << 14;
        const ALL = Self::IOC.bits | Self::DELAY.bits | Self::ERROR.bits;
    }
}

/// Channel of a DMA engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Memory-map to stream: host memory into the device.
    HostToDevice,
    /// Stream to memory-map: device output into host memory.
    DeviceToHost,
}

impl Direction {
    fn control(self) -> usize {
        match self {
            Direction::HostToDevice => MM2S_DMACR,
            Direction::DeviceToHost => S2MM_DMACR,
        }
    }

    fn status(self) -> usize {
        match self {
            Direction::HostToDevice => MM2S_DMASR,
            Direction::DeviceToHost => S2MM_DMASR,
        }
    }

    fn address(self) -> (usize, usize) {
        match self {
            Direction::HostToDevice => (MM2S_SA, MM2S_SA_MSB),
            Direction::DeviceToHost => (S2MM_DA, S2MM_DA_MSB),
        }
    }

    fn length(self) -> usize {
        match self {
            Direction::HostToDevice => MM2S_LENGTH,
            Direction::DeviceToHost => S2MM_LENGTH,
        }
    }
}

/// A single-buffer transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferRequest {
    /// Bus address of the buffer.
    pub addr: usize,
    /// Length in bytes.
    pub len: usize,
    pub direction: Direction,
}

/// AXI DMA engine driven in simple (register) mode.
pub struct DmaChannel<B> {
    bus: B,
    config: DmaConfig,
}

impl<B: RegisterBus> DmaChannel<B> {
    /// Brings up DMA engine `device_id` for polled simple-mode transfers.
    ///
    /// Looks the engine up, binds its registers, soft-resets it, refuses
    /// engines built with scatter-gather support and masks every interrupt
    /// source on the channels present.
    ///
    /// # Errors
    ///
    /// * `HardwareLookup(Dma(id))` if the engine is not in the configuration
    ///   table.
    /// * `Initialization(Dma(id))` if the registers cannot be bound or the
    ///   reset never completes.
    /// * `UnsupportedMode(id)` if the engine reports scatter-gather support.
    pub fn configure<P>(platform: &P, device_id: u16) -> Result<Self, AccelError>
    where
        P: Platform<Bus = B>,
    {
        let config = platform
            .dma_config(device_id)
            .ok_or(AccelError::HardwareLookup(Peripheral::Dma(device_id)))?;
        let bus = platform
            .map(config.base_addr)
            .ok_or(AccelError::Initialization(Peripheral::Dma(device_id)))?;
        let channel = Self { bus, config };

        channel.reset()?;

        let probe = channel.directions().next().map(|dir| channel.status(dir));
        if probe.is_some_and(|status| status.sg_included()) {
            error!("DMA {}: scatter-gather engine present", device_id);
            return Err(AccelError::UnsupportedMode(device_id));
        }

        for direction in channel.directions() {
            channel.disable_interrupts(direction, DmaIrq::ALL);
        }
        debug!(
            "DMA {} at {:#x}: simple mode, {}-byte beats",
            device_id, config.base_addr, config.data_width
        );
        Ok(channel)
    }

    /// Channels synthesized into this engine.
    fn directions(&self) -> impl Iterator<Item = Direction> {
        [
            (self.config.has_mm2s, Direction::HostToDevice),
            (self.config.has_s2mm, Direction::DeviceToHost),
        ]
        .into_iter()
        .filter_map(|(present, dir)| present.then_some(dir))
    }

    fn has_channel(&self, direction: Direction) -> bool {
        match direction {
            Direction::HostToDevice => self.config.has_mm2s,
            Direction::DeviceToHost => self.config.has_s2mm,
        }
    }

    /// Soft reset; the reset bit resets both channels and self-clears.
    fn reset(&self) -> Result<(), AccelError> {
        let Some(direction) = self.directions().next() else {
            return Err(AccelError::Initialization(Peripheral::Dma(self.config.device_id)));
        };
        let control = direction.control();
        self.bus
            .write(control, DmaControl::new().with_reset(true).raw());
        for _ in 0..RESET_POLL_LIMIT {
            if !DmaControl::from_raw(self.bus.read(control)).reset() {
                return Ok(());
            }
            core::hint::spin_loop();
        }
        error!("DMA {}: reset did not complete", self.config.device_id);
        Err(AccelError::Initialization(Peripheral::Dma(self.config.device_id)))
    }

    /// Snapshot of the channel status register.
    pub fn status(&self, direction: Direction) -> DmaStatus {
        DmaStatus::from_raw(self.bus.read(direction.status()))
    }

    /// True while the channel is running and has not drained its transfer.
    pub fn is_busy(&self, direction: Direction) -> bool {
        let status = self.status(direction);
        !status.halted() && !status.idle()
    }

    /// Masks the sources in `mask` on one channel.
    pub fn disable_interrupts(&self, direction: Direction, mask: DmaIrq) {
        self.bus.clear_bits(direction.control(), mask.bits());
    }

    /// Unmasks the sources in `mask` on one channel.
    pub fn enable_interrupts(&self, direction: Direction, mask: DmaIrq) {
        self.bus.set_bits(direction.control(), mask.bits());
    }

    /// Starts a single-buffer transfer and returns without waiting for it.
    ///
    /// The buffer must stay alive and untouched until the channel reports
    /// idle again, and must already be visible to the engine (flushed from
    /// the data cache).
    pub fn transfer(&self, request: TransferRequest) -> Result<(), AccelError> {
        let direction = request.direction;
        if !self.has_channel(direction) {
            return Err(AccelError::Transfer(TransferFault::NoChannel));
        }
        if request.len == 0 || request.len > self.config.max_transfer_len {
            return Err(AccelError::Transfer(TransferFault::InvalidLength));
        }
        if !self.config.has_dre && request.addr % self.config.data_width != 0 {
            return Err(AccelError::Transfer(TransferFault::Misaligned));
        }
        let status = self.status(direction);
        if !status.halted() && !status.idle() {
            return Err(AccelError::Transfer(TransferFault::Busy));
        }
        if status.has_error() {
            return Err(AccelError::Transfer(TransferFault::EngineFault));
        }

        let (lo, hi) = split_addr(request.addr);
        let (lo_reg, hi_reg) = direction.address();
        self.bus.write(lo_reg, lo);
        self.bus.write(hi_reg, hi);
        let control = DmaControl::from_raw(self.bus.read(direction.control()));
        self.bus
            .write(direction.control(), control.with_run_stop(true).raw());
        // Writing the length starts the transfer; it must come last.
        self.bus.write(direction.length(), request.len as u32);
        Ok(())
    }

    /// Parameters the engine was configured from.
    pub fn config(&self) -> &DmaConfig {
        &self.config
    }
}
