use crate::bus::{SimBus, SimDevice};
use crate::distance_squared::{DistanceSquaredCore, Port};
use crate::dma::AxiDma;
use crate::plic::Plic;
use dsq_common::params::{self, DmaConfig, IntcConfig};
use dsq_common::{VECTOR_LEN, mmio};
use dsq_core::intc::IrqDispatch;
use dsq_core::platform::Platform;
use log::debug;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering, fence};
use std::thread;
use std::time::{Duration, Instant};

/// Simulated clock runs in microseconds.
const TICKS_PER_MS: u64 = 1_000;

/// Options for assembling a simulated board.
///
/// The defaults match the synthesized design: both DMA engines in simple
/// mode, a working interrupt controller and a core that answers after
/// 50 microseconds.
#[derive(Debug, Clone)]
pub struct SocBuilder {
    vector_len: usize,
    latency: Duration,
    stalled: bool,
    scatter_gather: [bool; 2],
    intc_present: bool,
    dma_present: [bool; 2],
    broken_self_test: bool,
}

impl Default for SocBuilder {
    fn default() -> Self {
        Self {
            vector_len: VECTOR_LEN,
            latency: Duration::from_micros(50),
            stalled: false,
            scatter_gather: [false; 2],
            intc_present: true,
            dma_present: [true; 2],
            broken_self_test: false,
        }
    }
}

impl SocBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Words the core consumes from each stream per invocation.
    pub fn vector_len(mut self, len: usize) -> Self {
        self.vector_len = len;
        self
    }

    pub fn latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// The core accepts `ap_start` but never launches.
    pub fn stalled(mut self) -> Self {
        self.stalled = true;
        self
    }

    /// Builds DMA engine `device_id` with the scatter-gather engine.
    pub fn scatter_gather(mut self, device_id: u16) -> Self {
        if let Some(sg) = self.scatter_gather.get_mut(device_id as usize) {
            *sg = true;
        }
        self
    }

    /// Leaves the interrupt controller out of the configuration tables.
    pub fn without_intc(mut self) -> Self {
        self.intc_present = false;
        self
    }

    /// Leaves DMA engine `device_id` out of the configuration tables.
    pub fn without_dma(mut self, device_id: u16) -> Self {
        if let Some(present) = self.dma_present.get_mut(device_id as usize) {
            *present = false;
        }
        self
    }

    /// Interrupt controller whose threshold register is stuck at zero.
    pub fn broken_self_test(mut self) -> Self {
        self.broken_self_test = true;
        self
    }

    pub fn build(self) -> SimPlatform {
        let plic = Arc::new(Plic::with_fault(self.broken_self_test));
        let core = DistanceSquaredCore::new(
            plic.clone(),
            params::DISTANCE_SQUARED_IRQ,
            self.vector_len,
            self.latency,
            self.stalled,
        );
        let dma = [
            Arc::new(AxiDma::new(core.port(Port::A), self.scatter_gather[0])),
            Arc::new(AxiDma::new(core.port(Port::B), self.scatter_gather[1])),
        ];
        debug!(
            "soc: {} words per vector, {:?} kernel latency",
            self.vector_len, self.latency
        );
        SimPlatform {
            soc: Arc::new(Soc {
                plic,
                dma,
                core,
                intc_present: self.intc_present,
                dma_present: self.dma_present,
                flushes: AtomicUsize::new(0),
                epoch: Instant::now(),
            }),
        }
    }
}

struct Soc {
    plic: Arc<Plic>,
    dma: [Arc<AxiDma>; 2],
    core: Arc<DistanceSquaredCore>,
    intc_present: bool,
    dma_present: [bool; 2],
    flushes: AtomicUsize,
    epoch: Instant,
}

/// Host-side platform backed by the simulated board.
#[derive(Clone)]
pub struct SimPlatform {
    soc: Arc<Soc>,
}

impl SimPlatform {
    pub fn builder() -> SocBuilder {
        SocBuilder::new()
    }

    pub fn plic(&self) -> &Plic {
        &self.soc.plic
    }

    pub fn dma(&self, device_id: u16) -> Option<&AxiDma> {
        self.soc.dma.get(device_id as usize).map(|dma| &**dma)
    }

    pub fn core(&self) -> &DistanceSquaredCore {
        &self.soc.core
    }

    /// Cache maintenance requests issued so far.
    pub fn flush_count(&self) -> usize {
        self.soc.flushes.load(Ordering::Relaxed)
    }
}

impl Platform for SimPlatform {
    type Bus = SimBus;

    fn intc_config(&self, device_id: u16) -> Option<IntcConfig> {
        params::lookup_intc(device_id).filter(|_| self.soc.intc_present)
    }

    fn dma_config(&self, device_id: u16) -> Option<DmaConfig> {
        params::lookup_dma(device_id)
            .filter(|cfg| self.soc.dma_present.get(cfg.device_id as usize) == Some(&true))
    }

    fn map(&self, base_addr: usize) -> Option<SimBus> {
        let device: Arc<dyn SimDevice> = match base_addr {
            mmio::PLIC_BASE => self.soc.plic.clone(),
            mmio::DMA_A_BASE => self.soc.dma[0].clone(),
            mmio::DMA_B_BASE => self.soc.dma[1].clone(),
            mmio::DISTANCE_SQUARED_BASE => self.soc.core.clone(),
            _ => return None,
        };
        Some(SimBus::new(device))
    }

    fn install_irq_entry(&self, entry: &'static dyn IrqDispatch) {
        self.soc.plic.install(entry);
    }

    fn flush_dcache_range(&self, _addr: usize, _len: usize) {
        self.soc.flushes.fetch_add(1, Ordering::Relaxed);
        fence(Ordering::SeqCst);
    }

    fn now(&self) -> u64 {
        self.soc.epoch.elapsed().as_micros() as u64
    }

    fn ticks_per_ms(&self) -> u64 {
        TICKS_PER_MS
    }

    fn relax(&self) {
        thread::yield_now();
    }
}
