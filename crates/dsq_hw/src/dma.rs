//! AXI DMA model, simple mode, memory-map to stream only.
//!
//! A transfer completes as soon as its length register is written: the
//! engine reads the source buffer straight out of host memory and pushes
//! the words into the attached stream sink. The S2MM bank exists so that
//! register accesses behave, but it never moves data.

use crate::bus::SimDevice;
use log::trace;
use std::sync::{Arc, Mutex};

const MM2S_DMACR: usize = 0x00;
const MM2S_DMASR: usize = 0x04;
const MM2S_SA: usize = 0x18;
const MM2S_SA_MSB: usize = 0x1C;
const MM2S_LENGTH: usize = 0x28;
const S2MM_DMACR: usize = 0x30;
const S2MM_DMASR: usize = 0x34;

const CR_RUN_STOP: u32 = 1 << 0;
const CR_RESET: u32 = 1 << 2;
const SR_HALTED: u32 = 1 << 0;
const SR_IDLE: u32 = 1 << 1;
const SR_SG_INCLUDED: u32 = 1 << 3;
const SR_IOC_IRQ: u32 = 1 << 12;
const SR_IRQ_MASK: u32 = 0x7 << 12;

/// Consumer of a memory-map to stream transfer.
pub trait StreamSink: Send + Sync {
    fn push(&self, words: Vec<f64>);
}

#[derive(Default)]
struct Channel {
    control: u32,
    status: u32,
    address: u64,
    length: u32,
}

impl Channel {
    fn reset(&mut self, sg_included: bool) {
        *self = Channel {
            status: SR_HALTED | if sg_included { SR_SG_INCLUDED } else { 0 },
            ..Channel::default()
        };
    }

    fn write_control(&mut self, value: u32) {
        self.control = value & !CR_RESET;
        if value & CR_RUN_STOP != 0 {
            self.status &= !SR_HALTED;
        } else {
            self.status |= SR_HALTED;
        }
    }
}

struct Engine {
    mm2s: Channel,
    s2mm: Channel,
    transfers: usize,
}

pub struct AxiDma {
    engine: Mutex<Engine>,
    sink: Arc<dyn StreamSink>,
    sg_included: bool,
}

impl AxiDma {
    pub fn new(sink: Arc<dyn StreamSink>, sg_included: bool) -> Self {
        let mut engine = Engine {
            mm2s: Channel::default(),
            s2mm: Channel::default(),
            transfers: 0,
        };
        engine.mm2s.reset(sg_included);
        engine.s2mm.reset(sg_included);
        Self {
            engine: Mutex::new(engine),
            sink,
            sg_included,
        }
    }

    /// Number of completed memory-map to stream transfers.
    pub fn transfers(&self) -> usize {
        self.lock().transfers
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Engine> {
        self.engine.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Copies `len` bytes at `address` out of host memory.
    ///
    /// The drivers only ever program addresses of live, device-visible
    /// buffers owned by the controller, and keep them untouched until the
    /// channel is idle again.
    fn fetch(address: u64, len: usize) -> Vec<f64> {
        let bytes = unsafe { std::slice::from_raw_parts(address as usize as *const u8, len) };
        bytes
            .chunks_exact(size_of::<f64>())
            .map(|chunk| {
                let mut word = [0u8; 8];
                word.copy_from_slice(chunk);
                f64::from_ne_bytes(word)
            })
            .collect()
    }
}

impl SimDevice for AxiDma {
    fn read(&self, offset: usize) -> u32 {
        let engine = self.lock();
        match offset {
            MM2S_DMACR => engine.mm2s.control,
            MM2S_DMASR => engine.mm2s.status,
            MM2S_SA => engine.mm2s.address as u32,
            MM2S_SA_MSB => (engine.mm2s.address >> 32) as u32,
            MM2S_LENGTH => engine.mm2s.length,
            S2MM_DMACR => engine.s2mm.control,
            S2MM_DMASR => engine.s2mm.status,
            _ => 0,
        }
    }

    fn write(&self, offset: usize, value: u32) {
        let mut engine = self.lock();
        match offset {
            MM2S_DMACR | S2MM_DMACR if value & CR_RESET != 0 => {
                engine.mm2s.reset(self.sg_included);
                engine.s2mm.reset(self.sg_included);
            }
            MM2S_DMACR => engine.mm2s.write_control(value),
            S2MM_DMACR => engine.s2mm.write_control(value),
            MM2S_DMASR => engine.mm2s.status &= !(value & SR_IRQ_MASK),
            S2MM_DMASR => engine.s2mm.status &= !(value & SR_IRQ_MASK),
            MM2S_SA => {
                engine.mm2s.address = (engine.mm2s.address & !0xFFFF_FFFF) | u64::from(value)
            }
            MM2S_SA_MSB => {
                engine.mm2s.address =
                    (engine.mm2s.address & 0xFFFF_FFFF) | (u64::from(value) << 32)
            }
            MM2S_LENGTH => {
                engine.mm2s.length = value;
                if engine.mm2s.status & SR_HALTED != 0 || value == 0 {
                    return;
                }
                let words = Self::fetch(engine.mm2s.address, value as usize);
                engine.mm2s.status |= SR_IDLE | SR_IOC_IRQ;
                engine.transfers += 1;
                trace!(
                    "dma: {} bytes from {:#x} streamed",
                    value, engine.mm2s.address
                );
                drop(engine);
                self.sink.push(words);
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Collect(Mutex<Vec<f64>>);

    impl StreamSink for Collect {
        fn push(&self, words: Vec<f64>) {
            self.0.lock().unwrap().extend(words);
        }
    }

    #[test]
    fn length_write_streams_the_buffer() {
        let sink = Arc::new(Collect::default());
        let dma = AxiDma::new(sink.clone(), false);
        let buffer = [1.5f64, -2.0, 3.25];
        let addr = buffer.as_ptr() as u64;

        dma.write(MM2S_DMACR, CR_RESET);
        assert_eq!(dma.read(MM2S_DMACR) & CR_RESET, 0);
        dma.write(MM2S_SA, addr as u32);
        dma.write(MM2S_SA_MSB, (addr >> 32) as u32);
        // Halted: the length write is ignored.
        dma.write(MM2S_LENGTH, 24);
        assert!(sink.0.lock().unwrap().is_empty());

        dma.write(MM2S_DMACR, CR_RUN_STOP);
        assert_eq!(dma.read(MM2S_DMASR) & (SR_HALTED | SR_IDLE), 0);
        dma.write(MM2S_LENGTH, 24);
        assert_eq!(*sink.0.lock().unwrap(), buffer);
        assert_eq!(dma.read(MM2S_DMASR) & SR_IDLE, SR_IDLE);
        assert_eq!(dma.transfers(), 1);

        dma.write(MM2S_DMASR, SR_IOC_IRQ);
        assert_eq!(dma.read(MM2S_DMASR) & SR_IOC_IRQ, 0);
    }

    #[test]
    fn scatter_gather_flag_survives_reset() {
        let dma = AxiDma::new(Arc::new(Collect::default()), true);
        dma.write(MM2S_DMACR, CR_RESET);
        assert_ne!(dma.read(MM2S_DMASR) & SR_SG_INCLUDED, 0);
    }
}
