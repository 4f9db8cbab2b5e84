//! Distance-squared core model.
//!
//! The kernel consumes exactly `len` words from each of its two input
//! streams per invocation. It launches once `ap_start` is set and both
//! streams hold a full vector; until then the stream FIFOs absorb whatever
//! the DMA engines push. A launched kernel runs on its own thread for the
//! configured latency, then publishes the result, sets `ap_done` and, if
//! the global and local enables allow it, raises its interrupt line.

use crate::bus::SimDevice;
use crate::dma::StreamSink;
use crate::plic::Plic;
use log::trace;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, Weak};
use std::thread;
use std::time::Duration;

const AP_CTRL: usize = 0x00;
const GIE: usize = 0x04;
const IER: usize = 0x08;
const ISR: usize = 0x0C;
const RESULT_LO: usize = 0x10;
const RESULT_HI: usize = 0x14;
const RESULT_CTRL: usize = 0x18;

const AP_START: u32 = 1 << 0;
const AP_DONE: u32 = 1 << 1;
const AP_IDLE: u32 = 1 << 2;
const AP_READY: u32 = 1 << 3;
const AUTO_RESTART: u32 = 1 << 7;
const IRQ_MASK: u32 = 0b11;

/// Input stream of the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Port {
    A,
    B,
}

struct CoreState {
    start: bool,
    done: bool,
    busy: bool,
    auto_restart: bool,
    gie: bool,
    ier: u32,
    isr: u32,
    result: f64,
    stream_a: VecDeque<f64>,
    stream_b: VecDeque<f64>,
    completions: usize,
}

pub struct DistanceSquaredCore {
    state: Mutex<CoreState>,
    this: Weak<DistanceSquaredCore>,
    plic: Arc<Plic>,
    line: u32,
    len: usize,
    latency: Duration,
    stalled: bool,
}

/// Handle that feeds one of the core's input streams.
pub struct StreamPort {
    core: Arc<DistanceSquaredCore>,
    port: Port,
}

impl DistanceSquaredCore {
    pub fn new(plic: Arc<Plic>, line: u32, len: usize, latency: Duration, stalled: bool) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            state: Mutex::new(CoreState {
                start: false,
                done: false,
                busy: false,
                auto_restart: false,
                gie: false,
                ier: 0,
                isr: 0,
                result: 0.0,
                stream_a: VecDeque::new(),
                stream_b: VecDeque::new(),
                completions: 0,
            }),
            this: this.clone(),
            plic,
            line,
            len,
            latency,
            stalled,
        })
    }

    pub fn port(self: &Arc<Self>, port: Port) -> Arc<StreamPort> {
        Arc::new(StreamPort {
            core: self.clone(),
            port,
        })
    }

    /// Number of kernel invocations that have finished.
    pub fn completions(&self) -> usize {
        self.lock().completions
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CoreState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn try_launch(&self, state: &mut CoreState) {
        if self.stalled || !state.start || state.busy {
            return;
        }
        if state.stream_a.len() < self.len || state.stream_b.len() < self.len {
            return;
        }
        let a: Vec<f64> = state.stream_a.drain(..self.len).collect();
        let b: Vec<f64> = state.stream_b.drain(..self.len).collect();
        state.start = state.auto_restart;
        state.busy = true;

        let Some(core) = self.this.upgrade() else {
            return;
        };
        trace!("distance_squared: launched on {} words", self.len);
        thread::spawn(move || core.execute(&a, &b));
    }

    fn execute(&self, a: &[f64], b: &[f64]) {
        thread::sleep(self.latency);
        let sum = a
            .iter()
            .zip(b)
            .map(|(x, y)| (x - y) * (x - y))
            .sum::<f64>();

        let raise = {
            let mut state = self.lock();
            state.result = sum;
            state.done = true;
            state.busy = false;
            state.completions += 1;
            state.isr |= state.ier & 1;
            let raise = state.gie && state.isr & state.ier != 0;
            self.try_launch(&mut state);
            raise
        };
        if raise {
            self.plic.raise(self.line);
        }
    }

    fn push(&self, port: Port, words: Vec<f64>) {
        let mut state = self.lock();
        match port {
            Port::A => state.stream_a.extend(words),
            Port::B => state.stream_b.extend(words),
        }
        self.try_launch(&mut state);
    }
}

impl StreamSink for StreamPort {
    fn push(&self, words: Vec<f64>) {
        self.core.push(self.port, words);
    }
}

impl SimDevice for DistanceSquaredCore {
    fn read(&self, offset: usize) -> u32 {
        let mut state = self.lock();
        match offset {
            AP_CTRL => {
                let idle = !state.busy;
                let mut value = 0;
                if state.start {
                    value |= AP_START;
                }
                if state.done {
                    value |= AP_DONE;
                }
                if idle {
                    value |= AP_IDLE;
                }
                if idle && !state.start {
                    value |= AP_READY;
                }
                if state.auto_restart {
                    value |= AUTO_RESTART;
                }
                // ap_done clears on read.
                state.done = false;
                value
            }
            GIE => state.gie as u32,
            IER => state.ier,
            ISR => state.isr,
            RESULT_LO => state.result.to_bits() as u32,
            RESULT_HI => (state.result.to_bits() >> 32) as u32,
            RESULT_CTRL => 1,
            _ => 0,
        }
    }

    fn write(&self, offset: usize, value: u32) {
        let mut state = self.lock();
        match offset {
            AP_CTRL => {
                state.auto_restart = value & AUTO_RESTART != 0;
                if value & AP_START != 0 {
                    state.start = true;
                    self.try_launch(&mut state);
                }
            }
            GIE => state.gie = value & 1 != 0,
            IER => state.ier = value & IRQ_MASK,
            ISR => state.isr ^= value & IRQ_MASK,
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn core(len: usize, stalled: bool) -> Arc<DistanceSquaredCore> {
        DistanceSquaredCore::new(Arc::new(Plic::new()), 61, len, Duration::ZERO, stalled)
    }

    fn wait_done(core: &DistanceSquaredCore, completions: usize) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while core.completions() < completions {
            assert!(Instant::now() < deadline, "core never completed");
            thread::yield_now();
        }
    }

    #[test]
    fn launches_only_with_start_and_both_vectors() {
        let core = core(2, false);
        core.port(Port::A).push(vec![1.0, 2.0]);
        core.write(AP_CTRL, AP_START);
        assert_eq!(core.completions(), 0);

        core.port(Port::B).push(vec![4.0, 6.0]);
        wait_done(&core, 1);
        assert_eq!(core.read(RESULT_LO), 25.0f64.to_bits() as u32);
        assert_eq!(core.read(RESULT_HI), (25.0f64.to_bits() >> 32) as u32);
        let ctrl = core.read(AP_CTRL);
        assert_eq!(ctrl & (AP_DONE | AP_IDLE | AP_START), AP_DONE | AP_IDLE);
        assert_eq!(core.read(AP_CTRL) & AP_DONE, 0);
    }

    #[test]
    fn status_is_set_only_for_enabled_sources() {
        let core = core(1, false);
        core.write(AP_CTRL, AP_START);
        core.port(Port::A).push(vec![3.0]);
        core.port(Port::B).push(vec![1.0]);
        wait_done(&core, 1);
        assert_eq!(core.read(ISR), 0);

        core.write(IER, 1);
        core.write(AP_CTRL, AP_START);
        core.port(Port::A).push(vec![3.0]);
        core.port(Port::B).push(vec![1.0]);
        wait_done(&core, 2);
        assert_eq!(core.read(ISR), 1);
        core.write(ISR, 1);
        assert_eq!(core.read(ISR), 0);
    }

    #[test]
    fn stalled_core_never_launches() {
        let core = core(1, true);
        core.write(AP_CTRL, AP_START);
        core.port(Port::A).push(vec![1.0]);
        core.port(Port::B).push(vec![1.0]);
        thread::sleep(Duration::from_millis(20));
        assert_eq!(core.completions(), 0);
        assert_eq!(core.read(AP_CTRL) & AP_IDLE, AP_IDLE);
    }
}
