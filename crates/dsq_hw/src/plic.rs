//! Single-context PLIC model.
//!
//! Sources are level-less: a device calls [`Plic::raise`] on the rising edge
//! of its interrupt output. The pending bit is then visible in the pending
//! array, and if the source is enabled with a priority above the threshold
//! the installed exception entry runs on the raising thread. A hart lock
//! serializes entries so the handler never re-enters itself.

use crate::bus::SimDevice;
use dsq_core::intc::IrqDispatch;
use log::trace;
use std::sync::{Mutex, OnceLock};

const SOURCES: usize = 64;
const PRIORITY_MASK: u32 = 0x7;

const PENDING_BASE: usize = 0x1000;
const ENABLE_BASE: usize = 0x2000;
const THRESHOLD: usize = 0x20_0000;
const CLAIM: usize = 0x20_0004;

struct PlicState {
    priority: [u32; SOURCES],
    pending: u64,
    enable: u64,
    threshold: u32,
    in_service: u64,
}

impl Default for PlicState {
    fn default() -> Self {
        Self {
            priority: [0; SOURCES],
            pending: 0,
            enable: 0,
            threshold: 0,
            in_service: 0,
        }
    }
}

impl PlicState {
    fn deliverable(&self) -> u64 {
        let mut mask = self.pending & self.enable & !self.in_service;
        let mut best = 0u64;
        while mask != 0 {
            let line = mask.trailing_zeros() as usize;
            if self.priority[line] > self.threshold {
                best |= 1 << line;
            }
            mask &= mask - 1;
        }
        best
    }

    /// Highest priority deliverable line, lowest id first on ties.
    fn claim(&mut self) -> u32 {
        let candidates = self.deliverable();
        let mut best: Option<usize> = None;
        for line in 1..SOURCES {
            if candidates & (1 << line) == 0 {
                continue;
            }
            if best.is_none_or(|b| self.priority[line] > self.priority[b]) {
                best = Some(line);
            }
        }
        match best {
            Some(line) => {
                self.pending &= !(1 << line);
                self.in_service |= 1 << line;
                line as u32
            }
            None => 0,
        }
    }
}

pub struct Plic {
    state: Mutex<PlicState>,
    hart: Mutex<()>,
    entry: OnceLock<&'static dyn IrqDispatch>,
    broken_threshold: bool,
}

impl Plic {
    pub fn new() -> Self {
        Self::with_fault(false)
    }

    /// A controller whose threshold register is stuck at zero, which fails
    /// the driver's self-test.
    pub fn with_fault(broken_threshold: bool) -> Self {
        Self {
            state: Mutex::new(PlicState::default()),
            hart: Mutex::new(()),
            entry: OnceLock::new(),
            broken_threshold,
        }
    }

    /// Routes deliverable interrupts to `entry`. Only the first call counts.
    pub fn install(&self, entry: &'static dyn IrqDispatch) {
        let _ = self.entry.set(entry);
        self.deliver();
    }

    /// Marks `line` pending and takes the interrupt if it is deliverable.
    pub fn raise(&self, line: u32) {
        if line == 0 || line as usize >= SOURCES {
            return;
        }
        self.lock().pending |= 1 << line;
        trace!("plic: line {} raised", line);
        self.deliver();
    }

    pub fn is_pending(&self, line: u32) -> bool {
        self.lock().pending & (1 << line) != 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PlicState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn deliver(&self) {
        let Some(entry) = self.entry.get() else {
            return;
        };
        let _hart = self.hart.lock().unwrap_or_else(|e| e.into_inner());
        if self.lock().deliverable() != 0 {
            entry.dispatch();
        }
    }
}

impl Default for Plic {
    fn default() -> Self {
        Self::new()
    }
}

impl SimDevice for Plic {
    fn read(&self, offset: usize) -> u32 {
        let mut state = self.lock();
        match offset {
            o if o < PENDING_BASE => state.priority.get(o / 4).copied().unwrap_or(0),
            PENDING_BASE => state.pending as u32,
            o if o == PENDING_BASE + 4 => (state.pending >> 32) as u32,
            ENABLE_BASE => state.enable as u32,
            o if o == ENABLE_BASE + 4 => (state.enable >> 32) as u32,
            THRESHOLD => state.threshold,
            CLAIM => state.claim(),
            _ => 0,
        }
    }

    fn write(&self, offset: usize, value: u32) {
        let mut state = self.lock();
        match offset {
            // Source 0 does not exist; its priority is hardwired to zero.
            0 => {}
            o if o < PENDING_BASE => {
                if let Some(p) = state.priority.get_mut(o / 4) {
                    *p = value & PRIORITY_MASK;
                }
            }
            ENABLE_BASE => state.enable = (state.enable & !0xFFFF_FFFF) | u64::from(value & !1),
            o if o == ENABLE_BASE + 4 => {
                state.enable = (state.enable & 0xFFFF_FFFF) | (u64::from(value) << 32)
            }
            THRESHOLD if !self.broken_threshold => state.threshold = value & PRIORITY_MASK,
            CLAIM => {
                if (value as usize) < SOURCES {
                    state.in_service &= !(1 << value);
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claim_prefers_priority_then_lowest_line() {
        let plic = Plic::new();
        plic.write(ENABLE_BASE, u32::MAX);
        plic.write(4 * 3, 1);
        plic.write(4 * 5, 2);
        plic.write(4 * 9, 2);
        for line in [3, 5, 9] {
            plic.raise(line);
        }
        assert_eq!(plic.read(CLAIM), 5);
        assert_eq!(plic.read(CLAIM), 9);
        assert_eq!(plic.read(CLAIM), 3);
        assert_eq!(plic.read(CLAIM), 0);
    }

    #[test]
    fn threshold_masks_low_priority_lines() {
        let plic = Plic::new();
        plic.write(ENABLE_BASE + 4, 1 << 29);
        plic.write(4 * 61, 1);
        plic.write(THRESHOLD, 1);
        plic.raise(61);
        assert_eq!(plic.read(CLAIM), 0);
        plic.write(THRESHOLD, 0);
        assert_eq!(plic.read(CLAIM), 61);
        assert!(!plic.is_pending(61));
    }

    #[test]
    fn reset_state_has_nothing_pending_or_enabled() {
        let plic = Plic::default();
        for line in 0..SOURCES {
            assert_eq!(plic.read(4 * line), 0);
        }
        assert_eq!(plic.read(PENDING_BASE), 0);
        assert_eq!(plic.read(ENABLE_BASE + 4), 0);
        assert_eq!(plic.read(THRESHOLD), 0);
        assert_eq!(plic.read(CLAIM), 0);
    }

    #[test]
    fn source_zero_and_stuck_threshold() {
        let plic = Plic::with_fault(true);
        plic.write(0, 7);
        assert_eq!(plic.read(0), 0);
        plic.write(THRESHOLD, 7);
        assert_eq!(plic.read(THRESHOLD), 0);
    }
}
