use core::sync::atomic::{AtomicBool, Ordering};

/// Completion flag raised by the interrupt handler and consumed by the
/// polling side.
///
/// The handler raises it only after the accelerator's pending interrupt has
/// been cleared; the release store orders those register writes before the
/// flag, and the acquire load on the waiting side orders the result read
/// after it.
pub struct CompletionSignal {
    done: AtomicBool,
}

impl CompletionSignal {
    pub const fn new() -> Self {
        Self {
            done: AtomicBool::new(false),
        }
    }

    /// Posts the completion.
    #[inline(always)]
    pub fn raise(&self) {
        self.done.store(true, Ordering::Release);
    }

    /// Drops any stale completion before a new run is armed.
    #[inline(always)]
    pub fn clear(&self) {
        self.done.store(false, Ordering::Release);
    }

    #[inline(always)]
    pub fn is_raised(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    /// Consumes a posted completion, returning whether one was pending.
    #[inline(always)]
    pub fn take(&self) -> bool {
        self.done.swap(false, Ordering::AcqRel)
    }
}

impl Default for CompletionSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_consumes_a_single_completion() {
        let signal = CompletionSignal::new();
        assert!(!signal.take());
        signal.raise();
        assert!(signal.is_raised());
        assert!(signal.take());
        assert!(!signal.take());
    }

    #[test]
    fn clear_drops_stale_completion() {
        let signal = CompletionSignal::new();
        signal.raise();
        signal.clear();
        assert!(!signal.is_raised());
    }
}
