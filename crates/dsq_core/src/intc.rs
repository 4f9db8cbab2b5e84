//! Platform-level interrupt controller (PLIC) driver.
//!
//! The controller is a process-wide resource: it is initialized once, hooks
//! itself into the processor's external interrupt exception once, and keeps
//! a dispatch table mapping interrupt lines to handlers for the rest of the
//! program's life. All methods take `&self` so the table can be read from
//! interrupt context while the main flow holds a shared reference.

use crate::platform::Platform;
use crate::regs::RegisterBus;
use crate::{AccelError, Peripheral, RegistrationFault};
use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicBool, Ordering};
use dsq_common::params::IntcConfig;
use log::{debug, info};
use spin::Once;

/// Capacity of the dispatch table.
pub const MAX_SOURCES: usize = 64;

/// Highest priority level implemented by the controller.
pub const PRIORITY_MAX: u32 = 7;

const PRIORITY_BASE: usize = 0x0000;
const PENDING_BASE: usize = 0x1000;
const ENABLE_BASE: usize = 0x2000;
const ENABLE_STRIDE: usize = 0x80;
const CONTEXT_BASE: usize = 0x20_0000;
const CONTEXT_STRIDE: usize = 0x1000;
const CLAIM_OFFSET: usize = 0x4;

/// Priority assigned to every line a handler is bound to.
const HANDLER_PRIORITY: u32 = 1;

pub(crate) fn priority_offset(line: u32) -> usize {
    PRIORITY_BASE + 4 * line as usize
}

pub(crate) fn pending_offset(line: u32) -> usize {
    PENDING_BASE + 4 * (line as usize / 32)
}

pub(crate) fn enable_offset(context: u32, line: u32) -> usize {
    ENABLE_BASE + ENABLE_STRIDE * context as usize + 4 * (line as usize / 32)
}

pub(crate) fn threshold_offset(context: u32) -> usize {
    CONTEXT_BASE + CONTEXT_STRIDE * context as usize
}

pub(crate) fn claim_offset(context: u32) -> usize {
    threshold_offset(context) + CLAIM_OFFSET
}

/// Callback bound to an interrupt line.
///
/// Runs in interrupt context: it must not block, allocate, or log.
pub trait IrqHandler: Sync {
    fn handle(&self, line: u32);
}

/// Entry point invoked by the processor's external interrupt exception.
pub trait IrqDispatch: Sync {
    fn dispatch(&self);
}

/// One slot of the dispatch table.
///
/// `claimed` is taken once by the registering side, the handler is written,
/// then `ready` publishes it to interrupt context.
struct Vector {
    claimed: AtomicBool,
    ready: AtomicBool,
    handler: UnsafeCell<Option<&'static dyn IrqHandler>>,
}

// The handler cell is written once, before `ready` is published, and only
// read after `ready` is observed.
unsafe impl Sync for Vector {}

impl Vector {
    const fn new() -> Self {
        Self {
            claimed: AtomicBool::new(false),
            ready: AtomicBool::new(false),
            handler: UnsafeCell::new(None),
        }
    }

    fn handler(&self) -> Option<&'static dyn IrqHandler> {
        if self.ready.load(Ordering::Acquire) {
            unsafe { *self.handler.get() }
        } else {
            None
        }
    }
}

/// PLIC instance with its dispatch table.
pub struct InterruptController<B> {
    bus: Once<B>,
    config: Once<IntcConfig>,
    installed: AtomicBool,
    vectors: [Vector; MAX_SOURCES],
}

impl<B: RegisterBus + Send + Sync + 'static> InterruptController<B> {
    pub const fn new() -> Self {
        Self {
            bus: Once::new(),
            config: Once::new(),
            installed: AtomicBool::new(false),
            vectors: [const { Vector::new() }; MAX_SOURCES],
        }
    }

    /// Looks up the controller, binds its registers, runs the self-test and
    /// hooks the controller into the processor's interrupt exception.
    ///
    /// The register binding and the exception hook happen only on the first
    /// successful call; later calls re-run the self-test against the existing
    /// binding and leave the dispatch table untouched.
    ///
    /// # Errors
    ///
    /// * `HardwareLookup` if the platform has no entry for `device_id`.
    /// * `Initialization` if the register window cannot be bound or the
    ///   controller has more sources than the dispatch table holds.
    /// * `SelfTest` if the register self-test fails.
    pub fn initialize<P>(&'static self, platform: &P, device_id: u16) -> Result<(), AccelError>
    where
        P: Platform<Bus = B>,
    {
        let config = platform
            .intc_config(device_id)
            .ok_or(AccelError::HardwareLookup(Peripheral::InterruptController))?;
        if config.num_sources as usize > MAX_SOURCES {
            return Err(AccelError::Initialization(Peripheral::InterruptController));
        }

        let bus = self.bus.try_call_once(|| {
            platform
                .map(config.base_addr)
                .ok_or(AccelError::Initialization(Peripheral::InterruptController))
        })?;
        let config = *self.config.call_once(|| config);

        Self::self_test(bus, &config)?;
        // Accept every priority above zero.
        bus.write(threshold_offset(config.context), 0);

        if !self.installed.swap(true, Ordering::AcqRel) {
            info!(
                "PLIC {} at {:#x}: installing exception entry",
                config.device_id, config.base_addr
            );
            platform.install_irq_entry(self);
        }
        Ok(())
    }

    /// Source 0 is reserved and its priority is hardwired to zero; the
    /// context threshold must hold every written pattern.
    fn self_test(bus: &B, config: &IntcConfig) -> Result<(), AccelError> {
        if bus.read(priority_offset(0)) != 0 {
            return Err(AccelError::SelfTest);
        }
        let threshold = threshold_offset(config.context);
        for pattern in [PRIORITY_MAX, 0] {
            bus.write(threshold, pattern);
            if bus.read(threshold) != pattern {
                return Err(AccelError::SelfTest);
            }
        }
        Ok(())
    }

    /// Binds `handler` to `line` and enables the line.
    ///
    /// # Errors
    ///
    /// * `NotInitialized` before a successful [`initialize`](Self::initialize).
    /// * `LineOutOfRange` for the reserved line 0 or a line beyond the
    ///   controller's sources.
    /// * `AlreadyBound` if any handler was bound to the line before.
    pub fn register_handler(
        &self,
        line: u32,
        handler: &'static dyn IrqHandler,
    ) -> Result<(), AccelError> {
        let (Some(bus), Some(config)) = (self.bus.get(), self.config.get()) else {
            return Err(AccelError::Registration(RegistrationFault::NotInitialized));
        };
        if line == 0 || line >= config.num_sources {
            return Err(AccelError::Registration(RegistrationFault::LineOutOfRange));
        }

        let vector = &self.vectors[line as usize];
        if vector
            .claimed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(AccelError::Registration(RegistrationFault::AlreadyBound));
        }
        unsafe { *vector.handler.get() = Some(handler) };
        vector.ready.store(true, Ordering::Release);

        bus.write(priority_offset(line), HANDLER_PRIORITY);
        bus.set_bits(enable_offset(config.context, line), 1 << (line % 32));
        debug!("PLIC: line {} bound and enabled", line);
        Ok(())
    }

    /// Sets the enable bit for `line` in this hart context. No-op before
    /// initialization.
    pub fn enable(&self, line: u32) {
        if let (Some(bus), Some(config)) = (self.bus.get(), self.config.get()) {
            bus.set_bits(enable_offset(config.context, line), 1 << (line % 32));
        }
    }

    /// Clears the enable bit for `line`.
    pub fn disable(&self, line: u32) {
        if let (Some(bus), Some(config)) = (self.bus.get(), self.config.get()) {
            bus.clear_bits(enable_offset(config.context, line), 1 << (line % 32));
        }
    }

    /// Whether a handler has been published for `line`.
    pub fn is_bound(&self, line: u32) -> bool {
        self.vectors
            .get(line as usize)
            .is_some_and(|v| v.ready.load(Ordering::Acquire))
    }

    /// Reads the pending bit of `line`; false before initialization.
    pub fn is_pending(&self, line: u32) -> bool {
        self.bus
            .get()
            .is_some_and(|bus| bus.read(pending_offset(line)) & (1 << (line % 32)) != 0)
    }
}

impl<B: RegisterBus + Send + Sync + 'static> Default for InterruptController<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: RegisterBus + Send + Sync + 'static> IrqDispatch for InterruptController<B> {
    /// Claims the highest-priority pending line, runs its handler and
    /// completes the claim.
    fn dispatch(&self) {
        let (Some(bus), Some(config)) = (self.bus.get(), self.config.get()) else {
            return;
        };
        let claim = claim_offset(config.context);
        let line = bus.read(claim);
        if line == 0 {
            return;
        }

        match self.vectors.get(line as usize).and_then(Vector::handler) {
            Some(handler) => handler.handle(line),
            // Nobody listens on this line; keep it from firing again.
            None => self.disable(line),
        }
        bus.write(claim, line);
    }
}
