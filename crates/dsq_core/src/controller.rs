use crate::accel::{AccelIrq, AcceleratorDevice};
use crate::dma::{Direction, DmaChannel, TransferRequest};
use crate::intc::{InterruptController, IrqHandler};
use crate::platform::Platform;
use crate::regs::RegisterBus;
use crate::signal::CompletionSignal;
use crate::{AccelError, TransferFault};
use core::cell::UnsafeCell;
use core::mem::size_of;
use core::sync::atomic::{AtomicBool, Ordering};
use dsq_common::params::{self, AcceleratorConfig};
use log::{debug, error, info, trace};
use spin::Once;

/// Device-visible copies of the two input vectors.
#[repr(C, align(64))]
struct Staging<const N: usize> {
    a: [f64; N],
    b: [f64; N],
}

/// State shared between the controller and the completion interrupt.
///
/// The interrupt controller keeps a `'static` reference to the context as
/// the handler for the accelerator's line, so a context must never move:
/// declare it as a `static` or leak it.
pub struct AcceleratorContext<B, const N: usize> {
    intc: InterruptController<B>,
    device: Once<AcceleratorDevice<B>>,
    signal: CompletionSignal,
    continuous: AtomicBool,
    staging: UnsafeCell<Staging<N>>,
    owned: AtomicBool,
}

// `staging` is written only by the owning controller, and only while no DMA
// transfer from it is outstanding; the interrupt handler never touches it.
unsafe impl<B: Send + Sync, const N: usize> Sync for AcceleratorContext<B, N> {}

impl<B: RegisterBus + Send + Sync + 'static, const N: usize> AcceleratorContext<B, N> {
    pub const fn new() -> Self {
        Self {
            intc: InterruptController::new(),
            device: Once::new(),
            signal: CompletionSignal::new(),
            continuous: AtomicBool::new(false),
            staging: UnsafeCell::new(Staging {
                a: [0.0; N],
                b: [0.0; N],
            }),
            owned: AtomicBool::new(false),
        }
    }

    /// Interrupt controller whose dispatch table routes to this context.
    pub fn interrupt_controller(&self) -> &InterruptController<B> {
        &self.intc
    }
}

impl<B: RegisterBus + Send + Sync + 'static, const N: usize> Default for AcceleratorContext<B, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: RegisterBus + Send + Sync + 'static, const N: usize> IrqHandler for AcceleratorContext<B, N> {
    /// Completion interrupt.
    ///
    /// The global gate goes down before anything else and the signal is
    /// raised only after the local interrupt is acknowledged. The running
    /// flag is settled before the signal so the waiting side reads a
    /// consistent value.
    fn handle(&self, _line: u32) {
        let Some(device) = self.device.get() else {
            return;
        };
        device.disable_global_interrupt();
        device.disable_interrupts(AccelIrq::all());
        device.clear_interrupt(AccelIrq::AP_DONE);

        let restart = self.continuous.load(Ordering::Acquire);
        if !restart {
            device.mark_stopped();
        }
        self.signal.raise();

        if restart {
            device.enable_interrupts(AccelIrq::AP_DONE);
            device.enable_global_interrupt();
            device.start();
        }
    }
}

/// Board wiring of one accelerator instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerConfig {
    pub accelerator: AcceleratorConfig,
    pub intc_device_id: u16,
    /// Interrupt line the accelerator's `interrupt` output is wired to.
    pub irq_line: u32,
    pub dma_a_device_id: u16,
    pub dma_b_device_id: u16,
    /// Deadline for each completion; `None` waits forever.
    pub timeout_ms: Option<u32>,
    /// Poll both DMA channels until idle before waiting for completion.
    pub await_transfers: bool,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            accelerator: params::DISTANCE_SQUARED_CONFIG,
            intc_device_id: params::PLIC_DEVICE_ID,
            irq_line: params::DISTANCE_SQUARED_IRQ,
            dma_a_device_id: params::DMA_A_DEVICE_ID,
            dma_b_device_id: params::DMA_B_DEVICE_ID,
            timeout_ms: None,
            await_transfers: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Uninitialized,
    Configured,
    Running,
    Completed,
    /// A run timed out or a transfer failed after start. Terminal.
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunMode {
    #[default]
    OneShot,
    /// The completion handler restarts the accelerator immediately.
    Continuous,
}

/// Sequences bring-up and invocation of one accelerator.
///
/// ```text
/// Uninitialized --setup--> Configured --run--> Running --wait--> Completed
///                                                 ^   |            |
///                                                 |   +--(continuous)
///                                                 +------run-------+
/// ```
pub struct AcceleratorController<P: Platform, const N: usize> {
    platform: P,
    ctx: &'static AcceleratorContext<P::Bus, N>,
    config: ControllerConfig,
    dma: Option<(DmaChannel<P::Bus>, DmaChannel<P::Bus>)>,
    state: ControllerState,
    mode: RunMode,
    result_ready: bool,
    deadline: Option<u64>,
}

/// Logs a failed bring-up stage and passes the result through.
fn stage<T>(name: &str, result: Result<T, AccelError>) -> Result<T, AccelError> {
    match &result {
        Ok(_) => info!("{}: ok", name),
        Err(err) => error!("{}: {}", name, err),
    }
    result
}

impl<P: Platform, const N: usize> AcceleratorController<P, N> {
    /// Takes ownership of `ctx`.
    ///
    /// # Errors
    ///
    /// `ContextInUse` if another controller was ever created on `ctx`.
    pub fn new(
        platform: P,
        ctx: &'static AcceleratorContext<P::Bus, N>,
        config: ControllerConfig,
    ) -> Result<Self, AccelError> {
        if ctx.owned.swap(true, Ordering::AcqRel) {
            return Err(AccelError::ContextInUse);
        }
        Ok(Self {
            platform,
            ctx,
            config,
            dma: None,
            state: ControllerState::Uninitialized,
            mode: RunMode::OneShot,
            result_ready: false,
            deadline: None,
        })
    }

    /// Brings the hardware up: accelerator, interrupt controller, completion
    /// handler, then DMA engines A and B.
    ///
    /// The first failing stage aborts bring-up and its error is returned;
    /// later stages are not attempted and the state does not change. Once
    /// bring-up has succeeded, every further call stops at the handler
    /// stage with `Registration(AlreadyBound)`.
    pub fn setup(&mut self) -> Result<(), AccelError> {
        match self.state {
            ControllerState::Uninitialized
            | ControllerState::Configured
            | ControllerState::Completed => {}
            state => return Err(AccelError::InvalidState(state)),
        }
        let ctx = self.ctx;
        let config = self.config;
        let platform = &self.platform;

        stage(
            "accelerator",
            ctx.device
                .try_call_once(|| AcceleratorDevice::initialize(platform, config.accelerator))
                .map(|_| ()),
        )?;
        stage(
            "interrupt controller",
            ctx.intc.initialize(platform, config.intc_device_id),
        )?;
        stage(
            "completion handler",
            ctx.intc.register_handler(config.irq_line, ctx),
        )?;
        let dma_a = stage("DMA A", DmaChannel::configure(platform, config.dma_a_device_id))?;
        let dma_b = stage("DMA B", DmaChannel::configure(platform, config.dma_b_device_id))?;

        self.dma = Some((dma_a, dma_b));
        if self.state == ControllerState::Uninitialized {
            self.state = ControllerState::Configured;
        }
        Ok(())
    }

    fn device(&self) -> Result<&'static AcceleratorDevice<P::Bus>, AccelError> {
        let ctx = self.ctx;
        ctx.device.get().ok_or(AccelError::InvalidState(self.state))
    }

    /// Arms the completion interrupt, starts the accelerator and streams
    /// `a` and `b` to it. Returns without waiting for completion.
    pub fn run(&mut self, a: &[f64; N], b: &[f64; N], mode: RunMode) -> Result<(), AccelError> {
        match self.state {
            ControllerState::Configured | ControllerState::Completed => {}
            state => return Err(AccelError::InvalidState(state)),
        }
        let device = self.device()?;

        self.ctx.signal.clear();
        self.ctx
            .continuous
            .store(mode == RunMode::Continuous, Ordering::Release);
        self.mode = mode;
        self.result_ready = false;

        device.enable_interrupts(AccelIrq::AP_DONE);
        device.enable_global_interrupt();
        device.start();
        self.state = ControllerState::Running;
        debug!("accelerator started ({:?})", mode);

        self.begin_stream(a, b)
    }

    /// Streams the next pair into an accelerator the completion handler
    /// already restarted.
    pub fn feed(&mut self, a: &[f64; N], b: &[f64; N]) -> Result<(), AccelError> {
        if self.state != ControllerState::Running || !self.result_ready {
            return Err(AccelError::InvalidState(self.state));
        }
        self.result_ready = false;
        self.begin_stream(a, b)
    }

    fn begin_stream(&mut self, a: &[f64; N], b: &[f64; N]) -> Result<(), AccelError> {
        self.deadline = self
            .config
            .timeout_ms
            .map(|ms| self.platform.now() + u64::from(ms) * self.platform.ticks_per_ms());

        if let Err(err) = self.stream(a, b) {
            error!("streaming inputs failed: {}", err);
            self.abort();
            return Err(err);
        }
        if self.config.await_transfers {
            if let Err(err) = self.await_transfers() {
                self.abort();
                return Err(err);
            }
        }
        Ok(())
    }

    fn stream(&self, a: &[f64; N], b: &[f64; N]) -> Result<(), AccelError> {
        let Some((dma_a, dma_b)) = &self.dma else {
            return Err(AccelError::InvalidState(self.state));
        };
        if dma_a.is_busy(Direction::HostToDevice) || dma_b.is_busy(Direction::HostToDevice) {
            return Err(AccelError::Transfer(TransferFault::Busy));
        }

        let staging = self.ctx.staging.get();
        // Both channels are idle, so nothing reads the staging buffers.
        let (addr_a, addr_b) = unsafe {
            (*staging).a = *a;
            (*staging).b = *b;
            (
                (*staging).a.as_ptr() as usize,
                (*staging).b.as_ptr() as usize,
            )
        };
        let len = N * size_of::<f64>();
        self.platform.flush_dcache_range(addr_a, len);
        self.platform.flush_dcache_range(addr_b, len);

        dma_a.transfer(TransferRequest {
            addr: addr_a,
            len,
            direction: Direction::HostToDevice,
        })?;
        dma_b.transfer(TransferRequest {
            addr: addr_b,
            len,
            direction: Direction::HostToDevice,
        })?;
        trace!("DMA: {} bytes from {:#x} and {:#x}", len, addr_a, addr_b);
        Ok(())
    }

    fn await_transfers(&self) -> Result<(), AccelError> {
        let Some((dma_a, dma_b)) = &self.dma else {
            return Err(AccelError::InvalidState(self.state));
        };
        while dma_a.is_busy(Direction::HostToDevice) || dma_b.is_busy(Direction::HostToDevice) {
            if self.expired() {
                error!("DMA transfers did not drain before the deadline");
                return Err(AccelError::Timeout);
            }
            self.platform.relax();
        }
        trace!("DMA: both channels idle");
        Ok(())
    }

    fn expired(&self) -> bool {
        self.deadline
            .is_some_and(|deadline| self.platform.now() >= deadline)
    }

    /// Blocks until the completion interrupt has fired.
    ///
    /// Afterwards the state is `Running` if the handler restarted the
    /// accelerator, `Completed` otherwise.
    ///
    /// # Errors
    ///
    /// `Timeout` if the configured deadline passes first; the accelerator is
    /// disarmed and the controller enters `Failed`.
    pub fn wait(&mut self) -> Result<(), AccelError> {
        if self.state != ControllerState::Running || self.result_ready {
            return Err(AccelError::InvalidState(self.state));
        }
        debug!("waiting for accelerator completion");
        while !self.ctx.signal.take() {
            if self.expired() {
                error!("accelerator did not complete before the deadline");
                self.abort();
                return Err(AccelError::Timeout);
            }
            self.platform.relax();
        }

        self.result_ready = true;
        self.state = if self.device()?.is_running() {
            ControllerState::Running
        } else {
            ControllerState::Completed
        };
        debug!("accelerator completed, now {:?}", self.state);
        Ok(())
    }

    /// Result of the most recent completion.
    pub fn read_result(&self) -> Result<f64, AccelError> {
        if !self.result_ready {
            return Err(AccelError::InvalidState(self.state));
        }
        Ok(self.device()?.read_result())
    }

    /// Blocking one-shot invocation: sum of squared differences of `a`
    /// and `b` as computed by the accelerator.
    pub fn compute(&mut self, a: &[f64; N], b: &[f64; N]) -> Result<f64, AccelError> {
        self.run(a, b, RunMode::OneShot)?;
        self.wait()?;
        self.read_result()
    }

    /// Leaves continuous mode. An accelerator that was already restarted
    /// still needs one more `feed` and `wait` to finish.
    pub fn stop(&mut self) {
        self.ctx.continuous.store(false, Ordering::Release);
        self.mode = RunMode::OneShot;
    }

    /// Stop path for the accelerator: leaves it stopped with every interrupt
    /// source masked and acknowledged.
    fn disarm(&self) {
        self.ctx.continuous.store(false, Ordering::Release);
        if let Some(device) = self.ctx.device.get() {
            device.disable_global_interrupt();
            device.disable_interrupts(AccelIrq::all());
            device.clear_interrupt(device.interrupt_status());
            device.mark_stopped();
        }
        self.ctx.signal.clear();
    }

    fn abort(&mut self) {
        self.disarm();
        self.result_ready = false;
        self.mode = RunMode::OneShot;
        self.state = ControllerState::Failed;
    }

    /// Current position in the state machine.
    pub fn state(&self) -> ControllerState {
        self.state
    }

    /// Mode of the current or most recent run. `stop` and a failure reset
    /// it to one-shot.
    pub fn mode(&self) -> RunMode {
        self.mode
    }

    /// Whether the accelerator is active, including a restart issued by the
    /// completion handler.
    pub fn device_running(&self) -> bool {
        self.ctx.device.get().is_some_and(|device| device.is_running())
    }

    /// Wiring and timing the controller was created with.
    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Board the controller drives.
    pub fn platform(&self) -> &P {
        &self.platform
    }
}

impl<P: Platform, const N: usize> Drop for AcceleratorController<P, N> {
    fn drop(&mut self) {
        if self.state == ControllerState::Running {
            self.disarm();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intc::IrqDispatch;
    use crate::regs::mock::RegFile;
    use dsq_common::params::{DmaConfig, IntcConfig, lookup_dma, lookup_intc};
    use dsq_common::mmio;
    use std::boxed::Box;

    const LINE: u32 = params::DISTANCE_SQUARED_IRQ;

    /// One register file per peripheral, all permanently idle.
    struct Board {
        plic: &'static RegFile,
        dma_a: &'static RegFile,
        dma_b: &'static RegFile,
        accel: &'static RegFile,
    }

    fn leak() -> &'static RegFile {
        Box::leak(Box::default())
    }

    impl Board {
        fn new() -> Self {
            let board = Self {
                plic: leak(),
                dma_a: leak(),
                dma_b: leak(),
                accel: leak(),
            };
            for dma in [board.dma_a, board.dma_b] {
                dma.set(0x04, 1);
                dma.self_clearing(0x00, 1 << 2);
            }
            board
        }
    }

    impl Platform for &Board {
        type Bus = &'static RegFile;

        fn intc_config(&self, device_id: u16) -> Option<IntcConfig> {
            lookup_intc(device_id)
        }

        fn dma_config(&self, device_id: u16) -> Option<DmaConfig> {
            lookup_dma(device_id)
        }

        fn map(&self, base_addr: usize) -> Option<&'static RegFile> {
            match base_addr {
                mmio::PLIC_BASE => Some(self.plic),
                mmio::DMA_A_BASE => Some(self.dma_a),
                mmio::DMA_B_BASE => Some(self.dma_b),
                mmio::DISTANCE_SQUARED_BASE => Some(self.accel),
                _ => None,
            }
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

    type Ctx = AcceleratorContext<&'static RegFile, 4>;

    fn context() -> &'static Ctx {
        Box::leak(Box::new(Ctx::new()))
    }

    fn board() -> &'static Board {
        Box::leak(Box::new(Board::new()))
    }

    const A: [f64; 4] = [0.0, 1.0, 2.0, 3.0];
    const B: [f64; 4] = [0.0, 2.0, 4.0, 6.0];

    #[test]
    fn context_has_a_single_owner() {
        let ctx = context();
        let _first = AcceleratorController::new(board(), ctx, ControllerConfig::default()).unwrap();
        assert!(matches!(
            AcceleratorController::new(board(), ctx, ControllerConfig::default()),
            Err(AccelError::ContextInUse)
        ));
    }

    #[test]
    fn operations_require_setup() {
        let mut ctl = AcceleratorController::new(board(), context(), ControllerConfig::default()).unwrap();
        assert_eq!(
            ctl.run(&A, &B, RunMode::OneShot),
            Err(AccelError::InvalidState(ControllerState::Uninitialized))
        );
        assert_eq!(
            ctl.wait(),
            Err(AccelError::InvalidState(ControllerState::Uninitialized))
        );
        assert_eq!(
            ctl.read_result(),
            Err(AccelError::InvalidState(ControllerState::Uninitialized))
        );
    }

    #[test]
    fn one_shot_completion_through_dispatch() {
        let board = board();
        let ctx = context();
        let mut ctl = AcceleratorController::new(board, ctx, ControllerConfig::default()).unwrap();
        ctl.setup().unwrap();
        assert_eq!(ctl.state(), ControllerState::Configured);

        ctl.run(&A, &B, RunMode::OneShot).unwrap();
        assert_eq!(ctl.state(), ControllerState::Running);
        assert!(ctl.device_running());
        assert_eq!(board.accel.get(0x04), 1);
        assert_eq!(board.dma_a.get(0x28), 32);
        assert_eq!(board.dma_b.get(0x28), 32);

        let bits = 14.0f64.to_bits();
        board.accel.set(0x10, bits as u32);
        board.accel.set(0x14, (bits >> 32) as u32);
        board.plic.set(crate::intc::claim_offset(0), LINE);
        ctx.interrupt_controller().dispatch();

        // Gate down, sources masked, done acknowledged.
        assert_eq!(board.accel.get(0x04), 0);
        assert_eq!(board.accel.get(0x08), 0);
        assert_eq!(board.accel.get(0x0C), 1);

        ctl.wait().unwrap();
        assert_eq!(ctl.state(), ControllerState::Completed);
        assert!(!ctl.device_running());
        assert_eq!(ctl.read_result(), Ok(14.0));
    }

    #[test]
    fn continuous_mode_restarts_from_the_handler() {
        let board = board();
        let ctx = context();
        let mut ctl = AcceleratorController::new(board, ctx, ControllerConfig::default()).unwrap();
        ctl.setup().unwrap();

        ctl.run(&A, &B, RunMode::Continuous).unwrap();
        ctx.handle(LINE);
        ctl.wait().unwrap();
        assert_eq!(ctl.state(), ControllerState::Running);
        assert!(ctl.device_running());
        assert_eq!(board.accel.get(0x04), 1);
        assert_eq!(board.accel.get(0x00) & 1, 1);
        assert_eq!(ctl.wait(), Err(AccelError::InvalidState(ControllerState::Running)));

        ctl.stop();
        ctl.feed(&B, &A).unwrap();
        ctx.handle(LINE);
        ctl.wait().unwrap();
        assert_eq!(ctl.state(), ControllerState::Completed);
        assert_eq!(ctl.mode(), RunMode::OneShot);
    }

    #[test]
    fn expired_deadline_fails_the_controller() {
        let config = ControllerConfig {
            timeout_ms: Some(0),
            ..ControllerConfig::default()
        };
        let board = board();
        let mut ctl = AcceleratorController::new(board, context(), config).unwrap();
        ctl.setup().unwrap();
        ctl.run(&A, &B, RunMode::Continuous).unwrap();

        assert_eq!(ctl.wait(), Err(AccelError::Timeout));
        assert_eq!(ctl.state(), ControllerState::Failed);
        assert!(!ctl.device_running());
        assert_eq!(board.accel.get(0x04), 0);
        assert_eq!(
            ctl.run(&A, &B, RunMode::OneShot),
            Err(AccelError::InvalidState(ControllerState::Failed))
        );
    }

    #[test]
    fn engine_fault_after_start_leaves_device_stopped() {
        let board = board();
        let mut ctl = AcceleratorController::new(board, context(), ControllerConfig::default()).unwrap();
        ctl.setup().unwrap();
        // Halted with a slave error latched.
        board.dma_b.set(0x04, 1 | 1 << 5);

        assert_eq!(
            ctl.run(&A, &B, RunMode::Continuous),
            Err(AccelError::Transfer(TransferFault::EngineFault))
        );
        assert_eq!(ctl.state(), ControllerState::Failed);
        assert!(!ctl.device_running());
        assert_eq!(board.accel.get(0x04), 0);
        assert_eq!(board.accel.get(0x08), 0);
        assert_eq!(board.dma_a.get(0x28), 32);
        assert_eq!(board.dma_b.get(0x28), 0);
        assert_eq!(
            ctl.feed(&A, &B),
            Err(AccelError::InvalidState(ControllerState::Failed))
        );
    }

    #[test]
    fn setup_after_a_completed_run_fails_registration() {
        let board = board();
        let ctx = context();
        let mut ctl = AcceleratorController::new(board, ctx, ControllerConfig::default()).unwrap();
        ctl.setup().unwrap();
        ctl.run(&A, &B, RunMode::OneShot).unwrap();
        ctx.handle(LINE);
        ctl.wait().unwrap();
        assert_eq!(ctl.state(), ControllerState::Completed);

        assert_eq!(
            ctl.setup(),
            Err(AccelError::Registration(crate::RegistrationFault::AlreadyBound))
        );
        assert_eq!(ctl.state(), ControllerState::Completed);
        assert_eq!(ctl.read_result(), Ok(0.0));
    }

    #[test]
    fn second_setup_fails_registration() {
        let mut ctl = AcceleratorController::new(board(), context(), ControllerConfig::default()).unwrap();
        ctl.setup().unwrap();
        assert_eq!(
            ctl.setup(),
            Err(AccelError::Registration(crate::RegistrationFault::AlreadyBound))
        );
        assert_eq!(ctl.state(), ControllerState::Configured);
    }
}
