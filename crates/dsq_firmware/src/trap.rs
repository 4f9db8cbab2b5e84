//! Machine-mode trap handler.
//!
//! External interrupts are handed to the interrupt controller's dispatcher,
//! timer interrupts are pushed far into the future, and any exception is
//! fatal.

#[cfg(feature = "use_fpga_mmio")]
use crate::platform::IRQ_ENTRY;
use dsq_common::mmio::{MTIME_ADDR, MTIMECMP_ADDR};
use riscv::register::{mcause, mepc, mtval};

const MACHINE_TIMER: usize = 7;
#[cfg(feature = "use_fpga_mmio")]
const MACHINE_EXTERNAL: usize = 11;

/// Called from `trap_vector` in `entry.S` with the caller-saved registers
/// already spilled. Must not print on the interrupt paths: the console lock
/// may be held by the interrupted flow.
#[unsafe(no_mangle)]
pub extern "C" fn rust_trap_handler() {
    let cause = mcause::read();

    if cause.is_interrupt() {
        match cause.code() {
            #[cfg(feature = "use_fpga_mmio")]
            MACHINE_EXTERNAL => {
                if let Some(entry) = IRQ_ENTRY.get() {
                    entry.dispatch();
                }
            }
            MACHINE_TIMER => unsafe {
                let now = (MTIME_ADDR as *const u64).read_volatile();
                (MTIMECMP_ADDR as *mut u64).write_volatile(now + 10_000_000);
            },
            _ => {}
        }
        return;
    }

    panic!(
        "exception {} at {:#x} (mtval {:#x})",
        cause.code(),
        mepc::read(),
        mtval::read()
    );
}
