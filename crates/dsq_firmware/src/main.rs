//! Bare-metal driver program for the distance-squared accelerator.
//!
//! With `use_fpga_mmio`, brings the accelerator up, checks a one-shot
//! invocation on the ramp pair against the software reference, then exercises
//! continuous mode for a few passes. Without it the image runs on QEMU `virt`,
//! where the accelerator and DMA windows do not exist, and only checks the
//! software kernel. Either way the outcome goes out through the test finisher.

#![no_std]
#![no_main]

mod console;
mod logger;
#[cfg(feature = "use_fpga_mmio")]
mod platform;
mod trap;

use core::arch::global_asm;
use dsq_common::{VECTOR_LEN, mmio};
use dsq_core::AccelError;
use dsq_core::reference::{distance_squared, relative_error};
use log::{LevelFilter, error, info};
#[cfg(feature = "use_fpga_mmio")]
use {
    dsq_core::regs::Mmio,
    dsq_core::{AcceleratorContext, AcceleratorController, ControllerConfig, RunMode},
    platform::FirmwarePlatform,
};

global_asm!(include_str!("entry.S"));

/// Controller state shared with the completion interrupt.
#[cfg(feature = "use_fpga_mmio")]
static CONTEXT: AcceleratorContext<Mmio, VECTOR_LEN> = AcceleratorContext::new();

/// Restarts observed in the continuous-mode check.
#[cfg(feature = "use_fpga_mmio")]
const CONTINUOUS_PASSES: usize = 3;

/// Sum of squares of `0..VECTOR_LEN`, the known answer for the ramp pair.
const RAMP_EXPECTED: f64 = 5_559_680.0;

const TOLERANCE: f64 = 1e-9;

const FINISHER_PASS: u32 = 0x5555;
const FINISHER_FAIL: u32 = 0x3333;

#[unsafe(no_mangle)]
pub extern "C" fn kmain() -> ! {
    console::init();
    if logger::init(LevelFilter::Info).is_err() {
        console::println!("[BOOT] logger already installed");
    }
    console::println!("[BOOT] distance-squared accelerator test");

    let code = match run() {
        Ok(true) => {
            console::println!("Test passed");
            FINISHER_PASS
        }
        Ok(false) => {
            console::println!("Test failed: result mismatch");
            1 << 16 | FINISHER_FAIL
        }
        Err(err) => {
            error!("{}", err);
            console::println!("Test failed");
            2 << 16 | FINISHER_FAIL
        }
    };
    finish(code)
}

fn check(label: &str, actual: f64, expected: f64) -> bool {
    let ok = relative_error(actual, expected) < TOLERANCE;
    console::println!(
        "{}: got {} expected {} {}",
        label,
        actual,
        expected,
        if ok { "ok" } else { "MISMATCH" }
    );
    ok
}

fn ramp_pair() -> ([f64; VECTOR_LEN], [f64; VECTOR_LEN]) {
    (
        core::array::from_fn(|i| i as f64),
        core::array::from_fn(|i| 2.0 * i as f64),
    )
}

#[cfg(not(feature = "use_fpga_mmio"))]
fn run() -> Result<bool, AccelError> {
    info!("no accelerator on this board; checking the software kernel");
    let (a, b) = ramp_pair();
    Ok(check("software", distance_squared(&a, &b), RAMP_EXPECTED))
}

#[cfg(feature = "use_fpga_mmio")]
fn run() -> Result<bool, AccelError> {
    let config = ControllerConfig {
        timeout_ms: Some(1_000),
        ..ControllerConfig::default()
    };
    let mut controller = AcceleratorController::new(FirmwarePlatform, &CONTEXT, config)?;
    controller.setup()?;
    info!("accelerator ready");

    let (a, b) = ramp_pair();
    let expected = distance_squared(&a, &b);
    let mut ok = check("software", expected, RAMP_EXPECTED);

    ok &= check("one-shot", controller.compute(&a, &b)?, expected);

    controller.run(&a, &b, RunMode::Continuous)?;
    for pass in 1..=CONTINUOUS_PASSES {
        controller.wait()?;
        info!("pass {}: {:?}", pass, controller.state());
        ok &= check("continuous", controller.read_result()?, expected);
        if pass + 1 == CONTINUOUS_PASSES {
            controller.stop();
        }
        if pass < CONTINUOUS_PASSES {
            controller.feed(&a, &b)?;
        }
    }
    info!("final state {:?}", controller.state());
    Ok(ok)
}

fn finish(code: u32) -> ! {
    unsafe { (mmio::TEST_FINISHER as *mut u32).write_volatile(code) };
    loop {
        core::hint::spin_loop();
    }
}

#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    console::println!("PANIC: {}", info);
    finish(3 << 16 | FINISHER_FAIL)
}
