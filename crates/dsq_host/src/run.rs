//! Accelerator invocation on the simulated board.
//!
//! Brings the controller up on a fresh simulated system-on-chip, feeds it
//! either the standard ramp pair or two vectors from a dataset, and checks
//! every result against the software reference.

use anyhow::{Context, Result, anyhow, bail, ensure};
use dsq_common::VECTOR_LEN;
use dsq_core::reference::{distance_squared, relative_error};
use dsq_core::{AcceleratorContext, AcceleratorController, ControllerConfig, RunMode};
use dsq_hw::{SimPlatform, SocBuilder};
use dsq_io::DatasetRecord;
use log::info;
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// Largest accepted relative error against the reference.
const TOLERANCE: f64 = 1e-9;

pub struct RunOptions {
    pub dataset: Option<PathBuf>,
    pub a: usize,
    pub b: usize,
    pub continuous: Option<usize>,
    pub timeout_ms: Option<u32>,
    pub await_transfers: bool,
    pub latency_us: u64,
}

type Vector = [f64; VECTOR_LEN];

fn load_pair(options: &RunOptions) -> Result<(Vector, Vector)> {
    let Some(path) = &options.dataset else {
        return Ok((
            std::array::from_fn(|i| i as f64),
            std::array::from_fn(|i| 2.0 * i as f64),
        ));
    };
    let record = DatasetRecord::load_from_file(path)
        .with_context(|| format!("Failed to load {}", path.display()))?;
    ensure!(
        record.vector_dims == VECTOR_LEN as u64,
        "accelerator is built for {} elements, dataset has {}",
        VECTOR_LEN,
        record.vector_dims
    );
    let row = |i: usize| -> Result<Vector> {
        let slice = record
            .vector(i)
            .ok_or_else(|| anyhow!("dataset has no vector {}", i))?;
        Ok(<Vector>::try_from(slice)?)
    };
    Ok((row(options.a)?, row(options.b)?))
}

fn check(label: &str, actual: f64, a: &Vector, b: &Vector) -> Result<()> {
    let expected = distance_squared(a, b);
    let error = relative_error(actual, expected);
    println!(
        "{}: accelerator {:.6} reference {:.6} (rel. error {:.2e})",
        label, actual, expected, error
    );
    if error >= TOLERANCE {
        bail!("{}: result outside tolerance", label);
    }
    Ok(())
}

pub fn run_simulation(options: &RunOptions) -> Result<()> {
    let (a, b) = load_pair(options)?;

    let platform = SocBuilder::new()
        .latency(Duration::from_micros(options.latency_us))
        .build();
    let context: &'static AcceleratorContext<_, VECTOR_LEN> =
        Box::leak(Box::new(AcceleratorContext::new()));
    let config = ControllerConfig {
        timeout_ms: options.timeout_ms,
        await_transfers: options.await_transfers,
        ..ControllerConfig::default()
    };
    let mut controller: AcceleratorController<SimPlatform, VECTOR_LEN> =
        AcceleratorController::new(platform, context, config)?;

    controller.setup().context("Accelerator bring-up failed")?;
    info!("controller {:?}", controller.state());

    let start = Instant::now();
    match options.continuous {
        None | Some(0) | Some(1) => {
            let result = controller.compute(&a, &b)?;
            check("one-shot", result, &a, &b)?;
        }
        Some(iterations) => {
            controller.run(&a, &b, RunMode::Continuous)?;
            for i in 1..=iterations {
                controller.wait()?;
                check(&format!("pass {}", i), controller.read_result()?, &a, &b)?;
                if i + 1 == iterations {
                    controller.stop();
                }
                if i < iterations {
                    controller.feed(&a, &b)?;
                }
            }
        }
    }

    println!("Final state: {:?}", controller.state());
    println!("Elapsed: {:?}", start.elapsed());
    Ok(())
}
