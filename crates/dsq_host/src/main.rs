mod generator;
mod inspect;
mod outliers;
mod run;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Writes a dataset of ramp vectors with their k-NN outliers.
    Gen {
        #[arg(long)]
        out: PathBuf,
        #[arg(long, default_value_t = 2)]
        vectors: usize,
        #[arg(long, default_value_t = dsq_common::VECTOR_LEN)]
        dims: usize,
        #[arg(long, default_value_t = 1)]
        k: usize,
        #[arg(long, default_value_t = 1)]
        top_n: usize,
        #[arg(long, default_value_t = 1)]
        block_size: u64,
    },
    /// Prints a dataset's header and outliers.
    Inspect { file: PathBuf },
    /// Runs the accelerator on the simulated board and checks the result.
    Run {
        #[arg(long)]
        dataset: Option<PathBuf>,
        #[arg(long, default_value_t = 0)]
        a: usize,
        #[arg(long, default_value_t = 1)]
        b: usize,
        /// Keep the accelerator restarting for this many completions.
        #[arg(long)]
        continuous: Option<usize>,
        #[arg(long)]
        timeout_ms: Option<u32>,
        #[arg(long)]
        await_transfers: bool,
        #[arg(long, default_value_t = 50)]
        latency_us: u64,
    },
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    match cli.command {
        Commands::Gen {
            out,
            vectors,
            dims,
            k,
            top_n,
            block_size,
        } => {
            generator::generate_dataset(&out, vectors, dims, k, top_n, block_size)?;
        }
        Commands::Inspect { file } => {
            inspect::print_dataset(&file)?;
        }
        Commands::Run {
            dataset,
            a,
            b,
            continuous,
            timeout_ms,
            await_transfers,
            latency_us,
        } => {
            let options = run::RunOptions {
                dataset,
                a,
                b,
                continuous,
                timeout_ms,
                await_transfers,
                latency_us,
            };
            run::run_simulation(&options)?;
        }
    }
    Ok(())
}
