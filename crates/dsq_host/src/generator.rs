//! Dataset generator.
//!
//! Builds ramp vectors (vector `i` holds `j * (i + 1)` at position `j`, so
//! the first two are the standard accelerator check pair), scores them with
//! the k-NN outlier metric and saves the result as a dataset record.

use crate::outliers::{knn_scores, top_outliers};
use anyhow::{Context, Result, ensure};
use dsq_io::DatasetRecord;
use log::info;
use std::path::Path;
use std::time::Instant;

/// Generates and saves a ramp dataset.
///
/// # Arguments
///
/// * `out` - Output path for the record
/// * `vectors` - Number of vectors, at least two
/// * `dims` - Elements per vector
/// * `k` - Neighbour rank used for scoring, `1..vectors`
/// * `top_n` - Number of outliers to record
/// * `block_size` - Block size stored with the record
pub fn generate_dataset(
    out: &Path,
    vectors: usize,
    dims: usize,
    k: usize,
    top_n: usize,
    block_size: u64,
) -> Result<()> {
    ensure!(vectors >= 2, "need at least two vectors, got {}", vectors);
    ensure!(
        (1..vectors).contains(&k),
        "k must be between 1 and {}, got {}",
        vectors - 1,
        k
    );

    println!("Generating {} vectors of {} dims...", vectors, dims);
    let data: Vec<f64> = (0..vectors)
        .flat_map(|i| (0..dims).map(move |j| (j * (i + 1)) as f64))
        .collect();

    let start = Instant::now();
    let scores = knn_scores(&data, dims, k);
    let outliers = top_outliers(&scores, top_n);
    info!("scored {} vectors in {:?}", vectors, start.elapsed());

    let record = DatasetRecord {
        num_vectors: vectors as u64,
        vector_dims: dims as u64,
        data,
        k: k as u64,
        block_size,
        outlier_indices: outliers.iter().map(|&(i, _)| i).collect(),
        outlier_scores: outliers.iter().map(|&(_, s)| s).collect(),
    };
    record
        .save(out)
        .with_context(|| format!("Failed to write {}", out.display()))?;

    println!("Wrote {} ({} bytes).", out.display(), record.encoded_len());
    Ok(())
}
