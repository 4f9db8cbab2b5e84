use anyhow::{Context, Result};
use dsq_io::DatasetRecord;
use std::path::Path;

/// Number of leading elements shown per vector.
const PREVIEW: usize = 4;

pub fn print_dataset(path: &Path) -> Result<()> {
    let record = DatasetRecord::load_from_file(path)
        .with_context(|| format!("Failed to load {}", path.display()))?;

    println!("Dataset {}", path.display());
    println!("Vectors:    {}", record.num_vectors);
    println!("Dims:       {}", record.vector_dims);
    println!("k:          {}", record.k);
    println!("Block size: {}", record.block_size);

    for i in 0..record.num_vectors.min(8) as usize {
        if let Some(row) = record.vector(i) {
            let shown = &row[..row.len().min(PREVIEW)];
            let more = if row.len() > PREVIEW { ", ..." } else { "" };
            println!("  [{}] {:?}{}", i, shown, more);
        }
    }

    println!("Outliers:   {}", record.outliers());
    for (index, score) in record.outlier_indices.iter().zip(&record.outlier_scores) {
        println!("  vector {:4}  score {:.6e}", index, score);
    }
    Ok(())
}
