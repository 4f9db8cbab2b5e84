//! Distance-based outlier scoring.
//!
//! A vector's score is its squared distance to its k-th nearest neighbour;
//! vectors far from everything else score highest. Rows are scored in
//! parallel, each one a full scan over the dataset.

use dsq_core::reference::distance_squared;
use rayon::prelude::*;

/// Scores every row of `data` (row-major, `dims` values per row).
///
/// `k` counts neighbours from 1 and must be smaller than the number of rows.
pub fn knn_scores(data: &[f64], dims: usize, k: usize) -> Vec<f64> {
    if dims == 0 {
        return Vec::new();
    }
    let rows: Vec<&[f64]> = data.chunks_exact(dims).collect();

    rows.par_iter()
        .enumerate()
        .map(|(i, row)| {
            let mut distances: Vec<f64> = rows
                .iter()
                .enumerate()
                .filter(|&(j, _)| j != i)
                .map(|(_, other)| distance_squared(row, other))
                .collect();
            distances.sort_unstable_by(f64::total_cmp);
            distances.get(k.wrapping_sub(1)).copied().unwrap_or(0.0)
        })
        .collect()
}

/// The `n` highest scores with their row indices, highest first. Ties keep
/// the lower index first.
pub fn top_outliers(scores: &[f64], n: usize) -> Vec<(u64, f64)> {
    let mut ranked: Vec<(u64, f64)> = scores
        .iter()
        .enumerate()
        .map(|(i, &score)| (i as u64, score))
        .collect();
    ranked.sort_by(|x, y| y.1.total_cmp(&x.1).then(x.0.cmp(&y.0)));
    ranked.truncate(n);
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn isolated_row_scores_highest() {
        // Three rows near the origin, one far away.
        let data = [0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 10.0, 10.0];
        let scores = knn_scores(&data, 2, 1);
        assert_eq!(scores, [1.0, 1.0, 1.0, 181.0]);
        assert_eq!(top_outliers(&scores, 2), [(3, 181.0), (0, 1.0)]);
    }

    #[test]
    fn kth_neighbour_is_used() {
        let data = [0.0, 1.0, 3.0];
        assert_eq!(knn_scores(&data, 1, 2), [9.0, 4.0, 9.0]);
    }

    #[test]
    fn ramp_pair_scores_its_distance() {
        let a: Vec<f64> = (0..256).map(|j| j as f64).collect();
        let b: Vec<f64> = (0..256).map(|j| 2.0 * j as f64).collect();
        let data = [a, b].concat();
        assert_eq!(knn_scores(&data, 256, 1), [5_559_680.0, 5_559_680.0]);
    }
}
