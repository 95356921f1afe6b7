//! Spectral clustering on a precomputed affinity matrix.
//!
//! The affinity graph is embedded with the `k` smallest eigenvectors of its
//! symmetric normalized Laplacian, and the embedding rows are grouped with
//! k-means.

use nalgebra::{DMatrix, SymmetricEigen};
use serde::Serialize;

use super::kmeans::kmeans;
use crate::distance::PointSet;
use crate::error::AnalysisError;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpectralFit {
    pub n_clusters: usize,
    pub seed: u64,
    /// The `k` smallest Laplacian eigenvalues, ascending.
    pub eigenvalues: Vec<f64>,
    pub inertia: f64,
    #[serde(skip)]
    pub labels: Vec<usize>,
}

/// `1 - d / max(d)`; all ones when every distance is zero.
pub fn affinity_from_distances(distances: &DMatrix<f64>) -> DMatrix<f64> {
    let max = distances.iter().copied().fold(0.0, f64::max);
    if max > 0.0 {
        distances.map(|d| 1.0 - d / max)
    } else {
        DMatrix::from_element(distances.nrows(), distances.ncols(), 1.0)
    }
}

/// Spectral embedding: one row per node, `k` columns.
fn embed(affinity: &DMatrix<f64>, k: usize) -> Result<(PointSet, Vec<f64>), AnalysisError> {
    let n = affinity.nrows();

    // Self-loops do not count towards the degree.
    let degrees: Vec<f64> = (0..n)
        .map(|i| (0..n).filter(|&j| j != i).map(|j| affinity[(i, j)]).sum())
        .collect();
    let scale: Vec<f64> = degrees
        .iter()
        .map(|&d| if d > 0.0 { d.sqrt() } else { 1.0 })
        .collect();

    let laplacian = DMatrix::from_fn(n, n, |i, j| {
        if i == j {
            if degrees[i] > 0.0 {
                1.0
            } else {
                0.0
            }
        } else {
            -affinity[(i, j)] / (scale[i] * scale[j])
        }
    });
    if laplacian.iter().any(|v| !v.is_finite()) {
        return Err(AnalysisError::Numeric(
            "non-finite value in graph Laplacian".to_string(),
        ));
    }

    let eigen = SymmetricEigen::new(laplacian);
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| eigen.eigenvalues[a].total_cmp(&eigen.eigenvalues[b]));
    order.truncate(k);

    let mut columns: Vec<Vec<f64>> = Vec::with_capacity(k);
    for &idx in &order {
        let mut column: Vec<f64> = eigen
            .eigenvectors
            .column(idx)
            .iter()
            .zip(&scale)
            .map(|(v, s)| v / s)
            .collect();
        // Orient each vector so its largest-magnitude entry is positive.
        let pivot = column
            .iter()
            .copied()
            .max_by(|a, b| a.abs().total_cmp(&b.abs()))
            .unwrap_or(0.0);
        if pivot < 0.0 {
            column.iter_mut().for_each(|v| *v = -*v);
        }
        columns.push(column);
    }

    let mut points = PointSet::with_capacity(k, n);
    let mut row = Vec::with_capacity(k);
    for i in 0..n {
        row.clear();
        row.extend(columns.iter().map(|c| c[i]));
        points.push(&row)?;
    }
    let eigenvalues = order.iter().map(|&i| eigen.eigenvalues[i]).collect();
    Ok((points, eigenvalues))
}

/// Partitions the nodes of `affinity` into exactly `k` clusters.
pub fn spectral(affinity: &DMatrix<f64>, k: usize, seed: u64) -> Result<SpectralFit, AnalysisError> {
    let n = affinity.nrows();
    if !affinity.is_square() {
        return Err(AnalysisError::DimensionMismatch {
            expected: n,
            actual: affinity.ncols(),
        });
    }
    if k == 0 || k > n {
        return Err(AnalysisError::InvalidParameters(format!(
            "spectral clustering needs 1 <= n_clusters <= {n}, got {k}"
        )));
    }

    let (embedding, eigenvalues) = embed(affinity, k)?;
    let fit = kmeans(&embedding, k, seed)?;

    Ok(SpectralFit {
        n_clusters: k,
        seed,
        eigenvalues,
        inertia: fit.inertia,
        labels: fit.labels,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block_affinity() -> DMatrix<f64> {
        // two tight groups of three, weakly linked
        let group = |i: usize| i / 3;
        DMatrix::from_fn(6, 6, |i, j| {
            if i == j {
                1.0
            } else if group(i) == group(j) {
                0.9
            } else {
                0.05
            }
        })
    }

    #[test]
    fn test_affinity_conversion() {
        let d = DMatrix::from_row_slice(2, 2, &[0.0, 4.0, 4.0, 0.0]);
        let a = affinity_from_distances(&d);
        assert_eq!(a, DMatrix::from_row_slice(2, 2, &[1.0, 0.0, 0.0, 1.0]));

        let zeros = DMatrix::zeros(3, 3);
        assert!(affinity_from_distances(&zeros).iter().all(|&v| v == 1.0));
    }

    #[test]
    fn test_recovers_blocks() {
        let fit = spectral(&block_affinity(), 2, 0).unwrap();
        let l = &fit.labels;
        assert_eq!(l[0], l[1]);
        assert_eq!(l[1], l[2]);
        assert_eq!(l[3], l[4]);
        assert_eq!(l[4], l[5]);
        assert_ne!(l[0], l[3]);
        assert_eq!(fit.eigenvalues.len(), 2);
        assert!(fit.eigenvalues[0].abs() < 1e-9);
    }

    #[test]
    fn test_exactly_k_labels() {
        let affinity = block_affinity();
        for k in 1..=6 {
            let fit = spectral(&affinity, k, 3).unwrap();
            let mut labels = fit.labels.clone();
            labels.sort_unstable();
            labels.dedup();
            assert_eq!(labels.len(), k, "k={k}");
        }
    }

    #[test]
    fn test_rejects_too_many_clusters() {
        assert!(matches!(
            spectral(&block_affinity(), 7, 0),
            Err(AnalysisError::InvalidParameters(_))
        ));
    }
}
