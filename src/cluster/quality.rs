//! Cluster quality scores.
//!
//! Both scores treat each point as a Euclidean feature vector. The caller
//! passes the rows of the clustered matrix.

use crate::distance::{euclidean, PointSet};
use crate::error::AnalysisError;

fn check_inputs(points: &PointSet, labels: &[usize]) -> Result<usize, AnalysisError> {
    if points.len() != labels.len() {
        return Err(AnalysisError::DimensionMismatch {
            expected: points.len(),
            actual: labels.len(),
        });
    }
    Ok(labels.iter().copied().max().map_or(0, |m| m + 1))
}

/// Mean Silhouette Coefficient, in `[-1, 1]`.
///
/// Defined for `2 <= clusters <= n - 1`. Points alone in their cluster
/// score 0.
pub fn silhouette(points: &PointSet, labels: &[usize]) -> Result<f64, AnalysisError> {
    let slots = check_inputs(points, labels)?;
    let n = points.len();
    let mut sizes = vec![0usize; slots];
    for &l in labels {
        sizes[l] += 1;
    }
    let n_clusters = sizes.iter().filter(|&&s| s > 0).count();
    if n_clusters < 2 || n_clusters >= n {
        return Err(AnalysisError::InsufficientData {
            context: "Silhouette Coefficient (clusters must be 2..n-1)",
            required: 2,
            actual: n_clusters,
        });
    }

    let mut total = 0.0;
    let mut sums = vec![0.0; slots];
    for i in 0..n {
        sums.iter_mut().for_each(|s| *s = 0.0);
        for j in 0..n {
            if i != j {
                sums[labels[j]] += euclidean(points.row(i), points.row(j));
            }
        }

        let own = labels[i];
        if sizes[own] <= 1 {
            continue;
        }
        let a = sums[own] / (sizes[own] - 1) as f64;
        let b = (0..slots)
            .filter(|&c| c != own && sizes[c] > 0)
            .map(|c| sums[c] / sizes[c] as f64)
            .fold(f64::INFINITY, f64::min);
        let denom = a.max(b);
        if denom > 0.0 {
            total += (b - a) / denom;
        }
    }
    Ok(total / n as f64)
}

/// Davies-Bouldin Index; lower is better, 0 is the minimum.
pub fn davies_bouldin(points: &PointSet, labels: &[usize]) -> Result<f64, AnalysisError> {
    let slots = check_inputs(points, labels)?;
    let dim = points.dim();

    let mut centroids = vec![vec![0.0; dim]; slots];
    let mut sizes = vec![0usize; slots];
    for (p, &l) in points.rows().zip(labels) {
        sizes[l] += 1;
        for (c, v) in centroids[l].iter_mut().zip(p) {
            *c += v;
        }
    }
    let present: Vec<usize> = (0..slots).filter(|&c| sizes[c] > 0).collect();
    if present.len() < 2 {
        return Err(AnalysisError::InsufficientData {
            context: "Davies-Bouldin Index",
            required: 2,
            actual: present.len(),
        });
    }
    for &c in &present {
        let size = sizes[c] as f64;
        centroids[c].iter_mut().for_each(|v| *v /= size);
    }

    let mut scatter = vec![0.0; slots];
    for (p, &l) in points.rows().zip(labels) {
        scatter[l] += euclidean(p, &centroids[l]);
    }
    for &c in &present {
        scatter[c] /= sizes[c] as f64;
    }

    let mut total = 0.0;
    for &i in &present {
        let worst = present
            .iter()
            .filter(|&&j| j != i)
            .map(|&j| {
                let separation = euclidean(&centroids[i], &centroids[j]);
                if separation > 0.0 {
                    (scatter[i] + scatter[j]) / separation
                } else {
                    0.0
                }
            })
            .fold(0.0, f64::max);
        total += worst;
    }
    Ok(total / present.len() as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(xs: &[f64]) -> PointSet {
        let rows: Vec<Vec<f64>> = xs.iter().map(|&x| vec![x]).collect();
        PointSet::from_rows(1, &rows).unwrap()
    }

    #[test]
    fn test_silhouette_known_value() {
        // a = 1, b = mean(|0-10|, |0-11|) etc.
        let points = line(&[0.0, 1.0, 10.0, 11.0]);
        let labels = [0, 0, 1, 1];
        let s = silhouette(&points, &labels).unwrap();
        // point 0: a=1, b=10.5 -> 0.90476; point 1: a=1, b=9.5 -> 0.89474
        let expected = 2.0 * (9.5 / 10.5 + 8.5 / 9.5) / 4.0;
        assert!((s - expected).abs() < 1e-12);
    }

    #[test]
    fn test_silhouette_needs_two_to_n_minus_one() {
        let points = line(&[0.0, 1.0, 2.0]);
        assert!(silhouette(&points, &[0, 0, 0]).is_err());
        assert!(silhouette(&points, &[0, 1, 2]).is_err());
        assert!(silhouette(&points, &[0, 0, 1]).is_ok());
    }

    #[test]
    fn test_davies_bouldin_known_value() {
        let points = line(&[0.0, 2.0, 10.0, 12.0]);
        let labels = [0, 0, 1, 1];
        // scatter 1 each, centroids 1 and 11
        let db = davies_bouldin(&points, &labels).unwrap();
        assert!((db - 0.2).abs() < 1e-12);
    }

    #[test]
    fn test_davies_bouldin_single_cluster() {
        let points = line(&[0.0, 2.0]);
        assert!(davies_bouldin(&points, &[0, 0]).is_err());
    }

    #[test]
    fn test_length_mismatch() {
        let points = line(&[0.0, 2.0]);
        assert!(matches!(
            silhouette(&points, &[0]),
            Err(AnalysisError::DimensionMismatch { .. })
        ));
    }
}
