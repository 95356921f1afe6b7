//! Flat-kernel mean shift.
//!
//! Every point seeds a hill climb: the seed moves to the mean of all points
//! within `bandwidth` until it stops moving. Converged modes closer than the
//! bandwidth collapse onto the one that gathered more points, and each point
//! is then labeled by its nearest surviving mode.

use serde::Serialize;
use statrs::statistics::{Data, Distribution};

use crate::distance::{euclidean, PointSet};
use crate::error::AnalysisError;

const MAX_ITER: usize = 300;
/// Convergence threshold, as a fraction of the bandwidth.
const STOP_FRACTION: f64 = 1e-3;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MeanShiftFit {
    pub bandwidth: f64,
    pub centers: Vec<Vec<f64>>,
    /// Points within bandwidth of each center when it converged.
    pub intensities: Vec<usize>,
    #[serde(skip)]
    pub labels: Vec<usize>,
}

/// Bandwidth from the mean distance of each point to its
/// `max(1, ⌊n·quantile⌋)`-th nearest point, the point itself included.
pub fn estimate_bandwidth(points: &PointSet, quantile: f64) -> Result<f64, AnalysisError> {
    if !(quantile > 0.0 && quantile <= 1.0) {
        return Err(AnalysisError::InvalidParameters(format!(
            "quantile must be in (0, 1], got {quantile}"
        )));
    }
    let n = points.len();
    if n == 0 {
        return Err(AnalysisError::InsufficientData {
            context: "bandwidth estimation",
            required: 1,
            actual: 0,
        });
    }
    let k = ((n as f64 * quantile) as usize).clamp(1, n);

    let mut kth = Vec::with_capacity(n);
    let mut distances = Vec::with_capacity(n);
    for p in points.rows() {
        distances.clear();
        distances.extend(points.rows().map(|q| euclidean(p, q)));
        distances.sort_by(f64::total_cmp);
        kth.push(distances[k - 1]);
    }

    let bandwidth = Data::new(kth).mean().unwrap_or(0.0);
    if !(bandwidth > 0.0) || !bandwidth.is_finite() {
        return Err(AnalysisError::InvalidParameters(format!(
            "estimated bandwidth is {bandwidth} for quantile {quantile}; use a larger quantile or an explicit bandwidth"
        )));
    }
    Ok(bandwidth)
}

fn neighbours<'a>(
    points: &'a PointSet,
    center: &'a [f64],
    bandwidth: f64,
) -> impl Iterator<Item = &'a [f64]> + 'a {
    points
        .rows()
        .filter(move |p| euclidean(p, center) <= bandwidth)
}

/// Climbs from `seed` to a mode; returns the mode and its intensity.
fn climb(points: &PointSet, seed: &[f64], bandwidth: f64) -> Option<(Vec<f64>, usize)> {
    let dim = points.dim();
    let stop = STOP_FRACTION * bandwidth;
    let mut mean = seed.to_vec();

    for iter in 1..=MAX_ITER {
        let mut next = vec![0.0; dim];
        let mut count = 0usize;
        for p in neighbours(points, &mean, bandwidth) {
            count += 1;
            for (s, v) in next.iter_mut().zip(p) {
                *s += v;
            }
        }
        if count == 0 {
            return None;
        }
        next.iter_mut().for_each(|s| *s /= count as f64);

        let shift = euclidean(&next, &mean);
        mean = next;
        if shift <= stop || iter == MAX_ITER {
            return Some((mean, count));
        }
    }
    None
}

pub fn mean_shift(points: &PointSet, bandwidth: f64) -> Result<MeanShiftFit, AnalysisError> {
    if !(bandwidth > 0.0) || !bandwidth.is_finite() {
        return Err(AnalysisError::InvalidParameters(format!(
            "bandwidth must be positive, got {bandwidth}"
        )));
    }
    if points.is_empty() {
        return Err(AnalysisError::InsufficientData {
            context: "mean shift",
            required: 1,
            actual: 0,
        });
    }

    // (seed index, mode, intensity)
    let mut modes: Vec<(usize, Vec<f64>, usize)> = points
        .rows()
        .enumerate()
        .filter_map(|(i, seed)| climb(points, seed, bandwidth).map(|(m, c)| (i, m, c)))
        .collect();
    modes.sort_by(|a, b| b.2.cmp(&a.2).then(a.0.cmp(&b.0)));

    let mut centers: Vec<Vec<f64>> = Vec::new();
    let mut intensities = Vec::new();
    for (_, mode, intensity) in modes {
        if centers.iter().all(|c| euclidean(c, &mode) > bandwidth) {
            centers.push(mode);
            intensities.push(intensity);
        }
    }
    if centers.is_empty() {
        return Err(AnalysisError::Numeric(format!(
            "no mean shift mode found with bandwidth {bandwidth}"
        )));
    }

    let labels = points
        .rows()
        .map(|p| {
            centers
                .iter()
                .enumerate()
                .map(|(idx, c)| (idx, euclidean(p, c)))
                .min_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)))
                .map_or(0, |(idx, _)| idx)
        })
        .collect();

    Ok(MeanShiftFit {
        bandwidth,
        centers,
        intensities,
        labels,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(xs: &[f64]) -> PointSet {
        let rows: Vec<Vec<f64>> = xs.iter().map(|&x| vec![x]).collect();
        PointSet::from_rows(1, &rows).unwrap()
    }

    #[test]
    fn test_two_modes() {
        let points = line(&[0.0, 0.1, 0.2, 5.0, 5.1, 5.2, 5.3]);
        let fit = mean_shift(&points, 1.0).unwrap();

        assert_eq!(fit.centers.len(), 2);
        // denser group first
        assert!((fit.centers[0][0] - 5.15).abs() < 1e-9);
        assert_eq!(fit.intensities, vec![4, 3]);
        assert_eq!(fit.labels, vec![1, 1, 1, 0, 0, 0, 0]);
    }

    #[test]
    fn test_huge_bandwidth_single_mode() {
        let points = line(&[0.0, 1.0, 2.0]);
        let fit = mean_shift(&points, 100.0).unwrap();
        assert_eq!(fit.centers.len(), 1);
        assert_eq!(fit.labels, vec![0, 0, 0]);
    }

    #[test]
    fn test_estimate_bandwidth() {
        let points = line(&[0.0, 1.0, 3.0]);
        // 2nd nearest (self first): 1, 1, 2
        let bw = estimate_bandwidth(&points, 0.7).unwrap();
        assert!((bw - 4.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_zero_bandwidth_estimate_rejected() {
        let points = line(&[0.0, 1.0, 3.0]);
        // one neighbour is the point itself
        assert!(matches!(
            estimate_bandwidth(&points, 0.1),
            Err(AnalysisError::InvalidParameters(_))
        ));
    }

    #[test]
    fn test_rejects_bad_bandwidth() {
        let points = line(&[0.0]);
        assert!(mean_shift(&points, 0.0).is_err());
        assert!(mean_shift(&points, f64::NAN).is_err());
    }
}
