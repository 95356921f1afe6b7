//! Lloyd's k-means with k-means++ seeding.

use rand::distributions::{Distribution, WeightedIndex};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;

use crate::distance::PointSet;
use crate::error::AnalysisError;

const N_INIT: usize = 10;
const MAX_ITER: usize = 300;
const TOLERANCE: f64 = 1e-4;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KMeansFit {
    pub centers: Vec<Vec<f64>>,
    pub inertia: f64,
    pub iterations: usize,
    #[serde(skip)]
    pub labels: Vec<usize>,
}

fn squared(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

fn nearest(point: &[f64], centers: &[Vec<f64>]) -> (usize, f64) {
    let mut best = (0, f64::INFINITY);
    for (idx, center) in centers.iter().enumerate() {
        let d = squared(point, center);
        if d < best.1 {
            best = (idx, d);
        }
    }
    best
}

fn plus_plus_init(points: &PointSet, k: usize, rng: &mut ChaCha8Rng) -> Vec<Vec<f64>> {
    let n = points.len();
    let mut centers = Vec::with_capacity(k);
    centers.push(points.row(rng.gen_range(0..n)).to_vec());

    let mut closest: Vec<f64> = points.rows().map(|p| squared(p, &centers[0])).collect();
    while centers.len() < k {
        let next = match WeightedIndex::new(&closest) {
            Ok(dist) => dist.sample(rng),
            // every point sits on a center already
            Err(_) => rng.gen_range(0..n),
        };
        let center = points.row(next).to_vec();
        for (d, p) in closest.iter_mut().zip(points.rows()) {
            *d = d.min(squared(p, &center));
        }
        centers.push(center);
    }
    centers
}

/// Moves the point farthest from its center into each empty cluster, taking
/// only from clusters that keep at least one member.
fn repair_empty(points: &PointSet, centers: &[Vec<f64>], labels: &mut [usize]) {
    let k = centers.len();
    let mut counts = vec![0usize; k];
    for &l in labels.iter() {
        counts[l] += 1;
    }
    for empty in 0..k {
        if counts[empty] > 0 {
            continue;
        }
        let donor = labels
            .iter()
            .enumerate()
            .filter(|(_, l)| counts[**l] > 1)
            .map(|(i, &l)| (i, squared(points.row(i), &centers[l])))
            .max_by(|a, b| a.1.total_cmp(&b.1).then(b.0.cmp(&a.0)));
        if let Some((i, _)) = donor {
            counts[labels[i]] -= 1;
            labels[i] = empty;
            counts[empty] = 1;
        }
    }
}

fn recompute_centers(points: &PointSet, labels: &[usize], k: usize) -> Vec<Vec<f64>> {
    let dim = points.dim();
    let mut sums = vec![vec![0.0; dim]; k];
    let mut counts = vec![0usize; k];
    for (p, &l) in points.rows().zip(labels) {
        counts[l] += 1;
        for (s, v) in sums[l].iter_mut().zip(p) {
            *s += v;
        }
    }
    for (sum, &count) in sums.iter_mut().zip(&counts) {
        if count > 0 {
            sum.iter_mut().for_each(|s| *s /= count as f64);
        }
    }
    sums
}

fn lloyd(points: &PointSet, mut centers: Vec<Vec<f64>>) -> KMeansFit {
    let k = centers.len();
    let mut labels = vec![0usize; points.len()];
    let mut iterations = 0;

    for iter in 1..=MAX_ITER {
        iterations = iter;
        for (label, p) in labels.iter_mut().zip(points.rows()) {
            *label = nearest(p, &centers).0;
        }
        repair_empty(points, &centers, &mut labels);

        let updated = recompute_centers(points, &labels, k);
        let shift: f64 = centers
            .iter()
            .zip(&updated)
            .map(|(a, b)| squared(a, b))
            .sum();
        centers = updated;
        if shift <= TOLERANCE * TOLERANCE {
            break;
        }
    }

    let inertia: f64 = points
        .rows()
        .zip(&labels)
        .map(|(p, &l)| squared(p, &centers[l]))
        .sum();
    KMeansFit {
        centers,
        inertia,
        iterations,
        labels,
    }
}

/// Best of several seeded k-means runs, by inertia.
///
/// Produces exactly `k` non-empty clusters whenever `k <= points.len()`.
pub fn kmeans(points: &PointSet, k: usize, seed: u64) -> Result<KMeansFit, AnalysisError> {
    let n = points.len();
    if k == 0 || k > n {
        return Err(AnalysisError::InvalidParameters(format!(
            "k-means needs 1 <= k <= {n}, got {k}"
        )));
    }

    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut best: Option<KMeansFit> = None;
    for _ in 0..N_INIT {
        let centers = plus_plus_init(points, k, &mut rng);
        let fit = lloyd(points, centers);
        if best.as_ref().map_or(true, |b| fit.inertia < b.inertia) {
            best = Some(fit);
        }
    }
    best.ok_or_else(|| AnalysisError::Numeric("k-means produced no result".to_string()))
}
