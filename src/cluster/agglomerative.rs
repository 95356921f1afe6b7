//! Hierarchical agglomerative clustering on a precomputed dissimilarity
//! matrix, with Lance–Williams distance updates.

use nalgebra::DMatrix;
use serde::Serialize;

use super::Linkage;
use crate::error::AnalysisError;

/// One step of the merge history.
///
/// Leaves are numbered `0..n`; the cluster created by step `s` is `n + s`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Merge {
    pub left: usize,
    pub right: usize,
    pub distance: f64,
    pub size: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgglomerativeFit {
    pub linkage: Linkage,
    pub n_clusters: usize,
    pub merges: Vec<Merge>,
    #[serde(skip)]
    pub labels: Vec<usize>,
}

/// Merges clusters until `n_clusters` remain, or until the closest pair is
/// at least `distance_threshold` apart.
///
/// Exactly one stop rule must be given. Ties are broken by the lowest
/// `(i, j)` index pair.
pub fn agglomerative(
    dissimilarity: &DMatrix<f64>,
    linkage: Linkage,
    n_clusters: Option<usize>,
    distance_threshold: Option<f64>,
) -> Result<AgglomerativeFit, AnalysisError> {
    let n = dissimilarity.nrows();
    if !dissimilarity.is_square() {
        return Err(AnalysisError::DimensionMismatch {
            expected: n,
            actual: dissimilarity.ncols(),
        });
    }
    let target = match (n_clusters, distance_threshold) {
        (Some(k), None) if k >= 1 && k <= n => k,
        (None, Some(t)) if t >= 0.0 => 1,
        _ => {
            return Err(AnalysisError::InvalidParameters(
                "agglomerative clustering needs exactly one of n_clusters (1..=n) or a non-negative distance_threshold"
                    .to_string(),
            ))
        }
    };

    let mut dist = dissimilarity.clone();
    let mut active = vec![true; n];
    let mut sizes = vec![1usize; n];
    let mut node_ids: Vec<usize> = (0..n).collect();
    // Leaf -> slot of the cluster currently holding it.
    let mut owner: Vec<usize> = (0..n).collect();
    let mut merges = Vec::with_capacity(n.saturating_sub(1));
    let mut remaining = n;

    while remaining > target {
        let mut best: Option<(usize, usize, f64)> = None;
        for i in (0..n).filter(|&i| active[i]) {
            for j in ((i + 1)..n).filter(|&j| active[j]) {
                let d = dist[(i, j)];
                if best.map_or(true, |(_, _, b)| d < b) {
                    best = Some((i, j, d));
                }
            }
        }
        let Some((i, j, d)) = best else { break };
        if let Some(threshold) = distance_threshold {
            if d >= threshold {
                break;
            }
        }

        let (size_i, size_j) = (sizes[i], sizes[j]);
        for k in (0..n).filter(|&k| active[k] && k != i && k != j) {
            let (dik, djk) = (dist[(i, k)], dist[(j, k)]);
            let updated = match linkage {
                Linkage::Single => dik.min(djk),
                Linkage::Complete => dik.max(djk),
                Linkage::Average => {
                    (size_i as f64 * dik + size_j as f64 * djk) / (size_i + size_j) as f64
                }
            };
            dist[(i, k)] = updated;
            dist[(k, i)] = updated;
        }

        merges.push(Merge {
            left: node_ids[i],
            right: node_ids[j],
            distance: d,
            size: size_i + size_j,
        });
        node_ids[i] = n + merges.len() - 1;
        sizes[i] = size_i + size_j;
        active[j] = false;
        for slot in owner.iter_mut().filter(|slot| **slot == j) {
            *slot = i;
        }
        remaining -= 1;
    }

    Ok(AgglomerativeFit {
        linkage,
        n_clusters: remaining,
        merges,
        labels: owner,
    })
}
