//! Clustering Module
//!
//! Three interchangeable strategies over a precomputed source × source
//! matrix:
//!
//! - **Agglomerative**: hierarchical merging on dissimilarities
//! - **MeanShift**: mode seeking over the matrix rows
//! - **Spectral**: k-means on a normalized-Laplacian embedding of affinities
//!
//! Parameters are validated before any computation. When the result has more
//! than one cluster, Silhouette and Davies-Bouldin scores are reported, both
//! computed from the clustered matrix and the final labels.

use std::collections::BTreeMap;

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::distance::{DistanceMatrix, PointSet};
use crate::error::AnalysisError;

mod agglomerative;
mod kmeans;
mod mean_shift;
mod quality;
mod spectral;

pub use agglomerative::{agglomerative, AgglomerativeFit, Merge};
pub use kmeans::{kmeans, KMeansFit};
pub use mean_shift::{estimate_bandwidth, mean_shift, MeanShiftFit};
pub use quality::{davies_bouldin, silhouette};
pub use spectral::{affinity_from_distances, spectral, SpectralFit};

/// Clustering strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ClusterMethod {
    #[default]
    Agglomerative,
    MeanShift,
    Spectral,
}

impl std::fmt::Display for ClusterMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Agglomerative => write!(f, "agglomerative"),
            Self::MeanShift => write!(f, "meanshift"),
            Self::Spectral => write!(f, "spectral"),
        }
    }
}

impl std::str::FromStr for ClusterMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "agglomerative" => Ok(Self::Agglomerative),
            "meanshift" | "mean-shift" | "mean_shift" => Ok(Self::MeanShift),
            "spectral" => Ok(Self::Spectral),
            _ => Err(format!("Unknown clustering method: {}", s)),
        }
    }
}

/// Inter-cluster distance used by agglomerative merging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Linkage {
    Single,
    #[default]
    Average,
    Complete,
}

impl std::fmt::Display for Linkage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Single => write!(f, "single"),
            Self::Average => write!(f, "average"),
            Self::Complete => write!(f, "complete"),
        }
    }
}

impl std::str::FromStr for Linkage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "single" => Ok(Self::Single),
            "average" => Ok(Self::Average),
            "complete" => Ok(Self::Complete),
            _ => Err(format!("Linkage must be single, average or complete, got: {}", s)),
        }
    }
}

/// A clustering request with its method-specific parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterRequest {
    pub method: ClusterMethod,
    pub linkage: Linkage,
    pub n_clusters: Option<usize>,
    pub distance_threshold: Option<f64>,
    pub bandwidth: Option<f64>,
    pub quantile: Option<f64>,
    /// Seed for k-means initialization (spectral only).
    pub seed: u64,
}

impl Default for ClusterRequest {
    fn default() -> Self {
        Self {
            method: ClusterMethod::Agglomerative,
            linkage: Linkage::Average,
            n_clusters: None,
            distance_threshold: None,
            bandwidth: None,
            quantile: None,
            seed: 0,
        }
    }
}

impl ClusterRequest {
    pub fn agglomerative(linkage: Linkage) -> Self {
        Self {
            method: ClusterMethod::Agglomerative,
            linkage,
            ..Self::default()
        }
    }

    pub fn mean_shift() -> Self {
        Self {
            method: ClusterMethod::MeanShift,
            ..Self::default()
        }
    }

    pub fn spectral(n_clusters: usize) -> Self {
        Self {
            method: ClusterMethod::Spectral,
            n_clusters: Some(n_clusters),
            ..Self::default()
        }
    }

    pub fn with_n_clusters(mut self, n_clusters: usize) -> Self {
        self.n_clusters = Some(n_clusters);
        self
    }

    pub fn with_distance_threshold(mut self, threshold: f64) -> Self {
        self.distance_threshold = Some(threshold);
        self
    }

    pub fn with_bandwidth(mut self, bandwidth: f64) -> Self {
        self.bandwidth = Some(bandwidth);
        self
    }

    pub fn with_quantile(mut self, quantile: f64) -> Self {
        self.quantile = Some(quantile);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Checks mutually exclusive and jointly required parameters.
    ///
    /// `n_sources` is the number of rows of the matrix that will be
    /// clustered, when known.
    pub fn validate(&self, n_sources: Option<usize>) -> Result<(), AnalysisError> {
        let invalid = |msg: String| -> Result<(), AnalysisError> {
            Err(AnalysisError::InvalidParameters(msg))
        };

        match self.method {
            ClusterMethod::Agglomerative => match (self.n_clusters, self.distance_threshold) {
                (None, None) => {
                    return invalid(
                        "agglomerative clustering needs either n_clusters or distance_threshold"
                            .to_string(),
                    )
                }
                (Some(_), Some(_)) => {
                    return invalid(
                        "agglomerative clustering takes n_clusters or distance_threshold, not both"
                            .to_string(),
                    )
                }
                (None, Some(t)) if !(t.is_finite() && t >= 0.0) => {
                    return invalid(format!("distance_threshold must be non-negative, got {t}"))
                }
                _ => {}
            },
            ClusterMethod::MeanShift => match (self.bandwidth, self.quantile) {
                (None, None) => {
                    return invalid("mean shift needs either bandwidth or quantile".to_string())
                }
                (Some(_), Some(_)) => {
                    return invalid("mean shift takes bandwidth or quantile, not both".to_string())
                }
                (Some(b), None) if !(b.is_finite() && b > 0.0) => {
                    return invalid(format!("bandwidth must be positive, got {b}"))
                }
                (None, Some(q)) if !(q > 0.0 && q <= 1.0) => {
                    return invalid(format!("quantile must be in (0, 1], got {q}"))
                }
                _ => {}
            },
            ClusterMethod::Spectral => {
                if self.n_clusters.is_none() {
                    return invalid("spectral clustering needs n_clusters".to_string());
                }
            }
        }

        if let Some(k) = self.n_clusters {
            if k == 0 {
                return invalid("n_clusters must be at least 1".to_string());
            }
            if let Some(n) = n_sources {
                if k > n && self.method != ClusterMethod::MeanShift {
                    return invalid(format!("n_clusters ({k}) exceeds the number of sources ({n})"));
                }
            }
        }
        Ok(())
    }

    fn warn_ignored(&self) {
        let ignored: Vec<&str> = match self.method {
            ClusterMethod::Agglomerative => [
                self.bandwidth.map(|_| "bandwidth"),
                self.quantile.map(|_| "quantile"),
            ]
            .into_iter()
            .flatten()
            .collect(),
            ClusterMethod::MeanShift => [
                self.n_clusters.map(|_| "n_clusters"),
                self.distance_threshold.map(|_| "distance_threshold"),
            ]
            .into_iter()
            .flatten()
            .collect(),
            ClusterMethod::Spectral => [
                self.distance_threshold.map(|_| "distance_threshold"),
                self.bandwidth.map(|_| "bandwidth"),
                self.quantile.map(|_| "quantile"),
            ]
            .into_iter()
            .flatten()
            .collect(),
        };
        for name in ignored {
            warn!("{} is ignored by {} clustering", name, self.method);
        }
    }
}

/// Method-specific description of a fitted clustering.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "method", rename_all = "lowercase")]
pub enum FittedModel {
    Agglomerative(AgglomerativeFit),
    MeanShift(MeanShiftFit),
    Spectral(SpectralFit),
}

impl FittedModel {
    pub fn method(&self) -> ClusterMethod {
        match self {
            Self::Agglomerative(_) => ClusterMethod::Agglomerative,
            Self::MeanShift(_) => ClusterMethod::MeanShift,
            Self::Spectral(_) => ClusterMethod::Spectral,
        }
    }
}

/// Cluster quality scores, absent when undefined.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QualityReport {
    pub silhouette: Option<f64>,
    pub davies_bouldin: Option<f64>,
    /// Why a score is missing.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl QualityReport {
    pub fn evaluate(points: &PointSet, labels: &[usize]) -> Self {
        let n_clusters = count_clusters(labels);
        if n_clusters <= 1 {
            return Self {
                silhouette: None,
                davies_bouldin: None,
                note: Some(
                    "only 1 cluster: Silhouette and Davies-Bouldin are undefined".to_string(),
                ),
            };
        }

        let mut notes = Vec::new();
        let silhouette = match silhouette(points, labels) {
            Ok(score) => Some(score),
            Err(e) => {
                notes.push(format!("Silhouette unavailable: {e}"));
                None
            }
        };
        let davies_bouldin = match davies_bouldin(points, labels) {
            Ok(score) => Some(score),
            Err(e) => {
                notes.push(format!("Davies-Bouldin unavailable: {e}"));
                None
            }
        };
        Self {
            silhouette,
            davies_bouldin,
            note: (!notes.is_empty()).then(|| notes.join("; ")),
        }
    }
}

/// Result of clustering a labeled matrix.
#[derive(Debug, Clone, Serialize)]
pub struct ClusterOutcome {
    pub sources: Vec<String>,
    pub labels: Vec<usize>,
    pub model: FittedModel,
    pub quality: QualityReport,
}

impl ClusterOutcome {
    pub fn n_clusters(&self) -> usize {
        count_clusters(&self.labels)
    }

    /// `(source, label)` pairs in matrix order.
    pub fn label_table(&self) -> Vec<(&str, usize)> {
        self.sources
            .iter()
            .map(String::as_str)
            .zip(self.labels.iter().copied())
            .collect()
    }

    /// Cluster label → member sources.
    pub fn grouped(&self) -> BTreeMap<usize, Vec<String>> {
        let mut groups: BTreeMap<usize, Vec<String>> = BTreeMap::new();
        for (source, &label) in self.sources.iter().zip(&self.labels) {
            groups.entry(label).or_default().push(source.clone());
        }
        groups
    }
}

/// Validates `request` and clusters `matrix`.
///
/// Agglomerative and MeanShift expect a dissimilarity matrix; Spectral
/// expects distances and converts them to affinities itself.
pub fn run(request: &ClusterRequest, matrix: &DistanceMatrix) -> Result<ClusterOutcome, AnalysisError> {
    let n = matrix.len();
    request.validate(Some(n))?;
    if n < 2 {
        return Err(AnalysisError::InsufficientData {
            context: "clustering",
            required: 2,
            actual: n,
        });
    }
    request.warn_ignored();

    let (raw_labels, model, clustered) = match request.method {
        ClusterMethod::Agglomerative => {
            let fit = agglomerative(
                matrix.values(),
                request.linkage,
                request.n_clusters,
                request.distance_threshold,
            )?;
            let labels = fit.labels.clone();
            (labels, FittedModel::Agglomerative(fit), matrix.values().clone())
        }
        ClusterMethod::MeanShift => {
            let points = matrix_rows(matrix.values());
            let bandwidth = match (request.bandwidth, request.quantile) {
                (Some(b), _) => b,
                (None, Some(q)) => estimate_bandwidth(&points, q)?,
                (None, None) => {
                    return Err(AnalysisError::InvalidParameters(
                        "mean shift needs either bandwidth or quantile".to_string(),
                    ))
                }
            };
            debug!("Mean shift bandwidth: {:.6}", bandwidth);
            let fit = mean_shift(&points, bandwidth)?;
            let labels = fit.labels.clone();
            (labels, FittedModel::MeanShift(fit), matrix.values().clone())
        }
        ClusterMethod::Spectral => {
            let k = request.n_clusters.ok_or_else(|| {
                AnalysisError::InvalidParameters("spectral clustering needs n_clusters".to_string())
            })?;
            let affinity = affinity_from_distances(matrix.values());
            let fit = spectral(&affinity, k, request.seed)?;
            let labels = fit.labels.clone();
            (labels, FittedModel::Spectral(fit), affinity)
        }
    };

    let labels = renumber_labels(&raw_labels);
    let quality = QualityReport::evaluate(&matrix_rows(&clustered), &labels);
    if let Some(note) = &quality.note {
        debug!("{}", note);
    }

    Ok(ClusterOutcome {
        sources: matrix.labels().to_vec(),
        labels,
        model,
        quality,
    })
}

/// Matrix rows as points.
pub(crate) fn matrix_rows(matrix: &DMatrix<f64>) -> PointSet {
    let mut data = Vec::with_capacity(matrix.len());
    for row in matrix.row_iter() {
        data.extend(row.iter().copied());
    }
    PointSet::from_flat(matrix.ncols(), data)
}

/// Relabels clusters `0, 1, 2, …` in order of first appearance.
pub fn renumber_labels(labels: &[usize]) -> Vec<usize> {
    let mut mapping: Vec<(usize, usize)> = Vec::new();
    labels
        .iter()
        .map(|&label| match mapping.iter().find(|(old, _)| *old == label) {
            Some(&(_, new)) => new,
            None => {
                let new = mapping.len();
                mapping.push((label, new));
                new
            }
        })
        .collect()
}

pub(crate) fn count_clusters(labels: &[usize]) -> usize {
    let mut seen: Vec<usize> = labels.to_vec();
    seen.sort_unstable();
    seen.dedup();
    seen.len()
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Two well separated 1-D groups, as a Euclidean distance matrix.
    pub fn two_groups() -> DistanceMatrix {
        let xs = [0.0, 0.2, 0.4, 10.0, 10.3, 10.5];
        let labels = (0..xs.len()).map(|i| format!("src{i}")).collect();
        let vectors: Vec<Vec<f64>> = xs.iter().map(|&x| vec![x]).collect();
        DistanceMatrix::euclidean(labels, &vectors).unwrap()
    }
}
