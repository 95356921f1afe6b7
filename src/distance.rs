//! Distance kernels.
//!
//! Plain numeric functions over source trajectories: Euclidean distance,
//! symmetric Hausdorff distance between point sets, and the path-graph
//! spectral signature. Everything here is O(n²) or O(n²·d) and allocation
//! light; matrix builders call these kernels once per unordered pair.

use nalgebra::DMatrix;

use crate::error::AnalysisError;

/// A set of equal-dimension points stored row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct PointSet {
    dim: usize,
    data: Vec<f64>,
}

impl PointSet {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            data: Vec::new(),
        }
    }

    pub fn with_capacity(dim: usize, points: usize) -> Self {
        Self {
            dim,
            data: Vec::with_capacity(dim * points),
        }
    }

    pub fn from_rows(dim: usize, rows: &[Vec<f64>]) -> Result<Self, AnalysisError> {
        let mut set = Self::with_capacity(dim, rows.len());
        for row in rows {
            set.push(row)?;
        }
        Ok(set)
    }

    /// Wraps row-major `data` whose length is a multiple of `dim`.
    pub(crate) fn from_flat(dim: usize, data: Vec<f64>) -> Self {
        debug_assert!(dim > 0 || data.is_empty());
        debug_assert_eq!(data.len() % dim.max(1), 0);
        Self { dim, data }
    }

    pub fn push(&mut self, point: &[f64]) -> Result<(), AnalysisError> {
        if point.len() != self.dim {
            return Err(AnalysisError::DimensionMismatch {
                expected: self.dim,
                actual: point.len(),
            });
        }
        self.data.extend_from_slice(point);
        Ok(())
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn len(&self) -> usize {
        if self.dim == 0 {
            0
        } else {
            self.data.len() / self.dim
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn row(&self, i: usize) -> &[f64] {
        &self.data[i * self.dim..(i + 1) * self.dim]
    }

    pub fn rows(&self) -> impl Iterator<Item = &[f64]> {
        // chunks_exact panics on a zero chunk size
        self.data.chunks_exact(self.dim.max(1))
    }

    /// Keeps only the points at `indices`, in the given order.
    pub fn select(&self, indices: &[usize]) -> Self {
        let mut set = Self::with_capacity(self.dim, indices.len());
        for &i in indices {
            set.data.extend_from_slice(self.row(i));
        }
        set
    }
}

pub fn euclidean(a: &[f64], b: &[f64]) -> f64 {
    debug_assert_eq!(a.len(), b.len());
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f64>()
        .sqrt()
}

/// Largest nearest-neighbour distance from any point of `a` into `b`.
fn directed_hausdorff(a: &PointSet, b: &PointSet) -> f64 {
    let mut cmax = 0.0_f64;
    for p in a.rows() {
        let mut cmin = f64::INFINITY;
        let mut shadowed = false;
        for q in b.rows() {
            let d = euclidean(p, q);
            if d < cmax {
                // p cannot raise the running maximum any more
                shadowed = true;
                break;
            }
            if d < cmin {
                cmin = d;
            }
        }
        if !shadowed && cmin > cmax && cmin.is_finite() {
            cmax = cmin;
        }
    }
    cmax
}

/// Symmetric Hausdorff distance between two point sets.
pub fn hausdorff(a: &PointSet, b: &PointSet) -> Result<f64, AnalysisError> {
    if a.dim() != b.dim() {
        return Err(AnalysisError::DimensionMismatch {
            expected: a.dim(),
            actual: b.dim(),
        });
    }
    if a.is_empty() || b.is_empty() {
        return Err(AnalysisError::InsufficientData {
            context: "Hausdorff distance",
            required: 1,
            actual: a.len().min(b.len()),
        });
    }
    Ok(directed_hausdorff(a, b).max(directed_hausdorff(b, a)))
}

/// Weighted adjacency of the path graph through consecutive points.
pub fn path_graph_adjacency(points: &PointSet) -> DMatrix<f64> {
    let n = points.len();
    let mut adjacency = DMatrix::zeros(n, n);
    for i in 1..n {
        let w = euclidean(points.row(i - 1), points.row(i));
        adjacency[(i - 1, i)] = w;
        adjacency[(i, i - 1)] = w;
    }
    adjacency
}

/// The `k` smallest eigenvalues of the path-graph adjacency, ascending.
pub fn path_graph_spectrum(points: &PointSet, k: usize) -> Result<Vec<f64>, AnalysisError> {
    if k > points.len() {
        return Err(AnalysisError::InsufficientData {
            context: "spectral signature",
            required: k,
            actual: points.len(),
        });
    }
    if points.is_empty() {
        return Ok(Vec::new());
    }
    let mut eigenvalues: Vec<f64> = path_graph_adjacency(points)
        .symmetric_eigenvalues()
        .iter()
        .copied()
        .collect();
    if eigenvalues.iter().any(|v| !v.is_finite()) {
        return Err(AnalysisError::Numeric(
            "non-finite eigenvalue in path-graph spectrum".to_string(),
        ));
    }
    eigenvalues.sort_by(f64::total_cmp);
    eigenvalues.truncate(k);
    Ok(eigenvalues)
}

/// Square, symmetric, zero-diagonal matrix of pairwise distances between
/// labeled items.
#[derive(Debug, Clone, PartialEq)]
pub struct DistanceMatrix {
    labels: Vec<String>,
    values: DMatrix<f64>,
}

impl DistanceMatrix {
    /// Fills the upper triangle with `distance` and mirrors it.
    pub fn pairwise<T, F>(
        labels: Vec<String>,
        items: &[T],
        mut distance: F,
    ) -> Result<Self, AnalysisError>
    where
        F: FnMut(&T, &T) -> Result<f64, AnalysisError>,
    {
        if labels.len() != items.len() {
            return Err(AnalysisError::DimensionMismatch {
                expected: labels.len(),
                actual: items.len(),
            });
        }
        let n = items.len();
        let mut values = DMatrix::zeros(n, n);
        for i in 0..n {
            for j in (i + 1)..n {
                let d = distance(&items[i], &items[j])?;
                values[(i, j)] = d;
                values[(j, i)] = d;
            }
        }
        Ok(Self { labels, values })
    }

    /// Pairwise Hausdorff distances between trajectories.
    pub fn hausdorff(labels: Vec<String>, sets: &[PointSet]) -> Result<Self, AnalysisError> {
        Self::pairwise(labels, sets, hausdorff)
    }

    /// Pairwise Euclidean distances between signature vectors.
    pub fn euclidean(labels: Vec<String>, vectors: &[Vec<f64>]) -> Result<Self, AnalysisError> {
        Self::pairwise(labels, vectors, |a, b| {
            if a.len() != b.len() {
                return Err(AnalysisError::DimensionMismatch {
                    expected: a.len(),
                    actual: b.len(),
                });
            }
            Ok(euclidean(a, b))
        })
    }

    /// Wraps an existing matrix, checking it is square and labeled.
    pub fn from_parts(labels: Vec<String>, values: DMatrix<f64>) -> Result<Self, AnalysisError> {
        if !values.is_square() {
            return Err(AnalysisError::DimensionMismatch {
                expected: values.nrows(),
                actual: values.ncols(),
            });
        }
        if labels.len() != values.nrows() {
            return Err(AnalysisError::DimensionMismatch {
                expected: values.nrows(),
                actual: labels.len(),
            });
        }
        Ok(Self { labels, values })
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn values(&self) -> &DMatrix<f64> {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.values[(i, j)]
    }

    pub fn max_value(&self) -> f64 {
        self.values.iter().copied().fold(0.0, f64::max)
    }

    pub fn is_symmetric(&self, tolerance: f64) -> bool {
        let n = self.len();
        (0..n).all(|i| {
            self.values[(i, i)].abs() <= tolerance
                && (0..i).all(|j| (self.values[(i, j)] - self.values[(j, i)]).abs() <= tolerance)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    fn random_set(rng: &mut ChaCha8Rng, points: usize, dim: usize) -> PointSet {
        let mut set = PointSet::new(dim);
        for _ in 0..points {
            let p: Vec<f64> = (0..dim).map(|_| rng.gen_range(-5.0..5.0)).collect();
            set.push(&p).unwrap();
        }
        set
    }

    #[test]
    fn test_euclidean() {
        assert_eq!(euclidean(&[0.0, 0.0], &[3.0, 4.0]), 5.0);
        assert_eq!(euclidean(&[], &[]), 0.0);
    }

    #[test]
    fn test_point_set_dimension_checked() {
        let mut set = PointSet::new(2);
        set.push(&[1.0, 2.0]).unwrap();
        assert!(matches!(
            set.push(&[1.0]),
            Err(AnalysisError::DimensionMismatch {
                expected: 2,
                actual: 1
            })
        ));
        assert_eq!(set.len(), 1);
        assert_eq!(set.row(0), &[1.0, 2.0]);
    }

    #[test]
    fn test_hausdorff_known_value() {
        let a = PointSet::from_rows(1, &[vec![0.0], vec![1.0]]).unwrap();
        let b = PointSet::from_rows(1, &[vec![0.0], vec![5.0]]).unwrap();
        // b's 5.0 is 4 away from a's nearest point
        assert_eq!(hausdorff(&a, &b).unwrap(), 4.0);
    }

    #[test]
    fn test_hausdorff_unequal_cardinality() {
        let a = PointSet::from_rows(2, &[vec![0.0, 0.0]]).unwrap();
        let b = PointSet::from_rows(2, &[vec![0.0, 1.0], vec![0.0, 2.0], vec![0.0, 3.0]]).unwrap();
        assert_eq!(hausdorff(&a, &b).unwrap(), 3.0);
    }

    #[test]
    fn test_hausdorff_rejects_mismatched_dims() {
        let a = PointSet::from_rows(1, &[vec![0.0]]).unwrap();
        let b = PointSet::from_rows(2, &[vec![0.0, 0.0]]).unwrap();
        assert!(hausdorff(&a, &b).is_err());
        assert!(hausdorff(&a, &PointSet::new(1)).is_err());
    }

    #[test]
    fn test_hausdorff_properties_on_random_sets() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        for _ in 0..50 {
            let a = random_set(&mut rng, 6, 3);
            let b = random_set(&mut rng, 9, 3);
            let c = random_set(&mut rng, 4, 3);

            let ab = hausdorff(&a, &b).unwrap();
            let ba = hausdorff(&b, &a).unwrap();
            let bc = hausdorff(&b, &c).unwrap();
            let ac = hausdorff(&a, &c).unwrap();

            assert_eq!(ab, ba);
            assert_eq!(hausdorff(&a, &a).unwrap(), 0.0);
            assert!(ac <= ab + bc + 1e-9);
        }
    }

    #[test]
    fn test_path_graph_spectrum() {
        // Unit steps: adjacency of P3 has eigenvalues -√2, 0, √2
        let points = PointSet::from_rows(1, &[vec![0.0], vec![1.0], vec![2.0]]).unwrap();
        let spectrum = path_graph_spectrum(&points, 3).unwrap();
        let root2 = 2.0_f64.sqrt();
        assert!((spectrum[0] + root2).abs() < 1e-9);
        assert!(spectrum[1].abs() < 1e-9);
        assert!((spectrum[2] - root2).abs() < 1e-9);

        assert_eq!(path_graph_spectrum(&points, 2).unwrap().len(), 2);
        assert!(path_graph_spectrum(&points, 4).is_err());
    }

    #[test]
    fn test_matrix_is_symmetric_zero_diagonal() {
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let sets: Vec<PointSet> = (0..5).map(|i| random_set(&mut rng, 3 + i, 2)).collect();
        let labels = (0..5).map(|i| format!("s{i}")).collect();

        let matrix = DistanceMatrix::hausdorff(labels, &sets).unwrap();
        assert_eq!(matrix.values().shape(), (5, 5));
        assert!(matrix.is_symmetric(0.0));
    }

    #[test]
    fn test_euclidean_matrix_checks_lengths() {
        let labels = vec!["a".to_string(), "b".to_string()];
        let result = DistanceMatrix::euclidean(labels, &[vec![1.0, 2.0], vec![1.0]]);
        assert!(result.is_err());
    }
}
