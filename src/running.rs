//! Per-source running features and their PCA summary.
//!
//! # Methodology
//!
//! Every source keeps a window of its `memory_n` most recent packets. Each
//! registered [`Feature`] maps every packet to a scalar, so the window is a
//! multivariate time series with one column per feature.
//!
//! Once the window overflows, the series is resampled onto `interpolation_n`
//! uniform time points spanning the window, each feature trajectory is
//! L2-normalized, and PCA is run on the resulting observations × features
//! matrix. The summary keeps:
//!
//! - the `pc_n` singular values σᵢ (descending)
//! - the principal angle of each axis, `cos(vᵢ, 1/√d)`, against the all-ones
//!   direction of feature space
//!
//! A source is in WARMUP until its packet count exceeds `memory_n`, then in
//! STEADY state for the rest of the run.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use nalgebra::DMatrix;
use tracing::trace;

use crate::error::{AnalysisError, FeatureError};
use crate::features::{
    resolve_offset, DataStringCosineSimilarity, DataStringEntropy, DataStringNewInformation,
    Feature, FeatureHistory, NgramDistribution, PacketFrequency, PayloadLength,
    PortRelativeInterest, WindowView,
};
use crate::record::{
    icmp_fingerprint, tcp_fingerprint, udp_fingerprint, FingerprintFn, PacketRecord, Protocol,
};

/// Number of principal components kept in every summary.
pub const PC_N: usize = 5;

/// The feature variants a source can track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureKind {
    PacketFrequency,
    PayloadLength,
    DataStringEntropy,
    DataStringNewInformation,
    DataStringCosineSimilarity,
    PortRelativeInterest,
}

impl FeatureKind {
    pub fn descriptor(&self) -> &'static str {
        match self {
            Self::PacketFrequency => PacketFrequency::DESCRIPTOR,
            Self::PayloadLength => PayloadLength::DESCRIPTOR,
            Self::DataStringEntropy => DataStringEntropy::DESCRIPTOR,
            Self::DataStringNewInformation => DataStringNewInformation::DESCRIPTOR,
            Self::DataStringCosineSimilarity => DataStringCosineSimilarity::DESCRIPTOR,
            Self::PortRelativeInterest => PortRelativeInterest::DESCRIPTOR,
        }
    }

    pub fn build(&self, memory_n: usize) -> Box<dyn Feature> {
        match self {
            Self::PacketFrequency => Box::new(PacketFrequency::new()),
            Self::PayloadLength => Box::new(PayloadLength::new()),
            Self::DataStringEntropy => Box::new(DataStringEntropy::new()),
            Self::DataStringNewInformation => Box::new(DataStringNewInformation::new()),
            Self::DataStringCosineSimilarity => Box::new(DataStringCosineSimilarity::new()),
            Self::PortRelativeInterest => Box::new(PortRelativeInterest::new(memory_n)),
        }
    }
}

/// Fingerprint function and ordered feature list for one protocol.
#[derive(Debug)]
pub struct FeatureSet {
    pub protocol: Protocol,
    pub fingerprint: FingerprintFn,
    pub features: &'static [FeatureKind],
}

const TRANSPORT_FEATURES: &[FeatureKind] = &[
    FeatureKind::PacketFrequency,
    FeatureKind::PayloadLength,
    FeatureKind::DataStringEntropy,
    FeatureKind::DataStringNewInformation,
    FeatureKind::PortRelativeInterest,
];

const ICMP_FEATURES: &[FeatureKind] = &[
    FeatureKind::PacketFrequency,
    FeatureKind::PayloadLength,
    FeatureKind::DataStringEntropy,
    FeatureKind::DataStringNewInformation,
    FeatureKind::DataStringCosineSimilarity,
];

pub static FEATURE_SETS: &[FeatureSet] = &[
    FeatureSet {
        protocol: Protocol::Udp,
        fingerprint: udp_fingerprint,
        features: TRANSPORT_FEATURES,
    },
    FeatureSet {
        protocol: Protocol::Tcp,
        fingerprint: tcp_fingerprint,
        features: TRANSPORT_FEATURES,
    },
    FeatureSet {
        protocol: Protocol::Icmp,
        fingerprint: icmp_fingerprint,
        features: ICMP_FEATURES,
    },
];

pub fn feature_set_for(protocol: Protocol) -> Option<&'static FeatureSet> {
    FEATURE_SETS.iter().find(|set| set.protocol == protocol)
}

/// Sizing of a source's window and PCA grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowConfig {
    /// Packets retained per source (`memory_n_threshold`).
    pub memory_n: usize,
    /// Uniform time points the window is resampled onto.
    pub interpolation_n: usize,
    /// Length of fingerprint n-grams.
    pub ngram_size: usize,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            memory_n: 100,
            interpolation_n: 100,
            ngram_size: 1,
        }
    }
}

/// The bounded most-recent-packets buffer of one source.
#[derive(Debug, Clone, Default)]
pub struct PacketWindow {
    timestamps: VecDeque<f64>,
    fingerprints: VecDeque<String>,
    distributions: VecDeque<NgramDistribution>,
}

impl PacketWindow {
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    fn push(&mut self, timestamp: f64, fingerprint: String, distribution: NgramDistribution) {
        self.timestamps.push_back(timestamp);
        self.fingerprints.push_back(fingerprint);
        self.distributions.push_back(distribution);
    }

    fn pop_front(&mut self) {
        self.timestamps.pop_front();
        self.fingerprints.pop_front();
        self.distributions.pop_front();
    }

    pub fn fingerprint(&self, offset: isize) -> Option<&str> {
        resolve_offset(self.fingerprints.len(), offset).map(|i| self.fingerprints[i].as_str())
    }

    pub fn distribution(&self, offset: isize) -> Option<&NgramDistribution> {
        resolve_offset(self.distributions.len(), offset).map(|i| &self.distributions[i])
    }

    pub fn packet_time(&self, offset: isize) -> Option<f64> {
        resolve_offset(self.timestamps.len(), offset).map(|i| self.timestamps[i])
    }
}

/// What a feature sees while one packet is being processed.
struct UpdateContext<'a> {
    window: &'a PacketWindow,
    current: &'a NgramDistribution,
}

impl WindowView for UpdateContext<'_> {
    fn current_distribution(&self) -> &NgramDistribution {
        self.current
    }

    fn lookup_distribution(&self, offset: isize) -> Option<&NgramDistribution> {
        self.window.distribution(offset)
    }

    fn lookup_packet_time(&self, offset: isize) -> Option<f64> {
        self.window.packet_time(offset)
    }
}

/// Lifecycle of a source's window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// `N <= memory_n`: the window has never overflowed.
    Warmup,
    /// `N > memory_n`: a PCA summary is maintained.
    Steady,
}

/// Latest PCA summary of a source's window.
#[derive(Debug, Clone, PartialEq)]
pub struct PcaSummary {
    pub singular_values: Vec<f64>,
    pub pc_angles: Vec<f64>,
}

impl PcaSummary {
    /// The no-signal summary: all singular values and angles zero.
    pub fn neutral(pc_n: usize) -> Self {
        Self {
            singular_values: vec![0.0; pc_n],
            pc_angles: vec![0.0; pc_n],
        }
    }

    /// Principal angles weighted by their singular values.
    pub fn weighted_angle_deltas(&self) -> Vec<f64> {
        self.singular_values
            .iter()
            .zip(&self.pc_angles)
            .map(|(s, a)| s * a)
            .collect()
    }
}

/// Borrowed view of a window at the instant of a recompute.
#[derive(Debug, Clone)]
pub struct WindowSnapshot<'a> {
    pub timestamps: &'a [f64],
    pub histories: Vec<&'a FeatureHistory>,
}

/// Resamples every feature history onto a uniform grid.
///
/// Returns an `interpolation_n × features` matrix, or `None` when the window
/// spans no time at all.
pub fn interpolate_snapshot(
    snapshot: &WindowSnapshot<'_>,
    interpolation_n: usize,
) -> Result<Option<DMatrix<f64>>, FeatureError> {
    let Some(t_min) = snapshot.timestamps.iter().copied().reduce(f64::min) else {
        return Ok(None);
    };
    let t_max = snapshot
        .timestamps
        .iter()
        .copied()
        .fold(f64::NEG_INFINITY, f64::max);
    let span = t_max - t_min;
    if !(span > 0.0) || !span.is_finite() || interpolation_n == 0 {
        return Ok(None);
    }

    let t_norm: Vec<f64> = snapshot.timestamps.iter().map(|t| t - t_min).collect();
    let grid: Vec<f64> = if interpolation_n == 1 {
        vec![0.0]
    } else {
        let step = span / (interpolation_n - 1) as f64;
        (0..interpolation_n)
            .map(|i| if i + 1 == interpolation_n { span } else { i as f64 * step })
            .collect()
    };

    let mut columns = Vec::with_capacity(snapshot.histories.len());
    for history in &snapshot.histories {
        let mut trajectory = history.interpolated(&t_norm, &grid)?;
        let norm = trajectory.iter().map(|v| v * v).sum::<f64>().sqrt();
        if norm > 0.0 && norm.is_finite() {
            trajectory.iter_mut().for_each(|v| *v /= norm);
        } else {
            trajectory.iter_mut().for_each(|v| *v = 0.0);
        }
        columns.push(trajectory);
    }

    Ok(Some(DMatrix::from_fn(
        interpolation_n,
        columns.len(),
        |r, c| columns[c][r],
    )))
}

/// PCA of an observations × features matrix.
///
/// Columns are centred, singular values come back in descending order, and
/// every principal axis is oriented so its largest-magnitude loading is
/// positive. Missing components are padded with zeros.
pub fn pca_summary(observations: &DMatrix<f64>, pc_n: usize) -> Result<PcaSummary, AnalysisError> {
    let (rows, cols) = observations.shape();
    if rows == 0 || cols == 0 {
        return Ok(PcaSummary::neutral(pc_n));
    }
    if observations.iter().any(|v| !v.is_finite()) {
        return Err(AnalysisError::Numeric(
            "non-finite value in PCA input".to_string(),
        ));
    }

    let mut centered = observations.clone();
    for c in 0..cols {
        let mean = centered.column(c).iter().sum::<f64>() / rows as f64;
        centered.column_mut(c).iter_mut().for_each(|v| *v -= mean);
    }

    let svd = centered
        .try_svd(false, true, f64::EPSILON, 10_000)
        .ok_or_else(|| AnalysisError::Numeric("SVD did not converge".to_string()))?;
    let v_t = svd
        .v_t
        .ok_or_else(|| AnalysisError::Numeric("SVD returned no right singular vectors".to_string()))?;

    let mut order: Vec<usize> = (0..svd.singular_values.len()).collect();
    order.sort_by(|&a, &b| svd.singular_values[b].total_cmp(&svd.singular_values[a]));

    let reference_norm = (cols as f64).sqrt();
    let mut summary = PcaSummary::neutral(pc_n);
    for (slot, &idx) in order.iter().take(pc_n).enumerate() {
        let mut axis: Vec<f64> = v_t.row(idx).iter().copied().collect();

        let pivot = axis
            .iter()
            .copied()
            .max_by(|a, b| a.abs().total_cmp(&b.abs()))
            .unwrap_or(0.0);
        if pivot < 0.0 {
            axis.iter_mut().for_each(|v| *v = -*v);
        }

        let norm = axis.iter().map(|v| v * v).sum::<f64>().sqrt();
        let angle = if norm > 0.0 {
            axis.iter().sum::<f64>() / (norm * reference_norm)
        } else {
            0.0
        };

        summary.singular_values[slot] = svd.singular_values[idx].max(0.0);
        summary.pc_angles[slot] = angle;
    }

    Ok(summary)
}

/// Interpolates a window snapshot and runs PCA on it.
pub fn compute_pca_summary(
    snapshot: &WindowSnapshot<'_>,
    interpolation_n: usize,
    pc_n: usize,
) -> Result<PcaSummary, AnalysisError> {
    match interpolate_snapshot(snapshot, interpolation_n)? {
        Some(matrix) => pca_summary(&matrix, pc_n),
        None => Ok(PcaSummary::neutral(pc_n)),
    }
}

/// Wall-clock time spent per processing stage.
#[derive(Debug, Clone, Copy, Default)]
pub struct StageTimings {
    pub features: Duration,
    pub interpolation: Duration,
    pub pca: Duration,
}

impl std::ops::AddAssign for StageTimings {
    fn add_assign(&mut self, other: Self) {
        self.features += other.features;
        self.interpolation += other.interpolation;
        self.pca += other.pca;
    }
}

/// A source's feature window and its latest PCA summary.
#[derive(Debug)]
pub struct RunningFeatures {
    features: Vec<Box<dyn Feature>>,
    fingerprint: FingerprintFn,
    window: PacketWindow,
    config: WindowConfig,
    pc_n: usize,
    n: u64,
    summary: Option<PcaSummary>,
    timings: StageTimings,
}

impl RunningFeatures {
    pub fn new(fingerprint: FingerprintFn, config: WindowConfig) -> Self {
        Self {
            features: Vec::new(),
            fingerprint,
            window: PacketWindow::default(),
            config,
            pc_n: PC_N,
            n: 0,
            summary: None,
            timings: StageTimings::default(),
        }
    }

    /// Builds a source tracker with the protocol's declared feature set.
    pub fn for_feature_set(set: &FeatureSet, config: WindowConfig) -> Self {
        let mut running = Self::new(set.fingerprint, config);
        for kind in set.features {
            running.add_feature(kind.build(config.memory_n));
        }
        running
    }

    pub fn add_feature(&mut self, feature: Box<dyn Feature>) {
        self.features.push(feature);
    }

    /// Processes one packet of this source.
    pub fn update(&mut self, packet: &PacketRecord) -> Result<(), AnalysisError> {
        let started = Instant::now();

        let fingerprint = (self.fingerprint)(packet);
        let distribution = NgramDistribution::from_fingerprint(&fingerprint, self.config.ngram_size);

        // Features read the previous window entries before this packet lands.
        let view = UpdateContext {
            window: &self.window,
            current: &distribution,
        };
        for feature in self.features.iter_mut() {
            feature.update(packet, &view);
        }

        self.window.push(packet.timestamp, fingerprint, distribution);
        self.timings.features += started.elapsed();

        if self.window.len() > self.config.memory_n {
            self.window.pop_front();
            for feature in self.features.iter_mut() {
                feature.remove_first_state()?;
            }
            self.recompute_summary()?;
        }

        self.n += 1;
        Ok(())
    }

    fn recompute_summary(&mut self) -> Result<(), AnalysisError> {
        let timestamps: &[f64] = self.window.timestamps.make_contiguous();
        let snapshot = WindowSnapshot {
            timestamps,
            histories: self.features.iter().map(|f| f.history()).collect(),
        };

        let started = Instant::now();
        let matrix = interpolate_snapshot(&snapshot, self.config.interpolation_n)?;
        self.timings.interpolation += started.elapsed();

        let started = Instant::now();
        let summary = match matrix {
            Some(matrix) => pca_summary(&matrix, self.pc_n)?,
            None => {
                trace!("window spans no time, using neutral summary");
                PcaSummary::neutral(self.pc_n)
            }
        };
        self.timings.pca += started.elapsed();

        self.summary = Some(summary);
        Ok(())
    }

    pub fn phase(&self) -> Phase {
        if self.n > self.config.memory_n as u64 {
            Phase::Steady
        } else {
            Phase::Warmup
        }
    }

    /// Packets processed so far.
    pub fn n(&self) -> u64 {
        self.n
    }

    pub fn memory_n_threshold(&self) -> usize {
        self.config.memory_n
    }

    pub fn summary(&self) -> Option<&PcaSummary> {
        self.summary.as_ref()
    }

    pub fn singular_values(&self) -> Option<&[f64]> {
        self.summary.as_ref().map(|s| s.singular_values.as_slice())
    }

    pub fn pc_angles(&self) -> Option<&[f64]> {
        self.summary.as_ref().map(|s| s.pc_angles.as_slice())
    }

    /// Current state of every feature, in registration order.
    pub fn get_state(&self) -> Result<Vec<f64>, FeatureError> {
        self.features.iter().map(|f| f.get_state()).collect()
    }

    pub fn last_states(&self) -> Vec<Vec<f64>> {
        self.features
            .iter()
            .map(|f| f.last_states().iter().copied().collect())
            .collect()
    }

    pub fn features(&self) -> &[Box<dyn Feature>] {
        &self.features
    }

    pub fn descriptors(&self) -> Vec<&'static str> {
        self.features.iter().map(|f| f.descriptor()).collect()
    }

    pub fn window(&self) -> &PacketWindow {
        &self.window
    }

    pub fn timings(&self) -> StageTimings {
        self.timings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::test_support::packet;

    fn udp_tracker(memory_n: usize) -> RunningFeatures {
        let set = feature_set_for(Protocol::Udp).unwrap();
        RunningFeatures::for_feature_set(
            set,
            WindowConfig {
                memory_n,
                interpolation_n: 50,
                ngram_size: 1,
            },
        )
    }

    #[test]
    fn test_feature_set_table() {
        let udp = feature_set_for(Protocol::Udp).unwrap();
        let icmp = feature_set_for(Protocol::Icmp).unwrap();

        assert!(udp.features.contains(&FeatureKind::PortRelativeInterest));
        assert!(!udp.features.contains(&FeatureKind::DataStringCosineSimilarity));
        assert!(icmp.features.contains(&FeatureKind::DataStringCosineSimilarity));
        assert!(!icmp.features.contains(&FeatureKind::PortRelativeInterest));
        assert_eq!(udp.features.len(), 5);
        assert_eq!(icmp.features.len(), 5);
        assert!(feature_set_for(Protocol::Other(47)).is_none());
    }

    #[test]
    fn test_state_before_update_is_error() {
        let tracker = udp_tracker(10);
        assert!(matches!(
            tracker.get_state(),
            Err(FeatureError::Uninitialized { .. })
        ));
    }

    #[test]
    fn test_history_lengths_track_window() {
        let memory_n = 10;
        let mut tracker = udp_tracker(memory_n);

        for i in 0..35u64 {
            tracker.update(&packet(53 + (i % 2) as u32, 60, i as f64)).unwrap();
            let expected = ((i + 1) as usize).min(memory_n);
            assert_eq!(tracker.window().len(), expected);
            for states in tracker.last_states() {
                assert_eq!(states.len(), expected);
            }
        }
    }

    #[test]
    fn test_phase_transition() {
        let memory_n = 5;
        let mut tracker = udp_tracker(memory_n);

        for i in 0..memory_n {
            tracker.update(&packet(53, 60, i as f64)).unwrap();
            assert_eq!(tracker.phase(), Phase::Warmup);
            assert!(tracker.summary().is_none());
        }
        tracker.update(&packet(53, 60, memory_n as f64)).unwrap();
        assert_eq!(tracker.phase(), Phase::Steady);
        assert!(tracker.summary().is_some());
    }

    #[test]
    fn test_summary_shape() {
        let mut tracker = udp_tracker(20);
        for i in 0..40u32 {
            let port = if i % 3 == 0 { 23 } else { 445 };
            tracker.update(&packet(port, 40 + (i % 5) * 10, i as f64 * 0.7)).unwrap();
        }

        let values = tracker.singular_values().unwrap();
        assert_eq!(values.len(), PC_N);
        assert!(values.iter().all(|v| *v >= 0.0));
        assert!(values.windows(2).all(|w| w[0] >= w[1]));

        let angles = tracker.pc_angles().unwrap();
        assert!(angles.iter().all(|a| a.abs() <= 1.0 + 1e-9));
    }

    #[test]
    fn test_equal_timestamps_give_neutral_summary() {
        let mut tracker = udp_tracker(5);
        for i in 0..12u32 {
            tracker.update(&packet(53 + i, 60, 100.0)).unwrap();
        }
        assert_eq!(tracker.summary(), Some(&PcaSummary::neutral(PC_N)));
    }

    #[test]
    fn test_window_lookups() {
        let mut tracker = udp_tracker(3);
        tracker.update(&packet(53, 60, 1.0)).unwrap();
        tracker.update(&packet(80, 60, 2.0)).unwrap();

        assert_eq!(tracker.window().packet_time(-1), Some(2.0));
        assert_eq!(tracker.window().fingerprint(0), Some("00353c"));
        assert!(tracker.window().distribution(-3).is_none());
    }

    #[test]
    fn test_pure_pca_on_snapshot() {
        let n = 30;
        let timestamps: Vec<f64> = (0..n).map(|i| i as f64).collect();
        let mut histories = Vec::new();
        for k in 0..5 {
            let mut h = FeatureHistory::new("synthetic");
            for i in 0..n {
                let t = i as f64;
                h.record(((k + 1) as f64 * t * 0.3).sin() + k as f64);
            }
            histories.push(h);
        }
        let snapshot = WindowSnapshot {
            timestamps: &timestamps,
            histories: histories.iter().collect(),
        };

        let summary = compute_pca_summary(&snapshot, 40, PC_N).unwrap();
        assert_eq!(summary.singular_values.len(), PC_N);
        assert!(summary.singular_values[0] > 0.0);
        assert!(summary
            .singular_values
            .windows(2)
            .all(|w| w[0] >= w[1]));
        assert_eq!(summary.weighted_angle_deltas().len(), PC_N);
    }

    #[test]
    fn test_pca_pads_missing_components() {
        let matrix = DMatrix::from_row_slice(4, 2, &[1.0, 0.0, 2.0, 1.0, 3.0, 0.5, 4.0, 2.0]);
        let summary = pca_summary(&matrix, PC_N).unwrap();
        assert_eq!(summary.singular_values.len(), PC_N);
        assert_eq!(summary.singular_values[2..], [0.0, 0.0, 0.0]);
        assert!(summary.singular_values[0] >= summary.singular_values[1]);
    }

    #[test]
    fn test_pca_axis_orientation() {
        // Single dominant direction along (1, 1): angle is +1 after orientation.
        let matrix = DMatrix::from_row_slice(3, 2, &[-1.0, -1.0, 0.0, 0.0, 1.0, 1.0]);
        let summary = pca_summary(&matrix, 2).unwrap();
        assert!((summary.pc_angles[0] - 1.0).abs() < 1e-9);
    }
}
