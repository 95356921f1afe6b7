//! Streaming per-source features.
//!
//! A [`Feature`] turns every packet of one source into a single scalar and
//! keeps a bounded, oldest-first history of those scalars. The owning
//! [`RunningFeatures`](crate::running::RunningFeatures) evicts history in
//! lockstep with its packet window, so each feature's history always lines up
//! with the window timestamps.
//!
//! Features never own or mutate the window. They read it through the
//! [`WindowView`] capability handed to [`Feature::update`].

use std::collections::VecDeque;

use crate::error::FeatureError;
use crate::record::PacketRecord;

mod data_string;
mod distribution;
mod packet;
mod port_interest;

pub use data_string::{DataStringCosineSimilarity, DataStringEntropy, DataStringNewInformation};
pub use distribution::NgramDistribution;
pub use packet::{PacketFrequency, PayloadLength};
pub use port_interest::PortRelativeInterest;

/// Read-only access to the owning source's packet window.
///
/// Offsets follow the usual negative-index convention: `-1` is the newest
/// window entry, `0` the oldest.
pub trait WindowView {
    /// Distribution of the packet currently being processed (not yet in the window).
    fn current_distribution(&self) -> &NgramDistribution;

    fn lookup_distribution(&self, offset: isize) -> Option<&NgramDistribution>;

    fn lookup_packet_time(&self, offset: isize) -> Option<f64>;
}

/// Resolves a possibly negative offset against a window of `len` entries.
pub(crate) fn resolve_offset(len: usize, offset: isize) -> Option<usize> {
    if offset < 0 {
        len.checked_sub(offset.unsigned_abs())
    } else {
        let idx = offset as usize;
        (idx < len).then_some(idx)
    }
}

/// Latest value plus the bounded history of one feature.
#[derive(Debug, Clone)]
pub struct FeatureHistory {
    descriptor: &'static str,
    current: Option<f64>,
    states: VecDeque<f64>,
}

impl FeatureHistory {
    pub fn new(descriptor: &'static str) -> Self {
        Self {
            descriptor,
            current: None,
            states: VecDeque::new(),
        }
    }

    pub fn descriptor(&self) -> &'static str {
        self.descriptor
    }

    /// Sets the current state and appends it to the history.
    pub fn record(&mut self, value: f64) {
        self.current = Some(value);
        self.states.push_back(value);
    }

    pub fn current(&self) -> Result<f64, FeatureError> {
        self.current.ok_or(FeatureError::Uninitialized {
            descriptor: self.descriptor,
        })
    }

    pub fn states(&self) -> &VecDeque<f64> {
        &self.states
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn remove_first(&mut self) -> Result<f64, FeatureError> {
        self.states.pop_front().ok_or(FeatureError::EmptyHistory {
            descriptor: self.descriptor,
        })
    }

    /// Resamples the history onto `t_query`.
    ///
    /// `t_norm` holds the time of every history entry. Out-of-order times are
    /// stably sorted together with their states before interpolating.
    pub fn interpolated(&self, t_norm: &[f64], t_query: &[f64]) -> Result<Vec<f64>, FeatureError> {
        if t_norm.len() != self.states.len() {
            return Err(FeatureError::LengthMismatch {
                descriptor: self.descriptor,
                expected: t_norm.len(),
                actual: self.states.len(),
            });
        }

        if t_norm.windows(2).all(|w| w[0] <= w[1]) {
            let ys: Vec<f64> = self.states.iter().copied().collect();
            return Ok(interpolate_linear(t_norm, &ys, t_query));
        }

        let mut pairs: Vec<(f64, f64)> = t_norm
            .iter()
            .copied()
            .zip(self.states.iter().copied())
            .collect();
        pairs.sort_by(|a, b| a.0.total_cmp(&b.0));
        let (xs, ys): (Vec<f64>, Vec<f64>) = pairs.into_iter().unzip();
        Ok(interpolate_linear(&xs, &ys, t_query))
    }
}

/// A single streaming scalar computed per packet for one source.
pub trait Feature: Send + std::fmt::Debug {
    /// Consumes one packet, sets the current state and appends it to history.
    fn update(&mut self, packet: &PacketRecord, view: &dyn WindowView);

    fn history(&self) -> &FeatureHistory;

    fn history_mut(&mut self) -> &mut FeatureHistory;

    fn descriptor(&self) -> &'static str {
        self.history().descriptor()
    }

    /// Latest state; an error before the first update.
    fn get_state(&self) -> Result<f64, FeatureError> {
        self.history().current()
    }

    fn last_states(&self) -> &VecDeque<f64> {
        self.history().states()
    }

    fn remove_first_state(&mut self) -> Result<f64, FeatureError> {
        self.history_mut().remove_first()
    }

    fn get_interpolated_states(
        &self,
        t_norm: &[f64],
        t_query: &[f64],
    ) -> Result<Vec<f64>, FeatureError> {
        self.history().interpolated(t_norm, t_query)
    }
}

/// Piecewise-linear interpolation of `(xs, ys)` at every point of `queries`.
///
/// `xs` must be non-decreasing. Queries outside `[xs[0], xs[last]]` clamp to
/// the end values; where consecutive `xs` coincide the later sample wins.
pub fn interpolate_linear(xs: &[f64], ys: &[f64], queries: &[f64]) -> Vec<f64> {
    debug_assert_eq!(xs.len(), ys.len());
    let n = xs.len().min(ys.len());
    if n == 0 {
        return vec![0.0; queries.len()];
    }

    queries
        .iter()
        .map(|&q| {
            if q <= xs[0] {
                return ys[0];
            }
            if q >= xs[n - 1] {
                return ys[n - 1];
            }
            // First index strictly greater than q; q lies in [xs[hi - 1], xs[hi]).
            let hi = xs[..n].partition_point(|&x| x <= q);
            let lo = hi - 1;
            let span = xs[hi] - xs[lo];
            if span <= 0.0 {
                ys[hi]
            } else {
                let w = (q - xs[lo]) / span;
                ys[lo] + w * (ys[hi] - ys[lo])
            }
        })
        .collect()
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::net::Ipv4Addr;

    use super::{resolve_offset, NgramDistribution, WindowView};
    use crate::record::{PacketRecord, Protocol};

    pub fn packet(dst_port: u32, ip_len: u32, timestamp: f64) -> PacketRecord {
        PacketRecord {
            src_addr: Ipv4Addr::new(192, 0, 2, 1),
            dst_addr: Ipv4Addr::new(198, 51, 100, 1),
            protocol: Protocol::Udp,
            dst_port,
            ip_len,
            timestamp,
            tcp_flags: 0,
        }
    }

    /// Window stand-in for exercising features in isolation.
    #[derive(Debug, Default)]
    pub struct StubView {
        pub current: NgramDistribution,
        pub previous: Vec<NgramDistribution>,
        pub times: Vec<f64>,
    }

    impl WindowView for StubView {
        fn current_distribution(&self) -> &NgramDistribution {
            &self.current
        }

        fn lookup_distribution(&self, offset: isize) -> Option<&NgramDistribution> {
            resolve_offset(self.previous.len(), offset).map(|i| &self.previous[i])
        }

        fn lookup_packet_time(&self, offset: isize) -> Option<f64> {
            resolve_offset(self.times.len(), offset).map(|i| self.times[i])
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_uninitialized() {
        let history = FeatureHistory::new("payload_len");
        assert_eq!(
            history.current(),
            Err(FeatureError::Uninitialized {
                descriptor: "payload_len"
            })
        );
    }

    #[test]
    fn test_history_record_and_evict() {
        let mut history = FeatureHistory::new("x");
        history.record(1.0);
        history.record(2.0);

        assert_eq!(history.current().unwrap(), 2.0);
        assert_eq!(history.remove_first().unwrap(), 1.0);
        assert_eq!(history.len(), 1);
        assert_eq!(history.remove_first().unwrap(), 2.0);
        assert!(matches!(
            history.remove_first(),
            Err(FeatureError::EmptyHistory { .. })
        ));
    }

    #[test]
    fn test_interpolated_requires_matching_length() {
        let mut history = FeatureHistory::new("x");
        history.record(1.0);

        let err = history.interpolated(&[0.0, 1.0], &[0.5]).unwrap_err();
        assert!(matches!(
            err,
            FeatureError::LengthMismatch {
                expected: 2,
                actual: 1,
                ..
            }
        ));
    }

    #[test]
    fn test_interpolated_sorts_out_of_order_times() {
        let mut history = FeatureHistory::new("x");
        for v in [0.0, 20.0, 10.0] {
            history.record(v);
        }

        let out = history.interpolated(&[0.0, 2.0, 1.0], &[0.5, 1.5]).unwrap();
        assert!((out[0] - 5.0).abs() < 1e-12);
        assert!((out[1] - 15.0).abs() < 1e-12);
    }

    #[test]
    fn test_interpolate_irregular_grid() {
        let xs = [0.0, 1.0, 4.0];
        let ys = [0.0, 10.0, 40.0];
        let out = interpolate_linear(&xs, &ys, &[0.0, 0.5, 1.0, 2.5, 4.0]);
        let expected = [0.0, 5.0, 10.0, 25.0, 40.0];
        for (a, b) in out.iter().zip(expected.iter()) {
            assert!((a - b).abs() < 1e-12, "{a} != {b}");
        }
    }

    #[test]
    fn test_interpolate_duplicate_times() {
        let xs = [0.0, 1.0, 1.0, 2.0];
        let ys = [0.0, 1.0, 5.0, 7.0];
        let out = interpolate_linear(&xs, &ys, &[1.0, 1.5]);
        // q == 1.0 lands on the later duplicate, then interpolates 5 -> 7
        assert_eq!(out[0], 5.0);
        assert!((out[1] - 6.0).abs() < 1e-12);
    }

    #[test]
    fn test_resolve_offset() {
        assert_eq!(resolve_offset(3, -1), Some(2));
        assert_eq!(resolve_offset(3, -3), Some(0));
        assert_eq!(resolve_offset(3, -4), None);
        assert_eq!(resolve_offset(3, 0), Some(0));
        assert_eq!(resolve_offset(3, 3), None);
        assert_eq!(resolve_offset(0, -1), None);
    }
}
