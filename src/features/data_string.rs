//! Features over the n-gram distribution of packet fingerprints.

use super::{Feature, FeatureHistory, WindowView};
use crate::record::PacketRecord;

/// Shannon entropy of the current packet's n-gram distribution.
#[derive(Debug, Clone)]
pub struct DataStringEntropy {
    history: FeatureHistory,
}

impl DataStringEntropy {
    pub const DESCRIPTOR: &'static str = "data_string_entropy";

    pub fn new() -> Self {
        Self {
            history: FeatureHistory::new(Self::DESCRIPTOR),
        }
    }
}

impl Default for DataStringEntropy {
    fn default() -> Self {
        Self::new()
    }
}

impl Feature for DataStringEntropy {
    fn update(&mut self, _packet: &PacketRecord, view: &dyn WindowView) {
        self.history
            .record(view.current_distribution().shannon_entropy());
    }

    fn history(&self) -> &FeatureHistory {
        &self.history
    }

    fn history_mut(&mut self) -> &mut FeatureHistory {
        &mut self.history
    }
}

/// New information carried by a packet: KL divergence of its distribution
/// against the previous packet's.
#[derive(Debug, Clone)]
pub struct DataStringNewInformation {
    history: FeatureHistory,
}

impl DataStringNewInformation {
    pub const DESCRIPTOR: &'static str = "data_string_new_info";

    pub fn new() -> Self {
        Self {
            history: FeatureHistory::new(Self::DESCRIPTOR),
        }
    }
}

impl Default for DataStringNewInformation {
    fn default() -> Self {
        Self::new()
    }
}

impl Feature for DataStringNewInformation {
    fn update(&mut self, _packet: &PacketRecord, view: &dyn WindowView) {
        let state = match view.lookup_distribution(-1) {
            Some(previous) if !previous.is_empty() => {
                view.current_distribution().kl_divergence(previous)
            }
            _ => 0.0,
        };
        self.history.record(state);
    }

    fn history(&self) -> &FeatureHistory {
        &self.history
    }

    fn history_mut(&mut self) -> &mut FeatureHistory {
        &mut self.history
    }
}

/// Cosine similarity between the current and previous packet distributions.
#[derive(Debug, Clone)]
pub struct DataStringCosineSimilarity {
    history: FeatureHistory,
}

impl DataStringCosineSimilarity {
    pub const DESCRIPTOR: &'static str = "data_string_cosine_sim";

    pub fn new() -> Self {
        Self {
            history: FeatureHistory::new(Self::DESCRIPTOR),
        }
    }
}

impl Default for DataStringCosineSimilarity {
    fn default() -> Self {
        Self::new()
    }
}

impl Feature for DataStringCosineSimilarity {
    fn update(&mut self, _packet: &PacketRecord, view: &dyn WindowView) {
        let state = match view.lookup_distribution(-1) {
            Some(previous) if !previous.is_empty() => {
                view.current_distribution().cosine_similarity(previous)
            }
            _ => 0.0,
        };
        self.history.record(state);
    }

    fn history(&self) -> &FeatureHistory {
        &self.history
    }

    fn history_mut(&mut self) -> &mut FeatureHistory {
        &mut self.history
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::test_support::{packet, StubView};
    use crate::features::NgramDistribution;

    fn view(current: &str, previous: Option<&str>) -> StubView {
        StubView {
            current: NgramDistribution::from_fingerprint(current, 1),
            previous: previous
                .map(|p| vec![NgramDistribution::from_fingerprint(p, 1)])
                .unwrap_or_default(),
            times: Vec::new(),
        }
    }

    #[test]
    fn test_entropy_of_constant_fingerprint() {
        let mut feature = DataStringEntropy::new();
        feature.update(&packet(0, 0, 0.0), &view("000000", None));
        assert_eq!(feature.get_state().unwrap(), 0.0);
    }

    #[test]
    fn test_new_information_without_history() {
        let mut feature = DataStringNewInformation::new();
        feature.update(&packet(53, 60, 0.0), &view("00353c", None));
        assert_eq!(feature.get_state().unwrap(), 0.0);
    }

    #[test]
    fn test_new_information_identical_is_zero() {
        let mut feature = DataStringNewInformation::new();
        feature.update(&packet(53, 60, 0.0), &view("00353c", Some("00353c")));
        assert!(feature.get_state().unwrap().abs() < 1e-12);
    }

    #[test]
    fn test_new_information_direction() {
        // current = P, previous = Q
        let mut forward = DataStringNewInformation::new();
        forward.update(&packet(0, 0, 0.0), &view("aaab", Some("ab")));
        let mut backward = DataStringNewInformation::new();
        backward.update(&packet(0, 0, 0.0), &view("ab", Some("aaab")));

        let pq = forward.get_state().unwrap();
        let qp = backward.get_state().unwrap();
        assert!(pq > 0.0 && qp > 0.0);
        assert!((pq - qp).abs() > 1e-3);
    }

    #[test]
    fn test_cosine_without_history() {
        let mut feature = DataStringCosineSimilarity::new();
        feature.update(&packet(8, 84, 0.0), &view("0854", None));
        assert_eq!(feature.get_state().unwrap(), 0.0);
    }

    #[test]
    fn test_cosine_identical_is_one() {
        let mut feature = DataStringCosineSimilarity::new();
        feature.update(&packet(8, 84, 0.0), &view("0854", Some("0854")));
        assert!((feature.get_state().unwrap() - 1.0).abs() < 1e-9);
    }
}
