//! N-gram distributions over packet fingerprints.

use std::collections::HashMap;

/// Occurrence counts of fixed-length substrings of one fingerprint.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NgramDistribution {
    counts: HashMap<String, u32>,
    total: u32,
}

impl NgramDistribution {
    /// Counts every `n`-character window of `fingerprint`.
    ///
    /// A fingerprint shorter than `n` yields an empty distribution.
    pub fn from_fingerprint(fingerprint: &str, n: usize) -> Self {
        let chars: Vec<char> = fingerprint.chars().collect();
        let mut counts: HashMap<String, u32> = HashMap::new();
        let mut total = 0;

        if n > 0 {
            for gram in chars.windows(n) {
                *counts.entry(gram.iter().collect()).or_default() += 1;
                total += 1;
            }
        }

        Self { counts, total }
    }

    pub fn count(&self, gram: &str) -> u32 {
        self.counts.get(gram).copied().unwrap_or(0)
    }

    pub fn total(&self) -> u32 {
        self.total
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u32)> {
        self.counts.iter().map(|(k, v)| (k.as_str(), *v))
    }

    fn probability(&self, gram: &str) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.count(gram) as f64 / self.total as f64
        }
    }

    /// Shannon entropy in nats.
    pub fn shannon_entropy(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        let total = self.total as f64;
        self.counts
            .values()
            .filter(|&&c| c > 0)
            .map(|&c| {
                let p = c as f64 / total;
                -p * p.ln()
            })
            .sum()
    }

    /// `D(self ‖ other)`, summed only over n-grams present in both.
    pub fn kl_divergence(&self, other: &NgramDistribution) -> f64 {
        if self.total == 0 || other.total == 0 {
            return 0.0;
        }
        self.counts
            .iter()
            .filter(|(gram, count)| **count > 0 && other.count(gram.as_str()) > 0)
            .map(|(gram, _)| {
                let p = self.probability(gram);
                let q = other.probability(gram);
                p * (p / q).ln()
            })
            .sum()
    }

    /// Cosine similarity of the two L1-normalized count vectors.
    ///
    /// Zero when either side has no mass.
    pub fn cosine_similarity(&self, other: &NgramDistribution) -> f64 {
        if self.total == 0 || other.total == 0 {
            return 0.0;
        }

        let mut dot = 0.0;
        let mut norm_a = 0.0;
        let mut norm_b = 0.0;
        for (gram, _) in self.iter() {
            let p = self.probability(gram);
            let q = other.probability(gram);
            dot += p * q;
            norm_a += p * p;
        }
        for (gram, _) in other.iter() {
            let q = other.probability(gram);
            norm_b += q * q;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 {
            dot / denom
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unigram_counts() {
        let dist = NgramDistribution::from_fingerprint("00353c", 1);
        assert_eq!(dist.total(), 6);
        assert_eq!(dist.count("0"), 2);
        assert_eq!(dist.count("3"), 2);
        assert_eq!(dist.count("5"), 1);
        assert_eq!(dist.count("z"), 0);
    }

    #[test]
    fn test_bigram_counts() {
        let dist = NgramDistribution::from_fingerprint("aaab", 2);
        assert_eq!(dist.total(), 3);
        assert_eq!(dist.count("aa"), 2);
        assert_eq!(dist.count("ab"), 1);
    }

    #[test]
    fn test_short_fingerprint_is_empty() {
        assert!(NgramDistribution::from_fingerprint("a", 2).is_empty());
        assert!(NgramDistribution::from_fingerprint("", 1).is_empty());
    }

    #[test]
    fn test_entropy() {
        assert_eq!(NgramDistribution::from_fingerprint("0000", 1).shannon_entropy(), 0.0);

        let uniform = NgramDistribution::from_fingerprint("abcd", 1);
        assert!((uniform.shannon_entropy() - 4f64.ln()).abs() < 1e-12);
    }

    #[test]
    fn test_kl_identical_is_zero() {
        let p = NgramDistribution::from_fingerprint("00353c", 1);
        assert!(p.kl_divergence(&p.clone()).abs() < 1e-12);
    }

    #[test]
    fn test_kl_is_asymmetric() {
        let p = NgramDistribution::from_fingerprint("aaab", 1);
        let q = NgramDistribution::from_fingerprint("ab", 1);

        let pq = p.kl_divergence(&q);
        let qp = q.kl_divergence(&p);
        assert!((pq - 0.130812).abs() < 1e-5, "D(P||Q) = {pq}");
        assert!((qp - 0.143841).abs() < 1e-5, "D(Q||P) = {qp}");
        assert!((pq - qp).abs() > 1e-3);
    }

    #[test]
    fn test_kl_ignores_disjoint_grams() {
        let p = NgramDistribution::from_fingerprint("aaaa", 1);
        let q = NgramDistribution::from_fingerprint("bbbb", 1);
        assert_eq!(p.kl_divergence(&q), 0.0);
    }

    #[test]
    fn test_cosine_identical_and_symmetric() {
        let p = NgramDistribution::from_fingerprint("00353c", 1);
        let q = NgramDistribution::from_fingerprint("01bb28", 1);

        assert!((p.cosine_similarity(&p) - 1.0).abs() < 1e-12);
        assert!((p.cosine_similarity(&q) - q.cosine_similarity(&p)).abs() < 1e-12);
    }

    #[test]
    fn test_cosine_disjoint_is_zero() {
        let p = NgramDistribution::from_fingerprint("aaaa", 1);
        let q = NgramDistribution::from_fingerprint("bbbb", 1);
        assert_eq!(p.cosine_similarity(&q), 0.0);
        assert_eq!(p.cosine_similarity(&NgramDistribution::default()), 0.0);
    }
}
