//! Configuration Module
//!
//! Provides TOML-based configuration for ibr-shape.
//! Configuration is optional - CLI arguments can override file settings.

use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::analysis::{
    DistanceOptions, IngestOptions, DEFAULT_MIN_ROWS, DEFAULT_MIN_SPECTRUM_LEN, DEFAULT_SAMPLE_CAP,
};
use crate::cluster::{ClusterMethod, ClusterRequest, Linkage};
use crate::export::{OutputFormat, OutputMode};
use crate::record::Protocol;
use crate::running::{feature_set_for, WindowConfig, PC_N};
use crate::summary::SummaryColumn;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub ingest: IngestConfig,
    pub distance: DistanceConfig,
    pub cluster: ClusterConfig,
    pub output: OutputConfig,
}

impl Config {
    /// Loads configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Loads the given configuration file, or returns defaults when no path
    /// is given. A named file that cannot be read or parsed is an error.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => {
                let config = Self::load(p)?;
                tracing::debug!("Loaded config from {}", p.display());
                Ok(config)
            }
            None => Ok(Self::default()),
        }
    }

    /// Generates a default configuration file content
    pub fn generate_default() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config)
            .unwrap_or_else(|_| "# Failed to generate config".to_string())
    }

    /// Validates the configuration
    pub fn validate(&self) -> Result<()> {
        let ingest = &self.ingest;
        if ingest.window_size < 2 {
            anyhow::bail!("window_size must be at least 2");
        }
        if ingest.interpolation_n < PC_N {
            anyhow::bail!(
                "interpolation_n must be at least the PCA component count ({})",
                PC_N
            );
        }
        if ingest.ngram_size == 0 {
            anyhow::bail!("ngram_size must be greater than 0");
        }
        if ingest.max_sources == 0 {
            anyhow::bail!("max_sources must be greater than 0");
        }
        if feature_set_for(Protocol::from(ingest.protocol)).is_none() {
            anyhow::bail!(
                "protocol must be 1 (ICMP), 6 (TCP) or 17 (UDP), got {}",
                ingest.protocol
            );
        }
        for dst in &ingest.destinations {
            parse_address(dst)?;
        }

        let distance = &self.distance;
        if distance.columns.is_empty() {
            anyhow::bail!("distance.columns must name at least one summary column");
        }
        if distance.random_sampling && distance.sample_cap == 0 {
            anyhow::bail!("sample_cap must be greater than 0 when random_sampling is on");
        }

        self.cluster
            .to_request()
            .validate(None)
            .context("Invalid [cluster] settings")?;
        Ok(())
    }
}

/// Accepts dotted quads and big-endian decimal integers.
fn parse_address(raw: &str) -> Result<Ipv4Addr> {
    let raw = raw.trim();
    raw.parse::<Ipv4Addr>()
        .or_else(|_| raw.parse::<u32>().map(Ipv4Addr::from))
        .map_err(|_| anyhow::anyhow!("Invalid destination address: {}", raw))
}

/// Ingestion-related configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Directory holding the record files
    pub input_dir: Option<PathBuf>,
    /// Record files, relative to input_dir (empty = every .csv in input_dir)
    pub input_files: Vec<PathBuf>,
    /// Summary table output path
    pub output_file: Option<PathBuf>,
    /// Destination allow-list (dotted quads or decimal integers)
    pub destinations: Vec<String>,
    /// IP protocol of interest (1, 6 or 17)
    pub protocol: u8,
    /// Packets kept per source window
    pub window_size: usize,
    /// Uniform time points per PCA recompute
    pub interpolation_n: usize,
    /// Fingerprint n-gram length
    pub ngram_size: usize,
    /// Key sources as ip_port
    pub split_by_port: bool,
    /// Maximum number of tracked sources (LRU eviction)
    pub max_sources: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        let window = WindowConfig::default();
        Self {
            input_dir: None,
            input_files: Vec::new(),
            output_file: None,
            destinations: Vec::new(),
            protocol: Protocol::Udp.number(),
            window_size: window.memory_n,
            interpolation_n: window.interpolation_n,
            ngram_size: window.ngram_size,
            split_by_port: false,
            max_sources: 100_000,
        }
    }
}

impl IngestConfig {
    /// Resolves the record files to read, in order.
    pub fn input_paths(&self) -> Result<Vec<PathBuf>> {
        let base = self.input_dir.clone().unwrap_or_default();
        if !self.input_files.is_empty() {
            return Ok(self.input_files.iter().map(|f| base.join(f)).collect());
        }

        let dir = self
            .input_dir
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("No input files given and no input_dir to scan"))?;
        let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)
            .with_context(|| format!("Failed to read input directory: {}", dir.display()))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "csv"))
            .collect();
        paths.sort();
        if paths.is_empty() {
            anyhow::bail!("No .csv files found in {}", dir.display());
        }
        Ok(paths)
    }

    /// Builds the ingestion options; requires a non-empty allow-list.
    pub fn to_options(&self) -> Result<IngestOptions> {
        if self.destinations.is_empty() {
            anyhow::bail!("destination allow-list is empty");
        }
        let destinations = self
            .destinations
            .iter()
            .map(|d| parse_address(d))
            .collect::<Result<HashSet<_>>>()?;
        let max_sources = NonZeroUsize::new(self.max_sources)
            .ok_or_else(|| anyhow::anyhow!("max_sources must be greater than 0"))?;

        Ok(IngestOptions {
            protocol: Protocol::from(self.protocol),
            destinations,
            window: WindowConfig {
                memory_n: self.window_size,
                interpolation_n: self.interpolation_n,
                ngram_size: self.ngram_size,
            },
            split_by_port: self.split_by_port,
            max_sources,
        })
    }
}

/// Distance-matrix configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DistanceConfig {
    /// Subsample long trajectories before Hausdorff distances
    pub random_sampling: bool,
    /// Rows kept per source when subsampling
    pub sample_cap: usize,
    /// Rows a source needs to enter the dissimilarity matrix
    pub min_rows: usize,
    /// Rows a source needs to get a spectral signature
    pub min_spectrum_len: usize,
    /// Summary columns forming each trajectory point
    pub columns: Vec<SummaryColumn>,
    /// Subsampling seed
    pub seed: u64,
}

impl Default for DistanceConfig {
    fn default() -> Self {
        Self {
            random_sampling: true,
            sample_cap: DEFAULT_SAMPLE_CAP,
            min_rows: DEFAULT_MIN_ROWS,
            min_spectrum_len: DEFAULT_MIN_SPECTRUM_LEN,
            columns: SummaryColumn::all(),
            seed: 0,
        }
    }
}

impl DistanceConfig {
    pub fn to_options(&self) -> DistanceOptions {
        DistanceOptions {
            random_sampling: self.random_sampling,
            sample_cap: self.sample_cap,
            min_rows: self.min_rows,
            min_spectrum_len: self.min_spectrum_len,
            columns: self.columns.clone(),
            seed: self.seed,
        }
    }
}

/// Clustering configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ClusterConfig {
    pub method: ClusterMethod,
    pub linkage: Linkage,
    pub n_clusters: Option<usize>,
    pub distance_threshold: Option<f64>,
    pub bandwidth: Option<f64>,
    pub quantile: Option<f64>,
    /// k-means seed for spectral clustering
    pub seed: u64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            method: ClusterMethod::Agglomerative,
            linkage: Linkage::Average,
            n_clusters: Some(2),
            distance_threshold: None,
            bandwidth: None,
            quantile: None,
            seed: 0,
        }
    }
}

impl ClusterConfig {
    /// Builds the request. The default `n_clusters` is dropped where the
    /// method does not take it, and a `distance_threshold` replaces it for
    /// agglomerative clustering.
    pub fn to_request(&self) -> ClusterRequest {
        let n_clusters = match self.method {
            ClusterMethod::Agglomerative if self.distance_threshold.is_some() => None,
            ClusterMethod::MeanShift => None,
            _ => self.n_clusters,
        };
        ClusterRequest {
            method: self.method,
            linkage: self.linkage,
            n_clusters,
            distance_threshold: self.distance_threshold,
            bandwidth: self.bandwidth,
            quantile: self.quantile,
            seed: self.seed,
        }
    }
}

/// Output-related configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Output mode (labels, grouped, model)
    pub mode: OutputMode,
    /// Output format (text, json, jsonl)
    #[serde(with = "output_format_serde")]
    pub format: OutputFormat,
    /// Output file path (None = stdout)
    pub file: Option<PathBuf>,
}

/// Custom serde implementation for OutputFormat
mod output_format_serde {
    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S>(format: &OutputFormat, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format.to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<OutputFormat, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
