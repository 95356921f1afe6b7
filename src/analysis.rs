//! Traffic shape analysis - the orchestration layer.
//!
//! Drives one [`RunningFeatures`] per source over a record stream, collects
//! the PCA summary rows of every source in steady state, and turns the
//! accumulated table into source × source distance matrices and clusters.
//!
//! # Pipeline
//!
//! ```text
//! record → protocol / destination filter → RunningFeatures::update
//!        → (N > memory_n + 2) summary row
//! summary table → Hausdorff or spectral distance matrix → clustering
//! ```
//!
//! Processing is strictly sequential: a source's window is fully updated
//! before the next record is read. The source map is an LRU cache; an evicted
//! source starts over on its next packet.

use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::net::Ipv4Addr;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::time::Instant;

use anyhow::Context;
use lru::LruCache;
use rand::seq::index;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info, trace, warn};

use crate::cluster::{self, ClusterMethod, ClusterOutcome, ClusterRequest};
use crate::distance::{path_graph_spectrum, DistanceMatrix};
use crate::error::{AnalysisError, RecordError, Result};
use crate::record::{PacketRecord, Protocol};
use crate::running::{feature_set_for, FeatureSet, RunningFeatures, StageTimings, WindowConfig};
use crate::summary::{SummaryColumn, SummaryRow, SummaryTable};

/// Rows a source needs before it takes part in the dissimilarity matrix.
pub const DEFAULT_MIN_ROWS: usize = 20;
/// Per-source row cap when subsampling trajectories.
pub const DEFAULT_SAMPLE_CAP: usize = 500;
/// Rows a source needs before it gets a spectral signature.
pub const DEFAULT_MIN_SPECTRUM_LEN: usize = 5;

/// How records are filtered and how sources are tracked.
#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub protocol: Protocol,
    pub destinations: HashSet<Ipv4Addr>,
    pub window: WindowConfig,
    /// Key sources as `ip_port` instead of `ip`.
    pub split_by_port: bool,
    pub max_sources: NonZeroUsize,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            protocol: Protocol::Udp,
            destinations: HashSet::new(),
            window: WindowConfig::default(),
            split_by_port: false,
            max_sources: NonZeroUsize::new(100_000).unwrap_or(NonZeroUsize::MIN),
        }
    }
}

/// Parameters of the distance-matrix builders.
#[derive(Debug, Clone, PartialEq)]
pub struct DistanceOptions {
    pub random_sampling: bool,
    pub sample_cap: usize,
    pub min_rows: usize,
    pub min_spectrum_len: usize,
    pub columns: Vec<SummaryColumn>,
    pub seed: u64,
}

impl Default for DistanceOptions {
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

/// Counters for one ingestion run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    pub records_read: u64,
    pub packets_accepted: u64,
    pub summary_rows: u64,
    pub sources_created: u64,
    pub sources_evicted: u64,
}

pub struct TrafficShapeAnalysis {
    options: IngestOptions,
    feature_set: &'static FeatureSet,
    sources: LruCache<String, RunningFeatures>,
    summary: SummaryTable,
    /// Cached matrices, each with the options it was built from.
    dissimilarity: Option<(DistanceOptions, DistanceMatrix)>,
    spectral_distance: Option<(DistanceOptions, DistanceMatrix)>,
    clustering: Option<ClusterOutcome>,
    stats: IngestStats,
    /// Stage timings of evicted sources.
    retired_timings: StageTimings,
}

impl TrafficShapeAnalysis {
    pub fn new(options: IngestOptions) -> std::result::Result<Self, AnalysisError> {
        let feature_set = feature_set_for(options.protocol).ok_or_else(|| {
            AnalysisError::InvalidParameters(format!(
                "no feature set for protocol {}",
                options.protocol
            ))
        })?;
        if options.window.memory_n == 0 {
            return Err(AnalysisError::InvalidParameters(
                "window size must be greater than 0".to_string(),
            ));
        }

        Ok(Self {
            sources: LruCache::new(options.max_sources),
            options,
            feature_set,
            summary: SummaryTable::new(),
            dissimilarity: None,
            spectral_distance: None,
            clustering: None,
            stats: IngestStats::default(),
            retired_timings: StageTimings::default(),
        })
    }

    /// Wraps a previously exported summary table for clustering.
    pub fn from_summary(summary: SummaryTable) -> Self {
        let options = IngestOptions::default();
        Self {
            sources: LruCache::new(options.max_sources),
            feature_set: &crate::running::FEATURE_SETS[0],
            options,
            summary,
            dissimilarity: None,
            spectral_distance: None,
            clustering: None,
            stats: IngestStats::default(),
            retired_timings: StageTimings::default(),
        }
    }

    fn accepts(&self, record: &PacketRecord) -> bool {
        record.protocol == self.options.protocol
            && self.options.destinations.contains(&record.dst_addr)
    }

    /// Routes one record to its source. Returns whether it was accepted.
    pub fn ingest_record(&mut self, record: &PacketRecord) -> std::result::Result<bool, AnalysisError> {
        self.stats.records_read += 1;
        if !self.accepts(record) {
            return Ok(false);
        }

        let source_id = record.source_id(self.options.split_by_port);
        // Taken out of the cache for the update and pushed back as most recent.
        let mut running = match self.sources.pop(&source_id) {
            Some(running) => running,
            None => {
                trace!("New source: {}", source_id);
                self.stats.sources_created += 1;
                RunningFeatures::for_feature_set(self.feature_set, self.options.window)
            }
        };
        running.update(record)?;

        if running.n() > running.memory_n_threshold() as u64 + 2 {
            if let Some(summary) = running.summary() {
                let row = SummaryRow::from_summary(source_id.clone(), record.timestamp, summary);
                self.summary.push(row);
                self.stats.summary_rows += 1;
                self.invalidate_derived();
            }
        }

        if let Some((evicted_id, evicted)) = self.sources.push(source_id, running) {
            warn!(
                "Source cache full ({} sources), evicting {} after {} packets",
                self.options.max_sources,
                evicted_id,
                evicted.n()
            );
            self.retired_timings += evicted.timings();
            self.stats.sources_evicted += 1;
        }

        self.stats.packets_accepted += 1;
        if self.stats.packets_accepted % 1000 == 0 {
            debug!(
                "{} packets accepted, {} sources tracked, {} summary rows",
                self.stats.packets_accepted,
                self.sources.len(),
                self.summary.len()
            );
        }
        Ok(true)
    }

    /// Ingests every line of `reader`. Blank lines are skipped; the first
    /// malformed record aborts the run.
    pub fn ingest_reader<R: BufRead>(&mut self, reader: R, origin: &str) -> Result<u64> {
        let mut accepted = 0;
        for (idx, line) in reader.lines().enumerate() {
            let line = line.map_err(|source| RecordError::Io {
                origin: origin.to_string(),
                source,
            })?;
            if line.trim().is_empty() {
                continue;
            }
            let record = PacketRecord::parse(&line, origin, idx + 1)?;
            if self.ingest_record(&record)? {
                accepted += 1;
            }
        }
        Ok(accepted)
    }

    /// Ingests every file in order and logs the run totals.
    pub fn ingest_files(&mut self, paths: &[PathBuf]) -> Result<IngestStats> {
        let started = Instant::now();
        for path in paths {
            let file = File::open(path)
                .with_context(|| format!("Failed to open input file: {}", path.display()))?;
            let origin = path.display().to_string();
            let accepted = self
                .ingest_reader(BufReader::new(file), &origin)
                .with_context(|| format!("Ingestion aborted in {}", origin))?;
            info!("{}: {} packets accepted", origin, accepted);
        }

        let timings = self.timings();
        info!(
            "Ingested {} records ({} accepted) from {} files in {:?}: {} sources, {} summary rows",
            self.stats.records_read,
            self.stats.packets_accepted,
            paths.len(),
            started.elapsed(),
            self.stats.sources_created,
            self.stats.summary_rows
        );
        info!(
            "Stage timings: features {:?}, interpolation {:?}, PCA {:?}",
            timings.features, timings.interpolation, timings.pca
        );
        Ok(self.stats)
    }

    fn invalidate_derived(&mut self) {
        self.dissimilarity = None;
        self.spectral_distance = None;
        self.clustering = None;
    }

    /// Pairwise Hausdorff distances between source trajectories.
    pub fn gen_dissimilarity_matrix(
        &mut self,
        options: &DistanceOptions,
    ) -> std::result::Result<&DistanceMatrix, AnalysisError> {
        let matrix = self.build_dissimilarity_matrix(options)?;
        self.clustering = None;
        let (_, matrix) = self.dissimilarity.insert((options.clone(), matrix));
        Ok(matrix)
    }

    fn build_dissimilarity_matrix(
        &self,
        options: &DistanceOptions,
    ) -> std::result::Result<DistanceMatrix, AnalysisError> {
        let started = Instant::now();
        let sources: Vec<String> = self
            .summary
            .sources_with_min_rows(options.min_rows)
            .into_iter()
            .map(str::to_string)
            .collect();
        if sources.len() < 2 {
            return Err(AnalysisError::InsufficientData {
                context: "dissimilarity matrix (sources with enough summary rows)",
                required: 2,
                actual: sources.len(),
            });
        }

        let mut rng = ChaCha8Rng::seed_from_u64(options.seed);
        let mut trajectories = Vec::with_capacity(sources.len());
        for source in &sources {
            let points = self.summary.trajectory(source, &options.columns);
            let points = if options.random_sampling && points.len() > options.sample_cap {
                let picked = index::sample(&mut rng, points.len(), options.sample_cap).into_vec();
                points.select(&picked)
            } else {
                points
            };
            trajectories.push(points);
        }

        let matrix = DistanceMatrix::hausdorff(sources, &trajectories)?;
        debug!(
            "Dissimilarity matrix: {} sources in {:?}",
            matrix.len(),
            started.elapsed()
        );
        Ok(matrix)
    }

    /// Pairwise Euclidean distances between path-graph spectral signatures.
    pub fn gen_spectral_distance_matrix(
        &mut self,
        options: &DistanceOptions,
    ) -> std::result::Result<&DistanceMatrix, AnalysisError> {
        let matrix = self.build_spectral_distance_matrix(options)?;
        self.clustering = None;
        let (_, matrix) = self.spectral_distance.insert((options.clone(), matrix));
        Ok(matrix)
    }

    fn build_spectral_distance_matrix(
        &self,
        options: &DistanceOptions,
    ) -> std::result::Result<DistanceMatrix, AnalysisError> {
        let started = Instant::now();
        let sources: Vec<String> = self
            .summary
            .sources_with_min_rows(options.min_spectrum_len.max(1))
            .into_iter()
            .map(str::to_string)
            .collect();
        if sources.len() < 2 {
            return Err(AnalysisError::InsufficientData {
                context: "spectral distance matrix (sources with enough summary rows)",
                required: 2,
                actual: sources.len(),
            });
        }

        let spectrum_len = sources
            .iter()
            .map(|s| self.summary.row_count(s))
            .min()
            .unwrap_or(0);
        let mut spectra = Vec::with_capacity(sources.len());
        for source in &sources {
            let points = self.summary.trajectory(source, &options.columns);
            spectra.push(path_graph_spectrum(&points, spectrum_len)?);
        }

        let matrix = DistanceMatrix::euclidean(sources, &spectra)?;
        debug!(
            "Spectral distance matrix: {} sources, signature length {}, in {:?}",
            matrix.len(),
            spectrum_len,
            started.elapsed()
        );
        Ok(matrix)
    }

    /// Clusters sources, building the matrix the method needs unless one
    /// built from the same `options` is cached.
    pub fn cluster(
        &mut self,
        request: &ClusterRequest,
        options: &DistanceOptions,
    ) -> std::result::Result<&ClusterOutcome, AnalysisError> {
        request.validate(None)?;

        let use_spectral = request.method == ClusterMethod::Spectral;
        let cached = if use_spectral {
            self.spectral_distance.take()
        } else {
            self.dissimilarity.take()
        };
        let matrix = match cached {
            Some((built_with, matrix)) if built_with == *options => matrix,
            _ if use_spectral => self.build_spectral_distance_matrix(options)?,
            _ => self.build_dissimilarity_matrix(options)?,
        };

        let started = Instant::now();
        let result = cluster::run(request, &matrix);
        let slot = if use_spectral {
            &mut self.spectral_distance
        } else {
            &mut self.dissimilarity
        };
        *slot = Some((options.clone(), matrix));
        let outcome = result?;
        info!(
            "{} clustering: {} sources in {} clusters ({:?})",
            request.method,
            outcome.sources.len(),
            outcome.n_clusters(),
            started.elapsed()
        );
        match (outcome.quality.silhouette, outcome.quality.davies_bouldin) {
            (Some(s), Some(db)) => info!("Silhouette Coefficient: {:.4}, Davies-Bouldin Index: {:.4}", s, db),
            _ => info!(
                "Cluster quality: {}",
                outcome.quality.note.as_deref().unwrap_or("partially unavailable")
            ),
        }
        Ok(self.clustering.insert(outcome))
    }

    pub fn summary(&self) -> &SummaryTable {
        &self.summary
    }

    pub fn dissimilarity_matrix(&self) -> Option<&DistanceMatrix> {
        self.dissimilarity.as_ref().map(|(_, matrix)| matrix)
    }

    pub fn spectral_distance_matrix(&self) -> Option<&DistanceMatrix> {
        self.spectral_distance.as_ref().map(|(_, matrix)| matrix)
    }

    pub fn clustering(&self) -> Option<&ClusterOutcome> {
        self.clustering.as_ref()
    }

    pub fn source(&self, source_id: &str) -> Option<&RunningFeatures> {
        self.sources.peek(source_id)
    }

    pub fn tracked_sources(&self) -> usize {
        self.sources.len()
    }

    pub fn stats(&self) -> IngestStats {
        self.stats
    }

    /// Stage timings summed over every source seen, evicted ones included.
    pub fn timings(&self) -> StageTimings {
        let mut total = self.retired_timings;
        for (_, running) in self.sources.iter() {
            total += running.timings();
        }
        total
    }
}
