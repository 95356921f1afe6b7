//! ibr-shape: host characterization for Internet background radiation.
//!
//! Reads packet records, builds per-source PCA signatures, and clusters
//! sources by the shape of their signature trajectories.
//!
//! - **ingest**: record files → summary table (CSV), optionally clustered
//! - **cluster**: summary table → distance matrix → labels / groups / model
//! - **generate-config**: print a default TOML configuration

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use ibr_shape::cluster::{ClusterMethod, Linkage};
use ibr_shape::config::Config;
use ibr_shape::export::{export_clustering, OutputFormat, OutputMode};
use ibr_shape::record::Protocol;
use ibr_shape::summary::{SummaryColumn, SummaryTable};
use ibr_shape::TrafficShapeAnalysis;

/// ibr-shape: cluster background-radiation sources by behavior.
#[derive(Parser, Debug)]
#[command(name = "ibr-shape")]
#[command(version = "0.1.0")]
#[command(about = "Characterize and cluster IBR sources via windowed PCA signatures")]
#[command(long_about = None)]
struct Cli {
    /// TOML configuration file; command-line flags override it.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging (writes to stderr).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Build the per-source summary table from packet record files.
    Ingest {
        /// Record files, read in order (default: every .csv in --input-dir).
        files: Vec<PathBuf>,

        /// Directory of record files.
        #[arg(short, long)]
        input_dir: Option<PathBuf>,

        /// Summary table output path.
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Destination allow-list entry (repeatable).
        #[arg(short, long = "dst")]
        destinations: Vec<String>,

        /// Protocol of interest: udp, tcp, icmp or a protocol number.
        #[arg(short, long)]
        protocol: Option<Protocol>,

        /// Packets kept per source window.
        #[arg(short, long)]
        window_size: Option<usize>,

        /// Uniform time points per PCA recompute.
        #[arg(long)]
        interpolation_n: Option<usize>,

        /// Track sources per ip_port instead of per ip.
        #[arg(long)]
        split_by_port: bool,

        /// Maximum tracked sources.
        #[arg(long)]
        max_sources: Option<usize>,

        /// Cluster the table once ingestion finishes.
        #[arg(long)]
        cluster: bool,

        #[command(flatten)]
        clustering: ClusterArgs,
    },

    /// Cluster sources of a previously written summary table.
    Cluster {
        /// Summary table to load.
        summary: PathBuf,

        #[command(flatten)]
        clustering: ClusterArgs,
    },

    /// Print a default configuration file.
    GenerateConfig,
}

#[derive(Args, Debug, Default)]
struct ClusterArgs {
    /// Clustering method: agglomerative, meanshift, spectral.
    #[arg(short, long)]
    method: Option<ClusterMethod>,

    /// Agglomerative linkage: single, average, complete.
    #[arg(long)]
    linkage: Option<Linkage>,

    /// Number of clusters.
    #[arg(short = 'k', long)]
    n_clusters: Option<usize>,

    /// Agglomerative merge-distance threshold (replaces --n-clusters).
    #[arg(long)]
    distance_threshold: Option<f64>,

    /// Mean shift bandwidth.
    #[arg(long)]
    bandwidth: Option<f64>,

    /// Mean shift bandwidth-estimation quantile (replaces --bandwidth).
    #[arg(long)]
    quantile: Option<f64>,

    /// Seed for subsampling and k-means initialization.
    #[arg(long)]
    seed: Option<u64>,

    /// Use every summary row instead of subsampling long trajectories.
    #[arg(long)]
    no_sampling: bool,

    /// Comma-separated summary columns (e.g. val0,val1,delta0).
    #[arg(long, value_delimiter = ',')]
    columns: Vec<SummaryColumn>,

    /// Output mode: labels, grouped, model.
    #[arg(long)]
    mode: Option<OutputMode>,

    /// Output format: text, json, jsonl.
    #[arg(short, long)]
    format: Option<OutputFormat>,

    /// Clustering output file (default: stdout).
    #[arg(long)]
    report: Option<PathBuf>,
}

impl ClusterArgs {
    fn apply(self, config: &mut Config) {
        let cluster = &mut config.cluster;
        if let Some(method) = self.method {
            cluster.method = method;
        }
        if let Some(linkage) = self.linkage {
            cluster.linkage = linkage;
        }
        // A stop rule given on the command line replaces the configured one.
        if self.n_clusters.is_some() || self.distance_threshold.is_some() {
            cluster.n_clusters = self.n_clusters;
            cluster.distance_threshold = self.distance_threshold;
        }
        if self.bandwidth.is_some() || self.quantile.is_some() {
            cluster.bandwidth = self.bandwidth;
            cluster.quantile = self.quantile;
        }
        if let Some(seed) = self.seed {
            cluster.seed = seed;
            config.distance.seed = seed;
        }
        if self.no_sampling {
            config.distance.random_sampling = false;
        }
        if !self.columns.is_empty() {
            config.distance.columns = self.columns;
        }
        if let Some(mode) = self.mode {
            config.output.mode = mode;
        }
        if let Some(format) = self.format {
            config.output.format = format;
        }
        if let Some(report) = self.report {
            config.output.file = Some(report);
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    let mut config = Config::load_or_default(cli.config.as_deref())?;

    match cli.command {
        Commands::Ingest {
            files,
            input_dir,
            output,
            destinations,
            protocol,
            window_size,
            interpolation_n,
            split_by_port,
            max_sources,
            cluster,
            clustering,
        } => {
            let ingest = &mut config.ingest;
            if !files.is_empty() {
                ingest.input_files = files;
            }
            if input_dir.is_some() {
                ingest.input_dir = input_dir;
            }
            if output.is_some() {
                ingest.output_file = output;
            }
            if !destinations.is_empty() {
                ingest.destinations = destinations;
            }
            if let Some(protocol) = protocol {
                ingest.protocol = protocol.number();
            }
            if let Some(window_size) = window_size {
                ingest.window_size = window_size;
            }
            if let Some(interpolation_n) = interpolation_n {
                ingest.interpolation_n = interpolation_n;
            }
            if split_by_port {
                ingest.split_by_port = true;
            }
            if let Some(max_sources) = max_sources {
                ingest.max_sources = max_sources;
            }
            clustering.apply(&mut config);
            config.validate()?;
            run_ingest(&config, cluster)
        }

        Commands::Cluster {
            summary,
            clustering,
        } => {
            clustering.apply(&mut config);
            config.validate()?;
            run_cluster(&config, &summary)
        }

        Commands::GenerateConfig => {
            print!("{}", Config::generate_default());
            Ok(())
        }
    }
}

fn run_ingest(config: &Config, then_cluster: bool) -> Result<()> {
    let options = config.ingest.to_options()?;
    let paths = config.ingest.input_paths()?;
    info!(
        "Ingesting {} files ({} packets, {} destinations)",
        paths.len(),
        options.protocol,
        options.destinations.len()
    );

    let mut analysis = TrafficShapeAnalysis::new(options)?;
    analysis.ingest_files(&paths)?;

    match &config.ingest.output_file {
        Some(path) => {
            analysis.summary().save(path)?;
            info!(
                "Wrote {} summary rows for {} sources to {}",
                analysis.summary().len(),
                analysis.summary().sources().len(),
                path.display()
            );
        }
        None if !then_cluster => analysis.summary().write_csv(std::io::stdout().lock())?,
        None => {}
    }

    if then_cluster {
        cluster_and_report(config, &mut analysis)?;
    }
    Ok(())
}

fn run_cluster(config: &Config, summary: &Path) -> Result<()> {
    let table = SummaryTable::load(summary)?;
    info!(
        "Loaded {} summary rows for {} sources from {}",
        table.len(),
        table.sources().len(),
        summary.display()
    );
    let mut analysis = TrafficShapeAnalysis::from_summary(table);
    cluster_and_report(config, &mut analysis)
}

fn cluster_and_report(config: &Config, analysis: &mut TrafficShapeAnalysis) -> Result<()> {
    let request = config.cluster.to_request();
    let options = config.distance.to_options();
    let outcome = analysis.cluster(&request, &options)?;

    let rendered = export_clustering(
        outcome,
        config.output.mode,
        config.output.format,
        chrono::Utc::now(),
    );
    match &config.output.file {
        Some(path) => {
            std::fs::write(path, rendered + "\n")
                .with_context(|| format!("Failed to write report: {}", path.display()))?;
            info!("Clustering report written to {}", path.display());
        }
        None => println!("{}", rendered),
    }
    Ok(())
}
