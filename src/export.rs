//! Export Module
//!
//! Renders clustering results as a label table, a cluster → sources mapping,
//! or a description of the fitted model, in text, JSON or JSON Lines.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cluster::{ClusterOutcome, FittedModel, QualityReport};

/// What part of a clustering result to emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputMode {
    /// `source,label` rows
    #[default]
    Labels,
    /// label → member sources
    Grouped,
    /// the fitted clustering
    Model,
}

impl std::str::FromStr for OutputMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "labels" | "table" => Ok(Self::Labels),
            "grouped" | "dict" => Ok(Self::Grouped),
            "model" => Ok(Self::Model),
            _ => Err(format!("Unknown output mode: {}", s)),
        }
    }
}

impl std::fmt::Display for OutputMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Labels => write!(f, "labels"),
            Self::Grouped => write!(f, "grouped"),
            Self::Model => write!(f, "model"),
        }
    }
}

/// Output format for exports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
    JsonLines, // One JSON object per line (JSONL)
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            "jsonl" | "jsonlines" => Ok(Self::JsonLines),
            _ => Err(format!("Unknown output format: {}", s)),
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Json => write!(f, "json"),
            Self::JsonLines => write!(f, "jsonl"),
        }
    }
}

/// JSON-serializable source assignment
#[derive(Serialize)]
pub struct JsonLabel<'a> {
    pub source: &'a str,
    pub label: usize,
}

/// JSON-serializable clustering report
#[derive(Serialize)]
pub struct JsonClusterReport<'a> {
    pub version: &'static str,
    pub timestamp: String,
    pub method: String,
    pub n_sources: usize,
    pub n_clusters: usize,
    pub quality: &'a QualityReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<Vec<JsonLabel<'a>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clusters: Option<BTreeMap<usize, Vec<String>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<&'a FittedModel>,
}

impl<'a> JsonClusterReport<'a> {
    pub fn new(outcome: &'a ClusterOutcome, mode: OutputMode, timestamp: DateTime<Utc>) -> Self {
        Self {
            version: "1.0",
            timestamp: timestamp.to_rfc3339(),
            method: outcome.model.method().to_string(),
            n_sources: outcome.sources.len(),
            n_clusters: outcome.n_clusters(),
            quality: &outcome.quality,
            labels: (mode == OutputMode::Labels).then(|| json_labels(outcome)),
            clusters: (mode == OutputMode::Grouped).then(|| outcome.grouped()),
            model: (mode == OutputMode::Model).then_some(&outcome.model),
        }
    }
}

fn json_labels(outcome: &ClusterOutcome) -> Vec<JsonLabel<'_>> {
    outcome
        .label_table()
        .into_iter()
        .map(|(source, label)| JsonLabel { source, label })
        .collect()
}

/// Exports a clustering result in the specified mode and format
pub fn export_clustering(
    outcome: &ClusterOutcome,
    mode: OutputMode,
    format: OutputFormat,
    timestamp: DateTime<Utc>,
) -> String {
    match format {
        OutputFormat::Text => export_text(outcome, mode),
        OutputFormat::Json => export_json(outcome, mode, timestamp),
        OutputFormat::JsonLines => export_jsonl(outcome, mode, timestamp),
    }
}

/// Exports as pretty-printed JSON
pub fn export_json(outcome: &ClusterOutcome, mode: OutputMode, timestamp: DateTime<Utc>) -> String {
    let report = JsonClusterReport::new(outcome, mode, timestamp);
    serde_json::to_string_pretty(&report).unwrap_or_else(|e| format!("{{\"error\": \"{}\"}}", e))
}

/// Exports as JSON Lines: a summary line, then one line per source, per
/// cluster or for the model.
pub fn export_jsonl(outcome: &ClusterOutcome, mode: OutputMode, timestamp: DateTime<Utc>) -> String {
    let mut lines = Vec::new();

    let summary = serde_json::json!({
        "type": "summary",
        "timestamp": timestamp.to_rfc3339(),
        "method": outcome.model.method().to_string(),
        "n_sources": outcome.sources.len(),
        "n_clusters": outcome.n_clusters(),
        "quality": &outcome.quality,
    });
    lines.push(serde_json::to_string(&summary).unwrap_or_default());

    match mode {
        OutputMode::Labels => {
            for label in json_labels(outcome) {
                if let Ok(line) = serde_json::to_string(&label) {
                    lines.push(line);
                }
            }
        }
        OutputMode::Grouped => {
            for (label, sources) in outcome.grouped() {
                let line = serde_json::json!({ "label": label, "sources": sources });
                lines.push(line.to_string());
            }
        }
        OutputMode::Model => {
            if let Ok(line) = serde_json::to_string(&outcome.model) {
                lines.push(line);
            }
        }
    }

    lines.join("\n")
}

/// Exports as formatted text
pub fn export_text(outcome: &ClusterOutcome, mode: OutputMode) -> String {
    let mut output = String::new();

    match mode {
        OutputMode::Labels => {
            output.push_str("source,label\n");
            for (source, label) in outcome.label_table() {
                output.push_str(&format!("{},{}\n", source, label));
            }
            return output;
        }
        OutputMode::Grouped => {
            output.push_str(&format!(
                "--- Clusters ({} sources, {} clusters) ---\n",
                outcome.sources.len(),
                outcome.n_clusters()
            ));
            for (label, sources) in outcome.grouped() {
                output.push_str(&format!(
                    "[{}] ({}) {}\n",
                    label,
                    sources.len(),
                    sources.join(", ")
                ));
            }
        }
        OutputMode::Model => {
            output.push_str(&format!(
                "--- {} model ---\n",
                outcome.model.method()
            ));
            output.push_str(&format_model(&outcome.model));
        }
    }

    output.push_str(&format_quality(&outcome.quality));
    output
}

fn format_model(model: &FittedModel) -> String {
    match model {
        FittedModel::Agglomerative(fit) => {
            let mut out = format!(
                "Linkage: {}\nClusters: {}\nMerges: {}\n",
                fit.linkage,
                fit.n_clusters,
                fit.merges.len()
            );
            for (step, merge) in fit.merges.iter().enumerate() {
                out.push_str(&format!(
                    "  {:>4}: {} + {} at {:.6} (size {})\n",
                    step, merge.left, merge.right, merge.distance, merge.size
                ));
            }
            out
        }
        FittedModel::MeanShift(fit) => {
            let mut out = format!(
                "Bandwidth: {:.6}\nCenters: {}\n",
                fit.bandwidth,
                fit.centers.len()
            );
            for (idx, intensity) in fit.intensities.iter().enumerate() {
                out.push_str(&format!("  [{}] intensity {}\n", idx, intensity));
            }
            out
        }
        FittedModel::Spectral(fit) => format!(
            "Clusters: {}\nSeed: {}\nInertia: {:.6}\nEigenvalues: {}\n",
            fit.n_clusters,
            fit.seed,
            fit.inertia,
            fit.eigenvalues
                .iter()
                .map(|v| format!("{:.6}", v))
                .collect::<Vec<_>>()
                .join(", ")
        ),
    }
}

fn format_quality(quality: &QualityReport) -> String {
    let mut out = String::new();
    if let Some(s) = quality.silhouette {
        out.push_str(&format!("Silhouette Coefficient: {:.4}\n", s));
    }
    if let Some(db) = quality.davies_bouldin {
        out.push_str(&format!("Davies-Bouldin Index: {:.4}\n", db));
    }
    if let Some(note) = &quality.note {
        out.push_str(&format!("Note: {}\n", note));
    }
    out
}
