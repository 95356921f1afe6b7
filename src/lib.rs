//! ibr-shape: behavioral signatures for hosts seen in background-radiation
//! traffic.
//!
//! Each source's packets drive a window of streaming features; a PCA over
//! the window yields a compact signature per packet. Source trajectories are
//! compared with Hausdorff or spectral distances and clustered.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────────┐     ┌──────────────┐     ┌────────────┐
//! │   record    │────>│ RunningFeatures │────>│ SummaryTable │────>│  distance  │
//! │  (parser)   │     │ (window + PCA)  │     │ (rows / CSV) │     │ + cluster  │
//! └─────────────┘     └─────────────────┘     └──────────────┘     └────────────┘
//! ```

pub mod analysis;
pub mod cluster;
pub mod config;
pub mod distance;
pub mod error;
pub mod export;
pub mod features;
pub mod record;
pub mod running;
pub mod summary;

pub use analysis::{DistanceOptions, IngestOptions, IngestStats, TrafficShapeAnalysis};
pub use cluster::{ClusterMethod, ClusterOutcome, ClusterRequest, Linkage};
pub use config::Config;
pub use distance::{DistanceMatrix, PointSet};
pub use error::{AnalysisError, Result};
pub use record::{PacketRecord, Protocol};
pub use running::{PcaSummary, RunningFeatures, WindowConfig};
pub use summary::{SummaryColumn, SummaryRow, SummaryTable};
