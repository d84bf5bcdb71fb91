//! Output state tracking for the result monitor

use serde::{Deserialize, Serialize};

/// A named result artifact the server expects to load after pipeline
/// execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OutputKind {
    ErccCounts,
    TaxonCounts,
    ContigCounts,
    TaxonByteranges,
    InsertSizeMetrics,
    AccessionCoverageStats,
    /// Deprecated; kept so old rows still parse.
    AmrCounts,
}

impl OutputKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputKind::ErccCounts => "ercc_counts",
            OutputKind::TaxonCounts => "taxon_counts",
            OutputKind::ContigCounts => "contig_counts",
            OutputKind::TaxonByteranges => "taxon_byteranges",
            OutputKind::InsertSizeMetrics => "insert_size_metrics",
            OutputKind::AccessionCoverageStats => "accession_coverage_stats",
            OutputKind::AmrCounts => "amr_counts",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ercc_counts" => Some(OutputKind::ErccCounts),
            "taxon_counts" => Some(OutputKind::TaxonCounts),
            "contig_counts" => Some(OutputKind::ContigCounts),
            "taxon_byteranges" => Some(OutputKind::TaxonByteranges),
            "insert_size_metrics" => Some(OutputKind::InsertSizeMetrics),
            "accession_coverage_stats" => Some(OutputKind::AccessionCoverageStats),
            "amr_counts" => Some(OutputKind::AmrCounts),
            _ => None,
        }
    }
}

impl std::fmt::Display for OutputKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The output whose presence means the main report can be shown even if
/// later outputs failed to load.
pub const REPORT_READY_OUTPUT: OutputKind = OutputKind::TaxonCounts;

/// Load status of one output artifact.
///
/// The result monitor drives UNKNOWN -> LOADING_QUEUED; the loader
/// worker drives LOADING_QUEUED -> LOADING -> LOADED / LOADING_ERROR.
/// FAILED means the pipeline finished but the artifact never appeared.
/// LOADING_ERROR is retryable: the monitor re-checks it on the next tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoadState {
    Unknown,
    LoadingQueued,
    Loading,
    Loaded,
    LoadingError,
    Failed,
}

impl LoadState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoadState::Unknown => "UNKNOWN",
            LoadState::LoadingQueued => "LOADING_QUEUED",
            LoadState::Loading => "LOADING",
            LoadState::Loaded => "LOADED",
            LoadState::LoadingError => "LOADING_ERROR",
            LoadState::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "UNKNOWN" => Some(LoadState::Unknown),
            "LOADING_QUEUED" => Some(LoadState::LoadingQueued),
            "LOADING" => Some(LoadState::Loading),
            "LOADED" => Some(LoadState::Loaded),
            "LOADING_ERROR" => Some(LoadState::LoadingError),
            "FAILED" => Some(LoadState::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, LoadState::Loaded | LoadState::Failed)
    }
}

impl std::fmt::Display for LoadState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tracks the load status of one named output artifact of a pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputState {
    pub output: OutputKind,
    pub state: LoadState,

    /// Row count recorded by the loader, for quick display.
    pub rows_loaded: Option<usize>,
}

impl OutputState {
    pub fn new(output: OutputKind) -> Self {
        Self {
            output,
            state: LoadState::Unknown,
            rows_loaded: None,
        }
    }
}
