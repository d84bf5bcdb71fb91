//! S3 layout of per-sample pipeline artifacts
//!
//! Artifact names are hardcoded contract with the pipeline; the
//! per-sample, per-pipeline-version prefixes are derived here.

use crate::core::output::OutputKind;
use regex::Regex;

pub const PIPELINE_VERSION_FILE: &str = "pipeline_version.txt";
pub const STATS_JSON_NAME: &str = "stats.json";
pub const INVALID_STEP_NAME: &str = "invalid_step_input.json";
pub const ERCC_OUTPUT_NAME: &str = "reads_per_gene.star.tab";
pub const BOWTIE2_ERCC_OUTPUT_NAME: &str = "bowtie2_ERCC_counts.tsv";
pub const KALLISTO_ERCC_OUTPUT_NAME: &str = "ERCC_counts.tsv";
pub const INSERT_SIZE_METRICS_OUTPUT_NAME: &str = "picard_insert_metrics.txt";
pub const REFINED_TAXON_COUNTS_JSON_NAME: &str = "refined_taxon_counts_with_dcr.json";
pub const REFINED_TAXID_BYTERANGE_JSON_NAME: &str = "refined_taxid_locations_combined.json";
pub const CONTIG_SUMMARY_JSON_NAME: &str = "combined_contig_summary.json";
pub const ASSEMBLED_STATS_NAME: &str = "contig_stats.json";
pub const COVERAGE_VIZ_SUMMARY_JSON_NAME: &str = "coverage_viz_summary.json";
pub const AMR_FULL_RESULTS_NAME: &str = "amr_processed_results.csv";
pub const SFN_ERROR_FILE: &str = "error.yml";

/// Extract the `major.minor` pipeline version from the raw contents of
/// `pipeline_version.txt`.
pub fn parse_pipeline_version(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let re = Regex::new(r"^(\d+\.\d+)").expect("version regex is valid");
    re.captures(trimmed)
        .map(|caps| caps.get(1).unwrap().as_str().to_string())
}

/// Compare two `major.minor` version strings numerically.
pub fn version_at_least(version: &str, other: &str) -> bool {
    let parse = |v: &str| -> Option<(u64, u64)> {
        let mut parts = v.splitn(2, '.');
        let major = parts.next()?.parse().ok()?;
        let minor = parts.next().unwrap_or("0").parse().ok()?;
        Some((major, minor))
    };
    match (parse(version), parse(other)) {
        (Some(a), Some(b)) => a >= b,
        _ => false,
    }
}

/// Pipeline versions from 8.0 use the merged host filtering stage, which
/// moved several host-filter artifacts and renamed the ERCC output.
pub fn uses_new_host_filtering_stage(version: &str) -> bool {
    version_at_least(version, "8.0")
}

/// Within the new host filtering stage, 8.1 switched ERCC counting from
/// kallisto to bowtie2.
pub fn uses_bowtie2_ercc_counts(version: &str) -> bool {
    version_at_least(version, "8.1")
}

/// Derives the S3 prefixes of a sample's pipeline outputs.
#[derive(Debug, Clone)]
pub struct SamplePaths {
    bucket: String,
    sample_id: i64,
    pipeline_version: Option<String>,
}

impl SamplePaths {
    pub fn new(bucket: &str, sample_id: i64, pipeline_version: Option<&str>) -> Self {
        Self {
            bucket: bucket.to_string(),
            sample_id,
            pipeline_version: pipeline_version.map(|v| v.to_string()),
        }
    }

    fn version(&self) -> &str {
        self.pipeline_version.as_deref().unwrap_or("1.0")
    }

    /// Unversioned per-sample results prefix.
    pub fn output_prefix(&self) -> String {
        format!("s3://{}/samples/{}/results", self.bucket, self.sample_id)
    }

    /// Per-sample, per-pipeline-version results prefix.
    pub fn versioned_output_prefix(&self) -> String {
        format!("{}/{}", self.output_prefix(), self.version())
    }

    pub fn host_filter_output_prefix(&self) -> String {
        if uses_new_host_filtering_stage(self.version()) {
            self.versioned_output_prefix()
        } else {
            format!("{}/host_filter", self.versioned_output_prefix())
        }
    }

    pub fn postprocess_output_prefix(&self) -> String {
        format!("{}/postprocess", self.versioned_output_prefix())
    }

    pub fn assembly_prefix(&self) -> String {
        format!("{}/assembly", self.postprocess_output_prefix())
    }

    pub fn pipeline_version_file(&self) -> String {
        format!("{}/{}", self.output_prefix(), PIPELINE_VERSION_FILE)
    }

    pub fn stats_json(&self) -> String {
        format!("{}/{}", self.versioned_output_prefix(), STATS_JSON_NAME)
    }

    pub fn invalid_step_input(&self) -> String {
        format!("{}/{}", self.versioned_output_prefix(), INVALID_STEP_NAME)
    }

    pub fn sfn_error_file(&self) -> String {
        format!("{}/{}", self.versioned_output_prefix(), SFN_ERROR_FILE)
    }

    /// ERCC output name depends on the host filtering implementation of
    /// the pipeline version.
    pub fn ercc_output_name(&self) -> &'static str {
        let version = self.version();
        if uses_new_host_filtering_stage(version) {
            if uses_bowtie2_ercc_counts(version) {
                BOWTIE2_ERCC_OUTPUT_NAME
            } else {
                KALLISTO_ERCC_OUTPUT_NAME
            }
        } else {
            ERCC_OUTPUT_NAME
        }
    }

    /// Insert size metrics as placed by the new host filtering stage,
    /// checked under the versioned prefix.
    pub fn versioned_insert_size_metrics(&self) -> String {
        format!(
            "{}/{}",
            self.versioned_output_prefix(),
            INSERT_SIZE_METRICS_OUTPUT_NAME
        )
    }

    /// Completion marker objects written by stage jobs.
    pub fn stage_succeeded_marker(&self, job_id: &str) -> String {
        format!("{}/{}.succeeded", self.versioned_output_prefix(), job_id)
    }

    pub fn stage_failed_marker(&self, job_id: &str) -> String {
        format!("{}/{}.failed", self.versioned_output_prefix(), job_id)
    }

    /// Full S3 path of the artifact backing one output. Assumes the
    /// pipeline version has been resolved for assembly outputs.
    pub fn s3_file_for(&self, output: OutputKind) -> String {
        match output {
            OutputKind::ErccCounts => format!(
                "{}/{}",
                self.host_filter_output_prefix(),
                self.ercc_output_name()
            ),
            OutputKind::TaxonCounts => format!(
                "{}/{}",
                self.assembly_prefix(),
                REFINED_TAXON_COUNTS_JSON_NAME
            ),
            OutputKind::TaxonByteranges => format!(
                "{}/{}",
                self.assembly_prefix(),
                REFINED_TAXID_BYTERANGE_JSON_NAME
            ),
            OutputKind::ContigCounts => {
                format!("{}/{}", self.assembly_prefix(), CONTIG_SUMMARY_JSON_NAME)
            }
            OutputKind::InsertSizeMetrics => format!(
                "{}/{}",
                self.host_filter_output_prefix(),
                INSERT_SIZE_METRICS_OUTPUT_NAME
            ),
            OutputKind::AccessionCoverageStats => format!(
                "{}/{}",
                self.postprocess_output_prefix(),
                COVERAGE_VIZ_SUMMARY_JSON_NAME
            ),
            OutputKind::AmrCounts => {
                format!("{}/{}", self.postprocess_output_prefix(), AMR_FULL_RESULTS_NAME)
            }
        }
    }
}
