// records.rs
//
// The GenomicBin record type and its derived, display-oriented views.

use serde::{Deserialize, Serialize};

use crate::interval::{ChromosomeInterval, Genome};
use crate::GenomicCoordinates;

/// Cluster id for bins that have not been assigned to any cluster.
pub const UNCLUSTERED: i32 = -1;
/// Cluster id for tombstoned bins: kept in the correspondence index but
/// dropped from every externally visible record set.
pub const DELETED: i32 = -2;

/// One genomic interval in one sample, with its sequencing-derived
/// measurements and current cluster assignment.
///
/// Bins come in cross-sample groups: for a fixed interval there is exactly one
/// bin per sample, and cluster assignment is shared across the whole group.
/// The `cluster` field is the only part of a bin that mutates after load.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GenomicBin {
    #[serde(rename = "#CHR")]
    pub chr: String,
    #[serde(rename = "START")]
    pub start: u32,
    #[serde(rename = "END")]
    pub end: u32,
    #[serde(rename = "SAMPLE")]
    pub sample: String,
    /// Read-depth ratio (tumor/normal).
    #[serde(rename = "RD")]
    pub rd: f64,
    #[serde(rename = "#SNPS", default)]
    pub nsnps: u32,
    #[serde(rename = "COV", default)]
    pub cov: f64,
    #[serde(rename = "ALPHA", default)]
    pub alpha: u32,
    #[serde(rename = "BETA", default)]
    pub beta: u32,
    /// B-allele frequency.
    #[serde(rename = "BAF")]
    pub baf: f64,
    #[serde(rename = "CLUSTER")]
    pub cluster: i32,
}

impl GenomicCoordinates for GenomicBin {
    fn start(&self) -> u32 {
        self.start
    }

    fn end(&self) -> u32 {
        self.end
    }
}

impl GenomicBin {
    /// The bin's interval as a value type. Its string form is the key used by
    /// the cross-sample correspondence index.
    pub fn location(&self) -> ChromosomeInterval {
        ChromosomeInterval {
            chr: self.chr.clone(),
            start: self.start,
            end: self.end,
        }
    }

    /// The correspondence-index key for this bin (`"chr:start-end"`).
    pub fn location_key(&self) -> String {
        format!("{}:{}-{}", self.chr, self.start, self.end)
    }

    /// log2 of the read-depth ratio.
    pub fn log_rd(&self) -> f64 {
        self.rd.log2()
    }

    /// Mirrored BAF (`0.5 - BAF`), the x-axis of every cluster scatterplot.
    pub fn reverse_baf(&self) -> f64 {
        0.5 - self.baf
    }

    /// Genome-wide coordinate of this bin's start.
    pub fn genomic_position(&self, genome: &Genome) -> Option<u64> {
        genome.position(&self.chr, self.start).ok()
    }

    /// Purity/ploidy-scaled fractional copy number. Inverts the mixture model
    /// RD = (purity*cn + 2(1-purity)) / (purity*ploidy + 2(1-purity)).
    pub fn fractional_cn(&self, purity: f64, ploidy: f64) -> f64 {
        let normal = 2.0 * (1.0 - purity);
        (self.rd * (purity * ploidy + normal) - normal) / purity
    }

    /// Nearest discrete copy-number state, clamped at 0.
    pub fn cn_state(&self, purity: f64, ploidy: f64) -> u32 {
        self.fractional_cn(purity, ploidy).round().max(0.0) as u32
    }

    pub fn is_deleted(&self) -> bool {
        self.cluster == DELETED
    }

    pub fn is_unclustered(&self) -> bool {
        self.cluster == UNCLUSTERED
    }
}

/// Which measurement drives the y-axis of centroid space: raw RD, log2 RD, or
/// fractional copy number. Heuristic distances and centroids all follow the
/// active mode.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DisplayMode {
    #[default]
    Rd,
    LogRd,
    FractionalCn,
}

impl DisplayMode {
    /// The y-value of a bin under this mode.
    pub fn y_value(&self, bin: &GenomicBin, purity: f64, ploidy: f64) -> f64 {
        match self {
            DisplayMode::Rd => bin.rd,
            DisplayMode::LogRd => bin.log_rd(),
            DisplayMode::FractionalCn => bin.fractional_cn(purity, ploidy),
        }
    }
}
