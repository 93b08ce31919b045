// error.rs

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CnClustError {
    #[error("Invalid interval: end ({end}) must be greater than or equal to start ({start})")]
    InvalidInterval { start: u32, end: u32 },

    #[error("Invalid region string: {0:?}")]
    InvalidRegion(String),

    #[error("Invalid rounding multiple: {0} (must be positive)")]
    InvalidMultiple(u32),

    #[error("Duplicate chromosome name in genome definition: {0}")]
    DuplicateChromosome(String),

    #[error("Unknown chromosome: {0}")]
    UnknownChromosome(String),

    #[error("Unknown sample: {0}")]
    UnknownSample(String),

    #[error("Missing correspondence: location {location} has no bin for sample {sample}")]
    MissingCorrespondence { location: String, sample: String },

    #[error("Duplicate bin for sample {sample} at {location}")]
    DuplicateBin { location: String, sample: String },

    #[error("No centroid for cluster {cluster} in sample {sample}")]
    MissingCentroid { cluster: i32, sample: String },

    #[error("Invalid threshold: {0} (must be positive and finite)")]
    InvalidThreshold(f64),
}
