pub mod analytics;
pub mod binindex;
pub mod error;
pub mod interval;
pub mod merge;
pub mod records;
pub mod warehouse;

pub use analytics::{ClusterDistanceMatrix, HeatMapElem, Point, SilhouetteResult};
pub use binindex::BinIndex;
pub use error::CnClustError;
pub use interval::{ChromosomeInterval, Genome};
pub use merge::{BinMerger, MergedGenomicBin};
pub use records::{DisplayMode, GenomicBin, DELETED, UNCLUSTERED};
pub use warehouse::DataWarehouse;

#[cfg(test)]
pub(crate) mod test_utils;

/// Trait for types that have genomic coordinates
pub trait GenomicCoordinates {
    /// Get the start coordinate (0-based, inclusive)
    fn start(&self) -> u32;

    /// Get the end coordinate (0-based, exclusive)
    fn end(&self) -> u32;
}

/// Sort records in place by start coordinate.
pub fn sort_by_start<T: GenomicCoordinates>(records: &mut [T]) {
    records.sort_by_key(|r| r.start());
}
