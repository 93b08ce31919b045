// binindex.rs
//
// BinIndex is the read-only companion to DataWarehouse: one dataset grouped
// by sample and then chromosome, with each chromosome pre-aggregated through a
// BinMerger. Single-sample circular and linear viewers read from this; it has
// no mutation, history, or clustering support.

use indexmap::IndexMap;
use serde::Serialize;

use crate::interval::ChromosomeInterval;
use crate::merge::BinMerger;
use crate::records::GenomicBin;
use crate::sort_by_start;

/// An owned per-chromosome aggregate produced at index-build time. Unlike
/// `MergedGenomicBin` this does not borrow the source bins, so it can live as
/// long as the index.
#[derive(Clone, Debug, Serialize)]
pub struct MergedBinSummary {
    pub location: ChromosomeInterval,
    pub average_rd: f64,
    pub average_baf: f64,
    pub bin_count: usize,
}

#[derive(Debug, Default)]
struct ChromosomeView {
    bins: Vec<GenomicBin>,
    merged: Vec<MergedBinSummary>,
}

/// Read-only index over one dataset: sample -> chromosome -> (bins, merged
/// aggregates), plus the global RD range for axis scaling.
#[derive(Debug)]
pub struct BinIndex {
    samples: IndexMap<String, IndexMap<String, ChromosomeView>>,
    rd_range: (f64, f64),
}

impl BinIndex {
    /// Build the index, pre-aggregating each chromosome with `merger`. Bins
    /// are grouped in input order; within a chromosome they are sorted by
    /// start before merging.
    pub fn new(bins: Vec<GenomicBin>, merger: BinMerger) -> Self {
        let mut samples: IndexMap<String, IndexMap<String, ChromosomeView>> = IndexMap::new();
        let mut rd_min = f64::INFINITY;
        let mut rd_max = f64::NEG_INFINITY;

        for bin in bins {
            rd_min = rd_min.min(bin.rd);
            rd_max = rd_max.max(bin.rd);
            samples
                .entry(bin.sample.clone())
                .or_default()
                .entry(bin.chr.clone())
                .or_default()
                .bins
                .push(bin);
        }

        for chromosomes in samples.values_mut() {
            for view in chromosomes.values_mut() {
                sort_by_start(&mut view.bins);
                view.merged = merger
                    .merge(&view.bins)
                    .iter()
                    .map(|m| MergedBinSummary {
                        location: m.location.clone(),
                        average_rd: m.average_rd,
                        average_baf: m.average_baf,
                        bin_count: m.bins.len(),
                    })
                    .collect();
            }
        }

        let rd_range = if rd_min.is_finite() {
            (rd_min, rd_max)
        } else {
            (0.0, 0.0)
        };
        BinIndex { samples, rd_range }
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn sample_list(&self) -> Vec<&str> {
        self.samples.keys().map(|s| s.as_str()).collect()
    }

    pub fn chromosome_list(&self, sample: &str) -> Vec<&str> {
        self.samples
            .get(sample)
            .map(|chrs| chrs.keys().map(|c| c.as_str()).collect())
            .unwrap_or_default()
    }

    /// Records for one sample, optionally restricted to one chromosome.
    pub fn get_records(&self, sample: &str, chr: Option<&str>) -> Vec<&GenomicBin> {
        let Some(chromosomes) = self.samples.get(sample) else {
            return Vec::new();
        };
        match chr {
            Some(chr) => chromosomes
                .get(chr)
                .map(|view| view.bins.iter().collect())
                .unwrap_or_default(),
            None => chromosomes
                .values()
                .flat_map(|view| view.bins.iter())
                .collect(),
        }
    }

    /// Pre-merged aggregates for one sample, optionally one chromosome.
    pub fn get_merged_records(&self, sample: &str, chr: Option<&str>) -> Vec<&MergedBinSummary> {
        let Some(chromosomes) = self.samples.get(sample) else {
            return Vec::new();
        };
        match chr {
            Some(chr) => chromosomes
                .get(chr)
                .map(|view| view.merged.iter().collect())
                .unwrap_or_default(),
            None => chromosomes
                .values()
                .flat_map(|view| view.merged.iter())
                .collect(),
        }
    }

    /// Global (min, max) RD over every sample, for shared axis scaling.
    pub fn rd_range(&self) -> (f64, f64) {
        self.rd_range
    }
}
