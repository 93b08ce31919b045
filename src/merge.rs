// merge.rs
//
// Greedy run-length aggregation of adjacent, similar bins. Used by the
// lightweight per-chromosome views to cut down point counts before plotting.

use serde::Serialize;

use crate::interval::ChromosomeInterval;
use crate::records::GenomicBin;

pub const DEFAULT_RD_THRESHOLD: f64 = 0.2;
pub const DEFAULT_BAF_THRESHOLD: f64 = 0.05;

/// Merges runs of adjacent bins whose RD and BAF stay close to the run's
/// first bin.
#[derive(Clone, Copy, Debug)]
pub struct BinMerger {
    pub rd_threshold: f64,
    pub baf_threshold: f64,
}

impl Default for BinMerger {
    fn default() -> Self {
        BinMerger {
            rd_threshold: DEFAULT_RD_THRESHOLD,
            baf_threshold: DEFAULT_BAF_THRESHOLD,
        }
    }
}

/// One merged run: the spanning interval, the run's mean RD/BAF, and the
/// source bins it represents. A derived view only; it borrows the input and
/// does not outlive the merge call.
#[derive(Clone, Debug, Serialize)]
pub struct MergedGenomicBin<'a> {
    pub location: ChromosomeInterval,
    pub average_rd: f64,
    pub average_baf: f64,
    pub bins: &'a [GenomicBin],
}

impl BinMerger {
    pub fn new(rd_threshold: f64, baf_threshold: f64) -> Self {
        BinMerger {
            rd_threshold,
            baf_threshold,
        }
    }

    /// Greedy run merge over bins already sorted by genomic start.
    ///
    /// A run is anchored at its first bin: the next bin joins while it is on
    /// the same chromosome and within the RD/BAF thresholds *of the anchor*,
    /// not of the previous bin. Runs never cross chromosome boundaries.
    pub fn merge<'a>(&self, bins: &'a [GenomicBin]) -> Vec<MergedGenomicBin<'a>> {
        let mut merged = Vec::new();
        let mut run_start = 0;

        while run_start < bins.len() {
            let anchor = &bins[run_start];
            let mut run_end = run_start + 1;
            while run_end < bins.len() {
                let next = &bins[run_end];
                if next.chr != anchor.chr
                    || (next.rd - anchor.rd).abs() >= self.rd_threshold
                    || (next.baf - anchor.baf).abs() >= self.baf_threshold
                {
                    break;
                }
                run_end += 1;
            }

            let run = &bins[run_start..run_end];
            let n = run.len() as f64;
            merged.push(MergedGenomicBin {
                location: ChromosomeInterval {
                    chr: anchor.chr.clone(),
                    start: anchor.start,
                    end: run[run.len() - 1].end,
                },
                average_rd: run.iter().map(|b| b.rd).sum::<f64>() / n,
                average_baf: run.iter().map(|b| b.baf).sum::<f64>() / n,
                bins: run,
            });
            run_start = run_end;
        }

        merged
    }
}
