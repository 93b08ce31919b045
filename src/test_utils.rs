// test_utils.rs

#[cfg(test)]
pub(crate) mod test_utils {
    use crate::records::{GenomicBin, UNCLUSTERED};

    pub fn make_bin(chr: &str, start: u32, end: u32, sample: &str) -> GenomicBin {
        GenomicBin {
            chr: chr.to_string(),
            start,
            end,
            sample: sample.to_string(),
            rd: 1.0,
            nsnps: 50,
            cov: 30.0,
            alpha: 25,
            beta: 25,
            baf: 0.5,
            cluster: UNCLUSTERED,
        }
    }

    pub fn make_clustered_bin(
        chr: &str,
        start: u32,
        end: u32,
        sample: &str,
        rd: f64,
        baf: f64,
        cluster: i32,
    ) -> GenomicBin {
        let mut bin = make_bin(chr, start, end, sample);
        bin.rd = rd;
        bin.baf = baf;
        bin.cluster = cluster;
        bin
    }

    /// A two-sample fixture with cross-sample correspondence: every location
    /// has exactly one bin per sample, and both samples share cluster labels.
    pub fn two_sample_bins() -> Vec<GenomicBin> {
        let mut bins = Vec::new();
        for sample in ["tumor1", "tumor2"] {
            // cluster 1: balanced diploid region
            bins.push(make_clustered_bin("chr1", 0, 50_000, sample, 1.0, 0.50, 1));
            bins.push(make_clustered_bin(
                "chr1", 50_000, 100_000, sample, 0.98, 0.49, 1,
            ));
            bins.push(make_clustered_bin(
                "chr1", 100_000, 150_000, sample, 1.02, 0.50, 1,
            ));
            // cluster 2: single-copy gain with allelic imbalance
            bins.push(make_clustered_bin("chr2", 0, 50_000, sample, 1.5, 0.33, 2));
            bins.push(make_clustered_bin(
                "chr2", 50_000, 100_000, sample, 1.48, 0.34, 2,
            ));
            // cluster 3: deletion
            bins.push(make_clustered_bin("chr3", 0, 50_000, sample, 0.5, 0.10, 3));
        }
        bins
    }
}
