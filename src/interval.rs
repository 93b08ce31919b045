// interval.rs
//
// Foundational value types for genomic coordinates: half-open intervals on a
// named chromosome, and a `Genome` that maps (chromosome, position) pairs onto
// a single genome-wide axis.

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::CnClustError;

/// A half-open interval [start, end) on a named chromosome.
///
/// The canonical string form is `"chr:start-end"`, and
/// [`ChromosomeInterval::parse`] is the exact round-trip partner of
/// [`fmt::Display`].
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChromosomeInterval {
    pub chr: String,
    /// Start position (0-based, inclusive).
    pub start: u32,
    /// End position (0-based, exclusive).
    pub end: u32,
}

impl ChromosomeInterval {
    pub fn new(chr: impl Into<String>, start: u32, end: u32) -> Result<Self, CnClustError> {
        if end < start {
            return Err(CnClustError::InvalidInterval { start, end });
        }
        Ok(Self {
            chr: chr.into(),
            start,
            end,
        })
    }

    /// Parse a region string of the form `<chr><sep><start><sep><end>`, where
    /// each separator is any run of non-word characters (`:`, `-`, whitespace,
    /// commas). Accepts exactly three fields.
    pub fn parse(s: &str) -> Result<Self, CnClustError> {
        let is_word = |c: char| c.is_ascii_alphanumeric() || c == '_' || c == '.';
        let fields: Vec<&str> = s.split(|c| !is_word(c)).filter(|f| !f.is_empty()).collect();
        if fields.len() != 3 {
            return Err(CnClustError::InvalidRegion(s.to_string()));
        }
        let (chr, start, end) = (fields[0], fields[1], fields[2]);
        let start: u32 = start
            .parse()
            .map_err(|_| CnClustError::InvalidRegion(s.to_string()))?;
        let end: u32 = end
            .parse()
            .map_err(|_| CnClustError::InvalidRegion(s.to_string()))?;
        Self::new(chr, start, end)
    }

    /// True iff both intervals are on the same chromosome and their half-open
    /// ranges intersect. Touching endpoints do not overlap.
    pub fn has_overlap(&self, other: &ChromosomeInterval) -> bool {
        self.chr == other.chr && self.start < other.end && other.start < self.end
    }

    /// Midpoint of the interval (integer division).
    pub fn center(&self) -> u32 {
        self.start + (self.end - self.start) / 2
    }

    pub fn len(&self) -> u32 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Widen the interval so both ends land on a multiple of `multiple`:
    /// start is floored, end is ceiled.
    pub fn ends_rounded_to_multiple(&self, multiple: u32) -> Result<Self, CnClustError> {
        if multiple == 0 {
            return Err(CnClustError::InvalidMultiple(multiple));
        }
        Ok(Self {
            chr: self.chr.clone(),
            start: (self.start / multiple) * multiple,
            end: self.end.div_ceil(multiple) * multiple,
        })
    }
}

impl fmt::Display for ChromosomeInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}-{}", self.chr, self.start, self.end)
    }
}

/// An ordered set of named chromosomes with lengths, defining a single
/// genome-wide coordinate axis. Chromosome offsets are cumulative in
/// definition order.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Genome {
    chromosomes: IndexMap<String, ChromosomeSpan>,
    total_length: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct ChromosomeSpan {
    offset: u64,
    length: u64,
}

impl Genome {
    /// Build a genome from (name, length) pairs. Duplicate names are an error.
    pub fn new(
        chromosomes: impl IntoIterator<Item = (String, u64)>,
    ) -> Result<Self, CnClustError> {
        let mut map = IndexMap::new();
        let mut offset = 0u64;
        for (name, length) in chromosomes {
            if map
                .insert(name.clone(), ChromosomeSpan { offset, length })
                .is_some()
            {
                return Err(CnClustError::DuplicateChromosome(name));
            }
            offset += length;
        }
        Ok(Self {
            chromosomes: map,
            total_length: offset,
        })
    }

    /// The hg38 primary assembly (autosomes plus X and Y).
    pub fn hg38() -> Self {
        const HG38: &[(&str, u64)] = &[
            ("chr1", 248_956_422),
            ("chr2", 242_193_529),
            ("chr3", 198_295_559),
            ("chr4", 190_214_555),
            ("chr5", 181_538_259),
            ("chr6", 170_805_979),
            ("chr7", 159_345_973),
            ("chr8", 145_138_636),
            ("chr9", 138_394_717),
            ("chr10", 133_797_422),
            ("chr11", 135_086_622),
            ("chr12", 133_275_309),
            ("chr13", 114_364_328),
            ("chr14", 107_043_718),
            ("chr15", 101_991_189),
            ("chr16", 90_338_345),
            ("chr17", 83_257_441),
            ("chr18", 80_373_285),
            ("chr19", 58_617_616),
            ("chr20", 64_444_167),
            ("chr21", 46_709_983),
            ("chr22", 50_818_468),
            ("chrX", 156_040_895),
            ("chrY", 57_227_415),
        ];
        Self::new(HG38.iter().map(|(n, l)| (n.to_string(), *l)))
            .expect("hg38 chromosome names are unique")
    }

    pub fn total_length(&self) -> u64 {
        self.total_length
    }

    pub fn chromosome_names(&self) -> impl Iterator<Item = &str> {
        self.chromosomes.keys().map(|s| s.as_str())
    }

    pub fn chromosome_length(&self, chr: &str) -> Option<u64> {
        self.chromosomes.get(chr).map(|span| span.length)
    }

    /// Cumulative offset of a chromosome's first base on the genome-wide axis.
    pub fn chromosome_offset(&self, chr: &str) -> Option<u64> {
        self.chromosomes.get(chr).map(|span| span.offset)
    }

    /// Map a (chromosome, position) pair onto the genome-wide axis.
    pub fn position(&self, chr: &str, pos: u32) -> Result<u64, CnClustError> {
        self.chromosomes
            .get(chr)
            .map(|span| span.offset + pos as u64)
            .ok_or_else(|| CnClustError::UnknownChromosome(chr.to_string()))
    }
}
