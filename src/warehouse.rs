// warehouse.rs
//
// DataWarehouse is the central indexed store behind the re-clustering UI: it
// owns the full bin list, the cross-sample correspondence arena, every derived
// index and statistic, the brushed selection, and the undo history. All
// mutation entry points run synchronously to completion; the only deferred
// computation is silhouette scoring, which is dirty-flagged and recomputed on
// demand with a generation-guarded write-back.

use indexmap::IndexMap;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::analytics::{
    centroid, check_threshold, silhouette_scores, ClusterDistanceMatrix, HeatMapElem, Point,
    SilhouetteResult,
};
use crate::error::CnClustError;
use crate::interval::Genome;
use crate::records::{DisplayMode, GenomicBin, UNCLUSTERED};

pub const DEFAULT_PURITY: f64 = 1.0;
pub const DEFAULT_PLOIDY: f64 = 2.0;

/// Highest copy-number state for which reference gridline ticks are emitted.
const MAX_TICK_CN: u32 = 8;

/// One row of the cluster table: a cluster and its share of all visible bins.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClusterTableRow {
    pub key: i32,
    /// Percentage of the total visible bin count.
    pub value: f64,
}

/// One row of the centroid table: a cluster and its centroid per sample,
/// rendered as `"(x, y)"` strings.
#[derive(Clone, Debug, Serialize)]
pub struct CentroidTableRow {
    pub key: i32,
    pub samples: IndexMap<String, String>,
}

/// Per-cluster composition of the current brushed selection.
#[derive(Clone, Debug, Serialize)]
pub struct BrushedTableRow {
    pub cluster: i32,
    /// Percentage of this cluster's bins that are in the selection.
    pub percent_of_cluster: f64,
    /// Percentage of the selection that belongs to this cluster.
    pub percent_of_selection: f64,
    /// Percentage of all bins, normalized by sample count (every sample
    /// contributes one bin per location).
    pub percent_of_total: f64,
}

/// One human-readable audit row, appended per cluster mutation.
#[derive(Clone, Debug, Serialize)]
pub struct ActionRecord {
    pub action: String,
}

/// Per-sample scalar statistics, recomputed on every rebuild.
#[derive(Clone, Debug, Serialize)]
pub struct SampleStats {
    pub mean_rd: f64,
    pub rd_range: (f64, f64),
    pub log_rd_range: (f64, f64),
}

/// Expected BAF of an allele-specific state (b of cn copies) under the
/// sample's purity. Overlay gridlines for the scatterplot x-axis.
#[derive(Clone, Debug, Serialize)]
pub struct BafTick {
    pub cn: u32,
    pub b_allele: u32,
    pub baf: f64,
}

/// Expected RD of an integer copy-number state under the sample's purity and
/// ploidy. Overlay gridlines for the y-axis.
#[derive(Clone, Debug, Serialize)]
pub struct FcnTick {
    pub cn: u32,
    pub rd: f64,
}

/// Bounds filters for [`DataWarehouse::get_records`]. Every active dimension
/// is a strict open-interval membership test; omitted dimensions impose no
/// constraint.
#[derive(Clone, Debug, Default)]
pub struct RecordFilters {
    /// Genome-wide coordinate window (min, max), boundary-exclusive.
    pub position_window: Option<(u64, u64)>,
    /// 2-D rectangle in (reverseBAF, y) space, boundary-exclusive.
    pub rect: Option<Rect>,
}

#[derive(Clone, Copy, Debug)]
pub struct Rect {
    pub x_min: f64,
    pub x_max: f64,
    pub y_min: f64,
    pub y_max: f64,
}

impl Rect {
    fn contains_open(&self, x: f64, y: f64) -> bool {
        x > self.x_min && x < self.x_max && y > self.y_min && y < self.y_max
    }
}

#[derive(Debug, Default)]
struct SilhouetteCache {
    result: Option<SilhouetteResult>,
    dirty: bool,
    /// Mutation generation the cached result was computed against.
    generation: u64,
}

#[derive(Debug)]
pub struct DataWarehouse {
    /// The full bin list, tombstones included. Index positions are the slot
    /// values stored in the correspondence arena.
    bins: Vec<GenomicBin>,
    genome: Genome,
    display_mode: DisplayMode,

    /// Sample names in first-appearance order; `sample_slots` maps a name to
    /// its slot offset in each location's slot vector.
    samples: Vec<String>,
    sample_slots: FxHashMap<String, usize>,

    /// The cross-sample correspondence arena: location key -> one slot per
    /// sample. `None` slots are sparse-data gaps, accepted at construction.
    locations: IndexMap<String, Vec<Option<usize>>>,

    // Derived indexes, fully rebuilt after every mutation. All of them cover
    // visible (non-tombstoned) bins only.
    chromosomes: Vec<String>,
    clusters: Vec<i32>,
    by_sample: FxHashMap<String, Vec<usize>>,
    by_cluster: FxHashMap<i32, Vec<usize>>,
    by_chr: FxHashMap<String, Vec<usize>>,
    clusters_by_chr: FxHashMap<String, Vec<i32>>,
    cluster_table: Vec<ClusterTableRow>,
    centroids: FxHashMap<String, FxHashMap<i32, Point>>,
    distance_matrices: FxHashMap<String, ClusterDistanceMatrix>,
    sample_stats: FxHashMap<String, SampleStats>,
    baf_ticks: FxHashMap<String, Vec<BafTick>>,
    fcn_ticks: FxHashMap<String, Vec<FcnTick>>,

    purity: FxHashMap<String, f64>,
    ploidy: FxHashMap<String, f64>,

    brushed: Vec<GenomicBin>,
    history: Vec<Vec<GenomicBin>>,
    action_log: Vec<ActionRecord>,

    /// Monotonically increasing mutation sequence number; silhouette results
    /// are only written back if they were computed against the current value.
    generation: u64,
    silhouette: Mutex<SilhouetteCache>,
    silhouette_seed: Option<u64>,
}

impl DataWarehouse {
    /// Build a warehouse over `bins` using the hg38 coordinate axis.
    pub fn new(bins: Vec<GenomicBin>) -> Result<Self, CnClustError> {
        Self::with_genome(bins, Genome::hg38())
    }

    /// Build a warehouse over `bins` with an explicit genome definition.
    ///
    /// Groups bins by location to build the correspondence arena and by
    /// sample/cluster/chromosome for the derived indexes, then computes
    /// initial centroids, distance matrices, per-sample statistics, and
    /// reference ticks. An empty input yields an empty warehouse. A second
    /// bin for the same (location, sample) pair is an error; a location
    /// missing a bin for some sample is accepted as sparse data.
    pub fn with_genome(bins: Vec<GenomicBin>, genome: Genome) -> Result<Self, CnClustError> {
        let mut samples = Vec::new();
        let mut sample_slots: FxHashMap<String, usize> = FxHashMap::default();
        for bin in &bins {
            if !sample_slots.contains_key(&bin.sample) {
                sample_slots.insert(bin.sample.clone(), samples.len());
                samples.push(bin.sample.clone());
            }
        }

        let mut locations: IndexMap<String, Vec<Option<usize>>> = IndexMap::new();
        for (i, bin) in bins.iter().enumerate() {
            let slot = sample_slots[&bin.sample];
            let slots = locations
                .entry(bin.location_key())
                .or_insert_with(|| vec![None; samples.len()]);
            if slots[slot].is_some() {
                return Err(CnClustError::DuplicateBin {
                    location: bin.location_key(),
                    sample: bin.sample.clone(),
                });
            }
            slots[slot] = Some(i);
        }

        let gaps = locations
            .values()
            .filter(|slots| slots.iter().any(Option::is_none))
            .count();
        if gaps > 0 {
            warn!(
                gaps,
                "correspondence index is sparse; missing slots are skipped on mutation"
            );
        }

        let purity = samples.iter().map(|s| (s.clone(), DEFAULT_PURITY)).collect();
        let ploidy = samples.iter().map(|s| (s.clone(), DEFAULT_PLOIDY)).collect();

        let mut warehouse = DataWarehouse {
            bins,
            genome,
            display_mode: DisplayMode::default(),
            samples,
            sample_slots,
            locations,
            chromosomes: Vec::new(),
            clusters: Vec::new(),
            by_sample: FxHashMap::default(),
            by_cluster: FxHashMap::default(),
            by_chr: FxHashMap::default(),
            clusters_by_chr: FxHashMap::default(),
            cluster_table: Vec::new(),
            centroids: FxHashMap::default(),
            distance_matrices: FxHashMap::default(),
            sample_stats: FxHashMap::default(),
            baf_ticks: FxHashMap::default(),
            fcn_ticks: FxHashMap::default(),
            purity,
            ploidy,
            brushed: Vec::new(),
            history: Vec::new(),
            action_log: Vec::new(),
            generation: 0,
            silhouette: Mutex::new(SilhouetteCache {
                result: None,
                dirty: true,
                generation: 0,
            }),
            silhouette_seed: None,
        };
        warehouse.rebuild_indexes();
        Ok(warehouse)
    }

    /// Use a fixed seed for silhouette downsampling, making scores
    /// reproducible. Unseeded warehouses draw from entropy.
    pub fn silhouette_seed(&mut self, seed: u64) {
        self.silhouette_seed = Some(seed);
    }

    pub fn is_empty(&self) -> bool {
        self.bins.is_empty()
    }

    pub fn sample_list(&self) -> &[String] {
        &self.samples
    }

    pub fn cluster_list(&self) -> &[i32] {
        &self.clusters
    }

    pub fn chromosome_list(&self) -> &[String] {
        &self.chromosomes
    }

    pub fn display_mode(&self) -> DisplayMode {
        self.display_mode
    }

    /// Switch the y-axis measurement. Centroids, distance matrices and the
    /// silhouette all live in the new space, so derived state is recomputed.
    pub fn set_display_mode(&mut self, mode: DisplayMode) {
        if self.display_mode != mode {
            self.display_mode = mode;
            self.recompute_centroids();
            self.mark_silhouettes_dirty();
        }
    }

    pub fn purity(&self, sample: &str) -> Option<f64> {
        self.purity.get(sample).copied()
    }

    pub fn ploidy(&self, sample: &str) -> Option<f64> {
        self.ploidy.get(sample).copied()
    }

    pub fn set_purity(&mut self, sample: &str, purity: f64) -> Result<(), CnClustError> {
        let entry = self
            .purity
            .get_mut(sample)
            .ok_or_else(|| CnClustError::UnknownSample(sample.to_string()))?;
        *entry = purity;
        self.recompute_reference_ticks();
        if self.display_mode == DisplayMode::FractionalCn {
            self.recompute_centroids();
            self.mark_silhouettes_dirty();
        }
        Ok(())
    }

    pub fn set_ploidy(&mut self, sample: &str, ploidy: f64) -> Result<(), CnClustError> {
        let entry = self
            .ploidy
            .get_mut(sample)
            .ok_or_else(|| CnClustError::UnknownSample(sample.to_string()))?;
        *entry = ploidy;
        self.recompute_reference_ticks();
        if self.display_mode == DisplayMode::FractionalCn {
            self.recompute_centroids();
            self.mark_silhouettes_dirty();
        }
        Ok(())
    }

    /// The (reverseBAF, y) point of a bin under the active display mode.
    pub fn point_for(&self, bin: &GenomicBin) -> Point {
        let purity = self.purity.get(&bin.sample).copied().unwrap_or(DEFAULT_PURITY);
        let ploidy = self.ploidy.get(&bin.sample).copied().unwrap_or(DEFAULT_PLOIDY);
        Point::new(
            bin.reverse_baf(),
            self.display_mode.y_value(bin, purity, ploidy),
        )
    }

    // ---- queries -----------------------------------------------------------

    /// All externally visible records (tombstoned bins excluded).
    pub fn get_all_records(&self) -> Vec<&GenomicBin> {
        self.bins.iter().filter(|b| !b.is_deleted()).collect()
    }

    /// Records for one sample under `mode`, intersected with the active
    /// filter dimensions. Each dimension is a strict open-interval test, so
    /// values exactly on a bound are excluded.
    pub fn get_records(
        &self,
        sample: &str,
        mode: DisplayMode,
        filters: &RecordFilters,
    ) -> Vec<&GenomicBin> {
        let Some(indices) = self.by_sample.get(sample) else {
            return Vec::new();
        };
        let purity = self.purity.get(sample).copied().unwrap_or(DEFAULT_PURITY);
        let ploidy = self.ploidy.get(sample).copied().unwrap_or(DEFAULT_PLOIDY);

        indices
            .iter()
            .map(|&i| &self.bins[i])
            .filter(|bin| {
                if let Some((min, max)) = filters.position_window {
                    match bin.genomic_position(&self.genome) {
                        Some(pos) if pos > min && pos < max => {}
                        _ => return false,
                    }
                }
                if let Some(rect) = filters.rect {
                    let y = mode.y_value(bin, purity, ploidy);
                    if !rect.contains_open(bin.reverse_baf(), y) {
                        return false;
                    }
                }
                true
            })
            .collect()
    }

    /// Per-cluster percentage of the total visible bin count.
    pub fn get_cluster_table(&self) -> &[ClusterTableRow] {
        &self.cluster_table
    }

    /// Centroid table: one row per cluster, with each sample's centroid as a
    /// `"(x, y)"` display string.
    pub fn get_centroid_data(&self) -> Vec<CentroidTableRow> {
        self.clusters
            .iter()
            .map(|&cluster| {
                let mut row = CentroidTableRow {
                    key: cluster,
                    samples: IndexMap::new(),
                };
                for sample in &self.samples {
                    if let Some(point) =
                        self.centroids.get(sample).and_then(|c| c.get(&cluster))
                    {
                        row.samples.insert(sample.clone(), point.to_string());
                    }
                }
                row
            })
            .collect()
    }

    /// Centroid points for one sample, optionally restricted to clusters
    /// present on `chr`.
    pub fn get_centroid_points(&self, sample: &str, chr: Option<&str>) -> Vec<(i32, Point)> {
        let Some(centroids) = self.centroids.get(sample) else {
            return Vec::new();
        };
        let mut points: Vec<(i32, Point)> = centroids
            .iter()
            .filter(|(cluster, _)| match chr {
                Some(c) => self
                    .clusters_by_chr
                    .get(c)
                    .is_some_and(|present| present.contains(cluster)),
                None => true,
            })
            .map(|(&cluster, &point)| (cluster, point))
            .collect();
        points.sort_by_key(|(cluster, _)| *cluster);
        points
    }

    /// Centroid of `cluster` in `sample`'s space, or a typed error when the
    /// sample is unknown or the cluster has no members there.
    pub fn require_centroid(&self, sample: &str, cluster: i32) -> Result<Point, CnClustError> {
        let centroids = self
            .centroids
            .get(sample)
            .ok_or_else(|| CnClustError::UnknownSample(sample.to_string()))?;
        centroids
            .get(&cluster)
            .copied()
            .ok_or_else(|| CnClustError::MissingCentroid {
                cluster,
                sample: sample.to_string(),
            })
    }

    /// Resolve `sample`'s bin at `location` through the correspondence arena.
    /// A sparse gap is a typed error here, unlike the silent skip on mutation.
    pub fn require_bin(&self, location: &str, sample: &str) -> Result<&GenomicBin, CnClustError> {
        let slot = *self
            .sample_slots
            .get(sample)
            .ok_or_else(|| CnClustError::UnknownSample(sample.to_string()))?;
        self.locations
            .get(location)
            .and_then(|slots| slots.get(slot).copied().flatten())
            .map(|i| &self.bins[i])
            .ok_or_else(|| CnClustError::MissingCorrespondence {
                location: location.to_string(),
                sample: sample.to_string(),
            })
    }

    /// Centroid-distance matrix for one sample's centroid space.
    pub fn get_cluster_distance_matrix(&self, sample: &str) -> Option<&ClusterDistanceMatrix> {
        self.distance_matrices.get(sample)
    }

    /// Heat-map rows for one sample's centroid-distance matrix.
    pub fn get_heat_map(&self, sample: &str) -> Vec<HeatMapElem> {
        self.distance_matrices
            .get(sample)
            .map(|m| m.to_heat_map())
            .unwrap_or_default()
    }

    pub fn get_sample_stats(&self, sample: &str) -> Option<&SampleStats> {
        self.sample_stats.get(sample)
    }

    pub fn get_baf_ticks(&self, sample: &str) -> &[BafTick] {
        self.baf_ticks.get(sample).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn get_fcn_ticks(&self, sample: &str) -> &[FcnTick] {
        self.fcn_ticks.get(sample).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn brushed_bins(&self) -> &[GenomicBin] {
        &self.brushed
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub fn action_log(&self) -> &[ActionRecord] {
        &self.action_log
    }

    /// Per-cluster composition of the brushed selection. Total percentages
    /// are normalized by sample count, since every sample contributes one bin
    /// per location.
    pub fn brushed_table_data(&self) -> Vec<BrushedTableRow> {
        if self.brushed.is_empty() {
            return Vec::new();
        }
        let mut selected: FxHashMap<i32, usize> = FxHashMap::default();
        for bin in &self.brushed {
            *selected.entry(bin.cluster).or_default() += 1;
        }
        let selection_total = self.brushed.len() as f64;
        let visible_total: usize = self.by_cluster.values().map(Vec::len).sum();
        let per_sample_total = visible_total as f64 / self.samples.len().max(1) as f64;

        let mut rows: Vec<BrushedTableRow> = selected
            .into_iter()
            .map(|(cluster, count)| {
                let cluster_total =
                    self.by_cluster.get(&cluster).map(|v| v.len()).unwrap_or(0) as f64;
                BrushedTableRow {
                    cluster,
                    percent_of_cluster: if cluster_total > 0.0 {
                        count as f64 / cluster_total * 100.0
                    } else {
                        0.0
                    },
                    percent_of_selection: count as f64 / selection_total * 100.0,
                    percent_of_total: if per_sample_total > 0.0 {
                        count as f64 / per_sample_total * 100.0
                    } else {
                        0.0
                    },
                }
            })
            .collect();
        rows.sort_by_key(|row| row.cluster);
        rows
    }

    // ---- silhouettes -------------------------------------------------------

    /// Cached overall silhouette, if a non-stale result exists.
    pub fn get_avg_silhouette(&self) -> Option<f64> {
        self.silhouette.lock().result.as_ref().map(|r| r.overall)
    }

    pub fn get_silhouette(&self) -> Option<SilhouetteResult> {
        self.silhouette.lock().result.clone()
    }

    pub fn silhouettes_dirty(&self) -> bool {
        self.silhouette.lock().dirty
    }

    /// Recompute silhouette scores if the cache is dirty; otherwise return
    /// the cached result. The write-back is guarded by the mutation
    /// generation captured before computing: if a mutation lands while a
    /// recomputation is in flight, the stale result is discarded rather than
    /// overwriting fresher state.
    pub fn recalculate_silhouettes(&self) -> Option<SilhouetteResult> {
        {
            let cache = self.silhouette.lock();
            if !cache.dirty {
                return cache.result.clone();
            }
        }
        let generation = self.generation;

        let points_by_cluster: FxHashMap<i32, Vec<Point>> = self
            .by_cluster
            .iter()
            .map(|(&cluster, indices)| {
                (
                    cluster,
                    indices.iter().map(|&i| self.point_for(&self.bins[i])).collect(),
                )
            })
            .collect();
        let mut rng = match self.silhouette_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let result = silhouette_scores(&points_by_cluster, &mut rng);
        debug!(
            generation,
            clusters = points_by_cluster.len(),
            "silhouette recomputation finished"
        );

        let mut cache = self.silhouette.lock();
        if generation == self.generation {
            cache.result = result.clone();
            cache.dirty = false;
            cache.generation = generation;
        }
        result
    }

    fn mark_silhouettes_dirty(&self) {
        let mut cache = self.silhouette.lock();
        cache.dirty = true;
        cache.result = None;
    }

    // ---- mutations ---------------------------------------------------------

    /// Replace the brushed selection wholesale.
    pub fn set_brushed_bins(&mut self, bins: Vec<GenomicBin>) {
        self.brushed = bins;
    }

    /// Assign `new_cluster` to every location covered by the brushed
    /// selection, across all samples. Pushes one deep snapshot onto the
    /// history stack, rebuilds every derived index, appends an audit row, and
    /// clears the brush. A no-op on an empty brush.
    pub fn update_cluster(&mut self, new_cluster: i32) {
        if self.brushed.is_empty() {
            return;
        }
        self.history.push(self.bins.clone());
        let action = self.describe_update(new_cluster);

        let brushed = std::mem::take(&mut self.brushed);
        for bin in &brushed {
            self.relabel_location(&bin.location_key(), new_cluster);
        }
        debug!(
            new_cluster,
            brushed = brushed.len(),
            "cluster update applied"
        );

        self.action_log.push(ActionRecord { action });
        self.finish_mutation();
    }

    /// Pop the most recent history snapshot and re-apply its per-location
    /// cluster labels onto the correspondence arena. A no-op when the stack
    /// is empty.
    pub fn undo_cluster_update(&mut self) {
        let Some(snapshot) = self.history.pop() else {
            return;
        };
        for old in &snapshot {
            let Some(slots) = self.locations.get(&old.location_key()) else {
                continue;
            };
            let Some(&slot) = self.sample_slots.get(&old.sample) else {
                continue;
            };
            if let Some(i) = slots[slot] {
                self.bins[i].cluster = old.cluster;
            }
        }
        debug!(remaining = self.history.len(), "cluster update undone");
        self.action_log.push(ActionRecord {
            action: "undo: restored previous cluster assignment".to_string(),
        });
        self.finish_mutation();
    }

    /// Reset every bin to unclustered: brushes all visible records and runs a
    /// single bulk cluster update.
    pub fn clear_clustering(&mut self) {
        let all: Vec<GenomicBin> = self.get_all_records().into_iter().cloned().collect();
        self.set_brushed_bins(all);
        self.update_cluster(UNCLUSTERED);
    }

    /// Propose cluster consolidation in one sample's centroid space: each
    /// cluster whose nearest other centroid lies within both thresholds is
    /// paired with it, smaller-by-bin-count absorbed into larger, and
    /// proposals are unioned transitively. Within each group the cluster with
    /// the largest bin-count percentage survives. Returns survivor -> absorbed
    /// ids; state is untouched.
    pub fn merge_bins(
        &self,
        sample: &str,
        x_threshold: f64,
        y_threshold: f64,
    ) -> Result<IndexMap<i32, Vec<i32>>, CnClustError> {
        check_threshold(x_threshold)?;
        check_threshold(y_threshold)?;
        let centroids = self
            .centroids
            .get(sample)
            .ok_or_else(|| CnClustError::UnknownSample(sample.to_string()))?;

        let mut pairs = Vec::new();
        for &cluster in &self.clusters {
            let Some(&point) = centroids.get(&cluster) else {
                continue;
            };
            let Some((nearest, other)) = self.nearest_centroid(centroids, cluster, point) else {
                continue;
            };
            if (point.x - other.x).abs() < x_threshold && (point.y - other.y).abs() < y_threshold {
                pairs.push((cluster, nearest));
            }
        }
        Ok(self.group_merge_pairs(&pairs))
    }

    /// Like [`merge_bins`](Self::merge_bins), but a pair is only proposed if
    /// the nearest-centroid test passes in every sample, each under that
    /// sample's own (x, y) thresholds.
    pub fn merge_bins_all(
        &self,
        thresholds: &FxHashMap<String, (f64, f64)>,
    ) -> Result<IndexMap<i32, Vec<i32>>, CnClustError> {
        for &(x, y) in thresholds.values() {
            check_threshold(x)?;
            check_threshold(y)?;
        }
        let mut pairs = Vec::new();
        'clusters: for &cluster in &self.clusters {
            let mut nearest: Option<i32> = None;
            for sample in &self.samples {
                let Some(&(x_threshold, y_threshold)) = thresholds.get(sample) else {
                    continue 'clusters;
                };
                let Some(centroids) = self.centroids.get(sample) else {
                    continue 'clusters;
                };
                let Some(&point) = centroids.get(&cluster) else {
                    continue 'clusters;
                };
                let Some((candidate, other)) = self.nearest_centroid(centroids, cluster, point)
                else {
                    continue 'clusters;
                };
                let within = (point.x - other.x).abs() < x_threshold
                    && (point.y - other.y).abs() < y_threshold;
                if !within || nearest.is_some_and(|n| n != candidate) {
                    continue 'clusters;
                }
                nearest = Some(candidate);
            }
            if let Some(candidate) = nearest {
                pairs.push((cluster, candidate));
            }
        }
        Ok(self.group_merge_pairs(&pairs))
    }

    /// Apply a merge mapping from [`merge_bins`](Self::merge_bins): for each
    /// absorbed cluster, brush its bins in `sample` and run a cluster update
    /// onto the survivor.
    pub fn assign_merge(&mut self, sample: &str, reassignments: &IndexMap<i32, Vec<i32>>) {
        for (&survivor, absorbed) in reassignments {
            for &cluster in absorbed {
                let bins: Vec<GenomicBin> = self
                    .by_cluster
                    .get(&cluster)
                    .map(|indices| {
                        indices
                            .iter()
                            .map(|&i| self.bins[i].clone())
                            .filter(|b| b.sample == sample)
                            .collect()
                    })
                    .unwrap_or_default();
                if bins.is_empty() {
                    continue;
                }
                self.set_brushed_bins(bins);
                self.update_cluster(survivor);
            }
        }
    }

    /// Per-bin reassignment proposals: for each location currently in a
    /// `from` cluster, find the nearest `to` centroid across all samples; the
    /// move is proposed only if every sample's distance falls within that
    /// sample's thresholds. A `to` cluster with no centroid in a touched
    /// sample is a `MissingCentroid` error. Returns target cluster -> bins to
    /// reassign (all cross-sample siblings); state is untouched.
    pub fn absorb_bins(
        &self,
        from: &[i32],
        to: &[i32],
        x_thresholds: &FxHashMap<String, f64>,
        y_thresholds: &FxHashMap<String, f64>,
    ) -> Result<IndexMap<i32, Vec<GenomicBin>>, CnClustError> {
        for &x in x_thresholds.values() {
            check_threshold(x)?;
        }
        for &y in y_thresholds.values() {
            check_threshold(y)?;
        }

        let mut proposals: IndexMap<i32, Vec<GenomicBin>> = IndexMap::new();
        'locations: for slots in self.locations.values() {
            let group: Vec<&GenomicBin> = slots
                .iter()
                .flatten()
                .map(|&i| &self.bins[i])
                .filter(|b| !b.is_deleted())
                .collect();
            let Some(first) = group.first() else {
                continue;
            };
            let current = first.cluster;
            if !from.contains(&current) {
                continue;
            }

            // Nearest `to` cluster by mean centroid distance across samples.
            let mut best: Option<(i32, f64)> = None;
            for &target in to {
                if target == current {
                    continue;
                }
                let mut total = 0.0;
                let mut count = 0usize;
                for bin in &group {
                    let c = self.require_centroid(&bin.sample, target)?;
                    total += self.point_for(bin).distance(&c);
                    count += 1;
                }
                let mean = total / count.max(1) as f64;
                if best.map_or(true, |(_, d)| mean < d) {
                    best = Some((target, mean));
                }
            }
            let Some((target, _)) = best else {
                continue;
            };

            // Every sample must be within its own thresholds of the target.
            for bin in &group {
                let (Some(&x_threshold), Some(&y_threshold)) = (
                    x_thresholds.get(&bin.sample),
                    y_thresholds.get(&bin.sample),
                ) else {
                    continue 'locations;
                };
                let point = self.point_for(bin);
                let c = self.require_centroid(&bin.sample, target)?;
                if (point.x - c.x).abs() >= x_threshold || (point.y - c.y).abs() >= y_threshold {
                    continue 'locations;
                }
            }

            proposals
                .entry(target)
                .or_default()
                .extend(group.into_iter().cloned());
        }
        Ok(proposals)
    }

    /// Apply absorb proposals: one brush + cluster update per target cluster.
    pub fn assign_absorb(&mut self, proposals: &IndexMap<i32, Vec<GenomicBin>>) {
        for (&target, bins) in proposals {
            if bins.is_empty() {
                continue;
            }
            self.set_brushed_bins(bins.clone());
            self.update_cluster(target);
        }
    }

    // ---- internals ---------------------------------------------------------

    /// Set `cluster` on every sample's bin at `key`. Missing locations are
    /// skipped with a warning; `None` slots are sparse-data gaps and are
    /// skipped silently.
    fn relabel_location(&mut self, key: &str, cluster: i32) {
        let Some(slots) = self.locations.get(key) else {
            warn!(location = %key, "brushed bin has no correspondence entry");
            return;
        };
        for &slot in slots {
            if let Some(i) = slot {
                self.bins[i].cluster = cluster;
            }
        }
    }

    /// Post-mutation bookkeeping shared by every cluster mutation: full index
    /// rebuild, generation bump, silhouette invalidation.
    fn finish_mutation(&mut self) {
        self.rebuild_indexes();
        self.generation += 1;
        self.mark_silhouettes_dirty();
    }

    /// Full rebuild of every derived index and statistic. Deliberately not
    /// incremental: centroids, chromosome membership and the cluster table
    /// all depend on the whole visible set.
    fn rebuild_indexes(&mut self) {
        self.by_sample = self.samples.iter().map(|s| (s.clone(), Vec::new())).collect();
        self.by_cluster = FxHashMap::default();
        self.by_chr = FxHashMap::default();
        self.clusters_by_chr = FxHashMap::default();
        self.chromosomes.clear();

        for (i, bin) in self.bins.iter().enumerate() {
            if bin.is_deleted() {
                continue;
            }
            if let Some(indices) = self.by_sample.get_mut(&bin.sample) {
                indices.push(i);
            }
            self.by_cluster.entry(bin.cluster).or_default().push(i);
            let chr_indices = self.by_chr.entry(bin.chr.clone()).or_default();
            if chr_indices.is_empty() {
                self.chromosomes.push(bin.chr.clone());
            }
            chr_indices.push(i);
            let chr_clusters = self.clusters_by_chr.entry(bin.chr.clone()).or_default();
            if !chr_clusters.contains(&bin.cluster) {
                chr_clusters.push(bin.cluster);
            }
        }

        self.clusters = self.by_cluster.keys().copied().collect();
        self.clusters.sort_unstable();

        let total: usize = self.by_cluster.values().map(Vec::len).sum();
        self.cluster_table = self
            .clusters
            .iter()
            .map(|&cluster| ClusterTableRow {
                key: cluster,
                value: self.by_cluster[&cluster].len() as f64 / total.max(1) as f64 * 100.0,
            })
            .collect();

        self.recompute_sample_stats();
        self.recompute_centroids();
        self.recompute_reference_ticks();
    }

    fn recompute_sample_stats(&mut self) {
        self.sample_stats = self
            .by_sample
            .iter()
            .filter(|(_, indices)| !indices.is_empty())
            .map(|(sample, indices)| {
                let rds: Vec<f64> = indices.iter().map(|&i| self.bins[i].rd).collect();
                let mean_rd = rds.iter().sum::<f64>() / rds.len() as f64;
                let rd_min = rds.iter().copied().fold(f64::INFINITY, f64::min);
                let rd_max = rds.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                let log_rds: Vec<f64> = indices
                    .iter()
                    .map(|&i| self.bins[i].log_rd())
                    .filter(|x| x.is_finite())
                    .collect();
                let (log_min, log_max) = if log_rds.is_empty() {
                    (0.0, 0.0)
                } else {
                    (
                        log_rds.iter().copied().fold(f64::INFINITY, f64::min),
                        log_rds.iter().copied().fold(f64::NEG_INFINITY, f64::max),
                    )
                };
                (
                    sample.clone(),
                    SampleStats {
                        mean_rd,
                        rd_range: (rd_min, rd_max),
                        log_rd_range: (log_min, log_max),
                    },
                )
            })
            .collect();
    }

    fn recompute_centroids(&mut self) {
        let mut centroids: FxHashMap<String, FxHashMap<i32, Point>> = FxHashMap::default();
        for sample in &self.samples {
            let purity = self.purity.get(sample).copied().unwrap_or(DEFAULT_PURITY);
            let ploidy = self.ploidy.get(sample).copied().unwrap_or(DEFAULT_PLOIDY);
            let mut per_cluster: FxHashMap<i32, Vec<Point>> = FxHashMap::default();
            for &i in self.by_sample.get(sample).map(Vec::as_slice).unwrap_or(&[]) {
                let bin = &self.bins[i];
                per_cluster.entry(bin.cluster).or_default().push(Point::new(
                    bin.reverse_baf(),
                    self.display_mode.y_value(bin, purity, ploidy),
                ));
            }
            let sample_centroids: FxHashMap<i32, Point> = per_cluster
                .into_iter()
                .filter_map(|(cluster, points)| centroid(&points).map(|c| (cluster, c)))
                .collect();
            centroids.insert(sample.clone(), sample_centroids);
        }
        self.distance_matrices = centroids
            .iter()
            .map(|(sample, c)| (sample.clone(), ClusterDistanceMatrix::from_centroids(c)))
            .collect();
        self.centroids = centroids;
    }

    fn recompute_reference_ticks(&mut self) {
        self.baf_ticks.clear();
        self.fcn_ticks.clear();
        for sample in &self.samples {
            let purity = self.purity.get(sample).copied().unwrap_or(DEFAULT_PURITY);
            let ploidy = self.ploidy.get(sample).copied().unwrap_or(DEFAULT_PLOIDY);
            let normal = 2.0 * (1.0 - purity);

            let mut baf = Vec::new();
            for cn in 1..=MAX_TICK_CN {
                for b_allele in 0..=cn / 2 {
                    baf.push(BafTick {
                        cn,
                        b_allele,
                        baf: (purity * b_allele as f64 + (1.0 - purity))
                            / (purity * cn as f64 + normal),
                    });
                }
            }
            self.baf_ticks.insert(sample.clone(), baf);

            let denom = purity * ploidy + normal;
            let fcn = (0..=MAX_TICK_CN)
                .map(|cn| FcnTick {
                    cn,
                    rd: (purity * cn as f64 + normal) / denom,
                })
                .collect();
            self.fcn_ticks.insert(sample.clone(), fcn);
        }
    }

    fn nearest_centroid(
        &self,
        centroids: &FxHashMap<i32, Point>,
        cluster: i32,
        point: Point,
    ) -> Option<(i32, Point)> {
        centroids
            .iter()
            .filter(|(&other, _)| other != cluster)
            .map(|(&other, &c)| (other, c))
            .min_by(|a, b| point.distance(&a.1).total_cmp(&point.distance(&b.1)))
    }

    /// Turn pairwise merge proposals into transitive groups and pick each
    /// group's survivor by largest bin-count percentage.
    fn group_merge_pairs(&self, pairs: &[(i32, i32)]) -> IndexMap<i32, Vec<i32>> {
        let mut parent: FxHashMap<i32, i32> = FxHashMap::default();
        fn find(parent: &mut FxHashMap<i32, i32>, x: i32) -> i32 {
            let p = *parent.entry(x).or_insert(x);
            if p == x {
                return x;
            }
            let root = find(parent, p);
            parent.insert(x, root);
            root
        }
        for &(a, b) in pairs {
            // union is symmetric; the survivor is chosen per group below
            let ra = find(&mut parent, a);
            let rb = find(&mut parent, b);
            if ra != rb {
                parent.insert(ra, rb);
            }
        }

        let members: Vec<i32> = parent.keys().copied().collect();
        let mut groups: FxHashMap<i32, Vec<i32>> = FxHashMap::default();
        for cluster in members {
            let root = find(&mut parent, cluster);
            groups.entry(root).or_default().push(cluster);
        }

        let mut result: IndexMap<i32, Vec<i32>> = IndexMap::new();
        let mut roots: Vec<i32> = groups.keys().copied().collect();
        roots.sort_unstable();
        for root in roots {
            let mut group = groups.remove(&root).unwrap_or_default();
            if group.len() < 2 {
                continue;
            }
            group.sort_unstable();
            let survivor = group
                .iter()
                .copied()
                .max_by_key(|c| self.by_cluster.get(c).map(Vec::len).unwrap_or(0))
                .unwrap_or(root);
            let absorbed: Vec<i32> = group.into_iter().filter(|&c| c != survivor).collect();
            if !absorbed.is_empty() {
                result.insert(survivor, absorbed);
            }
        }
        result
    }

    /// Render the audit row for a pending cluster update: affected cluster
    /// percentages plus the RD/BAF ranges of the selection.
    fn describe_update(&self, new_cluster: i32) -> String {
        let mut affected: Vec<i32> = self.brushed.iter().map(|b| b.cluster).collect();
        affected.sort_unstable();
        affected.dedup();
        let percentages: Vec<String> = affected
            .iter()
            .map(|cluster| {
                let pct = self
                    .cluster_table
                    .iter()
                    .find(|row| row.key == *cluster)
                    .map(|row| row.value)
                    .unwrap_or(0.0);
                format!("{cluster} ({pct:.1}%)")
            })
            .collect();
        let rd_min = self.brushed.iter().map(|b| b.rd).fold(f64::INFINITY, f64::min);
        let rd_max = self
            .brushed
            .iter()
            .map(|b| b.rd)
            .fold(f64::NEG_INFINITY, f64::max);
        let baf_min = self.brushed.iter().map(|b| b.baf).fold(f64::INFINITY, f64::min);
        let baf_max = self
            .brushed
            .iter()
            .map(|b| b.baf)
            .fold(f64::NEG_INFINITY, f64::max);
        format!(
            "assigned {} bins from cluster(s) {} to cluster {} | RD [{:.3}, {:.3}] BAF [{:.3}, {:.3}]",
            self.brushed.len(),
            percentages.join(", "),
            new_cluster,
            rd_min,
            rd_max,
            baf_min,
            baf_max,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::DELETED;
    use crate::test_utils::test_utils::{make_clustered_bin, two_sample_bins};

    fn warehouse() -> DataWarehouse {
        let mut wh = DataWarehouse::new(two_sample_bins()).expect("valid bins");
        wh.silhouette_seed(42);
        wh
    }

    fn clusters_at(wh: &DataWarehouse, key: &str) -> Vec<i32> {
        wh.get_all_records()
            .into_iter()
            .filter(|b| b.location_key() == key)
            .map(|b| b.cluster)
            .collect()
    }

    #[test]
    fn test_construction() {
        let wh = warehouse();
        assert!(!wh.is_empty());
        assert_eq!(wh.sample_list(), ["tumor1", "tumor2"]);
        assert_eq!(wh.cluster_list(), [1, 2, 3]);
        assert_eq!(wh.chromosome_list(), ["chr1", "chr2", "chr3"]);
        assert_eq!(wh.get_all_records().len(), 12);
    }

    #[test]
    fn test_empty_warehouse() {
        let wh = DataWarehouse::new(Vec::new()).expect("empty input is allowed");
        assert!(wh.is_empty());
        assert!(wh.sample_list().is_empty());
        assert!(wh.cluster_list().is_empty());
        assert!(wh.get_all_records().is_empty());
        assert!(wh.get_cluster_table().is_empty());
        assert!(wh.get_centroid_data().is_empty());
    }

    #[test]
    fn test_duplicate_bin_rejected() {
        let mut bins = two_sample_bins();
        bins.push(bins[0].clone());
        assert!(DataWarehouse::new(bins).is_err());
    }

    #[test]
    fn test_cluster_table_percentages() {
        let wh = warehouse();
        let table = wh.get_cluster_table();
        assert_eq!(table.len(), 3);
        // 6 of 12 bins in cluster 1, 4 in cluster 2, 2 in cluster 3
        assert_eq!(table[0].key, 1);
        assert!((table[0].value - 50.0).abs() < 1e-9);
        assert!((table[1].value - 100.0 / 3.0).abs() < 1e-9);
        assert!((table[2].value - 100.0 / 6.0).abs() < 1e-9);
    }

    #[test]
    fn test_update_cluster_relabels_all_samples() {
        let mut wh = warehouse();
        // brush a single tumor1 bin; the sibling tumor2 bin must follow
        let target: GenomicBin = wh
            .get_records("tumor1", DisplayMode::Rd, &RecordFilters::default())
            .into_iter()
            .find(|b| b.location_key() == "chr3:0-50000")
            .expect("chr3 bin present")
            .clone();
        wh.set_brushed_bins(vec![target]);
        wh.update_cluster(7);

        assert_eq!(clusters_at(&wh, "chr3:0-50000"), [7, 7]);
        assert!(wh.brushed_bins().is_empty());
        assert_eq!(wh.history_len(), 1);
        assert!(wh.cluster_list().contains(&7));
        assert!(wh.silhouettes_dirty());
        assert_eq!(wh.action_log().len(), 1);
        assert!(wh.action_log()[0].action.contains("to cluster 7"));
    }

    #[test]
    fn test_update_cluster_empty_brush_is_noop() {
        let mut wh = warehouse();
        wh.update_cluster(9);
        assert_eq!(wh.history_len(), 0);
        assert!(!wh.cluster_list().contains(&9));
        assert!(wh.action_log().is_empty());
    }

    #[test]
    fn test_undo_round_trip() {
        let mut wh = warehouse();
        let before: Vec<i32> = wh.get_all_records().iter().map(|b| b.cluster).collect();

        let brushed: Vec<GenomicBin> = wh
            .get_records("tumor1", DisplayMode::Rd, &RecordFilters::default())
            .into_iter()
            .filter(|b| b.chr == "chr2")
            .cloned()
            .collect();
        wh.set_brushed_bins(brushed);
        wh.update_cluster(7);
        assert_eq!(wh.history_len(), 1);

        wh.undo_cluster_update();
        assert_eq!(wh.history_len(), 0);
        let after: Vec<i32> = wh.get_all_records().iter().map(|b| b.cluster).collect();
        assert_eq!(before, after);
    }

    #[test]
    fn test_undo_empty_history_is_noop() {
        let mut wh = warehouse();
        wh.undo_cluster_update();
        assert_eq!(wh.history_len(), 0);
        assert!(wh.action_log().is_empty());
    }

    #[test]
    fn test_clear_clustering() {
        let mut wh = warehouse();
        wh.clear_clustering();
        assert!(wh.get_all_records().iter().all(|b| b.is_unclustered()));
        assert!(wh.brushed_bins().is_empty());
        assert_eq!(wh.cluster_list(), [UNCLUSTERED]);
        // restorable
        wh.undo_cluster_update();
        assert_eq!(wh.cluster_list(), [1, 2, 3]);
    }

    #[test]
    fn test_deleted_bins_hidden_but_kept_in_arena() {
        let mut wh = warehouse();
        let brushed: Vec<GenomicBin> = wh
            .get_records("tumor1", DisplayMode::Rd, &RecordFilters::default())
            .into_iter()
            .filter(|b| b.chr == "chr3")
            .cloned()
            .collect();
        wh.set_brushed_bins(brushed);
        wh.update_cluster(DELETED);

        assert_eq!(wh.get_all_records().len(), 10);
        assert!(!wh.cluster_list().contains(&DELETED));
        // the tombstoned location still resolves, so undo restores it
        wh.undo_cluster_update();
        assert_eq!(wh.get_all_records().len(), 12);
        assert_eq!(clusters_at(&wh, "chr3:0-50000"), [3, 3]);
    }

    #[test]
    fn test_get_records_rectangle_is_boundary_exclusive() {
        let bins = vec![
            // on the x boundary: reverse_baf = 0.5 - 0.3 = 0.2
            make_clustered_bin("chr1", 0, 100, "s", 1.0, 0.3, 1),
            // strictly inside
            make_clustered_bin("chr1", 100, 200, "s", 1.0, 0.4, 1),
            // outside
            make_clustered_bin("chr1", 200, 300, "s", 3.0, 0.4, 1),
        ];
        let wh = DataWarehouse::new(bins).expect("valid bins");
        let filters = RecordFilters {
            position_window: None,
            rect: Some(Rect {
                x_min: 0.0,
                x_max: 0.2,
                y_min: 0.5,
                y_max: 2.0,
            }),
        };
        let records = wh.get_records("s", DisplayMode::Rd, &filters);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].start, 100);
    }

    #[test]
    fn test_get_records_position_window() {
        let wh = warehouse();
        // chr1 starts at genome offset 0; window covering its first two bins
        let filters = RecordFilters {
            position_window: Some((0, 100_000)),
            rect: None,
        };
        let records = wh.get_records("tumor1", DisplayMode::Rd, &filters);
        // strict-open: the bin starting at 0 is on the boundary and excluded
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].start, 50_000);
    }

    #[test]
    fn test_centroid_points_and_table() {
        let wh = warehouse();
        let points = wh.get_centroid_points("tumor1", None);
        assert_eq!(points.len(), 3);
        // cluster 3 lives only on chr3
        let chr1_points = wh.get_centroid_points("tumor1", Some("chr1"));
        assert_eq!(chr1_points.len(), 1);
        assert_eq!(chr1_points[0].0, 1);

        let table = wh.get_centroid_data();
        assert_eq!(table.len(), 3);
        assert!(table[0].samples.contains_key("tumor1"));
        assert!(table[0].samples.contains_key("tumor2"));
        assert!(table[0].samples["tumor1"].starts_with('('));
    }

    #[test]
    fn test_distance_matrix_per_sample() {
        let wh = warehouse();
        let matrix = wh
            .get_cluster_distance_matrix("tumor1")
            .expect("sample present");
        assert_eq!(matrix.get(1, 1), Some(0.0));
        assert!(matrix.get(1, 2).expect("pair present") > 0.0);
        assert_eq!(wh.get_heat_map("tumor1").len(), 9);
        assert!(wh.get_cluster_distance_matrix("missing").is_none());
    }

    #[test]
    fn test_sample_stats() {
        let wh = warehouse();
        let stats = wh.get_sample_stats("tumor1").expect("sample present");
        assert_eq!(stats.rd_range, (0.5, 1.5));
        assert!((stats.mean_rd - (1.0 + 0.98 + 1.02 + 1.5 + 1.48 + 0.5) / 6.0).abs() < 1e-12);
    }

    #[test]
    fn test_reference_ticks() {
        let wh = warehouse();
        let baf = wh.get_baf_ticks("tumor1");
        assert!(!baf.is_empty());
        // pure diploid heterozygous state sits at BAF 0.5
        let het = baf
            .iter()
            .find(|t| t.cn == 2 && t.b_allele == 1)
            .expect("cn=2 b=1 tick");
        assert!((het.baf - 0.5).abs() < 1e-12);

        let fcn = wh.get_fcn_ticks("tumor1");
        // at purity 1 / ploidy 2, cn 2 maps to RD 1
        let cn2 = fcn.iter().find(|t| t.cn == 2).expect("cn=2 tick");
        assert!((cn2.rd - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_brushed_table_data() {
        let mut wh = warehouse();
        // brush all of tumor1's cluster-1 bins (3 of 6 cluster-1 bins)
        let brushed: Vec<GenomicBin> = wh
            .get_records("tumor1", DisplayMode::Rd, &RecordFilters::default())
            .into_iter()
            .filter(|b| b.cluster == 1)
            .cloned()
            .collect();
        wh.set_brushed_bins(brushed);

        let rows = wh.brushed_table_data();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].cluster, 1);
        // 3 selected of 6 cluster-1 bins across both samples
        assert!((rows[0].percent_of_cluster - 50.0).abs() < 1e-9);
        assert!((rows[0].percent_of_selection - 100.0).abs() < 1e-9);
        // 3 of 6 per-sample bins
        assert!((rows[0].percent_of_total - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_brushed_table_empty_selection() {
        let wh = warehouse();
        assert!(wh.brushed_table_data().is_empty());
    }

    #[test]
    fn test_silhouette_lazy_and_cached() {
        let wh = warehouse();
        assert!(wh.silhouettes_dirty());
        assert!(wh.get_avg_silhouette().is_none());

        let result = wh.recalculate_silhouettes().expect("3 clusters");
        assert!(!wh.silhouettes_dirty());
        assert_eq!(wh.get_avg_silhouette(), Some(result.overall));

        // cached result is returned until the next mutation
        let again = wh.recalculate_silhouettes().expect("cached");
        assert_eq!(again.overall, result.overall);
    }

    #[test]
    fn test_mutation_invalidates_silhouettes() {
        let mut wh = warehouse();
        wh.recalculate_silhouettes();
        assert!(!wh.silhouettes_dirty());

        let brushed: Vec<GenomicBin> = wh
            .get_records("tumor1", DisplayMode::Rd, &RecordFilters::default())
            .into_iter()
            .filter(|b| b.chr == "chr3")
            .cloned()
            .collect();
        wh.set_brushed_bins(brushed);
        wh.update_cluster(2);
        assert!(wh.silhouettes_dirty());
        assert!(wh.get_avg_silhouette().is_none());
    }

    #[test]
    fn test_silhouette_single_cluster_is_empty() {
        let mut wh = warehouse();
        wh.clear_clustering();
        assert!(wh.recalculate_silhouettes().is_none());
    }

    #[test]
    fn test_display_mode_changes_centroids() {
        let mut wh = warehouse();
        let rd_points = wh.get_centroid_points("tumor1", None);
        wh.set_display_mode(DisplayMode::FractionalCn);
        let fcn_points = wh.get_centroid_points("tumor1", None);
        assert_eq!(rd_points.len(), fcn_points.len());
        // at purity 1 / ploidy 2, fractional CN = 2 * RD
        assert!((fcn_points[0].1.y - 2.0 * rd_points[0].1.y).abs() < 1e-9);
    }

    #[test]
    fn test_merge_bins_proposes_near_clusters() {
        // clusters 1 and 4 are nearly coincident; 2 is far away
        let mut bins = Vec::new();
        for sample in ["s1"] {
            bins.push(make_clustered_bin("chr1", 0, 100, sample, 1.00, 0.50, 1));
            bins.push(make_clustered_bin("chr1", 100, 200, sample, 1.01, 0.50, 1));
            bins.push(make_clustered_bin("chr1", 200, 300, sample, 1.02, 0.49, 4));
            bins.push(make_clustered_bin("chr2", 0, 100, sample, 3.0, 0.10, 2));
        }
        let wh = DataWarehouse::new(bins).expect("valid bins");
        let merges = wh.merge_bins("s1", 0.05, 0.05).expect("valid thresholds");

        assert_eq!(merges.len(), 1);
        // cluster 1 has more bins, so it survives
        assert_eq!(merges.get(&1), Some(&vec![4]));
        // never a self-reassignment, never an empty group
        for (survivor, absorbed) in &merges {
            assert!(!absorbed.is_empty());
            assert!(!absorbed.contains(survivor));
        }
    }

    #[test]
    fn test_merge_bins_transitive_grouping() {
        // 1 close to 4, 4 close to 5: all three union into one group
        let mut bins = Vec::new();
        bins.push(make_clustered_bin("chr1", 0, 100, "s1", 1.00, 0.50, 1));
        bins.push(make_clustered_bin("chr1", 100, 200, "s1", 1.00, 0.50, 1));
        bins.push(make_clustered_bin("chr1", 200, 300, "s1", 1.03, 0.50, 4));
        bins.push(make_clustered_bin("chr1", 300, 400, "s1", 1.06, 0.50, 5));
        let wh = DataWarehouse::new(bins).expect("valid bins");
        let merges = wh.merge_bins("s1", 0.2, 0.2).expect("valid thresholds");

        assert_eq!(merges.len(), 1);
        let (survivor, absorbed) = merges.first().expect("one group");
        assert_eq!(*survivor, 1);
        let mut absorbed = absorbed.clone();
        absorbed.sort_unstable();
        assert_eq!(absorbed, vec![4, 5]);
    }

    #[test]
    fn test_merge_bins_rejects_bad_threshold() {
        let wh = warehouse();
        assert!(matches!(
            wh.merge_bins("tumor1", -1.0, 0.1),
            Err(CnClustError::InvalidThreshold(_))
        ));
        assert!(matches!(
            wh.merge_bins("nope", 0.1, 0.1),
            Err(CnClustError::UnknownSample(_))
        ));
    }

    #[test]
    fn test_assign_merge_applies_mapping() {
        let mut bins = Vec::new();
        bins.push(make_clustered_bin("chr1", 0, 100, "s1", 1.00, 0.50, 1));
        bins.push(make_clustered_bin("chr1", 100, 200, "s1", 1.00, 0.50, 1));
        bins.push(make_clustered_bin("chr1", 200, 300, "s1", 1.02, 0.49, 4));
        let mut wh = DataWarehouse::new(bins).expect("valid bins");
        let merges = wh.merge_bins("s1", 0.05, 0.05).expect("valid thresholds");
        wh.assign_merge("s1", &merges);

        assert_eq!(wh.cluster_list(), [1]);
        assert_eq!(wh.history_len(), 1);
    }

    #[test]
    fn test_merge_bins_all_requires_every_sample() {
        // close in s1, far apart in s2: no proposal
        let mut bins = Vec::new();
        bins.push(make_clustered_bin("chr1", 0, 100, "s1", 1.00, 0.50, 1));
        bins.push(make_clustered_bin("chr1", 100, 200, "s1", 1.02, 0.50, 4));
        bins.push(make_clustered_bin("chr1", 0, 100, "s2", 1.00, 0.50, 1));
        bins.push(make_clustered_bin("chr1", 100, 200, "s2", 5.0, 0.10, 4));
        let wh = DataWarehouse::new(bins).expect("valid bins");

        let thresholds: FxHashMap<String, (f64, f64)> = [
            ("s1".to_string(), (0.1, 0.1)),
            ("s2".to_string(), (0.1, 0.1)),
        ]
        .into_iter()
        .collect();
        assert!(wh.merge_bins_all(&thresholds).expect("valid").is_empty());

        // loosen s2's thresholds and the pair goes through
        let thresholds: FxHashMap<String, (f64, f64)> = [
            ("s1".to_string(), (0.1, 0.1)),
            ("s2".to_string(), (1.0, 10.0)),
        ]
        .into_iter()
        .collect();
        let merges = wh.merge_bins_all(&thresholds).expect("valid");
        assert_eq!(merges.len(), 1);
    }

    #[test]
    fn test_absorb_bins_per_bin_reassignment() {
        let mut bins = Vec::new();
        for sample in ["s1", "s2"] {
            // cluster 1 centroid near RD 1.0
            bins.push(make_clustered_bin("chr1", 0, 100, sample, 1.00, 0.50, 1));
            bins.push(make_clustered_bin("chr1", 100, 200, sample, 1.02, 0.50, 1));
            // a stray cluster-9 bin sitting on cluster 1
            bins.push(make_clustered_bin("chr1", 200, 300, sample, 1.01, 0.50, 9));
            // a far-away cluster-9 bin that should stay put
            bins.push(make_clustered_bin("chr2", 0, 100, sample, 4.0, 0.10, 9));
        }
        let wh = DataWarehouse::new(bins).expect("valid bins");

        let x: FxHashMap<String, f64> = [("s1".to_string(), 0.1), ("s2".to_string(), 0.1)]
            .into_iter()
            .collect();
        let y = x.clone();
        let proposals = wh.absorb_bins(&[9], &[1], &x, &y).expect("valid");

        assert_eq!(proposals.len(), 1);
        let moved = proposals.get(&1).expect("target cluster 1");
        // both samples' siblings at chr1:200-300, nothing else
        assert_eq!(moved.len(), 2);
        assert!(moved.iter().all(|b| b.location_key() == "chr1:200-300"));
        // never self-reassigning, never empty
        for (target, group) in &proposals {
            assert!(!group.is_empty());
            assert!(group.iter().all(|b| b.cluster != *target));
        }
    }

    #[test]
    fn test_assign_absorb_applies_proposals() {
        let mut bins = Vec::new();
        bins.push(make_clustered_bin("chr1", 0, 100, "s1", 1.00, 0.50, 1));
        bins.push(make_clustered_bin("chr1", 100, 200, "s1", 1.02, 0.50, 1));
        bins.push(make_clustered_bin("chr1", 200, 300, "s1", 1.01, 0.50, 9));
        let mut wh = DataWarehouse::new(bins).expect("valid bins");

        let x: FxHashMap<String, f64> = [("s1".to_string(), 0.1)].into_iter().collect();
        let y = x.clone();
        let proposals = wh.absorb_bins(&[9], &[1], &x, &y).expect("valid");
        wh.assign_absorb(&proposals);

        assert_eq!(wh.cluster_list(), [1]);
    }

    #[test]
    fn test_require_centroid_typed_errors() {
        let wh = warehouse();
        let point = wh.require_centroid("tumor1", 1).expect("cluster 1 present");
        assert!(point.y > 0.0);
        assert!(matches!(
            wh.require_centroid("nope", 1),
            Err(CnClustError::UnknownSample(_))
        ));
        assert!(matches!(
            wh.require_centroid("tumor1", 99),
            Err(CnClustError::MissingCentroid { cluster: 99, .. })
        ));
    }

    #[test]
    fn test_require_bin_reports_sparse_gaps() {
        let mut bins = Vec::new();
        bins.push(make_clustered_bin("chr1", 0, 100, "t1", 1.0, 0.5, 1));
        bins.push(make_clustered_bin("chr2", 0, 100, "t1", 1.5, 0.3, 2));
        bins.push(make_clustered_bin("chr1", 0, 100, "t2", 1.0, 0.5, 1));
        let wh = DataWarehouse::new(bins).expect("sparse input is allowed");

        let found = wh.require_bin("chr2:0-100", "t1").expect("t1 has the bin");
        assert_eq!(found.cluster, 2);
        // the gap and an unknown location both surface as typed errors
        assert!(matches!(
            wh.require_bin("chr2:0-100", "t2"),
            Err(CnClustError::MissingCorrespondence { .. })
        ));
        assert!(matches!(
            wh.require_bin("chr9:0-100", "t1"),
            Err(CnClustError::MissingCorrespondence { .. })
        ));
        assert!(matches!(
            wh.require_bin("chr1:0-100", "nope"),
            Err(CnClustError::UnknownSample(_))
        ));
    }

    #[test]
    fn test_absorb_bins_rejects_unknown_target() {
        let mut bins = Vec::new();
        bins.push(make_clustered_bin("chr1", 0, 100, "s1", 1.00, 0.50, 1));
        bins.push(make_clustered_bin("chr1", 100, 200, "s1", 1.01, 0.50, 9));
        let wh = DataWarehouse::new(bins).expect("valid bins");

        let x: FxHashMap<String, f64> = [("s1".to_string(), 0.1)].into_iter().collect();
        let y = x.clone();
        assert!(matches!(
            wh.absorb_bins(&[9], &[42], &x, &y),
            Err(CnClustError::MissingCentroid { cluster: 42, .. })
        ));
    }

    #[test]
    fn test_sparse_correspondence_is_skipped_not_fatal() {
        // tumor2 is missing the chr2 bin
        let mut bins = Vec::new();
        bins.push(make_clustered_bin("chr1", 0, 100, "t1", 1.0, 0.5, 1));
        bins.push(make_clustered_bin("chr2", 0, 100, "t1", 1.5, 0.3, 2));
        bins.push(make_clustered_bin("chr1", 0, 100, "t2", 1.0, 0.5, 1));
        let mut wh = DataWarehouse::new(bins).expect("sparse input is allowed");

        let target = make_clustered_bin("chr2", 0, 100, "t1", 1.5, 0.3, 2);
        wh.set_brushed_bins(vec![target]);
        wh.update_cluster(5);
        assert_eq!(clusters_at(&wh, "chr2:0-100"), [5]);
    }
}
