// analytics.rs
//
// Cluster-level derived statistics: centroids, the centroid-distance matrix
// behind the cluster heat map, and silhouette scoring. Everything here is a
// pure function of (point set, cluster labels); the warehouse owns when these
// get recomputed.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rayon::prelude::*;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::CnClustError;

/// Fraction of a cluster sampled when estimating silhouette distances.
const SILHOUETTE_SAMPLE_FRACTION: f64 = 0.01;

/// A point in (reverseBAF, y) centroid space.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Point { x, y }
    }

    pub fn distance(&self, other: &Point) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }
}

impl fmt::Display for Point {
    /// Renders as `"(x, y)"` with 2-decimal precision, the form shown in
    /// centroid tables.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.2}, {:.2})", self.x, self.y)
    }
}

/// Mean point of a nonempty set; `None` for an empty set.
pub fn centroid(points: &[Point]) -> Option<Point> {
    if points.is_empty() {
        return None;
    }
    let n = points.len() as f64;
    Some(Point {
        x: points.iter().map(|p| p.x).sum::<f64>() / n,
        y: points.iter().map(|p| p.y).sum::<f64>() / n,
    })
}

/// One cell of the cluster-distance heat map.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HeatMapElem {
    pub cluster1: i32,
    pub cluster2: i32,
    pub dist: f64,
}

/// Symmetric cluster-to-cluster Euclidean distances between centroids in one
/// sample's space. Self-distance is always 0.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ClusterDistanceMatrix {
    dists: FxHashMap<i32, FxHashMap<i32, f64>>,
}

impl ClusterDistanceMatrix {
    /// Build from per-cluster centroids.
    pub fn from_centroids(centroids: &FxHashMap<i32, Point>) -> Self {
        let mut dists: FxHashMap<i32, FxHashMap<i32, f64>> = FxHashMap::default();
        for (&c1, p1) in centroids {
            let row = dists.entry(c1).or_default();
            for (&c2, p2) in centroids {
                row.insert(c2, if c1 == c2 { 0.0 } else { p1.distance(p2) });
            }
        }
        ClusterDistanceMatrix { dists }
    }

    pub fn get(&self, cluster1: i32, cluster2: i32) -> Option<f64> {
        self.dists.get(&cluster1)?.get(&cluster2).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.dists.is_empty()
    }

    /// The nearest cluster other than `cluster` itself, with its distance.
    pub fn nearest_other(&self, cluster: i32) -> Option<(i32, f64)> {
        let row = self.dists.get(&cluster)?;
        row.iter()
            .filter(|(&other, _)| other != cluster)
            .map(|(&other, &d)| (other, d))
            .min_by(|a, b| a.1.total_cmp(&b.1))
    }

    /// Flatten into heat-map rows, ordered by (cluster1, cluster2).
    pub fn to_heat_map(&self) -> Vec<HeatMapElem> {
        let mut elems: Vec<HeatMapElem> = self
            .dists
            .iter()
            .flat_map(|(&c1, row)| {
                row.iter().map(move |(&c2, &dist)| HeatMapElem {
                    cluster1: c1,
                    cluster2: c2,
                    dist,
                })
            })
            .collect();
        elems.sort_by_key(|e| (e.cluster1, e.cluster2));
        elems
    }
}

/// Average silhouette coefficient of one cluster's members.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClusterSilhouette {
    pub cluster: i32,
    pub avg: f64,
}

/// Silhouette scores for a clustering: per-cluster averages plus the overall
/// mean of those averages, rounded to 3 decimals.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SilhouetteResult {
    pub per_cluster: Vec<ClusterSilhouette>,
    pub overall: f64,
}

/// Estimate silhouette coefficients over clustered points.
///
/// For a point i in cluster c, `a` is its mean distance to a ~1% downsample of
/// the other members of c and `b` is the minimum over other clusters of its
/// mean distance to a ~1% downsample of that cluster;
/// `s = (b - a) / max(a, b)`, or 0 when `max(a, b) == 0`. The sole member of
/// a singleton cluster scores 0 by convention. A dataset with fewer than two
/// clusters has no silhouette and yields `None`.
///
/// Downsampling draws from the supplied RNG, so a seeded `StdRng` makes the
/// estimate reproducible.
pub fn silhouette_scores(
    points_by_cluster: &FxHashMap<i32, Vec<Point>>,
    rng: &mut StdRng,
) -> Option<SilhouetteResult> {
    if points_by_cluster.len() < 2 {
        return None;
    }

    // One shared downsample per cluster per recompute.
    let samples: FxHashMap<i32, Vec<Point>> = points_by_cluster
        .iter()
        .map(|(&cluster, points)| (cluster, downsample(points, rng)))
        .collect();

    let mut per_cluster: Vec<ClusterSilhouette> = points_by_cluster
        .iter()
        .map(|(&cluster, points)| {
            let sum: f64 = points
                .par_iter()
                .map(|point| {
                    if points.len() <= 1 {
                        // singleton cluster: its member scores 0 by convention
                        return 0.0;
                    }
                    let a = mean_distance_excluding(point, &samples[&cluster]);
                    let b = samples
                        .iter()
                        .map(|(&other, sample)| {
                            if other == cluster {
                                // exclude the home cluster from the min
                                f64::INFINITY
                            } else {
                                mean_distance(point, sample)
                            }
                        })
                        .fold(f64::INFINITY, f64::min);
                    let denom = a.max(b);
                    if denom == 0.0 {
                        0.0
                    } else {
                        (b - a) / denom
                    }
                })
                .sum();
            ClusterSilhouette {
                cluster,
                avg: sum / points.len() as f64,
            }
        })
        .collect();
    per_cluster.sort_by_key(|s| s.cluster);

    let overall = per_cluster.iter().map(|s| s.avg).sum::<f64>() / per_cluster.len() as f64;
    Some(SilhouetteResult {
        per_cluster,
        overall: round3(overall),
    })
}

fn downsample(points: &[Point], rng: &mut StdRng) -> Vec<Point> {
    let target = ((points.len() as f64 * SILHOUETTE_SAMPLE_FRACTION).ceil() as usize).max(1);
    points
        .choose_multiple(rng, target.min(points.len()))
        .copied()
        .collect()
}

fn mean_distance(point: &Point, sample: &[Point]) -> f64 {
    if sample.is_empty() {
        return 0.0;
    }
    sample.iter().map(|q| point.distance(q)).sum::<f64>() / sample.len() as f64
}

/// Mean distance to sampled points, skipping the point itself if it was drawn
/// into its own cluster's sample.
fn mean_distance_excluding(point: &Point, sample: &[Point]) -> f64 {
    let mut sum = 0.0;
    let mut count = 0usize;
    let mut self_seen = false;
    for q in sample {
        // skip at most one occurrence of the point itself
        if !self_seen && q == point {
            self_seen = true;
            continue;
        }
        sum += point.distance(q);
        count += 1;
    }
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

pub(crate) fn round3(x: f64) -> f64 {
    (x * 1000.0).round() / 1000.0
}

/// Validate a distance threshold before a heuristic uses it.
pub(crate) fn check_threshold(threshold: f64) -> Result<f64, CnClustError> {
    if threshold.is_finite() && threshold > 0.0 {
        Ok(threshold)
    } else {
        Err(CnClustError::InvalidThreshold(threshold))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn rng() -> StdRng {
        StdRng::seed_from_u64(42)
    }

    fn cluster_points(points: &[(i32, f64, f64)]) -> FxHashMap<i32, Vec<Point>> {
        let mut map: FxHashMap<i32, Vec<Point>> = FxHashMap::default();
        for &(cluster, x, y) in points {
            map.entry(cluster).or_default().push(Point::new(x, y));
        }
        map
    }

    #[test]
    fn test_centroid() {
        let points = vec![Point::new(0.0, 0.0), Point::new(2.0, 4.0)];
        let c = centroid(&points).expect("nonempty");
        assert_eq!(c, Point::new(1.0, 2.0));
        assert!(centroid(&[]).is_none());
    }

    #[test]
    fn test_point_display() {
        assert_eq!(Point::new(0.125, 1.5).to_string(), "(0.12, 1.50)");
    }

    #[test]
    fn test_distance_matrix() {
        let mut centroids = FxHashMap::default();
        centroids.insert(1, Point::new(0.0, 0.0));
        centroids.insert(2, Point::new(3.0, 4.0));
        centroids.insert(3, Point::new(0.0, 1.0));
        let matrix = ClusterDistanceMatrix::from_centroids(&centroids);

        assert_eq!(matrix.get(1, 1), Some(0.0));
        assert_eq!(matrix.get(1, 2), Some(5.0));
        assert_eq!(matrix.get(2, 1), Some(5.0));
        assert_eq!(matrix.nearest_other(1), Some((3, 1.0)));

        let heat_map = matrix.to_heat_map();
        assert_eq!(heat_map.len(), 9);
        assert_eq!(heat_map[0].cluster1, 1);
        assert_eq!(heat_map[0].cluster2, 1);
    }

    #[test]
    fn test_silhouette_well_separated() {
        let points = cluster_points(&[
            (1, 0.0, 0.0),
            (1, 0.1, 0.0),
            (1, 0.0, 0.1),
            (2, 10.0, 10.0),
            (2, 10.1, 10.0),
            (2, 10.0, 10.1),
        ]);
        let result = silhouette_scores(&points, &mut rng()).expect("two clusters");
        assert_eq!(result.per_cluster.len(), 2);
        for s in &result.per_cluster {
            assert!(s.avg > 0.9, "cluster {} scored {}", s.cluster, s.avg);
        }
        assert!(result.overall > 0.9);
    }

    #[test]
    fn test_silhouette_single_cluster_is_none() {
        let points = cluster_points(&[(1, 0.0, 0.0), (1, 1.0, 1.0)]);
        assert!(silhouette_scores(&points, &mut rng()).is_none());
    }

    #[test]
    fn test_silhouette_singleton_member_is_zero() {
        let points = cluster_points(&[(1, 0.0, 0.0), (2, 5.0, 5.0), (2, 5.1, 5.0)]);
        let result = silhouette_scores(&points, &mut rng()).expect("two clusters");
        let singleton = result
            .per_cluster
            .iter()
            .find(|s| s.cluster == 1)
            .expect("cluster 1 present");
        assert_eq!(singleton.avg, 0.0);
        // the well-populated cluster still scores normally
        let other = result
            .per_cluster
            .iter()
            .find(|s| s.cluster == 2)
            .expect("cluster 2 present");
        assert!(other.avg > 0.9);
    }

    #[test]
    fn test_silhouette_identical_points_resolve_to_zero() {
        // max(a, b) == 0 resolves to 0 rather than NaN
        let points = cluster_points(&[(1, 1.0, 1.0), (1, 1.0, 1.0), (2, 1.0, 1.0)]);
        let result = silhouette_scores(&points, &mut rng()).expect("two clusters");
        for s in &result.per_cluster {
            assert_eq!(s.avg, 0.0);
        }
    }

    #[test]
    fn test_silhouette_seeded_reproducibility() {
        let points = cluster_points(&[
            (1, 0.0, 0.0),
            (1, 0.2, 0.1),
            (1, 0.1, 0.3),
            (2, 2.0, 2.0),
            (2, 2.2, 2.1),
        ]);
        let first = silhouette_scores(&points, &mut rng()).unwrap();
        let second = silhouette_scores(&points, &mut rng()).unwrap();
        assert_eq!(first.overall, second.overall);
    }

    #[test]
    fn test_round3() {
        assert_eq!(round3(0.123456), 0.123);
        assert_eq!(round3(0.9996), 1.0);
    }

    #[test]
    fn test_check_threshold() {
        assert!(check_threshold(0.5).is_ok());
        for bad in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            assert!(matches!(
                check_threshold(bad),
                Err(CnClustError::InvalidThreshold(_))
            ));
        }
    }
}
