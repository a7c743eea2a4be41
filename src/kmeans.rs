//! Parallel k-means clustering with random restarts.
//!
//! Every iteration runs two phases separated by a barrier. The assignment
//! phase splits the points into contiguous chunks, finds the nearest centroid
//! for each point into a chunk-local accumulator and merges the accumulators
//! under one lock. The update phase recomputes every centroid concurrently;
//! each task owns exactly one centroid slot. Clusters that lost all of their
//! points are reseeded at a random position inside the bounding box so that
//! `k` never changes.

use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use crate::config::{ClusteringConfig, RestartConfig};
use crate::error::{DitherError, Result};
use crate::geom::{mean_of, random_point_in, Bounds, Point, PointSet};
use crate::metric::{DistanceMetric, Metric};

/// Why a run stopped iterating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum StopReason {
    /// The accuracy criterion held for the required consecutive iterations.
    Converged,
    /// The iteration cap was reached first.
    IterationLimit,
    /// The cancellation flag was raised between iterations.
    Cancelled,
}

/// Diagnostics for a single assignment + update iteration.
#[derive(Debug, Clone, Serialize)]
pub struct IterationStats {
    /// 1-based iteration number over the lifetime of the clustering.
    pub iteration: usize,
    /// Largest centroid movement, in metric units.
    pub max_change: f64,
    /// `max_change` in percent of the bounding-box distance.
    pub relative_change_percent: f64,
    /// Total point-to-centroid distance after the update.
    pub total_error: f64,
    /// Clusters reseeded because they had no members.
    pub reseeded: usize,
}

/// Result of one call to [`Clustering::run`].
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub iterations: usize,
    pub converged: bool,
    pub stop_reason: StopReason,
    pub final_change_percent: Option<f64>,
    pub total_error: f64,
    pub reseeds: usize,
    pub history: Vec<IterationStats>,
}

/// A k-means problem over an owned point set.
#[derive(Debug, Clone)]
pub struct Clustering<M = DistanceMetric> {
    means: PointSet,
    points: PointSet,
    k: usize,
    /// Member point indices per centroid, ascending, index-aligned with `means`.
    clusters: Vec<Vec<usize>>,
    bounds: Vec<Bounds>,
    max_dist: f64,
    metric: M,
    config: ClusteringConfig,
    rng: ChaCha8Rng,
    iterations: usize,
    reseeds: usize,
}

impl<M: Metric> Clustering<M> {
    /// Set up a problem with `k` centroids drawn uniformly inside the
    /// per-axis bounds of `points`.
    ///
    /// Fails on an empty set, `k == 0`, fewer points than `k`, mixed
    /// dimensions, or a metric that cannot handle the point dimension.
    pub fn new(
        points: PointSet,
        k: usize,
        metric: M,
        config: ClusteringConfig,
        rng: &mut ChaCha8Rng,
    ) -> Result<Self> {
        config.validate()?;
        if k == 0 {
            return Err(DitherError::InvalidConfig(
                "k must be greater than zero".into(),
            ));
        }
        let dim = points.dimension().ok_or(DitherError::EmptyPointSet)?;
        check_dimensions(&points, dim)?;
        if points.len() < k {
            return Err(DitherError::TooFewPoints {
                points: points.len(),
                k,
            });
        }
        if dim < metric.min_dimension() {
            return Err(DitherError::MetricDimension {
                metric: metric.name().to_string(),
                required: metric.min_dimension(),
                found: dim,
            });
        }

        let bounds = points.lower_and_upper_bounds();
        let lower = Point::new(bounds.iter().map(|b| b.lower).collect(), 0);
        let upper = Point::new(bounds.iter().map(|b| b.upper).collect(), 0);
        let max_dist = metric.distance(&lower, &upper);

        let mut rng = ChaCha8Rng::seed_from_u64(rng.next_u64());
        let means = (0..k)
            .map(|cid| random_point_in(&bounds, cid, &mut rng))
            .collect();

        Ok(Self {
            means,
            points,
            k,
            clusters: vec![Vec::new(); k],
            bounds,
            max_dist,
            metric,
            config,
            rng,
            iterations: 0,
            reseeds: 0,
        })
    }

    pub fn k(&self) -> usize {
        self.k
    }

    /// The current `k` centroids.
    pub fn centroids(&self) -> &PointSet {
        &self.means
    }

    pub fn points(&self) -> &PointSet {
        &self.points
    }

    /// Member point indices of each cluster. Always `k` entries; all empty
    /// before the first iteration.
    pub fn clusters(&self) -> &[Vec<usize>] {
        &self.clusters
    }

    /// Materialise the members of one cluster.
    pub fn cluster_points(&self, cluster: usize) -> PointSet {
        self.clusters
            .get(cluster)
            .map(|members| {
                members
                    .iter()
                    .map(|&idx| self.points.points()[idx].clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Cluster index per source point; empty before the first iteration.
    pub fn assignments(&self) -> Vec<usize> {
        if self.iterations == 0 {
            return Vec::new();
        }
        let mut assignments = vec![0usize; self.points.len()];
        for (cid, members) in self.clusters.iter().enumerate() {
            for &idx in members {
                assignments[idx] = cid;
            }
        }
        assignments
    }

    pub fn cluster_sizes(&self) -> Vec<usize> {
        self.clusters.iter().map(Vec::len).collect()
    }

    /// Distance between the corners of the bounding box.
    pub fn max_distance(&self) -> f64 {
        self.max_dist
    }

    /// Iterations performed so far, over all runs.
    pub fn iterations(&self) -> usize {
        self.iterations
    }

    /// Clusters reseeded so far, over all runs.
    pub fn reseeds(&self) -> usize {
        self.reseeds
    }

    pub fn config(&self) -> &ClusteringConfig {
        &self.config
    }

    /// Sum over all points of the distance to their assigned centroid.
    pub fn total_error(&self) -> f64 {
        let points = self.points.points();
        let metric = &self.metric;
        let per_cluster: Vec<f64> = self
            .clusters
            .par_iter()
            .zip(self.means.points().par_iter())
            .map(|(members, mean)| {
                members
                    .iter()
                    .map(|&idx| metric.distance(mean, &points[idx]))
                    .sum()
            })
            .collect();
        per_cluster.iter().sum()
    }

    /// Run until convergence or the iteration cap, using the configured
    /// accuracy and consecutive-stable count.
    pub fn run(&mut self) -> RunSummary {
        self.run_until(&AtomicBool::new(false))
    }

    /// Replace the accuracy threshold (percent) and consecutive-stable
    /// requirement, then [`run`](Self::run).
    pub fn run_with(
        &mut self,
        accuracy_percent: f64,
        consecutive_stable: usize,
    ) -> Result<RunSummary> {
        let config = ClusteringConfig {
            accuracy_percent,
            consecutive_stable,
            ..self.config.clone()
        };
        config.validate()?;
        self.config = config;
        Ok(self.run())
    }

    /// Run, checking `cancel` between iterations.
    pub fn run_until(&mut self, cancel: &AtomicBool) -> RunSummary {
        let accuracy = self.config.accuracy_percent;
        let required = self.config.consecutive_stable;
        let limit = self.config.max_iterations;
        let reseeds_before = self.reseeds;

        let mut stable = 0usize;
        let mut history: Vec<IterationStats> = Vec::new();

        let stop_reason = loop {
            if stable >= required {
                break StopReason::Converged;
            }
            if history.len() >= limit {
                break StopReason::IterationLimit;
            }
            if cancel.load(Ordering::Relaxed) {
                break StopReason::Cancelled;
            }
            let stats = self.step();
            if stats.relative_change_percent < accuracy {
                stable += 1;
            } else {
                stable = 0;
            }
            history.push(stats);
        };

        let summary = RunSummary {
            iterations: history.len(),
            converged: stop_reason == StopReason::Converged,
            stop_reason,
            final_change_percent: history.last().map(|s| s.relative_change_percent),
            total_error: history
                .last()
                .map(|s| s.total_error)
                .unwrap_or_else(|| self.total_error()),
            reseeds: self.reseeds - reseeds_before,
            history,
        };
        tracing::info!(
            iterations = summary.iterations,
            converged = summary.converged,
            stop = ?summary.stop_reason,
            total_error = summary.total_error,
            reseeds = summary.reseeds,
            "kmeans run finished"
        );
        summary
    }

    /// Perform one assignment + update iteration.
    pub fn step(&mut self) -> IterationStats {
        self.assign();
        let (max_change, reseeded) = self.update();
        self.iterations += 1;
        self.reseeds += reseeded;

        let relative_change_percent = if self.max_dist > 0.0 {
            max_change * 100.0 / self.max_dist
        } else {
            0.0
        };
        let stats = IterationStats {
            iteration: self.iterations,
            max_change,
            relative_change_percent,
            total_error: self.total_error(),
            reseeded,
        };
        if reseeded > 0 {
            tracing::warn!(
                iteration = stats.iteration,
                reseeded,
                k = self.k,
                "clusters lost all points and were reseeded"
            );
        }
        tracing::debug!(
            iteration = stats.iteration,
            max_change = stats.max_change,
            change_percent = stats.relative_change_percent,
            total_error = stats.total_error,
            "kmeans iteration"
        );
        stats
    }

    /// Assignment phase: rebuild every cluster's member list.
    fn assign(&mut self) {
        let k = self.k;
        let means = self.means.points();
        let metric = &self.metric;
        let chunks: Vec<&[Point]> = self
            .points
            .chunks_for_workers(self.config.worker_count(), self.config.max_batch_size)
            .collect();
        let stride = chunks.first().map_or(0, |chunk| chunk.len());
        let merged: Mutex<Vec<Vec<usize>>> = Mutex::new(vec![Vec::new(); k]);

        chunks.par_iter().enumerate().for_each(|(chunk_idx, chunk)| {
            let start = chunk_idx * stride;
            let mut local: Vec<Vec<usize>> = vec![Vec::new(); k];
            for (offset, point) in chunk.iter().enumerate() {
                local[closest_mean_index(means, point, metric)].push(start + offset);
            }
            let mut shared = merged.lock().unwrap_or_else(PoisonError::into_inner);
            for (cluster, members) in shared.iter_mut().zip(local) {
                cluster.extend(members);
            }
        });

        let mut clusters = merged.into_inner().unwrap_or_else(PoisonError::into_inner);
        clusters
            .par_iter_mut()
            .for_each(|members| members.sort_unstable());
        self.clusters = clusters;
    }

    /// Update phase: move every centroid to its cluster mean, reseeding
    /// empty clusters. Returns the largest movement and the reseed count.
    fn update(&mut self) -> (f64, usize) {
        let seeds: Vec<u64> = (0..self.k).map(|_| self.rng.next_u64()).collect();
        let points = self.points.points();
        let bounds = &self.bounds;
        let metric = &self.metric;
        let changes: Mutex<Vec<(f64, bool)>> = Mutex::new(Vec::with_capacity(self.k));

        self.means
            .points_mut()
            .par_iter_mut()
            .zip(self.clusters.par_iter())
            .zip(seeds.par_iter())
            .enumerate()
            .for_each(|(cid, ((mean, members), &seed))| {
                let reseeded = members.is_empty();
                let next = if reseeded {
                    let mut rng = ChaCha8Rng::seed_from_u64(seed);
                    random_point_in(bounds, cid, &mut rng)
                } else {
                    let mut next = mean_of(members.iter().map(|&idx| &points[idx]));
                    next.id = cid;
                    next
                };
                let change = metric.distance(mean, &next);
                *mean = next;
                changes
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push((change, reseeded));
            });

        let changes = changes.into_inner().unwrap_or_else(PoisonError::into_inner);
        let max_change = changes.iter().fold(0.0f64, |acc, &(c, _)| acc.max(c));
        let reseeded = changes.iter().filter(|(_, r)| *r).count();
        (max_change, reseeded)
    }
}

fn check_dimensions(points: &PointSet, expected: usize) -> Result<()> {
    match points
        .iter()
        .enumerate()
        .find(|(_, p)| p.dimension() != expected)
    {
        Some((index, bad)) => Err(DitherError::DimensionMismatch {
            index,
            expected,
            found: bad.dimension(),
        }),
        None => Ok(()),
    }
}

/// Index of the centroid closest to `point`; the lowest index wins ties.
///
/// # Panics
///
/// Whatever `metric` panics on. The built-in metrics index coordinates
/// directly, so points shorter than [`Metric::min_dimension`] panic.
/// Returns 0 for an empty `means`.
pub fn closest_mean_index<M: Metric + ?Sized>(
    means: &[Point],
    point: &Point,
    metric: &M,
) -> usize {
    let mut best = 0usize;
    let mut best_distance = f64::INFINITY;
    for (cid, mean) in means.iter().enumerate() {
        let distance = metric.distance(point, mean);
        if cid == 0 || distance < best_distance {
            best = cid;
            best_distance = distance;
        }
    }
    best
}

/// Best of several independently seeded clustering runs.
#[derive(Debug, Clone, Serialize)]
pub struct ClusteringRun {
    pub centroids: PointSet,
    pub assignments: Vec<usize>,
    pub cluster_sizes: Vec<usize>,
    pub total_error: f64,
    /// Index of the winning restart.
    pub restart: usize,
    /// Total error of every restart, in restart order.
    pub restart_errors: Vec<f64>,
    pub summary: RunSummary,
}

impl ClusteringRun {
    fn from_clustering<M: Metric>(
        clustering: &Clustering<M>,
        summary: RunSummary,
        restart: usize,
    ) -> Self {
        Self {
            centroids: clustering.centroids().clone(),
            assignments: clustering.assignments(),
            cluster_sizes: clustering.cluster_sizes(),
            total_error: clustering.total_error(),
            restart,
            restart_errors: Vec::new(),
            summary,
        }
    }
}

/// Cluster `points` `restarts.restarts` times from independent random starts
/// and keep the run with the lowest total error (earliest wins ties).
///
/// Restart seeds are drawn from `rng` up front, so sequential and parallel
/// scheduling select the same run.
pub fn best_of_restarts<M>(
    points: &PointSet,
    k: usize,
    metric: M,
    clustering: &ClusteringConfig,
    restarts: &RestartConfig,
    rng: &mut ChaCha8Rng,
) -> Result<ClusteringRun>
where
    M: Metric + Clone + Send,
{
    restarts.validate()?;
    let seeds: Vec<u64> = (0..restarts.restarts).map(|_| rng.next_u64()).collect();

    let run_one = |restart: usize, seed: u64| -> Result<ClusteringRun> {
        let mut restart_rng = ChaCha8Rng::seed_from_u64(seed);
        let mut problem = Clustering::new(
            points.clone(),
            k,
            metric.clone(),
            clustering.clone(),
            &mut restart_rng,
        )?;
        let summary = problem.run();
        Ok(ClusteringRun::from_clustering(&problem, summary, restart))
    };

    let runs: Vec<ClusteringRun> = if restarts.parallel {
        seeds
            .par_iter()
            .enumerate()
            .map(|(restart, &seed)| run_one(restart, seed))
            .collect::<Result<_>>()?
    } else {
        seeds
            .iter()
            .enumerate()
            .map(|(restart, &seed)| run_one(restart, seed))
            .collect::<Result<_>>()?
    };

    let restart_errors: Vec<f64> = runs.iter().map(|run| run.total_error).collect();
    let mut best: Option<ClusteringRun> = None;
    for run in runs {
        if best
            .as_ref()
            .map(|current| run.total_error < current.total_error)
            .unwrap_or(true)
        {
            tracing::debug!(
                restart = run.restart,
                total_error = run.total_error,
                converged = run.summary.converged,
                iterations = run.summary.iterations,
                "accepting new best kmeans solution"
            );
            best = Some(run);
        }
    }

    let mut best = best.ok_or_else(|| {
        DitherError::InvalidData("failed to cluster the provided points".into())
    })?;
    best.restart_errors = restart_errors;
    Ok(best)
}
