//! Geometric primitives: identified points and unordered point sets.

use ndarray::{Array2, ArrayView1};
use ndarray_rand::rand_distr::{Distribution, Normal, Uniform};
use ndarray_rand::RandomExt;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::slice::Chunks;

use crate::error::{DitherError, Result};
use crate::metric::Metric;

/// Dense data representation used by the loaders (rows = samples, columns = features).
pub type DataMatrix = Array2<f64>;

/// A coordinate vector with an identifier.
///
/// The id takes part in equality but not in any ordering.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub coords: Vec<f64>,
    pub id: usize,
}

impl Point {
    pub fn new(coords: Vec<f64>, id: usize) -> Self {
        Self { coords, id }
    }

    /// The zero-id point without coordinates, returned as the mean of nothing.
    pub fn zero() -> Self {
        Self::default()
    }

    pub fn dimension(&self) -> usize {
        self.coords.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coords.is_empty()
    }
}

/// Lower and upper bound of one axis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub lower: f64,
    pub upper: f64,
}

impl Bounds {
    pub fn width(&self) -> f64 {
        self.upper - self.lower
    }
}

/// An unordered collection of points sharing one dimension.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PointSet {
    points: Vec<Point>,
}

impl PointSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a set, checking that every point has the dimension of the first.
    pub fn from_points(points: Vec<Point>) -> Result<Self> {
        if let Some(first) = points.first() {
            let expected = first.dimension();
            if expected == 0 {
                return Err(DitherError::DimensionMismatch {
                    index: 0,
                    expected: 1,
                    found: 0,
                });
            }
            if let Some((index, bad)) = points
                .iter()
                .enumerate()
                .find(|(_, p)| p.dimension() != expected)
            {
                return Err(DitherError::DimensionMismatch {
                    index,
                    expected,
                    found: bad.dimension(),
                });
            }
        }
        Ok(Self { points })
    }

    /// Convert matrix rows into points; the row index becomes the id.
    pub fn from_matrix(matrix: &DataMatrix) -> Self {
        let points = matrix
            .rows()
            .into_iter()
            .enumerate()
            .map(|(id, row)| Point::new(row.to_vec(), id))
            .collect();
        Self { points }
    }

    pub fn to_matrix(&self) -> DataMatrix {
        let dim = self.dimension().unwrap_or(0);
        let mut matrix = Array2::zeros((self.len(), dim));
        for (mut row, point) in matrix.rows_mut().into_iter().zip(&self.points) {
            row.assign(&ArrayView1::from(point.coords.as_slice()));
        }
        matrix
    }

    /// Kardinality of the set.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Dimension of the member points, `None` for an empty set.
    pub fn dimension(&self) -> Option<usize> {
        self.points.first().map(Point::dimension)
    }

    pub fn points(&self) -> &[Point] {
        &self.points
    }

    pub(crate) fn points_mut(&mut self) -> &mut [Point] {
        &mut self.points
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Point> {
        self.points.iter()
    }

    pub fn get(&self, index: usize) -> Option<&Point> {
        self.points.get(index)
    }

    pub fn push(&mut self, point: Point) {
        self.points.push(point);
    }

    pub fn into_points(self) -> Vec<Point> {
        self.points
    }

    /// Position of the first point equal to `point` (linear scan).
    pub fn contains(&self, point: &Point) -> Option<usize> {
        self.points.iter().position(|p| p == point)
    }

    /// Remove the point at `index` by swapping in the last one.
    /// Order is not preserved; an out-of-range index leaves the set untouched.
    pub fn remove(&mut self, index: usize) -> Option<Point> {
        if index >= self.points.len() {
            return None;
        }
        Some(self.points.swap_remove(index))
    }

    /// Component-wise mean. The empty set yields [`Point::zero`].
    pub fn mean(&self) -> Point {
        mean_of(self.points.iter())
    }

    /// Per-axis bounds; empty for an empty set.
    pub fn lower_and_upper_bounds(&self) -> Vec<Bounds> {
        let Some(first) = self.points.first() else {
            return Vec::new();
        };
        let mut bounds: Vec<Bounds> = first
            .coords
            .iter()
            .map(|&c| Bounds { lower: c, upper: c })
            .collect();
        for point in &self.points[1..] {
            for (b, &c) in bounds.iter_mut().zip(&point.coords) {
                if c < b.lower {
                    b.lower = c;
                }
                if c > b.upper {
                    b.upper = c;
                }
            }
        }
        bounds
    }

    /// Stable ascending sort on one axis; equal coordinates keep their order.
    pub fn sort_by_axis(&mut self, axis: usize) {
        self.points
            .sort_by(|a, b| a.coords[axis].total_cmp(&b.coords[axis]));
    }

    /// Sort on `axis` and split around the middle index.
    ///
    /// Returns `(left, right, median)` where the median is in neither half.
    /// With `n` points the left half holds `n / 2` of them.
    pub fn branch_by_median(mut self, axis: usize) -> Option<(PointSet, PointSet, Point)> {
        if self.points.is_empty() {
            return None;
        }
        self.sort_by_axis(axis);
        let median_index = self.points.len() / 2;
        let mut right = self.points.split_off(median_index);
        let right_points = right.split_off(1);
        let median = right.pop()?;
        Some((
            PointSet { points: self.points },
            PointSet {
                points: right_points,
            },
            median,
        ))
    }

    /// Contiguous chunks of `size` points; the last may be smaller.
    pub fn chunks(&self, size: usize) -> Chunks<'_, Point> {
        self.points.chunks(size.max(1))
    }

    /// Chunks sized for `workers` parallel tasks, never larger than
    /// `max_batch / workers` points each.
    pub fn chunks_for_workers(&self, workers: usize, max_batch: usize) -> Chunks<'_, Point> {
        self.chunks(worker_chunk_size(self.len(), workers, max_batch))
    }
}

impl FromIterator<Point> for PointSet {
    fn from_iter<I: IntoIterator<Item = Point>>(iter: I) -> Self {
        Self {
            points: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a PointSet {
    type Item = &'a Point;
    type IntoIter = std::slice::Iter<'a, Point>;

    fn into_iter(self) -> Self::IntoIter {
        self.points.iter()
    }
}

/// Chunk length used to split `n` points across `workers`.
///
/// Below the batch cap there is one chunk per worker. Once
/// `n / workers` exceeds `max_batch / workers` the chunk count, and with it
/// the number of merge-lock acquisitions, grows with `n`.
pub(crate) fn worker_chunk_size(n: usize, workers: usize, max_batch: usize) -> usize {
    let workers = workers.max(1);
    let divided = n.div_ceil(workers);
    let capped = (max_batch / workers).max(1);
    divided.min(capped).max(1)
}

/// Mean of any sequence of points, all of the first point's dimension.
pub(crate) fn mean_of<'a, I>(points: I) -> Point
where
    I: IntoIterator<Item = &'a Point>,
{
    let mut iter = points.into_iter();
    let Some(first) = iter.next() else {
        return Point::zero();
    };
    let mut sums = first.coords.clone();
    let mut count = 1usize;
    for point in iter {
        for (s, &c) in sums.iter_mut().zip(&point.coords) {
            *s += c;
        }
        count += 1;
    }
    let n = count as f64;
    sums.iter_mut().for_each(|s| *s /= n);
    Point::new(sums, 0)
}

/// Exhaustive nearest-point search. Ties keep the earliest point.
///
/// # Panics
///
/// Whatever `metric` panics on. The built-in metrics index coordinates
/// directly, so points shorter than [`Metric::min_dimension`] panic.
pub fn nearest_linear<'a, M: Metric + ?Sized>(
    points: &'a [Point],
    query: &Point,
    metric: &M,
) -> Option<(&'a Point, f64)> {
    let mut best: Option<(&Point, f64)> = None;
    for candidate in points {
        let distance = metric.distance(candidate, query);
        match best {
            Some((_, best_distance)) if distance >= best_distance => {}
            _ => best = Some((candidate, distance)),
        }
    }
    best
}

/// Generate `n` uniform points in `[0, 1)^dim` using a reproducible RNG.
pub fn generate_points(n: usize, dim: usize, rng: &mut ChaCha8Rng) -> PointSet {
    let matrix: DataMatrix = Array2::random_using((n, dim), Uniform::new(0.0, 1.0), rng);
    PointSet::from_matrix(&matrix)
}

/// Generate Gaussian blobs around each centre, `n_per_cluster` points apiece.
pub fn generate_clustered_points(
    n_per_cluster: usize,
    centres: &[Point],
    spread: f64,
    rng: &mut ChaCha8Rng,
) -> Result<PointSet> {
    if !(spread.is_finite() && spread >= 0.0) {
        return Err(DitherError::InvalidConfig(format!(
            "spread must be a finite, non-negative number, got {spread}"
        )));
    }
    let normal = Normal::new(0.0, spread)
        .map_err(|err| DitherError::InvalidConfig(format!("invalid spread {spread}: {err}")))?;
    let mut points = Vec::with_capacity(n_per_cluster * centres.len());
    for centre in centres {
        for _ in 0..n_per_cluster {
            let coords = centre
                .coords
                .iter()
                .map(|&c| c + normal.sample(rng))
                .collect();
            let id = points.len();
            points.push(Point::new(coords, id));
        }
    }
    PointSet::from_points(points)
}

/// Uniform random point inside per-axis bounds.
pub(crate) fn random_point_in<R: Rng + ?Sized>(
    bounds: &[Bounds],
    id: usize,
    rng: &mut R,
) -> Point {
    let coords = bounds
        .iter()
        .map(|b| b.lower + rng.gen::<f64>() * b.width())
        .collect();
    Point::new(coords, id)
}
