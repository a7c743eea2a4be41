//! k-d trees over point sets.
//!
//! [`KdTree`] recurses until every point sits in its own node and answers
//! nearest-neighbour queries by descent plus branch-and-bound backtracking.
//! [`BucketTree`] stops at a fixed depth and keeps the remaining points of
//! each branch together, which is what mean-cut style reduction needs.
//!
//! Both store their nodes in an arena and link parents and children by
//! index. Trees are immutable once built; a query keeps its best-so-far
//! distance on the stack, so one tree can serve many threads at once.

use crate::error::{DitherError, Result};
use crate::geom::{Point, PointSet};
use crate::metric::Metric;

/// Handle of a node inside a tree's arena.
pub type NodeId = usize;

#[derive(Debug, Clone)]
struct Node {
    pivot: Point,
    axis: usize,
    parent: Option<NodeId>,
    left: Option<NodeId>,
    right: Option<NodeId>,
}

/// A k-d tree built by recursive median splits with cyclic axes.
#[derive(Debug, Clone)]
pub struct KdTree {
    nodes: Vec<Node>,
    root: NodeId,
    dimension: usize,
}

impl KdTree {
    /// Build a tree over `points`. The set must be non-empty and uniform in
    /// dimension.
    pub fn build(points: PointSet) -> Result<Self> {
        let dimension = validated_dimension(&points)?;
        let mut nodes = Vec::with_capacity(points.len());
        let root = build_node(&mut nodes, points, 0, dimension, None)
            .ok_or(DitherError::EmptyPointSet)?;
        tracing::debug!(nodes = nodes.len(), dimension, "built k-d tree");
        Ok(Self {
            nodes,
            root,
            dimension,
        })
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Always false: empty trees cannot be built.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Number of levels, counting the root as one.
    pub fn depth(&self) -> usize {
        let mut depths = vec![0usize; self.nodes.len()];
        // arena order is pre-order, so parents come before their children
        for (id, node) in self.nodes.iter().enumerate() {
            depths[id] = node.parent.map_or(1, |parent| depths[parent] + 1);
        }
        depths.into_iter().max().unwrap_or(0)
    }

    /// Pivot points in pre-order.
    pub fn points(&self) -> impl Iterator<Item = &Point> + '_ {
        self.nodes.iter().map(|node| &node.pivot)
    }

    /// Closest stored point to `query` and its distance under `metric`.
    pub fn nearest_neighbor<M: Metric + ?Sized>(
        &self,
        query: &Point,
        metric: &M,
    ) -> Result<(&Point, f64)> {
        if query.dimension() != self.dimension {
            return Err(DitherError::DimensionMismatch {
                index: 0,
                expected: self.dimension,
                found: query.dimension(),
            });
        }
        if self.dimension < metric.min_dimension() {
            return Err(DitherError::MetricDimension {
                metric: metric.name().to_string(),
                required: metric.min_dimension(),
                found: self.dimension,
            });
        }
        Ok(self.nearest_unchecked(query, metric))
    }

    /// [`nearest_neighbor`](Self::nearest_neighbor) for callers that already
    /// guarantee the query and metric fit the tree.
    pub(crate) fn nearest_unchecked<M: Metric + ?Sized>(
        &self,
        query: &Point,
        metric: &M,
    ) -> (&Point, f64) {
        let (id, distance) = self.search(self.root, query, metric, None);
        (&self.nodes[id].pivot, distance)
    }

    /// Search the subtree rooted at `start`, improving on `best` if possible.
    fn search<M: Metric + ?Sized>(
        &self,
        start: NodeId,
        query: &Point,
        metric: &M,
        best: Option<(NodeId, f64)>,
    ) -> (NodeId, f64) {
        let mut current = start;
        while let Some(next) = self.descend(current, query) {
            current = next;
        }

        let leaf_distance = metric.distance(&self.nodes[current].pivot, query);
        let mut best = match best {
            Some(found) if found.1 <= leaf_distance => found,
            _ => (current, leaf_distance),
        };

        while current != start {
            let child = current;
            let Some(parent) = self.nodes[child].parent else {
                break;
            };
            current = parent;
            let node = &self.nodes[current];

            let diff = query.coords[node.axis] - node.pivot.coords[node.axis];
            if metric.axis_bound(node.axis, diff) < best.1 {
                // the other side of the splitting plane may hold something closer
                let sibling = if node.left == Some(child) {
                    node.right
                } else {
                    node.left
                };
                if let Some(sibling) = sibling {
                    best = self.search(sibling, query, metric, Some(best));
                }
            }

            let distance = metric.distance(&node.pivot, query);
            if distance < best.1 {
                best = (current, distance);
            }
        }
        best
    }

    fn descend(&self, id: NodeId, query: &Point) -> Option<NodeId> {
        let node = &self.nodes[id];
        let (preferred, fallback) = if query.coords[node.axis] < node.pivot.coords[node.axis] {
            (node.left, node.right)
        } else {
            (node.right, node.left)
        };
        preferred.or(fallback)
    }
}

fn build_node(
    nodes: &mut Vec<Node>,
    points: PointSet,
    axis: usize,
    dimension: usize,
    parent: Option<NodeId>,
) -> Option<NodeId> {
    let (left, right, pivot) = points.branch_by_median(axis)?;
    let id = nodes.len();
    nodes.push(Node {
        pivot,
        axis,
        parent,
        left: None,
        right: None,
    });

    let next_axis = (axis + 1) % dimension;
    let left = build_node(nodes, left, next_axis, dimension, Some(id));
    let right = build_node(nodes, right, next_axis, dimension, Some(id));
    nodes[id].left = left;
    nodes[id].right = right;
    Some(id)
}

fn validated_dimension(points: &PointSet) -> Result<usize> {
    let dimension = points.dimension().ok_or(DitherError::EmptyPointSet)?;
    if dimension == 0 {
        return Err(DitherError::DimensionMismatch {
            index: 0,
            expected: 1,
            found: 0,
        });
    }
    if let Some((index, bad)) = points
        .iter()
        .enumerate()
        .find(|(_, p)| p.dimension() != dimension)
    {
        return Err(DitherError::DimensionMismatch {
            index,
            expected: dimension,
            found: bad.dimension(),
        });
    }
    Ok(dimension)
}

#[derive(Debug, Clone)]
enum Content {
    Pivot { point: Point, axis: usize },
    Bucket(Vec<Point>),
}

#[derive(Debug, Clone)]
struct BucketNode {
    content: Content,
    left: Option<NodeId>,
    right: Option<NodeId>,
}

/// A k-d tree cut off at a fixed depth.
///
/// Nodes above `max_depth` hold a median pivot like [`KdTree`]; a branch
/// that reaches `max_depth`, or runs down to a single point, keeps all of
/// its remaining points in one bucket.
#[derive(Debug, Clone)]
pub struct BucketTree {
    nodes: Vec<BucketNode>,
    max_depth: usize,
    dimension: usize,
}

impl BucketTree {
    pub fn build(points: PointSet, max_depth: usize) -> Result<Self> {
        let dimension = validated_dimension(&points)?;
        let mut nodes = Vec::new();
        build_bucket_node(&mut nodes, points, 0, dimension, max_depth);
        tracing::debug!(
            nodes = nodes.len(),
            max_depth,
            dimension,
            "built bucket k-d tree"
        );
        Ok(Self {
            nodes,
            max_depth,
            dimension,
        })
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Every bucket, left to right.
    pub fn buckets(&self) -> Vec<&[Point]> {
        self.nodes
            .iter()
            .filter_map(|node| match &node.content {
                Content::Bucket(points) => Some(points.as_slice()),
                Content::Pivot { .. } => None,
            })
            .collect()
    }

    /// Pivot points of the internal nodes, pre-order.
    pub fn pivots(&self) -> Vec<&Point> {
        self.nodes
            .iter()
            .filter_map(|node| match &node.content {
                Content::Pivot { point, .. } => Some(point),
                Content::Bucket(_) => None,
            })
            .collect()
    }

    /// Mean of each bucket; ids number the buckets left to right.
    pub fn representatives(&self) -> PointSet {
        self.buckets()
            .into_iter()
            .filter(|bucket| !bucket.is_empty())
            .enumerate()
            .map(|(id, bucket)| {
                let mut mean = crate::geom::mean_of(bucket.iter());
                mean.id = id;
                mean
            })
            .collect()
    }

    /// The bucket `query` descends into.
    pub fn locate(&self, query: &Point) -> Result<&[Point]> {
        if query.dimension() != self.dimension {
            return Err(DitherError::DimensionMismatch {
                index: 0,
                expected: self.dimension,
                found: query.dimension(),
            });
        }
        let mut current = 0;
        loop {
            let node = &self.nodes[current];
            match &node.content {
                Content::Bucket(points) => return Ok(points),
                Content::Pivot { point, axis } => {
                    let (preferred, fallback) = if query.coords[*axis] < point.coords[*axis] {
                        (node.left, node.right)
                    } else {
                        (node.right, node.left)
                    };
                    match preferred.or(fallback) {
                        Some(next) => current = next,
                        None => return Ok(&[]),
                    }
                }
            }
        }
    }
}

fn build_bucket_node(
    nodes: &mut Vec<BucketNode>,
    points: PointSet,
    axis: usize,
    dimension: usize,
    depth_left: usize,
) -> Option<NodeId> {
    if points.is_empty() {
        return None;
    }
    let id = nodes.len();
    if depth_left == 0 || points.len() == 1 {
        nodes.push(BucketNode {
            content: Content::Bucket(points.into_points()),
            left: None,
            right: None,
        });
        return Some(id);
    }

    let (left, right, pivot) = points.branch_by_median(axis)?;
    nodes.push(BucketNode {
        content: Content::Pivot { point: pivot, axis },
        left: None,
        right: None,
    });
    let next_axis = (axis + 1) % dimension;
    let left = build_bucket_node(nodes, left, next_axis, dimension, depth_left - 1);
    let right = build_bucket_node(nodes, right, next_axis, dimension, depth_left - 1);
    nodes[id].left = left;
    nodes[id].right = right;
    Some(id)
}

/// Reduce `points` to one mean per bucket of a depth-`depth` [`BucketTree`].
pub fn mean_cut(points: PointSet, depth: usize) -> Result<PointSet> {
    Ok(BucketTree::build(points, depth)?.representatives())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geom::{generate_points, nearest_linear};
    use crate::metric::DistanceMetric;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;
    use rayon::prelude::*;

    fn two_squares() -> PointSet {
        let coords = [
            [0.0, 0.0],
            [1.0, 0.0],
            [0.0, 1.0],
            [1.0, 1.0],
            [100.0, 100.0],
            [101.0, 100.0],
            [100.0, 101.0],
            [101.0, 101.0],
        ];
        PointSet::from_points(
            coords
                .iter()
                .enumerate()
                .map(|(id, c)| Point::new(c.to_vec(), id))
                .collect(),
        )
        .unwrap()
    }

    fn random_query(dim: usize, rng: &mut ChaCha8Rng) -> Point {
        Point::new((0..dim).map(|_| rng.gen_range(-0.2..1.2)).collect(), 0)
    }

    #[test]
    fn finds_corners_of_two_squares() {
        let tree = KdTree::build(two_squares()).unwrap();
        let metric = DistanceMetric::Euclidean;

        let (best, distance) = tree
            .nearest_neighbor(&Point::new(vec![0.1, 0.1], 0), &metric)
            .unwrap();
        assert_eq!(best.coords, vec![0.0, 0.0]);
        assert!((distance - 0.02).abs() < 1e-9);

        let (best, distance) = tree
            .nearest_neighbor(&Point::new(vec![100.9, 100.9], 0), &metric)
            .unwrap();
        assert_eq!(best.coords, vec![101.0, 101.0]);
        assert!((distance - 0.02).abs() < 1e-9);
    }

    #[test]
    fn matches_linear_scan_on_small_sets() {
        let mut rng = ChaCha8Rng::seed_from_u64(2024);
        let metric = DistanceMetric::Euclidean;
        for dim in 2..=4 {
            for n in 1..50 {
                let points = generate_points(n, dim, &mut rng);
                let tree = KdTree::build(points.clone()).unwrap();
                for _ in 0..100 {
                    let query = random_query(dim, &mut rng);
                    let (found, distance) = tree.nearest_neighbor(&query, &metric).unwrap();
                    let (expected, expected_distance) =
                        nearest_linear(points.points(), &query, &metric).unwrap();
                    assert_eq!(found, expected, "dim {dim}, n {n}");
                    assert_eq!(distance, expected_distance);
                }
            }
        }
    }

    #[test]
    fn red_mean_queries_match_linear_scan() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let metric = DistanceMetric::RedMean;
        let colour = |rng: &mut ChaCha8Rng, id| {
            Point::new((0..4).map(|_| rng.gen_range(0..=255) as f64).collect(), id)
        };
        for _ in 0..20 {
            let palette: PointSet = (0..16).map(|id| colour(&mut rng, id)).collect();
            let tree = KdTree::build(palette.clone()).unwrap();
            for _ in 0..100 {
                let query = colour(&mut rng, 0);
                let (_, distance) = tree.nearest_neighbor(&query, &metric).unwrap();
                let (_, expected) = nearest_linear(palette.points(), &query, &metric).unwrap();
                assert_eq!(distance, expected);
            }
        }
    }

    #[test]
    fn single_node_tree_returns_its_point() {
        let points: PointSet = vec![Point::new(vec![4.0, 2.0], 9)].into_iter().collect();
        let tree = KdTree::build(points).unwrap();
        assert_eq!(tree.len(), 1);
        assert_eq!(tree.depth(), 1);
        let (best, distance) = tree
            .nearest_neighbor(&Point::new(vec![0.0, 0.0], 0), &DistanceMetric::Euclidean)
            .unwrap();
        assert_eq!(best.id, 9);
        assert_eq!(distance, 20.0);
    }

    #[test]
    fn rejects_empty_and_mismatched_input() {
        assert!(matches!(
            KdTree::build(PointSet::new()),
            Err(DitherError::EmptyPointSet)
        ));
        let mixed: PointSet = vec![Point::new(vec![0.0, 0.0], 0), Point::new(vec![1.0], 1)]
            .into_iter()
            .collect();
        assert!(matches!(
            KdTree::build(mixed),
            Err(DitherError::DimensionMismatch { index: 1, .. })
        ));

        let tree = KdTree::build(two_squares()).unwrap();
        let err = tree
            .nearest_neighbor(&Point::new(vec![0.0, 0.0, 0.0], 0), &DistanceMetric::Euclidean)
            .unwrap_err();
        assert!(matches!(
            err,
            DitherError::DimensionMismatch {
                expected: 2,
                found: 3,
                ..
            }
        ));
        let err = tree
            .nearest_neighbor(&Point::new(vec![0.0, 0.0], 0), &DistanceMetric::RedMean)
            .unwrap_err();
        assert!(matches!(err, DitherError::MetricDimension { .. }));
    }

    #[test]
    fn tree_is_balanced() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let points = generate_points(1023, 3, &mut rng);
        let tree = KdTree::build(points).unwrap();
        assert_eq!(tree.len(), 1023);
        assert_eq!(tree.depth(), 10);
        assert_eq!(tree.points().count(), 1023);
    }

    #[test]
    fn duplicate_points_are_found() {
        let points: PointSet = (0..20).map(|id| Point::new(vec![1.0, 1.0], id)).collect();
        let tree = KdTree::build(points).unwrap();
        let (best, distance) = tree
            .nearest_neighbor(&Point::new(vec![1.0, 1.0], 0), &DistanceMetric::Euclidean)
            .unwrap();
        assert_eq!(best.coords, vec![1.0, 1.0]);
        assert_eq!(distance, 0.0);
    }

    #[test]
    fn concurrent_queries_share_one_tree() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let points = generate_points(500, 3, &mut rng);
        let tree = KdTree::build(points.clone()).unwrap();
        let queries: Vec<Point> = (0..400).map(|_| random_query(3, &mut rng)).collect();
        let metric = DistanceMetric::Euclidean;

        let parallel: Vec<f64> = queries
            .par_iter()
            .map(|q| tree.nearest_neighbor(q, &metric).unwrap().1)
            .collect();
        for (query, distance) in queries.iter().zip(parallel) {
            let (_, expected) = nearest_linear(points.points(), query, &metric).unwrap();
            assert_eq!(distance, expected);
        }
    }

    #[test]
    fn bucket_tree_keeps_every_point() {
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let points = generate_points(300, 3, &mut rng);
        for depth in 0..6 {
            let tree = BucketTree::build(points.clone(), depth).unwrap();
            let bucketed: usize = tree.buckets().iter().map(|b| b.len()).sum();
            assert_eq!(bucketed + tree.pivots().len(), 300);
            assert_eq!(tree.pivots().len(), (1 << depth) - 1);
            assert_eq!(tree.buckets().len(), 1 << depth);
            assert_eq!(tree.representatives().len(), 1 << depth);
        }
    }

    #[test]
    fn bucket_tree_locates_members() {
        let mut rng = ChaCha8Rng::seed_from_u64(6);
        let points = generate_points(200, 2, &mut rng);
        let tree = BucketTree::build(points, 3).unwrap();
        for bucket in tree.buckets() {
            for member in bucket {
                let found = tree.locate(member).unwrap();
                assert!(found.contains(member));
            }
        }
        assert!(tree.locate(&Point::new(vec![0.5], 0)).is_err());
    }

    #[test]
    fn small_sets_end_in_single_point_buckets() {
        let tree = BucketTree::build(two_squares(), 10).unwrap();
        assert!(tree.buckets().iter().all(|b| b.len() == 1));
        let bucketed: usize = tree.buckets().iter().map(|b| b.len()).sum();
        assert_eq!(bucketed + tree.pivots().len(), 8);
    }

    #[test]
    fn mean_cut_summarises_clusters() {
        let reduced = mean_cut(two_squares(), 1).unwrap();
        // the root pivot (100, 100) stays out of both buckets
        assert_eq!(reduced.len(), 2);
        assert!(reduced.iter().any(|p| p.coords[0] < 2.0));
        assert!(reduced.iter().any(|p| p.coords[0] > 99.0));

        let whole = mean_cut(two_squares(), 0).unwrap();
        assert_eq!(whole.len(), 1);
        assert_eq!(whole.points()[0].coords, vec![50.5, 50.5]);
    }
}
